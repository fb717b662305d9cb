use std::error::Error as StdError;
use std::io;

use bytes::{Buf, Bytes};
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;
use tokio::sync::mpsc;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::repo::stream::StreamMode;
use crate::DavResult;

// Body chunks queued for the writing thread.
const CHANNEL_DEPTH: usize = 4;

impl crate::DavHandler {
    pub(crate) async fn handle_put<ReqBody, ReqData, ReqError>(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: ReqBody,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let res = self.resource(path).await?;
        if res.is_collection() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }
        if !self.has_parent(&res).await? {
            return Err(DavError::Conflict(format!(
                "parent collection of <{}> does not exist",
                res.uri()
            )));
        }
        let existed = res.exists();

        // Content-Range means a partial update at an offset.
        let (mode, offset) = match req.headers().typed_get::<headers::ContentRange>() {
            Some(range) => match range.bytes_range() {
                Some((start, _)) => (StreamMode::WriteSeekable, Some(start)),
                None => return Err(StatusCode::RANGE_NOT_SATISFIABLE.into()),
            },
            None => (StreamMode::WriteTrunc, None),
        };
        debug!("PUT {} mode {:?} offset {:?}", res.uri(), mode, offset);

        let (tx, mut rx) = mpsc::channel::<Result<Bytes, ()>>(CHANNEL_DEPTH);
        let repo = self.repo.clone();
        let writer = tokio::task::spawn_blocking(move || -> DavResult<()> {
            let mut stream = repo.open_stream(&res, mode)?;
            let mut result = match offset {
                Some(pos) => repo.seek_stream(&mut stream, pos),
                None => Ok(()),
            };
            while result.is_ok() {
                result = match rx.blocking_recv() {
                    Some(Ok(buf)) => repo.write_stream(&mut stream, &buf),
                    Some(Err(())) => Err(DavError::IoError(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "request body ended early",
                    ))),
                    None => break,
                };
            }
            match result {
                Ok(()) => repo.close_stream(stream, true),
                Err(e) => {
                    if let Err(e2) = repo.close_stream(stream, false) {
                        warn!("rollback of {} failed: {}", res.uri(), e2);
                    }
                    Err(e)
                }
            }
        });

        pin_utils::pin_mut!(body);
        while let Some(data) = body.data().await {
            let item = match data {
                Ok(mut buf) => {
                    if !buf.has_remaining() {
                        continue;
                    }
                    Ok(buf.copy_to_bytes(buf.remaining()))
                }
                Err(e) => {
                    debug!("PUT {}: error reading body: {}", path, e);
                    Err(())
                }
            };
            let last = item.is_err();
            // a send error means the writer gave up; its result tells why.
            if tx.send(item).await.is_err() || last {
                break;
            }
        }
        drop(tx);

        match writer.await {
            Ok(r) => r?,
            Err(e) => return Err(DavError::Internal(format!("upload task failed: {e}"))),
        }

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = if existed {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        resp.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(resp)
    }
}
