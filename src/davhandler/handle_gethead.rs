use std::io;

use bytes::Bytes;
use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use tokio::sync::mpsc;

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::repo::deliver::DeliverSink;
use crate::DavResult;

// Chunks in flight between the delivering thread and the response body.
const CHANNEL_DEPTH: usize = 4;

// Sink that hands chunks to the response body. Fails once the body is gone.
struct ChannelSink(mpsc::Sender<io::Result<Bytes>>);

impl DeliverSink for ChannelSink {
    fn send(&mut self, chunk: Bytes) -> DavResult<()> {
        self.0
            .blocking_send(Ok(chunk))
            .map_err(|_| DavError::IoError(io::ErrorKind::BrokenPipe.into()))
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_get(
        &self,
        _req: &Request<()>,
        path: &DavPath,
        head: bool,
    ) -> DavResult<Response<Body>> {
        let res = self.resource(path).await?;
        if !res.exists() {
            return Err(DavError::NotFound);
        }

        // listings use relative links, so a collection needs its slash.
        if res.is_collection() && !path.is_collection() {
            let mut path = path.clone();
            path.add_slash();
            let location = HeaderValue::from_str(&path.as_url_string_with_prefix())
                .map_err(|_| DavError::InvalidPath)?;
            debug!("GET {}: redirecting to {}", res.uri(), path);
            let mut resp = Response::new(Body::empty());
            *resp.status_mut() = StatusCode::MOVED_PERMANENTLY;
            let h = resp.headers_mut();
            h.insert(http::header::LOCATION, location);
            h.typed_insert(headers::ContentLength(0));
            return Ok(resp);
        }

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::OK;
        resp.headers_mut().extend(self.repo.set_headers(&res));
        if head {
            return Ok(resp);
        }

        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let repo = self.repo.clone();
        tokio::task::spawn_blocking(move || {
            let mut sink = ChannelSink(tx);
            if let Err(e) = repo.deliver(&res, &mut sink) {
                debug!("GET {} ended early: {}", res.uri(), e);
                // the status is already out, all we can do is break the body.
                let _ = sink
                    .0
                    .blocking_send(Err(io::Error::new(io::ErrorKind::Other, e.to_string())));
            }
        });
        *resp.body_mut() = Body::channel(rx);
        Ok(resp)
    }
}
