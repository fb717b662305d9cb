use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::repo::walker::Depth;
use crate::util::DavMethod;
use crate::DavResult;

use super::{blocking, DepthHeader};

// Overwrite: T or F, default T.
fn overwrite(req: &Request<()>) -> DavResult<bool> {
    match req.headers().get("overwrite").map(|v| v.as_bytes()) {
        None => Ok(true),
        Some(b"T") | Some(b"t") => Ok(true),
        Some(b"F") | Some(b"f") => Ok(false),
        Some(_) => Err(StatusCode::BAD_REQUEST.into()),
    }
}

impl crate::DavHandler {
    // Destination header as a path below our prefix.
    fn destination(&self, req: &Request<()>) -> DavResult<DavPath> {
        let dest = req
            .headers()
            .get("destination")
            .and_then(|v| v.to_str().ok())
            .ok_or(DavError::Status(StatusCode::BAD_REQUEST))?;
        let host = req
            .headers()
            .get("host")
            .and_then(|v| v.to_str().ok())
            .or_else(|| req.uri().authority().map(|a| a.as_str()));
        match DavPath::from_destination(dest, host, &self.prefix) {
            // outside of our mount, somebody else's business.
            Err(DavError::NotFound) => Err(DavError::Status(StatusCode::BAD_GATEWAY)),
            other => other,
        }
    }

    pub(crate) async fn handle_copymove(
        &self,
        req: &Request<()>,
        path: &DavPath,
        method: DavMethod,
    ) -> DavResult<Response<Body>> {
        let dest = self.destination(req)?;
        let overwrite = overwrite(req)?;
        let depth = match DepthHeader::get(req)? {
            None | Some(DepthHeader::Infinity) => Depth::Infinity,
            Some(DepthHeader::Zero) if method == DavMethod::COPY => Depth::Finite(0),
            _ => return Err(StatusCode::BAD_REQUEST.into()),
        };
        debug!("{:?} {} -> {} depth {:?}", method, path, dest, depth);

        let mut src = self.resource(path).await?;
        let mut dst = self.resource(&dest).await?;

        let repo = self.repo.clone();
        let replaced = blocking(move || {
            if !src.exists() {
                return Err(DavError::NotFound);
            }
            if repo.is_same_resource(&src, &dst) {
                return Err(DavError::Status(StatusCode::FORBIDDEN));
            }
            // no copying or moving a collection into itself, and no
            // overwriting an ancestor of the source.
            if repo.is_parent_resource(&src, &dst) || repo.is_parent_resource(&dst, &src) {
                return Err(DavError::Status(StatusCode::FORBIDDEN));
            }
            match repo.get_parent_resource(&dst)? {
                Some(parent) if parent.is_collection() => {}
                _ => {
                    return Err(DavError::Conflict(format!(
                        "parent collection of <{}> does not exist",
                        dst.uri()
                    )))
                }
            }

            let existed = dst.exists();
            if existed {
                if !overwrite {
                    return Err(DavError::Status(StatusCode::PRECONDITION_FAILED));
                }
                repo.remove_resource(&mut dst)?;
            }

            if method == DavMethod::COPY {
                repo.copy_resource(&src, &dst, depth)?;
            } else {
                repo.move_resource(&mut src, &mut dst)?;
            }
            Ok(existed)
        })
        .await?;

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = if replaced {
            StatusCode::NO_CONTENT
        } else {
            StatusCode::CREATED
        };
        resp.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(resp)
    }
}
