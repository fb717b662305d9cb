use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::DavResult;

use super::{blocking, DepthHeader};

impl crate::DavHandler {
    pub(crate) async fn handle_delete(
        &self,
        req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        // A collection always goes as a whole.
        if let Some(depth) = DepthHeader::get(req)? {
            if depth != DepthHeader::Infinity {
                return Err(DavError::Status(StatusCode::BAD_REQUEST));
            }
        }

        let mut res = self.resource(path).await?;
        if !res.exists() {
            return Err(DavError::NotFound);
        }
        if path.path() == "/" {
            return Err(DavError::Status(StatusCode::FORBIDDEN));
        }

        let repo = self.repo.clone();
        blocking(move || repo.remove_resource(&mut res)).await?;

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::NO_CONTENT;
        resp.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(resp)
    }
}
