use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::errors::DavError;
use crate::DavResult;

use super::blocking;

impl crate::DavHandler {
    pub(crate) async fn handle_mkcol(
        &self,
        _req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let mut res = self.resource(path).await?;
        if res.exists() {
            return Err(DavError::Status(StatusCode::METHOD_NOT_ALLOWED));
        }

        let repo = self.repo.clone();
        let res = blocking(move || {
            repo.create_collection(&mut res)?;
            Ok(res)
        })
        .await?;
        debug!("MKCOL {} created {}", path, res.store_path());

        let mut resp = Response::new(Body::empty());
        *resp.status_mut() = StatusCode::CREATED;
        resp.headers_mut().typed_insert(headers::ContentLength(0));
        Ok(resp)
    }
}
