use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response};

use crate::body::Body;
use crate::davpath::DavPath;
use crate::repo::resource::ResourceKind;
use crate::util::DavMethod;
use crate::DavResult;

impl crate::DavHandler {
    pub(crate) async fn handle_options(
        &self,
        _req: &Request<()>,
        path: &DavPath,
    ) -> DavResult<Response<Body>> {
        let mut res = Response::new(Body::empty());

        let h = res.headers_mut();
        // Level 2 is advertised so that clients that insist on it (macOS
        // Finder) will mount the share read/write.
        h.insert("DAV", HeaderValue::from_static("1,2"));
        h.insert("MS-Author-Via", HeaderValue::from_static("DAV"));
        h.typed_insert(headers::ContentLength(0));

        // Helper to add method to array if method is in fact allowed.
        let mm = |v: &mut Vec<&'static str>, m: &'static str, y: DavMethod| {
            if self.allow.contains(y) {
                v.push(m);
            }
        };

        let kind = if path.is_star() {
            None
        } else {
            Some(self.resource(path).await?.kind())
        };

        let mut v = Vec::new();
        match kind {
            Some(ResourceKind::Missing) => {
                mm(&mut v, "OPTIONS", DavMethod::OPTIONS);
                mm(&mut v, "MKCOL", DavMethod::MKCOL);
                mm(&mut v, "PUT", DavMethod::PUT);
            }
            _ => {
                let is_file = matches!(kind, None | Some(ResourceKind::DataObject));
                mm(&mut v, "HEAD", DavMethod::HEAD);
                mm(&mut v, "GET", DavMethod::GET);
                if is_file {
                    mm(&mut v, "PUT", DavMethod::PUT);
                }
                mm(&mut v, "OPTIONS", DavMethod::OPTIONS);
                mm(&mut v, "PROPFIND", DavMethod::PROPFIND);
                mm(&mut v, "COPY", DavMethod::COPY);
                if path.path() != "/" {
                    mm(&mut v, "MOVE", DavMethod::MOVE);
                    mm(&mut v, "DELETE", DavMethod::DELETE);
                }
            }
        }

        if let Ok(a) = HeaderValue::from_str(&v.join(",")) {
            res.headers_mut().insert("allow", a);
        }

        Ok(res)
    }
}
