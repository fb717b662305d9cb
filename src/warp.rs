//! Adapter for the `warp` HTTP server framework.
//!
//! The filters in this module will always succeed and never
//! return an error. For example, if an object is not found, the
//! filter will return a 404 reply, and not an internal
//! rejection.
//!
use std::convert::Infallible;
use std::sync::Arc;

use crate::store::StoreSession;
use crate::{DavHandler, StaticSession};
use warp::{filters::BoxedFilter, Filter, Reply};

/// Reply-filter that runs a DavHandler.
///
/// Just pass in a pre-configured DavHandler. The prefix will be the request
/// path up to this point.
pub fn dav_handler(handler: DavHandler) -> BoxedFilter<(impl Reply,)> {
    use http::header::HeaderMap;
    use http::uri::Uri;
    use http::{Response, StatusCode};
    use warp::path::{FullPath, Tail};

    warp::method()
        .and(warp::path::full())
        .and(warp::path::tail())
        .and(warp::header::headers_cloned())
        .and(warp::body::stream())
        .and_then(
            move |method, path_full: FullPath, path_tail: Tail, headers: HeaderMap, body| {
                let handler = handler.clone();

                async move {
                    let bad_request = || {
                        let mut resp = Response::new(hyper::Body::empty());
                        *resp.status_mut() = StatusCode::BAD_REQUEST;
                        Ok::<_, Infallible>(resp)
                    };

                    // rebuild an http::Request struct.
                    let path_str = path_full.as_str();
                    let uri = match path_str.parse::<Uri>() {
                        Ok(uri) => uri,
                        Err(_) => return bad_request(),
                    };
                    let mut builder = http::Request::builder().method(method).uri(uri);
                    for (k, v) in headers.iter() {
                        builder = builder.header(k, v);
                    }
                    let request = match builder.body(body) {
                        Ok(request) => request,
                        Err(_) => return bad_request(),
                    };

                    let path_len = path_str.len();
                    let tail_len = path_tail.as_str().len();
                    let prefix = path_str[..path_len - tail_len].to_string();
                    let response = handler
                        .handle_stream_with(request, Some(prefix), None)
                        .await;

                    // Need to remap the http_body::Body to a hyper::Body.
                    let (parts, body) = response.into_parts();
                    let response = Response::from_parts(parts, hyper::Body::wrap_stream(body));
                    Ok::<_, Infallible>(response)
                }
            },
        )
        .boxed()
}

/// Creates a Filter that serves the home collection of the session's user
/// at the remainder of the request path.
pub fn dav_store(session: Arc<dyn StoreSession>) -> BoxedFilter<(impl Reply,)> {
    dav_handler(DavHandler::builder(StaticSession::new(session)).build())
}
