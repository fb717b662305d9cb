//
// This module contains the main entry point of the library,
// DavHandler.
//
use std::error::Error as StdError;
use std::io;
use std::sync::Arc;

use bytes::{self, buf::Buf};
use futures_util::stream::Stream;
use headers::HeaderMapExt;
use http::{Request, Response, StatusCode};
use http_body::Body as HttpBody;

use crate::body::{Body, StreamBody};
use crate::davpath::DavPath;
use crate::listing::ListingRenderer;
use crate::locks::DavLockRegistry;
use crate::repo::path::ExposedRoot;
use crate::repo::resource::{DavResource, RequestInfo};
use crate::repo::{DavRepository, ProviderConfig, StoreRepository};
use crate::session::SessionProvider;
use crate::util::{dav_method, DavMethod, DavMethodSet};

use crate::errors::DavError;
use crate::DavResult;

pub mod handle_copymove;
pub mod handle_delete;
pub mod handle_gethead;
pub mod handle_mkcol;
pub mod handle_options;
pub mod handle_props;
pub mod handle_put;

// Largest request body we read into memory (PROPFIND).
const MAX_REQUEST_BODY: usize = 65536;

/// Configuration of the handler.
#[derive(Clone)]
pub struct DavBuilder {
    /// Prefix to be stripped off when handling request.
    prefix: String,
    /// Where store sessions come from.
    sessions: Arc<dyn SessionProvider>,
    /// Repository settings.
    config: ProviderConfig,
    /// Renderer for themed collection listings.
    themed: Option<Arc<dyn ListingRenderer>>,
    /// Lock registry, for lock-null members in PROPFIND.
    locks: Option<Arc<dyn DavLockRegistry>>,
    /// Set of allowed methods (Defaults to "all methods")
    allow: DavMethodSet,
    /// Principal is webdav speak for "user". It is handed to the session
    /// provider.
    principal: Option<String>,
}

impl DavBuilder {
    /// Create a new configuration builder.
    pub fn new(sessions: Arc<dyn SessionProvider>) -> DavBuilder {
        Self {
            prefix: String::new(),
            sessions,
            config: ProviderConfig::default(),
            themed: None,
            locks: None,
            allow: DavMethodSet::all(),
            principal: None,
        }
    }

    /// Use the configuration that was built to generate a DavHandler.
    pub fn build(self) -> DavHandler {
        self.into()
    }

    /// Prefix (the mount location) to be stripped off before translating
    /// the rest of the request path to a store path.
    pub fn strip_prefix(self, prefix: impl Into<String>) -> Self {
        let mut this = self;
        this.prefix = prefix.into();
        this
    }

    /// Which part of the store namespace is exposed (default: the user's
    /// home collection).
    pub fn exposed_root(self, root: ExposedRoot) -> Self {
        let mut this = self;
        this.config.exposed_root = root;
        this
    }

    /// Storage resource for new and copied data objects.
    pub fn default_resource(self, resource: impl Into<String>) -> Self {
        let mut this = self;
        this.config.default_resource = Some(resource.into());
        this
    }

    /// Upload container size in bytes.
    pub fn tx_buffer_size(self, size: usize) -> Self {
        let mut this = self;
        this.config.tx_buffer_size = size;
        this
    }

    /// Download chunk size in bytes.
    pub fn rx_buffer_size(self, size: usize) -> Self {
        let mut this = self;
        this.config.rx_buffer_size = size;
        this
    }

    /// Upload to a temporary object first when replacing content (default true).
    pub fn tmpfile_rollback(self, enabled: bool) -> Self {
        let mut this = self;
        this.config.tmpfile_rollback = enabled;
        this
    }

    /// Render collection listings with `renderer`.
    pub fn themed_listings(self, renderer: Arc<dyn ListingRenderer>) -> Self {
        let mut this = self;
        this.themed = Some(renderer);
        this.config.themed_listings = true;
        this
    }

    /// Set the lock registry to use.
    pub fn lock_registry(self, locks: Arc<dyn DavLockRegistry>) -> Self {
        let mut this = self;
        this.locks = Some(locks);
        this
    }

    /// Which methods to allow (default is all methods).
    pub fn methods(self, allow: DavMethodSet) -> Self {
        let mut this = self;
        this.allow = allow;
        this
    }

    /// Set the name of the "webdav principal".
    pub fn principal(self, principal: impl Into<String>) -> Self {
        let mut this = self;
        this.principal = Some(principal.into());
        this
    }
}

/// The webdav handler struct.
///
/// The `builder` and `build` methods are used to instantiate a handler.
///
/// The `handle` and `handle_with` methods are the methods that do the actual work.
#[derive(Clone)]
pub struct DavHandler {
    pub(crate) prefix: Arc<String>,
    pub(crate) repo: Arc<dyn DavRepository>,
    pub(crate) has_locks: bool,
    pub(crate) allow: DavMethodSet,
    pub(crate) principal: Option<Arc<String>>,
}

impl From<DavBuilder> for DavHandler {
    fn from(cfg: DavBuilder) -> Self {
        let has_locks = cfg.locks.is_some();
        let mut repo = StoreRepository::new(cfg.sessions, cfg.config);
        if let Some(locks) = cfg.locks {
            repo = repo.with_lock_registry(locks);
        }
        if let Some(themed) = cfg.themed {
            repo = repo.with_themed_listing(themed);
        }
        Self {
            prefix: Arc::new(cfg.prefix),
            repo: Arc::new(repo),
            has_locks,
            allow: cfg.allow,
            principal: cfg.principal.map(Arc::new),
        }
    }
}

impl DavHandler {
    /// Return a configuration builder.
    pub fn builder(sessions: Arc<dyn SessionProvider>) -> DavBuilder {
        DavBuilder::new(sessions)
    }

    /// Handle a webdav request.
    pub async fn handle<ReqBody, ReqData, ReqError>(&self, req: Request<ReqBody>) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        self.handle_inner(req).await
    }

    /// Handle a webdav request, overriding parts of the config.
    ///
    /// For example, the `principal` can be set for this request, after the
    /// server in front of us has authenticated the user.
    pub async fn handle_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
    {
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(format!(
                "{}/{}",
                this.prefix.strip_suffix('/').unwrap_or(&this.prefix),
                prefix.strip_prefix('/').unwrap_or(&prefix)
            ));
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    /// Used with webserver frameworks that have not
    /// opted to use the `http_body` crate just yet.
    #[doc(hidden)]
    pub async fn handle_stream<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        self.handle_inner(req).await
    }

    /// Handles a request with a `Stream` body instead of a `HttpBody`.
    #[doc(hidden)]
    pub async fn handle_stream_with<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
        prefix: Option<String>,
        principal: Option<String>,
    ) -> Response<Body>
    where
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
        ReqBody: Stream<Item = Result<ReqData, ReqError>>,
    {
        let req = {
            let (parts, body) = req.into_parts();
            Request::from_parts(parts, StreamBody::new(body))
        };
        let mut this = self.clone();
        if let Some(prefix) = prefix {
            this.prefix = Arc::new(prefix);
        }
        if let Some(principal) = principal {
            this.principal = Some(Arc::new(principal));
        }
        this.handle_inner(req).await
    }
}

/// Run a repository call on the blocking pool.
pub(crate) async fn blocking<F, T>(f: F) -> DavResult<T>
where
    F: FnOnce() -> DavResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(res) => res,
        Err(e) => Err(DavError::Internal(format!("blocking task failed: {e}"))),
    }
}

impl DavHandler {
    // helper.
    pub(crate) fn path(&self, req: &Request<()>) -> DavResult<DavPath> {
        DavPath::from_uri_and_prefix(req.uri(), &self.prefix)
    }

    // request info for a path, carrying the principal of this request.
    pub(crate) fn request_info(&self, path: &DavPath) -> RequestInfo {
        RequestInfo::new(path.as_str(), path.prefix())
            .with_principal(self.principal.as_ref().map(|p| p.to_string()))
    }

    // resolve a path to a resource.
    pub(crate) async fn resource(&self, path: &DavPath) -> DavResult<DavResource> {
        let repo = self.repo.clone();
        let info = self.request_info(path);
        blocking(move || repo.get_resource(&info)).await
    }

    // does the parent collection of `res` exist.
    pub(crate) async fn has_parent(&self, res: &DavResource) -> DavResult<bool> {
        let repo = self.repo.clone();
        let res = res.clone();
        blocking(move || {
            Ok(repo
                .get_parent_resource(&res)?
                .map(|p| p.is_collection())
                .unwrap_or(false))
        })
        .await
    }

    // drain request body and return it.
    pub(crate) async fn read_request<ReqBody, ReqData, ReqError>(
        &self,
        body: ReqBody,
        max_size: usize,
    ) -> DavResult<Vec<u8>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let mut data = Vec::new();
        pin_utils::pin_mut!(body);
        while let Some(res) = body.data().await {
            let mut buf = res.map_err(|_| {
                DavError::IoError(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "UnexpectedEof",
                ))
            })?;
            while buf.has_remaining() {
                if data.len() + buf.remaining() > max_size {
                    return Err(StatusCode::PAYLOAD_TOO_LARGE.into());
                }
                let b = buf.chunk();
                let l = b.len();
                data.extend_from_slice(b);
                buf.advance(l);
            }
        }
        Ok(data)
    }

    // internal dispatcher.
    async fn handle_inner<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> Response<Body>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        // Turn any DavError results into a HTTP error response.
        match self.handle2(req).await {
            Ok(resp) => {
                debug!("== END REQUEST result OK");
                resp
            }
            Err(err) => {
                debug!("== END REQUEST result {:?}", err);
                error_response(&err)
            }
        }
    }

    // internal dispatcher part 2.
    async fn handle2<ReqBody, ReqData, ReqError>(
        &self,
        req: Request<ReqBody>,
    ) -> DavResult<Response<Body>>
    where
        ReqBody: HttpBody<Data = ReqData, Error = ReqError>,
        ReqData: Buf + Send + 'static,
        ReqError: StdError + Send + Sync + 'static,
    {
        let (req, body) = {
            let (parts, body) = req.into_parts();
            (Request::from_parts(parts, ()), body)
        };

        // translate HTTP method to Webdav method.
        let method = match dav_method(req.method()) {
            Ok(m) => m,
            Err(e) => {
                debug!("refusing method {} request {}", req.method(), req.uri());
                return Err(e);
            }
        };

        // see if method is allowed.
        if !self.allow.contains(method) {
            debug!(
                "method {} not allowed on request {}",
                req.method(),
                req.uri()
            );
            return Err(DavError::StatusClose(StatusCode::METHOD_NOT_ALLOWED));
        }

        // make sure the request path is valid.
        let path = self.path(&req)?;

        // PUT is the only handler that reads the body itself. All the
        // other handlers either expected no body, or a pre-read Vec<u8>.
        let (body_strm, body_data) = if method == DavMethod::PUT {
            (Some(body), Vec::new())
        } else {
            (None, self.read_request(body, MAX_REQUEST_BODY).await?)
        };

        // Not all methods accept a body.
        if method != DavMethod::PUT && method != DavMethod::PROPFIND && !body_data.is_empty() {
            return Err(StatusCode::UNSUPPORTED_MEDIA_TYPE.into());
        }

        debug!("== START REQUEST {:?} {}", method, path);

        match body_strm {
            Some(body) if method == DavMethod::PUT => self.handle_put(&req, &path, body).await,
            _ if method == DavMethod::OPTIONS => self.handle_options(&req, &path).await,
            _ if method == DavMethod::PROPFIND => {
                self.handle_propfind(&req, &path, &body_data).await
            }
            _ if method == DavMethod::MKCOL => self.handle_mkcol(&req, &path).await,
            _ if method == DavMethod::DELETE => self.handle_delete(&req, &path).await,
            _ if method == DavMethod::HEAD || method == DavMethod::GET => {
                self.handle_get(&req, &path, method == DavMethod::HEAD).await
            }
            _ if method == DavMethod::COPY || method == DavMethod::MOVE => {
                self.handle_copymove(&req, &path, method).await
            }
            _ => Err(DavError::UnknownDavMethod),
        }
    }
}

// An error as a response. Only errors an operator can act on get a body.
pub(crate) fn error_response(err: &DavError) -> Response<Body> {
    let text = err.client_text().map(|t| format!("{t}\n"));
    let len = text.as_ref().map(|t| t.len()).unwrap_or(0);
    let mut resp = Response::new(match text {
        Some(t) => Body::from(t),
        None => Body::empty(),
    });
    *resp.status_mut() = err.statuscode();
    let h = resp.headers_mut();
    h.typed_insert(headers::ContentLength(len as u64));
    if len > 0 {
        h.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("text/plain; charset=utf-8"),
        );
    }
    if err.must_close() {
        h.insert(
            http::header::CONNECTION,
            http::HeaderValue::from_static("close"),
        );
    }
    resp
}

/// Value of the `Depth` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DepthHeader {
    Zero,
    One,
    Infinity,
}

impl DepthHeader {
    pub(crate) fn get(req: &Request<()>) -> DavResult<Option<DepthHeader>> {
        let v = match req.headers().get("depth") {
            Some(v) => v,
            None => return Ok(None),
        };
        match v.to_str().map(|s| s.trim().to_ascii_lowercase()) {
            Ok(s) if s == "0" => Ok(Some(DepthHeader::Zero)),
            Ok(s) if s == "1" => Ok(Some(DepthHeader::One)),
            Ok(s) if s == "infinity" => Ok(Some(DepthHeader::Infinity)),
            _ => Err(StatusCode::BAD_REQUEST.into()),
        }
    }

    pub(crate) fn depth(self) -> crate::repo::walker::Depth {
        use crate::repo::walker::Depth;
        match self {
            DepthHeader::Zero => Depth::Finite(0),
            DepthHeader::One => Depth::Finite(1),
            DepthHeader::Infinity => Depth::Infinity,
        }
    }
}
