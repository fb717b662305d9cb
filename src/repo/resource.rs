//! The resource context: one store object as seen by one request.
//!
//! A resource caches the stat of its store path. Derived resources (parent,
//! walk members) start from `copy_context` and stat again.
use std::fmt;
use std::sync::Arc;

use crate::errors::DavError;
use crate::repo::path::{relative_uri, PathBuffer};
use crate::repo::ProviderConfig;
use crate::store::{ObjStat, ObjType, StoreError, StoreSession};
use crate::DavResult;

/// Where a resource lookup came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    /// Decoded request path, including the mount location.
    pub uri: String,
    /// Mount location stripped off before translation.
    pub root_dir: String,
    /// User the request runs as.
    pub principal: Option<String>,
}

impl RequestInfo {
    pub fn new(uri: impl Into<String>, root_dir: impl Into<String>) -> RequestInfo {
        RequestInfo {
            uri: uri.into(),
            root_dir: root_dir.into(),
            principal: None,
        }
    }

    pub fn with_principal(self, principal: Option<String>) -> RequestInfo {
        let mut this = self;
        this.principal = principal;
        this
    }
}

/// What GET can do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Collection,
    DataObject,
    Missing,
}

/// A resource, bound to the session and configuration of the request that
/// resolved it.
///
/// The stat snapshot is fetched once and cached. `exists == false` always
/// comes with `stat() == None`.
#[derive(Clone)]
pub struct DavResource {
    pub(crate) session: Arc<dyn StoreSession>,
    pub(crate) config: Arc<ProviderConfig>,
    pub(crate) request: Arc<RequestInfo>,
    pub(crate) exposed_root: Arc<str>,
    pub(crate) uri: PathBuffer,
    pub(crate) store_path: PathBuffer,
    pub(crate) stat: Option<ObjStat>,
    pub(crate) exists: bool,
    pub(crate) collection: bool,
}

impl fmt::Debug for DavResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DavResource")
            .field("uri", &self.uri.as_str())
            .field("store_path", &self.store_path.as_str())
            .field("exists", &self.exists)
            .field("collection", &self.collection)
            .finish()
    }
}

impl DavResource {
    pub(crate) fn new(
        session: Arc<dyn StoreSession>,
        config: Arc<ProviderConfig>,
        request: Arc<RequestInfo>,
        exposed_root: Arc<str>,
        uri: &str,
        store_path: &str,
    ) -> DavResource {
        DavResource {
            session,
            config,
            request,
            exposed_root,
            uri: PathBuffer::new(uri, usize::MAX),
            store_path: PathBuffer::store_path(store_path),
            stat: None,
            exists: false,
            collection: false,
        }
    }

    /// Request URI of this resource.
    pub fn uri(&self) -> &str {
        self.uri.as_str()
    }

    /// The URI below the mount location.
    pub fn relative_uri(&self) -> &str {
        relative_uri(self.uri.as_str(), &self.request.root_dir).unwrap_or("/")
    }

    pub fn store_path(&self) -> &str {
        self.store_path.as_str()
    }

    pub fn exposed_root(&self) -> &str {
        &self.exposed_root
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn is_collection(&self) -> bool {
        self.exists && self.collection
    }

    pub fn stat(&self) -> Option<&ObjStat> {
        self.stat.as_ref()
    }

    pub fn kind(&self) -> ResourceKind {
        match (self.exists, self.collection) {
            (false, _) => ResourceKind::Missing,
            (true, true) => ResourceKind::Collection,
            (true, false) => ResourceKind::DataObject,
        }
    }

    pub fn session(&self) -> &Arc<dyn StoreSession> {
        &self.session
    }

    pub fn request_info(&self) -> &RequestInfo {
        &self.request
    }

    pub(crate) fn set_missing(&mut self) {
        self.stat = None;
        self.exists = false;
        self.collection = false;
    }

    /// Stat the store path and refresh the cached state.
    ///
    /// A missing object is not an error. An object of an unknown type is
    /// logged and treated as missing.
    pub fn fetch_info(&mut self) -> DavResult<()> {
        match self.session.stat(self.store_path.as_str()) {
            Ok(stat) => match stat.obj_type {
                ObjType::DataObject | ObjType::Collection => {
                    self.collection = stat.obj_type == ObjType::Collection;
                    self.exists = true;
                    self.stat = Some(stat);
                }
                ObjType::Unknown(t) => {
                    warn!(
                        "unknown object type {} for <{}>, treating it as nonexistent",
                        t,
                        self.store_path.as_str()
                    );
                    self.set_missing();
                }
            },
            Err(StoreError::NotFound) => self.set_missing(),
            Err(e) => {
                self.set_missing();
                return Err(DavError::remote("stat", self.store_path.as_str(), e));
            }
        }
        Ok(())
    }

    /// A copy bound to the same session and request, with an empty store
    /// path and no cached stat.
    pub fn copy_context(&self) -> DavResource {
        DavResource {
            session: self.session.clone(),
            config: self.config.clone(),
            request: self.request.clone(),
            exposed_root: self.exposed_root.clone(),
            uri: self.uri.clone(),
            store_path: PathBuffer::store_path(String::new()),
            stat: None,
            exists: false,
            collection: false,
        }
    }
}
