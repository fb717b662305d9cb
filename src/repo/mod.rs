//! The repository: WebDAV verbs on top of the remote store.
//!
//! Everything here is blocking. One request uses one session, and all calls
//! on it are made in order from a single thread.
use std::sync::Arc;

use http::HeaderMap;

use crate::errors::DavError;
use crate::listing::{BasicListing, ListingRenderer};
use crate::locks::DavLockRegistry;
use crate::session::SessionProvider;
use crate::store::{RenameKind, MAX_NAME_LEN};
use crate::DavResult;

pub mod copy;
pub mod deliver;
pub mod path;
pub mod resource;
pub mod stream;
pub mod walker;

use self::copy::CopyWalk;
use self::deliver::DeliverSink;
use self::path::{parent_uri, translate, ExposedRoot};
use self::resource::{DavResource, RequestInfo};
use self::stream::{DavStream, StreamMode};
use self::walker::{Depth, WalkFn, WalkType, Walker};

/// Default size of the upload container and of download chunks.
pub const DEFAULT_BUFFER_SIZE: usize = 4 * 1024 * 1024;

/// Provider settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    pub exposed_root: ExposedRoot,
    /// Storage resource new and copied data objects are placed on.
    pub default_resource: Option<String>,
    /// Upload container size.
    pub tx_buffer_size: usize,
    /// Download chunk size.
    pub rx_buffer_size: usize,
    /// Upload through a temporary object when replacing content.
    pub tmpfile_rollback: bool,
    /// Use the themed renderer for collection listings, if there is one.
    pub themed_listings: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig {
            exposed_root: ExposedRoot::default(),
            default_resource: None,
            tx_buffer_size: DEFAULT_BUFFER_SIZE,
            rx_buffer_size: DEFAULT_BUFFER_SIZE,
            tmpfile_rollback: true,
            themed_listings: false,
        }
    }
}

/// The verb set of a WebDAV repository provider.
pub trait DavRepository: Send + Sync {
    /// Resolve a request URI and stat it. A missing resource is not an error.
    fn get_resource(&self, request: &RequestInfo) -> DavResult<DavResource>;

    /// The parent collection, or `None` at the root of the mount.
    fn get_parent_resource(&self, resource: &DavResource) -> DavResult<Option<DavResource>>;

    fn is_same_resource(&self, a: &DavResource, b: &DavResource) -> bool;

    /// Is `child` strictly below `parent`.
    fn is_parent_resource(&self, parent: &DavResource, child: &DavResource) -> bool;

    fn open_stream(&self, resource: &DavResource, mode: StreamMode) -> DavResult<DavStream>;

    fn write_stream(&self, stream: &mut DavStream, buf: &[u8]) -> DavResult<()>;

    fn seek_stream(&self, stream: &mut DavStream, pos: u64) -> DavResult<()>;

    fn close_stream(&self, stream: DavStream, commit: bool) -> DavResult<()>;

    fn create_collection(&self, resource: &mut DavResource) -> DavResult<()>;

    fn copy_resource(&self, src: &DavResource, dst: &DavResource, depth: Depth)
        -> DavResult<()>;

    fn move_resource(&self, src: &mut DavResource, dst: &mut DavResource) -> DavResult<()>;

    fn remove_resource(&self, resource: &mut DavResource) -> DavResult<()>;

    fn walk(
        &self,
        root: &DavResource,
        depth: Depth,
        walk_type: WalkType,
        func: &mut WalkFn<'_>,
    ) -> DavResult<()>;

    fn getetag(&self, resource: &DavResource) -> String;

    /// Headers for GET/HEAD.
    fn set_headers(&self, resource: &DavResource) -> HeaderMap;

    fn deliver(&self, resource: &DavResource, sink: &mut dyn DeliverSink) -> DavResult<()>;

    fn get_request_context<'a>(&self, resource: &'a DavResource) -> &'a RequestInfo;
}

/// The repository, backed by a [`SessionProvider`].
#[derive(Clone)]
pub struct StoreRepository {
    sessions: Arc<dyn SessionProvider>,
    config: Arc<ProviderConfig>,
    locks: Option<Arc<dyn DavLockRegistry>>,
    themed: Option<Arc<dyn ListingRenderer>>,
}

impl StoreRepository {
    pub fn new(sessions: Arc<dyn SessionProvider>, config: ProviderConfig) -> StoreRepository {
        StoreRepository {
            sessions,
            config: Arc::new(config),
            locks: None,
            themed: None,
        }
    }

    pub fn with_lock_registry(self, locks: Arc<dyn DavLockRegistry>) -> Self {
        let mut this = self;
        this.locks = Some(locks);
        this
    }

    pub fn with_themed_listing(self, renderer: Arc<dyn ListingRenderer>) -> Self {
        let mut this = self;
        this.themed = Some(renderer);
        this
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn lock_registry(&self) -> Option<&dyn DavLockRegistry> {
        self.locks.as_deref()
    }

    // Point `res` at `uri` and stat it.
    fn resolve(&self, res: &mut DavResource, uri: &str) -> DavResult<()> {
        let raw = translate(uri, &res.request.root_dir, &res.exposed_root)?;
        let path = res
            .session
            .parse_path(&raw)
            .map_err(|e| DavError::remote("parse path", &raw, e))?;
        if path.len() >= MAX_NAME_LEN {
            return Err(DavError::PathTooLong(path));
        }
        res.uri.set(uri);
        res.store_path.set(&path);
        res.fetch_info()
    }
}

impl DavRepository for StoreRepository {
    fn get_resource(&self, request: &RequestInfo) -> DavResult<DavResource> {
        let session = self.sessions.get_session(request.principal.as_deref())?;
        let exposed_root: Arc<str> = Arc::from(self.config.exposed_root.resolve(session.env()));
        let mut res = DavResource::new(
            session,
            self.config.clone(),
            Arc::new(request.clone()),
            exposed_root,
            &request.uri,
            "",
        );
        self.resolve(&mut res, &request.uri)?;
        Ok(res)
    }

    fn get_parent_resource(&self, resource: &DavResource) -> DavResult<Option<DavResource>> {
        let uri = resource.uri();
        if !uri.starts_with('/') {
            return Err(DavError::Internal(format!("malformed uri <{uri}>")));
        }
        let rel = resource.relative_uri();
        if rel == "/" || rel.is_empty() {
            return Ok(None);
        }
        let parent_uri = match parent_uri(uri) {
            Some(p) => p,
            None => return Ok(None),
        };
        let mut parent = resource.copy_context();
        self.resolve(&mut parent, &parent_uri)?;
        debug!("parent of <{}> is <{}>", uri, parent.uri());
        Ok(Some(parent))
    }

    fn is_same_resource(&self, a: &DavResource, b: &DavResource) -> bool {
        a.store_path() == b.store_path()
    }

    fn is_parent_resource(&self, parent: &DavResource, child: &DavResource) -> bool {
        let p = parent.store_path();
        let c = child.store_path();
        c.len() > p.len() + 1 && c.starts_with(p) && c.as_bytes()[p.len()] == b'/'
    }

    fn open_stream(&self, resource: &DavResource, mode: StreamMode) -> DavResult<DavStream> {
        DavStream::open(resource, mode)
    }

    fn write_stream(&self, stream: &mut DavStream, buf: &[u8]) -> DavResult<()> {
        stream.write(buf)
    }

    fn seek_stream(&self, stream: &mut DavStream, pos: u64) -> DavResult<()> {
        stream.seek(pos)
    }

    fn close_stream(&self, stream: DavStream, commit: bool) -> DavResult<()> {
        stream.close(commit)
    }

    fn create_collection(&self, resource: &mut DavResource) -> DavResult<()> {
        match self.get_parent_resource(resource)? {
            Some(parent) if parent.is_collection() => {}
            _ => {
                return Err(DavError::Conflict(format!(
                    "parent collection of <{}> does not exist",
                    resource.uri()
                )))
            }
        }
        let path = resource.store_path().to_string();
        resource
            .session
            .create_collection(&path)
            .map_err(|e| DavError::remote("create collection", &path, e))?;
        resource.fetch_info()
    }

    fn copy_resource(
        &self,
        src: &DavResource,
        dst: &DavResource,
        depth: Depth,
    ) -> DavResult<()> {
        match self.get_parent_resource(dst)? {
            Some(parent) if parent.is_collection() => {}
            _ => {
                return Err(DavError::Conflict(format!(
                    "parent collection of copy destination <{}> does not exist",
                    dst.uri()
                )))
            }
        }
        let mut copy = CopyWalk {
            src_root: src.store_path(),
            dst_root: dst.store_path(),
            resource: self.config.default_resource.as_deref(),
        };
        self.walk(src, depth, WalkType::NORMAL, &mut |res, ct| copy.visit(res, ct))
    }

    fn move_resource(&self, src: &mut DavResource, dst: &mut DavResource) -> DavResult<()> {
        let collection = src.is_collection();
        let kind = if collection {
            RenameKind::Collection
        } else {
            RenameKind::DataObject
        };
        src.session
            .rename(src.store_path(), dst.store_path(), kind)
            .map_err(|e| DavError::remote("rename", dst.store_path(), e))?;
        dst.stat = src.stat.take();
        dst.exists = true;
        dst.collection = collection;
        src.set_missing();
        Ok(())
    }

    fn remove_resource(&self, resource: &mut DavResource) -> DavResult<()> {
        if !resource.exists() {
            return Err(DavError::Internal(format!(
                "remove of nonexistent resource <{}>",
                resource.uri()
            )));
        }
        let path = resource.store_path().to_string();
        debug!("removing <{}>", path);
        let res = if resource.is_collection() {
            resource.session.remove_collection(&path, true, false)
        } else {
            resource.session.unlink(&path, false)
        };
        res.map_err(|e| DavError::remote("remove", &path, e))?;
        resource.set_missing();
        Ok(())
    }

    fn walk(
        &self,
        root: &DavResource,
        depth: Depth,
        walk_type: WalkType,
        func: &mut WalkFn<'_>,
    ) -> DavResult<()> {
        Walker::new(root, walk_type, self.locks.as_deref()).walk(depth, func)
    }

    fn getetag(&self, resource: &DavResource) -> String {
        deliver::etag(resource)
    }

    fn set_headers(&self, resource: &DavResource) -> HeaderMap {
        deliver::response_headers(resource)
    }

    fn deliver(&self, resource: &DavResource, sink: &mut dyn DeliverSink) -> DavResult<()> {
        let renderer: &dyn ListingRenderer = match (&self.themed, self.config.themed_listings) {
            (Some(themed), true) => themed.as_ref(),
            _ => &BasicListing,
        };
        deliver::deliver(resource, renderer, sink)
    }

    fn get_request_context<'a>(&self, resource: &'a DavResource) -> &'a RequestInfo {
        resource.request_info()
    }
}

#[cfg(all(test, feature = "memstore"))]
mod tests {
    use bytes::Bytes;

    use super::*;
    use crate::listing::ListingEntry;
    use crate::locks::MemLockRegistry;
    use crate::session::StaticSession;
    use crate::store::memstore::{MemStore, StoreOp};
    use crate::store::status::{SYS_HEADER_WRITE_LEN_ERR, UNIX_FILE_RENAME_ERR, EISDIR};

    fn setup() -> (Arc<MemStore>, StoreRepository) {
        let store = Arc::new(MemStore::new("z", "u"));
        let repo = StoreRepository::new(StaticSession::new(store.clone()), ProviderConfig::default());
        (store, repo)
    }

    fn get(repo: &StoreRepository, uri: &str) -> DavResource {
        repo.get_resource(&RequestInfo::new(uri, "/dav")).unwrap()
    }

    #[test]
    fn test_get_resource() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/a/f", b"x");
        let res = get(&repo, "/dav/a/f");
        assert_eq!(res.store_path(), "/z/home/u/a/f");
        assert!(res.exists());
        assert_eq!(res.relative_uri(), "/a/f");

        // the store parser canonicalises the path.
        let res = get(&repo, "/dav/a/./b/../f");
        assert_eq!(res.store_path(), "/z/home/u/a/f");

        let res = get(&repo, "/dav/");
        assert_eq!(res.store_path(), "/z/home/u");
        assert!(res.is_collection());

        assert!(repo
            .get_resource(&RequestInfo::new("/elsewhere", "/dav"))
            .is_err());
    }

    #[test]
    fn test_exposed_roots() {
        let store = Arc::new(MemStore::new("z", "u"));
        for (root, expect) in [
            (ExposedRoot::Zone, "/z/x"),
            (ExposedRoot::Home, "/z/home/x"),
            (ExposedRoot::User, "/z/home/u/x"),
            (ExposedRoot::Custom("/z/proj".into()), "/z/proj/x"),
        ] {
            let config = ProviderConfig {
                exposed_root: root,
                ..ProviderConfig::default()
            };
            let repo = StoreRepository::new(StaticSession::new(store.clone()), config);
            assert_eq!(get(&repo, "/dav/x").store_path(), expect);
        }
    }

    #[test]
    fn test_path_too_long_makes_no_remote_call() {
        let store = Arc::new(MemStore::new("z", "u"));
        let config = ProviderConfig {
            exposed_root: ExposedRoot::Custom(format!("/{}", "r".repeat(899))),
            ..ProviderConfig::default()
        };
        let repo = StoreRepository::new(StaticSession::new(store.clone()), config);
        let uri = format!("/dav/{}", "u".repeat(199));
        store.reset_calls();
        assert!(matches!(
            repo.get_resource(&RequestInfo::new(uri, "/dav")),
            Err(DavError::PathTooLong(_))
        ));
        assert_eq!(store.calls().total(), 0);
    }

    #[test]
    fn test_get_parent_resource() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/a/f", b"x");
        let res = get(&repo, "/dav/a/f");
        let parent = repo.get_parent_resource(&res).unwrap().unwrap();
        assert_eq!(parent.uri(), "/dav/a/");
        assert_eq!(parent.store_path(), "/z/home/u/a");
        assert!(parent.is_collection());

        let top = repo.get_parent_resource(&parent).unwrap().unwrap();
        assert_eq!(top.store_path(), "/z/home/u");
        assert!(repo.get_parent_resource(&top).unwrap().is_none());
    }

    #[test]
    fn test_same_and_parent() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/a/f", b"x");
        store.put_object("/z/home/u/ab", b"x");
        let a = get(&repo, "/dav/a");
        let a2 = get(&repo, "/dav/a/");
        let f = get(&repo, "/dav/a/f");
        let ab = get(&repo, "/dav/ab");
        assert!(repo.is_same_resource(&a, &a2));
        assert!(!repo.is_same_resource(&a, &f));
        assert!(repo.is_parent_resource(&a, &f));
        assert!(!repo.is_parent_resource(&f, &a));
        assert!(!repo.is_parent_resource(&a, &ab));
        assert!(!repo.is_parent_resource(&a, &a2));
    }

    #[test]
    fn test_create_collection() {
        let (store, repo) = setup();
        let mut res = get(&repo, "/dav/newdir");
        repo.create_collection(&mut res).unwrap();
        assert!(res.is_collection());
        assert!(store.is_collection("/z/home/u/newdir"));

        let mut orphan = get(&repo, "/dav/missing/newdir");
        assert!(matches!(
            repo.create_collection(&mut orphan),
            Err(DavError::Conflict(_))
        ));
        assert!(!store.exists("/z/home/u/missing"));
    }

    #[test]
    fn test_copy_tree() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/src/a", b"aa");
        store.put_object("/z/home/u/src/sub/b", b"bb");
        let src = get(&repo, "/dav/src");
        let dst = get(&repo, "/dav/dst");
        repo.copy_resource(&src, &dst, Depth::Infinity).unwrap();
        assert_eq!(
            store.paths_under("/z/home/u/dst"),
            ["/z/home/u/dst/a", "/z/home/u/dst/sub", "/z/home/u/dst/sub/b"]
        );
        assert_eq!(store.object_data("/z/home/u/dst/sub/b").unwrap(), b"bb");
        // source untouched.
        assert_eq!(store.object_data("/z/home/u/src/a").unwrap(), b"aa");
    }

    #[test]
    fn test_copy_depth_zero_and_file() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/src/a", b"aa");
        store.put_object("/z/home/u/f", b"ff");
        store.put_object("/z/home/u/g", b"old");

        let src = get(&repo, "/dav/src");
        let dst = get(&repo, "/dav/shallow");
        repo.copy_resource(&src, &dst, Depth::Finite(0)).unwrap();
        assert!(store.is_collection("/z/home/u/shallow"));
        assert!(store.paths_under("/z/home/u/shallow").is_empty());

        // data objects are copied with force.
        let f = get(&repo, "/dav/f");
        let g = get(&repo, "/dav/g");
        repo.copy_resource(&f, &g, Depth::Infinity).unwrap();
        assert_eq!(store.object_data("/z/home/u/g").unwrap(), b"ff");
    }

    #[test]
    fn test_copy_missing_parent() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/f", b"ff");
        let f = get(&repo, "/dav/f");
        let dst = get(&repo, "/dav/nodir/f");
        store.reset_calls();
        assert!(matches!(
            repo.copy_resource(&f, &dst, Depth::Infinity),
            Err(DavError::Conflict(_))
        ));
        assert_eq!(store.calls().copy, 0);
    }

    #[test]
    fn test_copy_aborts_on_first_failure() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/src/a", b"aa");
        store.put_object("/z/home/u/src/b", b"bb");
        let src = get(&repo, "/dav/src");
        let dst = get(&repo, "/dav/dst");
        store.fail_next(StoreOp::Copy, SYS_HEADER_WRITE_LEN_ERR);
        assert!(matches!(
            repo.copy_resource(&src, &dst, Depth::Infinity),
            Err(DavError::Remote { op: "copy", .. })
        ));
        assert!(!store.exists("/z/home/u/dst/b"));
    }

    #[test]
    fn test_move() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/dir/f", b"ff");
        let mut src = get(&repo, "/dav/dir");
        let mut dst = get(&repo, "/dav/moved");
        repo.move_resource(&mut src, &mut dst).unwrap();
        assert!(!src.exists());
        assert!(dst.exists() && dst.is_collection());
        assert_eq!(store.object_data("/z/home/u/moved/f").unwrap(), b"ff");
        assert!(!store.exists("/z/home/u/dir"));
    }

    #[test]
    fn test_move_onto_stale_directory() {
        let (store, repo) = setup();
        store.keep_stale_dirs(true);
        store.mkdir_all("/z/home/u/old");
        let mut old = get(&repo, "/dav/old");
        repo.remove_resource(&mut old).unwrap();

        store.put_object("/z/home/u/f", b"ff");
        let mut src = get(&repo, "/dav/f");
        let mut dst = get(&repo, "/dav/old");
        assert!(!dst.exists());
        let err = repo.move_resource(&mut src, &mut dst).unwrap_err();
        assert!(matches!(err, DavError::StaleDirectory(_)));
        assert!(src.exists());
    }

    #[test]
    fn test_remove() {
        let (store, repo) = setup();
        store.put_object("/z/home/u/dir/f", b"ff");
        store.put_object("/z/home/u/g", b"gg");

        let mut dir = get(&repo, "/dav/dir");
        repo.remove_resource(&mut dir).unwrap();
        assert!(!dir.exists());
        assert!(!store.exists("/z/home/u/dir/f"));

        let mut g = get(&repo, "/dav/g");
        repo.remove_resource(&mut g).unwrap();
        assert!(!store.exists("/z/home/u/g"));

        assert!(matches!(
            repo.remove_resource(&mut g),
            Err(DavError::Internal(_))
        ));
    }

    #[test]
    fn test_stream_via_repository() {
        let (store, repo) = setup();
        let res = get(&repo, "/dav/up");
        let mut stream = repo.open_stream(&res, StreamMode::WriteTrunc).unwrap();
        repo.write_stream(&mut stream, b"hello").unwrap();
        repo.close_stream(stream, true).unwrap();
        assert_eq!(store.object_data("/z/home/u/up").unwrap(), b"hello");

        store.fail_next(StoreOp::Rename, UNIX_FILE_RENAME_ERR - EISDIR);
        let res = get(&repo, "/dav/up");
        let mut stream = repo.open_stream(&res, StreamMode::WriteTrunc).unwrap();
        repo.write_stream(&mut stream, b"again").unwrap();
        assert!(repo.close_stream(stream, true).is_err());
    }

    #[test]
    fn test_walk_with_lock_registry() {
        let (store, repo) = setup();
        store.mkdir_all("/z/home/u/d");
        let locks = MemLockRegistry::new();
        locks.lock("/z/home/u/d/pending");
        let repo = repo.with_lock_registry(locks);
        let root = get(&repo, "/dav/d");
        let mut seen = Vec::new();
        repo.walk(
            &root,
            Depth::Finite(1),
            WalkType::NORMAL | WalkType::LOCKNULL,
            &mut |res, ct| {
                seen.push((res.uri().to_string(), ct));
                Ok(())
            },
        )
        .unwrap();
        assert_eq!(
            seen,
            [
                ("/dav/d".to_string(), walker::CallType::Collection),
                ("/dav/d/pending".to_string(), walker::CallType::LockNull),
            ]
        );
    }

    struct Themed;
    impl ListingRenderer for Themed {
        fn render(&self, _res: &DavResource, entries: &[ListingEntry]) -> DavResult<Bytes> {
            Ok(Bytes::from(format!("themed:{}", entries.len())))
        }
    }

    #[test]
    fn test_deliver_renderer_selection() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/a", b"");
        let config = ProviderConfig {
            themed_listings: true,
            ..ProviderConfig::default()
        };
        let repo = StoreRepository::new(StaticSession::new(store.clone()), config)
            .with_themed_listing(Arc::new(Themed));
        let root = get(&repo, "/dav/");
        let mut out = Vec::new();
        repo.deliver(&root, &mut out).unwrap();
        assert_eq!(out, b"themed:1");

        let (_, plain) = setup();
        let root = get(&plain, "/dav/");
        let mut out = Vec::new();
        plain.deliver(&root, &mut out).unwrap();
        assert!(String::from_utf8(out).unwrap().starts_with("<!DOCTYPE html>"));
    }

    #[test]
    fn test_request_context() {
        let (_, repo) = setup();
        let info = RequestInfo::new("/dav/x", "/dav").with_principal(Some("u".into()));
        let res = repo.get_resource(&info).unwrap();
        assert_eq!(repo.get_request_context(&res), &info);
    }
}
