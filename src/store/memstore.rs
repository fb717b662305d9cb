//! Ephemeral in-memory store.
//!
//! Behaves like a small catalog: collections and data objects in one
//! namespace, object descriptors, listing cursors, and the same status codes
//! a real store reports. Every call is counted, which makes it possible to
//! assert how many round-trips an operation costs.
//!
//! With [`MemStore::keep_stale_dirs`] enabled, removing a collection leaves
//! its directory behind "on disk", and renaming a data object onto that
//! name fails the way storage drivers do.
use std::collections::{BTreeMap, HashMap, HashSet};

use bytes::Bytes;
use parking_lot::Mutex;

use super::status::*;
use super::*;

const CLOCK_START: u64 = 1_600_000_000;
const DEFAULT_RESC: &str = "demoResc";

/// Operations that can be made to fail once with [`MemStore::fail_next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOp {
    Stat,
    Open,
    Create,
    Read,
    Write,
    Seek,
    Close,
    List,
    CreateCollection,
    RemoveCollection,
    Unlink,
    Rename,
    Copy,
}

/// Number of calls made, per operation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub stat: usize,
    pub open: usize,
    pub create: usize,
    pub read: usize,
    pub write: usize,
    pub seek: usize,
    pub close: usize,
    pub list: usize,
    pub create_collection: usize,
    pub remove_collection: usize,
    pub unlink: usize,
    pub rename: usize,
    pub copy: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.stat
            + self.open
            + self.create
            + self.read
            + self.write
            + self.seek
            + self.close
            + self.list
            + self.create_collection
            + self.remove_collection
            + self.unlink
            + self.rename
            + self.copy
    }

    fn bump(&mut self, op: StoreOp) {
        let c = match op {
            StoreOp::Stat => &mut self.stat,
            StoreOp::Open => &mut self.open,
            StoreOp::Create => &mut self.create,
            StoreOp::Read => &mut self.read,
            StoreOp::Write => &mut self.write,
            StoreOp::Seek => &mut self.seek,
            StoreOp::Close => &mut self.close,
            StoreOp::List => &mut self.list,
            StoreOp::CreateCollection => &mut self.create_collection,
            StoreOp::RemoveCollection => &mut self.remove_collection,
            StoreOp::Unlink => &mut self.unlink,
            StoreOp::Rename => &mut self.rename,
            StoreOp::Copy => &mut self.copy,
        };
        *c += 1;
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    Collection,
    DataObject(Vec<u8>),
    // an entry of a type the gateway does not know about.
    Special,
}

#[derive(Debug, Clone)]
struct Node {
    kind: NodeKind,
    owner: String,
    create_time: u64,
    modify_time: u64,
    resource: String,
}

#[derive(Debug)]
struct OpenObject {
    path: String,
    pos: u64,
}

#[derive(Debug)]
struct Inner {
    nodes: BTreeMap<String, Node>,
    fds: HashMap<i32, OpenObject>,
    next_fd: i32,
    clock: u64,
    stale_dirs: HashSet<String>,
    keep_stale_dirs: bool,
    calls: CallCounts,
    failures: HashMap<StoreOp, i32>,
}

/// In-memory store. Share it with `Arc` and hand it out as a session.
#[derive(Debug)]
pub struct MemStore {
    env: StoreEnv,
    inner: Mutex<Inner>,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn fail(status: i32) -> StoreError {
    StoreError::from_status(status)
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    // count the call, and fire an injected failure if there is one.
    fn enter(&mut self, op: StoreOp) -> StoreResult<()> {
        self.calls.bump(op);
        match self.failures.remove(&op) {
            Some(status) => Err(fail(status)),
            None => Ok(()),
        }
    }

    fn is_collection(&self, path: &str) -> bool {
        matches!(
            self.nodes.get(path).map(|n| &n.kind),
            Some(NodeKind::Collection)
        )
    }

    fn subtree_keys(&self, path: &str) -> Vec<String> {
        let prefix = child_prefix(path);
        let mut keys: Vec<String> = self
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .collect();
        keys.push(path.to_string());
        keys
    }

    fn children(&self, path: &str) -> Vec<(String, Node)> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| k.len() > prefix.len() && !k[prefix.len()..].contains('/'))
            .map(|(k, n)| (k.clone(), n.clone()))
            .collect()
    }

    fn new_node(&mut self, kind: NodeKind, owner: &str, resource: Option<&str>) -> Node {
        let now = self.tick();
        Node {
            kind,
            owner: owner.to_string(),
            create_time: now,
            modify_time: now,
            resource: resource.unwrap_or(DEFAULT_RESC).to_string(),
        }
    }

    fn open_fd(&mut self, path: &str) -> Descriptor {
        let fd = self.next_fd;
        self.next_fd += 1;
        self.fds.insert(
            fd,
            OpenObject {
                path: path.to_string(),
                pos: 0,
            },
        );
        Descriptor(fd)
    }
}

impl MemStore {
    /// Create a store with the collections `/<zone>/home/<user>` in place.
    pub fn new(zone: &str, user: &str) -> MemStore {
        let store = MemStore {
            env: StoreEnv {
                zone: zone.to_string(),
                user: user.to_string(),
            },
            inner: Mutex::new(Inner {
                nodes: BTreeMap::new(),
                fds: HashMap::new(),
                next_fd: 3,
                clock: CLOCK_START,
                stale_dirs: HashSet::new(),
                keep_stale_dirs: false,
                calls: CallCounts::default(),
                failures: HashMap::new(),
            }),
        };
        store.mkdir_all(&format!("/{zone}/home/{user}"));
        store
    }

    /// Create a collection and all its missing parents.
    pub fn mkdir_all(&self, path: &str) {
        let path = normalize_path(path);
        let mut inner = self.inner.lock();
        let mut cur = String::new();
        let mut todo = vec!["/".to_string()];
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            cur.push('/');
            cur.push_str(seg);
            todo.push(cur.clone());
        }
        for p in todo {
            if !inner.nodes.contains_key(&p) {
                let node = inner.new_node(NodeKind::Collection, &self.env.user, None);
                inner.nodes.insert(p, node);
            }
        }
    }

    /// Store a data object, creating parent collections as needed.
    pub fn put_object(&self, path: &str, data: &[u8]) {
        let path = normalize_path(path);
        self.mkdir_all(parent_of(&path));
        let mut inner = self.inner.lock();
        let node = inner.new_node(NodeKind::DataObject(data.to_vec()), &self.env.user, None);
        inner.nodes.insert(path, node);
    }

    /// Insert an entry of an unrecognised object type.
    pub fn add_special(&self, path: &str) {
        let path = normalize_path(path);
        self.mkdir_all(parent_of(&path));
        let mut inner = self.inner.lock();
        let node = inner.new_node(NodeKind::Special, &self.env.user, None);
        inner.nodes.insert(path, node);
    }

    /// Content of a data object.
    pub fn object_data(&self, path: &str) -> Option<Vec<u8>> {
        match self.inner.lock().nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::DataObject(data)) => Some(data.clone()),
            _ => None,
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.inner.lock().nodes.contains_key(path)
    }

    pub fn is_collection(&self, path: &str) -> bool {
        self.inner.lock().is_collection(path)
    }

    /// All paths strictly below `path`, sorted.
    pub fn paths_under(&self, path: &str) -> Vec<String> {
        let inner = self.inner.lock();
        let mut keys = inner.subtree_keys(path);
        keys.pop();
        keys
    }

    pub fn calls(&self) -> CallCounts {
        self.inner.lock().calls
    }

    pub fn reset_calls(&self) {
        self.inner.lock().calls = CallCounts::default();
    }

    /// Number of descriptors that were opened but not closed.
    pub fn open_descriptors(&self) -> usize {
        self.inner.lock().fds.len()
    }

    /// Leave storage directories behind when collections are removed.
    pub fn keep_stale_dirs(&self, keep: bool) {
        self.inner.lock().keep_stale_dirs = keep;
    }

    /// Make the next call of `op` fail with `status`.
    pub fn fail_next(&self, op: StoreOp, status: i32) {
        self.inner.lock().failures.insert(op, status);
    }
}

struct MemCursor {
    entries: std::vec::IntoIter<CollEntry>,
}

impl CollCursor for MemCursor {
    fn next_entry(&mut self) -> StoreResult<CollEntry> {
        self.entries.next().ok_or_else(|| fail(CAT_NO_ROWS_FOUND))
    }
}

impl StoreSession for MemStore {
    fn env(&self) -> &StoreEnv {
        &self.env
    }

    fn stat(&self, path: &str) -> StoreResult<ObjStat> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Stat)?;
        let node = inner
            .nodes
            .get(path)
            .ok_or_else(|| fail(USER_FILE_DOES_NOT_EXIST))?;
        let (obj_type, size) = match &node.kind {
            NodeKind::Collection => (ObjType::Collection, 0),
            NodeKind::DataObject(data) => (ObjType::DataObject, data.len() as u64),
            NodeKind::Special => (ObjType::Unknown(7), 0),
        };
        Ok(ObjStat {
            obj_type,
            size,
            owner: node.owner.clone(),
            modify_time: node.modify_time,
            create_time: node.create_time,
            checksum: None,
            resc_hier: node.resource.clone(),
        })
    }

    fn open(
        &self,
        path: &str,
        flags: OpenFlags,
        _resource: Option<&str>,
    ) -> StoreResult<Descriptor> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Open)?;
        let now = inner.clock + 1;
        match inner.nodes.get_mut(path).map(|n| (&mut n.kind, &mut n.modify_time)) {
            Some((NodeKind::DataObject(data), mtime)) => {
                if flags.contains(OpenFlags::TRUNCATE) {
                    data.clear();
                    *mtime = now;
                }
            }
            Some(_) => return Err(fail(CAT_UNKNOWN_FILE)),
            None => return Err(fail(USER_FILE_DOES_NOT_EXIST)),
        }
        if flags.contains(OpenFlags::TRUNCATE) {
            inner.tick();
        }
        Ok(inner.open_fd(path))
    }

    fn create(&self, path: &str, resource: Option<&str>) -> StoreResult<Descriptor> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Create)?;
        if inner.nodes.contains_key(path) {
            return Err(fail(OVERWRITE_WITHOUT_FORCE_FLAG));
        }
        if !inner.is_collection(parent_of(path)) {
            return Err(fail(CAT_UNKNOWN_COLLECTION));
        }
        let node = inner.new_node(NodeKind::DataObject(Vec::new()), &self.env.user, resource);
        inner.nodes.insert(path.to_string(), node);
        Ok(inner.open_fd(path))
    }

    fn read(&self, fd: Descriptor, len: usize) -> StoreResult<Bytes> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Read)?;
        let (path, pos) = match inner.fds.get(&fd.0) {
            Some(o) => (o.path.clone(), o.pos),
            None => return Err(fail(BAD_INPUT_DESC_INDEX)),
        };
        let chunk = match inner.nodes.get(&path).map(|n| &n.kind) {
            Some(NodeKind::DataObject(data)) => {
                let start = (pos as usize).min(data.len());
                let end = start.saturating_add(len).min(data.len());
                Bytes::copy_from_slice(&data[start..end])
            }
            _ => return Err(fail(USER_FILE_DOES_NOT_EXIST)),
        };
        if let Some(o) = inner.fds.get_mut(&fd.0) {
            o.pos += chunk.len() as u64;
        }
        Ok(chunk)
    }

    fn write(&self, fd: Descriptor, buf: &[u8]) -> StoreResult<usize> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Write)?;
        let (path, pos) = match inner.fds.get(&fd.0) {
            Some(o) => (o.path.clone(), o.pos as usize),
            None => return Err(fail(BAD_INPUT_DESC_INDEX)),
        };
        let now = inner.tick();
        match inner.nodes.get_mut(&path) {
            Some(Node {
                kind: NodeKind::DataObject(data),
                modify_time,
                ..
            }) => {
                if data.len() < pos + buf.len() {
                    data.resize(pos + buf.len(), 0);
                }
                data[pos..pos + buf.len()].copy_from_slice(buf);
                *modify_time = now;
            }
            _ => return Err(fail(USER_FILE_DOES_NOT_EXIST)),
        }
        if let Some(o) = inner.fds.get_mut(&fd.0) {
            o.pos += buf.len() as u64;
        }
        Ok(buf.len())
    }

    fn seek(&self, fd: Descriptor, pos: u64) -> StoreResult<u64> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Seek)?;
        match inner.fds.get_mut(&fd.0) {
            Some(o) => {
                o.pos = pos;
                Ok(pos)
            }
            None => Err(fail(BAD_INPUT_DESC_INDEX)),
        }
    }

    fn close(&self, fd: Descriptor) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        let res = inner.enter(StoreOp::Close);
        // the descriptor is released even when the close reports an error.
        if inner.fds.remove(&fd.0).is_none() {
            return Err(fail(BAD_INPUT_DESC_INDEX));
        }
        res
    }

    fn open_collection<'a>(&'a self, path: &str) -> StoreResult<Box<dyn CollCursor + 'a>> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::List)?;
        match inner.nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::Collection) => {}
            Some(_) => return Err(fail(CAT_NOT_A_COLLECTION)),
            None => return Err(fail(CAT_UNKNOWN_COLLECTION)),
        }
        let entries = inner
            .children(path)
            .into_iter()
            .map(|(p, n)| {
                let (obj_type, size) = match &n.kind {
                    NodeKind::Collection => (ObjType::Collection, 0),
                    NodeKind::DataObject(d) => (ObjType::DataObject, d.len() as u64),
                    NodeKind::Special => (ObjType::Unknown(7), 0),
                };
                CollEntry {
                    obj_type,
                    name: name_of(&p).to_string(),
                    size,
                    owner: n.owner,
                    modify_time: n.modify_time,
                    create_time: n.create_time,
                    checksum: None,
                }
            })
            .collect::<Vec<_>>();
        Ok(Box::new(MemCursor {
            entries: entries.into_iter(),
        }))
    }

    fn create_collection(&self, path: &str) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::CreateCollection)?;
        if inner.nodes.contains_key(path) {
            return Err(fail(CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME));
        }
        if !inner.is_collection(parent_of(path)) {
            return Err(fail(CAT_UNKNOWN_COLLECTION));
        }
        let node = inner.new_node(NodeKind::Collection, &self.env.user, None);
        inner.nodes.insert(path.to_string(), node);
        inner.stale_dirs.remove(path);
        Ok(())
    }

    fn remove_collection(&self, path: &str, recursive: bool, _force: bool) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::RemoveCollection)?;
        if !inner.is_collection(path) {
            return Err(fail(CAT_UNKNOWN_COLLECTION));
        }
        let keys = inner.subtree_keys(path);
        if !recursive && keys.len() > 1 {
            return Err(fail(CAT_COLLECTION_NOT_EMPTY));
        }
        for key in keys {
            if let Some(node) = inner.nodes.remove(&key) {
                if inner.keep_stale_dirs && matches!(node.kind, NodeKind::Collection) {
                    inner.stale_dirs.insert(key);
                }
            }
        }
        Ok(())
    }

    fn unlink(&self, path: &str, _force: bool) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Unlink)?;
        match inner.nodes.get(path).map(|n| &n.kind) {
            Some(NodeKind::DataObject(_)) | Some(NodeKind::Special) => {
                inner.nodes.remove(path);
                Ok(())
            }
            Some(NodeKind::Collection) => Err(fail(CAT_UNKNOWN_FILE)),
            None => Err(fail(USER_FILE_DOES_NOT_EXIST)),
        }
    }

    fn rename(&self, from: &str, to: &str, kind: RenameKind) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Rename)?;
        match (inner.nodes.get(from).map(|n| &n.kind), kind) {
            (Some(NodeKind::Collection), RenameKind::Collection) => {}
            (Some(NodeKind::DataObject(_)), RenameKind::DataObject) => {}
            (Some(NodeKind::Collection), RenameKind::DataObject) => {
                return Err(fail(CAT_UNKNOWN_FILE))
            }
            (Some(_), RenameKind::Collection) => return Err(fail(CAT_NOT_A_COLLECTION)),
            (Some(NodeKind::Special), _) => return Err(fail(CAT_UNKNOWN_FILE)),
            (None, _) => return Err(fail(USER_FILE_DOES_NOT_EXIST)),
        }
        if inner.nodes.contains_key(to) {
            return Err(fail(CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME));
        }
        if !inner.is_collection(parent_of(to)) {
            return Err(fail(CAT_UNKNOWN_COLLECTION));
        }
        if kind == RenameKind::DataObject && inner.stale_dirs.contains(to) {
            return Err(fail(UNIX_FILE_RENAME_ERR - EISDIR));
        }
        let now = inner.tick();
        for key in inner.subtree_keys(from) {
            if let Some(mut node) = inner.nodes.remove(&key) {
                let newkey = format!("{}{}", to, &key[from.len()..]);
                if key == from {
                    node.modify_time = now;
                }
                inner.nodes.insert(newkey, node);
            }
        }
        Ok(())
    }

    fn copy(&self, from: &str, to: &str, force: bool, resource: Option<&str>) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        inner.enter(StoreOp::Copy)?;
        let data = match inner.nodes.get(from).map(|n| &n.kind) {
            Some(NodeKind::DataObject(data)) => data.clone(),
            Some(_) => return Err(fail(CAT_UNKNOWN_FILE)),
            None => return Err(fail(USER_FILE_DOES_NOT_EXIST)),
        };
        match inner.nodes.get(to).map(|n| &n.kind) {
            Some(NodeKind::DataObject(_)) if force => {}
            Some(NodeKind::DataObject(_)) => return Err(fail(OVERWRITE_WITHOUT_FORCE_FLAG)),
            Some(_) => return Err(fail(CAT_NAME_EXISTS_AS_DATAOBJ)),
            None => {}
        }
        if !inner.is_collection(parent_of(to)) {
            return Err(fail(CAT_UNKNOWN_COLLECTION));
        }
        let node = inner.new_node(NodeKind::DataObject(data), &self.env.user, resource);
        inner.nodes.insert(to.to_string(), node);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemStore {
        MemStore::new("tempZone", "alice")
    }

    #[test]
    fn test_initial_layout() {
        let s = store();
        assert!(s.is_collection("/"));
        assert!(s.is_collection("/tempZone/home/alice"));
        let st = s.stat("/tempZone/home").unwrap();
        assert_eq!(st.obj_type, ObjType::Collection);
        assert_eq!(s.stat("/nope"), Err(StoreError::NotFound));
    }

    #[test]
    fn test_create_write_read() {
        let s = store();
        let fd = s.create("/tempZone/home/alice/f", None).unwrap();
        s.write(fd, b"hello ").unwrap();
        s.write(fd, b"world").unwrap();
        s.close(fd).unwrap();
        assert_eq!(s.object_data("/tempZone/home/alice/f").unwrap(), b"hello world");

        let fd = s.open("/tempZone/home/alice/f", OpenFlags::READ, None).unwrap();
        assert_eq!(&s.read(fd, 5).unwrap()[..], b"hello");
        assert_eq!(&s.read(fd, 100).unwrap()[..], b" world");
        assert!(s.read(fd, 100).unwrap().is_empty());
        s.close(fd).unwrap();
        assert_eq!(s.open_descriptors(), 0);
        assert_eq!(s.close(fd), Err(StoreError::BadDescriptor));
    }

    #[test]
    fn test_create_existing_fails() {
        let s = store();
        s.put_object("/tempZone/home/alice/f", b"x");
        assert_eq!(
            s.create("/tempZone/home/alice/f", None),
            Err(StoreError::AlreadyExists)
        );
        assert_eq!(
            s.create("/tempZone/home/alice/nodir/f", None),
            Err(StoreError::NotFound)
        );
    }

    #[test]
    fn test_listing_order() {
        let s = store();
        s.put_object("/tempZone/home/alice/b", b"");
        s.mkdir_all("/tempZone/home/alice/a/deep");
        let mut cur = s.open_collection("/tempZone/home/alice").unwrap();
        assert_eq!(cur.next_entry().unwrap().name, "a");
        assert_eq!(cur.next_entry().unwrap().name, "b");
        assert_eq!(cur.next_entry(), Err(StoreError::NoMoreRows));
    }

    #[test]
    fn test_rename_subtree() {
        let s = store();
        s.put_object("/tempZone/home/alice/a/x", b"1");
        s.rename(
            "/tempZone/home/alice/a",
            "/tempZone/home/alice/b",
            RenameKind::Collection,
        )
        .unwrap();
        assert!(!s.exists("/tempZone/home/alice/a"));
        assert_eq!(s.object_data("/tempZone/home/alice/b/x").unwrap(), b"1");
    }

    #[test]
    fn test_stale_dir_rename() {
        let s = store();
        s.keep_stale_dirs(true);
        s.mkdir_all("/tempZone/home/alice/old");
        s.remove_collection("/tempZone/home/alice/old", true, false)
            .unwrap();
        s.put_object("/tempZone/home/alice/f", b"1");
        assert_eq!(
            s.rename(
                "/tempZone/home/alice/f",
                "/tempZone/home/alice/old",
                RenameKind::DataObject
            ),
            Err(StoreError::StaleDirectory { errno: EISDIR })
        );
    }

    #[test]
    fn test_fail_next_and_counts() {
        let s = store();
        s.reset_calls();
        s.fail_next(StoreOp::Stat, SYS_HEADER_READ_LEN_ERR);
        assert!(matches!(s.stat("/"), Err(StoreError::Io(_))));
        assert!(s.stat("/").is_ok());
        assert_eq!(s.calls().stat, 2);
        assert_eq!(s.calls().total(), 2);
    }
}
