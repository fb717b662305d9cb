//! Remote store interface.
//!
//! The gateway talks to a catalog-backed object store: a namespace of
//! collections (directories) and data objects (files), addressed by
//! absolute store paths like `/zone/home/user/file.txt`.
//!
//! Every call on a [`StoreSession`] is a blocking round-trip. Calls on one
//! session are issued strictly in program order; the store protocol is
//! synchronous per connection.
//!
//! Raw status codes never leave the [`status`] module. Everything above
//! it sees a [`StoreError`].
use std::error::Error;
use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitflags::bitflags;
use bytes::Bytes;

#[cfg(any(docsrs, feature = "memstore"))]
#[cfg_attr(docsrs, doc(cfg(feature = "memstore")))]
pub mod memstore;
pub mod status;

/// Maximum length of a store path, including the root prefix.
///
/// Any path that reaches this length is rejected before a remote call is made.
pub const MAX_NAME_LEN: usize = 1088;

/// Result type of all store calls.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors returned by the remote store, after translation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The object or collection does not exist.
    NotFound,
    /// End of a collection listing. Not a failure.
    NoMoreRows,
    /// The target name is already taken.
    AlreadyExists,
    /// The path does not refer to a collection.
    NotACollection,
    /// The storage backend refused a rename because a directory with the
    /// destination name is still present on its filesystem.
    StaleDirectory { errno: i32 },
    /// Unknown or already closed object descriptor.
    BadDescriptor,
    /// Transport level failure.
    Io(String),
    /// Any other negative status.
    Other { code: i32, message: String },
}

impl Error for StoreError {}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "object does not exist"),
            StoreError::NoMoreRows => write!(f, "no more rows"),
            StoreError::AlreadyExists => write!(f, "an object with that name already exists"),
            StoreError::NotACollection => write!(f, "not a collection"),
            StoreError::StaleDirectory { errno } => {
                write!(f, "rename failed on the storage filesystem (errno {errno})")
            }
            StoreError::BadDescriptor => write!(f, "bad object descriptor"),
            StoreError::Io(msg) => write!(f, "connection error: {msg}"),
            StoreError::Other { code, message } => write!(f, "{message} ({code})"),
        }
    }
}

/// Type of a namespace entry, as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjType {
    DataObject,
    Collection,
    /// Anything else the catalog may hold (should not happen).
    Unknown(i32),
}

/// A stat snapshot of a data object or collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjStat {
    pub obj_type: ObjType,
    pub size: u64,
    pub owner: String,
    /// Seconds since the unix epoch.
    pub modify_time: u64,
    /// Seconds since the unix epoch.
    pub create_time: u64,
    pub checksum: Option<String>,
    pub resc_hier: String,
}

impl ObjStat {
    pub fn modified(&self) -> SystemTime {
        secs_to_systemtime(self.modify_time)
    }

    pub fn created(&self) -> SystemTime {
        secs_to_systemtime(self.create_time)
    }
}

/// One row of a collection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollEntry {
    pub obj_type: ObjType,
    /// Last path component of the entry.
    pub name: String,
    pub size: u64,
    pub owner: String,
    pub modify_time: u64,
    pub create_time: u64,
    pub checksum: Option<String>,
}

impl CollEntry {
    pub fn is_collection(&self) -> bool {
        self.obj_type == ObjType::Collection
    }

    pub fn modified(&self) -> SystemTime {
        secs_to_systemtime(self.modify_time)
    }

    /// Build the stat snapshot of this entry, saving a stat round-trip.
    pub fn to_stat(&self) -> ObjStat {
        ObjStat {
            obj_type: self.obj_type,
            size: if self.is_collection() { 0 } else { self.size },
            owner: self.owner.clone(),
            modify_time: self.modify_time,
            create_time: self.create_time,
            checksum: self.checksum.clone(),
            resc_hier: String::new(),
        }
    }
}

// Out of range timestamps fall back to the epoch.
pub(crate) fn secs_to_systemtime(secs: u64) -> SystemTime {
    UNIX_EPOCH
        .checked_add(Duration::from_secs(secs))
        .unwrap_or(UNIX_EPOCH)
}

bitflags! {
    /// Open flags for data objects.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: u32 {
        const READ = 0x01;
        const WRITE = 0x02;
        const CREATE = 0x04;
        const TRUNCATE = 0x08;
    }
}

/// Which kind of object a rename applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameKind {
    DataObject,
    Collection,
}

/// Handle of an opened data object, valid for the session that returned it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Descriptor(pub i32);

/// Session environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEnv {
    pub zone: String,
    pub user: String,
}

/// Cursor over the rows of an opened collection.
///
/// `next_entry` returns `Err(StoreError::NoMoreRows)` at the end.
pub trait CollCursor {
    fn next_entry(&mut self) -> StoreResult<CollEntry>;
}

/// An authenticated connection to the remote store.
pub trait StoreSession: Send + Sync {
    /// Zone and user this session is authenticated as.
    fn env(&self) -> &StoreEnv;

    /// Canonicalise a path the way the store does (collapse `.`, `..`,
    /// duplicate and trailing slashes).
    fn parse_path(&self, path: &str) -> StoreResult<String> {
        Ok(normalize_path(path))
    }

    fn stat(&self, path: &str) -> StoreResult<ObjStat>;

    /// Open an existing data object.
    fn open(&self, path: &str, flags: OpenFlags, resource: Option<&str>)
        -> StoreResult<Descriptor>;

    /// Create a new data object and open it for writing.
    fn create(&self, path: &str, resource: Option<&str>) -> StoreResult<Descriptor>;

    /// Read up to `len` bytes. A short read means end of object.
    fn read(&self, fd: Descriptor, len: usize) -> StoreResult<Bytes>;

    fn write(&self, fd: Descriptor, buf: &[u8]) -> StoreResult<usize>;

    /// Reposition to an absolute offset.
    fn seek(&self, fd: Descriptor, pos: u64) -> StoreResult<u64>;

    fn close(&self, fd: Descriptor) -> StoreResult<()>;

    fn open_collection<'a>(&'a self, path: &str) -> StoreResult<Box<dyn CollCursor + 'a>>;

    fn create_collection(&self, path: &str) -> StoreResult<()>;

    /// Remove a collection. `force` bypasses the trash.
    fn remove_collection(&self, path: &str, recursive: bool, force: bool) -> StoreResult<()>;

    /// Remove a data object. `force` bypasses the trash.
    fn unlink(&self, path: &str, force: bool) -> StoreResult<()>;

    fn rename(&self, from: &str, to: &str, kind: RenameKind) -> StoreResult<()>;

    /// Server side copy of a data object.
    fn copy(&self, from: &str, to: &str, force: bool, resource: Option<&str>) -> StoreResult<()>;
}

/// Lexical path canonicalisation.
///
/// `..` above the root stays at the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    if parts.is_empty() {
        return "/".to_string();
    }
    let mut out = String::with_capacity(path.len());
    for p in parts {
        out.push('/');
        out.push_str(p);
    }
    out
}
