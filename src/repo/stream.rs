//! Buffered uploads with commit or rollback.
//!
//! Small writes are collected in a container buffer and shipped to the store
//! in large blocks; one remote write per client chunk is far too slow.
//!
//! With rollback enabled, a truncating upload goes to a temporary sibling
//! object that replaces the destination only on commit.
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::errors::DavError;
use crate::repo::path::parent_path;
use crate::repo::resource::DavResource;
use crate::store::{Descriptor, OpenFlags, RenameKind, StoreSession, MAX_NAME_LEN};
use crate::DavResult;

/// How a stream writes to its resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// Replace the whole content.
    WriteTrunc,
    /// Update in place at arbitrary offsets.
    WriteSeekable,
}

/// Prefix of temporary upload objects.
pub const TMPFILE_PREFIX: &str = ".storedav-tx";

// Cheap, not cryptographic. Only needs to spread names a bit.
fn cheapsum(uri: &str) -> u32 {
    uri.bytes()
        .fold(0u32, |sum, c| sum.wrapping_add(1u32.wrapping_shl(c as u32)))
}

/// Name of the temporary sibling used while uploading to `uri`.
pub fn tmpfile_name(uri: &str, pid: u32, now: u64) -> String {
    format!(
        "{}-{:04x}-{:08x}",
        TMPFILE_PREFIX,
        pid,
        now ^ cheapsum(uri) as u64
    )
}

/// An open upload.
pub struct DavStream {
    session: Arc<dyn StoreSession>,
    dest_path: String,
    write_path: String,
    dest_existed: bool,
    fd: Descriptor,
    container: Vec<u8>,
    capacity: usize,
    failed: bool,
}

impl DavStream {
    pub(crate) fn open(resource: &DavResource, mode: StreamMode) -> DavResult<DavStream> {
        let config = &resource.config;
        let dest_path = resource.store_path().to_string();
        let direct = mode == StreamMode::WriteSeekable || !config.tmpfile_rollback;

        let write_path = if direct {
            dest_path.clone()
        } else {
            let now = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
            let name = tmpfile_name(resource.uri(), std::process::id(), now);
            let parent = parent_path(&dest_path);
            if parent == "/" {
                format!("/{name}")
            } else {
                format!("{parent}/{name}")
            }
        };
        if write_path.len() >= MAX_NAME_LEN {
            error!(
                "temporary upload path for <{}> exceeds the store's path length limit",
                resource.uri()
            );
            return Err(DavError::PathTooLong(write_path));
        }
        debug!(
            "opening {:?} stream to <{}> for <{}>",
            mode,
            write_path,
            resource.uri()
        );

        let session = resource.session.clone();
        let resc = config.default_resource.as_deref();
        let fd = if direct && resource.exists() {
            let mut flags = OpenFlags::WRITE | OpenFlags::CREATE;
            if mode == StreamMode::WriteTrunc {
                flags |= OpenFlags::TRUNCATE;
            }
            session
                .open(&write_path, flags, resc)
                .map_err(|e| DavError::remote("open", &write_path, e))?
        } else {
            session
                .create(&write_path, resc)
                .map_err(|e| DavError::remote("create", &write_path, e))?
        };

        Ok(DavStream {
            session,
            dest_path,
            write_path,
            dest_existed: resource.exists(),
            fd,
            container: Vec::with_capacity(config.tx_buffer_size),
            capacity: config.tx_buffer_size.max(1),
            failed: false,
        })
    }

    /// Store path the bytes are written to.
    pub fn write_path(&self) -> &str {
        &self.write_path
    }

    pub fn uses_tmpfile(&self) -> bool {
        self.write_path != self.dest_path
    }

    fn check_usable(&self) -> DavResult<()> {
        if self.failed {
            return Err(DavError::Internal(format!(
                "upload to <{}> already failed",
                self.dest_path
            )));
        }
        Ok(())
    }

    fn send(&mut self, buf: &[u8]) -> DavResult<()> {
        let mut done = 0;
        while done < buf.len() {
            match self.session.write(self.fd, &buf[done..]) {
                Ok(0) => {
                    self.failed = true;
                    return Err(DavError::Internal(format!(
                        "short write to <{}>",
                        self.write_path
                    )));
                }
                Ok(n) => done += n,
                Err(e) => {
                    self.failed = true;
                    return Err(DavError::remote("write", &self.write_path, e));
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> DavResult<()> {
        if self.container.is_empty() {
            return Ok(());
        }
        let container = std::mem::take(&mut self.container);
        let res = self.send(&container);
        self.container = container;
        self.container.clear();
        res
    }

    /// Queue bytes for upload.
    ///
    /// After an error the stream is unusable; every later write fails.
    pub fn write(&mut self, buf: &[u8]) -> DavResult<()> {
        self.check_usable()?;
        if buf.len() >= self.capacity {
            self.flush()?;
            return self.send(buf);
        }
        if self.container.len() + buf.len() > self.capacity {
            self.flush()?;
        }
        self.container.extend_from_slice(buf);
        Ok(())
    }

    /// Reposition to an absolute offset. Buffered bytes go out first.
    pub fn seek(&mut self, pos: u64) -> DavResult<()> {
        self.check_usable()?;
        self.flush()?;
        self.session
            .seek(self.fd, pos)
            .map_err(|e| DavError::remote("seek", &self.write_path, e))?;
        Ok(())
    }

    /// Finish the upload.
    ///
    /// On commit, everything must reach the store and (with a temporary
    /// object) the temporary replaces the destination. On rollback, failures
    /// are logged and otherwise ignored.
    pub fn close(mut self, commit: bool) -> DavResult<()> {
        let flushed = if self.failed { Ok(()) } else { self.flush() };
        let flushed = flushed.and_then(|_| self.check_usable());
        if let Err(e) = flushed {
            if commit {
                if let Err(ce) = self.session.close(self.fd) {
                    warn!("closing <{}> after a failed write: {}", self.write_path, ce);
                }
                self.discard();
                return Err(e);
            }
            warn!("flush before rollback of <{}> failed: {}", self.write_path, e);
        }

        if let Err(e) = self.session.close(self.fd) {
            if commit {
                let err = DavError::remote("close", &self.write_path, e);
                self.discard();
                return Err(err);
            }
            warn!("close of <{}> during rollback failed: {}", self.write_path, e);
        }

        if commit {
            if self.uses_tmpfile() {
                if self.dest_existed {
                    self.session
                        .unlink(&self.dest_path, true)
                        .map_err(|e| DavError::remote("unlink", &self.dest_path, e))?;
                }
                self.session
                    .rename(&self.write_path, &self.dest_path, RenameKind::DataObject)
                    .map_err(|e| DavError::remote("rename", &self.dest_path, e))?;
            }
            return Ok(());
        }
        self.discard();
        Ok(())
    }

    // Roll back what can be rolled back.
    fn discard(&self) {
        if self.uses_tmpfile() {
            if let Err(e) = self.session.unlink(&self.write_path, true) {
                warn!(
                    "could not remove temporary upload <{}>: {}",
                    self.write_path, e
                );
            }
        } else if self.dest_existed {
            warn!(
                "upload to existing <{}> aborted; it may be partially overwritten",
                self.dest_path
            );
        } else if let Err(e) = self.session.unlink(&self.dest_path, true) {
            warn!("could not remove aborted upload <{}>: {}", self.dest_path, e);
        }
    }
}

#[cfg(all(test, feature = "memstore"))]
mod tests {
    use super::*;
    use crate::repo::resource::RequestInfo;
    use crate::repo::ProviderConfig;
    use crate::store::memstore::{MemStore, StoreOp};
    use crate::store::status::{SYS_HEADER_WRITE_LEN_ERR, UNIX_FILE_RENAME_ERR, EISDIR};

    const DIR: &str = "/z/home/u";

    fn resource(store: &Arc<MemStore>, name: &str, config: ProviderConfig) -> DavResource {
        let uri = format!("/{name}");
        let mut res = DavResource::new(
            store.clone(),
            Arc::new(config),
            Arc::new(RequestInfo::new(uri.clone(), "")),
            Arc::from(DIR),
            &uri,
            &format!("{DIR}/{name}"),
        );
        res.fetch_info().unwrap();
        res
    }

    fn no_rollback() -> ProviderConfig {
        ProviderConfig {
            tmpfile_rollback: false,
            ..ProviderConfig::default()
        }
    }

    fn tmp_objects(store: &MemStore) -> Vec<String> {
        store
            .paths_under(DIR)
            .into_iter()
            .filter(|p| p.contains(TMPFILE_PREFIX))
            .collect()
    }

    #[test]
    fn test_tmpfile_name() {
        let name = tmpfile_name("/a", 0x1f, 0);
        assert!(name.starts_with(".storedav-tx-001f-"));
        assert_eq!(name.len(), ".storedav-tx-001f-".len() + 8);
        assert_eq!(tmpfile_name("/a", 1, 42), tmpfile_name("/a", 1, 42));
        assert_ne!(tmpfile_name("/a", 1, 42), tmpfile_name("/b", 1, 42));
    }

    #[test]
    fn test_rollback_leaves_destination_untouched() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"original");
        let res = resource(&store, "f", ProviderConfig::default());

        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        assert!(stream.uses_tmpfile());
        stream.write(&[7u8; 10000]).unwrap();
        stream.close(false).unwrap();

        assert_eq!(store.object_data("/z/home/u/f").unwrap(), b"original");
        assert!(tmp_objects(&store).is_empty());
        assert_eq!(store.open_descriptors(), 0);
    }

    #[test]
    fn test_commit_replaces_destination() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"original");
        let res = resource(&store, "f", ProviderConfig::default());

        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        stream.write(b"new ").unwrap();
        stream.write(b"content").unwrap();
        // nothing written to the destination before the commit.
        assert_eq!(store.object_data("/z/home/u/f").unwrap(), b"original");
        stream.close(true).unwrap();

        assert_eq!(store.object_data("/z/home/u/f").unwrap(), b"new content");
        assert!(tmp_objects(&store).is_empty());
    }

    #[test]
    fn test_commit_new_object() {
        let store = Arc::new(MemStore::new("z", "u"));
        let res = resource(&store, "g", ProviderConfig::default());
        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        stream.write(b"x").unwrap();
        stream.close(true).unwrap();
        assert_eq!(store.object_data("/z/home/u/g").unwrap(), b"x");
    }

    #[test]
    fn test_direct_write() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"original");
        let res = resource(&store, "f", no_rollback());

        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        assert!(!stream.uses_tmpfile());
        stream.write(b"abc").unwrap();
        stream.close(true).unwrap();
        assert_eq!(store.object_data("/z/home/u/f").unwrap(), b"abc");
    }

    #[test]
    fn test_direct_rollback_of_new_object() {
        let store = Arc::new(MemStore::new("z", "u"));
        let res = resource(&store, "h", no_rollback());
        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        stream.write(b"abc").unwrap();
        stream.close(false).unwrap();
        assert!(!store.exists("/z/home/u/h"));
    }

    #[test]
    fn test_seekable() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"0123456789");
        let res = resource(&store, "f", ProviderConfig::default());

        let mut stream = DavStream::open(&res, StreamMode::WriteSeekable).unwrap();
        assert!(!stream.uses_tmpfile());
        stream.write(b"ab").unwrap();
        stream.seek(6).unwrap();
        stream.write(b"XY").unwrap();
        stream.close(true).unwrap();
        assert_eq!(store.object_data("/z/home/u/f").unwrap(), b"ab2345XY89");
    }

    #[test]
    fn test_write_amortization() {
        let store = Arc::new(MemStore::new("z", "u"));
        let res = resource(&store, "big", ProviderConfig::default());
        store.reset_calls();

        let chunk = [1u8; 2048];
        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        for _ in 0..1000 {
            stream.write(&chunk).unwrap();
        }
        stream.close(true).unwrap();

        let max = (2_048_000usize).div_ceil(4 * 1024 * 1024) + 1;
        assert!(store.calls().write <= max);
        assert_eq!(store.object_data("/z/home/u/big").unwrap().len(), 2_048_000);
    }

    #[test]
    fn test_large_chunk_bypasses_container() {
        let store = Arc::new(MemStore::new("z", "u"));
        let config = ProviderConfig {
            tx_buffer_size: 16,
            ..ProviderConfig::default()
        };
        let res = resource(&store, "f", config);
        store.reset_calls();

        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        stream.write(b"small").unwrap();
        assert_eq!(store.calls().write, 0);
        stream.write(&[0u8; 32]).unwrap();
        // pending container first, then the chunk itself.
        assert_eq!(store.calls().write, 2);
        stream.write(b"0123456789").unwrap();
        stream.write(b"0123456789").unwrap();
        assert_eq!(store.calls().write, 3);
        stream.close(true).unwrap();
        assert_eq!(store.calls().write, 4);
        assert_eq!(store.object_data("/z/home/u/f").unwrap().len(), 57);
    }

    #[test]
    fn test_failed_write_makes_stream_unusable() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"original");
        let config = ProviderConfig {
            tx_buffer_size: 4,
            ..ProviderConfig::default()
        };
        let res = resource(&store, "f", config);

        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        store.fail_next(StoreOp::Write, SYS_HEADER_WRITE_LEN_ERR);
        assert!(stream.write(b"abcdef").is_err());
        assert!(stream.write(b"a").is_err());
        assert!(stream.close(true).is_err());
        assert_eq!(store.object_data("/z/home/u/f").unwrap(), b"original");
        assert!(tmp_objects(&store).is_empty());
        assert_eq!(store.open_descriptors(), 0);
    }

    #[test]
    fn test_close_failure_on_commit_is_fatal() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"original");
        let res = resource(&store, "f", ProviderConfig::default());

        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        stream.write(b"abc").unwrap();
        store.fail_next(StoreOp::Close, SYS_HEADER_WRITE_LEN_ERR);
        assert!(matches!(
            stream.close(true),
            Err(DavError::Remote { op: "close", .. })
        ));
        assert_eq!(store.object_data("/z/home/u/f").unwrap(), b"original");
    }

    #[test]
    fn test_close_failure_on_rollback_is_ignored() {
        let store = Arc::new(MemStore::new("z", "u"));
        let res = resource(&store, "f", ProviderConfig::default());
        let stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        store.fail_next(StoreOp::Close, SYS_HEADER_WRITE_LEN_ERR);
        assert!(stream.close(false).is_ok());
        assert!(tmp_objects(&store).is_empty());
    }

    #[test]
    fn test_stale_directory_on_commit() {
        let store = Arc::new(MemStore::new("z", "u"));
        let res = resource(&store, "f", ProviderConfig::default());
        let mut stream = DavStream::open(&res, StreamMode::WriteTrunc).unwrap();
        stream.write(b"abc").unwrap();
        store.fail_next(StoreOp::Rename, UNIX_FILE_RENAME_ERR - EISDIR);
        assert!(matches!(
            stream.close(true),
            Err(DavError::StaleDirectory(_))
        ));
    }

    #[test]
    fn test_tmpfile_path_too_long() {
        let store = Arc::new(MemStore::new("z", "u"));
        // the destination fits, its temporary sibling does not.
        let dir = "n".repeat(crate::store::MAX_NAME_LEN - DIR.len() - 12);
        let res = resource(&store, &format!("{dir}/f"), ProviderConfig::default());
        assert!(res.store_path().len() < crate::store::MAX_NAME_LEN);
        store.reset_calls();
        assert!(matches!(
            DavStream::open(&res, StreamMode::WriteTrunc),
            Err(DavError::PathTooLong(_))
        ));
        assert_eq!(store.calls().total(), 0);
    }
}
