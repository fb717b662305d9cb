//! Lock registry, as far as tree walks are concerned.
//!
//! A walk that includes lock-null members needs to know which names under a
//! collection were locked before they were created. Only the built-in
//! [`MemLockRegistry`] can answer that. Locks are keyed by store path, since
//! the same URI maps to different objects for different users.
use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::repo::path::parent_path;

pub trait DavLockRegistry: Send + Sync {
    /// Store paths of locked entries directly below `collection`.
    ///
    /// `None` means this registry cannot enumerate them.
    fn locked_entries(&self, collection: &str) -> Option<Vec<String>> {
        let _ = collection;
        None
    }
}

/// Ephemeral in-memory lock registry.
#[derive(Debug, Default)]
pub struct MemLockRegistry {
    locked: Mutex<BTreeSet<String>>,
}

impl MemLockRegistry {
    pub fn new() -> Arc<MemLockRegistry> {
        Arc::new(MemLockRegistry::default())
    }

    pub fn lock(&self, path: &str) {
        let mut locked = self.locked.lock();
        locked.insert(path.to_string());
    }

    pub fn unlock(&self, path: &str) -> bool {
        let mut locked = self.locked.lock();
        locked.remove(path)
    }
}

impl DavLockRegistry for MemLockRegistry {
    fn locked_entries(&self, collection: &str) -> Option<Vec<String>> {
        let locked = self.locked.lock();
        Some(
            locked
                .iter()
                .filter(|p| p.as_str() != collection && parent_path(p) == collection)
                .cloned()
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Foreign;
    impl DavLockRegistry for Foreign {}

    #[test]
    fn test_locked_entries() {
        let reg = MemLockRegistry::new();
        reg.lock("/z/a/x");
        reg.lock("/z/a/b/y");
        reg.lock("/z/c");
        assert_eq!(reg.locked_entries("/z/a"), Some(vec!["/z/a/x".to_string()]));
        assert_eq!(reg.locked_entries("/z/a/b"), Some(vec!["/z/a/b/y".to_string()]));
        assert!(reg.unlock("/z/a/x"));
        assert_eq!(reg.locked_entries("/z/a"), Some(vec![]));
        assert_eq!(Foreign.locked_entries("/z/a"), None);
    }

    #[test]
    fn test_shared_between_threads() {
        let reg = MemLockRegistry::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let reg = reg.clone();
                std::thread::spawn(move || reg.lock(&format!("/z/a/{i}")))
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(reg.locked_entries("/z/a").unwrap().len(), 4);
    }
}
