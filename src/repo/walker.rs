//! Depth-bounded pre-order traversal of the store namespace.
//!
//! The walker owns one resource and rewrites its URI and store path in
//! place as it descends, pushing a segment per level and truncating it on
//! the way back up. The callback only ever sees the resource for the
//! duration of its own call.
use std::collections::HashSet;

use bitflags::bitflags;

use crate::errors::DavError;
use crate::locks::DavLockRegistry;
use crate::repo::path::basename;
use crate::repo::resource::DavResource;
use crate::store::StoreError;
use crate::DavResult;

bitflags! {
    /// What a walk is for.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WalkType: u32 {
        /// Visit existing resources.
        const NORMAL = 0x02;
        /// Also visit lock-null members.
        const LOCKNULL = 0x04;
    }
}

/// How deep to recurse below the root.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Depth {
    Finite(u32),
    Infinity,
}

impl Depth {
    pub fn is_zero(self) -> bool {
        self == Depth::Finite(0)
    }

    /// One level down. Infinity stays infinity.
    pub fn decrement(self) -> Depth {
        match self {
            Depth::Finite(n) => Depth::Finite(n.saturating_sub(1)),
            Depth::Infinity => Depth::Infinity,
        }
    }
}

/// Why the callback is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Member,
    Collection,
    LockNull,
}

/// Callback invoked for every visited resource.
pub type WalkFn<'f> = dyn FnMut(&DavResource, CallType) -> DavResult<()> + 'f;

pub struct Walker<'a> {
    resource: DavResource,
    walk_type: WalkType,
    locks: Option<&'a dyn DavLockRegistry>,
}

impl<'a> Walker<'a> {
    pub fn new(
        root: &DavResource,
        walk_type: WalkType,
        locks: Option<&'a dyn DavLockRegistry>,
    ) -> Walker<'a> {
        Walker {
            resource: root.clone(),
            walk_type,
            locks,
        }
    }

    /// The walker's resource. Between walks it is the root again.
    pub fn resource(&self) -> &DavResource {
        &self.resource
    }

    /// Walk the tree. The first error, from the store or from `func`, ends
    /// the walk and is returned as-is.
    pub fn walk(&mut self, depth: Depth, func: &mut WalkFn<'_>) -> DavResult<()> {
        self.visit(depth, func)
    }

    fn visit(&mut self, depth: Depth, func: &mut WalkFn<'_>) -> DavResult<()> {
        let calltype = if self.resource.collection {
            CallType::Collection
        } else {
            CallType::Member
        };
        trace!(
            "walker: {:?} {} <{}> depth {:?}",
            self.walk_type,
            self.resource.uri(),
            self.resource.store_path(),
            depth
        );
        func(&self.resource, calltype)?;

        if depth.is_zero() || !self.resource.is_collection() {
            return Ok(());
        }

        let saved_stat = self.resource.stat.clone();
        let res = self.visit_members(depth, func);
        self.resource.stat = saved_stat;
        self.resource.exists = true;
        self.resource.collection = true;
        res
    }

    fn visit_members(&mut self, depth: Depth, func: &mut WalkFn<'_>) -> DavResult<()> {
        let session = self.resource.session.clone();
        let path = self.resource.store_path().to_string();
        let mut cursor = session
            .open_collection(&path)
            .map_err(|e| DavError::remote("open collection", &path, e))?;

        let mut seen = HashSet::new();
        loop {
            let entry = match cursor.next_entry() {
                Ok(entry) => entry,
                Err(StoreError::NoMoreRows) => break,
                Err(e) => return Err(DavError::remote("read collection", &path, e)),
            };
            if !self.resource.store_path.fits(&entry.name) {
                error!("walking <{}>: member <{}> makes the path too long", path, entry.name);
                return Err(DavError::PathTooLong(format!("{}/{}", path, entry.name)));
            }
            let path_mark = self.resource.store_path.push(&entry.name)?;
            let uri_mark = self.resource.uri.push(&entry.name)?;

            self.resource.exists = true;
            self.resource.collection = entry.is_collection();
            self.resource.stat = Some(entry.to_stat());
            seen.insert(self.resource.store_path().to_string());

            let res = self.visit(depth.decrement(), func);
            self.resource.uri.restore(uri_mark);
            self.resource.store_path.restore(path_mark);
            res?;
        }

        if self.walk_type.contains(WalkType::LOCKNULL) {
            self.visit_locknull(&path, &seen, func)?;
        }
        Ok(())
    }

    fn visit_locknull(
        &mut self,
        path: &str,
        seen: &HashSet<String>,
        func: &mut WalkFn<'_>,
    ) -> DavResult<()> {
        let entries = match self.locks.map(|l| l.locked_entries(path)) {
            Some(Some(entries)) => entries,
            _ => {
                debug!("lock-null walk of <{}> requested, but locks cannot be enumerated", path);
                return Ok(());
            }
        };
        for entry in entries.iter().filter(|e| !seen.contains(*e)) {
            let name = basename(entry);
            if !self.resource.store_path.fits(name) {
                return Err(DavError::PathTooLong(entry.clone()));
            }
            let path_mark = self.resource.store_path.push(name)?;
            let uri_mark = self.resource.uri.push(name)?;
            self.resource.set_missing();

            let res = func(&self.resource, CallType::LockNull);
            self.resource.uri.restore(uri_mark);
            self.resource.store_path.restore(path_mark);
            res?;
        }
        Ok(())
    }
}
