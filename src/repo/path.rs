//! Request URI to store path translation.
use crate::errors::DavError;
use crate::store::{StoreEnv, MAX_NAME_LEN};
use crate::DavResult;

/// The part of the store namespace exposed as the root of the mount.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExposedRoot {
    /// A fixed store path.
    Custom(String),
    /// `/<zone>`
    Zone,
    /// `/<zone>/home`
    Home,
    /// `/<zone>/home/<user>`, the home collection of the session user.
    #[default]
    User,
}

impl ExposedRoot {
    /// Resolve to a store path for the session's zone and user.
    pub fn resolve(&self, env: &StoreEnv) -> String {
        match self {
            ExposedRoot::Custom(path) => path.clone(),
            ExposedRoot::Zone => format!("/{}", env.zone),
            ExposedRoot::Home => format!("/{}/home", env.zone),
            ExposedRoot::User => format!("/{}/home/{}", env.zone, env.user),
        }
    }
}

/// The part of `uri` below the mount location `root_dir`.
pub fn relative_uri<'a>(uri: &'a str, root_dir: &str) -> DavResult<&'a str> {
    let root_dir = root_dir.trim_end_matches('/');
    match uri.strip_prefix(root_dir) {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => Ok(rest),
        _ => Err(DavError::Internal(format!(
            "request uri <{uri}> is not below the mount location <{root_dir}>"
        ))),
    }
}

/// Map a request URI onto the store namespace.
///
/// The result is not canonical yet; the store's own path parser takes care of
/// `.`, `..` and duplicate slashes.
pub fn translate(uri: &str, root_dir: &str, exposed_root: &str) -> DavResult<String> {
    let rel = relative_uri(uri, root_dir)?;
    let exposed_root = if rel.starts_with('/') {
        exposed_root.trim_end_matches('/')
    } else {
        exposed_root
    };
    let path = format!("{exposed_root}{rel}");
    if path.len() >= MAX_NAME_LEN {
        return Err(DavError::PathTooLong(format!(
            "store path for <{uri}> is {} bytes",
            path.len()
        )));
    }
    debug!("uri <{}> maps to store path <{}>", uri, path);
    Ok(path)
}

/// Parent URI of `uri`, keeping the trailing slash. `None` for `/`.
///
/// `/dav/a/b` and `/dav/a/b/` both have parent `/dav/a/`.
pub fn parent_uri(uri: &str) -> Option<String> {
    if uri == "/" || uri.is_empty() {
        return None;
    }
    let trimmed = &uri[..uri.len() - 1];
    let end = trimmed.rfind('/').map(|i| i + 1).unwrap_or(0);
    Some(uri[..end].to_string())
}

/// Parent of a store path. The parent of `/x` is `/`.
pub fn parent_path(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

/// Last segment of a path, ignoring a trailing slash.
pub fn basename(path: &str) -> &str {
    let path = path.strip_suffix('/').unwrap_or(path);
    match path.rfind('/') {
        Some(i) => &path[i + 1..],
        None => path,
    }
}

/// Join a name onto a directory path.
pub fn join(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{dir}{name}")
    } else {
        format!("{dir}/{name}")
    }
}

/// Growable path with save/restore in stack order.
///
/// `push` appends a segment and returns a mark; `restore` truncates back to
/// it. Marks must be restored innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathBuffer {
    buf: String,
    limit: usize,
}

impl PathBuffer {
    pub fn new(initial: impl Into<String>, limit: usize) -> PathBuffer {
        PathBuffer {
            buf: initial.into(),
            limit,
        }
    }

    /// A buffer bounded by the store's path length limit.
    pub fn store_path(initial: impl Into<String>) -> PathBuffer {
        PathBuffer::new(initial, MAX_NAME_LEN)
    }

    pub fn as_str(&self) -> &str {
        &self.buf
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Would pushing `name` stay below the limit.
    pub fn fits(&self, name: &str) -> bool {
        self.buf.len() + 1 + name.len() < self.limit
    }

    /// Append `/name` (or just `name` at the root).
    pub fn push(&mut self, name: &str) -> DavResult<usize> {
        if !self.fits(name) {
            return Err(DavError::PathTooLong(format!("{}/{}", self.buf, name)));
        }
        let mark = self.buf.len();
        if !self.buf.ends_with('/') {
            self.buf.push('/');
        }
        self.buf.push_str(name);
        Ok(mark)
    }

    pub fn restore(&mut self, mark: usize) {
        self.buf.truncate(mark);
    }

    pub(crate) fn set(&mut self, path: &str) {
        self.buf.clear();
        self.buf.push_str(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env() -> StoreEnv {
        StoreEnv {
            zone: "tempZone".into(),
            user: "alice".into(),
        }
    }

    #[test]
    fn test_exposed_root() {
        let env = env();
        assert_eq!(ExposedRoot::Zone.resolve(&env), "/tempZone");
        assert_eq!(ExposedRoot::Home.resolve(&env), "/tempZone/home");
        assert_eq!(ExposedRoot::User.resolve(&env), "/tempZone/home/alice");
        assert_eq!(ExposedRoot::Custom("/x/y".into()).resolve(&env), "/x/y");
    }

    #[test]
    fn test_translate() {
        let root = "/tempZone/home/alice";
        assert_eq!(
            translate("/dav/a/b.txt", "/dav", root).unwrap(),
            "/tempZone/home/alice/a/b.txt"
        );
        assert_eq!(translate("/dav/", "/dav/", root).unwrap(), format!("{root}/"));
        assert_eq!(translate("/dav", "/dav", root).unwrap(), root);
        assert_eq!(translate("/a", "", root).unwrap(), "/tempZone/home/alice/a");
        assert!(matches!(
            translate("/other/a", "/dav", root),
            Err(DavError::Internal(_))
        ));
        // a prefix match must end on a segment boundary.
        assert!(translate("/davx/a", "/dav", root).is_err());
    }

    #[test]
    fn test_translate_strips_prefix_once() {
        let root = "/tempZone/home/alice";
        assert_eq!(
            translate("/dav/dav/x", "/dav", root).unwrap(),
            "/tempZone/home/alice/dav/x"
        );
        // with an empty mount and exposed root, translation is a fixpoint.
        let once = translate("/tempZone/home/alice/x", "", "").unwrap();
        let twice = translate(&once, "", "").unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_translate_too_long() {
        let root = format!("/{}", "r".repeat(899));
        let uri = format!("/{}", "u".repeat(199));
        assert!(matches!(
            translate(&uri, "", &root),
            Err(DavError::PathTooLong(_))
        ));
        let uri = format!("/{}", "u".repeat(MAX_NAME_LEN - root.len() - 2));
        assert_eq!(translate(&uri, "", &root).unwrap().len(), MAX_NAME_LEN - 1);
        let uri = format!("/{}", "u".repeat(MAX_NAME_LEN - root.len() - 1));
        assert!(matches!(
            translate(&uri, "", &root),
            Err(DavError::PathTooLong(_))
        ));
    }

    #[test]
    fn test_parent_uri() {
        assert_eq!(parent_uri("/"), None);
        assert_eq!(parent_uri("/a").as_deref(), Some("/"));
        assert_eq!(parent_uri("/dav/a/b").as_deref(), Some("/dav/a/"));
        assert_eq!(parent_uri("/dav/a/b/").as_deref(), Some("/dav/a/"));
    }

    #[test]
    fn test_basename_parent() {
        assert_eq!(basename("/a/b/c"), "c");
        assert_eq!(basename("/a/b/"), "b");
        assert_eq!(parent_path("/a/b"), "/a");
        assert_eq!(parent_path("/a"), "/");
        assert_eq!(join("/", "a"), "/a");
        assert_eq!(join("/a", "b"), "/a/b");
    }

    #[test]
    fn test_path_buffer() {
        let mut p = PathBuffer::new("/", 16);
        let m1 = p.push("a").unwrap();
        assert_eq!(p.as_str(), "/a");
        let m2 = p.push("bcd").unwrap();
        assert_eq!(p.as_str(), "/a/bcd");
        assert!(p.push("0123456789").is_err());
        assert_eq!(p.as_str(), "/a/bcd");
        p.restore(m2);
        p.restore(m1);
        assert_eq!(p.as_str(), "/");
    }
}
