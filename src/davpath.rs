//! Utility module to handle the path part of an URL as a WebDAV path.
//!
//! A `DavPath` holds the decoded, normalized request path, including the
//! prefix (mount location) that the handler strips off before the rest is
//! translated to a store path.
use std::fmt;

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};

use crate::errors::DavError;
use crate::DavResult;

/// Characters that get percent-encoded in a path segment.
pub const PATH_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'[')
    .add(b'\\')
    .add(b']')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// A normalized request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DavPath {
    fullpath: String,
    pfxlen: usize,
}

impl fmt::Display for DavPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fullpath)
    }
}

// encode a decoded path, keeping the slashes.
pub(crate) fn encode_path(path: &str) -> String {
    path.split('/')
        .map(|seg| utf8_percent_encode(seg, PATH_ENCODE_SET).to_string())
        .collect::<Vec<_>>()
        .join("/")
}

// decode and normalize. "." is dropped, ".." removes the previous segment,
// going above the root is an error.
fn normalize(raw: &str) -> DavResult<String> {
    if !raw.starts_with('/') {
        return Err(DavError::InvalidPath);
    }
    let decoded = percent_decode_str(raw)
        .decode_utf8()
        .map_err(|_| DavError::InvalidPath)?;
    if decoded.contains('\0') {
        return Err(DavError::InvalidPath);
    }
    let is_coll = decoded.ends_with('/') || decoded.ends_with("/.") || decoded.ends_with("/..");

    let mut segs: Vec<&str> = Vec::new();
    for seg in decoded.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segs.pop().is_none() {
                    return Err(DavError::InvalidPath);
                }
            }
            s => segs.push(s),
        }
    }
    let mut path = String::with_capacity(decoded.len());
    for s in &segs {
        path.push('/');
        path.push_str(s);
    }
    if path.is_empty() || is_coll {
        path.push('/');
    }
    Ok(path)
}

impl DavPath {
    /// From the path part of a request URI. The path must be below `prefix`.
    pub fn from_uri_and_prefix(uri: &http::uri::Uri, prefix: &str) -> DavResult<DavPath> {
        let path = uri.path();
        if path == "*" {
            return Ok(DavPath {
                fullpath: "*".to_string(),
                pfxlen: 0,
            });
        }
        DavPath::from_str_and_prefix(path, prefix)
    }

    /// From a raw (encoded) absolute path.
    pub fn from_str_and_prefix(path: &str, prefix: &str) -> DavResult<DavPath> {
        let fullpath = normalize(path)?;
        let prefix = prefix.trim_end_matches('/');
        match fullpath.strip_prefix(prefix) {
            Some(rest) if rest.is_empty() || rest.starts_with('/') => Ok(DavPath {
                pfxlen: prefix.len(),
                fullpath,
            }),
            _ => {
                debug!("path <{}> is not below prefix <{}>", fullpath, prefix);
                Err(DavError::NotFound)
            }
        }
    }

    /// From a `Destination` header value, either an absolute URL or an
    /// absolute path.
    ///
    /// An absolute URL must point at `host`, or we cannot handle it.
    pub fn from_destination(dest: &str, host: Option<&str>, prefix: &str) -> DavResult<DavPath> {
        let uri: http::uri::Uri = dest.parse().map_err(|_| DavError::InvalidPath)?;
        if let Some(authority) = uri.authority() {
            match host {
                Some(h) if h.eq_ignore_ascii_case(authority.as_str()) => {}
                _ => {
                    debug!("destination <{}> is on another server", dest);
                    return Err(DavError::Status(http::StatusCode::BAD_GATEWAY));
                }
            }
        }
        DavPath::from_str_and_prefix(uri.path(), prefix)
    }

    /// The `*` of `OPTIONS *`.
    pub fn is_star(&self) -> bool {
        self.fullpath == "*"
    }

    /// Full decoded path, prefix included.
    pub fn as_str(&self) -> &str {
        &self.fullpath
    }

    /// The prefix part, without trailing slash.
    pub fn prefix(&self) -> &str {
        &self.fullpath[..self.pfxlen]
    }

    /// Decoded path below the prefix. Never empty.
    pub fn path(&self) -> &str {
        let p = &self.fullpath[self.pfxlen..];
        if p.is_empty() {
            "/"
        } else {
            p
        }
    }

    /// Does the path end in a slash.
    pub fn is_collection(&self) -> bool {
        self.fullpath.ends_with('/')
    }

    pub fn add_slash(&mut self) {
        if !self.is_collection() {
            self.fullpath.push('/');
        }
    }

    pub fn file_name(&self) -> &str {
        crate::repo::path::basename(&self.fullpath)
    }

    /// The parent collection, with a trailing slash. The root is its own
    /// parent.
    pub fn parent(&self) -> DavPath {
        let fullpath = crate::repo::path::parent_uri(&self.fullpath)
            .filter(|p| p.len() > self.pfxlen)
            .unwrap_or_else(|| format!("{}/", self.prefix()));
        DavPath {
            fullpath,
            pfxlen: self.pfxlen,
        }
    }

    /// Encoded path below the prefix.
    pub fn as_url_string(&self) -> String {
        encode_path(self.path())
    }

    /// Encoded path including the prefix, for use in hrefs and headers.
    pub fn as_url_string_with_prefix(&self) -> String {
        encode_path(&self.fullpath)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uri(s: &str) -> http::uri::Uri {
        s.parse().unwrap()
    }

    #[test]
    fn test_from_uri() {
        let p = DavPath::from_uri_and_prefix(&uri("/dav/a%20b/c"), "/dav").unwrap();
        assert_eq!(p.as_str(), "/dav/a b/c");
        assert_eq!(p.prefix(), "/dav");
        assert_eq!(p.path(), "/a b/c");
        assert!(!p.is_collection());
        assert_eq!(p.as_url_string(), "/a%20b/c");
        assert_eq!(p.as_url_string_with_prefix(), "/dav/a%20b/c");

        let p = DavPath::from_uri_and_prefix(&uri("/dav"), "/dav/").unwrap();
        assert_eq!(p.path(), "/");

        let p = DavPath::from_uri_and_prefix(&uri("/x//./y/../z/"), "").unwrap();
        assert_eq!(p.as_str(), "/x/z/");
        assert!(p.is_collection());
    }

    #[test]
    fn test_invalid() {
        assert!(matches!(
            DavPath::from_uri_and_prefix(&uri("/a/../../b"), ""),
            Err(DavError::InvalidPath)
        ));
        assert!(matches!(
            DavPath::from_uri_and_prefix(&uri("/a%00b"), ""),
            Err(DavError::InvalidPath)
        ));
        assert!(matches!(
            DavPath::from_uri_and_prefix(&uri("/a%ff"), ""),
            Err(DavError::InvalidPath)
        ));
        assert!(matches!(
            DavPath::from_uri_and_prefix(&uri("/davx/a"), "/dav"),
            Err(DavError::NotFound)
        ));
    }

    #[test]
    fn test_star() {
        let p = DavPath::from_uri_and_prefix(&uri("*"), "/dav").unwrap();
        assert!(p.is_star());
    }

    #[test]
    fn test_parent() {
        let p = DavPath::from_str_and_prefix("/dav/a/b", "/dav").unwrap();
        assert_eq!(p.parent().as_str(), "/dav/a/");
        assert_eq!(p.parent().parent().as_str(), "/dav/");
        assert_eq!(p.parent().parent().parent().as_str(), "/dav/");
        assert_eq!(p.file_name(), "b");
    }

    #[test]
    fn test_destination() {
        let p = DavPath::from_destination("http://h:8080/dav/x", Some("h:8080"), "/dav").unwrap();
        assert_eq!(p.path(), "/x");
        let p = DavPath::from_destination("/dav/y", None, "/dav").unwrap();
        assert_eq!(p.path(), "/y");
        assert!(matches!(
            DavPath::from_destination("http://other/dav/x", Some("h:8080"), "/dav"),
            Err(DavError::Status(http::StatusCode::BAD_GATEWAY))
        ));
    }
}
