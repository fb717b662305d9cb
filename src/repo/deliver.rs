//! GET: response headers and body delivery.
use bytes::Bytes;
use headers::{ContentLength, ContentType, ETag, HeaderMapExt, LastModified};
use http::{HeaderMap, HeaderValue};

use crate::errors::DavError;
use crate::listing::{ListingEntry, ListingRenderer};
use crate::repo::path::basename;
use crate::repo::resource::{DavResource, ResourceKind};
use crate::store::{OpenFlags, StoreError};
use crate::DavResult;

/// Receives the body of a GET, chunk by chunk.
///
/// An error from `send` (the client went away) ends the delivery.
pub trait DeliverSink {
    fn send(&mut self, chunk: Bytes) -> DavResult<()>;
}

impl DeliverSink for Vec<u8> {
    fn send(&mut self, chunk: Bytes) -> DavResult<()> {
        self.extend_from_slice(&chunk);
        Ok(())
    }
}

/// Entity tag: quoted modify time for collections, quoted hex size and
/// modify time for data objects, empty when the resource does not exist.
pub fn etag(resource: &DavResource) -> String {
    match (resource.kind(), resource.stat()) {
        (ResourceKind::Collection, Some(st)) => format!("\"{}\"", st.modify_time),
        (ResourceKind::DataObject, Some(st)) => format!("\"{:x}-{}\"", st.size, st.modify_time),
        _ => String::new(),
    }
}

/// Headers for a GET/HEAD response.
pub fn response_headers(resource: &DavResource) -> HeaderMap {
    let mut h = HeaderMap::new();
    match (resource.kind(), resource.stat()) {
        (ResourceKind::Collection, _) => {
            h.typed_insert(ContentType::html());
            h.insert(
                http::header::CACHE_CONTROL,
                HeaderValue::from_static("no-cache, must-revalidate"),
            );
        }
        (ResourceKind::DataObject, Some(st)) => {
            h.typed_insert(LastModified::from(st.modified()));
            if let Ok(tag) = etag(resource).parse::<ETag>() {
                h.typed_insert(tag);
            }
            h.typed_insert(ContentLength(st.size));
            let mime = mime_guess::from_path(basename(resource.store_path())).first_or_octet_stream();
            h.typed_insert(ContentType::from(mime));
        }
        _ => {}
    }
    h
}

pub(crate) fn deliver(
    resource: &DavResource,
    renderer: &dyn ListingRenderer,
    sink: &mut dyn DeliverSink,
) -> DavResult<()> {
    match resource.kind() {
        ResourceKind::DataObject => deliver_file(resource, sink),
        ResourceKind::Collection => deliver_collection(resource, renderer, sink),
        ResourceKind::Missing => Err(DavError::Conflict(format!(
            "cannot deliver <{}>: not a data object or collection",
            resource.uri()
        ))),
    }
}

fn deliver_file(resource: &DavResource, sink: &mut dyn DeliverSink) -> DavResult<()> {
    let session = resource.session();
    let path = resource.store_path();
    let chunk_size = resource.config.rx_buffer_size.max(1);

    let fd = session
        .open(path, OpenFlags::READ, None)
        .map_err(|e| DavError::remote("open", path, e))?;

    let mut res = Ok(());
    loop {
        let chunk = match session.read(fd, chunk_size) {
            Ok(chunk) => chunk,
            Err(e) => {
                res = Err(DavError::remote("read", path, e));
                break;
            }
        };
        let last = chunk.len() < chunk_size;
        if !chunk.is_empty() {
            if let Err(e) = sink.send(chunk) {
                debug!("delivery of <{}> aborted: {}", path, e);
                res = Err(e);
                break;
            }
        }
        if last {
            break;
        }
    }

    // the client has everything it is going to get, a close error changes nothing.
    if let Err(e) = session.close(fd) {
        warn!("close of <{}> after delivery failed: {}", path, e);
    }
    res
}

/// Members of a collection, in listing order.
pub(crate) fn list_collection(resource: &DavResource) -> DavResult<Vec<ListingEntry>> {
    let path = resource.store_path();
    let mut cursor = resource
        .session()
        .open_collection(path)
        .map_err(|e| DavError::remote("open collection", path, e))?;
    let mut entries = Vec::new();
    loop {
        match cursor.next_entry() {
            Ok(e) => entries.push(ListingEntry {
                is_collection: e.is_collection(),
                modified: e.modified(),
                name: e.name,
                size: e.size,
                owner: e.owner,
            }),
            Err(StoreError::NoMoreRows) => break,
            Err(e) => return Err(DavError::remote("read collection", path, e)),
        }
    }
    Ok(entries)
}

fn deliver_collection(
    resource: &DavResource,
    renderer: &dyn ListingRenderer,
    sink: &mut dyn DeliverSink,
) -> DavResult<()> {
    let entries = list_collection(resource)?;
    let body = renderer.render(resource, &entries)?;
    sink.send(body)
}

#[cfg(all(test, feature = "memstore"))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::listing::BasicListing;
    use crate::repo::resource::RequestInfo;
    use crate::repo::ProviderConfig;
    use crate::store::memstore::{MemStore, StoreOp};
    use crate::store::status::SYS_HEADER_READ_LEN_ERR;

    fn resource(store: &Arc<MemStore>, rel: &str, config: ProviderConfig) -> DavResource {
        let uri = format!("/dav{rel}");
        let path = format!("/z/home/u{rel}");
        let mut res = DavResource::new(
            store.clone(),
            Arc::new(config),
            Arc::new(RequestInfo::new(uri.clone(), "/dav")),
            Arc::from("/z/home/u"),
            &uri,
            path.trim_end_matches('/'),
        );
        res.fetch_info().unwrap();
        res
    }

    struct Chunks(Vec<Bytes>);
    impl DeliverSink for Chunks {
        fn send(&mut self, chunk: Bytes) -> DavResult<()> {
            self.0.push(chunk);
            Ok(())
        }
    }

    struct Gone;
    impl DeliverSink for Gone {
        fn send(&mut self, _chunk: Bytes) -> DavResult<()> {
            Err(DavError::IoError(std::io::ErrorKind::BrokenPipe.into()))
        }
    }

    #[test]
    fn test_etag() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"0123456789abcdef0");
        let a = resource(&store, "/f", ProviderConfig::default());
        let b = resource(&store, "/f", ProviderConfig::default());
        let mtime = a.stat().unwrap().modify_time;
        assert_eq!(etag(&a), format!("\"11-{mtime}\""));
        assert_eq!(etag(&a), etag(&b));

        store.put_object("/z/home/u/f", b"changed");
        let c = resource(&store, "/f", ProviderConfig::default());
        assert_ne!(etag(&a), etag(&c));

        let dir = resource(&store, "/", ProviderConfig::default());
        assert_eq!(etag(&dir), format!("\"{}\"", dir.stat().unwrap().modify_time));
        let missing = resource(&store, "/nope", ProviderConfig::default());
        assert_eq!(etag(&missing), "");
    }

    #[test]
    fn test_response_headers() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f.txt", b"hello");
        let res = resource(&store, "/f.txt", ProviderConfig::default());
        let h = response_headers(&res);
        assert_eq!(h.get("content-length").unwrap(), "5");
        assert_eq!(h.get("content-type").unwrap(), "text/plain");
        assert!(h.get("etag").is_some());
        assert!(h.get("last-modified").is_some());

        let dir = resource(&store, "/", ProviderConfig::default());
        let h = response_headers(&dir);
        assert!(h.get("content-type").unwrap().to_str().unwrap().starts_with("text/html"));
        assert_eq!(h.get("cache-control").unwrap(), "no-cache, must-revalidate");
    }

    #[test]
    fn test_deliver_file_in_chunks() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", &[5u8; 10]);
        let config = ProviderConfig {
            rx_buffer_size: 4,
            ..ProviderConfig::default()
        };
        let res = resource(&store, "/f", config);
        let mut sink = Chunks(Vec::new());
        deliver(&res, &BasicListing, &mut sink).unwrap();
        let sizes: Vec<usize> = sink.0.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, [4, 4, 2]);
        assert_eq!(store.open_descriptors(), 0);
    }

    #[test]
    fn test_deliver_aborts_when_client_gone() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", &[5u8; 10]);
        let config = ProviderConfig {
            rx_buffer_size: 4,
            ..ProviderConfig::default()
        };
        let res = resource(&store, "/f", config);
        store.reset_calls();
        assert!(deliver(&res, &BasicListing, &mut Gone).is_err());
        assert_eq!(store.calls().read, 1);
        assert_eq!(store.open_descriptors(), 0);
    }

    #[test]
    fn test_deliver_read_error() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/f", b"abc");
        let res = resource(&store, "/f", ProviderConfig::default());
        store.fail_next(StoreOp::Read, SYS_HEADER_READ_LEN_ERR);
        let mut out = Vec::new();
        assert!(matches!(
            deliver(&res, &BasicListing, &mut out),
            Err(DavError::Remote { op: "read", .. })
        ));
    }

    #[test]
    fn test_deliver_collection() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.put_object("/z/home/u/sub/a b.txt", b"abc");
        store.mkdir_all("/z/home/u/sub/inner");
        let res = resource(&store, "/sub/", ProviderConfig::default());
        let mut out = Vec::new();
        deliver(&res, &BasicListing, &mut out).unwrap();
        let html = String::from_utf8(out).unwrap();
        assert!(html.contains("Index of /sub/ on z"));
        assert!(html.contains("<a href=\"a%20b.txt\">a b.txt</a>"));
        assert!(html.contains("<a href=\"inner/\">inner/</a>"));
        assert!(html.contains("Parent collection"));

        let root = resource(&store, "/", ProviderConfig::default());
        let mut out = Vec::new();
        deliver(&root, &BasicListing, &mut out).unwrap();
        assert!(!String::from_utf8(out).unwrap().contains("Parent collection"));
    }

    #[test]
    fn test_deliver_missing_is_conflict() {
        let store = Arc::new(MemStore::new("z", "u"));
        store.add_special("/z/home/u/odd");
        let res = resource(&store, "/odd", ProviderConfig::default());
        let mut out = Vec::new();
        assert!(matches!(
            deliver(&res, &BasicListing, &mut out),
            Err(DavError::Conflict(_))
        ));
    }
}
