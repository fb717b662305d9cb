//! HTML listings for GET on a collection.
use std::time::SystemTime;

use bytes::Bytes;
use percent_encoding::utf8_percent_encode;

use crate::davpath::PATH_ENCODE_SET;
use crate::repo::resource::DavResource;
use crate::util::systemtime_to_listing_date;
use crate::DavResult;

/// One member of a listed collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListingEntry {
    pub name: String,
    pub is_collection: bool,
    pub size: u64,
    pub owner: String,
    pub modified: SystemTime,
}

/// Produces the response body for GET on a collection.
///
/// The built-in [`BasicListing`] is used unless a themed renderer is
/// configured on the handler.
pub trait ListingRenderer: Send + Sync {
    fn render(&self, resource: &DavResource, entries: &[ListingEntry]) -> DavResult<Bytes>;
}

/// Plain HTML table.
#[derive(Debug, Default, Clone, Copy)]
pub struct BasicListing;

// Four characters at most, the way `ls -h` would print it.
fn human_size(size: u64) -> String {
    if size < 973 {
        return size.to_string();
    }
    let mut size = size as f64;
    for unit in ['K', 'M', 'G', 'T', 'P', 'E'] {
        size /= 1024.0;
        if size < 9.95 {
            return format!("{:.1}{}", size, unit);
        }
        if size < 973.0 {
            return format!("{:.0}{}", size, unit);
        }
    }
    format!("{:.0}E", size)
}

impl ListingRenderer for BasicListing {
    fn render(&self, resource: &DavResource, entries: &[ListingEntry]) -> DavResult<Bytes> {
        let rel = htmlescape::encode_minimal(resource.relative_uri());
        let zone = htmlescape::encode_minimal(&resource.session().env().zone);

        let mut w = String::new();
        w.push_str(&format!(
            "<!DOCTYPE html>\n<html>\n<head><title>Index of {rel} on {zone}</title></head>\n"
        ));
        w.push_str("<body>\n\n");
        w.push_str("<!-- Warning: Do not parse this directory listing programmatically,\n");
        w.push_str("              the format may change without notice!\n");
        w.push_str("              If you want to script access to these WebDAV collections,\n");
        w.push_str("              please use the PROPFIND method instead. -->\n\n");
        w.push_str(&format!("<h1>Index of {rel} on {zone}</h1>\n"));
        if resource.relative_uri() != "/" && !resource.relative_uri().is_empty() {
            w.push_str("<p><a href=\"..\">↖ Parent collection</a></p>\n");
        }
        w.push_str("<table>\n<thead>\n");
        w.push_str("  <tr><th>Name</th><th>Size</th><th>Owner</th><th>Last modified</th></tr>\n");
        w.push_str("</thead>\n<tbody>\n");

        for e in entries {
            let href = utf8_percent_encode(&e.name, PATH_ENCODE_SET).to_string();
            let href = htmlescape::encode_minimal(&href);
            let name = htmlescape::encode_minimal(&e.name);
            let slash = if e.is_collection { "/" } else { "" };
            let size = if e.is_collection {
                String::new()
            } else {
                human_size(e.size)
            };
            w.push_str(&format!(
                "  <tr><td><a href=\"{href}{slash}\">{name}{slash}</a></td><td>{size}</td><td>{}</td><td>{}</td></tr>\n",
                htmlescape::encode_minimal(&e.owner),
                systemtime_to_listing_date(e.modified),
            ));
        }

        w.push_str("</tbody>\n</table>\n</body>\n</html>\n");
        Ok(Bytes::from(w))
    }
}
