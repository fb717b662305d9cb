//! PROPFIND.
//!
//! The multistatus body is written while the repository walks the tree, so
//! the whole walk runs on one blocking task.
use std::io::Write;

use headers::HeaderMapExt;
use http::{HeaderValue, Request, Response, StatusCode};
use xml::writer::{EmitterConfig, EventWriter, XmlEvent as XmlWEvent};
use xml::common::XmlVersion;

use crate::body::Body;
use crate::davpath::{encode_path, DavPath};
use crate::errors::DavError;
use crate::repo::path::basename;
use crate::repo::resource::{DavResource, ResourceKind};
use crate::repo::walker::{CallType, WalkType};
use crate::repo::DavRepository;
use crate::util::{systemtime_to_httpdate, systemtime_to_rfc3339, MemBuffer};
use crate::DavResult;

use super::{blocking, DepthHeader};

const NS_DAV: &str = "DAV:";

const LIVE_PROPS: &[&str] = &[
    "creationdate",
    "displayname",
    "getcontentlength",
    "getcontenttype",
    "getetag",
    "getlastmodified",
    "resourcetype",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PropName {
    ns: Option<String>,
    name: String,
}

impl PropName {
    fn dav(name: &str) -> PropName {
        PropName {
            ns: Some(NS_DAV.to_string()),
            name: name.to_string(),
        }
    }

    fn is_dav(&self) -> bool {
        self.ns.as_deref() == Some(NS_DAV)
    }
}

lazy_static! {
    static ref ALLPROP: Vec<PropName> = LIVE_PROPS.iter().map(|n| PropName::dav(n)).collect();
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PropRequest {
    AllProp,
    PropName,
    Prop(Vec<PropName>),
}

/// Parse a PROPFIND request body. An empty body means allprop.
pub(crate) fn parse_propfind(body: &[u8]) -> DavResult<PropRequest> {
    if body.iter().all(|b| b.is_ascii_whitespace()) {
        return Ok(PropRequest::AllProp);
    }
    let root = xmltree::Element::parse(body)?;
    if root.name != "propfind" || root.namespace.as_deref() != Some(NS_DAV) {
        return Err(DavError::XmlParseError);
    }
    for elem in root.children.iter().filter_map(|n| n.as_element()) {
        if elem.namespace.as_deref() != Some(NS_DAV) {
            continue;
        }
        match elem.name.as_str() {
            "allprop" => return Ok(PropRequest::AllProp),
            "propname" => return Ok(PropRequest::PropName),
            "prop" => {
                let props = elem
                    .children
                    .iter()
                    .filter_map(|n| n.as_element())
                    .map(|e| PropName {
                        ns: e.namespace.clone(),
                        name: e.name.clone(),
                    })
                    .collect();
                return Ok(PropRequest::Prop(props));
            }
            _ => {}
        }
    }
    Err(DavError::XmlParseError)
}

enum PropValue {
    Text(String),
    ResourceType(bool),
}

fn live_prop(
    repo: &dyn DavRepository,
    res: &DavResource,
    calltype: CallType,
    name: &str,
) -> Option<PropValue> {
    if calltype == CallType::LockNull {
        return match name {
            "displayname" => Some(PropValue::Text(basename(res.uri()).to_string())),
            "resourcetype" => Some(PropValue::ResourceType(false)),
            _ => None,
        };
    }
    let stat = res.stat()?;
    let coll = res.kind() == ResourceKind::Collection;
    let v = match name {
        "creationdate" => PropValue::Text(systemtime_to_rfc3339(stat.created())),
        "displayname" => PropValue::Text(basename(res.uri()).to_string()),
        "getcontentlength" if !coll => PropValue::Text(stat.size.to_string()),
        "getcontenttype" => PropValue::Text(if coll {
            "httpd/unix-directory".to_string()
        } else {
            mime_guess::from_path(basename(res.store_path()))
                .first_or_octet_stream()
                .to_string()
        }),
        "getetag" => PropValue::Text(repo.getetag(res)),
        "getlastmodified" => PropValue::Text(systemtime_to_httpdate(stat.modified())),
        "resourcetype" => PropValue::ResourceType(coll),
        _ => return None,
    };
    Some(v)
}

struct PropWriter<W: Write> {
    emitter: EventWriter<W>,
}

impl<W: Write> PropWriter<W> {
    fn new(out: W) -> DavResult<PropWriter<W>> {
        let mut emitter = EmitterConfig::new()
            .perform_indent(false)
            .create_writer(out);
        emitter.write(XmlWEvent::StartDocument {
            version: XmlVersion::Version10,
            encoding: Some("utf-8"),
            standalone: None,
        })?;
        emitter.write(XmlWEvent::start_element("D:multistatus").ns("D", NS_DAV))?;
        Ok(PropWriter { emitter })
    }

    fn text_elem(&mut self, name: &str, text: &str) -> DavResult<()> {
        self.emitter.write(XmlWEvent::start_element(name))?;
        if !text.is_empty() {
            self.emitter.write(XmlWEvent::characters(text))?;
        }
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn prop(&mut self, prop: &PropName, value: Option<&PropValue>) -> DavResult<()> {
        let qname;
        let start = match prop.ns.as_deref() {
            Some(NS_DAV) => {
                qname = format!("D:{}", prop.name);
                XmlWEvent::start_element(qname.as_str())
            }
            Some(ns) => {
                qname = format!("X:{}", prop.name);
                XmlWEvent::start_element(qname.as_str()).ns("X", ns)
            }
            None => XmlWEvent::start_element(prop.name.as_str()),
        };
        self.emitter.write(start)?;
        match value {
            Some(PropValue::Text(t)) if !t.is_empty() => {
                self.emitter.write(XmlWEvent::characters(t))?;
            }
            Some(PropValue::ResourceType(true)) => {
                self.emitter.write(XmlWEvent::start_element("D:collection"))?;
                self.emitter.write(XmlWEvent::end_element())?;
            }
            _ => {}
        }
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn propstat(&mut self, props: &[(&PropName, Option<PropValue>)], status: &str) -> DavResult<()> {
        if props.is_empty() {
            return Ok(());
        }
        self.emitter.write(XmlWEvent::start_element("D:propstat"))?;
        self.emitter.write(XmlWEvent::start_element("D:prop"))?;
        for (name, value) in props {
            self.prop(name, value.as_ref())?;
        }
        self.emitter.write(XmlWEvent::end_element())?;
        self.text_elem("D:status", status)?;
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn response(
        &mut self,
        repo: &dyn DavRepository,
        res: &DavResource,
        calltype: CallType,
        req: &PropRequest,
    ) -> DavResult<()> {
        let mut href = encode_path(res.uri());
        if res.is_collection() && !href.ends_with('/') {
            href.push('/');
        }
        self.emitter.write(XmlWEvent::start_element("D:response"))?;
        self.text_elem("D:href", &href)?;

        let mut found = Vec::new();
        let mut missing = Vec::new();
        match req {
            PropRequest::AllProp => {
                for p in ALLPROP.iter() {
                    if let Some(v) = live_prop(repo, res, calltype, &p.name) {
                        found.push((p, Some(v)));
                    }
                }
            }
            PropRequest::PropName => {
                for p in ALLPROP.iter() {
                    if live_prop(repo, res, calltype, &p.name).is_some() {
                        found.push((p, None));
                    }
                }
            }
            PropRequest::Prop(props) => {
                for p in props {
                    let v = if p.is_dav() {
                        live_prop(repo, res, calltype, &p.name)
                    } else {
                        None
                    };
                    match v {
                        Some(v) => found.push((p, Some(v))),
                        None => missing.push((p, None)),
                    }
                }
            }
        }
        self.propstat(&found, "HTTP/1.1 200 OK")?;
        self.propstat(&missing, "HTTP/1.1 404 Not Found")?;
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(())
    }

    fn finish(mut self) -> DavResult<W> {
        self.emitter.write(XmlWEvent::end_element())?;
        Ok(self.emitter.into_inner())
    }
}

impl crate::DavHandler {
    pub(crate) async fn handle_propfind(
        &self,
        req: &Request<()>,
        path: &DavPath,
        body: &[u8],
    ) -> DavResult<Response<Body>> {
        let depth = DepthHeader::get(req)?.unwrap_or(DepthHeader::Infinity);
        let propreq = parse_propfind(body)?;
        debug!("PROPFIND {} depth {:?} {:?}", path, depth, propreq);

        let res = self.resource(path).await?;
        if !res.exists() {
            return Err(DavError::NotFound);
        }

        let walk_type = if self.has_locks {
            WalkType::NORMAL | WalkType::LOCKNULL
        } else {
            WalkType::NORMAL
        };
        let repo = self.repo.clone();
        let body = blocking(move || {
            let mut pw = PropWriter::new(MemBuffer::new())?;
            repo.walk(&res, depth.depth(), walk_type, &mut |r, ct| {
                pw.response(&*repo, r, ct, &propreq)
            })?;
            Ok(pw.finish()?.take())
        })
        .await?;

        let mut resp = Response::new(Body::from(body));
        *resp.status_mut() = StatusCode::MULTI_STATUS;
        let h = resp.headers_mut();
        h.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/xml; charset=utf-8"),
        );
        h.typed_insert(headers::CacheControl::new().with_no_cache());
        Ok(resp)
    }
}
