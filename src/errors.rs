use std::error::Error;
use std::fmt;
use std::io;

use http::StatusCode;

use crate::store::StoreError;

#[derive(Debug)]
pub enum DavError {
    /// Target does not exist.
    NotFound,
    /// Precondition failed: missing parent, undeliverable resource type.
    Conflict(String),
    /// A translated or generated store path reached the store's length limit.
    PathTooLong(String),
    /// The store refused an operation.
    Remote {
        op: &'static str,
        path: String,
        source: StoreError,
    },
    /// Rename onto a directory that was left behind in the storage backend.
    StaleDirectory(String),
    /// Broken internal assumption.
    Internal(String),
    XmlReadError,
    XmlParseError,
    InvalidPath,
    UnknownDavMethod,
    Status(StatusCode),
    StatusClose(StatusCode),
    IoError(io::Error),
    XmlReaderError(xml::reader::Error),
    XmlWriterError(xml::writer::Error),
}

impl Error for DavError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DavError::Remote { source, .. } => Some(source),
            DavError::IoError(e) => Some(e),
            DavError::XmlReaderError(e) => Some(e),
            DavError::XmlWriterError(e) => Some(e),
            _ => None,
        }
    }
}

impl fmt::Display for DavError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DavError::NotFound => write!(f, "not found"),
            DavError::Conflict(msg) => write!(f, "conflict: {msg}"),
            DavError::PathTooLong(msg) => write!(f, "path name too long: {msg}"),
            DavError::Remote { op, path, source } => write!(f, "{op} failed for <{path}>: {source}"),
            DavError::StaleDirectory(msg) => write!(f, "{msg}"),
            DavError::Internal(msg) => write!(f, "internal error: {msg}"),
            DavError::XmlReadError => write!(f, "XML parse error"),
            DavError::XmlParseError => write!(f, "XML parse error"),
            DavError::InvalidPath => write!(f, "invalid path"),
            DavError::UnknownDavMethod => write!(f, "unknown HTTP method"),
            DavError::Status(_) => write!(f, "error"),
            DavError::StatusClose(_) => write!(f, "error"),
            DavError::IoError(_) => write!(f, "I/O error"),
            DavError::XmlReaderError(_) => write!(f, "XML parse error"),
            DavError::XmlWriterError(_) => write!(f, "XML generate error"),
        }
    }
}

impl From<io::Error> for DavError {
    fn from(e: io::Error) -> Self {
        DavError::IoError(e)
    }
}

impl From<StatusCode> for DavError {
    fn from(e: StatusCode) -> Self {
        DavError::Status(e)
    }
}

impl From<xml::reader::Error> for DavError {
    fn from(e: xml::reader::Error) -> Self {
        DavError::XmlReaderError(e)
    }
}

impl From<xml::writer::Error> for DavError {
    fn from(e: xml::writer::Error) -> Self {
        DavError::XmlWriterError(e)
    }
}

impl From<xmltree::ParseError> for DavError {
    fn from(_e: xmltree::ParseError) -> Self {
        DavError::XmlParseError
    }
}

impl DavError {
    /// Log a failed store call and wrap it.
    ///
    /// A stale directory rename keeps its own variant, it is the one store
    /// failure operators can act on.
    pub(crate) fn remote(op: &'static str, path: &str, source: StoreError) -> DavError {
        error!("{} failed for <{}>: {}", op, path, source);
        if let StoreError::StaleDirectory { errno } = source {
            return DavError::StaleDirectory(format!(
                "Could not move a data object onto <{path}>: the storage backend still \
                 holds a directory by that name (errno {errno}). \
                 A leftover from an earlier collection removal must be cleaned up \
                 on the storage side first."
            ));
        }
        DavError::Remote {
            op,
            path: path.to_string(),
            source,
        }
    }

    pub(crate) fn statuscode(&self) -> StatusCode {
        match self {
            DavError::NotFound => StatusCode::NOT_FOUND,
            DavError::Conflict(_) => StatusCode::CONFLICT,
            DavError::StaleDirectory(_) => StatusCode::CONFLICT,
            DavError::PathTooLong(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Remote { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::XmlReadError => StatusCode::BAD_REQUEST,
            DavError::XmlParseError => StatusCode::BAD_REQUEST,
            DavError::InvalidPath => StatusCode::BAD_REQUEST,
            DavError::UnknownDavMethod => StatusCode::NOT_IMPLEMENTED,
            DavError::Status(e) => *e,
            DavError::StatusClose(e) => *e,
            DavError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            DavError::XmlReaderError(_) => StatusCode::BAD_REQUEST,
            DavError::XmlWriterError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub(crate) fn must_close(&self) -> bool {
        !matches!(
            self,
            &DavError::Status(_)
                | &DavError::NotFound
                | &DavError::Conflict(_)
                | &DavError::StaleDirectory(_)
        )
    }

    /// Text sent to the client along with the status.
    ///
    /// Only failure modes an operator can act on are described; everything
    /// else goes out with an empty body.
    pub(crate) fn client_text(&self) -> Option<String> {
        match self {
            DavError::StaleDirectory(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

pub type DavResult<T> = Result<T, DavError>;
