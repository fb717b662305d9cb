//! Store status codes.
//!
//! The store reports failures as negative integers. Codes are multiples of
//! 1000; codes raised by a storage driver embed the OS errno in the low
//! digits (`UNIX_FILE_RENAME_ERR - EISDIR` for instance). This is the only
//! place where the numbers are interpreted.
use super::StoreError;

pub const SYS_HEADER_READ_LEN_ERR: i32 = -4000;
pub const SYS_HEADER_WRITE_LEN_ERR: i32 = -14000;
pub const USER_FILE_DOES_NOT_EXIST: i32 = -310000;
pub const OVERWRITE_WITHOUT_FORCE_FLAG: i32 = -312000;
pub const BAD_INPUT_DESC_INDEX: i32 = -326000;
pub const UNIX_FILE_RENAME_ERR: i32 = -528000;
pub const CAT_NO_ROWS_FOUND: i32 = -808000;
pub const CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME: i32 = -809000;
pub const CAT_NAME_EXISTS_AS_DATAOBJ: i32 = -812000;
pub const CAT_UNKNOWN_COLLECTION: i32 = -814000;
pub const CAT_NOT_A_COLLECTION: i32 = -815000;
pub const CAT_UNKNOWN_FILE: i32 = -817000;
pub const CAT_COLLECTION_NOT_EMPTY: i32 = -821000;

pub const EISDIR: i32 = 21;

/// Split a status into its base code and embedded errno.
pub fn split_status(status: i32) -> (i32, i32) {
    if status >= 0 {
        return (status, 0);
    }
    let errno = -(status % 1000);
    (status + errno, errno)
}

/// Symbolic name of a status code, for log messages.
pub fn status_name(status: i32) -> &'static str {
    match split_status(status).0 {
        SYS_HEADER_READ_LEN_ERR => "SYS_HEADER_READ_LEN_ERR",
        SYS_HEADER_WRITE_LEN_ERR => "SYS_HEADER_WRITE_LEN_ERR",
        USER_FILE_DOES_NOT_EXIST => "USER_FILE_DOES_NOT_EXIST",
        OVERWRITE_WITHOUT_FORCE_FLAG => "OVERWRITE_WITHOUT_FORCE_FLAG",
        BAD_INPUT_DESC_INDEX => "BAD_INPUT_DESC_INDEX",
        UNIX_FILE_RENAME_ERR => "UNIX_FILE_RENAME_ERR",
        CAT_NO_ROWS_FOUND => "CAT_NO_ROWS_FOUND",
        CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME => "CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME",
        CAT_NAME_EXISTS_AS_DATAOBJ => "CAT_NAME_EXISTS_AS_DATAOBJ",
        CAT_UNKNOWN_COLLECTION => "CAT_UNKNOWN_COLLECTION",
        CAT_NOT_A_COLLECTION => "CAT_NOT_A_COLLECTION",
        CAT_UNKNOWN_FILE => "CAT_UNKNOWN_FILE",
        CAT_COLLECTION_NOT_EMPTY => "CAT_COLLECTION_NOT_EMPTY",
        _ => "UNKNOWN_STATUS",
    }
}

impl StoreError {
    /// Translate a negative store status.
    pub fn from_status(status: i32) -> StoreError {
        let (base, errno) = split_status(status);
        match base {
            USER_FILE_DOES_NOT_EXIST | CAT_UNKNOWN_COLLECTION | CAT_UNKNOWN_FILE => {
                StoreError::NotFound
            }
            CAT_NO_ROWS_FOUND => StoreError::NoMoreRows,
            OVERWRITE_WITHOUT_FORCE_FLAG
            | CATALOG_ALREADY_HAS_ITEM_BY_THAT_NAME
            | CAT_NAME_EXISTS_AS_DATAOBJ => StoreError::AlreadyExists,
            CAT_NOT_A_COLLECTION => StoreError::NotACollection,
            BAD_INPUT_DESC_INDEX => StoreError::BadDescriptor,
            UNIX_FILE_RENAME_ERR if errno == EISDIR => StoreError::StaleDirectory { errno },
            SYS_HEADER_READ_LEN_ERR | SYS_HEADER_WRITE_LEN_ERR => {
                StoreError::Io(status_name(status).to_string())
            }
            _ => StoreError::Other {
                code: status,
                message: status_name(status).to_string(),
            },
        }
    }

    /// Turn a raw status into a result. Non-negative values pass through.
    pub fn check(status: i32) -> Result<i32, StoreError> {
        if status < 0 {
            Err(StoreError::from_status(status))
        } else {
            Ok(status)
        }
    }
}
