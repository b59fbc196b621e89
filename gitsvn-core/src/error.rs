//! Error model shared by all repository operations
//!
//! Semantic errors carry a numeric code from the Subversion error space so
//! clients keep keying their behaviour off familiar values. Codes in the
//! warning set are expected operational noise and log at a lower level.

/// Subversion numeric error codes used on the wire.
pub mod codes {
    pub const BAD_URL: u32 = 125002;

    pub const IO_WRITE_ERROR: u32 = 135004;
    pub const IO_PIPE_READ_ERROR: u32 = 135006;

    pub const STREAM_MALFORMED_DATA: u32 = 140001;

    pub const ENTRY_NOT_FOUND: u32 = 150000;

    pub const WC_NOT_UP_TO_DATE: u32 = 155011;

    pub const FS_NO_SUCH_REVISION: u32 = 160006;
    pub const FS_NOT_FOUND: u32 = 160013;
    pub const FS_NOT_DIRECTORY: u32 = 160016;
    pub const FS_NOT_FILE: u32 = 160017;
    pub const FS_CONFLICT: u32 = 160024;
    pub const FS_NO_USER: u32 = 160034;
    pub const FS_PATH_ALREADY_LOCKED: u32 = 160035;
    pub const FS_PATH_NOT_LOCKED: u32 = 160036;
    pub const FS_BAD_LOCK_TOKEN: u32 = 160037;
    pub const FS_LOCK_OWNER_MISMATCH: u32 = 160039;
    pub const FS_NO_SUCH_LOCK: u32 = 160040;
    pub const FS_OUT_OF_DATE: u32 = 160042;

    pub const REPOS_HOOK_FAILURE: u32 = 165001;

    pub const RA_NOT_AUTHORIZED: u32 = 170001;

    pub const BASE: u32 = 200000;
    pub const UNSUPPORTED_FEATURE: u32 = 200007;
    pub const ILLEGAL_TARGET: u32 = 200009;
    pub const CHECKSUM_MISMATCH: u32 = 200014;
    pub const CANCELLED: u32 = 200015;
    pub const VERSION_MISMATCH: u32 = 200019;

    pub const RA_SVN_UNKNOWN_CMD: u32 = 210001;
    pub const RA_SVN_CONNECTION_CLOSED: u32 = 210002;
    pub const RA_SVN_MALFORMED_DATA: u32 = 210004;
    pub const RA_SVN_REPOS_NOT_FOUND: u32 = 210005;
    pub const RA_SVN_BAD_VERSION: u32 = 210006;
}

/// Codes reported as a failure but logged as routine operational noise.
pub const WARNING_CODES: &[u32] = &[
    codes::CANCELLED,
    codes::ENTRY_NOT_FOUND,
    codes::FS_NOT_FOUND,
    codes::RA_NOT_AUTHORIZED,
    codes::REPOS_HOOK_FAILURE,
    codes::WC_NOT_UP_TO_DATE,
    codes::IO_WRITE_ERROR,
    codes::IO_PIPE_READ_ERROR,
];

/// A semantic error with its protocol code.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct SvnError {
    pub code: u32,
    pub message: String,
}

impl SvnError {
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn not_found(path: &str) -> Self {
        Self::new(codes::FS_NOT_FOUND, format!("File not found: {path}"))
    }

    pub fn no_such_revision(rev: u64) -> Self {
        Self::new(
            codes::FS_NO_SUCH_REVISION,
            format!("No such revision: {rev}"),
        )
    }

    pub fn not_authorized(message: impl Into<String>) -> Self {
        Self::new(codes::RA_NOT_AUTHORIZED, message)
    }

    pub fn is_warning(&self) -> bool {
        WARNING_CODES.contains(&self.code)
    }
}

impl From<std::io::Error> for SvnError {
    fn from(err: std::io::Error) -> Self {
        Self::new(codes::IO_WRITE_ERROR, format!("I/O error: {err}"))
    }
}

impl From<crate::store::StorageError> for SvnError {
    fn from(err: crate::store::StorageError) -> Self {
        match err {
            crate::store::StorageError::NotFound(id) => {
                Self::new(codes::FS_NOT_FOUND, format!("Object not found: {id}"))
            }
            other => Self::new(codes::BASE, format!("Storage error: {other}")),
        }
    }
}

/// Result type for repository operations
pub type Result<T> = std::result::Result<T, SvnError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_warning_classification() {
        assert!(SvnError::not_found("/a").is_warning());
        assert!(!SvnError::new(codes::FS_CONFLICT, "conflict").is_warning());
    }

    #[test]
    fn test_display_is_message_only() {
        let err = SvnError::new(codes::FS_NOT_FOUND, "File not found: /x");
        assert_eq!(err.to_string(), "File not found: /x");
    }
}
