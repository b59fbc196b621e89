//! Svnserve wire protocol implementation
//!
//! Implements the line-oriented binary encoding spoken by `svn://` clients:
//! - Token codec (numbers, byte-strings, words, lists)
//! - Item tree and schema-style message reader/writer
//! - svndiff0/svndiff1 text delta encoding

pub mod item;
pub mod parser;
pub mod svndiff;
pub mod token;
pub mod writer;

pub use item::{Item, ItemReader};
pub use parser::SvnParser;
pub use svndiff::{apply as apply_svndiff, DeltaGenerator};
pub use token::Token;
pub use writer::SvnWriter;

/// Maximum size of a single token (byte-string payload included).
///
/// Anything larger is a framing error and fatal to the connection.
pub const MAX_TOKEN_SIZE: usize = 10 * 1024 * 1024;

/// Protocol-level errors
///
/// These are transport errors: the connection cannot be trusted after one
/// occurs and must be closed.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("token exceeds {MAX_TOKEN_SIZE} bytes")]
    TokenTooLarge,

    #[error("malformed token stream: {0}")]
    Malformed(String),

    #[error("unexpected token: expected {expected}, found {found}")]
    UnexpectedToken { expected: &'static str, found: String },

    #[error("malformed message: {0}")]
    Message(String),
}

/// Result type for protocol operations
pub type Result<T> = std::result::Result<T, ProtocolError>;
