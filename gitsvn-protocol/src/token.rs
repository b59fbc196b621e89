//! Wire tokens for the svnserve protocol
//!
//! The encoding is a flat stream of self-describing items: `(` and `)`
//! delimit lists, a decimal number followed by `:` introduces a byte-string
//! of exactly that many raw bytes, a bare decimal number is a number and a
//! bare ASCII word is an atom. Whitespace separates tokens.

/// A single token read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    ListBegin,
    ListEnd,
    /// Bare atom: `[a-zA-Z][-a-zA-Z0-9]*`
    Word(String),
    /// Bare decimal number
    Number(u64),
    /// Length-prefixed byte-string; not necessarily UTF-8
    Bytes(Vec<u8>),
}

impl Token {
    /// Short token description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            Token::ListBegin => "(".to_string(),
            Token::ListEnd => ")".to_string(),
            Token::Word(w) => format!("word '{w}'"),
            Token::Number(n) => format!("number {n}"),
            Token::Bytes(b) => format!("{}-byte string", b.len()),
        }
    }
}

/// First byte of a word token.
pub fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic()
}

/// Continuation byte of a word token.
pub fn is_word_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-'
}

/// Token separator.
pub fn is_space(b: u8) -> bool {
    b == b' ' || b == b'\n' || b == b'\r' || b == b'\t'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_charset() {
        assert!(is_word_start(b'a'));
        assert!(is_word_start(b'Z'));
        assert!(!is_word_start(b'-'));
        assert!(!is_word_start(b'1'));
        assert!(is_word_char(b'-'));
        assert!(is_word_char(b'9'));
        assert!(!is_word_char(b'_'));
    }

    #[test]
    fn test_describe() {
        assert_eq!(Token::Word("success".into()).describe(), "word 'success'");
        assert_eq!(Token::Bytes(vec![1, 2, 3]).describe(), "3-byte string");
    }
}
