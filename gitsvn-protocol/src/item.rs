//! Parsed item trees and the schema-style message reader
//!
//! Command arguments arrive as one balanced list. The session parses that
//! list into an [`Item`] tree and each command consumes it through an
//! [`ItemReader`], reading fields in schema order. Missing trailing optional
//! fields read as absent; extra trailing fields are ignored.

use crate::token::Token;
use crate::{ProtocolError, Result};

/// One well-balanced protocol item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Item {
    Word(String),
    Number(u64),
    Bytes(Vec<u8>),
    List(Vec<Item>),
}

impl Item {
    pub(crate) fn from_scalar(token: Token) -> Self {
        match token {
            Token::Word(w) => Item::Word(w),
            Token::Number(n) => Item::Number(n),
            Token::Bytes(b) => Item::Bytes(b),
            Token::ListBegin | Token::ListEnd => unreachable!("structural token"),
        }
    }

    fn describe(&self) -> String {
        match self {
            Item::Word(w) => format!("word '{w}'"),
            Item::Number(n) => format!("number {n}"),
            Item::Bytes(b) => format!("{}-byte string", b.len()),
            Item::List(items) => format!("list of {}", items.len()),
        }
    }
}

/// Sequential field reader over a parsed argument list.
pub struct ItemReader<'a> {
    items: &'a [Item],
    pos: usize,
}

impl<'a> ItemReader<'a> {
    pub fn new(items: &'a [Item]) -> Self {
        Self { items, pos: 0 }
    }

    /// True if all fields have been consumed.
    pub fn at_end(&self) -> bool {
        self.pos >= self.items.len()
    }

    fn next(&mut self, expected: &'static str) -> Result<&'a Item> {
        let item = self.items.get(self.pos).ok_or(ProtocolError::Message(format!(
            "missing required field: expected {expected}"
        )))?;
        self.pos += 1;
        Ok(item)
    }

    fn mismatch(expected: &'static str, found: &Item) -> ProtocolError {
        ProtocolError::Message(format!("expected {expected}, found {}", found.describe()))
    }

    pub fn read_word(&mut self) -> Result<String> {
        match self.next("word")? {
            Item::Word(w) => Ok(w.clone()),
            other => Err(Self::mismatch("word", other)),
        }
    }

    pub fn read_number(&mut self) -> Result<u64> {
        match self.next("number")? {
            Item::Number(n) => Ok(*n),
            other => Err(Self::mismatch("number", other)),
        }
    }

    pub fn read_string(&mut self) -> Result<String> {
        match self.next("string")? {
            Item::Bytes(b) => String::from_utf8(b.clone())
                .map_err(|_| ProtocolError::Message("string is not valid UTF-8".into())),
            Item::Word(w) => Ok(w.clone()),
            other => Err(Self::mismatch("string", other)),
        }
    }

    pub fn read_bytes(&mut self) -> Result<Vec<u8>> {
        match self.next("string")? {
            Item::Bytes(b) => Ok(b.clone()),
            other => Err(Self::mismatch("string", other)),
        }
    }

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.next("bool")? {
            Item::Word(w) if w == "true" => Ok(true),
            Item::Word(w) if w == "false" => Ok(false),
            other => Err(Self::mismatch("bool", other)),
        }
    }

    /// Enter a sub-list field.
    pub fn read_list(&mut self) -> Result<ItemReader<'a>> {
        match self.next("list")? {
            Item::List(items) => Ok(ItemReader::new(items)),
            other => Err(Self::mismatch("list", other)),
        }
    }

    /// Optional scalar encoded as a list: `( )` is absent, `( rev )` present.
    pub fn read_optional_number(&mut self) -> Result<Option<u64>> {
        let mut list = self.read_list()?;
        if list.at_end() {
            Ok(None)
        } else {
            list.read_number().map(Some)
        }
    }

    /// Optional string encoded as a list: `( )` is absent.
    pub fn read_optional_string(&mut self) -> Result<Option<String>> {
        let mut list = self.read_list()?;
        if list.at_end() {
            Ok(None)
        } else {
            list.read_string().map(Some)
        }
    }

    /// All numbers of a sub-list field.
    pub fn read_number_list(&mut self) -> Result<Vec<u64>> {
        let mut list = self.read_list()?;
        let mut out = Vec::new();
        while !list.at_end() {
            out.push(list.read_number()?);
        }
        Ok(out)
    }

    /// All strings of a sub-list field.
    pub fn read_string_list(&mut self) -> Result<Vec<String>> {
        let mut list = self.read_list()?;
        let mut out = Vec::new();
        while !list.at_end() {
            out.push(list.read_string()?);
        }
        Ok(out)
    }

    /// Trailing optional word: absent when the message ends early.
    pub fn read_trailing_word(&mut self) -> Result<Option<String>> {
        if self.at_end() {
            return Ok(None);
        }
        self.read_word().map(Some)
    }

    /// Trailing optional bool: absent when the message ends early.
    pub fn read_trailing_bool(&mut self) -> Result<Option<bool>> {
        if self.at_end() {
            return Ok(None);
        }
        self.read_bool().map(Some)
    }

    /// Trailing optional number: absent when the message ends early.
    pub fn read_trailing_number(&mut self) -> Result<Option<u64>> {
        if self.at_end() {
            return Ok(None);
        }
        self.read_number().map(Some)
    }

    /// Trailing optional list: absent when the message ends early.
    pub fn read_trailing_list(&mut self) -> Result<Option<ItemReader<'a>>> {
        if self.at_end() {
            return Ok(None);
        }
        self.read_list().map(Some)
    }

    /// Trailing optional string: absent when the message ends early.
    pub fn read_trailing_string(&mut self) -> Result<Option<String>> {
        if self.at_end() {
            return Ok(None);
        }
        self.read_string().map(Some)
    }

    /// Proplist field: `( ( name value ) ... )`.
    pub fn read_proplist(&mut self) -> Result<Vec<(String, String)>> {
        let mut list = self.read_list()?;
        let mut out = Vec::new();
        while !list.at_end() {
            let mut pair = list.read_list()?;
            let name = pair.read_string()?;
            let value = pair.read_string()?;
            out.push((name, value));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_order() {
        let items = vec![
            Item::Bytes(b"trunk/file.txt".to_vec()),
            Item::List(vec![Item::Number(7)]),
            Item::Word("true".into()),
        ];
        let mut reader = ItemReader::new(&items);
        assert_eq!(reader.read_string().unwrap(), "trunk/file.txt");
        assert_eq!(reader.read_optional_number().unwrap(), Some(7));
        assert!(reader.read_bool().unwrap());
        assert!(reader.at_end());
    }

    #[test]
    fn test_missing_trailing_fields_are_absent() {
        let items = vec![Item::Bytes(b"path".to_vec())];
        let mut reader = ItemReader::new(&items);
        reader.read_string().unwrap();
        assert_eq!(reader.read_trailing_word().unwrap(), None);
        assert_eq!(reader.read_trailing_bool().unwrap(), None);
    }

    #[test]
    fn test_missing_required_field_fails() {
        let items = vec![];
        let mut reader = ItemReader::new(&items);
        assert!(reader.read_string().is_err());
    }

    #[test]
    fn test_type_mismatch_fails() {
        let items = vec![Item::Number(1)];
        let mut reader = ItemReader::new(&items);
        assert!(reader.read_bool().is_err());
    }

    #[test]
    fn test_proplist() {
        let items = vec![Item::List(vec![
            Item::List(vec![
                Item::Bytes(b"svn:log".to_vec()),
                Item::Bytes(b"message".to_vec()),
            ]),
        ])];
        let mut reader = ItemReader::new(&items);
        let props = reader.read_proplist().unwrap();
        assert_eq!(props, vec![("svn:log".to_string(), "message".to_string())]);
    }
}
