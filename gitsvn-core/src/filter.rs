//! Content filters
//!
//! Named bidirectional byte transformations applied when a blob is read out
//! to a client or written in by the commit editor. Symlinks are stored as
//! their bare target path but travel as `link <target>` special files.

use bytes::{BufMut, Bytes, BytesMut};

use crate::object::FileMode;

/// Prefix of the special-file text form of a symlink.
pub const LINK_PREFIX: &str = "link ";

/// A bidirectional byte-stream transformation.
pub trait ContentFilter: Send + Sync {
    /// Stable name; part of cache keys, never rename.
    fn name(&self) -> &'static str;

    /// Stored blob bytes to client-visible content.
    fn read(&self, data: Bytes) -> Bytes;

    /// Client-supplied content to stored blob bytes.
    fn write(&self, data: Bytes) -> Bytes;
}

/// Identity filter for regular files.
pub struct RawFilter;

impl ContentFilter for RawFilter {
    fn name(&self) -> &'static str {
        "raw"
    }

    fn read(&self, data: Bytes) -> Bytes {
        data
    }

    fn write(&self, data: Bytes) -> Bytes {
        data
    }
}

/// Symlink materialisation filter.
pub struct LinkFilter;

impl ContentFilter for LinkFilter {
    fn name(&self) -> &'static str {
        "link"
    }

    fn read(&self, data: Bytes) -> Bytes {
        let mut out = BytesMut::with_capacity(LINK_PREFIX.len() + data.len());
        out.put_slice(LINK_PREFIX.as_bytes());
        out.put_slice(&data);
        out.freeze()
    }

    fn write(&self, data: Bytes) -> Bytes {
        match data.strip_prefix(LINK_PREFIX.as_bytes()) {
            Some(target) => Bytes::copy_from_slice(target),
            None => data,
        }
    }
}

static RAW: RawFilter = RawFilter;
static LINK: LinkFilter = LinkFilter;

/// Filter selected by entry mode.
pub fn for_mode(mode: FileMode) -> &'static dyn ContentFilter {
    match mode {
        FileMode::Symlink => &LINK,
        _ => &RAW,
    }
}
