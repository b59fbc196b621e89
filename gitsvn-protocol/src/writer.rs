//! Token emitter for the svnserve protocol
//!
//! Emit calls are synchronous and append to an in-memory buffer so responses
//! can be assembled with chained calls; `flush` pushes the buffer to the
//! socket. Long streams (file contents, delta chunks) flush per chunk.

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::Result;

/// Buffered token writer.
pub struct SvnWriter<W> {
    inner: W,
    buf: BytesMut,
}

impl<W: AsyncWrite + Unpin> SvnWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(8 * 1024),
        }
    }

    pub fn list_begin(&mut self) -> &mut Self {
        self.buf.put_slice(b"( ");
        self
    }

    pub fn list_end(&mut self) -> &mut Self {
        self.buf.put_slice(b") ");
        self
    }

    pub fn word(&mut self, word: &str) -> &mut Self {
        debug_assert!(word.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-'));
        self.buf.put_slice(word.as_bytes());
        self.buf.put_u8(b' ');
        self
    }

    pub fn number(&mut self, n: u64) -> &mut Self {
        self.buf.put_slice(n.to_string().as_bytes());
        self.buf.put_u8(b' ');
        self
    }

    pub fn bool(&mut self, value: bool) -> &mut Self {
        self.word(if value { "true" } else { "false" })
    }

    pub fn string(&mut self, s: &str) -> &mut Self {
        self.binary(s.as_bytes())
    }

    /// Writes the string when present; absent values write nothing, which is
    /// how optional tuple slots are encoded.
    pub fn string_opt(&mut self, s: Option<&str>) -> &mut Self {
        if let Some(s) = s {
            self.string(s);
        }
        self
    }

    pub fn binary(&mut self, data: &[u8]) -> &mut Self {
        self.buf.put_slice(data.len().to_string().as_bytes());
        self.buf.put_u8(b':');
        self.buf.put_slice(data);
        self.buf.put_u8(b' ');
        self
    }

    /// Proplist: `( ( name value ) ... )`, keys in the iteration order given.
    pub fn map<'a, I>(&mut self, props: I) -> &mut Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        self.list_begin();
        for (name, value) in props {
            self.list_begin().string(name).string(value).list_end();
        }
        self.list_end()
    }

    /// Bytes queued but not yet flushed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub async fn flush(&mut self) -> Result<()> {
        if !self.buf.is_empty() {
            let data = self.buf.split();
            self.inner.write_all(&data).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }

    /// Consume the writer, returning the underlying stream.
    pub fn into_inner(self) -> W {
        self.inner
    }
}
