//! svndiff text delta encoding
//!
//! Produces the windowed binary diff format carried inside
//! `textdelta-chunk` items. Version 0 is always available; version 1 adds
//! zlib compression of the instruction and new-data sections and is used
//! when the client negotiated the `svndiff1` capability.
//!
//! The difference engine is a block-match diff: fixed-size source blocks are
//! indexed by hash and target bytes are emitted either as copy-from-source
//! instructions or as literal new data. An empty source degenerates to pure
//! new-data windows (full-content transmission).

use std::collections::HashMap;
use std::io::Write;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::Result;

/// Granularity of source block matching.
const BLOCK_SIZE: usize = 64;

/// Maximum bytes of target per delta window.
const WINDOW_SIZE: usize = 100 * 1024;

/// Source views larger than this are not indexed; the delta degrades to
/// full-content windows rather than holding a large index per file.
const MAX_SOURCE_INDEX: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    /// Copy `len` bytes from absolute source offset `offset`.
    CopySource { offset: usize, len: usize },
    /// Take the next `len` bytes from the new-data section.
    New { len: usize },
}

/// Windowed svndiff emitter.
pub struct DeltaGenerator {
    compress: bool,
}

impl DeltaGenerator {
    /// `compress` selects svndiff1 (zlib) framing.
    pub fn new(compress: bool) -> Self {
        Self { compress }
    }

    /// Produce the framed windows for transforming `source` into `target`.
    ///
    /// The first window is prefixed with the format header; each returned
    /// buffer is sent as one `textdelta-chunk`.
    pub fn generate(&self, source: &[u8], target: &[u8]) -> Result<Vec<Vec<u8>>> {
        let index = SourceIndex::build(source);
        let mut windows = Vec::new();
        let mut first = true;

        let mut pos = 0;
        while pos < target.len() || (first && target.is_empty()) {
            let end = (pos + WINDOW_SIZE).min(target.len());
            let view = &target[pos..end];
            let ops = index.match_ops(view);
            windows.push(self.encode_window(source, view, &ops, first)?);
            first = false;
            pos = end;
            if target.is_empty() {
                break;
            }
        }
        Ok(windows)
    }

    fn encode_window(
        &self,
        source: &[u8],
        view: &[u8],
        ops: &[Op],
        first: bool,
    ) -> Result<Vec<u8>> {
        // Source view spans the whole source; matched offsets are absolute.
        let (sview_off, sview_len) = if ops.iter().any(|op| matches!(op, Op::CopySource { .. })) {
            (0usize, source.len())
        } else {
            (0usize, 0usize)
        };

        let mut instructions = Vec::new();
        let mut new_data = Vec::new();
        let mut view_pos = 0;
        for op in ops {
            match *op {
                Op::CopySource { offset, len } => {
                    encode_instruction(&mut instructions, 0, len, Some(offset));
                    view_pos += len;
                }
                Op::New { len } => {
                    encode_instruction(&mut instructions, 2, len, None);
                    new_data.extend_from_slice(&view[view_pos..view_pos + len]);
                    view_pos += len;
                }
            }
        }
        debug_assert_eq!(view_pos, view.len());

        let mut window = Vec::new();
        if first {
            window.extend_from_slice(if self.compress { b"SVN\x01" } else { b"SVN\0" });
        }
        let ins_section = self.encode_section(&instructions)?;
        let data_section = self.encode_section(&new_data)?;
        write_varint(&mut window, sview_off as u64);
        write_varint(&mut window, sview_len as u64);
        write_varint(&mut window, view.len() as u64);
        write_varint(&mut window, ins_section.len() as u64);
        write_varint(&mut window, data_section.len() as u64);
        window.extend_from_slice(&ins_section);
        window.extend_from_slice(&data_section);
        Ok(window)
    }

    /// svndiff1 sections carry their decompressed length followed by either
    /// the original bytes or a zlib stream, whichever is shorter.
    fn encode_section(&self, data: &[u8]) -> Result<Vec<u8>> {
        if !self.compress {
            return Ok(data.to_vec());
        }
        let mut section = Vec::new();
        write_varint(&mut section, data.len() as u64);
        let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(data)?;
        let compressed = encoder.finish()?;
        if compressed.len() < data.len() {
            section.extend_from_slice(&compressed);
        } else {
            section.extend_from_slice(data);
        }
        Ok(section)
    }
}

/// Hash index over fixed-size source blocks.
struct SourceIndex<'a> {
    source: &'a [u8],
    blocks: HashMap<u64, Vec<usize>>,
}

impl<'a> SourceIndex<'a> {
    fn build(source: &'a [u8]) -> Self {
        let mut blocks: HashMap<u64, Vec<usize>> = HashMap::new();
        if source.len() <= MAX_SOURCE_INDEX {
            let mut offset = 0;
            while offset + BLOCK_SIZE <= source.len() {
                let hash = block_hash(&source[offset..offset + BLOCK_SIZE]);
                blocks.entry(hash).or_default().push(offset);
                offset += BLOCK_SIZE;
            }
        }
        Self { source, blocks }
    }

    /// Cover `view` with copy/new operations.
    fn match_ops(&self, view: &[u8]) -> Vec<Op> {
        let mut ops = Vec::new();
        let mut literal_start = 0;
        let mut pos = 0;
        while pos + BLOCK_SIZE <= view.len() {
            let hash = block_hash(&view[pos..pos + BLOCK_SIZE]);
            let matched = self.blocks.get(&hash).and_then(|offsets| {
                offsets
                    .iter()
                    .find(|&&off| self.source[off..off + BLOCK_SIZE] == view[pos..pos + BLOCK_SIZE])
                    .copied()
            });
            match matched {
                Some(src_off) => {
                    if literal_start < pos {
                        ops.push(Op::New {
                            len: pos - literal_start,
                        });
                    }
                    // Extend the match beyond the block boundary.
                    let mut len = BLOCK_SIZE;
                    while pos + len < view.len()
                        && src_off + len < self.source.len()
                        && self.source[src_off + len] == view[pos + len]
                    {
                        len += 1;
                    }
                    ops.push(Op::CopySource {
                        offset: src_off,
                        len,
                    });
                    pos += len;
                    literal_start = pos;
                }
                None => pos += 1,
            }
        }
        if literal_start < view.len() {
            ops.push(Op::New {
                len: view.len() - literal_start,
            });
        }
        ops
    }
}

fn block_hash(block: &[u8]) -> u64 {
    // FNV-1a over the block; collisions are resolved by byte comparison.
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for &b in block {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

/// Variable-length integer: 7 bits per byte, most significant group first,
/// high bit set on every byte except the last.
fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    let mut bytes = [0u8; 10];
    let mut n = 0;
    loop {
        bytes[n] = (value & 0x7f) as u8;
        value >>= 7;
        n += 1;
        if value == 0 {
            break;
        }
    }
    for i in (0..n).rev() {
        let mut b = bytes[i];
        if i > 0 {
            b |= 0x80;
        }
        out.push(b);
    }
}

/// Instruction byte: opcode in the top two bits, length in the low six when
/// it fits, otherwise zero with the length as a following varint.
fn encode_instruction(out: &mut Vec<u8>, opcode: u8, len: usize, offset: Option<usize>) {
    if len < 64 {
        out.push((opcode << 6) | len as u8);
    } else {
        out.push(opcode << 6);
        write_varint(out, len as u64);
    }
    if let Some(offset) = offset {
        write_varint(out, offset as u64);
    }
}

fn read_varint(data: &[u8], pos: &mut usize) -> Result<u64> {
    let mut value = 0u64;
    loop {
        let b = *data
            .get(*pos)
            .ok_or_else(|| malformed("truncated varint"))?;
        *pos += 1;
        value = (value << 7) | (b & 0x7f) as u64;
        if b & 0x80 == 0 {
            return Ok(value);
        }
    }
}

fn malformed(what: &str) -> crate::ProtocolError {
    crate::ProtocolError::Malformed(format!("svndiff: {what}"))
}

fn decode_section(data: &[u8], compressed: bool) -> Result<Vec<u8>> {
    if !compressed {
        return Ok(data.to_vec());
    }
    let mut pos = 0;
    let original_len = read_varint(data, &mut pos)? as usize;
    let body = data.get(pos..).ok_or_else(|| malformed("short section"))?;
    if body.len() == original_len {
        return Ok(body.to_vec());
    }
    use std::io::Read;
    let mut out = Vec::with_capacity(original_len);
    flate2::read::ZlibDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|e| malformed(&format!("zlib: {e}")))?;
    if out.len() != original_len {
        return Err(malformed("section length mismatch"));
    }
    Ok(out)
}

/// Apply a complete svndiff delta (header plus windows) to `source`.
///
/// Used on the write path: clients transmit file contents as deltas and the
/// commit editor reconstructs the full text before storing the blob.
pub fn apply(source: &[u8], delta: &[u8]) -> Result<Vec<u8>> {
    let compressed = match delta.get(..4) {
        Some(b"SVN\0") => false,
        Some(b"SVN\x01") => true,
        _ => return Err(malformed("bad header")),
    };
    let mut target = Vec::new();
    let mut pos = 4;
    while pos < delta.len() {
        let sview_off = read_varint(delta, &mut pos)? as usize;
        let sview_len = read_varint(delta, &mut pos)? as usize;
        let tview_len = read_varint(delta, &mut pos)? as usize;
        let ins_len = read_varint(delta, &mut pos)? as usize;
        let data_len = read_varint(delta, &mut pos)? as usize;
        let ins_raw = delta
            .get(pos..pos + ins_len)
            .ok_or_else(|| malformed("short instruction section"))?;
        let data_raw = delta
            .get(pos + ins_len..pos + ins_len + data_len)
            .ok_or_else(|| malformed("short data section"))?;
        pos += ins_len + data_len;

        let sview = source
            .get(sview_off..sview_off + sview_len)
            .ok_or_else(|| malformed("source view out of range"))?;
        let instructions = decode_section(ins_raw, compressed)?;
        let new_data = decode_section(data_raw, compressed)?;

        let mut out = Vec::with_capacity(tview_len);
        let mut ins_pos = 0;
        let mut new_pos = 0;
        while ins_pos < instructions.len() {
            let b = instructions[ins_pos];
            ins_pos += 1;
            let opcode = b >> 6;
            let mut len = (b & 0x3f) as usize;
            if len == 0 {
                len = read_varint(&instructions, &mut ins_pos)? as usize;
            }
            match opcode {
                0 => {
                    let off = read_varint(&instructions, &mut ins_pos)? as usize;
                    let chunk = sview
                        .get(off..off + len)
                        .ok_or_else(|| malformed("source copy out of range"))?;
                    out.extend_from_slice(chunk);
                }
                1 => {
                    // Target copies may overlap their own output.
                    let off = read_varint(&instructions, &mut ins_pos)? as usize;
                    if off >= out.len() {
                        return Err(malformed("target copy out of range"));
                    }
                    for i in 0..len {
                        out.push(out[off + i]);
                    }
                }
                2 => {
                    let chunk = new_data
                        .get(new_pos..new_pos + len)
                        .ok_or_else(|| malformed("new data out of range"))?;
                    out.extend_from_slice(chunk);
                    new_pos += len;
                }
                _ => return Err(malformed("unknown opcode")),
            }
        }
        if out.len() != tview_len {
            return Err(malformed("target view length mismatch"));
        }
        target.extend_from_slice(&out);
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(source: &[u8], windows: &[Vec<u8>]) -> Vec<u8> {
        let delta: Vec<u8> = windows.concat();
        apply(source, &delta).unwrap()
    }

    #[test]
    fn test_varint_roundtrip() {
        for value in [0u64, 1, 63, 64, 127, 128, 300, 1 << 20, u64::from(u32::MAX)] {
            let mut buf = Vec::new();
            write_varint(&mut buf, value);
            let mut pos = 0;
            assert_eq!(read_varint(&buf, &mut pos).unwrap(), value);
            assert_eq!(pos, buf.len());
        }
    }

    #[test]
    fn test_full_content_against_empty_source() {
        let target = b"hello\n";
        let windows = DeltaGenerator::new(false).generate(b"", target).unwrap();
        assert!(windows[0].starts_with(b"SVN\0"));
        assert_eq!(roundtrip(b"", &windows), target);
    }

    #[test]
    fn test_empty_target_emits_empty_window() {
        let windows = DeltaGenerator::new(false).generate(b"old", b"").unwrap();
        assert_eq!(windows.len(), 1);
        assert_eq!(roundtrip(b"old", &windows), b"");
    }

    #[test]
    fn test_copy_instructions_reuse_source() {
        let source: Vec<u8> = (0..200u8).cycle().take(8192).collect();
        let mut target = source.clone();
        target.extend_from_slice(b"trailing change");
        let windows = DeltaGenerator::new(false).generate(&source, &target).unwrap();
        assert_eq!(roundtrip(&source, &windows), target);
        // A mostly-unchanged file should produce a small delta.
        let total: usize = windows.iter().map(Vec::len).sum();
        assert!(total < target.len() / 2, "delta not compact: {total}");
    }

    #[test]
    fn test_compressed_windows_roundtrip() {
        let target = vec![b'a'; 300 * 1024];
        let windows = DeltaGenerator::new(true).generate(b"", &target).unwrap();
        assert!(windows.len() > 1);
        assert!(windows[0].starts_with(b"SVN\x01"));
        assert_eq!(roundtrip(b"", &windows), target);
    }

    #[test]
    fn test_binary_content_roundtrip() {
        let source: Vec<u8> = (0..=255u8).cycle().take(10_000).collect();
        let target: Vec<u8> = source.iter().rev().copied().collect();
        for compress in [false, true] {
            let windows = DeltaGenerator::new(compress)
                .generate(&source, &target)
                .unwrap();
            assert_eq!(roundtrip(&source, &windows), target);
        }
    }

    #[test]
    fn test_apply_rejects_bad_header() {
        assert!(apply(b"", b"XXX").is_err());
        assert!(apply(b"", b"SVN\x02\0\0\0\0\0").is_err());
    }

    #[test]
    fn test_apply_target_copy() {
        // Hand-built window: 2 bytes new data "ab", then an overlapping
        // target copy of 4 bytes from offset 0 producing "ababab".
        let mut delta = b"SVN\0".to_vec();
        let instructions = vec![(2u8 << 6) | 2, (1u8 << 6) | 4, 0];
        let new_data = b"ab";
        write_varint(&mut delta, 0);
        write_varint(&mut delta, 0);
        write_varint(&mut delta, 6);
        write_varint(&mut delta, instructions.len() as u64);
        write_varint(&mut delta, new_data.len() as u64);
        delta.extend_from_slice(&instructions);
        delta.extend_from_slice(new_data);
        assert_eq!(apply(b"", &delta).unwrap(), b"ababab");
    }
}
