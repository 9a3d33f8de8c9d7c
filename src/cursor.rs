//! Bounds-checked read cursor over one immutable byte arena.
//!
//! A [`ByteCursor`] is an index triple `(start, len, pos)` over a borrowed
//! arena.  Forks and copies are new triples over the same arena; no bytes are
//! ever copied, and nothing is written after construction, so any number of
//! cursors can alias one buffer (and cross threads) freely.
//!
//! # Bounds
//! `skip` and `seek` clamp at zero but never at the upper bound: a cursor may
//! sit past its end, and the next read fails with
//! [`DecodeError::Truncated`].  The `*_padded` raw reads are the only reads
//! that succeed past the end; they fill with zero bytes.
//!
//! # Endianness
//! Fixed at construction.  The `*_with` integer reads override it for a
//! single field.

use std::borrow::Cow;
use std::fmt;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::error::{DecodeError, Result, Violation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endian {
    Big,
    Little,
}

#[derive(Clone, Copy)]
pub struct ByteCursor<'a> {
    arena:  &'a [u8],
    start:  usize,
    len:    usize,
    pos:    usize,
    endian: Endian,
}

macro_rules! int_reads {
    ($ty:ty, $width:expr, $read:ident, $peek:ident, $take:ident, $peek_with:ident, $take_with:ident) => {
        pub fn $peek(&self) -> Result<$ty> {
            self.$peek_with(self.endian)
        }

        pub fn $take(&mut self) -> Result<$ty> {
            self.$take_with(self.endian)
        }

        pub fn $peek_with(&self, endian: Endian) -> Result<$ty> {
            let bytes = self.window($width)?;
            Ok(match endian {
                Endian::Big    => BigEndian::$read(bytes),
                Endian::Little => LittleEndian::$read(bytes),
            })
        }

        pub fn $take_with(&mut self, endian: Endian) -> Result<$ty> {
            let value = self.$peek_with(endian)?;
            self.pos += $width;
            Ok(value)
        }
    };
}

impl<'a> ByteCursor<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { arena: data, start: 0, len: data.len(), pos: 0, endian }
    }

    pub fn big_endian(data: &'a [u8]) -> Self {
        Self::new(data, Endian::Big)
    }

    pub fn little_endian(data: &'a [u8]) -> Self {
        Self::new(data, Endian::Little)
    }

    // ── Position ─────────────────────────────────────────────────────────────

    pub fn endian(&self) -> Endian { self.endian }

    /// Read position relative to the start of this view.
    pub fn position(&self) -> usize { self.pos }

    /// Length of the whole view, including bytes before the read position.
    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    /// `max(0, len - position)`.
    pub fn remaining(&self) -> usize { self.len.saturating_sub(self.pos) }

    /// Absolute offset of the read position within the backing arena.
    pub fn absolute_offset(&self) -> usize { self.start + self.pos }

    /// The entire view, ignoring the read position.
    pub fn as_slice(&self) -> &'a [u8] {
        &self.arena[self.start..self.start + self.len]
    }

    /// The unread part of the view (empty when positioned past the end).
    pub fn rest(&self) -> &'a [u8] {
        let from = self.pos.min(self.len);
        &self.arena[self.start + from..self.start + self.len]
    }

    pub fn skip(&mut self, delta: isize) -> &mut Self {
        self.pos = if delta < 0 {
            self.pos.saturating_sub(delta.unsigned_abs())
        } else {
            self.pos.saturating_add(delta as usize)
        };
        self
    }

    pub fn seek(&mut self, position: usize) -> &mut Self {
        self.pos = position;
        self
    }

    // ── Raw bytes ────────────────────────────────────────────────────────────

    fn window(&self, count: usize) -> Result<&'a [u8]> {
        let available = self.remaining();
        if count > available {
            return Err(DecodeError::Truncated {
                offset: self.absolute_offset(),
                wanted: count,
                available,
            });
        }
        let from = self.start + self.pos;
        Ok(&self.arena[from..from + count])
    }

    pub fn peek_raw(&self, count: usize) -> Result<&'a [u8]> {
        self.window(count)
    }

    pub fn take_raw(&mut self, count: usize) -> Result<&'a [u8]> {
        let bytes = self.window(count)?;
        self.pos += count;
        Ok(bytes)
    }

    /// Like [`peek_raw`](Self::peek_raw) but zero-fills whatever lies past
    /// the end instead of failing.
    pub fn peek_raw_padded(&self, count: usize) -> Cow<'a, [u8]> {
        let available = self.rest();
        if available.len() >= count {
            return Cow::Borrowed(&available[..count]);
        }
        let mut padded = Vec::with_capacity(count);
        padded.extend_from_slice(available);
        padded.resize(count, 0);
        Cow::Owned(padded)
    }

    pub fn take_raw_padded(&mut self, count: usize) -> Cow<'a, [u8]> {
        let bytes = self.peek_raw_padded(count);
        self.pos = self.pos.saturating_add(count);
        bytes
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take_raw(N)?);
        Ok(out)
    }

    /// Bytes up to (not including) the next NUL.  Without a terminator the
    /// rest of the view is returned.
    pub fn peek_cstr(&self) -> &'a [u8] {
        let rest = self.rest();
        match rest.iter().position(|&b| b == 0) {
            Some(end) => &rest[..end],
            None      => rest,
        }
    }

    /// Consumes the string and its terminator, if there is one.
    pub fn take_cstr(&mut self) -> &'a [u8] {
        let rest = self.rest();
        let (value, consumed) = match rest.iter().position(|&b| b == 0) {
            Some(end) => (&rest[..end], end + 1),
            None      => (rest, rest.len()),
        };
        self.pos += consumed;
        value
    }

    // ── Integers ─────────────────────────────────────────────────────────────

    pub fn peek_u8(&self) -> Result<u8> {
        Ok(self.window(1)?[0])
    }

    pub fn take_u8(&mut self) -> Result<u8> {
        let value = self.peek_u8()?;
        self.pos += 1;
        Ok(value)
    }

    int_reads!(u16, 2, read_u16, peek_u16, take_u16, peek_u16_with, take_u16_with);
    int_reads!(u32, 4, read_u32, peek_u32, take_u32, peek_u32_with, take_u32_with);
    int_reads!(u64, 8, read_u64, peek_u64, take_u64, peek_u64_with, take_u64_with);

    /// A `u32` offset or count, widened for indexing.
    pub fn take_offset(&mut self) -> Result<usize> {
        Ok(self.take_u32()? as usize)
    }

    // ── Views ────────────────────────────────────────────────────────────────

    /// New cursor over the rest of this view, starting `skip` bytes after
    /// the current position.  The new cursor's position is 0.
    pub fn fork(&self, skip: usize) -> Self {
        let from = self.pos.saturating_add(skip).min(self.len);
        Self {
            arena:  self.arena,
            start:  self.start + from,
            len:    self.len - from,
            pos:    0,
            endian: self.endian,
        }
    }

    /// Second view over the same bytes, including everything before the
    /// current position.
    pub fn copy(&self) -> Self {
        *self
    }

    /// Cursor over exactly the next `count` bytes.
    pub fn peek_fork(&self, count: usize) -> Result<Self> {
        self.window(count)?;
        Ok(Self {
            arena:  self.arena,
            start:  self.start + self.pos,
            len:    count,
            pos:    0,
            endian: self.endian,
        })
    }

    pub fn take_fork(&mut self, count: usize) -> Result<Self> {
        let fork = self.peek_fork(count)?;
        self.pos += count;
        Ok(fork)
    }

    pub fn with_endian(&self, endian: Endian) -> Self {
        Self { endian, ..*self }
    }
}

impl fmt::Debug for ByteCursor<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rest = self.rest();
        let shown = &rest[..rest.len().min(30)];
        f.debug_struct("ByteCursor")
            .field("offset", &self.start)
            .field("len", &self.len)
            .field("pos", &self.pos)
            .field("endian", &self.endian)
            .field("next", &format_args!("{}{}", hex::encode(shown), if rest.len() > 30 { "..." } else { "" }))
            .finish()
    }
}

// ── Frames ───────────────────────────────────────────────────────────────────

/// The byte range a container node resolves its internal offsets against.
///
/// Every offset stored inside a node is relative to the node's own first
/// byte (its tag field).  A frame pins that origin down together with how far
/// the node is allowed to reach.
#[derive(Debug, Clone, Copy)]
pub struct Frame<'a> {
    view: ByteCursor<'a>,
}

impl<'a> Frame<'a> {
    /// A frame of exactly `size` bytes starting at `anchor`'s position.
    pub fn bounded(anchor: &ByteCursor<'a>, size: usize) -> Result<Self> {
        let available = anchor.remaining();
        if size > available {
            return Err(DecodeError::malformed(
                anchor.absolute_offset(),
                Violation::ElementOutOfFrame { start: 0, end: size, frame_len: available },
            ));
        }
        Ok(Self { view: anchor.fork(0).peek_fork(size)? })
    }

    /// A frame from `anchor`'s position to the end of its view.
    pub fn open(anchor: &ByteCursor<'a>) -> Self {
        Self { view: anchor.fork(0) }
    }

    /// Absolute offset of the frame origin.
    pub fn base(&self) -> usize { self.view.absolute_offset() }

    pub fn len(&self) -> usize { self.view.len() }

    pub fn is_empty(&self) -> bool { self.view.is_empty() }

    /// Cursor from `offset` to the end of the frame.
    pub fn at(&self, offset: usize) -> Result<ByteCursor<'a>> {
        if offset > self.len() {
            return Err(DecodeError::malformed(
                self.base(),
                Violation::OffsetOutOfFrame { offset, frame_len: self.len() },
            ));
        }
        Ok(self.view.fork(offset))
    }

    /// Cursor over `offset..offset + len`.
    pub fn slice(&self, offset: usize, len: usize) -> Result<ByteCursor<'a>> {
        let end = offset.checked_add(len).filter(|&end| end <= self.len()).ok_or_else(|| {
            DecodeError::malformed(
                self.base(),
                Violation::ElementOutOfFrame {
                    start:     offset,
                    end:       offset.saturating_add(len),
                    frame_len: self.len(),
                },
            )
        })?;
        self.view.fork(offset).peek_fork(end - offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_follow_endianness() {
        let data = [0x12, 0x34, 0x56, 0x78];
        let mut be = ByteCursor::big_endian(&data);
        let mut le = ByteCursor::little_endian(&data);
        assert_eq!(be.peek_u32().unwrap(), 0x1234_5678);
        assert_eq!(le.take_u16().unwrap(), 0x3412);
        assert_eq!(le.take_u16_with(Endian::Big).unwrap(), 0x5678);
        assert_eq!(be.take_u16().unwrap(), 0x1234);
        assert_eq!(be.position(), 2);
        assert_eq!(be.remaining(), 2);
    }

    #[test]
    fn read_past_end_is_truncated() {
        let data = [1u8, 2, 3];
        let mut c = ByteCursor::big_endian(&data);
        c.skip(2);
        match c.take_u16() {
            Err(DecodeError::Truncated { offset, wanted, available }) => {
                assert_eq!((offset, wanted, available), (2, 2, 1));
            }
            other => panic!("expected Truncated, got {other:?}"),
        }
        assert_eq!(c.position(), 2, "failed reads must not advance");
    }

    #[test]
    fn skip_and_seek_clamp_only_at_zero() {
        let data = [0u8; 4];
        let mut c = ByteCursor::big_endian(&data);
        c.skip(-10);
        assert_eq!(c.position(), 0);
        c.seek(100);
        assert_eq!(c.remaining(), 0);
        assert!(c.take_u8().is_err());
    }

    #[test]
    fn padded_reads_fill_with_zeros() {
        let data = [0xAAu8, 0xBB];
        let mut c = ByteCursor::big_endian(&data);
        assert_eq!(&*c.peek_raw_padded(2), &[0xAA, 0xBB]);
        assert_eq!(&*c.take_raw_padded(4), &[0xAA, 0xBB, 0, 0]);
        assert_eq!(c.position(), 4);
        assert_eq!(&*c.take_raw_padded(2), &[0, 0]);
    }

    #[test]
    fn null_terminated_strings() {
        let mut c = ByteCursor::big_endian(b"hello\0world\0partial");
        assert_eq!(c.peek_cstr(), b"hello");
        assert_eq!(c.take_cstr(), b"hello");
        assert_eq!(c.take_cstr(), b"world");
        assert_eq!(c.take_cstr(), b"partial");
        assert_eq!(c.take_cstr(), b"");
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn fork_and_copy_alias_the_same_arena() {
        let data: Vec<u8> = (0u8..16).collect();
        let mut c = ByteCursor::big_endian(&data);
        c.skip(4);

        let fork = c.fork(2);
        assert_eq!(fork.position(), 0);
        assert_eq!(fork.absolute_offset(), 6);
        assert_eq!(fork.len(), 10);
        assert_eq!(fork.peek_u8().unwrap(), 6);

        let copy = c.copy();
        assert_eq!(copy.position(), 4);
        assert_eq!(copy.as_slice(), &data[..]);

        let mut bounded = c.take_fork(3).unwrap();
        assert_eq!(bounded.as_slice(), &[4, 5, 6]);
        assert_eq!(c.position(), 7);
        bounded.skip(2);
        assert_eq!(bounded.take_u8().unwrap(), 6);
        assert!(bounded.take_u8().is_err());
    }

    #[test]
    fn frame_offsets_are_checked() {
        let data: Vec<u8> = (0u8..32).collect();
        let mut c = ByteCursor::big_endian(&data);
        c.skip(8);
        let frame = Frame::bounded(&c, 16).unwrap();
        assert_eq!(frame.base(), 8);
        assert_eq!(frame.at(4).unwrap().peek_u8().unwrap(), 12);
        assert_eq!(frame.slice(14, 2).unwrap().as_slice(), &[22, 23]);
        assert!(matches!(
            frame.at(17),
            Err(DecodeError::MalformedContainer { violation: Violation::OffsetOutOfFrame { .. }, .. })
        ));
        assert!(matches!(
            frame.slice(10, 7),
            Err(DecodeError::MalformedContainer { violation: Violation::ElementOutOfFrame { .. }, .. })
        ));
        assert!(Frame::bounded(&c, 25).is_err());
        assert_eq!(Frame::open(&c).len(), 24);
    }
}
