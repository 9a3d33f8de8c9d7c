//! Offset-delimited lists used inside leaf blobs (sprite banks, scripts).
//!
//! ```text
//! u32 count
//! u32 trailing value   (kept, never interpreted)
//! u32 offsets[count]
//! element data, densely packed in offset order
//! ```
//!
//! Element `i < count - 1` is `offsets[i+1] - offsets[i]` bytes long; the last
//! element is everything left in the stream.

use tracing::debug;

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result, Violation};

#[derive(Debug, Clone)]
pub struct PointerArray<'a> {
    /// Stored after the count.  Its meaning is unknown (possibly a CRC); it
    /// is neither a length nor validated.
    pub trailing: u32,
    pub elements: Vec<ByteCursor<'a>>,
}

impl<'a> PointerArray<'a> {
    pub fn decode(mut c: ByteCursor<'a>) -> Result<Self> {
        let offset   = c.absolute_offset();
        let count    = c.take_u32()?;
        let trailing = c.take_u32()?;
        let offsets = (0..count)
            .map(|_| c.take_offset())
            .collect::<Result<Vec<usize>>>()?;

        let mut elements = Vec::with_capacity(offsets.len());
        for pair in offsets.windows(2) {
            let (start, end) = (pair[0], pair[1]);
            if end < start {
                return Err(DecodeError::malformed(offset, Violation::NegativeLength { start, end }));
            }
            elements.push(c.take_fork(end - start)?);
        }
        if !offsets.is_empty() {
            elements.push(c.fork(0));
        }

        debug!(offset, count, trailing, "pointer array");
        Ok(Self { trailing, elements })
    }

    pub fn len(&self) -> usize { self.elements.len() }

    pub fn is_empty(&self) -> bool { self.elements.is_empty() }
}

/// PointerArrays nested a fixed number of levels deep; sprite banks are
/// three levels (actor, group, sprite).
#[derive(Debug, Clone)]
pub enum PointerTree<'a> {
    Branch { trailing: u32, children: Vec<PointerTree<'a>> },
    Leaf(ByteCursor<'a>),
}

pub const SPRITE_TREE_DEPTH: usize = 3;

impl<'a> PointerTree<'a> {
    /// `depth` PointerArray levels; depth 0 is the raw blob itself.
    pub fn decode(c: ByteCursor<'a>, depth: usize) -> Result<Self> {
        if depth == 0 {
            return Ok(PointerTree::Leaf(c.fork(0)));
        }
        let array = PointerArray::decode(c)?;
        let children = array
            .elements
            .into_iter()
            .map(|element| PointerTree::decode(element, depth - 1))
            .collect::<Result<Vec<_>>>()?;
        Ok(PointerTree::Branch { trailing: array.trailing, children })
    }

    /// Leaf blobs in depth-first order.
    pub fn leaves(&self) -> Vec<&'a [u8]> {
        let mut out = Vec::new();
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves(&self, out: &mut Vec<&'a [u8]>) {
        match self {
            PointerTree::Leaf(c) => out.push(c.as_slice()),
            PointerTree::Branch { children, .. } => {
                for child in children {
                    child.collect_leaves(out);
                }
            }
        }
    }
}
