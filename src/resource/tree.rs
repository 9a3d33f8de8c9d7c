//! Resource trees: the tagged, offset-indexed container format used inside
//! the game's data files.
//!
//! # Header
//!
//! Every node starts with `tag: u32, size: u32` (big-endian), followed by
//! three `u32` fields whose meaning depends on the tag:
//!
//! | Tag | Kind  | Fields | Frame |
//! |-----|-------|--------|-------|
//! | 0   | Node  | child count (hint only), name list offset, child list offset | `size` bytes |
//! | 1   | Array | element count, element stride, data offset | `size` bytes |
//! | 2   | Set   | element count, offset table offset, element data offset | rest of the enclosing view |
//!
//! All offsets are relative to the node's first byte.  A node's *frame* is
//! the range those offsets may reach: for Node and Array it is exactly
//! `size` bytes, but a Set's `size` does not describe its data, so a Set's
//! frame runs to the end of whatever view contains it.
//!
//! # Node
//!
//! The name list and child list are both Sets.  Whichever of the two starts
//! first is cut off where the other begins.  Name list offset 0 means the
//! children are keyed by index.
//!
//! # Set
//!
//! Element `i` starts at `list + offsets[i]` and runs to `list + offsets[i+1]`.
//! The last element ends at `base` when the data precedes the offset table;
//! otherwise it runs to the end of the frame.
//!
//! # Unknown tags
//!
//! Decoded as [`ResourceTree::Unknown`] with their header only.

use std::collections::HashSet;
use std::fmt;

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, SerializeSeq, Serializer};
use tracing::{debug, warn};

use crate::cursor::{ByteCursor, Frame};
use crate::error::{DecodeError, Result, Violation};

pub const TAG_NODE:  u32 = 0;
pub const TAG_ARRAY: u32 = 1;
pub const TAG_SET:   u32 = 2;

/// Bytes taken by `tag, size` and the three tag-specific fields.
pub const HEADER_LEN: usize = 20;

/// Nesting limit for Node-in-Node recursion.
pub const MAX_DEPTH: usize = 64;

// ── Types ─────────────────────────────────────────────────────────────────────

/// A child key: a name from the node's name list, or a position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Key {
    Name(String),
    Index(usize),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Name(n)  => f.write_str(n),
            Key::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

#[derive(Debug, Clone)]
pub struct Node<'a> {
    pub offset:      usize,
    pub size:        u32,
    /// As stored; never used for slicing.
    pub child_count: u32,
    pub named:       bool,
    pub children:    IndexMap<Key, ResourceTree<'a>>,
}

#[derive(Debug, Clone)]
pub struct Array<'a> {
    pub offset:   usize,
    pub size:     u32,
    pub stride:   u32,
    pub elements: Vec<ByteCursor<'a>>,
}

#[derive(Debug, Clone)]
pub struct Set<'a> {
    pub offset:      usize,
    /// As stored; does not bound the set's data.
    pub size:        u32,
    pub base_offset: u32,
    pub list_offset: u32,
    pub elements:    Vec<ByteCursor<'a>>,
}

#[derive(Debug, Clone)]
pub enum ResourceTree<'a> {
    Node(Node<'a>),
    Array(Array<'a>),
    Set(Set<'a>),
    Unknown { offset: usize, tag: u32, size: u32 },
}

/// How a decode reacts to a malformed subtree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TreeDecodePolicy {
    /// The first error fails the whole decode.
    #[default]
    Strict,
    /// A child that fails to decode is left out of its parent and reported.
    /// Errors in the root node itself still fail the decode.
    SkipCorrupt,
}

/// A child left out under [`TreeDecodePolicy::SkipCorrupt`].
#[derive(Debug)]
pub struct SkippedSubtree {
    /// Slash-separated keys from the root to the skipped child.
    pub path:  String,
    pub error: DecodeError,
}

#[derive(Debug)]
pub struct TreeDecode<'a> {
    pub tree:    ResourceTree<'a>,
    pub skipped: Vec<SkippedSubtree>,
}

// ── Decoding ──────────────────────────────────────────────────────────────────

struct Decoder {
    policy:  TreeDecodePolicy,
    skipped: Vec<SkippedSubtree>,
}

impl Decoder {
    fn tree<'a>(&mut self, c: ByteCursor<'a>, path: &str, depth: usize) -> Result<ResourceTree<'a>> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::malformed(c.absolute_offset(), Violation::DepthLimit(MAX_DEPTH)));
        }
        match c.peek_u32()? {
            TAG_NODE  => self.node(c, path, depth).map(ResourceTree::Node),
            TAG_ARRAY => Array::decode(c).map(ResourceTree::Array),
            TAG_SET   => Set::decode(c).map(ResourceTree::Set),
            tag => {
                let offset = c.absolute_offset();
                let size = c.fork(4).peek_u32()?;
                warn!(tag, size, offset, path, "unknown resource tree tag");
                Ok(ResourceTree::Unknown { offset, tag, size })
            }
        }
    }

    fn node<'a>(&mut self, anchor: ByteCursor<'a>, path: &str, depth: usize) -> Result<Node<'a>> {
        let offset = anchor.absolute_offset();
        let mut c = anchor;
        expect_tag(&mut c, TAG_NODE)?;
        let size        = c.take_u32()?;
        let frame       = Frame::bounded(&anchor, size as usize)?;
        let child_count = c.take_u32()?;
        let name_off    = c.take_offset()?;
        let child_off   = c.take_offset()?;

        let (names_view, children_view) = if name_off < child_off {
            (frame.slice(name_off, child_off - name_off)?, frame.at(child_off)?)
        } else {
            (frame.at(name_off)?, frame.slice(child_off, name_off - child_off)?)
        };

        let child_list = Set::decode(children_view)?;
        let named = name_off != 0;
        let keys: Vec<Key> = if named {
            let names = Set::decode(names_view)?;
            if names.elements.len() != child_list.elements.len() {
                return Err(DecodeError::malformed(
                    offset,
                    Violation::NameCountMismatch {
                        names:    names.elements.len(),
                        children: child_list.elements.len(),
                    },
                ));
            }
            names.elements.iter().map(read_name).collect::<Result<_>>()?
        } else {
            (0..child_list.elements.len()).map(Key::Index).collect()
        };

        if child_count as usize != keys.len() {
            debug!(offset, child_count, actual = keys.len(), "node child count hint differs");
        }

        let mut seen = HashSet::with_capacity(keys.len());
        if let Some(dup) = keys.iter().find(|k| !seen.insert(*k)) {
            return Err(DecodeError::malformed(offset, Violation::DuplicateName(dup.to_string())));
        }

        let mut children = IndexMap::with_capacity(keys.len());
        for (key, element) in keys.into_iter().zip(child_list.elements) {
            let child_path = if path.is_empty() { key.to_string() } else { format!("{path}/{key}") };
            match self.tree(element, &child_path, depth + 1) {
                Ok(child) => {
                    children.insert(key, child);
                }
                Err(error) if self.policy == TreeDecodePolicy::SkipCorrupt => {
                    warn!(path = %child_path, %error, "skipping corrupt subtree");
                    self.skipped.push(SkippedSubtree { path: child_path, error });
                }
                Err(error) => return Err(error),
            }
        }

        debug!(offset, size, children = children.len(), named, "node");
        Ok(Node { offset, size, child_count, named, children })
    }
}

fn expect_tag(c: &mut ByteCursor<'_>, expected: u32) -> Result<()> {
    let offset = c.absolute_offset();
    let found = c.take_u32()?;
    if found != expected {
        return Err(DecodeError::malformed(offset, Violation::UnexpectedTag { expected, found }));
    }
    Ok(())
}

/// A NUL-terminated ASCII name element.
pub(crate) fn read_name(element: &ByteCursor<'_>) -> Result<Key> {
    let raw = element.peek_cstr();
    if !raw.is_ascii() {
        return Err(DecodeError::malformed(element.absolute_offset(), Violation::NonAsciiName));
    }
    Ok(Key::Name(String::from_utf8_lossy(raw).into_owned()))
}

impl<'a> Set<'a> {
    /// Decodes a Set whose frame runs from `c` to the end of `c`'s view.
    pub fn decode(c: ByteCursor<'a>) -> Result<Self> {
        let anchor = c.fork(0);
        let offset = anchor.absolute_offset();
        let mut c = anchor;
        expect_tag(&mut c, TAG_SET)?;
        let size        = c.take_u32()?;
        let count       = c.take_u32()?;
        let base_offset = c.take_u32()?;
        let list_offset = c.take_u32()?;

        let frame = Frame::open(&anchor);
        let mut table = frame.at(base_offset as usize)?;
        let offsets = (0..count)
            .map(|_| table.take_offset())
            .collect::<Result<Vec<usize>>>()?;

        let list = list_offset as usize;
        let mut elements = Vec::with_capacity(offsets.len());
        for (i, &start) in offsets.iter().enumerate() {
            let at = list.checked_add(start).ok_or_else(|| {
                DecodeError::malformed(
                    offset,
                    Violation::OffsetOverflow { list, start },
                )
            })?;
            let end = match offsets.get(i + 1) {
                Some(&next) => Some(next),
                None if list_offset < base_offset => Some((base_offset - list_offset) as usize),
                None => None,
            };
            let element = match end {
                Some(end) if end < start => {
                    return Err(DecodeError::malformed(offset, Violation::NegativeLength { start, end }));
                }
                Some(end) => frame.slice(at, end - start)?,
                None      => frame.at(at)?,
            };
            elements.push(element);
        }

        Ok(Self { offset, size, base_offset, list_offset, elements })
    }
}

impl<'a> Array<'a> {
    pub fn decode(c: ByteCursor<'a>) -> Result<Self> {
        let anchor = c.fork(0);
        let offset = anchor.absolute_offset();
        let mut c = anchor;
        expect_tag(&mut c, TAG_ARRAY)?;
        let size   = c.take_u32()?;
        let frame  = Frame::bounded(&anchor, size as usize)?;
        let count  = c.take_u32()?;
        let stride = c.take_u32()?;
        let data   = c.take_offset()?;

        if stride == 0 && count as usize > frame.len() {
            return Err(DecodeError::malformed(offset, Violation::ZeroStride { count, frame_len: frame.len() }));
        }
        let total = count
            .checked_mul(stride)
            .ok_or_else(|| DecodeError::malformed(offset, Violation::SizeOverflow { count, stride }))?;
        let end = data.saturating_add(total as usize);
        if end > frame.len() {
            return Err(DecodeError::malformed(
                offset,
                Violation::ElementOutOfFrame { start: data, end, frame_len: frame.len() },
            ));
        }

        let stride_len = stride as usize;
        let elements = (0..count as usize)
            .map(|i| frame.slice(data + i * stride_len, stride_len))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { offset, size, stride, elements })
    }
}

impl<'a> ResourceTree<'a> {
    /// Decodes the tree starting at `c`, failing on the first malformed node.
    pub fn decode(c: ByteCursor<'a>) -> Result<Self> {
        Ok(Self::decode_with(c, TreeDecodePolicy::Strict)?.tree)
    }

    pub fn decode_with(c: ByteCursor<'a>, policy: TreeDecodePolicy) -> Result<TreeDecode<'a>> {
        let mut decoder = Decoder { policy, skipped: Vec::new() };
        let tree = decoder.tree(c.fork(0), "", 0)?;
        Ok(TreeDecode { tree, skipped: decoder.skipped })
    }

    pub fn tag(&self) -> u32 {
        match self {
            ResourceTree::Node(_)            => TAG_NODE,
            ResourceTree::Array(_)           => TAG_ARRAY,
            ResourceTree::Set(_)             => TAG_SET,
            ResourceTree::Unknown { tag, .. } => *tag,
        }
    }

    pub fn size(&self) -> u32 {
        match self {
            ResourceTree::Node(n)              => n.size,
            ResourceTree::Array(a)             => a.size,
            ResourceTree::Set(s)               => s.size,
            ResourceTree::Unknown { size, .. } => *size,
        }
    }

    pub fn offset(&self) -> usize {
        match self {
            ResourceTree::Node(n)                => n.offset,
            ResourceTree::Array(a)               => a.offset,
            ResourceTree::Set(s)                 => s.offset,
            ResourceTree::Unknown { offset, .. } => *offset,
        }
    }

    pub fn as_node(&self) -> Option<&Node<'a>> {
        match self {
            ResourceTree::Node(n) => Some(n),
            _ => None,
        }
    }

    /// Child of a Node by key.
    pub fn child(&self, key: impl Into<Key>) -> Option<&ResourceTree<'a>> {
        self.as_node()?.children.get(&key.into())
    }

    /// Elements of an Array or Set.
    pub fn elements(&self) -> Option<&[ByteCursor<'a>]> {
        match self {
            ResourceTree::Array(a) => Some(&a.elements),
            ResourceTree::Set(s)   => Some(&s.elements),
            _ => None,
        }
    }

    /// Flattens to plain maps and byte lists.
    pub fn simplify(&self) -> Simplified<'a> {
        match self {
            ResourceTree::Node(n) => Simplified::Map(
                n.children.iter().map(|(k, v)| (k.clone(), v.simplify())).collect(),
            ),
            ResourceTree::Array(Array { elements, .. }) | ResourceTree::Set(Set { elements, .. }) => {
                Simplified::List(elements.iter().map(ByteCursor::as_slice).collect())
            }
            ResourceTree::Unknown { tag, size, .. } => Simplified::Opaque { tag: *tag, size: *size },
        }
    }
}

// ── Simplified form ───────────────────────────────────────────────────────────

/// A decoded tree with structure reduced to maps and byte lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Simplified<'a> {
    Map(IndexMap<Key, Simplified<'a>>),
    List(Vec<&'a [u8]>),
    Opaque { tag: u32, size: u32 },
}

impl<'a> Simplified<'a> {
    pub fn get(&self, key: impl Into<Key>) -> Option<&Simplified<'a>> {
        match self {
            Simplified::Map(m) => m.get(&key.into()),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[&'a [u8]]> {
        match self {
            Simplified::List(l) => Some(l),
            _ => None,
        }
    }
}

/// Maps become JSON objects, byte elements become lowercase hex strings.
impl Serialize for Simplified<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Simplified::Map(m) => {
                let mut map = serializer.serialize_map(Some(m.len()))?;
                for (k, v) in m {
                    map.serialize_entry(&k.to_string(), v)?;
                }
                map.end()
            }
            Simplified::List(l) => {
                let mut seq = serializer.serialize_seq(Some(l.len()))?;
                for element in l {
                    seq.serialize_element(&hex::encode(element))?;
                }
                seq.end()
            }
            Simplified::Opaque { tag, size } => {
                let mut map = serializer.serialize_map(Some(2))?;
                map.serialize_entry("tag", tag)?;
                map.serialize_entry("size", size)?;
                map.end()
            }
        }
    }
}
