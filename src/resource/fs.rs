//! Resource file systems: a resource-tree map that carves a payload file's
//! sectors into named folders of video, audio and data records.
//!
//! # Map layout
//!
//! The map is a Node with these children:
//!
//! | Key | Kind | Contents |
//! |-----|------|----------|
//! | `r` | Set (required) | one folder descriptor per folder |
//! | `l` | Set | folder names, NUL-terminated ASCII, paired with `r` by position |
//! | `v`, `a`, `d` | Array of one blob | per-record sector counts for video, audio and data records, one byte each |
//!
//! A folder descriptor is big-endian `u16 channel, u32 block offset`, then,
//! when six more bytes follow, `u16` start indices into the `v`, `a` and `d`
//! tables (`0xFFFF` = no records of that kind).
//!
//! # Boundaries
//!
//! Folder boundaries are not stored.  Folders are sorted by block offset; each
//! one owns the payload sectors up to the next folder's block offset, and the
//! last one owns the rest of the file.  The same order slices the size tables:
//! a folder's records run from its own start index to the next real start
//! index of a later folder, or to the end of the table.

use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, Mutex, PoisonError};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::cursor::ByteCursor;
use crate::disc::DiscFileSystem;
use crate::error::{DecodeError, Result, Violation};
use crate::resource::tree::{read_name, Key, ResourceTree};
use crate::sector::{PayloadKind, Sector};

/// Size-table start index meaning "no records of this kind".
pub const NO_RECORDS: u16 = 0xFFFF;

/// Descriptor bytes when the three size indices are present.
pub const DESCRIPTOR_LEN: usize = 12;

// ── MediaKind ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Video,
    Audio,
    Data,
}

impl MediaKind {
    pub const ALL: [MediaKind; 3] = [MediaKind::Video, MediaKind::Audio, MediaKind::Data];

    /// Map key of this kind's size table.
    pub fn key(self) -> &'static str {
        match self {
            MediaKind::Video => "v",
            MediaKind::Audio => "a",
            MediaKind::Data  => "d",
        }
    }

    pub fn payload_kind(self) -> PayloadKind {
        match self {
            MediaKind::Video => PayloadKind::Video,
            MediaKind::Audio => PayloadKind::Audio,
            MediaKind::Data  => PayloadKind::Data,
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.payload_kind(), f)
    }
}

impl std::str::FromStr for MediaKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "v" | "video" => Ok(MediaKind::Video),
            "a" | "audio" => Ok(MediaKind::Audio),
            "d" | "data"  => Ok(MediaKind::Data),
            other => Err(format!("unknown media kind {other:?} (expected video, audio or data)")),
        }
    }
}

// ── Size tables ───────────────────────────────────────────────────────────────

/// Slices a shared size table among folders given in block order.
///
/// `starts[i]` is folder `i`'s start index, `None` for no records.  Folder
/// `i` ends at the first later folder with a start index, or at `table_len`.
/// Indices past the table are clamped, and an end before its start yields an
/// empty range; both are logged.
pub fn slice_size_table(starts: &[Option<u16>], table_len: usize) -> Vec<Range<usize>> {
    starts
        .iter()
        .enumerate()
        .map(|(i, start)| {
            let Some(start) = start.map(usize::from) else {
                return 0..0;
            };
            let end = starts[i + 1..]
                .iter()
                .find_map(|s| s.map(usize::from))
                .unwrap_or(table_len);
            if end < start || end > table_len {
                warn!(folder = i, start, end, table_len, "size table range clamped");
            }
            let start = start.min(table_len);
            start..end.clamp(start, table_len)
        })
        .collect()
}

// ── Folder ────────────────────────────────────────────────────────────────────

/// One folder of a resource file system.
#[derive(Debug)]
pub struct Folder<'a> {
    pub name:         Key,
    pub channel:      u16,
    /// First sector, relative to the payload file.
    pub block_offset: u32,
    /// The folder that follows this one in block order.
    pub next:         Option<Key>,
    /// Sector range within the payload file.
    pub sector_range: Range<usize>,
    /// `v`, `a`, `d` start indices; `None` for short descriptors.
    pub size_indices: Option<[u16; 3]>,
    sectors:          Vec<Sector<'a>>,
    sizes:            [Vec<u8>; 3],
    records:          Mutex<HashMap<(MediaKind, usize), Arc<[u8]>>>,
}

impl<'a> Folder<'a> {
    fn parse(name: Key, mut c: ByteCursor<'_>) -> Result<Self> {
        let channel      = c.take_u16()?;
        let block_offset = c.take_u32()?;
        let size_indices = if c.len() == DESCRIPTOR_LEN {
            Some([c.take_u16()?, c.take_u16()?, c.take_u16()?])
        } else {
            warn!(folder = %name, length = c.len(), "folder descriptor has no size indices");
            None
        };
        Ok(Self {
            name,
            channel,
            block_offset,
            next:         None,
            sector_range: 0..0,
            size_indices,
            sectors:      Vec::new(),
            sizes:        Default::default(),
            records:      Mutex::new(HashMap::new()),
        })
    }

    pub fn sectors(&self) -> &[Sector<'a>] { &self.sectors }

    fn size_index(&self, kind: MediaKind) -> Option<u16> {
        self.size_indices
            .map(|indices| indices[kind.slot()])
            .filter(|&index| index != NO_RECORDS)
    }

    /// Per-record sector counts for `kind`.
    pub fn sizes(&self, kind: MediaKind) -> &[u8] {
        &self.sizes[kind.slot()]
    }

    pub fn record_count(&self, kind: MediaKind) -> usize {
        self.sizes(kind).len()
    }

    /// Sectors of one kind, or all sectors for `None`.
    pub fn sectors_of(&self, kind: Option<MediaKind>) -> impl Iterator<Item = &Sector<'a>> {
        self.sectors
            .iter()
            .filter(move |s| kind.map_or(true, |k| s.kind() == Some(k.payload_kind())))
    }

    /// Concatenated payloads of sectors `range` of the (optionally
    /// kind-filtered) sector list.  The range is clamped to what exists.
    pub fn bytes(&self, range: Range<usize>, kind: Option<MediaKind>) -> Vec<u8> {
        let count = range.end.saturating_sub(range.start);
        self.sectors_of(kind)
            .skip(range.start)
            .take(count)
            .flat_map(|s| s.payload.iter().copied())
            .collect()
    }

    /// Every payload byte of the folder.
    pub fn all_bytes(&self) -> Vec<u8> {
        self.bytes(0..self.sectors.len(), None)
    }

    /// Record `index` of `kind`: its sectors follow the sectors of the
    /// records before it, counting only sectors of that kind.  Each record is
    /// assembled once and then served from the folder's cache.
    pub fn record(&self, index: usize, kind: MediaKind) -> Result<Arc<[u8]>> {
        let mut cache = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(hit) = cache.get(&(kind, index)) {
            return Ok(Arc::clone(hit));
        }

        let sizes = self.sizes(kind);
        let count = *sizes.get(index).ok_or_else(|| DecodeError::RecordNotFound {
            folder:    self.name.to_string(),
            kind,
            index,
            available: sizes.len(),
        })? as usize;
        let start: usize = sizes[..index].iter().map(|&s| usize::from(s)).sum();
        let end = start + count;
        let available = self.sectors_of(Some(kind)).count();
        if end > available {
            return Err(DecodeError::RecordOutOfRange {
                folder: self.name.to_string(),
                kind,
                index,
                start,
                end,
                available,
            });
        }

        let data: Arc<[u8]> = self.bytes(start..end, Some(kind)).into();
        debug!(folder = %self.name, %kind, index, sectors = count, bytes = data.len(), "record");
        cache.insert((kind, index), Arc::clone(&data));
        Ok(data)
    }
}

// ── ResourceFileSystem ────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ResourceFileSystem<'a> {
    /// Folders in map order.
    folders: IndexMap<Key, Folder<'a>>,
    /// Folder keys in block order.
    sorted:  Vec<Key>,
}

impl<'a> ResourceFileSystem<'a> {
    /// Decodes the map in `map` and carves `payload` (the payload file's
    /// sectors) into folders.
    pub fn parse(map: ByteCursor<'_>, payload: &[Sector<'a>]) -> Result<Self> {
        let tree = ResourceTree::decode(map)?;
        Self::from_tree(&tree, payload)
    }

    pub fn from_tree(root: &ResourceTree<'_>, payload: &[Sector<'a>]) -> Result<Self> {
        let offset = root.offset();
        let descriptors = root
            .child("r")
            .and_then(ResourceTree::elements)
            .ok_or_else(|| DecodeError::malformed(offset, Violation::MissingChild("r")))?;

        let names: Vec<Key> = match root.child("l") {
            Some(labels) => {
                let labels = labels.elements().unwrap_or_default();
                if labels.len() != descriptors.len() {
                    return Err(DecodeError::malformed(offset, Violation::NameCountMismatch {
                        names:    labels.len(),
                        children: descriptors.len(),
                    }));
                }
                labels.iter().map(read_name).collect::<Result<_>>()?
            }
            None => (0..descriptors.len()).map(Key::Index).collect(),
        };

        let mut folders = IndexMap::with_capacity(names.len());
        for (name, descriptor) in names.into_iter().zip(descriptors) {
            let folder = Folder::parse(name.clone(), *descriptor)?;
            if folders.insert(name.clone(), folder).is_some() {
                return Err(DecodeError::malformed(offset, Violation::DuplicateName(name.to_string())));
            }
        }

        let mut sorted: Vec<Key> = folders.keys().cloned().collect();
        sorted.sort_by_key(|k| folders.get(k).map_or(0, |f| f.block_offset));

        let total = payload.len();
        for (i, key) in sorted.iter().enumerate() {
            let next = sorted.get(i + 1);
            let end = next
                .and_then(|k| folders.get(k))
                .map_or(total, |n| n.block_offset as usize);
            if let Some(folder) = folders.get_mut(key) {
                let start = folder.block_offset as usize;
                if start > total {
                    warn!(folder = %key, start, total, "folder starts past the payload file");
                }
                let range = start.min(total)..end.min(total);
                folder.sectors = payload[range.clone()].to_vec();
                folder.sector_range = range;
                folder.next = next.cloned();
            }
        }

        for kind in MediaKind::ALL {
            let Some(table) = root.child(kind.key()) else { continue };
            let blob = table
                .elements()
                .and_then(|e| e.first())
                .ok_or_else(|| DecodeError::malformed(table.offset(), Violation::EmptyChild(kind.key())))?;
            let sizes = blob.as_slice();
            let starts: Vec<Option<u16>> = sorted
                .iter()
                .map(|k| folders.get(k).and_then(|f| f.size_index(kind)))
                .collect();
            for (key, range) in sorted.iter().zip(slice_size_table(&starts, sizes.len())) {
                if let Some(folder) = folders.get_mut(key) {
                    folder.sizes[kind.slot()] = sizes[range].to_vec();
                }
            }
        }

        info!(folders = folders.len(), sectors = total, "resource file system");
        Ok(Self { folders, sorted })
    }

    /// Reads `map_name` (e.g. `zelda.mapres`) as the map for the sectors of
    /// `payload_name` (e.g. `zelda.rtf`).
    pub fn open(disc: &DiscFileSystem<'a>, map_name: &str, payload_name: &str) -> Result<Self> {
        let map = disc.file(map_name)?;
        let payload = disc.file(payload_name)?;
        Self::parse(ByteCursor::big_endian(map.bytes()), payload.sectors())
    }

    /// Reads the whole of `folder` in `parent` as the map for `payload_name`;
    /// the main map's `omap` folder, for one, maps `over.rtf`.
    pub fn nested(
        parent:       &ResourceFileSystem<'_>,
        folder:       &str,
        disc:         &DiscFileSystem<'a>,
        payload_name: &str,
    ) -> Result<Self> {
        let map = parent.lookup(folder)?.all_bytes();
        let payload = disc.file(payload_name)?;
        Self::parse(ByteCursor::big_endian(&map), payload.sectors())
    }

    pub fn folder(&self, key: impl Into<Key>) -> Result<&Folder<'a>> {
        let key = key.into();
        self.folders.get(&key).ok_or_else(|| DecodeError::FolderNotFound(key.to_string()))
    }

    /// Finds a folder by a typed label: its name, or its index when the map
    /// has no names.
    pub fn lookup(&self, label: &str) -> Result<&Folder<'a>> {
        if let Some(folder) = self.folders.get(&Key::from(label)) {
            return Ok(folder);
        }
        label
            .parse::<usize>()
            .ok()
            .and_then(|i| self.folders.get(&Key::Index(i)))
            .ok_or_else(|| DecodeError::FolderNotFound(label.to_string()))
    }

    /// Folders in map order.
    pub fn folders(&self) -> impl Iterator<Item = &Folder<'a>> {
        self.folders.values()
    }

    /// Folders in block order.
    pub fn sorted(&self) -> impl Iterator<Item = &Folder<'a>> {
        self.sorted.iter().filter_map(|k| self.folders.get(k))
    }

    pub fn len(&self) -> usize { self.folders.len() }

    pub fn is_empty(&self) -> bool { self.folders.is_empty() }

    /// One line per folder in block order: name, channel, sector range and
    /// video/audio/data record counts.
    pub fn summary(&self) -> String {
        self.sorted()
            .map(|f| {
                format!(
                    "{:<12} ch {:>2}  sectors {:>6}..{:<6}  v {:>3}  a {:>3}  d {:>3}\n",
                    f.name.to_string(),
                    f.channel,
                    f.sector_range.start,
                    f.sector_range.end,
                    f.record_count(MediaKind::Video),
                    f.record_count(MediaKind::Audio),
                    f.record_count(MediaKind::Data),
                )
            })
            .collect()
    }
}
