//! Builders for synthetic disc captures and resource maps.
#![allow(dead_code)]

use std::io::Write;

use cdires::resource::tree::{HEADER_LEN, TAG_ARRAY, TAG_NODE, TAG_SET};
use tempfile::NamedTempFile;

pub const BLOCK: usize = 2048;

/// Submode bytes.
pub const EOF:   u8 = 0x80;
pub const DATA:  u8 = 0x08;
pub const AUDIO: u8 = 0x04;
pub const VIDEO: u8 = 0x02;
pub const EOR:   u8 = 0x01;

/// Linear index of 00:02:16, where the captures below begin.
pub const FIRST_INDEX: usize = (2 * 75) + 16;

// ── Sectors ───────────────────────────────────────────────────────────────────

/// A Mode 2 form 1 sector; `payload` is zero-padded to a full block.
pub fn sector(submode: u8, payload: &[u8]) -> Vec<u8> {
    assert!(payload.len() <= BLOCK);
    let sub = [1u8, 0, submode, 0];
    let mut raw = [&sub[..], &sub[..]].concat();
    raw.extend_from_slice(payload);
    raw.resize(8 + BLOCK, 0);
    raw
}

/// Splits `bytes` over data sectors.
pub fn file_sectors(bytes: &[u8]) -> Vec<Vec<u8>> {
    bytes.chunks(BLOCK).map(|chunk| sector(DATA, chunk)).collect()
}

// ── Disc label and directory ──────────────────────────────────────────────────

fn padded(text: &str, width: usize) -> Vec<u8> {
    let mut field = text.as_bytes().to_vec();
    field.resize(width, b' ');
    field
}

pub fn volume_descriptor(path_table_address: u32, volumes_in_album: u16) -> Vec<u8> {
    let mut d = vec![0u8; BLOCK];
    d[0] = 1;
    d[1..6].copy_from_slice(b"CD-I ");
    d[6] = 1;
    d[8..40].copy_from_slice(&padded("CD-RTOS", 32));
    d[40..72].copy_from_slice(&padded("SYNTHETIC", 32));
    d[122..124].copy_from_slice(&volumes_in_album.to_be_bytes());
    d[126..128].copy_from_slice(&1u16.to_be_bytes());
    d[130..132].copy_from_slice(&(BLOCK as u16).to_be_bytes());
    d[136..140].copy_from_slice(&10u32.to_be_bytes());
    d[148..152].copy_from_slice(&path_table_address.to_be_bytes());
    d[881] = 1;
    d
}

pub fn directory_record(name: &[u8], start: u32, size: u32, attributes: u16) -> Vec<u8> {
    let pad = usize::from(name.len() % 2 == 0);
    let len = 33 + name.len() + pad + 10;
    let mut r = vec![len as u8, 0];
    r.extend_from_slice(&start.to_le_bytes());
    r.extend_from_slice(&start.to_be_bytes());
    r.extend_from_slice(&size.to_le_bytes());
    r.extend_from_slice(&size.to_be_bytes());
    r.extend_from_slice(&[93, 11, 2, 10, 0, 0]);
    r.extend_from_slice(&[0, 0, 0, 0]);
    r.extend_from_slice(&[0, 1, 0, 1]);
    r.push(name.len() as u8);
    r.extend_from_slice(name);
    r.extend(std::iter::repeat(0).take(pad));
    r.extend_from_slice(&0u16.to_be_bytes());
    r.extend_from_slice(&0u16.to_be_bytes());
    r.extend_from_slice(&attributes.to_be_bytes());
    r.extend_from_slice(&[0, 0, 0, 0]);
    r
}

/// Self and parent entries followed by `(name, start, size)` files.
pub fn directory(files: &[(&str, u32, u32)]) -> Vec<u8> {
    let mut payload = directory_record(&[0], 2, BLOCK as u32, 0x8000);
    payload.extend(directory_record(&[1], 2, BLOCK as u32, 0x8000));
    for (name, start, size) in files {
        payload.extend(directory_record(name.as_bytes(), *start, *size, 0x0111));
    }
    let used = payload.len() as u32;
    payload[14..18].copy_from_slice(&used.to_be_bytes());
    payload
}

// ── Capture packing ───────────────────────────────────────────────────────────

/// Packs raw sectors, addressed from 00:02:16 on, into a capture file.
pub fn pack(sectors: &[Vec<u8>]) -> Vec<u8> {
    let mut blob = Vec::new();
    let mut meta = Vec::new();
    for (i, raw) in sectors.iter().enumerate() {
        let index = FIRST_INDEX + i;
        meta.push(serde_json::json!({
            "minute": index / 4500,
            "second": index / 75 % 60,
            "frame":  index % 75,
            "mode":   "MODE2",
            "dataOffset": blob.len(),
            "dataLength": raw.len(),
        }));
        blob.extend_from_slice(raw);
    }
    let json = serde_json::to_vec(&serde_json::json!({ "sectors": meta })).unwrap();
    let mut out = Vec::new();
    out.extend_from_slice(&((16 + json.len()) as u64).to_le_bytes());
    out.extend_from_slice(&(json.len() as u64).to_le_bytes());
    out.extend_from_slice(&json);
    out.extend_from_slice(&blob);
    out
}

/// One file of a [`DiscBuilder`] image.
pub struct FileSpec {
    pub name:    String,
    pub size:    u32,
    pub sectors: Vec<Vec<u8>>,
}

/// Lays out label, end-of-file marker, root directory, then the files back
/// to back from block 3.
#[derive(Default)]
pub struct DiscBuilder {
    files:            Vec<FileSpec>,
    /// Directory entries that point past the capture: `(name, size)`.
    missing:          Vec<(String, u32)>,
    /// Subdirectory entries the reader should refuse.
    subdirectories:   Vec<String>,
    volumes_in_album: u16,
}

impl DiscBuilder {
    pub fn new() -> Self {
        Self { volumes_in_album: 1, ..Self::default() }
    }

    pub fn file(mut self, name: &str, bytes: &[u8]) -> Self {
        self.files.push(FileSpec {
            name:    name.to_string(),
            size:    bytes.len() as u32,
            sectors: file_sectors(bytes),
        });
        self
    }

    /// A file made of prepared sectors, sized to fill them.
    pub fn file_of_sectors(mut self, name: &str, sectors: Vec<Vec<u8>>) -> Self {
        self.files.push(FileSpec {
            name:    name.to_string(),
            size:    (sectors.len() * BLOCK) as u32,
            sectors,
        });
        self
    }

    pub fn missing_file(mut self, name: &str, size: u32) -> Self {
        self.missing.push((name.to_string(), size));
        self
    }

    pub fn subdirectory(mut self, name: &str) -> Self {
        self.subdirectories.push(name.to_string());
        self
    }

    pub fn volumes_in_album(mut self, n: u16) -> Self {
        self.volumes_in_album = n;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut entries = Vec::new();
        let mut block = 3u32;
        for f in &self.files {
            entries.push((f.name.as_str(), block, f.size));
            block += f.sectors.len() as u32;
        }
        for (name, size) in &self.missing {
            entries.push((name.as_str(), block + 1000, *size));
        }

        let mut listing = directory(&entries);
        for name in &self.subdirectories {
            listing.extend(directory_record(name.as_bytes(), 2, BLOCK as u32, 0x8000));
        }
        let used = listing.len() as u32;
        listing[14..18].copy_from_slice(&used.to_be_bytes());

        let mut sectors = vec![
            sector(DATA | EOR, &volume_descriptor(1, self.volumes_in_album)),
            sector(DATA | EOF, &[]),
            sector(DATA | EOR, &listing),
        ];
        for f in self.files {
            sectors.extend(f.sectors);
        }
        pack(&sectors)
    }
}

pub fn write_image(bytes: &[u8]) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

// ── Resource trees ────────────────────────────────────────────────────────────

pub fn be(words: &[u32]) -> Vec<u8> {
    words.iter().flat_map(|w| w.to_be_bytes()).collect()
}

/// A Set with its offset table right after the header.
pub fn set<E: AsRef<[u8]>>(elements: &[E]) -> Vec<u8> {
    let n = elements.len() as u32;
    let base = HEADER_LEN as u32;
    let list = base + 4 * n;
    let mut offsets = Vec::new();
    let mut at = 0;
    for e in elements {
        offsets.push(at);
        at += e.as_ref().len() as u32;
    }
    let mut out = be(&[TAG_SET, list + at, n, base, list]);
    out.extend(be(&offsets));
    for e in elements {
        out.extend_from_slice(e.as_ref());
    }
    out
}

/// A one-element Array holding `data`.
pub fn blob(data: &[u8]) -> Vec<u8> {
    let size = (HEADER_LEN + data.len()) as u32;
    let mut out = be(&[TAG_ARRAY, size, 1, data.len() as u32, HEADER_LEN as u32]);
    out.extend_from_slice(data);
    out
}

pub fn labels(names: &[&str]) -> Vec<u8> {
    let cstrs: Vec<Vec<u8>> = names.iter().map(|n| [n.as_bytes(), &[0]].concat()).collect();
    set(&cstrs)
}

/// A named Node.
pub fn node(children: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let names = labels(&children.iter().map(|(n, _)| *n).collect::<Vec<_>>());
    let kids = set(&children.iter().map(|(_, c)| c.as_slice()).collect::<Vec<_>>());
    let name_at = HEADER_LEN as u32;
    let child_at = name_at + names.len() as u32;
    let size = child_at + kids.len() as u32;
    let mut out = be(&[TAG_NODE, size, children.len() as u32, name_at, child_at]);
    out.extend(names);
    out.extend(kids);
    out
}

pub fn folder_descriptor(channel: u16, block: u32, indices: [u16; 3]) -> Vec<u8> {
    let mut d = channel.to_be_bytes().to_vec();
    d.extend_from_slice(&block.to_be_bytes());
    for i in indices {
        d.extend_from_slice(&i.to_be_bytes());
    }
    d
}

/// A resource map over named folders: `(name, channel, block, v/a/d start
/// indices)`, with optional `v`, `a`, `d` size tables.
pub fn resource_map(
    folders: &[(&str, u16, u32, [u16; 3])],
    tables:  &[(&str, Vec<u8>)],
) -> Vec<u8> {
    let names: Vec<&str> = folders.iter().map(|f| f.0).collect();
    let descriptors: Vec<Vec<u8>> = folders
        .iter()
        .map(|&(_, channel, block, indices)| folder_descriptor(channel, block, indices))
        .collect();
    let mut children = vec![("l", labels(&names)), ("r", set(&descriptors))];
    for (key, sizes) in tables {
        children.push((*key, blob(sizes)));
    }
    node(&children)
}

/// Big-endian PointerArray.
pub fn pointer_array<E: AsRef<[u8]>>(trailing: u32, elements: &[E]) -> Vec<u8> {
    let mut out = be(&[elements.len() as u32, trailing]);
    let mut at = 0u32;
    for e in elements {
        out.extend_from_slice(&at.to_be_bytes());
        at += e.as_ref().len() as u32;
    }
    for e in elements {
        out.extend_from_slice(e.as_ref());
    }
    out
}
