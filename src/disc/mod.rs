//! Logical filesystem over a sector capture.
//!
//! The disc label names the block size and the path table address; the root
//! directory sits `directory_bias` blocks after that address.  Each directory
//! entry becomes a [`DiscFile`]: the run of `ceil(size / block_size)` sectors
//! starting at its start block, with the last block cut to the file size.
//!
//! Files whose block run is not fully captured are recorded as failures and
//! left out; the rest of the disc stays readable.

pub mod directory;
pub mod modules;
pub mod volume;

use std::sync::OnceLock;

use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::batch::ItemFailure;
use crate::error::{DecodeError, Result};
use crate::image::SectorStore;
use crate::sector::{Sector, TimeCode};

pub use directory::{Directory, DirectoryRecord, FileAttributes, RecordingTime};
pub use modules::{Module, ModuleTable};
pub use volume::VolumeDescriptor;

/// Where to find the disc label and root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscOptions {
    /// Address of the first disc label sector.
    pub volume_address:    TimeCode,
    /// Blocks between the declared path table address and the directory.
    pub directory_bias:    usize,
    /// System identifier the label must carry, before space padding.
    pub system_identifier: String,
}

impl Default for DiscOptions {
    fn default() -> Self {
        Self {
            volume_address:    TimeCode::new(0, 2, 16),
            directory_bias:    1,
            system_identifier: "CD-RTOS".into(),
        }
    }
}

/// One named file: its directory record, its sectors, and its bytes.
#[derive(Debug)]
pub struct DiscFile<'a> {
    pub record: DirectoryRecord,
    sectors:    Vec<Sector<'a>>,
    blocks:     Vec<&'a [u8]>,
    bytes:      OnceLock<Vec<u8>>,
}

impl<'a> DiscFile<'a> {
    fn new(record: DirectoryRecord, sectors: &[Sector<'a>], block_size: usize) -> Self {
        let mut blocks: Vec<&'a [u8]> = sectors.iter().map(|s| s.payload).collect();
        let tail = record.size as usize % block_size;
        if let Some(last) = blocks.last_mut().filter(|_| tail != 0) {
            let full: &'a [u8] = *last;
            *last = &full[..tail.min(full.len())];
        }
        Self { record, sectors: sectors.to_vec(), blocks, bytes: OnceLock::new() }
    }

    pub fn name(&self) -> &str { &self.record.name }

    pub fn size(&self) -> usize { self.record.size as usize }

    pub fn start_block(&self) -> usize { self.record.start_block as usize }

    pub fn sectors(&self) -> &[Sector<'a>] { &self.sectors }

    /// Per-sector payloads, the last one cut to the file size.
    pub fn blocks(&self) -> &[&'a [u8]] { &self.blocks }

    /// Concatenated payloads, built on first use.
    pub fn bytes(&self) -> &[u8] {
        self.bytes.get_or_init(|| self.blocks.concat())
    }
}

#[derive(Debug)]
pub struct DiscFileSystem<'a> {
    store:     SectorStore<'a>,
    volume:    VolumeDescriptor,
    directory: Directory,
    files:     IndexMap<String, DiscFile<'a>>,
    failures:  Vec<ItemFailure>,
}

impl<'a> DiscFileSystem<'a> {
    /// Reads the disc label and root directory.  A bad label or directory
    /// fails the whole image; a bad file entry only fails that file.
    pub fn open(store: SectorStore<'a>, opts: &DiscOptions) -> Result<Self> {
        let volume = VolumeDescriptor::read(&store, opts)?;

        let dir_block = volume.path_table_address as usize + opts.directory_bias;
        let dir_sector = store.get(dir_block).ok_or(DecodeError::BlockNotCaptured {
            block:     dir_block,
            available: store.len(),
        })?;
        let directory = Directory::parse(dir_sector.payload)?;
        debug!(block = dir_block, entries = directory.entries.len(), "root directory");

        let block_size = volume.block_size as usize;
        let mut files = IndexMap::new();
        let mut failures = Vec::new();
        for feature in &directory.rejected {
            let name = feature.file_name().unwrap_or_default().to_string();
            let error = DecodeError::from(feature.clone());
            warn!(%error, "skipping file");
            failures.push(ItemFailure::new(&name, error));
        }
        for record in &directory.entries {
            let start = record.start_block as usize;
            let end   = start + (record.size as usize).div_ceil(block_size);
            match store.sectors().get(start..end) {
                Some(sectors) => {
                    let file = DiscFile::new(record.clone(), sectors, block_size);
                    if let Some(old) = files.insert(record.name.clone(), file) {
                        warn!(name = %old.name(), "duplicate directory entry; keeping the later one");
                    }
                }
                None => {
                    let error = DecodeError::FileOutsideCapture {
                        name:      record.name.clone(),
                        start,
                        end,
                        available: store.len(),
                    };
                    warn!(%error, "skipping file");
                    failures.push(ItemFailure::new(&record.name, error));
                }
            }
        }

        info!(volume = %volume.volume_name, files = files.len(), failed = failures.len(), "opened disc filesystem");
        Ok(Self { store, volume, directory, files, failures })
    }

    pub fn volume(&self) -> &VolumeDescriptor { &self.volume }

    pub fn directory(&self) -> &Directory { &self.directory }

    pub fn store(&self) -> &SectorStore<'a> { &self.store }

    /// Files in directory order.
    pub fn files(&self) -> impl Iterator<Item = &DiscFile<'a>> {
        self.files.values()
    }

    pub fn file_names(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize { self.files.len() }

    pub fn is_empty(&self) -> bool { self.files.is_empty() }

    pub fn file(&self, name: &str) -> Result<&DiscFile<'a>> {
        self.files.get(name).ok_or_else(|| DecodeError::FileNotFound(name.to_string()))
    }

    /// Directory entries that could not be turned into files.
    pub fn failures(&self) -> &[ItemFailure] { &self.failures }

    /// Scans every `cdi_` file for OS-9 modules.
    pub fn modules(&self) -> ModuleTable {
        ModuleTable::scan(self.files().map(|f| (f.name(), f.bytes())))
    }
}
