//! Reader for CD-I disc captures and the resource-tree containers stored on
//! them.
//!
//! Layers, lowest first:
//!
//! | Module | Role |
//! |--------|------|
//! | [`cursor`] | bounds-checked big/little-endian reads and local frames |
//! | [`sector`] | time codes, subheaders, Mode 1 / Mode 2 sectors |
//! | [`image`] | capture file → ordered sector store |
//! | [`disc`] | disc label, root directory, named files, OS-9 modules |
//! | [`resource`] | resource trees, pointer arrays, resource file systems |
//! | [`batch`] | whole-disc decodes that isolate per-item failures |

pub mod batch;
pub mod cursor;
pub mod disc;
pub mod error;
pub mod image;
pub mod resource;
pub mod sector;

pub use batch::{BatchReport, ItemFailure};
pub use cursor::{ByteCursor, Endian, Frame};
pub use disc::{DiscFile, DiscFileSystem, DiscOptions, ModuleTable, VolumeDescriptor};
pub use error::{DecodeError, Result, SectorFault, Unsupported, Violation};
pub use image::{DiscImage, SectorStore};
pub use resource::{
    Folder, Key, MediaKind, PointerArray, PointerTree, ResourceFileSystem, ResourceTree, Simplified,
    TreeDecodePolicy,
};
pub use sector::{PayloadKind, Sector, TimeCode};
