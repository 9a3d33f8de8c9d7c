//! The resource-tree container format and what is built on it.
//!
//! - [`tree`]: the tagged Node / Array / Set decoder.
//! - [`pointer_array`]: offset-delimited lists inside leaf blobs.
//! - [`fs`]: folders of records carved out of a payload file by a map tree.

pub mod fs;
pub mod pointer_array;
pub mod tree;

pub use fs::{slice_size_table, Folder, MediaKind, ResourceFileSystem};
pub use pointer_array::{PointerArray, PointerTree, SPRITE_TREE_DEPTH};
pub use tree::{Key, ResourceTree, Simplified, SkippedSubtree, TreeDecode, TreeDecodePolicy};
