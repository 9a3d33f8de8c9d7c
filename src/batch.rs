//! Per-item failure isolation for whole-disc decodes.
//!
//! A batch decode runs one closure per file or folder and never stops at the
//! first error: every failure is recorded next to the item it belongs to and
//! the rest of the batch carries on.
//!
//! # Parallel decoding
//!
//! With the `parallel` feature the items are decoded on the Rayon pool.
//! Nothing below the disc image is mutated after loading (record caches are
//! lock-guarded), so items are independent.  Results are returned in input
//! order either way.

use std::fmt;

use tracing::warn;

use crate::disc::{DiscFile, DiscFileSystem};
use crate::error::{DecodeError, Result};
use crate::resource::{Folder, ResourceFileSystem};

/// One item that failed, and why.
#[derive(Debug)]
pub struct ItemFailure {
    /// File name, folder name, or module file name.
    pub item:  String,
    pub error: DecodeError,
}

impl ItemFailure {
    pub fn new(item: &str, error: DecodeError) -> Self {
        Self { item: item.to_string(), error }
    }
}

impl fmt::Display for ItemFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.item, self.error)
    }
}

/// Outcome of a batch decode: what succeeded, and what failed.
#[derive(Debug)]
pub struct BatchReport<T> {
    /// `(item, value)` in input order.
    pub decoded:  Vec<(String, T)>,
    /// In input order.
    pub failures: Vec<ItemFailure>,
}

impl<T> Default for BatchReport<T> {
    fn default() -> Self {
        Self { decoded: Vec::new(), failures: Vec::new() }
    }
}

impl<T> BatchReport<T> {
    pub fn total(&self) -> usize {
        self.decoded.len() + self.failures.len()
    }

    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Summary line for display.
    pub fn summary(&self) -> String {
        format!(
            "{}/{} item(s) decoded, {} failed",
            self.decoded.len(),
            self.total(),
            self.failures.len(),
        )
    }
}

/// Runs `decode` on every item, labelling each with `label`.
pub fn decode_all<I, T, L, F>(items: &[I], label: L, decode: F) -> BatchReport<T>
where
    I: Sync,
    T: Send,
    L: Fn(&I) -> String + Sync,
    F: Fn(&I) -> Result<T> + Sync,
{
    #[cfg(feature = "parallel")]
    let results: Vec<(String, Result<T>)> = {
        use rayon::prelude::*;

        items.par_iter().map(|item| (label(item), decode(item))).collect()
    };

    #[cfg(not(feature = "parallel"))]
    let results: Vec<(String, Result<T>)> = items
        .iter()
        .map(|item| (label(item), decode(item)))
        .collect();

    let mut report = BatchReport::default();
    for (item, result) in results {
        match result {
            Ok(value) => report.decoded.push((item, value)),
            Err(error) => {
                warn!(%item, %error, "item failed");
                report.failures.push(ItemFailure { item, error });
            }
        }
    }
    report
}

/// Decodes every file of the disc, in directory order.
pub fn decode_files<'a, T, F>(disc: &DiscFileSystem<'a>, decode: F) -> BatchReport<T>
where
    T: Send,
    F: Fn(&DiscFile<'a>) -> Result<T> + Sync,
{
    let files: Vec<&DiscFile<'a>> = disc.files().collect();
    decode_all(&files, |f| f.name().to_string(), |f| decode(*f))
}

/// Decodes every folder of a resource file system, in block order.
pub fn decode_folders<'a, T, F>(rfs: &ResourceFileSystem<'a>, decode: F) -> BatchReport<T>
where
    T: Send,
    F: Fn(&Folder<'a>) -> Result<T> + Sync,
{
    let folders: Vec<&Folder<'a>> = rfs.sorted().collect();
    decode_all(&folders, |f| f.name.to_string(), |f| decode(*f))
}
