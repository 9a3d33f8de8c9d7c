//! OS-9 module scan over the `cdi_` program files.
//!
//! A program file is a run of OS-9 modules packed back to back:
//!
//! ```text
//! +0   u16  sync word 0x4AFC
//! +4   u32  module size, header included
//! +12  u32  offset of the NUL-terminated module name, inside the module
//! ```
//!
//! The scan stops at the first position without a sync word, or at a module
//! whose name offset is not inside the module; whatever follows is kept as
//! unused bytes.
//!
//! Module names must be unique across the disc.  When a name repeats, both
//! the first holder and every later one are renamed `<file>:<name>`.

use std::collections::HashSet;
use std::ops::Range;

use indexmap::IndexMap;
use tracing::{debug, warn};

use crate::batch::ItemFailure;
use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result, Violation};

pub const MODULE_SYNC:   u16  = 0x4AFC;
pub const MODULE_PREFIX: &str = "cdi_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Module {
    /// Name as stored in the module header.
    pub name:        String,
    pub parent_file: String,
    /// Byte range of the whole module within its file.
    pub range:       Range<usize>,
}

impl Module {
    pub fn bytes<'b>(&self, file_bytes: &'b [u8]) -> &'b [u8] {
        &file_bytes[self.range.clone()]
    }
}

/// Modules found in one file, in file order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileModules {
    pub modules: Vec<(String, Range<usize>)>,
    /// Bytes after the last module.
    pub unused:  Range<usize>,
}

/// Splits one program file into modules.
pub fn scan_file(bytes: &[u8]) -> Result<FileModules> {
    let mut c = ByteCursor::big_endian(bytes);
    if c.peek_u16()? != MODULE_SYNC {
        return Err(DecodeError::malformed(0, Violation::MissingModuleSync));
    }

    let mut modules = Vec::new();
    while c.remaining() >= 2 && c.peek_u16()? == MODULE_SYNC {
        let start   = c.position();
        let size    = c.fork(4).peek_u32()? as usize;
        let pointer = c.fork(12).peek_u32()? as usize;
        if pointer >= size {
            warn!(offset = start, pointer, size, "module name pointer outside module; stopping scan");
            break;
        }
        let module = c.take_fork(size)?;
        let name = String::from_utf8_lossy(module.fork(pointer).peek_cstr()).into_owned();
        debug!(%name, offset = start, size, "module");
        modules.push((name, start..start + size));
    }

    let unused = c.position()..bytes.len();
    Ok(FileModules { modules, unused })
}

/// Every module on the disc, keyed by unique name.
#[derive(Debug, Default)]
pub struct ModuleTable {
    pub modules:  IndexMap<String, Module>,
    /// `(old key, new key)` for every module renamed to resolve a clash.
    pub renamed:  Vec<(String, String)>,
    /// Trailing unused bytes per file, where there are any.
    pub unused:   IndexMap<String, Range<usize>>,
    pub failures: Vec<ItemFailure>,
}

impl ModuleTable {
    /// Scans `(file name, file bytes)` pairs; files without the `cdi_`
    /// prefix are ignored.
    pub fn scan<'b>(files: impl IntoIterator<Item = (&'b str, &'b [u8])>) -> Self {
        let mut table = Self::default();
        let mut clashing: HashSet<String> = HashSet::new();

        for (file, bytes) in files {
            if !file.starts_with(MODULE_PREFIX) {
                continue;
            }
            let found = match scan_file(bytes) {
                Ok(found) => found,
                Err(error) => {
                    warn!(%file, %error, "module scan failed");
                    table.failures.push(ItemFailure::new(file, error));
                    continue;
                }
            };
            if !found.unused.is_empty() {
                table.unused.insert(file.to_string(), found.unused);
            }
            for (name, range) in found.modules {
                let key = if clashing.contains(&name) {
                    qualified(file, &name)
                } else if let Some(first) = table.modules.shift_remove(&name) {
                    warn!(%name, first = %first.parent_file, second = %file, "duplicate module name");
                    let moved = qualified(&first.parent_file, &name);
                    table.renamed.push((name.clone(), moved.clone()));
                    table.insert_unique(moved, first);
                    clashing.insert(name.clone());
                    qualified(file, &name)
                } else {
                    name.clone()
                };
                let module = Module { name, parent_file: file.to_string(), range };
                table.insert_unique(key, module);
            }
        }
        table
    }

    /// Inserts under `key`, suffixing `#2`, `#3`... if a file repeats a name.
    fn insert_unique(&mut self, key: String, module: Module) {
        let mut candidate = key.clone();
        let mut n = 2;
        while self.modules.contains_key(&candidate) {
            candidate = format!("{key}#{n}");
            n += 1;
        }
        if candidate != key {
            warn!(%key, %candidate, "module name repeats within one file");
            self.renamed.push((key, candidate.clone()));
        }
        self.modules.insert(candidate, module);
    }

    pub fn get(&self, key: &str) -> Option<&Module> {
        self.modules.get(key)
    }

    pub fn len(&self) -> usize { self.modules.len() }

    pub fn is_empty(&self) -> bool { self.modules.is_empty() }
}

fn qualified(file: &str, name: &str) -> String {
    format!("{file}:{name}")
}
