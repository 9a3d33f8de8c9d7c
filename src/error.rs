//! Error taxonomy shared by every decoding layer.
//!
//! Low-level cursor and offset violations surface as typed errors rather
//! than being clamped.  Two conditions that look like errors are *not*
//! represented here:
//!
//! - Unknown resource-tree tags decode to [`crate::resource::ResourceTree::Unknown`].
//! - Duplicate module names are qualified with their parent file name
//!   (see [`crate::disc::modules`]).

use std::io;
use thiserror::Error;

use crate::resource::MediaKind;
use crate::sector::TimeCode;

pub type Result<T> = std::result::Result<T, DecodeError>;

#[derive(Error, Debug)]
pub enum DecodeError {
    /// A read ran past the end of its buffer.  `offset` is absolute within
    /// the backing buffer.
    #[error("read of {wanted} byte(s) at offset {offset:#x} runs past the end of the buffer ({available} available)")]
    Truncated { offset: usize, wanted: usize, available: usize },

    /// A resource-tree (or pointer-array) invariant was violated.
    #[error("malformed container at offset {offset:#x}: {violation}")]
    MalformedContainer { offset: usize, violation: Violation },

    #[error("unsupported feature: {0}")]
    UnsupportedFeature(#[from] Unsupported),

    #[error("sector {address}: {fault}")]
    InvalidSector { address: TimeCode, fault: SectorFault },

    /// A directory record consumed a different number of bytes than its
    /// length byte declared.
    #[error("directory record at offset {offset:#x} declares {declared} byte(s) but {consumed} were parsed")]
    RecordLengthMismatch { offset: usize, declared: usize, consumed: usize },

    #[error("invalid volume descriptor: {0}")]
    InvalidVolume(String),

    #[error("file not found: {0}")]
    FileNotFound(String),

    #[error("folder not found: {0}")]
    FolderNotFound(String),

    #[error("folder {folder} has no {kind} record {index} ({available} available)")]
    RecordNotFound { folder: String, kind: MediaKind, index: usize, available: usize },

    #[error("folder {folder} {kind} record {index} needs sectors {start}..{end} but only {available} are present")]
    RecordOutOfRange {
        folder:    String,
        kind:      MediaKind,
        index:     usize,
        start:     usize,
        end:       usize,
        available: usize,
    },

    #[error("sector {0} is not present in the image")]
    SectorNotFound(TimeCode),

    #[error("block {block} is not present in the image ({available} sectors captured)")]
    BlockNotCaptured { block: usize, available: usize },

    #[error("file {name:?} needs blocks {start}..{end} but only {available} sectors were captured")]
    FileOutsideCapture { name: String, start: usize, end: usize, available: usize },

    #[error("image metadata: {0}")]
    Metadata(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    pub(crate) fn malformed(offset: usize, violation: Violation) -> Self {
        DecodeError::MalformedContainer { offset, violation }
    }
}

/// The specific invariant a malformed container broke.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    #[error("expected tag {expected}, found {found}")]
    UnexpectedTag { expected: u32, found: u32 },
    #[error("offset {offset:#x} lies outside a {frame_len}-byte frame")]
    OffsetOutOfFrame { offset: usize, frame_len: usize },
    #[error("element spans {start:#x}..{end:#x}, past the {frame_len}-byte frame")]
    ElementOutOfFrame { start: usize, end: usize, frame_len: usize },
    #[error("inferred length is negative (offset {start:#x} followed by {end:#x})")]
    NegativeLength { start: usize, end: usize },
    #[error("{names} name(s) for {children} child(ren)")]
    NameCountMismatch { names: usize, children: usize },
    #[error("duplicate child name {0:?}")]
    DuplicateName(String),
    #[error("name is not ASCII")]
    NonAsciiName,
    #[error("element count {count} x stride {stride} overflows")]
    SizeOverflow { count: u32, stride: u32 },
    #[error("required child {0:?} is missing")]
    MissingChild(&'static str),
    #[error("child {0:?} has no elements")]
    EmptyChild(&'static str),
    #[error("missing OS-9 module sync word")]
    MissingModuleSync,
    #[error("nesting deeper than {0} levels")]
    DepthLimit(usize),
    #[error("{count} zero-length element(s) in a {frame_len}-byte frame")]
    ZeroStride { count: u32, frame_len: usize },
    #[error("element offset {start:#x} past list offset {list:#x} overflows")]
    OffsetOverflow { list: usize, start: usize },
}

/// Format features the disc format allows but this reader refuses to guess at.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Unsupported {
    #[error("nested directory {0:?}")]
    NestedDirectory(String),
    #[error("interleaved file {name:?} (ratio {ratio:?})")]
    Interleaved { name: String, ratio: [u8; 2] },
    #[error("extended attributes ({length} block(s)) on {name:?}")]
    ExtendedAttributes { name: String, length: u8 },
    #[error("non-default character set")]
    CharacterSet,
    #[error("multi-volume album ({0} volumes)")]
    MultiVolume(u16),
    #[error("disc label spans {0} sector(s)")]
    LabelSectors(usize),
    #[error("system identifier {0:?}")]
    SystemIdentifier(String),
}

impl Unsupported {
    /// The directory entry the feature was found on, if it belongs to one.
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Unsupported::NestedDirectory(name)
            | Unsupported::Interleaved { name, .. }
            | Unsupported::ExtendedAttributes { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Reasons a single captured sector could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectorFault {
    #[error("the two subheader copies differ ({first:02x?} vs {second:02x?})")]
    SubheaderMismatch { first: [u8; 4], second: [u8; 4] },
    #[error("submode {0:#04x} sets more than one payload kind")]
    ConflictingKind(u8),
    #[error("form {form} payload needs {wanted} bytes but {available} were captured")]
    ShortPayload { form: u8, wanted: usize, available: usize },
    #[error("unknown sector mode {0:?}")]
    UnknownMode(String),
    #[error("data range {offset}+{length} lies outside a {blob_len}-byte blob")]
    OutsideBlob { offset: u64, length: u64, blob_len: usize },
    #[error("coding byte {0:#04x} sets a reserved audio bit")]
    ReservedCoding(u8),
    #[error("mode 1 sectors carry no subheader")]
    NoSubheader,
}
