//! Disc-image capture parsing.
//!
//! # Capture layout
//!
//! ```text
//! [0..8)    blob offset          (u64 LE, from the start of the file)
//! [8..16)   metadata length      (u64 LE)
//! [16..)    UTF-8 JSON metadata  {"sectors": [{minute, second, frame,
//!                                  mode, dataOffset, dataLength}, ...]}
//! [blob..)  raw sector data, addressed by dataOffset/dataLength
//! ```
//!
//! The capture may start anywhere up to the volume descriptor, so sector
//! lookup by time code is relative to the first captured sector.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result, SectorFault};
use crate::sector::{RecordingMode, Sector, TimeCode};

pub const HEADER_LEN: usize = 16;

#[derive(Debug, Deserialize)]
struct CaptureMetadata {
    sectors: Vec<SectorEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SectorEntry {
    minute:      u8,
    second:      u8,
    frame:       u8,
    mode:        String,
    data_offset: u64,
    data_length: u64,
}

impl SectorEntry {
    fn address(&self) -> TimeCode {
        TimeCode::new(self.minute, self.second, self.frame)
    }

    fn decode<'a>(&self, blob: &'a [u8]) -> Result<Sector<'a>> {
        let address = self.address();
        let invalid = |fault| DecodeError::InvalidSector { address, fault };
        let mode: RecordingMode = self.mode.parse().map_err(invalid)?;
        let range = self
            .data_offset
            .checked_add(self.data_length)
            .filter(|&end| end <= blob.len() as u64)
            .map(|end| self.data_offset as usize..end as usize)
            .ok_or_else(|| {
                invalid(SectorFault::OutsideBlob {
                    offset:   self.data_offset,
                    length:   self.data_length,
                    blob_len: blob.len(),
                })
            })?;
        Sector::decode(address, mode, &blob[range])
    }
}

/// Every captured sector, in capture order, borrowing the image bytes.
#[derive(Debug, Clone)]
pub struct SectorStore<'a> {
    sectors:     Vec<Sector<'a>>,
    first_index: usize,
}

impl<'a> SectorStore<'a> {
    pub fn parse(bytes: &'a [u8]) -> Result<Self> {
        let mut c = ByteCursor::little_endian(bytes);
        let blob_offset = c.take_u64()?;
        let meta_len    = c.take_u64()?;
        let meta = c.take_raw(usize::try_from(meta_len).unwrap_or(usize::MAX))?;
        let metadata: CaptureMetadata = serde_json::from_slice(meta)?;

        let blob_start = usize::try_from(blob_offset)
            .ok()
            .filter(|&start| start <= bytes.len())
            .ok_or(DecodeError::Truncated {
                offset:    0,
                wanted:    usize::try_from(blob_offset).unwrap_or(usize::MAX),
                available: bytes.len(),
            })?;
        let blob = &bytes[blob_start..];
        debug!(blob_offset, blob_len = blob.len(), entries = metadata.sectors.len(), "capture header");

        let sectors = metadata
            .sectors
            .iter()
            .map(|entry| entry.decode(blob))
            .collect::<Result<Vec<_>>>()?;
        let first_index = sectors.first().map(|s| s.address.index()).unwrap_or(0);

        info!(
            sectors = sectors.len(),
            first   = %sectors.first().map(|s| s.address).unwrap_or_default(),
            "parsed disc capture"
        );
        Ok(Self { sectors, first_index })
    }

    pub fn sectors(&self) -> &[Sector<'a>] { &self.sectors }

    pub fn len(&self) -> usize { self.sectors.len() }

    pub fn is_empty(&self) -> bool { self.sectors.is_empty() }

    /// Address of the first captured sector.
    pub fn first_address(&self) -> Option<TimeCode> {
        self.sectors.first().map(|s| s.address)
    }

    /// Position of `address` in the capture, assuming the capture is
    /// contiguous from its first sector.
    pub fn index_of(&self, address: TimeCode) -> Option<usize> {
        address
            .index()
            .checked_sub(self.first_index)
            .filter(|&i| i < self.sectors.len())
    }

    pub fn sector(&self, address: TimeCode) -> Result<&Sector<'a>> {
        self.index_of(address)
            .map(|i| &self.sectors[i])
            .ok_or(DecodeError::SectorNotFound(address))
    }

    pub fn get(&self, index: usize) -> Option<&Sector<'a>> {
        self.sectors.get(index)
    }
}

/// An owned disc-image capture loaded into memory.
#[derive(Debug, Clone)]
pub struct DiscImage {
    bytes: Vec<u8>,
}

impl DiscImage {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        info!(path = %path.display(), bytes = bytes.len(), "loaded disc image");
        Ok(Self { bytes })
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn bytes(&self) -> &[u8] { &self.bytes }

    pub fn sectors(&self) -> Result<SectorStore<'_>> {
        SectorStore::parse(&self.bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::PayloadKind;

    fn pack(entries: &[(u8, u8, u8, &str, Vec<u8>)]) -> Vec<u8> {
        let mut blob = Vec::new();
        let mut meta = Vec::new();
        for (m, s, f, mode, raw) in entries {
            meta.push(serde_json::json!({
                "minute": m, "second": s, "frame": f, "mode": mode,
                "dataOffset": blob.len(), "dataLength": raw.len(),
            }));
            blob.extend_from_slice(raw);
        }
        let json = serde_json::to_vec(&serde_json::json!({ "sectors": meta })).unwrap();
        let mut out = Vec::new();
        out.extend_from_slice(&((HEADER_LEN + json.len()) as u64).to_le_bytes());
        out.extend_from_slice(&(json.len() as u64).to_le_bytes());
        out.extend_from_slice(&json);
        out.extend_from_slice(&blob);
        out
    }

    fn data_sector(fill: u8) -> Vec<u8> {
        let sub = [0, 1, 0x08, 0];
        let mut raw = [sub, sub].concat();
        raw.extend(std::iter::repeat(fill).take(2048));
        raw
    }

    #[test]
    fn lookup_is_relative_to_first_sector() {
        let bytes = pack(&[
            (0, 2, 14, "MODE2", data_sector(1)),
            (0, 2, 15, "MODE1", vec![9; 16]),
            (0, 2, 16, "MODE2", data_sector(3)),
        ]);
        let store = SectorStore::parse(&bytes).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.first_address(), Some(TimeCode::new(0, 2, 14)));
        assert_eq!(store.index_of(TimeCode::new(0, 2, 16)), Some(2));
        assert_eq!(store.index_of(TimeCode::new(0, 2, 13)), None);
        assert_eq!(store.index_of(TimeCode::new(0, 2, 17)), None);

        let s = store.sector(TimeCode::new(0, 2, 16)).unwrap();
        assert_eq!(s.kind(), Some(PayloadKind::Data));
        assert_eq!(s.payload[0], 3);
        assert_eq!(store.get(1).unwrap().payload, &[9; 16]);
        assert!(matches!(
            store.sector(TimeCode::new(1, 0, 0)),
            Err(DecodeError::SectorNotFound(_))
        ));
    }

    #[test]
    fn range_outside_blob_fails() {
        let mut bytes = pack(&[(0, 0, 0, "MODE1", vec![0; 8])]);
        bytes.truncate(bytes.len() - 1);
        assert!(matches!(
            SectorStore::parse(&bytes),
            Err(DecodeError::InvalidSector { fault: SectorFault::OutsideBlob { .. }, .. })
        ));
    }

    #[test]
    fn unknown_mode_fails() {
        let bytes = pack(&[(0, 0, 0, "MODE3", vec![0; 8])]);
        assert!(matches!(
            SectorStore::parse(&bytes),
            Err(DecodeError::InvalidSector { fault: SectorFault::UnknownMode(_), .. })
        ));
    }

    #[test]
    fn bad_metadata_is_reported() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&20u64.to_le_bytes());
        bytes.extend_from_slice(&4u64.to_le_bytes());
        bytes.extend_from_slice(b"{no}");
        assert!(matches!(SectorStore::parse(&bytes), Err(DecodeError::Metadata(_))));
        assert!(matches!(SectorStore::parse(&bytes[..10]), Err(DecodeError::Truncated { .. })));
    }
}
