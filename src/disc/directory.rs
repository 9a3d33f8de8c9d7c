//! Flat root directory: self entry, parent entry, then one record per file.
//!
//! # Record layout (big-endian)
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 1    | record length |
//! | 1      | 1    | extended attribute length (must be 0) |
//! | 6      | 4    | start block |
//! | 14     | 4    | size in bytes |
//! | 18     | 6    | recording time, year counted from 1900 |
//! | 25     | 1    | flags (bit 0 = hidden) |
//! | 26     | 2    | interleave (must be 0, 0) |
//! | 30     | 2    | volume sequence number |
//! | 32     | 1    | name length `n` |
//! | 33     | n    | name; a single 0x00 names the directory itself |
//! |        | 0/1  | pad so the owner id stays 2-byte aligned |
//! |        | 4    | owner group, owner user |
//! |        | 2    | attributes |
//! |        | 4    | reserved, file number, reserved |

use std::fmt;

use bitflags::bitflags;
use chrono::{NaiveDate, NaiveDateTime};

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result, Unsupported};

/// Synthetic name given to the entry that describes the directory itself.
pub const SELF_ENTRY_LABEL: &str = "<root>";

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct FileAttributes : u16 {
        const OWNER_READ    = 0x0001;
        const OWNER_EXECUTE = 0x0004;
        const GROUP_READ    = 0x0010;
        const GROUP_EXECUTE = 0x0040;
        const WORLD_READ    = 0x0100;
        const WORLD_EXECUTE = 0x0400;
        /// CD-DA audio track rather than a data file.
        const CDDA          = 0x4000;
        const DIRECTORY     = 0x8000;
    }
}

impl fmt::Display for FileAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bit = |flag: FileAttributes, c: char| if self.contains(flag) { c } else { '-' };
        write!(
            f,
            "{}{}{}{}{}{}{}",
            bit(FileAttributes::DIRECTORY, 'd'),
            bit(FileAttributes::OWNER_READ, 'r'),
            bit(FileAttributes::OWNER_EXECUTE, 'x'),
            bit(FileAttributes::GROUP_READ, 'r'),
            bit(FileAttributes::GROUP_EXECUTE, 'x'),
            bit(FileAttributes::WORLD_READ, 'r'),
            bit(FileAttributes::WORLD_EXECUTE, 'x'),
        )?;
        if self.contains(FileAttributes::CDDA) {
            f.write_str(" cdda")?;
        }
        Ok(())
    }
}

/// The six raw bytes `year-1900, month, day, hour, minute, second`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RecordingTime {
    pub raw: [u8; 6],
}

impl RecordingTime {
    /// `None` when the bytes do not form a valid calendar time.
    pub fn to_datetime(&self) -> Option<NaiveDateTime> {
        let [year, month, day, hour, minute, second] = self.raw;
        NaiveDate::from_ymd_opt(1900 + year as i32, month as u32, day as u32)?
            .and_hms_opt(hour as u32, minute as u32, second as u32)
    }
}

impl fmt::Display for RecordingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_datetime() {
            Some(t) => write!(f, "{}", t.format("%Y-%m-%d %H:%M:%S")),
            None    => write!(f, "invalid({})", hex::encode(self.raw)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryRecord {
    pub name:            String,
    pub start_block:     u32,
    pub size:            u32,
    pub recorded:        RecordingTime,
    pub hidden:          bool,
    pub sequence_number: u16,
    pub owner_group:     u16,
    pub owner_user:      u16,
    pub attributes:      FileAttributes,
    pub file_number:     u8,
}

impl DirectoryRecord {
    pub fn parse(c: &mut ByteCursor<'_>) -> Result<Self> {
        let mark   = c.position();
        let offset = c.absolute_offset();

        let declared    = c.take_u8()? as usize;
        let ext_attr    = c.take_u8()?;
        let start_block = c.skip(4).take_u32()?;
        let size        = c.skip(4).take_u32()?;
        let recorded    = RecordingTime { raw: c.take_array()? };
        let flags       = c.skip(1).take_u8()?;
        let interleave  = c.take_array::<2>()?;
        let sequence_number = c.skip(2).take_u16()?;
        let name_len    = c.take_u8()? as usize;
        let raw_name    = c.take_raw(name_len)?;
        if name_len % 2 == 0 {
            c.skip(1);
        }
        let owner_group = c.take_u16()?;
        let owner_user  = c.take_u16()?;
        let attributes  = FileAttributes::from_bits_retain(c.take_u16()?);
        let file_number = c.skip(2).take_u8()?;
        c.skip(1);

        let consumed = c.position() - mark;
        if consumed != declared {
            return Err(DecodeError::RecordLengthMismatch { offset, declared, consumed });
        }

        let name = if raw_name == [0] {
            SELF_ENTRY_LABEL.to_string()
        } else {
            String::from_utf8_lossy(raw_name).into_owned()
        };
        if interleave != [0, 0] {
            return Err(Unsupported::Interleaved { name, ratio: interleave }.into());
        }
        if ext_attr != 0 {
            return Err(Unsupported::ExtendedAttributes { name, length: ext_attr }.into());
        }

        Ok(Self {
            name,
            start_block,
            size,
            recorded,
            hidden: flags & 1 != 0,
            sequence_number,
            owner_group,
            owner_user,
            attributes,
            file_number,
        })
    }

    pub fn is_directory(&self) -> bool {
        self.attributes.contains(FileAttributes::DIRECTORY)
    }
}

/// The root directory as stored in one sector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Directory {
    pub this:     DirectoryRecord,
    pub parent:   DirectoryRecord,
    pub entries:  Vec<DirectoryRecord>,
    /// Entries that were read in full but use a feature this reader refuses.
    pub rejected: Vec<Unsupported>,
}

impl Directory {
    /// Reads records until `this.size` bytes are consumed or a zero
    /// record-length byte is reached.  An unsupported file entry is set
    /// aside in `rejected`; a record whose length cannot be trusted ends the
    /// pass with an error.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut c = ByteCursor::big_endian(payload);
        let this   = DirectoryRecord::parse(&mut c)?;
        let parent = DirectoryRecord::parse(&mut c)?;

        let mut entries = Vec::new();
        let mut rejected = Vec::new();
        while c.position() < this.size as usize {
            if c.peek_u8()? == 0 {
                tracing::debug!(at = c.position(), "directory terminator");
                break;
            }
            match DirectoryRecord::parse(&mut c) {
                Ok(entry) if entry.is_directory() => {
                    rejected.push(Unsupported::NestedDirectory(entry.name));
                }
                Ok(entry) => entries.push(entry),
                Err(DecodeError::UnsupportedFeature(feature)) => rejected.push(feature),
                Err(e) => return Err(e),
            }
        }
        Ok(Self { this, parent, entries, rejected })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &[u8], start: u32, size: u32, attrs: u16) -> Vec<u8> {
        let pad = usize::from(name.len() % 2 == 0);
        let len = 33 + name.len() + pad + 10;
        let mut r = vec![len as u8, 0];
        r.extend_from_slice(&start.to_le_bytes());
        r.extend_from_slice(&start.to_be_bytes());
        r.extend_from_slice(&size.to_le_bytes());
        r.extend_from_slice(&size.to_be_bytes());
        r.extend_from_slice(&[93, 7, 14, 12, 30, 5]);
        r.push(0);
        r.push(0);
        r.extend_from_slice(&[0, 0]);
        r.extend_from_slice(&[0, 1, 0, 1]);
        r.push(name.len() as u8);
        r.extend_from_slice(name);
        r.extend(std::iter::repeat(0).take(pad));
        r.extend_from_slice(&3u16.to_be_bytes());
        r.extend_from_slice(&7u16.to_be_bytes());
        r.extend_from_slice(&attrs.to_be_bytes());
        r.extend_from_slice(&[0, 0, 4, 0]);
        assert_eq!(r.len(), len);
        r
    }

    #[test]
    fn parses_record_fields() {
        let bytes = record(b"cdi_game", 30, 5000, 0x0111);
        let mut c = ByteCursor::big_endian(&bytes);
        let r = DirectoryRecord::parse(&mut c).unwrap();
        assert_eq!(r.name, "cdi_game");
        assert_eq!((r.start_block, r.size), (30, 5000));
        assert_eq!((r.owner_group, r.owner_user, r.file_number), (3, 7, 4));
        assert_eq!(r.attributes, FileAttributes::OWNER_READ | FileAttributes::GROUP_READ | FileAttributes::WORLD_READ);
        assert!(!r.hidden);
        assert_eq!(r.recorded.to_datetime().unwrap().to_string(), "1993-07-14 12:30:05");
        assert_eq!(c.remaining(), 0);
    }

    #[test]
    fn odd_name_has_no_pad_and_self_entry_is_labelled() {
        let bytes = record(&[0], 20, 2048, 0x8000);
        assert_eq!(bytes.len(), 44);
        let r = DirectoryRecord::parse(&mut ByteCursor::big_endian(&bytes)).unwrap();
        assert_eq!(r.name, SELF_ENTRY_LABEL);
        assert!(r.is_directory());
    }

    #[test]
    fn length_mismatch_is_reported() {
        let mut bytes = record(b"ab", 0, 0, 0);
        bytes[0] += 1;
        let err = DirectoryRecord::parse(&mut ByteCursor::big_endian(&bytes)).unwrap_err();
        assert!(matches!(err, DecodeError::RecordLengthMismatch { declared: 47, consumed: 46, .. }));
    }

    #[test]
    fn interleave_and_extended_attributes_are_unsupported() {
        let mut bytes = record(b"ab", 0, 0, 0);
        bytes[27] = 1;
        assert!(matches!(
            DirectoryRecord::parse(&mut ByteCursor::big_endian(&bytes)),
            Err(DecodeError::UnsupportedFeature(Unsupported::Interleaved { .. }))
        ));
        let mut bytes = record(b"ab", 0, 0, 0);
        bytes[1] = 2;
        assert!(matches!(
            DirectoryRecord::parse(&mut ByteCursor::big_endian(&bytes)),
            Err(DecodeError::UnsupportedFeature(Unsupported::ExtendedAttributes { length: 2, .. }))
        ));
    }

    #[test]
    fn directory_stops_at_size_or_terminator() {
        let mut payload = record(&[0], 20, 0, 0x8000);
        payload.extend(record(&[1], 20, 0, 0x8000));
        payload.extend(record(b"a.rtf", 30, 10, 0x0001));
        payload.extend(record(b"b.rtf", 31, 10, 0x0001));
        let used = payload.len();
        payload[14..18].copy_from_slice(&(used as u32 + 100).to_be_bytes());
        payload.resize(2048, 0);

        let dir = Directory::parse(&payload).unwrap();
        assert_eq!(dir.entries.len(), 2);
        assert_eq!(dir.entries[1].name, "b.rtf");

        payload[14..18].copy_from_slice(&(used as u32 - 48).to_be_bytes());
        let dir = Directory::parse(&payload).unwrap();
        assert_eq!(dir.entries.len(), 1);
    }

    #[test]
    fn unsupported_entries_are_set_aside() {
        let mut payload = record(&[0], 20, 0, 0x8000);
        payload.extend(record(&[1], 20, 0, 0x8000));
        payload.extend(record(b"sub", 40, 2048, 0x8000));
        let mut interleaved = record(b"mix.rtf", 50, 10, 0x0001);
        interleaved[27] = 1;
        payload.extend(interleaved);
        payload.extend(record(b"a.rtf", 30, 10, 0x0001));
        let size = payload.len() as u32;
        payload[14..18].copy_from_slice(&size.to_be_bytes());

        let dir = Directory::parse(&payload).unwrap();
        assert_eq!(dir.entries.len(), 1);
        assert_eq!(dir.entries[0].name, "a.rtf");
        assert_eq!(dir.rejected.len(), 2);
        assert_eq!(dir.rejected[0], Unsupported::NestedDirectory("sub".into()));
        assert_eq!(dir.rejected[1].file_name(), Some("mix.rtf"));
    }

    #[test]
    fn untrusted_record_length_still_fails_the_directory() {
        let mut payload = record(&[0], 20, 0, 0x8000);
        payload.extend(record(&[1], 20, 0, 0x8000));
        let mut bad = record(b"ab", 30, 10, 0x0001);
        bad[0] += 1;
        payload.extend(bad);
        let size = payload.len() as u32;
        payload[14..18].copy_from_slice(&size.to_be_bytes());
        assert!(matches!(Directory::parse(&payload), Err(DecodeError::RecordLengthMismatch { .. })));
    }
}
