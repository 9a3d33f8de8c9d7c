//! The disc label: a single standard volume descriptor.
//!
//! All fields are big-endian.  Numeric fields the format records in both byte
//! orders are read from their big-endian copy; the skipped gaps hold the
//! little-endian copies and reserved bytes.

use tracing::debug;

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result, Unsupported};
use crate::image::SectorStore;
use crate::sector::Sector;

use super::DiscOptions;

pub const RECORD_TYPE_STANDARD: u8 = 1;
pub const STANDARD_ID: &[u8; 5] = b"CD-I ";
pub const SYSTEM_ID_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeDescriptor {
    pub volume_name:        String,
    /// Volume space size in blocks.
    pub volume_space_size:  u32,
    pub character_set:      [u8; 32],
    pub volumes_in_album:   u16,
    pub sequence_number:    u16,
    pub block_size:         u16,
    pub path_table_size:    u32,
    pub path_table_address: u32,
    pub album:              String,
    pub publisher:          String,
    pub data_preparer:      String,
    pub application:        String,
    pub copyright_file:     String,
    pub abstract_file:      String,
    pub bibliographic_file: String,
    pub creation_date:      [u8; 16],
    pub modification_date:  [u8; 16],
    pub expiration_date:    [u8; 16],
    pub effective_date:     [u8; 16],
    pub application_data:   Vec<u8>,
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_matches(|c: char| c == ' ' || c == '\0')
        .to_string()
}

fn invalid(what: impl Into<String>) -> DecodeError {
    DecodeError::InvalidVolume(what.into())
}

impl VolumeDescriptor {
    /// Locates the disc label at `opts.volume_address` and parses it.  The
    /// label runs up to the first end-of-file sector and must be exactly one
    /// sector long.
    pub fn read(store: &SectorStore<'_>, opts: &DiscOptions) -> Result<Self> {
        let start = store
            .index_of(opts.volume_address)
            .ok_or(DecodeError::SectorNotFound(opts.volume_address))?;
        let label: Vec<&Sector<'_>> = store.sectors()[start..]
            .iter()
            .take_while(|s| !s.is_eof())
            .collect();
        if label.len() != 1 {
            return Err(Unsupported::LabelSectors(label.len()).into());
        }
        Self::parse(label[0], opts)
    }

    pub fn parse(sector: &Sector<'_>, opts: &DiscOptions) -> Result<Self> {
        if sector.form() != Some(1) || !sector.is_end_of_record() {
            return Err(invalid(format!(
                "descriptor sector {} must be a mode 2 form 1 end-of-record sector",
                sector.address
            )));
        }

        let mut c = ByteCursor::big_endian(sector.payload);
        let record_type = c.take_u8()?;
        if record_type != RECORD_TYPE_STANDARD {
            return Err(invalid(format!("record type {record_type}, expected {RECORD_TYPE_STANDARD}")));
        }
        let standard_id = c.take_raw(5)?;
        if standard_id != STANDARD_ID {
            return Err(invalid(format!("standard id {:?}", String::from_utf8_lossy(standard_id))));
        }
        let version = c.take_u8()?;
        if version != 1 {
            return Err(invalid(format!("descriptor version {version}")));
        }
        if c.take_u8()? != 0 {
            return Err(Unsupported::CharacterSet.into());
        }
        let system_id = c.take_raw(SYSTEM_ID_LEN)?;
        if system_id != expected_system_id(&opts.system_identifier).as_slice() {
            return Err(Unsupported::SystemIdentifier(text(system_id)).into());
        }

        let volume_name        = text(c.take_raw(32)?);
        let volume_space_size  = c.skip(12).take_u32()?;
        let character_set      = c.take_array::<32>()?;
        let volumes_in_album   = c.skip(2).take_u16()?;
        let sequence_number    = c.skip(2).take_u16()?;
        let block_size         = c.skip(2).take_u16()?;
        let path_table_size    = c.skip(4).take_u32()?;
        let path_table_address = c.skip(8).take_u32()?;
        let album              = text(c.skip(38).take_raw(128)?);
        let publisher          = text(c.take_raw(128)?);
        let data_preparer      = text(c.take_raw(128)?);
        let application        = text(c.take_raw(128)?);
        let copyright_file     = text(c.take_raw(32)?);
        let abstract_file      = text(c.skip(5).take_raw(32)?);
        let bibliographic_file = text(c.skip(5).take_raw(32)?);
        let creation_date      = c.skip(5).take_array::<16>()?;
        let modification_date  = c.skip(1).take_array::<16>()?;
        let expiration_date    = c.skip(1).take_array::<16>()?;
        let effective_date     = c.skip(1).take_array::<16>()?;
        let structure_version  = c.skip(1).take_u8()?;
        if structure_version != 1 {
            return Err(invalid(format!("file structure version {structure_version}")));
        }
        let application_data = c.skip(1).take_raw(512)?.to_vec();

        if volumes_in_album > 1 {
            return Err(Unsupported::MultiVolume(volumes_in_album).into());
        }
        if block_size == 0 {
            return Err(invalid("block size 0"));
        }

        debug!(%volume_name, block_size, path_table_address, path_table_size, "volume descriptor");
        Ok(Self {
            volume_name,
            volume_space_size,
            character_set,
            volumes_in_album,
            sequence_number,
            block_size,
            path_table_size,
            path_table_address,
            album,
            publisher,
            data_preparer,
            application,
            copyright_file,
            abstract_file,
            bibliographic_file,
            creation_date,
            modification_date,
            expiration_date,
            effective_date,
            application_data,
        })
    }
}

/// `name` padded with spaces to the on-disc field width.
fn expected_system_id(name: &str) -> Vec<u8> {
    let mut id = name.as_bytes().to_vec();
    id.resize(SYSTEM_ID_LEN.max(id.len()), b' ');
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sector::{RecordingMode, TimeCode};

    /// A form 1 end-of-record sector holding a minimal valid descriptor.
    fn descriptor_sector(edit: impl FnOnce(&mut Vec<u8>)) -> Vec<u8> {
        let mut d = vec![0u8; 2048];
        d[0] = 1;
        d[1..6].copy_from_slice(b"CD-I ");
        d[6] = 1;
        d[8..40].copy_from_slice(&expected_system_id("CD-RTOS"));
        d[40..72].copy_from_slice(&expected_system_id("TEST VOLUME"));
        d[84..88].copy_from_slice(&1234u32.to_be_bytes());
        d[122..124].copy_from_slice(&1u16.to_be_bytes());
        d[126..128].copy_from_slice(&1u16.to_be_bytes());
        d[130..132].copy_from_slice(&2048u16.to_be_bytes());
        d[136..140].copy_from_slice(&10u32.to_be_bytes());
        d[148..152].copy_from_slice(&20u32.to_be_bytes());
        d[190..197].copy_from_slice(b"ALBUM  ");
        d[881] = 1;
        edit(&mut d);
        let sub = [0u8, 0, 0x09, 0];
        [&sub[..], &sub[..], &d[..]].concat()
    }

    fn parse(raw: &[u8]) -> Result<VolumeDescriptor> {
        let sector = Sector::decode(TimeCode::new(0, 2, 16), RecordingMode::Mode2, raw)?;
        VolumeDescriptor::parse(&sector, &DiscOptions::default())
    }

    #[test]
    fn parses_fields() {
        let vd = parse(&descriptor_sector(|_| {})).unwrap();
        assert_eq!(vd.volume_name, "TEST VOLUME");
        assert_eq!(vd.volume_space_size, 1234);
        assert_eq!(vd.volumes_in_album, 1);
        assert_eq!(vd.sequence_number, 1);
        assert_eq!(vd.block_size, 2048);
        assert_eq!(vd.path_table_size, 10);
        assert_eq!(vd.path_table_address, 20);
        assert_eq!(vd.album, "ALBUM");
        assert_eq!(vd.application_data.len(), 512);
    }

    #[test]
    fn rejects_unsupported_variants() {
        let err = parse(&descriptor_sector(|d| d[7] = 1)).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFeature(Unsupported::CharacterSet)));

        let err = parse(&descriptor_sector(|d| d[8..15].copy_from_slice(b"OTHEROS"))).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFeature(Unsupported::SystemIdentifier(_))));

        let err = parse(&descriptor_sector(|d| d[122..124].copy_from_slice(&2u16.to_be_bytes()))).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFeature(Unsupported::MultiVolume(2))));
    }

    #[test]
    fn rejects_bad_header() {
        assert!(matches!(parse(&descriptor_sector(|d| d[0] = 2)), Err(DecodeError::InvalidVolume(_))));
        assert!(matches!(parse(&descriptor_sector(|d| d[1] = b'X')), Err(DecodeError::InvalidVolume(_))));
        assert!(matches!(parse(&descriptor_sector(|d| d[881] = 2)), Err(DecodeError::InvalidVolume(_))));
    }
}
