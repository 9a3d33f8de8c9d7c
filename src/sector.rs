//! Disc sectors: time-code addressing, the Mode 2 subheader, and payload
//! extraction.
//!
//! # Layout of a captured Mode 2 sector
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0      | 4    | subheader (file, channel, submode, coding) |
//! | 4      | 4    | copy of the subheader, must match byte-for-byte |
//! | 8      | 2048 / 2324 | payload for form 1 / form 2 |
//!
//! Anything after the payload (EDC/ECC) is ignored and never validated.
//! Mode 1 sectors (CD-DA) carry no subheader; their whole captured data area
//! is the payload.

use std::fmt;
use std::str::FromStr;

use bitflags::bitflags;
use serde::Serialize;

use crate::cursor::ByteCursor;
use crate::error::{DecodeError, Result, SectorFault};

pub const FRAMES_PER_SECOND:  usize = 75;
pub const SECONDS_PER_MINUTE: usize = 60;
pub const SUBHEADER_LEN:      usize = 4;
pub const FORM1_PAYLOAD_LEN:  usize = 2048;
pub const FORM2_PAYLOAD_LEN:  usize = 2324;

// ── Time codes ────────────────────────────────────────────────────────────────

/// A `(minute, second, frame)` disc address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub struct TimeCode {
    pub minute: u8,
    pub second: u8,
    pub frame:  u8,
}

impl TimeCode {
    pub const fn new(minute: u8, second: u8, frame: u8) -> Self {
        Self { minute, second, frame }
    }

    /// Linear sector index: `(minute * 60 + second) * 75 + frame`.
    pub fn index(&self) -> usize {
        (self.minute as usize * SECONDS_PER_MINUTE + self.second as usize) * FRAMES_PER_SECOND
            + self.frame as usize
    }

    /// Inverse of [`index`](Self::index).  `None` once the minute no longer
    /// fits in a byte.
    pub fn from_index(index: usize) -> Option<Self> {
        let frame   = index % FRAMES_PER_SECOND;
        let seconds = index / FRAMES_PER_SECOND;
        let minute  = u8::try_from(seconds / SECONDS_PER_MINUTE).ok()?;
        Some(Self::new(minute, (seconds % SECONDS_PER_MINUTE) as u8, frame as u8))
    }
}

impl fmt::Display for TimeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}:{:02}", self.minute, self.second, self.frame)
    }
}

impl FromStr for TimeCode {
    type Err = String;

    /// Parses `MM:SS:FF`.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split(':').collect();
        let [m, sec, fr] = parts.as_slice() else {
            return Err(format!("expected MM:SS:FF, got {s:?}"));
        };
        let field = |v: &str, max: usize, what: &str| -> std::result::Result<u8, String> {
            let n: u8 = v.trim().parse().map_err(|_| format!("bad {what} {v:?}"))?;
            if n as usize >= max {
                return Err(format!("{what} {n} out of range"));
            }
            Ok(n)
        };
        Ok(Self::new(
            field(*m, 256, "minute")?,
            field(*sec, SECONDS_PER_MINUTE, "second")?,
            field(*fr, FRAMES_PER_SECOND, "frame")?,
        ))
    }
}

// ── Subheader ─────────────────────────────────────────────────────────────────

bitflags! {
    /// The submode byte of a Mode 2 subheader.
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    pub struct Submode : u8 {
        /// Last sector of its file.
        const END_OF_FILE   = 0x80;
        const REALTIME      = 0x40;
        /// Form 2 (2324-byte payload); clear means form 1.
        const FORM2         = 0x20;
        /// Raise an interrupt when the sector is read.
        const TRIGGER       = 0x10;
        const DATA          = 0x08;
        const AUDIO         = 0x04;
        const VIDEO         = 0x02;
        const END_OF_RECORD = 0x01;
    }
}

/// What a Mode 2 sector's payload holds.  At most one of the three kind bits
/// may be set; none set means `Empty`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Empty,
    Data,
    Audio,
    Video,
}

impl PayloadKind {
    fn from_submode(submode: Submode) -> std::result::Result<Self, SectorFault> {
        let kinds = submode & (Submode::DATA | Submode::AUDIO | Submode::VIDEO);
        match kinds.bits().count_ones() {
            0 => Ok(PayloadKind::Empty),
            1 if kinds == Submode::DATA  => Ok(PayloadKind::Data),
            1 if kinds == Submode::AUDIO => Ok(PayloadKind::Audio),
            1                            => Ok(PayloadKind::Video),
            _ => Err(SectorFault::ConflictingKind(submode.bits())),
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PayloadKind::Empty => "empty",
            PayloadKind::Data  => "data",
            PayloadKind::Audio => "audio",
            PayloadKind::Video => "video",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Subheader {
    pub file:    u8,
    pub channel: u8,
    pub submode: Submode,
    pub coding:  u8,
    kind:        PayloadKind,
}

impl Subheader {
    fn parse(bytes: [u8; SUBHEADER_LEN]) -> std::result::Result<Self, SectorFault> {
        let submode = Submode::from_bits_retain(bytes[2]);
        Ok(Self {
            file:    bytes[0],
            channel: bytes[1],
            submode,
            coding:  bytes[3],
            kind:    PayloadKind::from_submode(submode)?,
        })
    }

    pub fn form(&self) -> u8 {
        if self.submode.contains(Submode::FORM2) { 2 } else { 1 }
    }

    pub fn kind(&self) -> PayloadKind { self.kind }

    pub fn payload_len(&self) -> usize {
        if self.form() == 1 { FORM1_PAYLOAD_LEN } else { FORM2_PAYLOAD_LEN }
    }
}

/// Embedded audio parameters carried in the coding byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AudioCoding {
    pub sample_rate:  u32,
    pub sample_width: u8,
    pub stereo:       bool,
}

impl AudioCoding {
    const RESERVED: u8 = 0b0010_1010;

    pub fn decode(coding: u8) -> std::result::Result<Self, SectorFault> {
        if coding & Self::RESERVED != 0 {
            return Err(SectorFault::ReservedCoding(coding));
        }
        Ok(Self {
            sample_width: if coding & 0x10 != 0 { 8 } else { 4 },
            sample_rate:  if coding & 0x04 != 0 { 18_900 } else { 37_800 },
            stereo:       coding & 0x01 != 0,
        })
    }
}

// ── Sectors ───────────────────────────────────────────────────────────────────

/// Recording mode as named in the capture metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    Mode1,
    Mode2,
}

impl FromStr for RecordingMode {
    type Err = SectorFault;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "MODE1" => Ok(RecordingMode::Mode1),
            "MODE2" => Ok(RecordingMode::Mode2),
            other   => Err(SectorFault::UnknownMode(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectorMode {
    /// CD-DA audio; no subheader.
    Mode1,
    Mode2(Subheader),
}

/// One decoded sector.  The payload borrows the disc image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sector<'a> {
    pub address: TimeCode,
    pub mode:    SectorMode,
    pub payload: &'a [u8],
}

impl<'a> Sector<'a> {
    pub fn decode(address: TimeCode, mode: RecordingMode, raw: &'a [u8]) -> Result<Self> {
        let invalid = |fault| DecodeError::InvalidSector { address, fault };
        match mode {
            RecordingMode::Mode1 => Ok(Self { address, mode: SectorMode::Mode1, payload: raw }),
            RecordingMode::Mode2 => {
                let mut c = ByteCursor::big_endian(raw);
                let first:  [u8; SUBHEADER_LEN] = c.take_array()?;
                let second: [u8; SUBHEADER_LEN] = c.take_array()?;
                if first != second {
                    return Err(invalid(SectorFault::SubheaderMismatch { first, second }));
                }
                let sub = Subheader::parse(first).map_err(invalid)?;
                let wanted = sub.payload_len();
                let payload = c.peek_raw(wanted).map_err(|_| {
                    invalid(SectorFault::ShortPayload {
                        form:      sub.form(),
                        wanted,
                        available: c.remaining(),
                    })
                })?;
                Ok(Self { address, mode: SectorMode::Mode2(sub), payload })
            }
        }
    }

    pub fn subheader(&self) -> Option<&Subheader> {
        match &self.mode {
            SectorMode::Mode1    => None,
            SectorMode::Mode2(s) => Some(s),
        }
    }

    pub fn mode_number(&self) -> u8 {
        match self.mode {
            SectorMode::Mode1    => 1,
            SectorMode::Mode2(_) => 2,
        }
    }

    pub fn form(&self) -> Option<u8> { self.subheader().map(Subheader::form) }

    pub fn kind(&self) -> Option<PayloadKind> { self.subheader().map(Subheader::kind) }

    fn flag(&self, flag: Submode) -> bool {
        self.subheader().is_some_and(|s| s.submode.contains(flag))
    }

    /// Always false for Mode 1 sectors.
    pub fn is_eof(&self) -> bool { self.flag(Submode::END_OF_FILE) }

    pub fn is_end_of_record(&self) -> bool { self.flag(Submode::END_OF_RECORD) }

    pub fn is_realtime(&self) -> bool { self.flag(Submode::REALTIME) }

    pub fn is_trigger(&self) -> bool { self.flag(Submode::TRIGGER) }

    pub fn audio_coding(&self) -> Result<AudioCoding> {
        let sub = self.subheader().ok_or(DecodeError::InvalidSector {
            address: self.address,
            fault:   SectorFault::NoSubheader,
        })?;
        AudioCoding::decode(sub.coding)
            .map_err(|fault| DecodeError::InvalidSector { address: self.address, fault })
    }
}

impl fmt::Display for Sector<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let Some(sub) = self.subheader() else {
            return write!(f, "{} mode 1", self.address);
        };
        write!(f, "{} mode 2 form {} {}", self.address, sub.form(), sub.kind())?;
        if sub.kind() != PayloadKind::Empty {
            write!(f, " file {} channel {} coding {:#04x}", sub.file, sub.channel, sub.coding)?;
            if self.is_eof()           { f.write_str(" eof")?; }
            if self.is_end_of_record() { f.write_str(" eor")?; }
            if self.is_trigger()       { f.write_str(" trigger")?; }
        }
        Ok(())
    }
}
