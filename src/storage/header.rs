use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use super::ObfError;
use crate::core::Nanos;

/// Data type byte of a raw device recording.
pub const DATA_TYPE_RAW: u8 = 0x01;
pub const V1_HEADER_LEN: usize = 10;
pub const V2_HEADER_LEN: usize = 31;

/// Bytes per stored channel value (f64).
pub const VALUE_LEN: usize = 8;
/// Bytes per stored timestamp (u32).
pub const TIMESTAMP_LEN: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FormatVersion {
    /// 10-byte header, parallel layout only.
    V1,
    /// 31-byte header with endianness and storage mode.
    V2,
    /// V2 plus a meaningful index-unit byte.
    V2_1,
}

impl FormatVersion {
    pub fn from_byte(byte: u8) -> Result<Self, ObfError> {
        match byte {
            0x01 => Ok(Self::V1),
            0x02 => Ok(Self::V2),
            0x03 => Ok(Self::V2_1),
            other => Err(ObfError::Version(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::V1 => 0x01,
            Self::V2 => 0x02,
            Self::V2_1 => 0x03,
        }
    }

    pub fn header_len(self) -> usize {
        match self {
            Self::V1 => V1_HEADER_LEN,
            Self::V2 | Self::V2_1 => V2_HEADER_LEN,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageMode {
    Parallel,
    Sequential,
    /// Parallel section followed by a sequential copy of the same samples.
    Combined,
}

impl StorageMode {
    pub fn from_byte(byte: u8) -> Result<Self, ObfError> {
        match byte {
            1 => Ok(Self::Parallel),
            2 => Ok(Self::Sequential),
            3 => Ok(Self::Combined),
            other => Err(ObfError::StorageMode(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Parallel => 1,
            Self::Sequential => 2,
            Self::Combined => 3,
        }
    }

    pub fn has_parallel(self) -> bool {
        matches!(self, Self::Parallel | Self::Combined)
    }

    pub fn has_sequential(self) -> bool {
        matches!(self, Self::Sequential | Self::Combined)
    }
}

/// Byte order of the payload. The header itself is always big-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

impl Endianness {
    pub fn from_byte(byte: u8) -> Result<Self, ObfError> {
        match byte {
            0 => Ok(Self::Big),
            1 => Ok(Self::Little),
            other => Err(ObfError::Endianness(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Big => 0,
            Self::Little => 1,
        }
    }

    pub(crate) fn f64_bytes(self, value: f64) -> [u8; 8] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }

    pub(crate) fn u32_bytes(self, value: u32) -> [u8; 4] {
        match self {
            Self::Big => value.to_be_bytes(),
            Self::Little => value.to_le_bytes(),
        }
    }

    pub(crate) fn read_f64(self, bytes: &[u8]) -> f64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self {
            Self::Big => f64::from_be_bytes(raw),
            Self::Little => f64::from_le_bytes(raw),
        }
    }

    pub(crate) fn read_u32(self, bytes: &[u8]) -> u32 {
        let mut raw = [0u8; 4];
        raw.copy_from_slice(&bytes[..4]);
        match self {
            Self::Big => u32::from_be_bytes(raw),
            Self::Little => u32::from_le_bytes(raw),
        }
    }
}

/// Unit of the stored timestamp column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IndexUnit {
    #[default]
    Millis,
    Nanos,
    Seconds,
    Hertz,
    Enumeration,
}

impl IndexUnit {
    pub fn from_byte(byte: u8) -> Result<Self, ObfError> {
        match byte {
            0 => Ok(Self::Millis),
            1 => Ok(Self::Nanos),
            2 => Ok(Self::Seconds),
            3 => Ok(Self::Hertz),
            4 => Ok(Self::Enumeration),
            other => Err(ObfError::IndexUnit(other)),
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            Self::Millis => 0,
            Self::Nanos => 1,
            Self::Seconds => 2,
            Self::Hertz => 3,
            Self::Enumeration => 4,
        }
    }

    /// Convert a stored index to nanoseconds. Units without a time meaning
    /// pass through unchanged.
    pub fn to_nanos(self, index: u32) -> Nanos {
        let index = index as Nanos;
        match self {
            Self::Millis => index * 1_000_000,
            Self::Nanos => index,
            Self::Seconds => index * 1_000_000_000,
            Self::Hertz | Self::Enumeration => index,
        }
    }
}

/// Fixed-size OBF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObfHeader {
    pub version: FormatVersion,
    pub storage_mode: StorageMode,
    pub channels: u8,
    pub samples: u32,
    pub sample_rate: u16,
    pub endianness: Endianness,
    pub index_unit: IndexUnit,
}

impl ObfHeader {
    /// Current-version header with big-endian payload and millisecond index.
    pub fn new(channels: u8, samples: u32, sample_rate: u16, storage_mode: StorageMode) -> Self {
        Self {
            version: FormatVersion::V2_1,
            storage_mode,
            channels,
            samples,
            sample_rate,
            endianness: Endianness::Big,
            index_unit: IndexUnit::Millis,
        }
    }

    /// Size of the header on disk.
    pub fn len(&self) -> usize {
        self.version.header_len()
    }

    /// `(channels, samples)`.
    pub fn dim(&self) -> (usize, usize) {
        (self.channels as usize, self.samples as usize)
    }

    /// Bytes of one parallel row: every channel value then the timestamp.
    pub fn row_len(&self) -> u64 {
        (self.channels as usize * VALUE_LEN + TIMESTAMP_LEN) as u64
    }

    pub fn parallel_len(&self) -> u64 {
        self.row_len() * self.samples as u64
    }

    pub fn sequential_len(&self) -> u64 {
        self.parallel_len()
    }

    pub fn payload_len(&self) -> u64 {
        let mut len = 0;
        if self.storage_mode.has_parallel() {
            len += self.parallel_len();
        }
        if self.storage_mode.has_sequential() {
            len += self.sequential_len();
        }
        len
    }

    /// Offset of the parallel section from the start of the file.
    pub fn parallel_offset(&self) -> Result<u64, ObfError> {
        if !self.storage_mode.has_parallel() {
            return Err(ObfError::ModeMismatch {
                mode: self.storage_mode,
                layout: "parallel",
            });
        }
        Ok(self.len() as u64)
    }

    /// Offset of the sequential section from the start of the file.
    pub fn sequential_offset(&self) -> Result<u64, ObfError> {
        match self.storage_mode {
            StorageMode::Sequential => Ok(self.len() as u64),
            StorageMode::Combined => Ok(self.len() as u64 + self.parallel_len()),
            StorageMode::Parallel => Err(ObfError::ModeMismatch {
                mode: self.storage_mode,
                layout: "sequential",
            }),
        }
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self, ObfError> {
        let mut lead = [0u8; 2];
        reader.read_exact(&mut lead)?;
        if lead[0] != DATA_TYPE_RAW {
            return Err(ObfError::DataType(lead[0]));
        }
        let version = FormatVersion::from_byte(lead[1])?;

        let mut rest = vec![0u8; version.header_len() - 2];
        reader.read_exact(&mut rest)?;
        match version {
            // DataType, Version, Channels, Samples(4), SampleRate(2), Reserved
            FormatVersion::V1 => Ok(Self {
                version,
                storage_mode: StorageMode::Parallel,
                channels: rest[0],
                samples: u32::from_be_bytes([rest[1], rest[2], rest[3], rest[4]]),
                sample_rate: u16::from_be_bytes([rest[5], rest[6]]),
                endianness: Endianness::Big,
                index_unit: IndexUnit::Millis,
            }),
            // DataType, Version, Mode, Channels, Samples(4), SampleRate(2),
            // Endianness, IndexUnit, Reserved(19)
            FormatVersion::V2 | FormatVersion::V2_1 => Ok(Self {
                version,
                storage_mode: StorageMode::from_byte(rest[0])?,
                channels: rest[1],
                samples: u32::from_be_bytes([rest[2], rest[3], rest[4], rest[5]]),
                sample_rate: u16::from_be_bytes([rest[6], rest[7]]),
                endianness: Endianness::from_byte(rest[8])?,
                index_unit: if version == FormatVersion::V2_1 {
                    IndexUnit::from_byte(rest[9])?
                } else {
                    IndexUnit::Millis
                },
            }),
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), ObfError> {
        writer.write_all(&self.encode()?)?;
        Ok(())
    }

    pub fn encode(&self) -> Result<Vec<u8>, ObfError> {
        let mut out = Vec::with_capacity(self.len());
        out.push(DATA_TYPE_RAW);
        out.push(self.version.to_byte());
        match self.version {
            FormatVersion::V1 => {
                if self.storage_mode != StorageMode::Parallel {
                    return Err(ObfError::Unrepresentable {
                        version: self.version,
                        what: "a non-parallel storage mode",
                    });
                }
                if self.endianness != Endianness::Big || self.index_unit != IndexUnit::Millis {
                    return Err(ObfError::Unrepresentable {
                        version: self.version,
                        what: "a little-endian payload or non-millisecond index",
                    });
                }
                out.push(self.channels);
                out.extend_from_slice(&self.samples.to_be_bytes());
                out.extend_from_slice(&self.sample_rate.to_be_bytes());
            }
            FormatVersion::V2 | FormatVersion::V2_1 => {
                if self.version == FormatVersion::V2 && self.index_unit != IndexUnit::Millis {
                    return Err(ObfError::Unrepresentable {
                        version: self.version,
                        what: "a non-millisecond index",
                    });
                }
                out.push(self.storage_mode.to_byte());
                out.push(self.channels);
                out.extend_from_slice(&self.samples.to_be_bytes());
                out.extend_from_slice(&self.sample_rate.to_be_bytes());
                out.push(self.endianness.to_byte());
                out.push(self.index_unit.to_byte());
            }
        }
        out.resize(self.len(), 0);
        Ok(out)
    }
}
