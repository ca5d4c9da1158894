//! OBF recording files and the repository they live in.

pub mod header;
pub mod obf;
pub mod repository;

pub use header::{Endianness, FormatVersion, IndexUnit, ObfHeader, StorageMode};
pub use obf::{encode_parallel, encode_sequential, relative_millis, ObfReader, ObfWriter};
pub use repository::{FsRepository, Repository, RepositoryError, ResourceInfo};

use std::io;

#[derive(thiserror::Error, Debug)]
pub enum ObfError {
    #[error("I/O error on OBF stream")]
    Io(#[from] io::Error),
    #[error("unsupported data type {0:#04x}")]
    DataType(u8),
    #[error("unsupported format version {0:#04x}")]
    Version(u8),
    #[error("unknown storage mode {0}")]
    StorageMode(u8),
    #[error("unknown endianness {0}")]
    Endianness(u8),
    #[error("unknown index unit {0}")]
    IndexUnit(u8),
    #[error("storage mode {mode:?} has no {layout} section")]
    ModeMismatch {
        mode: StorageMode,
        layout: &'static str,
    },
    #[error("file holds {actual} bytes but the header declares {expected}")]
    Truncated { expected: u64, actual: u64 },
    #[error("sample {index} out of range for {samples} samples")]
    SampleOutOfRange { index: usize, samples: usize },
    #[error("buffer has {actual} channels, header declares {expected}")]
    ChannelMismatch { expected: usize, actual: usize },
    #[error("buffer has {actual} samples, header declares {expected}")]
    SampleCountMismatch { expected: usize, actual: usize },
    #[error("format version {version:?} cannot represent {what}")]
    Unrepresentable {
        version: FormatVersion,
        what: &'static str,
    },
}
