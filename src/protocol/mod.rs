//! Framed serial protocol spoken by the acquisition device.
//!
//! A frame is `0xAA`, a 19-byte big-endian header, a payload of 24-bit
//! big-endian samples and a 2-byte checksum over everything before it.

pub mod checksum;
pub mod encoder;
pub mod reader;

pub use checksum::ChecksumEngine;
pub use encoder::{volts_to_raw, FrameEncoder};
pub use reader::{FrameReader, ReaderStats};

use std::io;

pub const SYNC_BYTE: u8 = 0xAA;
pub const HEADER_LEN: usize = 19;
pub const CHECKSUM_LEN: usize = 2;
/// Sync, header and checksum with an empty payload.
pub const MIN_FRAME_SIZE: usize = 1 + HEADER_LEN + CHECKSUM_LEN;
/// Firmware worst case: 9 slots of 16 samples.
pub const MAX_FRAME_SIZE: usize = MIN_FRAME_SIZE + 3 * 9 * 16;

/// Full-scale divisor of a 24-bit sample.
pub(crate) const ADC_SCALE: f64 = (1u32 << 24) as f64;

#[derive(thiserror::Error, Debug)]
pub enum FrameError {
    #[error("error reading from byte source")]
    Io(#[from] io::Error),
    #[error("declared frame size {declared} exceeds maximum of {}", MAX_FRAME_SIZE)]
    TooLarge { declared: usize },
    #[error("declared frame size {declared} is below minimum of {}", MIN_FRAME_SIZE)]
    TooSmall { declared: usize },
    #[error("payload of {actual} bytes does not match {expected} bytes for the declared channels and samples")]
    PayloadSize { expected: usize, actual: usize },
    #[error("frame declares no channels and no trigger slot")]
    NoChannels,
    #[error("unknown sample rate code {0}")]
    SampleRateCode(u8),
    #[error("checksum mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    Checksum { received: u16, computed: u16 },
}

impl FrameError {
    /// Protocol errors leave the byte source usable; the parser resyncs on
    /// the next sync byte. Transport errors end the stream.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Io(_))
    }

    /// The byte source had nothing to deliver within its read timeout.
    /// Bytes already buffered are kept, so the read can simply be retried.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Io(err) => matches!(
                err.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
