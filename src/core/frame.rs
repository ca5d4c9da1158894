use serde::{Deserialize, Serialize};
use std::time::SystemTime;

use super::sample_buffer::{Nanos, SampleBuffer};

/// Sampling rates the acquisition firmware can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SampleRate {
    Hz250,
    Hz500,
    Hz1000,
}

impl SampleRate {
    /// Decode the 2-bit rate code carried in the frame header.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::Hz250),
            1 => Some(Self::Hz500),
            2 => Some(Self::Hz1000),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            Self::Hz250 => 0,
            Self::Hz500 => 1,
            Self::Hz1000 => 2,
        }
    }

    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            250 => Some(Self::Hz250),
            500 => Some(Self::Hz500),
            1000 => Some(Self::Hz1000),
            _ => None,
        }
    }

    pub fn hz(self) -> u32 {
        match self {
            Self::Hz250 => 250,
            Self::Hz500 => 500,
            Self::Hz1000 => 1000,
        }
    }

    /// Nanoseconds between two consecutive samples.
    pub fn period_nanos(self) -> Nanos {
        1_000_000_000 / self.hz() as Nanos
    }
}

/// Stream parameters discovered once per engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Values per decoded sample row (trigger channels included).
    pub channels: usize,
    pub sample_rate: u32,
}

/// Fixed-layout header of one device frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub sample_rate: SampleRate,
    /// Protocol version, 6 bits.
    pub version: u8,
    /// Declared length of the whole frame, sync byte and checksum included.
    pub frame_size: u16,
    pub frame_type: u8,
    pub frame_counter: u32,
    /// Analog channel count, 7 bits.
    pub channels: u8,
    pub has_trigger: bool,
    pub samples: u16,
    /// Full-scale voltage range in mVpp.
    pub volt_range: u16,
    pub timestamp_seconds: u32,
    /// Fractional second in units of 1/4096 s.
    pub timestamp_fraction: u16,
}

impl FrameHeader {
    /// Raw 3-byte slots per sample on the wire.
    pub fn slots_per_sample(&self) -> usize {
        self.channels as usize + usize::from(self.has_trigger)
    }

    /// Decoded values per sample row.
    pub fn row_width(&self) -> usize {
        self.channels as usize + if self.has_trigger { 2 } else { 0 }
    }

    pub fn payload_size(&self) -> usize {
        self.slots_per_sample() * self.samples as usize * 3
    }

    /// Device-clock timestamp of the first sample.
    pub fn timestamp_nanos(&self) -> Nanos {
        self.timestamp_seconds as Nanos * 1_000_000_000
            + self.timestamp_fraction as Nanos * 1_000_000_000 / 4096
    }
}

/// One validated unit of device output.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub header: FrameHeader,
    pub buffer: SampleBuffer,
    /// Wall clock at parse time.
    pub received_at: SystemTime,
}

impl Frame {
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            channels: self.buffer.channels(),
            sample_rate: self.header.sample_rate.hz(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_codes() {
        assert_eq!(SampleRate::from_code(0), Some(SampleRate::Hz250));
        assert_eq!(SampleRate::from_code(2).map(SampleRate::hz), Some(1000));
        assert_eq!(SampleRate::from_code(3), None);
        assert_eq!(SampleRate::Hz500.period_nanos(), 2_000_000);
    }

    #[test]
    fn test_fractional_timestamp() {
        let header = FrameHeader {
            sample_rate: SampleRate::Hz250,
            version: 1,
            frame_size: 0,
            frame_type: 0,
            frame_counter: 0,
            channels: 8,
            has_trigger: true,
            samples: 16,
            volt_range: 4500,
            timestamp_seconds: 2,
            timestamp_fraction: 2048,
        };
        assert_eq!(header.timestamp_nanos(), 2_500_000_000);
        assert_eq!(header.slots_per_sample(), 9);
        assert_eq!(header.row_width(), 10);
        assert_eq!(header.payload_size(), 9 * 16 * 3);
    }
}
