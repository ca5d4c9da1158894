use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::io::{self, Read};
use std::sync::Arc;
use std::time::Duration;

use super::AvatarDevice;
use crate::core::{FrameHeader, SampleRate};
use crate::protocol::{volts_to_raw, FrameEncoder, MAX_FRAME_SIZE, MIN_FRAME_SIZE};
use crate::storage::Repository;

/// Parameters of the synthetic signal produced by the mock device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSettings {
    /// Analog channels per sample.
    pub channels: u8,
    pub sample_rate: u32,
    pub samples_per_frame: u16,
    pub frequency: f64,
    pub amplitude_volts: f64,
    /// Full-scale range in mVpp.
    pub volt_range: u16,
    pub trigger: bool,
    /// Pace frames at the nominal sample rate.
    pub realtime: bool,
    /// End the byte stream after this many frames.
    pub frame_limit: Option<u64>,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            channels: 8,
            sample_rate: 250,
            samples_per_frame: 16,
            frequency: 10.0,
            amplitude_volts: 0.5,
            volt_range: 4500,
            trigger: false,
            realtime: true,
            frame_limit: None,
        }
    }
}

/// Byte source emitting well-formed frames of sine data, one per channel
/// with a phase offset.
pub struct SyntheticSource {
    settings: MockSettings,
    rate: SampleRate,
    pending: Vec<u8>,
    pos: usize,
    frame_counter: u32,
    sample_index: u64,
}

impl SyntheticSource {
    pub fn new(settings: MockSettings) -> io::Result<Self> {
        let rate = SampleRate::from_hz(settings.sample_rate).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("unsupported sample rate {}", settings.sample_rate),
            )
        })?;
        let slots = settings.channels as usize + usize::from(settings.trigger);
        if settings.channels > 0x7f
            || MIN_FRAME_SIZE + slots * settings.samples_per_frame as usize * 3 > MAX_FRAME_SIZE
        {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "mock frame would exceed the protocol maximum",
            ));
        }
        Ok(Self {
            settings,
            rate,
            pending: Vec::new(),
            pos: 0,
            frame_counter: 0,
            sample_index: 0,
        })
    }

    fn next_frame(&mut self) -> Vec<u8> {
        let settings = &self.settings;
        let hz = self.rate.hz() as u64;
        let header = FrameHeader {
            sample_rate: self.rate,
            version: 1,
            frame_size: 0,
            frame_type: 0,
            frame_counter: self.frame_counter,
            channels: settings.channels,
            has_trigger: settings.trigger,
            samples: settings.samples_per_frame,
            volt_range: settings.volt_range,
            timestamp_seconds: (self.sample_index / hz) as u32,
            timestamp_fraction: ((self.sample_index % hz) * 4096 / hz) as u16,
        };

        // Mid-scale offset keeps the sine inside the unsigned ADC span.
        let offset = settings.volt_range as f64 / 2000.0;
        let mut raw = Vec::with_capacity(header.slots_per_sample() * settings.samples_per_frame as usize);
        for i in 0..settings.samples_per_frame as u64 {
            let t = (self.sample_index + i) as f64 / hz as f64;
            if settings.trigger {
                raw.push(if i == 0 { self.frame_counter & 0b11 } else { 0 });
            }
            for ch in 0..settings.channels {
                let phase = 2.0 * PI * settings.frequency * t + ch as f64 * PI / 8.0;
                let volts = offset + settings.amplitude_volts * phase.sin();
                raw.push(volts_to_raw(volts, settings.volt_range));
            }
        }

        self.frame_counter = self.frame_counter.wrapping_add(1);
        self.sample_index += settings.samples_per_frame as u64;
        FrameEncoder::encode(&header, &raw)
    }

    fn frame_duration(&self) -> Duration {
        Duration::from_nanos(
            self.rate.period_nanos() as u64 * self.settings.samples_per_frame as u64,
        )
    }
}

impl Read for SyntheticSource {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos == self.pending.len() {
            if self
                .settings
                .frame_limit
                .is_some_and(|limit| self.frame_counter as u64 >= limit)
            {
                return Ok(0);
            }
            if self.settings.realtime && self.frame_counter > 0 {
                std::thread::sleep(self.frame_duration());
            }
            self.pending = self.next_frame();
            self.pos = 0;
        }
        let n = buf.len().min(self.pending.len() - self.pos);
        buf[..n].copy_from_slice(&self.pending[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Avatar device backed by a [`SyntheticSource`] instead of a serial port.
pub fn mock_device(
    name: impl Into<String>,
    repository: Arc<dyn Repository>,
    settings: MockSettings,
) -> AvatarDevice {
    AvatarDevice::with_connector(
        name,
        repository,
        Box::new(move || {
            let source = SyntheticSource::new(settings.clone())?;
            Ok(Box::new(source) as Box<dyn Read + Send>)
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::FrameReader;

    #[test]
    fn test_synthetic_frames_parse() {
        let settings = MockSettings {
            channels: 4,
            trigger: true,
            realtime: false,
            frame_limit: Some(3),
            ..MockSettings::default()
        };
        let mut reader = FrameReader::new(SyntheticSource::new(settings).unwrap());
        for counter in 0..3 {
            let frame = reader.read_frame().unwrap();
            assert_eq!(frame.header.frame_counter, counter);
            assert_eq!(frame.buffer.channels(), 6);
            assert_eq!(frame.buffer.len(), 16);
        }
        assert!(!reader.read_frame().unwrap_err().is_recoverable());
        assert_eq!(reader.stats().frames, 3);
    }

    #[test]
    fn test_oversized_settings_rejected() {
        let settings = MockSettings {
            channels: 9,
            trigger: true,
            ..MockSettings::default()
        };
        assert!(SyntheticSource::new(settings).is_err());
    }

    #[test]
    fn test_timestamps_continue_across_frames() {
        let settings = MockSettings {
            channels: 1,
            sample_rate: 250,
            samples_per_frame: 16,
            realtime: false,
            ..MockSettings::default()
        };
        let mut reader = FrameReader::new(SyntheticSource::new(settings).unwrap());
        let first = reader.read_frame().unwrap();
        let second = reader.read_frame().unwrap();
        // 16 samples at 4 ms; the header fraction has 1/4096 s resolution.
        let gap = second.buffer.first_timestamp().unwrap() - first.buffer.first_timestamp().unwrap();
        assert!((gap - 64_000_000).abs() < 250_000, "gap {}", gap);
    }
}
