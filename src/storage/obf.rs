use std::io::{Read, Seek, SeekFrom, Write};

use super::header::{ObfHeader, TIMESTAMP_LEN, VALUE_LEN};
use super::{Endianness, ObfError};
use crate::core::{Nanos, SampleBuffer};

/// Timestamp transform storing milliseconds since `origin`, saturating at
/// the bounds of `u32`.
pub fn relative_millis(origin: Nanos) -> impl Fn(Nanos) -> u32 {
    move |timestamp| {
        let millis = (timestamp - origin) / 1_000_000;
        millis.clamp(0, u32::MAX as Nanos) as u32
    }
}

/// Encode `buffer` row by row: every channel value, then the timestamp.
pub fn encode_parallel<F>(buffer: &SampleBuffer, endianness: Endianness, timestamp: F) -> Vec<u8>
where
    F: Fn(Nanos) -> u32,
{
    let row = buffer.channels() * VALUE_LEN + TIMESTAMP_LEN;
    let mut out = Vec::with_capacity(row * buffer.len());
    for (values, ts) in buffer.iter() {
        for value in values {
            out.extend_from_slice(&endianness.f64_bytes(*value));
        }
        out.extend_from_slice(&endianness.u32_bytes(timestamp(ts)));
    }
    out
}

/// Encode `buffer` channel by channel, followed by the timestamp column.
pub fn encode_sequential<F>(buffer: &SampleBuffer, endianness: Endianness, timestamp: F) -> Vec<u8>
where
    F: Fn(Nanos) -> u32,
{
    let (channels, timestamps) = buffer.channel_arrays();
    let mut out =
        Vec::with_capacity((buffer.channels() * VALUE_LEN + TIMESTAMP_LEN) * buffer.len());
    for channel in &channels {
        for value in channel {
            out.extend_from_slice(&endianness.f64_bytes(*value));
        }
    }
    for ts in timestamps {
        out.extend_from_slice(&endianness.u32_bytes(timestamp(ts)));
    }
    out
}

/// Random-access reader over an OBF file.
pub struct ObfReader<R> {
    inner: R,
    header: ObfHeader,
}

impl<R: Read + Seek> ObfReader<R> {
    /// Read the header and check the stream is long enough to hold every
    /// section it declares.
    pub fn open(mut inner: R) -> Result<Self, ObfError> {
        inner.seek(SeekFrom::Start(0))?;
        let header = ObfHeader::read_from(&mut inner)?;
        let actual = inner.seek(SeekFrom::End(0))?;
        let expected = header.len() as u64 + header.payload_len();
        if actual < expected {
            return Err(ObfError::Truncated { expected, actual });
        }
        inner.seek(SeekFrom::Start(header.len() as u64))?;
        Ok(Self { inner, header })
    }

    pub fn header(&self) -> &ObfHeader {
        &self.header
    }

    /// `(channels, samples)`.
    pub fn dim(&self) -> (usize, usize) {
        self.header.dim()
    }

    pub fn seek_header(&mut self) -> Result<(), ObfError> {
        self.inner.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    /// Position at the first payload byte, whatever the layout.
    pub fn seek_values(&mut self) -> Result<(), ObfError> {
        self.inner.seek(SeekFrom::Start(self.header.len() as u64))?;
        Ok(())
    }

    pub fn seek_parallel(&mut self) -> Result<(), ObfError> {
        let offset = self.header.parallel_offset()?;
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    pub fn seek_sequential(&mut self) -> Result<(), ObfError> {
        let offset = self.header.sequential_offset()?;
        self.inner.seek(SeekFrom::Start(offset))?;
        Ok(())
    }

    /// Position at row `n` of the parallel section.
    pub fn seek_sample(&mut self, n: usize) -> Result<(), ObfError> {
        let offset = self.header.parallel_offset()?;
        let samples = self.header.samples as usize;
        if n >= samples {
            return Err(ObfError::SampleOutOfRange { index: n, samples });
        }
        self.inner
            .seek(SeekFrom::Start(offset + n as u64 * self.header.row_len()))?;
        Ok(())
    }

    /// Read row `n` of the parallel section.
    pub fn read_sample(&mut self, n: usize) -> Result<(Vec<f64>, Nanos), ObfError> {
        self.seek_sample(n)?;
        let mut row = vec![0u8; self.header.row_len() as usize];
        self.inner.read_exact(&mut row)?;
        Ok(self.decode_row(&row))
    }

    /// Read the whole parallel section. Timestamps are converted to
    /// nanoseconds through the header's index unit.
    pub fn read_parallel(&mut self) -> Result<SampleBuffer, ObfError> {
        self.seek_parallel()?;
        let (channels, samples) = self.dim();
        let mut bytes = vec![0u8; self.header.parallel_len() as usize];
        self.inner.read_exact(&mut bytes)?;

        let mut buffer = SampleBuffer::new(channels, samples);
        for row in bytes.chunks_exact(self.header.row_len() as usize) {
            let (values, ts) = self.decode_row(row);
            buffer.append_sample(&values, ts);
        }
        Ok(buffer)
    }

    /// Read the sequential section as channel arrays and timestamps.
    pub fn read_sequential(&mut self) -> Result<(Vec<Vec<f64>>, Vec<Nanos>), ObfError> {
        self.seek_sequential()?;
        let (channels, samples) = self.dim();
        let endianness = self.header.endianness;
        let mut bytes = vec![0u8; self.header.sequential_len() as usize];
        self.inner.read_exact(&mut bytes)?;

        let (value_bytes, ts_bytes) = bytes.split_at(channels * samples * VALUE_LEN);
        let arrays = if samples == 0 {
            vec![Vec::new(); channels]
        } else {
            value_bytes
                .chunks_exact(samples * VALUE_LEN)
                .map(|channel| {
                    channel
                        .chunks_exact(VALUE_LEN)
                        .map(|v| endianness.read_f64(v))
                        .collect()
                })
                .collect()
        };
        let timestamps = ts_bytes
            .chunks_exact(TIMESTAMP_LEN)
            .map(|ts| self.header.index_unit.to_nanos(endianness.read_u32(ts)))
            .collect();
        Ok((arrays, timestamps))
    }

    pub fn into_inner(self) -> R {
        self.inner
    }

    fn decode_row(&self, row: &[u8]) -> (Vec<f64>, Nanos) {
        let endianness = self.header.endianness;
        let split = self.header.channels as usize * VALUE_LEN;
        let values = row[..split]
            .chunks_exact(VALUE_LEN)
            .map(|v| endianness.read_f64(v))
            .collect();
        let ts = self
            .header
            .index_unit
            .to_nanos(endianness.read_u32(&row[split..]));
        (values, ts)
    }
}

/// Writer placing each section at the offset its header declares, so
/// sections may be written in any order.
pub struct ObfWriter<W> {
    inner: W,
    header: ObfHeader,
}

impl<W: Write + Seek> ObfWriter<W> {
    pub fn new(inner: W, header: ObfHeader) -> Self {
        Self { inner, header }
    }

    pub fn header(&self) -> &ObfHeader {
        &self.header
    }

    pub fn write_header(&mut self) -> Result<(), ObfError> {
        self.inner.seek(SeekFrom::Start(0))?;
        self.header.write_to(&mut self.inner)
    }

    pub fn write_parallel<F>(&mut self, buffer: &SampleBuffer, timestamp: F) -> Result<(), ObfError>
    where
        F: Fn(Nanos) -> u32,
    {
        self.check_dim(buffer)?;
        let bytes = encode_parallel(buffer, self.header.endianness, timestamp);
        self.write_raw_parallel(&bytes)
    }

    pub fn write_sequential<F>(
        &mut self,
        buffer: &SampleBuffer,
        timestamp: F,
    ) -> Result<(), ObfError>
    where
        F: Fn(Nanos) -> u32,
    {
        self.check_dim(buffer)?;
        let offset = self.header.sequential_offset()?;
        let bytes = encode_sequential(buffer, self.header.endianness, timestamp);
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(&bytes)?;
        Ok(())
    }

    /// Write an already encoded parallel section.
    pub fn write_raw_parallel(&mut self, bytes: &[u8]) -> Result<(), ObfError> {
        let offset = self.header.parallel_offset()?;
        let expected = self.header.parallel_len();
        if bytes.len() as u64 != expected {
            return Err(ObfError::Truncated {
                expected,
                actual: bytes.len() as u64,
            });
        }
        self.inner.seek(SeekFrom::Start(offset))?;
        self.inner.write_all(bytes)?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), ObfError> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    fn check_dim(&self, buffer: &SampleBuffer) -> Result<(), ObfError> {
        let (channels, samples) = self.header.dim();
        if buffer.channels() != channels {
            return Err(ObfError::ChannelMismatch {
                expected: channels,
                actual: buffer.channels(),
            });
        }
        if buffer.len() != samples {
            return Err(ObfError::SampleCountMismatch {
                expected: samples,
                actual: buffer.len(),
            });
        }
        Ok(())
    }
}
