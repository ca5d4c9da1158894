use std::io::{self, Read};
use std::time::SystemTime;
use tracing::trace;

use super::{
    ChecksumEngine, FrameError, ADC_SCALE, CHECKSUM_LEN, HEADER_LEN, MAX_FRAME_SIZE,
    MIN_FRAME_SIZE, SYNC_BYTE,
};
use crate::core::{Frame, FrameHeader, SampleBuffer, SampleRate};

const READ_CHUNK: usize = 512;

/// Counters kept across the life of a reader.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReaderStats {
    pub frames: u64,
    pub size_errors: u64,
    pub header_errors: u64,
    pub checksum_errors: u64,
    /// Bytes discarded while looking for a sync byte.
    pub skipped_bytes: u64,
}

/// Resynchronizing frame parser over a blocking byte source.
///
/// Every protocol error leaves the source positioned just past the sync
/// byte that started the rejected frame, so a sync byte inside a corrupt
/// frame is still found by the next [`read_frame`](Self::read_frame).
pub struct FrameReader<R> {
    source: R,
    pending: Vec<u8>,
    pos: usize,
    stats: ReaderStats,
}

impl<R: Read> FrameReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            pending: Vec::with_capacity(MAX_FRAME_SIZE * 2),
            pos: 0,
            stats: ReaderStats::default(),
        }
    }

    pub fn stats(&self) -> ReaderStats {
        self.stats
    }

    pub fn into_inner(self) -> R {
        self.source
    }

    /// Read the next valid frame.
    ///
    /// Recoverable errors (see [`FrameError::is_recoverable`]) can be logged
    /// and the call repeated; an I/O error means the source is unusable.
    pub fn read_frame(&mut self) -> Result<Frame, FrameError> {
        self.seek_sync()?;

        // The sync byte stays buffered until the frame is accepted or
        // rejected, so a read timeout part way through loses nothing.
        let header = {
            let bytes = self.peek(1 + HEADER_LEN)?;
            match decode_header(&bytes[1..]) {
                Ok(header) => header,
                Err(err) => {
                    match err {
                        FrameError::TooLarge { .. } | FrameError::TooSmall { .. } => {
                            self.stats.size_errors += 1
                        }
                        _ => self.stats.header_errors += 1,
                    }
                    self.consume(1);
                    return Err(err);
                }
            }
        };
        let frame_size = header.frame_size as usize;

        let body = self.peek(frame_size)?;
        let (covered, trailer) = body.split_at(frame_size - CHECKSUM_LEN);
        let received = u16::from_be_bytes([trailer[0], trailer[1]]);
        let computed = ChecksumEngine::checksum(covered);
        if received != computed {
            self.stats.checksum_errors += 1;
            self.consume(1);
            return Err(FrameError::Checksum { received, computed });
        }

        let buffer = decode_payload(&header, &covered[1 + HEADER_LEN..]);
        self.consume(frame_size);
        self.stats.frames += 1;
        trace!(
            counter = header.frame_counter,
            samples = header.samples,
            "decoded frame"
        );

        Ok(Frame {
            header,
            buffer,
            received_at: SystemTime::now(),
        })
    }

    /// Discard bytes up to the next sync byte, leaving it buffered.
    fn seek_sync(&mut self) -> io::Result<()> {
        while self.peek(1)?[0] != SYNC_BYTE {
            self.consume(1);
            self.stats.skipped_bytes += 1;
        }
        Ok(())
    }

    /// Make `n` bytes available without consuming them.
    fn peek(&mut self, n: usize) -> io::Result<&[u8]> {
        if self.pending.len() - self.pos < n {
            if self.pos > 0 {
                self.pending.drain(..self.pos);
                self.pos = 0;
            }
            let mut chunk = [0u8; READ_CHUNK];
            while self.pending.len() < n {
                let read = match self.source.read(&mut chunk) {
                    Ok(0) => {
                        return Err(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            "byte source closed",
                        ))
                    }
                    Ok(read) => read,
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                    Err(e) => return Err(e),
                };
                self.pending.extend_from_slice(&chunk[..read]);
            }
        }
        Ok(&self.pending[self.pos..self.pos + n])
    }

    fn consume(&mut self, n: usize) {
        self.pos += n;
        if self.pos == self.pending.len() {
            self.pending.clear();
            self.pos = 0;
        }
    }
}

/// Decode and sanity-check the 19 header bytes following the sync byte.
pub(crate) fn decode_header(bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    let frame_size = u16::from_be_bytes([bytes[1], bytes[2]]);
    let declared = frame_size as usize;
    if declared > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge { declared });
    }
    if declared < MIN_FRAME_SIZE {
        return Err(FrameError::TooSmall { declared });
    }

    let rate_code = bytes[0] >> 6;
    let sample_rate =
        SampleRate::from_code(rate_code).ok_or(FrameError::SampleRateCode(rate_code))?;

    let header = FrameHeader {
        sample_rate,
        version: bytes[0] & 0x3f,
        frame_size,
        frame_type: bytes[3],
        frame_counter: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        channels: bytes[8] & 0x7f,
        has_trigger: bytes[8] & 0x80 != 0,
        samples: u16::from_be_bytes([bytes[9], bytes[10]]),
        volt_range: u16::from_be_bytes([bytes[11], bytes[12]]),
        timestamp_seconds: u32::from_be_bytes([bytes[13], bytes[14], bytes[15], bytes[16]]),
        timestamp_fraction: u16::from_be_bytes([bytes[17], bytes[18]]),
    };

    if header.slots_per_sample() == 0 {
        return Err(FrameError::NoChannels);
    }

    let expected = header.payload_size();
    let actual = declared - MIN_FRAME_SIZE;
    if expected != actual {
        return Err(FrameError::PayloadSize { expected, actual });
    }
    Ok(header)
}

fn decode_payload(header: &FrameHeader, payload: &[u8]) -> SampleBuffer {
    let samples = header.samples as usize;
    let slot_bytes = header.slots_per_sample() * 3;
    let volt_range = header.volt_range as f64;
    let start = header.timestamp_nanos();
    let period = header.sample_rate.period_nanos();

    let mut buffer = SampleBuffer::new(header.row_width(), samples);
    let mut row = Vec::with_capacity(header.row_width());
    for (index, raw) in payload.chunks_exact(slot_bytes).take(samples).enumerate() {
        row.clear();
        let mut slots = raw.chunks_exact(3);
        if header.has_trigger {
            if let Some(trigger) = slots.next() {
                row.push(f64::from(trigger[2] & 0x01));
                row.push(f64::from((trigger[2] >> 1) & 0x01));
            }
        }
        for slot in slots {
            let value = u32::from_be_bytes([0, slot[0], slot[1], slot[2]]);
            row.push(value as f64 / 1000.0 / ADC_SCALE * volt_range);
        }
        buffer.append_sample(&row, start + index as i64 * period);
    }
    buffer
}
