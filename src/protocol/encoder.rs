use super::{ChecksumEngine, ADC_SCALE, MIN_FRAME_SIZE, SYNC_BYTE};
use crate::core::FrameHeader;

/// Writes frames in the device wire format.
pub struct FrameEncoder;

impl FrameEncoder {
    /// Encode `header` and its raw 24-bit slot values (sample-major, trigger
    /// slot first when the header carries one). The header's `frame_size`
    /// is ignored and recomputed.
    ///
    /// # Panics
    /// Panics if `raw` does not hold `slots_per_sample * samples` values.
    pub fn encode(header: &FrameHeader, raw: &[u32]) -> Vec<u8> {
        let slots = header.slots_per_sample() * header.samples as usize;
        assert_eq!(
            raw.len(),
            slots,
            "frame declares {} raw slots, got {}",
            slots,
            raw.len()
        );
        let frame_size = MIN_FRAME_SIZE + header.payload_size();

        let mut out = Vec::with_capacity(frame_size);
        out.push(SYNC_BYTE);
        out.push((header.sample_rate.code() << 6) | (header.version & 0x3f));
        out.extend_from_slice(&(frame_size as u16).to_be_bytes());
        out.push(header.frame_type);
        out.extend_from_slice(&header.frame_counter.to_be_bytes());
        out.push((header.channels & 0x7f) | if header.has_trigger { 0x80 } else { 0 });
        out.extend_from_slice(&header.samples.to_be_bytes());
        out.extend_from_slice(&header.volt_range.to_be_bytes());
        out.extend_from_slice(&header.timestamp_seconds.to_be_bytes());
        out.extend_from_slice(&header.timestamp_fraction.to_be_bytes());
        for value in raw {
            out.extend_from_slice(&value.to_be_bytes()[1..]);
        }

        let checksum = ChecksumEngine::checksum(&out);
        out.extend_from_slice(&checksum.to_be_bytes());
        debug_assert_eq!(out.len(), frame_size);
        out
    }
}

/// Inverse of the payload conversion: the raw 24-bit value that decodes to
/// `volts` for a full-scale range of `volt_range` mVpp, clamped to the ADC span.
pub fn volts_to_raw(volts: f64, volt_range: u16) -> u32 {
    if volt_range == 0 {
        return 0;
    }
    let raw = (volts * 1000.0 * ADC_SCALE / volt_range as f64).round();
    raw.clamp(0.0, ADC_SCALE - 1.0) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volts_round_trip_within_resolution() {
        let raw = volts_to_raw(1.25, 4500);
        let volts = raw as f64 / 1000.0 / ADC_SCALE * 4500.0;
        assert!((volts - 1.25).abs() < 1e-6);
    }

    #[test]
    fn test_volts_clamped() {
        assert_eq!(volts_to_raw(-1.0, 4500), 0);
        assert_eq!(volts_to_raw(1e9, 4500), (1 << 24) - 1);
    }
}
