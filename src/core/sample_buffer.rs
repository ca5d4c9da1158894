use serde::{Deserialize, Serialize};

/// Timestamp in nanoseconds. Device-clock based for parsed frames,
/// relative to the first sample for data read back from disk.
pub type Nanos = i64;

/// Append-only run of multi-channel samples with decimation state.
///
/// Values are stored row-major (`channels` values per sample). Popping
/// removes a prefix; the backing storage is compacted lazily so a drain of
/// `n` samples costs O(n) amortized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBuffer {
    channels: usize,
    values: Vec<f64>,
    timestamps: Vec<Nanos>,
    /// Index of the first live sample in `timestamps`.
    head: usize,
    pluck_rate: usize,
    parity: usize,
}

impl SampleBuffer {
    /// Create an empty buffer for `channels` channels with room for
    /// `capacity` samples.
    pub fn new(channels: usize, capacity: usize) -> Self {
        Self {
            channels,
            values: Vec::with_capacity(channels * capacity),
            timestamps: Vec::with_capacity(capacity),
            head: 0,
            pluck_rate: 1,
            parity: 0,
        }
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.timestamps.len() - self.head
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pluck_rate(&self) -> usize {
        self.pluck_rate
    }

    pub fn parity(&self) -> usize {
        self.parity
    }

    /// Keep one of every `rate` samples on [`pop_down_sample`](Self::pop_down_sample).
    /// Resets the decimation phase.
    ///
    /// # Panics
    /// Panics if `rate` is zero.
    pub fn set_pluck_rate(&mut self, rate: usize) {
        assert!(rate > 0, "pluck rate must be at least 1");
        self.pluck_rate = rate;
        self.parity = 0;
    }

    /// Set the decimation phase. A sample is kept when the phase is zero.
    ///
    /// # Panics
    /// Panics if `parity` is not below the pluck rate.
    pub fn set_parity(&mut self, parity: usize) {
        assert!(
            parity < self.pluck_rate,
            "parity {} out of range for pluck rate {}",
            parity,
            self.pluck_rate
        );
        self.parity = parity;
    }

    /// Append one sample.
    ///
    /// # Panics
    /// Panics if `values.len()` differs from the channel count.
    pub fn append_sample(&mut self, values: &[f64], timestamp: Nanos) {
        assert_eq!(
            values.len(),
            self.channels,
            "sample has {} values, buffer has {} channels",
            values.len(),
            self.channels
        );
        self.values.extend_from_slice(values);
        self.timestamps.push(timestamp);
    }

    /// Append every sample of `other`, leaving `other` untouched.
    ///
    /// # Panics
    /// Panics if the channel counts differ.
    pub fn append(&mut self, other: &SampleBuffer) {
        assert_eq!(
            self.channels, other.channels,
            "cannot append a {}-channel buffer to a {}-channel buffer",
            other.channels, self.channels
        );
        self.values.extend_from_slice(other.live_values());
        self.timestamps.extend_from_slice(&other.timestamps[other.head..]);
    }

    /// Values of sample `index`.
    pub fn sample(&self, index: usize) -> Option<&[f64]> {
        if index >= self.len() {
            return None;
        }
        let start = (self.head + index) * self.channels;
        Some(&self.values[start..start + self.channels])
    }

    pub fn timestamp(&self, index: usize) -> Option<Nanos> {
        self.timestamps.get(self.head + index).copied()
    }

    pub fn first_timestamp(&self) -> Option<Nanos> {
        self.timestamp(0)
    }

    pub fn last_timestamp(&self) -> Option<Nanos> {
        self.len().checked_sub(1).and_then(|i| self.timestamp(i))
    }

    /// Iterate over `(values, timestamp)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&[f64], Nanos)> + '_ {
        self.timestamps[self.head..]
            .iter()
            .enumerate()
            .map(move |(i, &ts)| {
                let start = (self.head + i) * self.channels;
                (&self.values[start..start + self.channels], ts)
            })
    }

    /// Remove up to `n` samples from the front and return them.
    pub fn pop(&mut self, n: usize) -> SampleBuffer {
        let n = n.min(self.len());
        let out = self.slice(0, n);
        self.advance(n);
        out
    }

    /// Remove up to `n` samples from the front and return only every
    /// `pluck_rate`-th of them. The phase carries over between calls, so
    /// draining in pieces keeps the same samples as one large drain.
    pub fn pop_down_sample(&mut self, n: usize) -> SampleBuffer {
        let n = n.min(self.len());
        let mut out = SampleBuffer::new(self.channels, n / self.pluck_rate + 1);
        for i in 0..n {
            if self.parity == 0 {
                let start = (self.head + i) * self.channels;
                out.values
                    .extend_from_slice(&self.values[start..start + self.channels]);
                out.timestamps.push(self.timestamps[self.head + i]);
            }
            self.parity = (self.parity + 1) % self.pluck_rate;
        }
        self.advance(n);
        out
    }

    /// Copy samples `[from, to)` into a new buffer with fresh decimation state.
    ///
    /// # Panics
    /// Panics if the range is inverted or extends past the end.
    pub fn slice(&self, from: usize, to: usize) -> SampleBuffer {
        assert!(
            from <= to && to <= self.len(),
            "slice {}..{} out of range for {} samples",
            from,
            to,
            self.len()
        );
        let mut out = SampleBuffer::new(self.channels, to - from);
        let start = (self.head + from) * self.channels;
        let end = (self.head + to) * self.channels;
        out.values.extend_from_slice(&self.values[start..end]);
        out.timestamps
            .extend_from_slice(&self.timestamps[self.head + from..self.head + to]);
        out
    }

    /// Channel-major copy of the data plus the timestamp sequence.
    pub fn channel_arrays(&self) -> (Vec<Vec<f64>>, Vec<Nanos>) {
        let mut arrays = vec![Vec::with_capacity(self.len()); self.channels];
        for (row, _) in self.iter() {
            for (array, value) in arrays.iter_mut().zip(row) {
                array.push(*value);
            }
        }
        (arrays, self.timestamps[self.head..].to_vec())
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.timestamps.clear();
        self.head = 0;
    }

    fn live_values(&self) -> &[f64] {
        &self.values[self.head * self.channels..]
    }

    fn advance(&mut self, n: usize) {
        self.head += n;
        if self.head == self.timestamps.len() {
            self.clear();
        } else if self.head * 2 >= self.timestamps.len() {
            self.values.drain(..self.head * self.channels);
            self.timestamps.drain(..self.head);
            self.head = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counting(n: usize, channels: usize) -> SampleBuffer {
        let mut buffer = SampleBuffer::new(channels, n);
        for i in 1..=n {
            buffer.append_sample(&vec![i as f64; channels], i as i64 * 1_000);
        }
        buffer
    }

    fn firsts(buffer: &SampleBuffer) -> Vec<f64> {
        buffer.iter().map(|(row, _)| row[0]).collect()
    }

    #[test]
    fn test_append_sums_lengths() {
        let mut a = counting(4, 2);
        let b = counting(6, 2);
        a.append(&b);
        assert_eq!(a.len(), 10);
        assert_eq!(b.len(), 6);
    }

    #[test]
    #[should_panic]
    fn test_append_channel_mismatch_panics() {
        let mut a = counting(4, 2);
        a.append(&counting(4, 3));
    }

    #[test]
    #[should_panic]
    fn test_append_sample_wrong_width_panics() {
        let mut a = SampleBuffer::new(3, 1);
        a.append_sample(&[1.0, 2.0], 0);
    }

    #[test]
    fn test_pop_compacts_and_keeps_order() {
        let mut buffer = counting(10, 1);
        let head = buffer.pop(7);
        assert_eq!(firsts(&head), vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
        assert_eq!(firsts(&buffer), vec![8.0, 9.0, 10.0]);
        assert_eq!(buffer.first_timestamp(), Some(8_000));
        buffer.append_sample(&[11.0], 11_000);
        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.last_timestamp(), Some(11_000));
    }

    #[test]
    fn test_slice_has_fresh_decimation_state() {
        let mut buffer = counting(6, 2);
        buffer.set_pluck_rate(2);
        buffer.set_parity(1);
        let slice = buffer.slice(2, 5);
        assert_eq!(firsts(&slice), vec![3.0, 4.0, 5.0]);
        assert_eq!(slice.pluck_rate(), 1);
        assert_eq!(buffer.len(), 6);
    }

    #[test]
    fn test_channel_arrays_transposes() {
        let mut buffer = SampleBuffer::new(2, 3);
        buffer.append_sample(&[1.0, -1.0], 10);
        buffer.append_sample(&[2.0, -2.0], 20);
        buffer.append_sample(&[3.0, -3.0], 30);
        buffer.pop(1);
        let (arrays, timestamps) = buffer.channel_arrays();
        assert_eq!(arrays, vec![vec![2.0, 3.0], vec![-2.0, -3.0]]);
        assert_eq!(timestamps, vec![20, 30]);
    }
}
