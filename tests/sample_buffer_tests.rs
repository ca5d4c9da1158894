use biostream::core::SampleBuffer;

/// Values 1..=n mirrored across two channels, timestamps equal to the value.
fn counting(n: usize) -> SampleBuffer {
    let mut buffer = SampleBuffer::new(2, n);
    for v in 1..=n {
        buffer.append_sample(&[v as f64, v as f64], v as i64);
    }
    buffer
}

fn firsts(buffer: &SampleBuffer) -> Vec<f64> {
    buffer.iter().map(|(row, _)| row[0]).collect()
}

#[test]
fn test_decimation_keeps_every_third() {
    let mut buffer = counting(10);
    buffer.set_pluck_rate(3);

    let out = buffer.pop_down_sample(10);
    assert_eq!(firsts(&out), vec![1.0, 4.0, 7.0, 10.0]);
    assert!(out.iter().all(|(row, _)| row[0] == row[1]));
    assert_eq!(out.channels(), 2);
    assert!(buffer.is_empty());
}

#[test]
fn test_decimation_phase_survives_split() {
    let mut buffer = counting(10);
    buffer.set_pluck_rate(3);

    let first = buffer.pop_down_sample(5);
    let second = buffer.pop_down_sample(5);
    assert_eq!(firsts(&first), vec![1.0, 4.0]);
    assert_eq!(firsts(&second), vec![7.0, 10.0]);
    assert_eq!(second.timestamp(0), Some(7));
}

#[test]
fn test_nonzero_parity_delays_first_sample() {
    let mut buffer = counting(10);
    buffer.set_pluck_rate(3);
    buffer.set_parity(1);

    let out = buffer.pop_down_sample(10);
    assert_eq!(firsts(&out), vec![3.0, 6.0, 9.0]);
}

#[test]
fn test_pop_beyond_length_returns_what_exists() {
    let mut buffer = counting(4);
    buffer.set_pluck_rate(2);

    let out = buffer.pop_down_sample(100);
    assert_eq!(firsts(&out), vec![1.0, 3.0]);
    assert!(buffer.is_empty());

    let mut buffer = counting(3);
    assert_eq!(buffer.pop(10).len(), 3);
    assert_eq!(buffer.pop(10).len(), 0);
}

#[test]
fn test_append_preserves_total() {
    let mut a = counting(6);
    let b = counting(4);
    a.append(&b);
    assert_eq!(a.len(), 10);
    assert_eq!(a.last_timestamp(), Some(4));
}

#[test]
#[should_panic]
fn test_append_unequal_channels_faults() {
    let mut a = counting(2);
    let b = SampleBuffer::new(3, 0);
    a.append(&b);
}

#[test]
fn test_slice_decimates_independently() {
    let mut buffer = counting(10);
    buffer.set_pluck_rate(3);
    buffer.pop_down_sample(1);

    let mut slice = buffer.slice(0, 6);
    assert_eq!(slice.parity(), 0);
    slice.set_pluck_rate(2);
    assert_eq!(firsts(&slice.pop_down_sample(6)), vec![2.0, 4.0, 6.0]);
    // The source keeps its own phase.
    assert_eq!(buffer.parity(), 1);
    assert_eq!(buffer.len(), 9);
}

#[test]
fn test_channelless_buffer_still_yields_rows() {
    let mut buffer = SampleBuffer::new(0, 3);
    for ts in [10, 20, 30] {
        buffer.append_sample(&[], ts);
    }
    let rows: Vec<_> = buffer.iter().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|(values, _)| values.is_empty()));
    assert_eq!(rows[2].1, 30);

    let popped = buffer.pop(2);
    assert_eq!(popped.iter().count(), 2);
    assert_eq!(buffer.iter().map(|(_, ts)| ts).collect::<Vec<_>>(), vec![30]);
}
