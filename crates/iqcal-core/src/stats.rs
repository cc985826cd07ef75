//! Batch statistics for captured sample blocks.
//!
//! The calibration loops steer on two scalars per capture: the mean (DC
//! content) and the sum of squares (energy). Both are defined here as free
//! functions over plain `f64` slices so that any sample source can reuse
//! them, plus helpers for splitting and building interleaved dual-channel
//! streams.

/// Arithmetic mean of a batch. Returns 0.0 for an empty batch.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sum of squared sample values (un-normalized energy).
pub fn sum_squares(samples: &[f64]) -> f64 {
    samples.iter().map(|s| s * s).sum()
}

/// Split an interleaved stream into its two channels.
///
/// Even indices belong to channel I, odd indices to channel Q.
pub fn deinterleave(samples: &[f64]) -> (Vec<f64>, Vec<f64>) {
    let mut i = Vec::with_capacity(samples.len().div_ceil(2));
    let mut q = Vec::with_capacity(samples.len() / 2);
    for (idx, &s) in samples.iter().enumerate() {
        if idx % 2 == 0 {
            i.push(s);
        } else {
            q.push(s);
        }
    }
    (i, q)
}

/// Build an interleaved stream from two channels: I at even indices, Q at
/// odd. Truncates to the shorter channel.
pub fn interleave(i: &[f64], q: &[f64]) -> Vec<f64> {
    let pairs = i.len().min(q.len());
    let mut out = Vec::with_capacity(pairs * 2);
    for idx in 0..pairs {
        out.push(i[idx]);
        out.push(q[idx]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_energy() {
        let samples = [1.0, -1.0, 3.0, 1.0];
        assert_eq!(mean(&samples), 1.0);
        assert_eq!(sum_squares(&samples), 12.0);
        assert_eq!(mean(&[]), 0.0);
        assert_eq!(sum_squares(&[]), 0.0);
    }

    #[test]
    fn test_interleave_round_trip() {
        let i = [1.0, 2.0, 3.0];
        let q = [-1.0, -2.0, -3.0];
        let inter = interleave(&i, &q);
        assert_eq!(inter, vec![1.0, -1.0, 2.0, -2.0, 3.0, -3.0]);
        let (i2, q2) = deinterleave(&inter);
        assert_eq!(i2, i);
        assert_eq!(q2, q);
    }

    #[test]
    fn test_interleave_truncates_to_shorter() {
        let inter = interleave(&[1.0, 2.0], &[9.0]);
        assert_eq!(inter, vec![1.0, 9.0]);
    }
}
