//! Cross-spectrum phase and frequency estimation.
//!
//! Two channels digitizing the same analog tone differ by a small phase
//! (timing) error. Estimating that error from a single FFT is noisy, so the
//! estimator here splits each captured batch into fixed-size segments,
//! computes the one-sided spectrum of every segment, and accumulates the
//! cross-spectrum `fft(A) * conj(fft(B))` across segments. The common tone
//! adds coherently while uncorrelated noise averages down; the accumulated
//! peak bin then yields both the tone frequency and the inter-channel phase.
//!
//! Sign convention: a positive phase means channel A leads channel B.
//!
//! ## Example
//!
//! ```rust
//! use iqcal_core::spectrum::CrossSpectrum;
//!
//! let fs = 2048.0;
//! let f0 = 256.0;
//! let w = 2.0 * std::f64::consts::PI * f0 / fs;
//! let a: Vec<f64> = (0..2048).map(|n| (w * n as f64).sin()).collect();
//! let b = a.clone();
//!
//! let mut xs = CrossSpectrum::new(512).unwrap();
//! let tone = xs.dominant_tone(&a, &b, fs).unwrap();
//! assert_eq!(tone.frequency_hz, 256.0);
//! assert!(tone.phase_radians.abs() < 1e-9);
//! ```

use std::fmt;
use std::sync::Arc;

use num_complex::Complex64;
use rustfft::{Fft, FftPlanner};
use thiserror::Error;

/// Errors from the spectral estimators.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpectrumError {
    /// Segment length must be a power of two, at least 2
    #[error("segment length {0} is not a power of two >= 2")]
    SegmentLength(usize),

    /// Batch length incompatible with the segment length
    #[error("batch of {batch_len} samples is not a positive multiple of segment length {segment_len}")]
    BadSegmentation { batch_len: usize, segment_len: usize },

    /// The two channel batches must be the same length
    #[error("channel batches differ in length: {a} vs {b}")]
    LengthMismatch { a: usize, b: usize },
}

/// Dominant common tone of two channels, as found in the accumulated
/// cross-spectrum.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TonePhase {
    /// Tone frequency in Hz (`bin * sample_rate / segment_len`)
    pub frequency_hz: f64,
    /// Phase of A relative to B at the tone, radians. Positive = A leads B.
    pub phase_radians: f64,
    /// One-sided FFT bin index of the peak
    pub bin: usize,
    /// Accumulated cross-spectrum magnitude at the peak
    pub magnitude: f64,
}

/// Segmented cross-spectrum accumulator.
///
/// Plans the FFT once for a fixed segment length and reuses it (with its
/// scratch buffer) across calls, so repeated estimates inside a calibration
/// loop do not re-plan.
pub struct CrossSpectrum {
    segment_len: usize,
    fft: Arc<dyn Fft<f64>>,
    scratch: Vec<Complex64>,
}

impl fmt::Debug for CrossSpectrum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossSpectrum")
            .field("segment_len", &self.segment_len)
            .finish()
    }
}

impl CrossSpectrum {
    /// Create an accumulator for the given segment length.
    ///
    /// The segment length must be a power of two, at least 2.
    pub fn new(segment_len: usize) -> Result<Self, SpectrumError> {
        if segment_len < 2 || !segment_len.is_power_of_two() {
            return Err(SpectrumError::SegmentLength(segment_len));
        }
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(segment_len);
        let scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
        Ok(Self {
            segment_len,
            fft,
            scratch,
        })
    }

    /// The configured segment length.
    pub fn segment_len(&self) -> usize {
        self.segment_len
    }

    /// Accumulate the one-sided cross-spectrum of two equal-length batches.
    ///
    /// Both batches are split into `segment_len`-sized non-overlapping
    /// segments; `fft(a) * conj(fft(b))` is summed bin-wise across segments.
    /// The result has `segment_len / 2 + 1` bins (DC through Nyquist).
    ///
    /// The batch length must be a positive exact multiple of the segment
    /// length; anything else is rejected with [`SpectrumError::BadSegmentation`]
    /// before any segmentation happens.
    pub fn accumulate(&mut self, a: &[f64], b: &[f64]) -> Result<Vec<Complex64>, SpectrumError> {
        if a.len() != b.len() {
            return Err(SpectrumError::LengthMismatch {
                a: a.len(),
                b: b.len(),
            });
        }
        if a.is_empty() || a.len() % self.segment_len != 0 {
            return Err(SpectrumError::BadSegmentation {
                batch_len: a.len(),
                segment_len: self.segment_len,
            });
        }

        let one_sided = self.segment_len / 2 + 1;
        let mut acc = vec![Complex64::new(0.0, 0.0); one_sided];
        let mut buf_a = vec![Complex64::new(0.0, 0.0); self.segment_len];
        let mut buf_b = vec![Complex64::new(0.0, 0.0); self.segment_len];

        for (seg_a, seg_b) in a
            .chunks_exact(self.segment_len)
            .zip(b.chunks_exact(self.segment_len))
        {
            for (dst, &src) in buf_a.iter_mut().zip(seg_a) {
                *dst = Complex64::new(src, 0.0);
            }
            for (dst, &src) in buf_b.iter_mut().zip(seg_b) {
                *dst = Complex64::new(src, 0.0);
            }
            self.fft.process_with_scratch(&mut buf_a, &mut self.scratch);
            self.fft.process_with_scratch(&mut buf_b, &mut self.scratch);
            for k in 0..one_sided {
                acc[k] += buf_a[k] * buf_b[k].conj();
            }
        }
        Ok(acc)
    }

    /// Locate the dominant common tone of two batches.
    ///
    /// Accumulates the cross-spectrum, finds the peak-magnitude bin, and
    /// reports its frequency and phase angle.
    pub fn dominant_tone(
        &mut self,
        a: &[f64],
        b: &[f64],
        sample_rate: f64,
    ) -> Result<TonePhase, SpectrumError> {
        let acc = self.accumulate(a, b)?;
        let mut peak_bin = 0;
        let mut peak_mag2 = acc[0].norm_sqr();
        for (k, v) in acc.iter().enumerate().skip(1) {
            let mag2 = v.norm_sqr();
            if mag2 > peak_mag2 {
                peak_mag2 = mag2;
                peak_bin = k;
            }
        }
        Ok(TonePhase {
            frequency_hz: peak_bin as f64 * sample_rate / self.segment_len as f64,
            phase_radians: acc[peak_bin].arg(),
            bin: peak_bin,
            magnitude: peak_mag2.sqrt(),
        })
    }
}

/// One-shot convenience wrapper around [`CrossSpectrum::dominant_tone`].
pub fn estimate_phase(
    a: &[f64],
    b: &[f64],
    segment_len: usize,
    sample_rate: f64,
) -> Result<TonePhase, SpectrumError> {
    CrossSpectrum::new(segment_len)?.dominant_tone(a, b, sample_rate)
}

/// One-sided normalized amplitude spectrum of a single batch.
///
/// Returns `(frequencies_hz, amplitudes)` with `len / 2 + 1` points and
/// amplitudes scaled as `2 |X_k| / N`. The batch length must be a power of
/// two, at least 2.
pub fn amplitude_spectrum(
    samples: &[f64],
    sample_rate: f64,
) -> Result<(Vec<f64>, Vec<f64>), SpectrumError> {
    let n = samples.len();
    if n < 2 || !n.is_power_of_two() {
        return Err(SpectrumError::SegmentLength(n));
    }
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n);
    let mut buf: Vec<Complex64> = samples.iter().map(|&s| Complex64::new(s, 0.0)).collect();
    let mut scratch = vec![Complex64::new(0.0, 0.0); fft.get_inplace_scratch_len()];
    fft.process_with_scratch(&mut buf, &mut scratch);

    let one_sided = n / 2 + 1;
    let freqs = (0..one_sided)
        .map(|k| k as f64 * sample_rate / n as f64)
        .collect();
    let amps = buf[..one_sided]
        .iter()
        .map(|x| 2.0 * x.norm() / n as f64)
        .collect();
    Ok((freqs, amps))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    fn tone(n: usize, freq: f64, fs: f64, phase: f64) -> Vec<f64> {
        (0..n)
            .map(|i| (2.0 * PI * freq * i as f64 / fs + phase).cos())
            .collect()
    }

    #[test]
    fn test_recovers_tone_frequency_and_phase() {
        let fs = 1.0e6;
        let seg = 1024;
        // Exact bin: 100 cycles per segment
        let f0 = 100.0 * fs / seg as f64;
        let dphi = 0.4;
        let a = tone(8 * seg, f0, fs, dphi);
        let b = tone(8 * seg, f0, fs, 0.0);

        let t = estimate_phase(&a, &b, seg, fs).unwrap();
        assert_eq!(t.bin, 100);
        assert_relative_eq!(t.frequency_hz, f0, max_relative = 1e-12);
        assert_relative_eq!(t.phase_radians, dphi, epsilon = 1e-9);
    }

    #[test]
    fn test_swapping_channels_negates_phase() {
        let fs = 800.0e6;
        let seg = 2048;
        let f0 = 512.0 * fs / seg as f64;
        let a = tone(4 * seg, f0, fs, 0.25);
        let b = tone(4 * seg, f0, fs, 0.0);

        let fwd = estimate_phase(&a, &b, seg, fs).unwrap();
        let rev = estimate_phase(&b, &a, seg, fs).unwrap();
        assert_eq!(fwd.bin, rev.bin);
        assert_relative_eq!(fwd.phase_radians, -rev.phase_radians, epsilon = 1e-9);
    }

    #[test]
    fn test_off_bin_tone_lands_within_one_bin() {
        let fs = 1.0e6;
        let seg = 1024;
        let bin_width = fs / seg as f64;
        // Tone sits 0.3 bins above bin 200
        let f0 = (200.0 + 0.3) * bin_width;
        let a = tone(16 * seg, f0, fs, 0.0);
        let b = a.clone();

        let t = estimate_phase(&a, &b, seg, fs).unwrap();
        assert!(
            (t.frequency_hz - f0).abs() <= bin_width,
            "estimate {} Hz more than one bin from {} Hz",
            t.frequency_hz,
            f0
        );
    }

    #[test]
    fn test_rejects_bad_segmentation() {
        let a = vec![0.0; 1000]; // not a multiple of 512
        let b = vec![0.0; 1000];
        let err = estimate_phase(&a, &b, 512, 1.0e6).unwrap_err();
        assert_eq!(
            err,
            SpectrumError::BadSegmentation {
                batch_len: 1000,
                segment_len: 512
            }
        );

        let err = estimate_phase(&[], &[], 512, 1.0e6).unwrap_err();
        assert!(matches!(err, SpectrumError::BadSegmentation { .. }));
    }

    #[test]
    fn test_rejects_non_power_of_two_segment() {
        let a = vec![0.0; 1000];
        assert_eq!(
            estimate_phase(&a, &a, 500, 1.0e6).unwrap_err(),
            SpectrumError::SegmentLength(500)
        );
    }

    #[test]
    fn test_rejects_length_mismatch() {
        let a = vec![0.0; 1024];
        let b = vec![0.0; 2048];
        assert_eq!(
            estimate_phase(&a, &b, 512, 1.0e6).unwrap_err(),
            SpectrumError::LengthMismatch { a: 1024, b: 2048 }
        );
    }

    #[test]
    fn test_averaging_suppresses_noise() {
        let fs = 1.0e6;
        let seg = 512;
        let f0 = 60.0 * fs / seg as f64;
        let n = 32 * seg;
        // Deterministic pseudo-noise on top of the tone in both channels
        let mut state = 0x1234_5678_9ABC_DEF0_u64;
        let mut noisy = |x: f64| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            x + 0.5 * ((state as f64 / u64::MAX as f64) - 0.5)
        };
        let a: Vec<f64> = tone(n, f0, fs, 0.2).into_iter().map(&mut noisy).collect();
        let b: Vec<f64> = tone(n, f0, fs, 0.0).into_iter().map(&mut noisy).collect();

        let t = estimate_phase(&a, &b, seg, fs).unwrap();
        assert_eq!(t.bin, 60, "noise moved the peak off the tone bin");
        assert_relative_eq!(t.phase_radians, 0.2, epsilon = 0.05);
    }

    #[test]
    fn test_amplitude_spectrum_peak() {
        let fs = 1024.0;
        let n = 1024;
        let f0 = 128.0;
        let x: Vec<f64> = (0..n)
            .map(|i| 3.0 * (2.0 * PI * f0 * i as f64 / fs).sin())
            .collect();
        let (freqs, amps) = amplitude_spectrum(&x, fs).unwrap();
        assert_eq!(freqs.len(), n / 2 + 1);
        let (peak_bin, peak_amp) = amps
            .iter()
            .copied()
            .enumerate()
            .fold((0, 0.0), |acc, (k, v)| if v > acc.1 { (k, v) } else { acc });
        assert_eq!(freqs[peak_bin], 128.0);
        assert_relative_eq!(peak_amp, 3.0, epsilon = 1e-9);

        assert!(matches!(
            amplitude_spectrum(&x[..1000], fs),
            Err(SpectrumError::SegmentLength(1000))
        ));
    }
}
