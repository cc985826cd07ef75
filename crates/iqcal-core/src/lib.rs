//! # ADC Front-End DSP Primitives
//!
//! Signal-analysis building blocks used by the `iqcal-adc` calibration
//! engine: batch statistics, channel de-interleaving, and segmented
//! cross-spectrum estimation of the phase relationship between two
//! digitized channels.
//!
//! This crate knows nothing about hardware. It operates on plain sample
//! batches and is usable on captures from any source, live or recorded.
//!
//! ## Example
//!
//! ```rust
//! use iqcal_core::spectrum;
//!
//! // Two copies of the same tone, channel B delayed by a quarter cycle.
//! let fs = 1024.0;
//! let n = 4096;
//! let tone = 64.0;
//! let a: Vec<f64> = (0..n)
//!     .map(|i| (2.0 * std::f64::consts::PI * tone * i as f64 / fs).cos())
//!     .collect();
//! let b: Vec<f64> = (0..n)
//!     .map(|i| {
//!         (2.0 * std::f64::consts::PI * tone * i as f64 / fs
//!             - std::f64::consts::FRAC_PI_2)
//!             .cos()
//!     })
//!     .collect();
//!
//! let tone = spectrum::estimate_phase(&a, &b, 1024, fs).unwrap();
//! assert!((tone.frequency_hz - 64.0).abs() < 1.0);
//! // A peaks first: positive phase means A leads B.
//! assert!((tone.phase_radians - std::f64::consts::FRAC_PI_2).abs() < 1e-6);
//! ```

pub mod spectrum;
pub mod stats;

pub use spectrum::{CrossSpectrum, SpectrumError, TonePhase};
