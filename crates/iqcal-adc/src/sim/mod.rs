//! Simulated converter backend for development and testing.
//!
//! This module provides a software plant standing in for the real ADC: it
//! accepts the same register writes the hardware would (and decodes the
//! packed words back into field values, so the bit packing is exercised end
//! to end) and synthesizes sample batches whose statistics respond to those
//! fields the way the analog front end does:
//!
//! - the batch mean follows the DC error plus the offset field,
//! - the batch energy follows the analog gain and gain-compensation codes,
//! - the inter-channel phase follows the timing-skew codes and the plant's
//!   built-in skew error.
//!
//! A [`SimAdc`] hands out a [`SimLink`] and a [`SimSource`] sharing the same
//! state, mirroring how the real link and capture path meet at one device.
//!
//! ## Example
//!
//! ```rust
//! use iqcal_adc::registers::{AdcConfig, RegisterModel};
//! use iqcal_adc::sim::{SimAdc, SimPlant};
//! use iqcal_adc::types::Channel;
//!
//! let sim = SimAdc::new(SimPlant::default());
//! let mut model = RegisterModel::new(sim.link(), AdcConfig::default()).unwrap();
//! model.set_offset(Channel::I, -2.5).unwrap();
//! // The plant decoded the packed register word back to the field value.
//! assert_eq!(sim.offset(Channel::I), -2.5);
//! ```

use std::cell::RefCell;
use std::collections::HashMap;
use std::f64::consts::PI;
use std::rc::Rc;

use iqcal_core::stats;

use crate::error::AdcResult;
use crate::registers::{decode_gain_comp, decode_offset, decode_skew, GAIN_CENTER};
use crate::traits::{AdcLink, SampleSource};
use crate::types::{Channel, ChannelSelector, RegisterAddress};

/// Fine sampling delay per timing-skew code, picoseconds.
pub const SKEW_STEP_PS: f64 = 4.0;

/// Analog characteristics of the simulated front end.
#[derive(Debug, Clone)]
pub struct SimPlant {
    /// Per-channel sample rate in Hz
    pub sample_rate: f64,
    /// Frequency of the common input tone
    pub tone_hz: f64,
    /// Tone amplitude entering channel I, in sample units
    pub amplitude_i: f64,
    /// Tone amplitude entering channel Q
    pub amplitude_q: f64,
    /// Intrinsic DC error of channel I, in sample units
    pub dc_error_i: f64,
    /// Intrinsic DC error of channel Q
    pub dc_error_q: f64,
    /// Extra sampling delay of channel Q relative to I, picoseconds
    pub skew_error_ps: f64,
    /// Mean change per LSB of offset field, sample units
    pub offset_response: f64,
    /// Samples per single-channel capture
    pub batch_len: usize,
    /// Peak amplitude of additive uniform noise (0 = noise-free)
    pub noise: f64,
}

impl Default for SimPlant {
    fn default() -> Self {
        let sample_rate = 800.0e6;
        Self {
            sample_rate,
            // 50 cycles per 2048-sample segment: an exact FFT bin
            tone_hz: 50.0 * sample_rate / 2048.0,
            amplitude_i: 20.0,
            amplitude_q: 20.0,
            dc_error_i: 0.0,
            dc_error_q: 0.0,
            skew_error_ps: 0.0,
            offset_response: 1.0,
            batch_len: 8192,
            noise: 0.0,
        }
    }
}

struct SimState {
    plant: SimPlant,
    words: HashMap<RegisterAddress, u16>,
    offset_i: f64,
    offset_q: f64,
    gain_i: u8,
    gain_q: u8,
    gain_comp_i: i8,
    gain_comp_q: i8,
    skew_i: i8,
    skew_q: i8,
    clock_resets: u32,
    resamples: u32,
    rng: u64,
}

impl SimState {
    fn new(plant: SimPlant) -> Self {
        Self {
            plant,
            words: HashMap::new(),
            offset_i: 0.0,
            offset_q: 0.0,
            gain_i: GAIN_CENTER,
            gain_q: GAIN_CENTER,
            gain_comp_i: 0,
            gain_comp_q: 0,
            skew_i: 0,
            skew_q: 0,
            clock_resets: 0,
            resamples: 0,
            rng: 0x1234_5678_9ABC_DEF0,
        }
    }

    fn apply_write(&mut self, register: RegisterAddress, word: u16) {
        self.words.insert(register, word);
        let (low, high) = ((word & 0xff) as u8, (word >> 8) as u8);
        match register {
            RegisterAddress::Offset => {
                self.offset_i = decode_offset(low);
                self.offset_q = decode_offset(high);
            }
            RegisterAddress::Gain => {
                self.gain_i = low;
                self.gain_q = high;
            }
            RegisterAddress::GainCompensation => {
                self.gain_comp_i = decode_gain_comp(low);
                self.gain_comp_q = decode_gain_comp(high);
            }
            RegisterAddress::TimingSkew => {
                self.skew_q = decode_skew(((word >> 6) & 0x1f) as u8);
                self.skew_i = decode_skew(((word >> 11) & 0x1f) as u8);
            }
            RegisterAddress::Control | RegisterAddress::SamplingAdjust => {}
        }
    }

    fn next_noise(&mut self) -> f64 {
        if self.plant.noise == 0.0 {
            return 0.0;
        }
        self.rng ^= self.rng << 13;
        self.rng ^= self.rng >> 7;
        self.rng ^= self.rng << 17;
        self.plant.noise * 2.0 * ((self.rng as f64 / u64::MAX as f64) - 0.5)
    }

    fn generate(&mut self, channel: Channel, len: usize) -> Vec<f64> {
        let (amplitude, dc_error, offset, gain, comp, skew) = match channel {
            Channel::I => (
                self.plant.amplitude_i,
                self.plant.dc_error_i,
                self.offset_i,
                self.gain_i,
                self.gain_comp_i,
                self.skew_i,
            ),
            Channel::Q => (
                self.plant.amplitude_q,
                self.plant.dc_error_q,
                self.offset_q,
                self.gain_q,
                self.gain_comp_q,
                self.skew_q,
            ),
        };
        let gain_db = gain_code_db(gain) + comp as f64 * 0.005;
        let amp = amplitude * 10.0_f64.powf(gain_db / 20.0);
        let mut delay_ps = skew as f64 * SKEW_STEP_PS;
        if channel == Channel::Q {
            delay_ps += self.plant.skew_error_ps;
        }
        let phase = -2.0 * PI * self.plant.tone_hz * delay_ps * 1.0e-12;
        let dc = dc_error + offset * self.plant.offset_response;
        let w = 2.0 * PI * self.plant.tone_hz / self.plant.sample_rate;
        (0..len)
            .map(|n| amp * (w * n as f64 + phase).sin() + dc + self.next_noise())
            .collect()
    }
}

/// The device's analog gain curve: code 128 is 0 dB, the extremes reach
/// about ±1.5 dB.
fn gain_code_db(code: u8) -> f64 {
    if code >= GAIN_CENTER {
        (code - GAIN_CENTER) as f64 / 127.0 * 1.5
    } else {
        -((GAIN_CENTER - code) as f64) / 128.0 * 1.5
    }
}

/// Simulated converter. Create one, then hand its [`SimAdc::link`] to a
/// register model and its [`SimAdc::source`] to the calibration engine.
pub struct SimAdc {
    state: Rc<RefCell<SimState>>,
}

impl SimAdc {
    pub fn new(plant: SimPlant) -> Self {
        Self {
            state: Rc::new(RefCell::new(SimState::new(plant))),
        }
    }

    /// Register write path into this simulated device.
    pub fn link(&self) -> SimLink {
        SimLink {
            state: Rc::clone(&self.state),
        }
    }

    /// Capture path out of this simulated device.
    ///
    /// Captures always reflect the current register state; `resample` only
    /// counts re-arms so tests can assert the engine's capture discipline.
    pub fn source(&self) -> SimSource {
        SimSource {
            state: Rc::clone(&self.state),
        }
    }

    /// Clock-manager resets received so far.
    pub fn clock_resets(&self) -> u32 {
        self.state.borrow().clock_resets
    }

    /// Re-arm requests received so far.
    pub fn resamples(&self) -> u32 {
        self.state.borrow().resamples
    }

    /// Raw word last written to a register, if any.
    pub fn register_word(&self, register: RegisterAddress) -> Option<u16> {
        self.state.borrow().words.get(&register).copied()
    }

    /// Offset field as decoded from the last register write, LSB units.
    pub fn offset(&self, channel: Channel) -> f64 {
        let s = self.state.borrow();
        match channel {
            Channel::I => s.offset_i,
            Channel::Q => s.offset_q,
        }
    }

    /// Gain code as decoded from the last register write.
    pub fn gain(&self, channel: Channel) -> u8 {
        let s = self.state.borrow();
        match channel {
            Channel::I => s.gain_i,
            Channel::Q => s.gain_q,
        }
    }

    /// Timing-skew code as decoded from the last register write.
    pub fn timing_skew(&self, channel: Channel) -> i8 {
        let s = self.state.borrow();
        match channel {
            Channel::I => s.skew_i,
            Channel::Q => s.skew_q,
        }
    }
}

/// Write half of a [`SimAdc`].
pub struct SimLink {
    state: Rc<RefCell<SimState>>,
}

impl AdcLink for SimLink {
    fn write(&mut self, register: RegisterAddress, word: u16) -> AdcResult<()> {
        self.state.borrow_mut().apply_write(register, word);
        Ok(())
    }

    fn reset_clock_manager(&mut self) -> AdcResult<()> {
        self.state.borrow_mut().clock_resets += 1;
        Ok(())
    }
}

/// Capture half of a [`SimAdc`].
pub struct SimSource {
    state: Rc<RefCell<SimState>>,
}

impl SampleSource for SimSource {
    fn sample_rate(&self) -> f64 {
        self.state.borrow().plant.sample_rate
    }

    fn capture(&mut self, selector: ChannelSelector) -> AdcResult<Vec<f64>> {
        let mut s = self.state.borrow_mut();
        let len = s.plant.batch_len;
        Ok(match selector {
            ChannelSelector::I => s.generate(Channel::I, len),
            ChannelSelector::Q => s.generate(Channel::Q, len),
            ChannelSelector::Interleaved => {
                let i = s.generate(Channel::I, len / 2);
                let q = s.generate(Channel::Q, len / 2);
                stats::interleave(&i, &q)
            }
        })
    }

    fn resample(&mut self) -> AdcResult<()> {
        self.state.borrow_mut().resamples += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::{AdcConfig, RegisterModel};
    use approx::assert_relative_eq;
    use iqcal_core::spectrum;

    #[test]
    fn test_mean_tracks_offset_field() {
        let sim = SimAdc::new(SimPlant {
            dc_error_i: 1.5,
            ..SimPlant::default()
        });
        let mut model = RegisterModel::new(sim.link(), AdcConfig::default()).unwrap();
        let mut source = sim.source();

        assert_relative_eq!(source.mean(ChannelSelector::I).unwrap(), 1.5, epsilon = 1e-6);
        model.set_offset(Channel::I, -1.0).unwrap();
        assert_relative_eq!(source.mean(ChannelSelector::I).unwrap(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_energy_tracks_gain_code() {
        let sim = SimAdc::new(SimPlant::default());
        let mut model = RegisterModel::new(sim.link(), AdcConfig::default()).unwrap();
        let mut source = sim.source();

        let e0 = source.energy(ChannelSelector::Q).unwrap();
        model.set_gain(Channel::Q, 255).unwrap();
        let e_hi = source.energy(ChannelSelector::Q).unwrap();
        model.set_gain(Channel::Q, 0).unwrap();
        let e_lo = source.energy(ChannelSelector::Q).unwrap();
        assert!(e_lo < e0 && e0 < e_hi);
        // top of the gain curve sits 1.5 dB above the 0 dB center code
        assert_relative_eq!(10.0 * (e_hi / e0).log10(), 1.5, epsilon = 0.01);
    }

    #[test]
    fn test_skew_shifts_cross_phase() {
        let plant = SimPlant {
            skew_error_ps: 20.0,
            tone_hz: 512.0 * 800.0e6 / 2048.0, // 200 MHz, an exact bin
            ..SimPlant::default()
        };
        let fs = plant.sample_rate;
        let tone_hz = plant.tone_hz;
        let sim = SimAdc::new(plant);
        let mut source = sim.source();

        let a = source.capture(ChannelSelector::I).unwrap();
        let b = source.capture(ChannelSelector::Q).unwrap();
        let tone = spectrum::estimate_phase(&a, &b, 2048, fs).unwrap();
        // Q delayed by 20 ps: I leads by 2*pi*f*tau
        let expected = 2.0 * PI * tone_hz * 20.0e-12;
        assert_relative_eq!(tone.phase_radians, expected, epsilon = 1e-9);
        assert_relative_eq!(tone.frequency_hz, tone_hz, max_relative = 1e-12);

        // Five negative skew codes on Q cancel the 20 ps error
        let mut model = RegisterModel::new(sim.link(), AdcConfig::default()).unwrap();
        model.set_timing_skew(Channel::Q, -5).unwrap();
        let a = source.capture(ChannelSelector::I).unwrap();
        let b = source.capture(ChannelSelector::Q).unwrap();
        let tone = spectrum::estimate_phase(&a, &b, 2048, fs).unwrap();
        assert!(tone.phase_radians.abs() < 1e-9);
    }

    #[test]
    fn test_interleaved_capture_alternates_channels() {
        let sim = SimAdc::new(SimPlant {
            dc_error_i: 3.0,
            dc_error_q: -3.0,
            amplitude_i: 0.0,
            amplitude_q: 0.0,
            ..SimPlant::default()
        });
        let mut source = sim.source();
        let batch = source.capture(ChannelSelector::Interleaved).unwrap();
        assert_eq!(batch.len(), SimPlant::default().batch_len);
        assert!(batch.iter().step_by(2).all(|&s| s == 3.0));
        assert!(batch.iter().skip(1).step_by(2).all(|&s| s == -3.0));
        assert_relative_eq!(stats::mean(&batch), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_round_trip_through_packed_words() {
        let sim = SimAdc::new(SimPlant::default());
        let mut model = RegisterModel::new(sim.link(), AdcConfig::default()).unwrap();
        model.set_offset(Channel::I, -7.75).unwrap();
        model.set_offset(Channel::Q, 0.25).unwrap();
        model.set_gain(Channel::I, 200).unwrap();
        model.set_timing_skew(Channel::Q, -9).unwrap();

        assert_eq!(sim.offset(Channel::I), -7.75);
        assert_eq!(sim.offset(Channel::Q), 0.25);
        assert_eq!(sim.gain(Channel::I), 200);
        assert_eq!(sim.timing_skew(Channel::Q), -9);
        assert!(sim.register_word(RegisterAddress::Control).is_some());
    }
}
