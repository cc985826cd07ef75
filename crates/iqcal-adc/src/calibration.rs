//! Closed-loop calibration procedures.
//!
//! Three feedback searches run against the live device: offset nulling
//! (drive each channel's mean to zero), gain balancing (equalize the two
//! channels' energies), and timing-skew correction (zero the inter-channel
//! phase at the dominant tone). Each step is the same strict sequence:
//! adjust one register, settle, capture a fresh batch, compute the steering
//! statistic, decide.
//!
//! The searches assume the device responds monotonically to its control
//! codes. That assumption is checked on every step: a step that fails to
//! move the measurement the right way ends the run as `NonMonotonic`, a
//! register bound ends it as `Saturated`, and a hard step ceiling bounds
//! every run even against a misbehaving device. All of these are terminal
//! result states the caller inspects; there are no retries.
//!
//! Gain balancing presumes equal-amplitude signals are presented to both
//! inputs, and timing calibration presumes a common tone is present; the
//! engine cannot verify either precondition.

use std::time::Duration;

use tracing::{debug, info, warn};

use iqcal_core::spectrum::{CrossSpectrum, TonePhase};

use crate::error::AdcResult;
use crate::registers::{RegisterModel, OFFSET_MAX_LSB, OFFSET_STEP_LSB};
use crate::traits::{AdcLink, SampleSource};
use crate::types::{CalTarget, CalibrationResult, Channel, ChannelSelector, Termination};

/// Offset field dynamic range divided by step size.
const OFFSET_STEP_LIMIT: u32 = 254;
/// Two full gain-register walks.
const GAIN_STEP_LIMIT: u32 = 512;
/// Full timing-skew range plus a revert step.
const SKEW_STEP_LIMIT: u32 = 31;

/// Tuning knobs of a calibration run.
#[derive(Debug, Clone)]
pub struct CalConfig {
    /// Analog settling wait after each register write
    pub settle: Duration,
    /// A channel mean within this is considered nulled, sample units
    pub mean_tolerance: f64,
    /// An inter-channel phase within this is considered aligned, radians
    pub phase_tolerance: f64,
    /// Null the interleaved virtual channel instead of I and Q separately.
    /// Must match how the device routing is configured; it is not detected.
    pub interleaved: bool,
}

impl Default for CalConfig {
    fn default() -> Self {
        Self {
            settle: Duration::from_millis(100),
            // half of one offset step in sample units
            mean_tolerance: 0.125,
            phase_tolerance: 0.01,
            interleaved: false,
        }
    }
}

/// Drives the feedback searches against one converter.
///
/// Borrows the register model and the sample source for the duration of the
/// run; the engine assumes exclusive use of the device while it holds them.
pub struct CalibrationEngine<'a, L: AdcLink, S: SampleSource> {
    registers: &'a mut RegisterModel<L>,
    source: &'a mut S,
    config: CalConfig,
}

impl<'a, L: AdcLink, S: SampleSource> CalibrationEngine<'a, L, S> {
    pub fn new(
        registers: &'a mut RegisterModel<L>,
        source: &'a mut S,
        config: CalConfig,
    ) -> Self {
        Self {
            registers,
            source,
            config,
        }
    }

    /// Null the DC offset of each configured channel.
    ///
    /// Runs per physical channel (I, then Q), or once against the
    /// interleaved virtual channel when [`CalConfig::interleaved`] is set.
    pub fn run_offset_calibration(&mut self) -> AdcResult<Vec<CalibrationResult>> {
        if self.config.interleaved {
            Ok(vec![
                self.run_offset_calibration_for(ChannelSelector::Interleaved)?
            ])
        } else {
            Ok(vec![
                self.run_offset_calibration_for(ChannelSelector::I)?,
                self.run_offset_calibration_for(ChannelSelector::Q)?,
            ])
        }
    }

    /// Null the DC offset of one channel selection.
    ///
    /// Walks the offset register toward zero mean one quantization step at a
    /// time, requiring the mean's magnitude to shrink strictly on every
    /// step. Once the mean's sign flips the overshoot is checked: if the
    /// final step made things worse, exactly one step is undone.
    pub fn run_offset_calibration_for(
        &mut self,
        selector: ChannelSelector,
    ) -> AdcResult<CalibrationResult> {
        let target = match selector {
            ChannelSelector::I => CalTarget::OffsetI,
            ChannelSelector::Q => CalTarget::OffsetQ,
            ChannelSelector::Interleaved => CalTarget::OffsetInterleaved,
        };
        let tolerance = self.config.mean_tolerance;
        let before = self.measure_mean(selector)?;
        info!(%selector, mean = before, "offset nulling started");

        let mut steps = 0u32;
        let mut current = before;
        let termination = if before.abs() <= tolerance {
            Termination::Converged
        } else {
            // Positive mean: walk the offset down. Negative: walk it up.
            let descending = before > 0.0;
            let mut previous = before;
            loop {
                if steps >= OFFSET_STEP_LIMIT {
                    break Termination::StepLimit;
                }
                if !self.step_offsets(selector, descending)? {
                    break Termination::Saturated;
                }
                steps += 1;
                self.settle()?;
                current = self.measure_mean(selector)?;
                debug!(%selector, step = steps, mean = current, "offset step");

                let crossed = if descending {
                    current <= 0.0
                } else {
                    current >= 0.0
                };
                if crossed {
                    if current.abs() > previous.abs() {
                        // Went one step too far; undo it.
                        self.step_offsets(selector, !descending)?;
                        steps += 1;
                        self.settle()?;
                        current = self.measure_mean(selector)?;
                    }
                    break Termination::Converged;
                }
                if current.abs() >= previous.abs() {
                    break Termination::NonMonotonic;
                }
                if current.abs() <= tolerance {
                    break Termination::Converged;
                }
                previous = current;
            }
        };

        let result = CalibrationResult {
            target,
            before,
            after: current,
            steps,
            termination,
        };
        self.log_result(&result);
        Ok(result)
    }

    /// Equalize the sum-of-squares energy of channels I and Q.
    ///
    /// Alternates pulling the hotter channel's gain down and pushing the
    /// colder one's up until the ordering flips, then refines: one extra
    /// code on the lower channel, kept only if it shrank the absolute
    /// energy difference.
    pub fn run_gain_calibration(&mut self) -> AdcResult<CalibrationResult> {
        let (mut e_i, mut e_q) = self.measure_energies()?;
        let before = (e_i - e_q).abs();
        info!(energy_i = e_i, energy_q = e_q, "gain balancing started");

        let mut steps = 0u32;
        let mut failure: Option<Termination> = None;

        while failure.is_none() && e_i > e_q {
            failure = self.adjust_gain(Channel::I, false, &mut steps)?;
            if failure.is_some() {
                break;
            }
            (e_i, e_q) = self.measure_energies()?;
            if e_i > e_q {
                failure = self.adjust_gain(Channel::Q, true, &mut steps)?;
                if failure.is_some() {
                    break;
                }
                (e_i, e_q) = self.measure_energies()?;
            }
        }
        while failure.is_none() && e_i < e_q {
            failure = self.adjust_gain(Channel::I, true, &mut steps)?;
            if failure.is_some() {
                break;
            }
            (e_i, e_q) = self.measure_energies()?;
            if e_i < e_q {
                failure = self.adjust_gain(Channel::Q, false, &mut steps)?;
                if failure.is_some() {
                    break;
                }
                (e_i, e_q) = self.measure_energies()?;
            }
        }

        let termination = match failure {
            Some(term) => term,
            None => {
                // The crossing is a quantized hill-climb and may sit one
                // code off the true minimum. Test one extra code on the
                // lower channel; keep whichever configuration measures the
                // smaller difference.
                let before_diff = (e_i - e_q).abs();
                let lower = if e_i >= e_q { Channel::Q } else { Channel::I };
                if self.registers.increment_gain(lower)? {
                    steps += 1;
                    self.settle()?;
                    (e_i, e_q) = self.measure_energies()?;
                    if before_diff < (e_i - e_q).abs() {
                        self.registers.decrement_gain(lower)?;
                        steps += 1;
                        self.settle()?;
                        (e_i, e_q) = self.measure_energies()?;
                    }
                }
                Termination::Converged
            }
        };

        let result = CalibrationResult {
            target: CalTarget::GainBalance,
            before,
            after: (e_i - e_q).abs(),
            steps,
            termination,
        };
        self.log_result(&result);
        Ok(result)
    }

    /// Estimate the phase of `channel_a` relative to `channel_b` at their
    /// dominant common tone. Positive phase means `channel_a` leads.
    pub fn estimate_phase(
        &mut self,
        channel_a: ChannelSelector,
        channel_b: ChannelSelector,
        segment_len: usize,
    ) -> AdcResult<TonePhase> {
        self.source.resample()?;
        let a = self.source.capture(channel_a)?;
        let b = self.source.capture(channel_b)?;
        let tone = CrossSpectrum::new(segment_len)?.dominant_tone(
            &a,
            &b,
            self.source.sample_rate(),
        )?;
        info!(
            %channel_a,
            %channel_b,
            frequency_hz = tone.frequency_hz,
            phase_radians = tone.phase_radians,
            "phase estimated"
        );
        Ok(tone)
    }

    /// Walk channel Q's fine sampling delay until the I/Q phase at the
    /// dominant tone is (approximately) zero.
    ///
    /// Same discipline as offset nulling: strict improvement on every step,
    /// single-step revert after a zero crossing that overshot, saturation
    /// and step-ceiling aborts.
    pub fn run_timing_calibration(&mut self, segment_len: usize) -> AdcResult<CalibrationResult> {
        let tolerance = self.config.phase_tolerance;
        let before = self
            .estimate_phase(ChannelSelector::I, ChannelSelector::Q, segment_len)?
            .phase_radians;
        info!(phase = before, "timing-skew calibration started");

        let mut steps = 0u32;
        let mut current = before;
        let termination = if before.abs() <= tolerance {
            Termination::Converged
        } else {
            // Positive phase: I leads, Q is sampled late, so pull Q's delay
            // code down. Negative: push it up.
            let positive = before > 0.0;
            let mut previous = before;
            loop {
                if steps >= SKEW_STEP_LIMIT {
                    break Termination::StepLimit;
                }
                if !self.step_skew_q(positive)? {
                    break Termination::Saturated;
                }
                steps += 1;
                self.settle()?;
                current = self
                    .estimate_phase(ChannelSelector::I, ChannelSelector::Q, segment_len)?
                    .phase_radians;
                debug!(step = steps, phase = current, "timing-skew step");

                let crossed = if positive {
                    current <= 0.0
                } else {
                    current >= 0.0
                };
                if crossed {
                    if current.abs() > previous.abs() {
                        self.step_skew_q(!positive)?;
                        steps += 1;
                        self.settle()?;
                        current = self
                            .estimate_phase(ChannelSelector::I, ChannelSelector::Q, segment_len)?
                            .phase_radians;
                    }
                    break Termination::Converged;
                }
                if current.abs() >= previous.abs() {
                    break Termination::NonMonotonic;
                }
                if current.abs() <= tolerance {
                    break Termination::Converged;
                }
                previous = current;
            }
        };

        let result = CalibrationResult {
            target: CalTarget::TimingSkew,
            before,
            after: current,
            steps,
            termination,
        };
        self.log_result(&result);
        Ok(result)
    }

    fn settle(&mut self) -> AdcResult<()> {
        self.registers.settle(self.config.settle)
    }

    fn measure_mean(&mut self, selector: ChannelSelector) -> AdcResult<f64> {
        self.source.resample()?;
        self.source.mean(selector)
    }

    fn measure_energies(&mut self) -> AdcResult<(f64, f64)> {
        self.source.resample()?;
        Ok((
            self.source.energy(ChannelSelector::I)?,
            self.source.energy(ChannelSelector::Q)?,
        ))
    }

    /// Step the offset of every channel behind `selector` by one
    /// quantization step, all-or-nothing: in interleaved mode both physical
    /// offsets move together, and if either is at its bound neither moves.
    fn step_offsets(&mut self, selector: ChannelSelector, down: bool) -> AdcResult<bool> {
        let channels: &[Channel] = match selector {
            ChannelSelector::I => &[Channel::I],
            ChannelSelector::Q => &[Channel::Q],
            ChannelSelector::Interleaved => &[Channel::I, Channel::Q],
        };
        let delta = if down {
            -OFFSET_STEP_LSB
        } else {
            OFFSET_STEP_LSB
        };
        for &channel in channels {
            let next = self.registers.offset(channel) + delta;
            if !(-OFFSET_MAX_LSB..=OFFSET_MAX_LSB).contains(&next) {
                return Ok(false);
            }
        }
        for &channel in channels {
            let applied = if down {
                self.registers.decrement_offset(channel)?
            } else {
                self.registers.increment_offset(channel)?
            };
            if !applied {
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn step_skew_q(&mut self, down: bool) -> AdcResult<bool> {
        if down {
            self.registers.decrement_timing_skew(Channel::Q)
        } else {
            self.registers.increment_timing_skew(Channel::Q)
        }
    }

    /// One gain adjustment with the shared bookkeeping: step-limit check,
    /// saturation check, settle.
    fn adjust_gain(
        &mut self,
        channel: Channel,
        up: bool,
        steps: &mut u32,
    ) -> AdcResult<Option<Termination>> {
        if *steps >= GAIN_STEP_LIMIT {
            return Ok(Some(Termination::StepLimit));
        }
        let applied = if up {
            self.registers.increment_gain(channel)?
        } else {
            self.registers.decrement_gain(channel)?
        };
        if !applied {
            return Ok(Some(Termination::Saturated));
        }
        *steps += 1;
        self.settle()?;
        Ok(None)
    }

    fn log_result(&self, result: &CalibrationResult) {
        if result.succeeded() {
            info!(
                target_field = %result.target,
                steps = result.steps,
                before = result.before,
                after = result.after,
                "calibration converged"
            );
        } else {
            warn!(
                target_field = %result.target,
                termination = %result.termination,
                steps = result.steps,
                before = result.before,
                after = result.after,
                "calibration aborted"
            );
        }
    }
}
