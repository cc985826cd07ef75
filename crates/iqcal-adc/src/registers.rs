//! Typed, range-checked model of the converter's register file.
//!
//! Every tunable parameter of the dual-core ADC lives here as a typed field
//! with an explicit domain, together with the bit packing that turns fields
//! into the 16-bit words the device expects. All mutators write through the
//! [`AdcLink`] immediately: a field in this model always equals the last
//! value successfully written to hardware, never a value the device has not
//! seen. On a failed link write the field keeps its previous value.
//!
//! Writes that affect sampling timing (offsets, timing skew, analogue
//! routing, clock phase) leave the derived clocks in an undefined state
//! until the clock manager is reset. The model only records that debt;
//! [`RegisterModel::settle`] pays it, so a batch of writes settles once.
//!
//! ## Register map
//!
//! | addr | register          | layout                                      |
//! |------|-------------------|---------------------------------------------|
//! | 0x00 | control           | packed mode word, see [`ControlWord`]        |
//! | 0x01 | gain              | I code bits 7..0, Q code bits 15..8          |
//! | 0x02 | offset            | I code bits 7..0, Q code bits 15..8          |
//! | 0x03 | gain compensation | I code bits 7..0, Q code bits 15..8          |
//! | 0x04 | sampling adjust   | I code bits 2..0, Q code bits 5..3, hi fixed |
//! | 0x07 | timing skew       | skew Q bits 10..6, skew I bits 15..11, DRDA  |

use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{AdcError, AdcResult};
use crate::persist::RegisterSnapshot;
use crate::traits::AdcLink;
use crate::types::{CalMode, Channel, ClockPhase, RegisterAddress, RoutingMode};

/// Offset field domain, in LSB units.
pub const OFFSET_MAX_LSB: f64 = 31.75;
/// Offset adjustment granularity, in LSB units.
pub const OFFSET_STEP_LSB: f64 = 0.25;
/// Gain code for 0 dB.
pub const GAIN_CENTER: u8 = 128;
/// Gain-compensation code domain is `[-GAIN_COMP_MAX, GAIN_COMP_MAX]`.
pub const GAIN_COMP_MAX: i8 = 63;
/// Timing-skew code domain is `[-TIMING_SKEW_MAX, TIMING_SKEW_MAX]`.
pub const TIMING_SKEW_MAX: i8 = 15;
/// Largest data-ready / sampling-adjust code.
pub const DELAY_CODE_MAX: u8 = 7;

/// Encode an offset in LSB units as the device's 8-bit sign-magnitude code.
///
/// Bit 7 set means non-negative; bits 6..0 carry the magnitude in 0.25-LSB
/// steps. The device reads both 0x80 and 0x00 as zero; zero encodes as 0x80.
pub fn encode_offset(value: f64) -> u8 {
    let steps = (value.abs() / OFFSET_STEP_LSB).round() as u8;
    if value >= 0.0 {
        0x80 | steps
    } else {
        steps
    }
}

/// Decode the device's 8-bit sign-magnitude offset code into LSB units.
pub fn decode_offset(code: u8) -> f64 {
    let magnitude = (code & 0x7f) as f64 * OFFSET_STEP_LSB;
    if code & 0x80 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

/// Encode a gain-compensation code as 7-bit sign-magnitude (bit 6 = negative).
pub fn encode_gain_comp(code: i8) -> u8 {
    if code < 0 {
        0x40 | (-code) as u8
    } else {
        code as u8
    }
}

/// Decode a 7-bit sign-magnitude gain-compensation code.
pub fn decode_gain_comp(raw: u8) -> i8 {
    let magnitude = (raw & 0x3f) as i8;
    if raw & 0x40 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// Encode a timing-skew code as 5-bit sign-magnitude (bit 4 = negative).
pub fn encode_skew(code: i8) -> u8 {
    if code < 0 {
        0x10 | (-code) as u8
    } else {
        code as u8
    }
}

/// Decode a 5-bit sign-magnitude timing-skew code.
pub fn decode_skew(raw: u8) -> i8 {
    let magnitude = (raw & 0x0f) as i8;
    if raw & 0x10 != 0 {
        -magnitude
    } else {
        magnitude
    }
}

/// The packed mode word at register 0x00.
///
/// Three mode fields are adjustable after construction; the remaining bits
/// (demux ratio, chip-version output, clock-rate wait code, data-ready
/// frequency) are fixed when the word is built and never touched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlWord {
    routing: RoutingMode,
    clock_phase: ClockPhase,
    cal_mode: CalMode,
    fixed: u16,
}

const ROUTING_SHIFT: u16 = 4;
const CLOCK_SHIFT: u16 = 6;
const CAL_SHIFT: u16 = 10;
const MODE_MASK: u16 = (0b11 << ROUTING_SHIFT) | (0b11 << CLOCK_SHIFT) | (0b11 << CAL_SHIFT);

impl ControlWord {
    /// Build the word for a device clocked at `clock_mhz`.
    pub fn new(
        routing: RoutingMode,
        clock_phase: ClockPhase,
        cal_mode: CalMode,
        clock_mhz: u32,
    ) -> Self {
        let wait_code: u16 = if clock_mhz < 125 {
            0b00
        } else if clock_mhz < 250 {
            0b01
        } else if clock_mhz < 500 {
            0b10
        } else {
            0b11
        };
        let mut fixed = 0u16;
        fixed |= 1 << 2; // chip-version output disabled
        fixed |= 1 << 3; // demux 1:2
        fixed |= wait_code << 12;
        fixed |= 1 << 14; // data ready at Fs/2
        Self {
            routing,
            clock_phase,
            cal_mode,
            fixed,
        }
    }

    /// The packed 16-bit register word.
    pub fn word(&self) -> u16 {
        self.fixed
            | (self.routing.bits() << ROUTING_SHIFT)
            | (self.clock_phase.bits() << CLOCK_SHIFT)
            | (self.cal_mode.bits() << CAL_SHIFT)
    }

    /// Decode a packed word, e.g. from a persisted snapshot.
    ///
    /// Mode bit patterns outside the closed enumerations are rejected with
    /// `InvalidMode`; all remaining bits are taken over verbatim as the
    /// fixed configuration.
    pub fn from_word(word: u16) -> AdcResult<Self> {
        Ok(Self {
            routing: RoutingMode::from_bits((word >> ROUTING_SHIFT) & 0b11)?,
            clock_phase: ClockPhase::from_bits((word >> CLOCK_SHIFT) & 0b11)?,
            cal_mode: CalMode::from_bits((word >> CAL_SHIFT) & 0b11)?,
            fixed: word & !MODE_MASK,
        })
    }

    pub fn routing(&self) -> RoutingMode {
        self.routing
    }

    pub fn clock_phase(&self) -> ClockPhase {
        self.clock_phase
    }

    pub fn cal_mode(&self) -> CalMode {
        self.cal_mode
    }
}

/// Construction-time configuration of one converter.
#[derive(Debug, Clone)]
pub struct AdcConfig {
    /// Which ADC card slot this converter sits in
    pub zdok: u8,
    /// Sampling clock in MHz (selects the control word's wait code)
    pub clock_mhz: u32,
    /// Analog input routing
    pub routing: RoutingMode,
    /// Core clock phase relationship
    pub clock_phase: ClockPhase,
    /// Internal calibration machinery state
    pub cal_mode: CalMode,
    /// Data-ready delay codes, 0..=7 (4 = no delay)
    pub drda_i: u8,
    pub drda_q: u8,
    /// Initial sampling adjustment codes, 0..=7 (2 recommended for 1:2 demux)
    pub isa_i: u8,
    pub isa_q: u8,
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            zdok: 0,
            clock_mhz: 800,
            routing: RoutingMode::Independent,
            clock_phase: ClockPhase::InPhase,
            cal_mode: CalMode::Disabled,
            drda_i: 4,
            drda_q: 4,
            isa_i: 2,
            isa_q: 2,
        }
    }
}

/// Owned, write-through model of one converter's register file.
///
/// Constructed once per zdok slot, either at power-on defaults or restored
/// from a persisted snapshot. The calibration engine borrows it for the
/// duration of a run.
#[derive(Debug)]
pub struct RegisterModel<L: AdcLink> {
    link: L,
    zdok: u8,
    control: ControlWord,
    offset_i: f64,
    offset_q: f64,
    gain_i: u8,
    gain_q: u8,
    gain_comp_i: i8,
    gain_comp_q: i8,
    timing_skew_i: i8,
    timing_skew_q: i8,
    drda_i: u8,
    drda_q: u8,
    isa_i: u8,
    isa_q: u8,
    timing_dirty: bool,
}

impl<L: AdcLink> RegisterModel<L> {
    /// Build a model at power-on defaults and push the full register file to
    /// the device.
    pub fn new(link: L, config: AdcConfig) -> AdcResult<Self> {
        for (field, code) in [
            ("drda_i", config.drda_i),
            ("drda_q", config.drda_q),
            ("isa_i", config.isa_i),
            ("isa_q", config.isa_q),
        ] {
            check_delay_code(field, code)?;
        }
        let mut model = Self {
            link,
            zdok: config.zdok,
            control: ControlWord::new(
                config.routing,
                config.clock_phase,
                config.cal_mode,
                config.clock_mhz,
            ),
            offset_i: 0.0,
            offset_q: 0.0,
            gain_i: GAIN_CENTER,
            gain_q: GAIN_CENTER,
            gain_comp_i: 0,
            gain_comp_q: 0,
            timing_skew_i: 0,
            timing_skew_q: 0,
            drda_i: config.drda_i,
            drda_q: config.drda_q,
            isa_i: config.isa_i,
            isa_q: config.isa_q,
            timing_dirty: false,
        };
        model.write_all()?;
        Ok(model)
    }

    /// Slot index of the converter this model drives.
    pub fn zdok(&self) -> u8 {
        self.zdok
    }

    /// Current offset of a channel, LSB units.
    pub fn offset(&self, channel: Channel) -> f64 {
        match channel {
            Channel::I => self.offset_i,
            Channel::Q => self.offset_q,
        }
    }

    /// Current gain code of a channel.
    pub fn gain(&self, channel: Channel) -> u8 {
        match channel {
            Channel::I => self.gain_i,
            Channel::Q => self.gain_q,
        }
    }

    /// Current gain-compensation code of a channel.
    pub fn gain_compensation(&self, channel: Channel) -> i8 {
        match channel {
            Channel::I => self.gain_comp_i,
            Channel::Q => self.gain_comp_q,
        }
    }

    /// Current timing-skew code of a channel.
    pub fn timing_skew(&self, channel: Channel) -> i8 {
        match channel {
            Channel::I => self.timing_skew_i,
            Channel::Q => self.timing_skew_q,
        }
    }

    pub fn routing(&self) -> RoutingMode {
        self.control.routing()
    }

    pub fn clock_phase(&self) -> ClockPhase {
        self.control.clock_phase()
    }

    pub fn cal_mode(&self) -> CalMode {
        self.control.cal_mode()
    }

    /// The packed control word as last written.
    pub fn control_word(&self) -> u16 {
        self.control.word()
    }

    /// True when a timing-affecting write has not been settled yet.
    pub fn needs_clock_reset(&self) -> bool {
        self.timing_dirty
    }

    /// Set one channel's DC offset, in LSB units.
    ///
    /// The value is quantized to the 0.25-LSB grid. Both channels share one
    /// hardware register, so both codes are committed in a single write and
    /// a partial update is never observable.
    pub fn set_offset(&mut self, channel: Channel, value: f64) -> AdcResult<()> {
        if !(-OFFSET_MAX_LSB..=OFFSET_MAX_LSB).contains(&value) {
            return Err(AdcError::OutOfRange {
                field: "offset",
                value,
                min: -OFFSET_MAX_LSB,
                max: OFFSET_MAX_LSB,
            });
        }
        let value = (value / OFFSET_STEP_LSB).round() * OFFSET_STEP_LSB;
        let (i, q) = match channel {
            Channel::I => (value, self.offset_q),
            Channel::Q => (self.offset_i, value),
        };
        self.write_offsets(i, q)
    }

    /// Raise one channel's offset by 0.25 LSB. Returns `Ok(false)` without
    /// touching anything when the field is already at its maximum.
    pub fn increment_offset(&mut self, channel: Channel) -> AdcResult<bool> {
        self.step_offset(channel, OFFSET_STEP_LSB)
    }

    /// Lower one channel's offset by 0.25 LSB. Returns `Ok(false)` at the
    /// minimum.
    pub fn decrement_offset(&mut self, channel: Channel) -> AdcResult<bool> {
        self.step_offset(channel, -OFFSET_STEP_LSB)
    }

    fn step_offset(&mut self, channel: Channel, delta: f64) -> AdcResult<bool> {
        let next = self.offset(channel) + delta;
        if !(-OFFSET_MAX_LSB..=OFFSET_MAX_LSB).contains(&next) {
            warn!(%channel, "offset already at bound");
            return Ok(false);
        }
        let (i, q) = match channel {
            Channel::I => (next, self.offset_q),
            Channel::Q => (self.offset_i, next),
        };
        self.write_offsets(i, q)?;
        Ok(true)
    }

    fn write_offsets(&mut self, i: f64, q: f64) -> AdcResult<()> {
        let word = ((encode_offset(q) as u16) << 8) | encode_offset(i) as u16;
        self.link.write(RegisterAddress::Offset, word)?;
        self.offset_i = i;
        self.offset_q = q;
        self.timing_dirty = true;
        debug!(offset_i = i, offset_q = q, "offset register written");
        Ok(())
    }

    /// Set one channel's analog gain code (128 = 0 dB). The `u8` domain is
    /// exactly the device domain, so no range check is needed.
    pub fn set_gain(&mut self, channel: Channel, code: u8) -> AdcResult<()> {
        let (i, q) = match channel {
            Channel::I => (code, self.gain_q),
            Channel::Q => (self.gain_i, code),
        };
        self.write_gains(i, q)
    }

    /// Raise one channel's gain code by one. `Ok(false)` at 255.
    pub fn increment_gain(&mut self, channel: Channel) -> AdcResult<bool> {
        let cur = self.gain(channel);
        if cur == u8::MAX {
            warn!(%channel, "gain already at maximum");
            return Ok(false);
        }
        self.set_gain(channel, cur + 1)?;
        Ok(true)
    }

    /// Lower one channel's gain code by one. `Ok(false)` at 0.
    pub fn decrement_gain(&mut self, channel: Channel) -> AdcResult<bool> {
        let cur = self.gain(channel);
        if cur == 0 {
            warn!(%channel, "gain already at minimum");
            return Ok(false);
        }
        self.set_gain(channel, cur - 1)?;
        Ok(true)
    }

    fn write_gains(&mut self, i: u8, q: u8) -> AdcResult<()> {
        let word = ((q as u16) << 8) | i as u16;
        self.link.write(RegisterAddress::Gain, word)?;
        self.gain_i = i;
        self.gain_q = q;
        debug!(gain_i = i, gain_q = q, "gain register written");
        Ok(())
    }

    /// Set one channel's gain-compensation code.
    pub fn set_gain_compensation(&mut self, channel: Channel, code: i8) -> AdcResult<()> {
        if !(-GAIN_COMP_MAX..=GAIN_COMP_MAX).contains(&code) {
            return Err(AdcError::OutOfRange {
                field: "gain compensation",
                value: code as f64,
                min: -GAIN_COMP_MAX as f64,
                max: GAIN_COMP_MAX as f64,
            });
        }
        let (i, q) = match channel {
            Channel::I => (code, self.gain_comp_q),
            Channel::Q => (self.gain_comp_i, code),
        };
        let word = ((encode_gain_comp(q) as u16) << 8) | encode_gain_comp(i) as u16;
        self.link.write(RegisterAddress::GainCompensation, word)?;
        self.gain_comp_i = i;
        self.gain_comp_q = q;
        debug!(gain_comp_i = i, gain_comp_q = q, "gain compensation written");
        Ok(())
    }

    /// Set one channel's fine sampling-delay code.
    pub fn set_timing_skew(&mut self, channel: Channel, code: i8) -> AdcResult<()> {
        if !(-TIMING_SKEW_MAX..=TIMING_SKEW_MAX).contains(&code) {
            return Err(AdcError::OutOfRange {
                field: "timing skew",
                value: code as f64,
                min: -TIMING_SKEW_MAX as f64,
                max: TIMING_SKEW_MAX as f64,
            });
        }
        let (i, q) = match channel {
            Channel::I => (code, self.timing_skew_q),
            Channel::Q => (self.timing_skew_i, code),
        };
        self.write_skews(i, q)
    }

    /// Raise one channel's skew code by one. `Ok(false)` at the maximum.
    pub fn increment_timing_skew(&mut self, channel: Channel) -> AdcResult<bool> {
        self.step_skew(channel, 1)
    }

    /// Lower one channel's skew code by one. `Ok(false)` at the minimum.
    pub fn decrement_timing_skew(&mut self, channel: Channel) -> AdcResult<bool> {
        self.step_skew(channel, -1)
    }

    fn step_skew(&mut self, channel: Channel, delta: i8) -> AdcResult<bool> {
        let next = self.timing_skew(channel) + delta;
        if !(-TIMING_SKEW_MAX..=TIMING_SKEW_MAX).contains(&next) {
            warn!(%channel, "timing skew already at bound");
            return Ok(false);
        }
        let (i, q) = match channel {
            Channel::I => (next, self.timing_skew_q),
            Channel::Q => (self.timing_skew_i, next),
        };
        self.write_skews(i, q)?;
        Ok(true)
    }

    fn write_skews(&mut self, i: i8, q: i8) -> AdcResult<()> {
        let word = ((encode_skew(i) as u16) << 11)
            | ((encode_skew(q) as u16) << 6)
            | ((self.drda_q as u16) << 3)
            | self.drda_i as u16;
        self.link.write(RegisterAddress::TimingSkew, word)?;
        self.timing_skew_i = i;
        self.timing_skew_q = q;
        self.timing_dirty = true;
        debug!(skew_i = i, skew_q = q, "timing skew register written");
        Ok(())
    }

    /// Switch the internal calibration machinery.
    pub fn set_cal_mode(&mut self, mode: CalMode) -> AdcResult<()> {
        let mut control = self.control;
        control.cal_mode = mode;
        self.write_control(control, false)
    }

    /// Change the analog input routing.
    pub fn set_analogue_routing(&mut self, mode: RoutingMode) -> AdcResult<()> {
        let mut control = self.control;
        control.routing = mode;
        self.write_control(control, true)
    }

    /// Change the core clock phase relationship.
    pub fn set_clock_phase(&mut self, mode: ClockPhase) -> AdcResult<()> {
        let mut control = self.control;
        control.clock_phase = mode;
        self.write_control(control, true)
    }

    fn write_control(&mut self, control: ControlWord, affects_timing: bool) -> AdcResult<()> {
        self.link.write(RegisterAddress::Control, control.word())?;
        self.control = control;
        if affects_timing {
            self.timing_dirty = true;
        }
        debug!(word = control.word(), "control register written");
        Ok(())
    }

    /// Rewrite every register from the model.
    pub fn write_all(&mut self) -> AdcResult<()> {
        self.write_control(self.control, true)?;
        self.write_gains(self.gain_i, self.gain_q)?;
        self.write_offsets(self.offset_i, self.offset_q)?;
        self.set_gain_compensation(Channel::I, self.gain_comp_i)?;
        let word = 0x8400 | ((self.isa_q as u16) << 3) | self.isa_i as u16;
        self.link.write(RegisterAddress::SamplingAdjust, word)?;
        self.write_skews(self.timing_skew_i, self.timing_skew_q)?;
        info!(zdok = self.zdok, "full register file written");
        Ok(())
    }

    /// Return both offsets to 0 LSB.
    pub fn zero_offsets(&mut self) -> AdcResult<()> {
        self.write_offsets(0.0, 0.0)
    }

    /// Return both gains to the 0 dB code.
    pub fn unity_gains(&mut self) -> AdcResult<()> {
        self.write_gains(GAIN_CENTER, GAIN_CENTER)
    }

    /// Wait out the analog settling time, then reset the clock manager if
    /// any timing-affecting field was written since the last settle.
    ///
    /// The engine calls this once after each write (or write batch); the
    /// device is in a consistent, fully committed state afterwards.
    pub fn settle(&mut self, wait: Duration) -> AdcResult<()> {
        if !wait.is_zero() {
            thread::sleep(wait);
        }
        if self.timing_dirty {
            self.link.reset_clock_manager()?;
            self.timing_dirty = false;
            debug!(zdok = self.zdok, "clock manager reset");
        }
        Ok(())
    }

    /// Flat field-name to value mapping of the whole register file.
    pub fn snapshot(&self) -> RegisterSnapshot {
        RegisterSnapshot {
            zdok: self.zdok,
            control: self.control.word(),
            offset_vi: self.offset_i,
            offset_vq: self.offset_q,
            analogue_gain_vi: self.gain_i,
            analogue_gain_vq: self.gain_q,
            gain_compensation_vi: self.gain_comp_i,
            gain_compensation_vq: self.gain_comp_q,
            timing_skew_vi: self.timing_skew_i,
            timing_skew_vq: self.timing_skew_q,
            drda_vi: self.drda_i,
            drda_vq: self.drda_q,
            isa_vi: self.isa_i,
            isa_vq: self.isa_q,
        }
    }

    /// Replace the whole model from a snapshot and push it to the device.
    ///
    /// Field domains are re-validated (a snapshot may come from a hand-edited
    /// file); nothing is written unless every field is acceptable.
    pub fn restore(&mut self, snapshot: &RegisterSnapshot) -> AdcResult<()> {
        let control = ControlWord::from_word(snapshot.control)?;
        check_offset_field("offset_vi", snapshot.offset_vi)?;
        check_offset_field("offset_vq", snapshot.offset_vq)?;
        check_signed_code("gain_compensation_vi", snapshot.gain_compensation_vi, GAIN_COMP_MAX)?;
        check_signed_code("gain_compensation_vq", snapshot.gain_compensation_vq, GAIN_COMP_MAX)?;
        check_signed_code("timing_skew_vi", snapshot.timing_skew_vi, TIMING_SKEW_MAX)?;
        check_signed_code("timing_skew_vq", snapshot.timing_skew_vq, TIMING_SKEW_MAX)?;
        check_delay_code("drda_vi", snapshot.drda_vi)?;
        check_delay_code("drda_vq", snapshot.drda_vq)?;
        check_delay_code("isa_vi", snapshot.isa_vi)?;
        check_delay_code("isa_vq", snapshot.isa_vq)?;
        if snapshot.zdok != self.zdok {
            warn!(
                model = self.zdok,
                snapshot = snapshot.zdok,
                "snapshot was saved for a different zdok slot"
            );
        }

        self.control = control;
        self.offset_i = snapshot.offset_vi;
        self.offset_q = snapshot.offset_vq;
        self.gain_i = snapshot.analogue_gain_vi;
        self.gain_q = snapshot.analogue_gain_vq;
        self.gain_comp_i = snapshot.gain_compensation_vi;
        self.gain_comp_q = snapshot.gain_compensation_vq;
        self.timing_skew_i = snapshot.timing_skew_vi;
        self.timing_skew_q = snapshot.timing_skew_vq;
        self.drda_i = snapshot.drda_vi;
        self.drda_q = snapshot.drda_vq;
        self.isa_i = snapshot.isa_vi;
        self.isa_q = snapshot.isa_vq;
        self.write_all()?;
        info!(zdok = self.zdok, "register file restored from snapshot");
        Ok(())
    }
}

fn check_offset_field(field: &'static str, value: f64) -> AdcResult<()> {
    if (-OFFSET_MAX_LSB..=OFFSET_MAX_LSB).contains(&value) {
        Ok(())
    } else {
        Err(AdcError::OutOfRange {
            field,
            value,
            min: -OFFSET_MAX_LSB,
            max: OFFSET_MAX_LSB,
        })
    }
}

fn check_signed_code(field: &'static str, code: i8, max: i8) -> AdcResult<()> {
    if (-max..=max).contains(&code) {
        Ok(())
    } else {
        Err(AdcError::OutOfRange {
            field,
            value: code as f64,
            min: -max as f64,
            max: max as f64,
        })
    }
}

fn check_delay_code(field: &'static str, code: u8) -> AdcResult<()> {
    if code <= DELAY_CODE_MAX {
        Ok(())
    } else {
        Err(AdcError::OutOfRange {
            field,
            value: code as f64,
            min: 0.0,
            max: DELAY_CODE_MAX as f64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Records writes; never fails.
    #[derive(Default)]
    struct RecordingLink {
        writes: Vec<(RegisterAddress, u16)>,
        resets: u32,
    }

    impl AdcLink for &mut RecordingLink {
        fn write(&mut self, register: RegisterAddress, word: u16) -> AdcResult<()> {
            self.writes.push((register, word));
            Ok(())
        }

        fn reset_clock_manager(&mut self) -> AdcResult<()> {
            self.resets += 1;
            Ok(())
        }
    }

    fn model(link: &mut RecordingLink) -> RegisterModel<&mut RecordingLink> {
        RegisterModel::new(link, AdcConfig::default()).unwrap()
    }

    #[test]
    fn test_offset_encoding() {
        assert_eq!(encode_offset(0.0), 0x80);
        assert_eq!(encode_offset(31.75), 0xff);
        assert_eq!(encode_offset(-31.75), 0x7f);
        assert_eq!(encode_offset(0.25), 0x81);
        assert_eq!(encode_offset(-0.25), 0x01);
        assert_eq!(decode_offset(0x80), 0.0);
        assert_eq!(decode_offset(0x00), 0.0);
        assert_eq!(decode_offset(0xff), 31.75);
        assert_eq!(decode_offset(0x7f), -31.75);
        for code in [0x80u8, 0xff, 0x01, 0x7f, 0x9a] {
            assert_eq!(encode_offset(decode_offset(code)), code);
        }
    }

    #[test]
    fn test_sign_magnitude_codes() {
        assert_eq!(encode_gain_comp(63), 0x3f);
        assert_eq!(encode_gain_comp(-63), 0x7f);
        assert_eq!(encode_gain_comp(0), 0x00);
        assert_eq!(decode_gain_comp(0x7f), -63);
        assert_eq!(encode_skew(15), 0x0f);
        assert_eq!(encode_skew(-15), 0x1f);
        assert_eq!(decode_skew(0x1f), -15);
        for v in -15..=15 {
            assert_eq!(decode_skew(encode_skew(v)), v);
        }
    }

    #[test]
    fn test_control_word_packing() {
        // 800 MHz, independent routing, in-phase clocks, internal cal off
        let word = ControlWord::new(
            RoutingMode::Independent,
            ClockPhase::InPhase,
            CalMode::Disabled,
            800,
        )
        .word();
        assert_eq!(word, 0x70bc);

        let decoded = ControlWord::from_word(word).unwrap();
        assert_eq!(decoded.routing(), RoutingMode::Independent);
        assert_eq!(decoded.clock_phase(), ClockPhase::InPhase);
        assert_eq!(decoded.cal_mode(), CalMode::Disabled);
        assert_eq!(decoded.word(), word);

        // routing bits 0b01 are not a defined mode
        let bad = word & !(0b11 << 4) | (0b01 << 4);
        assert!(matches!(
            ControlWord::from_word(bad),
            Err(AdcError::InvalidMode { .. })
        ));
    }

    #[test]
    fn test_set_offset_writes_shared_register() {
        let mut link = RecordingLink::default();
        let mut m = model(&mut link);
        m.set_offset(Channel::Q, 1.25).unwrap();
        assert_eq!(m.offset(Channel::Q), 1.25);
        assert_eq!(m.offset(Channel::I), 0.0);
        // one write carrying both channels: Q=0x85 high byte, I=0x80 low
        let last = *m.link.writes.last().unwrap();
        assert_eq!(last, (RegisterAddress::Offset, 0x8580));
    }

    #[test]
    fn test_out_of_range_offset_leaves_model_untouched() {
        let mut link = RecordingLink::default();
        let mut m = model(&mut link);
        let writes_before = m.link.writes.len();
        let err = m.set_offset(Channel::I, 40.0).unwrap_err();
        assert!(matches!(err, AdcError::OutOfRange { .. }));
        assert_eq!(m.offset(Channel::I), 0.0);
        assert_eq!(m.link.writes.len(), writes_before, "no hardware write");
    }

    #[test]
    fn test_increment_clamps_at_bound() {
        let mut link = RecordingLink::default();
        let mut m = model(&mut link);
        m.set_offset(Channel::I, OFFSET_MAX_LSB).unwrap();
        assert!(!m.increment_offset(Channel::I).unwrap());
        assert_eq!(m.offset(Channel::I), OFFSET_MAX_LSB);
        assert!(m.decrement_offset(Channel::I).unwrap());
        assert_eq!(m.offset(Channel::I), 31.5);

        m.set_gain(Channel::Q, 255).unwrap();
        assert!(!m.increment_gain(Channel::Q).unwrap());
        m.set_gain(Channel::Q, 0).unwrap();
        assert!(!m.decrement_gain(Channel::Q).unwrap());

        m.set_timing_skew(Channel::Q, TIMING_SKEW_MAX).unwrap();
        assert!(!m.increment_timing_skew(Channel::Q).unwrap());
    }

    #[test]
    fn test_batched_writes_settle_once() {
        let mut link = RecordingLink::default();
        let mut m = model(&mut link);
        m.settle(Duration::ZERO).unwrap(); // clears construction-time debt
        let resets = m.link.resets;

        m.decrement_offset(Channel::I).unwrap();
        m.decrement_offset(Channel::Q).unwrap();
        assert!(m.needs_clock_reset());
        m.settle(Duration::ZERO).unwrap();
        assert_eq!(m.link.resets, resets + 1, "two writes, one reset");
        assert!(!m.needs_clock_reset());

        // gain does not affect sampling timing
        m.increment_gain(Channel::I).unwrap();
        m.settle(Duration::ZERO).unwrap();
        assert_eq!(m.link.resets, resets + 1);

        m.set_clock_phase(ClockPhase::Quadrature).unwrap();
        m.settle(Duration::ZERO).unwrap();
        assert_eq!(m.link.resets, resets + 2);
    }

    #[test]
    fn test_mode_and_convenience_setters() {
        let mut link = RecordingLink::default();
        let mut m = model(&mut link);
        m.set_offset(Channel::I, 5.0).unwrap();
        m.set_gain(Channel::I, 10).unwrap();
        m.zero_offsets().unwrap();
        m.unity_gains().unwrap();
        assert_eq!(m.offset(Channel::I), 0.0);
        assert_eq!(m.offset(Channel::Q), 0.0);
        assert_eq!(m.gain(Channel::I), GAIN_CENTER);

        m.set_cal_mode(CalMode::Continuous).unwrap();
        assert_eq!(m.cal_mode(), CalMode::Continuous);
        assert_eq!((m.control_word() >> 10) & 0b11, 0b11);

        m.set_analogue_routing(RoutingMode::InterleavedI).unwrap();
        assert_eq!(m.routing(), RoutingMode::InterleavedI);
        assert!(m.needs_clock_reset(), "routing affects sampling timing");
    }

    #[test]
    fn test_snapshot_restore_round_trip() {
        let mut link = RecordingLink::default();
        let mut m = model(&mut link);
        m.set_offset(Channel::I, -3.5).unwrap();
        m.set_offset(Channel::Q, 12.25).unwrap();
        m.set_gain(Channel::I, 140).unwrap();
        m.set_gain(Channel::Q, 117).unwrap();
        m.set_gain_compensation(Channel::Q, -20).unwrap();
        m.set_timing_skew(Channel::I, 5).unwrap();
        let snap = m.snapshot();

        let mut link2 = RecordingLink::default();
        let mut m2 = model(&mut link2);
        m2.restore(&snap).unwrap();
        assert_eq!(m2.snapshot(), snap);
        assert_eq!(m2.offset(Channel::Q), 12.25);
        assert_eq!(m2.gain(Channel::I), 140);
        assert_eq!(m2.gain_compensation(Channel::Q), -20);
        assert_eq!(m2.timing_skew(Channel::I), 5);
    }

    #[test]
    fn test_restore_rejects_out_of_domain_snapshot() {
        let mut link = RecordingLink::default();
        let mut m = model(&mut link);
        let mut snap = m.snapshot();
        snap.timing_skew_vq = 99;
        let before = m.snapshot();
        assert!(matches!(
            m.restore(&snap),
            Err(AdcError::OutOfRange { field: "timing_skew_vq", .. })
        ));
        assert_eq!(m.snapshot(), before, "failed restore must not commit");
    }
}
