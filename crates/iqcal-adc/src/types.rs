//! Core types: channels, register addresses, mode enumerations, and
//! calibration run results.
//!
//! Every mode is a closed enum carrying its device bit pattern; an invalid
//! pattern cannot be represented, and decoding a foreign bit pattern (e.g.
//! from a persisted control word) fails fast instead of producing undefined
//! register contents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::AdcError;

/// One physical converter core / analog input path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Channel {
    I,
    Q,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::I => write!(f, "I"),
            Channel::Q => write!(f, "Q"),
        }
    }
}

/// What a sample source should capture: one physical channel, or the
/// virtual stream formed by alternating samples of both cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChannelSelector {
    I,
    Q,
    Interleaved,
}

impl fmt::Display for ChannelSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelSelector::I => write!(f, "I"),
            ChannelSelector::Q => write!(f, "Q"),
            ChannelSelector::Interleaved => write!(f, "interleaved"),
        }
    }
}

/// SPI register addresses of the converter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterAddress {
    /// Packed control word
    Control,
    /// Per-channel analog gain codes
    Gain,
    /// Per-channel DC offset codes (shared register, I low byte, Q high)
    Offset,
    /// Per-channel gain-compensation codes
    GainCompensation,
    /// Initial sampling adjustment (set once at construction)
    SamplingAdjust,
    /// Fine sampling-delay and data-ready delay codes
    TimingSkew,
}

impl RegisterAddress {
    /// Device address of this register.
    pub fn addr(self) -> u8 {
        match self {
            RegisterAddress::Control => 0x00,
            RegisterAddress::Gain => 0x01,
            RegisterAddress::Offset => 0x02,
            RegisterAddress::GainCompensation => 0x03,
            RegisterAddress::SamplingAdjust => 0x04,
            RegisterAddress::TimingSkew => 0x07,
        }
    }
}

impl fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}(0x{:02x})", self, self.addr())
    }
}

/// How the analog inputs are routed onto the two converter cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingMode {
    /// InI -> core I, InQ -> core Q
    Independent,
    /// InI drives both cores (interleaved sampling of input I)
    InterleavedI,
    /// InQ drives both cores
    InterleavedQ,
}

impl RoutingMode {
    /// Control-word bit pattern (bits 5..4).
    pub fn bits(self) -> u16 {
        match self {
            RoutingMode::Independent => 0b11,
            RoutingMode::InterleavedI => 0b10,
            RoutingMode::InterleavedQ => 0b00,
        }
    }

    /// Decode the control-word bit pattern.
    pub fn from_bits(bits: u16) -> Result<Self, AdcError> {
        match bits {
            0b11 => Ok(RoutingMode::Independent),
            0b10 => Ok(RoutingMode::InterleavedI),
            0b00 => Ok(RoutingMode::InterleavedQ),
            other => Err(AdcError::InvalidMode {
                what: "analogue routing",
                name: format!("{other:#04b}"),
            }),
        }
    }
}

/// Phase relationship between the two cores' sampling clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockPhase {
    /// Both cores clocked in phase
    InPhase,
    /// 90 degree shift between cores
    Quadrature,
    /// 180 degree shift
    Negative,
}

impl ClockPhase {
    /// Control-word bit pattern (bits 7..6).
    pub fn bits(self) -> u16 {
        match self {
            ClockPhase::InPhase => 0b10,
            ClockPhase::Quadrature => 0b11,
            ClockPhase::Negative => 0b00,
        }
    }

    /// Decode the control-word bit pattern.
    pub fn from_bits(bits: u16) -> Result<Self, AdcError> {
        match bits {
            0b10 => Ok(ClockPhase::InPhase),
            0b11 => Ok(ClockPhase::Quadrature),
            0b00 => Ok(ClockPhase::Negative),
            other => Err(AdcError::InvalidMode {
                what: "clock phase",
                name: format!("{other:#04b}"),
            }),
        }
    }
}

/// State of the converter's internal calibration machinery.
///
/// Must be [`CalMode::Disabled`] while this crate's engine drives the
/// compensation registers itself; the internal machinery would fight it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalMode {
    /// Internal calibration off; registers under external control
    Disabled,
    /// Freeze and keep the last internally computed values
    KeepLast,
    /// Continuous internal recalibration
    Continuous,
}

impl CalMode {
    /// Control-word bit pattern (bits 11..10).
    pub fn bits(self) -> u16 {
        match self {
            CalMode::Disabled => 0b00,
            CalMode::KeepLast => 0b01,
            CalMode::Continuous => 0b11,
        }
    }

    /// Decode the control-word bit pattern.
    pub fn from_bits(bits: u16) -> Result<Self, AdcError> {
        match bits {
            0b00 => Ok(CalMode::Disabled),
            0b01 => Ok(CalMode::KeepLast),
            0b11 => Ok(CalMode::Continuous),
            other => Err(AdcError::InvalidMode {
                what: "calibration",
                name: format!("{other:#04b}"),
            }),
        }
    }
}

/// What a calibration run adjusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalTarget {
    OffsetI,
    OffsetQ,
    OffsetInterleaved,
    GainBalance,
    TimingSkew,
}

impl fmt::Display for CalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalTarget::OffsetI => write!(f, "offset I"),
            CalTarget::OffsetQ => write!(f, "offset Q"),
            CalTarget::OffsetInterleaved => write!(f, "offset interleaved"),
            CalTarget::GainBalance => write!(f, "gain balance"),
            CalTarget::TimingSkew => write!(f, "timing skew"),
        }
    }
}

/// Why a calibration run stopped.
///
/// These are result states, not errors: the search loops signal boundaries
/// and broken assumptions through their return value so callers can decide
/// what to do, instead of using failures as control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// Target condition reached
    Converged,
    /// An adjustment hit a register bound before the target was reached
    Saturated,
    /// A step failed to move the measurement in the expected direction;
    /// either the device is at a physical limit or a precondition (e.g.
    /// signal present) does not hold
    NonMonotonic,
    /// Hard per-run step ceiling reached
    StepLimit,
}

impl Termination {
    /// True for the successful terminal state.
    pub fn is_success(self) -> bool {
        matches!(self, Termination::Converged)
    }
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Termination::Converged => write!(f, "converged"),
            Termination::Saturated => write!(f, "saturated"),
            Termination::NonMonotonic => write!(f, "non-monotonic response"),
            Termination::StepLimit => write!(f, "step limit"),
        }
    }
}

/// Outcome of one calibration run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationResult {
    /// What was adjusted
    pub target: CalTarget,
    /// Steering measurement before the run (mean, energy difference, or
    /// phase, depending on the target)
    pub before: f64,
    /// The same measurement after the run
    pub after: f64,
    /// Register adjustment steps taken (including any reverted step)
    pub steps: u32,
    /// Terminal state of the run
    pub termination: Termination,
}

impl CalibrationResult {
    /// True if the run reached its target condition.
    pub fn succeeded(&self) -> bool {
        self.termination.is_success()
    }
}

impl fmt::Display for CalibrationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {} after {} steps ({} -> {})",
            self.target, self.termination, self.steps, self.before, self.after
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_bits_round_trip() {
        for mode in [
            RoutingMode::Independent,
            RoutingMode::InterleavedI,
            RoutingMode::InterleavedQ,
        ] {
            assert_eq!(RoutingMode::from_bits(mode.bits()).unwrap(), mode);
        }
        for mode in [ClockPhase::InPhase, ClockPhase::Quadrature, ClockPhase::Negative] {
            assert_eq!(ClockPhase::from_bits(mode.bits()).unwrap(), mode);
        }
        for mode in [CalMode::Disabled, CalMode::KeepLast, CalMode::Continuous] {
            assert_eq!(CalMode::from_bits(mode.bits()).unwrap(), mode);
        }
    }

    #[test]
    fn test_unknown_bit_patterns_rejected() {
        assert!(matches!(
            RoutingMode::from_bits(0b01),
            Err(AdcError::InvalidMode { .. })
        ));
        assert!(matches!(
            ClockPhase::from_bits(0b01),
            Err(AdcError::InvalidMode { .. })
        ));
        assert!(matches!(
            CalMode::from_bits(0b10),
            Err(AdcError::InvalidMode { .. })
        ));
    }

    #[test]
    fn test_register_addresses() {
        assert_eq!(RegisterAddress::Control.addr(), 0x00);
        assert_eq!(RegisterAddress::Gain.addr(), 0x01);
        assert_eq!(RegisterAddress::Offset.addr(), 0x02);
        assert_eq!(RegisterAddress::GainCompensation.addr(), 0x03);
        assert_eq!(RegisterAddress::SamplingAdjust.addr(), 0x04);
        assert_eq!(RegisterAddress::TimingSkew.addr(), 0x07);
    }
}
