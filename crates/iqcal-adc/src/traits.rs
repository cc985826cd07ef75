//! Collaborator traits: the device link and the sample source.
//!
//! The calibration engine never talks to hardware directly. It writes
//! register words through an [`AdcLink`] and reads captured batches through
//! a [`SampleSource`]; the FPGA transport behind both is someone else's
//! problem. The [`crate::sim`] module provides software implementations of
//! both for development and testing.

use crate::error::AdcResult;
use crate::types::{ChannelSelector, RegisterAddress};

/// Write path to the converter's registers.
pub trait AdcLink {
    /// Write a 16-bit word to one device register.
    fn write(&mut self, register: RegisterAddress, word: u16) -> AdcResult<()>;

    /// Reset the downstream clock manager.
    ///
    /// Required after any write that affects sampling timing before
    /// captured data is meaningful again.
    fn reset_clock_manager(&mut self) -> AdcResult<()>;
}

/// Read path: captured sample batches and their statistics.
///
/// A source may buffer the last hardware capture; [`SampleSource::resample`]
/// forces the next read to reflect the current hardware state. The engine
/// calls it after every settle.
pub trait SampleSource {
    /// Sample rate of a single-channel capture, in Hz.
    fn sample_rate(&self) -> f64;

    /// Capture a batch of digitized samples for the selected channel.
    fn capture(&mut self, selector: ChannelSelector) -> AdcResult<Vec<f64>>;

    /// Force a fresh hardware capture before the next read.
    fn resample(&mut self) -> AdcResult<()>;

    /// Mean of a freshly captured batch.
    fn mean(&mut self, selector: ChannelSelector) -> AdcResult<f64> {
        Ok(iqcal_core::stats::mean(&self.capture(selector)?))
    }

    /// Sum-of-squares energy of a freshly captured batch.
    fn energy(&mut self, selector: ChannelSelector) -> AdcResult<f64> {
        Ok(iqcal_core::stats::sum_squares(&self.capture(selector)?))
    }
}
