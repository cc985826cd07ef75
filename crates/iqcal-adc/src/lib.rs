//! # Dual-Channel ADC Front-End Control and Calibration
//!
//! This crate drives the analog front end of a dual-core ADC card on an
//! FPGA data-acquisition board and tunes it in closed loop until the
//! digitized I and Q channels are balanced and synchronized:
//!
//! - **Register model**: every tunable parameter (offsets, gains, gain
//!   compensation, timing skew, mode word) as a typed, range-checked field
//!   with the device's bit packing, written through immediately so the
//!   model never diverges from hardware state.
//! - **Calibration engine**: feedback searches that null each channel's DC
//!   offset, balance the channels' energies, and zero the inter-channel
//!   phase, stepping one register code at a time with settle-and-remeasure
//!   discipline and explicit saturation/monotonicity guards.
//! - **Persistence**: the whole register file round-trips through a strict
//!   flat JSON snapshot.
//! - **Simulation**: a software plant implementing both collaborator traits
//!   for development and testing without hardware.
//!
//! The FPGA transport itself stays behind the [`traits::AdcLink`] and
//! [`traits::SampleSource`] traits; this crate never talks to a board
//! directly.
//!
//! ## Example
//!
//! ```rust
//! use std::time::Duration;
//!
//! use iqcal_adc::calibration::{CalConfig, CalibrationEngine};
//! use iqcal_adc::registers::{AdcConfig, RegisterModel};
//! use iqcal_adc::sim::{SimAdc, SimPlant};
//!
//! // A simulated converter whose I channel carries a DC error.
//! let sim = SimAdc::new(SimPlant {
//!     dc_error_i: 1.5,
//!     ..SimPlant::default()
//! });
//!
//! let mut model = RegisterModel::new(sim.link(), AdcConfig::default()).unwrap();
//! let mut source = sim.source();
//! let config = CalConfig {
//!     settle: Duration::ZERO, // the sim settles instantly
//!     ..CalConfig::default()
//! };
//! let mut engine = CalibrationEngine::new(&mut model, &mut source, config);
//!
//! let results = engine.run_offset_calibration().unwrap();
//! assert!(results.iter().all(|r| r.succeeded()));
//!
//! // Persist the tuned register file for the next session.
//! let snapshot = model.snapshot();
//! let json = snapshot.to_json().unwrap();
//! assert!(json.contains("offset_vi"));
//! ```

pub mod calibration;
pub mod error;
pub mod persist;
pub mod registers;
pub mod sim;
pub mod traits;
pub mod types;

// Re-export main types
pub use calibration::{CalConfig, CalibrationEngine};
pub use error::{AdcError, AdcResult};
pub use persist::RegisterSnapshot;
pub use registers::{AdcConfig, ControlWord, RegisterModel};
pub use traits::{AdcLink, SampleSource};
pub use types::{
    CalMode, CalTarget, CalibrationResult, Channel, ChannelSelector, ClockPhase, RegisterAddress,
    RoutingMode, Termination,
};
