#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::missing_errors_doc,
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss
)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Motion-control and safety core of a single-axis linear actuator (hardware-agnostic).
//!
//! All hardware interactions go through the `stroker_traits` collaborator
//! traits: a motion primitive, a pattern source, raw input primitives, a force
//! limiter and persistence.
//!
//! ## Architecture
//!
//! - **Calibration**: mechanical constants and derived steps/mm (`calibration`)
//! - **Input mapping**: ADC, encoder and button to percentages and events (`input`)
//! - **Safety**: current/voltage supervision with a latched interlock (`safety`)
//! - **Homing**: end-stop detection and travel measurement (`homing`)
//! - **Modes**: run mode, knob mode and the live parameter set (`modes`)
//! - **Executors**: simple penetration and pattern-driven motion (`executor`)
//! - **Controller**: one context object and the cooperative tick (`controller`)
//!
//! Positions seen by executors and reported in snapshots are in millimetres
//! from the homed zero, positive away from the home end-stop.

pub mod builder;
pub mod calibration;
pub mod config;
pub mod controller;
pub mod conversions;
pub mod error;
pub mod executor;
pub mod frame;
pub mod homing;
pub mod hw_error;
pub mod input;
pub mod mocks;
pub mod modes;
pub mod runner;
pub mod safety;
pub mod stats;
pub mod util;

pub use builder::{ControllerBuilder, ControllerParts, DynController, build_controller};
pub use calibration::DeviceCalibration;
pub use config::{
    ControlCfg, EncoderMode, HomeDirection, HomingCfg, HomingMethod, InputCfg, SafetyCfg,
};
pub use controller::{
    Controller, ControllerSnapshot, ExternalCommand, MotionState, RemoteHandle, TickStatus,
};
pub use error::{BuildError, ControlError, InterlockReason, Result};
pub use homing::{HomingOutcome, HomingState};
pub use modes::{KnobMode, Parameter, ParameterSet, RunMode};
pub use runner::{HomeOptions, RunOptions, SessionSummary, StopCause};
pub use safety::{ForceCapability, SafetyState};
