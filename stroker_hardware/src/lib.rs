//! Collaborators for the stroker core: a simulated rail, the reference
//! pattern library, a file-backed settings store and (with the `hardware`
//! feature) GPIO inputs.

pub mod error;
#[cfg(feature = "hardware")]
pub mod gpio;
pub mod patterns;
pub mod sim;
pub mod store;

pub use patterns::{PatternKind, PatternLibrary};
pub use sim::{
    MemoryStore, SimActuator, SimButton, SimForceLimiter, SimHomeSwitch, SimKnob, SimRail,
    SimRailCfg, SimSensors,
};
pub use store::FileStore;
