use thiserror::Error;

/// Why the safety interlock latched.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum InterlockReason {
    #[error("overcurrent: {amps:.2} A exceeds {limit:.2} A")]
    Overcurrent { amps: f32, limit: f32 },
    #[error("sustained current: average {amps:.2} A above {limit:.2} A for more than {ms} ms")]
    SustainedCurrent { amps: f32, limit: f32, ms: u64 },
    #[error("supply voltage {volts:.1} V outside [{min:.1}, {max:.1}] V")]
    SupplyVoltage { volts: f32, min: f32, max: f32 },
    #[error("current sensor failed {count} consecutive reads")]
    SensorFailure { count: u8 },
    #[error("motion primitive fault: {0}")]
    MotionFault(String),
}

impl InterlockReason {
    /// Hard interlocks stop the axis on the spot instead of decelerating.
    pub fn is_hard(&self) -> bool {
        matches!(self, Self::Overcurrent { .. })
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ControlError {
    #[error("homing failed: {0}")]
    HomingFailed(String),
    #[error("interlock active: {0}")]
    Interlock(InterlockReason),
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("collaborator unavailable: {0}")]
    CollaboratorUnavailable(String),
    #[error("axis not homed")]
    NotHomed,
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("hardware error: {0}")]
    Hardware(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing motion primitive")]
    MissingMotion,
    #[error("missing pattern source")]
    MissingPatterns,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
