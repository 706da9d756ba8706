use thiserror::Error;

#[derive(Debug, Error)]
pub enum HwError {
    #[error("gpio error: {0}")]
    Gpio(String),
    #[error("hardware timeout")]
    Timeout,
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("store format: {0}")]
    Format(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, HwError>;
