//! Maps `Box<dyn Error>` from trait boundaries to typed `ControlError`.
//!
//! The traits in `stroker_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, with an optional
//! feature-gated path for `stroker_hardware::error::HwError` downcasting.

use crate::error::ControlError;

/// Map a trait-boundary error to a typed `ControlError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to string-based heuristics.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> ControlError {
    #[cfg(feature = "hardware-errors")]
    {
        use stroker_hardware::error::HwError;
        if let Some(hw) = e.downcast_ref::<HwError>() {
            return match hw {
                HwError::Timeout => ControlError::Timeout("hardware"),
                HwError::Unavailable(what) => ControlError::CollaboratorUnavailable(what.clone()),
                HwError::InvalidParam(what) => ControlError::InvalidParameter(what.clone()),
                other => ControlError::Hardware(other.to_string()),
            };
        }
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        ControlError::Timeout("hardware")
    } else {
        ControlError::Hardware(s)
    }
}
