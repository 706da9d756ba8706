//! Human-readable error descriptions, exit codes and structured JSON errors.

use std::fmt;

use serde_json::json;
use stroker_core::error::{BuildError, ControlError, InterlockReason};

use crate::cli::LAST_SAFETY;

/// Exit code for configuration errors (shared with clap usage errors).
pub const EXIT_CONFIG: i32 = 2;
pub const EXIT_HOMING: i32 = 3;
pub const EXIT_INTERLOCK: i32 = 4;

/// Context attached to config load failures; `exit_code_for_error` looks for it.
#[derive(Debug, Clone, Copy)]
pub struct InvalidConfigFile;

impl fmt::Display for InvalidConfigFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid configuration")
    }
}

pub fn interlock_reason_name(r: &InterlockReason) -> &'static str {
    match r {
        InterlockReason::Overcurrent { .. } => "Overcurrent",
        InterlockReason::SustainedCurrent { .. } => "SustainedCurrent",
        InterlockReason::SupplyVoltage { .. } => "SupplyVoltage",
        InterlockReason::SensorFailure { .. } => "SensorFailure",
        InterlockReason::MotionFault(_) => "MotionFault",
    }
}

fn is_config_error(err: &eyre::Report) -> bool {
    err.downcast_ref::<InvalidConfigFile>().is_some()
        || matches!(
            err.downcast_ref::<BuildError>(),
            Some(BuildError::InvalidConfig(_))
        )
}

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if err.downcast_ref::<InvalidConfigFile>().is_some() {
        let cause = err
            .chain()
            .nth(1)
            .map_or_else(String::new, |c| format!(" ({c})"));
        return format!(
            "What happened: The config file could not be used{cause}.\nLikely causes: Wrong --config path, TOML syntax error, or an out-of-range value.\nHow to fix: Fix the file (see etc/stroker.toml for a complete sample) and rerun."
        );
    }

    if let Some(be) = err.downcast_ref::<BuildError>() {
        return match be {
            BuildError::MissingMotion => {
                "What happened: No motion primitive was provided to the controller.\nLikely causes: The actuator failed to initialize or was not wired into the builder.\nHow to fix: Pass the actuator via with_motion(...).".to_string()
            }
            BuildError::MissingPatterns => {
                "What happened: No pattern source was provided to the controller.\nLikely causes: The pattern library was not wired into the builder.\nHow to fix: Pass a pattern source via with_patterns(...).".to_string()
            }
            BuildError::InvalidConfig(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: A setting the control core cannot run with, or a missing input it depends on.\nHow to fix: Edit the config file, then rerun."
            ),
        };
    }

    if let Some(ce) = err.downcast_ref::<ControlError>() {
        return match ce {
            ControlError::HomingFailed(why) => format!(
                "What happened: Homing failed ({why}).\nLikely causes: No end stop within homing.max_distance_mm, a stall threshold that never trips, or a home switch that never closes.\nHow to fix: Check the rail for obstructions, then tune homing.stall_current_amps or homing.max_distance_mm."
            ),
            ControlError::Timeout(what) => format!(
                "What happened: Timed out waiting for {what}.\nLikely causes: The axis is blocked or moving far slower than configured.\nHow to fix: Check mechanics, or raise --timeout-s."
            ),
            ControlError::Interlock(reason) => {
                let hint = match reason {
                    InterlockReason::Overcurrent { .. } | InterlockReason::SustainedCurrent { .. } => {
                        "Likely causes: Mechanical binding, a too-high force setting, or a limit set too low.\nHow to fix: Free the rail, lower --force, or raise safety.overcurrent_amps / safety.sustained_amps."
                    }
                    InterlockReason::SupplyVoltage { .. } => {
                        "Likely causes: Wrong or failing power supply.\nHow to fix: Check the supply, or adjust safety.min_supply_volts / safety.max_supply_volts."
                    }
                    InterlockReason::SensorFailure { .. } => {
                        "Likely causes: Current sense wiring or ADC fault.\nHow to fix: Check the sensor wiring; the axis stays blocked until it reads again."
                    }
                    InterlockReason::MotionFault(_) => {
                        "Likely causes: The driver rejected a move or reported a fault.\nHow to fix: Power-cycle the driver and check its alarm output."
                    }
                };
                format!("What happened: Safety interlock latched ({reason}).\n{hint}")
            }
            ControlError::NotHomed => {
                "What happened: The axis is not homed.\nLikely causes: Homing was skipped or lost after an interlock.\nHow to fix: Run `stroker home` or start a new session.".to_string()
            }
            other => format!(
                "What happened: {other}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    let msg = err.to_string();
    let lower = msg.to_ascii_lowercase();
    if lower.contains("open button pin") || lower.contains("open home switch pin") {
        return "What happened: Failed to initialize GPIO inputs.\nLikely causes: Incorrect pin numbers or insufficient GPIO permissions.\nHow to fix: Fix the [pins] values in the config; ensure the process may access GPIO.".to_string();
    }
    if lower.contains("open settings store") {
        return "What happened: The settings directory could not be opened.\nLikely causes: sim.store_dir points somewhere unwritable.\nHow to fix: Fix sim.store_dir or its permissions.".to_string();
    }

    let cause = err
        .chain()
        .nth(1)
        .map_or_else(String::new, |c| format!(" Cause: {c}"));
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes: config 2, homing 3, interlock 4, anything else 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    if is_config_error(err) {
        return EXIT_CONFIG;
    }
    match err.downcast_ref::<ControlError>() {
        Some(ControlError::HomingFailed(_) | ControlError::Timeout("homing")) => EXIT_HOMING,
        Some(ControlError::Interlock(_)) => EXIT_INTERLOCK,
        _ => 1,
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let msg = humanize(err);
    if let Some(ControlError::Interlock(reason)) = err.downcast_ref::<ControlError>() {
        let details = LAST_SAFETY.get().and_then(|s| match reason {
            InterlockReason::Overcurrent { amps, .. } => {
                Some(json!({ "amps": amps, "overcurrent_amps": s.overcurrent_amps }))
            }
            InterlockReason::SustainedCurrent { amps, .. } => Some(json!({
                "amps": amps,
                "sustained_amps": s.sustained_amps,
                "sustained_ms": s.sustained_ms,
            })),
            InterlockReason::SupplyVoltage { volts, .. } => Some(json!({
                "volts": volts,
                "min_supply_volts": s.min_supply_volts,
                "max_supply_volts": s.max_supply_volts,
            })),
            InterlockReason::SensorFailure { .. } | InterlockReason::MotionFault(_) => None,
        });
        let name = interlock_reason_name(reason);
        let obj = match details {
            Some(d) => json!({ "reason": name, "details": d, "message": msg }),
            None => json!({ "reason": name, "message": msg }),
        };
        return obj.to_string();
    }
    let reason = match exit_code_for_error(err) {
        EXIT_CONFIG => "InvalidConfig",
        EXIT_HOMING => "HomingFailed",
        _ => "Error",
    };
    json!({ "reason": reason, "message": msg }).to_string()
}
