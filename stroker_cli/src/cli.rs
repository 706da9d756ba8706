//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();
/// Effective safety thresholds for the current session (for JSON details).
pub static LAST_SAFETY: OnceLock<CliSafety> = OnceLock::new();

#[derive(Copy, Clone, Debug)]
pub struct CliSafety {
    pub overcurrent_amps: f32,
    pub sustained_amps: f32,
    pub sustained_ms: u64,
    pub min_supply_volts: f32,
    pub max_supply_volts: f32,
}

impl From<&stroker_config::SafetyCfg> for CliSafety {
    fn from(s: &stroker_config::SafetyCfg) -> Self {
        Self {
            overcurrent_amps: s.overcurrent_amps,
            sustained_amps: s.sustained_amps,
            sustained_ms: s.sustained_ms,
            min_supply_volts: s.min_supply_volts,
            max_supply_volts: s.max_supply_volts,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "stroker", version, about = "Linear stroker controller")]
pub struct Cli {
    /// Path to config TOML (typed)
    #[arg(long, value_name = "FILE", default_value = "etc/stroker.toml")]
    pub config: PathBuf,

    /// Log and report as JSON lines instead of pretty
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "info")]
    pub log_level: String,

    /// Drive the simulation on a virtual clock instead of wall time
    #[arg(long, action = ArgAction::SetTrue)]
    pub fast: bool,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

/// Memory locking mode for real-time operation.
#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum RtLock {
    /// Do not lock memory
    None,
    /// Lock currently resident pages
    Current,
    /// Lock current and future pages
    All,
}

impl RtLock {
    #[inline]
    pub fn os_default() -> Self {
        if cfg!(target_os = "linux") {
            RtLock::Current
        } else {
            RtLock::None
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ModeArg {
    /// Alternate between the depth and stroke ends
    Simple,
    /// Follow the selected pattern
    Pattern,
}

impl From<ModeArg> for stroker_core::RunMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Simple => Self::SimplePenetration,
            ModeArg::Pattern => Self::StrokeEnginePattern,
        }
    }
}

/// Parse a 0-100 percentage.
fn pct(s: &str) -> Result<f32, String> {
    let v: f32 = s.parse().map_err(|_| format!("`{s}` is not a number"))?;
    if (0.0..=100.0).contains(&v) {
        Ok(v)
    } else {
        Err(format!("{v} is outside 0..=100"))
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Home the axis and report the usable travel
    Home {
        /// Give up after this many seconds
        #[arg(long, value_name = "SECS", default_value_t = 60)]
        timeout_s: u64,
    },
    /// Home, then stroke with the given parameters until stopped
    Run {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long, value_name = "SECS")]
        duration_s: Option<f64>,
        /// Run mode
        #[arg(long, value_enum, default_value_t = ModeArg::Simple)]
        mode: ModeArg,
        /// Speed, percent of calibrated maximum
        #[arg(long, value_parser = pct, default_value_t = 30.0)]
        speed: f32,
        /// Depth, percent of usable travel
        #[arg(long, value_parser = pct)]
        depth: Option<f32>,
        /// Stroke length, percent of usable travel
        #[arg(long, value_parser = pct)]
        stroke: Option<f32>,
        /// Pattern sensation (50 is neutral)
        #[arg(long, value_parser = pct)]
        sensation: Option<f32>,
        /// Force limit, percent of the configured range
        #[arg(long, value_parser = pct)]
        force: Option<f32>,
        /// Pattern index (see `patterns`)
        #[arg(long, value_name = "INDEX")]
        pattern: Option<usize>,
        /// Print tick timing stats
        #[arg(long, action = ArgAction::SetTrue)]
        stats: bool,
        /// Enable real-time mode (SCHED_FIFO, affinity, mlockall)
        #[arg(
            long,
            action = ArgAction::SetTrue,
            long_help = "Enable real-time mode on supported OSes.\n\nLinux: SCHED_FIFO priority, CPU pinning and mlockall. May need elevated privileges or a raised memlock ulimit.\n\nOther OSes: only memory locking is attempted."
        )]
        rt: bool,
        /// Real-time priority for SCHED_FIFO on Linux
        #[arg(long, value_name = "PRIO")]
        rt_prio: Option<i32>,
        /// Memory locking mode for --rt: none, current, or all
        #[arg(long, value_enum, value_name = "MODE")]
        rt_lock: Option<RtLock>,
        /// CPU index to pin to with --rt (Linux only, default 0)
        #[arg(long, value_name = "CPU")]
        rt_cpu: Option<usize>,
    },
    /// List the available patterns
    Patterns,
    /// Quick check that every collaborator answers (hardware presence / sim ok)
    SelfCheck,
    /// Health check for operational monitoring
    Health,
}
