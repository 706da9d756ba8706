mod cli;
mod error_fmt;
mod rt;
mod session;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use clap::Parser;
use eyre::{Result, WrapErr};
use serde_json::json;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

use crate::cli::{Cli, Commands, FILE_GUARD, JSON_MODE};
use crate::error_fmt::{InvalidConfigFile, exit_code_for_error, format_error_json, humanize};
use crate::session::{RtSettings, RunSettings};

fn load_config(path: &Path) -> Result<stroker_config::Config> {
    stroker_config::load_file(path).wrap_err(InvalidConfigFile)
}

/// Console layer on stderr, plus an optional JSON-lines file sink from `[logging]`.
fn init_tracing(json: bool, level: &str, logging: &stroker_config::Logging) {
    let level = logging.level.as_deref().unwrap_or(level);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let console = if json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .boxed()
    };

    let file = logging.file.as_deref().map(|file| {
        let path = Path::new(file);
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
        let name = path.file_name().map_or_else(|| "stroker.log".into(), |n| n.to_owned());
        let appender = match logging.rotation.as_deref() {
            Some("daily") => tracing_appender::rolling::daily(dir, name),
            Some("hourly") => tracing_appender::rolling::hourly(dir, name),
            _ => tracing_appender::rolling::never(dir, name),
        };
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt::layer()
            .json()
            .with_ansi(false)
            .with_writer(writer)
    });

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(console)
        .with(file)
        .try_init();
}

/// Print a result line: JSON object in --json mode, otherwise the text.
fn emit(json_mode: bool, value: &serde_json::Value, text: &str) {
    if json_mode {
        println!("{value}");
    } else {
        println!("{text}");
    }
}

fn dispatch(cli: &Cli, cfg: &stroker_config::Config, shutdown: Arc<AtomicBool>) -> Result<()> {
    let json_mode = cli.json;
    match &cli.cmd {
        Commands::Home { timeout_s } => {
            let outcome = session::home(cfg, cli.fast, Duration::from_secs(*timeout_s), shutdown)?;
            emit(
                json_mode,
                &json!({
                    "homed": true,
                    "usable_travel_mm": outcome.usable_travel_mm,
                    "measured_travel_mm": outcome.measured_travel_mm,
                }),
                &format!("homed: usable travel {:.1} mm", outcome.usable_travel_mm),
            );
        }
        Commands::Run {
            duration_s,
            mode,
            speed,
            depth,
            stroke,
            sensation,
            force,
            pattern,
            stats,
            rt,
            rt_prio,
            rt_lock,
            rt_cpu,
        } => {
            let duration = match duration_s {
                Some(s) if !(s.is_finite() && *s > 0.0) => {
                    eyre::bail!("--duration-s must be a positive number of seconds")
                }
                Some(s) => Some(Duration::from_secs_f64(*s)),
                None => None,
            };
            let settings = RunSettings {
                duration,
                mode: (*mode).into(),
                speed: *speed,
                depth: *depth,
                stroke: *stroke,
                sensation: *sensation,
                force: *force,
                pattern: *pattern,
            };
            let rt = RtSettings {
                enabled: *rt,
                prio: *rt_prio,
                lock: *rt_lock,
                cpu: *rt_cpu,
            };
            let summary = session::run(cfg, cli.fast, &settings, &rt, shutdown)?;
            if *stats {
                let per_tick_us = if summary.ticks > 0 {
                    summary.elapsed.as_micros() / u128::from(summary.ticks)
                } else {
                    0
                };
                eprintln!("\n--- Session Stats ---");
                eprintln!("Ticks: {}", summary.ticks);
                eprintln!("Elapsed (ms): {}", summary.elapsed.as_millis());
                eprintln!("Mean tick period (us): {per_tick_us}");
                eprintln!("---------------------\n");
            }
            let snap = &summary.last;
            emit(
                json_mode,
                &json!({
                    "cause": format!("{:?}", summary.cause),
                    "ticks": summary.ticks,
                    "elapsed_ms": summary.elapsed.as_millis() as u64,
                    "strokes": summary.strokes,
                    "distance_m": summary.distance_m,
                    "run_mode": snap.run_mode.name(),
                    "pattern": snap.pattern_name,
                    "lifetime_strokes": snap.stats.number_strokes,
                }),
                &format!(
                    "session complete ({:?}): {} strokes, {:.3} m in {:.1} s",
                    summary.cause,
                    summary.strokes,
                    summary.distance_m,
                    summary.elapsed.as_secs_f64()
                ),
            );
        }
        Commands::Patterns => {
            let names = session::pattern_names(cfg)?;
            let text = names
                .iter()
                .enumerate()
                .map(|(i, n)| format!("{i}: {n}"))
                .collect::<Vec<_>>()
                .join("\n");
            emit(json_mode, &json!({ "patterns": names }), &text);
        }
        Commands::SelfCheck => {
            let report = session::self_check(cfg, cli.fast)?;
            if !report.problems.is_empty() {
                eyre::bail!("self-check failed: {}", report.problems.join("; "));
            }
            emit(
                json_mode,
                &json!({
                    "status": "ok",
                    "supply_volts": report.supply_volts,
                    "current_amps": report.current_amps,
                    "patterns": report.patterns,
                    "persistent_store": report.persistent_store,
                }),
                "OK",
            );
        }
        Commands::Health => {
            emit(
                json_mode,
                &json!({
                    "status": "ok",
                    "version": env!("CARGO_PKG_VERSION"),
                    "config": cli.config.display().to_string(),
                    "tick_hz": cfg.control.tick_hz,
                }),
                "healthy",
            );
        }
    }
    Ok(())
}

fn report(err: &eyre::Report) -> i32 {
    tracing::error!(error = %format!("{err:#}"), "command failed");
    if JSON_MODE.get().copied().unwrap_or(false) {
        eprintln!("{}", format_error_json(err));
    } else {
        eprintln!("error: {}", humanize(err));
    }
    exit_code_for_error(err)
}

fn main() {
    let cli = Cli::parse();
    let _ = color_eyre::install();
    let _ = JSON_MODE.set(cli.json);

    let cfg = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            init_tracing(cli.json, &cli.log_level, &stroker_config::Logging::default());
            std::process::exit(report(&e));
        }
    };
    init_tracing(cli.json, &cli.log_level, &cfg.logging);

    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let flag = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || flag.store(true, Ordering::Relaxed)) {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
        }
    }

    if let Err(e) = dispatch(&cli, &cfg, shutdown) {
        std::process::exit(report(&e));
    }
}
