use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use stroker_core::config::{HomingCfg, HomingMethod};
use stroker_core::executor::{ExecContext, Executor};
use stroker_core::mocks::{MockMotion, MockPatterns};
use stroker_core::{ControllerParts, DeviceCalibration, ParameterSet, RunMode, build_controller};
use stroker_traits::{BoxError, CalibrationRecord, HomeSensor, ManualClock};

struct Open;

impl HomeSensor for Open {
    fn is_triggered(&mut self) -> Result<bool, BoxError> {
        Ok(false)
    }
}

fn calibration() -> DeviceCalibration {
    DeviceCalibration::new(CalibrationRecord {
        steps_per_revolution: 200.0,
        gearing_ratio: 1.0,
        pulley_tooth_count: 20.0,
        belt_pitch_mm: 2.0,
        max_speed_mm_per_second: 900.0,
        max_stroke_length_mm: 150.0,
        stroke_zero_offset_mm: 5.0,
        acceleration_scaling: 100.0,
        command_deadzone_percentage: 1.0,
    })
    .unwrap()
}

fn tune(g: &mut criterion::BenchmarkGroup<'_, criterion::measurement::WallTime>) {
    //   BENCH_SAMPLE_SIZE=10 BENCH_MEAS_MS=50 cargo bench -p stroker_core --bench tick
    if let Ok(ss) = std::env::var("BENCH_SAMPLE_SIZE")
        && let Ok(n) = ss.parse::<usize>()
    {
        g.sample_size(n.max(1));
    }
    if let Ok(ms) = std::env::var("BENCH_MEAS_MS")
        && let Ok(ms) = ms.parse::<u64>()
    {
        g.measurement_time(std::time::Duration::from_millis(ms));
    }
}

pub fn bench_executor_step(c: &mut Criterion) {
    let mut g = c.benchmark_group("executor_step");
    tune(&mut g);
    let cal = calibration();
    let params = ParameterSet {
        speed: 60.0,
        ..ParameterSet::default()
    };
    for mode in [RunMode::SimplePenetration, RunMode::StrokeEnginePattern] {
        g.bench_function(mode.name(), |b| {
            b.iter_batched(
                || (Executor::for_mode(mode), MockMotion::instant(), MockPatterns::new(4)),
                |(mut exec, mut motion, mut patterns)| {
                    let ctx = ExecContext {
                        params: &params,
                        calibration: &cal,
                        travel_mm: 150.0,
                        deadzone: 1.0,
                    };
                    for _ in 0..64 {
                        let leg = exec.step(&mut motion, &mut patterns, black_box(&ctx));
                        black_box(leg.ok());
                    }
                },
                BatchSize::SmallInput,
            )
        });
    }
    g.finish();
}

pub fn bench_controller_tick(c: &mut Criterion) {
    let mut g = c.benchmark_group("controller_tick");
    tune(&mut g);
    let parts = ControllerParts {
        home_sensor: Some(Box::new(Open)),
        homing: Some(HomingCfg {
            method: HomingMethod::Sensor,
            ..HomingCfg::default()
        }),
        clock: Some(Box::new(ManualClock::new())),
        ..ControllerParts::default()
    };
    let mut ctl = build_controller(MockMotion::instant(), MockPatterns::new(4), parts).unwrap();
    g.bench_function("idle", |b| {
        b.iter(|| black_box(ctl.tick()));
    });
    g.finish();
}

criterion_group!(tick, bench_executor_step, bench_controller_tick);
criterion_main!(tick);
