//! Cycle-thread hot path benchmarks.
//!
//! Strict handle reads and transition classification run every control
//! cycle. Target: both well below 1µs.

use criterion::{Criterion, criterion_group, criterion_main};
use hwm_common::config::ModuleConfig;
use hwm_common::consts::ICON_STATE_INTERFACE_NAME;
use hwm_common::state::StateCode;
use hwm_runtime::loopback::JointPositionCommand;
use hwm_runtime::{HardwareInterfaceRegistry, IconState, classify};
use std::hint::black_box;
use tempfile::TempDir;

fn bench_strict_value(c: &mut Criterion) {
    let dir = TempDir::new().expect("temp dir");
    let mut config = ModuleConfig::new("bench");
    config.shared_memory_root = dir.path().to_path_buf();
    let mut registry = HardwareInterfaceRegistry::create(&config).expect("registry");
    let command = registry
        .advertise_strict_interface("joint_position_command", JointPositionCommand::new(6))
        .expect("advertise");

    // Stamp icon_state and the command with the same cycle.
    let manager = registry.manager();
    let mut icon = manager
        .get_mut::<IconState>(ICON_STATE_INTERFACE_NAME)
        .expect("icon_state");
    icon.value_mut().current_cycle = 1;
    icon.updated_at(0, 1);
    manager
        .get_mut::<JointPositionCommand>("joint_position_command")
        .expect("command")
        .updated_at(0, 1);

    c.bench_function("strict_handle_value_fresh", |b| {
        b.iter(|| {
            let _ = black_box(command.value());
        });
    });

    icon.value_mut().current_cycle = 2;
    icon.updated_at(0, 2);
    c.bench_function("strict_handle_value_stale", |b| {
        b.iter(|| {
            let _ = black_box(command.value());
        });
    });
}

fn bench_classify(c: &mut Criterion) {
    c.bench_function("classify_all_pairs", |b| {
        b.iter(|| {
            for from in StateCode::ALL {
                for to in StateCode::ALL {
                    black_box(classify(black_box(from), black_box(to)));
                }
            }
        });
    });
}

criterion_group!(benches, bench_strict_value, bench_classify);
criterion_main!(benches);
