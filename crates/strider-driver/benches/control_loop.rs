//! 控制循环性能基准测试
//!
//! 28 关节整机：单个 tick、邮箱发布、年龄统计快照。

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use std::sync::Arc;
use strider_driver::{
    AgeTracker, CommandMailbox, ControlConfig, ControlLoopBuilder, ControlMetrics,
    JointMeasurement, ManualClock, TickTime,
};
use strider_protocol::{BehaviorMode, JointCommand, JointId, JointSetpoint};

fn full_command(seq: u64) -> JointCommand {
    (0..28).fold(JointCommand::new(seq, seq * 1_000), |cmd, j| {
        cmd.with_setpoint(JointId(j), JointSetpoint::position(0.1))
    })
}

fn bench_tick_none_mode(c: &mut Criterion) {
    let clock = Arc::new(ManualClock::new(0));
    let (mut control, handle) = ControlLoopBuilder::new(ControlConfig::default())
        .clock(clock)
        .build()
        .unwrap();
    let measurements = vec![JointMeasurement::new(0.0).with_velocity(0.0); control.joint_count()];
    control.tick(TickTime::new(0, 1_000), &measurements).unwrap();
    handle.request_mode_typed(BehaviorMode::None);

    let mut now = 1_000u64;
    c.bench_function("control_loop_tick_28_joints", |b| {
        b.iter(|| {
            now += 1_000;
            if now.is_multiple_of(10_000) {
                handle.submit_command_at(full_command(now), now).unwrap();
            }
            let out = control
                .tick(TickTime::new(now - 1_000, now), black_box(&measurements))
                .unwrap();
            black_box(out);
        });
    });
}

fn bench_mailbox_publish(c: &mut Criterion) {
    let mailbox = CommandMailbox::new(Arc::new(ControlMetrics::new()));
    let mut seq = 0u64;
    c.bench_function("mailbox_publish_take", |b| {
        b.iter(|| {
            seq += 1;
            mailbox.publish(full_command(seq), seq).unwrap();
            black_box(mailbox.take_latest().unwrap());
        });
    });
}

fn bench_age_record(c: &mut Criterion) {
    let mut tracker = AgeTracker::new(1_000);
    let mut tick = 0u64;
    c.bench_function("age_tracker_record_snapshot", |b| {
        b.iter(|| {
            tick += 1;
            tracker.record(black_box(0.004), tick);
            black_box(tracker.snapshot());
        });
    });
}

criterion_group!(
    benches,
    bench_tick_none_mode,
    bench_mailbox_publish,
    bench_age_record
);
criterion_main!(benches);
