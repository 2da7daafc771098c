//! run 命令
//!
//! 以固定 tick 频率驱动控制循环：仿真对象提供测量，控制输出推进仿真对象，
//! 指令流在后台线程中注入，遥测可写为 JSON Lines。

use anyhow::{Context, Result};
use clap::Args;
use crossbeam_channel::{Receiver, bounded};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use strider_driver::{
    ChannelSink, ControlConfig, ControlLoopBuilder, MetricsSnapshot, TelemetryEvent,
};
use tracing::{debug, info, warn};

use crate::ingest::{CommandStream, StreamConfig};
use crate::sim::{FirstOrderPlant, PoseSolver};

/// 仿真运行参数
#[derive(Args, Debug)]
pub struct RunCommand {
    /// TOML 配置文件（缺省使用内置 28 关节配置）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 运行时长（秒）
    #[arg(short, long, default_value_t = 5.0)]
    pub duration: f64,

    /// tick 频率（Hz）
    #[arg(long, default_value_t = 1000.0)]
    pub tick_rate: f64,

    /// 指令频率（Hz）
    #[arg(long, default_value_t = 100.0)]
    pub command_rate: f64,

    /// 摄取延迟上限（毫秒）
    #[arg(long, default_value_t = 2.0)]
    pub jitter_ms: f64,

    /// 相邻指令乱序概率
    #[arg(long, default_value_t = 0.05)]
    pub reorder: f64,

    /// 指令中断开始时间（秒）
    #[arg(long)]
    pub dropout_at: Option<f64>,

    /// 指令中断持续时间（秒）
    #[arg(long, default_value_t = 0.5)]
    pub dropout_for: f64,

    /// 依次请求的模式令牌
    #[arg(long, value_delimiter = ',', default_value = "stand-prep,stand,walk")]
    pub modes: Vec<String>,

    /// 两次模式请求的间隔（秒）
    #[arg(long, default_value_t = 1.0)]
    pub mode_interval: f64,

    /// 仿真对象阻尼
    #[arg(long, default_value_t = 50.0)]
    pub damping: f64,

    /// 遥测输出文件（JSON Lines）
    #[arg(long)]
    pub telemetry: Option<PathBuf>,

    /// 写出每个 tick 的遥测（否则只写统计）
    #[arg(long)]
    pub every_tick: bool,

    /// 随机种子
    #[arg(long, default_value_t = 7)]
    pub seed: u64,
}

impl RunCommand {
    pub fn execute(&self) -> Result<()> {
        let config = match &self.config {
            Some(path) => ControlConfig::load(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => ControlConfig::default(),
        };
        let joints = config.joint_set().context("Invalid joint set")?;

        let running = Arc::new(AtomicBool::new(true));
        {
            let running = running.clone();
            ctrlc::set_handler(move || {
                eprintln!("\nReceived interrupt signal. Stopping simulation...");
                running.store(false, Ordering::Release);
            })
            .context("Failed to set signal handler")?;
        }

        let (tx, rx) = bounded(4096);
        let sink = if self.every_tick {
            ChannelSink::new(tx)
        } else {
            ChannelSink::statistics_only(tx)
        };
        let writer = spawn_writer(rx, self.telemetry.clone())?;

        let (mut control, handle) = ControlLoopBuilder::new(config)
            .solver(PoseSolver::new(&joints))
            .sink(sink)
            .build()
            .context("Failed to build control loop")?;

        let stream = CommandStream::spawn(handle.clone(), self.stream_config(), running.clone())
            .context("Failed to spawn command stream")?;

        set_realtime_priority();

        let period = Duration::from_secs_f64(1.0 / self.tick_rate.max(1.0));
        let dt = period.as_secs_f64();
        let mut plant = FirstOrderPlant::new(control.joint_count(), self.damping);
        let mut pending_modes = self.modes.iter();
        let mut next_mode_at = Duration::from_secs_f64(self.mode_interval);
        let mut overruns = 0u64;

        info!(
            duration_s = self.duration,
            tick_rate = self.tick_rate,
            command_rate = self.command_rate,
            "Simulation started"
        );
        let start = Instant::now();
        let end = start + Duration::from_secs_f64(self.duration.max(0.0));
        let mut next_tick = start;

        while running.load(Ordering::Acquire) && Instant::now() < end {
            if start.elapsed() >= next_mode_at {
                if let Some(token) = pending_modes.next() {
                    match handle.request_mode(token) {
                        Ok(mode) => info!(%mode, "Requesting mode"),
                        Err(e) => warn!(token = %token, error = %e, "Skipping mode request"),
                    }
                }
                next_mode_at += Duration::from_secs_f64(self.mode_interval);
            }

            let measurements = plant.measure();
            let out = control.step(&measurements).context("Control tick failed")?;
            plant.advance(out.efforts(), dt);

            next_tick += period;
            let now = Instant::now();
            if next_tick > now {
                spin_sleep::sleep(next_tick - now);
            } else {
                overruns += 1;
                debug!(behind_us = (now - next_tick).as_micros() as u64, "Tick overrun");
                next_tick = now;
            }
        }

        running.store(false, Ordering::Release);
        let report = stream.join();
        let ticks = control.tick_count();
        let final_mode = control.mode();
        // 释放 sink，写线程随之结束
        drop(control);
        let written = writer
            .join()
            .map_err(|_| anyhow::anyhow!("Telemetry writer panicked"))??;

        let metrics = handle.metrics();
        println!("Simulation finished after {:.2} s", start.elapsed().as_secs_f64());
        println!("  ticks: {ticks} (overruns: {overruns})");
        println!("  final mode: {final_mode}");
        let peak = plant
            .positions()
            .iter()
            .fold(0.0f64, |m, p| m.max(p.abs()));
        println!("  peak joint excursion: {peak:.3} rad");
        println!(
            "  commands: generated {}, submitted {}, reordered {}, rejected {}",
            report.generated, report.submitted, report.reordered, report.rejected
        );
        print_metrics(&metrics);
        let age = handle.age_snapshot();
        println!(
            "  command age: mean {:.2} ms, std {:.2} ms over {} samples",
            age.mean * 1e3,
            age.variance.sqrt() * 1e3,
            age.sample_count
        );
        if let Some(path) = &self.telemetry {
            println!("  telemetry: {written} events -> {}", path.display());
        }
        Ok(())
    }

    fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            rate_hz: self.command_rate,
            jitter: Duration::from_secs_f64(self.jitter_ms.max(0.0) / 1e3),
            reorder_probability: self.reorder,
            dropout: self.dropout_at.map(|at| {
                let from = Duration::from_secs_f64(at.max(0.0));
                (from, from + Duration::from_secs_f64(self.dropout_for.max(0.0)))
            }),
            seed: self.seed,
        }
    }
}

fn print_metrics(m: &MetricsSnapshot) {
    println!(
        "  mailbox: accepted {}, out-of-order {}, overwritten {} ({:.1}%)",
        m.commands_accepted,
        m.commands_dropped_out_of_order,
        m.commands_overwritten,
        m.overwrite_rate()
    );
    println!(
        "  safety: entries {}, watchdog trips {}, numerical faults {}, refused requests {}",
        m.safety_entries, m.watchdog_trips, m.numerical_faults, m.mode_requests_refused
    );
}

/// 遥测写线程：统计打到日志，事件按需写成 JSON Lines
fn spawn_writer(
    rx: Receiver<TelemetryEvent>,
    path: Option<PathBuf>,
) -> Result<thread::JoinHandle<Result<u64>>> {
    let mut out = match &path {
        Some(p) => Some(BufWriter::new(
            File::create(p).with_context(|| format!("Failed to create {}", p.display()))?,
        )),
        None => None,
    };

    let handle = thread::Builder::new()
        .name("telemetry-writer".into())
        .spawn(move || -> Result<u64> {
            let mut written = 0u64;
            for event in rx.iter() {
                if let TelemetryEvent::Statistics(s) = &event {
                    info!(
                        tick = s.tick,
                        mode = %s.mode,
                        stale = s.stale,
                        age_mean_ms = s.age.mean * 1e3,
                        accepted = s.metrics.commands_accepted,
                        "Controller statistics"
                    );
                }
                if let Some(out) = out.as_mut() {
                    serde_json::to_writer(&mut *out, &event)?;
                    out.write_all(b"\n")?;
                    written += 1;
                }
            }
            if let Some(out) = out.as_mut() {
                out.flush()?;
            }
            Ok(written)
        })
        .context("Failed to spawn telemetry writer")?;
    Ok(handle)
}

#[cfg(feature = "realtime")]
fn set_realtime_priority() {
    use thread_priority::*;

    match set_current_thread_priority(ThreadPriority::Max) {
        Ok(_) => info!("Tick thread priority set to MAX (realtime)"),
        Err(e) => warn!(
            "Failed to set tick thread priority: {}. \
            On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
            e
        ),
    }
}

#[cfg(not(feature = "realtime"))]
fn set_realtime_priority() {}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        run: RunCommand,
    }

    #[test]
    fn test_defaults() {
        let cli = TestCli::parse_from(["strider-cli"]);
        assert_eq!(cli.run.modes, vec!["stand-prep", "stand", "walk"]);
        assert_eq!(cli.run.tick_rate, 1000.0);
        assert!(cli.run.stream_config().dropout.is_none());
    }

    #[test]
    fn test_dropout_window() {
        let cli = TestCli::parse_from(["strider-cli", "--dropout-at", "2", "--dropout-for", "0.25"]);
        let (from, to) = cli.run.stream_config().dropout.unwrap();
        assert_eq!(from, Duration::from_secs(2));
        assert_eq!(to, Duration::from_millis(2_250));
    }

    #[test]
    fn test_writer_emits_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.jsonl");
        let (tx, rx) = bounded(8);
        let writer = spawn_writer(rx, Some(path.clone())).unwrap();
        tx.send(TelemetryEvent::Tick(Default::default())).unwrap();
        drop(tx);
        assert_eq!(writer.join().unwrap().unwrap(), 1);

        let text = std::fs::read_to_string(path).unwrap();
        let value: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(value["event"], "tick");
    }
}
