//! 仿真指令流
//!
//! 生成线程按固定频率产生整机指令，经通道交给摄取线程；
//! 摄取线程加入随机延迟、相邻乱序，再提交给控制核心。
//! 生成线程在配置的中断窗口内停止发送，用来触发看门狗。

use crossbeam_channel::{Receiver, Sender, bounded};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use strider_driver::ControlHandle;
use strider_protocol::{CommandMessage, FullBodyCommand, JointArrays};
use tracing::{debug, info, warn};

/// 指令流参数
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub rate_hz: f64,
    /// 摄取延迟上限
    pub jitter: Duration,
    /// 与下一条交换顺序的概率
    pub reorder_probability: f64,
    /// 中断窗口（相对启动时间）
    pub dropout: Option<(Duration, Duration)>,
    pub seed: u64,
}

/// 指令流统计
#[derive(Debug, Default, Clone, Copy)]
pub struct StreamReport {
    pub generated: u64,
    pub submitted: u64,
    pub rejected: u64,
    pub reordered: u64,
}

/// 运行中的指令流
pub struct CommandStream {
    generator: JoinHandle<u64>,
    ingestion: JoinHandle<StreamReport>,
}

impl CommandStream {
    pub fn spawn(
        handle: ControlHandle,
        config: StreamConfig,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = bounded(64);
        let joints = handle.joints().len();

        let generator = {
            let handle = handle.clone();
            let config = config.clone();
            thread::Builder::new()
                .name("command-generator".into())
                .spawn(move || generate(&handle, joints, &config, &running, tx))?
        };
        let ingestion = thread::Builder::new()
            .name("command-ingestion".into())
            .spawn(move || ingest(&handle, &config, rx))?;

        Ok(Self {
            generator,
            ingestion,
        })
    }

    /// 等待两个线程结束（调用前应先清除 running 标志）
    pub fn join(self) -> StreamReport {
        let generated = self.generator.join().unwrap_or(0);
        let mut report = self.ingestion.join().unwrap_or_default();
        report.generated = generated;
        report
    }
}

fn generate(
    handle: &ControlHandle,
    joints: usize,
    config: &StreamConfig,
    running: &AtomicBool,
    tx: Sender<CommandMessage>,
) -> u64 {
    let period = Duration::from_secs_f64(1.0 / config.rate_hz.max(1e-3));
    let start = Instant::now();
    let mut next = start;
    let mut sequence = 0u64;
    let mut in_dropout = false;

    while running.load(Ordering::Acquire) {
        let elapsed = start.elapsed();
        let dropped = config
            .dropout
            .is_some_and(|(from, to)| elapsed >= from && elapsed < to);
        if dropped != in_dropout {
            in_dropout = dropped;
            if dropped {
                info!(at_ms = elapsed.as_millis() as u64, "Command stream dropout begins");
            } else {
                info!(at_ms = elapsed.as_millis() as u64, "Command stream resumed");
            }
        }

        if !dropped {
            sequence += 1;
            let message = FullBodyCommand {
                sequence,
                timestamp_us: handle.now_us(),
                mode: None,
                arrays: JointArrays {
                    position: vec![0.0; joints],
                    ..JointArrays::default()
                },
            };
            if tx.send(message.into()).is_err() {
                break;
            }
        }

        next += period;
        let now = Instant::now();
        if next > now {
            spin_sleep::sleep(next - now);
        } else {
            next = now;
        }
    }
    debug!(sequence, "Command generator stopped");
    sequence
}

fn ingest(handle: &ControlHandle, config: &StreamConfig, rx: Receiver<CommandMessage>) -> StreamReport {
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut report = StreamReport::default();
    let mut held: Option<CommandMessage> = None;

    for message in rx.iter() {
        if !config.jitter.is_zero() {
            let delay = rng.gen_range(0.0..config.jitter.as_secs_f64());
            spin_sleep::sleep(Duration::from_secs_f64(delay));
        }

        // 先放行较新的一条，再放行被扣下的旧指令
        if held.is_none() && rng.gen_bool(config.reorder_probability.clamp(0.0, 1.0)) {
            held = Some(message);
            continue;
        }
        submit(handle, &message, &mut report);
        if let Some(old) = held.take() {
            report.reordered += 1;
            submit(handle, &old, &mut report);
        }
    }
    if let Some(old) = held.take() {
        submit(handle, &old, &mut report);
    }
    report
}

fn submit(handle: &ControlHandle, message: &CommandMessage, report: &mut StreamReport) {
    match handle.submit(message) {
        Ok(()) => report.submitted += 1,
        Err(e) => {
            report.rejected += 1;
            warn!(sequence = message.sequence(), error = %e, "Command rejected");
        },
    }
}
