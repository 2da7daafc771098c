//! 遥测输出
//!
//! 每个 tick 产生一条 [`TickTelemetry`]，每隔统计间隔产生一条 [`ControllerStatistics`]。
//! 二者都通过 [`TelemetrySink`] 交给外部；sink 的实现不得阻塞 tick 线程。

use crate::age::AgeSnapshot;
use crate::arbiter::{ModeTransition, Refusal};
use crate::metrics::MetricsSnapshot;
use crossbeam_channel::{Sender, TrySendError};
use serde::Serialize;
use smallvec::SmallVec;
use strider_protocol::BehaviorMode;
use tracing::trace;

/// 本 tick 输出力矩的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuationSource {
    /// PID 跟踪目标
    #[default]
    Pid,
    /// 行为求解器输出
    Solver,
    /// 时钟异常，保持上一拍输出
    Held,
}

/// 非致命故障
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Fault {
    /// 关节测量非有限
    NonFiniteMeasurement { joint: usize },
    /// 计算出的力矩非有限
    NonFiniteEffort { joint: usize },
    /// 求解器返回错误
    SolverFailed,
    /// 求解器输出不可信（模式 / tick / 长度 / 数值）
    SolverUntrusted,
}

impl Fault {
    /// 是否为数值故障（需要进入 Safety 并复位）
    pub fn is_numerical(&self) -> bool {
        matches!(
            self,
            Fault::NonFiniteMeasurement { .. } | Fault::NonFiniteEffort { .. }
        )
    }
}

/// 单个关节的执行输出
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct JointActuation {
    /// 施加的力矩
    pub effort: f64,
    /// 本 tick 跟踪的位置目标
    pub position_target: f64,
}

/// 每 tick 遥测
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct TickTelemetry {
    pub tick: u64,
    pub time_us: u64,
    pub mode: BehaviorMode,
    pub requested_mode: Option<BehaviorMode>,
    pub source: ActuationSource,
    /// 逐关节施加的力矩
    pub efforts: Vec<f64>,
    /// 逐关节位置误差（目标 − 测量）
    pub position_errors: Vec<f64>,
    pub age: AgeSnapshot,
    pub stale: bool,
    /// 本 tick 是否收到了新指令
    pub fresh_command: bool,
    pub command_sequence: Option<u64>,
    pub faults: SmallVec<[Fault; 4]>,
    /// 位置误差超过容差的关节索引
    pub tolerance_violations: Vec<usize>,
    pub clock_anomaly: bool,
    pub transition: Option<ModeTransition>,
    pub refused: Option<Refusal>,
}

/// 节流发布的控制器统计
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ControllerStatistics {
    pub time_us: u64,
    pub tick: u64,
    pub mode: BehaviorMode,
    pub age: AgeSnapshot,
    pub stale: bool,
    pub metrics: MetricsSnapshot,
}

/// 遥测接收方
pub trait TelemetrySink: Send {
    fn publish_tick(&mut self, telemetry: &TickTelemetry);

    fn publish_statistics(&mut self, _statistics: &ControllerStatistics) {}
}

/// 丢弃所有遥测
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl TelemetrySink for NullSink {
    fn publish_tick(&mut self, _telemetry: &TickTelemetry) {}
}

/// 通道中的遥测事件
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TelemetryEvent {
    Tick(TickTelemetry),
    Statistics(ControllerStatistics),
}

/// 通过有界通道转发遥测
///
/// 通道满时丢弃事件，不阻塞 tick 线程。
#[derive(Debug)]
pub struct ChannelSink {
    tx: Sender<TelemetryEvent>,
    /// 是否转发每 tick 遥测（否则只转发统计）
    forward_ticks: bool,
    dropped: u64,
}

impl ChannelSink {
    pub fn new(tx: Sender<TelemetryEvent>) -> Self {
        Self {
            tx,
            forward_ticks: true,
            dropped: 0,
        }
    }

    /// 只转发统计
    pub fn statistics_only(tx: Sender<TelemetryEvent>) -> Self {
        Self {
            forward_ticks: false,
            ..Self::new(tx)
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    fn send(&mut self, event: TelemetryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {},
            Err(TrySendError::Full(_)) => {
                self.dropped += 1;
                trace!(dropped = self.dropped, "Telemetry channel full, dropping event");
            },
            Err(TrySendError::Disconnected(_)) => {
                self.dropped += 1;
            },
        }
    }
}

impl TelemetrySink for ChannelSink {
    fn publish_tick(&mut self, telemetry: &TickTelemetry) {
        if self.forward_ticks {
            self.send(TelemetryEvent::Tick(telemetry.clone()));
        }
    }

    fn publish_statistics(&mut self, statistics: &ControllerStatistics) {
        self.send(TelemetryEvent::Statistics(statistics.clone()));
    }
}
