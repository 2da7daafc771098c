//! 控制核心运行指标
//!
//! 所有计数器都使用原子操作，可以在任何线程安全地读取，不会引入锁竞争。
//! 摄取线程和 tick 线程各自更新自己负责的计数器。

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// 运行指标
#[derive(Debug, Default)]
pub struct ControlMetrics {
    /// 被邮箱接受的指令数
    pub commands_accepted: AtomicU64,
    /// 因序号不递增被丢弃的指令数（乱序 / 重复）
    pub commands_dropped_out_of_order: AtomicU64,
    /// 被新指令覆盖、从未被 tick 线程取走的指令数
    pub commands_overwritten: AtomicU64,
    /// 在边界被拒绝的格式错误消息数
    pub commands_rejected_malformed: AtomicU64,
    /// 被丢弃的未知关节字段数
    pub unknown_joint_fields: AtomicU64,
    /// 被忽略的未知模式令牌数
    pub mode_tokens_ignored: AtomicU64,
    /// 被仲裁器拒绝的模式请求数
    pub mode_requests_refused: AtomicU64,
    /// 看门狗触发次数
    pub watchdog_trips: AtomicU64,
    /// 数值故障次数
    pub numerical_faults: AtomicU64,
    /// 进入 Safety 的次数
    pub safety_entries: AtomicU64,
    /// 已执行的 tick 数
    pub ticks: AtomicU64,
    /// 时钟异常（dt <= 0）次数
    pub clock_anomalies: AtomicU64,
    /// 行为求解器失败或输出不可信的次数
    pub solver_rejections: AtomicU64,
    /// 被截断为 0 的负延迟样本数
    pub latency_clamped: AtomicU64,
}

impl ControlMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) -> u64 {
        counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            commands_accepted: self.commands_accepted.load(Ordering::Relaxed),
            commands_dropped_out_of_order: self
                .commands_dropped_out_of_order
                .load(Ordering::Relaxed),
            commands_overwritten: self.commands_overwritten.load(Ordering::Relaxed),
            commands_rejected_malformed: self.commands_rejected_malformed.load(Ordering::Relaxed),
            unknown_joint_fields: self.unknown_joint_fields.load(Ordering::Relaxed),
            mode_tokens_ignored: self.mode_tokens_ignored.load(Ordering::Relaxed),
            mode_requests_refused: self.mode_requests_refused.load(Ordering::Relaxed),
            watchdog_trips: self.watchdog_trips.load(Ordering::Relaxed),
            numerical_faults: self.numerical_faults.load(Ordering::Relaxed),
            safety_entries: self.safety_entries.load(Ordering::Relaxed),
            ticks: self.ticks.load(Ordering::Relaxed),
            clock_anomalies: self.clock_anomalies.load(Ordering::Relaxed),
            solver_rejections: self.solver_rejections.load(Ordering::Relaxed),
            latency_clamped: self.latency_clamped.load(Ordering::Relaxed),
        }
    }

    /// 重置所有计数器
    pub fn reset(&self) {
        for counter in [
            &self.commands_accepted,
            &self.commands_dropped_out_of_order,
            &self.commands_overwritten,
            &self.commands_rejected_malformed,
            &self.unknown_joint_fields,
            &self.mode_tokens_ignored,
            &self.mode_requests_refused,
            &self.watchdog_trips,
            &self.numerical_faults,
            &self.safety_entries,
            &self.ticks,
            &self.clock_anomalies,
            &self.solver_rejections,
            &self.latency_clamped,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MetricsSnapshot {
    pub commands_accepted: u64,
    pub commands_dropped_out_of_order: u64,
    pub commands_overwritten: u64,
    pub commands_rejected_malformed: u64,
    pub unknown_joint_fields: u64,
    pub mode_tokens_ignored: u64,
    pub mode_requests_refused: u64,
    pub watchdog_trips: u64,
    pub numerical_faults: u64,
    pub safety_entries: u64,
    pub ticks: u64,
    pub clock_anomalies: u64,
    pub solver_rejections: u64,
    pub latency_clamped: u64,
}

impl MetricsSnapshot {
    /// 覆盖率（百分比）
    ///
    /// 返回 0.0 到 100.0 之间的值。如果没有接受任何指令，返回 0.0。
    pub fn overwrite_rate(&self) -> f64 {
        if self.commands_accepted == 0 {
            return 0.0;
        }
        (self.commands_overwritten as f64 / self.commands_accepted as f64) * 100.0
    }
}
