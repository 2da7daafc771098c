//! 跨线程句柄
//!
//! [`ControlHandle`] 是摄取线程、模式通道、复位服务和报告路径访问控制核心的唯一入口。
//! 它可以被克隆到任意线程；只有 [`ControlLoop`](crate::ControlLoop) 持有 tick 线程状态。

use crate::age::AgeSnapshot;
use crate::clock::Clock;
use crate::error::DriverError;
use crate::mailbox::CommandMailbox;
use crate::metrics::{ControlMetrics, MetricsSnapshot};
use crate::mode::AtomicModeRequest;
use crate::telemetry::TickTelemetry;
use arc_swap::{ArcSwap, ArcSwapOption};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use strider_protocol::{BehaviorMode, CommandMessage, JointCommand, JointSet};
use tracing::{debug, info, warn};

/// 句柄与控制循环共享的状态
pub(crate) struct ControlShared {
    pub(crate) joints: JointSet,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) mailbox: CommandMailbox,
    pub(crate) mode_request: AtomicModeRequest,
    pub(crate) reset_requested: AtomicBool,
    pub(crate) metrics: Arc<ControlMetrics>,
    /// 最新一拍的遥测（第一个 tick 之前为空）
    pub(crate) telemetry: ArcSwapOption<TickTelemetry>,
    pub(crate) age: ArcSwap<AgeSnapshot>,
}

impl ControlShared {
    pub(crate) fn new(joints: JointSet, clock: Arc<dyn Clock>) -> Self {
        let metrics = Arc::new(ControlMetrics::new());
        Self {
            joints,
            clock,
            mailbox: CommandMailbox::new(Arc::clone(&metrics)),
            mode_request: AtomicModeRequest::new(),
            reset_requested: AtomicBool::new(false),
            metrics,
            telemetry: ArcSwapOption::empty(),
            age: ArcSwap::from_pointee(AgeSnapshot::default()),
        }
    }
}

/// 控制核心句柄
#[derive(Clone)]
pub struct ControlHandle {
    shared: Arc<ControlShared>,
}

impl std::fmt::Debug for ControlHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlHandle")
            .field("joints", &self.shared.joints.len())
            .finish_non_exhaustive()
    }
}

impl ControlHandle {
    pub(crate) fn new(shared: Arc<ControlShared>) -> Self {
        Self { shared }
    }

    /// 提交一条入站消息（到达时间取自时钟）
    ///
    /// 格式错误的消息被拒绝并返回错误；乱序到达的消息被静默丢弃，
    /// 只体现在指标中。
    pub fn submit(&self, message: &CommandMessage) -> Result<(), DriverError> {
        self.submit_at(message, self.shared.clock.now_us())
    }

    /// 以显式的到达时间提交消息
    pub fn submit_at(&self, message: &CommandMessage, arrival_us: u64) -> Result<(), DriverError> {
        let validated = match message.validate(&self.shared.joints) {
            Ok(v) => v,
            Err(e) => {
                ControlMetrics::incr(&self.shared.metrics.commands_rejected_malformed);
                warn!(sequence = message.sequence(), error = %e, "Rejecting malformed command");
                return Err(e.into());
            },
        };

        if !validated.unknown_joints.is_empty() {
            self.shared
                .metrics
                .unknown_joint_fields
                .fetch_add(validated.unknown_joints.len() as u64, Ordering::Relaxed);
            warn!(
                sequence = message.sequence(),
                unknown = ?validated.unknown_joints,
                "Dropping fields for unknown joints"
            );
        }
        if let Some(token) = &validated.ignored_mode {
            ControlMetrics::incr(&self.shared.metrics.mode_tokens_ignored);
            warn!(sequence = message.sequence(), token = %token, "Ignoring unknown mode token on command");
        }

        self.submit_command_at(validated.command, arrival_us)
    }

    /// 提交一条已构造的指令
    pub fn submit_command(&self, command: JointCommand) -> Result<(), DriverError> {
        self.submit_command_at(command, self.shared.clock.now_us())
    }

    pub fn submit_command_at(&self, command: JointCommand, arrival_us: u64) -> Result<(), DriverError> {
        self.shared.mailbox.publish(command, arrival_us)?;
        Ok(())
    }

    /// 模式通道：按令牌请求模式
    ///
    /// 未识别的令牌被忽略（记录日志与指标），返回错误但不改变任何状态。
    pub fn request_mode(&self, token: &str) -> Result<BehaviorMode, DriverError> {
        match token.parse::<BehaviorMode>() {
            Ok(mode) => {
                self.request_mode_typed(mode);
                Ok(mode)
            },
            Err(e) => {
                ControlMetrics::incr(&self.shared.metrics.mode_tokens_ignored);
                warn!(token, "Ignoring unknown mode token");
                Err(e.into())
            },
        }
    }

    pub fn request_mode_typed(&self, mode: BehaviorMode) {
        debug!(mode = %mode, "Mode requested");
        self.shared.mode_request.set(mode);
    }

    /// 复位服务：在下一个 tick 开始时复位全部控制器并进入 Safety
    pub fn request_reset(&self) {
        info!("Controller reset requested");
        self.shared.reset_requested.store(true, Ordering::Release);
    }

    /// 最新一拍的遥测（无锁，可能略旧）
    pub fn latest_telemetry(&self) -> Option<Arc<TickTelemetry>> {
        self.shared.telemetry.load_full()
    }

    /// 指令年龄统计快照（无锁，可能略旧）
    pub fn age_snapshot(&self) -> AgeSnapshot {
        **self.shared.age.load()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics.snapshot()
    }

    pub fn joints(&self) -> &JointSet {
        &self.shared.joints
    }

    /// 控制核心所用时钟的当前时间
    pub fn now_us(&self) -> u64 {
        self.shared.clock.now_us()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn handle() -> ControlHandle {
        let joints = JointSet::new(["hip", "knee"]).unwrap();
        let shared = ControlShared::new(joints, Arc::new(ManualClock::new(500)));
        ControlHandle::new(Arc::new(shared))
    }

    #[test]
    fn test_handle_is_send_sync() {
        fn check<T: Send + Sync + Clone>() {}
        check::<ControlHandle>();
    }

    #[test]
    fn test_request_mode_tokens() {
        let h = handle();
        assert_eq!(h.request_mode("stand-prep").unwrap(), BehaviorMode::StandPrep);
        assert_eq!(h.shared.mode_request.peek(), Some(BehaviorMode::StandPrep));

        assert!(h.request_mode("jump").is_err());
        // 未识别令牌不改变待处理请求
        assert_eq!(h.shared.mode_request.peek(), Some(BehaviorMode::StandPrep));
        assert_eq!(h.metrics().mode_tokens_ignored, 1);
    }

    #[test]
    fn test_submit_stamps_arrival_from_clock() {
        use strider_protocol::{JointArrays, NamedJointCommand};

        let h = handle();
        let msg = CommandMessage::Named(NamedJointCommand {
            sequence: 1,
            timestamp_us: 400,
            names: vec!["knee".into(), "wrist".into()],
            arrays: JointArrays {
                position: vec![0.1, 0.2],
                ..JointArrays::default()
            },
            ..NamedJointCommand::default()
        });
        h.submit(&msg).unwrap();

        let read = h.shared.mailbox.take_latest().unwrap().unwrap();
        assert_eq!(read.arrival_us, 500);
        assert_eq!(h.metrics().unknown_joint_fields, 1);
        assert_eq!(h.metrics().commands_accepted, 1);
    }

    #[test]
    fn test_malformed_rejected_without_state_change() {
        use strider_protocol::{FullBodyCommand, JointArrays};

        let h = handle();
        let msg = CommandMessage::FullBody(FullBodyCommand {
            sequence: 1,
            arrays: JointArrays {
                position: vec![0.0; 3],
                ..JointArrays::default()
            },
            ..FullBodyCommand::default()
        });
        assert!(matches!(h.submit(&msg), Err(DriverError::Protocol(_))));
        assert!(h.shared.mailbox.take_latest().unwrap().is_none());
        assert_eq!(h.metrics().commands_rejected_malformed, 1);
    }

    #[test]
    fn test_reset_flag_and_empty_readers() {
        let h = handle();
        assert!(h.latest_telemetry().is_none());
        assert_eq!(h.age_snapshot(), AgeSnapshot::default());
        h.request_reset();
        assert!(h.shared.reset_requested.load(Ordering::Acquire));
        assert_eq!(h.now_us(), 500);
    }
}
