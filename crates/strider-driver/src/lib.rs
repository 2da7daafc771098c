//! # Strider Driver
//!
//! 腿式机器人的关节控制核心，由物理仿真的 tick 驱动。
//!
//! - 摄取线程通过 [`ControlHandle`] 提交指令（单槽邮箱，最新序号胜出）
//! - tick 线程调用 [`ControlLoop::tick`]：PID 控制器组、行为模式仲裁、看门狗回退
//! - 报告路径无锁读取最新遥测与指令年龄统计
//!
//! ```
//! use std::sync::Arc;
//! use strider_driver::{
//!     ControlConfig, ControlLoopBuilder, JointMeasurement, ManualClock, TickTime,
//! };
//! use strider_protocol::BehaviorMode;
//!
//! let clock = Arc::new(ManualClock::new(0));
//! let (mut control, handle) = ControlLoopBuilder::new(ControlConfig::default())
//!     .clock(clock.clone())
//!     .build()
//!     .unwrap();
//!
//! let measurements = vec![JointMeasurement::new(0.0); control.joint_count()];
//! let out = control.tick(TickTime::new(0, 1_000), &measurements).unwrap();
//! assert_eq!(out.telemetry.mode, BehaviorMode::Safety);
//! assert!(handle.latest_telemetry().is_some());
//! ```

pub mod age;
pub mod arbiter;
mod builder;
pub mod clock;
pub mod config;
mod control_loop;
mod error;
mod handle;
pub mod mailbox;
pub mod metrics;
pub mod mode;
pub mod pid;
pub mod solver;
pub mod telemetry;
pub mod watchdog;

pub use age::{AgeSample, AgeSnapshot, AgeTracker};
pub use arbiter::{
    ArbiterInput, BehaviorArbiter, Decision, ModeTransition, Refusal, RefusalReason,
    TransitionReason,
};
pub use builder::ControlLoopBuilder;
pub use clock::{Clock, ManualClock, MonotonicClock, TickTime};
pub use config::{ConfigError, ControlConfig, JointConfig, ToleranceConfig};
pub use control_loop::{ControlLoop, TickOutput};
pub use error::DriverError;
pub use handle::ControlHandle;
pub use mailbox::{CommandMailbox, MailboxRead, PublishOutcome};
pub use metrics::{ControlMetrics, MetricsSnapshot};
pub use mode::AtomicModeRequest;
pub use pid::{ControllerState, ErrorTerms, JointLimits, JointMeasurement, JointTarget, PidBank};
pub use solver::{BehaviorSolver, RobotSnapshot, SolverError, SolverOutput, SolverTarget};
pub use telemetry::{
    ActuationSource, ChannelSink, ControllerStatistics, Fault, JointActuation, NullSink,
    TelemetryEvent, TelemetrySink, TickTelemetry,
};
pub use watchdog::{CommandWatchdog, WatchdogStatus};
