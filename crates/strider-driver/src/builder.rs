//! 控制循环 Builder（链式构造）

use crate::clock::{Clock, MonotonicClock};
use crate::config::ControlConfig;
use crate::control_loop::ControlLoop;
use crate::error::DriverError;
use crate::handle::{ControlHandle, ControlShared};
use crate::solver::BehaviorSolver;
use crate::telemetry::{NullSink, TelemetrySink};
use std::sync::Arc;
use tracing::info;

/// 控制循环 Builder
///
/// 所有协作者都通过构造函数注入，不使用全局状态。
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use strider_driver::{ControlConfig, ControlLoopBuilder, ManualClock};
///
/// let clock = Arc::new(ManualClock::new(0));
/// let (control, handle) = ControlLoopBuilder::new(ControlConfig::default())
///     .clock(clock.clone())
///     .build()
///     .unwrap();
///
/// assert_eq!(control.joint_count(), 28);
/// handle.request_mode("stand-prep").unwrap();
/// ```
pub struct ControlLoopBuilder {
    config: ControlConfig,
    clock: Option<Arc<dyn Clock>>,
    solver: Option<Box<dyn BehaviorSolver>>,
    sink: Option<Box<dyn TelemetrySink>>,
}

impl ControlLoopBuilder {
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            clock: None,
            solver: None,
            sink: None,
        }
    }

    /// 时钟源（默认 [`MonotonicClock`]）
    ///
    /// 指令到达时间与 `step()` 都读这个时钟；直接调用 `tick()` 时传入的时间须与它一致。
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// 行为求解器（默认无，非 None 模式下始终 PID 保持）
    pub fn solver(mut self, solver: impl BehaviorSolver + 'static) -> Self {
        self.solver = Some(Box::new(solver));
        self
    }

    /// 遥测接收方（默认 [`NullSink`]）
    pub fn sink(mut self, sink: impl TelemetrySink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// 校验配置并构建控制循环与句柄
    pub fn build(self) -> Result<(ControlLoop, ControlHandle), DriverError> {
        self.config.validate()?;
        let joints = self.config.joint_set()?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(MonotonicClock));
        let shared = Arc::new(ControlShared::new(joints, clock));
        let handle = ControlHandle::new(Arc::clone(&shared));

        info!(
            joints = self.config.joints.len(),
            staleness_ms = self.config.staleness_threshold_us() / 1_000,
            tolerance = self.config.tolerance.enabled,
            solver = self.solver.is_some(),
            "Control loop configured"
        );

        let control = ControlLoop::new(
            &self.config,
            shared,
            self.solver,
            self.sink.unwrap_or_else(|| Box::new(NullSink)),
        );
        Ok((control, handle))
    }
}
