//! 控制循环
//!
//! 由物理仿真的 tick 线程驱动，每个 tick：
//!
//! 1. 应用待处理的复位请求
//! 2. 从邮箱取最新指令（保持最后值），新指令合并进指令目标并喂看门狗
//! 3. 记录指令年龄
//! 4. 检查看门狗
//! 5. 仲裁有效模式（进入 Safety 时复位 PID）
//! 6. 计算逐关节力矩（None：跟踪指令；其它模式：可信的求解器输出或 PID 保持）
//! 7. 数值故障：该关节输出 0，进入 Safety 并复位全部控制器
//! 8. 发布遥测
//!
//! 给定相同的输入序列，输出完全确定。

use crate::age::AgeTracker;
use crate::arbiter::{ArbiterInput, BehaviorArbiter, ModeTransition, TransitionReason};
use crate::clock::TickTime;
use crate::config::{ControlConfig, ToleranceConfig};
use crate::error::DriverError;
use crate::handle::{ControlHandle, ControlShared};
use crate::metrics::ControlMetrics;
use crate::pid::{JointLimits, JointMeasurement, JointTarget, PidBank};
use crate::solver::{BehaviorSolver, RobotSnapshot, SolverOutput};
use crate::telemetry::{
    ActuationSource, ControllerStatistics, Fault, JointActuation, TelemetrySink, TickTelemetry,
};
use crate::watchdog::CommandWatchdog;
use smallvec::SmallVec;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use strider_protocol::{BehaviorMode, JointCommand, JointId};
use tracing::{debug, trace, warn};

/// 单个 tick 的输出
#[derive(Debug, Clone)]
pub struct TickOutput {
    pub actuation: Vec<JointActuation>,
    pub telemetry: Arc<TickTelemetry>,
}

impl TickOutput {
    /// 逐关节力矩
    pub fn efforts(&self) -> impl Iterator<Item = f64> + '_ {
        self.actuation.iter().map(|a| a.effort)
    }
}

/// 本 tick 的目标来源
enum Plan {
    Commanded,
    Hold,
    Solver(SolverOutput),
}

/// 控制循环（tick 线程独占）
pub struct ControlLoop {
    shared: Arc<ControlShared>,
    pid: PidBank,
    arbiter: BehaviorArbiter,
    age: AgeTracker,
    watchdog: CommandWatchdog,
    solver: Option<Box<dyn BehaviorSolver>>,
    sink: Box<dyn TelemetrySink>,
    tolerance: ToleranceConfig,
    statistics_interval_us: u64,
    nominal_period_us: u64,

    /// None 模式下跟踪的指令目标（由新指令逐字段合并）
    commanded: Vec<JointTarget>,
    /// 其它模式下的保持目标
    hold: Vec<JointTarget>,
    /// 关节是否已有过有限的测量
    observed: Vec<bool>,
    /// 关节位置是否已由指令设置
    position_commanded: Vec<bool>,

    /// 当前指令的发送时间戳与序号
    command_stamp: Option<(u64, u64)>,
    tick: u64,
    last_time_us: Option<u64>,
    last_statistics_us: Option<u64>,
}

impl std::fmt::Debug for ControlLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlLoop")
            .field("tick", &self.tick)
            .field("mode", &self.arbiter.current())
            .field("joints", &self.pid.len())
            .finish_non_exhaustive()
    }
}

impl ControlLoop {
    pub(crate) fn new(
        config: &ControlConfig,
        shared: Arc<ControlShared>,
        solver: Option<Box<dyn BehaviorSolver>>,
        sink: Box<dyn TelemetrySink>,
    ) -> Self {
        let limits = config
            .joints
            .iter()
            .map(|j| JointLimits {
                effort_limit: j.effort_limit,
                integral_limit: j.integral_limit,
            })
            .collect();
        let initial: Vec<JointTarget> = config
            .joints
            .iter()
            .map(|j| JointTarget::hold(0.0, j.gains))
            .collect();
        let n = initial.len();

        Self {
            shared,
            pid: PidBank::new(limits),
            arbiter: BehaviorArbiter::new(config.transition_history),
            age: AgeTracker::new(config.age_capacity),
            watchdog: CommandWatchdog::new(config.staleness_threshold_us()),
            solver,
            sink,
            tolerance: config.tolerance,
            statistics_interval_us: config.statistics_interval_us(),
            nominal_period_us: config.nominal_period_us,
            commanded: initial.clone(),
            hold: initial,
            observed: vec![false; n],
            position_commanded: vec![false; n],
            command_stamp: None,
            tick: 0,
            last_time_us: None,
            last_statistics_us: None,
        }
    }

    /// 新建一个共享同一核心的句柄
    pub fn handle(&self) -> ControlHandle {
        ControlHandle::new(Arc::clone(&self.shared))
    }

    pub fn joint_count(&self) -> usize {
        self.pid.len()
    }

    pub fn mode(&self) -> BehaviorMode {
        self.arbiter.current()
    }

    /// 已执行的 tick 数
    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn arbiter(&self) -> &BehaviorArbiter {
        &self.arbiter
    }

    pub fn pid(&self) -> &PidBank {
        &self.pid
    }

    pub fn age_tracker(&self) -> &AgeTracker {
        &self.age
    }

    /// 当前的指令目标
    pub fn commanded_targets(&self) -> &[JointTarget] {
        &self.commanded
    }

    /// 当前的保持目标
    pub fn hold_targets(&self) -> &[JointTarget] {
        &self.hold
    }

    /// 同步复位：复位全部控制器并进入 Safety
    pub fn reset_controls(&mut self) {
        let now_us = self.shared.clock.now_us();
        self.apply_reset(now_us);
    }

    /// 以时钟读数驱动一个 tick
    ///
    /// 第一个 tick 假定上一拍在一个标称周期之前。
    pub fn step(&mut self, measurements: &[JointMeasurement]) -> Result<TickOutput, DriverError> {
        let now_us = self.shared.clock.now_us();
        let previous_us = self
            .last_time_us
            .unwrap_or_else(|| now_us.saturating_sub(self.nominal_period_us));
        self.tick(TickTime::new(previous_us, now_us), measurements)
    }

    /// 执行一个 tick
    ///
    /// `time` 必须与构建时注入的时钟（默认 [`MonotonicClock`](crate::clock::MonotonicClock)）
    /// 处于同一时间基：句柄用该时钟为指令打到达时间戳，看门狗拿它与 `time.now_us` 比较。
    /// 不注入时钟时应使用 [`step`](Self::step)。
    ///
    /// # 错误
    ///
    /// - 测量向量长度与关节数不符：`DriverError::InvalidInput`
    /// - 邮箱锁被毒化：`DriverError::PoisonedLock`
    pub fn tick(
        &mut self,
        time: TickTime,
        measurements: &[JointMeasurement],
    ) -> Result<TickOutput, DriverError> {
        let n = self.joint_count();
        if measurements.len() != n {
            return Err(DriverError::InvalidInput(format!(
                "expected {} joint measurements, got {}",
                n,
                measurements.len()
            )));
        }

        let tick = self.tick;
        let now_us = time.now_us;
        let metrics = Arc::clone(&self.shared.metrics);
        ControlMetrics::incr(&metrics.ticks);

        self.observe(measurements);

        // 1. 复位服务
        let mut transition = None;
        if self.shared.reset_requested.swap(false, Ordering::AcqRel) {
            transition = self.apply_reset(now_us);
        }

        // 2. 指令邮箱
        let read = self.shared.mailbox.take_latest()?;
        let mut fresh_command = false;
        let mut command_mode = None;
        if let Some(read) = &read {
            if read.fresh {
                fresh_command = true;
                command_mode = read.command.requested_mode();
                self.merge(&read.command);
                self.watchdog.feed(read.arrival_us);
                self.command_stamp = Some((read.command.timestamp_us(), read.command.sequence()));
            }
        }
        let requested_mode = self.shared.mode_request.take().or(command_mode);

        // 3. 指令年龄（保持期间年龄持续增长）
        if let Some((timestamp_us, _)) = self.command_stamp {
            let latency = (now_us as f64 - timestamp_us as f64) * 1e-6;
            if self.age.record(latency, tick) {
                ControlMetrics::incr(&metrics.latency_clamped);
            }
            self.shared.age.store(Arc::new(self.age.snapshot()));
        }

        // 4. 看门狗
        let status = self.watchdog.check(now_us);
        if status.tripped {
            ControlMetrics::incr(&metrics.watchdog_trips);
        }

        // 5. 仲裁
        let previous_mode = self.arbiter.current();
        let decision = self.arbiter.arbitrate(&ArbiterInput {
            tick,
            now_us,
            requested: requested_mode,
            stale: status.stale,
            joints_initialized: self.observed.iter().all(|o| *o),
        });
        if decision.refused.is_some() {
            ControlMetrics::incr(&metrics.mode_requests_refused);
        }
        if let Some(t) = decision.transition {
            self.latch_hold(&t);
            transition = Some(t);
        }
        if decision.entered_safety() {
            self.pid.reset_all();
            ControlMetrics::incr(&metrics.safety_entries);
        }
        let mode = decision.mode;
        if mode != previous_mode {
            debug!(tick, from = %previous_mode, to = %mode, "Effective mode changed");
        }

        // 6. 力矩
        let clock_anomaly = time.is_anomalous();
        if clock_anomaly {
            ControlMetrics::incr(&metrics.clock_anomalies);
            warn!(
                tick,
                previous_us = time.previous_us,
                now_us = time.now_us,
                "Clock anomaly, holding previous output"
            );
        }
        let mut faults: SmallVec<[Fault; 4]> = SmallVec::new();
        let plan = self.plan(mode, tick, now_us, measurements, clock_anomaly, &mut faults);
        let source = match (&plan, clock_anomaly) {
            (_, true) => ActuationSource::Held,
            (Plan::Solver(_), false) => ActuationSource::Solver,
            _ => ActuationSource::Pid,
        };

        let dt = time.dt_secs();
        let mut actuation = Vec::with_capacity(n);
        let mut position_errors = Vec::with_capacity(n);
        let mut tolerance_violations = Vec::new();
        for (i, m) in measurements.iter().enumerate() {
            let id = JointId(i);
            let (position_target, effort) = self.actuate(id, m, &plan, dt, clock_anomaly, &mut faults);

            let error = if m.is_finite() {
                position_target - m.position
            } else {
                0.0
            };
            if self.tolerance.enabled && error.abs() > self.tolerance.position {
                tolerance_violations.push(i);
            }
            position_errors.push(error);
            actuation.push(JointActuation {
                effort,
                position_target,
            });
        }

        // 7. 数值故障
        let numerical = faults.iter().filter(|f| f.is_numerical()).count();
        if numerical > 0 {
            metrics
                .numerical_faults
                .fetch_add(numerical as u64, Ordering::Relaxed);
            for fault in faults.iter().filter(|f| f.is_numerical()) {
                let (Fault::NonFiniteMeasurement { joint } | Fault::NonFiniteEffort { joint }) = fault
                else {
                    continue;
                };
                warn!(
                    tick,
                    joint = self.shared.joints.name(JointId(*joint)),
                    fault = ?fault,
                    "Numerical fault, forcing safety"
                );
            }
            if let Some(t) =
                self.arbiter
                    .force_safety(tick, now_us, TransitionReason::NumericalFault)
            {
                ControlMetrics::incr(&metrics.safety_entries);
                self.latch_hold(&t);
                transition = Some(t);
            }
            self.pid.reset_all();
        }

        // 8. 遥测
        let telemetry = Arc::new(TickTelemetry {
            tick,
            time_us: now_us,
            mode: self.arbiter.current(),
            requested_mode,
            source,
            efforts: actuation.iter().map(|a| a.effort).collect(),
            position_errors,
            age: self.age.snapshot(),
            stale: status.stale,
            fresh_command,
            command_sequence: self.command_stamp.map(|(_, seq)| seq),
            faults,
            tolerance_violations,
            clock_anomaly,
            transition,
            refused: decision.refused,
        });
        self.publish(&telemetry);

        trace!(tick, mode = %telemetry.mode, ?source, "tick complete");
        self.tick += 1;
        self.last_time_us = Some(now_us);

        Ok(TickOutput {
            actuation,
            telemetry,
        })
    }

    fn apply_reset(&mut self, now_us: u64) -> Option<ModeTransition> {
        self.pid.reset_all();
        let transition = self
            .arbiter
            .force_safety(self.tick, now_us, TransitionReason::Reset);
        if let Some(t) = &transition {
            ControlMetrics::incr(&self.shared.metrics.safety_entries);
            self.latch_hold(t);
        }
        transition
    }

    /// 离开 None 时以指令目标作为保持目标
    fn latch_hold(&mut self, transition: &ModeTransition) {
        if transition.from == BehaviorMode::None && transition.to != BehaviorMode::None {
            self.hold.clone_from(&self.commanded);
        }
    }

    /// 首次有限测量时以测量位置作为初始目标
    fn observe(&mut self, measurements: &[JointMeasurement]) {
        for (i, m) in measurements.iter().enumerate() {
            if self.observed[i] || !m.is_finite() {
                continue;
            }
            self.observed[i] = true;
            if !self.position_commanded[i] {
                self.commanded[i].position = m.position;
                self.hold[i].position = m.position;
            }
        }
    }

    /// 将新指令逐字段合并进指令目标
    fn merge(&mut self, command: &JointCommand) {
        for (id, sp) in command.setpoints() {
            let i = id.index();
            let Some(target) = self.commanded.get_mut(i) else {
                warn!(joint = i, "Ignoring setpoint for joint index out of range");
                continue;
            };
            if let Some(p) = sp.position {
                target.position = p;
                self.position_commanded[i] = true;
            }
            if let Some(v) = sp.velocity {
                target.velocity = v;
            }
            if let Some(e) = sp.effort {
                target.effort = e;
            }
            sp.gains.apply_to(&mut target.gains);
            if sp.i_clamp.is_some() {
                target.i_clamp = sp.i_clamp;
            }
        }
        trace!(
            sequence = command.sequence(),
            setpoints = command.setpoints().len(),
            "merged command"
        );
    }

    fn plan(
        &mut self,
        mode: BehaviorMode,
        tick: u64,
        now_us: u64,
        measurements: &[JointMeasurement],
        clock_anomaly: bool,
        faults: &mut SmallVec<[Fault; 4]>,
    ) -> Plan {
        if mode == BehaviorMode::None {
            return Plan::Commanded;
        }
        if clock_anomaly {
            return Plan::Hold;
        }
        let Some(solver) = self.solver.as_mut() else {
            return Plan::Hold;
        };

        let snapshot = RobotSnapshot {
            tick,
            now_us,
            joints: measurements,
        };
        match solver.solve(&snapshot, mode) {
            Ok(output) if output.is_trusted(mode, tick, measurements.len()) => Plan::Solver(output),
            Ok(output) => {
                ControlMetrics::incr(&self.shared.metrics.solver_rejections);
                debug!(
                    tick,
                    mode = %mode,
                    output_mode = %output.mode,
                    output_tick = output.tick,
                    "Untrusted solver output, holding targets"
                );
                faults.push(Fault::SolverUntrusted);
                Plan::Hold
            },
            Err(e) => {
                ControlMetrics::incr(&self.shared.metrics.solver_rejections);
                debug!(tick, mode = %mode, error = %e, "Solver failed, holding targets");
                faults.push(Fault::SolverFailed);
                Plan::Hold
            },
        }
    }

    /// 计算单个关节的 (位置目标, 力矩)
    fn actuate(
        &mut self,
        id: JointId,
        m: &JointMeasurement,
        plan: &Plan,
        dt: f64,
        clock_anomaly: bool,
        faults: &mut SmallVec<[Fault; 4]>,
    ) -> (f64, f64) {
        let i = id.index();

        if let Plan::Solver(output) = plan {
            let t = output.targets[i];
            self.hold[i].position = t.position;
            self.hold[i].velocity = t.velocity;
        }
        let target = match plan {
            Plan::Commanded => self.commanded[i],
            Plan::Hold | Plan::Solver(_) => self.hold[i],
        };

        if !m.is_finite() {
            faults.push(Fault::NonFiniteMeasurement { joint: i });
            self.pid.note_output(id, 0.0);
            return (target.position, 0.0);
        }

        let effort = if clock_anomaly {
            self.pid.last_output(id)
        } else {
            match plan {
                Plan::Solver(output) => match output.targets[i].effort {
                    Some(e) => {
                        let limit = self.pid.limits(id).map_or(0.0, |l| l.effort_limit);
                        let e = e.clamp(-limit, limit);
                        self.pid.note_output(id, e);
                        e
                    },
                    None => self.pid.compute(id, &target, m, dt),
                },
                _ => self.pid.compute(id, &target, m, dt),
            }
        };

        if !effort.is_finite() {
            faults.push(Fault::NonFiniteEffort { joint: i });
            self.pid.note_output(id, 0.0);
            return (target.position, 0.0);
        }
        (target.position, effort)
    }

    fn publish(&mut self, telemetry: &Arc<TickTelemetry>) {
        self.shared.telemetry.store(Some(Arc::clone(telemetry)));
        self.sink.publish_tick(telemetry);

        let due = match self.last_statistics_us {
            None => true,
            Some(last) => telemetry.time_us.saturating_sub(last) >= self.statistics_interval_us,
        };
        if due {
            self.last_statistics_us = Some(telemetry.time_us);
            let statistics = ControllerStatistics {
                time_us: telemetry.time_us,
                tick: telemetry.tick,
                mode: telemetry.mode,
                age: telemetry.age,
                stale: telemetry.stale,
                metrics: self.shared.metrics.snapshot(),
            };
            self.sink.publish_statistics(&statistics);
        }
    }
}
