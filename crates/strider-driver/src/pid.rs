//! PID 控制器组 - 逐关节比例-积分-微分控制
//!
//! # 算法
//!
//! ```text
//! e      = desired.position − measured.position
//! ∫e    += e · dt                       （限幅到 ±i_clamp）
//! d      = −measured.velocity            （有速度测量时）
//!        = (Δe − Δdesired) / dt          （否则，去除设定值跳变）
//! output = kp·e + ki·∫e + kd·d + vff·desired.velocity + eff·desired.effort
//! ```
//!
//! 输出限幅到关节力矩上限。`dt <= 0` 时返回该关节上一 tick 的输出，状态不变。
//!
//! 状态按关节索引扁平存储，只由 tick 线程修改。

use serde::Serialize;
use strider_protocol::{JointGains, JointId};
use tracing::{trace, warn};

/// 单个关节的控制目标
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointTarget {
    pub position: f64,
    pub velocity: f64,
    pub effort: f64,
    pub gains: JointGains,
    /// 积分限幅覆盖（`None` 使用配置值）
    pub i_clamp: Option<f64>,
}

impl JointTarget {
    /// 以给定位置和增益保持
    pub fn hold(position: f64, gains: JointGains) -> Self {
        Self {
            position,
            gains,
            ..Self::default()
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.effort.is_finite()
            && self.gains.is_finite()
            && self.i_clamp.is_none_or(f64::is_finite)
    }
}

/// 单个关节的测量值
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointMeasurement {
    pub position: f64,
    /// 测得的速度（没有时用有限差分）
    pub velocity: Option<f64>,
    /// 测得的力矩
    pub effort: Option<f64>,
}

impl JointMeasurement {
    pub fn new(position: f64) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn with_velocity(mut self, velocity: f64) -> Self {
        self.velocity = Some(velocity);
        self
    }

    pub fn with_effort(mut self, effort: f64) -> Self {
        self.effort = Some(effort);
        self
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_none_or(f64::is_finite)
            && self.effort.is_none_or(f64::is_finite)
    }
}

/// 关节限幅
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointLimits {
    pub effort_limit: f64,
    pub integral_limit: f64,
}

/// 单个关节的控制器状态
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ControllerState {
    pub integral: f64,
    pub prev_error: f64,
    pub prev_desired: f64,
    pub last_output: f64,
    /// 是否已有上一拍的误差（有限差分需要）
    pub primed: bool,
}

impl ControllerState {
    /// 清空积分与微分历史，保留上一拍输出
    pub fn clear_history(&mut self) {
        *self = ControllerState {
            last_output: self.last_output,
            ..ControllerState::default()
        };
    }
}

/// 最近一次计算的各误差项（用于遥测）
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct ErrorTerms {
    /// 位置误差
    pub position: f64,
    /// 微分项输入
    pub derivative: f64,
    /// 积分累积值
    pub integral: f64,
    /// 速度误差（期望速度 − 测量速度，无测量时为 0）
    pub velocity: f64,
}

/// PID 控制器组
#[derive(Debug, Clone)]
pub struct PidBank {
    limits: Vec<JointLimits>,
    states: Vec<ControllerState>,
    terms: Vec<ErrorTerms>,
}

impl PidBank {
    /// 创建控制器组
    ///
    /// # 参数
    ///
    /// - `limits`: 逐关节限幅，按关节索引排列
    pub fn new(limits: Vec<JointLimits>) -> Self {
        let n = limits.len();
        Self {
            limits,
            states: vec![ControllerState::default(); n],
            terms: vec![ErrorTerms::default(); n],
        }
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    /// 计算一个关节的输出力矩
    ///
    /// # 参数
    ///
    /// - `joint`: 关节索引
    /// - `desired`: 控制目标
    /// - `measured`: 测量值
    /// - `dt`: 时间步长（秒）
    ///
    /// 结果非有限时不会被记为"上一次输出"，由调用方按故障处理。
    pub fn compute(
        &mut self,
        joint: JointId,
        desired: &JointTarget,
        measured: &JointMeasurement,
        dt: f64,
    ) -> f64 {
        let i = joint.index();
        let (Some(state), Some(limits)) = (self.states.get_mut(i), self.limits.get(i)) else {
            warn!(joint = i, "PID compute for unknown joint index");
            return 0.0;
        };

        if dt.is_nan() || dt <= 0.0 {
            // 时钟异常：保持上一拍输出
            return state.last_output;
        }

        let gains = &desired.gains;
        let error = desired.position - measured.position;

        let i_limit = desired
            .i_clamp
            .filter(|c| c.is_finite())
            .unwrap_or(limits.integral_limit)
            .abs();
        state.integral = (state.integral + error * dt).clamp(-i_limit, i_limit);

        let derivative = match measured.velocity {
            Some(v) => -v,
            None if state.primed => {
                let d_error = error - state.prev_error;
                let d_desired = desired.position - state.prev_desired;
                (d_error - d_desired) / dt
            },
            None => 0.0,
        };

        let raw = gains.kp * error
            + gains.ki * state.integral
            + gains.kd * derivative
            + gains.velocity_ff * desired.velocity
            + gains.effort_ff * desired.effort;
        let output = raw.clamp(-limits.effort_limit, limits.effort_limit);

        state.prev_error = error;
        state.prev_desired = desired.position;
        state.primed = true;
        if output.is_finite() {
            state.last_output = output;
        }

        self.terms[i] = ErrorTerms {
            position: error,
            derivative,
            integral: state.integral,
            velocity: measured.velocity.map_or(0.0, |v| desired.velocity - v),
        };

        trace!(joint = i, error, integral = state.integral, output, "pid");
        output
    }

    /// 重置一个关节的控制器状态
    ///
    /// 只清空积分与微分历史；上一拍输出保留，时钟异常时仍可保持。
    pub fn reset(&mut self, joint: JointId) {
        if let Some(state) = self.states.get_mut(joint.index()) {
            state.clear_history();
        }
        if let Some(terms) = self.terms.get_mut(joint.index()) {
            *terms = ErrorTerms::default();
        }
    }

    /// 重置全部关节
    pub fn reset_all(&mut self) {
        self.states.iter_mut().for_each(ControllerState::clear_history);
        self.terms.fill(ErrorTerms::default());
    }

    /// 上一拍输出（用于时钟异常时保持）
    pub fn last_output(&self, joint: JointId) -> f64 {
        self.states.get(joint.index()).map_or(0.0, |s| s.last_output)
    }

    /// 记录一个绕过 PID 的输出（求解器直通），使时钟异常时能保持它
    pub fn note_output(&mut self, joint: JointId, output: f64) {
        if !output.is_finite() {
            return;
        }
        if let Some(state) = self.states.get_mut(joint.index()) {
            state.last_output = output;
        }
    }

    pub fn state(&self, joint: JointId) -> Option<&ControllerState> {
        self.states.get(joint.index())
    }

    pub fn error_terms(&self, joint: JointId) -> Option<&ErrorTerms> {
        self.terms.get(joint.index())
    }

    pub fn limits(&self, joint: JointId) -> Option<&JointLimits> {
        self.limits.get(joint.index())
    }
}
