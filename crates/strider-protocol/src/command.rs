//! 内部关节指令表示
//!
//! 入站消息经过 [`crate::message`] 校验后转换为 [`JointCommand`]。
//! 指令只携带"期望"，模式请求也只是建议，由仲裁器决定是否采纳。

use crate::joint::JointId;
use crate::mode::BehaviorMode;
use serde::{Deserialize, Serialize};

/// 单个关节的 PID 与前馈增益
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointGains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    /// 速度前馈
    pub velocity_ff: f64,
    /// 力矩前馈
    pub effort_ff: f64,
}

impl Default for JointGains {
    fn default() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            velocity_ff: 0.0,
            effort_ff: 0.0,
        }
    }
}

impl JointGains {
    /// 纯 PD 增益
    pub fn pd(kp: f64, kd: f64) -> Self {
        Self {
            kp,
            kd,
            ..Self::default()
        }
    }

    pub fn with_ki(mut self, ki: f64) -> Self {
        self.ki = ki;
        self
    }

    pub fn with_feedforward(mut self, velocity_ff: f64, effort_ff: f64) -> Self {
        self.velocity_ff = velocity_ff;
        self.effort_ff = effort_ff;
        self
    }

    pub fn is_finite(&self) -> bool {
        self.kp.is_finite()
            && self.ki.is_finite()
            && self.kd.is_finite()
            && self.velocity_ff.is_finite()
            && self.effort_ff.is_finite()
    }
}

/// 增益的部分更新
///
/// 只有 `Some` 的项会覆盖已有增益。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct GainsUpdate {
    pub kp: Option<f64>,
    pub ki: Option<f64>,
    pub kd: Option<f64>,
    pub velocity_ff: Option<f64>,
    pub effort_ff: Option<f64>,
}

impl GainsUpdate {
    /// 完整覆盖
    pub fn all(gains: JointGains) -> Self {
        Self {
            kp: Some(gains.kp),
            ki: Some(gains.ki),
            kd: Some(gains.kd),
            velocity_ff: Some(gains.velocity_ff),
            effort_ff: Some(gains.effort_ff),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.kp.is_none()
            && self.ki.is_none()
            && self.kd.is_none()
            && self.velocity_ff.is_none()
            && self.effort_ff.is_none()
    }

    /// 将更新应用到 `gains`
    pub fn apply_to(&self, gains: &mut JointGains) {
        if let Some(v) = self.kp {
            gains.kp = v;
        }
        if let Some(v) = self.ki {
            gains.ki = v;
        }
        if let Some(v) = self.kd {
            gains.kd = v;
        }
        if let Some(v) = self.velocity_ff {
            gains.velocity_ff = v;
        }
        if let Some(v) = self.effort_ff {
            gains.effort_ff = v;
        }
    }
}

/// 单个关节的期望值
///
/// 缺省字段表示"保持上一次的期望"。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct JointSetpoint {
    pub position: Option<f64>,
    pub velocity: Option<f64>,
    pub effort: Option<f64>,
    pub gains: GainsUpdate,
    /// 积分饱和限幅（覆盖配置值）
    pub i_clamp: Option<f64>,
}

impl JointSetpoint {
    /// 仅位置期望
    pub fn position(position: f64) -> Self {
        Self {
            position: Some(position),
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

    pub fn with_gains(mut self, gains: JointGains) -> Self {
        self.gains = GainsUpdate::all(gains);
        self
    }

    pub fn with_i_clamp(mut self, i_clamp: f64) -> Self {
        self.i_clamp = Some(i_clamp);
        self
    }
}

/// 经过校验的关节指令
///
/// `sequence` 单调递增，邮箱据此丢弃乱序到达的指令。
/// `timestamp_us` 是发送方的时间戳（微秒），用于计算指令年龄。
#[derive(Debug, Clone, PartialEq)]
pub struct JointCommand {
    sequence: u64,
    timestamp_us: u64,
    requested_mode: Option<BehaviorMode>,
    setpoints: Vec<(JointId, JointSetpoint)>,
}

impl JointCommand {
    /// 创建空指令
    pub fn new(sequence: u64, timestamp_us: u64) -> Self {
        Self {
            sequence,
            timestamp_us,
            requested_mode: None,
            setpoints: Vec::new(),
        }
    }

    /// 添加一个关节期望（同一关节重复添加时后者覆盖前者）
    pub fn with_setpoint(mut self, joint: JointId, setpoint: JointSetpoint) -> Self {
        self.push_setpoint(joint, setpoint);
        self
    }

    /// 附带模式请求
    pub fn with_mode(mut self, mode: BehaviorMode) -> Self {
        self.requested_mode = Some(mode);
        self
    }

    pub fn push_setpoint(&mut self, joint: JointId, setpoint: JointSetpoint) {
        if let Some(slot) = self.setpoints.iter_mut().find(|(id, _)| *id == joint) {
            slot.1 = setpoint;
        } else {
            self.setpoints.push((joint, setpoint));
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn timestamp_us(&self) -> u64 {
        self.timestamp_us
    }

    pub fn requested_mode(&self) -> Option<BehaviorMode> {
        self.requested_mode
    }

    pub fn setpoints(&self) -> &[(JointId, JointSetpoint)] {
        &self.setpoints
    }

    pub fn setpoint(&self, joint: JointId) -> Option<&JointSetpoint> {
        self.setpoints
            .iter()
            .find(|(id, _)| *id == joint)
            .map(|(_, sp)| sp)
    }
}
