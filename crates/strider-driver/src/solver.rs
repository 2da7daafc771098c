//! 行为求解器接口
//!
//! 全身行为求解器是外部协作者：给定状态快照与当前模式，返回逐关节目标，
//! 或明确失败。失败等价于"本 tick 无输出"，控制循环回退到 PID 保持。

use crate::pid::JointMeasurement;
use strider_protocol::BehaviorMode;
use thiserror::Error;

/// 求解器错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolverError {
    /// 当前模式不受支持
    #[error("Mode not supported by solver: {0}")]
    UnsupportedMode(BehaviorMode),

    /// 求解未收敛或内部失败
    #[error("Solver failed: {0}")]
    Failed(String),
}

/// 提供给求解器的状态快照
#[derive(Debug, Clone, Copy)]
pub struct RobotSnapshot<'a> {
    pub tick: u64,
    pub now_us: u64,
    pub joints: &'a [JointMeasurement],
}

/// 求解器给出的单关节目标
///
/// `effort` 为 `Some` 时直接作为输出力矩（仍受关节限幅）；
/// 否则按 `position`/`velocity` 作为 PID 目标。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SolverTarget {
    pub position: f64,
    pub velocity: f64,
    pub effort: Option<f64>,
}

impl SolverTarget {
    pub fn position(position: f64) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn is_finite(&self) -> bool {
        self.position.is_finite()
            && self.velocity.is_finite()
            && self.effort.is_none_or(f64::is_finite)
    }
}

/// 求解器输出
#[derive(Debug, Clone, PartialEq)]
pub struct SolverOutput {
    /// 输出所针对的模式
    pub mode: BehaviorMode,
    /// 输出所针对的 tick
    pub tick: u64,
    pub targets: Vec<SolverTarget>,
}

impl SolverOutput {
    /// 是否可被信任
    ///
    /// 针对当前模式、滞后不超过一个 tick、长度匹配且所有值有限。
    pub fn is_trusted(&self, mode: BehaviorMode, tick: u64, joint_count: usize) -> bool {
        self.mode == mode
            && self.tick.saturating_add(1) >= tick
            && self.tick <= tick
            && self.targets.len() == joint_count
            && self.targets.iter().all(SolverTarget::is_finite)
    }
}

/// 行为求解器
pub trait BehaviorSolver: Send {
    fn solve(
        &mut self,
        snapshot: &RobotSnapshot<'_>,
        mode: BehaviorMode,
    ) -> Result<SolverOutput, SolverError>;
}
