//! 仿真对象：一阶关节模型与姿态求解器

use strider_driver::{
    BehaviorSolver, JointMeasurement, RobotSnapshot, SolverError, SolverOutput, SolverTarget,
};
use strider_protocol::{BehaviorMode, JointSet};

/// 一阶关节模型
///
/// 每个关节：`velocity = effort / damping`，位置按速度积分。
#[derive(Debug, Clone)]
pub struct FirstOrderPlant {
    damping: f64,
    positions: Vec<f64>,
    velocities: Vec<f64>,
}

impl FirstOrderPlant {
    pub fn new(joints: usize, damping: f64) -> Self {
        Self {
            damping: damping.max(f64::EPSILON),
            positions: vec![0.0; joints],
            velocities: vec![0.0; joints],
        }
    }

    /// 用一拍的力矩推进模型
    pub fn advance(&mut self, efforts: impl Iterator<Item = f64>, dt: f64) {
        for ((p, v), e) in self
            .positions
            .iter_mut()
            .zip(self.velocities.iter_mut())
            .zip(efforts)
        {
            *v = e / self.damping;
            *p += *v * dt;
        }
    }

    pub fn measure(&self) -> Vec<JointMeasurement> {
        self.positions
            .iter()
            .zip(&self.velocities)
            .map(|(p, v)| JointMeasurement::new(*p).with_velocity(*v))
            .collect()
    }

    pub fn positions(&self) -> &[f64] {
        &self.positions
    }
}

/// 按模式输出固定姿态（Walk 时腿部加正弦摆动）
#[derive(Debug, Clone)]
pub struct PoseSolver {
    knees: Vec<usize>,
    hips: Vec<usize>,
    period_ticks: f64,
}

impl PoseSolver {
    pub fn new(joints: &JointSet) -> Self {
        let pick = |suffix: &str| {
            joints
                .iter()
                .filter(|(_, name)| name.contains("_leg_") && name.ends_with(suffix))
                .map(|(id, _)| id.index())
                .collect()
        };
        Self {
            knees: pick("kny"),
            hips: pick("lhy"),
            period_ticks: 800.0,
        }
    }

    fn pose(&self, mode: BehaviorMode, tick: u64, n: usize) -> Vec<SolverTarget> {
        let (hip, knee) = match mode {
            BehaviorMode::StandPrep => (-0.6, 1.2),
            BehaviorMode::Stand | BehaviorMode::Walk => (-0.2, 0.4),
            _ => (0.0, 0.0),
        };
        let swing = if mode == BehaviorMode::Walk {
            let phase = tick as f64 / self.period_ticks * std::f64::consts::TAU;
            0.15 * phase.sin()
        } else {
            0.0
        };

        let mut targets = vec![SolverTarget::position(0.0); n];
        for (k, i) in self.hips.iter().enumerate() {
            // 左右腿反相
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            if let Some(t) = targets.get_mut(*i) {
                *t = SolverTarget::position(hip + sign * swing);
            }
        }
        for i in &self.knees {
            if let Some(t) = targets.get_mut(*i) {
                *t = SolverTarget::position(knee);
            }
        }
        targets
    }
}

impl BehaviorSolver for PoseSolver {
    fn solve(
        &mut self,
        snapshot: &RobotSnapshot<'_>,
        mode: BehaviorMode,
    ) -> Result<SolverOutput, SolverError> {
        if mode == BehaviorMode::None {
            return Err(SolverError::UnsupportedMode(mode));
        }
        Ok(SolverOutput {
            mode,
            tick: snapshot.tick,
            targets: self.pose(mode, snapshot.tick, snapshot.joints.len()),
        })
    }
}
