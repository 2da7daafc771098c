//! 行为模式仲裁
//!
//! 单一状态机决定每个 tick 的有效模式：
//!
//! - 第一个 tick：`None → Safety`
//! - 看门狗过期：任意非 Safety 模式 → `Safety`；已在 Safety 时拒绝所有请求
//! - `Safety` 请求：无条件接受
//! - `None` 请求：只能从 `Safety` 进入
//! - 正向一步（`Safety → StandPrep → Stand → Walk`）：需要当前模式至少保持一个 tick、
//!   关节已初始化、指令未过期
//! - 后退或跳级：拒绝，模式不变
//!
//! 在 `None` 模式下任何未满足的请求都会把系统带入 `Safety`。

use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use strider_protocol::BehaviorMode;
use tracing::{info, warn};

/// 模式切换原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// 第一个 tick
    Startup,
    /// 外部请求
    Requested,
    /// 看门狗过期
    Watchdog,
    /// 数值故障
    NumericalFault,
    /// 复位服务
    Reset,
    /// `None` 模式下请求的前置条件不满足
    PreconditionUnmet,
}

/// 请求被拒绝的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefusalReason {
    /// 跳过了正向链中的某一级
    SkipsState,
    /// 当前模式保持时间不足一个 tick
    HeldTooBriefly,
    /// 关节测量尚未初始化
    JointsUninitialized,
    /// 指令已过期
    CommandStale,
    /// 只能从 Safety 进入 None
    NoneOutsideSafety,
    /// 正向链中的后退
    Backward,
}

impl fmt::Display for RefusalReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefusalReason::SkipsState => "request skips a state",
            RefusalReason::HeldTooBriefly => "current mode not held for a full tick",
            RefusalReason::JointsUninitialized => "joint measurements not initialized",
            RefusalReason::CommandStale => "command stream is stale",
            RefusalReason::NoneOutsideSafety => "none is only reachable from safety",
            RefusalReason::Backward => "backward transition",
        };
        f.write_str(s)
    }
}

/// 一次模式切换
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ModeTransition {
    pub from: BehaviorMode,
    pub to: BehaviorMode,
    pub tick: u64,
    pub at_us: u64,
    pub reason: TransitionReason,
}

/// 一次被拒绝的请求
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Refusal {
    pub requested: BehaviorMode,
    pub reason: RefusalReason,
}

/// 仲裁输入
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterInput {
    pub tick: u64,
    pub now_us: u64,
    pub requested: Option<BehaviorMode>,
    pub stale: bool,
    pub joints_initialized: bool,
}

/// 仲裁结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub mode: BehaviorMode,
    pub transition: Option<ModeTransition>,
    pub refused: Option<Refusal>,
}

impl Decision {
    /// 本 tick 是否刚进入 Safety
    pub fn entered_safety(&self) -> bool {
        self.transition
            .is_some_and(|t| t.to == BehaviorMode::Safety && t.from != BehaviorMode::Safety)
    }
}

/// 行为仲裁器
#[derive(Debug, Clone)]
pub struct BehaviorArbiter {
    current: BehaviorMode,
    /// 进入当前模式的 tick（第一个 tick 之前为 `None`）
    entered_tick: Option<u64>,
    history: VecDeque<ModeTransition>,
    history_capacity: usize,
}

impl BehaviorArbiter {
    pub fn new(history_capacity: usize) -> Self {
        let history_capacity = history_capacity.max(1);
        Self {
            current: BehaviorMode::None,
            entered_tick: None,
            history: VecDeque::with_capacity(history_capacity),
            history_capacity,
        }
    }

    pub fn current(&self) -> BehaviorMode {
        self.current
    }

    pub fn entered_tick(&self) -> Option<u64> {
        self.entered_tick
    }

    /// 最近的模式切换（旧 → 新）
    pub fn history(&self) -> impl Iterator<Item = &ModeTransition> {
        self.history.iter()
    }

    /// 决定本 tick 的有效模式
    pub fn arbitrate(&mut self, input: &ArbiterInput) -> Decision {
        if self.entered_tick.is_none() {
            let transition = self.enter(BehaviorMode::Safety, input, TransitionReason::Startup);
            return self.decision(Some(transition), None);
        }

        if input.stale {
            if self.current != BehaviorMode::Safety {
                warn!(
                    from = %self.current,
                    tick = input.tick,
                    "Command stream stale, forcing safety"
                );
                let transition = self.enter(BehaviorMode::Safety, input, TransitionReason::Watchdog);
                return self.decision(Some(transition), None);
            }
            let refused = input
                .requested
                .filter(|m| *m != BehaviorMode::Safety)
                .map(|m| self.refuse(m, RefusalReason::CommandStale, input));
            return self.decision(None, refused);
        }

        let Some(requested) = input.requested else {
            return self.decision(None, None);
        };
        if requested == self.current {
            return self.decision(None, None);
        }

        match self.check(requested, input) {
            Ok(()) => {
                let transition = self.enter(requested, input, TransitionReason::Requested);
                self.decision(Some(transition), None)
            },
            Err(reason) if self.current == BehaviorMode::None => {
                warn!(
                    requested = %requested,
                    %reason,
                    "Unmet mode request in none, forcing safety"
                );
                let transition =
                    self.enter(BehaviorMode::Safety, input, TransitionReason::PreconditionUnmet);
                self.decision(
                    Some(transition),
                    Some(Refusal { requested, reason }),
                )
            },
            Err(reason) => {
                let refused = self.refuse(requested, reason, input);
                self.decision(None, Some(refused))
            },
        }
    }

    /// 无条件进入 Safety
    ///
    /// 已在 Safety 时返回 `None`。
    pub fn force_safety(
        &mut self,
        tick: u64,
        now_us: u64,
        reason: TransitionReason,
    ) -> Option<ModeTransition> {
        if self.current == BehaviorMode::Safety && self.entered_tick.is_some() {
            return None;
        }
        warn!(from = %self.current, ?reason, tick, "Forcing safety");
        let input = ArbiterInput {
            tick,
            now_us,
            requested: None,
            stale: false,
            joints_initialized: false,
        };
        Some(self.enter(BehaviorMode::Safety, &input, reason))
    }

    fn check(&self, requested: BehaviorMode, input: &ArbiterInput) -> Result<(), RefusalReason> {
        match requested {
            BehaviorMode::Safety => Ok(()),
            BehaviorMode::None if self.current == BehaviorMode::Safety => Ok(()),
            BehaviorMode::None => Err(RefusalReason::NoneOutsideSafety),
            _ if Some(requested) == self.current.next() => {
                if self.entered_tick.is_some_and(|t| t >= input.tick) {
                    Err(RefusalReason::HeldTooBriefly)
                } else if !input.joints_initialized {
                    Err(RefusalReason::JointsUninitialized)
                } else {
                    Ok(())
                }
            },
            _ if requested.rank() < self.current.rank() => Err(RefusalReason::Backward),
            _ => Err(RefusalReason::SkipsState),
        }
    }

    fn enter(
        &mut self,
        to: BehaviorMode,
        input: &ArbiterInput,
        reason: TransitionReason,
    ) -> ModeTransition {
        let transition = ModeTransition {
            from: self.current,
            to,
            tick: input.tick,
            at_us: input.now_us,
            reason,
        };
        if reason == TransitionReason::Requested || reason == TransitionReason::Startup {
            info!(from = %transition.from, to = %to, tick = input.tick, ?reason, "Mode transition");
        }

        self.current = to;
        self.entered_tick = Some(input.tick);
        if self.history.len() == self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(transition);
        transition
    }

    fn refuse(
        &self,
        requested: BehaviorMode,
        reason: RefusalReason,
        input: &ArbiterInput,
    ) -> Refusal {
        warn!(
            current = %self.current,
            requested = %requested,
            tick = input.tick,
            %reason,
            "Mode request refused"
        );
        Refusal { requested, reason }
    }

    fn decision(&self, transition: Option<ModeTransition>, refused: Option<Refusal>) -> Decision {
        Decision {
            mode: self.current,
            transition,
            refused,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(tick: u64, requested: Option<BehaviorMode>) -> ArbiterInput {
        ArbiterInput {
            tick,
            now_us: tick * 1_000,
            requested,
            stale: false,
            joints_initialized: true,
        }
    }

    /// 启动并推进到 Safety 之后的一个 tick
    fn started() -> BehaviorArbiter {
        let mut arb = BehaviorArbiter::new(16);
        arb.arbitrate(&input(0, None));
        arb
    }

    #[test]
    fn test_startup_enters_safety() {
        let mut arb = BehaviorArbiter::new(16);
        assert_eq!(arb.current(), BehaviorMode::None);
        let d = arb.arbitrate(&input(0, Some(BehaviorMode::Walk)));
        assert_eq!(d.mode, BehaviorMode::Safety);
        assert!(d.entered_safety());
        assert_eq!(d.transition.unwrap().reason, TransitionReason::Startup);
    }

    #[test]
    fn test_forward_chain_one_step_per_tick() {
        let mut arb = started();
        let d = arb.arbitrate(&input(1, Some(BehaviorMode::StandPrep)));
        assert_eq!(d.mode, BehaviorMode::StandPrep);

        // 同一 tick 内不能继续前进
        let d = arb.arbitrate(&input(1, Some(BehaviorMode::Stand)));
        assert_eq!(d.mode, BehaviorMode::StandPrep);
        assert_eq!(d.refused.unwrap().reason, RefusalReason::HeldTooBriefly);

        assert_eq!(arb.arbitrate(&input(2, Some(BehaviorMode::Stand))).mode, BehaviorMode::Stand);
        assert_eq!(arb.arbitrate(&input(3, Some(BehaviorMode::Walk))).mode, BehaviorMode::Walk);
    }

    #[test]
    fn test_walk_from_safety_refused() {
        let mut arb = started();
        let d = arb.arbitrate(&input(5, Some(BehaviorMode::Walk)));
        assert_eq!(d.mode, BehaviorMode::Safety);
        assert!(d.transition.is_none());
        assert_eq!(
            d.refused,
            Some(Refusal {
                requested: BehaviorMode::Walk,
                reason: RefusalReason::SkipsState
            })
        );
    }

    #[test]
    fn test_backward_and_none_refused() {
        let mut arb = started();
        arb.arbitrate(&input(1, Some(BehaviorMode::StandPrep)));
        arb.arbitrate(&input(2, Some(BehaviorMode::Stand)));

        let d = arb.arbitrate(&input(3, Some(BehaviorMode::StandPrep)));
        assert_eq!(d.refused.unwrap().reason, RefusalReason::Backward);
        let d = arb.arbitrate(&input(4, Some(BehaviorMode::None)));
        assert_eq!(d.refused.unwrap().reason, RefusalReason::NoneOutsideSafety);
        assert_eq!(arb.current(), BehaviorMode::Stand);

        // Safety 无条件
        let d = arb.arbitrate(&input(4, Some(BehaviorMode::Safety)));
        assert!(d.entered_safety());
    }

    #[test]
    fn test_none_only_from_safety() {
        let mut arb = started();
        let d = arb.arbitrate(&input(1, Some(BehaviorMode::None)));
        assert_eq!(d.mode, BehaviorMode::None);
        assert!(!d.entered_safety());
    }

    #[test]
    fn test_unmet_request_in_none_forces_safety() {
        let mut arb = started();
        arb.arbitrate(&input(1, Some(BehaviorMode::None)));
        let d = arb.arbitrate(&input(2, Some(BehaviorMode::Stand)));
        assert_eq!(d.mode, BehaviorMode::Safety);
        assert_eq!(d.transition.unwrap().reason, TransitionReason::PreconditionUnmet);
        assert_eq!(d.refused.unwrap().reason, RefusalReason::SkipsState);
    }

    #[test]
    fn test_watchdog_forces_safety_without_auto_recovery() {
        let mut arb = started();
        arb.arbitrate(&input(1, Some(BehaviorMode::StandPrep)));
        arb.arbitrate(&input(2, Some(BehaviorMode::Stand)));

        let mut stale = input(3, None);
        stale.stale = true;
        let d = arb.arbitrate(&stale);
        assert!(d.entered_safety());
        assert_eq!(d.transition.unwrap().reason, TransitionReason::Watchdog);

        // 过期期间的请求被拒绝
        let mut stale = input(4, Some(BehaviorMode::StandPrep));
        stale.stale = true;
        let d = arb.arbitrate(&stale);
        assert_eq!(d.mode, BehaviorMode::Safety);
        assert_eq!(d.refused.unwrap().reason, RefusalReason::CommandStale);

        // 恢复新鲜后没有请求：保持 Safety
        assert_eq!(arb.arbitrate(&input(5, None)).mode, BehaviorMode::Safety);
    }

    #[test]
    fn test_joints_uninitialized_refused() {
        let mut arb = started();
        let mut i = input(1, Some(BehaviorMode::StandPrep));
        i.joints_initialized = false;
        let d = arb.arbitrate(&i);
        assert_eq!(d.refused.unwrap().reason, RefusalReason::JointsUninitialized);
    }

    #[test]
    fn test_force_safety_and_history() {
        let mut arb = BehaviorArbiter::new(2);
        arb.arbitrate(&input(0, None));
        assert!(arb.force_safety(0, 0, TransitionReason::Reset).is_none());

        arb.arbitrate(&input(1, Some(BehaviorMode::StandPrep)));
        let t = arb.force_safety(2, 2_000, TransitionReason::NumericalFault).unwrap();
        assert_eq!(t.from, BehaviorMode::StandPrep);
        assert_eq!(t.reason, TransitionReason::NumericalFault);

        // 历史只保留最近 2 条
        let history: Vec<_> = arb.history().map(|t| t.to).collect();
        assert_eq!(history, vec![BehaviorMode::StandPrep, BehaviorMode::Safety]);
    }
}
