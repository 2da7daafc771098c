//! 行为模式定义
//!
//! 正向链：`None → Safety → StandPrep → Stand → Walk`。
//! 任何模式都可以直接进入 `Safety`；`None` 只能从 `Safety` 进入。

use crate::ProtocolError;
use num_enum::{IntoPrimitive, TryFromPrimitive};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 行为模式
///
/// 数值编码用于 `AtomicU8` 跨线程传递模式请求。
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    IntoPrimitive,
    TryFromPrimitive,
    Serialize,
    Deserialize,
)]
#[repr(u8)]
#[serde(rename_all = "kebab-case")]
pub enum BehaviorMode {
    /// 直通模式：PID 直接跟踪外部指令
    #[default]
    None = 0,
    /// 安全保持
    Safety = 1,
    /// 站立准备
    StandPrep = 2,
    /// 站立
    Stand = 3,
    /// 行走
    Walk = 4,
}

impl BehaviorMode {
    /// 全部模式（按数值顺序）
    pub const ALL: [BehaviorMode; 5] = [
        BehaviorMode::None,
        BehaviorMode::Safety,
        BehaviorMode::StandPrep,
        BehaviorMode::Stand,
        BehaviorMode::Walk,
    ];

    /// 模式通道上使用的文本令牌
    pub fn token(self) -> &'static str {
        match self {
            BehaviorMode::None => "none",
            BehaviorMode::Safety => "safety",
            BehaviorMode::StandPrep => "stand-prep",
            BehaviorMode::Stand => "stand",
            BehaviorMode::Walk => "walk",
        }
    }

    /// 正向链中的下一个模式
    ///
    /// `Walk` 没有后继。`None` 的后继是 `Safety`。
    pub fn next(self) -> Option<BehaviorMode> {
        match self {
            BehaviorMode::None => Some(BehaviorMode::Safety),
            BehaviorMode::Safety => Some(BehaviorMode::StandPrep),
            BehaviorMode::StandPrep => Some(BehaviorMode::Stand),
            BehaviorMode::Stand => Some(BehaviorMode::Walk),
            BehaviorMode::Walk => None,
        }
    }

    /// 正向链中的位置（`None` = 0）
    pub fn rank(self) -> u8 {
        self.into()
    }
}

impl fmt::Display for BehaviorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for BehaviorMode {
    type Err = ProtocolError;

    /// 解析模式令牌（忽略首尾空白，区分大小写）
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "none" => Ok(BehaviorMode::None),
            "safety" => Ok(BehaviorMode::Safety),
            "stand-prep" => Ok(BehaviorMode::StandPrep),
            "stand" => Ok(BehaviorMode::Stand),
            "walk" => Ok(BehaviorMode::Walk),
            other => Err(ProtocolError::UnknownModeToken(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_roundtrip() {
        for mode in BehaviorMode::ALL {
            assert_eq!(mode.token().parse::<BehaviorMode>(), Ok(mode));
            assert_eq!(mode.to_string(), mode.token());
        }
    }

    #[test]
    fn test_unknown_token() {
        assert_eq!(
            "run".parse::<BehaviorMode>(),
            Err(ProtocolError::UnknownModeToken("run".to_string()))
        );
        // 大小写敏感
        assert!("Walk".parse::<BehaviorMode>().is_err());
    }

    #[test]
    fn test_u8_encoding() {
        assert_eq!(u8::from(BehaviorMode::Walk), 4);
        assert_eq!(BehaviorMode::try_from(2u8).ok(), Some(BehaviorMode::StandPrep));
        assert!(BehaviorMode::try_from(7u8).is_err());
    }

    #[test]
    fn test_forward_chain() {
        assert_eq!(BehaviorMode::None.next(), Some(BehaviorMode::Safety));
        assert_eq!(BehaviorMode::Stand.next(), Some(BehaviorMode::Walk));
        assert_eq!(BehaviorMode::Walk.next(), None);
        assert!(BehaviorMode::Walk.rank() > BehaviorMode::Safety.rank());
    }

    #[test]
    fn test_serde_kebab_case() {
        let json = serde_json::to_string(&BehaviorMode::StandPrep).unwrap();
        assert_eq!(json, "\"stand-prep\"");
        let mode: BehaviorMode = serde_json::from_str("\"walk\"").unwrap();
        assert_eq!(mode, BehaviorMode::Walk);
    }
}
