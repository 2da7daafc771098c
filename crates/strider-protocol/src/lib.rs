//! # Strider Protocol
//!
//! 关节控制核心的数据模型层（无锁、无线程、无 I/O）。
//!
//! - [`JointSet`]：关节名称到扁平索引的映射
//! - [`JointCommand`]：经过校验的内部指令表示
//! - [`CommandMessage`]：入站消息（整机 / 按名称稀疏）
//! - [`BehaviorMode`]：行为模式及其文本令牌

pub mod command;
pub mod joint;
pub mod message;
pub mod mode;

pub use command::{GainsUpdate, JointCommand, JointGains, JointSetpoint};
pub use joint::{JointId, JointSet};
pub use message::{CommandMessage, FullBodyCommand, JointArrays, NamedJointCommand, Validated};
pub use mode::BehaviorMode;

use thiserror::Error;

/// 协议层错误类型
///
/// 所有变体都对应"边界拒绝"：消息被丢弃，不产生任何状态变化。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// 关节集合为空
    #[error("Joint set is empty")]
    EmptyJointSet,

    /// 关节名称重复
    #[error("Duplicate joint name: {0}")]
    DuplicateJoint(String),

    /// 整机指令的关节数量与配置不符
    #[error("Invalid joint count: expected {expected}, got {actual}")]
    JointCountMismatch { expected: usize, actual: usize },

    /// 并行数组长度不一致
    #[error("Array length mismatch for '{field}': expected {expected}, got {actual}")]
    ArrayLengthMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// 非有限数值（NaN / Inf）
    #[error("Non-finite value in '{field}' at index {index}")]
    NonFiniteValue { field: &'static str, index: usize },

    /// 未识别的模式令牌
    #[error("Unknown mode token: {0:?}")]
    UnknownModeToken(String),
}
