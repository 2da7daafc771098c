//! 驱动层错误类型定义

use crate::config::ConfigError;
use strider_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
///
/// 控制过程中的故障（看门狗、数值异常等）不是错误，
/// 它们以 [`Fault`](crate::telemetry::Fault) 的形式出现在遥测中。
#[derive(Error, Debug)]
pub enum DriverError {
    /// 入站消息格式错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 配置错误
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// 锁被毒化（线程 panic）
    #[error("Poisoned lock (thread panic)")]
    PoisonedLock,

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
