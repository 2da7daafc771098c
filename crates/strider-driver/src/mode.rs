//! 模式请求通道
//!
//! 模式通道与指令流分离：任意线程写入最近一次请求，tick 线程每个 tick 取走一次。
//! 多次写入之间只保留最后一个（与指令邮箱一致的"最后写入者胜出"语义）。

use std::sync::atomic::{AtomicU8, Ordering};
use strider_protocol::BehaviorMode;

/// 空槽标记
const NO_REQUEST: u8 = u8::MAX;

/// 待处理的模式请求（原子版本，用于线程间共享）
///
/// # 示例
///
/// ```rust
/// use strider_driver::mode::AtomicModeRequest;
/// use strider_protocol::BehaviorMode;
///
/// let request = AtomicModeRequest::new();
/// request.set(BehaviorMode::Stand);
/// request.set(BehaviorMode::Walk);
///
/// assert_eq!(request.take(), Some(BehaviorMode::Walk));
/// assert_eq!(request.take(), None);
/// ```
#[derive(Debug)]
pub struct AtomicModeRequest {
    inner: AtomicU8,
}

impl Default for AtomicModeRequest {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicModeRequest {
    /// 创建空的请求槽
    pub fn new() -> Self {
        Self {
            inner: AtomicU8::new(NO_REQUEST),
        }
    }

    /// 写入请求（覆盖未被取走的旧请求）
    pub fn set(&self, mode: BehaviorMode) {
        self.inner.store(mode.into(), Ordering::Release);
    }

    /// 取走请求并清空槽位
    pub fn take(&self) -> Option<BehaviorMode> {
        let raw = self.inner.swap(NO_REQUEST, Ordering::AcqRel);
        BehaviorMode::try_from(raw).ok()
    }

    /// 查看请求但不取走
    pub fn peek(&self) -> Option<BehaviorMode> {
        BehaviorMode::try_from(self.inner.load(Ordering::Acquire)).ok()
    }

    /// 清空
    pub fn clear(&self) {
        self.inner.store(NO_REQUEST, Ordering::Release);
    }
}
