//! 时钟抽象
//!
//! 控制核心只依赖单调微秒时间戳。真实运行时锚定在进程启动时刻，
//! 仿真与测试使用可手动推进的时钟，保证确定性。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// 单调时间锚点（首次访问时设置）
static APP_START: OnceLock<Instant> = OnceLock::new();

/// 自进程启动以来的单调微秒数
pub fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// 时钟源
pub trait Clock: Send + Sync {
    /// 当前时间（微秒）
    fn now_us(&self) -> u64;
}

/// 单调系统时钟
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now_us(&self) -> u64 {
        monotonic_micros()
    }
}

/// 手动时钟
///
/// 通常以 `Arc<ManualClock>` 在仿真线程和摄取线程之间共享。
#[derive(Debug, Default)]
pub struct ManualClock {
    now_us: AtomicU64,
}

impl ManualClock {
    pub fn new(start_us: u64) -> Self {
        Self {
            now_us: AtomicU64::new(start_us),
        }
    }

    pub fn set(&self, now_us: u64) {
        self.now_us.store(now_us, Ordering::Release);
    }

    /// 推进时间并返回新值
    pub fn advance(&self, delta_us: u64) -> u64 {
        self.now_us.fetch_add(delta_us, Ordering::AcqRel) + delta_us
    }
}

impl Clock for ManualClock {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Acquire)
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    fn now_us(&self) -> u64 {
        (**self).now_us()
    }
}

/// 一个 tick 的时间区间
///
/// `dt` 可能为零或负（时钟异常），由调用方决定如何处理。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TickTime {
    pub previous_us: u64,
    pub now_us: u64,
}

impl TickTime {
    pub fn new(previous_us: u64, now_us: u64) -> Self {
        Self {
            previous_us,
            now_us,
        }
    }

    /// 带符号的时间差（微秒）
    pub fn dt_us(&self) -> i64 {
        self.now_us as i64 - self.previous_us as i64
    }

    /// 时间差（秒）
    pub fn dt_secs(&self) -> f64 {
        self.dt_us() as f64 * 1e-6
    }

    /// 时间是否倒退或停滞
    pub fn is_anomalous(&self) -> bool {
        self.dt_us() <= 0
    }
}
