//! 指令看门狗
//!
//! 每个 tick 根据时钟差判断指令流是否过期：
//! `now − 最近一次到达时间 > 阈值` 即过期。还没有收到任何指令时，
//! 以第一个 tick 的时间为起点计时。
//!
//! 看门狗只报告状态，恢复新鲜不会自动离开 Safety。

use tracing::{info, warn};

/// 单次检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchdogStatus {
    pub stale: bool,
    /// 本次检查刚从新鲜变为过期
    pub tripped: bool,
    /// 距最近一次到达（或起点）的时间
    pub elapsed_us: u64,
}

/// 指令看门狗（tick 线程独占）
#[derive(Debug, Clone)]
pub struct CommandWatchdog {
    threshold_us: u64,
    last_arrival_us: Option<u64>,
    started_us: Option<u64>,
    stale: bool,
}

impl CommandWatchdog {
    pub fn new(threshold_us: u64) -> Self {
        Self {
            threshold_us,
            last_arrival_us: None,
            started_us: None,
            stale: false,
        }
    }

    pub fn threshold_us(&self) -> u64 {
        self.threshold_us
    }

    /// 记录一次新指令到达
    pub fn feed(&mut self, arrival_us: u64) {
        self.last_arrival_us = Some(match self.last_arrival_us {
            Some(prev) => prev.max(arrival_us),
            None => arrival_us,
        });
    }

    /// 检查是否过期
    pub fn check(&mut self, now_us: u64) -> WatchdogStatus {
        let reference = match self.last_arrival_us {
            Some(t) => t,
            None => *self.started_us.get_or_insert(now_us),
        };
        let elapsed_us = now_us.saturating_sub(reference);
        let stale = elapsed_us > self.threshold_us;

        let tripped = stale && !self.stale;
        if tripped {
            warn!(
                elapsed_ms = elapsed_us / 1_000,
                threshold_ms = self.threshold_us / 1_000,
                "Command watchdog tripped"
            );
        } else if !stale && self.stale {
            info!("Command stream fresh again");
        }
        self.stale = stale;

        WatchdogStatus {
            stale,
            tripped,
            elapsed_us,
        }
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn last_arrival_us(&self) -> Option<u64> {
        self.last_arrival_us
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_without_any_command() {
        let mut wd = CommandWatchdog::new(200_000);
        assert!(!wd.check(1_000).stale);
        assert!(!wd.check(201_000).stale);
        let status = wd.check(201_001);
        assert!(status.stale);
        assert!(status.tripped);
    }

    #[test]
    fn test_trip_and_recover() {
        let mut wd = CommandWatchdog::new(200_000);
        wd.feed(0);
        assert!(!wd.check(199_000).stale);

        let status = wd.check(250_000);
        assert!(status.stale && status.tripped);
        assert_eq!(status.elapsed_us, 250_000);

        // 持续过期只触发一次
        let status = wd.check(260_000);
        assert!(status.stale && !status.tripped);

        wd.feed(255_000);
        assert!(!wd.check(260_000).stale);
        assert!(!wd.is_stale());
    }

    #[test]
    fn test_feed_never_moves_backwards() {
        let mut wd = CommandWatchdog::new(10);
        wd.feed(100);
        wd.feed(50);
        assert_eq!(wd.last_arrival_us(), Some(100));
    }
}
