//! 指令年龄统计
//!
//! 每个 tick 记录一次"当前指令的年龄"（now − 指令时间戳，单位秒）。
//! 样本保存在固定容量的环形缓冲区中（最旧的被淘汰），
//! 均值与方差使用 Welford 算法在整个样本流上增量累计，只有 `reset()` 会清零。

use serde::Serialize;
use std::collections::VecDeque;
use tracing::warn;

/// 单个年龄样本
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AgeSample {
    /// 延迟（秒）
    pub latency: f64,
    pub tick: u64,
}

/// 年龄统计快照
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct AgeSnapshot {
    pub mean: f64,
    /// 总体方差（M2 / n）
    pub variance: f64,
    /// 样本方差（M2 / (n − 1)），n < 2 时为 0
    pub sample_variance: f64,
    pub sample_count: u64,
    /// 最近一个样本的延迟
    pub latest: Option<f64>,
    /// 被截断为 0 的负延迟样本数
    pub clamped_count: u64,
    /// 最近一个样本是否被截断
    pub last_clamped: bool,
}

/// 指令年龄跟踪器
#[derive(Debug, Clone)]
pub struct AgeTracker {
    ring: VecDeque<AgeSample>,
    capacity: usize,
    count: u64,
    mean: f64,
    m2: f64,
    clamped_count: u64,
    last_clamped: bool,
}

impl AgeTracker {
    /// 创建跟踪器
    ///
    /// 容量为 0 时按 1 处理。
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            ring: VecDeque::with_capacity(capacity),
            capacity,
            count: 0,
            mean: 0.0,
            m2: 0.0,
            clamped_count: 0,
            last_clamped: false,
        }
    }

    /// 记录一个样本
    ///
    /// 负延迟被截断为 0 并标记；返回该样本是否被截断。
    /// 非有限值被忽略。
    pub fn record(&mut self, latency: f64, tick: u64) -> bool {
        if !latency.is_finite() {
            warn!(latency, tick, "Ignoring non-finite command latency");
            return false;
        }

        let clamped = latency < 0.0;
        let x = if clamped { 0.0 } else { latency };
        self.last_clamped = clamped;
        if clamped {
            self.clamped_count += 1;
        }

        if self.ring.len() == self.capacity {
            self.ring.pop_front();
        }
        self.ring.push_back(AgeSample { latency: x, tick });

        // Welford
        self.count += 1;
        let delta = x - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (x - self.mean);

        clamped
    }

    /// O(1) 快照
    pub fn snapshot(&self) -> AgeSnapshot {
        let n = self.count;
        AgeSnapshot {
            mean: self.mean,
            variance: if n > 0 { self.m2 / n as f64 } else { 0.0 },
            sample_variance: if n > 1 {
                self.m2 / (n - 1) as f64
            } else {
                0.0
            },
            sample_count: n,
            latest: self.ring.back().map(|s| s.latency),
            clamped_count: self.clamped_count,
            last_clamped: self.last_clamped,
        }
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.count = 0;
        self.mean = 0.0;
        self.m2 = 0.0;
        self.clamped_count = 0;
        self.last_clamped = false;
    }

    /// 环形缓冲区中的样本（旧 → 新）
    pub fn samples(&self) -> impl Iterator<Item = &AgeSample> {
        self.ring.iter()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 环形缓冲区当前长度
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_three_samples() {
        let mut tracker = AgeTracker::new(1000);
        for (i, x) in [10.0, 20.0, 30.0].into_iter().enumerate() {
            tracker.record(x, i as u64);
        }
        let s = tracker.snapshot();
        assert_eq!(s.sample_count, 3);
        assert!((s.mean - 20.0).abs() < 1e-9);
        assert!((s.variance - 200.0 / 3.0).abs() < 1e-9);
        assert!((s.sample_variance - 100.0).abs() < 1e-9);
        assert_eq!(s.latest, Some(30.0));
    }

    #[test]
    fn test_incremental_fourth_sample() {
        let mut tracker = AgeTracker::new(1000);
        for x in [10.0, 20.0, 30.0] {
            tracker.record(x, 0);
        }
        tracker.record(40.0, 3);
        let s = tracker.snapshot();
        assert!((s.mean - 25.0).abs() < 1e-9);
        assert!((s.variance - 125.0).abs() < 1e-9);
    }

    #[test]
    fn test_ring_eviction_keeps_cumulative_stats() {
        let mut tracker = AgeTracker::new(2);
        for (i, x) in [1.0, 2.0, 3.0].into_iter().enumerate() {
            tracker.record(x, i as u64);
        }
        assert_eq!(tracker.len(), 2);
        let kept: Vec<_> = tracker.samples().map(|s| s.latency).collect();
        assert_eq!(kept, vec![2.0, 3.0]);
        // 统计覆盖全部样本，而不只是窗口
        let s = tracker.snapshot();
        assert_eq!(s.sample_count, 3);
        assert!((s.mean - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_latency_clamped() {
        let mut tracker = AgeTracker::new(10);
        assert!(tracker.record(-0.5, 0));
        let s = tracker.snapshot();
        assert_eq!(s.latest, Some(0.0));
        assert!(s.last_clamped);
        assert_eq!(s.clamped_count, 1);

        assert!(!tracker.record(0.25, 1));
        assert!(!tracker.snapshot().last_clamped);
        assert_eq!(tracker.snapshot().clamped_count, 1);
    }

    #[test]
    fn test_empty_and_reset() {
        let mut tracker = AgeTracker::new(0);
        assert_eq!(tracker.capacity(), 1);
        assert_eq!(tracker.snapshot(), AgeSnapshot::default());

        tracker.record(1.0, 0);
        tracker.record(f64::NAN, 1);
        assert_eq!(tracker.snapshot().sample_count, 1);

        tracker.reset();
        assert!(tracker.is_empty());
        assert_eq!(tracker.snapshot(), AgeSnapshot::default());
    }
}
