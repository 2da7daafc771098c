//! 单槽指令邮箱
//!
//! 摄取线程 `publish()`，tick 线程 `take_latest()`。槽位只保存最新的一条指令，
//! 序号不大于当前指令的到达会被静默丢弃（只记录在本地指标中）。
//!
//! 临界区只做指针交换：指令在加锁前包装成 `Arc`，被替换的旧指令与指标都在解锁后处理。

use crate::error::DriverError;
use crate::metrics::ControlMetrics;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use strider_protocol::JointCommand;
use tracing::{debug, error, info, trace, warn};

/// 覆盖率检查的采样间隔（每接受 N 条指令检查一次）
const OVERWRITE_SAMPLE_INTERVAL: u64 = 1000;

#[derive(Debug)]
struct Stamped {
    command: Arc<JointCommand>,
    arrival_us: u64,
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<Stamped>,
    /// 当前指令是否已被 tick 线程取走过
    taken: bool,
}

/// `publish()` 的结果（仅供本地指标与测试使用，不回传给发送方）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// 已存入槽位
    Accepted {
        /// 被替换的旧指令是否从未被取走
        overwrote_untaken: bool,
    },
    /// 序号不递增，已丢弃
    Dropped { current_sequence: u64 },
}

impl PublishOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, PublishOutcome::Accepted { .. })
    }
}

/// `take_latest()` 读到的内容
#[derive(Debug, Clone)]
pub struct MailboxRead {
    pub command: Arc<JointCommand>,
    /// 指令进入邮箱的时间（微秒）
    pub arrival_us: u64,
    /// 是否为该指令的首次交付
    pub fresh: bool,
}

/// 单槽邮箱
#[derive(Debug)]
pub struct CommandMailbox {
    slot: Mutex<Slot>,
    metrics: Arc<ControlMetrics>,
}

impl CommandMailbox {
    pub fn new(metrics: Arc<ControlMetrics>) -> Self {
        Self {
            slot: Mutex::new(Slot::default()),
            metrics,
        }
    }

    /// 发布指令
    ///
    /// 仅当 `command.sequence() > 当前序号` 时存入（空槽总是接受）。
    ///
    /// # 错误
    ///
    /// 锁被毒化时返回 `DriverError::PoisonedLock`。
    pub fn publish(
        &self,
        command: JointCommand,
        arrival_us: u64,
    ) -> Result<PublishOutcome, DriverError> {
        let sequence = command.sequence();
        let command = Arc::new(command);

        let (outcome, replaced) = match self.slot.lock() {
            Ok(mut slot) => {
                let current_sequence = slot.current.as_ref().map(|s| s.command.sequence());
                match current_sequence {
                    Some(current) if sequence <= current => (
                        PublishOutcome::Dropped {
                            current_sequence: current,
                        },
                        None,
                    ),
                    _ => {
                        let overwrote_untaken = slot.current.is_some() && !slot.taken;
                        let replaced = slot.current.replace(Stamped {
                            command,
                            arrival_us,
                        });
                        slot.taken = false;
                        (PublishOutcome::Accepted { overwrote_untaken }, replaced)
                    },
                }
            },
            Err(_) => {
                error!("Command mailbox lock poisoned, tick thread may have panicked");
                return Err(DriverError::PoisonedLock);
            },
        };

        // 被替换的指令可能是最后一个引用，在锁外释放
        drop(replaced);

        // 指标在锁外更新
        match outcome {
            PublishOutcome::Accepted { overwrote_untaken } => {
                let total = ControlMetrics::incr(&self.metrics.commands_accepted);
                if overwrote_untaken {
                    ControlMetrics::incr(&self.metrics.commands_overwritten);
                }
                trace!(sequence, arrival_us, overwrote_untaken, "command accepted");

                if total.is_multiple_of(OVERWRITE_SAMPLE_INTERVAL) {
                    let overwrites = self.metrics.commands_overwritten.load(Ordering::Relaxed);
                    let rate = (overwrites as f64 / total as f64) * 100.0;
                    if rate > 50.0 {
                        warn!(
                            "High command overwrite rate detected: {:.1}% ({} overwrites / {} accepted). \
                             Commands are arriving faster than the control loop consumes them.",
                            rate, overwrites, total
                        );
                    } else if rate > 30.0 {
                        info!(
                            "Moderate command overwrite rate: {:.1}% ({} overwrites / {} accepted).",
                            rate, overwrites, total
                        );
                    }
                }
            },
            PublishOutcome::Dropped { current_sequence } => {
                ControlMetrics::incr(&self.metrics.commands_dropped_out_of_order);
                debug!(
                    sequence,
                    current_sequence, "Dropping out-of-order command"
                );
            },
        }

        Ok(outcome)
    }

    /// 读取最新指令（保持最后值）
    ///
    /// 没有新的发布时重复返回同一条指令，`fresh` 仅在首次交付时为 `true`。
    pub fn take_latest(&self) -> Result<Option<MailboxRead>, DriverError> {
        let mut slot = self.slot.lock().map_err(|_| {
            error!("Command mailbox lock poisoned, ingestion thread may have panicked");
            DriverError::PoisonedLock
        })?;

        let read = match slot.current.as_ref() {
            Some(current) => MailboxRead {
                command: Arc::clone(&current.command),
                arrival_us: current.arrival_us,
                fresh: !slot.taken,
            },
            None => return Ok(None),
        };
        slot.taken = true;
        Ok(Some(read))
    }

    /// 当前指令的序号（不改变交付状态）
    pub fn current_sequence(&self) -> Result<Option<u64>, DriverError> {
        let slot = self.slot.lock().map_err(|_| DriverError::PoisonedLock)?;
        Ok(slot.current.as_ref().map(|s| s.command.sequence()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox() -> CommandMailbox {
        CommandMailbox::new(Arc::new(ControlMetrics::new()))
    }

    #[test]
    fn test_empty_mailbox() {
        let mb = mailbox();
        assert!(mb.take_latest().unwrap().is_none());
        assert_eq!(mb.current_sequence().unwrap(), None);
    }

    #[test]
    fn test_hold_last_value() {
        let mb = mailbox();
        mb.publish(JointCommand::new(1, 100), 150).unwrap();

        let first = mb.take_latest().unwrap().unwrap();
        assert!(first.fresh);
        assert_eq!(first.arrival_us, 150);

        for _ in 0..3 {
            let again = mb.take_latest().unwrap().unwrap();
            assert!(!again.fresh);
            assert_eq!(*again.command, *first.command);
            assert!(Arc::ptr_eq(&again.command, &first.command));
        }
    }

    #[test]
    fn test_monotonic_ordering() {
        let mb = mailbox();
        let outcomes: Vec<_> = [5u64, 3, 7, 6]
            .into_iter()
            .map(|seq| mb.publish(JointCommand::new(seq, 0), 0).unwrap())
            .collect();

        assert!(outcomes[0].is_accepted());
        assert_eq!(outcomes[1], PublishOutcome::Dropped { current_sequence: 5 });
        assert!(outcomes[2].is_accepted());
        assert_eq!(outcomes[3], PublishOutcome::Dropped { current_sequence: 7 });

        let read = mb.take_latest().unwrap().unwrap();
        assert_eq!(read.command.sequence(), 7);
        assert_eq!(mb.metrics.snapshot().commands_dropped_out_of_order, 2);
    }

    #[test]
    fn test_replaced_command_released() {
        let mb = mailbox();
        mb.publish(JointCommand::new(1, 0), 0).unwrap();
        let first = mb.take_latest().unwrap().unwrap();
        assert_eq!(Arc::strong_count(&first.command), 2);

        mb.publish(JointCommand::new(2, 0), 0).unwrap();
        // 槽位不再持有旧指令
        assert_eq!(Arc::strong_count(&first.command), 1);

        // 被丢弃的到达不影响槽位中的指令
        mb.publish(JointCommand::new(2, 5), 5).unwrap();
        let second = mb.take_latest().unwrap().unwrap();
        assert_eq!(second.command.timestamp_us(), 0);
        assert_eq!(Arc::strong_count(&second.command), 2);
    }

    #[test]
    fn test_duplicate_sequence_dropped() {
        let mb = mailbox();
        mb.publish(JointCommand::new(4, 0), 0).unwrap();
        let outcome = mb.publish(JointCommand::new(4, 99), 10).unwrap();
        assert!(!outcome.is_accepted());
        assert_eq!(mb.take_latest().unwrap().unwrap().command.timestamp_us(), 0);
    }

    #[test]
    fn test_overwrite_before_take_counted() {
        let mb = mailbox();
        assert_eq!(
            mb.publish(JointCommand::new(1, 0), 0).unwrap(),
            PublishOutcome::Accepted {
                overwrote_untaken: false
            }
        );
        assert_eq!(
            mb.publish(JointCommand::new(2, 0), 0).unwrap(),
            PublishOutcome::Accepted {
                overwrote_untaken: true
            }
        );
        mb.take_latest().unwrap();
        assert_eq!(
            mb.publish(JointCommand::new(3, 0), 0).unwrap(),
            PublishOutcome::Accepted {
                overwrote_untaken: false
            }
        );
        let snapshot = mb.metrics.snapshot();
        assert_eq!(snapshot.commands_accepted, 3);
        assert_eq!(snapshot.commands_overwritten, 1);
    }

    #[test]
    fn test_new_publish_is_fresh_again() {
        let mb = mailbox();
        mb.publish(JointCommand::new(1, 0), 0).unwrap();
        assert!(mb.take_latest().unwrap().unwrap().fresh);
        mb.publish(JointCommand::new(2, 0), 5).unwrap();
        let read = mb.take_latest().unwrap().unwrap();
        assert!(read.fresh);
        assert_eq!(read.command.sequence(), 2);
    }
}
