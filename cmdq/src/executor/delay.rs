//! 延迟计算
//! Delay arithmetic
//!
//! 定时器有上限；超过上限的延迟折算进 `ready_at`，每次提前出队时再重新计算剩余等待
//! Timers are bounded; a longer delay is folded into `ready_at` and the remaining wait is recomputed on every early dequeue

use chrono::Utc;
use std::time::Duration;

/// 当前时间（毫秒时间戳）
/// Current time in epoch milliseconds
pub fn now_millis() -> i64 {
  Utc::now().timestamp_millis()
}

/// 毫秒数转换为时间戳偏移，超出范围时饱和
/// Milliseconds as a timestamp offset, saturating when out of range
pub(crate) fn signed_millis(millis: u64) -> i64 {
  i64::try_from(millis).unwrap_or(i64::MAX)
}

/// 时长转换为毫秒，超出范围时饱和
/// Duration in milliseconds, saturating when out of range
pub(crate) fn duration_millis(duration: Duration) -> u64 {
  u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// 折算后的调度
/// Schedule after folding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fold {
  /// 实际定时器时长
  /// Timer actually armed
  pub timer: u64,
  /// 需要写回的 ready_at
  /// ready_at to write back, if it moved
  pub ready_at: Option<i64>,
}

/// 将延迟限制在定时器上限内
/// Bound a delay to the timer maximum
///
/// 超出时移动 `ready_at`，使 `ready_at + record_delay` 等于原定到期时刻
/// When it exceeds the maximum, `ready_at` moves so that `ready_at + record_delay` is the intended due instant
pub fn fold_delay(delay: u64, record_delay: u64, max: u64, now: i64) -> Fold {
  if delay <= max {
    return Fold {
      timer: delay,
      ready_at: None,
    };
  }
  let due = now.saturating_add(signed_millis(delay));
  Fold {
    timer: max,
    ready_at: Some(due.saturating_sub(signed_millis(record_delay))),
  }
}

/// 距离最早执行时刻的剩余等待；已到期返回 None
/// Remaining wait until the earliest dispatch instant, None once due
pub fn remaining(ready_at: Option<i64>, delay: u64, now: i64) -> Option<u64> {
  let due = ready_at?.saturating_add(signed_millis(delay));
  (now < due).then(|| due.abs_diff(now))
}
