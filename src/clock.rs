//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 时钟模块
//!
//! 统计窗口和熔断器只依赖单调毫秒时间。默认使用 [`SystemClock`]，
//! 测试或需要自行驱动时间的场景可以使用 [`ManualClock`]。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 单调时钟
pub trait Clock: Send + Sync {
    /// 当前时间（毫秒，单调递增）
    fn now_ms(&self) -> u64;

    /// 阻塞当前线程指定时长（排队等待时使用）
    fn sleep(&self, duration: Duration);
}

/// 基于 `Instant` 的系统时钟
///
/// 时间从时钟创建时刻开始计算。
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// 手动推进的时钟
///
/// `sleep` 不会阻塞，而是直接把时间向前推进。
///
/// # 示例
/// ```rust
/// use flowgate::clock::{Clock, ManualClock};
/// use std::time::Duration;
///
/// let clock = ManualClock::new(1_000);
/// clock.advance(Duration::from_millis(500));
/// assert_eq!(clock.now_ms(), 1_500);
/// ```
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> Self {
        Self {
            now: AtomicU64::new(start_ms),
        }
    }

    /// 推进时间
    pub fn advance(&self, duration: Duration) {
        self.now
            .fetch_add(duration.as_millis() as u64, Ordering::SeqCst);
    }

    /// 设置为指定时间
    pub fn set(&self, now_ms: u64) {
        self.now.store(now_ms, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }

    fn sleep(&self, duration: Duration) {
        self.advance(duration);
    }
}
