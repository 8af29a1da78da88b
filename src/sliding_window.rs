//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 滑动窗口计数器
//!
//! 将时间划分为固定长度的桶（bucket），窗口由 `bucket_count` 个桶循环复用组成。
//! 每个桶同时记录多种指标事件（通过、拦截、成功、异常、响应时间、慢调用）。
//!
//! # 特性
//! - 桶计数使用 `AtomicU64`，并发写入同一个桶不会丢失更新
//! - 过期桶在访问时惰性重置，不需要后台清理线程
//! - 重置使用 `try_lock`，竞争失败的线程让出 CPU 后重试
//!
//! # 示例
//! ```rust
//! use flowgate::sliding_window::{MetricEvent, SlidingWindow};
//!
//! let window = SlidingWindow::new(1_000, 2).unwrap();
//! window.record(100, MetricEvent::Pass, 1);
//! window.record(600, MetricEvent::Pass, 2);
//! assert_eq!(window.sum(700, MetricEvent::Pass, 1_000), 3);
//! // 1.2 秒后第一个桶已经过期
//! assert_eq!(window.sum(1_200, MetricEvent::Pass, 1_000), 2);
//! ```

use crate::error::FlowGateError;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

/// 指标事件
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricEvent {
    /// 通过
    Pass = 0,
    /// 拦截
    Block = 1,
    /// 完成（exit）
    Success = 2,
    /// 业务异常
    Error = 3,
    /// 响应时间累计（毫秒）
    Rt = 4,
    /// 慢调用
    Slow = 5,
}

const EVENT_COUNT: usize = 6;

/// 未使用桶的起始时间标记
const EMPTY_BUCKET: u64 = u64::MAX;

struct Bucket {
    /// 桶起始时间（毫秒，对齐到桶长度）
    start: AtomicU64,
    counters: [AtomicU64; EVENT_COUNT],
}

impl Bucket {
    fn new() -> Self {
        Self {
            start: AtomicU64::new(EMPTY_BUCKET),
            counters: Default::default(),
        }
    }

    fn get(&self, event: MetricEvent) -> u64 {
        self.counters[event as usize].load(Ordering::Relaxed)
    }

    /// 清零计数并切换到新的起始时间
    fn reset(&self, start: u64) {
        for counter in &self.counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.start.store(start, Ordering::Release);
    }
}

/// 滑动窗口计数器
pub struct SlidingWindow {
    /// 窗口总长度（毫秒）
    window_length_ms: u64,
    /// 单个桶长度（毫秒）
    bucket_length_ms: u64,
    buckets: Box<[Bucket]>,
    /// 重置过期桶时持有
    reset_lock: Mutex<()>,
}

impl SlidingWindow {
    /// 创建新的滑动窗口
    ///
    /// # 参数
    /// - `window_length_ms`: 窗口总长度（毫秒）
    /// - `bucket_count`: 桶数量，窗口长度必须能被它整除
    ///
    /// # 返回
    /// - `Err(FlowGateError::ConfigError)`: 桶数量为 0、窗口长度为 0 或无法整除
    pub fn new(window_length_ms: u64, bucket_count: u32) -> Result<Self, FlowGateError> {
        if bucket_count == 0 {
            return Err(FlowGateError::ConfigError(
                "bucket_count 必须大于0".to_string(),
            ));
        }
        if window_length_ms == 0 {
            return Err(FlowGateError::ConfigError(
                "window_length_ms 必须大于0".to_string(),
            ));
        }
        if window_length_ms % bucket_count as u64 != 0 {
            return Err(FlowGateError::ConfigError(format!(
                "window_length_ms({}) 必须能被 bucket_count({}) 整除",
                window_length_ms, bucket_count
            )));
        }

        let buckets = (0..bucket_count)
            .map(|_| Bucket::new())
            .collect::<Vec<_>>()
            .into_boxed_slice();

        Ok(Self {
            window_length_ms,
            bucket_length_ms: window_length_ms / bucket_count as u64,
            buckets,
            reset_lock: Mutex::new(()),
        })
    }

    /// 窗口总长度（毫秒）
    pub fn window_length_ms(&self) -> u64 {
        self.window_length_ms
    }

    /// 桶数量
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, time_ms: u64) -> usize {
        ((time_ms / self.bucket_length_ms) % self.buckets.len() as u64) as usize
    }

    fn bucket_start(&self, time_ms: u64) -> u64 {
        time_ms - time_ms % self.bucket_length_ms
    }

    /// 获取 `now` 所在的桶，必要时重置过期桶
    fn current_bucket(&self, now: u64) -> &Bucket {
        let index = self.bucket_index(now);
        let start = self.bucket_start(now);
        let bucket = &self.buckets[index];

        loop {
            let old = bucket.start.load(Ordering::Acquire);
            if old == start {
                return bucket;
            }

            if old == EMPTY_BUCKET || start > old {
                if let Some(_guard) = self.reset_lock.try_lock() {
                    if bucket.start.load(Ordering::Acquire) != start {
                        bucket.reset(start);
                    }
                    return bucket;
                }
                std::thread::yield_now();
            } else {
                // 时钟回拨：计入较新的桶
                return bucket;
            }
        }
    }

    /// 记录事件
    pub fn record(&self, now: u64, event: MetricEvent, weight: u64) {
        self.current_bucket(now).counters[event as usize].fetch_add(weight, Ordering::Relaxed);
    }

    /// 统计最近 `interval_ms` 内的事件总数
    ///
    /// `interval_ms` 超过窗口长度时按窗口长度计算。
    pub fn sum(&self, now: u64, event: MetricEvent, interval_ms: u64) -> u64 {
        let interval = interval_ms.min(self.window_length_ms);
        self.buckets
            .iter()
            .filter(|bucket| {
                let start = bucket.start.load(Ordering::Acquire);
                start != EMPTY_BUCKET && start <= now && now - start < interval
            })
            .map(|bucket| bucket.get(event))
            .sum()
    }

    /// 统计整个窗口内的事件总数
    pub fn total(&self, now: u64, event: MetricEvent) -> u64 {
        self.sum(now, event, self.window_length_ms)
    }

    /// 获取 `time_ms` 所在桶的计数
    ///
    /// 该桶已过期或已被复用时返回 0。
    pub fn value_at(&self, now: u64, event: MetricEvent, time_ms: u64) -> u64 {
        if time_ms > now || now - time_ms >= self.window_length_ms {
            return 0;
        }
        let bucket = &self.buckets[self.bucket_index(time_ms)];
        if bucket.start.load(Ordering::Acquire) == self.bucket_start(time_ms) {
            bucket.get(event)
        } else {
            0
        }
    }

    /// 清空所有桶
    pub fn reset(&self) {
        let _guard = self.reset_lock.lock();
        for bucket in self.buckets.iter() {
            bucket.reset(EMPTY_BUCKET);
        }
    }
}

impl std::fmt::Debug for SlidingWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingWindow")
            .field("window_length_ms", &self.window_length_ms)
            .field("bucket_count", &self.buckets.len())
            .finish()
    }
}
