//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 热点参数限流
//!
//! 按调用参数的取值分别计数。每条 [`HotspotRule`] 编译成一个 [`HotspotChecker`]，
//! 内部用容量为 `max_tracked_values` 的 LRU 保存参数值到计数器的映射，
//! 超出容量时淘汰最久未访问的参数值（只丢失该值最近的统计）。
//!
//! 并发数规则在检查时直接占用参数值的并发名额，调用未通过时由调用方归还。

use crate::constants::DEFAULT_HOTSPOT_BUCKET_COUNT;
use crate::error::FlowGateError;
use crate::rules::{FlowGrade, HotspotRule, ParamValue};
use crate::sliding_window::{MetricEvent, SlidingWindow};
use ahash::AHashMap as HashMap;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// 单个参数值的计数器
#[derive(Debug)]
pub struct ParamCounter {
    window: SlidingWindow,
    concurrency: AtomicU64,
}

impl ParamCounter {
    fn new(duration_sec: u32) -> Result<Self, FlowGateError> {
        Ok(Self {
            window: SlidingWindow::new(duration_sec as u64 * 1_000, DEFAULT_HOTSPOT_BUCKET_COUNT)?,
            concurrency: AtomicU64::new(0),
        })
    }

    /// 统计窗口内的通过数
    pub fn pass_count(&self, now: u64) -> u64 {
        self.window.total(now, MetricEvent::Pass)
    }

    /// 当前并发数
    pub fn concurrency(&self) -> u64 {
        self.concurrency.load(Ordering::Acquire)
    }

    /// 在阈值内原子地增加并发数
    fn try_acquire(&self, count: u64, threshold: f64) -> Result<(), u64> {
        self.concurrency
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.saturating_add(count);
                (next as f64 <= threshold).then_some(next)
            })
            .map(|_| ())
    }

    /// 归还并发名额，最小为 0
    pub(crate) fn release(&self, count: u64) {
        let _ = self
            .concurrency
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
    }
}

/// 热点参数检查结果
#[derive(Debug)]
pub enum ParamDecision<'a> {
    /// 放行（包括没有对应参数的情况）
    Pass,
    /// 放行，并已占用该参数值的并发名额
    Acquired(Arc<ParamCounter>),
    /// 该参数值超过阈值
    Block(&'a ParamValue),
}

/// 热点参数规则检查器
pub struct HotspotChecker {
    rule: HotspotRule,
    exceptions: HashMap<ParamValue, f64>,
    tracker: Mutex<LruCache<ParamValue, Arc<ParamCounter>>>,
}

impl HotspotChecker {
    /// 编译热点参数规则
    ///
    /// # 示例
    /// ```rust
    /// use flowgate::hotspot::{HotspotChecker, ParamDecision};
    /// use flowgate::rules::{HotspotRule, ParamValue};
    ///
    /// let checker = HotspotChecker::new(HotspotRule::qps("query", 0, 1.0)).unwrap();
    /// let args = vec![ParamValue::from("A")];
    /// assert!(matches!(checker.try_acquire(0, 1, &args).unwrap(), ParamDecision::Pass));
    /// checker.on_pass(0, 1, &args).unwrap();
    /// assert!(matches!(checker.try_acquire(0, 1, &args).unwrap(), ParamDecision::Block(_)));
    /// ```
    pub fn new(rule: HotspotRule) -> Result<Self, FlowGateError> {
        rule.validate().map_err(FlowGateError::ConfigError)?;
        let capacity = NonZeroUsize::new(rule.max_tracked_values)
            .ok_or_else(|| FlowGateError::ConfigError("max_tracked_values 必须大于0".to_string()))?;

        let exceptions = rule
            .exceptions
            .iter()
            .map(|item| (item.value.clone(), item.threshold))
            .collect();

        Ok(Self {
            exceptions,
            tracker: Mutex::new(LruCache::new(capacity)),
            rule,
        })
    }

    pub fn rule(&self) -> &HotspotRule {
        &self.rule
    }

    /// 参数值对应的阈值（例外项优先）
    pub fn threshold_for(&self, value: &ParamValue) -> f64 {
        self.exceptions
            .get(value)
            .copied()
            .unwrap_or(self.rule.threshold)
    }

    /// 规则关注的参数值；参数为空或索引越界时返回 `None`
    pub fn param_value<'a>(&self, args: &'a [ParamValue]) -> Option<&'a ParamValue> {
        self.rule.resolve_index(args.len()).map(|index| &args[index])
    }

    /// 当前跟踪的参数值个数
    pub fn tracked_values(&self) -> usize {
        self.tracker.lock().len()
    }

    /// 获取参数值的计数器
    pub fn counter(&self, value: &ParamValue) -> Option<Arc<ParamCounter>> {
        self.tracker.lock().peek(value).cloned()
    }

    fn counter_or_insert(&self, value: &ParamValue) -> Result<Arc<ParamCounter>, FlowGateError> {
        let mut tracker = self.tracker.lock();
        if let Some(counter) = tracker.get(value) {
            return Ok(Arc::clone(counter));
        }
        let counter = Arc::new(ParamCounter::new(self.rule.duration_sec)?);
        tracker.put(value.clone(), Arc::clone(&counter));
        Ok(counter)
    }

    /// 检查本次调用
    ///
    /// 并发数规则通过时已经占用了参数值的并发名额，调用最终未通过时需要
    /// 对 [`ParamDecision::Acquired`] 中的计数器调用 `release`。
    pub fn try_acquire<'a>(
        &self,
        now: u64,
        count: u32,
        args: &'a [ParamValue],
    ) -> Result<ParamDecision<'a>, FlowGateError> {
        let Some(value) = self.param_value(args) else {
            return Ok(ParamDecision::Pass);
        };

        let threshold = self.threshold_for(value);
        let counter = self.counter_or_insert(value)?;
        let acquire = count as u64;

        let decision = match self.rule.grade {
            FlowGrade::Qps => {
                let current = counter.pass_count(now);
                trace!(
                    "热点参数检查: resource={}, value={}, current={}, threshold={}",
                    self.rule.resource,
                    value,
                    current,
                    threshold
                );
                if (current + acquire) as f64 > threshold {
                    ParamDecision::Block(value)
                } else {
                    ParamDecision::Pass
                }
            }
            FlowGrade::Concurrency => match counter.try_acquire(acquire, threshold) {
                Ok(()) => ParamDecision::Acquired(counter),
                Err(current) => {
                    trace!(
                        "热点参数并发数超过阈值: resource={}, value={}, current={}, threshold={}",
                        self.rule.resource,
                        value,
                        current,
                        threshold
                    );
                    ParamDecision::Block(value)
                }
            },
        };
        Ok(decision)
    }

    /// 记录通过
    pub fn on_pass(&self, now: u64, count: u32, args: &[ParamValue]) -> Result<(), FlowGateError> {
        if let Some(value) = self.param_value(args) {
            let counter = self.counter_or_insert(value)?;
            counter.window.record(now, MetricEvent::Pass, count as u64);
        }
        Ok(())
    }

    /// 记录退出，按传入的参数归还对应值的并发名额
    pub fn on_exit(&self, count: u32, args: &[ParamValue]) {
        if self.rule.grade != FlowGrade::Concurrency {
            return;
        }
        let Some(value) = self.param_value(args) else {
            return;
        };
        if let Some(counter) = self.counter(value) {
            counter.release(count as u64);
        }
    }
}

impl std::fmt::Debug for HotspotChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotspotChecker")
            .field("rule", &self.rule)
            .field("tracked_values", &self.tracked_values())
            .finish()
    }
}
