//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 熔断器实现
//!
//! 每条熔断规则对应一个 [`CircuitBreaker`]，使用独立的统计窗口。
//!
//! # 特性
//!
//! - **三状态**: Closed（关闭）、Open（打开）、HalfOpen（半开）
//! - **四种策略**: 异常比例、异常数、慢调用比例、平均响应时间
//! - **单次探测**: 熔断时长结束后只放行一个探测请求；探测请求在一个熔断时长内没有结果时
//!   视为丢失，重新放行一个探测请求
//! - **退避**: 探测失败后可按翻倍策略延长熔断时长
//! - **状态监听**: 每次状态变更都会通知 [`StateChangeListener`]

use crate::constants::SLOW_REQUEST_RATIO_MAX;
use crate::error::{CircuitState, FlowGateError};
use crate::rules::{BackoffPolicy, DegradeRule, DegradeStrategy};
use crate::sliding_window::{MetricEvent, SlidingWindow};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tracing::{info, trace, warn};

/// 熔断器状态变更监听器
///
/// 回调在熔断器内部锁释放之后执行，可以在回调中读取熔断器状态。
pub trait StateChangeListener: Send + Sync {
    /// 切换到关闭状态
    fn on_transform_to_closed(&self, _prev: CircuitState, _rule: &DegradeRule) {}

    /// 切换到打开状态
    ///
    /// `snapshot` 为触发熔断时的指标值（比例、异常数或平均响应时间），
    /// 由探测失败触发时为 `None`。
    fn on_transform_to_open(&self, _prev: CircuitState, _rule: &DegradeRule, _snapshot: Option<f64>) {}

    /// 切换到半开状态
    fn on_transform_to_half_open(&self, _prev: CircuitState, _rule: &DegradeRule) {}
}

/// 监听器集合，由引擎和它创建的所有熔断器共享
#[derive(Clone, Default)]
pub(crate) struct ListenerSet(Arc<RwLock<Vec<Arc<dyn StateChangeListener>>>>);

impl ListenerSet {
    pub fn add(&self, listener: Arc<dyn StateChangeListener>) {
        self.0.write().push(listener);
    }

    fn notify(&self, transition: &Transition, rule: &DegradeRule) {
        let listeners = self.0.read().clone();
        for listener in listeners {
            match transition.to {
                CircuitState::Closed => listener.on_transform_to_closed(transition.from, rule),
                CircuitState::Open => {
                    listener.on_transform_to_open(transition.from, rule, transition.snapshot)
                }
                CircuitState::HalfOpen => {
                    listener.on_transform_to_half_open(transition.from, rule)
                }
            }
        }
    }
}

struct Transition {
    from: CircuitState,
    to: CircuitState,
    snapshot: Option<f64>,
}

/// 熔断器准入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerDecision {
    /// 关闭状态，正常放行
    Pass,
    /// 本次调用成为半开状态下唯一的探测请求
    Probe,
    /// 拦截，携带拦截时的状态
    Block(CircuitState),
}

struct BreakerInner {
    state: CircuitState,
    /// 允许下一次探测的时间（毫秒）
    next_retry_at: u64,
    /// 当前熔断时长（毫秒），翻倍退避时会增长
    current_timeout_ms: u64,
    /// 当前探测请求的放行时间（毫秒）
    probe_started_at: u64,
}

/// 熔断器
pub struct CircuitBreaker {
    rule: DegradeRule,
    /// 统计窗口（单桶，长度为 `stat_interval_ms`）
    stat: SlidingWindow,
    inner: Mutex<BreakerInner>,
    listeners: ListenerSet,
}

impl CircuitBreaker {
    /// 创建新的熔断器
    ///
    /// # 参数
    /// - `rule`: 熔断规则
    ///
    /// # 示例
    /// ```rust
    /// use flowgate::circuit_breaker::{BreakerDecision, CircuitBreaker};
    /// use flowgate::rules::DegradeRule;
    ///
    /// let breaker = CircuitBreaker::new(DegradeRule::error_count("db", 2)).unwrap();
    /// assert_eq!(breaker.try_pass(0), BreakerDecision::Pass);
    /// ```
    pub fn new(rule: DegradeRule) -> Result<Self, FlowGateError> {
        Self::with_listeners(rule, ListenerSet::default())
    }

    pub(crate) fn with_listeners(
        rule: DegradeRule,
        listeners: ListenerSet,
    ) -> Result<Self, FlowGateError> {
        rule.validate().map_err(FlowGateError::ConfigError)?;
        let stat = SlidingWindow::new(rule.stat_interval_ms, 1)?;

        info!(
            "创建熔断器: resource={}, strategy={:?}, threshold={}, retry_timeout_ms={}",
            rule.resource, rule.strategy, rule.threshold, rule.retry_timeout_ms
        );

        Ok(Self {
            inner: Mutex::new(BreakerInner {
                state: CircuitState::Closed,
                next_retry_at: 0,
                current_timeout_ms: rule.retry_timeout_ms,
                probe_started_at: 0,
            }),
            stat,
            rule,
            listeners,
        })
    }

    /// 熔断规则
    pub fn rule(&self) -> &DegradeRule {
        &self.rule
    }

    /// 获取当前状态
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    /// 当前熔断时长（毫秒）
    pub fn current_timeout_ms(&self) -> u64 {
        self.inner.lock().current_timeout_ms
    }

    /// 准入检查
    ///
    /// 打开状态且熔断时长已过时，本次调用把熔断器切换到半开状态并成为探测请求；
    /// 半开状态下其他调用一律拦截。探测请求放行后超过当前熔断时长仍未退出
    /// （token 被丢弃）时，本次调用接替成为新的探测请求。
    pub fn try_pass(&self, now: u64) -> BreakerDecision {
        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => return BreakerDecision::Pass,
                CircuitState::HalfOpen => {
                    let deadline = inner.probe_started_at.saturating_add(inner.current_timeout_ms);
                    if now < deadline {
                        return BreakerDecision::Block(CircuitState::HalfOpen);
                    }
                    inner.probe_started_at = now;
                    warn!(
                        "熔断器探测请求超时未退出，重新放行探测请求: resource={}",
                        self.rule.resource
                    );
                    return BreakerDecision::Probe;
                }
                CircuitState::Open if now < inner.next_retry_at => {
                    return BreakerDecision::Block(CircuitState::Open)
                }
                CircuitState::Open => {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_started_at = now;
                    Transition {
                        from: CircuitState::Open,
                        to: CircuitState::HalfOpen,
                        snapshot: None,
                    }
                }
            }
        };

        info!(
            "熔断器状态变更: resource={}, {:?} -> HalfOpen",
            self.rule.resource, transition.from
        );
        self.listeners.notify(&transition, &self.rule);
        BreakerDecision::Probe
    }

    /// 探测请求被后续规则拦截
    ///
    /// 回到打开状态并重新开始计时，熔断时长不增长。
    pub fn on_probe_blocked(&self, now: u64) {
        let transition = {
            let mut inner = self.inner.lock();
            if inner.state != CircuitState::HalfOpen {
                return;
            }
            inner.state = CircuitState::Open;
            inner.next_retry_at = now.saturating_add(inner.current_timeout_ms);
            Transition {
                from: CircuitState::HalfOpen,
                to: CircuitState::Open,
                snapshot: None,
            }
        };

        warn!(
            "熔断器探测请求被拦截，恢复打开状态: resource={}",
            self.rule.resource
        );
        self.listeners.notify(&transition, &self.rule);
    }

    /// 调用完成
    ///
    /// # 参数
    /// - `now`: 完成时间
    /// - `rt_ms`: 响应时间
    /// - `error`: 调用是否出错
    /// - `is_probe`: 该调用是否为本熔断器的探测请求
    pub fn on_complete(&self, now: u64, rt_ms: u64, error: bool, is_probe: bool) {
        let slow = self.is_rt_strategy() && rt_ms > self.rule.max_allowed_rt_ms;

        self.stat.record(now, MetricEvent::Success, 1);
        self.stat.record(now, MetricEvent::Rt, rt_ms);
        if error {
            self.stat.record(now, MetricEvent::Error, 1);
        }
        if rt_ms > self.rule.max_allowed_rt_ms {
            self.stat.record(now, MetricEvent::Slow, 1);
        }

        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::HalfOpen if is_probe => {
                    if error || slow {
                        if let BackoffPolicy::Doubling {
                            max_retry_timeout_ms,
                        } = self.rule.backoff
                        {
                            inner.current_timeout_ms = inner
                                .current_timeout_ms
                                .saturating_mul(2)
                                .min(max_retry_timeout_ms);
                        }
                        inner.state = CircuitState::Open;
                        inner.next_retry_at = now.saturating_add(inner.current_timeout_ms);
                        Some(Transition {
                            from: CircuitState::HalfOpen,
                            to: CircuitState::Open,
                            snapshot: None,
                        })
                    } else {
                        inner.state = CircuitState::Closed;
                        inner.current_timeout_ms = self.rule.retry_timeout_ms;
                        self.stat.reset();
                        Some(Transition {
                            from: CircuitState::HalfOpen,
                            to: CircuitState::Closed,
                            snapshot: None,
                        })
                    }
                }
                CircuitState::Closed => self.trip_if_needed(&mut inner, now),
                _ => None,
            }
        };

        let Some(transition) = transition else {
            trace!(
                "熔断器记录调用: resource={}, rt_ms={}, error={}",
                self.rule.resource,
                rt_ms,
                error
            );
            return;
        };
        self.announce(transition);
    }

    /// 补记已经完成的调用的异常
    ///
    /// 调用退出时已按成功计入统计窗口，这里只增加异常数，关闭状态下重新检查是否需要熔断。
    pub fn record_error(&self, now: u64) {
        self.stat.record(now, MetricEvent::Error, 1);

        let transition = {
            let mut inner = self.inner.lock();
            match inner.state {
                CircuitState::Closed => self.trip_if_needed(&mut inner, now),
                _ => None,
            }
        };

        match transition {
            Some(transition) => self.announce(transition),
            None => trace!("熔断器补记异常: resource={}", self.rule.resource),
        }
    }

    fn trip_if_needed(&self, inner: &mut BreakerInner, now: u64) -> Option<Transition> {
        self.check_trip(now).map(|snapshot| {
            inner.state = CircuitState::Open;
            inner.next_retry_at = now.saturating_add(inner.current_timeout_ms);
            Transition {
                from: CircuitState::Closed,
                to: CircuitState::Open,
                snapshot: Some(snapshot),
            }
        })
    }

    /// 记录日志并通知监听器（在锁外调用）
    fn announce(&self, transition: Transition) {
        match transition.to {
            CircuitState::Open => warn!(
                "熔断器状态变更: resource={}, {:?} -> Open, snapshot={:?}, timeout_ms={}",
                self.rule.resource,
                transition.from,
                transition.snapshot,
                self.current_timeout_ms()
            ),
            _ => info!(
                "熔断器状态变更: resource={}, {:?} -> {:?}",
                self.rule.resource, transition.from, transition.to
            ),
        }
        self.listeners.notify(&transition, &self.rule);
    }

    fn is_rt_strategy(&self) -> bool {
        matches!(
            self.rule.strategy,
            DegradeStrategy::SlowRequestRatio | DegradeStrategy::AverageRt
        )
    }

    /// 关闭状态下检查是否需要熔断，需要时返回触发时的指标值
    fn check_trip(&self, now: u64) -> Option<f64> {
        let total = self.stat.total(now, MetricEvent::Success);
        if total == 0 || total < self.rule.min_request_amount {
            return None;
        }
        let total_f = total as f64;

        match self.rule.strategy {
            DegradeStrategy::ErrorRatio => {
                let ratio = self.stat.total(now, MetricEvent::Error) as f64 / total_f;
                (ratio > self.rule.threshold).then_some(ratio)
            }
            DegradeStrategy::ErrorCount => {
                let errors = self.stat.total(now, MetricEvent::Error) as f64;
                (errors > self.rule.threshold).then_some(errors)
            }
            DegradeStrategy::SlowRequestRatio => {
                let ratio = self.stat.total(now, MetricEvent::Slow) as f64 / total_f;
                let trip = ratio > self.rule.threshold
                    || (ratio == self.rule.threshold && self.rule.threshold == SLOW_REQUEST_RATIO_MAX);
                trip.then_some(ratio)
            }
            DegradeStrategy::AverageRt => {
                let avg = self.stat.total(now, MetricEvent::Rt) as f64 / total_f;
                (avg > self.rule.max_allowed_rt_ms as f64).then_some(avg)
            }
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("rule", &self.rule)
            .field("state", &self.state())
            .finish()
    }
}
