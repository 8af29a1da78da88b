//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 流控规则执行器
//!
//! 每条 [`FlowRule`] 编译成一个 [`FlowController`]，保存该规则的运行时状态：
//! 冷启动的令牌数、匀速排队的最近通过时间。
//!
//! # 流控效果
//!
//! - **Reject**: `pass_qps + count > threshold` 时拒绝
//! - **WarmUp**: 令牌桶冷启动，闲置后阈值从 `threshold / 3` 逐步爬升到 `threshold`
//! - **Queue**: 每个请求占用 `count / threshold` 秒，预约到的通过时间记为 [`PacingSlot`]，
//!   等待超过 `max_queueing_time_ms` 则拒绝
//!
//! 并发数规则只支持 Reject，由 [`acquire_concurrency`] 在资源节点上原子地占用名额，
//! `concurrency + count > threshold` 时立即拒绝。

use crate::constants::DEFAULT_COLD_FACTOR;
use crate::node::ResourceNode;
use crate::rules::{ControlBehavior, FlowGrade, FlowRule};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// 尚未有请求通过 / 尚未填充令牌
const NEVER: u64 = u64::MAX;

/// 浮点阈值比较的容差
const QPS_TOLERANCE: f64 = 1e-6;

/// 流控检查结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowDecision {
    /// 放行
    Pass,
    /// 匀速排队预约成功，等待 [`PacingSlot::wait`] 后放行
    Paced(PacingSlot),
    /// 拒绝
    Block,
}

/// 匀速排队的一次预约
///
/// 调用最终未能通过时交给 [`FlowController::cancel_pacing`] 归还。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacingSlot {
    /// 预约前的最近通过时间
    previous_ms: u64,
    /// 预约到的通过时间
    scheduled_ms: u64,
    wait: Duration,
}

impl PacingSlot {
    /// 需要等待的时长
    pub fn wait(&self) -> Duration {
        self.wait
    }

    pub fn scheduled_ms(&self) -> u64 {
        self.scheduled_ms
    }
}

/// 在资源节点上为所有并发数规则占用名额
///
/// 所有并发数规则取最小阈值作为上限，一次原子操作同时满足全部规则。
///
/// # 返回
/// - `Ok(true)`: 已占用 `count` 个并发名额，调用未通过时需要归还
/// - `Ok(false)`: 没有并发数规则，未占用
/// - `Err(controller)`: 第一条被突破的并发数规则
pub fn acquire_concurrency<'a>(
    controllers: &'a [Arc<FlowController>],
    node: &ResourceNode,
    count: u32,
) -> Result<bool, &'a FlowController> {
    let ceiling = controllers
        .iter()
        .filter(|c| c.rule.grade == FlowGrade::Concurrency)
        .map(|c| c.rule.threshold)
        .reduce(f64::min);
    let Some(ceiling) = ceiling else {
        return Ok(false);
    };

    match node.try_increase_concurrency(count as u64, ceiling) {
        Ok(()) => Ok(true),
        Err(current) => {
            let wanted = current.saturating_add(count as u64) as f64;
            trace!(
                "并发数超过上限: resource={}, current={}, ceiling={}",
                node.resource(),
                current,
                ceiling
            );
            let violated = controllers
                .iter()
                .filter(|c| c.rule.grade == FlowGrade::Concurrency)
                .find(|c| wanted > c.rule.threshold);
            match violated {
                Some(controller) => Err(&**controller),
                None => Ok(false),
            }
        }
    }
}

/// 冷启动状态
#[derive(Debug)]
struct WarmUp {
    count: f64,
    cold_factor: u64,
    warning_token: u64,
    max_token: u64,
    slope: f64,
    stored_tokens: AtomicU64,
    last_filled_ms: AtomicU64,
}

impl WarmUp {
    fn new(count: f64, warm_up_period_sec: u32) -> Self {
        let cold_factor = DEFAULT_COLD_FACTOR as u64;
        let period = warm_up_period_sec as f64;
        let warning_token = (period * count) as u64 / (cold_factor - 1);
        let max_token = warning_token + (2.0 * period * count / (1.0 + cold_factor as f64)) as u64;
        let slope = if max_token > warning_token && count > 0.0 {
            (cold_factor as f64 - 1.0) / count / (max_token - warning_token) as f64
        } else {
            0.0
        };

        Self {
            count,
            cold_factor,
            warning_token,
            max_token,
            slope,
            stored_tokens: AtomicU64::new(0),
            last_filled_ms: AtomicU64::new(NEVER),
        }
    }

    fn can_pass(&self, node: &ResourceNode, now: u64, acquire: f64) -> bool {
        let pass_qps = node.pass_qps(now);
        self.sync_token(now, node.previous_pass_qps(now));

        let rest = self.stored_tokens.load(Ordering::Acquire);
        let allowed = if rest >= self.warning_token {
            let above = (rest - self.warning_token) as f64;
            1.0 / (above * self.slope + 1.0 / self.count)
        } else {
            self.count
        };

        trace!(
            "冷启动检查: stored_tokens={}, allowed_qps={:.3}, pass_qps={}",
            rest,
            allowed,
            pass_qps
        );
        pass_qps + acquire <= allowed + QPS_TOLERANCE
    }

    /// 每秒补充一次令牌，并扣除上一秒的通过数
    fn sync_token(&self, now: u64, previous_pass: u64) {
        let current = now - now % 1_000;
        let last_filled = self.last_filled_ms.load(Ordering::Acquire);
        if last_filled != NEVER && current <= last_filled {
            return;
        }

        let old_value = self.stored_tokens.load(Ordering::Acquire);
        let new_value = self.cool_down_tokens(current, last_filled, old_value, previous_pass);
        if self
            .stored_tokens
            .compare_exchange(old_value, new_value, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self
                .stored_tokens
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |value| {
                    Some(value.saturating_sub(previous_pass))
                });
            self.last_filled_ms.store(current, Ordering::Release);
        }
    }

    fn cool_down_tokens(&self, current: u64, last_filled: u64, old_value: u64, previous_pass: u64) -> u64 {
        if last_filled == NEVER {
            return self.max_token;
        }

        let refill = ((current - last_filled) as f64 * self.count / 1_000.0) as u64;
        let cold_qps = (self.count as u64) / self.cold_factor;
        let new_value = if old_value < self.warning_token
            || (old_value > self.warning_token && previous_pass < cold_qps)
        {
            old_value.saturating_add(refill)
        } else {
            old_value
        };
        new_value.min(self.max_token)
    }
}

/// 流控规则执行器
#[derive(Debug)]
pub struct FlowController {
    rule: FlowRule,
    warm_up: Option<WarmUp>,
    /// 匀速排队：最近一次通过（或预约）的时间
    latest_passed_ms: AtomicU64,
}

impl FlowController {
    /// 编译流控规则
    pub fn new(rule: FlowRule) -> Self {
        let warm_up = (rule.grade == FlowGrade::Qps
            && rule.control_behavior == ControlBehavior::WarmUp)
            .then(|| WarmUp::new(rule.threshold, rule.warm_up_period_sec));

        Self {
            rule,
            warm_up,
            latest_passed_ms: AtomicU64::new(NEVER),
        }
    }

    pub fn rule(&self) -> &FlowRule {
        &self.rule
    }

    /// 检查本次调用能否通过
    ///
    /// 并发数规则在这里总是放行，由 [`acquire_concurrency`] 统一处理。
    ///
    /// # 参数
    /// - `node`: 资源节点
    /// - `now`: 当前时间（毫秒）
    /// - `count`: 本次调用的权重
    pub fn check(&self, node: &ResourceNode, now: u64, count: u32) -> FlowDecision {
        if self.rule.grade == FlowGrade::Concurrency {
            return FlowDecision::Pass;
        }

        let acquire = count as f64;
        match self.rule.control_behavior {
            ControlBehavior::Reject => {
                if node.pass_qps(now) + acquire > self.rule.threshold {
                    FlowDecision::Block
                } else {
                    FlowDecision::Pass
                }
            }
            ControlBehavior::WarmUp => match &self.warm_up {
                Some(warm_up) if self.rule.threshold > 0.0 => {
                    if warm_up.can_pass(node, now, acquire) {
                        FlowDecision::Pass
                    } else {
                        FlowDecision::Block
                    }
                }
                _ => FlowDecision::Block,
            },
            ControlBehavior::Queue => self.pace(now, count),
        }
    }

    /// 匀速排队
    fn pace(&self, now: u64, count: u32) -> FlowDecision {
        if self.rule.threshold <= 0.0 {
            return FlowDecision::Block;
        }

        let cost = (count as f64 / self.rule.threshold * 1_000.0).round() as u64;
        let max_wait = self.rule.max_queueing_time_ms;

        loop {
            let latest = self.latest_passed_ms.load(Ordering::Acquire);
            let scheduled = if latest == NEVER {
                now
            } else {
                latest.saturating_add(cost).max(now)
            };

            let wait = scheduled - now;
            if wait > max_wait {
                return FlowDecision::Block;
            }

            if self
                .latest_passed_ms
                .compare_exchange(latest, scheduled, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return FlowDecision::Paced(PacingSlot {
                    previous_ms: latest,
                    scheduled_ms: scheduled,
                    wait: Duration::from_millis(wait),
                });
            }
        }
    }

    /// 归还匀速排队的预约
    ///
    /// 只有预约之后没有其他调用再预约时才能归还，否则保留该预约。
    pub fn cancel_pacing(&self, slot: &PacingSlot) {
        let restored = self
            .latest_passed_ms
            .compare_exchange(
                slot.scheduled_ms,
                slot.previous_ms,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        trace!(
            "归还排队预约: resource={}, scheduled_ms={}, restored={}",
            self.rule.resource,
            slot.scheduled_ms,
            restored
        );
    }
}
