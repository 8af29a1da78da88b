//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 资源节点
//!
//! 每个资源对应一个 [`ResourceNode`]，记录并发数、秒级和分钟级滑动窗口以及累计总数。
//! 所有入口流量还会额外汇总到一个入口节点上，供系统规则使用。
//!
//! 节点在资源第一次被访问时创建，之后不会被删除。

use crate::config::EngineConfig;
use crate::constants::{MINUTE_BUCKET_COUNT, MINUTE_WINDOW_LENGTH_MS};
use crate::error::{CircuitState, FlowGateError};
use crate::sliding_window::{MetricEvent, SlidingWindow};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// 资源节点
#[derive(Debug)]
pub struct ResourceNode {
    resource: String,
    /// 当前并发数
    concurrency: AtomicU64,
    /// 秒级窗口
    second: SlidingWindow,
    /// 分钟级窗口（每秒一个桶）
    minute: SlidingWindow,
    total_pass: AtomicU64,
    total_block: AtomicU64,
    total_success: AtomicU64,
    total_error: AtomicU64,
    total_rt: AtomicU64,
}

impl ResourceNode {
    /// 创建资源节点
    ///
    /// # 参数
    /// - `resource`: 资源名
    /// - `config`: 秒级窗口配置
    pub fn new(resource: impl Into<String>, config: &EngineConfig) -> Result<Self, FlowGateError> {
        Ok(Self {
            resource: resource.into(),
            concurrency: AtomicU64::new(0),
            second: SlidingWindow::new(config.window_length_ms, config.bucket_count)?,
            minute: SlidingWindow::new(MINUTE_WINDOW_LENGTH_MS, MINUTE_BUCKET_COUNT)?,
            total_pass: AtomicU64::new(0),
            total_block: AtomicU64::new(0),
            total_success: AtomicU64::new(0),
            total_error: AtomicU64::new(0),
            total_rt: AtomicU64::new(0),
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// 当前并发数
    pub fn concurrency(&self) -> u64 {
        self.concurrency.load(Ordering::Acquire)
    }

    pub(crate) fn increase_concurrency(&self, count: u64) {
        self.concurrency.fetch_add(count, Ordering::AcqRel);
    }

    /// 在上限内原子地增加并发数
    ///
    /// 增加后会超过 `ceiling` 时不做修改，返回当时的并发数。
    pub(crate) fn try_increase_concurrency(&self, count: u64, ceiling: f64) -> Result<(), u64> {
        self.concurrency
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                let next = current.saturating_add(count);
                (next as f64 <= ceiling).then_some(next)
            })
            .map(|_| ())
    }

    /// 减少并发数，最小为 0
    pub(crate) fn decrease_concurrency(&self, count: u64) {
        let _ = self
            .concurrency
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
    }

    pub(crate) fn add_pass(&self, now: u64, count: u64) {
        self.second.record(now, MetricEvent::Pass, count);
        self.minute.record(now, MetricEvent::Pass, count);
        self.total_pass.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_block(&self, now: u64, count: u64) {
        self.second.record(now, MetricEvent::Block, count);
        self.minute.record(now, MetricEvent::Block, count);
        self.total_block.fetch_add(count, Ordering::Relaxed);
    }

    /// 记录调用完成
    ///
    /// 响应时间按权重累加，平均响应时间为单位权重的耗时。
    pub(crate) fn add_completion(&self, now: u64, rt_ms: u64, count: u64) {
        let rt = rt_ms.saturating_mul(count);
        self.second.record(now, MetricEvent::Success, count);
        self.second.record(now, MetricEvent::Rt, rt);
        self.minute.record(now, MetricEvent::Success, count);
        self.total_success.fetch_add(count, Ordering::Relaxed);
        self.total_rt.fetch_add(rt, Ordering::Relaxed);
    }

    pub(crate) fn add_error(&self, now: u64, count: u64) {
        self.second.record(now, MetricEvent::Error, count);
        self.minute.record(now, MetricEvent::Error, count);
        self.total_error.fetch_add(count, Ordering::Relaxed);
    }

    fn per_second(&self, now: u64, event: MetricEvent) -> f64 {
        let sum = self.second.total(now, event) as f64;
        sum * 1_000.0 / self.second.window_length_ms() as f64
    }

    /// 每秒通过数
    pub fn pass_qps(&self, now: u64) -> f64 {
        self.per_second(now, MetricEvent::Pass)
    }

    pub fn block_qps(&self, now: u64) -> f64 {
        self.per_second(now, MetricEvent::Block)
    }

    pub fn success_qps(&self, now: u64) -> f64 {
        self.per_second(now, MetricEvent::Success)
    }

    pub fn error_qps(&self, now: u64) -> f64 {
        self.per_second(now, MetricEvent::Error)
    }

    /// 上一秒的通过数（冷启动算法使用）
    pub fn previous_pass_qps(&self, now: u64) -> u64 {
        if now < 1_000 {
            return 0;
        }
        self.minute.value_at(now, MetricEvent::Pass, now - 1_000)
    }

    /// 平均响应时间（毫秒）
    pub fn avg_rt(&self, now: u64) -> f64 {
        let success = self.second.total(now, MetricEvent::Success);
        if success == 0 {
            return 0.0;
        }
        self.second.total(now, MetricEvent::Rt) as f64 / success as f64
    }

    /// 生成只读快照
    ///
    /// `now` 同时作为快照的时钟时间 `clock_ms`；`timestamp` 为生成快照时的墙上时间。
    pub fn snapshot(&self, now: u64) -> NodeSnapshot {
        NodeSnapshot {
            resource: self.resource.clone(),
            pass_qps: self.pass_qps(now),
            block_qps: self.block_qps(now),
            success_qps: self.success_qps(now),
            error_qps: self.error_qps(now),
            avg_rt_ms: self.avg_rt(now),
            concurrency: self.concurrency(),
            total_pass: self.total_pass.load(Ordering::Relaxed),
            total_block: self.total_block.load(Ordering::Relaxed),
            total_success: self.total_success.load(Ordering::Relaxed),
            total_error: self.total_error.load(Ordering::Relaxed),
            total_rt_ms: self.total_rt.load(Ordering::Relaxed),
            circuit_states: Vec::new(),
            clock_ms: now,
            timestamp: Utc::now(),
        }
    }
}

/// 资源节点快照
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodeSnapshot {
    pub resource: String,
    pub pass_qps: f64,
    pub block_qps: f64,
    pub success_qps: f64,
    pub error_qps: f64,
    pub avg_rt_ms: f64,
    pub concurrency: u64,
    pub total_pass: u64,
    pub total_block: u64,
    pub total_success: u64,
    pub total_error: u64,
    pub total_rt_ms: u64,
    /// 按熔断规则顺序排列的熔断器状态
    pub circuit_states: Vec<CircuitState>,
    /// 引擎时钟上的快照时间（毫秒）
    pub clock_ms: u64,
    /// 墙上时间，不受引擎时钟影响
    pub timestamp: DateTime<Utc>,
}

/// 资源节点注册表
pub(crate) struct NodeRegistry {
    nodes: DashMap<String, Arc<ResourceNode>>,
    config: EngineConfig,
}

impl NodeRegistry {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            nodes: DashMap::new(),
            config,
        }
    }

    /// 获取或创建资源节点
    pub fn get_or_create(&self, resource: &str) -> Result<Arc<ResourceNode>, FlowGateError> {
        if let Some(node) = self.nodes.get(resource) {
            return Ok(Arc::clone(node.value()));
        }

        let node = Arc::new(ResourceNode::new(resource, &self.config)?);
        let node = self
            .nodes
            .entry(resource.to_string())
            .or_insert_with(|| {
                debug!("创建资源节点: {}", resource);
                node
            })
            .value()
            .clone();
        Ok(node)
    }

    pub fn get(&self, resource: &str) -> Option<Arc<ResourceNode>> {
        self.nodes.get(resource).map(|node| Arc::clone(node.value()))
    }

    pub fn all(&self) -> Vec<Arc<ResourceNode>> {
        self.nodes.iter().map(|entry| Arc::clone(entry.value())).collect()
    }
}
