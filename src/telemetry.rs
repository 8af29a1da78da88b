//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 监控模块
//!
//! 以 Prometheus 指标导出各资源的通过、拦截、异常、响应时间和并发数。
//! 需要启用 `monitoring` 特性。
//!
//! # 示例
//!
//! ```rust
//! use flowgate::telemetry::{set_global_metrics, Metrics};
//! use std::sync::Arc;
//!
//! let metrics = Arc::new(Metrics::new().unwrap());
//! set_global_metrics(Arc::clone(&metrics));
//!
//! metrics.record_pass("orders", 1);
//! assert!(metrics.gather().contains("flowgate_pass_total"));
//! ```

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::error;

/// 监控指标
#[derive(Clone)]
pub struct Metrics {
    /// 通过数
    pub pass_total: IntCounterVec,
    /// 拦截数（按拦截类型区分）
    pub block_total: IntCounterVec,
    /// 业务异常数
    pub error_total: IntCounterVec,
    /// 响应时间分布（秒）
    pub rt_seconds: HistogramVec,
    /// 当前并发数
    pub concurrency: IntGaugeVec,
    /// 指标注册表
    registry: Registry,
}

/// 全局指标实例
static GLOBAL_METRICS: std::sync::OnceLock<Arc<Metrics>> = std::sync::OnceLock::new();

/// 设置全局指标实例
///
/// 只有第一次设置生效。
pub fn set_global_metrics(metrics: Arc<Metrics>) {
    let _ = GLOBAL_METRICS.set(metrics);
}

/// 获取全局指标实例
///
/// # 返回
/// - `Some(Arc<Metrics>)`: 如果已设置
/// - `None`: 如果未设置
pub fn try_global() -> Option<Arc<Metrics>> {
    GLOBAL_METRICS.get().cloned()
}

impl Metrics {
    /// 创建新的监控指标并注册到内部的 Registry
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let pass_total = IntCounterVec::new(
            Opts::new("flowgate_pass_total", "Total admitted entries"),
            &["resource"],
        )?;
        let block_total = IntCounterVec::new(
            Opts::new("flowgate_block_total", "Total blocked entries"),
            &["resource", "kind"],
        )?;
        let error_total = IntCounterVec::new(
            Opts::new("flowgate_error_total", "Total traced business errors"),
            &["resource"],
        )?;
        let rt_seconds = HistogramVec::new(
            HistogramOpts::new("flowgate_rt_seconds", "Response time of completed entries")
                .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["resource"],
        )?;
        let concurrency = IntGaugeVec::new(
            Opts::new("flowgate_concurrency", "Current in-flight entries"),
            &["resource"],
        )?;

        registry.register(Box::new(pass_total.clone()))?;
        registry.register(Box::new(block_total.clone()))?;
        registry.register(Box::new(error_total.clone()))?;
        registry.register(Box::new(rt_seconds.clone()))?;
        registry.register(Box::new(concurrency.clone()))?;

        Ok(Self {
            pass_total,
            block_total,
            error_total,
            rt_seconds,
            concurrency,
            registry,
        })
    }

    /// 内部注册表
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// 收集所有指标并返回Prometheus格式的文本
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            error!("指标编码失败: {}", e);
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    /// 记录通过
    pub fn record_pass(&self, resource: &str, count: u32) {
        self.pass_total
            .with_label_values(&[resource])
            .inc_by(count as u64);
        self.concurrency
            .with_label_values(&[resource])
            .add(count as i64);
    }

    /// 记录拦截
    pub fn record_block(&self, resource: &str, kind: &str, count: u32) {
        self.block_total
            .with_label_values(&[resource, kind])
            .inc_by(count as u64);
    }

    /// 记录业务异常
    pub fn record_error(&self, resource: &str, count: u32) {
        self.error_total
            .with_label_values(&[resource])
            .inc_by(count as u64);
    }

    /// 记录调用完成
    pub fn record_exit(&self, resource: &str, count: u32, rt_ms: u64) {
        self.rt_seconds
            .with_label_values(&[resource])
            .observe(rt_ms as f64 / 1_000.0);
        let gauge = self.concurrency.with_label_values(&[resource]);
        gauge.set((gauge.get() - count as i64).max(0));
    }
}
