//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 规则定义
//!
//! 定义流控规则、热点参数规则、熔断降级规则和系统保护规则。
//! 规则一经构造即不可变，规则集只能整体替换。

use crate::constants::{
    DEFAULT_HOTSPOT_DURATION_SEC, DEFAULT_MAX_QUEUEING_TIME_MS, DEFAULT_MAX_RETRY_TIMEOUT_MS,
    DEFAULT_MAX_TRACKED_VALUES, DEFAULT_MIN_REQUEST_AMOUNT, DEFAULT_RETRY_TIMEOUT_MS,
    DEFAULT_STAT_INTERVAL_MS, DEFAULT_WARM_UP_PERIOD_SEC, MAX_TRACKED_VALUES_LIMIT,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 流量类型
///
/// 系统保护规则只对 `Inbound` 流量生效。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EntryType {
    /// 入口流量（外部调用本系统）
    Inbound,
    /// 出口流量（本系统调用外部）
    #[default]
    Outbound,
}

/// 阈值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FlowGrade {
    /// 每秒通过数
    #[default]
    Qps,
    /// 并发数
    Concurrency,
}

/// 流控效果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ControlBehavior {
    /// 超过阈值直接拒绝
    #[default]
    Reject,
    /// 冷启动：闲置后阈值在预热期内逐步爬升
    WarmUp,
    /// 匀速排队：超过速率的请求排队等待，超过最大排队时间则拒绝
    Queue,
}

fn default_warm_up_period_sec() -> u32 {
    DEFAULT_WARM_UP_PERIOD_SEC
}

fn default_max_queueing_time_ms() -> u64 {
    DEFAULT_MAX_QUEUEING_TIME_MS
}

/// 流控规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRule {
    pub resource: String,
    #[serde(default)]
    pub grade: FlowGrade,
    pub threshold: f64,
    #[serde(default)]
    pub control_behavior: ControlBehavior,
    #[serde(default = "default_warm_up_period_sec")]
    pub warm_up_period_sec: u32,
    #[serde(default = "default_max_queueing_time_ms")]
    pub max_queueing_time_ms: u64,
}

impl FlowRule {
    /// 创建 QPS 限流规则
    ///
    /// # 示例
    /// ```rust
    /// use flowgate::rules::{ControlBehavior, FlowRule};
    ///
    /// let rule = FlowRule::qps("HelloWorld", 20.0);
    /// assert_eq!(rule.control_behavior, ControlBehavior::Reject);
    /// ```
    pub fn qps(resource: impl Into<String>, threshold: f64) -> Self {
        Self {
            resource: resource.into(),
            grade: FlowGrade::Qps,
            threshold,
            control_behavior: ControlBehavior::Reject,
            warm_up_period_sec: DEFAULT_WARM_UP_PERIOD_SEC,
            max_queueing_time_ms: DEFAULT_MAX_QUEUEING_TIME_MS,
        }
    }

    /// 创建并发数限流规则
    pub fn concurrency(resource: impl Into<String>, threshold: f64) -> Self {
        Self {
            grade: FlowGrade::Concurrency,
            ..Self::qps(resource, threshold)
        }
    }

    /// 使用冷启动效果
    pub fn warm_up(mut self, period_sec: u32) -> Self {
        self.control_behavior = ControlBehavior::WarmUp;
        self.warm_up_period_sec = period_sec;
        self
    }

    /// 使用匀速排队效果
    pub fn queue(mut self, max_queueing_time_ms: u64) -> Self {
        self.control_behavior = ControlBehavior::Queue;
        self.max_queueing_time_ms = max_queueing_time_ms;
        self
    }

    /// 校验规则
    pub fn validate(&self) -> Result<(), String> {
        if self.resource.is_empty() {
            return Err("资源名不能为空".to_string());
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("阈值必须为非负数: {}", self.threshold));
        }
        match (self.grade, self.control_behavior) {
            (FlowGrade::Concurrency, ControlBehavior::Reject) | (FlowGrade::Qps, _) => {}
            (FlowGrade::Concurrency, behavior) => {
                return Err(format!("并发数规则不支持流控效果: {:?}", behavior));
            }
        }
        if self.control_behavior == ControlBehavior::WarmUp && self.warm_up_period_sec == 0 {
            return Err("预热时长不能为0".to_string());
        }
        Ok(())
    }
}

/// 调用参数值
///
/// 热点参数规则按位置索引读取调用参数，例外项也按参数值匹配。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Bool(v) => write!(f, "{}", v),
            ParamValue::Int(v) => write!(f, "{}", v),
            ParamValue::Str(v) => write!(f, "{}", v),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(value: &str) -> Self {
        ParamValue::Str(value.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(value: String) -> Self {
        ParamValue::Str(value)
    }
}

impl From<i64> for ParamValue {
    fn from(value: i64) -> Self {
        ParamValue::Int(value)
    }
}

impl From<i32> for ParamValue {
    fn from(value: i32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<u32> for ParamValue {
    fn from(value: u32) -> Self {
        ParamValue::Int(value as i64)
    }
}

impl From<bool> for ParamValue {
    fn from(value: bool) -> Self {
        ParamValue::Bool(value)
    }
}

/// 热点参数例外项
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamException {
    pub value: ParamValue,
    pub threshold: f64,
}

fn default_hotspot_duration_sec() -> u32 {
    DEFAULT_HOTSPOT_DURATION_SEC
}

fn default_max_tracked_values() -> usize {
    DEFAULT_MAX_TRACKED_VALUES
}

/// 热点参数规则
///
/// `param_index` 为调用参数的位置索引，负数表示从末尾倒数（-1 为最后一个参数）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotspotRule {
    pub resource: String,
    pub param_index: i32,
    #[serde(default)]
    pub grade: FlowGrade,
    pub threshold: f64,
    #[serde(default = "default_hotspot_duration_sec")]
    pub duration_sec: u32,
    #[serde(default)]
    pub exceptions: Vec<ParamException>,
    #[serde(default = "default_max_tracked_values")]
    pub max_tracked_values: usize,
}

impl HotspotRule {
    /// 创建热点参数 QPS 规则
    ///
    /// # 示例
    /// ```rust
    /// use flowgate::rules::{HotspotRule, ParamValue};
    ///
    /// let rule = HotspotRule::qps("query", 0, 2.0).with_exception("A", 5.0);
    /// assert_eq!(rule.threshold_for(&ParamValue::from("A")), 5.0);
    /// assert_eq!(rule.threshold_for(&ParamValue::from("B")), 2.0);
    /// ```
    pub fn qps(resource: impl Into<String>, param_index: i32, threshold: f64) -> Self {
        Self {
            resource: resource.into(),
            param_index,
            grade: FlowGrade::Qps,
            threshold,
            duration_sec: DEFAULT_HOTSPOT_DURATION_SEC,
            exceptions: Vec::new(),
            max_tracked_values: DEFAULT_MAX_TRACKED_VALUES,
        }
    }

    /// 创建热点参数并发数规则
    pub fn concurrency(resource: impl Into<String>, param_index: i32, threshold: f64) -> Self {
        Self {
            grade: FlowGrade::Concurrency,
            ..Self::qps(resource, param_index, threshold)
        }
    }

    /// 添加例外项
    pub fn with_exception(mut self, value: impl Into<ParamValue>, threshold: f64) -> Self {
        self.exceptions.push(ParamException {
            value: value.into(),
            threshold,
        });
        self
    }

    /// 设置统计窗口时长
    pub fn with_duration_sec(mut self, duration_sec: u32) -> Self {
        self.duration_sec = duration_sec;
        self
    }

    /// 设置最多跟踪的参数值个数
    pub fn with_max_tracked_values(mut self, max_tracked_values: usize) -> Self {
        self.max_tracked_values = max_tracked_values;
        self
    }

    /// 获取参数值对应的阈值（例外项优先）
    pub fn threshold_for(&self, value: &ParamValue) -> f64 {
        self.exceptions
            .iter()
            .find(|item| &item.value == value)
            .map(|item| item.threshold)
            .unwrap_or(self.threshold)
    }

    /// 将位置索引解析为参数下标
    pub fn resolve_index(&self, arg_count: usize) -> Option<usize> {
        if self.param_index >= 0 {
            let index = self.param_index as usize;
            (index < arg_count).then_some(index)
        } else {
            let back = self.param_index.unsigned_abs() as usize;
            arg_count.checked_sub(back)
        }
    }

    /// 校验规则
    pub fn validate(&self) -> Result<(), String> {
        if self.resource.is_empty() {
            return Err("资源名不能为空".to_string());
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("阈值必须为非负数: {}", self.threshold));
        }
        if self.duration_sec == 0 {
            return Err("统计窗口时长不能为0".to_string());
        }
        if self.max_tracked_values == 0 || self.max_tracked_values > MAX_TRACKED_VALUES_LIMIT {
            return Err(format!(
                "max_tracked_values 必须在 1..={} 之间: {}",
                MAX_TRACKED_VALUES_LIMIT, self.max_tracked_values
            ));
        }
        for (index, item) in self.exceptions.iter().enumerate() {
            if !item.threshold.is_finite() || item.threshold < 0.0 {
                return Err(format!("例外项[{}]阈值必须为非负数", index));
            }
        }
        Ok(())
    }
}

/// 熔断策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DegradeStrategy {
    /// 异常比例
    ErrorRatio,
    /// 异常数
    ErrorCount,
    /// 慢调用比例（响应时间超过 `max_allowed_rt_ms` 视为慢调用）
    SlowRequestRatio,
    /// 平均响应时间
    AverageRt,
}

/// 熔断恢复时长的退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BackoffPolicy {
    /// 每次都使用固定的 `retry_timeout_ms`
    #[default]
    None,
    /// 探测失败后恢复时长翻倍，最大不超过 `max_retry_timeout_ms`
    Doubling { max_retry_timeout_ms: u64 },
}

fn default_min_request_amount() -> u64 {
    DEFAULT_MIN_REQUEST_AMOUNT
}

fn default_stat_interval_ms() -> u64 {
    DEFAULT_STAT_INTERVAL_MS
}

fn default_retry_timeout_ms() -> u64 {
    DEFAULT_RETRY_TIMEOUT_MS
}

/// 熔断降级规则
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegradeRule {
    pub resource: String,
    pub strategy: DegradeStrategy,
    /// 比例阈值（0.0-1.0）或异常数阈值；`AverageRt` 策略不使用
    #[serde(default)]
    pub threshold: f64,
    /// 慢调用 / 平均响应时间阈值（毫秒）
    #[serde(default)]
    pub max_allowed_rt_ms: u64,
    #[serde(default = "default_min_request_amount")]
    pub min_request_amount: u64,
    #[serde(default = "default_stat_interval_ms")]
    pub stat_interval_ms: u64,
    #[serde(default = "default_retry_timeout_ms")]
    pub retry_timeout_ms: u64,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl DegradeRule {
    fn with_strategy(resource: impl Into<String>, strategy: DegradeStrategy) -> Self {
        Self {
            resource: resource.into(),
            strategy,
            threshold: 0.0,
            max_allowed_rt_ms: 0,
            min_request_amount: DEFAULT_MIN_REQUEST_AMOUNT,
            stat_interval_ms: DEFAULT_STAT_INTERVAL_MS,
            retry_timeout_ms: DEFAULT_RETRY_TIMEOUT_MS,
            backoff: BackoffPolicy::None,
        }
    }

    /// 异常比例熔断
    pub fn error_ratio(resource: impl Into<String>, ratio: f64) -> Self {
        Self {
            threshold: ratio,
            ..Self::with_strategy(resource, DegradeStrategy::ErrorRatio)
        }
    }

    /// 异常数熔断
    pub fn error_count(resource: impl Into<String>, count: u64) -> Self {
        Self {
            threshold: count as f64,
            ..Self::with_strategy(resource, DegradeStrategy::ErrorCount)
        }
    }

    /// 慢调用比例熔断
    pub fn slow_request_ratio(resource: impl Into<String>, max_allowed_rt_ms: u64, ratio: f64) -> Self {
        Self {
            threshold: ratio,
            max_allowed_rt_ms,
            ..Self::with_strategy(resource, DegradeStrategy::SlowRequestRatio)
        }
    }

    /// 平均响应时间熔断
    pub fn average_rt(resource: impl Into<String>, max_allowed_rt_ms: u64) -> Self {
        Self {
            max_allowed_rt_ms,
            ..Self::with_strategy(resource, DegradeStrategy::AverageRt)
        }
    }

    pub fn with_min_request_amount(mut self, amount: u64) -> Self {
        self.min_request_amount = amount;
        self
    }

    pub fn with_stat_interval_ms(mut self, interval_ms: u64) -> Self {
        self.stat_interval_ms = interval_ms;
        self
    }

    pub fn with_retry_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.retry_timeout_ms = timeout_ms;
        self
    }

    /// 探测失败后恢复时长翻倍
    pub fn with_doubling_backoff(mut self, max_retry_timeout_ms: u64) -> Self {
        self.backoff = BackoffPolicy::Doubling {
            max_retry_timeout_ms,
        };
        self
    }

    /// 使用默认上限的翻倍退避
    pub fn with_default_backoff(self) -> Self {
        self.with_doubling_backoff(DEFAULT_MAX_RETRY_TIMEOUT_MS)
    }

    /// 校验规则
    pub fn validate(&self) -> Result<(), String> {
        if self.resource.is_empty() {
            return Err("资源名不能为空".to_string());
        }
        if !self.threshold.is_finite() || self.threshold < 0.0 {
            return Err(format!("阈值必须为非负数: {}", self.threshold));
        }
        match self.strategy {
            DegradeStrategy::ErrorRatio | DegradeStrategy::SlowRequestRatio
                if self.threshold > 1.0 =>
            {
                return Err(format!("比例阈值必须在 0.0-1.0 之间: {}", self.threshold));
            }
            DegradeStrategy::SlowRequestRatio | DegradeStrategy::AverageRt
                if self.max_allowed_rt_ms == 0 =>
            {
                return Err("max_allowed_rt_ms 不能为0".to_string());
            }
            _ => {}
        }
        if self.stat_interval_ms == 0 {
            return Err("统计时长不能为0".to_string());
        }
        if self.retry_timeout_ms == 0 {
            return Err("熔断时长不能为0".to_string());
        }
        if let BackoffPolicy::Doubling {
            max_retry_timeout_ms,
        } = self.backoff
        {
            if max_retry_timeout_ms < self.retry_timeout_ms {
                return Err("退避上限不能小于熔断时长".to_string());
            }
        }
        Ok(())
    }
}

/// 系统保护规则
///
/// 全局生效，只统计和拦截入口流量。各项均为可选，未设置表示不限制。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SystemRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inbound_qps: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_inbound_concurrency: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_avg_rt_ms: Option<u64>,
}

impl SystemRule {
    /// 校验规则
    pub fn validate(&self) -> Result<(), String> {
        if self.max_inbound_qps.is_none()
            && self.max_inbound_concurrency.is_none()
            && self.max_avg_rt_ms.is_none()
        {
            return Err("系统规则至少需要设置一项阈值".to_string());
        }
        if let Some(qps) = self.max_inbound_qps {
            if !qps.is_finite() || qps < 0.0 {
                return Err(format!("入口QPS阈值必须为非负数: {}", qps));
            }
        }
        Ok(())
    }
}
