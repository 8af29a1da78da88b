//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 错误类型定义
//!
//! 使用thiserror定义所有错误类型。拦截（Block）属于正常的业务结果，
//! 通过 [`BlockError`] 区分具体触发的规则，调用方可据此选择不同的降级策略。

use crate::rules::{DegradeRule, FlowRule, HotspotRule, ParamValue, SystemRule};
use thiserror::Error;

/// Flowgate 错误类型
#[derive(Error, Debug)]
pub enum FlowGateError {
    /// 请求被规则拦截
    #[error("请求被拦截: {0}")]
    Blocked(#[from] BlockError),

    /// 非法参数（资源名为空、count 为 0、token 缺失等）
    #[error("非法参数: {0}")]
    InvalidArgument(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    ConfigError(String),

    /// IO错误
    #[error("IO错误: {0}")]
    IoError(#[from] std::io::Error),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    SerdeError(#[from] serde_json::Error),

    /// YAML解析错误
    #[error("YAML解析错误: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// TOML解析错误
    #[error("TOML解析错误: {0}")]
    TomlError(#[from] toml::de::Error),

    /// TOML序列化错误
    #[error("TOML序列化错误: {0}")]
    TomlSerError(#[from] toml::ser::Error),
}

impl FlowGateError {
    /// 是否为拦截错误
    pub fn is_blocked(&self) -> bool {
        matches!(self, FlowGateError::Blocked(_))
    }

    /// 获取拦截详情
    pub fn block_error(&self) -> Option<&BlockError> {
        match self {
            FlowGateError::Blocked(e) => Some(e),
            _ => None,
        }
    }
}

/// 拦截原因
///
/// 每个变体都携带被拦截的资源名和触发拦截的规则。
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BlockError {
    /// 流控规则拦截（QPS 或并发数超限）
    #[error("流控规则拦截: resource={resource}, grade={:?}, threshold={}", .rule.grade, .rule.threshold)]
    Flow { resource: String, rule: FlowRule },

    /// 热点参数规则拦截
    #[error("热点参数规则拦截: resource={resource}, value={value}, param_index={}", .rule.param_index)]
    Hotspot {
        resource: String,
        rule: HotspotRule,
        value: ParamValue,
    },

    /// 熔断器拦截（打开状态或半开状态的探测名额已被占用）
    #[error("熔断器拦截: resource={resource}, state={state:?}")]
    CircuitBreaker {
        resource: String,
        rule: DegradeRule,
        state: CircuitState,
    },

    /// 系统保护规则拦截（仅对入口流量生效）
    #[error("系统规则拦截: resource={resource}, metric={metric}")]
    System {
        resource: String,
        rule: SystemRule,
        metric: SystemMetric,
    },
}

impl BlockError {
    /// 被拦截的资源名
    pub fn resource(&self) -> &str {
        match self {
            BlockError::Flow { resource, .. }
            | BlockError::Hotspot { resource, .. }
            | BlockError::CircuitBreaker { resource, .. }
            | BlockError::System { resource, .. } => resource,
        }
    }

    /// 拦截类型的简短标识，用于日志和指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            BlockError::Flow { .. } => "flow",
            BlockError::Hotspot { .. } => "hotspot",
            BlockError::CircuitBreaker { .. } => "circuit_breaker",
            BlockError::System { .. } => "system",
        }
    }
}

/// 熔断器状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    /// 关闭状态（正常）
    Closed,
    /// 打开状态（熔断）
    Open,
    /// 半开状态（探测）
    HalfOpen,
}

/// 触发系统规则的指标
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SystemMetric {
    /// 入口 QPS
    InboundQps,
    /// 入口并发数
    InboundConcurrency,
    /// 入口平均响应时间
    InboundAvgRt,
}

impl std::fmt::Display for SystemMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SystemMetric::InboundQps => write!(f, "inbound_qps"),
            SystemMetric::InboundConcurrency => write!(f, "inbound_concurrency"),
            SystemMetric::InboundAvgRt => write!(f, "inbound_avg_rt"),
        }
    }
}
