//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 配置模块
//!
//! 定义规则配置 [`RuleConfig`] 和引擎统计配置 [`EngineConfig`]。
//! 规则配置可以从 YAML、TOML、JSON 文件加载，也可以从引擎导出后重新加载。

use crate::constants::{DEFAULT_BUCKET_COUNT, DEFAULT_WINDOW_LENGTH_MS, RULE_CONFIG_VERSION};
use crate::error::FlowGateError;
use crate::rules::{DegradeRule, FlowRule, HotspotRule, SystemRule};
use ahash::AHashSet as HashSet;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, instrument};

/// 规则配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub version: String,
    #[serde(default)]
    pub flow_rules: Vec<FlowRule>,
    #[serde(default)]
    pub hotspot_rules: Vec<HotspotRule>,
    #[serde(default)]
    pub degrade_rules: Vec<DegradeRule>,
    #[serde(default)]
    pub system_rules: Vec<SystemRule>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            version: RULE_CONFIG_VERSION.to_string(),
            flow_rules: Vec::new(),
            hotspot_rules: Vec::new(),
            degrade_rules: Vec::new(),
            system_rules: Vec::new(),
        }
    }
}

impl RuleConfig {
    /// 校验配置
    ///
    /// 任意一条规则不合法时返回带位置的错误信息，整份配置都不会生效。
    pub fn validate(&self) -> Result<(), String> {
        if self.version.is_empty() {
            return Err("版本号不能为空".to_string());
        }

        for (index, rule) in self.flow_rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| format!("流控规则[{}]校验失败: {}", index, e))?;
        }
        for (index, rule) in self.hotspot_rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| format!("热点规则[{}]校验失败: {}", index, e))?;
        }
        for (index, rule) in self.degrade_rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| format!("熔断规则[{}]校验失败: {}", index, e))?;
        }
        for (index, rule) in self.system_rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| format!("系统规则[{}]校验失败: {}", index, e))?;
        }

        Ok(())
    }

    /// 规则总数
    pub fn rule_count(&self) -> usize {
        self.flow_rules.len()
            + self.hotspot_rules.len()
            + self.degrade_rules.len()
            + self.system_rules.len()
    }

    /// 涉及的资源名
    pub fn resources(&self) -> HashSet<String> {
        self.flow_rules
            .iter()
            .map(|r| r.resource.clone())
            .chain(self.hotspot_rules.iter().map(|r| r.resource.clone()))
            .chain(self.degrade_rules.iter().map(|r| r.resource.clone()))
            .collect()
    }

    /// 计算配置哈希值
    pub fn compute_hash(&self) -> String {
        let config_str = serde_json::to_string(self).unwrap_or_default();
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};
        let mut hasher = DefaultHasher::new();
        config_str.hash(&mut hasher);
        format!("{:x}", hasher.finish())
    }

    /// 比较配置是否相同（基于哈希值）
    pub fn is_same_as(&self, other: &RuleConfig) -> bool {
        self.compute_hash() == other.compute_hash()
    }

    /// 比较配置差异
    pub fn diff_changes(&self, old: &RuleConfig) -> Vec<String> {
        let mut changes = Vec::new();

        if self.version != old.version {
            changes.push(format!("版本变更: {} -> {}", old.version, self.version));
        }
        if self.flow_rules != old.flow_rules {
            changes.push(format!(
                "流控规则变更: {} -> {}",
                old.flow_rules.len(),
                self.flow_rules.len()
            ));
        }
        if self.hotspot_rules != old.hotspot_rules {
            changes.push(format!(
                "热点规则变更: {} -> {}",
                old.hotspot_rules.len(),
                self.hotspot_rules.len()
            ));
        }
        if self.degrade_rules != old.degrade_rules {
            changes.push(format!(
                "熔断规则变更: {} -> {}",
                old.degrade_rules.len(),
                self.degrade_rules.len()
            ));
        }
        if self.system_rules != old.system_rules {
            changes.push("系统规则已变更".to_string());
        }

        let old_resources = old.resources();
        let new_resources = self.resources();
        let mut removed: Vec<_> = old_resources.difference(&new_resources).collect();
        if !removed.is_empty() {
            removed.sort();
            changes.push(format!("移除资源: {:?}", removed));
        }

        if changes.is_empty() {
            changes.push("配置内容无变化".to_string());
        }

        changes
    }

    /// 从文件加载配置
    ///
    /// 根据扩展名选择格式：`yaml`/`yml`、`toml`、`json`。加载后会进行校验。
    ///
    /// # 返回
    /// - `Err(FlowGateError::IoError)`: 文件读取失败
    /// - `Err(FlowGateError::ConfigError)`: 扩展名不支持或配置校验失败
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, FlowGateError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| FlowGateError::ConfigError("无法确定配置文件类型".to_string()))?;

        let config: RuleConfig = match extension {
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            "json" => serde_json::from_str(&content)?,
            _ => {
                return Err(FlowGateError::ConfigError(format!(
                    "不支持的配置文件类型: {}",
                    extension
                )))
            }
        };

        config.validate().map_err(FlowGateError::ConfigError)?;
        debug!(
            "已加载规则配置: version={}, rules={}",
            config.version,
            config.rule_count()
        );
        Ok(config)
    }

    /// 导出为 YAML
    pub fn to_yaml(&self) -> Result<String, FlowGateError> {
        Ok(serde_yaml::to_string(self)?)
    }

    /// 导出为 TOML
    pub fn to_toml(&self) -> Result<String, FlowGateError> {
        Ok(toml::to_string(self)?)
    }

    /// 导出为 JSON
    pub fn to_json(&self) -> Result<String, FlowGateError> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn default_window_length_ms() -> u64 {
    DEFAULT_WINDOW_LENGTH_MS
}

fn default_bucket_count() -> u32 {
    DEFAULT_BUCKET_COUNT
}

/// 引擎统计配置
///
/// 决定资源节点秒级统计窗口的长度和桶数量。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_window_length_ms")]
    pub window_length_ms: u64,
    #[serde(default = "default_bucket_count")]
    pub bucket_count: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            window_length_ms: DEFAULT_WINDOW_LENGTH_MS,
            bucket_count: DEFAULT_BUCKET_COUNT,
        }
    }
}

impl EngineConfig {
    /// 校验配置
    pub fn validate(&self) -> Result<(), String> {
        if self.bucket_count == 0 {
            return Err("bucket_count 必须大于0".to_string());
        }
        if self.window_length_ms == 0 {
            return Err("window_length_ms 必须大于0".to_string());
        }
        if self.window_length_ms % self.bucket_count as u64 != 0 {
            return Err(format!(
                "window_length_ms({}) 必须能被 bucket_count({}) 整除",
                self.window_length_ms, self.bucket_count
            ));
        }
        Ok(())
    }
}
