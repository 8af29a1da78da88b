//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 规则存储
//!
//! 保存每个资源当前生效的规则集（已编译为带运行时状态的执行器）以及全局系统规则。
//!
//! # 特性
//! - 每次评估只读取一个 `Arc<ResourceRules>` 快照，替换规则不会影响正在进行的评估
//! - 各类规则按资源整体替换
//! - 新规则与旧规则相同时沿用旧的运行时状态（冷启动令牌、排队时间、熔断状态、热点计数）

use crate::circuit_breaker::{CircuitBreaker, ListenerSet};
use crate::config::RuleConfig;
use crate::constants::RULE_CONFIG_VERSION;
use crate::error::FlowGateError;
use crate::flow::FlowController;
use crate::hotspot::HotspotChecker;
use crate::rules::{DegradeRule, FlowRule, HotspotRule, SystemRule};
use ahash::AHashMap as HashMap;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// 单个资源的规则快照
#[derive(Debug, Default)]
pub struct ResourceRules {
    pub flow: Vec<Arc<FlowController>>,
    pub hotspot: Vec<Arc<HotspotChecker>>,
    pub breakers: Vec<Arc<CircuitBreaker>>,
}

impl ResourceRules {
    pub fn is_empty(&self) -> bool {
        self.flow.is_empty() && self.hotspot.is_empty() && self.breakers.is_empty()
    }
}

/// 在旧的执行器中查找相同的规则并复用，找不到时重新编译
fn reuse_or_compile<R, T>(
    previous: &[Arc<T>],
    rules: Vec<R>,
    rule_of: impl Fn(&T) -> &R,
    compile: impl Fn(R) -> Result<T, FlowGateError>,
) -> Result<Vec<Arc<T>>, FlowGateError>
where
    R: PartialEq,
{
    let mut used = vec![false; previous.len()];
    let mut compiled = Vec::with_capacity(rules.len());

    for rule in rules {
        let reused = previous
            .iter()
            .enumerate()
            .position(|(index, old)| !used[index] && rule_of(&**old) == &rule);

        match reused {
            Some(index) => {
                used[index] = true;
                compiled.push(Arc::clone(&previous[index]));
            }
            None => compiled.push(Arc::new(compile(rule)?)),
        }
    }

    Ok(compiled)
}

fn check_resource<'a>(
    resource: &str,
    mut names: impl Iterator<Item = &'a String>,
) -> Result<(), FlowGateError> {
    if resource.is_empty() {
        return Err(FlowGateError::InvalidArgument("资源名不能为空".to_string()));
    }
    match names.find(|name| name.as_str() != resource) {
        Some(other) => Err(FlowGateError::InvalidArgument(format!(
            "规则资源名 {} 与 {} 不一致",
            other, resource
        ))),
        None => Ok(()),
    }
}

/// 规则存储
pub struct RuleStore {
    rules: DashMap<String, Arc<ResourceRules>>,
    system: RwLock<Arc<Vec<SystemRule>>>,
    listeners: ListenerSet,
}

impl RuleStore {
    pub(crate) fn new(listeners: ListenerSet) -> Self {
        Self {
            rules: DashMap::new(),
            system: RwLock::new(Arc::new(Vec::new())),
            listeners,
        }
    }

    /// 获取资源的规则快照，没有规则时返回 `None`
    pub fn rules(&self, resource: &str) -> Option<Arc<ResourceRules>> {
        self.rules.get(resource).map(|entry| Arc::clone(entry.value()))
    }

    /// 获取系统规则快照
    pub fn system_rules(&self) -> Arc<Vec<SystemRule>> {
        Arc::clone(&self.system.read())
    }

    fn compile_flow(
        previous: &ResourceRules,
        rules: Vec<FlowRule>,
    ) -> Result<Vec<Arc<FlowController>>, FlowGateError> {
        reuse_or_compile(&previous.flow, rules, FlowController::rule, |rule| {
            rule.validate().map_err(FlowGateError::ConfigError)?;
            Ok(FlowController::new(rule))
        })
    }

    fn compile_hotspot(
        previous: &ResourceRules,
        rules: Vec<HotspotRule>,
    ) -> Result<Vec<Arc<HotspotChecker>>, FlowGateError> {
        reuse_or_compile(&previous.hotspot, rules, HotspotChecker::rule, HotspotChecker::new)
    }

    fn compile_breakers(
        &self,
        previous: &ResourceRules,
        rules: Vec<DegradeRule>,
    ) -> Result<Vec<Arc<CircuitBreaker>>, FlowGateError> {
        reuse_or_compile(&previous.breakers, rules, CircuitBreaker::rule, |rule| {
            CircuitBreaker::with_listeners(rule, self.listeners.clone())
        })
    }

    /// 替换资源的某一类规则
    ///
    /// 在资源的分片锁内完成，同一资源上的并发替换不会互相覆盖。
    fn update(
        &self,
        resource: &str,
        build: impl FnOnce(&ResourceRules) -> Result<ResourceRules, FlowGateError>,
    ) -> Result<(), FlowGateError> {
        let result = {
            let mut entry = self.rules.entry(resource.to_string()).or_default();
            build(&**entry.value()).map(|next| *entry.value_mut() = Arc::new(next))
        };
        self.rules.remove_if(resource, |_, rules| rules.is_empty());
        result
    }

    /// 替换资源的流控规则
    pub fn set_flow_rules(&self, resource: &str, rules: Vec<FlowRule>) -> Result<(), FlowGateError> {
        check_resource(resource, rules.iter().map(|r| &r.resource))?;
        let count = rules.len();
        self.update(resource, |current| {
            Ok(ResourceRules {
                flow: Self::compile_flow(current, rules)?,
                hotspot: current.hotspot.clone(),
                breakers: current.breakers.clone(),
            })
        })?;
        info!("更新流控规则: resource={}, count={}", resource, count);
        Ok(())
    }

    /// 替换资源的热点参数规则
    pub fn set_hotspot_rules(
        &self,
        resource: &str,
        rules: Vec<HotspotRule>,
    ) -> Result<(), FlowGateError> {
        check_resource(resource, rules.iter().map(|r| &r.resource))?;
        let count = rules.len();
        self.update(resource, |current| {
            Ok(ResourceRules {
                flow: current.flow.clone(),
                hotspot: Self::compile_hotspot(current, rules)?,
                breakers: current.breakers.clone(),
            })
        })?;
        info!("更新热点参数规则: resource={}, count={}", resource, count);
        Ok(())
    }

    /// 替换资源的熔断规则
    pub fn set_degrade_rules(
        &self,
        resource: &str,
        rules: Vec<DegradeRule>,
    ) -> Result<(), FlowGateError> {
        check_resource(resource, rules.iter().map(|r| &r.resource))?;
        let count = rules.len();
        self.update(resource, |current| {
            Ok(ResourceRules {
                flow: current.flow.clone(),
                hotspot: current.hotspot.clone(),
                breakers: self.compile_breakers(current, rules)?,
            })
        })?;
        info!("更新熔断规则: resource={}, count={}", resource, count);
        Ok(())
    }

    /// 替换全局系统规则
    pub fn set_system_rules(&self, rules: Vec<SystemRule>) -> Result<(), FlowGateError> {
        for (index, rule) in rules.iter().enumerate() {
            rule.validate()
                .map_err(|e| FlowGateError::ConfigError(format!("系统规则[{}]: {}", index, e)))?;
        }
        let count = rules.len();
        *self.system.write() = Arc::new(rules);
        info!("更新系统规则: count={}", count);
        Ok(())
    }

    /// 加载整份规则配置
    ///
    /// 先编译全部规则，任何一条失败都不会改变当前生效的规则。
    /// 配置中没有出现的资源，其规则会被清空。
    #[instrument(skip_all, fields(version = %config.version))]
    pub fn load(&self, config: RuleConfig) -> Result<(), FlowGateError> {
        config.validate().map_err(FlowGateError::ConfigError)?;

        let mut grouped: HashMap<String, (Vec<FlowRule>, Vec<HotspotRule>, Vec<DegradeRule>)> =
            HashMap::new();
        for rule in config.flow_rules {
            grouped.entry(rule.resource.clone()).or_default().0.push(rule);
        }
        for rule in config.hotspot_rules {
            grouped.entry(rule.resource.clone()).or_default().1.push(rule);
        }
        for rule in config.degrade_rules {
            grouped.entry(rule.resource.clone()).or_default().2.push(rule);
        }

        let empty = ResourceRules::default();
        let mut compiled = Vec::with_capacity(grouped.len());
        for (resource, (flow, hotspot, degrade)) in grouped {
            let previous = self.rules(&resource);
            let previous = previous.as_deref().unwrap_or(&empty);
            let rules = ResourceRules {
                flow: Self::compile_flow(previous, flow)?,
                hotspot: Self::compile_hotspot(previous, hotspot)?,
                breakers: self.compile_breakers(previous, degrade)?,
            };
            compiled.push((resource, Arc::new(rules)));
        }

        let resource_count = compiled.len();
        let kept: ahash::AHashSet<&String> = compiled.iter().map(|(name, _)| name).collect();
        self.rules.retain(|name, _| kept.contains(name));
        for (resource, rules) in compiled {
            self.rules.insert(resource, rules);
        }
        *self.system.write() = Arc::new(config.system_rules);

        info!("加载规则配置完成: resources={}", resource_count);
        Ok(())
    }

    /// 导出当前生效的规则
    ///
    /// 资源按名称排序，导出结果可以直接通过 [`RuleStore::load`] 重新加载。
    pub fn export(&self) -> RuleConfig {
        let mut snapshot: Vec<(String, Arc<ResourceRules>)> = self
            .rules
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        snapshot.sort_by(|a, b| a.0.cmp(&b.0));

        let mut config = RuleConfig {
            version: RULE_CONFIG_VERSION.to_string(),
            system_rules: self.system_rules().as_ref().clone(),
            ..Default::default()
        };
        for (_, rules) in snapshot {
            config
                .flow_rules
                .extend(rules.flow.iter().map(|c| c.rule().clone()));
            config
                .hotspot_rules
                .extend(rules.hotspot.iter().map(|c| c.rule().clone()));
            config
                .degrade_rules
                .extend(rules.breakers.iter().map(|b| b.rule().clone()));
        }

        debug!("导出规则配置: rules={}", config.rule_count());
        config
    }

    /// 清空所有规则
    pub fn clear(&self) {
        self.rules.clear();
        *self.system.write() = Arc::new(Vec::new());
        info!("清空所有规则");
    }
}
