//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! 准入引擎
//!
//! [`Engine`] 负责 entry / exit 调用包围协议：
//!
//! 1. `enter` 依次评估熔断器 → 系统规则（仅入口流量）→ 流控规则 → 热点参数规则，
//!    第一个拦截的规则生效
//! 2. 通过时增加并发数和通过计数并返回 [`EntryToken`]，拦截时只增加拦截计数
//! 3. 业务逻辑出错时调用 `trace_error` 记录异常
//! 4. `exit` 使用与 `enter` 相同的 count 和参数，减少并发数并记录响应时间和结果，
//!    返回的 [`ExitedEntry`] 可以补记退出之后才发现的异常
//!
//! 评估过程中占用的名额（半开熔断器的探测资格、并发数、匀速排队预约）在调用
//! 被拦截或排队期间被取消时全部归还。
//!
//! # 示例
//!
//! ```rust
//! use flowgate::prelude::*;
//!
//! let engine = Engine::new();
//! engine
//!     .set_flow_rules("HelloWorld", vec![FlowRule::qps("HelloWorld", 1.0)])
//!     .unwrap();
//!
//! let token = engine
//!     .enter("HelloWorld", EntryType::Inbound, 1, vec![])
//!     .unwrap();
//! assert!(engine
//!     .enter("HelloWorld", EntryType::Inbound, 1, vec![])
//!     .unwrap_err()
//!     .is_blocked());
//! engine.complete(token);
//! ```

use crate::circuit_breaker::{BreakerDecision, CircuitBreaker, ListenerSet, StateChangeListener};
use crate::clock::{Clock, SystemClock};
use crate::config::{EngineConfig, RuleConfig};
use crate::constants::{DEFAULT_ENTRY_COUNT, INBOUND_NODE_NAME, MAX_ENTRY_COUNT};
use crate::error::{BlockError, CircuitState, FlowGateError, SystemMetric};
use crate::flow::{self, FlowController, FlowDecision, PacingSlot};
use crate::hotspot::{ParamCounter, ParamDecision};
use crate::node::{NodeRegistry, NodeSnapshot, ResourceNode};
use crate::rule_store::{ResourceRules, RuleStore};
use crate::rules::{
    DegradeRule, EntryType, FlowGrade, FlowRule, HotspotRule, ParamValue, SystemRule,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, trace};

/// 一次通过准入的调用
///
/// 只能由 `enter` 创建，必须交还给 `exit` / `complete`。
/// 丢弃而不退出会使该资源的并发数永久多出 `count`；若它是探测请求，
/// 熔断器在一个熔断时长后重新放行探测请求。
#[must_use = "EntryToken 必须通过 exit 或 complete 退出，否则并发数会泄漏"]
#[derive(Debug)]
pub struct EntryToken {
    node: Arc<ResourceNode>,
    inbound: Option<Arc<ResourceNode>>,
    rules: Option<Arc<ResourceRules>>,
    resource: String,
    entry_type: EntryType,
    created_at_ms: u64,
    count: u32,
    args: Vec<ParamValue>,
    error: Option<String>,
    /// 本次调用作为探测请求的熔断器
    probes: Vec<Arc<CircuitBreaker>>,
}

impl EntryToken {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn entry_type(&self) -> EntryType {
        self.entry_type
    }

    /// 通过准入的时间（毫秒）
    pub fn created_at_ms(&self) -> u64 {
        self.created_at_ms
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn args(&self) -> &[ParamValue] {
        &self.args
    }

    /// 是否已记录业务异常
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// 是否为半开熔断器的探测请求
    pub fn is_probe(&self) -> bool {
        !self.probes.is_empty()
    }
}

/// 已经退出的调用
///
/// 由 [`Engine::exit`] / [`Engine::complete`] 返回。退出之后才发现的业务异常
/// 通过 [`Engine::trace_exited_error`] 补记，不影响并发数。
#[derive(Debug)]
pub struct ExitedEntry {
    node: Arc<ResourceNode>,
    inbound: Option<Arc<ResourceNode>>,
    rules: Option<Arc<ResourceRules>>,
    resource: String,
    count: u32,
    error_traced: bool,
}

impl ExitedEntry {
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// 是否已记录过业务异常（退出前或退出后）
    pub fn has_error(&self) -> bool {
        self.error_traced
    }
}

/// 评估过程中已经占用的名额
///
/// 调用被拦截，或在排队等待期间被取消（异步 future 被丢弃）时，析构会归还全部名额。
struct Reservations {
    clock: Arc<dyn Clock>,
    /// 本次调用作为探测请求的熔断器
    probes: Vec<Arc<CircuitBreaker>>,
    concurrency: Vec<(Arc<ResourceNode>, u64)>,
    params: Vec<(Arc<ParamCounter>, u64)>,
    pacing: Vec<(Arc<FlowController>, PacingSlot)>,
}

impl Reservations {
    fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            probes: Vec::new(),
            concurrency: Vec::new(),
            params: Vec::new(),
            pacing: Vec::new(),
        }
    }

    fn holds_concurrency(&self, node: &Arc<ResourceNode>) -> bool {
        self.concurrency
            .iter()
            .any(|(reserved, _)| Arc::ptr_eq(reserved, node))
    }

    fn is_empty(&self) -> bool {
        self.probes.is_empty()
            && self.concurrency.is_empty()
            && self.params.is_empty()
            && self.pacing.is_empty()
    }

    /// 调用通过，名额转交给 token，返回探测请求对应的熔断器
    fn commit(mut self) -> Vec<Arc<CircuitBreaker>> {
        self.concurrency.clear();
        self.params.clear();
        self.pacing.clear();
        std::mem::take(&mut self.probes)
    }

    fn release(&mut self) {
        if self.is_empty() {
            return;
        }

        let now = self.clock.now_ms();
        for breaker in self.probes.drain(..) {
            breaker.on_probe_blocked(now);
        }
        for (node, count) in self.concurrency.drain(..) {
            node.decrease_concurrency(count);
        }
        for (counter, count) in self.params.drain(..) {
            counter.release(count);
        }
        for (controller, slot) in self.pacing.drain(..) {
            controller.cancel_pacing(&slot);
        }
    }
}

impl Drop for Reservations {
    fn drop(&mut self) {
        self.release();
    }
}

/// 评估通过、尚未计数的调用
struct Pending {
    node: Arc<ResourceNode>,
    inbound: Option<Arc<ResourceNode>>,
    rules: Option<Arc<ResourceRules>>,
    resource: String,
    entry_type: EntryType,
    count: u32,
    args: Vec<ParamValue>,
    reservations: Reservations,
}

enum Evaluation {
    Admit {
        pending: Pending,
        wait: Option<Duration>,
    },
    Block(BlockError),
}

/// 准入引擎
pub struct Engine {
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    nodes: NodeRegistry,
    rules: RuleStore,
    listeners: ListenerSet,
}

impl Engine {
    /// 使用系统时钟和默认统计配置创建引擎
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock::new()))
    }

    /// 使用指定时钟创建引擎
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self::build(clock, EngineConfig::default())
    }

    /// 使用指定时钟和统计配置创建引擎
    ///
    /// # 返回
    /// - `Err(FlowGateError::ConfigError)`: 统计窗口配置不合法
    pub fn with_config(clock: Arc<dyn Clock>, config: EngineConfig) -> Result<Self, FlowGateError> {
        config.validate().map_err(FlowGateError::ConfigError)?;
        Ok(Self::build(clock, config))
    }

    fn build(clock: Arc<dyn Clock>, config: EngineConfig) -> Self {
        let listeners = ListenerSet::default();
        info!(
            "创建准入引擎: window_length_ms={}, bucket_count={}",
            config.window_length_ms, config.bucket_count
        );
        Self {
            clock,
            config,
            nodes: NodeRegistry::new(config),
            rules: RuleStore::new(listeners.clone()),
            listeners,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// 规则存储
    pub fn rule_store(&self) -> &RuleStore {
        &self.rules
    }

    /// 申请进入资源
    ///
    /// # 参数
    /// - `resource`: 资源名
    /// - `entry_type`: 流量类型，系统规则只评估 `Inbound`
    /// - `count`: 本次调用的权重（至少为 1）
    /// - `args`: 调用参数，热点参数规则按位置读取
    ///
    /// # 返回
    /// - `Ok(EntryToken)`: 通过
    /// - `Err(FlowGateError::Blocked)`: 被规则拦截
    /// - `Err(FlowGateError::InvalidArgument)`: 资源名为空或 count 不合法
    ///
    /// 匀速排队规则需要等待时，当前线程通过时钟休眠，最长不超过规则的最大排队时间。
    pub fn enter(
        &self,
        resource: &str,
        entry_type: EntryType,
        count: u32,
        args: Vec<ParamValue>,
    ) -> Result<EntryToken, FlowGateError> {
        match self.evaluate(resource, entry_type, count, args)? {
            Evaluation::Admit { pending, wait } => {
                if let Some(wait) = wait {
                    trace!("排队等待: resource={}, wait={:?}", resource, wait);
                    self.clock.sleep(wait);
                }
                self.admit(pending)
            }
            Evaluation::Block(error) => Err(FlowGateError::Blocked(error)),
        }
    }

    /// 申请进入资源，拦截时返回 `Ok(None)`
    ///
    /// 与 [`Engine::enter`] 使用相同的评估和计数逻辑。
    pub fn try_enter(
        &self,
        resource: &str,
        entry_type: EntryType,
        count: u32,
        args: Vec<ParamValue>,
    ) -> Result<Option<EntryToken>, FlowGateError> {
        match self.enter(resource, entry_type, count, args) {
            Ok(token) => Ok(Some(token)),
            Err(FlowGateError::Blocked(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// 异步申请进入资源
    ///
    /// 匀速排队的等待通过 `tokio::time::sleep` 完成，不阻塞线程。
    #[cfg(feature = "tokio")]
    pub async fn enter_async(
        &self,
        resource: &str,
        entry_type: EntryType,
        count: u32,
        args: Vec<ParamValue>,
    ) -> Result<EntryToken, FlowGateError> {
        match self.evaluate(resource, entry_type, count, args)? {
            Evaluation::Admit { pending, wait } => {
                if let Some(wait) = wait {
                    trace!("排队等待: resource={}, wait={:?}", resource, wait);
                    tokio::time::sleep(wait).await;
                }
                self.admit(pending)
            }
            Evaluation::Block(error) => Err(FlowGateError::Blocked(error)),
        }
    }

    fn check_arguments(resource: &str, count: u32) -> Result<(), FlowGateError> {
        if resource.is_empty() {
            return Err(FlowGateError::InvalidArgument("资源名不能为空".to_string()));
        }
        if resource == INBOUND_NODE_NAME {
            return Err(FlowGateError::InvalidArgument(format!(
                "资源名 {} 为保留名称",
                INBOUND_NODE_NAME
            )));
        }
        if count == 0 || count > MAX_ENTRY_COUNT {
            return Err(FlowGateError::InvalidArgument(format!(
                "count 必须在 1..={} 之间: {}",
                MAX_ENTRY_COUNT, count
            )));
        }
        Ok(())
    }

    fn evaluate(
        &self,
        resource: &str,
        entry_type: EntryType,
        count: u32,
        args: Vec<ParamValue>,
    ) -> Result<Evaluation, FlowGateError> {
        Self::check_arguments(resource, count)?;

        let now = self.clock.now_ms();
        let node = self.nodes.get_or_create(resource)?;
        let inbound = match entry_type {
            EntryType::Inbound => Some(self.nodes.get_or_create(INBOUND_NODE_NAME)?),
            EntryType::Outbound => None,
        };
        let rules = self.rules.rules(resource);

        let mut pending = Pending {
            node,
            inbound,
            rules,
            resource: resource.to_string(),
            entry_type,
            count,
            args,
            reservations: Reservations::new(Arc::clone(&self.clock)),
        };

        let (wait, blocked) = self.check_rules(&mut pending, now)?;
        if let Some(error) = blocked {
            self.on_block(&mut pending, now, &error);
            return Ok(Evaluation::Block(error));
        }

        Ok(Evaluation::Admit { pending, wait })
    }

    /// 按顺序评估所有规则
    fn check_rules(
        &self,
        pending: &mut Pending,
        now: u64,
    ) -> Result<(Option<Duration>, Option<BlockError>), FlowGateError> {
        let resource = &pending.resource;
        let count = pending.count;
        let empty = ResourceRules::default();
        let rules = pending.rules.as_deref().unwrap_or(&empty);

        for breaker in &rules.breakers {
            match breaker.try_pass(now) {
                BreakerDecision::Pass => {}
                BreakerDecision::Probe => pending.reservations.probes.push(Arc::clone(breaker)),
                BreakerDecision::Block(state) => {
                    return Ok((
                        None,
                        Some(BlockError::CircuitBreaker {
                            resource: resource.clone(),
                            rule: breaker.rule().clone(),
                            state,
                        }),
                    ));
                }
            }
        }

        if let Some(inbound) = &pending.inbound {
            if let Some(error) =
                self.check_system(resource, inbound, now, count, &mut pending.reservations)
            {
                return Ok((None, Some(error)));
            }
        }

        let mut wait: Option<Duration> = None;
        let mut concurrency_checked = false;
        for controller in &rules.flow {
            if controller.rule().grade == FlowGrade::Concurrency {
                if concurrency_checked {
                    continue;
                }
                concurrency_checked = true;
                match flow::acquire_concurrency(&rules.flow, &pending.node, count) {
                    Ok(true) => pending
                        .reservations
                        .concurrency
                        .push((Arc::clone(&pending.node), count as u64)),
                    Ok(false) => {}
                    Err(violated) => {
                        return Ok((
                            None,
                            Some(BlockError::Flow {
                                resource: resource.clone(),
                                rule: violated.rule().clone(),
                            }),
                        ));
                    }
                }
                continue;
            }

            match controller.check(&pending.node, now, count) {
                FlowDecision::Pass => {}
                FlowDecision::Paced(slot) => {
                    let duration = slot.wait();
                    if !duration.is_zero() {
                        wait = Some(wait.map_or(duration, |current| current.max(duration)));
                    }
                    pending
                        .reservations
                        .pacing
                        .push((Arc::clone(controller), slot));
                }
                FlowDecision::Block => {
                    return Ok((
                        None,
                        Some(BlockError::Flow {
                            resource: resource.clone(),
                            rule: controller.rule().clone(),
                        }),
                    ));
                }
            }
        }

        for checker in &rules.hotspot {
            match checker.try_acquire(now, count, &pending.args)? {
                ParamDecision::Pass => {}
                ParamDecision::Acquired(counter) => {
                    pending.reservations.params.push((counter, count as u64))
                }
                ParamDecision::Block(value) => {
                    return Ok((
                        None,
                        Some(BlockError::Hotspot {
                            resource: resource.clone(),
                            rule: checker.rule().clone(),
                            value: value.clone(),
                        }),
                    ));
                }
            }
        }

        Ok((wait, None))
    }

    /// 系统规则：入口 QPS 和平均响应时间按规则顺序检查，入口并发数在汇总节点上原子占用
    fn check_system(
        &self,
        resource: &str,
        inbound: &Arc<ResourceNode>,
        now: u64,
        count: u32,
        reservations: &mut Reservations,
    ) -> Option<BlockError> {
        let system_rules = self.rules.system_rules();
        let acquire = count as f64;
        let blocked = |rule: &SystemRule, metric: SystemMetric| BlockError::System {
            resource: resource.to_string(),
            rule: rule.clone(),
            metric,
        };

        for rule in system_rules.iter() {
            if rule
                .max_inbound_qps
                .is_some_and(|max| inbound.pass_qps(now) + acquire > max)
            {
                return Some(blocked(rule, SystemMetric::InboundQps));
            }
            if rule
                .max_avg_rt_ms
                .is_some_and(|max| inbound.avg_rt(now) > max as f64)
            {
                return Some(blocked(rule, SystemMetric::InboundAvgRt));
            }
        }

        let ceiling = system_rules
            .iter()
            .filter_map(|rule| rule.max_inbound_concurrency)
            .min()?;
        match inbound.try_increase_concurrency(count as u64, ceiling as f64) {
            Ok(()) => {
                reservations
                    .concurrency
                    .push((Arc::clone(inbound), count as u64));
                None
            }
            Err(current) => {
                let wanted = current.saturating_add(count as u64);
                system_rules
                    .iter()
                    .find(|rule| rule.max_inbound_concurrency.is_some_and(|max| wanted > max))
                    .map(|rule| blocked(rule, SystemMetric::InboundConcurrency))
            }
        }
    }

    fn on_block(&self, pending: &mut Pending, now: u64, error: &BlockError) {
        pending.reservations.release();

        let count = pending.count as u64;
        pending.node.add_block(now, count);
        if let Some(inbound) = &pending.inbound {
            inbound.add_block(now, count);
        }

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = crate::telemetry::try_global() {
            metrics.record_block(&pending.resource, error.kind(), pending.count);
        }

        debug!("请求被拦截: {}", error);
    }

    /// 通过：计数并生成 token
    fn admit(&self, pending: Pending) -> Result<EntryToken, FlowGateError> {
        let now = self.clock.now_ms();
        let count = pending.count as u64;

        if let Some(rules) = &pending.rules {
            for checker in &rules.hotspot {
                checker.on_pass(now, pending.count, &pending.args)?;
            }
        }

        if !pending.reservations.holds_concurrency(&pending.node) {
            pending.node.increase_concurrency(count);
        }
        pending.node.add_pass(now, count);
        if let Some(inbound) = &pending.inbound {
            if !pending.reservations.holds_concurrency(inbound) {
                inbound.increase_concurrency(count);
            }
            inbound.add_pass(now, count);
        }
        let probes = pending.reservations.commit();

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = crate::telemetry::try_global() {
            metrics.record_pass(&pending.resource, pending.count);
        }

        trace!(
            "请求通过: resource={}, count={}, probe={}",
            pending.resource,
            pending.count,
            !probes.is_empty()
        );

        Ok(EntryToken {
            node: pending.node,
            inbound: pending.inbound,
            rules: pending.rules,
            resource: pending.resource,
            entry_type: pending.entry_type,
            created_at_ms: now,
            count: pending.count,
            args: pending.args,
            error: None,
            probes,
        })
    }

    /// 退出资源
    ///
    /// `count` 和 `args` 应与 `enter` 时一致。引擎不校验二者是否匹配：
    /// 不一致时并发数和热点参数计数会产生偏差（最小为 0）。
    pub fn exit(&self, token: EntryToken, count: u32, args: &[ParamValue]) -> ExitedEntry {
        let now = self.clock.now_ms();
        let rt = now.saturating_sub(token.created_at_ms);
        let weight = count as u64;

        token.node.add_completion(now, rt, weight);
        token.node.decrease_concurrency(weight);
        if let Some(inbound) = &token.inbound {
            inbound.add_completion(now, rt, weight);
            inbound.decrease_concurrency(weight);
        }

        if let Some(rules) = &token.rules {
            for checker in &rules.hotspot {
                checker.on_exit(count, args);
            }
            for breaker in &rules.breakers {
                let is_probe = token.probes.iter().any(|probe| Arc::ptr_eq(probe, breaker));
                breaker.on_complete(now, rt, token.error.is_some(), is_probe);
            }
        }

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = crate::telemetry::try_global() {
            metrics.record_exit(&token.resource, count, rt);
        }

        trace!(
            "请求退出: resource={}, count={}, rt_ms={}, error={}",
            token.resource,
            count,
            rt,
            token.error.is_some()
        );

        ExitedEntry {
            error_traced: token.error.is_some(),
            node: token.node,
            inbound: token.inbound,
            rules: token.rules,
            resource: token.resource,
            count: token.count,
        }
    }

    /// 使用 token 自身的 count 和参数退出
    pub fn complete(&self, mut token: EntryToken) -> ExitedEntry {
        let count = token.count;
        let args = std::mem::take(&mut token.args);
        self.exit(token, count, &args)
    }

    /// 记录业务异常
    ///
    /// 立即计入资源节点的异常数，并标记 token，退出时熔断器把本次调用视为失败。
    /// 同一个 token 只计数一次。
    ///
    /// # 返回
    /// - `Err(FlowGateError::InvalidArgument)`: token 为空
    pub fn trace_error(
        &self,
        token: Option<&mut EntryToken>,
        error: &dyn std::error::Error,
    ) -> Result<(), FlowGateError> {
        let token = token.ok_or_else(|| {
            FlowGateError::InvalidArgument("trace_error 需要有效的 EntryToken".to_string())
        })?;
        if token.error.is_some() {
            return Ok(());
        }

        let now = self.clock.now_ms();
        let weight = token.count as u64;
        token.node.add_error(now, weight);
        if let Some(inbound) = &token.inbound {
            inbound.add_error(now, weight);
        }
        token.error = Some(error.to_string());

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = crate::telemetry::try_global() {
            metrics.record_error(&token.resource, token.count);
        }

        debug!("记录业务异常: resource={}, error={}", token.resource, error);
        Ok(())
    }

    /// 补记退出之后才发现的业务异常
    ///
    /// 计入资源节点的异常数，并计入各熔断器的统计窗口（关闭状态下可能因此熔断）。
    /// 并发数不变；同一次调用只计数一次，退出前已经记录过时直接返回。
    pub fn trace_exited_error(&self, exited: &mut ExitedEntry, error: &dyn std::error::Error) {
        if exited.error_traced {
            return;
        }

        let now = self.clock.now_ms();
        let weight = exited.count as u64;
        exited.node.add_error(now, weight);
        if let Some(inbound) = &exited.inbound {
            inbound.add_error(now, weight);
        }
        if let Some(rules) = &exited.rules {
            for breaker in &rules.breakers {
                breaker.record_error(now);
            }
        }
        exited.error_traced = true;

        #[cfg(feature = "monitoring")]
        if let Some(metrics) = crate::telemetry::try_global() {
            metrics.record_error(&exited.resource, exited.count);
        }

        debug!(
            "补记退出后的业务异常: resource={}, error={}",
            exited.resource, error
        );
    }

    /// 在资源保护下执行操作
    ///
    /// 自动完成 enter、异常记录和 exit。被拦截时返回由 [`FlowGateError::Blocked`] 转换的错误。
    ///
    /// # 示例
    /// ```rust
    /// use flowgate::prelude::*;
    ///
    /// let engine = Engine::new();
    /// let value = engine
    ///     .execute("query", EntryType::Outbound, || Ok::<_, FlowGateError>(42))
    ///     .unwrap();
    /// assert_eq!(value, 42);
    /// ```
    pub fn execute<T, E, F>(&self, resource: &str, entry_type: EntryType, operation: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: std::error::Error + From<FlowGateError>,
    {
        let mut token = self.enter(resource, entry_type, DEFAULT_ENTRY_COUNT, Vec::new())?;
        let result = operation();
        if let Err(e) = &result {
            self.trace_error(Some(&mut token), e)?;
        }
        self.complete(token);
        result
    }

    /// 资源的只读快照，资源从未被访问时返回 `None`
    pub fn snapshot(&self, resource: &str) -> Option<NodeSnapshot> {
        if resource == INBOUND_NODE_NAME {
            return None;
        }
        let node = self.nodes.get(resource)?;
        let mut snapshot = node.snapshot(self.clock.now_ms());
        snapshot.circuit_states = self.circuit_states(resource);
        Some(snapshot)
    }

    /// 所有资源的快照（按资源名排序，不含入口节点）
    pub fn snapshots(&self) -> Vec<NodeSnapshot> {
        let now = self.clock.now_ms();
        let mut snapshots: Vec<NodeSnapshot> = self
            .nodes
            .all()
            .into_iter()
            .filter(|node| node.resource() != INBOUND_NODE_NAME)
            .map(|node| {
                let mut snapshot = node.snapshot(now);
                snapshot.circuit_states = self.circuit_states(node.resource());
                snapshot
            })
            .collect();
        snapshots.sort_by(|a, b| a.resource.cmp(&b.resource));
        snapshots
    }

    /// 入口流量汇总节点的快照，还没有入口流量时返回 `None`
    pub fn inbound_snapshot(&self) -> Option<NodeSnapshot> {
        self.nodes
            .get(INBOUND_NODE_NAME)
            .map(|node| node.snapshot(self.clock.now_ms()))
    }

    /// 资源各熔断器的状态（按熔断规则顺序）
    pub fn circuit_states(&self, resource: &str) -> Vec<CircuitState> {
        self.rules
            .rules(resource)
            .map(|rules| rules.breakers.iter().map(|b| b.state()).collect())
            .unwrap_or_default()
    }

    /// 添加熔断器状态变更监听器
    pub fn add_state_change_listener(&self, listener: Arc<dyn StateChangeListener>) {
        self.listeners.add(listener);
    }

    /// 替换资源的流控规则
    pub fn set_flow_rules(&self, resource: &str, rules: Vec<FlowRule>) -> Result<(), FlowGateError> {
        self.rules.set_flow_rules(resource, rules)
    }

    /// 替换资源的热点参数规则
    pub fn set_hotspot_rules(
        &self,
        resource: &str,
        rules: Vec<HotspotRule>,
    ) -> Result<(), FlowGateError> {
        self.rules.set_hotspot_rules(resource, rules)
    }

    /// 替换资源的熔断规则
    pub fn set_degrade_rules(
        &self,
        resource: &str,
        rules: Vec<DegradeRule>,
    ) -> Result<(), FlowGateError> {
        self.rules.set_degrade_rules(resource, rules)
    }

    /// 替换全局系统规则
    pub fn set_system_rules(&self, rules: Vec<SystemRule>) -> Result<(), FlowGateError> {
        self.rules.set_system_rules(rules)
    }

    /// 加载整份规则配置
    pub fn load_rules(&self, config: RuleConfig) -> Result<(), FlowGateError> {
        self.rules.load(config)
    }

    /// 导出当前生效的规则
    pub fn export_rules(&self) -> RuleConfig {
        self.rules.export()
    }

    /// 从文件加载规则配置
    ///
    /// 支持 `yaml`/`yml`、`toml`、`json`。
    #[instrument(skip(self, path), fields(path = %path.as_ref().display()))]
    pub fn load_rules_from_file(&self, path: impl AsRef<Path>) -> Result<(), FlowGateError> {
        let config = RuleConfig::from_file(path.as_ref())?;
        let current = self.export_rules();
        if config.is_same_as(&current) {
            debug!("规则配置内容无变化，跳过加载");
            return Ok(());
        }

        let changes = config.diff_changes(&current);
        self.load_rules(config)?;
        info!("规则配置已更新: {:?}", changes);
        Ok(())
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
