//! 端到端测试：受保护的服务
//!
//! 模拟一个同时配置了系统规则、流控、热点参数和熔断规则的入口服务，
//! 依次经历正常流量、突发流量、下游故障和恢复。

use crate::common::*;
use flowgate::prelude::*;
use std::fmt;
use std::time::Duration;

#[derive(Debug)]
enum ServiceError {
    Rejected(FlowGateError),
    Downstream(String),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceError::Rejected(e) => write!(f, "rejected: {}", e),
            ServiceError::Downstream(msg) => write!(f, "downstream: {}", msg),
        }
    }
}

impl std::error::Error for ServiceError {}

impl From<FlowGateError> for ServiceError {
    fn from(e: FlowGateError) -> Self {
        ServiceError::Rejected(e)
    }
}

fn rules() -> RuleConfig {
    RuleConfig {
        flow_rules: vec![FlowRule::qps("checkout", 20.0)],
        hotspot_rules: vec![HotspotRule::qps("checkout", 0, 3.0).with_exception("vip", 10.0)],
        degrade_rules: vec![DegradeRule::error_ratio("checkout", 0.5)
            .with_min_request_amount(4)
            .with_retry_timeout_ms(2_000)
            .with_doubling_backoff(8_000)],
        system_rules: vec![SystemRule {
            max_inbound_concurrency: Some(50),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn call(engine: &Engine, user: &str, fail: bool) -> Result<&'static str, ServiceError> {
    let mut token = engine.enter("checkout", EntryType::Inbound, 1, vec![ParamValue::from(user)])?;
    let result = if fail {
        Err(ServiceError::Downstream("payment gateway timeout".to_string()))
    } else {
        Ok("ok")
    };
    if let Err(e) = &result {
        engine.trace_error(Some(&mut token), e)?;
    }
    engine.complete(token);
    result
}

fn rejected_kind(result: &Result<&'static str, ServiceError>) -> Option<&'static str> {
    match result {
        Err(ServiceError::Rejected(e)) => e.block_error().map(|b| b.kind()),
        _ => None,
    }
}

/// 测试突发流量：热点用户先被限制，整体 QPS 再被限制
#[test]
fn test_burst_traffic() {
    let (_clock, engine) = create_test_engine();
    engine.load_rules(rules()).unwrap();

    let mut outcomes = Vec::new();
    for _ in 0..5 {
        outcomes.push(call(&engine, "alice", false));
    }
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 3);
    assert_eq!(rejected_kind(&outcomes[4]), Some("hotspot"));

    let vip_passed = (0..12).filter(|_| call(&engine, "vip", false).is_ok()).count();
    assert_eq!(vip_passed, 10);

    // 3 + 10 次通过后，剩余额度由其他用户分享
    let others: Vec<_> = (0..10).map(|i| call(&engine, &format!("user-{}", i), false)).collect();
    assert_eq!(others.iter().filter(|r| r.is_ok()).count(), 7);
    assert_eq!(rejected_kind(&others[9]), Some("flow"));

    let snapshot = engine.snapshot("checkout").unwrap();
    assert_eq!(snapshot.total_pass, 20);
    assert_eq!(engine.inbound_snapshot().unwrap().total_pass, 20);
}

/// 测试下游故障：熔断、探测失败退避、最终恢复
#[test]
fn test_downstream_outage_and_recovery() {
    let (clock, engine) = create_test_engine();
    engine.load_rules(rules()).unwrap();

    for i in 0..4 {
        let result = call(&engine, &format!("user-{}", i), true);
        assert!(matches!(result, Err(ServiceError::Downstream(_))));
    }
    assert_eq!(engine.circuit_states("checkout"), vec![CircuitState::Open]);
    assert_eq!(
        rejected_kind(&call(&engine, "user-9", false)),
        Some("circuit_breaker")
    );

    // 第一次探测失败，熔断时长翻倍
    clock.advance(Duration::from_millis(2_000));
    assert!(matches!(
        call(&engine, "user-1", true),
        Err(ServiceError::Downstream(_))
    ));
    clock.advance(Duration::from_millis(2_000));
    assert_eq!(
        rejected_kind(&call(&engine, "user-1", false)),
        Some("circuit_breaker")
    );

    clock.advance(Duration::from_millis(2_000));
    assert_eq!(call(&engine, "user-1", false).unwrap(), "ok");
    assert_eq!(engine.circuit_states("checkout"), vec![CircuitState::Closed]);

    let snapshot = engine.snapshot("checkout").unwrap();
    assert_eq!(snapshot.total_error, 5);
    assert_eq!(snapshot.concurrency, 0);
    assert_eq!(snapshot.circuit_states, vec![CircuitState::Closed]);
}

/// 测试 execute 包装：被拦截的错误转换为业务错误类型
#[test]
fn test_execute_with_service_error() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules("report", vec![FlowRule::qps("report", 1.0)])
        .unwrap();

    let first: Result<u32, ServiceError> = engine.execute("report", EntryType::Outbound, || Ok(7));
    assert_eq!(first.unwrap(), 7);

    let second: Result<u32, ServiceError> =
        engine.execute("report", EntryType::Outbound, || Ok(8));
    assert!(matches!(second, Err(ServiceError::Rejected(ref e)) if e.is_blocked()));
}

/// 测试快照可以序列化为 JSON
#[test]
fn test_snapshot_serializes() {
    let (_clock, engine) = create_test_engine();
    engine.load_rules(rules()).unwrap();
    call(&engine, "alice", false).unwrap();

    let json = serde_json::to_value(engine.snapshots()).unwrap();
    assert_eq!(json[0]["resource"], "checkout");
    assert_eq!(json[0]["total_pass"], 1);
    assert_eq!(json[0]["circuit_states"][0], "Closed");
}
