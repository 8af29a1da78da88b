//! 熔断器模块集成测试
//!
//! 测试熔断器的状态转换、单个探测请求、退避和状态变更监听。

use crate::common::*;
use flowgate::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

#[derive(Default)]
struct RecordingListener {
    transitions: Mutex<Vec<(CircuitState, CircuitState)>>,
    snapshots: Mutex<Vec<f64>>,
}

impl StateChangeListener for RecordingListener {
    fn on_transform_to_closed(&self, prev: CircuitState, _rule: &DegradeRule) {
        self.transitions.lock().push((prev, CircuitState::Closed));
    }

    fn on_transform_to_open(&self, prev: CircuitState, _rule: &DegradeRule, snapshot: Option<f64>) {
        self.transitions.lock().push((prev, CircuitState::Open));
        if let Some(value) = snapshot {
            self.snapshots.lock().push(value);
        }
    }

    fn on_transform_to_half_open(&self, prev: CircuitState, _rule: &DegradeRule) {
        self.transitions.lock().push((prev, CircuitState::HalfOpen));
    }
}

fn current_timeout(engine: &Engine, resource: &str) -> u64 {
    engine.rule_store().rules(resource).unwrap().breakers[0].current_timeout_ms()
}

/// 测试完整的熔断周期：关闭 → 打开 → 半开（单个探测）→ 关闭
#[test]
fn test_full_breaker_cycle() {
    let (clock, engine) = create_test_engine();
    let listener = Arc::new(RecordingListener::default());
    engine.add_state_change_listener(listener.clone());
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_count("db", 2)
                .with_min_request_amount(1)
                .with_retry_timeout_ms(1_000)],
        )
        .unwrap();

    for _ in 0..3 {
        assert!(run_call(&engine, &clock, "db", 1, true));
    }
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Open]);
    let result = engine.enter("db", EntryType::Outbound, 1, vec![]);
    assert_eq!(block_kind(result), Some("circuit_breaker"));

    clock.advance(Duration::from_millis(1_000));
    let probe = engine.enter("db", EntryType::Outbound, 1, vec![]).unwrap();
    assert!(probe.is_probe());
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::HalfOpen]);

    // 半开状态只允许一个探测请求
    let err = engine.enter("db", EntryType::Outbound, 1, vec![]).unwrap_err();
    match err.block_error() {
        Some(BlockError::CircuitBreaker { state, .. }) => {
            assert_eq!(*state, CircuitState::HalfOpen)
        }
        other => panic!("unexpected block: {:?}", other),
    }

    engine.complete(probe);
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Closed]);
    assert!(run_call(&engine, &clock, "db", 1, false));

    assert_eq!(
        *listener.transitions.lock(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
    assert_eq!(*listener.snapshots.lock(), vec![3.0]);
}

/// 测试请求数不足 min_request_amount 时不熔断
#[test]
fn test_min_request_amount_guard() {
    let (clock, engine) = create_test_engine();
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_ratio("db", 0.5).with_min_request_amount(5)],
        )
        .unwrap();

    for _ in 0..4 {
        assert!(run_call(&engine, &clock, "db", 1, true));
    }
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Closed]);
    assert!(run_call(&engine, &clock, "db", 1, true));
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Open]);
}

/// 测试慢调用比例熔断
#[test]
fn test_slow_request_ratio() {
    let (clock, engine) = create_test_engine();
    engine
        .set_degrade_rules(
            "api",
            vec![DegradeRule::slow_request_ratio("api", 50, 0.5).with_min_request_amount(4)],
        )
        .unwrap();

    // 2 / 4 慢调用，比例未超过阈值
    assert!(run_call(&engine, &clock, "api", 10, false));
    assert!(run_call(&engine, &clock, "api", 80, false));
    assert!(run_call(&engine, &clock, "api", 10, false));
    assert!(run_call(&engine, &clock, "api", 80, false));
    assert_eq!(engine.circuit_states("api"), vec![CircuitState::Closed]);

    assert!(run_call(&engine, &clock, "api", 90, false));
    assert_eq!(engine.circuit_states("api"), vec![CircuitState::Open]);
}

/// 测试探测失败时熔断时长翻倍并受上限约束，探测成功后复位
#[test]
fn test_doubling_backoff_with_cap() {
    let (clock, engine) = create_test_engine();
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_ratio("db", 0.5)
                .with_min_request_amount(2)
                .with_retry_timeout_ms(1_000)
                .with_doubling_backoff(3_000)],
        )
        .unwrap();

    assert!(run_call(&engine, &clock, "db", 0, true));
    assert!(run_call(&engine, &clock, "db", 0, true));
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Open]);
    assert_eq!(current_timeout(&engine, "db"), 1_000);

    clock.advance(Duration::from_millis(1_000));
    assert!(run_call(&engine, &clock, "db", 0, true));
    assert_eq!(current_timeout(&engine, "db"), 2_000);

    clock.advance(Duration::from_millis(1_999));
    assert!(!run_call(&engine, &clock, "db", 0, false));
    clock.advance(Duration::from_millis(1));
    assert!(run_call(&engine, &clock, "db", 0, true));
    assert_eq!(current_timeout(&engine, "db"), 3_000);

    clock.advance(Duration::from_millis(3_000));
    assert!(run_call(&engine, &clock, "db", 0, true));
    assert_eq!(current_timeout(&engine, "db"), 3_000);

    clock.advance(Duration::from_millis(3_000));
    assert!(run_call(&engine, &clock, "db", 0, false));
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Closed]);
    assert_eq!(current_timeout(&engine, "db"), 1_000);
}

/// 测试没有退避策略时熔断时长保持不变
#[test]
fn test_fixed_retry_timeout() {
    let (clock, engine) = create_test_engine();
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_count("db", 0)
                .with_min_request_amount(1)
                .with_retry_timeout_ms(500)],
        )
        .unwrap();

    assert!(run_call(&engine, &clock, "db", 0, true));
    for _ in 0..3 {
        clock.advance(Duration::from_millis(500));
        assert!(run_call(&engine, &clock, "db", 0, true));
        assert_eq!(current_timeout(&engine, "db"), 500);
    }
}

/// 测试探测请求被后续规则拦截时熔断器恢复打开状态，且时长不增长
#[test]
fn test_probe_blocked_by_later_rule_reverts_to_open() {
    let (clock, engine) = create_test_engine();
    let listener = Arc::new(RecordingListener::default());
    engine.add_state_change_listener(listener.clone());
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_count("db", 0)
                .with_min_request_amount(1)
                .with_retry_timeout_ms(1_000)
                .with_default_backoff()],
        )
        .unwrap();
    engine
        .set_hotspot_rules(
            "db",
            vec![HotspotRule::qps("db", 0, 100.0).with_exception("hot", 0.0)],
        )
        .unwrap();

    let mut token = engine
        .enter("db", EntryType::Outbound, 1, vec![ParamValue::from("cold")])
        .unwrap();
    let error = std::io::Error::new(std::io::ErrorKind::Other, "timeout");
    engine.trace_error(Some(&mut token), &error).unwrap();
    engine.complete(token);
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Open]);

    clock.advance(Duration::from_millis(1_000));
    let result = engine.enter("db", EntryType::Outbound, 1, vec![ParamValue::from("hot")]);
    assert_eq!(block_kind(result), Some("hotspot"));
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Open]);
    assert_eq!(current_timeout(&engine, "db"), 1_000);

    // 重新计时：熔断时长内仍然拦截
    let result = engine.enter("db", EntryType::Outbound, 1, vec![ParamValue::from("cold")]);
    assert_eq!(block_kind(result), Some("circuit_breaker"));

    clock.advance(Duration::from_millis(1_000));
    let probe = engine
        .enter("db", EntryType::Outbound, 1, vec![ParamValue::from("cold")])
        .unwrap();
    assert!(probe.is_probe());
    engine.complete(probe);
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Closed]);

    assert_eq!(
        *listener.transitions.lock(),
        vec![
            (CircuitState::Closed, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Open),
            (CircuitState::Open, CircuitState::HalfOpen),
            (CircuitState::HalfOpen, CircuitState::Closed),
        ]
    );
}

/// 测试探测请求的 token 被丢弃后，熔断器在一个熔断时长后重新放行探测请求
#[test]
fn test_dropped_trial_token_does_not_stall_breaker() {
    let (clock, engine) = create_test_engine();
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_count("db", 0)
                .with_min_request_amount(1)
                .with_retry_timeout_ms(1_000)],
        )
        .unwrap();

    assert!(run_call(&engine, &clock, "db", 0, true));
    clock.advance(Duration::from_millis(1_000));
    let probe = engine.enter("db", EntryType::Outbound, 1, vec![]).unwrap();
    assert!(probe.is_probe());
    drop(probe);

    clock.advance(Duration::from_millis(999));
    assert!(engine
        .try_enter("db", EntryType::Outbound, 1, vec![])
        .unwrap()
        .is_none());
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::HalfOpen]);

    clock.advance(Duration::from_millis(1));
    let probe = engine.enter("db", EntryType::Outbound, 1, vec![]).unwrap();
    assert!(probe.is_probe());
    engine.complete(probe);
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Closed]);

    // 只泄漏被丢弃 token 的权重
    assert_eq!(engine.snapshot("db").unwrap().concurrency, 1);
}

/// 测试统计周期结束后历史异常不再参与熔断判断
#[test]
fn test_stat_interval_expires_errors() {
    let (clock, engine) = create_test_engine();
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_count("db", 2)
                .with_min_request_amount(1)
                .with_stat_interval_ms(1_000)],
        )
        .unwrap();

    assert!(run_call(&engine, &clock, "db", 0, true));
    assert!(run_call(&engine, &clock, "db", 0, true));
    clock.advance(Duration::from_millis(1_000));
    assert!(run_call(&engine, &clock, "db", 0, true));
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Closed]);
}
