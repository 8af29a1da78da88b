//! 规则存储模块集成测试
//!
//! 测试规则替换、整体加载、导出和运行时状态的保留。

use crate::common::*;
use flowgate::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn full_config() -> RuleConfig {
    RuleConfig {
        flow_rules: vec![
            FlowRule::qps("orders", 10.0),
            FlowRule::qps("search", 50.0).warm_up(5),
            FlowRule::concurrency("db", 8.0),
        ],
        hotspot_rules: vec![HotspotRule::qps("search", 0, 3.0).with_exception("vip", 20.0)],
        degrade_rules: vec![DegradeRule::error_ratio("db", 0.4).with_default_backoff()],
        system_rules: vec![SystemRule {
            max_inbound_qps: Some(500.0),
            max_avg_rt_ms: Some(200),
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// 测试导出的规则重新加载后得到相同的配置
#[test]
fn test_export_reload_round_trip() {
    let (_clock, engine) = create_test_engine();
    engine.load_rules(full_config()).unwrap();
    let exported = engine.export_rules();
    assert_eq!(exported.rule_count(), full_config().rule_count());

    let (_clock, other) = create_test_engine();
    other.load_rules(exported.clone()).unwrap();
    assert_eq!(other.export_rules(), exported);
    assert!(other.export_rules().is_same_as(&exported));
}

/// 测试加载配置会清空配置中没有出现的资源
#[test]
fn test_load_replaces_absent_resources() {
    let (_clock, engine) = create_test_engine();
    engine.load_rules(full_config()).unwrap();
    engine
        .set_flow_rules("legacy", vec![FlowRule::qps("legacy", 0.0)])
        .unwrap();
    assert!(engine.rule_store().rules("legacy").is_some());

    engine.load_rules(full_config()).unwrap();
    assert!(engine.rule_store().rules("legacy").is_none());
    assert_eq!(pass_count(&engine, "legacy", vec![], 3), 3);
}

/// 测试非法配置不会改变当前生效的规则
#[test]
fn test_invalid_load_keeps_previous_rules() {
    let (_clock, engine) = create_test_engine();
    engine.load_rules(full_config()).unwrap();
    let before = engine.export_rules();

    let mut broken = full_config();
    broken.flow_rules = vec![FlowRule::qps("orders", 1.0)];
    broken
        .degrade_rules
        .push(DegradeRule::error_ratio("db", 1.5));
    assert!(engine.load_rules(broken).is_err());

    assert_eq!(engine.export_rules(), before);
}

/// 测试规则资源名与目标资源不一致时拒绝
#[test]
fn test_mismatched_resource_rejected() {
    let (_clock, engine) = create_test_engine();
    let result = engine.set_flow_rules("orders", vec![FlowRule::qps("payments", 1.0)]);
    assert!(matches!(result, Err(FlowGateError::InvalidArgument(_))));
    assert!(engine.rule_store().rules("orders").is_none());
}

/// 测试替换为相同规则时保留熔断状态
#[test]
fn test_identical_rules_keep_breaker_state() {
    let (clock, engine) = create_test_engine();
    let rule = DegradeRule::error_count("db", 0).with_min_request_amount(1);
    engine.set_degrade_rules("db", vec![rule.clone()]).unwrap();
    assert!(run_call(&engine, &clock, "db", 0, true));
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Open]);

    // 同时修改其他类型的规则，熔断器不受影响
    engine
        .set_flow_rules("db", vec![FlowRule::qps("db", 100.0)])
        .unwrap();
    engine.set_degrade_rules("db", vec![rule]).unwrap();
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Open]);

    // 修改后的规则重新编译，状态从关闭开始
    engine
        .set_degrade_rules(
            "db",
            vec![DegradeRule::error_count("db", 1).with_min_request_amount(1)],
        )
        .unwrap();
    assert_eq!(engine.circuit_states("db"), vec![CircuitState::Closed]);
}

/// 测试清空某类规则后资源不再受限
#[test]
fn test_clear_rules_for_resource() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules("orders", vec![FlowRule::qps("orders", 0.0)])
        .unwrap();
    assert_eq!(pass_count(&engine, "orders", vec![], 2), 0);

    engine.set_flow_rules("orders", vec![]).unwrap();
    assert!(engine.rule_store().rules("orders").is_none());
    assert_eq!(pass_count(&engine, "orders", vec![], 2), 2);
}

/// 每一代规则由多条阈值相同的流控规则组成
fn generation(threshold: f64) -> Vec<FlowRule> {
    vec![
        FlowRule::concurrency("orders", threshold),
        FlowRule::qps("orders", threshold),
        FlowRule::concurrency("orders", threshold),
        FlowRule::qps("orders", threshold),
    ]
}

/// 测试并发评估期间替换规则：读到的规则快照只包含同一代规则
#[test]
fn test_rule_swap_during_concurrent_entries() {
    let engine = Arc::new(Engine::with_clock(Arc::new(FrozenClock(START_MS))));
    engine.set_flow_rules("orders", generation(1_000.0)).unwrap();
    let swapping = Arc::new(AtomicBool::new(true));

    let entrants: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..500 {
                    match engine.try_enter("orders", EntryType::Outbound, 1, vec![]) {
                        Ok(Some(token)) => {
                            engine.complete(token);
                        }
                        Ok(None) => {}
                        Err(e) => panic!("unexpected error: {}", e),
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..2)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let swapping = Arc::clone(&swapping);
            thread::spawn(move || {
                let mut reads = 0u64;
                while swapping.load(Ordering::Acquire) || reads == 0 {
                    let rules = engine.rule_store().rules("orders").unwrap();
                    assert_eq!(rules.flow.len(), 4);
                    let first = rules.flow[0].rule().threshold;
                    assert!(
                        rules.flow.iter().all(|c| c.rule().threshold == first),
                        "mixed generations: {:?}",
                        rules.flow.iter().map(|c| c.rule().threshold).collect::<Vec<_>>()
                    );
                    reads += 1;
                }
            })
        })
        .collect();

    for round in 0..200 {
        let threshold = if round % 2 == 0 { 5.0 } else { 1_000.0 + round as f64 };
        engine.set_flow_rules("orders", generation(threshold)).unwrap();
        if round % 50 == 0 {
            thread::sleep(Duration::from_millis(1));
        }
    }
    swapping.store(false, Ordering::Release);

    for worker in entrants.into_iter().chain(readers) {
        worker.join().unwrap();
    }

    let snapshot = engine.snapshot("orders").unwrap();
    assert_eq!(snapshot.concurrency, 0);
    assert_eq!(snapshot.total_pass + snapshot.total_block, 2_000);
    assert_eq!(engine.export_rules().flow_rules, generation(1_199.0));
}

/// 测试清空所有规则
#[test]
fn test_clear_all_rules() {
    let (_clock, engine) = create_test_engine();
    engine.load_rules(full_config()).unwrap();
    engine.rule_store().clear();

    let exported = engine.export_rules();
    assert_eq!(exported.rule_count(), 0);
    assert!(engine.rule_store().system_rules().is_empty());
}
