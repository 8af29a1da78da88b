//! 流控规则模块集成测试
//!
//! 测试 QPS / 并发数限流、冷启动和匀速排队在引擎中的行为。

use crate::common::*;
use flowgate::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// 测试 QPS 超过阈值后拦截，窗口滚动后恢复
#[test]
fn test_qps_threshold_and_window_roll() {
    let (clock, engine) = create_test_engine();
    engine
        .set_flow_rules("orders", vec![FlowRule::qps("orders", 5.0)])
        .unwrap();

    assert_eq!(pass_count(&engine, "orders", vec![], 5), 5);
    let result = engine.enter("orders", EntryType::Outbound, 1, vec![]);
    assert_eq!(block_kind(result), Some("flow"));

    clock.advance(Duration::from_millis(1_000));
    assert_eq!(pass_count(&engine, "orders", vec![], 10), 5);

    let snapshot = engine.snapshot("orders").unwrap();
    assert_eq!(snapshot.total_pass, 10);
    assert_eq!(snapshot.total_block, 6);
}

/// 测试带权重的调用按 count 计数
#[test]
fn test_weighted_entries() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules("orders", vec![FlowRule::qps("orders", 10.0)])
        .unwrap();

    let token = engine.enter("orders", EntryType::Outbound, 6, vec![]).unwrap();
    assert!(engine
        .try_enter("orders", EntryType::Outbound, 5, vec![])
        .unwrap()
        .is_none());
    let second = engine.enter("orders", EntryType::Outbound, 4, vec![]).unwrap();

    assert_eq!(engine.snapshot("orders").unwrap().concurrency, 10);
    engine.complete(token);
    engine.complete(second);
    assert_eq!(engine.snapshot("orders").unwrap().concurrency, 0);
}

/// 测试并发数限流：退出后空出名额
#[test]
fn test_concurrency_limit() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules("db", vec![FlowRule::concurrency("db", 2.0)])
        .unwrap();

    let mut held = enter_many(&engine, "db", EntryType::Outbound, 5);
    assert_eq!(held.len(), 2);

    engine.complete(held.remove(0));
    let next = engine.enter("db", EntryType::Outbound, 1, vec![]).unwrap();
    assert!(engine
        .try_enter("db", EntryType::Outbound, 1, vec![])
        .unwrap()
        .is_none());

    engine.complete(next);
    for token in held {
        engine.complete(token);
    }
    assert_eq!(engine.snapshot("db").unwrap().concurrency, 0);
}

/// 测试多个线程同时进入时并发数不会超过阈值
#[test]
fn test_concurrency_ceiling_under_contention() {
    let engine = Arc::new(Engine::with_clock(Arc::new(FrozenClock(START_MS))));
    engine
        .set_flow_rules("db", vec![FlowRule::concurrency("db", 1.0)])
        .unwrap();

    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));
    let active = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..threads)
        .map(|_| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..500 {
                    barrier.wait();
                    if let Some(token) = engine
                        .try_enter("db", EntryType::Outbound, 1, vec![])
                        .unwrap()
                    {
                        let now_active = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now_active, Ordering::SeqCst);
                        thread::yield_now();
                        active.fetch_sub(1, Ordering::SeqCst);
                        engine.complete(token);
                    }
                }
            })
        })
        .collect();

    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(peak.load(Ordering::SeqCst), 1);
    let snapshot = engine.snapshot("db").unwrap();
    assert_eq!(snapshot.concurrency, 0);
    assert_eq!(snapshot.total_pass + snapshot.total_block, 4_000);
}

/// 测试被后续规则拦截的调用不占用并发名额
#[test]
fn test_blocked_entry_returns_concurrency() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules("db", vec![FlowRule::concurrency("db", 1.0)])
        .unwrap();
    engine
        .set_hotspot_rules("db", vec![HotspotRule::qps("db", 0, 0.0)])
        .unwrap();

    for _ in 0..3 {
        let result = engine.enter("db", EntryType::Outbound, 1, vec![ParamValue::from("k")]);
        assert_eq!(block_kind(result), Some("hotspot"));
    }
    assert_eq!(engine.snapshot("db").unwrap().concurrency, 0);

    let token = engine.enter("db", EntryType::Outbound, 1, vec![]).unwrap();
    assert_eq!(engine.snapshot("db").unwrap().concurrency, 1);
    engine.complete(token);
}

/// 测试多条流控规则同时生效，任意一条拦截即拦截
#[test]
fn test_multiple_flow_rules() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules(
            "orders",
            vec![
                FlowRule::qps("orders", 100.0),
                FlowRule::concurrency("orders", 1.0),
            ],
        )
        .unwrap();

    let token = engine.enter("orders", EntryType::Outbound, 1, vec![]).unwrap();
    let err = engine
        .enter("orders", EntryType::Outbound, 1, vec![])
        .unwrap_err();
    match err.block_error() {
        Some(BlockError::Flow { rule, .. }) => assert_eq!(rule.grade, FlowGrade::Concurrency),
        other => panic!("unexpected block: {:?}", other),
    }
    engine.complete(token);
}

/// 测试冷启动：资源闲置时只放行约 threshold / 3
#[test]
fn test_warm_up_admits_less_when_cold() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules("warm", vec![FlowRule::qps("warm", 30.0).warm_up(10)])
        .unwrap();
    engine
        .set_flow_rules("plain", vec![FlowRule::qps("plain", 30.0)])
        .unwrap();

    let warm = pass_count(&engine, "warm", vec![], 30);
    let plain = pass_count(&engine, "plain", vec![], 30);
    assert_eq!(warm, 10);
    assert_eq!(plain, 30);
}

/// 测试匀速排队：连续请求间隔 1000 / threshold 毫秒
#[test]
fn test_queue_spaces_entries() {
    let (clock, engine) = create_test_engine();
    engine
        .set_flow_rules("paced", vec![FlowRule::qps("paced", 10.0).queue(500)])
        .unwrap();

    let mut admitted = Vec::new();
    for _ in 0..5 {
        let token = engine.enter("paced", EntryType::Outbound, 1, vec![]).unwrap();
        admitted.push(token.created_at_ms());
        engine.complete(token);
    }

    let gaps: Vec<u64> = admitted.windows(2).map(|w| w[1] - w[0]).collect();
    assert_eq!(gaps, vec![100, 100, 100, 100]);
    assert_eq!(clock.now_ms(), START_MS + 400);
}

/// 测试匀速排队：预约等待超过最大排队时间时拦截
#[test]
fn test_queue_blocks_beyond_max_wait() {
    let engine = Engine::with_clock(Arc::new(FrozenClock(START_MS)));
    engine
        .set_flow_rules("paced", vec![FlowRule::qps("paced", 10.0).queue(250)])
        .unwrap();

    // 等待 0 / 100 / 200 ms 的请求放行，需要 300 ms 的请求拦截
    let tokens = enter_many(&engine, "paced", EntryType::Outbound, 3);
    assert_eq!(tokens.len(), 3);
    let result = engine.enter("paced", EntryType::Outbound, 1, vec![]);
    assert_eq!(block_kind(result), Some("flow"));

    for token in tokens {
        engine.complete(token);
    }
}

/// 测试被热点规则拦截的调用不占用匀速排队的位置
#[test]
fn test_blocked_entry_releases_queue_slot() {
    let (clock, engine) = create_test_engine();
    engine
        .set_flow_rules("paced", vec![FlowRule::qps("paced", 10.0).queue(1_000)])
        .unwrap();
    engine
        .set_hotspot_rules(
            "paced",
            vec![HotspotRule::qps("paced", 0, 0.0).with_exception("ok", 100.0)],
        )
        .unwrap();

    for _ in 0..5 {
        let result = engine.enter("paced", EntryType::Outbound, 1, vec![ParamValue::from("bad")]);
        assert_eq!(block_kind(result), Some("hotspot"));
    }
    assert_eq!(clock.now_ms(), START_MS);

    let token = engine
        .enter("paced", EntryType::Outbound, 1, vec![ParamValue::from("ok")])
        .unwrap();
    assert_eq!(clock.now_ms(), START_MS);
    engine.complete(token);

    let token = engine
        .enter("paced", EntryType::Outbound, 1, vec![ParamValue::from("ok")])
        .unwrap();
    assert_eq!(clock.now_ms(), START_MS + 100);
    engine.complete(token);
}

/// 测试阈值为 0 时全部拦截
#[test]
fn test_zero_threshold_blocks_everything() {
    let (_clock, engine) = create_test_engine();
    engine
        .set_flow_rules("closed", vec![FlowRule::qps("closed", 0.0)])
        .unwrap();
    assert_eq!(pass_count(&engine, "closed", vec![], 20), 0);
    assert_eq!(engine.snapshot("closed").unwrap().total_block, 20);
}
