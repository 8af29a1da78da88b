//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Flowgate - In-process Admission Control Engine
//!
//! Gates calls to named resources against dynamically configurable rules:
//! request-rate and concurrency ceilings, per-argument (hotspot) limits,
//! circuit breaking on errors or latency, and process-wide inbound ceilings.
//!
//! # API Layers
//!
//! ## Prelude (Quick Start)
//!
//! Use `use flowgate::prelude::*;` to import all commonly used types.
//!
//! ## Core API
//!
//! - [`Engine`] - Entry / exit bracketing, rule management and snapshots
//! - [`EntryToken`] - Handle of one admitted call, returned to `exit`
//! - [`RuleConfig`] - Serializable rule set (YAML, TOML, JSON)
//! - [`FlowGateError`] / [`BlockError`] - Error types
//!
//! ## Building Blocks
//!
//! - [`sliding_window`] - Bucketed counters behind every rate figure
//! - [`flow`] - Reject, warm-up and pacing controllers
//! - [`hotspot`] - LRU-bounded per-value counters
//! - [`circuit_breaker`] - Per-rule breaker state machine
//!
//! ## Extensions (feature-gated)
//!
//! - Async entry (requires `tokio` feature)
//! - Prometheus metrics (requires `monitoring` feature)
//!
//! # Examples
//!
//! ```rust
//! use flowgate::prelude::*;
//!
//! let engine = Engine::new();
//! engine
//!     .set_flow_rules("orders", vec![FlowRule::concurrency("orders", 1.0)])
//!     .unwrap();
//!
//! let token = engine.enter("orders", EntryType::Inbound, 1, vec![]).unwrap();
//! let blocked = engine.try_enter("orders", EntryType::Inbound, 1, vec![]).unwrap();
//! assert!(blocked.is_none());
//!
//! engine.exit(token, 1, &[]);
//! assert_eq!(engine.snapshot("orders").unwrap().concurrency, 0);
//! ```
//!
//! # Features
//!
//! - **Flow rules**: QPS or concurrency thresholds with reject, warm-up and queueing behaviors
//! - **Hotspot rules**: Per-argument-value limits with exception items
//! - **Circuit breaking**: Error ratio, error count, slow ratio and average RT strategies
//! - **System rules**: Process-wide ceilings over inbound traffic
//! - **Hot reload**: Atomic rule replacement, export and reload of the whole rule set

pub mod prelude;

pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod flow;
mod global;
pub mod hotspot;
pub mod node;
pub mod rule_store;
pub mod rules;
pub mod sliding_window;
#[cfg(feature = "monitoring")]
pub mod telemetry;

// 重新导出常用类型
pub use circuit_breaker::{BreakerDecision, CircuitBreaker, StateChangeListener};
pub use flow::{FlowDecision, PacingSlot};
pub use hotspot::ParamDecision;
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, RuleConfig};
pub use engine::{Engine, EntryToken, ExitedEntry};
pub use error::{BlockError, CircuitState, FlowGateError, SystemMetric};
pub use global::global;
pub use node::{NodeSnapshot, ResourceNode};
pub use rule_store::{ResourceRules, RuleStore};
pub use rules::{
    BackoffPolicy, ControlBehavior, DegradeRule, DegradeStrategy, EntryType, FlowGrade, FlowRule,
    HotspotRule, ParamException, ParamValue, SystemRule,
};
#[cfg(feature = "monitoring")]
pub use telemetry::{set_global_metrics, try_global, Metrics};
