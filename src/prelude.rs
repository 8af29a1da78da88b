//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Prelude module - Commonly used types for quick imports
//!
//! This module re-exports the most commonly used types from Flowgate,
//! allowing users to import them with a single `use flowgate::prelude::*;`
//! statement instead of importing each type individually.

// Core types - always available
pub use crate::config::{EngineConfig, RuleConfig};
pub use crate::engine::{Engine, EntryToken, ExitedEntry};
pub use crate::error::{BlockError, CircuitState, FlowGateError};
pub use crate::global::global;
pub use crate::node::NodeSnapshot;

// Rule types
pub use crate::rules::{
    BackoffPolicy, ControlBehavior, DegradeRule, DegradeStrategy, EntryType, FlowGrade, FlowRule,
    HotspotRule, ParamValue, SystemRule,
};

// Extension points
pub use crate::circuit_breaker::StateChangeListener;
pub use crate::clock::{Clock, ManualClock, SystemClock};

// Feature-gated exports
#[cfg(feature = "monitoring")]
pub use crate::telemetry::Metrics;
