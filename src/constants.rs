//! Copyright (c) 2026, Kirky.X
//!
//! MIT License
//!
//! Centralized configuration constants for Flowgate.
//!
//! This module provides the defaults used throughout the library.
//! All magic numbers are defined here with their purpose and usage context.

// ============================================================================
// Entry Constants
// ============================================================================

/// Default token weight of one entry.
pub const DEFAULT_ENTRY_COUNT: u32 = 1;

/// Maximum token weight accepted by a single entry.
///
/// Larger weights are rejected with `InvalidArgument`.
pub const MAX_ENTRY_COUNT: u32 = 1_000_000;

/// Name of the node aggregating all inbound entries.
///
/// System rules compare against this node only.
pub const INBOUND_NODE_NAME: &str = "__inbound__";

// ============================================================================
// Statistic Window Constants
// ============================================================================

/// Default length of the second-level statistic window (1 second).
///
/// QPS figures reported by a resource node are sums over this window.
pub const DEFAULT_WINDOW_LENGTH_MS: u64 = 1_000;

/// Default bucket count of the second-level statistic window.
///
/// Two 500ms buckets: cheap, and smooth enough for rate estimates.
pub const DEFAULT_BUCKET_COUNT: u32 = 2;

/// Length of the minute-level statistic window (60 seconds).
pub const MINUTE_WINDOW_LENGTH_MS: u64 = 60_000;

/// Bucket count of the minute-level statistic window (1 second per bucket).
///
/// Used to look up the pass count of the previous second for warm-up.
pub const MINUTE_BUCKET_COUNT: u32 = 60;

// ============================================================================
// Flow Rule Constants
// ============================================================================

/// Default warm-up period for `WarmUp` control behavior (10 seconds).
pub const DEFAULT_WARM_UP_PERIOD_SEC: u32 = 10;

/// Cold factor of the warm-up ramp.
///
/// A cold resource starts at `threshold / COLD_FACTOR`.
pub const DEFAULT_COLD_FACTOR: u32 = 3;

/// Default maximum queueing time for `Queue` control behavior (500 ms).
pub const DEFAULT_MAX_QUEUEING_TIME_MS: u64 = 500;

// ============================================================================
// Hotspot Rule Constants
// ============================================================================

/// Default statistic window of a hotspot rule (1 second).
pub const DEFAULT_HOTSPOT_DURATION_SEC: u32 = 1;

/// Default bucket count of a per-value hotspot window.
pub const DEFAULT_HOTSPOT_BUCKET_COUNT: u32 = 2;

/// Default number of distinct parameter values tracked per hotspot rule.
///
/// Past this count the least recently used value counter is evicted.
pub const DEFAULT_MAX_TRACKED_VALUES: usize = 4_000;

/// Upper bound on tracked parameter values per hotspot rule.
pub const MAX_TRACKED_VALUES_LIMIT: usize = 200_000;

// ============================================================================
// Circuit Breaker Constants
// ============================================================================

/// Default minimum number of completed calls in a statistic window
/// before a circuit breaker may trip.
pub const DEFAULT_MIN_REQUEST_AMOUNT: u64 = 5;

/// Default statistic interval of a circuit breaker (1 second).
pub const DEFAULT_STAT_INTERVAL_MS: u64 = 1_000;

/// Default cool-down of an open circuit breaker (10 seconds).
///
/// How long the breaker remains open before admitting a half-open probe.
pub const DEFAULT_RETRY_TIMEOUT_MS: u64 = 10_000;

/// Default cap of the doubling backoff (5 minutes).
pub const DEFAULT_MAX_RETRY_TIMEOUT_MS: u64 = 300_000;

/// Slow request ratio that trips a breaker on equality.
pub const SLOW_REQUEST_RATIO_MAX: f64 = 1.0;

// ============================================================================
// Configuration Constants
// ============================================================================

/// Version string written into exported rule configurations.
pub const RULE_CONFIG_VERSION: &str = "1.0";
