//! Per-key, multi-window rate limiting.
//!
//! The engine maintains one counter per configured window for every key that
//! has been admitted at least once. Counters live only in memory: a process
//! restart resets all quotas, and expired counters are reset lazily on the
//! next access to that key rather than swept by a background task.
//!
//! # Precedence
//!
//! Windows are evaluated shortest-first. The first window (in that order)
//! whose count has already reached its limit rejects the request, and no
//! counter is incremented for the rejected call. This surfaces the tightest,
//! most immediately actionable constraint: a burst that would eventually
//! also violate the daily window is reported as a 10-minute violation while
//! that is the binding limit.
//!
//! # Concurrency
//!
//! All check-then-increment steps for one key run while holding that key's
//! [`DashMap`] entry guard, so two concurrent requests can never both
//! observe a not-yet-exhausted window and slip past the limit together.
//! Reads via [`RateLimitEngine::usage`] take a shared reference and never
//! create or mutate counters.

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A fixed-duration counting period.
///
/// The production configuration uses all three windows together; the engine
/// itself only cares about the ordered list it is constructed with, so a
/// single-window deployment is a configuration change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RateWindow {
    #[serde(rename = "10min")]
    Per10Min,
    #[serde(rename = "day")]
    PerDay,
    #[serde(rename = "month")]
    PerMonth,
}

impl RateWindow {
    /// Window duration in milliseconds.
    #[must_use]
    pub const fn duration_ms(self) -> i64 {
        match self {
            Self::Per10Min => 10 * 60 * 1000,
            Self::PerDay => 24 * 60 * 60 * 1000,
            Self::PerMonth => 30 * 24 * 60 * 60 * 1000,
        }
    }

    /// Short identifier used in response bodies and header names.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Per10Min => "10min",
            Self::PerDay => "day",
            Self::PerMonth => "month",
        }
    }

    /// JSON field name used in per-window maps (`remaining`, `usage`, ...).
    #[must_use]
    pub const fn field(self) -> &'static str {
        match self {
            Self::Per10Min => "per10Min",
            Self::PerDay => "perDay",
            Self::PerMonth => "perMonth",
        }
    }
}

impl fmt::Display for RateWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Per-key overrides for one or more window limits.
///
/// Absent fields fall back to the process-wide defaults. Merging is
/// field-by-field: fields not present in the update leave the existing
/// override untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomLimits {
    #[serde(rename = "per10Min", skip_serializing_if = "Option::is_none")]
    pub per_10min: Option<u64>,
    #[serde(rename = "perDay", skip_serializing_if = "Option::is_none")]
    pub per_day: Option<u64>,
    #[serde(rename = "perMonth", skip_serializing_if = "Option::is_none")]
    pub per_month: Option<u64>,
}

impl CustomLimits {
    /// Returns the override for a window, if one is set.
    #[must_use]
    pub const fn for_window(&self, window: RateWindow) -> Option<u64> {
        match window {
            RateWindow::Per10Min => self.per_10min,
            RateWindow::PerDay => self.per_day,
            RateWindow::PerMonth => self.per_month,
        }
    }

    /// Merges `update` into `self`, field by field.
    pub fn apply(&mut self, update: &CustomLimits) {
        if update.per_10min.is_some() {
            self.per_10min = update.per_10min;
        }
        if update.per_day.is_some() {
            self.per_day = update.per_day;
        }
        if update.per_month.is_some() {
            self.per_month = update.per_month;
        }
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.per_10min.is_none() && self.per_day.is_none() && self.per_month.is_none()
    }
}

/// A configured window with its process-wide default limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    pub window: RateWindow,
    pub default_limit: u64,
}

/// One counting window for one key.
#[derive(Debug, Clone)]
struct WindowCounter {
    count: u64,
    expires_at_ms: i64,
}

/// All window counters for one key. Never persisted.
#[derive(Debug)]
struct RateLimitEntry {
    counters: Vec<Option<WindowCounter>>,
}

impl RateLimitEntry {
    fn new(window_count: usize) -> Self {
        Self { counters: vec![None; window_count] }
    }
}

/// Quota state for one window as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowStatus {
    pub window: RateWindow,
    pub limit: u64,
    pub remaining: u64,
    /// Whole seconds until the window resets (ceiling).
    pub reset_secs: u64,
}

/// Outcome of a single admission check.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    /// The shortest window at capacity, when rejected.
    pub exceeded: Option<RateWindow>,
    /// Per-window quota state, ordered shortest window first.
    pub windows: Vec<WindowStatus>,
}

impl RateLimitDecision {
    /// Seconds the caller should wait before retrying, when rejected.
    #[must_use]
    pub fn retry_after_secs(&self) -> Option<u64> {
        let exceeded = self.exceeded?;
        self.windows.iter().find(|s| s.window == exceeded).map(|s| s.reset_secs)
    }

    #[must_use]
    pub fn remaining_for(&self, window: RateWindow) -> Option<u64> {
        self.windows.iter().find(|s| s.window == window).map(|s| s.remaining)
    }
}

/// Effective count of a counter at `now_ms`: an expired counter reads as 0.
///
/// Pure read-side resolution; mutation (clearing expired counters) happens
/// only inside the admit path's critical section.
const fn effective_count(counter: Option<&WindowCounter>, now_ms: i64) -> u64 {
    match counter {
        Some(c) if now_ms < c.expires_at_ms => c.count,
        _ => 0,
    }
}

/// Seconds until `expires_at_ms`, rounded up. Never negative.
const fn secs_until(expires_at_ms: i64, now_ms: i64) -> u64 {
    let remaining_ms = expires_at_ms - now_ms;
    if remaining_ms <= 0 {
        0
    } else {
        (remaining_ms as u64).div_ceil(1000)
    }
}

/// Multi-window rate limiter keyed by API key.
pub struct RateLimitEngine {
    /// Configured windows, sorted shortest duration first.
    windows: Vec<WindowConfig>,
    entries: DashMap<String, RateLimitEntry>,
}

impl RateLimitEngine {
    /// Creates an engine for the given windows.
    ///
    /// The windows are sorted shortest-first; precedence on rejection
    /// follows that order regardless of the order passed in.
    #[must_use]
    pub fn new(mut windows: Vec<WindowConfig>) -> Self {
        windows.sort_by_key(|w| w.window.duration_ms());
        Self { windows, entries: DashMap::new() }
    }

    /// Returns the configured windows, shortest first.
    #[must_use]
    pub fn windows(&self) -> &[WindowConfig] {
        &self.windows
    }

    /// Resolves the effective limit for a window: per-key override if
    /// present, else the process-wide default.
    #[must_use]
    pub fn effective_limit(&self, window: RateWindow, overrides: Option<&CustomLimits>) -> u64 {
        let default = self
            .windows
            .iter()
            .find(|w| w.window == window)
            .map_or(0, |w| w.default_limit);
        overrides.and_then(|o| o.for_window(window)).unwrap_or(default)
    }

    /// Checks every configured window for `key` and, if none is at its
    /// limit, increments them all and admits the request.
    ///
    /// On rejection no counter is incremented; the decision reports the
    /// exceeded window, the remaining quota for every window (0 for the
    /// exceeded one), and the reset time in whole seconds for every window.
    #[must_use]
    pub fn check_and_admit(
        &self,
        key: &str,
        overrides: Option<&CustomLimits>,
    ) -> RateLimitDecision {
        self.check_and_admit_at(key, overrides, Utc::now().timestamp_millis())
    }

    /// Returns the current count per window without creating or mutating
    /// any counter. Unknown keys report zero usage on every window.
    #[must_use]
    pub fn usage(&self, key: &str) -> Vec<(RateWindow, u64)> {
        self.usage_at(key, Utc::now().timestamp_millis())
    }

    /// Removes all counters for `key`. Called when the key is deleted.
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }

    fn check_and_admit_at(
        &self,
        key: &str,
        overrides: Option<&CustomLimits>,
        now_ms: i64,
    ) -> RateLimitDecision {
        let limits: Vec<u64> = self
            .windows
            .iter()
            .map(|w| overrides.and_then(|o| o.for_window(w.window)).unwrap_or(w.default_limit))
            .collect();

        // The entry guard serializes concurrent check-then-increment for the
        // same key; other keys proceed in parallel on other shards.
        let mut entry = self
            .entries
            .entry(key.to_owned())
            .or_insert_with(|| RateLimitEntry::new(self.windows.len()));

        // Lazy expiry: an elapsed window is gone, not reused. A fresh
        // counter gets a fresh expiry on the next admission.
        for counter in &mut entry.counters {
            if matches!(counter, Some(c) if now_ms >= c.expires_at_ms) {
                *counter = None;
            }
        }

        // Shortest window first; the first exhausted one rejects.
        for (idx, cfg) in self.windows.iter().enumerate() {
            let count = effective_count(entry.counters[idx].as_ref(), now_ms);
            if count >= limits[idx] {
                let windows = self.statuses(&entry, &limits, now_ms);
                return RateLimitDecision {
                    allowed: false,
                    exceeded: Some(cfg.window),
                    windows,
                };
            }
        }

        for (idx, cfg) in self.windows.iter().enumerate() {
            let counter = entry.counters[idx].get_or_insert_with(|| WindowCounter {
                count: 0,
                expires_at_ms: now_ms + cfg.window.duration_ms(),
            });
            counter.count += 1;
        }

        let windows = self.statuses(&entry, &limits, now_ms);
        RateLimitDecision { allowed: true, exceeded: None, windows }
    }

    fn usage_at(&self, key: &str, now_ms: i64) -> Vec<(RateWindow, u64)> {
        match self.entries.get(key) {
            Some(entry) => self
                .windows
                .iter()
                .zip(entry.counters.iter())
                .map(|(cfg, counter)| (cfg.window, effective_count(counter.as_ref(), now_ms)))
                .collect(),
            None => self.windows.iter().map(|cfg| (cfg.window, 0)).collect(),
        }
    }

    fn statuses(&self, entry: &RateLimitEntry, limits: &[u64], now_ms: i64) -> Vec<WindowStatus> {
        self.windows
            .iter()
            .enumerate()
            .map(|(idx, cfg)| {
                let count = effective_count(entry.counters[idx].as_ref(), now_ms);
                let reset_secs = match entry.counters[idx].as_ref() {
                    Some(c) if now_ms < c.expires_at_ms => secs_until(c.expires_at_ms, now_ms),
                    // No live counter: a fresh window would span the full
                    // duration from now.
                    _ => (cfg.window.duration_ms() as u64) / 1000,
                };
                WindowStatus {
                    window: cfg.window,
                    limit: limits[idx],
                    remaining: limits[idx].saturating_sub(count),
                    reset_secs,
                }
            })
            .collect()
    }
}
