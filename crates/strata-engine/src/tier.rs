//! Tier manager
//!
//! Counts calls per function and decides when a function should move up a
//! tier. It never compiles anything itself: callers act on the returned
//! [`TierRequest`] and report back with [`TierManager::mark_compiled`].

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Tier {
    Uncompiled = 0,
    Baseline = 1,
    Optimized = 2,
}

impl Tier {
    fn from_u8(raw: u8) -> Tier {
        match raw {
            0 => Tier::Uncompiled,
            1 => Tier::Baseline,
            _ => Tier::Optimized,
        }
    }
}

/// Call counts at which a function becomes eligible for the next tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierThresholds {
    pub baseline: u64,
    pub optimizing: u64,
}

impl Default for TierThresholds {
    fn default() -> Self {
        TierThresholds { baseline: 2, optimizing: 1000 }
    }
}

/// What the caller should compile next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TierRequest {
    Baseline(String),
    Optimize(String),
}

#[derive(Debug)]
struct Counters {
    calls: AtomicU64,
    tier: AtomicU8,
    /// Set while a request is outstanding
    claimed: AtomicBool,
}

impl Counters {
    fn new(tier: Tier) -> Self {
        Counters { calls: AtomicU64::new(0), tier: AtomicU8::new(tier as u8), claimed: AtomicBool::new(false) }
    }
}

#[derive(Debug, Default)]
pub struct TierManager {
    thresholds: TierThresholds,
    functions: RwLock<FxHashMap<String, Arc<Counters>>>,
}

impl TierManager {
    pub fn new(thresholds: TierThresholds) -> Self {
        TierManager { thresholds, functions: RwLock::new(FxHashMap::default()) }
    }

    pub fn thresholds(&self) -> TierThresholds {
        self.thresholds
    }

    /// Track `name` starting at `tier`; re-registering resets nothing
    pub fn register(&self, name: &str, tier: Tier) {
        let mut functions = self.functions.write();
        functions.entry(name.to_string()).or_insert_with(|| Arc::new(Counters::new(tier)));
    }

    fn counters(&self, name: &str) -> Arc<Counters> {
        if let Some(counters) = self.functions.read().get(name) {
            return Arc::clone(counters);
        }
        let mut functions = self.functions.write();
        Arc::clone(functions.entry(name.to_string()).or_insert_with(|| Arc::new(Counters::new(Tier::Uncompiled))))
    }

    /// Count one call; returns a request when this call crossed a threshold
    /// and won the claim for it
    pub fn record_call(&self, name: &str) -> Option<TierRequest> {
        let counters = self.counters(name);
        let calls = counters.calls.fetch_add(1, Ordering::Relaxed) + 1;
        let tier = Tier::from_u8(counters.tier.load(Ordering::Acquire));
        let request = match tier {
            Tier::Uncompiled if calls >= self.thresholds.baseline => TierRequest::Baseline(name.to_string()),
            Tier::Baseline if calls >= self.thresholds.optimizing => TierRequest::Optimize(name.to_string()),
            _ => return None,
        };
        counters
            .claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| {
                tracing::debug!(function = name, calls, ?request, "tier-up requested");
                request
            })
    }

    /// Record that `name` now runs at `tier` and release its claim
    pub fn mark_compiled(&self, name: &str, tier: Tier) {
        let counters = self.counters(name);
        counters.tier.store(tier as u8, Ordering::Release);
        counters.claimed.store(false, Ordering::Release);
    }

    /// Release a claim without changing tier, e.g. after a failed compile
    pub fn release(&self, name: &str) {
        self.counters(name).claimed.store(false, Ordering::Release);
    }

    pub fn tier_of(&self, name: &str) -> Option<Tier> {
        self.functions.read().get(name).map(|c| Tier::from_u8(c.tier.load(Ordering::Acquire)))
    }

    pub fn call_count(&self, name: &str) -> u64 {
        self.functions.read().get(name).map_or(0, |c| c.calls.load(Ordering::Relaxed))
    }
}
