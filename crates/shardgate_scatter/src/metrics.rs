//! Per-shard call metrics.
//!
//! Two families, both keyed on `(operation, keyspace, shard, tablet_type)`:
//! timings for every shard action, and a fault counter for errors that are
//! the tablet's fault (client-caused codes are excluded by the driver).
//! Cells are atomic so exporters can snapshot without touching the hot
//! path's locks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use shardgate_common::types::Target;

/// Metric key for one (operation, target) combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatsKey {
    pub operation: String,
    pub keyspace: String,
    pub shard: String,
    pub tablet_type: String,
}

impl StatsKey {
    pub fn new(operation: &str, target: &Target) -> Self {
        Self {
            operation: operation.to_string(),
            keyspace: target.keyspace.clone(),
            shard: target.shard.clone(),
            tablet_type: target.tablet_type.as_str().to_string(),
        }
    }
}

#[derive(Debug, Default)]
struct TimingCell {
    count: AtomicU64,
    total_us: AtomicU64,
    max_us: AtomicU64,
}

impl TimingCell {
    fn record(&self, us: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_us.fetch_add(us, Ordering::Relaxed);
        let mut cur = self.max_us.load(Ordering::Relaxed);
        while us > cur {
            match self
                .max_us
                .compare_exchange_weak(cur, us, Ordering::Relaxed, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => cur = actual,
            }
        }
    }
}

/// Snapshot of one timing cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingSnapshot {
    pub key: StatsKey,
    pub count: u64,
    pub total_us: u64,
    pub max_us: u64,
}

/// Duration histogram family keyed by [`StatsKey`].
#[derive(Debug)]
pub struct MultiTimings {
    name: String,
    cells: DashMap<StatsKey, Arc<TimingCell>>,
}

impl MultiTimings {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cells: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Record the elapsed time since `start` under `key`.
    pub fn record(&self, key: &StatsKey, start: Instant) {
        let us = start.elapsed().as_micros() as u64;
        let cell = self
            .cells
            .entry(key.clone())
            .or_insert_with(|| Arc::new(TimingCell::default()))
            .clone();
        cell.record(us);
    }

    /// Number of samples recorded under `key`.
    pub fn count(&self, key: &StatsKey) -> u64 {
        self.cells
            .get(key)
            .map(|c| c.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Total samples across all keys.
    pub fn total_count(&self) -> u64 {
        self.cells
            .iter()
            .map(|e| e.value().count.load(Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot(&self) -> Vec<TimingSnapshot> {
        self.cells
            .iter()
            .map(|e| TimingSnapshot {
                key: e.key().clone(),
                count: e.value().count.load(Ordering::Relaxed),
                total_us: e.value().total_us.load(Ordering::Relaxed),
                max_us: e.value().max_us.load(Ordering::Relaxed),
            })
            .collect()
    }
}

/// Snapshot of one counter cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub key: StatsKey,
    pub count: u64,
}

/// Monotonic counter family keyed by [`StatsKey`].
#[derive(Debug)]
pub struct MultiCounters {
    name: String,
    cells: DashMap<StatsKey, AtomicU64>,
}

impl MultiCounters {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            cells: DashMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add(&self, key: &StatsKey, delta: u64) {
        self.cells
            .entry(key.clone())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self, key: &StatsKey) -> u64 {
        self.cells
            .get(key)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Sum across all keys.
    pub fn total(&self) -> u64 {
        self.cells
            .iter()
            .map(|e| e.value().load(Ordering::Relaxed))
            .sum()
    }

    pub fn snapshot(&self) -> Vec<CounterSnapshot> {
        self.cells
            .iter()
            .map(|e| CounterSnapshot {
                key: e.key().clone(),
                count: e.value().load(Ordering::Relaxed),
            })
            .collect()
    }
}
