//! Dispatch counters shared between the dispatcher and observers

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::utils::CachePadded;
use serde::Serialize;

/// Lock-free counters, one cache line each.
#[derive(Debug, Default)]
pub struct DispatchStats {
    ticks: CachePadded<AtomicU64>,
    dropped_ticks: CachePadded<AtomicU64>,
    source_misses: CachePadded<AtomicU64>,
    dispatched: CachePadded<AtomicU64>,
    completed: CachePadded<AtomicU64>,
    rejected: CachePadded<AtomicU64>,
    failed: CachePadded<AtomicU64>,
    stale: CachePadded<AtomicU64>,
    timed_out: CachePadded<AtomicU64>,
    render_failures: CachePadded<AtomicU64>,
}

/// Point-in-time copy of [`DispatchStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub ticks: u64,
    pub dropped_ticks: u64,
    pub source_misses: u64,
    pub dispatched: u64,
    pub completed: u64,
    pub rejected: u64,
    pub failed: u64,
    pub stale: u64,
    pub timed_out: u64,
    pub render_failures: u64,
}

macro_rules! stat_counter {
    ($record:ident, $read:ident, $field:ident, $metric:literal) => {
        pub fn $record(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
            metrics::counter!($metric).increment(1);
        }

        pub fn $read(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl DispatchStats {
    stat_counter!(record_tick, ticks, ticks, "poseloop_ticks_total");
    stat_counter!(record_dropped_tick, dropped_ticks, dropped_ticks, "poseloop_ticks_dropped_total");
    stat_counter!(record_source_miss, source_misses, source_misses, "poseloop_source_misses_total");
    stat_counter!(record_dispatch, dispatched, dispatched, "poseloop_requests_total");
    stat_counter!(record_completion, completed, completed, "poseloop_responses_total");
    stat_counter!(record_rejection, rejected, rejected, "poseloop_requests_rejected_total");
    stat_counter!(record_failure, failed, failed, "poseloop_requests_failed_total");
    stat_counter!(record_stale, stale, stale, "poseloop_responses_stale_total");
    stat_counter!(record_timeout, timed_out, timed_out, "poseloop_requests_timed_out_total");
    stat_counter!(record_render_failure, render_failures, render_failures, "poseloop_render_failures_total");

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            ticks: self.ticks(),
            dropped_ticks: self.dropped_ticks(),
            source_misses: self.source_misses(),
            dispatched: self.dispatched(),
            completed: self.completed(),
            rejected: self.rejected(),
            failed: self.failed(),
            stale: self.stale(),
            timed_out: self.timed_out(),
            render_failures: self.render_failures(),
        }
    }
}
