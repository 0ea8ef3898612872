//! Vendor-agnostic metrics collection via a pluggable sink.
//!
//! Implement [`MetricsSink`] to receive one event per facade query and one per
//! update, then install it once at startup with [`set_sink`]. Until a sink is
//! installed, events are dropped:
//!
//! ```rust
//! use pex_core::metrics::{MetricsSink, ResolutionStats, UpdateStats};
//! use std::sync::atomic::{AtomicU64, Ordering};
//! use std::sync::Arc;
//!
//! struct CountingSink {
//!     misses: AtomicU64,
//! }
//!
//! impl MetricsSink for CountingSink {
//!     fn on_resolution(&self, stats: &ResolutionStats) {
//!         if !stats.cache_hit {
//!             self.misses.fetch_add(1, Ordering::Relaxed);
//!         }
//!     }
//!
//!     fn on_update(&self, _stats: &UpdateStats) {}
//! }
//!
//! pex_core::metrics::set_sink(Arc::new(CountingSink { misses: AtomicU64::new(0) }));
//! ```

use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tracing::warn;

/// One facade query, passed to [`MetricsSink::on_resolution`].
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionStats {
    /// Wall-clock time for the whole query, cache lookup included
    pub duration: Duration,
    /// Whether the answer came from the resolution cache
    pub cache_hit: bool,
    /// Queried subject, e.g. "user:alice"
    pub subject_id: String,
    /// Query, e.g. "permission:build"
    pub query: String,
}

/// Phase breakdown of a cache miss. All times are in milliseconds.
#[derive(Debug, Clone, Serialize)]
pub struct ResolutionPhases {
    /// Loading the subject and every reachable ancestor
    pub load_graph_ms: f64,
    /// Walking the loaded graph
    pub walk_ms: f64,
    /// Subjects loaded into the graph
    pub subjects_loaded: usize,
    pub total_ms: f64,
}

impl ResolutionPhases {
    pub fn overhead_ms(&self) -> f64 {
        self.total_ms - (self.load_graph_ms + self.walk_ms)
    }
}

/// One run of the compare-and-swap loop, passed to [`MetricsSink::on_update`].
#[derive(Debug, Clone, Serialize)]
pub struct UpdateStats {
    pub duration: Duration,
    pub subject_id: String,
    /// Compare-and-swap attempts made, including the successful one
    pub attempts: usize,
    /// `false` when the loop gave up or failed
    pub committed: bool,
}

/// Consumer of resolution and update metrics.
///
/// Called synchronously on the hot path from many tasks at once; implementations
/// must be thread-safe and return quickly.
pub trait MetricsSink: Send + Sync {
    fn on_resolution(&self, stats: &ResolutionStats);

    fn on_update(&self, stats: &UpdateStats);

    /// Phase timings for cache misses. Default: ignored.
    fn on_resolution_phases(&self, _stats: &ResolutionStats, _phases: &ResolutionPhases) {}
}

static SINK: OnceLock<Arc<dyn MetricsSink>> = OnceLock::new();

/// Set the global metrics sink.
///
/// The sink can be installed once. Events recorded before that are dropped, so
/// install it before the first query. Later calls are ignored with a warning.
pub fn set_sink(sink: Arc<dyn MetricsSink>) {
    if SINK.set(sink).is_err() {
        warn!(
            "Metrics sink was already initialized. Ignoring subsequent set_sink call. Set the sink before the first query."
        );
    }
}

pub(crate) fn record_resolution(stats: ResolutionStats, phases: Option<ResolutionPhases>) {
    let Some(sink) = SINK.get() else {
        return;
    };
    if let Some(phases) = phases {
        sink.on_resolution_phases(&stats, &phases);
    }
    sink.on_resolution(&stats);
}

pub(crate) fn record_update(subject_id: String, attempts: usize, committed: bool, duration: Duration) {
    if let Some(sink) = SINK.get() {
        sink.on_update(&UpdateStats {
            duration,
            subject_id,
            attempts,
            committed,
        });
    }
}
