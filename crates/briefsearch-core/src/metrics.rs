//! Search and indexing metrics with rolling averages.
//!
//! Stage latencies are kept as timestamped samples and averaged over a
//! rolling window; degradation events (a channel or the reranker dropping out,
//! a write being rolled back) are plain lifetime counters.
//!
//! ## Architecture
//!
//! Engines record into a shared collector, [`global_metrics()`] unless one is
//! supplied with
//! [`HybridSearchEngine::with_metrics`](crate::search::HybridSearchEngine::with_metrics).
//! Tests pass their own collector to stay isolated.

use instant::Instant;
use once_cell::sync::Lazy;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// Window for indexing metrics (60 seconds).
const DEFAULT_WINDOW_SECS: u64 = 60;

/// Window for search metrics (5 minutes).
/// Searches are less frequent than ingestion bursts, so a longer window
/// gives meaningful averages.
const SEARCH_WINDOW_SECS: u64 = 300;

/// Maximum samples to keep per metric (prevents unbounded growth).
const MAX_SAMPLES: usize = 1000;

#[derive(Clone, Debug)]
struct TimingSample {
    timestamp: Instant,
    duration_ms: f64,
}

/// Rolling statistics for a single stage.
#[derive(Debug, Default)]
struct MetricData {
    samples: VecDeque<TimingSample>,
    /// Total count since startup.
    total_count: u64,
}

impl MetricData {
    fn new() -> Self {
        Self {
            samples: VecDeque::with_capacity(MAX_SAMPLES),
            total_count: 0,
        }
    }

    fn record(&mut self, duration_ms: f64) {
        self.total_count += 1;
        self.samples.push_back(TimingSample {
            timestamp: Instant::now(),
            duration_ms,
        });

        while self.samples.len() > MAX_SAMPLES {
            self.samples.pop_front();
        }
    }

    /// Drop samples older than the window.
    fn prune(&mut self, window: Duration) {
        // checked_sub: Instant may be younger than the window right after start
        let cutoff = match Instant::now().checked_sub(window) {
            Some(t) => t,
            None => return,
        };

        while let Some(front) = self.samples.front() {
            if front.timestamp < cutoff {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn in_window(&self, window: Duration) -> impl Iterator<Item = &TimingSample> {
        let cutoff = Instant::now().checked_sub(window);
        self.samples
            .iter()
            .filter(move |s| cutoff.is_none_or(|c| s.timestamp >= c))
    }

    fn rolling_avg(&self, window: Duration) -> Option<f64> {
        let (sum, count) = self
            .in_window(window)
            .fold((0.0, 0usize), |(sum, n), s| (sum + s.duration_ms, n + 1));

        if count > 0 {
            Some(sum / count as f64)
        } else {
            None
        }
    }

    fn rolling_count(&self, window: Duration) -> usize {
        self.in_window(window).count()
    }

    /// Samples per second over the window.
    fn throughput(&self, window: Duration) -> f64 {
        let count = self.rolling_count(window);
        if count == 0 {
            return 0.0;
        }
        count as f64 / window.as_secs_f64()
    }
}

/// Timings and result sizes of one completed search.
///
/// Channel and rerank timings are `None` when that stage did not produce a
/// result (failed, timed out or was skipped).
#[derive(Clone, Debug, Default)]
pub struct SearchSample {
    pub lexical_ms: Option<f64>,
    pub semantic_ms: Option<f64>,
    pub fusion_ms: f64,
    pub rerank_ms: Option<f64>,
    pub total_ms: f64,
    pub result_count: usize,
    pub lexical_count: usize,
    pub semantic_count: usize,
    pub top_score: Option<f32>,
}

/// Point-in-time view of the collector.
#[derive(Clone, Debug, Default)]
pub struct MetricsSnapshot {
    pub indexing_avg_ms: Option<f64>,
    pub indexing_count: usize,
    pub indexing_throughput: f64,
    pub total_documents_indexed: u64,

    pub search: SearchSnapshot,

    /// Searches answered by one channel only.
    pub degraded_searches: u64,
    /// Searches that failed because both channels were unavailable.
    pub unavailable_searches: u64,
    /// Searches that returned the fused order because reranking failed.
    pub reranker_fallbacks: u64,
    /// Writes undone after a partial failure.
    pub rollbacks: u64,
    /// Writes whose undo also failed and await repair.
    pub compensation_failures: u64,
}

#[derive(Clone, Debug, Default)]
pub struct SearchSnapshot {
    pub lexical_avg_ms: Option<f64>,
    pub semantic_avg_ms: Option<f64>,
    pub fusion_avg_ms: Option<f64>,
    pub rerank_avg_ms: Option<f64>,
    pub total_latency_avg_ms: Option<f64>,
    /// Number of searches in the rolling window.
    pub query_count: usize,

    pub last_result_count: Option<usize>,
    pub last_lexical_count: Option<usize>,
    pub last_semantic_count: Option<usize>,
    pub last_top_score: Option<f32>,
}

#[derive(Clone, Debug, Default)]
struct LastSearchInfo {
    result_count: usize,
    lexical_count: usize,
    semantic_count: usize,
    top_score: Option<f32>,
}

struct MetricsInner {
    indexing: MetricData,

    search_lexical: MetricData,
    search_semantic: MetricData,
    search_fusion: MetricData,
    search_rerank: MetricData,
    search_total: MetricData,
    last_search: Option<LastSearchInfo>,

    degraded_searches: u64,
    unavailable_searches: u64,
    reranker_fallbacks: u64,
    rollbacks: u64,
    compensation_failures: u64,
}

impl Default for MetricsInner {
    fn default() -> Self {
        Self {
            indexing: MetricData::new(),
            search_lexical: MetricData::new(),
            search_semantic: MetricData::new(),
            search_fusion: MetricData::new(),
            search_rerank: MetricData::new(),
            search_total: MetricData::new(),
            last_search: None,
            degraded_searches: 0,
            unavailable_searches: 0,
            reranker_fallbacks: 0,
            rollbacks: 0,
            compensation_failures: 0,
        }
    }
}

/// Thread-safe metrics collector. Clones share the same data.
#[derive(Clone)]
pub struct PerformanceMetrics {
    inner: Arc<RwLock<MetricsInner>>,
    window: Duration,
    search_window: Duration,
}

impl PerformanceMetrics {
    /// Collector with a 60 second indexing window and a 5 minute search window.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            window: Duration::from_secs(DEFAULT_WINDOW_SECS),
            search_window: Duration::from_secs(SEARCH_WINDOW_SECS),
        }
    }

    /// Collector using one window for everything (for testing).
    pub fn with_window(window_secs: u64) -> Self {
        Self {
            inner: Arc::new(RwLock::new(MetricsInner::default())),
            window: Duration::from_secs(window_secs),
            search_window: Duration::from_secs(window_secs),
        }
    }

    /// Record the time to index one document (embedding plus both writes).
    pub fn record_indexing(&self, duration_ms: f64) {
        if let Ok(mut inner) = self.inner.write() {
            inner.indexing.record(duration_ms);
        }
    }

    pub fn record_search(&self, sample: &SearchSample) {
        if let Ok(mut inner) = self.inner.write() {
            if let Some(ms) = sample.lexical_ms {
                inner.search_lexical.record(ms);
            }
            if let Some(ms) = sample.semantic_ms {
                inner.search_semantic.record(ms);
            }
            inner.search_fusion.record(sample.fusion_ms);
            if let Some(ms) = sample.rerank_ms {
                inner.search_rerank.record(ms);
            }
            inner.search_total.record(sample.total_ms);
            inner.last_search = Some(LastSearchInfo {
                result_count: sample.result_count,
                lexical_count: sample.lexical_count,
                semantic_count: sample.semantic_count,
                top_score: sample.top_score,
            });
        }
    }

    pub fn record_degraded_search(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.degraded_searches += 1;
        }
    }

    pub fn record_unavailable_search(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.unavailable_searches += 1;
        }
    }

    pub fn record_reranker_fallback(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.reranker_fallbacks += 1;
        }
    }

    /// Record a failed write: undone if `rolled_back`, otherwise pending repair.
    pub fn record_write_failure(&self, rolled_back: bool) {
        if let Ok(mut inner) = self.inner.write() {
            if rolled_back {
                inner.rollbacks += 1;
            } else {
                inner.compensation_failures += 1;
            }
        }
    }

    /// Prune old samples outside the windows.
    pub fn prune(&self) {
        if let Ok(mut inner) = self.inner.write() {
            inner.indexing.prune(self.window);

            inner.search_lexical.prune(self.search_window);
            inner.search_semantic.prune(self.search_window);
            inner.search_fusion.prune(self.search_window);
            inner.search_rerank.prune(self.search_window);
            inner.search_total.prune(self.search_window);
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = match self.inner.read() {
            Ok(inner) => inner,
            Err(_) => return MetricsSnapshot::default(),
        };

        let last = inner.last_search.as_ref();
        let w = self.search_window;

        MetricsSnapshot {
            indexing_avg_ms: inner.indexing.rolling_avg(self.window),
            indexing_count: inner.indexing.rolling_count(self.window),
            indexing_throughput: inner.indexing.throughput(self.window),
            total_documents_indexed: inner.indexing.total_count,

            search: SearchSnapshot {
                lexical_avg_ms: inner.search_lexical.rolling_avg(w),
                semantic_avg_ms: inner.search_semantic.rolling_avg(w),
                fusion_avg_ms: inner.search_fusion.rolling_avg(w),
                rerank_avg_ms: inner.search_rerank.rolling_avg(w),
                total_latency_avg_ms: inner.search_total.rolling_avg(w),
                query_count: inner.search_total.rolling_count(w),

                last_result_count: last.map(|s| s.result_count),
                last_lexical_count: last.map(|s| s.lexical_count),
                last_semantic_count: last.map(|s| s.semantic_count),
                last_top_score: last.and_then(|s| s.top_score),
            },

            degraded_searches: inner.degraded_searches,
            unavailable_searches: inner.unavailable_searches,
            reranker_fallbacks: inner.reranker_fallbacks,
            rollbacks: inner.rollbacks,
            compensation_failures: inner.compensation_failures,
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Resets all counters and samples.
    pub fn clear(&self) {
        if let Ok(mut inner) = self.inner.write() {
            *inner = MetricsInner::default();
        }
    }
}

impl Default for PerformanceMetrics {
    fn default() -> Self {
        Self::new()
    }
}

static GLOBAL_METRICS: Lazy<PerformanceMetrics> = Lazy::new(PerformanceMetrics::new);

/// Process-wide collector.
pub fn global_metrics() -> &'static PerformanceMetrics {
    &GLOBAL_METRICS
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_record_and_snapshot() {
        let metrics = PerformanceMetrics::with_window(60);

        metrics.record_indexing(100.0);
        metrics.record_indexing(200.0);
        metrics.record_indexing(150.0);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.indexing_count, 3);
        assert!((snapshot.indexing_avg_ms.unwrap() - 150.0).abs() < 0.1);
        assert!(snapshot.indexing_throughput > 0.0);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = PerformanceMetrics::new().snapshot();

        assert_eq!(snapshot.indexing_count, 0);
        assert!(snapshot.indexing_avg_ms.is_none());
        assert!(snapshot.search.last_result_count.is_none());
    }

    #[test]
    fn test_prune_old_samples() {
        let metrics = PerformanceMetrics::with_window(1);

        metrics.record_indexing(50.0);
        thread::sleep(Duration::from_millis(1100));

        metrics.prune();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.indexing_count, 0);
        // Lifetime total survives pruning
        assert_eq!(snapshot.total_documents_indexed, 1);
    }

    #[test]
    fn test_search_metrics_recording() {
        let metrics = PerformanceMetrics::new();
        metrics.record_search(&SearchSample {
            lexical_ms: Some(3.0),
            semantic_ms: None,
            fusion_ms: 0.5,
            rerank_ms: Some(8.0),
            total_ms: 12.0,
            result_count: 10,
            lexical_count: 20,
            semantic_count: 0,
            top_score: Some(0.9),
        });

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.search.lexical_avg_ms, Some(3.0));
        assert!(snapshot.search.semantic_avg_ms.is_none());
        assert_eq!(snapshot.search.query_count, 1);
        assert_eq!(snapshot.search.last_result_count, Some(10));
        assert_eq!(snapshot.search.last_lexical_count, Some(20));
        assert!((snapshot.search.last_top_score.unwrap() - 0.9).abs() < 0.01);
    }

    #[test]
    fn test_degradation_counters() {
        let metrics = PerformanceMetrics::new();
        metrics.record_degraded_search();
        metrics.record_degraded_search();
        metrics.record_unavailable_search();
        metrics.record_reranker_fallback();
        metrics.record_write_failure(true);
        metrics.record_write_failure(false);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.degraded_searches, 2);
        assert_eq!(snapshot.unavailable_searches, 1);
        assert_eq!(snapshot.reranker_fallbacks, 1);
        assert_eq!(snapshot.rollbacks, 1);
        assert_eq!(snapshot.compensation_failures, 1);
    }

    #[test]
    fn test_clones_share_data() {
        let metrics = PerformanceMetrics::new();
        metrics.clone().record_reranker_fallback();
        assert_eq!(metrics.snapshot().reranker_fallbacks, 1);
    }

    #[test]
    fn test_clear_metrics() {
        let metrics = PerformanceMetrics::new();
        metrics.record_indexing(100.0);
        metrics.record_search(&SearchSample::default());
        metrics.record_degraded_search();

        metrics.clear();
        let snapshot = metrics.snapshot();

        assert_eq!(snapshot.indexing_count, 0);
        assert!(snapshot.search.last_result_count.is_none());
        assert_eq!(snapshot.degraded_searches, 0);
    }
}
