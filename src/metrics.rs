// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use actix_web::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Paths tracked individually before new ones fall into [`OVERFLOW_PATH`].
pub const DEFAULT_MAX_PATHS: usize = 1000;
pub const OVERFLOW_PATH: &str = "(other)";

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct PathStats {
    pub requests: u64,
    pub errors: u64,
    pub total_latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub started_at: DateTime<Utc>,
    pub total_requests: u64,
    /// Counts for 1xx..5xx, in that order.
    pub status_classes: [u64; 5],
    pub paths: HashMap<String, PathStats>,
}

/// In-process traffic counters, safe to update from every worker.
pub struct TrafficMetrics {
    started_at: DateTime<Utc>,
    total: AtomicU64,
    status_classes: [AtomicU64; 5],
    paths: Mutex<HashMap<String, PathStats>>,
    max_paths: usize,
}

impl Default for TrafficMetrics {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PATHS)
    }
}

impl TrafficMetrics {
    pub fn new(max_paths: usize) -> Self {
        Self {
            started_at: Utc::now(),
            total: AtomicU64::new(0),
            status_classes: Default::default(),
            paths: Mutex::new(HashMap::new()),
            max_paths,
        }
    }

    pub fn record(&self, path: &str, status: StatusCode, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);

        let class = usize::from(status.as_u16() / 100).saturating_sub(1);
        if let Some(counter) = self.status_classes.get(class) {
            counter.fetch_add(1, Ordering::Relaxed);
        }

        let Ok(mut paths) = self.paths.lock() else {
            return;
        };
        let key = if paths.contains_key(path) || paths.len() < self.max_paths {
            path
        } else {
            OVERFLOW_PATH
        };
        let stats = paths.entry(key.to_owned()).or_default();
        stats.requests += 1;
        if status.is_server_error() {
            stats.errors += 1;
        }
        stats.total_latency_ms += u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut status_classes = [0u64; 5];
        for (slot, counter) in status_classes.iter_mut().zip(&self.status_classes) {
            *slot = counter.load(Ordering::Relaxed);
        }

        MetricsSnapshot {
            started_at: self.started_at,
            total_requests: self.total.load(Ordering::Relaxed),
            status_classes,
            paths: self
                .paths
                .lock()
                .map(|paths| paths.clone())
                .unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_counts_by_class_and_path() {
        let metrics = TrafficMetrics::default();
        metrics.record("/", StatusCode::OK, Duration::from_millis(5));
        metrics.record("/", StatusCode::BAD_GATEWAY, Duration::from_millis(7));
        metrics.record("/missing", StatusCode::NOT_FOUND, Duration::from_millis(1));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.status_classes, [0, 1, 0, 1, 1]);

        let root = &snapshot.paths["/"];
        assert_eq!(root.requests, 2);
        assert_eq!(root.errors, 1);
        assert_eq!(root.total_latency_ms, 12);
    }

    #[test]
    fn test_path_cardinality_is_bounded() {
        let metrics = TrafficMetrics::new(2);
        for path in ["/a", "/b", "/c", "/d", "/a"] {
            metrics.record(path, StatusCode::OK, Duration::ZERO);
        }

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.paths.len(), 3);
        assert_eq!(snapshot.paths["/a"].requests, 2);
        assert_eq!(snapshot.paths[OVERFLOW_PATH].requests, 2);
    }
}
