use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::metrics;

/* ============================= CONFIG ============================= */

/// Samples kept per node.
pub const DEFAULT_SAMPLE_WINDOW: usize = 10;

pub const DEFAULT_COLLECTION_INTERVAL: Duration = Duration::from_secs(60);

/// Deadline for one metrics fetch; strictly below the collection interval.
pub const METRICS_FETCH_TIMEOUT: Duration = Duration::from_secs(45);

/* ============================= TYPES ============================= */

#[derive(Debug, Clone, PartialEq)]
pub struct UtilizationSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub taken_at: DateTime<Utc>,
}

/// Deep-copied view of one node's sample ring.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeUtilization {
    pub node: String,
    pub mean_cpu: f64,
    pub mean_memory: f64,
    pub samples: Vec<UtilizationSample>,
}

impl NodeUtilization {
    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }
}

/* ============================= TRACKER ============================= */

/// Sliding-window utilization tracker keyed by node name.
///
/// The metrics loop writes, the scale-down evaluator reads. The lock is held
/// only for map access, never across the metrics fetch, and every read hands
/// out an independent copy.
pub struct UtilizationTracker {
    rings: RwLock<HashMap<String, VecDeque<UtilizationSample>>>,
    window: usize,
    /// Samples required before a node may be declared under-utilized.
    pub min_samples: usize,
}

impl Default for UtilizationTracker {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_WINDOW, 3)
    }
}

impl UtilizationTracker {
    pub fn new(window: usize, min_samples: usize) -> Self {
        Self {
            rings: RwLock::new(HashMap::new()),
            window: window.max(1),
            min_samples: min_samples.max(1),
        }
    }

    pub async fn record(&self, node: &str, sample: UtilizationSample) {
        metrics::NODE_CPU_UTILIZATION
            .with_label_values(&[node])
            .set(sample.cpu_percent);
        metrics::NODE_MEMORY_UTILIZATION
            .with_label_values(&[node])
            .set(sample.memory_percent);

        let mut rings = self.rings.write().await;
        let ring = rings.entry(node.to_string()).or_default();
        if ring.len() == self.window {
            ring.pop_front();
        }
        ring.push_back(sample);
    }

    /// Drop rings for nodes no longer present in the cluster listing.
    pub async fn retain_nodes(&self, live: &HashSet<String>) {
        let mut rings = self.rings.write().await;
        rings.retain(|node, _| {
            let keep = live.contains(node);
            if !keep {
                let _ = metrics::NODE_CPU_UTILIZATION.remove_label_values(&[node]);
                let _ = metrics::NODE_MEMORY_UTILIZATION.remove_label_values(&[node]);
            }
            keep
        });
    }

    pub async fn get(&self, node: &str) -> Option<NodeUtilization> {
        let rings = self.rings.read().await;
        rings.get(node).map(|ring| snapshot(node, ring))
    }

    pub async fn all(&self) -> Vec<NodeUtilization> {
        let rings = self.rings.read().await;
        let mut out: Vec<NodeUtilization> = rings
            .iter()
            .map(|(node, ring)| snapshot(node, ring))
            .collect();
        out.sort_by(|a, b| a.node.cmp(&b.node));
        out
    }

    pub async fn tracked_nodes(&self) -> HashSet<String> {
        self.rings.read().await.keys().cloned().collect()
    }

    /// Both means below threshold, with a full minimum of samples recorded.
    pub async fn is_underutilized(
        &self,
        node: &str,
        cpu_threshold_percent: u32,
        memory_threshold_percent: u32,
    ) -> bool {
        match self.get(node).await {
            Some(u) => {
                u.sample_count() >= self.min_samples
                    && u.mean_cpu < cpu_threshold_percent as f64
                    && u.mean_memory < memory_threshold_percent as f64
            }
            None => false,
        }
    }
}

fn snapshot(node: &str, ring: &VecDeque<UtilizationSample>) -> NodeUtilization {
    let count = ring.len().max(1) as f64;
    let mean_cpu = ring.iter().map(|s| s.cpu_percent).sum::<f64>() / count;
    let mean_memory = ring.iter().map(|s| s.memory_percent).sum::<f64>() / count;
    NodeUtilization {
        node: node.to_string(),
        mean_cpu,
        mean_memory,
        samples: ring.iter().cloned().collect(),
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(cpu: f64, memory: f64) -> UtilizationSample {
        UtilizationSample {
            cpu_percent: cpu,
            memory_percent: memory,
            taken_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_means_over_ring() {
        let tracker = UtilizationTracker::new(10, 3);
        tracker.record("n1", sample(10.0, 20.0)).await;
        tracker.record("n1", sample(30.0, 40.0)).await;

        let u = tracker.get("n1").await.expect("node tracked");
        assert!((u.mean_cpu - 20.0).abs() < 1e-9);
        assert!((u.mean_memory - 30.0).abs() < 1e-9);
        assert_eq!(u.sample_count(), 2);
    }

    #[tokio::test]
    async fn test_ring_bounded_at_window() {
        let tracker = UtilizationTracker::new(3, 1);
        for i in 0..10 {
            tracker.record("n1", sample(i as f64, 0.0)).await;
        }
        let u = tracker.get("n1").await.expect("node tracked");
        assert_eq!(u.sample_count(), 3);
        // Oldest samples dropped: 7, 8, 9 remain
        assert!((u.mean_cpu - 8.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_reads_are_deep_copies() {
        let tracker = UtilizationTracker::new(10, 1);
        tracker.record("n1", sample(10.0, 10.0)).await;

        let mut first = tracker.get("n1").await.expect("node tracked");
        first.samples[0].cpu_percent = 99.0;
        first.mean_cpu = 99.0;

        let second = tracker.get("n1").await.expect("node tracked");
        assert!((second.samples[0].cpu_percent - 10.0).abs() < 1e-9);
        assert!((second.mean_cpu - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_gc_removes_departed_nodes() {
        let tracker = UtilizationTracker::new(10, 1);
        tracker.record("n1", sample(10.0, 10.0)).await;
        tracker.record("n2", sample(10.0, 10.0)).await;

        let live: HashSet<String> = ["n1".to_string()].into_iter().collect();
        tracker.retain_nodes(&live).await;

        assert!(tracker.get("n1").await.is_some());
        assert!(tracker.get("n2").await.is_none());
        assert_eq!(tracker.tracked_nodes().await, live);
    }

    #[tokio::test]
    async fn test_underutilized_requires_min_samples() {
        let tracker = UtilizationTracker::new(10, 3);
        tracker.record("n1", sample(5.0, 5.0)).await;
        tracker.record("n1", sample(5.0, 5.0)).await;
        assert!(!tracker.is_underutilized("n1", 20, 20).await);

        tracker.record("n1", sample(5.0, 5.0)).await;
        assert!(tracker.is_underutilized("n1", 20, 20).await);
    }

    #[tokio::test]
    async fn test_underutilized_requires_both_means_below() {
        let tracker = UtilizationTracker::new(10, 1);
        tracker.record("busy-mem", sample(5.0, 80.0)).await;
        assert!(!tracker.is_underutilized("busy-mem", 20, 20).await);

        tracker.record("busy-cpu", sample(80.0, 5.0)).await;
        assert!(!tracker.is_underutilized("busy-cpu", 20, 20).await);

        tracker.record("idle", sample(5.0, 5.0)).await;
        assert!(tracker.is_underutilized("idle", 20, 20).await);
    }

    #[tokio::test]
    async fn test_unknown_node_is_not_underutilized() {
        let tracker = UtilizationTracker::default();
        assert!(!tracker.is_underutilized("ghost", 99, 99).await);
        assert!(tracker.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_all_sorted_by_node_name() {
        let tracker = UtilizationTracker::new(10, 1);
        tracker.record("zeta", sample(1.0, 1.0)).await;
        tracker.record("alpha", sample(1.0, 1.0)).await;
        let all = tracker.all().await;
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].node, "alpha");
        assert_eq!(all[1].node, "zeta");
    }
}
