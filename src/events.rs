use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Pod;
use tokio::sync::Mutex;
use tracing::debug;

use crate::metrics;

/* ============================= CLASSIFICATION ============================= */

/// Scheduling constraint extracted from an unschedulable-pod message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceConstraint {
    Cpu,
    Memory,
    Pods,
    Unknown,
}

/// Classify the scheduler's human-readable failure message.
///
/// Matching is case-insensitive substring search; anything unrecognized is
/// Unknown and still counts toward pod-count pressure.
pub fn classify_constraint(message: &str) -> ResourceConstraint {
    let lower = message.to_lowercase();
    if lower.contains("insufficient cpu") {
        ResourceConstraint::Cpu
    } else if lower.contains("insufficient memory") {
        ResourceConstraint::Memory
    } else if lower.contains("too many pods") {
        ResourceConstraint::Pods
    } else {
        ResourceConstraint::Unknown
    }
}

/// The Unschedulable message of a pod, when the scheduler has given up on it.
pub fn unschedulable_message(pod: &Pod) -> Option<String> {
    let conditions = pod.status.as_ref()?.conditions.as_ref()?;
    conditions
        .iter()
        .find(|c| {
            c.type_ == "PodScheduled" && c.status == "False" && c.reason.as_deref() == Some("Unschedulable")
        })
        .map(|c| c.message.clone().unwrap_or_default())
}

/* ============================= EVENTS ============================= */

#[derive(Debug, Clone)]
pub struct SchedulingEvent {
    /// Snapshot of the pod at observation time, used for deficit math.
    pub pod: Pod,
    pub observed_at: DateTime<Utc>,
    pub constraint: ResourceConstraint,
    pub message: String,
}

impl SchedulingEvent {
    pub fn pod_key(&self) -> String {
        format!(
            "{}/{}",
            self.pod.metadata.namespace.as_deref().unwrap_or("default"),
            self.pod.metadata.name.as_deref().unwrap_or_default()
        )
    }
}

/* ============================= WATCHER STATE ============================= */

/// Buffers unschedulable-pod events and debounces scale-up decisions.
///
/// Two rules: stale events (older than the stabilization window) are dropped
/// when the buffer is drained, and a NodeGroup that scaled recently is held
/// in cooldown until the window has fully elapsed.
pub struct PendingPodWatcher {
    buffer: Mutex<Vec<SchedulingEvent>>,
    cooldowns: Mutex<HashMap<String, DateTime<Utc>>>,
    stabilization_window: Duration,
}

impl PendingPodWatcher {
    pub fn new(stabilization_window: Duration) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            cooldowns: Mutex::new(HashMap::new()),
            stabilization_window,
        }
    }

    pub fn stabilization_window(&self) -> Duration {
        self.stabilization_window
    }

    /// Buffer-drain cadence.
    pub fn tick_interval(&self) -> Duration {
        self.stabilization_window.min(Duration::from_secs(30))
    }

    /// Record a pod if the scheduler marked it unschedulable.
    ///
    /// Returns true when an event was buffered.
    pub async fn observe(&self, pod: &Pod) -> bool {
        let Some(message) = unschedulable_message(pod) else {
            return false;
        };
        let constraint = classify_constraint(&message);

        metrics::PENDING_POD_EVENTS.inc();
        debug!(
            pod = %pod.metadata.name.as_deref().unwrap_or_default(),
            constraint = ?constraint,
            "pending_pod_observed"
        );

        let mut buffer = self.buffer.lock().await;
        buffer.push(SchedulingEvent {
            pod: pod.clone(),
            observed_at: Utc::now(),
            constraint,
            message,
        });
        true
    }

    /// Empty the buffer, returning only events still within the window.
    pub async fn drain(&self) -> Vec<SchedulingEvent> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.stabilization_window)
                .unwrap_or_else(|_| chrono::Duration::seconds(300));
        let mut buffer = self.buffer.lock().await;
        let drained: Vec<SchedulingEvent> = buffer
            .drain(..)
            .filter(|e| e.observed_at >= cutoff)
            .collect();
        drained
    }

    /// Whether the group scaled within the stabilization window.
    pub async fn in_cooldown(&self, group: &str) -> bool {
        let cooldowns = self.cooldowns.lock().await;
        match cooldowns.get(group) {
            Some(last) => {
                let elapsed = Utc::now().signed_duration_since(*last);
                elapsed
                    < chrono::Duration::from_std(self.stabilization_window)
                        .unwrap_or_else(|_| chrono::Duration::seconds(300))
            }
            None => false,
        }
    }

    /// Mark a scale event for the group, starting its cooldown.
    pub async fn record_scale(&self, group: &str) {
        let mut cooldowns = self.cooldowns.lock().await;
        cooldowns.insert(group.to_string(), Utc::now());
    }

    /// Last recorded scale time for the group.
    pub async fn last_scale(&self, group: &str) -> Option<DateTime<Utc>> {
        self.cooldowns.lock().await.get(group).copied()
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

    fn unschedulable_pod(name: &str, message: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "PodScheduled".to_string(),
                    status: "False".to_string(),
                    reason: Some("Unschedulable".to_string()),
                    message: Some(message.to_string()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn scheduled_pod(name: &str) -> Pod {
        Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                conditions: Some(vec![PodCondition {
                    type_: "PodScheduled".to_string(),
                    status: "True".to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_classify_constraint_table() {
        assert_eq!(
            classify_constraint("0/3 nodes are available: 3 Insufficient cpu."),
            ResourceConstraint::Cpu
        );
        assert_eq!(
            classify_constraint("0/3 nodes are available: 1 INSUFFICIENT MEMORY."),
            ResourceConstraint::Memory
        );
        assert_eq!(
            classify_constraint("0/3 nodes are available: 3 Too many pods."),
            ResourceConstraint::Pods
        );
        assert_eq!(
            classify_constraint("node(s) had untolerated taint"),
            ResourceConstraint::Unknown
        );
        assert_eq!(classify_constraint(""), ResourceConstraint::Unknown);
    }

    #[test]
    fn test_unschedulable_message_extraction() {
        let pod = unschedulable_pod("p", "0/3 nodes are available: 3 Insufficient cpu.");
        assert_eq!(
            unschedulable_message(&pod).as_deref(),
            Some("0/3 nodes are available: 3 Insufficient cpu.")
        );
        assert!(unschedulable_message(&scheduled_pod("q")).is_none());
        assert!(unschedulable_message(&Pod::default()).is_none());
    }

    #[tokio::test]
    async fn test_observe_buffers_only_unschedulable_pods() {
        let watcher = PendingPodWatcher::new(Duration::from_secs(300));
        assert!(
            watcher
                .observe(&unschedulable_pod("p", "Insufficient cpu"))
                .await
        );
        assert!(!watcher.observe(&scheduled_pod("q")).await);

        let events = watcher.drain().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pod_key(), "default/p");
        assert_eq!(events[0].constraint, ResourceConstraint::Cpu);
    }

    #[tokio::test]
    async fn test_drain_empties_buffer() {
        let watcher = PendingPodWatcher::new(Duration::from_secs(300));
        watcher
            .observe(&unschedulable_pod("p", "Insufficient memory"))
            .await;
        assert_eq!(watcher.drain().await.len(), 1);
        assert!(watcher.drain().await.is_empty());
    }

    #[tokio::test]
    async fn test_drain_filters_stale_events() {
        let watcher = PendingPodWatcher::new(Duration::from_secs(300));
        {
            let mut buffer = watcher.buffer.lock().await;
            buffer.push(SchedulingEvent {
                pod: unschedulable_pod("old", "Insufficient cpu"),
                observed_at: Utc::now() - chrono::Duration::seconds(600),
                constraint: ResourceConstraint::Cpu,
                message: String::new(),
            });
            buffer.push(SchedulingEvent {
                pod: unschedulable_pod("fresh", "Insufficient cpu"),
                observed_at: Utc::now(),
                constraint: ResourceConstraint::Cpu,
                message: String::new(),
            });
        }

        let events = watcher.drain().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].pod_key(), "default/fresh");
    }

    #[tokio::test]
    async fn test_cooldown_blocks_until_window_elapses() {
        let watcher = PendingPodWatcher::new(Duration::from_secs(300));
        assert!(!watcher.in_cooldown("g").await);

        watcher.record_scale("g").await;
        assert!(watcher.in_cooldown("g").await);
        assert!(!watcher.in_cooldown("other").await);

        // Backdate the scale past the window
        {
            let mut cooldowns = watcher.cooldowns.lock().await;
            cooldowns.insert(
                "g".to_string(),
                Utc::now() - chrono::Duration::seconds(301),
            );
        }
        assert!(!watcher.in_cooldown("g").await);
    }

    #[test]
    fn test_tick_interval_capped_at_30s() {
        let slow = PendingPodWatcher::new(Duration::from_secs(600));
        assert_eq!(slow.tick_interval(), Duration::from_secs(30));

        let fast = PendingPodWatcher::new(Duration::from_secs(10));
        assert_eq!(fast.tick_interval(), Duration::from_secs(10));
    }
}
