use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::{Api, ApiResource, DynamicObject, GroupVersionKind, Patch, PatchParams};
use kube::{Client, ResourceExt};
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::analyzer::{parse_cpu_millis, parse_memory_bytes};
use crate::crd::{SCALE_DOWN_ANNOTATION, ScaleDownPolicy, NodeGroup, VPSieNode};
use crate::drain::{self, DrainOutcome, classify_pod, PodClass};
use crate::metrics;
use crate::utilization::{METRICS_FETCH_TIMEOUT, UtilizationSample, UtilizationTracker};

/* ============================= CONFIG ============================= */

pub const DEFAULT_MAX_CONCURRENT_SCALE_DOWNS: usize = 2;

/// Worker count the cluster may never drop below, absent configuration.
pub const DEFAULT_GLOBAL_WORKER_FLOOR: i32 = 1;

const SYSTEM_PRIORITY_CLASSES: [&str; 2] = ["system-cluster-critical", "system-node-critical"];

/* ============================= BLOCKED REASONS ============================= */

/// Why a scale-down candidate was rejected. Ordered as evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockedReason {
    Cooldown,
    Capacity,
    Affinity,
    Pdb,
    LocalStorage,
    SystemPods,
}

impl BlockedReason {
    pub fn label(&self) -> &'static str {
        match self {
            BlockedReason::Cooldown => "cooldown",
            BlockedReason::Capacity => "capacity",
            BlockedReason::Affinity => "affinity",
            BlockedReason::Pdb => "pdb",
            BlockedReason::LocalStorage => "local_storage",
            BlockedReason::SystemPods => "system_pods",
        }
    }
}

/// Outcome of the safety gate for one node.
#[derive(Debug, Clone)]
pub struct SafetyReport {
    pub node: String,
    pub pass: bool,
    pub reason: Option<BlockedReason>,
    pub message: String,
}

impl SafetyReport {
    fn pass(node: &str) -> Self {
        Self {
            node: node.to_string(),
            pass: true,
            reason: None,
            message: "all safety checks passed".to_string(),
        }
    }

    fn blocked(node: &str, reason: BlockedReason, message: impl Into<String>) -> Self {
        Self {
            node: node.to_string(),
            pass: false,
            reason: Some(reason),
            message: message.into(),
        }
    }
}

/* ============================= VIEW & CANDIDATES ============================= */

/// Last known cluster state a scale-down evaluation runs against.
pub struct GroupView {
    pub group: NodeGroup,
    /// Worker nodes across all groups, for the global floor.
    pub cluster_worker_count: i32,
    pub global_floor: i32,
    /// Pods currently bound to each candidate node.
    pub pods_by_node: HashMap<String, Vec<Pod>>,
    pub pdbs: Vec<PodDisruptionBudget>,
}

#[derive(Debug, Clone)]
pub struct Candidate {
    /// Orchestrator node name.
    pub node_name: String,
    /// Matching VPSieNode object name.
    pub vpsienode: String,
    pub namespace: String,
    pub created_at: Option<DateTime<Utc>>,
    pub mean_cpu: f64,
    pub mean_memory: f64,
}

#[derive(Debug, Clone)]
pub struct ScaleDownDecision {
    pub group: String,
    pub node_name: String,
    pub vpsienode: String,
    pub namespace: String,
    pub mean_cpu: f64,
    pub mean_memory: f64,
}

/* ============================= LABEL SELECTORS ============================= */

fn selector_matches(selector: Option<&LabelSelector>, labels: &std::collections::BTreeMap<String, String>) -> bool {
    let Some(selector) = selector else {
        return true;
    };

    if let Some(match_labels) = &selector.match_labels {
        for (key, value) in match_labels {
            if labels.get(key) != Some(value) {
                return false;
            }
        }
    }

    for expr in selector.match_expressions.as_deref().unwrap_or_default() {
        let current = labels.get(&expr.key);
        let values = expr.values.as_deref().unwrap_or_default();
        let ok = match expr.operator.as_str() {
            "In" => current.is_some_and(|v| values.contains(v)),
            "NotIn" => !current.is_some_and(|v| values.contains(v)),
            "Exists" => current.is_some(),
            "DoesNotExist" => current.is_none(),
            _ => false,
        };
        if !ok {
            return false;
        }
    }

    true
}

/// Every disruption budget matching the pod must allow an eviction right now.
pub fn pdb_allows_eviction(pod: &Pod, pdbs: &[PodDisruptionBudget]) -> bool {
    let empty = Default::default();
    let pod_labels = pod.metadata.labels.as_ref().unwrap_or(&empty);
    let pod_namespace = pod.metadata.namespace.as_deref().unwrap_or("default");

    for pdb in pdbs {
        if pdb.metadata.namespace.as_deref().unwrap_or("default") != pod_namespace {
            continue;
        }
        let selector = pdb.spec.as_ref().and_then(|s| s.selector.as_ref());
        if !selector_matches(selector, pod_labels) {
            continue;
        }
        let allowed = pdb
            .status
            .as_ref()
            .map(|s| s.disruptions_allowed)
            .unwrap_or(0);
        if allowed < 1 {
            return false;
        }
    }
    true
}

/* ============================= SAFETY CHECKS ============================= */

fn uses_local_storage(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.volumes.as_deref())
        .unwrap_or_default()
        .iter()
        .any(|v| v.empty_dir.is_some() || v.host_path.is_some())
}

fn has_required_anti_affinity(pod: &Pod) -> bool {
    pod.spec
        .as_ref()
        .and_then(|s| s.affinity.as_ref())
        .and_then(|a| a.pod_anti_affinity.as_ref())
        .and_then(|aa| aa.required_during_scheduling_ignored_during_execution.as_deref())
        .is_some_and(|terms| !terms.is_empty())
}

fn is_critical_system_pod(pod: &Pod) -> bool {
    let system_namespace = pod
        .metadata
        .namespace
        .as_deref()
        .is_some_and(|ns| ns == "kube-system");
    let critical_priority = pod
        .spec
        .as_ref()
        .and_then(|s| s.priority_class_name.as_deref())
        .is_some_and(|p| SYSTEM_PRIORITY_CLASSES.contains(&p));
    system_namespace || critical_priority
}

fn parse_rfc3339(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Run the six safety checks in order; the first failure wins.
///
/// Order: cooldown, capacity, affinity, pdb, local_storage, system_pods.
pub fn run_safety_checks(candidate: &Candidate, view: &GroupView, now: DateTime<Utc>) -> SafetyReport {
    let group_name = view.group.name_any();

    // 1. cooldown: no drain inside the post-scale-up window.
    let cooldown = ScaleDownPolicy::cooldown(view.group.spec.scale_down.as_ref());
    if let Some(last_up) = view
        .group
        .status
        .as_ref()
        .and_then(|s| s.last_scale_up_time.as_deref())
        .and_then(parse_rfc3339)
    {
        let elapsed = now.signed_duration_since(last_up);
        if elapsed < chrono::Duration::seconds(cooldown as i64) {
            return SafetyReport::blocked(
                &candidate.node_name,
                BlockedReason::Cooldown,
                format!("group {group_name} scaled up {}s ago (cooldown {cooldown}s)", elapsed.num_seconds()),
            );
        }
    }

    // 2. capacity: stay at or above group min and the cluster floor.
    let current = view.group.current_nodes();
    if current - 1 < view.group.spec.min_nodes {
        return SafetyReport::blocked(
            &candidate.node_name,
            BlockedReason::Capacity,
            format!("removal would drop {group_name} below minNodes={}", view.group.spec.min_nodes),
        );
    }
    if view.cluster_worker_count - 1 < view.global_floor {
        return SafetyReport::blocked(
            &candidate.node_name,
            BlockedReason::Capacity,
            format!("removal would drop the cluster below the {} worker floor", view.global_floor),
        );
    }

    let no_pods = Vec::new();
    let pods = view
        .pods_by_node
        .get(&candidate.node_name)
        .unwrap_or(&no_pods);
    let evictable: Vec<&Pod> = pods
        .iter()
        .filter(|p| classify_pod(p) == PodClass::Evictable)
        .collect();

    // 3. affinity: required anti-affinity may pin a pod to this topology.
    for pod in &evictable {
        if has_required_anti_affinity(pod) {
            return SafetyReport::blocked(
                &candidate.node_name,
                BlockedReason::Affinity,
                format!("pod {} carries required anti-affinity", pod.name_any()),
            );
        }
    }

    // 4. pdb: every evictable pod must be disruptable right now.
    for pod in &evictable {
        if !pdb_allows_eviction(pod, &view.pdbs) {
            return SafetyReport::blocked(
                &candidate.node_name,
                BlockedReason::Pdb,
                format!("disruption budget blocks eviction of {}", pod.name_any()),
            );
        }
    }

    // 5. local_storage: emptyDir/hostPath data is lost on eviction.
    if !view.group.skips_local_storage() {
        for pod in &evictable {
            if uses_local_storage(pod) {
                return SafetyReport::blocked(
                    &candidate.node_name,
                    BlockedReason::LocalStorage,
                    format!("pod {} uses local storage", pod.name_any()),
                );
            }
        }
    }

    // 6. system_pods: critical system pods must not lose their node.
    for pod in &evictable {
        if is_critical_system_pod(pod) {
            return SafetyReport::blocked(
                &candidate.node_name,
                BlockedReason::SystemPods,
                format!("critical system pod {} runs here", pod.name_any()),
            );
        }
    }

    SafetyReport::pass(&candidate.node_name)
}

/* ============================= RANKING ============================= */

/// Lowest utilization first, youngest node breaking ties, then name.
///
/// Preferring the youngest keeps long-running warm nodes in place.
pub fn rank_candidates(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        let ua = (a.mean_cpu + a.mean_memory) / 2.0;
        let ub = (b.mean_cpu + b.mean_memory) / 2.0;
        ua.total_cmp(&ub)
            .then_with(|| b.created_at.cmp(&a.created_at))
            .then_with(|| a.node_name.cmp(&b.node_name))
    });
    candidates
}

/* ============================= EVALUATION ============================= */

/// Pure-state evaluation: under-utilization gate, safety gate, ranking.
///
/// Blocked-reason counters are bumped per reason and group. At most `needed`
/// decisions are returned.
pub async fn evaluate_scale_down(
    tracker: &UtilizationTracker,
    view: &GroupView,
    candidates: Vec<Candidate>,
    needed: usize,
) -> (Vec<ScaleDownDecision>, Vec<SafetyReport>) {
    let group_name = view.group.name_any();
    let policy = view.group.spec.scale_down.as_ref();

    if !ScaleDownPolicy::is_enabled(policy) {
        return (Vec::new(), Vec::new());
    }

    let cpu_threshold = ScaleDownPolicy::cpu_threshold(policy);
    let memory_threshold = ScaleDownPolicy::memory_threshold(policy);
    let now = Utc::now();

    let mut reports = Vec::new();
    let mut passing = Vec::new();

    for mut candidate in candidates {
        if !tracker
            .is_underutilized(&candidate.node_name, cpu_threshold, memory_threshold)
            .await
        {
            continue;
        }
        if let Some(u) = tracker.get(&candidate.node_name).await {
            candidate.mean_cpu = u.mean_cpu;
            candidate.mean_memory = u.mean_memory;
        }

        let report = run_safety_checks(&candidate, view, now);
        if report.pass {
            passing.push(candidate);
        } else if let Some(reason) = report.reason {
            metrics::SCALE_DOWN_BLOCKED
                .with_label_values(&[reason.label(), &group_name])
                .inc();
            info!(
                node = %candidate.node_name,
                group = %group_name,
                reason = reason.label(),
                "scale_down_blocked"
            );
        }
        reports.push(report);
    }

    let decisions = rank_candidates(passing)
        .into_iter()
        .take(needed)
        .map(|c| ScaleDownDecision {
            group: group_name.clone(),
            node_name: c.node_name,
            vpsienode: c.vpsienode,
            namespace: c.namespace,
            mean_cpu: c.mean_cpu,
            mean_memory: c.mean_memory,
        })
        .collect();

    (decisions, reports)
}

/* ============================= MANAGER ============================= */

/// Owns utilization refresh, scale-down evaluation, and drain execution.
pub struct ScaleDownManager {
    client: Client,
    pub tracker: Arc<UtilizationTracker>,
    drain_permits: Arc<Semaphore>,
    pub global_floor: i32,
    eviction_timeout: Duration,
}

impl ScaleDownManager {
    pub fn new(
        client: Client,
        tracker: Arc<UtilizationTracker>,
        max_concurrent: usize,
        global_floor: i32,
        eviction_timeout: Duration,
    ) -> Self {
        Self {
            client,
            tracker,
            drain_permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            global_floor,
            eviction_timeout,
        }
    }

    /// Refresh per-node utilization from the metrics API.
    ///
    /// The fetch runs without any tracker lock held; departed nodes are
    /// garbage-collected in the same pass.
    pub async fn update_node_utilization(&self) -> anyhow::Result<()> {
        let nodes: Api<Node> = Api::all(self.client.clone());
        let node_list = timeout(METRICS_FETCH_TIMEOUT, nodes.list(&Default::default()))
            .await
            .map_err(|_| anyhow::anyhow!("node list timed out"))??;

        let mut capacity: HashMap<String, (i64, i64)> = HashMap::new();
        let mut live: HashSet<String> = HashSet::new();
        for node in &node_list.items {
            let name = node.name_any();
            live.insert(name.clone());
            let cap = node.status.as_ref().and_then(|s| s.capacity.as_ref());
            let cpu = cap
                .and_then(|c| c.get("cpu"))
                .map(|q| parse_cpu_millis(&q.0))
                .unwrap_or(0);
            let memory = cap
                .and_then(|c| c.get("memory"))
                .map(|q| parse_memory_bytes(&q.0))
                .unwrap_or(0);
            capacity.insert(name, (cpu, memory));
        }

        let gvk = GroupVersionKind::gvk("metrics.k8s.io", "v1beta1", "NodeMetrics");
        let resource = ApiResource::from_gvk_with_plural(&gvk, "nodes");
        let metrics_api: Api<DynamicObject> = Api::all_with(self.client.clone(), &resource);

        let usage_list = timeout(METRICS_FETCH_TIMEOUT, metrics_api.list(&Default::default()))
            .await
            .map_err(|_| anyhow::anyhow!("node metrics fetch timed out"))??;

        let taken_at = Utc::now();
        for item in usage_list.items {
            let name = item.name_any();
            let Some((cpu_capacity, memory_capacity)) = capacity.get(&name).copied() else {
                continue;
            };
            let usage = &item.data["usage"];
            let cpu_used = usage["cpu"].as_str().map(parse_cpu_millis).unwrap_or(0);
            let memory_used = usage["memory"].as_str().map(parse_memory_bytes).unwrap_or(0);

            let sample = UtilizationSample {
                cpu_percent: percent(cpu_used, cpu_capacity),
                memory_percent: percent(memory_used, memory_capacity),
                taken_at,
            };
            self.tracker.record(&name, sample).await;
        }

        self.tracker.retain_nodes(&live).await;
        Ok(())
    }

    /// Drain the node and hand cloud-side deletion to the node reconciler.
    ///
    /// On drain success the VPSieNode is annotated for termination; the
    /// manager itself never touches the cloud API. On failure the cordon
    /// guard uncordons in the background and a blocked metric is emitted.
    pub async fn execute(&self, decision: &ScaleDownDecision) -> anyhow::Result<()> {
        let _permit = self
            .drain_permits
            .acquire()
            .await
            .map_err(|_| anyhow::anyhow!("drain permits closed"))?;

        info!(
            node = %decision.node_name,
            group = %decision.group,
            mean_cpu = decision.mean_cpu,
            mean_memory = decision.mean_memory,
            "scale_down_executing"
        );

        let report = drain::drain_node(&self.client, &decision.node_name, self.eviction_timeout).await;

        match report.outcome {
            DrainOutcome::Success => {
                let api: Api<VPSieNode> =
                    Api::namespaced(self.client.clone(), &decision.namespace);
                let patch = serde_json::json!({
                    "metadata": {
                        "annotations": { SCALE_DOWN_ANNOTATION: "true" }
                    }
                });
                api.patch(
                    &decision.vpsienode,
                    &PatchParams::apply("vpsie-autoscaler"),
                    &Patch::Merge(&patch),
                )
                .await?;

                metrics::SCALE_DOWN_TOTAL
                    .with_label_values(&[&decision.group])
                    .inc();
                info!(
                    node = %decision.node_name,
                    vpsienode = %decision.vpsienode,
                    "scale_down_drained_and_marked"
                );
                Ok(())
            }
            outcome => {
                let reason = match outcome {
                    DrainOutcome::PdbBlocked => BlockedReason::Pdb.label(),
                    _ => outcome.label(),
                };
                metrics::SCALE_DOWN_BLOCKED
                    .with_label_values(&[reason, &decision.group])
                    .inc();
                warn!(
                    node = %decision.node_name,
                    outcome = outcome.label(),
                    "scale_down_drain_failed"
                );
                anyhow::bail!("drain of {} failed: {}", decision.node_name, outcome.label())
            }
        }
    }
}

fn percent(used: i64, capacity: i64) -> f64 {
    if capacity <= 0 {
        return 0.0;
    }
    (used as f64 / capacity as f64) * 100.0
}

/* ============================= TESTS ============================= */
