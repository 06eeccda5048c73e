use std::collections::HashSet;

use k8s_openapi::api::core::v1::{Pod, Toleration};

use crate::cost::ResourceRequirements;
use crate::crd::{GroupTaint, NodeGroup};

/* ============================= CONSTANTS ============================= */

/// Kubelet default pods-per-node cap.
pub const MAX_PODS_PER_NODE: i64 = 110;

const SCORE_PER_MATCHING_POD: i64 = 100;
const SCORE_PER_FREE_SLOT: i64 = 50;
const SCORE_HAS_HEADROOM: i64 = 200;
const SCORE_PREFERRED_TYPE: i64 = 100;

/* ============================= QUANTITIES ============================= */

/// Parse a Kubernetes CPU quantity into millicores.
///
/// Accepts the `m` suffix ("1500m") and plain core counts ("2", "0.5").
/// Unparseable input counts as zero.
pub fn parse_cpu_millis(quantity: &str) -> i64 {
    let q = quantity.trim();
    if q.is_empty() {
        return 0;
    }
    if let Some(millis) = q.strip_suffix('m') {
        return millis.parse::<i64>().unwrap_or(0);
    }
    match q.parse::<f64>() {
        Ok(cores) if cores >= 0.0 => (cores * 1000.0).round() as i64,
        _ => 0,
    }
}

/// Parse a Kubernetes memory quantity into bytes.
///
/// Supports binary (Ki Mi Gi Ti) and decimal (K M G T) suffixes; a bare
/// number is bytes. Unparseable input counts as zero.
pub fn parse_memory_bytes(quantity: &str) -> i64 {
    let q = quantity.trim();
    if q.is_empty() {
        return 0;
    }

    let suffixes: [(&str, i64); 8] = [
        ("Ti", 1 << 40),
        ("Gi", 1 << 30),
        ("Mi", 1 << 20),
        ("Ki", 1 << 10),
        ("T", 1_000_000_000_000),
        ("G", 1_000_000_000),
        ("M", 1_000_000),
        ("K", 1_000),
    ];

    for (suffix, multiplier) in suffixes {
        if let Some(value) = q.strip_suffix(suffix) {
            return match value.parse::<f64>() {
                Ok(n) if n >= 0.0 => (n * multiplier as f64).round() as i64,
                _ => 0,
            };
        }
    }

    q.parse::<i64>().unwrap_or(0)
}

/* ============================= DEFICIT ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResourceDeficit {
    pub cpu_millis: i64,
    pub memory_bytes: i64,
    pub pod_count: i64,
}

impl ResourceDeficit {
    pub fn is_zero(&self) -> bool {
        self.cpu_millis == 0 && self.memory_bytes == 0 && self.pod_count == 0
    }
}

fn container_requests(resources: Option<&k8s_openapi::api::core::v1::ResourceRequirements>) -> (i64, i64) {
    let Some(requests) = resources.and_then(|r| r.requests.as_ref()) else {
        return (0, 0);
    };
    let cpu = requests
        .get("cpu")
        .map(|q| parse_cpu_millis(&q.0))
        .unwrap_or(0);
    let memory = requests
        .get("memory")
        .map(|q| parse_memory_bytes(&q.0))
        .unwrap_or(0);
    (cpu, memory)
}

/// Total requests of one pod.
///
/// Regular containers (sidecars included) run together and are summed.
/// Init containers run sequentially, so they contribute their maximum.
pub fn pod_requests(pod: &Pod) -> (i64, i64) {
    let Some(spec) = &pod.spec else {
        return (0, 0);
    };

    let mut cpu: i64 = 0;
    let mut memory: i64 = 0;
    for container in &spec.containers {
        let (c, m) = container_requests(container.resources.as_ref());
        cpu += c;
        memory += m;
    }

    let mut init_cpu_max: i64 = 0;
    let mut init_memory_max: i64 = 0;
    for init in spec.init_containers.as_deref().unwrap_or_default() {
        let (c, m) = container_requests(init.resources.as_ref());
        init_cpu_max = init_cpu_max.max(c);
        init_memory_max = init_memory_max.max(m);
    }

    (cpu.max(init_cpu_max), memory.max(init_memory_max))
}

fn pod_key(pod: &Pod) -> String {
    format!(
        "{}/{}",
        pod.metadata.namespace.as_deref().unwrap_or("default"),
        pod.metadata.name.as_deref().unwrap_or_default()
    )
}

/// Aggregate deficit over a set of pending pods, deduplicated by pod key.
pub fn calculate_deficit(pods: &[Pod]) -> ResourceDeficit {
    let mut seen = HashSet::new();
    let mut deficit = ResourceDeficit::default();

    for pod in pods {
        if !seen.insert(pod_key(pod)) {
            continue;
        }
        let (cpu, memory) = pod_requests(pod);
        deficit.cpu_millis += cpu;
        deficit.memory_bytes += memory;
        deficit.pod_count += 1;
    }

    deficit
}

/* ============================= MATCHING ============================= */

fn toleration_matches(toleration: &Toleration, taint: &GroupTaint) -> bool {
    let key_matches = match toleration.key.as_deref() {
        // An empty key with Exists tolerates everything.
        None | Some("") => toleration.operator.as_deref() == Some("Exists"),
        Some(key) => key == taint.key,
    };
    if !key_matches {
        return false;
    }

    let effect_matches = match toleration.effect.as_deref() {
        None | Some("") => true,
        Some(effect) => effect == taint.effect,
    };
    if !effect_matches {
        return false;
    }

    match toleration.operator.as_deref() {
        Some("Exists") => true,
        // Equal is the default operator.
        _ => toleration.value.as_deref() == taint.value.as_deref(),
    }
}

/// Whether a pod could schedule onto members of this group.
///
/// The group's labels must satisfy the pod's node selector, and every group
/// taint must be tolerated. A pod without a selector only matches generic
/// (label-free) groups.
pub fn pod_matches_group(pod: &Pod, group: &NodeGroup) -> bool {
    let empty = Default::default();
    let group_labels = group.spec.labels.as_ref().unwrap_or(&empty);
    let selector = pod
        .spec
        .as_ref()
        .and_then(|s| s.node_selector.as_ref())
        .filter(|s| !s.is_empty());

    match selector {
        None => {
            if !group_labels.is_empty() {
                return false;
            }
        }
        Some(selector) => {
            for (key, value) in selector {
                if group_labels.get(key) != Some(value) {
                    return false;
                }
            }
        }
    }

    let tolerations = pod
        .spec
        .as_ref()
        .and_then(|s| s.tolerations.as_deref())
        .unwrap_or_default();

    for taint in group.spec.taints.as_deref().unwrap_or_default() {
        if !tolerations.iter().any(|t| toleration_matches(t, taint)) {
            return false;
        }
    }

    true
}

#[derive(Debug, Clone)]
pub struct NodeGroupMatch {
    pub group: NodeGroup,
    pub matching_pods: Vec<String>,
    pub deficit: ResourceDeficit,
    pub score: i64,
}

/// Match pending pods against candidate groups, best score first.
pub fn find_matching_groups(pods: &[Pod], groups: &[NodeGroup]) -> Vec<NodeGroupMatch> {
    let mut matches = Vec::new();

    for group in groups {
        let matching: Vec<&Pod> = pods
            .iter()
            .filter(|pod| pod_matches_group(pod, group))
            .collect();
        if matching.is_empty() {
            continue;
        }

        let matched_pods: Vec<Pod> = matching.iter().map(|p| (*p).clone()).collect();
        let deficit = calculate_deficit(&matched_pods);

        let desired = group.desired_nodes() as i64;
        let max = group.spec.max_nodes as i64;
        let headroom = (max - desired).max(0);

        let mut score = matching.len() as i64 * SCORE_PER_MATCHING_POD;
        score += headroom * SCORE_PER_FREE_SLOT;
        if desired < max {
            score += SCORE_HAS_HEADROOM;
        }
        if group.spec.preferred_instance_type.is_some() {
            score += SCORE_PREFERRED_TYPE;
        }

        matches.push(NodeGroupMatch {
            group: group.clone(),
            matching_pods: matching.iter().map(|p| pod_key(p)).collect(),
            deficit,
            score,
        });
    }

    matches.sort_by(|a, b| b.score.cmp(&a.score));
    matches
}

/* ============================= SIZING ============================= */

fn div_ceil(value: i64, divisor: i64) -> i64 {
    if divisor <= 0 {
        return 0;
    }
    (value + divisor - 1) / divisor
}

/// Nodes needed to absorb a deficit on the given instance shape; at least 1.
pub fn estimate_nodes_needed(
    deficit: &ResourceDeficit,
    instance_cpu_millis: i64,
    instance_memory_bytes: i64,
) -> i32 {
    let by_cpu = div_ceil(deficit.cpu_millis, instance_cpu_millis);
    let by_memory = div_ceil(deficit.memory_bytes, instance_memory_bytes);
    let by_pods = div_ceil(deficit.pod_count, MAX_PODS_PER_NODE);
    by_cpu.max(by_memory).max(by_pods).max(1) as i32
}

/// A scale-up the decision engine settled on, for logging and status.
#[derive(Debug, Clone)]
pub struct ScaleUpDecision {
    pub group: String,
    pub current_nodes: i32,
    pub desired_nodes: i32,
    pub nodes_to_add: i32,
    pub instance_type: String,
    pub matching_pods: usize,
    pub deficit: ResourceDeficit,
    pub rationale: String,
}

/// The group's preferred offering when listed, else its first offering.
pub fn select_instance_type(group: &NodeGroup) -> Option<String> {
    if let Some(preferred) = &group.spec.preferred_instance_type
        && group.spec.offering_ids.contains(preferred)
    {
        return Some(preferred.clone());
    }
    group.spec.offering_ids.first().cloned()
}

/// Resource floor covering the largest single pod in the set.
///
/// Used by the cost-aware selector: any chosen offering must be able to host
/// the biggest pending pod.
pub fn max_pod_requirements(pods: &[Pod]) -> ResourceRequirements {
    let mut max_cpu_millis: i64 = 0;
    let mut max_memory_bytes: i64 = 0;
    for pod in pods {
        let (cpu, memory) = pod_requests(pod);
        max_cpu_millis = max_cpu_millis.max(cpu);
        max_memory_bytes = max_memory_bytes.max(memory);
    }
    ResourceRequirements {
        min_cpu: div_ceil(max_cpu_millis, 1000),
        min_memory_mb: div_ceil(max_memory_bytes, 1 << 20),
        ..Default::default()
    }
}

/* ============================= TESTS ============================= */
