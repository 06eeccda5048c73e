use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/* ============================= WELL-KNOWN KEYS ============================= */

/// Label marking a NodeGroup as managed by this operator.
pub const MANAGED_LABEL: &str = "autoscaler.vpsie.com/managed";

/// Label associating a child VPSieNode with its NodeGroup.
pub const NODEGROUP_LABEL: &str = "autoscaler.vpsie.com/nodegroup";

/// Annotation recording why a NodeGroup was created (metrics, manual, rebalance, initial).
pub const CREATION_REASON_ANNOTATION: &str = "autoscaler.vpsie.com/creation-reason";

/// Annotation mirroring the cloud VM identifier once provisioned.
pub const VPS_ID_ANNOTATION: &str = "autoscaler.vpsie.com/vps-id";

/// Annotation set by the scale-down manager to hand a node to the reconciler
/// for cloud-side termination.
pub const SCALE_DOWN_ANNOTATION: &str = "autoscaler.vpsie.com/scale-down";

/// Annotation on a NodeGroup that lets scale-down evict pods using emptyDir
/// or hostPath volumes.
pub const SKIP_LOCAL_STORAGE_ANNOTATION: &str = "autoscaler.vpsie.com/skip-local-storage";

/// Finalizer guarding cloud VM deletion on VPSieNode removal.
pub const NODE_FINALIZER: &str = "autoscaler.vpsie.com/vps-cleanup";

/// Hard upper bound on maxNodes, enforced at validation in the reconciler.
pub const MAX_NODES_BOUND: i32 = 1000;

/* ============================= SCALING POLICIES ============================= */

/// Scale-up policy for a NodeGroup.
///
/// Omitted fields fall back to operator defaults.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaleUpPolicy {
    /// Whether metric-driven scale-up is enabled for this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// CPU utilization percentage above which scale-up is considered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_threshold_percent: Option<u32>,

    /// Memory utilization percentage above which scale-up is considered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_threshold_percent: Option<u32>,

    /// Seconds a condition must persist before it drives a scale-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilization_window_seconds: Option<u64>,
}

impl ScaleUpPolicy {
    pub fn is_enabled(policy: Option<&ScaleUpPolicy>) -> bool {
        policy.and_then(|p| p.enabled).unwrap_or(true)
    }

    pub fn stabilization_window(policy: Option<&ScaleUpPolicy>) -> u64 {
        policy
            .and_then(|p| p.stabilization_window_seconds)
            .unwrap_or(300)
    }
}

/// Scale-down policy for a NodeGroup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ScaleDownPolicy {
    /// Whether utilization-driven scale-down is enabled for this group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    /// Mean CPU percentage below which a node counts as under-utilized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_threshold_percent: Option<u32>,

    /// Mean memory percentage below which a node counts as under-utilized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_threshold_percent: Option<u32>,

    /// Seconds of sustained under-utilization required before draining.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stabilization_window_seconds: Option<u64>,

    /// Seconds after a scale-up during which no member node may be drained.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooldown_seconds: Option<u64>,
}

impl ScaleDownPolicy {
    pub fn is_enabled(policy: Option<&ScaleDownPolicy>) -> bool {
        policy.and_then(|p| p.enabled).unwrap_or(true)
    }

    pub fn cpu_threshold(policy: Option<&ScaleDownPolicy>) -> u32 {
        policy.and_then(|p| p.cpu_threshold_percent).unwrap_or(20)
    }

    pub fn memory_threshold(policy: Option<&ScaleDownPolicy>) -> u32 {
        policy.and_then(|p| p.memory_threshold_percent).unwrap_or(20)
    }

    pub fn stabilization_window(policy: Option<&ScaleDownPolicy>) -> u64 {
        policy
            .and_then(|p| p.stabilization_window_seconds)
            .unwrap_or(600)
    }

    pub fn cooldown(policy: Option<&ScaleDownPolicy>) -> u64 {
        policy.and_then(|p| p.cooldown_seconds).unwrap_or(600)
    }
}

/// Taint applied to member nodes of a NodeGroup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupTaint {
    pub key: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// NoSchedule, PreferNoSchedule, or NoExecute.
    pub effect: String,
}

/* ============================= CONDITIONS ============================= */

/// Condition types reported on a NodeGroup.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub enum GroupConditionType {
    Ready,
    Scaling,
    Error,
    AtMinCapacity,
    AtMaxCapacity,
}

/// A single observed condition on a NodeGroup.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupCondition {
    #[serde(rename = "type")]
    pub condition_type: GroupConditionType,

    /// "True" or "False".
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl GroupCondition {
    pub fn new(condition_type: GroupConditionType, active: bool) -> Self {
        Self {
            condition_type,
            status: if active { "True" } else { "False" }.to_string(),
            reason: None,
            message: None,
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/* ============================= NODEGROUP ============================= */

/// NodeGroup declares a homogeneous set of VPSie worker VMs with a shared
/// scaling policy.
///
/// The operator only acts on groups carrying the
/// `autoscaler.vpsie.com/managed=true` label.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "autoscaler.vpsie.com",
    version = "v1",
    kind = "NodeGroup",
    plural = "nodegroups",
    shortname = "ng",
    shortname = "ngs",
    status = "NodeGroupStatus",
    namespaced,
    printcolumn = r#"{"name":"Min","type":"integer","jsonPath":".spec.minNodes"}"#,
    printcolumn = r#"{"name":"Max","type":"integer","jsonPath":".spec.maxNodes"}"#,
    printcolumn = r#"{"name":"Desired","type":"integer","jsonPath":".status.desiredNodes"}"#,
    printcolumn = r#"{"name":"Current","type":"integer","jsonPath":".status.currentNodes"}"#,
    printcolumn = r#"{"name":"Ready","type":"integer","jsonPath":".status.readyNodes"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupSpec {
    /// Lower bound on the number of member nodes.
    pub min_nodes: i32,

    /// Upper bound on the number of member nodes.
    pub max_nodes: i32,

    /// Ordered list of VPSie offering identifiers usable for this group.
    /// The first entry is the default instance type.
    pub offering_ids: Vec<String>,

    /// VPSie datacenter identifier.
    pub datacenter_id: String,

    /// OS image identifier for provisioned VMs.
    pub image_id: String,

    /// Kubernetes version for joined nodes (SemVer, with or without a leading v).
    pub kubernetes_version: String,

    /// Labels applied to member nodes and used for pod matching.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<BTreeMap<String, String>>,

    /// Taints applied to member nodes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub taints: Option<Vec<GroupTaint>>,

    /// Offering to prefer when several could satisfy a deficit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_instance_type: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up: Option<ScaleUpPolicy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down: Option<ScaleDownPolicy>,
}

/// Observed state of a NodeGroup, written only by the reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeGroupStatus {
    /// Member VPSieNode objects not in terminal deletion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_nodes: Option<i32>,

    /// The count the autoscaler currently wants, clamped to [min, max].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub desired_nodes: Option<i32>,

    /// Member nodes reporting Ready in the orchestrator.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ready_nodes: Option<i32>,

    /// Opaque VPSie-side group handle, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vpsie_group_id: Option<i64>,

    /// Names of member VPSieNode objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conditions: Option<Vec<GroupCondition>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_up_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_scale_down_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl NodeGroup {
    /// Whether the managed label is present and set to "true".
    pub fn is_managed(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(MANAGED_LABEL))
            .is_some_and(|v| v == "true")
    }

    /// Whether scale-down may evict pods with local storage on this group.
    pub fn skips_local_storage(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SKIP_LOCAL_STORAGE_ANNOTATION))
            .is_some_and(|v| v == "true")
    }

    pub fn desired_nodes(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.desired_nodes)
            .unwrap_or(self.spec.min_nodes)
    }

    pub fn current_nodes(&self) -> i32 {
        self.status
            .as_ref()
            .and_then(|s| s.current_nodes)
            .unwrap_or(0)
    }
}

/* ============================= VPSIENODE ============================= */

/// Lifecycle phase of a managed VM.
///
/// Transitions follow a fixed DAG; see `node::is_legal_transition`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum VPSieNodePhase {
    #[default]
    Pending,
    Provisioning,
    Provisioned,
    Joining,
    Ready,
    Terminating,
    Deleting,
    Failed,
}

impl VPSieNodePhase {
    /// Failed and Deleting accept no further forward transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, VPSieNodePhase::Failed | VPSieNodePhase::Deleting)
    }
}

impl std::fmt::Display for VPSieNodePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Observed resource capacity of a joined node.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeCapacity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_millis: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<i64>,
}

/// VPSieNode tracks a single VM instance under management.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "autoscaler.vpsie.com",
    version = "v1",
    kind = "VPSieNode",
    plural = "vpsienodes",
    shortname = "vn",
    shortname = "vns",
    status = "VPSieNodeStatus",
    namespaced,
    printcolumn = r#"{"name":"InstanceID","type":"integer","jsonPath":".spec.instanceId"}"#,
    printcolumn = r#"{"name":"Node","type":"string","jsonPath":".spec.hostname"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"InstanceType","type":"string","jsonPath":".spec.offeringId"}"#,
    printcolumn = r#"{"name":"NodeGroup","type":"string","jsonPath":".spec.nodeGroup"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VPSieNodeSpec {
    /// Cloud instance identifier; 0 until the VM is created, monotonic after.
    #[serde(default)]
    pub instance_id: i64,

    /// VPSie offering this VM was (or will be) created from.
    pub offering_id: String,

    /// Name of the owning NodeGroup.
    pub node_group: String,

    pub datacenter_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv4: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipv6: Option<String>,
}

/// Observed state of a VPSieNode, written only by the node reconciler.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct VPSieNodeStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase: Option<VPSieNodePhase>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capacity: Option<NodeCapacity>,

    /// RFC 3339 entry timestamp per phase, keyed by phase name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phase_timestamps: Option<BTreeMap<String, String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl VPSieNode {
    pub fn phase(&self) -> VPSieNodePhase {
        self.status
            .as_ref()
            .and_then(|s| s.phase)
            .unwrap_or_default()
    }

    /// Whether the scale-down manager has marked this node for termination.
    pub fn is_marked_for_scale_down(&self) -> bool {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SCALE_DOWN_ANNOTATION))
            .is_some_and(|v| v == "true")
    }
}

/* ============================= AUTOSCALERCONFIG ============================= */

/// AutoscalerConfig is the cluster-scoped singleton (named `default`) holding
/// global settings and defaults for dynamic NodeGroup synthesis.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[kube(
    group = "autoscaler.vpsie.com",
    version = "v1",
    kind = "AutoscalerConfig",
    plural = "autoscalerconfigs",
    status = "AutoscalerConfigStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerConfigSpec {
    /// Hard cap on worker nodes across all groups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_cluster_workers: Option<i32>,

    /// Global floor scale-down may never go below.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_cluster_workers: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_cooldown_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_scale_ups: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrent_scale_downs: Option<u32>,

    /// Seconds a pod may sit unschedulable before it drives a scale-up.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unschedulable_pod_grace_seconds: Option<u64>,

    /// Seconds to wait for a provisioned VM to join and report Ready.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_ready_timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eviction_timeout_seconds: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_down_enabled: Option<bool>,

    /// Whether unmatched pending pods may synthesize new NodeGroups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dynamic_node_groups_enabled: Option<bool>,

    /// Defaults used when synthesizing a NodeGroup dynamically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_datacenter_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_offering_ids: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_image_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_kubernetes_version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutoscalerConfigStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use kube::CustomResourceExt;

    #[test]
    fn test_nodegroup_crd_generates_valid_yaml() {
        let crd = NodeGroup::crd();
        let yaml = serde_yaml::to_string(&crd).expect("CRD should serialize to YAML");
        assert!(yaml.contains("autoscaler.vpsie.com"));
        assert!(yaml.contains("NodeGroup"));
        assert!(yaml.contains("nodegroups"));
    }

    #[test]
    fn test_nodegroup_crd_short_names() {
        let crd = NodeGroup::crd();
        let short = crd.spec.names.short_names.unwrap_or_default();
        assert!(short.contains(&"ng".to_string()));
        assert!(short.contains(&"ngs".to_string()));
    }

    #[test]
    fn test_nodegroup_crd_is_namespaced() {
        let crd = NodeGroup::crd();
        assert_eq!(crd.spec.scope, "Namespaced");
    }

    #[test]
    fn test_vpsienode_crd_short_names() {
        let crd = VPSieNode::crd();
        let short = crd.spec.names.short_names.unwrap_or_default();
        assert!(short.contains(&"vn".to_string()));
        assert!(short.contains(&"vns".to_string()));
    }

    #[test]
    fn test_autoscalerconfig_crd_is_cluster_scoped() {
        let crd = AutoscalerConfig::crd();
        assert_eq!(crd.spec.scope, "Cluster");
    }

    #[test]
    fn test_three_crds_distinct_kinds() {
        let kinds = [
            NodeGroup::crd().spec.names.kind,
            VPSieNode::crd().spec.names.kind,
            AutoscalerConfig::crd().spec.names.kind,
        ];
        assert_ne!(kinds[0], kinds[1]);
        assert_ne!(kinds[1], kinds[2]);
        assert_ne!(kinds[0], kinds[2]);
    }

    #[test]
    fn test_spec_serialization_roundtrip() {
        let spec = NodeGroupSpec {
            min_nodes: 1,
            max_nodes: 10,
            offering_ids: vec!["offering-1".to_string()],
            datacenter_id: "dc-1".to_string(),
            image_id: "img-1".to_string(),
            kubernetes_version: "v1.28.2".to_string(),
            ..Default::default()
        };

        let json = serde_json::to_string(&spec).expect("should serialize");
        assert!(json.contains("minNodes"));
        assert!(json.contains("offeringIds"));

        let deserialized: NodeGroupSpec = serde_json::from_str(&json).expect("should deserialize");
        assert_eq!(deserialized.min_nodes, 1);
        assert_eq!(deserialized.max_nodes, 10);
        assert_eq!(deserialized.offering_ids, vec!["offering-1"]);
    }

    #[test]
    fn test_status_omits_none_fields_in_json() {
        let status = NodeGroupStatus {
            desired_nodes: Some(3),
            ..Default::default()
        };
        let json = serde_json::to_string(&status).expect("should serialize");
        assert!(json.contains("desiredNodes"));
        assert!(!json.contains("currentNodes"));
        assert!(!json.contains("vpsieGroupId"));
        assert!(!json.contains("conditions"));
    }

    #[test]
    fn test_phase_default_is_pending() {
        assert_eq!(VPSieNodePhase::default(), VPSieNodePhase::Pending);
    }

    #[test]
    fn test_phase_serializes_pascal_case() {
        let json = serde_json::to_string(&VPSieNodePhase::Provisioning).expect("should serialize");
        assert_eq!(json, r#""Provisioning""#);
    }

    #[test]
    fn test_phase_terminal_classification() {
        assert!(VPSieNodePhase::Failed.is_terminal());
        assert!(VPSieNodePhase::Deleting.is_terminal());
        assert!(!VPSieNodePhase::Ready.is_terminal());
        assert!(!VPSieNodePhase::Terminating.is_terminal());
        assert!(!VPSieNodePhase::Pending.is_terminal());
    }

    #[test]
    fn test_is_managed_requires_true_value() {
        let mut group = NodeGroup::new("g", NodeGroupSpec::default());
        assert!(!group.is_managed());

        let mut labels = BTreeMap::new();
        labels.insert(MANAGED_LABEL.to_string(), "false".to_string());
        group.metadata.labels = Some(labels.clone());
        assert!(!group.is_managed());

        labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
        group.metadata.labels = Some(labels);
        assert!(group.is_managed());
    }

    #[test]
    fn test_desired_nodes_defaults_to_min() {
        let group = NodeGroup::new(
            "g",
            NodeGroupSpec {
                min_nodes: 2,
                max_nodes: 5,
                ..Default::default()
            },
        );
        assert_eq!(group.desired_nodes(), 2);
    }

    #[test]
    fn test_desired_nodes_reads_status() {
        let mut group = NodeGroup::new(
            "g",
            NodeGroupSpec {
                min_nodes: 1,
                max_nodes: 10,
                ..Default::default()
            },
        );
        group.status = Some(NodeGroupStatus {
            desired_nodes: Some(4),
            ..Default::default()
        });
        assert_eq!(group.desired_nodes(), 4);
    }

    #[test]
    fn test_scale_down_marker_detection() {
        let mut node = VPSieNode::new(
            "n",
            VPSieNodeSpec {
                offering_id: "o".to_string(),
                node_group: "g".to_string(),
                datacenter_id: "dc".to_string(),
                ..Default::default()
            },
        );
        assert!(!node.is_marked_for_scale_down());

        let mut annotations = BTreeMap::new();
        annotations.insert(SCALE_DOWN_ANNOTATION.to_string(), "true".to_string());
        node.metadata.annotations = Some(annotations);
        assert!(node.is_marked_for_scale_down());
    }

    #[test]
    fn test_scale_down_policy_defaults() {
        assert!(ScaleDownPolicy::is_enabled(None));
        assert_eq!(ScaleDownPolicy::cpu_threshold(None), 20);
        assert_eq!(ScaleDownPolicy::memory_threshold(None), 20);
        assert_eq!(ScaleDownPolicy::stabilization_window(None), 600);
        assert_eq!(ScaleDownPolicy::cooldown(None), 600);
    }

    #[test]
    fn test_scale_down_policy_overrides() {
        let policy = ScaleDownPolicy {
            enabled: Some(false),
            cpu_threshold_percent: Some(35),
            memory_threshold_percent: Some(40),
            stabilization_window_seconds: Some(120),
            cooldown_seconds: Some(90),
        };
        assert!(!ScaleDownPolicy::is_enabled(Some(&policy)));
        assert_eq!(ScaleDownPolicy::cpu_threshold(Some(&policy)), 35);
        assert_eq!(ScaleDownPolicy::memory_threshold(Some(&policy)), 40);
        assert_eq!(ScaleDownPolicy::stabilization_window(Some(&policy)), 120);
        assert_eq!(ScaleDownPolicy::cooldown(Some(&policy)), 90);
    }

    #[test]
    fn test_group_condition_status_string() {
        let c = GroupCondition::new(GroupConditionType::AtMaxCapacity, true);
        assert!(c.is_true());
        assert_eq!(c.status, "True");
        assert!(c.last_transition_time.is_some());

        let c = GroupCondition::new(GroupConditionType::Scaling, false);
        assert!(!c.is_true());
    }

    #[test]
    fn test_condition_type_serializes_as_type_key() {
        let c = GroupCondition::new(GroupConditionType::Ready, true);
        let json = serde_json::to_string(&c).expect("should serialize");
        assert!(json.contains(r#""type":"Ready""#));
    }

    #[test]
    fn test_autoscaler_config_empty_object_deserializes() {
        let spec: AutoscalerConfigSpec =
            serde_json::from_str("{}").expect("empty object should deserialize");
        assert_eq!(spec.max_cluster_workers, None);
        assert_eq!(spec.dynamic_node_groups_enabled, None);
        assert_eq!(spec.default_offering_ids, None);
    }

    #[test]
    fn test_vpsienode_instance_id_defaults_to_zero() {
        let json = r#"{"offeringId":"o","nodeGroup":"g","datacenterId":"dc"}"#;
        let spec: VPSieNodeSpec = serde_json::from_str(json).expect("should deserialize");
        assert_eq!(spec.instance_id, 0);
    }
}
