use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::ResourceExt;

use crate::crd::{
    GroupCondition, GroupConditionType, MAX_NODES_BOUND, NODE_FINALIZER, NODEGROUP_LABEL,
    NodeGroup, NodeGroupSpec, VPSieNode, VPSieNodePhase, VPSieNodeSpec,
};

/* ============================= VALIDATION ============================= */

/// Spec invariants checked on every reconcile.
///
/// The CRD schema enforces the same bounds; re-checking here means a
/// bypassed webhook cannot produce an unbounded group.
pub fn validate_spec(spec: &NodeGroupSpec) -> Result<(), String> {
    if spec.min_nodes < 0 {
        return Err(format!("minNodes {} must be >= 0", spec.min_nodes));
    }
    if spec.max_nodes < 1 {
        return Err(format!("maxNodes {} must be >= 1", spec.max_nodes));
    }
    if spec.min_nodes > spec.max_nodes {
        return Err(format!(
            "minNodes {} exceeds maxNodes {}",
            spec.min_nodes, spec.max_nodes
        ));
    }
    if spec.max_nodes > MAX_NODES_BOUND {
        return Err(format!(
            "maxNodes {} exceeds the {} bound",
            spec.max_nodes, MAX_NODES_BOUND
        ));
    }
    if spec.offering_ids.is_empty() {
        return Err("offeringIds must list at least one offering".to_string());
    }
    if spec.datacenter_id.is_empty() {
        return Err("datacenterId must be set".to_string());
    }
    Ok(())
}

/* ============================= DESIRED COUNT ============================= */

/// Desired count clamped into [min, max]; unset defaults to min.
pub fn clamp_desired(spec: &NodeGroupSpec, status_desired: Option<i32>) -> i32 {
    status_desired
        .unwrap_or(spec.min_nodes)
        .clamp(spec.min_nodes, spec.max_nodes)
}

/* ============================= MEMBER COUNTING ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemberCounts {
    /// Members not in terminal deletion.
    pub current: i32,
    pub ready: i32,
}

pub fn count_members(members: &[VPSieNode]) -> MemberCounts {
    let mut counts = MemberCounts::default();
    for member in members {
        if member.metadata.deletion_timestamp.is_some() || member.phase().is_terminal() {
            continue;
        }
        counts.current += 1;
        if member.phase() == VPSieNodePhase::Ready {
            counts.ready += 1;
        }
    }
    counts
}

/* ============================= CONDITIONS ============================= */

/// Conditions reported after a reconcile pass.
pub fn compute_conditions(
    spec: &NodeGroupSpec,
    counts: MemberCounts,
    desired: i32,
    error: Option<&str>,
) -> Vec<GroupCondition> {
    let mut conditions = vec![
        GroupCondition::new(GroupConditionType::Ready, counts.ready == counts.current),
        GroupCondition::new(GroupConditionType::Scaling, counts.current != desired),
        GroupCondition::new(
            GroupConditionType::AtMinCapacity,
            counts.current == spec.min_nodes,
        ),
        GroupCondition::new(
            GroupConditionType::AtMaxCapacity,
            counts.current == spec.max_nodes,
        ),
    ];
    match error {
        Some(message) => {
            conditions.push(GroupCondition::new(GroupConditionType::Error, true).with_message(message))
        }
        None => conditions.push(GroupCondition::new(GroupConditionType::Error, false)),
    }
    conditions
}

/* ============================= SCALE PLAN ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePlan {
    /// Create this many member VPSieNode objects.
    CreateNodes(i32),
    /// Ask the scale-down manager to pick this many victims.
    RequestScaleDown(i32),
    Steady,
}

pub fn plan_scale(current: i32, desired: i32) -> ScalePlan {
    if current < desired {
        ScalePlan::CreateNodes(desired - current)
    } else if current > desired {
        ScalePlan::RequestScaleDown(current - desired)
    } else {
        ScalePlan::Steady
    }
}

/* ============================= MEMBER SYNTHESIS ============================= */

/// Build a new member VPSieNode owned by the group.
///
/// The owner reference cascades deletion; the finalizer guards the cloud VM.
/// The API server assigns the final name via generateName.
pub fn new_member(group: &NodeGroup, offering_id: &str) -> VPSieNode {
    let group_name = group.name_any();

    let mut node = VPSieNode::new(
        "",
        VPSieNodeSpec {
            instance_id: 0,
            offering_id: offering_id.to_string(),
            node_group: group_name.clone(),
            datacenter_id: group.spec.datacenter_id.clone(),
            ..Default::default()
        },
    );

    node.metadata.name = None;
    node.metadata.generate_name = Some(format!("{group_name}-"));
    node.metadata.namespace = group.metadata.namespace.clone();
    node.metadata.finalizers = Some(vec![NODE_FINALIZER.to_string()]);

    let mut labels = std::collections::BTreeMap::new();
    labels.insert(NODEGROUP_LABEL.to_string(), group_name.clone());
    node.metadata.labels = Some(labels);

    if let Some(uid) = &group.metadata.uid {
        node.metadata.owner_references = Some(vec![OwnerReference {
            api_version: NodeGroup::api_version(&()).to_string(),
            kind: NodeGroup::kind(&()).to_string(),
            name: group_name,
            uid: uid.clone(),
            controller: Some(true),
            block_owner_deletion: Some(true),
        }]);
    }

    node
}

/* ============================= TESTS ============================= */
