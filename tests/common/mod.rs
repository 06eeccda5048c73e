#![allow(dead_code)]

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, Pod, PodCondition, PodSpec, PodStatus,
};
use k8s_openapi::api::policy::v1::{
    PodDisruptionBudget, PodDisruptionBudgetSpec, PodDisruptionBudgetStatus,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};

use vpsie_autoscaler::crd::{
    MANAGED_LABEL, NodeGroup, NodeGroupSpec, NodeGroupStatus, VPSieNode, VPSieNodePhase,
    VPSieNodeSpec, VPSieNodeStatus,
};

/// A pod the scheduler has given up on, with requests and a node selector.
pub fn make_pending_pod(
    name: &str,
    selector: &[(&str, &str)],
    cpu_request: &str,
    memory_request: &str,
    message: &str,
) -> Pod {
    let mut requests = BTreeMap::new();
    if !cpu_request.is_empty() {
        requests.insert("cpu".to_string(), Quantity(cpu_request.to_string()));
    }
    if !memory_request.is_empty() {
        requests.insert("memory".to_string(), Quantity(memory_request.to_string()));
    }

    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(PodSpec {
            containers: vec![Container {
                name: "main".to_string(),
                resources: Some(k8s_openapi::api::core::v1::ResourceRequirements {
                    requests: Some(requests),
                    ..Default::default()
                }),
                ..Default::default()
            }],
            node_selector: if selector.is_empty() {
                None
            } else {
                Some(
                    selector
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            },
            ..Default::default()
        }),
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
    }
}

/// A running workload pod bound to a node.
pub fn make_running_pod(name: &str, node: &str, labels: &[(&str, &str)]) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            labels: if labels.is_empty() {
                None
            } else {
                Some(
                    labels
                        .iter()
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .collect(),
                )
            },
            ..Default::default()
        },
        spec: Some(PodSpec {
            node_name: Some(node.to_string()),
            ..Default::default()
        }),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            ..Default::default()
        }),
    }
}

/// A managed NodeGroup with the given bounds and labels.
pub fn make_node_group(
    name: &str,
    min: i32,
    max: i32,
    desired: Option<i32>,
    labels: &[(&str, &str)],
) -> NodeGroup {
    let spec_labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    let mut group = NodeGroup::new(
        name,
        NodeGroupSpec {
            min_nodes: min,
            max_nodes: max,
            offering_ids: vec!["offering-1".to_string()],
            datacenter_id: "dc-1".to_string(),
            image_id: "img-1".to_string(),
            kubernetes_version: "v1.28.0".to_string(),
            labels: if spec_labels.is_empty() {
                None
            } else {
                Some(spec_labels)
            },
            ..Default::default()
        },
    );

    let mut meta_labels = BTreeMap::new();
    meta_labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    group.metadata.labels = Some(meta_labels);
    group.metadata.namespace = Some("default".to_string());

    group.status = Some(NodeGroupStatus {
        desired_nodes: desired,
        current_nodes: desired,
        ..Default::default()
    });

    group
}

/// A member VPSieNode in the given phase.
pub fn make_vpsie_node(name: &str, group: &str, phase: VPSieNodePhase) -> VPSieNode {
    let mut node = VPSieNode::new(
        name,
        VPSieNodeSpec {
            instance_id: 0,
            offering_id: "offering-1".to_string(),
            node_group: group.to_string(),
            datacenter_id: "dc-1".to_string(),
            hostname: Some(name.to_string()),
            ..Default::default()
        },
    );
    node.metadata.namespace = Some("default".to_string());
    node.status = Some(VPSieNodeStatus {
        phase: Some(phase),
        ..Default::default()
    });
    node
}

/// A disruption budget over the given pod labels.
pub fn make_pdb(name: &str, labels: &[(&str, &str)], disruptions_allowed: i32) -> PodDisruptionBudget {
    let match_labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

    PodDisruptionBudget {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            ..Default::default()
        },
        spec: Some(PodDisruptionBudgetSpec {
            selector: Some(LabelSelector {
                match_labels: Some(match_labels),
                ..Default::default()
            }),
            ..Default::default()
        }),
        status: Some(PodDisruptionBudgetStatus {
            disruptions_allowed,
            ..Default::default()
        }),
    }
}
