use std::collections::{BTreeMap, BTreeSet};

use k8s_openapi::api::core::v1::Pod;
use sha2::{Digest, Sha256};

use crate::crd::{
    CREATION_REASON_ANNOTATION, GroupTaint, MANAGED_LABEL, NodeGroup, NodeGroupSpec,
};

/* ============================= TEMPLATE ============================= */

/// Defaults applied to a synthesized NodeGroup, resolved from the
/// AutoscalerConfig singleton and cluster discovery.
#[derive(Debug, Clone)]
pub struct GroupTemplate {
    pub datacenter_id: String,
    pub offering_ids: Vec<String>,
    pub image_id: String,
    pub kubernetes_version: String,
    pub min_nodes: i32,
    pub max_nodes: i32,
}

impl GroupTemplate {
    pub fn with_defaults(
        datacenter_id: String,
        offering_ids: Vec<String>,
        image_id: String,
        kubernetes_version: String,
    ) -> Self {
        Self {
            datacenter_id,
            offering_ids,
            image_id,
            kubernetes_version,
            min_nodes: 1,
            max_nodes: 10,
        }
    }
}

/* ============================= DERIVATION ============================= */

/// Union of the pending pods' node selectors.
pub fn derived_labels(pods: &[Pod]) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    for pod in pods {
        if let Some(selector) = pod.spec.as_ref().and_then(|s| s.node_selector.as_ref()) {
            for (key, value) in selector {
                labels.insert(key.clone(), value.clone());
            }
        }
    }
    labels
}

/// Taints mirroring the pods' keyed tolerations, so only these pods (and
/// workloads with matching tolerations) land on the new group.
pub fn derived_taints(pods: &[Pod]) -> Vec<GroupTaint> {
    let mut seen = BTreeSet::new();
    let mut taints = Vec::new();

    for pod in pods {
        for toleration in pod
            .spec
            .as_ref()
            .and_then(|s| s.tolerations.as_deref())
            .unwrap_or_default()
        {
            let Some(key) = toleration.key.as_deref().filter(|k| !k.is_empty()) else {
                continue;
            };
            let value = toleration.value.clone();
            let effect = toleration
                .effect
                .clone()
                .filter(|e| !e.is_empty())
                .unwrap_or_else(|| "NoSchedule".to_string());

            if seen.insert((key.to_string(), value.clone(), effect.clone())) {
                taints.push(GroupTaint {
                    key: key.to_string(),
                    value,
                    effect,
                });
            }
        }
    }

    taints
}

/// Deterministic group name from the derived label set.
///
/// The same labels always hash to the same name, making creation idempotent.
pub fn deterministic_name(labels: &BTreeMap<String, String>) -> String {
    let mut hasher = Sha256::new();
    for (key, value) in labels {
        hasher.update(key.as_bytes());
        hasher.update(b"=");
        hasher.update(value.as_bytes());
        hasher.update(b",");
    }
    let digest = hasher.finalize();
    format!("auto-{}", &hex::encode(digest)[..8])
}

/* ============================= SYNTHESIS ============================= */

/// Build a NodeGroup for pending pods no existing group matches.
///
/// The object carries the managed label so it enters the normal reconcile
/// flow, and a creation-reason annotation for operators.
pub fn synthesize_node_group(template: &GroupTemplate, pods: &[Pod]) -> NodeGroup {
    let labels = derived_labels(pods);
    let taints = derived_taints(pods);
    let name = deterministic_name(&labels);

    let mut group = NodeGroup::new(
        &name,
        NodeGroupSpec {
            min_nodes: template.min_nodes,
            max_nodes: template.max_nodes,
            offering_ids: template.offering_ids.clone(),
            datacenter_id: template.datacenter_id.clone(),
            image_id: template.image_id.clone(),
            kubernetes_version: template.kubernetes_version.clone(),
            labels: if labels.is_empty() { None } else { Some(labels) },
            taints: if taints.is_empty() { None } else { Some(taints) },
            ..Default::default()
        },
    );

    let mut meta_labels = BTreeMap::new();
    meta_labels.insert(MANAGED_LABEL.to_string(), "true".to_string());
    group.metadata.labels = Some(meta_labels);

    let mut annotations = BTreeMap::new();
    annotations.insert(CREATION_REASON_ANNOTATION.to_string(), "metrics".to_string());
    group.metadata.annotations = Some(annotations);

    group
}

/* ============================= TESTS ============================= */
