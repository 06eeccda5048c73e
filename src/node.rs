use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::crd::{VPSieNode, VPSieNodePhase, VPSieNodeStatus};

/* ============================= CONFIG ============================= */

/// A VM that has not reached cloud-side running within this window fails.
pub const PROVISIONING_TIMEOUT: Duration = Duration::from_secs(600);

/// Failed nodes are retained this long for diagnosis, then removed.
pub const FAILED_NODE_TTL: Duration = Duration::from_secs(900);

/* ============================= TRANSITIONS ============================= */

/// The lifecycle DAG. Forward arrows only, plus Failed from any
/// non-terminal phase; nothing leaves Failed or Deleting.
pub fn is_legal_transition(from: VPSieNodePhase, to: VPSieNodePhase) -> bool {
    use VPSieNodePhase::*;

    if from == to {
        return false;
    }
    if to == Failed {
        return !from.is_terminal();
    }
    matches!(
        (from, to),
        (Pending, Provisioning)
            | (Provisioning, Provisioned)
            | (Provisioned, Joining)
            | (Joining, Ready)
            | (Ready, Terminating)
            | (Terminating, Deleting)
    )
}

/// Stamp a phase change into the status: phase plus its entry timestamp.
pub fn record_phase(status: &mut VPSieNodeStatus, phase: VPSieNodePhase, at: DateTime<Utc>) {
    status.phase = Some(phase);
    status
        .phase_timestamps
        .get_or_insert_with(Default::default)
        .insert(phase.to_string(), at.to_rfc3339());
}

/// When the node entered the given phase, if recorded.
pub fn phase_entered_at(node: &VPSieNode, phase: VPSieNodePhase) -> Option<DateTime<Utc>> {
    node.status
        .as_ref()
        .and_then(|s| s.phase_timestamps.as_ref())
        .and_then(|t| t.get(&phase.to_string()))
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

/* ============================= NEXT STEP ============================= */

/// What the reconciler should do with a node in its current phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStep {
    /// Pending: create the VM and persist the returned instance id.
    CreateVm,
    /// Provisioning: poll the cloud until the VM reports running.
    PollProvisioning,
    /// Provisioning past the timeout: fail the node.
    FailProvisioningTimeout,
    /// Provisioned: wait for the node object to appear in the inventory.
    AwaitJoin,
    /// Joining: wait for the orchestrator to report Ready.
    AwaitReady,
    /// Ready and unmarked: nothing to do.
    Steady,
    /// Ready and marked by the scale-down manager: cordon, drain, terminate.
    BeginTermination,
    /// Terminating: drained; delete the cloud VM.
    DeleteVm,
    /// Deleting: clear the finalizer once deletion is acknowledged.
    FinalizeRemoval,
    /// Failed within the retention TTL: keep for diagnosis.
    RetainFailed,
    /// Failed past the TTL: remove the object.
    GarbageCollect,
}

pub fn next_step(node: &VPSieNode, now: DateTime<Utc>) -> NodeStep {
    match node.phase() {
        VPSieNodePhase::Pending => NodeStep::CreateVm,
        VPSieNodePhase::Provisioning => {
            let timed_out = phase_entered_at(node, VPSieNodePhase::Provisioning)
                .is_some_and(|entered| {
                    now.signed_duration_since(entered)
                        > chrono::Duration::from_std(PROVISIONING_TIMEOUT)
                            .unwrap_or_else(|_| chrono::Duration::seconds(600))
                });
            if timed_out {
                NodeStep::FailProvisioningTimeout
            } else {
                NodeStep::PollProvisioning
            }
        }
        VPSieNodePhase::Provisioned => NodeStep::AwaitJoin,
        VPSieNodePhase::Joining => NodeStep::AwaitReady,
        VPSieNodePhase::Ready => {
            if node.is_marked_for_scale_down() {
                NodeStep::BeginTermination
            } else {
                NodeStep::Steady
            }
        }
        VPSieNodePhase::Terminating => NodeStep::DeleteVm,
        VPSieNodePhase::Deleting => NodeStep::FinalizeRemoval,
        VPSieNodePhase::Failed => {
            let expired = phase_entered_at(node, VPSieNodePhase::Failed).is_some_and(|entered| {
                now.signed_duration_since(entered)
                    > chrono::Duration::from_std(FAILED_NODE_TTL)
                        .unwrap_or_else(|_| chrono::Duration::seconds(900))
            });
            if expired {
                NodeStep::GarbageCollect
            } else {
                NodeStep::RetainFailed
            }
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{SCALE_DOWN_ANNOTATION, VPSieNodeSpec};
    use std::collections::BTreeMap;

    fn node_in_phase(phase: VPSieNodePhase) -> VPSieNode {
        let mut node = VPSieNode::new(
            "n",
            VPSieNodeSpec {
                offering_id: "o".to_string(),
                node_group: "g".to_string(),
                datacenter_id: "dc".to_string(),
                ..Default::default()
            },
        );
        let mut status = VPSieNodeStatus::default();
        record_phase(&mut status, phase, Utc::now());
        node.status = Some(status);
        node
    }

    #[test]
    fn test_forward_arrows_are_legal() {
        use VPSieNodePhase::*;
        assert!(is_legal_transition(Pending, Provisioning));
        assert!(is_legal_transition(Provisioning, Provisioned));
        assert!(is_legal_transition(Provisioned, Joining));
        assert!(is_legal_transition(Joining, Ready));
        assert!(is_legal_transition(Ready, Terminating));
        assert!(is_legal_transition(Terminating, Deleting));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use VPSieNodePhase::*;
        for from in [Pending, Provisioning, Provisioned, Joining, Ready, Terminating] {
            assert!(is_legal_transition(from, Failed), "{from} -> Failed");
        }
        assert!(!is_legal_transition(Deleting, Failed));
        assert!(!is_legal_transition(Failed, Failed));
    }

    #[test]
    fn test_no_backward_or_skip_transitions() {
        use VPSieNodePhase::*;
        assert!(!is_legal_transition(Provisioning, Pending));
        assert!(!is_legal_transition(Ready, Joining));
        assert!(!is_legal_transition(Pending, Provisioned));
        assert!(!is_legal_transition(Pending, Ready));
        assert!(!is_legal_transition(Joining, Terminating));
        assert!(!is_legal_transition(Failed, Pending));
        assert!(!is_legal_transition(Deleting, Terminating));
    }

    #[test]
    fn test_exhaustive_legality_matrix_counts() {
        use VPSieNodePhase::*;
        let phases = [
            Pending,
            Provisioning,
            Provisioned,
            Joining,
            Ready,
            Terminating,
            Deleting,
            Failed,
        ];
        let legal = phases
            .iter()
            .flat_map(|from| phases.iter().map(move |to| (*from, *to)))
            .filter(|(from, to)| is_legal_transition(*from, *to))
            .count();
        // 6 forward arrows + 6 non-terminal phases that may fail
        assert_eq!(legal, 12);
    }

    #[test]
    fn test_record_phase_stamps_timestamp() {
        let mut status = VPSieNodeStatus::default();
        let at = Utc::now();
        record_phase(&mut status, VPSieNodePhase::Provisioning, at);

        assert_eq!(status.phase, Some(VPSieNodePhase::Provisioning));
        let stamps = status.phase_timestamps.expect("timestamps recorded");
        assert!(stamps.contains_key("Provisioning"));
    }

    #[test]
    fn test_next_step_per_phase() {
        assert_eq!(
            next_step(&node_in_phase(VPSieNodePhase::Pending), Utc::now()),
            NodeStep::CreateVm
        );
        assert_eq!(
            next_step(&node_in_phase(VPSieNodePhase::Provisioning), Utc::now()),
            NodeStep::PollProvisioning
        );
        assert_eq!(
            next_step(&node_in_phase(VPSieNodePhase::Provisioned), Utc::now()),
            NodeStep::AwaitJoin
        );
        assert_eq!(
            next_step(&node_in_phase(VPSieNodePhase::Joining), Utc::now()),
            NodeStep::AwaitReady
        );
        assert_eq!(
            next_step(&node_in_phase(VPSieNodePhase::Ready), Utc::now()),
            NodeStep::Steady
        );
        assert_eq!(
            next_step(&node_in_phase(VPSieNodePhase::Terminating), Utc::now()),
            NodeStep::DeleteVm
        );
        assert_eq!(
            next_step(&node_in_phase(VPSieNodePhase::Deleting), Utc::now()),
            NodeStep::FinalizeRemoval
        );
    }

    #[test]
    fn test_ready_marked_node_begins_termination() {
        let mut node = node_in_phase(VPSieNodePhase::Ready);
        let mut annotations = BTreeMap::new();
        annotations.insert(SCALE_DOWN_ANNOTATION.to_string(), "true".to_string());
        node.metadata.annotations = Some(annotations);

        assert_eq!(next_step(&node, Utc::now()), NodeStep::BeginTermination);
    }

    #[test]
    fn test_provisioning_timeout_fails() {
        let node = node_in_phase(VPSieNodePhase::Provisioning);
        let later = Utc::now() + chrono::Duration::seconds(700);
        assert_eq!(next_step(&node, later), NodeStep::FailProvisioningTimeout);
    }

    #[test]
    fn test_failed_node_retained_until_ttl() {
        let node = node_in_phase(VPSieNodePhase::Failed);
        assert_eq!(next_step(&node, Utc::now()), NodeStep::RetainFailed);

        let later = Utc::now() + chrono::Duration::seconds(1000);
        assert_eq!(next_step(&node, later), NodeStep::GarbageCollect);
    }

    #[test]
    fn test_phase_entered_at_roundtrip() {
        let node = node_in_phase(VPSieNodePhase::Joining);
        let entered = phase_entered_at(&node, VPSieNodePhase::Joining);
        assert!(entered.is_some());
        assert!(phase_entered_at(&node, VPSieNodePhase::Ready).is_none());
    }
}
