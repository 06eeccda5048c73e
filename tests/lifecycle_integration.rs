mod common;

use chrono::Utc;
use common::make_vpsie_node;
use vpsie_autoscaler::crd::{VPSieNodePhase, VPSieNodeStatus};
use vpsie_autoscaler::node::{
    FAILED_NODE_TTL, NodeStep, is_legal_transition, next_step, phase_entered_at, record_phase,
};
use vpsie_autoscaler::nodegroup::{MemberCounts, count_members, plan_scale, ScalePlan};

/// Walk the full happy path through the DAG, asserting each hop is legal
/// and stamps its timestamp.
#[test]
fn test_happy_path_walk() {
    use VPSieNodePhase::*;

    let mut status = VPSieNodeStatus::default();
    let mut current = Pending;

    for phase in [Provisioning, Provisioned, Joining, Ready, Terminating, Deleting] {
        assert!(is_legal_transition(current, phase), "{current} -> {phase}");
        record_phase(&mut status, phase, Utc::now());
        assert_eq!(status.phase, Some(phase));
        current = phase;
    }

    let stamps = status.phase_timestamps.expect("all hops stamped");
    assert_eq!(stamps.len(), 6);
}

/// Provisioning failure: create VM keeps failing, the node lands in Failed
/// with the error retained, stops counting toward the group, and is
/// garbage-collected after the TTL.
#[test]
fn test_provisioning_failure_lifecycle() {
    let mut node = make_vpsie_node("n1", "g", VPSieNodePhase::Provisioning);

    // Repeated 500s exhaust retries; the reconciler fails the node
    assert!(is_legal_transition(
        VPSieNodePhase::Provisioning,
        VPSieNodePhase::Failed
    ));
    let mut status = node.status.take().unwrap_or_default();
    record_phase(&mut status, VPSieNodePhase::Failed, Utc::now());
    status.last_error = Some("server error (status 500)".to_string());
    node.status = Some(status);

    // The error is retained for diagnosis
    assert!(
        node.status
            .as_ref()
            .and_then(|s| s.last_error.as_deref())
            .unwrap_or("")
            .contains("server error")
    );

    // Failed members no longer count as current
    let healthy = make_vpsie_node("n2", "g", VPSieNodePhase::Ready);
    let counts = count_members(&[node.clone(), healthy]);
    assert_eq!(counts, MemberCounts { current: 1, ready: 1 });

    // Within the TTL the object is retained
    assert_eq!(next_step(&node, Utc::now()), NodeStep::RetainFailed);

    // Past the TTL it is removed
    let past_ttl = Utc::now() + chrono::Duration::seconds(FAILED_NODE_TTL.as_secs() as i64 + 60);
    assert_eq!(next_step(&node, past_ttl), NodeStep::GarbageCollect);
}

/// Idempotence: replaying Provisioned or Ready never asks for another VM.
#[test]
fn test_replaying_settled_phases_is_a_no_op() {
    let mut provisioned = make_vpsie_node("n1", "g", VPSieNodePhase::Provisioned);
    provisioned.spec.instance_id = 4711;
    assert_eq!(next_step(&provisioned, Utc::now()), NodeStep::AwaitJoin);

    let mut ready = make_vpsie_node("n2", "g", VPSieNodePhase::Ready);
    ready.spec.instance_id = 4712;
    assert_eq!(next_step(&ready, Utc::now()), NodeStep::Steady);
    assert_eq!(next_step(&ready, Utc::now()), NodeStep::Steady);
}

/// Termination flows one way: Ready -> Terminating -> Deleting, with no
/// route back into service.
#[test]
fn test_termination_is_one_way() {
    use VPSieNodePhase::*;

    assert!(is_legal_transition(Ready, Terminating));
    assert!(is_legal_transition(Terminating, Deleting));

    assert!(!is_legal_transition(Terminating, Ready));
    assert!(!is_legal_transition(Deleting, Ready));
    assert!(!is_legal_transition(Deleting, Terminating));

    let terminating = make_vpsie_node("n1", "g", Terminating);
    assert_eq!(next_step(&terminating, Utc::now()), NodeStep::DeleteVm);

    let deleting = make_vpsie_node("n2", "g", Deleting);
    assert_eq!(next_step(&deleting, Utc::now()), NodeStep::FinalizeRemoval);
}

/// Steady state at zero: min=0, desired=0, current=0 produces no work.
#[test]
fn test_zero_group_is_steady() {
    assert_eq!(plan_scale(0, 0), ScalePlan::Steady);
    let counts = count_members(&[]);
    assert_eq!(counts, MemberCounts::default());
}

/// A group below desired creates exactly the missing members; one above
/// desired asks the scale-down manager for exactly the excess.
#[test]
fn test_convergence_plans() {
    assert_eq!(plan_scale(2, 5), ScalePlan::CreateNodes(3));
    assert_eq!(plan_scale(6, 4), ScalePlan::RequestScaleDown(2));
}

/// Phase timestamps survive a status round-trip through JSON, so replayed
/// reconciles see the original entry times.
#[test]
fn test_phase_timestamps_roundtrip() {
    let mut node = make_vpsie_node("n1", "g", VPSieNodePhase::Pending);
    let mut status = node.status.take().unwrap_or_default();
    let entered = Utc::now();
    record_phase(&mut status, VPSieNodePhase::Provisioning, entered);
    node.status = Some(status);

    let json = serde_json::to_string(&node.status).expect("should serialize");
    let parsed: Option<VPSieNodeStatus> = serde_json::from_str(&json).expect("should deserialize");
    node.status = parsed;

    let recovered = phase_entered_at(&node, VPSieNodePhase::Provisioning).expect("stamp survives");
    assert_eq!(recovered.timestamp(), entered.timestamp());
}
