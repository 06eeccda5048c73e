use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use chrono::Utc;
use futures::StreamExt;
use k8s_openapi::api::core::v1::{Node, Pod};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::controller::{Action, Controller};
use kube::{Client, ResourceExt};
use kube_runtime::watcher::{self, Event};
use prometheus::{Encoder, TextEncoder};
use tokio::signal;
use tokio::sync::{Mutex, broadcast};
use tracing::{info, warn};

use vpsie_autoscaler::analyzer::{
    self, NodeGroupMatch, ScaleUpDecision, estimate_nodes_needed, find_matching_groups,
    select_instance_type,
};
use vpsie_autoscaler::cloud::types::CreateVmRequest;
use vpsie_autoscaler::cloud::{CloudError, Credentials, VpsieClient};
use vpsie_autoscaler::config::{self, Settings};
use vpsie_autoscaler::cost::CostCalculator;
use vpsie_autoscaler::crd::{
    NODE_FINALIZER, NODEGROUP_LABEL, NodeGroup, NodeGroupStatus, ScaleUpPolicy, VPS_ID_ANNOTATION,
    VPSieNode, VPSieNodePhase, VPSieNodeStatus,
};
use vpsie_autoscaler::discovery::{ClusterIdentity, Discovery};
use vpsie_autoscaler::dynamic::{GroupTemplate, synthesize_node_group};
use vpsie_autoscaler::events::{PendingPodWatcher, SchedulingEvent};
use vpsie_autoscaler::metrics;
use vpsie_autoscaler::node::{self, NodeStep, next_step, record_phase};
use vpsie_autoscaler::nodegroup::{
    ScalePlan, clamp_desired, compute_conditions, count_members, new_member, plan_scale,
    validate_spec,
};
use vpsie_autoscaler::scaledown::{
    Candidate, GroupView, ScaleDownManager, evaluate_scale_down,
};
use vpsie_autoscaler::utilization::{DEFAULT_COLLECTION_INTERVAL, UtilizationTracker};

/* ============================= CONFIG ============================= */

const FIELD_MANAGER: &str = "vpsie-autoscaler";
const REQUEUE_INTERVAL: Duration = Duration::from_secs(30);
const ERROR_REQUEUE: Duration = Duration::from_secs(60);
const VALIDATION_REQUEUE: Duration = Duration::from_secs(300);
const POLL_REQUEUE: Duration = Duration::from_secs(15);

const CLOUD_OP_DEADLINE: Duration = Duration::from_secs(30);
const CREATE_VM_DEADLINE: Duration = Duration::from_secs(60);

const CONTROL_PLANE_LABEL: &str = "node-role.kubernetes.io/control-plane";

/* ============================= STATE ============================= */

pub(crate) struct OperatorState {
    pub(crate) ready: bool,
}

/* ============================= CONTEXT ============================= */

struct OperatorContext {
    client: Client,
    cloud: Arc<VpsieClient>,
    cost: Arc<CostCalculator>,
    settings: Settings,
    identity: ClusterIdentity,
    manager: Arc<ScaleDownManager>,
    watcher: Arc<PendingPodWatcher>,
    /// Namespace dynamically created NodeGroups land in.
    namespace: String,
}

/* ============================= ENTRY ============================= */

pub async fn run(namespace: &str, secret: &str, metrics_port: u16) -> Result<()> {
    println!("Starting VPSie autoscaler operator...\n");

    let client = Client::try_default()
        .await
        .context("Failed to load kubeconfig")?;

    // Verify actual cluster connectivity before starting the controllers
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot reach cluster: {}. Is the cluster running?", e);
        }
    }

    print!("  Credentials secret .......... ");
    let credentials = match config::load_credentials(&client, namespace, secret).await {
        Ok(c) => {
            println!("OK ({namespace}/{secret})");
            c
        }
        Err(e) => {
            println!("FAIL");
            return Err(e);
        }
    };

    let cloud = Arc::new(VpsieClient::new(
        Credentials {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
        },
        credentials.url.clone(),
    ));
    let cost = Arc::new(CostCalculator::new(cloud.clone()));

    let settings = config::load_settings(&client).await;

    print!("  Cluster discovery ........... ");
    let seed = ClusterIdentity::from_credentials(&credentials);
    let identity = Discovery::new(client.clone(), cloud.clone())
        .discover(seed)
        .await;
    if identity.is_complete() {
        println!("OK ({})", identity.cluster_name.as_deref().unwrap_or("unnamed"));
    } else {
        println!("INCOMPLETE (dynamic NodeGroups disabled)");
    }

    let tracker = Arc::new(UtilizationTracker::default());
    let manager = Arc::new(ScaleDownManager::new(
        client.clone(),
        tracker.clone(),
        settings.max_concurrent_scale_downs as usize,
        settings.min_cluster_workers,
        settings.eviction_timeout,
    ));

    let pod_watcher = Arc::new(PendingPodWatcher::new(Duration::from_secs(300)));

    let ctx = Arc::new(OperatorContext {
        client: client.clone(),
        cloud,
        cost,
        settings,
        identity,
        manager,
        watcher: pod_watcher.clone(),
        namespace: namespace.to_string(),
    });

    metrics::force_init();

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));

    println!("  CRD watch ................... NodeGroup, VPSieNode (autoscaler.vpsie.com/v1)");
    println!(
        "  Requeue interval ............ {}s",
        REQUEUE_INTERVAL.as_secs()
    );
    println!("  Metrics server .............. http://{addr}");
    println!();
    println!("  Available endpoints:");
    println!("    GET /healthz .............. Liveness probe (always 200 OK)");
    println!(
        "    GET /readyz ............... Readiness probe (503 until first reconcile, then 200)"
    );
    println!("    GET /metrics .............. Prometheus metrics scrape endpoint");
    println!();
    println!("Operator running. Press Ctrl+C to stop.\n");
    println!("{}", "=".repeat(70));

    info!("operator_started");

    let state = Arc::new(Mutex::new(OperatorState { ready: false }));
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let http_state = state.clone();
    let http_shutdown = shutdown_tx.subscribe();
    let http_handle =
        tokio::spawn(async move { start_metrics_server(http_state, http_shutdown, addr).await });

    // Pending-pod watcher: buffers unschedulable pods, ticks scale-up
    let watch_ctx = ctx.clone();
    let mut watch_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        tokio::select! {
            _ = run_pod_watcher(watch_ctx) => {}
            _ = watch_shutdown.recv() => {}
        }
    });

    // Metrics loop: utilization refresh, phase gauge, scale-down sweep
    let sweep_ctx = ctx.clone();
    let mut sweep_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(DEFAULT_COLLECTION_INTERVAL);
        loop {
            tokio::select! {
                _ = tick.tick() => metrics_and_scale_down_pass(&sweep_ctx).await,
                _ = sweep_shutdown.recv() => break,
            }
        }
    });

    let groups: Api<NodeGroup> = Api::all(client.clone());
    let group_children: Api<VPSieNode> = Api::all(client.clone());
    let vpsienodes: Api<VPSieNode> = Api::all(client.clone());

    let group_state = state.clone();
    let group_controller = Controller::new(groups, Default::default())
        .owns(group_children, Default::default())
        .run(reconcile_group, group_error_policy, ctx.clone())
        .for_each(move |result| {
            let state = group_state.clone();
            async move {
                {
                    let mut s = state.lock().await;
                    if !s.ready {
                        s.ready = true;
                    }
                }
                if let Err(e) = result {
                    warn!(error = %e, "group_reconcile_dispatch_error");
                }
            }
        });

    let node_controller = Controller::new(vpsienodes, Default::default())
        .run(reconcile_vpsienode, node_error_policy, ctx.clone())
        .for_each(|result| async move {
            if let Err(e) = result {
                warn!(error = %e, "node_reconcile_dispatch_error");
            }
        });

    // Ctrl+C drops (cancels) both controller streams; the kube Controller
    // has no built-in shutdown hook.
    tokio::select! {
        _ = group_controller => {
            info!("group_controller_stream_ended");
            println!("\nNodeGroup controller stream ended unexpectedly.");
        }
        _ = node_controller => {
            info!("node_controller_stream_ended");
            println!("\nVPSieNode controller stream ended unexpectedly.");
        }
        _ = signal::ctrl_c() => {
            info!("shutdown_signal_received");
            println!("\n{}", "=".repeat(70));
            println!("Shutdown signal received. Stopping operator...");
            println!("{}", "=".repeat(70));
        }
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("operator_stopped");
    println!("Operator stopped.");

    Ok(())
}

/* ============================= NODEGROUP RECONCILE ============================= */

async fn reconcile_group(
    group: Arc<NodeGroup>,
    ctx: Arc<OperatorContext>,
) -> std::result::Result<Action, kube::Error> {
    let name = group.name_any();
    let namespace = group.namespace().unwrap_or_default();

    if !group.is_managed() {
        return Ok(Action::await_change());
    }
    // Member deletion cascades through owner references.
    if group.metadata.deletion_timestamp.is_some() {
        let _ = metrics::NODEGROUP_CURRENT.remove_label_values(&[&name]);
        let _ = metrics::NODEGROUP_DESIRED.remove_label_values(&[&name]);
        let _ = metrics::NODEGROUP_READY.remove_label_values(&[&name]);
        return Ok(Action::await_change());
    }

    metrics::NODEGROUP_RECONCILE_TOTAL.inc();
    let _timer = metrics::NODEGROUP_RECONCILE_DURATION.start_timer();

    // ── Validate spec invariants ──
    if let Err(violation) = validate_spec(&group.spec) {
        warn!(group = %name, violation = %violation, "nodegroup_spec_invalid");
        let counts = Default::default();
        let conditions = compute_conditions(&group.spec, counts, 0, Some(&violation));
        let status = serde_json::json!({
            "status": {
                "conditions": conditions,
                "observedGeneration": group.metadata.generation,
            }
        });
        let api: Api<NodeGroup> = Api::namespaced(ctx.client.clone(), &namespace);
        api.patch_status(
            &name,
            &PatchParams::apply(FIELD_MANAGER),
            &Patch::Merge(&status),
        )
        .await?;
        return Ok(Action::requeue(VALIDATION_REQUEUE));
    }

    // ── Desired count, clamped ──
    let desired = clamp_desired(
        &group.spec,
        group.status.as_ref().and_then(|s| s.desired_nodes),
    );

    // ── Count members ──
    let members_api: Api<VPSieNode> = Api::namespaced(ctx.client.clone(), &namespace);
    let member_list = members_api
        .list(&ListParams::default().labels(&format!("{NODEGROUP_LABEL}={name}")))
        .await?;
    let counts = count_members(&member_list.items);

    let mut last_scale_up = group
        .status
        .as_ref()
        .and_then(|s| s.last_scale_up_time.clone());

    // ── Converge ──
    match plan_scale(counts.current, desired) {
        ScalePlan::CreateNodes(missing) => {
            let batch = missing.min(ctx.settings.max_concurrent_scale_ups as i32);
            let offering = select_instance_type(&group)
                .unwrap_or_else(|| group.spec.offering_ids[0].clone());
            for _ in 0..batch {
                let member = new_member(&group, &offering);
                members_api.create(&PostParams::default(), &member).await?;
            }
            last_scale_up = Some(Utc::now().to_rfc3339());
            info!(group = %name, created = batch, desired, current = counts.current, "nodegroup_scaled_up");
            println!(
                "[{}] {namespace}/{name}: created {batch} node(s), desired {desired}, current {}",
                Utc::now().format("%H:%M:%S"),
                counts.current
            );
        }
        ScalePlan::RequestScaleDown(excess) => {
            // Victim selection and draining belong to the scale-down
            // manager; the reconciler never evicts.
            let sweep_ctx = ctx.clone();
            let sweep_group = (*group).clone();
            tokio::spawn(async move {
                scale_down_group(&sweep_ctx, &sweep_group, excess as usize).await;
            });
            info!(group = %name, excess, "nodegroup_scale_down_requested");
        }
        ScalePlan::Steady => {}
    }

    // ── Status patch against the observed resourceVersion ──
    let conditions = compute_conditions(&group.spec, counts, desired, None);
    let member_names: Vec<String> = member_list
        .items
        .iter()
        .map(|m| m.name_any())
        .collect();
    let status = NodeGroupStatus {
        current_nodes: Some(counts.current),
        desired_nodes: Some(desired),
        ready_nodes: Some(counts.ready),
        vpsie_group_id: group.status.as_ref().and_then(|s| s.vpsie_group_id),
        members: Some(member_names),
        conditions: Some(conditions),
        last_scale_up_time: last_scale_up,
        last_scale_down_time: group
            .status
            .as_ref()
            .and_then(|s| s.last_scale_down_time.clone()),
        observed_generation: group.metadata.generation,
    };
    let patch = serde_json::json!({
        "metadata": { "resourceVersion": group.metadata.resource_version },
        "status": status,
    });

    let api: Api<NodeGroup> = Api::namespaced(ctx.client.clone(), &namespace);
    match api
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        Ok(_) => {}
        // Optimistic concurrency collision: requeue immediately, not an error.
        Err(kube::Error::Api(e)) if e.code == 409 => {
            info!(group = %name, "nodegroup_status_conflict_requeue");
            return Ok(Action::requeue(Duration::ZERO));
        }
        Err(e) => return Err(e),
    }

    metrics::NODEGROUP_CURRENT
        .with_label_values(&[&name])
        .set(counts.current as i64);
    metrics::NODEGROUP_DESIRED
        .with_label_values(&[&name])
        .set(desired as i64);
    metrics::NODEGROUP_READY
        .with_label_values(&[&name])
        .set(counts.ready as i64);

    let member_offerings: Vec<String> = member_list
        .items
        .iter()
        .map(|m| m.spec.offering_id.clone())
        .collect();
    if let Ok(report) = ctx
        .cost
        .calculate_node_group_cost(&group, &member_offerings, CLOUD_OP_DEADLINE)
        .await
    {
        metrics::NODEGROUP_MONTHLY_COST
            .with_label_values(&[&name])
            .set(report.monthly);
    }

    Ok(Action::requeue(REQUEUE_INTERVAL))
}

fn group_error_policy(
    _group: Arc<NodeGroup>,
    error: &kube::Error,
    _ctx: Arc<OperatorContext>,
) -> Action {
    metrics::NODEGROUP_RECONCILE_ERRORS.inc();
    warn!(error = %error, "nodegroup_reconcile_error");
    Action::requeue(ERROR_REQUEUE)
}

/* ============================= VPSIENODE RECONCILE ============================= */

async fn reconcile_vpsienode(
    vnode: Arc<VPSieNode>,
    ctx: Arc<OperatorContext>,
) -> std::result::Result<Action, kube::Error> {
    let name = vnode.name_any();
    let namespace = vnode.namespace().unwrap_or_default();
    let api: Api<VPSieNode> = Api::namespaced(ctx.client.clone(), &namespace);

    // ── Deletion: finalizer guards the cloud VM ──
    if vnode.metadata.deletion_timestamp.is_some() {
        return handle_node_deletion(&vnode, &api, &ctx).await;
    }

    match next_step(&vnode, Utc::now()) {
        NodeStep::CreateVm => create_vm(&vnode, &api, &ctx).await,
        NodeStep::PollProvisioning => poll_provisioning(&vnode, &api, &ctx).await,
        NodeStep::FailProvisioningTimeout => {
            warn!(node = %name, "vpsienode_provisioning_timeout");
            set_phase(
                &api,
                &vnode,
                VPSieNodePhase::Failed,
                Some("provisioning timed out waiting for the VM to run".to_string()),
            )
            .await?;
            Ok(Action::requeue(ERROR_REQUEUE))
        }
        NodeStep::AwaitJoin => await_join(&vnode, &api, &ctx).await,
        NodeStep::AwaitReady => await_ready(&vnode, &api, &ctx).await,
        NodeStep::Steady => Ok(Action::requeue(REQUEUE_INTERVAL)),
        NodeStep::BeginTermination => {
            // The scale-down manager already cordoned and drained.
            info!(node = %name, "vpsienode_terminating");
            set_phase(&api, &vnode, VPSieNodePhase::Terminating, None).await?;
            Ok(Action::requeue(Duration::ZERO))
        }
        NodeStep::DeleteVm => delete_vm(&vnode, &api, &ctx).await,
        NodeStep::FinalizeRemoval => {
            if vnode.metadata.deletion_timestamp.is_none() {
                api.delete(&name, &Default::default()).await?;
            }
            Ok(Action::await_change())
        }
        NodeStep::RetainFailed => Ok(Action::requeue(ERROR_REQUEUE)),
        NodeStep::GarbageCollect => {
            info!(node = %name, "vpsienode_failed_ttl_expired");
            api.delete(&name, &Default::default()).await?;
            Ok(Action::await_change())
        }
    }
}

fn node_error_policy(
    _node: Arc<VPSieNode>,
    error: &kube::Error,
    _ctx: Arc<OperatorContext>,
) -> Action {
    warn!(error = %error, "vpsienode_reconcile_error");
    Action::requeue(ERROR_REQUEUE)
}

async fn handle_node_deletion(
    vnode: &VPSieNode,
    api: &Api<VPSieNode>,
    ctx: &OperatorContext,
) -> std::result::Result<Action, kube::Error> {
    let name = vnode.name_any();
    let has_finalizer = vnode
        .metadata
        .finalizers
        .as_ref()
        .is_some_and(|f| f.iter().any(|s| s == NODE_FINALIZER));
    if !has_finalizer {
        return Ok(Action::await_change());
    }

    if vnode.spec.instance_id > 0 {
        match ctx
            .cloud
            .delete_vm(vnode.spec.instance_id, CLOUD_OP_DEADLINE)
            .await
        {
            Ok(()) | Err(CloudError::NotFound) => {}
            Err(e) => {
                warn!(node = %name, error = %e, "vm_delete_failed_will_retry");
                return Ok(Action::requeue(REQUEUE_INTERVAL));
            }
        }
    }

    let remaining: Vec<String> = vnode
        .metadata
        .finalizers
        .clone()
        .unwrap_or_default()
        .into_iter()
        .filter(|f| f != NODE_FINALIZER)
        .collect();
    let patch = serde_json::json!({ "metadata": { "finalizers": remaining } });
    api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;

    info!(node = %name, "vpsienode_finalizer_cleared");
    Ok(Action::await_change())
}

async fn create_vm(
    vnode: &VPSieNode,
    api: &Api<VPSieNode>,
    ctx: &OperatorContext,
) -> std::result::Result<Action, kube::Error> {
    let name = vnode.name_any();

    // Replay safety: a stored instance id means the VM already exists.
    if vnode.spec.instance_id > 0 {
        set_phase(api, vnode, VPSieNodePhase::Provisioning, None).await?;
        return Ok(Action::requeue(POLL_REQUEUE));
    }

    let groups: Api<NodeGroup> = Api::namespaced(
        ctx.client.clone(),
        &vnode.namespace().unwrap_or_default(),
    );
    let group = groups.get(&vnode.spec.node_group).await?;

    let request = CreateVmRequest {
        hostname: name.clone(),
        offer_identifier: vnode.spec.offering_id.clone(),
        datacenter_id: vnode.spec.datacenter_id.clone(),
        image_identifier: group.spec.image_id.clone(),
        ssh_keys: Vec::new(),
        user_data: None,
        project_id: ctx.identity.project_id.clone(),
        resource_identifier: ctx.identity.resource_identifier.clone(),
    };

    match ctx.cloud.create_vm(&request, CREATE_VM_DEADLINE).await {
        Ok(vm) => {
            let patch = serde_json::json!({
                "metadata": {
                    "annotations": { VPS_ID_ANNOTATION: vm.identifier.to_string() }
                },
                "spec": { "instanceId": vm.identifier }
            });
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await?;
            set_phase(api, vnode, VPSieNodePhase::Provisioning, None).await?;
            info!(node = %name, instance_id = vm.identifier, "vm_created");
            Ok(Action::requeue(POLL_REQUEUE))
        }
        Err(CloudError::RateLimited) => {
            // Back off without marking the node failed.
            info!(node = %name, "vm_create_rate_limited");
            Ok(Action::requeue(ERROR_REQUEUE))
        }
        Err(CloudError::CircuitOpen) => Ok(Action::requeue(REQUEUE_INTERVAL)),
        Err(e) => {
            warn!(node = %name, error = %e, "vm_create_failed");
            set_phase(api, vnode, VPSieNodePhase::Failed, Some(e.to_string())).await?;
            Ok(Action::requeue(ERROR_REQUEUE))
        }
    }
}

async fn poll_provisioning(
    vnode: &VPSieNode,
    api: &Api<VPSieNode>,
    ctx: &OperatorContext,
) -> std::result::Result<Action, kube::Error> {
    let name = vnode.name_any();

    match ctx.cloud.get_vm(vnode.spec.instance_id, CLOUD_OP_DEADLINE).await {
        Ok(vm) if vm.is_running() => {
            if let Some(entered) = node::phase_entered_at(vnode, VPSieNodePhase::Provisioning) {
                let elapsed = Utc::now().signed_duration_since(entered);
                metrics::NODE_PROVISION_DURATION.observe(elapsed.num_seconds().max(0) as f64);
            }
            let patch = serde_json::json!({
                "spec": {
                    "hostname": vm.hostname,
                    "ipv4": vm.ipv4,
                    "ipv6": vm.ipv6,
                }
            });
            api.patch(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
                .await?;
            set_phase(api, vnode, VPSieNodePhase::Provisioned, None).await?;
            info!(node = %name, "vm_running");
            Ok(Action::requeue(POLL_REQUEUE))
        }
        Ok(_) => Ok(Action::requeue(POLL_REQUEUE)),
        Err(CloudError::NotFound) => {
            set_phase(
                api,
                vnode,
                VPSieNodePhase::Failed,
                Some("VM disappeared during provisioning".to_string()),
            )
            .await?;
            Ok(Action::requeue(ERROR_REQUEUE))
        }
        Err(CloudError::RateLimited) => Ok(Action::requeue(ERROR_REQUEUE)),
        Err(e) => {
            warn!(node = %name, error = %e, "vm_poll_failed");
            Ok(Action::requeue(POLL_REQUEUE))
        }
    }
}

fn orchestrator_node_name(vnode: &VPSieNode) -> String {
    vnode
        .spec
        .hostname
        .clone()
        .unwrap_or_else(|| vnode.name_any())
}

async fn await_join(
    vnode: &VPSieNode,
    api: &Api<VPSieNode>,
    ctx: &OperatorContext,
) -> std::result::Result<Action, kube::Error> {
    let nodes: Api<Node> = Api::all(ctx.client.clone());
    match nodes.get_opt(&orchestrator_node_name(vnode)).await? {
        Some(_) => {
            set_phase(api, vnode, VPSieNodePhase::Joining, None).await?;
            Ok(Action::requeue(POLL_REQUEUE))
        }
        None => Ok(Action::requeue(POLL_REQUEUE)),
    }
}

async fn await_ready(
    vnode: &VPSieNode,
    api: &Api<VPSieNode>,
    ctx: &OperatorContext,
) -> std::result::Result<Action, kube::Error> {
    let name = vnode.name_any();

    // Joining has its own deadline from configuration.
    if let Some(entered) = node::phase_entered_at(vnode, VPSieNodePhase::Joining) {
        let elapsed = Utc::now().signed_duration_since(entered).num_seconds();
        if elapsed > ctx.settings.node_ready_timeout.as_secs() as i64 {
            set_phase(
                api,
                vnode,
                VPSieNodePhase::Failed,
                Some("node never reported Ready".to_string()),
            )
            .await?;
            return Ok(Action::requeue(ERROR_REQUEUE));
        }
    }

    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let Some(k8s_node) = nodes.get_opt(&orchestrator_node_name(vnode)).await? else {
        return Ok(Action::requeue(POLL_REQUEUE));
    };

    let ready = k8s_node
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
        .iter()
        .any(|c| c.type_ == "Ready" && c.status == "True");

    if !ready {
        return Ok(Action::requeue(POLL_REQUEUE));
    }

    let capacity = k8s_node.status.as_ref().and_then(|s| s.capacity.as_ref());
    let cpu_millis = capacity
        .and_then(|c| c.get("cpu"))
        .map(|q| analyzer::parse_cpu_millis(&q.0));
    let memory_bytes = capacity
        .and_then(|c| c.get("memory"))
        .map(|q| analyzer::parse_memory_bytes(&q.0));

    let mut status = vnode.status.clone().unwrap_or_default();
    record_phase(&mut status, VPSieNodePhase::Ready, Utc::now());
    status.capacity = Some(vpsie_autoscaler::crd::NodeCapacity {
        cpu_millis,
        memory_bytes,
    });
    status.observed_generation = vnode.metadata.generation;

    let patch = serde_json::json!({ "status": status });
    api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await?;

    info!(node = %name, "vpsienode_ready");
    Ok(Action::requeue(REQUEUE_INTERVAL))
}

async fn delete_vm(
    vnode: &VPSieNode,
    api: &Api<VPSieNode>,
    ctx: &OperatorContext,
) -> std::result::Result<Action, kube::Error> {
    let name = vnode.name_any();

    if vnode.spec.instance_id > 0 {
        match ctx
            .cloud
            .delete_vm(vnode.spec.instance_id, CLOUD_OP_DEADLINE)
            .await
        {
            Ok(()) | Err(CloudError::NotFound) => {}
            Err(CloudError::RateLimited) => return Ok(Action::requeue(ERROR_REQUEUE)),
            Err(e) => {
                warn!(node = %name, error = %e, "vm_delete_failed");
                return Ok(Action::requeue(REQUEUE_INTERVAL));
            }
        }
    }

    set_phase(api, vnode, VPSieNodePhase::Deleting, None).await?;
    api.delete(&name, &Default::default()).await?;
    info!(node = %name, "vm_deleted");
    Ok(Action::await_change())
}

/// Apply a phase transition, refusing arrows outside the lifecycle DAG.
async fn set_phase(
    api: &Api<VPSieNode>,
    vnode: &VPSieNode,
    phase: VPSieNodePhase,
    last_error: Option<String>,
) -> std::result::Result<(), kube::Error> {
    let current = vnode.phase();
    if !node::is_legal_transition(current, phase) {
        warn!(
            node = %vnode.name_any(),
            from = %current,
            to = %phase,
            "illegal_phase_transition_skipped"
        );
        return Ok(());
    }

    let mut status: VPSieNodeStatus = vnode.status.clone().unwrap_or_default();
    record_phase(&mut status, phase, Utc::now());
    if last_error.is_some() {
        status.last_error = last_error;
    }
    status.observed_generation = vnode.metadata.generation;

    let patch = serde_json::json!({ "status": status });
    api.patch_status(
        &vnode.name_any(),
        &PatchParams::apply(FIELD_MANAGER),
        &Patch::Merge(&patch),
    )
    .await?;
    Ok(())
}

/* ============================= SCALE-UP ============================= */

async fn run_pod_watcher(ctx: Arc<OperatorContext>) {
    let pods: Api<Pod> = Api::all(ctx.client.clone());
    let mut stream = watcher::watcher(pods, watcher::Config::default()).boxed();
    let mut tick = tokio::time::interval(ctx.watcher.tick_interval());

    loop {
        tokio::select! {
            maybe_event = stream.next() => match maybe_event {
                Some(Ok(Event::Applied(pod))) => {
                    ctx.watcher.observe(&pod).await;
                }
                Some(Ok(Event::Restarted(pods))) => {
                    for pod in &pods {
                        ctx.watcher.observe(pod).await;
                    }
                }
                Some(Ok(Event::Deleted(_))) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "pod_watch_error");
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
                None => break,
            },
            _ = tick.tick() => {
                let events = ctx.watcher.drain().await;
                if !events.is_empty() {
                    handle_scale_up(&ctx, events).await;
                }
            }
        }
    }
}

/// Pod has been unschedulable for at least the configured grace period.
fn past_grace(event: &SchedulingEvent, grace: Duration) -> bool {
    let since = event
        .pod
        .status
        .as_ref()
        .and_then(|s| s.conditions.as_deref())
        .unwrap_or_default()
        .iter()
        .find(|c| c.type_ == "PodScheduled" && c.status == "False")
        .and_then(|c| c.last_transition_time.as_ref())
        .map(|t| t.0);
    match since {
        Some(since) => {
            Utc::now().signed_duration_since(since).num_seconds() >= grace.as_secs() as i64
        }
        // No transition timestamp; fall back to the observation time.
        None => {
            Utc::now()
                .signed_duration_since(event.observed_at)
                .num_seconds()
                >= grace.as_secs() as i64
        }
    }
}

async fn handle_scale_up(ctx: &OperatorContext, events: Vec<SchedulingEvent>) {
    if !ctx.settings.scale_up_enabled {
        return;
    }

    let grace = ctx.settings.unschedulable_pod_grace;
    let pods: Vec<Pod> = events
        .iter()
        .filter(|e| past_grace(e, grace))
        .map(|e| e.pod.clone())
        .collect();
    if pods.is_empty() {
        return;
    }

    let groups_api: Api<NodeGroup> = Api::all(ctx.client.clone());
    let groups = match groups_api.list(&ListParams::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!(error = %e, "scale_up_group_list_failed");
            return;
        }
    };
    let managed: Vec<NodeGroup> = groups.into_iter().filter(|g| g.is_managed()).collect();

    let matches = find_matching_groups(&pods, &managed);
    match matches.into_iter().next() {
        Some(best) => scale_up_group(ctx, best, &pods).await,
        None => create_dynamic_group(ctx, &pods).await,
    }
}

async fn scale_up_group(ctx: &OperatorContext, matched: NodeGroupMatch, pods: &[Pod]) {
    let group = matched.group;
    let name = group.name_any();
    let namespace = group.namespace().unwrap_or_default();

    if ctx.watcher.in_cooldown(&name).await {
        metrics::SCALE_UP_SKIPPED
            .with_label_values(&["cooldown", &name])
            .inc();
        return;
    }
    if !ScaleUpPolicy::is_enabled(group.spec.scale_up.as_ref()) {
        metrics::SCALE_UP_SKIPPED
            .with_label_values(&["disabled", &name])
            .inc();
        return;
    }

    // Cost-aware selection first: cheapest listed offering that can host the
    // largest pending pod. The group's static preference is the fallback.
    let instance_type = match ctx
        .cost
        .select_instance_type_cost_aware(&group, pods, CLOUD_OP_DEADLINE)
        .await
    {
        Ok(offer) => offer.identifier,
        Err(e) => {
            warn!(group = %name, error = %e, "cost_aware_selection_unavailable");
            match select_instance_type(&group) {
                Some(offering) => offering,
                None => {
                    warn!(group = %name, "scale_up_no_offering");
                    return;
                }
            }
        }
    };

    // Instance shape for the node-count estimate.
    let (cpu_millis, memory_bytes) = match ctx.cost.offerings(CLOUD_OP_DEADLINE).await {
        Ok(offers) => offers
            .get(&instance_type)
            .map(|o| (o.cpu * 1000, o.ram * (1 << 20)))
            .unwrap_or((2000, 4 << 30)),
        Err(e) => {
            warn!(error = %e, "scale_up_offering_lookup_failed");
            (2000, 4 << 30)
        }
    };

    let desired = clamp_desired(
        &group.spec,
        group.status.as_ref().and_then(|s| s.desired_nodes),
    );
    let needed = estimate_nodes_needed(&matched.deficit, cpu_millis, memory_bytes);
    let new_desired = (desired + needed).min(group.spec.max_nodes);

    if new_desired <= desired {
        metrics::SCALE_UP_SKIPPED
            .with_label_values(&["at_max", &name])
            .inc();
        info!(group = %name, desired, max = group.spec.max_nodes, "scale_up_at_max_capacity");
        return;
    }

    let decision = ScaleUpDecision {
        group: name.clone(),
        current_nodes: group.current_nodes(),
        desired_nodes: new_desired,
        nodes_to_add: new_desired - desired,
        instance_type,
        matching_pods: matched.matching_pods.len(),
        deficit: matched.deficit,
        rationale: format!(
            "{} pending pod(s) need {}m CPU and {} bytes of memory",
            matched.matching_pods.len(),
            matched.deficit.cpu_millis,
            matched.deficit.memory_bytes
        ),
    };

    let patch = serde_json::json!({
        "status": {
            "desiredNodes": new_desired,
            "lastScaleUpTime": Utc::now().to_rfc3339(),
        }
    });
    let api: Api<NodeGroup> = Api::namespaced(ctx.client.clone(), &namespace);
    if let Err(e) = api
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        warn!(group = %name, error = %e, "scale_up_status_patch_failed");
        return;
    }

    ctx.watcher.record_scale(&name).await;
    metrics::SCALE_UP_TOTAL.with_label_values(&[&name]).inc();

    info!(
        group = %decision.group,
        current = decision.current_nodes,
        desired = decision.desired_nodes,
        add = decision.nodes_to_add,
        instance_type = %decision.instance_type,
        pods = decision.matching_pods,
        rationale = %decision.rationale,
        "scale_up_decided"
    );
    println!(
        "[{}] {namespace}/{}: scale up +{} -> desired {} ({})",
        Utc::now().format("%H:%M:%S"),
        decision.group,
        decision.nodes_to_add,
        decision.desired_nodes,
        decision.rationale
    );
}

async fn create_dynamic_group(ctx: &OperatorContext, pods: &[Pod]) {
    if !ctx.settings.dynamic_node_groups_enabled {
        return;
    }

    let datacenter = ctx
        .settings
        .default_datacenter_id
        .clone()
        .or_else(|| ctx.identity.datacenter_id.clone());
    let offerings = if ctx.settings.default_offering_ids.is_empty() {
        ctx.identity.offering_ids.clone()
    } else {
        ctx.settings.default_offering_ids.clone()
    };
    let version = ctx
        .settings
        .default_kubernetes_version
        .clone()
        .or_else(|| ctx.identity.kubernetes_version.clone());

    let (Some(datacenter), Some(version), Some(image)) = (
        datacenter,
        version,
        ctx.settings.default_image_id.clone(),
    ) else {
        warn!("dynamic_group_skipped_identity_incomplete");
        return;
    };
    if offerings.is_empty() {
        warn!("dynamic_group_skipped_no_offerings");
        return;
    }

    let template = GroupTemplate::with_defaults(datacenter, offerings, image, version);
    let group = synthesize_node_group(&template, pods);
    let name = group.name_any();

    let api: Api<NodeGroup> = Api::namespaced(ctx.client.clone(), &ctx.namespace);
    match api.create(&PostParams::default(), &group).await {
        Ok(_) => {
            info!(group = %name, pods = pods.len(), "dynamic_nodegroup_created");
            println!(
                "[{}] created dynamic NodeGroup {}/{name} for {} pending pod(s)",
                Utc::now().format("%H:%M:%S"),
                ctx.namespace,
                pods.len()
            );
        }
        Err(kube::Error::Api(e)) if e.code == 409 => {
            // Deterministic name: the group already exists for this label set.
            info!(group = %name, "dynamic_nodegroup_exists");
        }
        Err(e) => {
            warn!(group = %name, error = %e, "dynamic_nodegroup_create_failed");
            return;
        }
    }

    // Size the new group so the pending pods fit.
    let deficit = analyzer::calculate_deficit(pods);
    let desired = estimate_nodes_needed(&deficit, 2000, 4 << 30).max(group.spec.min_nodes);
    let patch = serde_json::json!({
        "status": {
            "desiredNodes": desired,
            "lastScaleUpTime": Utc::now().to_rfc3339(),
        }
    });
    if let Err(e) = api
        .patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &Patch::Merge(&patch))
        .await
    {
        warn!(group = %name, error = %e, "dynamic_nodegroup_status_patch_failed");
    }
    ctx.watcher.record_scale(&name).await;
}

/* ============================= SCALE-DOWN ============================= */

async fn metrics_and_scale_down_pass(ctx: &OperatorContext) {
    if let Err(e) = ctx.manager.update_node_utilization().await {
        warn!(error = %e, "utilization_refresh_failed");
    }

    // Phase gauge over all managed VMs
    let vpsienodes: Api<VPSieNode> = Api::all(ctx.client.clone());
    if let Ok(list) = vpsienodes.list(&ListParams::default()).await {
        let mut by_phase: HashMap<String, i64> = HashMap::new();
        for vnode in &list.items {
            *by_phase.entry(vnode.phase().to_string()).or_insert(0) += 1;
        }
        for phase in [
            "Pending",
            "Provisioning",
            "Provisioned",
            "Joining",
            "Ready",
            "Terminating",
            "Deleting",
            "Failed",
        ] {
            metrics::NODE_PHASE
                .with_label_values(&[phase])
                .set(*by_phase.get(phase).unwrap_or(&0));
        }
    }

    if !ctx.settings.scale_down_enabled {
        return;
    }

    let groups: Api<NodeGroup> = Api::all(ctx.client.clone());
    let group_list = match groups.list(&ListParams::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!(error = %e, "scale_down_group_list_failed");
            return;
        }
    };

    for group in group_list.into_iter().filter(|g| g.is_managed()) {
        scale_down_group(ctx, &group, ctx.settings.max_concurrent_scale_downs as usize).await;
    }
}

async fn scale_down_group(ctx: &OperatorContext, group: &NodeGroup, needed: usize) {
    if needed == 0 {
        return;
    }
    let name = group.name_any();
    let namespace = group.namespace().unwrap_or_default();

    let members_api: Api<VPSieNode> = Api::namespaced(ctx.client.clone(), &namespace);
    let members = match members_api
        .list(&ListParams::default().labels(&format!("{NODEGROUP_LABEL}={name}")))
        .await
    {
        Ok(list) => list.items,
        Err(e) => {
            warn!(group = %name, error = %e, "scale_down_member_list_failed");
            return;
        }
    };

    let candidates: Vec<Candidate> = members
        .iter()
        .filter(|m| m.phase() == VPSieNodePhase::Ready && !m.is_marked_for_scale_down())
        .map(|m| Candidate {
            node_name: orchestrator_node_name(m),
            vpsienode: m.name_any(),
            namespace: namespace.clone(),
            created_at: m.metadata.creation_timestamp.as_ref().map(|t| t.0),
            mean_cpu: 0.0,
            mean_memory: 0.0,
        })
        .collect();
    if candidates.is_empty() {
        return;
    }

    let nodes: Api<Node> = Api::all(ctx.client.clone());
    let worker_count = match nodes.list(&ListParams::default()).await {
        Ok(list) => list
            .items
            .iter()
            .filter(|n| {
                !n.metadata
                    .labels
                    .as_ref()
                    .is_some_and(|l| l.contains_key(CONTROL_PLANE_LABEL))
            })
            .count() as i32,
        Err(e) => {
            warn!(error = %e, "scale_down_node_list_failed");
            return;
        }
    };

    let pods: Api<Pod> = Api::all(ctx.client.clone());
    let mut pods_by_node: HashMap<String, Vec<Pod>> = HashMap::new();
    match pods.list(&ListParams::default()).await {
        Ok(list) => {
            for pod in list.items {
                if let Some(node_name) = pod.spec.as_ref().and_then(|s| s.node_name.clone()) {
                    pods_by_node.entry(node_name).or_default().push(pod);
                }
            }
        }
        Err(e) => {
            warn!(error = %e, "scale_down_pod_list_failed");
            return;
        }
    }

    let pdbs_api: Api<PodDisruptionBudget> = Api::all(ctx.client.clone());
    let pdbs = match pdbs_api.list(&ListParams::default()).await {
        Ok(list) => list.items,
        Err(e) => {
            warn!(error = %e, "scale_down_pdb_list_failed");
            return;
        }
    };

    let view = GroupView {
        group: group.clone(),
        cluster_worker_count: worker_count,
        global_floor: ctx.manager.global_floor,
        pods_by_node,
        pdbs,
    };

    let (decisions, _reports) =
        evaluate_scale_down(&ctx.manager.tracker, &view, candidates, needed).await;

    for decision in decisions {
        let manager = ctx.manager.clone();
        let client = ctx.client.clone();
        let group_name = name.clone();
        let group_namespace = namespace.clone();
        tokio::spawn(async move {
            if manager.execute(&decision).await.is_err() {
                return;
            }
            // Step desired down with the drained node so the reconciler
            // does not immediately replace it.
            let api: Api<NodeGroup> = Api::namespaced(client, &group_namespace);
            let patch = match api.get(&group_name).await {
                Ok(current) => {
                    let desired = clamp_desired(
                        &current.spec,
                        current.status.as_ref().and_then(|s| s.desired_nodes),
                    );
                    let stepped = (desired - 1).max(current.spec.min_nodes);
                    serde_json::json!({
                        "status": {
                            "desiredNodes": stepped,
                            "lastScaleDownTime": Utc::now().to_rfc3339(),
                        }
                    })
                }
                Err(e) => {
                    warn!(group = %group_name, error = %e, "scale_down_group_refetch_failed");
                    serde_json::json!({
                        "status": { "lastScaleDownTime": Utc::now().to_rfc3339() }
                    })
                }
            };
            if let Err(e) = api
                .patch_status(
                    &group_name,
                    &PatchParams::apply(FIELD_MANAGER),
                    &Patch::Merge(&patch),
                )
                .await
            {
                warn!(group = %group_name, error = %e, "scale_down_status_patch_failed");
            }
        });
    }
}

/* ============================= HTTP SERVER ============================= */

pub(crate) fn build_operator_router(state: Arc<Mutex<OperatorState>>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route(
            "/readyz",
            get({
                let state = state.clone();
                move || ready_handler(state.clone())
            }),
        )
}

async fn start_metrics_server(
    state: Arc<Mutex<OperatorState>>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_operator_router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind metrics server on {addr}"))?;

    info!(addr = %addr, "metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

async fn ready_handler(state: Arc<Mutex<OperatorState>>) -> impl IntoResponse {
    let state = state.lock().await;
    if state.ready {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = metrics::REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(_) => match String::from_utf8(buffer) {
            Ok(body) => (StatusCode::OK, body),
            Err(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "metrics encoding error".to_string(),
            ),
        },
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "metrics encoding error".to_string(),
        ),
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use k8s_openapi::api::core::v1::{PodCondition, PodStatus};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use tower::ServiceExt;

    fn test_state(ready: bool) -> Arc<Mutex<OperatorState>> {
        Arc::new(Mutex::new(OperatorState { ready }))
    }

    fn unschedulable_event(transitioned_secs_ago: i64) -> SchedulingEvent {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("p".to_string()),
                namespace: Some("default".to_string()),
                ..Default::default()
            },
            status: Some(PodStatus {
                conditions: Some(vec![PodCondition {
                    type_: "PodScheduled".to_string(),
                    status: "False".to_string(),
                    reason: Some("Unschedulable".to_string()),
                    last_transition_time: Some(Time(
                        Utc::now() - chrono::Duration::seconds(transitioned_secs_ago),
                    )),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };
        SchedulingEvent {
            pod,
            observed_at: Utc::now(),
            constraint: vpsie_autoscaler::events::ResourceConstraint::Cpu,
            message: String::new(),
        }
    }

    // ── Grace filtering ──

    #[test]
    fn test_past_grace_uses_condition_transition() {
        let old = unschedulable_event(120);
        assert!(past_grace(&old, Duration::from_secs(60)));

        let fresh = unschedulable_event(10);
        assert!(!past_grace(&fresh, Duration::from_secs(60)));
    }

    #[test]
    fn test_past_grace_zero_grace_accepts_everything() {
        let fresh = unschedulable_event(0);
        assert!(past_grace(&fresh, Duration::ZERO));
    }

    // ── HTTP endpoints ──

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder()
            .uri("/healthz")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = resp.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_readyz_when_ready() {
        let app = build_operator_router(test_state(true));
        let req = Request::builder()
            .uri("/readyz")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_readyz_when_not_ready() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder()
            .uri("/readyz")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_returns_ok() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder()
            .uri("/metrics")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_returns_404() {
        let app = build_operator_router(test_state(false));
        let req = Request::builder()
            .uri("/nonexistent")
            .body(Body::empty())
            .unwrap();

        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    // ── Node name resolution ──

    #[test]
    fn test_orchestrator_node_name_prefers_hostname() {
        let mut vnode = VPSieNode::new(
            "vn-1",
            vpsie_autoscaler::crd::VPSieNodeSpec {
                offering_id: "o".to_string(),
                node_group: "g".to_string(),
                datacenter_id: "dc".to_string(),
                hostname: Some("worker-7".to_string()),
                ..Default::default()
            },
        );
        assert_eq!(orchestrator_node_name(&vnode), "worker-7");

        vnode.spec.hostname = None;
        assert_eq!(orchestrator_node_name(&vnode), "vn-1");
    }
}
