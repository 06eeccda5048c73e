use std::time::Duration;

use futures::{StreamExt, stream};
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::api::{Api, DeleteParams, EvictParams, ListParams};
use kube::{Client, ResourceExt};
use tokio::time::{Instant, sleep, timeout};
use tracing::{info, warn};

use crate::metrics;

/* ============================= CONFIG ============================= */

/// Evictions issued concurrently per drain. Kept low so eviction retries do
/// not generate excessive traffic against the API server.
const CONCURRENT_EVICTIONS: usize = 5;

/// Pause between eviction attempts while a disruption budget blocks us.
/// `kubectl drain` waits the same 5 seconds.
const EVICTION_RETRY_INTERVAL: Duration = Duration::from_secs(5);

const DELETION_CHECK_INTERVAL: Duration = Duration::from_secs(5);

pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(600);

/// Budget for best-effort uncordon after a failed or cancelled drain.
const CLEANUP_DEADLINE: Duration = Duration::from_secs(30);

const MIRROR_POD_ANNOTATION: &str = "kubernetes.io/config.mirror";

/* ============================= CLASSIFICATION ============================= */

/// What a drain does with each pod bound to the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodClass {
    /// DaemonSet pods ignore cordons; evicting them is a losing battle.
    DaemonSet,
    /// Static pods mirrored into the API; not controllable.
    Mirror,
    /// Succeeded or Failed; nothing left to evict.
    Completed,
    Evictable,
}

pub fn classify_pod(pod: &Pod) -> PodClass {
    if pod
        .metadata
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|o| o.kind == "DaemonSet")
    {
        return PodClass::DaemonSet;
    }

    if pod
        .metadata
        .annotations
        .as_ref()
        .is_some_and(|a| a.contains_key(MIRROR_POD_ANNOTATION))
    {
        return PodClass::Mirror;
    }

    if matches!(
        pod.status.as_ref().and_then(|s| s.phase.as_deref()),
        Some("Succeeded") | Some("Failed")
    ) {
        return PodClass::Completed;
    }

    PodClass::Evictable
}

/// Grace period carried from the pod's own spec into the eviction.
pub fn eviction_grace(pod: &Pod) -> Option<u32> {
    pod.spec
        .as_ref()
        .and_then(|s| s.termination_grace_period_seconds)
        .and_then(|g| u32::try_from(g).ok())
}

/* ============================= OUTCOME ============================= */

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Success,
    Timeout,
    PdbBlocked,
    EvictionError,
}

impl DrainOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            DrainOutcome::Success => "success",
            DrainOutcome::Timeout => "timeout",
            DrainOutcome::PdbBlocked => "pdb_blocked",
            DrainOutcome::EvictionError => "eviction_error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DrainReport {
    pub outcome: DrainOutcome,
    pub evicted: usize,
    pub skipped: usize,
}

/* ============================= CORDON GUARD ============================= */

/// Uncordons the node from a detached task when dropped while armed.
///
/// Dropping the drain future (parent cancellation) or any failure path runs
/// the cleanup on its own bounded deadline, so a cancelled drain cannot leave
/// a node cordoned indefinitely.
pub struct CordonGuard {
    client: Client,
    node: String,
    armed: bool,
}

impl CordonGuard {
    pub fn new(client: Client, node: impl Into<String>) -> Self {
        Self {
            client,
            node: node.into(),
            armed: true,
        }
    }

    /// Keep the node cordoned; called once the drain succeeded and the node
    /// is headed for termination.
    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for CordonGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let client = self.client.clone();
        let node = self.node.clone();
        tokio::spawn(async move {
            let nodes: Api<Node> = Api::all(client);
            match timeout(CLEANUP_DEADLINE, nodes.uncordon(&node)).await {
                Ok(Ok(_)) => info!(node = %node, "drain_cleanup_uncordoned"),
                Ok(Err(e)) => warn!(node = %node, error = %e, "drain_cleanup_uncordon_failed"),
                Err(_) => warn!(node = %node, "drain_cleanup_deadline_exceeded"),
            }
        });
    }
}

/* ============================= DRAIN ============================= */

enum EvictFailure {
    PdbBlocked,
    Error(String),
}

fn api_error_code(err: &kube::Error) -> Option<u16> {
    match err {
        kube::Error::Api(response) => Some(response.code),
        _ => None,
    }
}

/// Cordon the node and evict every evictable pod bound to it.
///
/// Evictions respect PodDisruptionBudgets: a 429 from the eviction
/// subresource is retried at a fixed interval until the drain deadline. On
/// anything but success the node is uncordoned from a detached task.
pub async fn drain_node(client: &Client, node_name: &str, drain_timeout: Duration) -> DrainReport {
    let start = Instant::now();
    let deadline = start + drain_timeout;

    let nodes: Api<Node> = Api::all(client.clone());
    if let Err(e) = nodes.cordon(node_name).await {
        warn!(node = %node_name, error = %e, "cordon_failed");
        return finish(
            DrainReport {
                outcome: DrainOutcome::EvictionError,
                evicted: 0,
                skipped: 0,
            },
            start,
        );
    }
    let mut guard = CordonGuard::new(client.clone(), node_name);

    let pods_api: Api<Pod> = Api::all(client.clone());
    let bound = match pods_api
        .list(&ListParams::default().fields(&format!("spec.nodeName={node_name}")))
        .await
    {
        Ok(list) => list.items,
        Err(e) => {
            warn!(node = %node_name, error = %e, "drain_pod_list_failed");
            return finish(
                DrainReport {
                    outcome: DrainOutcome::EvictionError,
                    evicted: 0,
                    skipped: 0,
                },
                start,
            );
        }
    };

    let (evictable, skipped): (Vec<Pod>, Vec<Pod>) = bound
        .into_iter()
        .partition(|p| classify_pod(p) == PodClass::Evictable);

    info!(
        node = %node_name,
        evictable = evictable.len(),
        skipped = skipped.len(),
        "drain_started"
    );

    let eviction_futures: Vec<_> = evictable
        .iter()
        .map(|pod| {
            let client = client.clone();
            async move { evict_and_wait(&client, pod, deadline).await.err() }
        })
        .collect();

    let failures: Vec<EvictFailure> = stream::iter(eviction_futures)
        .buffer_unordered(CONCURRENT_EVICTIONS)
        .filter_map(|failure| async move { failure })
        .collect()
        .await;

    let evicted = evictable.len() - failures.len();

    let outcome = if failures.is_empty() {
        guard.disarm();
        DrainOutcome::Success
    } else if Instant::now() >= deadline {
        DrainOutcome::Timeout
    } else if failures
        .iter()
        .any(|f| matches!(f, EvictFailure::PdbBlocked))
    {
        DrainOutcome::PdbBlocked
    } else {
        DrainOutcome::EvictionError
    };

    info!(
        node = %node_name,
        outcome = outcome.label(),
        evicted,
        "drain_finished"
    );

    finish(
        DrainReport {
            outcome,
            evicted,
            skipped: skipped.len(),
        },
        start,
    )
}

fn finish(report: DrainReport, start: Instant) -> DrainReport {
    metrics::DRAIN_DURATION
        .with_label_values(&[report.outcome.label()])
        .observe(start.elapsed().as_secs_f64());
    report
}

async fn evict_and_wait(client: &Client, pod: &Pod, deadline: Instant) -> Result<(), EvictFailure> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    let name = pod.name_any();
    let api: Api<Pod> = Api::namespaced(client.clone(), namespace);

    let params = EvictParams {
        delete_options: Some(DeleteParams {
            grace_period_seconds: eviction_grace(pod),
            ..Default::default()
        }),
        ..Default::default()
    };

    let mut transient_failures: u32 = 0;
    loop {
        match api.evict(&name, &params).await {
            Ok(_) => break,
            Err(e) if api_error_code(&e) == Some(429) => {
                // Disruption budget exhausted right now; wait and retry.
                if Instant::now() + EVICTION_RETRY_INTERVAL >= deadline {
                    return Err(EvictFailure::PdbBlocked);
                }
                sleep(EVICTION_RETRY_INTERVAL).await;
            }
            Err(e) if api_error_code(&e) == Some(404) => break,
            Err(e) => {
                transient_failures += 1;
                if transient_failures >= 3 || Instant::now() + EVICTION_RETRY_INTERVAL >= deadline {
                    return Err(EvictFailure::Error(e.to_string()));
                }
                sleep(EVICTION_RETRY_INTERVAL).await;
            }
        }
    }

    // Eviction accepted; wait for the pod to actually disappear.
    loop {
        match api.get(&name).await {
            Err(e) if api_error_code(&e) == Some(404) => return Ok(()),
            Ok(current) if current.metadata.uid != pod.metadata.uid => return Ok(()),
            _ => {
                if Instant::now() + DELETION_CHECK_INTERVAL >= deadline {
                    return Err(EvictFailure::Error(format!(
                        "pod {namespace}/{name} still present at drain deadline"
                    )));
                }
                sleep(DELETION_CHECK_INTERVAL).await;
            }
        }
    }
}

/* ============================= TESTS ============================= */
