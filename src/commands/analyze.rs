use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use kube::api::{Api, ListParams};
use kube::{Client, ResourceExt};

use vpsie_autoscaler::cloud::{Credentials, VpsieClient};
use vpsie_autoscaler::config;
use vpsie_autoscaler::cost::CostCalculator;
use vpsie_autoscaler::crd::{NODEGROUP_LABEL, NodeGroup, VPSieNode};
use vpsie_autoscaler::nodegroup::count_members;
use vpsie_autoscaler::scaledown::ScaleDownManager;
use vpsie_autoscaler::utilization::UtilizationTracker;

const COST_DEADLINE: Duration = Duration::from_secs(30);

/// One-shot report: per-group counts, per-node utilization, monthly cost.
pub async fn run(namespace: &str, secret: &str) -> anyhow::Result<()> {
    println!("Analyzing managed NodeGroups...\n");

    let client = Client::try_default()
        .await
        .context("Failed to connect to Kubernetes cluster. Is your kubeconfig valid?")?;

    let credentials = config::load_credentials(&client, namespace, secret).await?;
    let cloud = Arc::new(VpsieClient::new(
        Credentials {
            client_id: credentials.client_id.clone(),
            client_secret: credentials.client_secret.clone(),
        },
        credentials.url.clone(),
    ));
    let cost = CostCalculator::new(cloud);

    // Single utilization snapshot from the metrics API
    let tracker = Arc::new(UtilizationTracker::default());
    let manager = ScaleDownManager::new(
        client.clone(),
        tracker.clone(),
        1,
        1,
        Duration::from_secs(60),
    );
    if let Err(e) = manager.update_node_utilization().await {
        println!("  (node metrics unavailable: {e})\n");
    }

    let groups: Api<NodeGroup> = Api::all(client.clone());
    let group_list = groups
        .list(&ListParams::default())
        .await
        .context("Failed to list NodeGroups. Are the CRDs installed?")?;

    let mut total_monthly = 0.0;
    let mut managed = 0;

    println!(
        "{:<24} {:>4} {:>4} {:>8} {:>8} {:>6} {:>12}",
        "NODEGROUP", "MIN", "MAX", "DESIRED", "CURRENT", "READY", "MONTHLY $"
    );
    println!("{}", "-".repeat(72));

    for group in group_list.items.iter().filter(|g| g.is_managed()) {
        managed += 1;
        let name = group.name_any();
        let group_namespace = group.namespace().unwrap_or_default();

        let members: Api<VPSieNode> = Api::namespaced(client.clone(), &group_namespace);
        let member_list = members
            .list(&ListParams::default().labels(&format!("{NODEGROUP_LABEL}={name}")))
            .await?;
        let counts = count_members(&member_list.items);

        let member_offerings: Vec<String> = member_list
            .items
            .iter()
            .map(|m| m.spec.offering_id.clone())
            .collect();

        let monthly = match cost
            .calculate_node_group_cost(group, &member_offerings, COST_DEADLINE)
            .await
        {
            Ok(report) => {
                total_monthly += report.monthly;
                format!("{:.2}{}", report.monthly, if report.estimated { "*" } else { "" })
            }
            Err(e) => format!("n/a ({e})"),
        };

        println!(
            "{:<24} {:>4} {:>4} {:>8} {:>8} {:>6} {:>12}",
            name,
            group.spec.min_nodes,
            group.spec.max_nodes,
            group.desired_nodes(),
            counts.current,
            counts.ready,
            monthly
        );
    }

    if managed == 0 {
        println!("(no managed NodeGroups found)");
    }

    println!("\nProjected monthly cost: ${total_monthly:.2} (* = estimate)\n");

    let utilization = tracker.all().await;
    if !utilization.is_empty() {
        println!("{:<40} {:>8} {:>8} {:>8}", "NODE", "CPU %", "MEM %", "SAMPLES");
        println!("{}", "-".repeat(68));
        for node in utilization {
            println!(
                "{:<40} {:>8.1} {:>8.1} {:>8}",
                node.node,
                node.mean_cpu,
                node.mean_memory,
                node.sample_count()
            );
        }
    }

    Ok(())
}
