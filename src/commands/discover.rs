use std::sync::Arc;

use anyhow::Context;
use kube::Client;

use vpsie_autoscaler::cloud::{Credentials, VpsieClient};
use vpsie_autoscaler::config;
use vpsie_autoscaler::discovery::{ClusterIdentity, Discovery};

/// Run cluster auto-discovery once and print what was derived.
pub async fn run(namespace: &str, secret: &str) -> anyhow::Result<()> {
    println!("Running cluster auto-discovery...\n");

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

    let seed = ClusterIdentity::from_credentials(&credentials);
    let identity = Discovery::new(client, cloud).discover(seed).await;

    let show = |v: &Option<String>| v.as_deref().unwrap_or("(not derived)").to_string();

    println!("===== Cluster Identity =====");
    println!("Cluster name          : {}", show(&identity.cluster_name));
    println!("Resource identifier   : {}", show(&identity.resource_identifier));
    println!("Datacenter            : {}", show(&identity.datacenter_id));
    println!("Project               : {}", show(&identity.project_id));
    println!("Kubernetes version    : {}", show(&identity.kubernetes_version));
    println!(
        "Offerings             : {}",
        if identity.offering_ids.is_empty() {
            "(none discovered)".to_string()
        } else {
            identity.offering_ids.join(", ")
        }
    );
    println!("============================\n");

    if identity.is_complete() {
        println!("Discovery complete. Dynamic NodeGroup creation is available.");
    } else {
        println!("Discovery incomplete. Dynamic NodeGroup creation will be disabled.");
        println!("Hint: set resourceIdentifier/datacenterId in the credentials secret.");
    }

    Ok(())
}
