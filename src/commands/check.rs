use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::Node;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::ListParams;
use kube::{Api, Client, CustomResourceExt};

use vpsie_autoscaler::cloud::{Credentials, VpsieClient};
use vpsie_autoscaler::config;
use vpsie_autoscaler::crd::{AutoscalerConfig, NodeGroup, VPSieNode};

/// Preflight: cluster reachability, CRD presence, credentials, cloud probe.
pub async fn run(namespace: &str, secret: &str) -> anyhow::Result<()> {
    println!("Running autoscaler preflight checks...\n");

    // 1. Build Kubernetes client from kubeconfig
    print!("  Kubeconfig .................. ");
    let client = match Client::try_default().await {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAIL");
            anyhow::bail!("Cannot load kubeconfig: {}", e);
        }
    };

    // 2. Verify actual cluster connectivity
    print!("  Cluster connection .......... ");
    match client.apiserver_version().await {
        Ok(v) => println!("OK (v{}.{})", v.major, v.minor),
        Err(e) => {
            println!("FAIL");
            println!("\n  Error: {}", e);
            println!("  Hint:  Is the cluster running? Check with: kubectl cluster-info\n");
            return Ok(());
        }
    }

    // 3. List nodes permission
    print!("  List nodes permission ....... ");
    let nodes: Api<Node> = Api::all(client.clone());
    match nodes.list(&ListParams::default()).await {
        Ok(list) => println!("OK ({} nodes)", list.items.len()),
        Err(e) => println!("FAIL ({})", e),
    }

    // 4. CRDs installed
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    for (leader, name) in [
        ("  NodeGroup CRD ............... ", NodeGroup::crd_name()),
        ("  VPSieNode CRD ............... ", VPSieNode::crd_name()),
        ("  AutoscalerConfig CRD ........ ", AutoscalerConfig::crd_name()),
    ] {
        print!("{leader}");
        match crds.get_opt(name).await {
            Ok(Some(_)) => println!("OK"),
            Ok(None) => println!("MISSING (run: vpsie-autoscaler crd install)"),
            Err(e) => println!("FAIL ({})", e),
        }
    }

    // 5. Credentials secret
    print!("  Credentials secret .......... ");
    let credentials = match config::load_credentials(&client, namespace, secret).await {
        Ok(c) => {
            println!("OK ({namespace}/{secret})");
            Some(c)
        }
        Err(e) => {
            println!("FAIL ({})", e);
            None
        }
    };

    // 6. Cloud API probe
    if let Some(credentials) = credentials {
        print!("  Cloud API ................... ");
        let cloud = Arc::new(VpsieClient::new(
            Credentials {
                client_id: credentials.client_id,
                client_secret: credentials.client_secret,
            },
            credentials.url,
        ));
        match cloud.list_datacenters(Duration::from_secs(15)).await {
            Ok(datacenters) => println!("OK ({} datacenters)", datacenters.len()),
            Err(e) => println!("FAIL ({})", e),
        }
    }

    println!("\nAll checks completed.");
    Ok(())
}
