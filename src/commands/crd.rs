use anyhow::Result;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::{Api, Client, CustomResourceExt};

use crate::cli::CrdAction;
use vpsie_autoscaler::crd::{AutoscalerConfig, NodeGroup, VPSieNode};

pub async fn run(action: CrdAction) -> Result<()> {
    match action {
        CrdAction::Generate => generate(),
        CrdAction::Install => install().await,
    }
}

fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![NodeGroup::crd(), VPSieNode::crd(), AutoscalerConfig::crd()]
}

/// Print all three CRDs as a multi-document YAML stream.
fn generate() -> Result<()> {
    for crd in all_crds() {
        let yaml = serde_yaml::to_string(&crd)?;
        println!("---");
        println!("{yaml}");
    }
    Ok(())
}

/// Apply the CRDs directly to the connected cluster.
async fn install() -> Result<()> {
    let client = Client::try_default().await?;
    let crds: Api<CustomResourceDefinition> = Api::all(client);

    for crd in all_crds() {
        let name = crd.metadata.name.clone().unwrap_or_default();
        match crds.create(&Default::default(), &crd).await {
            Ok(_) => println!("CRD '{name}' installed successfully"),
            Err(kube::Error::Api(err)) if err.code == 409 => {
                println!("CRD '{name}' already exists — skipping");
            }
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
