use std::time::Duration;

use anyhow::{Context, Result};
use k8s_openapi::api::core::v1::Secret;
use kube::api::Api;
use kube::Client;
use tracing::{info, warn};

use crate::crd::{AutoscalerConfig, AutoscalerConfigSpec};

/* ============================= CONSTANTS ============================= */

pub const DEFAULT_CREDENTIALS_SECRET: &str = "vpsie-secret";

/// Name of the cluster-scoped AutoscalerConfig singleton.
pub const CONFIG_SINGLETON_NAME: &str = "default";

/* ============================= SETTINGS ============================= */

/// Global settings resolved from the AutoscalerConfig singleton, with
/// operator defaults for everything unset.
#[derive(Debug, Clone)]
pub struct Settings {
    pub max_cluster_workers: i32,
    pub min_cluster_workers: i32,
    pub scale_down_cooldown: Duration,
    pub max_concurrent_scale_ups: u32,
    pub max_concurrent_scale_downs: u32,
    pub unschedulable_pod_grace: Duration,
    pub node_ready_timeout: Duration,
    pub eviction_timeout: Duration,
    pub scale_up_enabled: bool,
    pub scale_down_enabled: bool,
    pub dynamic_node_groups_enabled: bool,
    pub default_datacenter_id: Option<String>,
    pub default_offering_ids: Vec<String>,
    pub default_image_id: Option<String>,
    pub default_kubernetes_version: Option<String>,
    pub project_id: Option<String>,
    pub resource_identifier: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from_spec(None)
    }
}

impl Settings {
    pub fn from_spec(spec: Option<&AutoscalerConfigSpec>) -> Self {
        let get = |f: fn(&AutoscalerConfigSpec) -> Option<u64>, default: u64| {
            Duration::from_secs(spec.and_then(f).unwrap_or(default))
        };

        Self {
            max_cluster_workers: spec.and_then(|s| s.max_cluster_workers).unwrap_or(100),
            min_cluster_workers: spec.and_then(|s| s.min_cluster_workers).unwrap_or(1),
            scale_down_cooldown: get(|s| s.scale_down_cooldown_seconds, 600),
            max_concurrent_scale_ups: spec.and_then(|s| s.max_concurrent_scale_ups).unwrap_or(5),
            max_concurrent_scale_downs: spec
                .and_then(|s| s.max_concurrent_scale_downs)
                .unwrap_or(2),
            unschedulable_pod_grace: get(|s| s.unschedulable_pod_grace_seconds, 60),
            node_ready_timeout: get(|s| s.node_ready_timeout_seconds, 600),
            eviction_timeout: get(|s| s.eviction_timeout_seconds, 600),
            scale_up_enabled: spec.and_then(|s| s.scale_up_enabled).unwrap_or(true),
            scale_down_enabled: spec.and_then(|s| s.scale_down_enabled).unwrap_or(true),
            dynamic_node_groups_enabled: spec
                .and_then(|s| s.dynamic_node_groups_enabled)
                .unwrap_or(true),
            default_datacenter_id: spec.and_then(|s| s.default_datacenter_id.clone()),
            default_offering_ids: spec
                .and_then(|s| s.default_offering_ids.clone())
                .unwrap_or_default(),
            default_image_id: spec.and_then(|s| s.default_image_id.clone()),
            default_kubernetes_version: spec.and_then(|s| s.default_kubernetes_version.clone()),
            project_id: spec.and_then(|s| s.project_id.clone()),
            resource_identifier: spec.and_then(|s| s.resource_identifier.clone()),
        }
    }
}

/// Fetch the AutoscalerConfig singleton; defaults when it does not exist.
pub async fn load_settings(client: &Client) -> Settings {
    let api: Api<AutoscalerConfig> = Api::all(client.clone());
    match api.get_opt(CONFIG_SINGLETON_NAME).await {
        Ok(Some(config)) => {
            info!(generation = ?config.metadata.generation, "autoscaler_config_loaded");
            Settings::from_spec(Some(&config.spec))
        }
        Ok(None) => {
            info!("autoscaler_config_absent_using_defaults");
            Settings::default()
        }
        Err(e) => {
            warn!(error = %e, "autoscaler_config_fetch_failed_using_defaults");
            Settings::default()
        }
    }
}

/* ============================= CREDENTIALS ============================= */

/// Credential material from the opaque provider secret.
///
/// `clientId` and `clientSecret` are mandatory; the rest disambiguate when
/// auto-discovery cannot derive them.
#[derive(Debug, Clone)]
pub struct CloudCredentials {
    pub client_id: String,
    pub client_secret: String,
    pub url: Option<String>,
    pub resource_identifier: Option<String>,
    pub datacenter_id: Option<String>,
    pub project_id: Option<String>,
}

pub fn credentials_from_secret(secret: &Secret) -> Result<CloudCredentials> {
    let data = secret.data.as_ref().context("credentials secret has no data")?;

    let decode = |key: &str| -> Option<String> {
        data.get(key)
            .and_then(|bytes| String::from_utf8(bytes.0.clone()).ok())
            .filter(|v| !v.is_empty())
    };

    let client_id = decode("clientId").context("secret is missing mandatory key clientId")?;
    let client_secret =
        decode("clientSecret").context("secret is missing mandatory key clientSecret")?;

    Ok(CloudCredentials {
        client_id,
        client_secret,
        url: decode("url"),
        resource_identifier: decode("resourceIdentifier"),
        datacenter_id: decode("datacenterId"),
        project_id: decode("projectId"),
    })
}

/// Load and decode the credentials secret; a missing or malformed secret is
/// a fatal startup error.
pub async fn load_credentials(
    client: &Client,
    namespace: &str,
    name: &str,
) -> Result<CloudCredentials> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let secret = secrets
        .get(name)
        .await
        .with_context(|| format!("failed to read credentials secret {namespace}/{name}"))?;
    credentials_from_secret(&secret)
}

/* ============================= TESTS ============================= */
