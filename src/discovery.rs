use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::api::Api;
use kube::{Client, ResourceExt};
use regex::Regex;
use tracing::{info, warn};

use crate::cloud::VpsieClient;
use crate::config::CloudCredentials;

/* ============================= CONFIG ============================= */

const DISCOVERY_DEADLINE: Duration = Duration::from_secs(30);

/// Node label/annotation fallbacks for cluster identity.
const CLUSTER_ID_LABEL: &str = "vpsie.com/cluster-id";
const DATACENTER_LABEL: &str = "vpsie.com/datacenter-id";
const PROJECT_LABEL: &str = "vpsie.com/project-id";

/* ============================= IDENTITY ============================= */

/// Cluster identity assembled at startup.
///
/// Discovery is best-effort: missing pieces disable dynamic NodeGroup
/// creation but never abort the operator.
#[derive(Debug, Clone, Default)]
pub struct ClusterIdentity {
    pub cluster_name: Option<String>,
    pub resource_identifier: Option<String>,
    pub datacenter_id: Option<String>,
    pub project_id: Option<String>,
    pub kubernetes_version: Option<String>,
    pub offering_ids: Vec<String>,
}

impl ClusterIdentity {
    pub fn from_credentials(credentials: &CloudCredentials) -> Self {
        Self {
            resource_identifier: credentials.resource_identifier.clone(),
            datacenter_id: credentials.datacenter_id.clone(),
            project_id: credentials.project_id.clone(),
            ..Default::default()
        }
    }

    /// Everything dynamic NodeGroup synthesis needs.
    pub fn is_complete(&self) -> bool {
        self.resource_identifier.is_some()
            && self.datacenter_id.is_some()
            && self.kubernetes_version.is_some()
            && !self.offering_ids.is_empty()
    }
}

/* ============================= PARSERS ============================= */

/// Normalize a Kubernetes version to `vMAJOR.MINOR.PATCH`.
pub fn normalize_version(version: &str) -> String {
    let trimmed = version.trim().trim_start_matches('v');
    // Strip any build/pre-release suffix ("1.28.2-vpsie.1" -> "1.28.2")
    let core: String = trimmed
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts: Vec<&str> = core.split('.').filter(|p| !p.is_empty()).collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    format!("v{}.{}.{}", parts[0], parts[1], parts[2])
}

/// Split a `vpsie://<dc>/<cluster>/<node-id>` providerID into its parts.
pub fn parse_provider_id(provider_id: &str) -> Option<(String, String, i64)> {
    let rest = provider_id.strip_prefix("vpsie://")?;
    let mut parts = rest.splitn(3, '/');
    let datacenter = parts.next()?.to_string();
    let cluster = parts.next()?.to_string();
    let node_id = parts.next()?.parse::<i64>().ok()?;
    if datacenter.is_empty() || cluster.is_empty() {
        return None;
    }
    Some((datacenter, cluster, node_id))
}

/// Derive the normalized cluster name (`DC-Kubernetes-id`) from a worker
/// hostname like `fra-kubernetes-ab12c-worker-3`.
pub fn cluster_name_from_hostname(hostname: &str) -> Option<String> {
    let re = Regex::new(r"(?i)^([a-z]+-kubernetes-[a-z0-9]+)").expect("pattern is valid");
    let captured = re.captures(hostname)?.get(1)?.as_str().to_lowercase();
    let mut segments = captured.splitn(3, '-');
    let dc = segments.next()?;
    let _k8s = segments.next()?;
    let id = segments.next()?;
    Some(format!("{}-Kubernetes-{}", dc.to_uppercase(), id))
}

/// Hostname portion of an API server URL.
pub fn host_from_server_url(url: &str) -> Option<String> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))?;
    let host_port = rest.split('/').next()?;
    let host = host_port.split(':').next()?;
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

/// Private/internal endpoints are useless for deriving a public identity.
pub fn is_private_host(host: &str) -> bool {
    if host == "localhost" || host.ends_with(".local") || host.ends_with(".svc") {
        return true;
    }
    if host.starts_with("10.") || host.starts_with("192.168.") {
        return true;
    }
    if let Some(rest) = host.strip_prefix("172.") {
        if let Some(second) = rest.split('.').next()
            && let Ok(octet) = second.parse::<u8>()
            && (16..=31).contains(&octet)
        {
            return true;
        }
    }
    false
}

/// Extract the `server:` field from a kubeconfig blob in cluster-info.
fn server_from_kubeconfig(kubeconfig: &str) -> Option<String> {
    kubeconfig
        .lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("server:"))
        .map(|v| v.trim().to_string())
}

/* ============================= DISCOVERY ============================= */

pub struct Discovery {
    client: Client,
    cloud: Arc<VpsieClient>,
}

impl Discovery {
    pub fn new(client: Client, cloud: Arc<VpsieClient>) -> Self {
        Self { client, cloud }
    }

    /// Fill the gaps in a partially configured identity.
    ///
    /// Resolution order per field: configuration (already in `identity`),
    /// then node labels/annotations and providerIDs, then the cloud cluster
    /// listing matched by name.
    pub async fn discover(&self, mut identity: ClusterIdentity) -> ClusterIdentity {
        if identity.is_complete() {
            return identity;
        }

        let nodes: Api<Node> = Api::all(self.client.clone());
        let node_list = match nodes.list(&Default::default()).await {
            Ok(list) => list.items,
            Err(e) => {
                warn!(error = %e, "discovery_node_list_failed");
                Vec::new()
            }
        };

        // Kubernetes version from any kubelet.
        if identity.kubernetes_version.is_none() {
            identity.kubernetes_version = node_list
                .iter()
                .filter_map(|n| n.status.as_ref())
                .filter_map(|s| s.node_info.as_ref())
                .map(|i| normalize_version(&i.kubelet_version))
                .next();
        }

        // Identity fragments from node metadata and providerIDs.
        for node in &node_list {
            if identity.cluster_name.is_none() {
                identity.cluster_name = cluster_name_from_hostname(&node.name_any());
            }
            let labels = node.metadata.labels.clone().unwrap_or_default();
            let annotations = node.metadata.annotations.clone().unwrap_or_default();
            let lookup = |key: &str| {
                labels
                    .get(key)
                    .or_else(|| annotations.get(key))
                    .cloned()
            };
            identity.resource_identifier = identity
                .resource_identifier
                .or_else(|| lookup(CLUSTER_ID_LABEL));
            identity.datacenter_id = identity.datacenter_id.or_else(|| lookup(DATACENTER_LABEL));
            identity.project_id = identity.project_id.or_else(|| lookup(PROJECT_LABEL));

            if identity.datacenter_id.is_none() || identity.resource_identifier.is_none() {
                let provider_id = node
                    .spec
                    .as_ref()
                    .and_then(|s| s.provider_id.as_deref())
                    .unwrap_or_default();
                if let Some((dc, cluster, _)) = parse_provider_id(provider_id) {
                    identity.datacenter_id = identity.datacenter_id.or(Some(dc));
                    identity.resource_identifier = identity.resource_identifier.or(Some(cluster));
                }
            }
        }

        // cluster-info as a late source for the cluster name.
        if identity.cluster_name.is_none() {
            identity.cluster_name = self.cluster_name_from_cluster_info().await;
        }

        // Confirm against the cloud and pick up offerings.
        self.fill_from_cloud(&mut identity).await;

        if identity.is_complete() {
            info!(
                cluster = identity.cluster_name.as_deref().unwrap_or("unknown"),
                datacenter = identity.datacenter_id.as_deref().unwrap_or("unknown"),
                offerings = identity.offering_ids.len(),
                "discovery_complete"
            );
        } else {
            warn!("discovery_incomplete_dynamic_groups_disabled");
        }

        identity
    }

    async fn cluster_name_from_cluster_info(&self) -> Option<String> {
        let maps: Api<ConfigMap> = Api::namespaced(self.client.clone(), "kube-public");
        let info = maps.get("cluster-info").await.ok()?;
        let kubeconfig = info.data.as_ref()?.get("kubeconfig")?;
        let server = server_from_kubeconfig(kubeconfig)?;
        let host = host_from_server_url(&server)?;
        if is_private_host(&host) {
            return None;
        }
        cluster_name_from_hostname(host.split('.').next().unwrap_or(&host))
    }

    async fn fill_from_cloud(&self, identity: &mut ClusterIdentity) {
        let clusters = match self.cloud.list_k8s_clusters(DISCOVERY_DEADLINE).await {
            Ok(clusters) => clusters,
            Err(e) => {
                warn!(error = %e, "discovery_cluster_list_failed");
                return;
            }
        };

        let matched = clusters.iter().find(|c| {
            identity
                .cluster_name
                .as_deref()
                .is_some_and(|name| c.name.eq_ignore_ascii_case(name))
                || identity
                    .resource_identifier
                    .as_deref()
                    .is_some_and(|id| c.identifier == id)
        });

        let Some(cluster) = matched else {
            return;
        };

        identity.resource_identifier = identity
            .resource_identifier
            .clone()
            .or(Some(cluster.identifier.clone()));
        identity.datacenter_id = identity.datacenter_id.clone().or(cluster.datacenter_id.clone());
        identity.project_id = identity.project_id.clone().or(cluster.project_id.clone());
        if identity.kubernetes_version.is_none() {
            identity.kubernetes_version = cluster.version.as_deref().map(normalize_version);
        }

        if identity.offering_ids.is_empty() {
            match self
                .cloud
                .list_k8s_groups(&cluster.identifier, DISCOVERY_DEADLINE)
                .await
            {
                Ok(groups) => {
                    identity.offering_ids = groups
                        .iter()
                        .filter_map(|g| g.offer_identifier.clone())
                        .collect();
                }
                Err(e) => warn!(error = %e, "discovery_group_list_failed"),
            }
        }
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_version_variants() {
        assert_eq!(normalize_version("1.28.2"), "v1.28.2");
        assert_eq!(normalize_version("v1.28.2"), "v1.28.2");
        assert_eq!(normalize_version("1.28"), "v1.28.0");
        assert_eq!(normalize_version("v1.28.2-vpsie.1"), "v1.28.2");
    }

    #[test]
    fn test_parse_provider_id() {
        assert_eq!(
            parse_provider_id("vpsie://fra01/cluster-ab12/4711"),
            Some(("fra01".to_string(), "cluster-ab12".to_string(), 4711))
        );
        assert_eq!(parse_provider_id("aws:///i-0abc"), None);
        assert_eq!(parse_provider_id("vpsie://fra01/cluster"), None);
        assert_eq!(parse_provider_id("vpsie://fra01/cluster/not-a-number"), None);
    }

    #[test]
    fn test_cluster_name_from_hostname() {
        assert_eq!(
            cluster_name_from_hostname("fra-kubernetes-ab12c-worker-3"),
            Some("FRA-Kubernetes-ab12c".to_string())
        );
        assert_eq!(
            cluster_name_from_hostname("NYC-Kubernetes-77xyz"),
            Some("NYC-Kubernetes-77xyz".to_string())
        );
        assert_eq!(cluster_name_from_hostname("plain-worker-1"), None);
        assert_eq!(cluster_name_from_hostname(""), None);
    }

    #[test]
    fn test_host_from_server_url() {
        assert_eq!(
            host_from_server_url("https://api.example.com:6443"),
            Some("api.example.com".to_string())
        );
        assert_eq!(
            host_from_server_url("https://10.0.0.1:6443/path"),
            Some("10.0.0.1".to_string())
        );
        assert_eq!(host_from_server_url("not-a-url"), None);
    }

    #[test]
    fn test_private_host_detection() {
        assert!(is_private_host("10.0.0.1"));
        assert!(is_private_host("192.168.1.10"));
        assert!(is_private_host("172.16.0.1"));
        assert!(is_private_host("172.31.200.4"));
        assert!(is_private_host("localhost"));
        assert!(is_private_host("kubernetes.default.svc"));

        assert!(!is_private_host("172.32.0.1"));
        assert!(!is_private_host("172.15.0.1"));
        assert!(!is_private_host("api.example.com"));
        assert!(!is_private_host("203.0.113.5"));
    }

    #[test]
    fn test_server_from_kubeconfig() {
        let kubeconfig = r#"
apiVersion: v1
clusters:
- cluster:
    server: https://fra-kubernetes-ab12c.example.com:6443
  name: cluster
"#;
        assert_eq!(
            server_from_kubeconfig(kubeconfig),
            Some("https://fra-kubernetes-ab12c.example.com:6443".to_string())
        );
        assert_eq!(server_from_kubeconfig("no server here"), None);
    }

    #[test]
    fn test_identity_completeness() {
        let mut identity = ClusterIdentity::default();
        assert!(!identity.is_complete());

        identity.resource_identifier = Some("cluster-1".to_string());
        identity.datacenter_id = Some("dc-1".to_string());
        identity.kubernetes_version = Some("v1.28.0".to_string());
        assert!(!identity.is_complete());

        identity.offering_ids = vec!["offering-1".to_string()];
        assert!(identity.is_complete());
    }
}
