use serde::{Deserialize, Serialize};

/* ============================= ENVELOPES ============================= */

/// Standard list envelope returned by the VPSie API.
#[derive(Debug, Clone, Deserialize)]
pub struct ListResponse<T> {
    pub data: Vec<T>,
}

/// Standard single-item envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct ItemResponse<T> {
    pub data: T,
}

/* ============================= AUTH ============================= */

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub client_id: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

/* ============================= CATALOG ============================= */

/// A purchasable VM size.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Offer {
    pub identifier: String,
    pub name: String,
    /// vCPU cores.
    pub cpu: i64,
    /// Memory in MB.
    pub ram: i64,
    /// Disk in GB.
    pub ssd: i64,
    /// Included bandwidth in GB.
    pub traffic: i64,
    pub price_hourly: f64,
    pub price_monthly: f64,
    #[serde(default)]
    pub available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datacenter_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datacenter {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub country: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OsImage {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub os_type: Option<String>,
}

/* ============================= VMS ============================= */

/// A VM instance as reported by the cloud.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Vm {
    pub identifier: i64,
    pub hostname: String,
    /// Cloud-side lifecycle status, e.g. "creating", "running", "stopped".
    pub status: String,
    pub datacenter_id: String,
    #[serde(default)]
    pub offer_identifier: Option<String>,
    #[serde(default)]
    pub ipv4: Option<String>,
    #[serde(default)]
    pub ipv6: Option<String>,
    #[serde(default)]
    pub cpu: Option<i64>,
    #[serde(default)]
    pub ram: Option<i64>,
}

impl Vm {
    pub fn is_running(&self) -> bool {
        self.status.eq_ignore_ascii_case("running")
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateVmRequest {
    pub hostname: String,
    pub offer_identifier: String,
    pub datacenter_id: String,
    pub image_identifier: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_identifier: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct VmActionRequest {
    /// "start", "stop", or "reboot".
    pub action: String,
}

/* ============================= KUBERNETES ============================= */

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sCluster {
    pub identifier: String,
    pub name: String,
    #[serde(default)]
    pub datacenter_id: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub resource_identifier: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct K8sGroup {
    pub identifier: i64,
    pub name: String,
    #[serde(default)]
    pub cluster_identifier: Option<String>,
    #[serde(default)]
    pub offer_identifier: Option<String>,
    #[serde(default)]
    pub node_count: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateK8sGroupRequest {
    pub cluster_identifier: String,
    pub name: String,
    pub offer_identifier: String,
    pub node_count: i32,
}

/* ============================= TESTS ============================= */
