use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::cloud::types::Offer;
use crate::cloud::{CloudError, VpsieClient};
use crate::crd::NodeGroup;

/* ============================= CONFIG ============================= */

const OFFERING_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Billing month used for monthly projections.
const HOURS_PER_MONTH: f64 = 730.0;

/* ============================= TYPES ============================= */

#[derive(Debug, Clone, PartialEq)]
pub struct OfferingSpec {
    pub cpu: i64,
    pub ram_mb: i64,
    pub disk_gb: i64,
    pub bandwidth_gb: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OfferingCost {
    pub hourly: f64,
    pub daily: f64,
    pub monthly: f64,
    pub spec: OfferingSpec,
}

/// Resource floor an offering must meet to be considered.
#[derive(Debug, Clone, Default)]
pub struct ResourceRequirements {
    pub min_cpu: i64,
    pub min_memory_mb: i64,
    pub min_disk_gb: i64,
    pub min_bandwidth_gb: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeGroupCost {
    pub hourly: f64,
    pub monthly: f64,
    pub node_count: i32,
    /// True when no members were known and desired × first offering was used.
    pub estimated: bool,
}

/* ============================= PURE HELPERS ============================= */

pub fn offering_cost(offer: &Offer) -> OfferingCost {
    OfferingCost {
        hourly: offer.price_hourly,
        daily: offer.price_hourly * 24.0,
        monthly: offer.price_monthly,
        spec: OfferingSpec {
            cpu: offer.cpu,
            ram_mb: offer.ram,
            disk_gb: offer.ssd,
            bandwidth_gb: offer.traffic,
        },
    }
}

fn meets_floor(offer: &Offer, req: &ResourceRequirements) -> bool {
    offer.available
        && offer.cpu >= req.min_cpu
        && offer.ram >= req.min_memory_mb
        && offer.ssd >= req.min_disk_gb
        && offer.traffic >= req.min_bandwidth_gb
}

/// Cheapest offering meeting the floor, restricted to `allowed` when non-empty.
///
/// Ties break toward fewer CPUs, then less memory, to avoid over-provisioning.
pub fn cheapest_offering<'a>(
    offers: impl IntoIterator<Item = &'a Offer>,
    req: &ResourceRequirements,
    allowed: &[String],
) -> Option<Offer> {
    offers
        .into_iter()
        .filter(|o| meets_floor(o, req))
        .filter(|o| allowed.is_empty() || allowed.contains(&o.identifier))
        .min_by(|a, b| {
            a.price_monthly
                .total_cmp(&b.price_monthly)
                .then(a.cpu.cmp(&b.cpu))
                .then(a.ram.cmp(&b.ram))
        })
        .cloned()
}

/* ============================= CALCULATOR ============================= */

/// Cost calculator over a TTL-cached offering catalog.
pub struct CostCalculator {
    client: Arc<VpsieClient>,
    cache: RwLock<Cache>,
    ttl: Duration,
}

struct Cache {
    offers: HashMap<String, Offer>,
    fetched_at: Option<Instant>,
}

impl CostCalculator {
    pub fn new(client: Arc<VpsieClient>) -> Self {
        Self {
            client,
            cache: RwLock::new(Cache {
                offers: HashMap::new(),
                fetched_at: None,
            }),
            ttl: OFFERING_CACHE_TTL,
        }
    }

    /// Snapshot of the offering catalog, refreshed when the TTL has lapsed.
    ///
    /// Always returns an owned copy; callers never see the cache map itself.
    pub async fn offerings(&self, deadline: Duration) -> Result<HashMap<String, Offer>, CloudError> {
        {
            let cache = self.cache.read().await;
            if cache
                .fetched_at
                .is_some_and(|at| at.elapsed() < self.ttl)
            {
                return Ok(cache.offers.clone());
            }
        }

        let fetched = self.client.list_offers(None, deadline).await?;
        debug!(count = fetched.len(), "offering_cache_refreshed");

        let mut cache = self.cache.write().await;
        cache.offers = fetched
            .into_iter()
            .map(|o| (o.identifier.clone(), o))
            .collect();
        cache.fetched_at = Some(Instant::now());
        Ok(cache.offers.clone())
    }

    pub async fn get_offering_cost(
        &self,
        id: &str,
        deadline: Duration,
    ) -> Result<OfferingCost, CloudError> {
        let offers = self.offerings(deadline).await?;
        offers
            .get(id)
            .map(offering_cost)
            .ok_or(CloudError::NotFound)
    }

    /// Cost of a NodeGroup given its members' offering ids.
    ///
    /// With no known members the projection is desired × first offering and
    /// flagged as an estimate.
    pub async fn calculate_node_group_cost(
        &self,
        group: &NodeGroup,
        member_offerings: &[String],
        deadline: Duration,
    ) -> Result<NodeGroupCost, CloudError> {
        let offers = self.offerings(deadline).await?;

        if member_offerings.is_empty() {
            let first = group
                .spec
                .offering_ids
                .first()
                .and_then(|id| offers.get(id))
                .ok_or(CloudError::NotFound)?;
            let desired = group.desired_nodes().max(0);
            return Ok(NodeGroupCost {
                hourly: first.price_hourly * desired as f64,
                monthly: first.price_hourly * HOURS_PER_MONTH * desired as f64,
                node_count: desired,
                estimated: true,
            });
        }

        let mut hourly = 0.0;
        for id in member_offerings {
            let offer = offers.get(id).ok_or(CloudError::NotFound)?;
            hourly += offer.price_hourly;
        }
        Ok(NodeGroupCost {
            hourly,
            monthly: hourly * HOURS_PER_MONTH,
            node_count: member_offerings.len() as i32,
            estimated: false,
        })
    }

    pub async fn find_cheapest_offering(
        &self,
        req: &ResourceRequirements,
        allowed: &[String],
        deadline: Duration,
    ) -> Result<Offer, CloudError> {
        let offers = self.offerings(deadline).await?;
        cheapest_offering(offers.values(), req, allowed).ok_or(CloudError::NotFound)
    }

    /// Cost-aware instance selection for a scale-up: the cheapest offering in
    /// the group's allow-list able to host the largest pending pod.
    pub async fn select_instance_type_cost_aware(
        &self,
        group: &NodeGroup,
        pods: &[k8s_openapi::api::core::v1::Pod],
        deadline: Duration,
    ) -> Result<Offer, CloudError> {
        let req = crate::analyzer::max_pod_requirements(pods);
        self.find_cheapest_offering(&req, &group.spec.offering_ids, deadline)
            .await
    }
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(id: &str, cpu: i64, ram: i64, hourly: f64, monthly: f64) -> Offer {
        Offer {
            identifier: id.to_string(),
            name: id.to_string(),
            cpu,
            ram,
            ssd: 80,
            traffic: 4000,
            price_hourly: hourly,
            price_monthly: monthly,
            available: true,
            datacenter_id: None,
        }
    }

    #[test]
    fn test_offering_cost_daily_is_hourly_times_24() {
        let cost = offering_cost(&offer("o", 2, 4096, 0.05, 30.0));
        assert!((cost.daily - 1.2).abs() < 1e-9);
        assert!((cost.monthly - 30.0).abs() < 1e-9);
        assert_eq!(cost.spec.cpu, 2);
        assert_eq!(cost.spec.ram_mb, 4096);
    }

    #[test]
    fn test_cheapest_picks_lowest_monthly() {
        let offers = vec![
            offer("big", 8, 16384, 0.12, 80.0),
            offer("small", 2, 4096, 0.03, 20.0),
            offer("medium", 4, 8192, 0.06, 40.0),
        ];
        let req = ResourceRequirements {
            min_cpu: 2,
            min_memory_mb: 4096,
            ..Default::default()
        };
        let winner = cheapest_offering(&offers, &req, &[]).expect("should find one");
        assert_eq!(winner.identifier, "small");
    }

    #[test]
    fn test_cheapest_respects_resource_floor() {
        let offers = vec![
            offer("small", 2, 4096, 0.03, 20.0),
            offer("medium", 4, 8192, 0.06, 40.0),
        ];
        let req = ResourceRequirements {
            min_cpu: 4,
            min_memory_mb: 8192,
            ..Default::default()
        };
        let winner = cheapest_offering(&offers, &req, &[]).expect("should find one");
        assert_eq!(winner.identifier, "medium");
    }

    #[test]
    fn test_cheapest_respects_allow_list() {
        let offers = vec![
            offer("small", 2, 4096, 0.03, 20.0),
            offer("medium", 4, 8192, 0.06, 40.0),
        ];
        let req = ResourceRequirements::default();
        let winner =
            cheapest_offering(&offers, &req, &["medium".to_string()]).expect("should find one");
        assert_eq!(winner.identifier, "medium");
    }

    #[test]
    fn test_cheapest_skips_unavailable() {
        let mut gone = offer("small", 2, 4096, 0.03, 20.0);
        gone.available = false;
        let offers = vec![gone, offer("medium", 4, 8192, 0.06, 40.0)];
        let winner = cheapest_offering(&offers, &ResourceRequirements::default(), &[])
            .expect("should find one");
        assert_eq!(winner.identifier, "medium");
    }

    #[test]
    fn test_cheapest_tie_breaks_on_smaller_cpu_then_memory() {
        let offers = vec![
            offer("fat", 8, 16384, 0.06, 40.0),
            offer("lean", 4, 8192, 0.06, 40.0),
            offer("leaner-ram", 4, 4096, 0.06, 40.0),
        ];
        let winner = cheapest_offering(&offers, &ResourceRequirements::default(), &[])
            .expect("should find one");
        assert_eq!(winner.identifier, "leaner-ram");
    }

    #[test]
    fn test_cheapest_none_when_nothing_fits() {
        let offers = vec![offer("small", 2, 4096, 0.03, 20.0)];
        let req = ResourceRequirements {
            min_cpu: 64,
            ..Default::default()
        };
        assert!(cheapest_offering(&offers, &req, &[]).is_none());
    }
}
