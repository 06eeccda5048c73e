use std::sync::LazyLock;

use prometheus::{
    GaugeVec, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Registry,
};

/* ============================= REGISTRY ============================= */

pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/* ============================= NODEGROUP ============================= */

pub static NODEGROUP_CURRENT: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new("nodegroup_current_nodes", "Current member nodes per NodeGroup"),
        &["nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static NODEGROUP_DESIRED: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new("nodegroup_desired_nodes", "Desired member nodes per NodeGroup"),
        &["nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static NODEGROUP_READY: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new("nodegroup_ready_nodes", "Ready member nodes per NodeGroup"),
        &["nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static NODEGROUP_RECONCILE_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "nodegroup_reconcile_total",
        "Total NodeGroup reconciliation cycles",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static NODEGROUP_RECONCILE_ERRORS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "nodegroup_reconcile_errors_total",
        "Total NodeGroup reconciliation errors",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static NODEGROUP_RECONCILE_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(prometheus::HistogramOpts::new(
        "nodegroup_reconcile_duration_seconds",
        "Duration of each NodeGroup reconciliation cycle in seconds",
    ))
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static NODEGROUP_MONTHLY_COST: LazyLock<GaugeVec> = LazyLock::new(|| {
    let g = GaugeVec::new(
        prometheus::Opts::new(
            "nodegroup_monthly_cost_dollars",
            "Projected monthly cost per NodeGroup",
        ),
        &["nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/* ============================= VPSIENODE ============================= */

pub static NODE_PROVISION_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    let h = Histogram::with_opts(
        prometheus::HistogramOpts::new(
            "vpsienode_provision_duration_seconds",
            "Seconds from VM creation request to cloud-side running",
        )
        .buckets(vec![30.0, 60.0, 120.0, 300.0, 600.0]),
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

pub static NODE_PHASE: LazyLock<IntGaugeVec> = LazyLock::new(|| {
    let g = IntGaugeVec::new(
        prometheus::Opts::new("vpsienode_phase", "VPSieNode count per lifecycle phase"),
        &["phase"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/* ============================= SCALING ============================= */

pub static SCALE_UP_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("scale_up_total", "Scale-up decisions executed per NodeGroup"),
        &["nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static SCALE_DOWN_TOTAL: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "scale_down_total",
            "Scale-down executions completed per NodeGroup",
        ),
        &["nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static SCALE_DOWN_BLOCKED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "scale_down_blocked_total",
            "Scale-down candidates rejected, by safety-check reason",
        ),
        &["reason", "nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static SCALE_UP_SKIPPED: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new(
            "scale_up_skipped_total",
            "Scale-up decisions not executed, by reason",
        ),
        &["reason", "nodegroup"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static PENDING_POD_EVENTS: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "pending_pod_events_total",
        "Unschedulable pod events observed by the watcher",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static DRAIN_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    let h = HistogramVec::new(
        prometheus::HistogramOpts::new(
            "drain_duration_seconds",
            "Seconds spent draining a node, by outcome",
        )
        .buckets(vec![5.0, 15.0, 60.0, 180.0, 600.0]),
        &["outcome"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(h.clone()))
        .expect("metric not yet registered");
    h
});

/* ============================= CLOUD API ============================= */

pub static CLOUD_API_REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("cloud_api_requests_total", "Cloud API requests by endpoint"),
        &["endpoint"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static CLOUD_API_ERRORS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    let c = IntCounterVec::new(
        prometheus::Opts::new("cloud_api_errors_total", "Cloud API errors by kind"),
        &["kind"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

pub static CLOUD_CIRCUIT_STATE: LazyLock<IntGauge> = LazyLock::new(|| {
    let g = IntGauge::new(
        "cloud_circuit_state",
        "Circuit breaker state (0=closed, 1=open, 2=half-open)",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static CLOUD_RATE_LIMITED: LazyLock<IntCounter> = LazyLock::new(|| {
    let c = IntCounter::new(
        "cloud_rate_limited_total",
        "Calls that failed waiting for a rate-limiter token",
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(c.clone()))
        .expect("metric not yet registered");
    c
});

/* ============================= UTILIZATION ============================= */

pub static NODE_CPU_UTILIZATION: LazyLock<GaugeVec> = LazyLock::new(|| {
    let g = GaugeVec::new(
        prometheus::Opts::new("node_cpu_utilization_percent", "Mean CPU utilization per node"),
        &["node"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

pub static NODE_MEMORY_UTILIZATION: LazyLock<GaugeVec> = LazyLock::new(|| {
    let g = GaugeVec::new(
        prometheus::Opts::new(
            "node_memory_utilization_percent",
            "Mean memory utilization per node",
        ),
        &["node"],
    )
    .expect("metric definition is valid");
    REGISTRY
        .register(Box::new(g.clone()))
        .expect("metric not yet registered");
    g
});

/* ============================= INIT ============================= */

/// Force-init every metric so it appears on /metrics before first use.
pub fn force_init() {
    LazyLock::force(&NODEGROUP_CURRENT);
    LazyLock::force(&NODEGROUP_DESIRED);
    LazyLock::force(&NODEGROUP_READY);
    LazyLock::force(&NODEGROUP_RECONCILE_TOTAL);
    LazyLock::force(&NODEGROUP_RECONCILE_ERRORS);
    LazyLock::force(&NODEGROUP_RECONCILE_DURATION);
    LazyLock::force(&NODEGROUP_MONTHLY_COST);
    LazyLock::force(&NODE_PROVISION_DURATION);
    LazyLock::force(&NODE_PHASE);
    LazyLock::force(&SCALE_UP_TOTAL);
    LazyLock::force(&SCALE_UP_SKIPPED);
    LazyLock::force(&SCALE_DOWN_TOTAL);
    LazyLock::force(&SCALE_DOWN_BLOCKED);
    LazyLock::force(&PENDING_POD_EVENTS);
    LazyLock::force(&DRAIN_DURATION);
    LazyLock::force(&CLOUD_API_REQUESTS);
    LazyLock::force(&CLOUD_API_ERRORS);
    LazyLock::force(&CLOUD_CIRCUIT_STATE);
    LazyLock::force(&CLOUD_RATE_LIMITED);
    LazyLock::force(&NODE_CPU_UTILIZATION);
    LazyLock::force(&NODE_MEMORY_UTILIZATION);
}

/* ============================= TESTS ============================= */

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_once() {
        force_init();
        let families = REGISTRY.gather();
        let names: Vec<&str> = families.iter().map(|f| f.get_name()).collect();
        assert!(names.contains(&"nodegroup_current_nodes"));
        assert!(names.contains(&"scale_down_blocked_total"));
        assert!(names.contains(&"cloud_api_requests_total"));
        assert!(names.contains(&"cloud_circuit_state"));
        assert!(names.contains(&"drain_duration_seconds"));
    }

    #[test]
    fn test_blocked_counter_labels() {
        SCALE_DOWN_BLOCKED.with_label_values(&["pdb", "group-a"]).inc();
        SCALE_DOWN_BLOCKED.with_label_values(&["pdb", "group-a"]).inc();
        let value = SCALE_DOWN_BLOCKED
            .with_label_values(&["pdb", "group-a"])
            .get();
        assert!(value >= 2);
    }
}
