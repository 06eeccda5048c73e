use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "vpsie-autoscaler")]
#[command(about = "VPSie cluster autoscaler for Kubernetes")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display application version
    Version,

    /// Check cluster connectivity, CRDs, and cloud credentials
    Check {
        /// Namespace holding the credentials secret
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = "vpsie-secret")]
        secret: String,
    },

    /// Manage the autoscaler CRDs
    Crd {
        #[command(subcommand)]
        action: CrdAction,
    },

    /// Run the autoscaling control plane (reconcilers, watcher, metrics)
    Operator {
        /// Namespace holding the credentials secret
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = "vpsie-secret")]
        secret: String,
        #[arg(long, default_value_t = 9090)]
        metrics_port: u16,
    },

    /// One-shot utilization and cost report over managed NodeGroups
    Analyze {
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = "vpsie-secret")]
        secret: String,
    },

    /// Run cluster auto-discovery and print the derived identity
    Discover {
        #[arg(long, default_value = "default")]
        namespace: String,
        #[arg(long, default_value = "vpsie-secret")]
        secret: String,
    },
}

#[derive(Subcommand)]
pub enum CrdAction {
    /// Print the CRD YAML to stdout
    Generate,

    /// Install the CRDs into the connected cluster
    Install,
}
