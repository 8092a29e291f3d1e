//! Operator configuration from command line flags and environment

use std::net::SocketAddr;
use std::time::Duration;

use kube::api::GroupVersionKind;

/// Cluster-scoped kinds listed for a tenant even when no template renders them
pub const DEFAULT_CLUSTER_RESOURCE_KINDS: &str = "quota.openshift.io/v1/ClusterResourceQuota,rbac.authorization.k8s.io/v1/ClusterRoleBinding,rbac.authorization.k8s.io/v1/ClusterRole";

/// Delay between passes while a tenant is still converging
const STEP_REQUEUE: Duration = Duration::from_secs(1);

#[derive(clap::Parser, Clone, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct OperatorConfig {
    /// Only watch TenantEnvironments in this namespace
    #[arg(long, env = "WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Namespace the operator runs in
    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    pub operator_namespace: String,

    /// Namespace of the host cluster holding TierTemplates
    #[arg(long, env = "HOST_OPERATOR_NAMESPACE", default_value = "tenant-host")]
    pub host_namespace: String,

    /// Kubeconfig context of the host cluster. The member client is used when unset.
    #[arg(long, env = "HOST_KUBE_CONTEXT")]
    pub host_kube_context: Option<String>,

    /// Comma separated list of group/version/Kind
    #[arg(long, default_value = DEFAULT_CLUSTER_RESOURCE_KINDS, value_delimiter = ',', value_parser = parse_gvk)]
    pub cluster_resource_kinds: Vec<GroupVersionKind>,

    #[arg(long, default_value_t = 60)]
    pub deletion_timeout_secs: u64,

    #[arg(long, default_value_t = 10)]
    pub error_requeue_secs: u64,

    #[arg(long, default_value_t = 300)]
    pub resync_secs: u64,

    #[arg(long, default_value = "0.0.0.0:8080")]
    pub health_addr: SocketAddr,
}

impl OperatorConfig {
    /// The part of the configuration the reconciler reads
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            host_namespace: self.host_namespace.clone(),
            operator_namespace: self.operator_namespace.clone(),
            cluster_resource_kinds: self.cluster_resource_kinds.clone(),
            deletion_timeout: Duration::from_secs(self.deletion_timeout_secs),
            error_requeue: Duration::from_secs(self.error_requeue_secs),
            resync: Duration::from_secs(self.resync_secs),
            step_requeue: STEP_REQUEUE,
        }
    }
}

/// Settings used while reconciling
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub host_namespace: String,
    pub operator_namespace: String,
    pub cluster_resource_kinds: Vec<GroupVersionKind>,
    /// Namespace deletion taking longer than this is reported as stalled
    pub deletion_timeout: Duration,
    pub error_requeue: Duration,
    pub resync: Duration,
    pub step_requeue: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            host_namespace: "tenant-host".to_string(),
            operator_namespace: "default".to_string(),
            cluster_resource_kinds: default_cluster_resource_kinds(),
            deletion_timeout: Duration::from_secs(60),
            error_requeue: Duration::from_secs(10),
            resync: Duration::from_secs(300),
            step_requeue: STEP_REQUEUE,
        }
    }
}

pub fn default_cluster_resource_kinds() -> Vec<GroupVersionKind> {
    DEFAULT_CLUSTER_RESOURCE_KINDS
        .split(',')
        .filter_map(|s| parse_gvk(s).ok())
        .collect()
}

/// Parse `group/version/Kind`, or `version/Kind` for the core group
pub fn parse_gvk(s: &str) -> Result<GroupVersionKind, String> {
    let parts: Vec<&str> = s.trim().split('/').collect();
    match parts.as_slice() {
        [version, kind] if !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind::gvk("", version, kind))
        }
        [group, version, kind] if !group.is_empty() && !version.is_empty() && !kind.is_empty() => {
            Ok(GroupVersionKind::gvk(group, version, kind))
        }
        _ => Err(format!("'{s}' is not of the form group/version/Kind")),
    }
}
