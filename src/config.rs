//! 定义了测试套件的可配置参数。
//! Defines configurable parameters for the system test suite.

use crate::{
    error::{Error, Result},
    model::ForwardingMode,
    traits::ProvisionOptions,
};
use std::time::Duration;

/// The largest number of networks one tenant may own in a single iteration.
/// Each address bank holds 128 `/24` prefixes.
///
/// 单次迭代中一个租户可拥有的最大网络数。每个地址库包含 128 个 `/24` 前缀。
pub const MAX_NETWORKS_PER_NODE: usize = 128;

/// Usable host addresses in one `/24`.
pub const MAX_WORKLOADS_PER_NETWORK: usize = 254;

/// A structure containing every parameter the orchestrator reads.
///
/// It replaces ambient suite state: the orchestrator receives it once at
/// construction and never consults anything else.
///
/// 包含编排器读取的所有参数的结构体。
///
/// 它取代了隐式的套件状态：编排器在构造时接收一次，此后不再查询其他任何来源。
#[derive(Debug, Clone)]
pub struct SuiteConfig {
    /// Cluster-wide forwarding policy.
    /// 集群范围的转发策略。
    pub forwarding: ForwardingMode,
    /// How many create/verify/teardown cycles each scenario runs.
    /// 每个场景运行的创建/验证/清理循环次数。
    pub iterations: usize,
    /// The requested workload count. Raised to 4 where a scenario needs a mesh.
    /// 请求的工作负载数量。在需要网格的场景中会被提升到 4。
    pub workloads: usize,
    /// The cluster nodes workloads are spread over.
    /// 工作负载分布的集群节点。
    pub nodes: Vec<String>,
    /// Whether workloads are started with DNS attached.
    pub use_dns: bool,
    /// Passed through to every provisioning call.
    pub provision_options: ProvisionOptions,
    /// Tenant `t` listens on `listener_base_port + t` in the multi-tenant matrix.
    /// 在多租户矩阵中，租户 `t` 监听 `listener_base_port + t`。
    pub listener_base_port: u16,
    /// Timing-related parameters.
    /// 时间相关参数。
    pub timing: TimingConfig,
}

/// Timing-related parameters.
///
/// 时间相关参数。
#[derive(Debug, Clone)]
pub struct TimingConfig {
    /// Pause between the provisioning barrier and the first probe, so freshly
    /// started workloads have their interfaces up.
    ///
    /// 供应屏障与首次探测之间的暂停，使新启动的工作负载的接口就绪。
    pub settle_delay: Duration,
    /// Deadline applied to every collaborator call. `None` waits forever.
    ///
    /// 应用于每次协作方调用的截止时间。`None` 表示无限等待。
    pub operation_timeout: Option<Duration>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            forwarding: ForwardingMode::Bridge,
            iterations: 1,
            workloads: 4,
            nodes: vec!["node1".to_string(), "node2".to_string()],
            use_dns: false,
            provision_options: ProvisionOptions::default(),
            listener_base_port: 8000,
            timing: TimingConfig::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(5),
            operation_timeout: None,
        }
    }
}

impl SuiteConfig {
    /// The workload count used for network meshes: never fewer than four.
    ///
    /// 用于网络网格的工作负载数量：不少于四个。
    pub fn mesh_workloads(&self) -> usize {
        self.workloads.max(4)
    }

    /// `max(4, workloads) / node_count`.
    pub fn networks_per_node(&self) -> usize {
        self.mesh_workloads() / self.nodes.len().max(1)
    }

    /// The tenant count for tenant scenarios, derived from the raw workload count.
    ///
    /// 租户场景的租户数量，由原始工作负载数量推导。
    pub fn tenant_count(&self) -> usize {
        self.workloads / 2
    }

    /// Rejects configurations that cannot produce a valid topology.
    ///
    /// 拒绝无法产生有效拓扑的配置。
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            return Err(Error::InvalidConfig("node list is empty".into()));
        }
        if self.iterations == 0 {
            return Err(Error::InvalidConfig("iterations must be at least 1".into()));
        }
        if self.workloads == 0 {
            return Err(Error::InvalidConfig("workloads must be at least 1".into()));
        }
        if self.mesh_workloads() > MAX_WORKLOADS_PER_NETWORK {
            return Err(Error::InvalidConfig(format!(
                "{} workloads per network do not fit a /24, at most {} do",
                self.mesh_workloads(),
                MAX_WORKLOADS_PER_NETWORK
            )));
        }
        let per_node = self.networks_per_node();
        if per_node == 0 || per_node > MAX_NETWORKS_PER_NODE {
            return Err(Error::InvalidConfig(format!(
                "{} workloads over {} nodes gives {} networks per node, expected 1..={}",
                self.mesh_workloads(),
                self.nodes.len(),
                per_node,
                MAX_NETWORKS_PER_NODE
            )));
        }
        if let Some(timeout) = self.timing.operation_timeout {
            if timeout.is_zero() {
                return Err(Error::InvalidConfig("operation timeout must be non-zero".into()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SuiteConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.networks_per_node(), 2);
        assert_eq!(config.tenant_count(), 2);
    }

    #[test]
    fn test_small_workload_count_is_raised_for_meshes() {
        let config = SuiteConfig {
            workloads: 1,
            nodes: vec!["n1".into()],
            ..Default::default()
        };
        assert_eq!(config.mesh_workloads(), 4);
        assert_eq!(config.networks_per_node(), 4);
        // Tenants follow the raw count.
        assert_eq!(config.tenant_count(), 0);
    }

    #[test]
    fn test_validate_rejects_bad_configs() {
        let no_nodes = SuiteConfig {
            nodes: vec![],
            ..Default::default()
        };
        assert!(matches!(no_nodes.validate(), Err(Error::InvalidConfig(_))));

        let too_many_nodes = SuiteConfig {
            workloads: 4,
            nodes: (0..5).map(|i| format!("n{i}")).collect(),
            ..Default::default()
        };
        assert!(matches!(
            too_many_nodes.validate(),
            Err(Error::InvalidConfig(_))
        ));

        let zero_iterations = SuiteConfig {
            iterations: 0,
            ..Default::default()
        };
        assert!(zero_iterations.validate().is_err());

        let zero_timeout = SuiteConfig {
            timing: TimingConfig {
                operation_timeout: Some(Duration::ZERO),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(zero_timeout.validate().is_err());

        let overfull_subnet = SuiteConfig {
            workloads: 255,
            nodes: (0..255).map(|i| format!("n{i}")).collect(),
            ..Default::default()
        };
        assert!(matches!(
            overfull_subnet.validate(),
            Err(Error::InvalidConfig(_))
        ));
        let full_subnet = SuiteConfig {
            workloads: 254,
            nodes: (0..127).map(|i| format!("n{i}")).collect(),
            ..Default::default()
        };
        assert!(full_subnet.validate().is_ok());
    }
}
