//! Resource descriptions and workload handles shared by every phase.
//!
//! 每个阶段共享的资源描述和工作负载句柄。

use crate::error::{Error, Result};
use std::{fmt, net::Ipv4Addr, str::FromStr};

/// The tenant that owns networks created without an explicit tenant.
/// 未显式指定租户时拥有网络的默认租户。
pub const DEFAULT_TENANT: &str = "default";

/// The data-plane technology used to isolate a virtual network.
///
/// 用于隔离虚拟网络的数据平面技术。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EncapMode {
    Vlan,
    Vxlan,
}

impl fmt::Display for EncapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncapMode::Vlan => f.write_str("vlan"),
            EncapMode::Vxlan => f.write_str("vxlan"),
        }
    }
}

impl FromStr for EncapMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "vlan" => Ok(EncapMode::Vlan),
            "vxlan" => Ok(EncapMode::Vxlan),
            other => Err(Error::InvalidConfig(format!(
                "unknown encapsulation mode {other:?}"
            ))),
        }
    }
}

/// Cluster-wide policy for inter-network traffic.
///
/// `Routing` permits inter-network reachability through Layer-3 routes, so
/// cross-network isolation is never asserted under it.
///
/// 集群范围的网络间流量策略。
///
/// `Routing` 允许通过三层路由实现网络间可达，因此在该模式下不断言跨网络隔离。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ForwardingMode {
    #[default]
    Bridge,
    Routing,
}

impl ForwardingMode {
    pub fn is_routing(self) -> bool {
        matches!(self, ForwardingMode::Routing)
    }
}

impl fmt::Display for ForwardingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForwardingMode::Bridge => f.write_str("bridge"),
            ForwardingMode::Routing => f.write_str("routing"),
        }
    }
}

impl FromStr for ForwardingMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "bridge" => Ok(ForwardingMode::Bridge),
            "routing" => Ok(ForwardingMode::Routing),
            other => Err(Error::InvalidConfig(format!(
                "unknown forwarding mode {other:?}"
            ))),
        }
    }
}

/// An IPv4 prefix such as `10.1.0.0/24`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Subnet {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        Self {
            network,
            prefix_len,
        }
    }

    /// Returns the `index`-th host address of the prefix, counting from `.1`.
    /// Returns `None` once the index would reach the broadcast address.
    ///
    /// 返回该前缀中从 `.1` 开始计数的第 `index` 个主机地址。
    pub fn host(&self, index: u32) -> Option<Ipv4Addr> {
        let host_bits = 32u32.checked_sub(u32::from(self.prefix_len))?;
        let capacity = if host_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << host_bits).saturating_sub(2)
        };
        if index >= capacity {
            return None;
        }
        u32::from(self.network)
            .checked_add(index)?
            .checked_add(1)
            .map(Ipv4Addr::from)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

/// Identifies a network inside the control plane: `(tenant, name)`.
///
/// 在控制平面中标识一个网络：`(租户, 名称)`。
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NetworkKey {
    pub tenant: String,
    pub network: String,
}

impl NetworkKey {
    pub fn new(tenant: impl Into<String>, network: impl Into<String>) -> Self {
        Self {
            tenant: tenant.into(),
            network: network.into(),
        }
    }
}

impl fmt::Display for NetworkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.network)
    }
}

/// One isolation domain to be created in the control plane.
///
/// 需要在控制平面中创建的一个隔离域。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    /// Owning tenant, [`DEFAULT_TENANT`] when untenanted.
    /// 所属租户，未分租户时为 [`DEFAULT_TENANT`]。
    pub tenant: String,
    /// Unique within the tenant for one iteration.
    /// 在一次迭代中于租户内唯一。
    pub name: String,
    pub subnet: Subnet,
    pub gateway: Ipv4Addr,
    /// Encapsulation tag (VLAN id or VXLAN VNI seed). Unique across live networks.
    /// 封装标签（VLAN id 或 VXLAN VNI 种子）。在所有存活网络中唯一。
    pub pkt_tag: u16,
    pub encap: EncapMode,
}

impl NetworkSpec {
    pub fn key(&self) -> NetworkKey {
        NetworkKey::new(self.tenant.clone(), self.name.clone())
    }

    /// The target a workload is attached to when started on this network.
    pub fn attach_target(&self) -> AttachTarget {
        if self.tenant == DEFAULT_TENANT {
            AttachTarget::new(self.name.clone(), None)
        } else {
            AttachTarget::new(self.name.clone(), Some(self.tenant.clone()))
        }
    }
}

/// An administrative grouping owning one or more networks.
///
/// 拥有一个或多个网络的管理分组。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantSpec {
    pub name: String,
    pub networks: Vec<NetworkSpec>,
}

/// Where a workload is attached: a network, optionally qualified by tenant.
///
/// Renders as `network` or `network/tenant`, the form the fleet manager expects.
///
/// 工作负载的挂载位置：一个网络，可选地由租户限定。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttachTarget {
    pub network: String,
    pub tenant: Option<String>,
}

impl AttachTarget {
    pub fn new(network: impl Into<String>, tenant: Option<String>) -> Self {
        Self {
            network: network.into(),
            tenant,
        }
    }

    pub fn key(&self) -> NetworkKey {
        NetworkKey::new(
            self.tenant.as_deref().unwrap_or(DEFAULT_TENANT),
            self.network.clone(),
        )
    }
}

impl fmt::Display for AttachTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant {
            Some(tenant) => write!(f, "{}/{}", self.network, tenant),
            None => f.write_str(&self.network),
        }
    }
}

/// A running probe target returned by the fleet provisioner.
///
/// The orchestrator only uses it to address probes and to attribute failures.
///
/// 由集群供应器返回的一个正在运行的探测目标。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkloadHandle {
    pub id: String,
    pub name: String,
    pub node: String,
    pub address: Ipv4Addr,
    pub target: AttachTarget,
}

impl fmt::Display for WorkloadHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}@{})", self.name, self.address, self.node)
    }
}

/// All workloads attached to one network.
///
/// 挂载到同一个网络上的所有工作负载。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadGroup {
    pub key: NetworkKey,
    pub members: Vec<WorkloadHandle>,
}

impl WorkloadGroup {
    pub fn new(key: NetworkKey, members: Vec<WorkloadHandle>) -> Self {
        Self { key, members }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subnet_host_allocation() {
        let subnet = Subnet::new(Ipv4Addr::new(10, 1, 0, 0), 24);
        assert_eq!(subnet.to_string(), "10.1.0.0/24");
        assert_eq!(subnet.host(0), Some(Ipv4Addr::new(10, 1, 0, 1)));
        assert_eq!(subnet.host(253), Some(Ipv4Addr::new(10, 1, 0, 254)));
        // .255 is broadcast
        assert_eq!(subnet.host(254), None);

        // An unaligned short prefix runs out of address space instead of wrapping.
        let unaligned = Subnet::new(Ipv4Addr::new(255, 255, 255, 0), 0);
        assert_eq!(unaligned.host(254), Some(Ipv4Addr::new(255, 255, 255, 255)));
        assert_eq!(unaligned.host(255), None);
        assert_eq!(unaligned.host(u32::MAX - 2), None);
    }

    #[test]
    fn test_attach_target_rendering() {
        let default_net = NetworkSpec {
            tenant: DEFAULT_TENANT.to_string(),
            name: "net0-0".to_string(),
            subnet: Subnet::new(Ipv4Addr::new(10, 1, 0, 0), 24),
            gateway: Ipv4Addr::new(10, 1, 0, 254),
            pkt_tag: 1001,
            encap: EncapMode::Vxlan,
        };
        assert_eq!(default_net.attach_target().to_string(), "net0-0");

        let tenant_net = NetworkSpec {
            tenant: "tenant1".to_string(),
            ..default_net
        };
        let target = tenant_net.attach_target();
        assert_eq!(target.to_string(), "net0-0/tenant1");
        assert_eq!(target.key(), NetworkKey::new("tenant1", "net0-0"));
    }

    #[test]
    fn test_mode_parsing() {
        assert_eq!("VXLAN".parse::<EncapMode>().unwrap(), EncapMode::Vxlan);
        assert_eq!("vlan".parse::<EncapMode>().unwrap(), EncapMode::Vlan);
        assert!("gre".parse::<EncapMode>().is_err());
        assert!("routing".parse::<ForwardingMode>().unwrap().is_routing());
        assert!(!ForwardingMode::default().is_routing());
    }
}
