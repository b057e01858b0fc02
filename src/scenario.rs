//! The named entry points a harness selects from.
//!
//! 测试框架可从中选择的命名入口点。

use crate::{
    error::{Error, Result},
    model::{EncapMode, ForwardingMode},
};
use std::{fmt, str::FromStr};

/// The shape of one iteration.
///
/// 单次迭代的形态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flow {
    /// Networks in the default tenant: mesh probes per network, then
    /// isolation probes across every ordered pair of networks.
    /// 默认租户中的网络：每个网络的网格探测，然后对每个有序网络对进行隔离探测。
    NetworkAddDelete,
    /// Tenants processed one at a time: provision, mesh probes, teardown.
    /// 逐个处理租户：供应、网格探测、清理。
    TenantAddDelete,
    /// Tenants with overlapping subnets and per-tenant listener ports.
    /// 子网重叠、每租户独立监听端口的租户。
    MultiTenant,
}

impl Flow {
    fn slug(self) -> &'static str {
        match self {
            Flow::NetworkAddDelete => "network-add-delete",
            Flow::TenantAddDelete => "tenant-add-delete",
            Flow::MultiTenant => "multi-tenant",
        }
    }
}

/// A flow run with a given encapsulation.
///
/// 以给定封装方式运行的流程。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Scenario {
    pub flow: Flow,
    pub encap: EncapMode,
}

impl Scenario {
    pub const NETWORK_VXLAN: Scenario = Scenario::new(Flow::NetworkAddDelete, EncapMode::Vxlan);
    pub const NETWORK_VLAN: Scenario = Scenario::new(Flow::NetworkAddDelete, EncapMode::Vlan);
    pub const TENANT_VXLAN: Scenario = Scenario::new(Flow::TenantAddDelete, EncapMode::Vxlan);
    pub const TENANT_VLAN: Scenario = Scenario::new(Flow::TenantAddDelete, EncapMode::Vlan);
    pub const MULTI_TENANT_VXLAN: Scenario = Scenario::new(Flow::MultiTenant, EncapMode::Vxlan);
    pub const MULTI_TENANT_VLAN: Scenario = Scenario::new(Flow::MultiTenant, EncapMode::Vlan);

    pub const ALL: [Scenario; 6] = [
        Self::NETWORK_VXLAN,
        Self::NETWORK_VLAN,
        Self::TENANT_VXLAN,
        Self::TENANT_VLAN,
        Self::MULTI_TENANT_VXLAN,
        Self::MULTI_TENANT_VLAN,
    ];

    pub const fn new(flow: Flow, encap: EncapMode) -> Self {
        Self { flow, encap }
    }

    /// Whether route distribution must be prepared before the first iteration.
    ///
    /// Network scenarios need it whenever forwarding is routed; tenant
    /// scenarios only with VLAN encapsulation.
    ///
    /// 是否必须在第一次迭代之前准备路由分发。
    pub fn needs_routing(&self, forwarding: ForwardingMode) -> bool {
        if !forwarding.is_routing() {
            return false;
        }
        match self.flow {
            Flow::NetworkAddDelete => true,
            Flow::TenantAddDelete | Flow::MultiTenant => self.encap == EncapMode::Vlan,
        }
    }

    /// Whether cross-network (or cross-tenant) isolation is asserted.
    ///
    /// 是否断言跨网络（或跨租户）隔离。
    pub fn checks_isolation(&self, forwarding: ForwardingMode) -> bool {
        if forwarding.is_routing() {
            return false;
        }
        match self.flow {
            Flow::NetworkAddDelete => true,
            Flow::TenantAddDelete => false,
            Flow::MultiTenant => self.encap != EncapMode::Vlan,
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.flow.slug(), self.encap)
    }
}

impl FromStr for Scenario {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|scenario| scenario.to_string().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidConfig(format!("unknown scenario {s:?}")))
    }
}
