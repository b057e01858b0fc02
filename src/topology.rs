//! Computes and creates the networks and tenants of one iteration.
//!
//! Addressing is a pure function of `(tenant index, network index, iteration)`.
//! Consecutive iterations alternate between two banks of subnets and tags, so
//! a new iteration never collides with resources the previous one may still
//! be tearing down.
//!
//! 计算并创建一次迭代的网络和租户。
//!
//! 地址分配是 `(租户索引, 网络索引, 迭代)` 的纯函数。相邻迭代在两组子网和标签之间
//! 交替，因此新的迭代不会与上一次迭代可能仍在清理的资源发生冲突。

use crate::{
    config::SuiteConfig,
    error::{Error, Result},
    model::{DEFAULT_TENANT, EncapMode, NetworkKey, NetworkSpec, Subnet, TenantSpec},
    orchestrator::barrier::with_deadline,
    traits::ControlPlane,
};
use std::{collections::HashSet, net::Ipv4Addr, sync::Arc, time::Duration};
use tracing::{debug, info, warn};

/// Third-octet offset between the two address banks.
pub const ADDRESS_BANK_STRIDE: usize = 128;
/// Tag offset between the two tag banks.
pub const TAG_BANK_STRIDE: u16 = 1500;
/// First tag used by untenanted networks.
pub const DEFAULT_TAG_BASE: u16 = 1001;
/// First tag used by tenant networks.
pub const TENANT_TAG_BASE: u16 = 1000;
/// Largest valid VLAN id.
pub const MAX_PKT_TAG: u16 = 4094;

/// How the networks of an iteration are grouped.
///
/// 一次迭代中网络的分组方式。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    /// All networks live in the default tenant.
    /// 所有网络都属于默认租户。
    Untenanted,
    /// Each tenant owns its own slice of the `10.0.0.0/8` space.
    /// 每个租户拥有 `10.0.0.0/8` 空间中属于自己的一段。
    Tenants,
    /// Every tenant reuses the same subnets; only the tenant boundary isolates them.
    /// 每个租户复用相同的子网；仅由租户边界进行隔离。
    OverlappingTenants,
}

/// The resources one iteration creates, in creation order.
///
/// 一次迭代所创建的资源，按创建顺序排列。
#[derive(Debug, Clone)]
pub struct TopologyPlan {
    pub iteration: usize,
    pub layout: Layout,
    /// Empty for [`Layout::Untenanted`].
    pub tenants: Vec<TenantSpec>,
    /// Every network of the iteration, across all tenants.
    pub networks: Vec<NetworkSpec>,
}

fn bank(iteration: usize) -> usize {
    iteration % 2
}

fn network_name(index: usize, iteration: usize) -> String {
    format!("net{index}-{iteration}")
}

fn third_octet(network_index: usize, iteration: usize) -> Result<u8> {
    u8::try_from(network_index + ADDRESS_BANK_STRIDE * bank(iteration)).map_err(|_| {
        Error::Topology(format!(
            "network index {network_index} does not fit in an address bank"
        ))
    })
}

fn pkt_tag(base: u16, ordinal: usize, iteration: usize) -> Result<u16> {
    // Past the stride, one bank runs into the next and consecutive iterations share tags.
    if ordinal >= TAG_BANK_STRIDE as usize {
        return Err(Error::Topology(format!(
            "network ordinal {ordinal} exceeds the {TAG_BANK_STRIDE} tags of one bank"
        )));
    }
    let bank_offset = TAG_BANK_STRIDE as usize * bank(iteration);
    let tag = base as usize + ordinal + bank_offset;
    u16::try_from(tag)
        .ok()
        .filter(|tag| *tag <= MAX_PKT_TAG)
        .ok_or_else(|| Error::Topology(format!("packet tag {tag} exceeds {MAX_PKT_TAG}")))
}

fn network_spec(
    tenant: &str,
    name: String,
    octets: (u8, u8),
    pkt_tag: u16,
    encap: EncapMode,
) -> NetworkSpec {
    let (second, third) = octets;
    NetworkSpec {
        tenant: tenant.to_string(),
        name,
        subnet: Subnet::new(Ipv4Addr::new(10, second, third, 0), 24),
        gateway: Ipv4Addr::new(10, second, third, 254),
        pkt_tag,
        encap,
    }
}

impl TopologyPlan {
    /// Plans `networks_per_node` networks in the default tenant.
    ///
    /// 在默认租户中规划 `networks_per_node` 个网络。
    pub fn untenanted(config: &SuiteConfig, encap: EncapMode, iteration: usize) -> Result<Self> {
        let mut networks = Vec::new();
        for index in 0..config.networks_per_node() {
            networks.push(network_spec(
                DEFAULT_TENANT,
                network_name(index, iteration),
                (1, third_octet(index, iteration)?),
                pkt_tag(DEFAULT_TAG_BASE, index, iteration)?,
                encap,
            ));
        }

        let plan = Self {
            iteration,
            layout: Layout::Untenanted,
            tenants: Vec::new(),
            networks,
        };
        plan.validate()?;
        Ok(plan)
    }

    /// Plans `workloads / 2` tenants, each owning `networks_per_node` networks.
    ///
    /// 规划 `workloads / 2` 个租户，每个租户拥有 `networks_per_node` 个网络。
    pub fn tenanted(
        config: &SuiteConfig,
        encap: EncapMode,
        iteration: usize,
        layout: Layout,
    ) -> Result<Self> {
        if layout == Layout::Untenanted {
            return Self::untenanted(config, encap, iteration);
        }

        let tenant_count = config.tenant_count();
        if tenant_count == 0 {
            return Err(Error::Topology(format!(
                "{} workloads yield no tenants; at least 2 are needed",
                config.workloads
            )));
        }

        let mut tenants = Vec::with_capacity(tenant_count);
        let mut networks = Vec::new();
        let mut ordinal = 0;
        for tenant_index in 0..tenant_count {
            let tenant = format!("tenant{tenant_index}");
            let second = match layout {
                Layout::OverlappingTenants => 1,
                _ => u8::try_from(tenant_index).map_err(|_| {
                    Error::Topology(format!("tenant index {tenant_index} exceeds 255"))
                })?,
            };

            let mut owned = Vec::new();
            for index in 0..config.networks_per_node() {
                owned.push(network_spec(
                    &tenant,
                    network_name(index, iteration),
                    (second, third_octet(index, iteration)?),
                    pkt_tag(TENANT_TAG_BASE, ordinal, iteration)?,
                    encap,
                ));
                ordinal += 1;
            }
            networks.extend(owned.iter().cloned());
            tenants.push(TenantSpec {
                name: tenant,
                networks: owned,
            });
        }

        let plan = Self {
            iteration,
            layout,
            tenants,
            networks,
        };
        plan.validate()?;
        Ok(plan)
    }

    pub fn uses_tenants(&self) -> bool {
        !self.tenants.is_empty()
    }

    /// Checks uniqueness of `(tenant, name)`, of tags, and of subnets within a tenant,
    /// and that every network belongs to exactly one planned tenant.
    ///
    /// 检查 `(租户, 名称)`、标签以及租户内子网的唯一性，并检查每个网络恰好属于一个已规划的租户。
    pub fn validate(&self) -> Result<()> {
        if self.networks.is_empty() {
            return Err(Error::Topology("plan contains no networks".into()));
        }

        let mut keys = HashSet::new();
        let mut tags = HashSet::new();
        let mut subnets = HashSet::new();
        for network in &self.networks {
            if !keys.insert(network.key()) {
                return Err(Error::Topology(format!("duplicate network {}", network.key())));
            }
            if network.pkt_tag == 0 || network.pkt_tag > MAX_PKT_TAG {
                return Err(Error::Topology(format!(
                    "packet tag {} of {} out of range",
                    network.pkt_tag,
                    network.key()
                )));
            }
            if !tags.insert(network.pkt_tag) {
                return Err(Error::Topology(format!(
                    "packet tag {} reused by {}",
                    network.pkt_tag,
                    network.key()
                )));
            }
            if !subnets.insert((network.tenant.clone(), network.subnet)) {
                return Err(Error::Topology(format!(
                    "subnet {} reused inside tenant {}",
                    network.subnet, network.tenant
                )));
            }
        }

        if self.uses_tenants() {
            for network in &self.networks {
                let owners = self
                    .tenants
                    .iter()
                    .filter(|t| t.name == network.tenant)
                    .count();
                if owners != 1 {
                    return Err(Error::Topology(format!(
                        "network {} matches {} tenants",
                        network.key(),
                        owners
                    )));
                }
            }
        } else if let Some(stray) = self.networks.iter().find(|n| n.tenant != DEFAULT_TENANT) {
            return Err(Error::Topology(format!(
                "untenanted plan contains {}",
                stray.key()
            )));
        }
        Ok(())
    }
}

/// The ordered record of everything created in the control plane this iteration.
///
/// Teardown walks it; nothing absent from it is ever deleted.
///
/// 本次迭代在控制平面中创建的所有资源的有序记录。清理时遍历它；不在其中的资源不会被删除。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub tenants: Vec<String>,
    pub networks: Vec<NetworkKey>,
}

impl Ledger {
    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty() && self.networks.is_empty()
    }

    /// Networks owned by `tenant`, in creation order.
    pub fn networks_of<'a>(&'a self, tenant: &'a str) -> impl Iterator<Item = &'a NetworkKey> + 'a {
        self.networks.iter().filter(move |key| key.tenant == tenant)
    }
}

/// Submits a [`TopologyPlan`] to the control plane.
///
/// 将 [`TopologyPlan`] 提交给控制平面。
pub struct TopologyBuilder<C: ControlPlane> {
    control: Arc<C>,
    deadline: Option<Duration>,
}

impl<C: ControlPlane> TopologyBuilder<C> {
    pub fn new(control: Arc<C>, deadline: Option<Duration>) -> Self {
        Self { control, deadline }
    }

    /// Creates every tenant, then every network, in plan order.
    ///
    /// Each successful create is appended to `ledger` before the next call, so
    /// on the first failure the ledger holds exactly what must be torn down.
    ///
    /// 按计划顺序先创建所有租户，再创建所有网络。
    ///
    /// 每次成功的创建都会在下一次调用前追加到 `ledger`，因此在首次失败时，
    /// 账本恰好包含需要清理的内容。
    pub async fn apply(&self, plan: &TopologyPlan, ledger: &mut Ledger) -> Result<()> {
        info!(
            iteration = plan.iteration,
            tenants = plan.tenants.len(),
            networks = plan.networks.len(),
            "Creating topology"
        );

        for tenant in &plan.tenants {
            let result = with_deadline(
                self.deadline,
                || format!("create tenant {}", tenant.name),
                self.control.create_tenant(tenant),
            )
            .await;
            if let Err(e) = result {
                warn!(tenant = %tenant.name, error = %e, "Tenant creation failed");
                return Err(e);
            }
            ledger.tenants.push(tenant.name.clone());
        }

        for network in &plan.networks {
            debug!(
                network = %network.name,
                tenant = %network.tenant,
                subnet = %network.subnet,
                pkt_tag = network.pkt_tag,
                encap = %network.encap,
                "Creating network"
            );
            let result = with_deadline(
                self.deadline,
                || format!("create network {}", network.key()),
                self.control.create_network(network),
            )
            .await;
            if let Err(e) = result {
                warn!(network = %network.key(), error = %e, "Network creation failed");
                return Err(e);
            }
            ledger.networks.push(network.key());
        }

        Ok(())
    }
}
