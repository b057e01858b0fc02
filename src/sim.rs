//! An in-memory cluster implementing every collaborator trait.
//!
//! It enforces the control plane's own rules (unique keys, unique live tags,
//! no deleting a network with workloads attached or a tenant that still owns
//! networks) and decides reachability from the forwarding mode, so the
//! orchestrator can be exercised end to end without a live deployment.
//!
//! 一个实现了所有协作方 trait 的内存集群。
//!
//! 它执行控制平面自身的规则（键唯一、存活标签唯一、不能删除仍挂载工作负载的网络
//! 或仍拥有网络的租户），并根据转发模式判定可达性，因此无需真实部署即可端到端地
//! 测试编排器。

mod faults;

pub use faults::Faults;

use crate::{
    config::SuiteConfig,
    error::{Error, Result},
    model::{
        AttachTarget, DEFAULT_TENANT, ForwardingMode, NetworkKey, NetworkSpec, TenantSpec,
        WorkloadHandle,
    },
    traits::{ControlPlane, Fleet, ProvisionOptions, Prober},
};
use async_trait::async_trait;
use dashmap::{DashMap, DashSet, mapref::entry::Entry};
use std::{
    sync::{
        Mutex, PoisonError,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::Duration,
};
use tracing::{debug, trace};

/// One state change observed by the simulated cluster.
///
/// 模拟集群观察到的一次状态变更。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimEvent {
    RoutingEnsured,
    TenantCreated(String),
    TenantDeleted(String),
    NetworkCreated(NetworkKey),
    NetworkDeleted(NetworkKey),
    Provisioned { network: NetworkKey, count: usize },
    Removed { network: NetworkKey, count: usize },
}

/// The simulated control plane, fleet and data plane.
///
/// 模拟的控制平面、集群和数据平面。
#[derive(Debug)]
pub struct SimCluster {
    forwarding: ForwardingMode,
    nodes: Vec<String>,
    tenants: DashSet<String>,
    networks: DashMap<NetworkKey, NetworkSpec>,
    tags: DashMap<u16, NetworkKey>,
    workloads: DashMap<String, WorkloadHandle>,
    next_host: DashMap<NetworkKey, u32>,
    listeners: DashSet<(String, u16)>,
    next_workload: AtomicU64,
    next_node: AtomicUsize,
    routing_ready: AtomicBool,
    jitter: Option<Duration>,
    journal: Mutex<Vec<SimEvent>>,
    faults: Faults,
}

fn control_error(operation: &'static str, target: impl ToString, reason: &str) -> Error {
    Error::ControlPlane {
        operation,
        target: target.to_string(),
        reason: reason.to_string(),
    }
}

impl SimCluster {
    pub fn new(forwarding: ForwardingMode, nodes: Vec<String>) -> Self {
        Self {
            forwarding,
            nodes,
            tenants: DashSet::new(),
            networks: DashMap::new(),
            tags: DashMap::new(),
            workloads: DashMap::new(),
            next_host: DashMap::new(),
            listeners: DashSet::new(),
            next_workload: AtomicU64::new(0),
            next_node: AtomicUsize::new(0),
            routing_ready: AtomicBool::new(false),
            jitter: None,
            journal: Mutex::new(Vec::new()),
            faults: Faults::default(),
        }
    }

    /// A cluster matching the forwarding mode and nodes of `config`.
    pub fn for_config(config: &SuiteConfig) -> Self {
        Self::new(config.forwarding, config.nodes.clone())
    }

    /// Delays every call by a random amount up to `max`, shuffling the order
    /// in which concurrent workers complete.
    ///
    /// 将每次调用随机延迟至多 `max`，打乱并发工作者的完成顺序。
    pub fn with_jitter(mut self, max: Duration) -> Self {
        self.jitter = Some(max);
        self
    }

    pub fn faults(&self) -> &Faults {
        &self.faults
    }

    pub fn journal(&self) -> Vec<SimEvent> {
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn live_networks(&self) -> Vec<NetworkKey> {
        let mut keys: Vec<_> = self.networks.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn live_tenants(&self) -> Vec<String> {
        let mut names: Vec<_> = self.tenants.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }

    pub fn live_workloads(&self) -> usize {
        self.workloads.len()
    }

    pub fn routing_ready(&self) -> bool {
        self.routing_ready.load(Ordering::SeqCst)
    }

    fn record(&self, event: SimEvent) {
        trace!(?event, "Simulated cluster event");
        self.journal
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    async fn latency(&self) {
        if let Some(max) = self.jitter {
            let max_micros = max.as_micros().min(u128::from(u64::MAX)) as u64;
            let delay = rand::random_range(0..=max_micros);
            tokio::time::sleep(Duration::from_micros(delay)).await;
        }
    }

    fn attached_to(&self, key: &NetworkKey) -> usize {
        self.workloads
            .iter()
            .filter(|w| &w.target.key() == key)
            .count()
    }

    fn running(&self, handle: &WorkloadHandle) -> bool {
        self.workloads.contains_key(&handle.id)
    }

    /// The data-plane rule: same network always, same tenant under routing,
    /// plus any injected leak; partitions cut intra-network traffic.
    ///
    /// 数据平面规则：同一网络总是可达，路由模式下同一租户可达，
    /// 另加任何注入的泄漏；分区会切断网络内流量。
    fn reachable(&self, from: &WorkloadHandle, to: &WorkloadHandle) -> bool {
        let a = from.target.key();
        let b = to.target.key();
        if a == b {
            return !self.faults.partitioned.contains(&a.network);
        }
        if self.faults.leaks_between(&a.network, &b.network) {
            return true;
        }
        self.forwarding.is_routing() && a.tenant == b.tenant
    }

    fn probe_precondition(&self, from: &WorkloadHandle, to: &WorkloadHandle) -> Result<()> {
        for handle in [from, to] {
            if !self.running(handle) {
                return Err(Error::ProbeFailed {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason: format!("{handle} is not running"),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for SimCluster {
    async fn create_tenant(&self, tenant: &TenantSpec) -> Result<()> {
        self.latency().await;
        if self.faults.create_tenant.contains(&tenant.name) {
            return Err(control_error("create", &tenant.name, "injected fault"));
        }
        if !self.tenants.insert(tenant.name.clone()) {
            return Err(control_error("create", &tenant.name, "tenant already exists"));
        }
        self.record(SimEvent::TenantCreated(tenant.name.clone()));
        Ok(())
    }

    async fn delete_tenant(&self, name: &str) -> Result<()> {
        self.latency().await;
        if self.faults.delete_tenant.contains(name) {
            return Err(control_error("delete", name, "injected fault"));
        }
        if self.networks.iter().any(|n| n.key().tenant == name) {
            return Err(control_error("delete", name, "tenant still owns networks"));
        }
        if self.tenants.remove(name).is_none() {
            return Err(control_error("delete", name, "no such tenant"));
        }
        self.record(SimEvent::TenantDeleted(name.to_string()));
        Ok(())
    }

    async fn create_network(&self, network: &NetworkSpec) -> Result<()> {
        self.latency().await;
        let key = network.key();
        if self.faults.create_network.contains(&network.name) {
            return Err(control_error("create", &key, "injected fault"));
        }
        if network.tenant != DEFAULT_TENANT && !self.tenants.contains(&network.tenant) {
            return Err(control_error("create", &key, "unknown tenant"));
        }

        // Reserve the tag first; a live network holding it means a collision.
        match self.tags.entry(network.pkt_tag) {
            Entry::Occupied(holder) => {
                return Err(control_error(
                    "create",
                    &key,
                    &format!("packet tag {} in use by {}", network.pkt_tag, holder.get()),
                ));
            }
            Entry::Vacant(slot) => {
                slot.insert(key.clone());
            }
        }

        match self.networks.entry(key.clone()) {
            Entry::Occupied(_) => {
                self.tags.remove(&network.pkt_tag);
                return Err(control_error("create", &key, "network already exists"));
            }
            Entry::Vacant(slot) => {
                slot.insert(network.clone());
            }
        }
        debug!(network = %key, subnet = %network.subnet, "Simulated network created");
        self.record(SimEvent::NetworkCreated(key));
        Ok(())
    }

    async fn delete_network(&self, tenant: &str, name: &str) -> Result<()> {
        self.latency().await;
        let key = NetworkKey::new(tenant, name);
        if self.faults.delete_network.contains(name) {
            return Err(control_error("delete", &key, "injected fault"));
        }
        if self.attached_to(&key) > 0 {
            return Err(control_error("delete", &key, "workloads still attached"));
        }
        let Some((_, spec)) = self.networks.remove(&key) else {
            return Err(control_error("delete", &key, "no such network"));
        };
        self.tags.remove(&spec.pkt_tag);
        self.next_host.remove(&key);
        self.record(SimEvent::NetworkDeleted(key));
        Ok(())
    }

    async fn ensure_routing(&self) -> Result<()> {
        self.latency().await;
        if !self.forwarding.is_routing() {
            return Err(control_error(
                "ensure",
                "bgp",
                "cluster is not in routing forwarding mode",
            ));
        }
        self.routing_ready.store(true, Ordering::SeqCst);
        self.record(SimEvent::RoutingEnsured);
        Ok(())
    }
}

#[async_trait]
impl Fleet for SimCluster {
    async fn provision(
        &self,
        count: usize,
        _use_dns: bool,
        target: &AttachTarget,
        _options: &ProvisionOptions,
    ) -> Result<Vec<WorkloadHandle>> {
        self.latency().await;
        if self.faults.hang_provision.contains(&target.network) {
            return std::future::pending().await;
        }
        if self.faults.provision.contains(&target.network) {
            return Err(Error::Provision {
                target: target.to_string(),
                reason: "injected fault".into(),
            });
        }

        let key = target.key();
        let Some(subnet) = self.networks.get(&key).map(|n| n.subnet) else {
            return Err(Error::Provision {
                target: target.to_string(),
                reason: "network does not exist".into(),
            });
        };
        if self.nodes.is_empty() {
            return Err(Error::Provision {
                target: target.to_string(),
                reason: "no nodes to schedule on".into(),
            });
        }

        // Reserve the whole range up front so an exhausted subnet registers nothing.
        let exhausted = || Error::Provision {
            target: target.to_string(),
            reason: format!("subnet {subnet} exhausted"),
        };
        let first = {
            let mut next = self.next_host.entry(key.clone()).or_insert(0);
            let first = *next;
            let count_u32 = u32::try_from(count).map_err(|_| exhausted())?;
            let end = first.checked_add(count_u32).ok_or_else(exhausted)?;
            if count > 0 && subnet.host(end - 1).is_none() {
                return Err(exhausted());
            }
            *next = end;
            first
        };

        let mut handles = Vec::with_capacity(count);
        for host_index in (first..).take(count) {
            let Some(address) = subnet.host(host_index) else {
                return Err(exhausted());
            };
            let id = self.next_workload.fetch_add(1, Ordering::SeqCst);
            let node = self.next_node.fetch_add(1, Ordering::SeqCst) % self.nodes.len();
            let handle = WorkloadHandle {
                id: format!("w{id}"),
                name: format!("{}-{}-{}", key.tenant, key.network, host_index),
                node: self.nodes[node].clone(),
                address,
                target: target.clone(),
            };
            self.workloads.insert(handle.id.clone(), handle.clone());
            handles.push(handle);
        }

        self.record(SimEvent::Provisioned {
            network: key,
            count,
        });
        Ok(handles)
    }

    async fn remove(&self, workloads: &[WorkloadHandle]) -> Result<()> {
        self.latency().await;
        let Some(first) = workloads.first() else {
            return Ok(());
        };
        if self.faults.remove.contains(&first.target.network) {
            return Err(Error::Removal {
                target: first.target.to_string(),
                reason: "injected fault".into(),
            });
        }

        let mut removed = 0;
        for handle in workloads {
            if self.workloads.remove(&handle.id).is_some() {
                removed += 1;
            }
            self.listeners.retain(|(id, _)| id != &handle.id);
        }
        if removed != workloads.len() {
            return Err(Error::Removal {
                target: first.target.to_string(),
                reason: format!("{} of {} workloads were not running", workloads.len() - removed, workloads.len()),
            });
        }

        self.record(SimEvent::Removed {
            network: first.target.key(),
            count: removed,
        });
        Ok(())
    }
}

#[async_trait]
impl Prober for SimCluster {
    async fn reach(&self, from: &WorkloadHandle, to: &WorkloadHandle) -> Result<bool> {
        self.latency().await;
        self.probe_precondition(from, to)?;
        Ok(self.reachable(from, to))
    }

    async fn start_listener(&self, on: &WorkloadHandle, port: u16) -> Result<()> {
        self.latency().await;
        if !self.running(on) {
            return Err(Error::ProbeFailed {
                from: on.to_string(),
                to: format!("port {port}"),
                reason: "workload is not running".into(),
            });
        }
        self.listeners.insert((on.id.clone(), port));
        Ok(())
    }

    async fn connect(&self, from: &WorkloadHandle, to: &WorkloadHandle, port: u16) -> Result<bool> {
        self.latency().await;
        self.probe_precondition(from, to)?;
        Ok(self.listeners.contains(&(to.id.clone(), port)) && self.reachable(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EncapMode, Subnet};
    use std::net::Ipv4Addr;

    fn spec(tenant: &str, name: &str, third: u8, tag: u16) -> NetworkSpec {
        NetworkSpec {
            tenant: tenant.into(),
            name: name.into(),
            subnet: Subnet::new(Ipv4Addr::new(10, 1, third, 0), 24),
            gateway: Ipv4Addr::new(10, 1, third, 254),
            pkt_tag: tag,
            encap: EncapMode::Vxlan,
        }
    }

    fn cluster(forwarding: ForwardingMode) -> SimCluster {
        SimCluster::new(forwarding, vec!["node1".into(), "node2".into()])
    }

    #[tokio::test]
    async fn test_control_plane_rules() {
        let sim = cluster(ForwardingMode::Bridge);
        sim.create_network(&spec(DEFAULT_TENANT, "net0-0", 0, 1001)).await.unwrap();

        // Duplicate key and tag collisions are rejected.
        assert!(sim.create_network(&spec(DEFAULT_TENANT, "net0-0", 5, 1005)).await.is_err());
        assert!(sim.create_network(&spec(DEFAULT_TENANT, "net9-0", 9, 1001)).await.is_err());
        // Unknown tenant.
        assert!(sim.create_network(&spec("tenant7", "net0-0", 0, 1100)).await.is_err());

        let target = AttachTarget::new("net0-0", None);
        let handles = sim
            .provision(2, false, &target, &ProvisionOptions::default())
            .await
            .unwrap();
        assert_eq!(handles[0].address, Ipv4Addr::new(10, 1, 0, 1));
        assert_eq!(handles[1].address, Ipv4Addr::new(10, 1, 0, 2));
        assert_ne!(handles[0].node, handles[1].node);

        // Cannot delete a network with workloads attached.
        assert!(sim.delete_network(DEFAULT_TENANT, "net0-0").await.is_err());
        sim.remove(&handles).await.unwrap();
        sim.delete_network(DEFAULT_TENANT, "net0-0").await.unwrap();

        // The tag is free again.
        sim.create_network(&spec(DEFAULT_TENANT, "net9-0", 9, 1001)).await.unwrap();
    }

    #[tokio::test]
    async fn test_tenant_rules() {
        let sim = cluster(ForwardingMode::Bridge);
        let tenant = TenantSpec {
            name: "tenant0".into(),
            networks: vec![],
        };
        sim.create_tenant(&tenant).await.unwrap();
        assert!(sim.create_tenant(&tenant).await.is_err());

        sim.create_network(&spec("tenant0", "net0-0", 0, 1000)).await.unwrap();
        assert!(sim.delete_tenant("tenant0").await.is_err());
        sim.delete_network("tenant0", "net0-0").await.unwrap();
        sim.delete_tenant("tenant0").await.unwrap();
        assert!(sim.live_tenants().is_empty());
    }

    #[tokio::test]
    async fn test_reachability_follows_forwarding_mode() {
        for (forwarding, cross) in [(ForwardingMode::Bridge, false), (ForwardingMode::Routing, true)] {
            let sim = cluster(forwarding);
            sim.create_network(&spec(DEFAULT_TENANT, "net0-0", 0, 1001)).await.unwrap();
            sim.create_network(&spec(DEFAULT_TENANT, "net1-0", 1, 1002)).await.unwrap();
            let options = ProvisionOptions::default();
            let a = sim.provision(2, false, &AttachTarget::new("net0-0", None), &options).await.unwrap();
            let b = sim.provision(1, false, &AttachTarget::new("net1-0", None), &options).await.unwrap();

            assert!(sim.reach(&a[0], &a[1]).await.unwrap());
            assert_eq!(sim.reach(&a[0], &b[0]).await.unwrap(), cross);

            sim.faults().partition("net0-0");
            assert!(!sim.reach(&a[0], &a[1]).await.unwrap());

            sim.remove(&b).await.unwrap();
            assert!(sim.reach(&a[0], &b[0]).await.is_err());
        }
    }

    #[tokio::test]
    async fn test_exhausted_subnet_registers_nothing() {
        let sim = cluster(ForwardingMode::Bridge);
        sim.create_network(&spec(DEFAULT_TENANT, "net0-0", 0, 1001)).await.unwrap();
        let target = AttachTarget::new("net0-0", None);
        let options = ProvisionOptions::default();

        let first = sim.provision(200, false, &target, &options).await.unwrap();
        assert!(matches!(
            sim.provision(55, false, &target, &options).await,
            Err(Error::Provision { .. })
        ));
        assert_eq!(sim.live_workloads(), 200);

        // The remaining 54 addresses are still free.
        let rest = sim.provision(54, false, &target, &options).await.unwrap();
        assert_eq!(rest[53].address, Ipv4Addr::new(10, 1, 0, 254));

        sim.remove(&first).await.unwrap();
        sim.remove(&rest).await.unwrap();
        sim.delete_network(DEFAULT_TENANT, "net0-0").await.unwrap();
        assert_eq!(sim.live_workloads(), 0);
        assert!(sim.live_networks().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_jitter_delays_calls() {
        let sim = cluster(ForwardingMode::Bridge).with_jitter(Duration::from_millis(50));
        let start = tokio::time::Instant::now();
        sim.create_network(&spec(DEFAULT_TENANT, "net0-0", 0, 1001)).await.unwrap();
        assert!(start.elapsed() <= Duration::from_millis(50));
        assert_eq!(sim.live_networks().len(), 1);
    }
}
