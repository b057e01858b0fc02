//! Fault injection for the simulated cluster.
//!
//! Network faults are keyed by network name and hit that name in every
//! tenant; tenant faults are keyed by tenant name.
//!
//! 模拟集群的故障注入。
//!
//! 网络故障以网络名称为键，并作用于所有租户中的同名网络；租户故障以租户名称为键。

use dashmap::DashSet;

/// The set of armed faults. Faults stay armed until [`Faults::clear`].
///
/// 已设置的故障集合。故障在 [`Faults::clear`] 之前一直有效。
#[derive(Debug, Default)]
pub struct Faults {
    pub(super) create_tenant: DashSet<String>,
    pub(super) delete_tenant: DashSet<String>,
    pub(super) create_network: DashSet<String>,
    pub(super) delete_network: DashSet<String>,
    pub(super) provision: DashSet<String>,
    pub(super) hang_provision: DashSet<String>,
    pub(super) remove: DashSet<String>,
    pub(super) partitioned: DashSet<String>,
    pub(super) leaks: DashSet<(String, String)>,
}

impl Faults {
    pub fn fail_tenant_create(&self, tenant: &str) {
        self.create_tenant.insert(tenant.to_string());
    }

    pub fn fail_tenant_delete(&self, tenant: &str) {
        self.delete_tenant.insert(tenant.to_string());
    }

    pub fn fail_network_create(&self, network: &str) {
        self.create_network.insert(network.to_string());
    }

    pub fn fail_network_delete(&self, network: &str) {
        self.delete_network.insert(network.to_string());
    }

    /// Provisioning on `network` returns an error.
    pub fn fail_provision(&self, network: &str) {
        self.provision.insert(network.to_string());
    }

    /// Provisioning on `network` never returns.
    pub fn hang_provision(&self, network: &str) {
        self.hang_provision.insert(network.to_string());
    }

    pub fn fail_removal(&self, network: &str) {
        self.remove.insert(network.to_string());
    }

    /// Members of `network` cannot reach each other.
    /// `network` 的成员之间无法互相访问。
    pub fn partition(&self, network: &str) {
        self.partitioned.insert(network.to_string());
    }

    /// Members of `a` and `b` reach each other in both directions,
    /// whatever the forwarding mode.
    ///
    /// 无论转发模式如何，`a` 与 `b` 的成员都可以双向互相访问。
    pub fn leak(&self, a: &str, b: &str) {
        self.leaks.insert((a.to_string(), b.to_string()));
        self.leaks.insert((b.to_string(), a.to_string()));
    }

    pub(super) fn leaks_between(&self, a: &str, b: &str) -> bool {
        self.leaks.contains(&(a.to_string(), b.to_string()))
    }

    pub fn clear(&self) {
        self.create_tenant.clear();
        self.delete_tenant.clear();
        self.create_network.clear();
        self.delete_network.clear();
        self.provision.clear();
        self.hang_provision.clear();
        self.remove.clear();
        self.partitioned.clear();
        self.leaks.clear();
    }
}
