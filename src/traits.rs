//! Traits for abstracting over the external collaborators the orchestrator drives.
//!
//! The control plane, the fleet manager and the probing primitive are all
//! behind these traits, so a live cluster and the in-memory [`crate::sim`]
//! cluster are interchangeable.
//!
//! 用于抽象编排器所驱动的外部协作方的 trait。
//!
//! 控制平面、集群管理器和探测原语都位于这些 trait 之后，
//! 因此真实集群与内存中的 [`crate::sim`] 集群可以互换。

use crate::{
    error::Result,
    model::{AttachTarget, NetworkSpec, TenantSpec, WorkloadHandle},
};
use async_trait::async_trait;

/// The control-plane client: tenant and network lifecycle.
///
/// Calls are synchronous from the caller's point of view. The orchestrator
/// never retries; an error is final for the branch that issued it.
///
/// 控制平面客户端：租户和网络的生命周期。
///
/// 从调用方的角度看，调用是同步的。编排器从不重试；错误对于发起它的分支是最终的。
#[async_trait]
pub trait ControlPlane: Send + Sync + 'static {
    /// Creates a tenant. Its networks are created separately.
    /// 创建一个租户。其网络单独创建。
    async fn create_tenant(&self, tenant: &TenantSpec) -> Result<()>;

    /// Deletes a tenant that owns no networks anymore.
    /// 删除一个不再拥有任何网络的租户。
    async fn delete_tenant(&self, name: &str) -> Result<()>;

    /// Creates a network inside its tenant.
    /// 在其租户内创建一个网络。
    async fn create_network(&self, network: &NetworkSpec) -> Result<()>;

    /// Deletes a network that has no workloads attached anymore.
    /// 删除一个不再挂载任何工作负载的网络。
    async fn delete_network(&self, tenant: &str, name: &str) -> Result<()>;

    /// Sets up route distribution (BGP peering) and checks the sessions are up.
    /// Called once before a routed run.
    ///
    /// 建立路由分发（BGP 对等）并检查会话已建立。在路由模式运行前调用一次。
    async fn ensure_routing(&self) -> Result<()>;
}

/// Extra parameters forwarded untouched to the fleet manager.
///
/// 原样转发给集群管理器的额外参数。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProvisionOptions {
    /// Image to start instead of the fleet's default probe image.
    pub image: Option<String>,
    /// Labels attached to every started workload.
    pub labels: Vec<(String, String)>,
}

/// The fleet manager that starts and removes workloads.
///
/// Must be safe to call concurrently for different attachment targets.
///
/// 启动和移除工作负载的集群管理器。必须支持针对不同挂载目标的并发调用。
#[async_trait]
pub trait Fleet: Send + Sync + 'static {
    /// Starts `count` workloads attached to `target` and returns their handles.
    /// 启动 `count` 个挂载到 `target` 的工作负载并返回其句柄。
    async fn provision(
        &self,
        count: usize,
        use_dns: bool,
        target: &AttachTarget,
        options: &ProvisionOptions,
    ) -> Result<Vec<WorkloadHandle>>;

    /// Stops and removes the given workloads.
    /// 停止并移除给定的工作负载。
    async fn remove(&self, workloads: &[WorkloadHandle]) -> Result<()>;
}

/// The connectivity primitives the verifier composes.
///
/// `Ok(false)` means the probe ran and the peer was not reachable; `Err` means
/// the probe itself could not run.
///
/// 验证器所组合的连通性原语。
///
/// `Ok(false)` 表示探测已运行但对端不可达；`Err` 表示探测本身无法运行。
#[async_trait]
pub trait Prober: Send + Sync + 'static {
    /// Pings `to` from `from`.
    async fn reach(&self, from: &WorkloadHandle, to: &WorkloadHandle) -> Result<bool>;

    /// Starts a TCP listener on `port` inside the workload.
    async fn start_listener(&self, on: &WorkloadHandle, port: u16) -> Result<()>;

    /// Opens a TCP connection from `from` to `to` on `port`.
    async fn connect(&self, from: &WorkloadHandle, to: &WorkloadHandle, port: u16)
    -> Result<bool>;
}
