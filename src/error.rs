//! 定义了库中所有可能的错误类型。
//! Defines all possible error types in the library.

use crate::model::NetworkKey;
use std::{fmt, time::Duration};
use thiserror::Error;

/// The primary error type for the system test orchestrator.
/// 系统测试编排器的主要错误类型。
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The control plane rejected a create or delete call.
    /// 控制平面拒绝了一次创建或删除调用。
    #[error("control plane {operation} of {target} failed: {reason}")]
    ControlPlane {
        operation: &'static str,
        target: String,
        reason: String,
    },

    /// The fleet manager could not start workloads on a target.
    /// 集群管理器无法在目标上启动工作负载。
    #[error("provisioning on {target} failed: {reason}")]
    Provision { target: String, reason: String },

    /// The fleet manager could not remove workloads.
    /// 集群管理器无法移除工作负载。
    #[error("removing workloads from {target} failed: {reason}")]
    Removal { target: String, reason: String },

    /// Two members of the same network could not reach each other.
    /// 同一网络中的两个成员无法互相访问。
    #[error("{from} cannot reach {to} inside network {network}")]
    Unreachable {
        network: NetworkKey,
        from: String,
        to: String,
    },

    /// Members of networks that must be isolated reached each other.
    /// 必须隔离的网络的成员之间可以互相访问。
    #[error("{from} in {from_network} unexpectedly reached {to} in {to_network}")]
    UnexpectedReachability {
        from_network: NetworkKey,
        to_network: NetworkKey,
        from: String,
        to: String,
    },

    /// The probing primitive itself failed to run.
    /// 探测原语本身运行失败。
    #[error("probe from {from} to {to} could not run: {reason}")]
    ProbeFailed {
        from: String,
        to: String,
        reason: String,
    },

    /// A collaborator call exceeded its deadline.
    /// 协作方调用超过了其截止时间。
    #[error("{operation} timed out after {after:?}")]
    Timeout { operation: String, after: Duration },

    /// A unit of work panicked before producing an outcome.
    /// 一个工作单元在产生结果之前发生了 panic。
    #[error("worker for {subject} aborted: {reason}")]
    WorkerAborted { subject: String, reason: String },

    /// The result channel closed before every dispatched unit reported.
    /// 在所有已分派单元报告之前，结果通道已关闭。
    #[error("barrier broken: expected {expected} outcomes, received {received}")]
    BarrierBroken { expected: usize, received: usize },

    /// A teardown step was skipped because a step it depends on failed.
    /// 由于其依赖的步骤失败，跳过了一个清理步骤。
    #[error("skipped {target}: {reason}")]
    DependencyFailed { target: String, reason: String },

    /// The suite configuration cannot produce a valid run.
    /// 套件配置无法产生有效的运行。
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// The computed topology violates a uniqueness or range constraint.
    /// 计算出的拓扑违反了唯一性或范围约束。
    #[error("invalid topology: {0}")]
    Topology(String),

    /// One iteration ended with failures. Every failure is kept.
    /// 一次迭代以失败结束。保留所有失败信息。
    #[error("iteration {iteration} failed with {} failure(s); first: {}", .failures.len(), first_failure(.failures))]
    Iteration {
        iteration: usize,
        failures: Vec<Failure>,
    },
}

fn first_failure(failures: &[Failure]) -> String {
    failures
        .first()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}

/// A specialized `Result` type for this library.
/// 本库专用的 `Result` 类型。
pub type Result<T> = std::result::Result<T, Error>;

/// The stage of an iteration an outcome belongs to.
///
/// 结果所属的迭代阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Topology,
    Provision,
    Reachability,
    Isolation,
    Listeners,
    RemoveWorkloads,
    DeleteNetwork,
    DeleteTenant,
}

impl Phase {
    /// Whether the phase belongs to teardown.
    pub fn is_teardown(self) -> bool {
        matches!(
            self,
            Phase::RemoveWorkloads | Phase::DeleteNetwork | Phase::DeleteTenant
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Topology => "topology",
            Phase::Provision => "provision",
            Phase::Reachability => "reachability",
            Phase::Isolation => "isolation",
            Phase::Listeners => "listeners",
            Phase::RemoveWorkloads => "remove-workloads",
            Phase::DeleteNetwork => "delete-network",
            Phase::DeleteTenant => "delete-tenant",
        };
        f.write_str(name)
    }
}

/// What a unit of work operated on.
///
/// 工作单元所操作的对象。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Network(NetworkKey),
    Tenant(String),
    /// An ordered pair of networks: probes go from the first to the second.
    /// 有序网络对：探测从第一个发往第二个。
    Pair(NetworkKey, NetworkKey),
    /// The phase as a whole, for failures no single unit owns.
    /// 整个阶段，用于不属于任何单个单元的失败。
    Phase,
}

impl fmt::Display for Subject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Subject::Network(key) => write!(f, "network {key}"),
            Subject::Tenant(name) => write!(f, "tenant {name}"),
            Subject::Pair(a, b) => write!(f, "pair {a} -> {b}"),
            Subject::Phase => f.write_str("all units"),
        }
    }
}

/// An error attributed to the phase and subject that produced it.
///
/// 归因于产生它的阶段和对象的错误。
#[derive(Debug, Clone)]
pub struct Failure {
    pub phase: Phase,
    pub subject: Subject,
    pub error: Error,
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.phase, self.subject, self.error)
    }
}
