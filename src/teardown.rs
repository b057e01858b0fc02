//! Dependency-ordered teardown: workloads, then networks, then tenants.
//!
//! Teardown always runs, whatever verification reported. A failed step only
//! blocks the steps that depend on it; every other network and tenant is
//! still cleaned up.
//!
//! 按依赖顺序清理：先工作负载，再网络，最后租户。
//!
//! 无论验证报告了什么，清理总会运行。失败的步骤只会阻塞依赖它的步骤；
//! 其他所有网络和租户仍会被清理。

use crate::{
    error::{Error, Phase, Subject},
    model::NetworkKey,
    orchestrator::{
        barrier::{FanOut, with_deadline},
        report::{Outcome, PhaseReport},
        state::IterationState,
    },
    traits::{ControlPlane, Fleet},
};
use std::{collections::HashSet, sync::Arc, time::Duration};
use tracing::{info, warn};

/// Removes what an iteration created.
///
/// 移除一次迭代所创建的内容。
pub struct TeardownSequencer<C: ControlPlane, F: Fleet> {
    control: Arc<C>,
    fleet: Arc<F>,
    deadline: Option<Duration>,
}

impl<C: ControlPlane, F: Fleet> TeardownSequencer<C, F> {
    pub fn new(control: Arc<C>, fleet: Arc<F>, deadline: Option<Duration>) -> Self {
        Self {
            control,
            fleet,
            deadline,
        }
    }

    /// Tears down `networks` and then `tenants`.
    ///
    /// Returns one report per step: workload removal, network deletion, tenant
    /// deletion. Every network and tenant passed in produces one outcome.
    ///
    /// 清理 `networks`，然后清理 `tenants`。
    ///
    /// 每个步骤返回一个报告：工作负载移除、网络删除、租户删除。
    /// 传入的每个网络和租户都会产生一个结果。
    pub async fn run(
        &self,
        state: &IterationState,
        networks: &[NetworkKey],
        tenants: &[String],
    ) -> Vec<PhaseReport> {
        info!(
            iteration = state.iteration,
            networks = networks.len(),
            tenants = tenants.len(),
            "Tearing down"
        );

        let removal = self.remove_workloads(state, networks).await;
        let blocked: HashSet<NetworkKey> = removal
            .failures()
            .into_iter()
            .filter_map(|failure| match failure.subject {
                Subject::Network(key) => Some(key),
                _ => None,
            })
            .collect();

        let deletion = self.delete_networks(networks, &blocked).await;
        let undeleted: HashSet<String> = deletion
            .failures()
            .into_iter()
            .filter_map(|failure| match failure.subject {
                Subject::Network(key) => Some(key.tenant),
                _ => None,
            })
            .collect();

        let tenant_deletion = self.delete_tenants(tenants, &undeleted).await;
        vec![removal, deletion, tenant_deletion]
    }

    /// Removes every group's workloads in parallel, one unit per network.
    ///
    /// 并行移除每个分组的工作负载，每个网络一个单元。
    async fn remove_workloads(&self, state: &IterationState, networks: &[NetworkKey]) -> PhaseReport {
        let mut fan_out = FanOut::new(Phase::RemoveWorkloads, self.deadline);
        for key in networks {
            // Branches whose provisioning failed have no group.
            let Some(group) = state.take_group(key) else {
                continue;
            };
            let fleet = self.fleet.clone();
            fan_out.spawn(Subject::Network(key.clone()), async move {
                fleet.remove(&group.members).await
            });
        }
        let report = fan_out.wait().await;
        for failure in report.failures() {
            warn!(%failure, "Workload removal failed");
        }
        report
    }

    async fn delete_networks(
        &self,
        networks: &[NetworkKey],
        blocked: &HashSet<NetworkKey>,
    ) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::DeleteNetwork);
        for key in networks {
            let subject = Subject::Network(key.clone());
            if blocked.contains(key) {
                report.push(Outcome::failed(
                    Phase::DeleteNetwork,
                    subject,
                    Error::DependencyFailed {
                        target: key.to_string(),
                        reason: "workloads were not removed".into(),
                    },
                ));
                continue;
            }

            let result = with_deadline(
                self.deadline,
                || format!("delete network {key}"),
                self.control.delete_network(&key.tenant, &key.network),
            )
            .await;
            if let Err(e) = &result {
                warn!(network = %key, error = %e, "Network deletion failed");
            }
            report.push(Outcome {
                phase: Phase::DeleteNetwork,
                subject,
                result,
            });
        }
        report
    }

    async fn delete_tenants(&self, tenants: &[String], undeleted: &HashSet<String>) -> PhaseReport {
        let mut report = PhaseReport::new(Phase::DeleteTenant);
        for tenant in tenants {
            let subject = Subject::Tenant(tenant.clone());
            if undeleted.contains(tenant) {
                report.push(Outcome::failed(
                    Phase::DeleteTenant,
                    subject,
                    Error::DependencyFailed {
                        target: tenant.clone(),
                        reason: "tenant still owns networks".into(),
                    },
                ));
                continue;
            }

            let result = with_deadline(
                self.deadline,
                || format!("delete tenant {tenant}"),
                self.control.delete_tenant(tenant),
            )
            .await;
            if let Err(e) = &result {
                warn!(%tenant, error = %e, "Tenant deletion failed");
            }
            report.push(Outcome {
                phase: Phase::DeleteTenant,
                subject,
                result,
            });
        }
        report
    }
}
