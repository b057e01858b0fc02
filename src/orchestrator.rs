//! The concurrent test-orchestration engine.
//!
//! Each iteration runs its phases strictly in sequence. Inside a phase, one
//! unit of work per network (or per ordered pair of networks) runs
//! concurrently behind a [`FanOut`] barrier, and the next phase only starts
//! once every unit has reported. Teardown runs whatever the probes found.
//!
//! 并发测试编排引擎。
//!
//! 每次迭代严格按顺序执行各阶段。在一个阶段内，每个网络（或每个有序网络对）
//! 对应的工作单元在 [`FanOut`] 屏障之后并发运行，只有在所有单元都报告后才开始
//! 下一个阶段。无论探测结果如何，清理都会运行。

pub mod barrier;
pub mod report;
pub mod state;

pub use barrier::{BarrierState, FanOut};
pub use report::{IterationReport, Outcome, PhaseReport, SuiteReport};
pub use state::{GroupSink, IterationState};

use crate::{
    config::SuiteConfig,
    error::{Error, Phase, Result, Subject},
    model::{EncapMode, NetworkSpec, WorkloadGroup},
    scenario::{Flow, Scenario},
    teardown::TeardownSequencer,
    topology::{Layout, TopologyBuilder, TopologyPlan},
    traits::{ControlPlane, Fleet, Prober},
    verifier::ConnectivityVerifier,
};
use barrier::with_deadline;
use std::{collections::HashMap, sync::Arc};
use tracing::{error, info, warn};

/// Drives scenarios against a control plane, a fleet and a prober.
///
/// 针对控制平面、集群和探测器驱动场景。
pub struct Orchestrator<C: ControlPlane, F: Fleet, P: Prober> {
    config: Arc<SuiteConfig>,
    control: Arc<C>,
    fleet: Arc<F>,
    verifier: ConnectivityVerifier<P>,
    topology: TopologyBuilder<C>,
    teardown: TeardownSequencer<C, F>,
}

fn ordered_pairs(
    groups: &[WorkloadGroup],
    keep: impl Fn(&WorkloadGroup, &WorkloadGroup) -> bool,
) -> Vec<(&WorkloadGroup, &WorkloadGroup)> {
    let mut pairs = Vec::new();
    for a in groups {
        for b in groups {
            if a.key != b.key && keep(a, b) {
                pairs.push((a, b));
            }
        }
    }
    pairs
}

impl<C: ControlPlane, F: Fleet, P: Prober> Orchestrator<C, F, P> {
    /// Validates `config` and wires the components together.
    ///
    /// 校验 `config` 并将各组件连接起来。
    pub fn new(config: SuiteConfig, control: Arc<C>, fleet: Arc<F>, prober: Arc<P>) -> Result<Self> {
        config.validate()?;
        let deadline = config.timing.operation_timeout;
        Ok(Self {
            topology: TopologyBuilder::new(control.clone(), deadline),
            teardown: TeardownSequencer::new(control.clone(), fleet.clone(), deadline),
            verifier: ConnectivityVerifier::new(prober),
            config: Arc::new(config),
            control,
            fleet,
        })
    }

    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }

    /// Runs every iteration of `scenario`, stopping at the first failed one.
    ///
    /// 运行 `scenario` 的每次迭代，在第一次失败的迭代处停止。
    pub async fn run(&self, scenario: Scenario) -> Result<SuiteReport> {
        info!(
            %scenario,
            forwarding = %self.config.forwarding,
            iterations = self.config.iterations,
            workloads = self.config.workloads,
            nodes = self.config.nodes.len(),
            "Starting scenario"
        );

        if scenario.needs_routing(self.config.forwarding) {
            with_deadline(
                self.config.timing.operation_timeout,
                || "ensure routing".to_string(),
                self.control.ensure_routing(),
            )
            .await?;
        }

        let mut iterations = Vec::with_capacity(self.config.iterations);
        for iteration in 0..self.config.iterations {
            let report = self.run_iteration(scenario, iteration).await;
            match report.into_result() {
                Ok(report) => iterations.push(report),
                Err(e) => {
                    error!(%scenario, iteration, error = %e, "Iteration failed");
                    if let Error::Iteration { failures, .. } = &e {
                        for failure in failures {
                            if failure.phase.is_teardown() {
                                error!(%failure, "Teardown failure, resources may be left behind");
                            } else {
                                error!(%failure, "Failure detail");
                            }
                        }
                    }
                    return Err(e);
                }
            }
        }

        info!(%scenario, "Scenario passed");
        Ok(SuiteReport {
            scenario: scenario.to_string(),
            iterations,
        })
    }

    /// Runs one iteration and returns its full report, failed or not.
    ///
    /// 运行一次迭代并返回其完整报告，无论是否失败。
    pub async fn run_iteration(&self, scenario: Scenario, iteration: usize) -> IterationReport {
        let report = match scenario.flow {
            Flow::NetworkAddDelete => self.network_iteration(scenario, iteration).await,
            Flow::TenantAddDelete => self.tenant_iteration(scenario.encap, iteration).await,
            Flow::MultiTenant => self.multi_tenant_iteration(scenario, iteration).await,
        };
        info!(
            %scenario,
            iteration,
            passed = report.is_success(),
            failures = report.failures().len(),
            "Iteration finished"
        );
        report
    }

    async fn network_iteration(&self, scenario: Scenario, iteration: usize) -> IterationReport {
        let mut report = IterationReport::new(iteration);
        let plan = match TopologyPlan::untenanted(&self.config, scenario.encap, iteration) {
            Ok(plan) => plan,
            Err(e) => return planning_failed(report, e),
        };

        let mut state = IterationState::new(iteration);
        if !self.create_topology(&plan, &mut state, &mut report).await {
            self.teardown_everything(&state, &mut report).await;
            return report;
        }

        report.record(self.provision(&plan.networks, &state).await);
        self.settle().await;

        let groups = state.groups();
        report.record(self.reachability(&groups).await);
        if scenario.checks_isolation(self.config.forwarding) {
            report.record(self.isolation(&groups).await);
        }

        self.teardown_everything(&state, &mut report).await;
        report
    }

    async fn tenant_iteration(&self, encap: EncapMode, iteration: usize) -> IterationReport {
        let mut report = IterationReport::new(iteration);
        let plan = match TopologyPlan::tenanted(&self.config, encap, iteration, Layout::Tenants) {
            Ok(plan) => plan,
            Err(e) => return planning_failed(report, e),
        };

        let mut state = IterationState::new(iteration);
        if !self.create_topology(&plan, &mut state, &mut report).await {
            self.teardown_everything(&state, &mut report).await;
            return report;
        }

        // One tenant at a time; a failing tenant does not stop the next one.
        for tenant in &plan.tenants {
            info!(iteration, tenant = %tenant.name, "Processing tenant");
            report.record(self.provision(&tenant.networks, &state).await);
            self.settle().await;

            let groups: Vec<_> = state
                .groups()
                .into_iter()
                .filter(|g| g.key.tenant == tenant.name)
                .collect();
            report.record(self.reachability(&groups).await);

            let networks: Vec<_> = state.ledger.networks_of(&tenant.name).cloned().collect();
            for step in self
                .teardown
                .run(&state, &networks, std::slice::from_ref(&tenant.name))
                .await
            {
                report.record(step);
            }
        }
        report
    }

    async fn multi_tenant_iteration(&self, scenario: Scenario, iteration: usize) -> IterationReport {
        let mut report = IterationReport::new(iteration);
        let plan = match TopologyPlan::tenanted(
            &self.config,
            scenario.encap,
            iteration,
            Layout::OverlappingTenants,
        ) {
            Ok(plan) => plan,
            Err(e) => return planning_failed(report, e),
        };
        let ports = match self.listener_ports(&plan) {
            Ok(ports) => ports,
            Err(e) => return planning_failed(report, e),
        };

        let mut state = IterationState::new(iteration);
        if !self.create_topology(&plan, &mut state, &mut report).await {
            self.teardown_everything(&state, &mut report).await;
            return report;
        }

        report.record(self.provision(&plan.networks, &state).await);
        self.settle().await;

        let groups = state.groups();
        report.record(self.listeners(&groups, &ports).await);
        if scenario.checks_isolation(self.config.forwarding) {
            report.record(self.tenant_isolation(&groups, &ports).await);
        }

        for tenant in &plan.tenants {
            let networks: Vec<_> = state.ledger.networks_of(&tenant.name).cloned().collect();
            for step in self
                .teardown
                .run(&state, &networks, std::slice::from_ref(&tenant.name))
                .await
            {
                report.record(step);
            }
        }
        report
    }

    /// Tenant `t` of the plan listens on `listener_base_port + t`.
    fn listener_ports(&self, plan: &TopologyPlan) -> Result<HashMap<String, u16>> {
        plan.tenants
            .iter()
            .enumerate()
            .map(|(index, tenant)| {
                u16::try_from(index)
                    .ok()
                    .and_then(|offset| self.config.listener_base_port.checked_add(offset))
                    .map(|port| (tenant.name.clone(), port))
                    .ok_or_else(|| {
                        Error::Topology(format!("no listener port left for {}", tenant.name))
                    })
            })
            .collect()
    }

    /// Submits the plan. Returns `false` when creation failed and the
    /// iteration must skip straight to teardown.
    ///
    /// 提交计划。当创建失败且迭代必须直接跳到清理时返回 `false`。
    async fn create_topology(
        &self,
        plan: &TopologyPlan,
        state: &mut IterationState,
        report: &mut IterationReport,
    ) -> bool {
        let mut phase = PhaseReport::new(Phase::Topology);
        let created = match self.topology.apply(plan, &mut state.ledger).await {
            Ok(()) => {
                phase.push(Outcome::ok(Phase::Topology, Subject::Phase));
                true
            }
            Err(e) => {
                phase.push(Outcome::failed(Phase::Topology, Subject::Phase, e));
                false
            }
        };
        report.record(phase);
        if !created {
            warn!(
                iteration = plan.iteration,
                tenants = state.ledger.tenants.len(),
                networks = state.ledger.networks.len(),
                "Topology incomplete, tearing down what was created"
            );
        }
        created
    }

    /// Starts the workloads of every network concurrently.
    ///
    /// A network whose provisioning fails has no group afterwards and is left
    /// out of every probe; its siblings carry on.
    ///
    /// 并发启动每个网络的工作负载。
    ///
    /// 供应失败的网络之后没有分组，并被排除在所有探测之外；其兄弟网络照常继续。
    async fn provision(&self, networks: &[NetworkSpec], state: &IterationState) -> PhaseReport {
        info!(
            iteration = state.iteration,
            networks = networks.len(),
            per_network = self.config.mesh_workloads(),
            "Provisioning workloads"
        );

        let mut fan_out = FanOut::new(Phase::Provision, self.config.timing.operation_timeout);
        for network in networks {
            let fleet = self.fleet.clone();
            let sink = state.sink();
            let key = network.key();
            let target = network.attach_target();
            let count = self.config.mesh_workloads();
            let use_dns = self.config.use_dns;
            let options = self.config.provision_options.clone();

            fan_out.spawn(Subject::Network(key.clone()), async move {
                let members = fleet.provision(count, use_dns, &target, &options).await?;
                sink.insert(WorkloadGroup::new(key, members));
                Ok(())
            });
        }
        fan_out.wait().await
    }

    async fn settle(&self) {
        let delay = self.config.timing.settle_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Positive probes, one unit per group.
    ///
    /// 正向探测，每个分组一个单元。
    async fn reachability(&self, groups: &[WorkloadGroup]) -> PhaseReport {
        let mut fan_out = FanOut::new(Phase::Reachability, self.config.timing.operation_timeout);
        for group in groups {
            info!(network = %group.key, members = group.len(), "Running ping test");
            let verifier = self.verifier.clone();
            let group = group.clone();
            fan_out.spawn(Subject::Network(group.key.clone()), async move {
                verifier.ping_test(&group).await
            });
        }
        fan_out.wait().await
    }

    /// Negative probes, one unit per ordered pair of distinct groups.
    ///
    /// 负向探测，每个不同分组的有序对一个单元。
    async fn isolation(&self, groups: &[WorkloadGroup]) -> PhaseReport {
        let mut fan_out = FanOut::new(Phase::Isolation, self.config.timing.operation_timeout);
        for (from, to) in ordered_pairs(groups, |_, _| true) {
            let verifier = self.verifier.clone();
            let (from, to) = (from.clone(), to.clone());
            fan_out.spawn(Subject::Pair(from.key.clone(), to.key.clone()), async move {
                verifier.ping_failure_test(&from, &to).await
            });
        }
        info!(phase = %fan_out.phase(), pairs = fan_out.dispatched(), "Running ping failure tests");
        fan_out.wait().await
    }

    /// Listener connectivity inside each group, on its tenant's port.
    async fn listeners(&self, groups: &[WorkloadGroup], ports: &HashMap<String, u16>) -> PhaseReport {
        let mut fan_out = FanOut::new(Phase::Listeners, self.config.timing.operation_timeout);
        for group in groups {
            let subject = Subject::Network(group.key.clone());
            let Some(&port) = ports.get(&group.key.tenant) else {
                fan_out.spawn(subject, missing_port(group.key.tenant.clone()));
                continue;
            };
            let verifier = self.verifier.clone();
            let group = group.clone();
            fan_out.spawn(subject, async move {
                verifier.check_connections(&group, port).await
            });
        }
        fan_out.wait().await
    }

    /// No group may connect to a group of another tenant on that tenant's port.
    ///
    /// 任何分组都不能在另一个租户的端口上连接到该租户的分组。
    async fn tenant_isolation(
        &self,
        groups: &[WorkloadGroup],
        ports: &HashMap<String, u16>,
    ) -> PhaseReport {
        let mut fan_out = FanOut::new(Phase::Isolation, self.config.timing.operation_timeout);
        for (from, to) in ordered_pairs(groups, |a, b| a.key.tenant != b.key.tenant) {
            let subject = Subject::Pair(from.key.clone(), to.key.clone());
            let Some(&port) = ports.get(&to.key.tenant) else {
                fan_out.spawn(subject, missing_port(to.key.tenant.clone()));
                continue;
            };
            let verifier = self.verifier.clone();
            let (from, to) = (from.clone(), to.clone());
            fan_out.spawn(subject, async move {
                verifier.check_no_connections(&from, &to, port).await
            });
        }
        fan_out.wait().await
    }

    async fn teardown_everything(&self, state: &IterationState, report: &mut IterationReport) {
        if state.ledger.is_empty() {
            return;
        }
        let networks = state.ledger.networks.clone();
        let tenants = state.ledger.tenants.clone();
        for step in self.teardown.run(state, &networks, &tenants).await {
            report.record(step);
        }
    }
}

async fn missing_port(tenant: String) -> Result<()> {
    Err(Error::Topology(format!("tenant {tenant} has no listener port")))
}

fn planning_failed(mut report: IterationReport, error: Error) -> IterationReport {
    error!(iteration = report.iteration, %error, "Could not plan topology");
    let mut phase = PhaseReport::new(Phase::Topology);
    phase.push(Outcome::failed(Phase::Topology, Subject::Phase, error));
    report.record(phase);
    report
}
