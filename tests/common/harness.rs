//! tests/common/harness.rs
use std::{
    sync::{Arc, Once},
    time::Duration,
};
use vnet_systest::{
    Orchestrator, SuiteConfig, TimingConfig, model::ForwardingMode, sim::SimCluster,
};

/// Initializes tracing for tests, ensuring it's only done once.
pub fn init_tracing() {
    static TRACING_INIT: Once = Once::new();
    TRACING_INIT.call_once(|| {
        let filter =
            std::env::var("RUST_LOG").unwrap_or_else(|_| "vnet_systest=debug".to_string());
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .init();
    });
}

pub type SimOrchestrator = Orchestrator<SimCluster, SimCluster, SimCluster>;

/// A simulated cluster plus an orchestrator wired to it.
///
/// 一个模拟集群以及与之连接的编排器。
pub struct TestHarness {
    pub sim: Arc<SimCluster>,
    pub orchestrator: SimOrchestrator,
}

impl TestHarness {
    /// A suite with no settle delay, so tests do not sleep.
    pub fn config(forwarding: ForwardingMode, workloads: usize, nodes: usize) -> SuiteConfig {
        SuiteConfig {
            forwarding,
            workloads,
            nodes: (1..=nodes).map(|i| format!("node{i}")).collect(),
            timing: TimingConfig {
                settle_delay: Duration::ZERO,
                operation_timeout: Some(Duration::from_secs(10)),
            },
            ..Default::default()
        }
    }

    pub fn new(config: SuiteConfig) -> Self {
        Self::with_sim(SimCluster::for_config(&config), config)
    }

    /// Like [`TestHarness::new`], with every simulated call delayed by up to `max`.
    pub fn with_jitter(config: SuiteConfig, max: Duration) -> Self {
        Self::with_sim(SimCluster::for_config(&config).with_jitter(max), config)
    }

    fn with_sim(sim: SimCluster, config: SuiteConfig) -> Self {
        init_tracing();
        let sim = Arc::new(sim);
        let orchestrator = Orchestrator::new(config, sim.clone(), sim.clone(), sim.clone())
            .expect("test config must be valid");
        Self { sim, orchestrator }
    }

    /// Asserts the simulated cluster holds nothing the suite created.
    pub fn assert_clean(&self) {
        assert!(self.sim.live_networks().is_empty(), "networks left behind");
        assert!(self.sim.live_tenants().is_empty(), "tenants left behind");
        assert_eq!(self.sim.live_workloads(), 0, "workloads left behind");
    }
}
