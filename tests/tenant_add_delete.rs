//! Tenant add/delete and multi-tenant scenarios against the simulated cluster.
//! 针对模拟集群的租户增删与多租户场景。

pub mod common;

use common::harness::TestHarness;
use std::time::Duration;
use vnet_systest::{Phase, Scenario, model::ForwardingMode, sim::SimEvent};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_routing_is_ensured_only_for_vlan_tenants() {
    for (scenario, expected) in [
        (Scenario::TENANT_VLAN, true),
        (Scenario::TENANT_VXLAN, false),
        (Scenario::MULTI_TENANT_VLAN, true),
        (Scenario::MULTI_TENANT_VXLAN, false),
    ] {
        let harness = TestHarness::new(TestHarness::config(ForwardingMode::Routing, 4, 2));
        harness.orchestrator.run(scenario).await.unwrap();
        assert_eq!(harness.sim.routing_ready(), expected, "{scenario}");
        harness.assert_clean();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_tenant_is_torn_down_before_the_next() {
    let harness = TestHarness::new(TestHarness::config(ForwardingMode::Bridge, 6, 2));
    let suite = harness.orchestrator.run(Scenario::TENANT_VLAN).await.unwrap();

    // One provision/reachability/teardown round per tenant.
    let report = &suite.iterations[0];
    assert_eq!(report.phase(Phase::Reachability).count(), 3);
    assert_eq!(report.phase(Phase::DeleteTenant).count(), 3);

    let deleted: Vec<_> = harness
        .sim
        .journal()
        .into_iter()
        .filter_map(|e| match e {
            SimEvent::TenantDeleted(name) => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(deleted, vec!["tenant0", "tenant1", "tenant2"]);
    harness.assert_clean();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_tenant_creation_failure_rolls_back_created_tenants() {
    let harness = TestHarness::new(TestHarness::config(ForwardingMode::Bridge, 4, 2));
    harness.sim.faults().fail_tenant_create("tenant1");

    let report = harness.orchestrator.run_iteration(Scenario::TENANT_VXLAN, 0).await;
    let failures = report.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].phase, Phase::Topology);
    assert_eq!(report.phase(Phase::Provision).count(), 0);
    harness.assert_clean();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_every_scenario_passes_under_jitter() {
    for forwarding in [ForwardingMode::Bridge, ForwardingMode::Routing] {
        for scenario in Scenario::ALL {
            let mut config = TestHarness::config(forwarding, 8, 2);
            config.iterations = 2;
            let harness = TestHarness::with_jitter(config, Duration::from_millis(2));

            let suite = harness
                .orchestrator
                .run(scenario)
                .await
                .unwrap_or_else(|e| panic!("{scenario} under {forwarding}: {e}"));
            assert_eq!(suite.scenario, scenario.to_string());
            assert_eq!(suite.iterations.len(), 2);
            harness.assert_clean();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cross_tenant_leak_fails_multi_tenant_isolation() {
    let harness = TestHarness::new(TestHarness::config(ForwardingMode::Bridge, 4, 2));
    harness.sim.faults().leak("net0-0", "net0-0");

    // Same network name in two tenants: only the cross-tenant pair leaks.
    let report = harness
        .orchestrator
        .run_iteration(Scenario::MULTI_TENANT_VXLAN, 0)
        .await;
    let failures = report.failures();
    assert_eq!(failures.len(), 2);
    assert!(failures.iter().all(|f| f.phase == Phase::Isolation));
    harness.assert_clean();
}
