#![deny(clippy::expect_used, clippy::unwrap_used)]

//! End-to-end verification of a virtual networking control plane.
//! 虚拟网络控制平面的端到端验证。
//!
//! The crate creates networks and tenants, attaches workloads to them, probes
//! reachability inside and across networks, and tears everything down again,
//! running each phase concurrently across networks.
//!
//! 本库创建网络和租户，为其挂载工作负载，探测网络内和跨网络的可达性，
//! 然后再全部清理，每个阶段都跨网络并发执行。

pub mod config;
pub mod error;
pub mod model;
pub mod orchestrator;
pub mod scenario;
pub mod sim;
pub mod teardown;
pub mod topology;
pub mod traits;
pub mod verifier;

pub use config::{SuiteConfig, TimingConfig};
pub use error::{Error, Failure, Phase, Result, Subject};
pub use orchestrator::{IterationReport, Orchestrator, SuiteReport};
pub use scenario::{Flow, Scenario};
pub use traits::{ControlPlane, Fleet, Prober, ProvisionOptions};
