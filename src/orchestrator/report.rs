//! Outcome aggregation: from single units up to a whole scenario run.
//!
//! 结果聚合：从单个单元一直到整个场景运行。

use crate::error::{Error, Failure, Phase, Result, Subject};

/// What one unit of work reported.
///
/// 一个工作单元所报告的内容。
#[derive(Debug)]
pub struct Outcome {
    pub phase: Phase,
    pub subject: Subject,
    pub result: Result<()>,
}

impl Outcome {
    pub fn ok(phase: Phase, subject: Subject) -> Self {
        Self {
            phase,
            subject,
            result: Ok(()),
        }
    }

    pub fn failed(phase: Phase, subject: Subject, error: Error) -> Self {
        Self {
            phase,
            subject,
            result: Err(error),
        }
    }

    fn failure(&self) -> Option<Failure> {
        self.result.as_ref().err().map(|error| Failure {
            phase: self.phase,
            subject: self.subject.clone(),
            error: error.clone(),
        })
    }
}

/// Every outcome of one phase, in arrival order.
///
/// 一个阶段的所有结果，按到达顺序排列。
#[derive(Debug)]
pub struct PhaseReport {
    pub phase: Phase,
    outcomes: Vec<Outcome>,
    broken: Option<Failure>,
}

impl PhaseReport {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            outcomes: Vec::new(),
            broken: None,
        }
    }

    pub fn push(&mut self, outcome: Outcome) {
        self.outcomes.push(outcome);
    }

    pub(crate) fn broken(&mut self, expected: usize, received: usize) {
        self.broken = Some(Failure {
            phase: self.phase,
            subject: Subject::Phase,
            error: Error::BarrierBroken { expected, received },
        });
    }

    /// Number of outcomes received.
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn outcomes(&self) -> &[Outcome] {
        &self.outcomes
    }

    /// Subjects whose unit succeeded.
    ///
    /// 单元成功的对象。
    pub fn succeeded(&self) -> impl Iterator<Item = &Subject> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| &o.subject)
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.outcomes
            .iter()
            .filter_map(Outcome::failure)
            .chain(self.broken.clone())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.broken.is_none() && self.outcomes.iter().all(|o| o.result.is_ok())
    }
}

/// Every phase of one iteration.
///
/// 一次迭代的所有阶段。
#[derive(Debug)]
pub struct IterationReport {
    pub iteration: usize,
    pub phases: Vec<PhaseReport>,
}

impl IterationReport {
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            phases: Vec::new(),
        }
    }

    pub fn record(&mut self, report: PhaseReport) {
        self.phases.push(report);
    }

    /// Reports for `phase`, in execution order. Tenant scenarios run a phase once per tenant.
    ///
    /// `phase` 的报告，按执行顺序排列。租户场景中每个租户运行一次该阶段。
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &PhaseReport> {
        self.phases.iter().filter(move |r| r.phase == phase)
    }

    pub fn failures(&self) -> Vec<Failure> {
        self.phases.iter().flat_map(PhaseReport::failures).collect()
    }

    pub fn is_success(&self) -> bool {
        self.phases.iter().all(PhaseReport::is_success)
    }

    /// The iteration verdict: `Ok` only if every phase succeeded.
    ///
    /// 迭代裁决：仅当所有阶段都成功时为 `Ok`。
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Iteration {
                iteration: self.iteration,
                failures: self.failures(),
            })
        }
    }
}

/// The reports of a scenario run whose iterations all passed.
#[derive(Debug)]
pub struct SuiteReport {
    pub scenario: String,
    pub iterations: Vec<IterationReport>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkKey;

    fn net(name: &str) -> Subject {
        Subject::Network(NetworkKey::new("default", name))
    }

    #[test]
    fn test_iteration_keeps_every_failure() {
        let mut provision = PhaseReport::new(Phase::Provision);
        provision.push(Outcome::ok(Phase::Provision, net("net0-0")));
        provision.push(Outcome::failed(
            Phase::Provision,
            net("net1-0"),
            Error::Provision {
                target: "net1-0".into(),
                reason: "no capacity".into(),
            },
        ));

        let mut teardown = PhaseReport::new(Phase::DeleteNetwork);
        teardown.push(Outcome::failed(
            Phase::DeleteNetwork,
            net("net1-0"),
            Error::DependencyFailed {
                target: "default/net1-0".into(),
                reason: "workloads not removed".into(),
            },
        ));

        let mut report = IterationReport::new(3);
        report.record(provision);
        report.record(teardown);
        assert!(!report.is_success());

        match report.into_result() {
            Err(Error::Iteration {
                iteration,
                failures,
            }) => {
                assert_eq!(iteration, 3);
                assert_eq!(failures.len(), 2);
                assert_eq!(failures[0].phase, Phase::Provision);
                assert_eq!(failures[1].phase, Phase::DeleteNetwork);
                assert!(failures[0].to_string().contains("net1-0"));
            }
            other => panic!("expected iteration failure, got {other:?}"),
        }
    }

    #[test]
    fn test_broken_barrier_is_a_failure() {
        let mut report = PhaseReport::new(Phase::Reachability);
        report.push(Outcome::ok(Phase::Reachability, net("net0-0")));
        report.broken(2, 1);
        assert!(!report.is_success());
        assert!(matches!(
            report.failures()[0].error,
            Error::BarrierBroken {
                expected: 2,
                received: 1
            }
        ));
        assert_eq!(report.succeeded().count(), 1);
    }
}
