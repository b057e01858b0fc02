//! The fixed-count fan-out/fan-in barrier.
//!
//! Every unit of work spawned through a [`FanOut`] reports exactly one
//! [`Outcome`] on a shared channel, whether it succeeds, fails, times out or
//! panics. [`FanOut::wait`] then receives exactly as many outcomes as units
//! were dispatched.
//!
//! 固定计数的扇出/扇入屏障。
//!
//! 通过 [`FanOut`] 派生的每个工作单元都会在共享通道上恰好报告一个 [`Outcome`]，
//! 无论其成功、失败、超时还是 panic。随后 [`FanOut::wait`] 接收与已分派单元数量
//! 完全相同的结果。

use super::report::{Outcome, PhaseReport};
use crate::error::{Error, Phase, Result, Subject};
use std::{future::Future, time::Duration};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Runs `fut` under an optional deadline.
///
/// 在可选的截止时间下运行 `fut`。
pub(crate) async fn with_deadline<T, F>(
    deadline: Option<Duration>,
    operation: impl FnOnce() -> String,
    fut: F,
) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match deadline {
        None => fut.await,
        Some(after) => match tokio::time::timeout(after, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: operation(),
                after,
            }),
        },
    }
}

/// Progress of one barrier.
///
/// 单个屏障的进度。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    /// `K` units are running and none has reported yet.
    Dispatched(usize),
    /// `received` of `expected` outcomes have arrived.
    Collecting { received: usize, expected: usize },
    /// Every outcome has arrived. Terminal.
    Satisfied(usize),
}

impl BarrierState {
    fn advance(self) -> Self {
        match self {
            BarrierState::Dispatched(expected) => BarrierState::Collecting {
                received: 1,
                expected,
            }
            .settle(),
            BarrierState::Collecting { received, expected } => BarrierState::Collecting {
                received: received + 1,
                expected,
            }
            .settle(),
            satisfied @ BarrierState::Satisfied(_) => satisfied,
        }
    }

    fn settle(self) -> Self {
        match self {
            BarrierState::Collecting { received, expected } if received >= expected => {
                BarrierState::Satisfied(expected)
            }
            other => other,
        }
    }

    pub fn is_satisfied(self) -> bool {
        matches!(self, BarrierState::Satisfied(_))
    }
}

/// One fan-out/fan-in round for a single phase.
///
/// Created, filled with [`spawn`](Self::spawn), then consumed by
/// [`wait`](Self::wait). It cannot be reused once satisfied.
///
/// 单个阶段的一轮扇出/扇入。
///
/// 先创建，再通过 [`spawn`](Self::spawn) 填充，最后由 [`wait`](Self::wait) 消费。
/// 一旦满足便不能再复用。
pub struct FanOut {
    phase: Phase,
    deadline: Option<Duration>,
    tx: mpsc::Sender<Outcome>,
    rx: mpsc::Receiver<Outcome>,
    dispatched: usize,
}

impl FanOut {
    /// Creates an empty barrier. `deadline` bounds every unit it spawns.
    ///
    /// 创建一个空屏障。`deadline` 约束它所派生的每个单元。
    pub fn new(phase: Phase, deadline: Option<Duration>) -> Self {
        // A single slot: workers hand their outcome over one at a time.
        let (tx, rx) = mpsc::channel(1);
        Self {
            phase,
            deadline,
            tx,
            rx,
            dispatched: 0,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    /// Launches one unit of work for `subject`.
    ///
    /// The work runs in its own task; a supervising task awaits it and sends
    /// the outcome, so a panic or an expired deadline still produces a send.
    ///
    /// 为 `subject` 启动一个工作单元。
    ///
    /// 工作在自己的任务中运行；一个监督任务等待它并发送结果，
    /// 因此 panic 或截止时间到期仍然会产生一次发送。
    pub fn spawn<F>(&mut self, subject: Subject, work: F)
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        self.dispatched += 1;
        let tx = self.tx.clone();
        let phase = self.phase;
        let deadline = self.deadline;
        let label = subject.to_string();

        tokio::spawn(async move {
            let operation = format!("{phase} for {label}");
            let bounded = with_deadline(deadline, move || operation, work);
            let result = match tokio::spawn(bounded).await {
                Ok(result) => result,
                Err(join_error) => Err(Error::WorkerAborted {
                    subject: label,
                    reason: join_error.to_string(),
                }),
            };

            if let Err(e) = &result {
                debug!(%phase, %subject, error = %e, "Unit of work failed");
            }
            let outcome = Outcome {
                phase,
                subject,
                result,
            };
            if tx.send(outcome).await.is_err() {
                // The coordinator only drops the receiver after the barrier.
                warn!(%phase, "Outcome dropped: barrier receiver is gone");
            }
        });
    }

    /// Blocks until every dispatched unit has reported.
    ///
    /// No outcome short-circuits the wait. If the channel closes early, the
    /// missing outcomes are reported as one [`Error::BarrierBroken`].
    ///
    /// 阻塞直到每个已分派单元都已报告。
    ///
    /// 任何结果都不会使等待短路。如果通道提前关闭，缺失的结果会作为一个
    /// [`Error::BarrierBroken`] 报告。
    pub async fn wait(self) -> PhaseReport {
        let FanOut {
            phase,
            tx,
            mut rx,
            dispatched,
            ..
        } = self;
        // Our own sender must not keep the channel open.
        drop(tx);

        let mut report = PhaseReport::new(phase);
        if dispatched == 0 {
            return report;
        }

        let mut state = BarrierState::Dispatched(dispatched);
        while !state.is_satisfied() {
            match rx.recv().await {
                Some(outcome) => {
                    report.push(outcome);
                    state = state.advance();
                    trace!(%phase, ?state, "Outcome received");
                }
                None => {
                    let received = report.len();
                    warn!(%phase, expected = dispatched, received, "Barrier broken");
                    report.broken(dispatched, received);
                    break;
                }
            }
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NetworkKey;
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    fn subject(i: usize) -> Subject {
        Subject::Network(NetworkKey::new("default", format!("net{i}-0")))
    }

    #[test]
    fn test_barrier_state_transitions() {
        let mut state = BarrierState::Dispatched(3);
        state = state.advance();
        assert_eq!(
            state,
            BarrierState::Collecting {
                received: 1,
                expected: 3
            }
        );
        state = state.advance().advance();
        assert_eq!(state, BarrierState::Satisfied(3));
        // Terminal
        assert_eq!(state.advance(), BarrierState::Satisfied(3));

        assert!(BarrierState::Dispatched(1).advance().is_satisfied());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_every_unit_reports_despite_failures() {
        const UNITS: usize = 32;
        let completed = Arc::new(AtomicUsize::new(0));
        let mut fan_out = FanOut::new(Phase::Reachability, None);

        for i in 0..UNITS {
            let completed = completed.clone();
            fan_out.spawn(subject(i), async move {
                tokio::time::sleep(Duration::from_millis((UNITS - i) as u64)).await;
                completed.fetch_add(1, Ordering::SeqCst);
                if i % 3 == 0 {
                    Err(Error::Provision {
                        target: format!("net{i}-0"),
                        reason: "boom".into(),
                    })
                } else {
                    Ok(())
                }
            });
        }
        assert_eq!(fan_out.dispatched(), UNITS);
        assert_eq!(fan_out.phase(), Phase::Reachability);

        let report = fan_out.wait().await;
        assert_eq!(report.len(), UNITS);
        assert_eq!(completed.load(Ordering::SeqCst), UNITS);
        assert_eq!(report.failures().len(), (0..UNITS).filter(|i| i % 3 == 0).count());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_panicking_unit_still_reports() {
        let mut fan_out = FanOut::new(Phase::Provision, None);
        fan_out.spawn(subject(0), async { Ok(()) });
        let explode = true;
        fan_out.spawn(subject(1), async move {
            if explode {
                panic!("worker exploded");
            }
            Ok(())
        });
        fan_out.spawn(subject(2), async { Ok(()) });

        let report = fan_out.wait().await;
        assert_eq!(report.len(), 3);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].subject, subject(1));
        assert!(matches!(failures[0].error, Error::WorkerAborted { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_turns_hang_into_timeout() {
        let mut fan_out = FanOut::new(Phase::Provision, Some(Duration::from_secs(10)));
        fan_out.spawn(subject(0), async {
            std::future::pending::<()>().await;
            Ok(())
        });
        fan_out.spawn(subject(1), async { Ok(()) });

        let report = fan_out.wait().await;
        assert_eq!(report.len(), 2);
        let failures = report.failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0].error, Error::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_empty_barrier_is_immediately_satisfied() {
        let report = FanOut::new(Phase::Isolation, None).wait().await;
        assert_eq!(report.len(), 0);
        assert!(report.is_success());
    }
}
