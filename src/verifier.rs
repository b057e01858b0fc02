//! Reachability probes over workload groups.
//!
//! Every check is exhaustive: all ordered pairs are probed, concurrently, and
//! the first failure in pair order is returned. Sampling would hide
//! asymmetric connectivity bugs.
//!
//! 针对工作负载分组的可达性探测。
//!
//! 每项检查都是穷尽式的：所有有序对都会被并发探测，并返回按对顺序的第一个失败。
//! 抽样会掩盖非对称的连通性缺陷。

use crate::{
    error::{Error, Result},
    model::{WorkloadGroup, WorkloadHandle},
    traits::Prober,
};
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, warn};

/// Composes the [`Prober`] primitives into group-level checks.
///
/// 将 [`Prober`] 原语组合为分组级别的检查。
pub struct ConnectivityVerifier<P: Prober> {
    prober: Arc<P>,
}

impl<P: Prober> Clone for ConnectivityVerifier<P> {
    fn clone(&self) -> Self {
        Self {
            prober: self.prober.clone(),
        }
    }
}

fn ordered_pairs(members: &[WorkloadHandle]) -> Vec<(&WorkloadHandle, &WorkloadHandle)> {
    members
        .iter()
        .enumerate()
        .flat_map(|(i, from)| {
            members
                .iter()
                .enumerate()
                .filter(move |(j, _)| *j != i)
                .map(move |(_, to)| (from, to))
        })
        .collect()
}

fn cross_pairs<'a>(
    from: &'a [WorkloadHandle],
    to: &'a [WorkloadHandle],
) -> Vec<(&'a WorkloadHandle, &'a WorkloadHandle)> {
    from.iter()
        .flat_map(|a| to.iter().map(move |b| (a, b)))
        .collect()
}

fn probe_error(from: &WorkloadHandle, to: &WorkloadHandle, error: Error) -> Error {
    Error::ProbeFailed {
        from: from.to_string(),
        to: to.to_string(),
        reason: error.to_string(),
    }
}

impl<P: Prober> ConnectivityVerifier<P> {
    pub fn new(prober: Arc<P>) -> Self {
        Self { prober }
    }

    /// Every member of `group` must reach every other member.
    ///
    /// 分组中的每个成员都必须能访问其他所有成员。
    pub async fn ping_test(&self, group: &WorkloadGroup) -> Result<()> {
        let pairs = ordered_pairs(&group.members);
        debug!(network = %group.key, pairs = pairs.len(), "Running ping test");

        let results = join_all(
            pairs
                .iter()
                .map(|(from, to)| self.prober.reach(from, to)),
        )
        .await;

        let mut first = None;
        let mut failed = 0usize;
        for ((from, to), result) in pairs.iter().zip(results) {
            let error = match result {
                Ok(true) => continue,
                Ok(false) => Error::Unreachable {
                    network: group.key.clone(),
                    from: from.to_string(),
                    to: to.to_string(),
                },
                Err(e) => probe_error(from, to, e),
            };
            failed += 1;
            first.get_or_insert(error);
        }

        match first {
            None => Ok(()),
            Some(error) => {
                warn!(network = %group.key, failed, total = pairs.len(), "Ping test failed");
                Err(error)
            }
        }
    }

    /// No member of `from` may reach any member of `to`.
    ///
    /// `from` 中的任何成员都不能访问 `to` 中的任何成员。
    pub async fn ping_failure_test(&self, from: &WorkloadGroup, to: &WorkloadGroup) -> Result<()> {
        let pairs = cross_pairs(&from.members, &to.members);
        debug!(from = %from.key, to = %to.key, pairs = pairs.len(), "Running ping failure test");

        let results = join_all(pairs.iter().map(|(a, b)| self.prober.reach(a, b))).await;

        let mut first = None;
        let mut leaked = 0usize;
        for ((a, b), result) in pairs.iter().zip(results) {
            let error = match result {
                Ok(false) => continue,
                Ok(true) => Error::UnexpectedReachability {
                    from_network: from.key.clone(),
                    to_network: to.key.clone(),
                    from: a.to_string(),
                    to: b.to_string(),
                },
                Err(e) => probe_error(a, b, e),
            };
            leaked += 1;
            first.get_or_insert(error);
        }

        match first {
            None => Ok(()),
            Some(error) => {
                warn!(from = %from.key, to = %to.key, leaked, "Isolation violated");
                Err(error)
            }
        }
    }

    /// Starts a listener on `port` in every member of `group`, then checks every
    /// member can connect to every other member on that port.
    ///
    /// 在分组每个成员内的 `port` 上启动监听，然后检查每个成员都能在该端口上连接到其他所有成员。
    pub async fn check_connections(&self, group: &WorkloadGroup, port: u16) -> Result<()> {
        let started = join_all(
            group
                .members
                .iter()
                .map(|member| self.prober.start_listener(member, port)),
        )
        .await;
        if let Some(error) = started.into_iter().find_map(Result::err) {
            return Err(error);
        }

        let pairs = ordered_pairs(&group.members);
        let results = join_all(
            pairs
                .iter()
                .map(|(from, to)| self.prober.connect(from, to, port)),
        )
        .await;

        for ((from, to), result) in pairs.iter().zip(results) {
            match result {
                Ok(true) => {}
                Ok(false) => {
                    return Err(Error::Unreachable {
                        network: group.key.clone(),
                        from: format!("{from}"),
                        to: format!("{to}:{port}"),
                    });
                }
                Err(e) => return Err(probe_error(from, to, e)),
            }
        }
        Ok(())
    }

    /// No member of `from` may connect to any member of `to` on `port`.
    ///
    /// `from` 中的任何成员都不能在 `port` 上连接到 `to` 中的任何成员。
    pub async fn check_no_connections(
        &self,
        from: &WorkloadGroup,
        to: &WorkloadGroup,
        port: u16,
    ) -> Result<()> {
        let pairs = cross_pairs(&from.members, &to.members);
        let results = join_all(pairs.iter().map(|(a, b)| self.prober.connect(a, b, port))).await;

        for ((a, b), result) in pairs.iter().zip(results) {
            match result {
                Ok(false) => {}
                Ok(true) => {
                    return Err(Error::UnexpectedReachability {
                        from_network: from.key.clone(),
                        to_network: to.key.clone(),
                        from: a.to_string(),
                        to: format!("{b}:{port}"),
                    });
                }
                Err(e) => return Err(probe_error(a, b, e)),
            }
        }
        Ok(())
    }
}
