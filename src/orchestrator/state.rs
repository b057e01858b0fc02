//! Iteration-scoped state shared between the coordinator and its workers.
//!
//! 在协调者与其工作者之间共享的迭代级状态。

use crate::{
    model::{NetworkKey, WorkloadGroup},
    topology::Ledger,
};
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};
use tracing::trace;

type GroupMap = HashMap<NetworkKey, WorkloadGroup>;

/// The mutable state of one iteration.
///
/// Owned by the coordinator. Workers only get a [`GroupSink`], whose lock is
/// held for a single insert; provisioning calls never run under it.
///
/// 一次迭代的可变状态。
///
/// 由协调者拥有。工作者只获得一个 [`GroupSink`]，其锁仅在单次插入期间持有；
/// 供应调用永远不会在锁内运行。
#[derive(Debug)]
pub struct IterationState {
    pub iteration: usize,
    /// Created tenants and networks, for teardown.
    /// 已创建的租户和网络，用于清理。
    pub ledger: Ledger,
    groups: Arc<Mutex<GroupMap>>,
}

impl IterationState {
    pub fn new(iteration: usize) -> Self {
        Self {
            iteration,
            ledger: Ledger::default(),
            groups: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// A write handle for provisioning workers.
    ///
    /// 供供应工作者使用的写句柄。
    pub fn sink(&self) -> GroupSink {
        GroupSink {
            groups: self.groups.clone(),
        }
    }

    /// A copy of the groups registered so far, sorted by key.
    ///
    /// Only meaningful after the provisioning barrier, when no writer remains.
    ///
    /// 迄今为止已注册的分组的副本，按键排序。仅在供应屏障之后有意义，此时已无写者。
    pub fn groups(&self) -> Vec<WorkloadGroup> {
        let mut groups: Vec<_> = self
            .groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        groups.sort_by(|a, b| a.key.cmp(&b.key));
        groups
    }

    /// Removes and returns the group of `key`. Teardown takes groups out so a
    /// removed workload can never be probed again.
    ///
    /// 移除并返回 `key` 的分组。清理时会取出分组，使已移除的工作负载不会再被探测。
    pub fn take_group(&self, key: &NetworkKey) -> Option<WorkloadGroup> {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key)
    }

    pub fn workload_count(&self) -> usize {
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(WorkloadGroup::len)
            .sum()
    }
}

/// Cloneable write access to the group map.
///
/// 对分组映射的可克隆写访问。
#[derive(Debug, Clone)]
pub struct GroupSink {
    groups: Arc<Mutex<GroupMap>>,
}

impl GroupSink {
    pub fn insert(&self, group: WorkloadGroup) {
        let key = group.key.clone();
        let members = group.len();
        self.groups
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), group);
        trace!(network = %key, members, "Workload group registered");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AttachTarget, WorkloadHandle};
    use std::net::Ipv4Addr;

    fn group(network: &str, size: u8) -> WorkloadGroup {
        let key = NetworkKey::new("default", network);
        let members = (0..size)
            .map(|i| WorkloadHandle {
                id: format!("{network}-{i}"),
                name: format!("{network}-{i}"),
                node: "node1".into(),
                address: Ipv4Addr::new(10, 1, 0, i + 1),
                target: AttachTarget::new(network, None),
            })
            .collect();
        WorkloadGroup::new(key, members)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sinks_write_disjoint_keys() {
        let state = IterationState::new(0);
        let mut handles = Vec::new();
        for i in 0..16 {
            let sink = state.sink();
            handles.push(tokio::spawn(async move {
                tokio::task::yield_now().await;
                sink.insert(group(&format!("net{i}-0"), 4));
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let groups = state.groups();
        assert_eq!(groups.len(), 16);
        assert_eq!(state.workload_count(), 64);
        // Sorted by key
        assert!(groups.windows(2).all(|w| w[0].key < w[1].key));
    }

    #[test]
    fn test_take_group_removes_it() {
        let state = IterationState::new(1);
        state.sink().insert(group("net0-1", 2));
        let key = NetworkKey::new("default", "net0-1");
        assert_eq!(state.groups().len(), 1);
        assert_eq!(state.take_group(&key).map(|g| g.len()), Some(2));
        assert!(state.take_group(&key).is_none());
        assert!(state.groups().is_empty());
        assert_eq!(state.workload_count(), 0);
    }
}
