//! Lock wait-for graph of a single dump.
//!
//! Nodes are thread identities. An edge `waiter → owner` exists when the
//! waiter is blocked on a lock that the owner reports as `locked`. Each thread
//! resolves to at most one waited-on lock (see
//! [`super::locks::resolve_waited_lock`]), so every node has zero or one
//! outgoing edge and chains are simple paths that may end in a cycle.
//!
//! ```text
//! T1 ──(0xA)──► T2 ──(0xB)──► T3        chain [T1, T2, T3]
//! T4 ──(0xC)──┐
//!             ├──► T6                   contention on 0xC (2 waiters)
//! T5 ──(0xC)──┘
//! ```
//!
//! All maps are `BTreeMap`/`BTreeSet` keyed by [`ThreadId`], so iteration order,
//! and therefore every reported list, is deterministic.

use super::locks::{resolve_waited_lock, LockResolution};
use crate::classification::{classify_thread, Category};
use crate::domain::{DiagnosticsError, DumpSequence};
use log::{debug, trace, warn};
use serde::Serialize;
use stallwatch_common::{DumpSnapshot, ThreadId, ThreadSnapshot};
use std::collections::{BTreeMap, BTreeSet};

/// `waiter` is blocked on `lock_id`, which `owner` holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DependencyEdge<'a> {
    pub waiter: ThreadId,
    pub owner: ThreadId,
    pub lock_id: &'a str,
}

/// Two or more threads blocked on the same lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentionGroup<'a> {
    pub lock_id: &'a str,
    pub owner: ThreadId,
    /// Ascending thread id
    pub waiters: Vec<ThreadId>,
}

/// A path along wait-for edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chain {
    /// First waiter first; the last entry is the final blocker
    pub threads: Vec<ThreadId>,
    /// The last entry waits on a thread already in `threads`
    pub closes_cycle: bool,
}

impl Chain {
    /// More than a plain waiter → owner pair.
    #[must_use]
    pub fn is_multi_hop(&self) -> bool {
        self.closes_cycle || self.threads.len() > 2
    }
}

#[derive(Debug, Clone, Default)]
pub struct WaitGraph<'a> {
    threads: BTreeMap<ThreadId, &'a ThreadSnapshot>,

    /// Sorted by waiter; at most one per waiter
    edges: Vec<DependencyEdge<'a>>,

    /// waiter → index into `edges`
    outgoing: BTreeMap<ThreadId, usize>,
}

impl<'a> WaitGraph<'a> {
    /// Build the graph for the most recent dump of `dumps`.
    ///
    /// An empty sequence yields an empty graph.
    ///
    /// # Errors
    ///
    /// See [`WaitGraph::build`].
    pub fn from_sequence(
        dumps: &'a DumpSequence,
        policy: LockResolution,
    ) -> Result<Self, DiagnosticsError> {
        match dumps.latest() {
            Some(dump) => Self::build(dump, policy),
            None => Ok(Self::default()),
        }
    }

    /// Build the graph for one dump.
    ///
    /// # Errors
    ///
    /// Returns [`DiagnosticsError::AmbiguousWait`] under
    /// [`LockResolution::Strict`] when a thread reports several blocking
    /// lock lines.
    pub fn build(dump: &'a DumpSnapshot, policy: LockResolution) -> Result<Self, DiagnosticsError> {
        let mut threads: BTreeMap<ThreadId, &'a ThreadSnapshot> = BTreeMap::new();
        let mut owners: BTreeMap<&'a str, ThreadId> = BTreeMap::new();

        for thread in &dump.threads {
            match threads.get(&thread.id) {
                Some(first) => warn!(
                    "Thread {} reported twice ({} and {}); keeping the first",
                    thread.id, first.name, thread.name
                ),
                None => {
                    threads.insert(thread.id, thread);
                }
            }

            for lock in thread.held_locks() {
                match owners.get(lock.lock_id.as_str()) {
                    Some(&owner) if owner != thread.id => warn!(
                        "Lock <{}> claimed by both {} and {}; keeping {}",
                        lock.lock_id, owner, thread.id, owner
                    ),
                    Some(_) => {}
                    None => {
                        owners.insert(&lock.lock_id, thread.id);
                    }
                }
            }
        }

        let mut edges = Vec::new();
        for thread in threads.values().copied() {
            let Some(lock) = resolve_waited_lock(thread, policy)? else {
                continue;
            };
            match owners.get(lock.lock_id.as_str()) {
                Some(&owner) if owner != thread.id => edges.push(DependencyEdge {
                    waiter: thread.id,
                    owner,
                    lock_id: &lock.lock_id,
                }),
                Some(_) => trace!("{} waits on <{}> which it holds itself", thread.id, lock.lock_id),
                None => trace!("{} waits on <{}> with no visible owner", thread.id, lock.lock_id),
            }
        }

        let outgoing = edges.iter().enumerate().map(|(i, e)| (e.waiter, i)).collect();

        debug!(
            "Wait graph: {} threads, {} owned locks, {} dependency edges",
            threads.len(),
            owners.len(),
            edges.len()
        );

        Ok(Self { threads, edges, outgoing })
    }

    /// All edges, ascending by waiter.
    #[must_use]
    pub fn edges(&self) -> &[DependencyEdge<'a>] {
        &self.edges
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// Number of threads with an outgoing edge.
    #[must_use]
    pub fn waiting_thread_count(&self) -> usize {
        self.outgoing.len()
    }

    /// The edge leaving `waiter`, if it waits on another thread.
    #[must_use]
    pub fn edge_from(&self, waiter: ThreadId) -> Option<&DependencyEdge<'a>> {
        self.outgoing.get(&waiter).map(|&i| &self.edges[i])
    }

    /// The thread `waiter` waits on.
    #[must_use]
    pub fn owner_of(&self, waiter: ThreadId) -> Option<ThreadId> {
        self.edge_from(waiter).map(|edge| edge.owner)
    }

    /// The captured thread behind a node.
    #[must_use]
    pub fn thread(&self, id: ThreadId) -> Option<&'a ThreadSnapshot> {
        self.threads.get(&id).copied()
    }

    /// Activity label for any node, waiter or owner.
    #[must_use]
    pub fn category(&self, id: ThreadId) -> Option<Category> {
        self.thread(id).map(classify_thread)
    }

    /// Locks with more than one waiter, largest group first (ties by lock id).
    #[must_use]
    pub fn contention_groups(&self) -> Vec<ContentionGroup<'a>> {
        let mut by_lock: BTreeMap<&'a str, ContentionGroup<'a>> = BTreeMap::new();
        for edge in &self.edges {
            by_lock
                .entry(edge.lock_id)
                .or_insert_with(|| ContentionGroup {
                    lock_id: edge.lock_id,
                    owner: edge.owner,
                    waiters: Vec::new(),
                })
                .waiters
                .push(edge.waiter);
        }

        let mut groups: Vec<_> = by_lock.into_values().filter(|g| g.waiters.len() > 1).collect();
        groups.sort_by(|a, b| b.waiters.len().cmp(&a.waiters.len()));
        groups
    }

    /// Threads that both wait on someone and are waited on.
    #[must_use]
    pub fn chained_threads(&self) -> BTreeSet<ThreadId> {
        let waited_on: BTreeSet<ThreadId> = self.edges.iter().map(|e| e.owner).collect();
        self.outgoing
            .keys()
            .copied()
            .filter(|id| waited_on.contains(id))
            .collect()
    }

    /// Every chain, each starting at a waiter.
    ///
    /// Waiters nobody waits on are followed first, in ascending id. Waiters
    /// still unvisited afterwards sit on pure cycles and start a chain each,
    /// also in ascending id. Following stops at a thread that waits on nobody
    /// or at a thread already in the current chain.
    #[must_use]
    pub fn chains(&self) -> Vec<Chain> {
        let waited_on: BTreeSet<ThreadId> = self.edges.iter().map(|e| e.owner).collect();
        let roots = self.outgoing.keys().filter(|id| !waited_on.contains(id));
        let starts = roots.chain(self.outgoing.keys()).copied();

        let mut visited = BTreeSet::new();
        let mut chains = Vec::new();
        for start in starts {
            if !visited.contains(&start) {
                chains.push(self.follow(start, &mut visited));
            }
        }
        chains
    }

    fn follow(&self, start: ThreadId, visited: &mut BTreeSet<ThreadId>) -> Chain {
        let mut threads = Vec::new();
        let mut in_chain = BTreeSet::new();
        let mut closes_cycle = false;
        let mut current = Some(start);

        while let Some(id) = current {
            if !in_chain.insert(id) {
                closes_cycle = true;
                break;
            }
            threads.push(id);
            visited.insert(id);
            current = self.owner_of(id);
        }

        Chain { threads, closes_cycle }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stallwatch_common::{LockObservation, StackFrame, ThreadState, Timestamp};

    fn thread(id: u64) -> ThreadSnapshot {
        ThreadSnapshot::new(ThreadId(id), format!("t{id}"), ThreadState::Blocked)
    }

    fn dump(threads: Vec<ThreadSnapshot>) -> DumpSnapshot {
        DumpSnapshot::new(Timestamp(0), threads)
    }

    fn ids(raw: &[u64]) -> Vec<ThreadId> {
        raw.iter().copied().map(ThreadId).collect()
    }

    #[test]
    fn test_three_thread_chain() {
        let d = dump(vec![
            thread(1).with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object")),
            thread(2)
                .with_lock(LockObservation::waiting_to_lock("0xB", "java.lang.Object"))
                .with_lock(LockObservation::locked("0xA", "java.lang.Object")),
            ThreadSnapshot::new(ThreadId(3), "t3", ThreadState::Runnable)
                .with_lock(LockObservation::locked("0xB", "java.lang.Object")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();

        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.chains(), vec![Chain { threads: ids(&[1, 2, 3]), closes_cycle: false }]);
        assert!(graph.chains()[0].is_multi_hop());
        assert_eq!(graph.chained_threads(), BTreeSet::from([ThreadId(2)]));
        assert!(graph.contention_groups().is_empty());
    }

    #[test]
    fn test_contention_group() {
        let d = dump(vec![
            thread(1).with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object")),
            thread(2).with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object")),
            ThreadSnapshot::new(ThreadId(3), "owner", ThreadState::Runnable)
                .with_lock(LockObservation::locked("0xA", "java.lang.Object")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();

        assert_eq!(graph.edges().len(), 2);
        assert_eq!(graph.waiting_thread_count(), 2);
        assert_eq!(
            graph.contention_groups(),
            vec![ContentionGroup { lock_id: "0xA", owner: ThreadId(3), waiters: ids(&[1, 2]) }]
        );
        assert!(graph.chained_threads().is_empty());
        assert!(graph.chains().iter().all(|c| !c.is_multi_hop()));
    }

    #[test]
    fn test_cycle_is_reported_once() {
        let d = dump(vec![
            thread(1)
                .with_lock(LockObservation::waiting_to_lock("0xB", "java.lang.Object"))
                .with_lock(LockObservation::locked("0xA", "java.lang.Object")),
            thread(2)
                .with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object"))
                .with_lock(LockObservation::locked("0xB", "java.lang.Object")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();
        assert_eq!(graph.chains(), vec![Chain { threads: ids(&[1, 2]), closes_cycle: true }]);
        assert_eq!(graph.chained_threads().len(), 2);
    }

    #[test]
    fn test_tail_into_cycle() {
        let d = dump(vec![
            thread(1).with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object")),
            thread(2)
                .with_lock(LockObservation::waiting_to_lock("0xB", "java.lang.Object"))
                .with_lock(LockObservation::locked("0xA", "java.lang.Object")),
            thread(3)
                .with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object"))
                .with_lock(LockObservation::locked("0xB", "java.lang.Object")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();
        assert_eq!(graph.chains(), vec![Chain { threads: ids(&[1, 2, 3]), closes_cycle: true }]);
    }

    #[test]
    fn test_self_wait_and_unowned_lock_produce_no_edge() {
        let d = dump(vec![
            thread(1)
                .with_lock(LockObservation::waiting_on("0xA", "java.lang.Object"))
                .with_lock(LockObservation::locked("0xA", "java.lang.Object")),
            thread(2).with_lock(LockObservation::parking("0xF", "java.util.concurrent.locks.AbstractQueuedSynchronizer$ConditionObject")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();
        assert!(graph.is_empty());
        assert!(graph.chains().is_empty());
    }

    #[test]
    fn test_first_owner_wins_on_conflict() {
        let d = dump(vec![
            thread(5).with_lock(LockObservation::locked("0xA", "java.lang.Object")),
            thread(6).with_lock(LockObservation::locked("0xA", "java.lang.Object")),
            thread(7).with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();
        assert_eq!(graph.owner_of(ThreadId(7)), Some(ThreadId(5)));
    }

    #[test]
    fn test_category_labels_owner_and_waiter() {
        let d = dump(vec![
            ThreadSnapshot::new(ThreadId(1), "waiter", ThreadState::Waiting)
                .with_frame(StackFrame::new("jdk.internal.misc.Unsafe", "park"))
                .with_lock(LockObservation::parking("0xA", "java.util.concurrent.locks.ReentrantLock$NonfairSync")),
            ThreadSnapshot::new(ThreadId(2), "reader", ThreadState::Runnable)
                .with_frame(StackFrame::new("java.net.SocketInputStream", "read"))
                .with_lock(LockObservation::locked("0xA", "java.util.concurrent.locks.ReentrantLock$NonfairSync")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();
        assert_eq!(graph.category(ThreadId(1)), Some(Category::LockWait));
        assert_eq!(graph.category(ThreadId(2)), Some(Category::NetworkRead));
        assert_eq!(graph.category(ThreadId(9)), None);
    }

    #[test]
    fn test_strict_policy_propagates() {
        let d = dump(vec![
            thread(1)
                .with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object"))
                .with_lock(LockObservation::parking("0xB", "java.lang.Object")),
        ]);
        assert!(WaitGraph::build(&d, LockResolution::TieBreak).is_ok());
        assert!(matches!(
            WaitGraph::build(&d, LockResolution::Strict),
            Err(DiagnosticsError::AmbiguousWait { .. })
        ));
    }

    #[test]
    fn test_empty_sequence_gives_empty_graph() {
        let dumps = DumpSequence::default();
        let graph = WaitGraph::from_sequence(&dumps, LockResolution::TieBreak).unwrap();
        assert!(graph.is_empty());
        assert!(graph.contention_groups().is_empty());
    }

    #[test]
    fn test_duplicate_thread_id_keeps_first() {
        let d = dump(vec![
            thread(1),
            ThreadSnapshot::new(ThreadId(1), "t1-again", ThreadState::Blocked)
                .with_lock(LockObservation::waiting_to_lock("0xA", "java.lang.Object")),
            thread(2).with_lock(LockObservation::locked("0xA", "java.lang.Object")),
        ]);
        let graph = WaitGraph::build(&d, LockResolution::TieBreak).unwrap();
        assert_eq!(graph.thread(ThreadId(1)).map(|t| t.name.as_str()), Some("t1"));
        assert!(graph.edges().is_empty());
    }
}
