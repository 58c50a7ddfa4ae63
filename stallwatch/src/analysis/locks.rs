//! Resolving the single lock a thread waits on.
//!
//! A thread normally reports at most one blocking lock line. Some runtime
//! threads report several at once (for example `waiting to lock` on a monitor
//! while also `parking to wait for` a condition). The wait graph uses
//! [`resolve_waited_lock`]. The starvation detector uses
//! [`resolve_stalled_lock`], which looks at explicit `waiting on` lines first.
//! Both apply the same [`LockResolution`] when they have to choose.

use crate::domain::DiagnosticsError;
use log::warn;
use serde::{Deserialize, Serialize};
use stallwatch_common::{LockObservation, LockOperation, ThreadSnapshot};
use std::cmp::Ordering;

/// What to do when a thread reports more than one blocking lock line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockResolution {
    /// Pick deterministically: monitor enter first, then lock id, then class
    #[default]
    TieBreak,
    /// Fail with [`DiagnosticsError::AmbiguousWait`]
    Strict,
}

/// Lower wins. Only the three blocking kinds reach the resolver today.
fn blocking_priority(operation: LockOperation) -> u8 {
    match operation {
        LockOperation::WaitingToLock => 0,
        LockOperation::Parking | LockOperation::WaitingOn => 1,
        LockOperation::Locked | LockOperation::Eliminated => 5,
        LockOperation::Unknown => 10,
    }
}

/// `None` sorts after every `Some`.
fn cmp_nulls_last(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn tie_break(a: &LockObservation, b: &LockObservation) -> Ordering {
    blocking_priority(a.operation)
        .cmp(&blocking_priority(b.operation))
        .then_with(|| a.lock_id.cmp(&b.lock_id))
        .then_with(|| cmp_nulls_last(a.class_name.as_deref(), b.class_name.as_deref()))
}

/// The lock `thread` is blocked on, if any.
///
/// Zero blocking observations → `Ok(None)`. One → that observation. Several
/// are resolved according to `policy`; the result never depends on the order
/// the lock lines were reported in.
///
/// # Errors
///
/// With [`LockResolution::Strict`], returns [`DiagnosticsError::AmbiguousWait`]
/// when the thread reports more than one blocking observation.
pub fn resolve_waited_lock(
    thread: &ThreadSnapshot,
    policy: LockResolution,
) -> Result<Option<&LockObservation>, DiagnosticsError> {
    choose(thread, thread.blocking_locks().collect(), policy)
}

/// The lock a waiting thread sleeps on, as judged for starvation.
///
/// A single `waiting on` line is used as-is, whatever else the thread
/// reports. Several `waiting on` lines are resolved according to `policy`.
/// Without any, this falls back to [`resolve_waited_lock`].
///
/// # Errors
///
/// With [`LockResolution::Strict`], returns [`DiagnosticsError::AmbiguousWait`]
/// for more than one `waiting on` line, or for several other blocking lines
/// when there is no `waiting on` line at all.
pub fn resolve_stalled_lock(
    thread: &ThreadSnapshot,
    policy: LockResolution,
) -> Result<Option<&LockObservation>, DiagnosticsError> {
    let waiting_on: Vec<&LockObservation> = thread
        .locks
        .iter()
        .filter(|lock| lock.operation == LockOperation::WaitingOn)
        .collect();

    if waiting_on.is_empty() {
        resolve_waited_lock(thread, policy)
    } else {
        choose(thread, waiting_on, policy)
    }
}

fn choose<'t>(
    thread: &ThreadSnapshot,
    candidates: Vec<&'t LockObservation>,
    policy: LockResolution,
) -> Result<Option<&'t LockObservation>, DiagnosticsError> {
    match candidates.as_slice() {
        [] => Ok(None),
        [only] => Ok(Some(*only)),
        several => match policy {
            LockResolution::Strict => Err(DiagnosticsError::AmbiguousWait {
                thread: thread.id,
                name: thread.name.clone(),
                observations: several.len(),
            }),
            LockResolution::TieBreak => {
                let chosen = several.iter().copied().min_by(|a, b| tie_break(a, b));
                if let Some(lock) = chosen {
                    warn!(
                        "Thread {} ({}) reports {} candidate locks; using <{}>",
                        thread.id,
                        thread.name,
                        several.len(),
                        lock.lock_id
                    );
                }
                Ok(chosen)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stallwatch_common::{ThreadId, ThreadState};

    fn thread_with(locks: Vec<LockObservation>) -> ThreadSnapshot {
        locks.into_iter().fold(
            ThreadSnapshot::new(ThreadId(1), "worker", ThreadState::Blocked),
            ThreadSnapshot::with_lock,
        )
    }

    fn resolved_id(thread: &ThreadSnapshot) -> Option<String> {
        resolve_waited_lock(thread, LockResolution::TieBreak)
            .unwrap()
            .map(|lock| lock.lock_id.clone())
    }

    #[test]
    fn test_no_blocking_observation() {
        let thread = thread_with(vec![LockObservation::locked("0xA", "java.lang.Object")]);
        assert_eq!(resolved_id(&thread), None);
    }

    #[test]
    fn test_single_observation_used_as_is() {
        let thread = thread_with(vec![
            LockObservation::locked("0xA", "java.lang.Object"),
            LockObservation::parking("0xB", "java.util.concurrent.locks.ReentrantLock$NonfairSync"),
        ]);
        assert_eq!(resolved_id(&thread), Some("0xB".to_string()));
    }

    #[test]
    fn test_waiting_to_lock_beats_parking_in_any_order() {
        let enter = LockObservation::waiting_to_lock("0xZ", "java.lang.Object");
        let park = LockObservation::parking("0xA", "java.util.concurrent.locks.ReentrantLock$NonfairSync");

        let forward = thread_with(vec![enter.clone(), park.clone()]);
        let reverse = thread_with(vec![park, enter]);
        assert_eq!(resolved_id(&forward), Some("0xZ".to_string()));
        assert_eq!(resolved_id(&reverse), Some("0xZ".to_string()));
    }

    #[test]
    fn test_equal_priority_breaks_on_lock_id_then_class() {
        let thread = thread_with(vec![
            LockObservation::waiting_on("0xC", "java.lang.Object"),
            LockObservation::parking("0xB", "java.lang.Object"),
        ]);
        assert_eq!(resolved_id(&thread), Some("0xB".to_string()));

        let same_id = thread_with(vec![
            LockObservation::new("0xB", None, LockOperation::WaitingOn),
            LockObservation::parking("0xB", "java.lang.Object"),
        ]);
        let chosen = resolve_waited_lock(&same_id, LockResolution::TieBreak).unwrap();
        assert_eq!(chosen.and_then(|l| l.class_name.clone()), Some("java.lang.Object".to_string()));
    }

    #[test]
    fn test_strict_policy_rejects_ambiguity() {
        let thread = thread_with(vec![
            LockObservation::waiting_on("0xA", "java.lang.Object"),
            LockObservation::waiting_on("0xB", "java.lang.Object"),
        ]);
        let err = resolve_waited_lock(&thread, LockResolution::Strict).unwrap_err();
        assert_eq!(
            err,
            DiagnosticsError::AmbiguousWait {
                thread: ThreadId(1),
                name: "worker".to_string(),
                observations: 2,
            }
        );
    }

    #[test]
    fn test_stalled_lock_prefers_single_waiting_on() {
        let thread = thread_with(vec![
            LockObservation::waiting_on("0xB", "java.lang.Object"),
            LockObservation::parking("0xA", "java.lang.Object"),
        ]);
        for policy in [LockResolution::TieBreak, LockResolution::Strict] {
            let lock = resolve_stalled_lock(&thread, policy).unwrap();
            assert_eq!(lock.map(|l| l.lock_id.as_str()), Some("0xB"));
        }
        // The graph still sees both blocking lines
        assert_eq!(resolved_id(&thread), Some("0xA".to_string()));
    }

    #[test]
    fn test_stalled_lock_without_waiting_on_falls_back() {
        let thread = thread_with(vec![
            LockObservation::locked("0xC", "java.lang.Object"),
            LockObservation::parking("0xA", "java.lang.Object"),
        ]);
        let lock = resolve_stalled_lock(&thread, LockResolution::Strict).unwrap();
        assert_eq!(lock.map(|l| l.lock_id.as_str()), Some("0xA"));
    }

    #[test]
    fn test_stalled_lock_with_several_waiting_on() {
        let thread = thread_with(vec![
            LockObservation::waiting_on("0xD", "java.lang.Object"),
            LockObservation::parking("0xA", "java.lang.Object"),
            LockObservation::waiting_on("0xC", "java.lang.Object"),
        ]);
        let lock = resolve_stalled_lock(&thread, LockResolution::TieBreak).unwrap();
        assert_eq!(lock.map(|l| l.lock_id.as_str()), Some("0xC"));

        let err = resolve_stalled_lock(&thread, LockResolution::Strict).unwrap_err();
        assert!(matches!(err, DiagnosticsError::AmbiguousWait { observations: 2, .. }));
    }

    #[test]
    fn test_strict_policy_accepts_single_observation() {
        let thread = thread_with(vec![LockObservation::waiting_on("0xA", "java.lang.Object")]);
        let lock = resolve_waited_lock(&thread, LockResolution::Strict).unwrap();
        assert_eq!(lock.map(|l| l.lock_id.as_str()), Some("0xA"));
    }
}
