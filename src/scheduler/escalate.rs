//! Priority escalation.
//!
//! High-priority work pulls its prerequisites forward: walking the ready
//! queue, each ready task promotes the priority of dependency-chain tasks
//! for the same application up to its own. The walk carries a visited set so
//! cyclic kind declarations terminate. Escalation is idempotent and
//! monotonic; priorities only ever increase.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use crate::crd::TaskKind;
use crate::model::{Task, TaskState};

/// Raise priorities along dependency chains. `list` must be ordered by
/// (priority desc, id asc). Returns the ids of tasks whose priority changed,
/// de-duplicated.
pub fn escalate(list: &mut [Task], kinds: &BTreeMap<String, TaskKind>) -> Vec<i64> {
    let mut escalated = BTreeSet::new();
    for i in 0..list.len() {
        if list[i].state != TaskState::Ready {
            continue;
        }
        let priority = list[i].priority;
        let application = list[i].application_id();
        let mut visited: HashSet<String> = HashSet::new();
        visited.insert(list[i].kind.clone());
        let mut walk: Vec<String> = vec![list[i].kind.clone()];
        while let Some(kind_name) = walk.pop() {
            let Some(kind) = kinds.get(&kind_name) else {
                continue;
            };
            for dep in &kind.spec.dependencies {
                for next in list[i + 1..].iter_mut() {
                    if next.kind != *dep || next.application_id() != application {
                        continue;
                    }
                    if !matches!(
                        next.state,
                        TaskState::Ready | TaskState::Postponed | TaskState::Pending
                    ) {
                        continue;
                    }
                    if next.priority < priority {
                        next.priority = priority;
                        escalated.insert(next.id);
                    }
                    if visited.insert(dep.clone()) {
                        walk.push(dep.clone());
                    }
                }
            }
        }
    }
    escalated.into_iter().collect()
}
