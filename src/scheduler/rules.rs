//! Postpone rules.
//!
//! A ready candidate is postponed when any rule matches against any other
//! task currently in {Running, Pending}. Rules are pure functions of the
//! two tasks (plus the kind catalog for the dependency rule); they do not
//! touch the database.

use std::collections::BTreeMap;

use crate::crd::TaskKind;
use crate::model::{Task, POLICY_ISOLATED};

/// A postpone rule.
pub trait Rule {
    fn matched(&self, candidate: &Task, other: &Task) -> bool;
}

/// An isolated task runs alone; isolation is global.
pub struct RuleIsolated;

impl Rule for RuleIsolated {
    fn matched(&self, candidate: &Task, other: &Task) -> bool {
        candidate.has_policy(POLICY_ISOLATED) || other.has_policy(POLICY_ISOLATED)
    }
}

/// At most one concurrent task per (application, addon).
pub struct RuleUnique;

impl Rule for RuleUnique {
    fn matched(&self, candidate: &Task, other: &Task) -> bool {
        match (candidate.application_id(), other.application_id()) {
            (Some(a), Some(b)) if a == b => candidate.addon == other.addon,
            _ => false,
        }
    }
}

/// The candidate's kind declares the other task's kind as a dependency
/// (direct declaration only) and both route to the same application.
pub struct RuleDeps<'a> {
    pub kinds: &'a BTreeMap<String, TaskKind>,
}

impl Rule for RuleDeps<'_> {
    fn matched(&self, candidate: &Task, other: &Task) -> bool {
        if candidate.kind.is_empty() || other.kind.is_empty() {
            return false;
        }
        match (candidate.application_id(), other.application_id()) {
            (Some(a), Some(b)) if a == b => {}
            _ => return false,
        }
        self.kinds
            .get(&candidate.kind)
            .map(|kind| kind.has_dep(&other.kind))
            .unwrap_or(false)
    }
}

/// True when any rule postpones the candidate behind the other task.
pub fn postponed(candidate: &Task, other: &Task, kinds: &BTreeMap<String, TaskKind>) -> bool {
    let deps = RuleDeps { kinds };
    let rules: [&dyn Rule; 3] = [&RuleIsolated, &RuleUnique, &deps];
    rules.iter().any(|rule| rule.matched(candidate, other))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Ref;
    use crate::scheduler::cluster::testing;
    use kube::ResourceExt;

    fn task(app: Option<i64>, addon: &str, kind: &str) -> Task {
        Task {
            application: app.map(|id| Ref {
                id,
                ..Default::default()
            }),
            addon: addon.to_string(),
            kind: kind.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_isolated_matches_either_side() {
        let mut isolated = task(None, "", "");
        isolated.policy = vec![POLICY_ISOLATED.to_string()];
        let plain = task(None, "", "");
        assert!(RuleIsolated.matched(&isolated, &plain));
        assert!(RuleIsolated.matched(&plain, &isolated));
        assert!(!RuleIsolated.matched(&plain, &plain));
    }

    #[test]
    fn test_unique_by_application_and_addon() {
        assert!(RuleUnique.matched(&task(Some(7), "a1", ""), &task(Some(7), "a1", "")));
        assert!(!RuleUnique.matched(&task(Some(7), "a1", ""), &task(Some(8), "a1", "")));
        assert!(!RuleUnique.matched(&task(Some(7), "a1", ""), &task(Some(7), "a2", "")));
        // Unrouted tasks never collide.
        assert!(!RuleUnique.matched(&task(None, "a1", ""), &task(None, "a1", "")));
    }

    #[test]
    fn test_deps_direct_declaration_only() {
        let mut kinds = BTreeMap::new();
        for kind in [
            testing::kind("a", &[]),
            testing::kind("b", &["a"]),
            testing::kind("c", &["b"]),
        ] {
            kinds.insert(kind.name_any(), kind);
        }
        let deps = RuleDeps { kinds: &kinds };
        assert!(deps.matched(&task(Some(1), "", "b"), &task(Some(1), "", "a")));
        // Transitive closure is not computed.
        assert!(!deps.matched(&task(Some(1), "", "c"), &task(Some(1), "", "a")));
        // Different applications are independent.
        assert!(!deps.matched(&task(Some(1), "", "b"), &task(Some(2), "", "a")));
    }
}
