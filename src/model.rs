//! Persistent row types.
//!
//! These are the shapes stored in SQLite and exchanged over the REST surface.
//! JSON columns (`policy`, `ttl`, `data`, `errors`, `events`, `attached`,
//! `extensions`) round-trip through the typed structs here; free-form payloads
//! (`data`, report `result`) stay `serde_json::Value` and are only parsed at
//! the edges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Policy token forcing a task to run alone.
pub const POLICY_ISOLATED: &str = "isolated";

/// Task lifecycle state.
#[derive(
    Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, Hash,
)]
pub enum TaskState {
    #[default]
    Created,
    Ready,
    Postponed,
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskState {
    /// Terminal states are absorbing.
    pub fn terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Canceled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Created => "Created",
            TaskState::Ready => "Ready",
            TaskState::Postponed => "Postponed",
            TaskState::Pending => "Pending",
            TaskState::Running => "Running",
            TaskState::Succeeded => "Succeeded",
            TaskState::Failed => "Failed",
            TaskState::Canceled => "Canceled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "Ready" => TaskState::Ready,
            "Postponed" => TaskState::Postponed,
            "Pending" => TaskState::Pending,
            "Running" => TaskState::Running,
            "Succeeded" => TaskState::Succeeded,
            "Failed" => TaskState::Failed,
            "Canceled" => TaskState::Canceled,
            _ => TaskState::Created,
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-state time budgets (seconds).
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Ttl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub running: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub succeeded: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed: Option<i64>,
}

impl Ttl {
    /// Budget for the given state, when one is set.
    pub fn for_state(&self, state: TaskState) -> Option<i64> {
        match state {
            TaskState::Created => self.created,
            TaskState::Pending => self.pending,
            TaskState::Running => self.running,
            TaskState::Succeeded => self.succeeded,
            TaskState::Failed => self.failed,
            _ => None,
        }
    }
}

/// Error reported on a task.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TaskError {
    pub severity: String,
    pub description: String,
}

/// Aggregated pod event recorded on a task.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct TaskEvent {
    pub kind: String,
    pub count: i32,
    pub reason: String,
    pub last: Option<DateTime<Utc>>,
}

/// Reference to a named resource (attached file, application).
/// Deserializes from either a bare id or an `{id, name}` object.
#[derive(Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Ref {
    pub id: i64,
    #[serde(default)]
    pub name: String,
}

impl<'de> Deserialize<'de> for Ref {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Id(i64),
            Full {
                id: i64,
                #[serde(default)]
                name: String,
            },
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Id(id) => Ref {
                id,
                name: String::new(),
            },
            Repr::Full { id, name } => Ref { id, name },
        })
    }
}

/// Task row. The unit the scheduler operates on.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Task {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    /// Task kind; may be empty when `addon` is explicit.
    #[serde(default)]
    pub kind: String,
    /// Resolved addon; empty until selected.
    #[serde(default)]
    pub addon: String,
    #[serde(default)]
    pub extensions: Vec<String>,
    #[serde(default)]
    pub state: TaskState,
    /// Opaque grouping key.
    #[serde(default)]
    pub locator: String,
    #[serde(default)]
    pub priority: i32,
    /// Policy tokens. See [`POLICY_ISOLATED`].
    #[serde(default)]
    pub policy: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<Ttl>,
    /// Free-form payload for the addon.
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(
        default,
        alias = "applicationID",
        skip_serializing_if = "Option::is_none"
    )]
    pub application: Option<Ref>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_group: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket: Option<i64>,
    /// "namespace/name" of the launched pod, or empty.
    #[serde(default)]
    pub pod: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terminated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub canceled: bool,
    #[serde(default)]
    pub retries: i32,
    #[serde(default)]
    pub errors: Vec<TaskError>,
    #[serde(default)]
    pub events: Vec<TaskEvent>,
    #[serde(default)]
    pub attached: Vec<Ref>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<TaskReport>,
    /// When the current state was entered. Maintained by the store.
    #[serde(skip)]
    pub state_entered: Option<DateTime<Utc>>,
}

impl Task {
    /// Append an error.
    pub fn error(&mut self, severity: &str, description: impl Into<String>) {
        self.errors.push(TaskError {
            severity: severity.to_string(),
            description: description.into(),
        });
    }

    /// Record a pod event, aggregating by (kind, reason).
    pub fn event(&mut self, kind: &str, reason: &str, last: Option<DateTime<Utc>>) {
        for event in self.events.iter_mut() {
            if event.kind == kind && event.reason == reason {
                event.count += 1;
                event.last = last.or(event.last);
                return;
            }
        }
        self.events.push(TaskEvent {
            kind: kind.to_string(),
            count: 1,
            reason: reason.to_string(),
            last,
        });
    }

    /// Attach a file reference.
    pub fn attach(&mut self, file: Ref) {
        self.attached.push(file);
    }

    /// The task policy includes the named token.
    pub fn has_policy(&self, name: &str) -> bool {
        self.policy.iter().any(|p| p.trim().eq_ignore_ascii_case(name))
    }

    /// Application id, when routed to one.
    pub fn application_id(&self) -> Option<i64> {
        self.application.as_ref().map(|r| r.id)
    }

    /// Pod name without the namespace prefix.
    pub fn pod_name(&self) -> &str {
        self.pod.rsplit('/').next().unwrap_or("")
    }
}

/// Progress/result sibling of a task, written by the addon.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TaskReport {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub completed: i64,
    #[serde(default)]
    pub activity: Vec<String>,
    #[serde(default)]
    pub errors: Vec<TaskError>,
    #[serde(default)]
    pub attached: Vec<Ref>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub task: i64,
}

/// Task group. Members share the group `data` and submit together.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct TaskGroup {
    #[serde(default)]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub state: TaskState,
    #[serde(default)]
    pub data: serde_json::Value,
    #[serde(default)]
    pub tasks: Vec<Task>,
}

/// Application routed to by tasks. Narrow surface: the scheduler only reads
/// the tag list for tag selectors.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct Application {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
}

/// Tag on an application.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct Tag {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub category: String,
}

/// Attached file row; content lives on disk.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct File {
    #[serde(default)]
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(TaskState::Succeeded.terminal());
        assert!(TaskState::Failed.terminal());
        assert!(TaskState::Canceled.terminal());
        assert!(!TaskState::Running.terminal());
        assert!(!TaskState::Ready.terminal());
    }

    #[test]
    fn test_state_round_trip() {
        for state in [
            TaskState::Created,
            TaskState::Ready,
            TaskState::Postponed,
            TaskState::Pending,
            TaskState::Running,
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::Canceled,
        ] {
            assert_eq!(TaskState::parse(state.as_str()), state);
        }
    }

    #[test]
    fn test_policy_match_is_case_insensitive() {
        let task = Task {
            policy: vec!["Isolated ".to_string()],
            ..Default::default()
        };
        assert!(task.has_policy(POLICY_ISOLATED));
        assert!(!task.has_policy("unique"));
    }

    #[test]
    fn test_event_aggregation() {
        let mut task = Task::default();
        task.event("Warning", "FailedScheduling", None);
        task.event("Warning", "FailedScheduling", None);
        task.event("Normal", "Pulled", None);
        assert_eq!(task.events.len(), 2);
        assert_eq!(task.events[0].count, 2);
    }

    #[test]
    fn test_application_ref_accepts_id_or_object() {
        let task: Task = serde_json::from_str(r#"{"kind":"analyze","applicationID":7}"#).unwrap();
        assert_eq!(task.application_id(), Some(7));
        let task: Task = serde_json::from_str(r#"{"application":{"id":3,"name":"inv"}}"#).unwrap();
        assert_eq!(task.application.unwrap().name, "inv");
    }

    #[test]
    fn test_pod_name() {
        let task = Task {
            pod: "task-hub/task-7-abcde".to_string(),
            ..Default::default()
        };
        assert_eq!(task.pod_name(), "task-7-abcde");
        assert_eq!(Task::default().pod_name(), "");
    }

    #[test]
    fn test_ttl_for_state() {
        let ttl = Ttl {
            running: Some(600),
            ..Default::default()
        };
        assert_eq!(ttl.for_state(TaskState::Running), Some(600));
        assert_eq!(ttl.for_state(TaskState::Created), None);
        assert_eq!(ttl.for_state(TaskState::Canceled), None);
    }
}
