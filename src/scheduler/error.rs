//! Scheduler error kinds.

use thiserror::Error;

/// Errors raised while scheduling a task.
///
/// Catalog errors are fatal for the affected task: the task transitions to
/// `Failed` with the message attached. `QuotaExceeded` is not an error in
/// that sense; the task stays `Ready` and is retried on the next tick.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Task kind '{0}' not-found.")]
    KindNotFound(String),

    #[error("Addon '{0}' not-found.")]
    AddonNotFound(String),

    #[error("Addon not selected.")]
    AddonNotSelected,

    #[error("Extension '{0}' not-found.")]
    ExtensionNotFound(String),

    #[error("Extension '{name}' not-valid with addon '{addon}'.")]
    ExtensionNotValid { name: String, addon: String },

    #[error("Selector kind '{0}' not supported.")]
    SelectorNotSupported(String),

    #[error("Priority {0} not-found.")]
    PriorityNotFound(String),

    #[error("Pod create denied by quota: {0}")]
    QuotaExceeded(String),

    #[error("Hub CR not-found.")]
    SnapshotUnavailable,

    #[error("Token error: {0}")]
    Token(String),

    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Fatal for the task: the scheduler marks it `Failed`.
    pub fn fatal(&self) -> bool {
        matches!(
            self,
            Error::KindNotFound(_)
                | Error::AddonNotFound(_)
                | Error::AddonNotSelected
                | Error::ExtensionNotFound(_)
                | Error::ExtensionNotValid { .. }
                | Error::SelectorNotSupported(_)
                | Error::PriorityNotFound(_)
        )
    }

    /// The cluster refused a pod create for capacity reasons.
    pub fn quota_exceeded(&self) -> bool {
        matches!(self, Error::QuotaExceeded(_))
    }

    /// Classify a kube create error. Quota denials come back as 403 with an
    /// "exceeded quota" message.
    pub fn from_pod_create(err: kube::Error) -> Self {
        if let kube::Error::Api(ref response) = err {
            if response.code == 403 && response.message.contains("exceeded quota") {
                return Error::QuotaExceeded(response.message.clone());
            }
        }
        Error::Kube(err)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_kinds() {
        assert!(Error::AddonNotSelected.fatal());
        assert!(Error::PriorityNotFound("10".into()).fatal());
        assert!(!Error::QuotaExceeded("pods".into()).fatal());
        assert!(!Error::SnapshotUnavailable.fatal());
    }

    #[test]
    fn test_quota_classification() {
        let api = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "pods \"task-1-x\" is forbidden: exceeded quota: compute".into(),
            reason: "Forbidden".into(),
            code: 403,
        });
        assert!(Error::from_pod_create(api).quota_exceeded());

        let api = kube::Error::Api(kube::error::ErrorResponse {
            status: "Failure".into(),
            message: "denied".into(),
            reason: "Forbidden".into(),
            code: 403,
        });
        assert!(!Error::from_pod_create(api).quota_exceeded());
    }
}
