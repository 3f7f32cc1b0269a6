//! One attempt of one task within a workflow.

use std::time::{Duration, Instant};
use tracing::warn;

use crate::error::Result;
use crate::gcp::ObjectStore;
use crate::model::WorkflowId;

/// Status of a call as last reported by the executor.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CallStatus {
    /// No status change seen yet.
    Unreported,
    Starting,
    Running,
    /// Any other in-flight executor state (`AwaitingCloudQuota`, `Preempted`, ...).
    Executor(String),
    Succeeded,
    Failed,
    Aborted,
}

impl CallStatus {
    /// Map an executor status string onto a call status.
    pub fn parse(s: &str) -> Self {
        match s.trim() {
            "" | "-" => CallStatus::Unreported,
            "Initializing" | "Starting" => CallStatus::Starting,
            "Running" => CallStatus::Running,
            "Success" | "Succeeded" | "Done" => CallStatus::Succeeded,
            "Failed" | "Failure" => CallStatus::Failed,
            "Aborted" | "Cancelled" => CallStatus::Aborted,
            other => CallStatus::Executor(other.to_string()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallStatus::Succeeded | CallStatus::Failed | CallStatus::Aborted
        )
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallStatus::Unreported => write!(f, "-"),
            CallStatus::Starting => write!(f, "Starting"),
            CallStatus::Running => write!(f, "Running"),
            CallStatus::Executor(s) => write!(f, "{s}"),
            CallStatus::Succeeded => write!(f, "Succeeded"),
            CallStatus::Failed => write!(f, "Failed"),
            CallStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Log files a call leaves in its storage path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Stdout,
    Stderr,
    /// The executor's own log, named after the task.
    Task,
}

/// Storage path of a call attempt. Attempt 1 has no `attempt-` segment.
pub fn call_path(
    submission_root: &str,
    workflow_name: &str,
    workflow_id: &WorkflowId,
    task_name: &str,
    attempt: u32,
) -> String {
    let base = format!(
        "{}/workspace/{workflow_name}/{workflow_id}/call-{task_name}",
        submission_root.trim_end_matches('/')
    );
    if attempt > 1 {
        format!("{base}/attempt-{attempt}")
    } else {
        base
    }
}

#[derive(Debug, Clone)]
pub struct Call {
    pub path: String,
    pub task_name: String,
    /// 1-based.
    pub attempt: u32,
    /// Handle of the cloud operation running this attempt.
    pub operation: String,
    pub status: CallStatus,
    return_code: Option<(Instant, Option<i32>)>,
}

impl Call {
    pub fn new(path: String, task_name: String, attempt: u32, operation: String) -> Self {
        Self {
            path,
            task_name,
            attempt,
            operation,
            status: CallStatus::Unreported,
            return_code: None,
        }
    }

    pub fn log_path(&self, kind: LogKind) -> String {
        match kind {
            LogKind::Stdout => format!("{}/stdout", self.path),
            LogKind::Stderr => format!("{}/stderr", self.path),
            LogKind::Task => format!("{}/{}.log", self.path, self.task_name),
        }
    }

    /// Fetch a log file. `Ok(None)` if the file does not exist.
    pub async fn read_log(&self, store: &dyn ObjectStore, kind: LogKind) -> Result<Option<String>> {
        let bytes = store.get(&self.log_path(kind)).await?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// The attempt's exit code, read from `{path}/rc`.
    ///
    /// `None` until the file exists. Results are memoized for `ttl`.
    pub async fn return_code(
        &mut self,
        store: &dyn ObjectStore,
        ttl: Duration,
    ) -> Result<Option<i32>> {
        if let Some((fetched, rc)) = self.return_code {
            if fetched.elapsed() < ttl {
                return Ok(rc);
            }
        }

        let rc = store
            .get(&format!("{}/rc", self.path))
            .await?
            .and_then(|bytes| {
                let text = String::from_utf8_lossy(&bytes);
                match text.trim().parse::<i32>() {
                    Ok(rc) => Some(rc),
                    Err(e) => {
                        warn!(path = %self.path, error = %e, "unreadable return code");
                        None
                    }
                }
            });
        self.return_code = Some((Instant::now(), rc));
        Ok(rc)
    }
}
