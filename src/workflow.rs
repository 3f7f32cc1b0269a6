//! Per-workflow state machine.
//!
//! A workflow is first seen by its short id, usually through lines that
//! reference it before the engine announces it has started. Until the full
//! id is known those events are queued; `start` replays the queue through
//! the same `apply` path used for live events, so the end state does not
//! depend on whether an event arrived before or after the start.

use std::collections::VecDeque;
use tracing::{debug, warn};

use crate::call::{Call, CallStatus, call_path};
use crate::gcp::{Operations, project_of};
use crate::model::WorkflowId;
use crate::telemetry::metrics;

/// Events routed to a single workflow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowEvent {
    Task {
        workflow_name: String,
        task_name: String,
        attempt: u32,
        operation: String,
    },
    Message(String),
    Failed(String),
    StatusChanged {
        task_name: String,
        attempt: u32,
        old_status: String,
        new_status: String,
    },
}

/// Workflow status as derived from its latest call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WorkflowStatus {
    /// No call recorded yet.
    Pending,
    Starting,
    Running,
    Executor(String),
    Succeeded,
    Failed,
    Aborted,
}

impl From<&CallStatus> for WorkflowStatus {
    fn from(status: &CallStatus) -> Self {
        match status {
            CallStatus::Unreported | CallStatus::Starting => WorkflowStatus::Starting,
            CallStatus::Running => WorkflowStatus::Running,
            CallStatus::Executor(s) => WorkflowStatus::Executor(s.clone()),
            CallStatus::Succeeded => WorkflowStatus::Succeeded,
            CallStatus::Failed => WorkflowStatus::Failed,
            CallStatus::Aborted => WorkflowStatus::Aborted,
        }
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowStatus::Pending => write!(f, "Pending"),
            WorkflowStatus::Starting => write!(f, "Starting"),
            WorkflowStatus::Running => write!(f, "Running"),
            WorkflowStatus::Executor(s) => write!(f, "{s}"),
            WorkflowStatus::Succeeded => write!(f, "Succeeded"),
            WorkflowStatus::Failed => write!(f, "Failed"),
            WorkflowStatus::Aborted => write!(f, "Aborted"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Workflow {
    short_id: String,
    id: Option<WorkflowId>,
    input_key: Option<String>,
    submission_root: String,
    calls: Vec<Call>,
    failure: Option<String>,
    messages: Vec<String>,
    pending: VecDeque<WorkflowEvent>,
}

impl Workflow {
    /// A provisional workflow known only by its short id.
    pub fn new(short_id: impl Into<String>, submission_root: impl Into<String>) -> Self {
        Self {
            short_id: short_id.into(),
            id: None,
            input_key: None,
            submission_root: submission_root.into(),
            calls: Vec::new(),
            failure: None,
            messages: Vec::new(),
            pending: VecDeque::new(),
        }
    }

    pub fn short_id(&self) -> &str {
        &self.short_id
    }

    pub fn id(&self) -> Option<&WorkflowId> {
        self.id.as_ref()
    }

    pub fn input_key(&self) -> Option<&str> {
        self.input_key.as_deref()
    }

    pub fn is_started(&self) -> bool {
        self.id.is_some()
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn calls_mut(&mut self) -> &mut [Call] {
        &mut self.calls
    }

    /// Last failure reported for the workflow.
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Events waiting for the workflow to start.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn handle(&mut self, event: WorkflowEvent) {
        if self.is_started() {
            self.apply(event);
        } else {
            self.pending.push_back(event);
        }
    }

    /// Confirm the workflow's identity and replay anything queued before it.
    ///
    /// A repeated start only fills in a missing input key.
    pub fn start(&mut self, id: WorkflowId, input_key: Option<String>) {
        if self.input_key.is_none() {
            self.input_key = input_key;
        }
        if self.is_started() {
            return;
        }
        self.id = Some(id);
        debug!(short_id = %self.short_id, replay = self.pending.len(), "workflow started");
        while let Some(event) = self.pending.pop_front() {
            self.apply(event);
        }
    }

    fn apply(&mut self, event: WorkflowEvent) {
        match event {
            WorkflowEvent::Task {
                workflow_name,
                task_name,
                attempt,
                operation,
            } => self.on_task(workflow_name, task_name, attempt, operation),
            WorkflowEvent::Message(line) => self.messages.push(line),
            WorkflowEvent::Failed(message) => self.failure = Some(message),
            WorkflowEvent::StatusChanged {
                task_name,
                attempt,
                new_status,
                ..
            } => self.on_status(&task_name, attempt, &new_status),
        }
    }

    fn on_task(&mut self, workflow_name: String, task_name: String, attempt: u32, operation: String) {
        let Some(id) = self.id else {
            return;
        };
        let path = call_path(&self.submission_root, &workflow_name, &id, &task_name, attempt);
        self.calls.push(Call::new(path, task_name, attempt, operation));
    }

    fn on_status(&mut self, task_name: &str, attempt: u32, new_status: &str) {
        match self
            .calls
            .iter_mut()
            .rev()
            .find(|c| c.task_name == task_name && c.attempt == attempt)
        {
            Some(call) => call.status = CallStatus::parse(new_status),
            None => debug!(
                short_id = %self.short_id,
                task_name,
                attempt,
                "status change for unknown call"
            ),
        }
    }

    pub fn status(&self) -> WorkflowStatus {
        self.calls
            .last()
            .map(|c| WorkflowStatus::from(&c.status))
            .unwrap_or(WorkflowStatus::Pending)
    }

    /// Cancel every call's operation and delete the VM behind it.
    ///
    /// Failures are logged per call and never stop the fan-out.
    pub async fn abort(&self, operations: &dyn Operations) {
        for call in &self.calls {
            if let Err(e) = operations.cancel(&call.operation).await {
                warn!(short_id = %self.short_id, operation = %call.operation, error = %e, "failed to cancel call");
                metrics::remote_failures().add(1, &[opentelemetry::KeyValue::new("operation", "cancel")]);
            }

            let instance = match operations.status(&call.operation).await {
                Ok(status) => status.compute_engine().cloned(),
                Err(e) => {
                    warn!(operation = %call.operation, error = %e, "no status for cancelled call");
                    None
                }
            };
            let (Some(instance), Some(project)) = (instance, project_of(&call.operation)) else {
                continue;
            };
            if let Err(e) = operations
                .delete_instance(project, &instance.zone, &instance.instance_name)
                .await
            {
                warn!(instance = %instance.instance_name, error = %e, "failed to delete call instance");
                metrics::remote_failures()
                    .add(1, &[opentelemetry::KeyValue::new("operation", "delete_instance")]);
            }
        }
    }
}
