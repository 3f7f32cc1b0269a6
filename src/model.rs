//! Core data model.
//!
//! A submission is one batch of workflows dispatched together to a single
//! Cromwell server running as a cloud operation. The record lives in the
//! submission's bucket; everything else is reconstructed from logs and
//! remote operation status.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Submission record
// ---------------------------------------------------------------------------

/// The durable `submission.json` document.
///
/// Fields the tracker does not interpret are kept in `extra` so that a
/// rewrite preserves the original shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub workspace: String,
    pub namespace: String,
    pub identifier: String,

    /// Handle of the orchestrating (Cromwell server) operation.
    pub operation: String,

    /// Raw dispatch list, in the order the workflows were submitted.
    #[serde(default)]
    pub workflows: Vec<WorkflowDispatch>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<SubmissionStatus>,

    /// Resources requested for the orchestrating server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeSpec>,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl SubmissionRecord {
    /// Persisted status, if it is one no further transitions leave.
    pub fn terminal_status(&self) -> Option<SubmissionStatus> {
        self.status.filter(|s| s.is_terminal())
    }
}

/// One entry of the raw dispatch list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDispatch {
    /// Key derived from the workflow's inputs; correlates a workflow back
    /// to the entity it was launched for.
    #[serde(rename = "workflowOutputKey")]
    pub output_key: String,

    #[serde(rename = "workflowEntity")]
    pub entity: String,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSpec {
    /// Orchestrator memory in GiB.
    pub memory: f64,

    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RuntimeSpec {
    /// Machine shape the orchestrator was launched on for this much memory.
    pub fn machine_type(&self) -> String {
        let mb = (self.memory * 1024.0).round() as u64;
        if mb > 3072 {
            format!("custom-{}-{}", mb.div_ceil(13312) * 2, mb)
        } else {
            "n1-standard-1".to_string()
        }
    }
}

// ---------------------------------------------------------------------------
// Submission status
// ---------------------------------------------------------------------------

/// Lifecycle status of a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubmissionStatus {
    Running,
    Succeeded,
    Failed,
    Aborted,
    Error,
    #[serde(other)]
    Unknown,
}

impl SubmissionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SubmissionStatus::Succeeded
                | SubmissionStatus::Failed
                | SubmissionStatus::Aborted
                | SubmissionStatus::Error
        )
    }
}

impl std::fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SubmissionStatus::Running => "Running",
            SubmissionStatus::Succeeded => "Succeeded",
            SubmissionStatus::Failed => "Failed",
            SubmissionStatus::Aborted => "Aborted",
            SubmissionStatus::Error => "Error",
            SubmissionStatus::Unknown => "Unknown",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Workflow identity
// ---------------------------------------------------------------------------

/// Full Cromwell workflow id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }

    /// First 8 hex chars. Only unique within one submission.
    pub fn short(&self) -> String {
        self.0.to_string()[..8].to_string()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Cost
// ---------------------------------------------------------------------------

/// Estimated resource usage of a submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CostSummary {
    /// Wall-clock hours.
    pub clock_h: f64,
    /// Sum of call hours.
    pub cpu_h: f64,
    /// Estimated dollars.
    pub est_cost: f64,
}

// ---------------------------------------------------------------------------
// Remote operation status
// ---------------------------------------------------------------------------

/// Status of a long-running cloud operation, as returned by the
/// Pipelines API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperationStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub done: bool,

    #[serde(default)]
    pub metadata: OperationMetadata,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime_metadata: Option<RuntimeMetadata>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pipeline: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_engine: Option<ComputeEngine>,
}

/// The VM an operation runs on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputeEngine {
    pub zone: String,
    pub instance_name: String,
}

impl OperationStatus {
    /// In progress: no explicit done marker yet.
    pub fn is_live(&self) -> bool {
        !self.done
    }

    pub fn compute_engine(&self) -> Option<&ComputeEngine> {
        self.metadata
            .runtime_metadata
            .as_ref()
            .and_then(|r| r.compute_engine.as_ref())
    }

    /// Machine type requested for the operation's VM, without any zone prefix.
    pub fn machine_type(&self) -> Option<&str> {
        self.virtual_machine()
            .and_then(|vm| vm.get("machineType"))
            .and_then(|v| v.as_str())
            .map(|m| m.rsplit('/').next().unwrap_or(m))
    }

    pub fn preemptible(&self) -> bool {
        self.virtual_machine()
            .and_then(|vm| vm.get("preemptible"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        self.metadata.start_time.as_deref().and_then(parse_timestamp)
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.metadata.end_time.as_deref().and_then(parse_timestamp)
    }

    fn virtual_machine(&self) -> Option<&serde_json::Value> {
        self.metadata
            .pipeline
            .as_ref()
            .and_then(|p| p.pointer("/resources/virtualMachine"))
    }
}

/// Parse the timestamps found in operation status and workflow metadata.
///
/// Fractional seconds and zone suffixes are discarded; every timestamp is
/// treated as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let head = s.get(..19)?;
    NaiveDateTime::parse_from_str(head, "%Y-%m-%dT%H:%M:%S")
        .ok()
        .map(|t| t.and_utc())
}
