//! Event classifier for Cromwell server log lines.
//!
//! A fixed, ordered table of patterns maps one raw line to at most one
//! structured event. First match wins. Lines that match nothing are not
//! errors; they are dropped by the caller.

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::model::WorkflowId;

/// A structured event recovered from one log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A batch of workflows was handed to the engine together.
    Dispatched { workflow_ids: Vec<WorkflowId> },
    /// A workflow actor started; its full id is now known.
    Started { workflow_id: WorkflowId },
    /// A task attempt was assigned a cloud operation.
    TaskStarted {
        short_id: String,
        workflow_name: String,
        task_name: String,
        attempt: u32,
        operation: String,
    },
    /// Any other line tagged with a workflow's short id.
    Message { short_id: String, line: String },
    Failed {
        workflow_id: WorkflowId,
        message: String,
    },
    StatusChanged {
        short_id: String,
        task_name: String,
        attempt: u32,
        old_status: String,
        new_status: String,
    },
}

impl Event {
    /// Stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::Dispatched { .. } => "dispatched",
            Event::Started { .. } => "started",
            Event::TaskStarted { .. } => "task_started",
            Event::Message { .. } => "message",
            Event::Failed { .. } => "failed",
            Event::StatusChanged { .. } => "status_changed",
        }
    }
}

static DISPATCHED: OnceLock<Regex> = OnceLock::new();
static STARTED: OnceLock<Regex> = OnceLock::new();
static TASK_STARTED: OnceLock<Regex> = OnceLock::new();
static MESSAGE: OnceLock<Regex> = OnceLock::new();
static FAILED: OnceLock<Regex> = OnceLock::new();
static STATUS_CHANGED: OnceLock<Regex> = OnceLock::new();

fn dispatched_pattern() -> &'static Regex {
    DISPATCHED.get_or_init(|| {
        Regex::new(r"Workflows ([a-z0-9\-]+(?:, [a-z0-9\-]+)*) submitted\.").unwrap()
    })
}

fn started_pattern() -> &'static Regex {
    STARTED.get_or_init(|| {
        Regex::new(r"WorkflowManagerActor Successfully started WorkflowActor-([a-z0-9\-]+)")
            .unwrap()
    })
}

fn task_started_pattern() -> &'static Regex {
    TASK_STARTED.get_or_init(|| {
        Regex::new(r"\[UUID\(([0-9a-f]{8})\)\]?(\w+)\.(\w+):NA:(\d+)\]: job id: (\S+)").unwrap()
    })
}

fn message_pattern() -> &'static Regex {
    MESSAGE.get_or_init(|| Regex::new(r"\[UUID\(([0-9a-f]{8})\)\]").unwrap())
}

fn failed_pattern() -> &'static Regex {
    FAILED.get_or_init(|| {
        Regex::new(
            r"ERROR - WorkflowManagerActor Workflow ([a-z0-9\-]+) failed \(during[^)]*\): (.+)",
        )
        .unwrap()
    })
}

fn status_changed_pattern() -> &'static Regex {
    STATUS_CHANGED.get_or_init(|| {
        Regex::new(
            r"\[UUID\(([0-9a-f]{8})\)(\w+)\.(\w+):NA:(\d+)\]: Status change from (.+?) to (.+)$",
        )
        .unwrap()
    })
}

type Extractor = fn(&Captures<'_>, &str) -> Option<Event>;

/// Patterns in evaluation order.
fn table() -> [(&'static Regex, Extractor); 6] {
    [
        (dispatched_pattern(), extract_dispatched as Extractor),
        (started_pattern(), extract_started as Extractor),
        (task_started_pattern(), extract_task_started as Extractor),
        (message_pattern(), extract_message as Extractor),
        (failed_pattern(), extract_failed as Extractor),
        (status_changed_pattern(), extract_status_changed as Extractor),
    ]
}

/// Classify one raw log line.
pub fn classify(line: &str) -> Option<Event> {
    let line = line.trim_end_matches(['\r', '\n']);
    for (pattern, extract) in table() {
        if let Some(caps) = pattern.captures(line) {
            return extract(&caps, line);
        }
    }
    None
}

fn extract_dispatched(caps: &Captures<'_>, _line: &str) -> Option<Event> {
    let workflow_ids = caps[1]
        .split(", ")
        .map(WorkflowId::parse)
        .collect::<Option<Vec<_>>>()?;
    Some(Event::Dispatched { workflow_ids })
}

fn extract_started(caps: &Captures<'_>, _line: &str) -> Option<Event> {
    Some(Event::Started {
        workflow_id: WorkflowId::parse(&caps[1])?,
    })
}

fn extract_task_started(caps: &Captures<'_>, _line: &str) -> Option<Event> {
    Some(Event::TaskStarted {
        short_id: caps[1].to_string(),
        workflow_name: caps[2].to_string(),
        task_name: caps[3].to_string(),
        attempt: caps[4].parse().ok()?,
        operation: caps[5].to_string(),
    })
}

fn extract_message(caps: &Captures<'_>, line: &str) -> Option<Event> {
    Some(Event::Message {
        short_id: caps[1].to_string(),
        line: line.to_string(),
    })
}

fn extract_failed(caps: &Captures<'_>, _line: &str) -> Option<Event> {
    Some(Event::Failed {
        workflow_id: WorkflowId::parse(&caps[1])?,
        message: caps[2].to_string(),
    })
}

fn extract_status_changed(caps: &Captures<'_>, _line: &str) -> Option<Event> {
    Some(Event::StatusChanged {
        short_id: caps[1].to_string(),
        task_name: caps[3].to_string(),
        attempt: caps[4].parse().ok()?,
        old_status: caps[5].trim().to_string(),
        new_status: caps[6].trim().to_string(),
    })
}
