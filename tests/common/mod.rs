//! In-memory fakes for the remote collaborators.
#![allow(dead_code)]

use async_trait::async_trait;
use kennel::adapter::Context;
use kennel::cache::DiskCache;
use kennel::config::Tuning;
use kennel::error::{Error, Result};
use kennel::gcp::{ObjectStore, Operations};
use kennel::line_source::{BufferedLog, LineSource, LogTailer};
use kennel::model::{ComputeEngine, OperationStatus};
use serde_json::{Value, json};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const BUCKET: &str = "bucket";
pub const SUBMISSION: &str = "sub1";
pub const OPERATION: &str = "projects/proj/operations/op1";
pub const ROOT: &str = "gs://bucket/lapdog-executions/sub1";

pub fn record_path() -> String {
    format!("{ROOT}/submission.json")
}

pub fn stdout_log_path() -> String {
    format!("{ROOT}/logs/op1-stdout.log")
}

pub fn results_path() -> String {
    format!("{ROOT}/results/workflows.json")
}

/// A submission record with one dispatch entry per `(output key, entity)`.
pub fn record(entries: &[(&str, &str)], status: Option<&str>) -> Value {
    let workflows: Vec<Value> = entries
        .iter()
        .map(|(key, entity)| json!({ "workflowOutputKey": key, "workflowEntity": entity }))
        .collect();
    let mut record = json!({
        "workspace": "ws",
        "namespace": "ns",
        "identifier": SUBMISSION,
        "operation": OPERATION,
        "workflows": workflows,
        "submitter": "someone@example.com",
    });
    if let Some(status) = status {
        record["status"] = json!(status);
    }
    record
}

/// Orchestrator status with a VM attached.
pub fn live_status() -> OperationStatus {
    serde_json::from_value(json!({
        "done": false,
        "metadata": {
            "runtimeMetadata": {
                "computeEngine": { "zone": "us-central1-a", "instanceName": "cromwell-1" }
            }
        }
    }))
    .unwrap()
}

pub fn done_status() -> OperationStatus {
    serde_json::from_value(json!({ "done": true, "metadata": {} })).unwrap()
}

pub fn timed_status(machine_type: &str, start: &str, end: &str, done: bool) -> OperationStatus {
    serde_json::from_value(json!({
        "done": done,
        "metadata": {
            "startTime": start,
            "endTime": end,
            "pipeline": {
                "resources": { "virtualMachine": { "machineType": machine_type } }
            },
            "runtimeMetadata": {
                "computeEngine": { "zone": "us-central1-b", "instanceName": "worker-1" }
            }
        }
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Object store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn insert(&self, path: &str, data: impl Into<Vec<u8>>) {
        self.blobs.lock().unwrap().insert(path.to_string(), data.into());
    }

    pub fn insert_json(&self, path: &str, value: &Value) {
        self.insert(path, serde_json::to_vec(value).unwrap());
    }

    pub fn remove(&self, path: &str) {
        self.blobs.lock().unwrap().remove(path);
    }

    pub fn json(&self, path: &str) -> Option<Value> {
        let blobs = self.blobs.lock().unwrap();
        blobs.get(path).map(|b| serde_json::from_slice(b).unwrap())
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().unwrap().get(path).cloned())
    }

    async fn put(&self, path: &str, data: Vec<u8>, _content_type: &str) -> Result<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(path, data);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeOperations {
    statuses: Mutex<HashMap<String, OperationStatus>>,
    failing_cancels: Mutex<HashSet<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub deleted: Mutex<Vec<(String, String, String)>>,
    status_calls: AtomicUsize,
}

impl FakeOperations {
    pub fn set_status(&self, operation: &str, status: OperationStatus) {
        self.statuses
            .lock()
            .unwrap()
            .insert(operation.to_string(), status);
    }

    pub fn fail_cancel(&self, operation: &str) {
        self.failing_cancels
            .lock()
            .unwrap()
            .insert(operation.to_string());
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn deleted(&self) -> Vec<(String, String, String)> {
        self.deleted.lock().unwrap().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Operations for FakeOperations {
    async fn status(&self, operation: &str) -> Result<OperationStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        self.statuses
            .lock()
            .unwrap()
            .get(operation)
            .cloned()
            .ok_or_else(|| Error::Remote {
                status: 404,
                message: format!("no operation {operation}"),
            })
    }

    async fn cancel(&self, operation: &str) -> Result<()> {
        self.cancelled.lock().unwrap().push(operation.to_string());
        if self.failing_cancels.lock().unwrap().contains(operation) {
            return Err(Error::Remote {
                status: 503,
                message: "backend unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn delete_instance(&self, project: &str, zone: &str, instance: &str) -> Result<()> {
        self.deleted.lock().unwrap().push((
            project.to_string(),
            zone.to_string(),
            instance.to_string(),
        ));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tailer
// ---------------------------------------------------------------------------

/// Replays the same script on every attach, like `docker logs -f` does.
/// Queued scripts are served first, one per attach.
#[derive(Default)]
pub struct ScriptedTailer {
    lines: Mutex<Option<Vec<String>>>,
    queued: Mutex<VecDeque<Vec<String>>>,
    opens: AtomicUsize,
}

impl ScriptedTailer {
    pub fn new(lines: &[&str]) -> Self {
        Self {
            lines: Mutex::new(Some(lines.iter().map(|l| l.to_string()).collect())),
            ..Self::default()
        }
    }

    /// A different script on each attach; the last one repeats.
    pub fn attaches(scripts: &[&[&str]]) -> Self {
        let mut queued: VecDeque<Vec<String>> = scripts
            .iter()
            .map(|lines| lines.iter().map(|l| l.to_string()).collect())
            .collect();
        let last = queued.pop_back();
        Self {
            lines: Mutex::new(last),
            queued: Mutex::new(queued),
            ..Self::default()
        }
    }

    /// A tailer that can never attach.
    pub fn unavailable() -> Self {
        Self::default()
    }

    pub fn push(&self, line: &str) {
        if let Some(lines) = self.lines.lock().unwrap().as_mut() {
            lines.push(line.to_string());
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LogTailer for ScriptedTailer {
    async fn tail(&self, _compute: &ComputeEngine) -> Result<Box<dyn LineSource>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let queued = self.queued.lock().unwrap().pop_front();
        let lines = queued.or_else(|| self.lines.lock().unwrap().clone());
        match lines {
            Some(lines) => Ok(Box::new(BufferedLog::new(lines.join("\n").into_bytes()))),
            None => Err(Error::Other("ssh: connection refused".to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub operations: Arc<FakeOperations>,
    pub tailer: Arc<ScriptedTailer>,
    pub ctx: Arc<Context>,
}

pub async fn harness(tailer: ScriptedTailer) -> Harness {
    let mut tuning = Tuning::default();
    tuning.remote.line_poll_ms = 10;
    tuned_harness(tailer, tuning).await
}

pub async fn tuned_harness(tailer: ScriptedTailer, tuning: Tuning) -> Harness {
    let store = Arc::new(MemoryStore::default());
    let operations = Arc::new(FakeOperations::default());
    let tailer = Arc::new(tailer);
    let disk = Arc::new(DiskCache::in_memory(30).await.unwrap());

    let ctx = Arc::new(Context::new(
        store.clone(),
        operations.clone(),
        tailer.clone(),
        disk,
        &tuning,
    ));
    Harness {
        store,
        operations,
        tailer,
        ctx,
    }
}
