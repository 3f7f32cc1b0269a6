//! Submission tracking.
//!
//! A `SubmissionAdapter` reconstructs the state of one submission from the
//! orchestrator's log. Each `update()` reads the lines available right now,
//! up to a per-call limit, classifies them and routes the resulting events
//! to the workflow they name. Status and cost queries read the resulting tree and
//! reconcile it against remote operation status.
//!
//! The adapter takes `&mut self` for anything that advances state. Callers
//! that share one adapter between tasks wrap it in a single mutex.

use chrono::Utc;
use opentelemetry::KeyValue;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{Instrument, Span, debug, info, warn};

use crate::cache::{CacheKey, DiskCache, TtlCache};
use crate::call::{CallStatus, LogKind};
use crate::config::{CacheConfig, Config, RemoteConfig, Tuning};
use crate::cost::{CallUsage, summarize, usage_from_metadata};
use crate::error::{Error, Result};
use crate::event::{Event, classify};
use crate::gcp::{GcsStore, ObjectStore, Operations, PipelinesClient};
use crate::line_source::{BufferedLog, GcloudTailer, LineSource, LogTailer};
use crate::model::{
    CostSummary, OperationStatus, SubmissionRecord, SubmissionStatus, WorkflowDispatch, WorkflowId,
};
use crate::telemetry::{metrics, submission as spans};
use crate::workflow::{Workflow, WorkflowEvent, WorkflowStatus};

/// Collaborators and caches shared by every adapter in a process.
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub operations: Arc<dyn Operations>,
    pub tailer: Arc<dyn LogTailer>,
    pub disk: Arc<DiskCache>,
    pub cache: CacheConfig,
    pub remote: RemoteConfig,
    statuses: TtlCache<String, OperationStatus>,
}

impl Context {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        operations: Arc<dyn Operations>,
        tailer: Arc<dyn LogTailer>,
        disk: Arc<DiskCache>,
        tuning: &Tuning,
    ) -> Self {
        Self {
            store,
            operations,
            tailer,
            disk,
            cache: tuning.cache.clone(),
            remote: tuning.remote.clone(),
            statuses: TtlCache::new(tuning.cache.status_ttl(), tuning.cache.status_capacity),
        }
    }

    /// Production wiring: GCS, the Pipelines API and `gcloud` tailing.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let remote = &config.tuning.remote;
        let store = GcsStore::new(config.access_token.clone(), remote)?;
        let operations = PipelinesClient::new(config.access_token.clone(), remote)?;
        let disk = DiskCache::open(&config.cache_path, config.tuning.cache.disk_ttl_days).await?;
        Ok(Self::new(
            Arc::new(store),
            Arc::new(operations),
            Arc::new(GcloudTailer),
            Arc::new(disk),
            &config.tuning,
        ))
    }

    /// Operation status through the short-lived cache.
    ///
    /// A failed lookup is logged and reported as `None`.
    pub async fn operation_status(&self, operation: &str) -> Option<OperationStatus> {
        let key = operation.to_string();
        if let Some(status) = self.statuses.get(&key) {
            return Some(status);
        }
        match self.operations.status(operation).await {
            Ok(status) => {
                self.statuses.put(key, status.clone());
                Some(status)
            }
            Err(e) => {
                warn!(operation, error = %e, "operation status unavailable");
                metrics::remote_failures().add(1, &[KeyValue::new("operation", "status")]);
                None
            }
        }
    }

    pub fn forget_status(&self, operation: &str) {
        self.statuses.invalidate(&operation.to_string());
    }
}

/// Dispatch entry the `position`-th identified workflow corresponds to.
///
/// Workflows are matched to the submitted list purely by the order in which
/// the log reveals them.
pub fn dispatch_entry(dispatch: &[WorkflowDispatch], position: usize) -> Option<&WorkflowDispatch> {
    dispatch.get(position)
}

/// Hours an operation has run: up to its end time, or up to now while it
/// is still live.
fn operation_hours(status: &OperationStatus) -> Option<f64> {
    let start = status.start_time()?;
    let end = match status.end_time() {
        Some(end) => end,
        None if status.is_live() => Utc::now(),
        None => return None,
    };
    Some(((end - start).num_milliseconds() as f64 / 3_600_000.0).max(0.0))
}

/// A call's stored artifacts.
#[derive(Debug, Clone, PartialEq)]
pub struct CallReport {
    pub task_name: String,
    pub attempt: u32,
    pub status: CallStatus,
    pub return_code: Option<i32>,
    pub log: Option<String>,
}

pub struct SubmissionAdapter {
    ctx: Arc<Context>,
    bucket: String,
    submission_id: String,
    record: SubmissionRecord,
    workflows: BTreeMap<String, Workflow>,
    /// Input key -> full workflow id.
    workflow_mapping: HashMap<String, WorkflowId>,
    source: Option<Box<dyn LineSource>>,
    /// The open source is a complete log.
    source_final: bool,
    /// Occurrences of each event line in the open source so far.
    seen: HashMap<String, usize>,
    /// Occurrences of each event line applied since the adapter was opened.
    applied: HashMap<String, usize>,
    log_complete: bool,
    cost: Option<CostSummary>,
}

impl SubmissionAdapter {
    /// Load a submission's record, from the disk cache when it is terminal.
    pub async fn open(ctx: Arc<Context>, bucket: &str, submission_id: &str) -> Result<Self> {
        let key = CacheKey::submission(bucket, submission_id);
        let cached = match ctx.disk.get_json::<SubmissionRecord>(&key).await {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "disk cache unavailable");
                None
            }
        };

        let record = match cached {
            Some(record) => record,
            None => {
                let path = record_path(bucket, submission_id);
                let bytes = ctx
                    .store
                    .get(&path)
                    .await?
                    .ok_or_else(|| Error::NoSuchSubmission(submission_id.to_string()))?;
                let record: SubmissionRecord = serde_json::from_slice(&bytes)?;
                if record.terminal_status().is_some() {
                    if let Err(e) = ctx.disk.put_json(&key, &record).await {
                        warn!(error = %e, "failed to cache submission record");
                    }
                }
                record
            }
        };

        info!(
            submission_id,
            workspace = %record.workspace,
            dispatched = record.workflows.len(),
            "opened submission"
        );

        Ok(Self {
            ctx,
            bucket: bucket.to_string(),
            submission_id: submission_id.to_string(),
            record,
            workflows: BTreeMap::new(),
            workflow_mapping: HashMap::new(),
            source: None,
            source_final: false,
            seen: HashMap::new(),
            applied: HashMap::new(),
            log_complete: false,
            cost: None,
        })
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn submission_id(&self) -> &str {
        &self.submission_id
    }

    pub fn record(&self) -> &SubmissionRecord {
        &self.record
    }

    /// Workflows keyed by short id.
    pub fn workflows(&self) -> &BTreeMap<String, Workflow> {
        &self.workflows
    }

    /// Input key -> full workflow id, for every workflow correlated so far.
    pub fn workflow_mapping(&self) -> &HashMap<String, WorkflowId> {
        &self.workflow_mapping
    }

    /// The whole log has been read and no more lines can appear.
    pub fn log_complete(&self) -> bool {
        self.log_complete
    }

    fn root(&self) -> String {
        submission_root(&self.bucket, &self.submission_id)
    }

    fn stdout_log_path(&self) -> String {
        let operation = self.record.operation.rsplit('/').next().unwrap_or_default();
        format!("{}/logs/{operation}-stdout.log", self.root())
    }

    // -----------------------------------------------------------------------
    // Log pump
    // -----------------------------------------------------------------------

    /// Read the lines available right now, up to `max_update_lines`, and
    /// apply them.
    pub async fn update(&mut self) -> Result<()> {
        let span = spans::start_update_span(&self.submission_id);
        self.pump(&span).instrument(span.clone()).await
    }

    async fn pump(&mut self, span: &Span) -> Result<()> {
        if self.log_complete {
            return Ok(());
        }
        let Some(mut source) = self.take_source().await? else {
            return Ok(());
        };

        let poll = self.ctx.remote.line_poll();
        let limit = self.ctx.remote.max_update_lines.max(1);
        let mut lines = 0usize;
        while lines < limit && source.has_data(poll).await {
            let raw = match source.read_line().await {
                Ok(raw) => raw,
                Err(e) => {
                    warn!(error = %e, "log read failed");
                    break;
                }
            };
            lines += 1;

            let line = String::from_utf8_lossy(&raw);
            let Some(event) = classify(&line) else {
                continue;
            };
            if !self.first_application(&line) {
                continue;
            }
            metrics::log_events().add(1, &[KeyValue::new("kind", event.kind())]);
            self.dispatch(event, span);
        }
        if lines == limit {
            debug!(submission_id = %self.submission_id, lines, "update line limit reached");
        }

        span.record("log.lines", lines as u64);
        metrics::log_lines().add(lines as u64, &[]);

        if source.is_closed() {
            source.close().await;
            if self.source_final {
                debug!(submission_id = %self.submission_id, "log fully read");
                self.log_complete = true;
            }
        } else {
            self.source = Some(source);
        }
        Ok(())
    }

    /// Every source replays the log from its start, so the n-th copy of a
    /// line in the open source is new only if fewer than n copies have been
    /// applied. Lines that carry no event are never tracked.
    fn first_application(&mut self, line: &str) -> bool {
        let seen = self.seen.entry(line.to_string()).or_insert(0);
        *seen += 1;
        let applied = self.applied.entry(line.to_string()).or_insert(0);
        if *seen > *applied {
            *applied = *seen;
            true
        } else {
            false
        }
    }

    /// The open source, or a freshly opened one.
    ///
    /// A live tail is preferred while the orchestrator runs. Otherwise the
    /// persisted stdout blob is read. With neither available after the
    /// orchestrator has finished, the log is treated as permanently empty
    /// and the submission is marked `Error`.
    async fn take_source(&mut self) -> Result<Option<Box<dyn LineSource>>> {
        if let Some(source) = self.source.take() {
            return Ok(Some(source));
        }

        let status = self.ctx.operation_status(&self.record.operation).await;
        if let Some(compute) = status
            .as_ref()
            .filter(|s| s.is_live())
            .and_then(|s| s.compute_engine())
        {
            let tailed = self.ctx.tailer.tail(compute).await;
            match tailed {
                Ok(source) => {
                    self.seen.clear();
                    self.source_final = false;
                    return Ok(Some(source));
                }
                Err(e) => warn!(error = %e, "live log unavailable, falling back to stored log"),
            }
        }

        let done = status.as_ref().is_some_and(|s| s.done);
        let stored = self.ctx.store.get(&self.stdout_log_path()).await;
        match stored {
            Ok(Some(bytes)) => {
                self.seen.clear();
                self.source_final = done;
                Ok(Some(Box::new(BufferedLog::new(bytes))))
            }
            Ok(None) if done => {
                warn!(submission_id = %self.submission_id, "orchestrator finished without a log");
                self.log_complete = true;
                if self.record.terminal_status().is_none() {
                    self.persist_status(SubmissionStatus::Error).await?;
                }
                Ok(None)
            }
            Ok(None) => Ok(None),
            Err(e) => {
                warn!(error = %e, "stored log unavailable");
                metrics::remote_failures().add(1, &[KeyValue::new("operation", "fetch")]);
                Ok(None)
            }
        }
    }

    fn dispatch(&mut self, event: Event, span: &Span) {
        match event {
            Event::Dispatched { workflow_ids } => self.on_dispatched(workflow_ids),
            Event::Started { workflow_id } => self.on_started(workflow_id, span),
            Event::TaskStarted {
                short_id,
                workflow_name,
                task_name,
                attempt,
                operation,
            } => self.route(
                short_id,
                WorkflowEvent::Task {
                    workflow_name,
                    task_name,
                    attempt,
                    operation,
                },
                span,
            ),
            Event::Message { short_id, line } => {
                self.route(short_id, WorkflowEvent::Message(line), span)
            }
            Event::Failed {
                workflow_id,
                message,
            } => self.route(workflow_id.short(), WorkflowEvent::Failed(message), span),
            Event::StatusChanged {
                short_id,
                task_name,
                attempt,
                old_status,
                new_status,
            } => self.route(
                short_id,
                WorkflowEvent::StatusChanged {
                    task_name,
                    attempt,
                    old_status,
                    new_status,
                },
                span,
            ),
        }
    }

    fn workflow_entry(&mut self, short_id: String) -> &mut Workflow {
        let root = self.root();
        self.workflows
            .entry(short_id.clone())
            .or_insert_with(|| Workflow::new(short_id, root))
    }

    fn input_key_of(&self, id: &WorkflowId) -> Option<String> {
        self.workflow_mapping
            .iter()
            .find(|(_, mapped)| *mapped == id)
            .map(|(key, _)| key.clone())
    }

    fn on_dispatched(&mut self, workflow_ids: Vec<WorkflowId>) {
        let offset = self.workflow_mapping.len();
        let mut position = offset;
        for id in workflow_ids {
            if self.input_key_of(&id).is_some() {
                continue;
            }
            if let Some(entry) = dispatch_entry(&self.record.workflows, position) {
                self.workflow_mapping.insert(entry.output_key.clone(), id);
            } else {
                warn!(workflow_id = %id, position, "dispatched workflow has no dispatch entry");
            }
            position += 1;
            self.workflow_entry(id.short());
        }
        debug!(count = position - offset, "workflows dispatched");
    }

    fn on_started(&mut self, id: WorkflowId, span: &Span) {
        let short_id = id.short();
        let input_key = match self.input_key_of(&id) {
            // Announced by an earlier dispatch line.
            Some(key) => Some(key),
            None => {
                if self.workflows.get(&short_id).is_some_and(|w| w.is_started()) {
                    return;
                }
                // Half-started placeholder or an entirely new workflow: both
                // take the next unclaimed dispatch entry.
                let key = dispatch_entry(&self.record.workflows, self.workflow_mapping.len())
                    .map(|entry| entry.output_key.clone());
                if let Some(key) = &key {
                    self.workflow_mapping.insert(key.clone(), id);
                }
                key
            }
        };

        let workflow = self.workflow_entry(short_id.clone());
        let before = workflow.status();
        workflow.start(id, input_key);
        let after = workflow.status();
        if before != after {
            spans::record_workflow_transition(span, &short_id, &before.to_string(), &after.to_string());
        }
    }

    fn route(&mut self, short_id: String, event: WorkflowEvent, span: &Span) {
        let workflow = self.workflow_entry(short_id.clone());
        let before = workflow.status();
        workflow.handle(event);
        let after = workflow.status();
        if before != after {
            spans::record_workflow_transition(span, &short_id, &before.to_string(), &after.to_string());
        }
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    /// Status of the orchestrating operation, through the short-lived cache.
    pub async fn operation_status(&self) -> Option<OperationStatus> {
        self.ctx.operation_status(&self.record.operation).await
    }

    /// The persisted terminal status, or one derived from the orchestrating
    /// operation. A newly observed terminal status is written back.
    pub async fn submission_status(&mut self) -> SubmissionStatus {
        if let Some(status) = self.record.terminal_status() {
            return status;
        }
        let Some(operation) = self.operation_status().await else {
            return SubmissionStatus::Unknown;
        };
        let status = if operation.is_live() {
            SubmissionStatus::Running
        } else if operation.error.is_some() {
            SubmissionStatus::Failed
        } else {
            SubmissionStatus::Succeeded
        };
        if status.is_terminal() {
            if let Err(e) = self.persist_status(status).await {
                warn!(error = %e, "failed to persist submission status");
            }
        }
        status
    }

    /// Rewrite the durable record with a new status.
    async fn persist_status(&mut self, status: SubmissionStatus) -> Result<()> {
        info!(submission_id = %self.submission_id, %status, "persisting submission status");
        self.record.status = Some(status);

        let bytes = serde_json::to_vec(&self.record)?;
        let path = record_path(&self.bucket, &self.submission_id);
        if let Err(e) = self.ctx.store.put(&path, bytes, "application/json").await {
            metrics::remote_failures().add(1, &[KeyValue::new("operation", "persist")]);
            return Err(e);
        }

        if status.is_terminal() {
            let key = CacheKey::submission(&self.bucket, &self.submission_id);
            if let Err(e) = self.ctx.disk.put_json(&key, &self.record).await {
                warn!(error = %e, "failed to cache submission record");
            }
        }
        Ok(())
    }

    /// Workflow counts by status. Dispatch entries not yet seen in the log
    /// count as pending.
    pub fn status_summary(&self) -> BTreeMap<WorkflowStatus, usize> {
        let mut summary = BTreeMap::new();
        for workflow in self.workflows.values() {
            *summary.entry(workflow.status()).or_insert(0) += 1;
        }
        let unseen = self.record.workflows.len().saturating_sub(self.workflows.len());
        if unseen > 0 {
            *summary.entry(WorkflowStatus::Pending).or_insert(0) += unseen;
        }
        summary
    }

    /// Workflow launched for an entity, if it has been identified.
    pub fn workflow_for_entity(&self, entity: &str) -> Option<&Workflow> {
        let entry = self.record.workflows.iter().find(|w| w.entity == entity)?;
        let id = self.workflow_mapping.get(&entry.output_key)?;
        self.workflows.get(&id.short())
    }

    /// Return code and one log of a task in a workflow: the given attempt,
    /// or the latest one. `None` if no such call has been seen.
    pub async fn call_report(
        &mut self,
        short_id: &str,
        task: &str,
        attempt: Option<u32>,
        kind: LogKind,
    ) -> Result<Option<CallReport>> {
        let store = self.ctx.store.clone();
        let ttl = self.ctx.cache.return_code_ttl();
        let Some(call) = self.workflows.get_mut(short_id).and_then(|w| {
            w.calls_mut()
                .iter_mut()
                .rev()
                .find(|c| c.task_name == task && attempt.is_none_or(|n| c.attempt == n))
        }) else {
            return Ok(None);
        };

        let return_code = call.return_code(store.as_ref(), ttl).await?;
        let log = call.read_log(store.as_ref(), kind).await?;
        Ok(Some(CallReport {
            task_name: call.task_name.clone(),
            attempt: call.attempt,
            status: call.status.clone(),
            return_code,
            log,
        }))
    }

    /// Entities whose workflow failed, once the submission is over.
    pub async fn retry_entities(&mut self) -> Vec<String> {
        if !self.submission_status().await.is_terminal() {
            return Vec::new();
        }
        self.record
            .workflows
            .iter()
            .filter(|entry| {
                self.workflow_for_entity(&entry.entity).is_some_and(|w| {
                    w.status() == WorkflowStatus::Failed || w.failure().is_some()
                })
            })
            .map(|entry| entry.entity.clone())
            .collect()
    }

    // -----------------------------------------------------------------------
    // Cost
    // -----------------------------------------------------------------------

    /// Estimated cost so far. Never fails; any error yields a zeroed summary.
    pub async fn cost(&mut self) -> CostSummary {
        if let Some(summary) = self.cost {
            metrics::cost_estimates().add(1, &[KeyValue::new("path", "cached")]);
            return summary;
        }
        match self.compute_cost().await {
            Ok((summary, path)) => {
                metrics::cost_estimates().add(1, &[KeyValue::new("path", path)]);
                summary
            }
            Err(e) => {
                warn!(submission_id = %self.submission_id, error = %e, "cost estimate failed");
                metrics::cost_estimates().add(1, &[KeyValue::new("path", "failed")]);
                CostSummary::default()
            }
        }
    }

    async fn compute_cost(&mut self) -> Result<(CostSummary, &'static str)> {
        let terminal = self.submission_status().await.is_terminal();
        let key = CacheKey::cost(&self.bucket, &self.submission_id);

        if terminal {
            if let Some(summary) = self.ctx.disk.get_json::<CostSummary>(&key).await? {
                self.cost = Some(summary);
                return Ok((summary, "cached"));
            }
        }

        // Without its own runtime the orchestrator is billed for the
        // longest call, and the estimate is not memoized.
        let operation = self.operation_status().await;
        let machine_type = self.orchestrator_machine_type(operation.as_ref());
        let runtime = operation.as_ref().and_then(operation_hours);
        let orchestrator = Some((machine_type.as_str(), runtime.unwrap_or(0.0)));

        if terminal {
            let results = format!("{}/results/workflows.json", self.root());
            if let Some(blob) = self.ctx.store.get(&results).await? {
                let usage = usage_from_metadata(&blob)?;
                let summary = summarize(&usage, orchestrator);
                if runtime.is_some() {
                    self.remember_cost(&key, summary).await;
                }
                return Ok((summary, "fast"));
            }
        }

        self.update().await?;
        let mut usage = Vec::new();
        for workflow in self.workflows.values() {
            for call in workflow.calls() {
                let Some(status) = self.ctx.operation_status(&call.operation).await else {
                    continue;
                };
                let (Some(machine_type), Some(hours)) = (status.machine_type(), operation_hours(&status))
                else {
                    debug!(operation = %call.operation, "skipping call with incomplete status");
                    continue;
                };
                usage.push(CallUsage {
                    machine_type: machine_type.to_string(),
                    preemptible: status.preemptible(),
                    hours,
                });
            }
        }
        let summary = summarize(&usage, orchestrator);
        if terminal && self.log_complete && runtime.is_some() {
            self.remember_cost(&key, summary).await;
        }
        Ok((summary, "slow"))
    }

    async fn remember_cost(&mut self, key: &CacheKey, summary: CostSummary) {
        self.cost = Some(summary);
        if let Err(e) = self.ctx.disk.put_json(key, &summary).await {
            warn!(error = %e, "failed to cache cost");
        }
    }

    /// Machine type of the orchestrator's VM: as reported by the operation,
    /// else as implied by the requested memory.
    pub fn orchestrator_machine_type(&self, operation: Option<&OperationStatus>) -> String {
        operation
            .and_then(|o| o.machine_type())
            .map(str::to_string)
            .or_else(|| self.record.runtime.as_ref().map(|r| r.machine_type()))
            .unwrap_or_else(|| "n1-standard-1".to_string())
    }

    // -----------------------------------------------------------------------
    // Abort
    // -----------------------------------------------------------------------

    /// Cancel the submission and everything it launched, then persist
    /// `Aborted`. Only a failure to persist is returned.
    pub async fn abort(&mut self) -> Result<()> {
        if let Err(e) = self.update().await {
            warn!(error = %e, "final update before abort failed");
        }

        let operation = self.record.operation.clone();
        if let Err(e) = self.ctx.operations.cancel(&operation).await {
            warn!(operation = %operation, error = %e, "failed to cancel submission");
            metrics::remote_failures().add(1, &[KeyValue::new("operation", "cancel")]);
        }
        self.ctx.forget_status(&operation);

        for workflow in self.workflows.values() {
            workflow.abort(self.ctx.operations.as_ref()).await;
        }

        self.persist_status(SubmissionStatus::Aborted).await
    }
}

pub fn submission_root(bucket: &str, submission_id: &str) -> String {
    format!("gs://{bucket}/lapdog-executions/{submission_id}")
}

pub fn record_path(bucket: &str, submission_id: &str) -> String {
    format!("{}/submission.json", submission_root(bucket, submission_id))
}
