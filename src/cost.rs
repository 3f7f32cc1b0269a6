//! Compute cost estimation.
//!
//! Hourly rates for the machine shapes Cromwell launches, in two tiers
//! (standard and preemptible). Custom shapes are priced per core and per
//! GiB, with a surcharge for memory past the extended-memory threshold.
//! Unknown shapes cost nothing.

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::error::Result;
use crate::model::CostSummary;

pub use crate::model::parse_timestamp;

/// (machine type, standard $/h, preemptible $/h)
const MACHINE_RATES: &[(&str, f64, f64)] = &[
    ("f1-micro", 0.0076, 0.0035),
    ("g1-small", 0.0257, 0.007),
    ("n1-standard-1", 0.0475, 0.01),
    ("n1-standard-2", 0.095, 0.02),
    ("n1-standard-4", 0.19, 0.04),
    ("n1-standard-8", 0.38, 0.08),
    ("n1-standard-16", 0.76, 0.16),
    ("n1-standard-32", 1.52, 0.32),
    ("n1-standard-64", 3.04, 0.64),
    ("n1-standard-96", 4.56, 0.96),
    ("n1-highmem-2", 0.1184, 0.025),
    ("n1-highmem-4", 0.2368, 0.05),
    ("n1-highmem-8", 0.4736, 0.1),
    ("n1-highmem-16", 0.9472, 0.2),
    ("n1-highmem-32", 1.8944, 0.4),
    ("n1-highmem-64", 3.7888, 0.8),
    ("n1-highmem-96", 5.6832, 1.2),
    ("n1-highcpu-2", 0.0709, 0.015),
    ("n1-highcpu-4", 0.1418, 0.03),
    ("n1-highcpu-8", 0.2836, 0.06),
    ("n1-highcpu-16", 0.5672, 0.12),
    ("n1-highcpu-32", 1.1344, 0.24),
    ("n1-highcpu-64", 2.2688, 0.48),
    ("n1-highcpu-96", 3.402, 0.72),
];

// Custom shapes: (standard, preemptible)
const CUSTOM_CORE: (f64, f64) = (0.033174, 0.00698);
const CUSTOM_MEMORY_GIB: (f64, f64) = (0.004446, 0.00094);
const CUSTOM_EXTENDED_GIB: (f64, f64) = (0.009550, 0.002014);

/// Memory past this many MiB is billed at the extended rate.
pub const EXTENDED_MEMORY_THRESHOLD_MB: u64 = 13312;

fn pick(rates: (f64, f64), preemptible: bool) -> f64 {
    if preemptible { rates.1 } else { rates.0 }
}

/// Strip any zone prefix (`zones/us-central1-b/machineTypes/n1-standard-4`).
fn shape(machine_type: &str) -> &str {
    machine_type.rsplit('/').next().unwrap_or(machine_type)
}

/// `custom-{cores}-{memory_mb}`, optionally with an `n1-` family prefix.
fn parse_custom(name: &str) -> Option<(u32, u64)> {
    let rest = name
        .strip_prefix("n1-custom-")
        .or_else(|| name.strip_prefix("custom-"))?;
    let (cores, memory) = rest.split_once('-')?;
    let memory = memory.strip_suffix("-ext").unwrap_or(memory);
    Some((cores.parse().ok()?, memory.parse().ok()?))
}

/// Dollars per hour for one VM of the given shape.
pub fn hourly_rate(machine_type: &str, preemptible: bool) -> f64 {
    let name = shape(machine_type);
    if let Some(&(_, standard, reduced)) = MACHINE_RATES.iter().find(|(n, _, _)| *n == name) {
        return if preemptible { reduced } else { standard };
    }
    if let Some((cores, memory_mb)) = parse_custom(name) {
        let extended_mb = memory_mb.saturating_sub(EXTENDED_MEMORY_THRESHOLD_MB);
        return cores as f64 * pick(CUSTOM_CORE, preemptible)
            + memory_mb as f64 / 1024.0 * pick(CUSTOM_MEMORY_GIB, preemptible)
            + extended_mb as f64 / 1024.0 * pick(CUSTOM_EXTENDED_GIB, preemptible);
    }
    warn!(machine_type, "unknown machine type, assuming zero cost");
    0.0
}

/// Resource usage of one completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct CallUsage {
    pub machine_type: String,
    pub preemptible: bool,
    pub hours: f64,
}

impl CallUsage {
    pub fn cost(&self) -> f64 {
        hourly_rate(&self.machine_type, self.preemptible) * self.hours
    }
}

/// Roll call usage up into a summary.
///
/// Wall-clock time is the longest single call, or the orchestrator's own
/// runtime if that is longer. The orchestrator is billed (at the standard
/// rate) for the whole wall-clock time.
pub fn summarize(calls: &[CallUsage], orchestrator: Option<(&str, f64)>) -> CostSummary {
    let mut summary = CostSummary::default();
    for call in calls {
        summary.cpu_h += call.hours;
        summary.est_cost += call.cost();
        summary.clock_h = summary.clock_h.max(call.hours);
    }
    if let Some((machine_type, hours)) = orchestrator {
        summary.clock_h = summary.clock_h.max(hours);
        summary.est_cost += hourly_rate(machine_type, false) * summary.clock_h;
    }
    summary
}

/// Hours between two operation timestamps; `None` if either is missing.
pub fn elapsed_hours(start: Option<&str>, end: Option<&str>) -> Option<f64> {
    let start = parse_timestamp(start?)?;
    let end = parse_timestamp(end?)?;
    Some(((end - start).num_milliseconds() as f64 / 3_600_000.0).max(0.0))
}

// ---------------------------------------------------------------------------
// Post-hoc workflow metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct WorkflowResult {
    #[serde(default)]
    workflow_metadata: Option<WorkflowMetadata>,
}

#[derive(Debug, Deserialize)]
struct WorkflowMetadata {
    #[serde(default)]
    calls: BTreeMap<String, Vec<CallMetadata>>,
}

#[derive(Debug, Deserialize)]
struct CallMetadata {
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
    #[serde(default)]
    jes: Option<JesMetadata>,
}

#[derive(Debug, Deserialize)]
struct JesMetadata {
    #[serde(default, rename = "machineType")]
    machine_type: Option<String>,
    #[serde(default)]
    preemptible: Option<serde_json::Value>,
}

fn truthy(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::Bool(b) => *b,
        serde_json::Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Parse the authoritative `workflows.json` blob into per-call usage.
///
/// Calls missing timestamps or a machine type are skipped.
pub fn usage_from_metadata(blob: &[u8]) -> Result<Vec<CallUsage>> {
    let results: Vec<WorkflowResult> = serde_json::from_slice(blob)?;
    let mut usage = Vec::new();
    for metadata in results.into_iter().filter_map(|r| r.workflow_metadata) {
        for (task, calls) in metadata.calls {
            for call in calls {
                let hours = elapsed_hours(call.start.as_deref(), call.end.as_deref());
                let machine_type = call.jes.as_ref().and_then(|j| j.machine_type.clone());
                let (Some(hours), Some(machine_type)) = (hours, machine_type) else {
                    debug!(task = %task, "skipping call with incomplete metadata");
                    continue;
                };
                let preemptible = call
                    .jes
                    .as_ref()
                    .and_then(|j| j.preemptible.as_ref())
                    .is_some_and(truthy);
                usage.push(CallUsage {
                    machine_type,
                    preemptible,
                    hours,
                });
            }
        }
    }
    Ok(usage)
}
