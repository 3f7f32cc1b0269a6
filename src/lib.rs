//! # kennel
//!
//! Tracks batches of Cromwell workflows running on Google Cloud by tailing
//! the orchestrator's log and reconciling it against operation status.
//!
//! Provides the log classifier and per-workflow state machine, submission
//! status and cost rollups, abort fan-out, and the caches in front of the
//! cloud APIs.

pub mod adapter;
pub mod cache;
pub mod call;
pub mod config;
pub mod cost;
pub mod error;
pub mod event;
pub mod gcp;
pub mod line_source;
pub mod model;
pub mod telemetry;
pub mod workflow;
