//! costwatch — scheduled GCP cost anomaly detection.
//!
//! The binary's commands are thin wrappers over [`job::Job`], which reads
//! per-service spend through a [`CostSource`](costwatch_billing::CostSource),
//! flags anomalies, notifies Slack and GitHub, and records the run.

pub mod job;
pub mod schedule;

pub use job::{Job, JobOutcome, RunOptions};
