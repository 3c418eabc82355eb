// src/service.rs

//! Migration orchestration service
//!
//! Resolves the (runner, tracker) pair by name, iterates a batch strictly in
//! order, and persists exactly the prefix that succeeded: the first failing
//! change stops the batch, everything before it is recorded (commit) or
//! removed (rollback).

use crate::change::Change;
use crate::error::{Error, Result};
use crate::registry::{Registry, RUNNER_PREFIX, TRACKER_PREFIX};
use crate::request::{Outcome, Request};
use crate::runner::Runner;
use crate::tracker::Tracker;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Default driver name when a request names none
pub const DEFAULT_DRIVER: &str = "mdb";

/// Sequences trackers and runners for a single invocation
pub struct MigrationService {
    registry: Arc<Registry>,
    runner_prefix: String,
    tracker_prefix: String,
}

impl MigrationService {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self {
            registry,
            runner_prefix: RUNNER_PREFIX.to_string(),
            tracker_prefix: TRACKER_PREFIX.to_string(),
        }
    }

    pub fn with_prefixes(
        registry: Arc<Registry>,
        runner_prefix: impl Into<String>,
        tracker_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            runner_prefix: runner_prefix.into(),
            tracker_prefix: tracker_prefix.into(),
        }
    }

    /// Resolve the (runner, tracker) pair named by the request
    fn drivers(&self, req: &Request) -> Result<(Arc<dyn Runner>, Arc<dyn Tracker>)> {
        let runner_name = req
            .runner
            .as_deref()
            .unwrap_or(DEFAULT_DRIVER)
            .to_lowercase();
        let tracker_name = req
            .tracker
            .as_deref()
            .unwrap_or(DEFAULT_DRIVER)
            .to_lowercase();

        let runner = self
            .registry
            .runner(&format!("{}:{}", self.runner_prefix, runner_name))?;
        let tracker = self
            .registry
            .tracker(&format!("{}:{}", self.tracker_prefix, tracker_name))?;
        debug!(flow = %req.flow, runner = %runner_name, tracker = %tracker_name, "drivers resolved");
        Ok((runner, tracker))
    }

    /// Apply every available change in order; stop at the first failure and
    /// persist the applied prefix either way.
    pub fn commit(&self, req: &Request) -> Outcome {
        self.guarded(req, "commit", |req| self.run_commit(req))
    }

    fn run_commit(&self, req: &Request) -> Result<Outcome> {
        let (runner, tracker) = self.drivers(req)?;
        tracker.configure(req)?;

        let pending = tracker.available(req)?;
        info!(flow = %req.flow, pending = pending.len(), "commit batch starting");

        let mut valid: Vec<Change> = Vec::new();
        let mut data: Vec<Value> = Vec::new();
        let mut stopped_at: Option<String> = None;

        for mut change in pending {
            match runner.commit(&mut change, req) {
                Ok(result) if result.success => {
                    change.applied = Some(Utc::now());
                    if let Some(tag) = &req.filter.tag {
                        if !change.tags.contains(tag) {
                            change.tags.push(tag.clone());
                        }
                    }
                    data.push(serde_json::to_value(&result).unwrap_or_default());
                    valid.push(change);
                }
                Ok(result) => {
                    error!(
                        flow = %req.flow,
                        change = %change.name,
                        "commit failed: {}",
                        result.message.as_deref().unwrap_or("unknown error")
                    );
                    stopped_at = Some(change.name.clone());
                    break;
                }
                Err(err) => {
                    error!(flow = %req.flow, change = %change.name, "commit failed: {}", err);
                    stopped_at = Some(change.name.clone());
                    break;
                }
            }
        }

        // The applied prefix is persisted even when the batch stopped early
        let recorded = tracker.add(valid, req)?;
        if !recorded.success {
            return Ok(Outcome::failure_with(
                recorded
                    .message
                    .unwrap_or_else(|| "Applied log write failed".to_string()),
                Value::Array(data),
            ));
        }

        let message = match stopped_at {
            Some(name) => format!("Committed {} change(s); stopped at '{}'", data.len(), name),
            None => format!("Committed {} change(s)", data.len()),
        };
        Ok(Outcome::ok_with(message, Value::Array(data)))
    }

    /// Revert applied changes most-recent-first; stop at the first failure
    /// and remove the rolled-back prefix from the log either way.
    pub fn rollback(&self, req: &Request) -> Outcome {
        self.guarded(req, "rollback", |req| self.run_rollback(req))
    }

    fn run_rollback(&self, req: &Request) -> Result<Outcome> {
        let (runner, tracker) = self.drivers(req)?;
        tracker.configure(req)?;

        let mut applied = tracker.list(req)?;
        applied.reverse();
        info!(flow = %req.flow, applied = applied.len(), "rollback batch starting");

        let mut valid: Vec<Change> = Vec::new();
        let mut data: Vec<Value> = Vec::new();
        let mut stopped_at: Option<String> = None;

        for mut change in applied {
            match runner.rollback(&mut change, req) {
                Ok(result) if result.success => {
                    data.push(serde_json::to_value(&result).unwrap_or_default());
                    valid.push(change);
                }
                Ok(result) => {
                    error!(
                        flow = %req.flow,
                        change = %change.name,
                        "rollback failed: {}",
                        result.message.as_deref().unwrap_or("unknown error")
                    );
                    stopped_at = Some(change.name.clone());
                    break;
                }
                Err(err) => {
                    error!(flow = %req.flow, change = %change.name, "rollback failed: {}", err);
                    stopped_at = Some(change.name.clone());
                    break;
                }
            }
        }

        let removed = tracker.remove(&valid, req)?;
        if !removed.success {
            return Ok(Outcome::failure_with(
                removed
                    .message
                    .unwrap_or_else(|| "Applied log removal failed".to_string()),
                Value::Array(data),
            ));
        }

        let message = match stopped_at {
            Some(name) => format!(
                "Rolled back {} change(s); stopped at '{}'",
                data.len(),
                name
            ),
            None => format!("Rolled back {} change(s)", data.len()),
        };
        Ok(Outcome::ok_with(message, Value::Array(data)))
    }

    /// Human-facing view of the tracker's set algebra
    pub fn status(&self, req: &Request) -> Outcome {
        self.guarded(req, "status", |req| {
            let (_, tracker) = self.drivers(req)?;
            tracker.status(req)
        })
    }

    /// Delegated schema comparison; no shipped runner implements it
    pub fn compare(&self, req: &Request) -> Outcome {
        self.guarded(req, "compare", |req| {
            let (runner, _) = self.drivers(req)?;
            runner.compare(req)
        })
    }

    /// Delegated backend probe
    pub fn check(&self, req: &Request) -> Outcome {
        self.guarded(req, "check", |req| {
            let (runner, _) = self.drivers(req)?;
            runner.check(req)
        })
    }

    /// Scaffold a new migration pair through the resolved runner
    pub fn create(&self, req: &Request) -> Outcome {
        self.guarded(req, "create", |req| {
            let name = req
                .params
                .get("name")
                .ok_or_else(|| Error::Migration("Missing migration name".to_string()))?;
            let (runner, _) = self.drivers(req)?;
            runner.create(name, req)
        })
    }

    /// Boundary for future external configuration sources
    pub fn configure(&self, req: &Request) -> Outcome {
        self.guarded(req, "configure", |_| Err(Error::NotImplemented))
    }

    /// Convert operation errors into failure outcomes at the service
    /// boundary; nothing below the service panics across it.
    fn guarded(
        &self,
        req: &Request,
        operation: &str,
        f: impl FnOnce(&Request) -> Result<Outcome>,
    ) -> Outcome {
        match f(req) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(flow = %req.flow, operation, "{}", err);
                Outcome::failure(err.to_string())
            }
        }
    }
}
