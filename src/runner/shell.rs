// src/runner/shell.rs

//! Shell-exec runner
//!
//! Hands each migration artifact to an interpreter program
//! (`<program> <file>`). Exit status decides success; stdout and stderr are
//! surfaced in the result. Script and data artifacts are accepted alongside
//! modules, so the type gate does not apply here.

use crate::change::Change;
use crate::error::Result;
use crate::request::{Outcome, Request};
use crate::runner::{self, Runner, COMMITTED_MESSAGE, ROLLED_BACK_MESSAGE};
use serde_json::json;
use std::path::Path;
use std::process::Command;
use tracing::{debug, warn};

/// Explicit configuration for the shell runner
#[derive(Debug, Clone)]
pub struct ShellConfig {
    /// Interpreter invoked with the artifact path as its only argument
    pub program: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            program: "echo".to_string(),
        }
    }
}

/// Executes migration artifacts through an external interpreter
pub struct ShellRunner {
    config: ShellConfig,
}

impl ShellRunner {
    pub fn new(config: ShellConfig) -> Self {
        Self { config }
    }

    fn program<'a>(&'a self, req: &'a Request) -> &'a str {
        req.params
            .get("program")
            .map(String::as_str)
            .unwrap_or(&self.config.program)
    }

    fn run(&self, program: &str, file: &Path, req: &Request, ok_message: &str) -> Result<Outcome> {
        debug!(flow = %req.flow, program, file = %file.display(), "executing artifact");
        let output = Command::new(program).arg(file).output()?;

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let data = json!({ "stdout": stdout, "stderr": stderr });

        if output.status.success() {
            Ok(Outcome::ok_with(ok_message, data))
        } else {
            warn!(flow = %req.flow, file = %file.display(), status = %output.status, "artifact failed");
            Ok(Outcome::failure_with(
                format!("{} exited with {}", file.display(), output.status),
                data,
            ))
        }
    }
}

impl Runner for ShellRunner {
    fn configure(&self, _req: &Request) -> Result<Outcome> {
        Ok(Outcome::ok(format!(
            "Shell runner ready (program: {})",
            self.config.program
        )))
    }

    fn commit(&self, change: &mut Change, req: &Request) -> Result<Outcome> {
        match self.run(self.program(req), &change.file, req, COMMITTED_MESSAGE) {
            Ok(outcome) => Ok(outcome),
            Err(err) => Ok(Outcome::failure(err.to_string())),
        }
    }

    fn rollback(&self, change: &mut Change, req: &Request) -> Result<Outcome> {
        let rollback = match runner::rollback_file(change) {
            Ok(path) => path,
            Err(err) => return Ok(Outcome::failure(err.to_string())),
        };
        match self.run(self.program(req), &rollback, req, ROLLED_BACK_MESSAGE) {
            Ok(outcome) => Ok(outcome),
            Err(err) => Ok(Outcome::failure(err.to_string())),
        }
    }

    fn create(&self, name: &str, req: &Request) -> Result<Outcome> {
        runner::create_pair(name, req, &runner::SHELL_TEMPLATES)
    }
}
