// src/runner/mongosh.rs

//! Shell-evaluator runner
//!
//! Wraps the migration file's contents in a session/transaction template
//! and pipes the wrapped script to an interactive `mongosh` bound to the
//! same connection string the tracker uses.

use crate::change::Change;
use crate::error::{Error, Result};
use crate::request::{Outcome, Request};
use crate::runner::{self, Runner, COMMITTED_MESSAGE, ROLLED_BACK_MESSAGE};
use serde_json::json;
use std::io::Write;
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, warn};

/// Explicit configuration for the shell evaluator
#[derive(Debug, Clone)]
pub struct MongoshConfig {
    /// Connection string shared with the tracker
    pub uri: String,
    /// Shell binary
    pub program: String,
}

impl Default for MongoshConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".to_string(),
            program: "mongosh".to_string(),
        }
    }
}

/// Evaluates migration scripts in a mongosh process
pub struct MongoshRunner {
    config: MongoshConfig,
}

impl MongoshRunner {
    pub fn new(config: MongoshConfig) -> Self {
        Self { config }
    }

    /// Surround user code with the transactional session scaffolding
    fn wrap_transactional(body: &str) -> String {
        format!(
            "const session = db.getMongo().startSession();\n\
             session.startTransaction();\n\
             try {{\n\
             {}\n\
             session.commitTransaction();\n\
             }} catch (err) {{\n\
             session.abortTransaction();\n\
             throw err;\n\
             }} finally {{\n\
             session.endSession();\n\
             }}\n",
            body
        )
    }

    fn load_script(&self, file: &Path) -> Result<String> {
        let body = std::fs::read_to_string(file)?;
        if body.trim().is_empty() {
            return Err(Error::Migration(format!(
                "Empty migration file: {}",
                file.display()
            )));
        }
        Ok(Self::wrap_transactional(&body))
    }

    fn evaluate(&self, script: &str, req: &Request, ok_message: &str) -> Result<Outcome> {
        debug!(flow = %req.flow, program = %self.config.program, "evaluating wrapped script");

        let mut child = Command::new(&self.config.program)
            .arg(&self.config.uri)
            .arg("--quiet")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(script.as_bytes())?;
        }

        let output = child.wait_with_output()?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let data = json!({ "stdout": stdout, "stderr": stderr });

        if output.status.success() {
            Ok(Outcome::ok_with(ok_message, data))
        } else {
            warn!(flow = %req.flow, status = %output.status, "shell evaluation failed");
            Ok(Outcome::failure_with(
                format!("{} exited with {}", self.config.program, output.status),
                data,
            ))
        }
    }
}

impl Runner for MongoshRunner {
    fn configure(&self, _req: &Request) -> Result<Outcome> {
        Ok(Outcome::ok(format!(
            "Shell evaluator ready (program: {})",
            self.config.program
        )))
    }

    fn commit(&self, change: &mut Change, req: &Request) -> Result<Outcome> {
        if let Some(rejected) = runner::module_gate(change) {
            return Ok(rejected);
        }

        let script = match self.load_script(&change.file) {
            Ok(script) => script,
            Err(err) => return Ok(Outcome::failure(err.to_string())),
        };
        change.content = Some(script.clone());
        self.evaluate(&script, req, COMMITTED_MESSAGE)
    }

    fn rollback(&self, change: &mut Change, req: &Request) -> Result<Outcome> {
        if let Some(rejected) = runner::module_gate(change) {
            return Ok(rejected);
        }

        let script = match runner::rollback_file(change).and_then(|f| self.load_script(&f)) {
            Ok(script) => script,
            Err(err) => return Ok(Outcome::failure(err.to_string())),
        };
        self.evaluate(&script, req, ROLLED_BACK_MESSAGE)
    }

    fn create(&self, name: &str, req: &Request) -> Result<Outcome> {
        runner::create_pair(name, req, &runner::SCRIPT_TEMPLATES)
    }
}
