// src/runner/mod.rs

//! Runner drivers
//!
//! A runner executes a single migration against its target backend. The
//! shared pieces of the execution skeleton live here as free helpers: the
//! module type gate, migration-key formation, content loading, rollback-path
//! derivation, metadata merge, and template-pair scaffolding. Backends
//! compose them into their own `commit`/`rollback` strategies.

pub mod mongo;
pub mod mongosh;
pub mod shell;

use crate::change::{Change, ChangeKind, TIMESTAMP_FORMAT};
use crate::error::{Error, Result};
use crate::request::{Outcome, Request};
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::info;

pub const NOT_IMPLEMENTED: &str = "Not implemented";
pub const TYPE_GATE_MESSAGE: &str = "Only 'module' type changes are supported";
pub const COMMITTED_MESSAGE: &str = "Migration committed";
pub const ROLLED_BACK_MESSAGE: &str = "Migration rolled back";

/// Per-change executor
pub trait Runner: Send + Sync {
    /// Idempotent backend initialization; invoked lazily by
    /// `commit`/`rollback` when the backend is not yet ready
    fn configure(&self, _req: &Request) -> Result<Outcome> {
        Ok(Outcome::failure(NOT_IMPLEMENTED))
    }

    /// Schema comparison surface; no shipped backend implements it
    fn compare(&self, _req: &Request) -> Result<Outcome> {
        Ok(Outcome::failure(NOT_IMPLEMENTED))
    }

    /// Backend health probe
    fn check(&self, _req: &Request) -> Result<Outcome> {
        Ok(Outcome::failure(NOT_IMPLEMENTED))
    }

    /// Apply one change. Per-change failures are reported as
    /// `success: false`, never as process-level errors.
    fn commit(&self, change: &mut Change, req: &Request) -> Result<Outcome>;

    /// Revert one change
    fn rollback(&self, change: &mut Change, req: &Request) -> Result<Outcome>;

    /// Load the artifact body into `change.content`
    fn content(&self, change: &mut Change) -> Result<String> {
        load_content(change)
    }

    /// Scaffold a commit/rollback artifact pair for a new migration
    fn create(&self, name: &str, req: &Request) -> Result<Outcome>;
}

/// Reject changes whose kind is not `module`. Absent kind defaults to
/// `module`, so only explicitly-typed non-module changes are gated.
pub fn module_gate(change: &Change) -> Option<Outcome> {
    (change.kind != ChangeKind::Module).then(|| Outcome::failure(TYPE_GATE_MESSAGE))
}

/// Registry key for a user-authored migration:
/// `${prefix}${change.name}`, prefix overridable per request
pub fn migration_key(req: &Request, default_prefix: &str, name: &str) -> String {
    let prefix = req.prefix.as_deref().unwrap_or(default_prefix);
    format!("{}{}", prefix, name)
}

/// Read the artifact body, caching it on the change
pub fn load_content(change: &mut Change) -> Result<String> {
    let content = std::fs::read_to_string(&change.file)?;
    change.content = Some(content.clone());
    Ok(content)
}

/// Derive the rollback artifact path from a commit artifact by substituting
/// `.commit.` with `.rollback.`; the derived file must exist.
pub fn rollback_file(change: &Change) -> Result<PathBuf> {
    let file = change.file.to_string_lossy();
    if !file.contains(".commit.") {
        return Err(Error::Migration(format!(
            "No rollback counterpart for {}",
            file
        )));
    }

    let derived = PathBuf::from(file.replace(".commit.", ".rollback."));
    if !derived.exists() {
        return Err(Error::Migration(format!(
            "Rollback file not found: {}",
            derived.display()
        )));
    }
    Ok(derived)
}

/// Fold the loaded migration's metadata back into the change: the hook's
/// result message wins over the module's declared description; tags are
/// appended without duplicates.
pub fn merge_module_meta(
    change: &mut Change,
    message: Option<String>,
    description: Option<String>,
    tags: Vec<String>,
) {
    if let Some(description) = message.or(description) {
        change.description = Some(description);
    }
    for tag in tags {
        if !change.tags.contains(&tag) {
            change.tags.push(tag);
        }
    }
}

/// A commit/rollback template pair with its target mode
pub struct TemplatePair {
    pub extension: &'static str,
    pub commit: &'static str,
    pub rollback: &'static str,
    pub mode: u32,
}

pub const MODULE_TEMPLATES: TemplatePair = TemplatePair {
    extension: "js",
    commit: include_str!("../../templates/module.commit.js"),
    rollback: include_str!("../../templates/module.rollback.js"),
    mode: 0o644,
};

pub const SCRIPT_TEMPLATES: TemplatePair = TemplatePair {
    extension: "js",
    commit: include_str!("../../templates/script.commit.js"),
    rollback: include_str!("../../templates/script.rollback.js"),
    mode: 0o644,
};

pub const SHELL_TEMPLATES: TemplatePair = TemplatePair {
    extension: "sh",
    commit: include_str!("../../templates/shell.commit.sh"),
    rollback: include_str!("../../templates/shell.rollback.sh"),
    mode: 0o755,
};

/// Write `<timestamp>.<name>.commit.<ext>` and its rollback twin into the
/// request path from the given templates.
pub fn create_pair(name: &str, req: &Request, templates: &TemplatePair) -> Result<Outcome> {
    let dir = match &req.path {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    let extension = req
        .params
        .get("extension")
        .map(String::as_str)
        .unwrap_or(templates.extension);

    let stamp = Utc::now().format(TIMESTAMP_FORMAT);
    let commit = dir.join(format!("{}.{}.commit.{}", stamp, name, extension));
    let rollback = dir.join(format!("{}.{}.rollback.{}", stamp, name, extension));

    std::fs::write(&commit, templates.commit)?;
    std::fs::write(&rollback, templates.rollback)?;
    set_mode(&commit, templates.mode)?;
    set_mode(&rollback, templates.mode)?;

    info!(
        flow = %req.flow,
        commit = %commit.display(),
        rollback = %rollback.display(),
        "migration pair created"
    );
    Ok(Outcome::ok_with(
        format!("Created migration '{}'", name),
        json!([
            commit.display().to_string(),
            rollback.display().to_string()
        ]),
    ))
}

#[cfg(unix)]
fn set_mode(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_mode(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Action;
    use tempfile::TempDir;

    #[test]
    fn test_module_gate_accepts_default_kind() {
        let change = Change::new(PathBuf::from("/m/a.commit.js"), "a".into(), None);
        assert!(module_gate(&change).is_none());
    }

    #[test]
    fn test_module_gate_rejects_other_kinds() {
        let mut change = Change::new(PathBuf::from("/m/a.commit.js"), "a".into(), None);
        change.kind = ChangeKind::Schema;

        let outcome = module_gate(&change).unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.message.as_deref(), Some(TYPE_GATE_MESSAGE));
    }

    #[test]
    fn test_migration_key_uses_request_prefix_override() {
        let req = Request::new(Action::Commit);
        assert_eq!(
            migration_key(&req, "delta:migration:", "addUsers"),
            "delta:migration:addUsers"
        );

        let req = req.with_prefix("custom:");
        assert_eq!(migration_key(&req, "delta:migration:", "addUsers"), "custom:addUsers");
    }

    #[test]
    fn test_rollback_file_derivation() {
        let dir = TempDir::new().unwrap();
        let commit = dir.path().join("20240101000000.a.commit.sh");
        let rollback = dir.path().join("20240101000000.a.rollback.sh");
        std::fs::write(&commit, "exit 0\n").unwrap();
        std::fs::write(&rollback, "exit 0\n").unwrap();

        let change = Change::new(commit, "a".into(), None);
        assert_eq!(rollback_file(&change).unwrap(), rollback);
    }

    #[test]
    fn test_rollback_file_missing_is_an_error() {
        let dir = TempDir::new().unwrap();
        let commit = dir.path().join("20240101000000.a.commit.sh");
        std::fs::write(&commit, "exit 0\n").unwrap();

        let change = Change::new(commit, "a".into(), None);
        assert!(matches!(rollback_file(&change), Err(Error::Migration(_))));
    }

    #[test]
    fn test_rollback_file_requires_commit_marker() {
        let change = Change::new(PathBuf::from("/m/plain.sh"), "plain".into(), None);
        assert!(matches!(rollback_file(&change), Err(Error::Migration(_))));
    }

    #[test]
    fn test_merge_module_meta_prefers_hook_message() {
        let mut change = Change::new(PathBuf::from("/m/a.commit.js"), "a".into(), None);
        change.tags = vec!["seed".into()];

        merge_module_meta(
            &mut change,
            Some("created 3 users".into()),
            Some("declared description".into()),
            vec!["seed".into(), "users".into()],
        );

        assert_eq!(change.description.as_deref(), Some("created 3 users"));
        assert_eq!(change.tags, vec!["seed".to_string(), "users".to_string()]);

        merge_module_meta(&mut change, None, Some("declared description".into()), vec![]);
        assert_eq!(change.description.as_deref(), Some("declared description"));
    }

    #[test]
    fn test_create_pair_writes_both_artifacts() {
        let dir = TempDir::new().unwrap();
        let req = Request::new(Action::Create).with_path(dir.path());

        let outcome = create_pair("addUsers", &req, &SHELL_TEMPLATES).unwrap();
        assert!(outcome.success);

        let entries: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().any(|n| n.contains(".addUsers.commit.sh")));
        assert!(entries.iter().any(|n| n.contains(".addUsers.rollback.sh")));
    }

    #[cfg(unix)]
    #[test]
    fn test_create_pair_sets_shell_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let req = Request::new(Action::Create).with_path(dir.path());
        create_pair("x", &req, &SHELL_TEMPLATES).unwrap();

        for entry in std::fs::read_dir(dir.path()).unwrap() {
            let mode = entry.unwrap().metadata().unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o755);
        }
    }
}
