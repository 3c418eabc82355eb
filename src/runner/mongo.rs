// src/runner/mongo.rs

//! Module-loader runner for the document store
//!
//! Resolves a user-authored migration module through the registry and
//! invokes its hook inside exactly one session-bound transaction per
//! change: commit on success, abort on any error, session closed either
//! way.

use crate::change::Change;
use crate::error::{Error, Result};
use crate::registry::{Registry, MIGRATION_KEY_PREFIX};
use crate::request::{Outcome, Request};
use crate::runner::{self, Runner, COMMITTED_MESSAGE, ROLLED_BACK_MESSAGE};
use crate::tracker::mongo::MongoConfig;
use mongodb::bson::Document;
use mongodb::sync::{Client, ClientSession, Collection, Database};
use serde_json::json;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, error};

/// Backend handles passed to a migration hook. All writes performed through
/// `session` share the change's transaction.
pub struct MongoTool<'a> {
    pub db: &'a Database,
    pub collection: &'a Collection<Document>,
    pub session: &'a mut ClientSession,
}

/// Closed interface for user-authored migrations. The registry returns
/// these as trait objects under `${prefix}${change.name}` keys.
pub trait MigrationModule: Send + Sync {
    /// Apply the migration; the returned message becomes the change's
    /// description
    fn commit(&self, tool: &mut MongoTool<'_>) -> anyhow::Result<Option<String>>;

    /// Revert the migration
    fn rollback(&self, tool: &mut MongoTool<'_>) -> anyhow::Result<Option<String>>;

    fn description(&self) -> Option<String> {
        None
    }

    fn tags(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Explicit configuration for the module-loader runner
#[derive(Debug, Clone)]
pub struct ModuleRunnerConfig {
    /// Key prefix for migration-module lookup
    pub key_prefix: String,
    pub mongo: MongoConfig,
}

impl Default for ModuleRunnerConfig {
    fn default() -> Self {
        Self {
            key_prefix: MIGRATION_KEY_PREFIX.to_string(),
            mongo: MongoConfig::default(),
        }
    }
}

struct ModuleRunnerState {
    client: Client,
    db: Database,
    collection: Collection<Document>,
}

/// Runs registry-resolved migration modules against the document store
pub struct ModuleRunner {
    config: ModuleRunnerConfig,
    registry: Arc<Registry>,
    state: Mutex<Option<ModuleRunnerState>>,
}

enum Hook {
    Commit,
    Rollback,
}

impl ModuleRunner {
    pub fn new(config: ModuleRunnerConfig, registry: Arc<Registry>) -> Self {
        Self {
            config,
            registry,
            state: Mutex::new(None),
        }
    }

    fn ensure(&self) -> Result<MutexGuard<'_, Option<ModuleRunnerState>>> {
        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let client = Client::with_uri_str(&self.config.mongo.uri)?;
            let db = client.database(&self.config.mongo.database);
            let collection = db.collection::<Document>(&self.config.mongo.collection);
            *guard = Some(ModuleRunnerState {
                client,
                db,
                collection,
            });
        }
        Ok(guard)
    }

    fn execute(&self, change: &mut Change, req: &Request, hook: Hook) -> Result<Outcome> {
        if let Some(rejected) = runner::module_gate(change) {
            return Ok(rejected);
        }

        let key = runner::migration_key(req, &self.config.key_prefix, &change.name);
        let module = self.registry.migration(&key)?;
        debug!(flow = %req.flow, key = %key, change = %change.name, "migration module resolved");

        let guard = self.ensure()?;
        let state = guard
            .as_ref()
            .ok_or_else(|| Error::Config("document store connection unavailable".to_string()))?;

        // One session and one transaction per change; the session closes on
        // drop whichever way the hook goes.
        let mut session = state.client.start_session(None)?;
        session.start_transaction(None)?;

        let hook_result = {
            let mut tool = MongoTool {
                db: &state.db,
                collection: &state.collection,
                session: &mut session,
            };
            match hook {
                Hook::Commit => module.commit(&mut tool),
                Hook::Rollback => module.rollback(&mut tool),
            }
        };

        match hook_result {
            Ok(message) => {
                session.commit_transaction()?;
                runner::merge_module_meta(change, message, module.description(), module.tags());
                let ok_message = match hook {
                    Hook::Commit => COMMITTED_MESSAGE,
                    Hook::Rollback => ROLLED_BACK_MESSAGE,
                };
                Ok(Outcome::ok_with(
                    ok_message,
                    serde_json::to_value(&change).unwrap_or(json!(null)),
                ))
            }
            Err(err) => {
                session.abort_transaction()?;
                error!(flow = %req.flow, change = %change.name, "migration hook failed: {}", err);
                Ok(Outcome::failure(err.to_string()))
            }
        }
    }
}

impl Runner for ModuleRunner {
    fn configure(&self, _req: &Request) -> Result<Outcome> {
        self.ensure()?;
        Ok(Outcome::ok("Module runner ready"))
    }

    fn check(&self, req: &Request) -> Result<Outcome> {
        // A change can run when its module resolves; probe with the
        // requested prefix alone.
        match &req.filter.name {
            Some(name) => {
                let key = runner::migration_key(req, &self.config.key_prefix, name);
                match self.registry.migration(&key) {
                    Ok(_) => Ok(Outcome::ok(format!("Migration '{}' resolves", name))),
                    Err(err) => Ok(Outcome::failure(err.to_string())),
                }
            }
            None => Ok(Outcome::failure("No migration name to check")),
        }
    }

    fn commit(&self, change: &mut Change, req: &Request) -> Result<Outcome> {
        self.execute(change, req, Hook::Commit)
    }

    fn rollback(&self, change: &mut Change, req: &Request) -> Result<Outcome> {
        self.execute(change, req, Hook::Rollback)
    }

    fn create(&self, name: &str, req: &Request) -> Result<Outcome> {
        runner::create_pair(name, req, &runner::MODULE_TEMPLATES)
    }
}
