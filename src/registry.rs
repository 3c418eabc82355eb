// src/registry.rs

//! Name-to-driver registry
//!
//! Runners, trackers, and user-authored migration modules are registered
//! under flat string keys (`delta:runner:mdb`, `delta:tracker:sqlite`,
//! `delta:migration:<name>`) and resolved at request time. The registry is
//! read-only during an operation; registration happens at startup.

use crate::error::{Error, Result};
use crate::runner::Runner;
use crate::runner::mongo::MigrationModule;
use crate::tracker::Tracker;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Default key prefix for runner drivers
pub const RUNNER_PREFIX: &str = "delta:runner";
/// Default key prefix for tracker drivers
pub const TRACKER_PREFIX: &str = "delta:tracker";
/// Default key prefix for user-authored migration modules
pub const MIGRATION_KEY_PREFIX: &str = "delta:migration:";

/// A registered driver instance
#[derive(Clone)]
pub enum Driver {
    Runner(Arc<dyn Runner>),
    Tracker(Arc<dyn Tracker>),
    Migration(Arc<dyn MigrationModule>),
}

/// Flat key-to-driver lookup table
#[derive(Default)]
pub struct Registry {
    drivers: RwLock<HashMap<String, Driver>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a driver under an explicit key
    pub fn register(&self, key: impl Into<String>, driver: Driver) {
        self.drivers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.into(), driver);
    }

    /// Register a runner under `delta:runner:<name>` (name lowercased)
    pub fn register_runner(&self, name: &str, runner: Arc<dyn Runner>) {
        let key = format!("{}:{}", RUNNER_PREFIX, name.to_lowercase());
        self.register(key, Driver::Runner(runner));
    }

    /// Register a tracker under `delta:tracker:<name>` (name lowercased)
    pub fn register_tracker(&self, name: &str, tracker: Arc<dyn Tracker>) {
        let key = format!("{}:{}", TRACKER_PREFIX, name.to_lowercase());
        self.register(key, Driver::Tracker(tracker));
    }

    /// Register a migration module under `<prefix><name>`
    pub fn register_migration(&self, prefix: &str, name: &str, module: Arc<dyn MigrationModule>) {
        self.register(format!("{}{}", prefix, name), Driver::Migration(module));
    }

    /// Look up a driver by key
    pub fn get(&self, key: &str) -> Result<Driver> {
        self.drivers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
            .ok_or_else(|| Error::Resolution(key.to_string()))
    }

    /// Look up a runner by key
    pub fn runner(&self, key: &str) -> Result<Arc<dyn Runner>> {
        match self.get(key)? {
            Driver::Runner(runner) => Ok(runner),
            _ => Err(Error::Resolution(format!("{} is not a runner", key))),
        }
    }

    /// Look up a tracker by key
    pub fn tracker(&self, key: &str) -> Result<Arc<dyn Tracker>> {
        match self.get(key)? {
            Driver::Tracker(tracker) => Ok(tracker),
            _ => Err(Error::Resolution(format!("{} is not a tracker", key))),
        }
    }

    /// Look up a migration module by key
    pub fn migration(&self, key: &str) -> Result<Arc<dyn MigrationModule>> {
        match self.get(key)? {
            Driver::Migration(module) => Ok(module),
            _ => Err(Error::Resolution(format!("{} is not a migration", key))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::shell::{ShellConfig, ShellRunner};
    use crate::tracker::sqlite::{SqliteConfig, SqliteTracker};

    #[test]
    fn test_register_and_resolve_runner() {
        let registry = Registry::new();
        registry.register_runner("Shell", Arc::new(ShellRunner::new(ShellConfig::default())));

        // Names are lowercased on registration
        assert!(registry.runner("delta:runner:shell").is_ok());
        assert!(matches!(
            registry.runner("delta:runner:missing"),
            Err(Error::Resolution(_))
        ));
    }

    #[test]
    fn test_driver_kind_mismatch() {
        let registry = Registry::new();
        registry.register_tracker(
            "sqlite",
            Arc::new(SqliteTracker::new(SqliteConfig::default())),
        );

        assert!(registry.tracker("delta:tracker:sqlite").is_ok());
        assert!(registry.runner("delta:tracker:sqlite").is_err());
    }
}
