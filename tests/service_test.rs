// tests/service_test.rs

//! End-to-end tests for the migration service
//!
//! These drive the real shell runner and SQLite tracker against scratch
//! directories, verifying batch ordering, partial-failure prefixes, the
//! tracker's set algebra, and rollback symmetry.

use delta::change::Change;
use delta::registry::Registry;
use delta::request::{Action, Outcome, Request};
use delta::runner::shell::{ShellConfig, ShellRunner};
use delta::runner::Runner;
use delta::service::MigrationService;
use delta::tracker::sqlite::{SqliteConfig, SqliteTracker};
use delta::tracker::Tracker;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

struct Fixture {
    dir: TempDir,
    registry: Arc<Registry>,
    service: MigrationService,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let registry = Arc::new(Registry::new());
        registry.register_runner(
            "shell",
            Arc::new(ShellRunner::new(ShellConfig {
                program: "sh".to_string(),
            })),
        );
        registry.register_tracker(
            "sqlite",
            Arc::new(SqliteTracker::new(SqliteConfig {
                file: dir.path().join("log.db"),
            })),
        );
        let service = MigrationService::new(registry.clone());
        Self {
            dir,
            registry,
            service,
        }
    }

    fn request(&self, action: Action) -> Request {
        Request::new(action)
            .with_path(self.dir.path())
            .with_extension("commit.sh")
            .with_runner("shell")
            .with_tracker("sqlite")
    }

    fn tracker(&self) -> Arc<dyn Tracker> {
        self.registry.tracker("delta:tracker:sqlite").unwrap()
    }

    fn write(&self, name: &str, body: &str) {
        std::fs::write(self.dir.path().join(name), body).unwrap();
    }

    /// Write a commit/rollback script pair for day `day` of 2024-01
    fn pair(&self, name: &str, day: u32, commit_body: &str, rollback_body: &str) {
        self.write(
            &format!("202401{:02}000000.{}.commit.sh", day, name),
            commit_body,
        );
        self.write(
            &format!("202401{:02}000000.{}.rollback.sh", day, name),
            rollback_body,
        );
    }

    fn applied_names(&self) -> Vec<String> {
        self.tracker()
            .list(&self.request(Action::Status))
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }
}

#[test]
fn test_empty_state_is_a_noop_success() {
    let fx = Fixture::new();

    let status = fx.service.status(&fx.request(Action::Status));
    assert!(status.success, "status should succeed on empty state");
    assert_eq!(status.data["applied"], serde_json::json!([]));
    assert_eq!(status.data["available"], serde_json::json!([]));
    assert_eq!(status.data["missing"], serde_json::json!([]));

    let commit = fx.service.commit(&fx.request(Action::Commit));
    assert!(commit.success);
    assert_eq!(commit.data, serde_json::json!([]));
}

#[test]
fn test_first_commit_applies_in_order() {
    let fx = Fixture::new();
    fx.pair("a", 1, "echo a\n", "exit 0\n");
    fx.pair("b", 2, "echo b\n", "exit 0\n");

    let outcome = fx.service.commit(&fx.request(Action::Commit));
    assert!(outcome.success);
    assert_eq!(outcome.data.as_array().unwrap().len(), 2);

    let log = fx.tracker().list(&fx.request(Action::Status)).unwrap();
    assert_eq!(
        log.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
        vec!["a", "b"]
    );
    assert!(log.iter().all(|c| c.applied.is_some()));
}

#[test]
fn test_partial_failure_persists_the_prefix() {
    let fx = Fixture::new();
    fx.pair("a", 1, "exit 0\n", "exit 0\n");
    fx.pair("b", 2, "exit 1\n", "exit 0\n");
    fx.pair("c", 3, "exit 0\n", "exit 0\n");

    let outcome = fx.service.commit(&fx.request(Action::Commit));
    assert!(outcome.success, "partial failure still reports the prefix");
    assert_eq!(outcome.data.as_array().unwrap().len(), 1);
    assert!(outcome.message.unwrap().contains("stopped at 'b'"));

    // Only the prefix before the failure is recorded; c was never attempted
    assert_eq!(fx.applied_names(), vec!["a"]);
}

#[test]
fn test_commit_skips_changes_older_than_last() {
    let fx = Fixture::new();
    fx.pair("a", 1, "exit 0\n", "exit 0\n");
    fx.pair("b", 2, "exit 0\n", "exit 0\n");
    assert!(fx.service.commit(&fx.request(Action::Commit)).success);

    // A stale artifact older than the last applied change never runs
    fx.pair("stale", 1, "exit 1\n", "exit 0\n");
    let outcome = fx.service.commit(&fx.request(Action::Commit));
    assert!(outcome.success);
    assert_eq!(outcome.data.as_array().unwrap().len(), 0);
    assert_eq!(fx.applied_names(), vec!["a", "b"]);
}

#[test]
fn test_lost_artifact_is_reported_missing() {
    let fx = Fixture::new();
    fx.pair("a", 1, "exit 0\n", "exit 0\n");
    fx.pair("b", 2, "exit 0\n", "exit 0\n");
    assert!(fx.service.commit(&fx.request(Action::Commit)).success);

    std::fs::remove_file(fx.dir.path().join("20240101000000.a.commit.sh")).unwrap();

    let status = fx.service.status(&fx.request(Action::Status));
    assert!(status.success);
    assert_eq!(
        status.data["missing"],
        serde_json::json!(["20240101000000.a.commit.sh"])
    );
    assert_eq!(
        status.data["applied"],
        serde_json::json!(["20240102000000.b.commit.sh"])
    );
    assert_eq!(status.data["available"], serde_json::json!([]));
}

#[test]
fn test_filter_count_splits_available_and_ignored() {
    let fx = Fixture::new();
    fx.pair("a", 1, "exit 0\n", "exit 0\n");
    fx.pair("b", 2, "exit 0\n", "exit 0\n");
    fx.pair("c", 3, "exit 0\n", "exit 0\n");

    let mut req = fx.request(Action::Status);
    req.filter.count = Some(1);

    let info = fx.tracker().info(&req).unwrap();
    assert_eq!(info.available.len(), 1);
    assert_eq!(info.available[0].name, "a");
    assert_eq!(info.ignored.len(), 2);

    // Commit honors the take-limit too
    let outcome = fx.service.commit(&req);
    assert!(outcome.success);
    assert_eq!(fx.applied_names(), vec!["a"]);
}

#[test]
fn test_rollback_runs_most_recent_first_and_removes_prefix() {
    let fx = Fixture::new();
    fx.pair("a", 1, "exit 0\n", "exit 0\n");
    fx.pair("b", 2, "exit 0\n", "exit 1\n");
    fx.pair("c", 3, "exit 0\n", "exit 0\n");
    assert!(fx.service.commit(&fx.request(Action::Commit)).success);
    assert_eq!(fx.applied_names(), vec!["a", "b", "c"]);

    let outcome = fx.service.rollback(&fx.request(Action::Rollback));
    assert!(outcome.success);
    // c rolled back first, then b stopped the batch; a was never reached
    assert_eq!(outcome.data.as_array().unwrap().len(), 1);
    assert!(outcome.message.unwrap().contains("stopped at 'b'"));
    assert_eq!(fx.applied_names(), vec!["a", "b"]);
}

#[test]
fn test_rollback_symmetry_empties_the_log_in_reverse_order() {
    let fx = Fixture::new();
    let log_file = fx.dir.path().join("rolled.log");
    let record = |name: &str| format!("echo {} >> {}\n", name, log_file.display());

    fx.pair("a", 1, "exit 0\n", &record("a"));
    fx.pair("b", 2, "exit 0\n", &record("b"));
    assert!(fx.service.commit(&fx.request(Action::Commit)).success);

    let outcome = fx.service.rollback(&fx.request(Action::Rollback));
    assert!(outcome.success);
    assert_eq!(outcome.data.as_array().unwrap().len(), 2);
    assert!(fx.applied_names().is_empty());

    let rolled = std::fs::read_to_string(&log_file).unwrap();
    let order: Vec<&str> = rolled.lines().collect();
    assert_eq!(order, vec!["b", "a"], "rollback is most-recent-first");
}

#[test]
fn test_set_algebra_partitions_scan_and_log() {
    let fx = Fixture::new();
    fx.pair("a", 1, "exit 0\n", "exit 0\n");
    fx.pair("b", 2, "exit 0\n", "exit 0\n");
    assert!(fx.service.commit(&fx.request(Action::Commit)).success);

    // Lose a's artifact, add three pending ones, cap availability at one
    std::fs::remove_file(fx.dir.path().join("20240101000000.a.commit.sh")).unwrap();
    fx.pair("c", 3, "exit 0\n", "exit 0\n");
    fx.pair("d", 4, "exit 0\n", "exit 0\n");
    fx.pair("e", 5, "exit 0\n", "exit 0\n");

    let mut req = fx.request(Action::Status);
    req.filter.count = Some(1);
    let info = fx.tracker().info(&req).unwrap();

    let names = |changes: &[Change]| -> Vec<String> {
        changes.iter().map(|c| c.name.clone()).collect()
    };
    assert_eq!(names(&info.applied), vec!["b"]);
    assert_eq!(names(&info.available), vec!["c"]);
    assert_eq!(names(&info.ignored), vec!["d", "e"]);
    assert_eq!(names(&info.missing), vec!["a"]);

    // The four sets partition (filesystem scan) union (applied log)
    let mut all: Vec<String> = [info.applied, info.available, info.ignored, info.missing]
        .iter()
        .flat_map(|set| set.iter().map(|c| c.name.clone()))
        .collect();
    all.sort();
    assert_eq!(all, vec!["a", "b", "c", "d", "e"]);
}

#[test]
fn test_unknown_driver_is_a_resolution_failure() {
    let fx = Fixture::new();
    let mut req = fx.request(Action::Commit);
    req.runner = Some("nope".to_string());

    let outcome = fx.service.commit(&req);
    assert!(!outcome.success);
    assert!(outcome.message.unwrap().contains("Driver not found"));
}

#[test]
fn test_compare_is_not_implemented() {
    let fx = Fixture::new();
    let outcome = fx.service.compare(&fx.request(Action::Compare));
    assert!(!outcome.success);
    assert_eq!(outcome.message.as_deref(), Some("Not implemented"));
}

#[test]
fn test_configure_is_a_preserved_boundary() {
    let fx = Fixture::new();
    let outcome = fx.service.configure(&fx.request(Action::Status));
    assert!(!outcome.success);
    assert_eq!(outcome.message.as_deref(), Some("Not implemented"));
}

#[test]
fn test_create_scaffolds_a_pair_through_the_runner() {
    let fx = Fixture::new();
    let mut req = fx.request(Action::Create);
    req.params.insert("name".to_string(), "addUsers".to_string());

    let outcome = fx.service.create(&req);
    assert!(outcome.success, "{:?}", outcome.message);

    let entries: Vec<String> = std::fs::read_dir(fx.dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|n| n.contains("addUsers"))
        .collect();
    assert_eq!(entries.len(), 2);
}

/// Runner scripted to fail on a named change without raising, to pin down
/// the `success: false` path as distinct from hard errors.
struct ScriptedRunner {
    fail_on: String,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn new(fail_on: &str) -> Self {
        Self {
            fail_on: fail_on.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl Runner for ScriptedRunner {
    fn commit(&self, change: &mut Change, _req: &Request) -> delta::Result<Outcome> {
        self.calls.lock().unwrap().push(change.name.clone());
        if change.name == self.fail_on {
            Ok(Outcome::failure("scripted failure"))
        } else {
            Ok(Outcome::ok("Migration committed"))
        }
    }

    fn rollback(&self, change: &mut Change, _req: &Request) -> delta::Result<Outcome> {
        self.calls.lock().unwrap().push(change.name.clone());
        Ok(Outcome::ok("Migration rolled back"))
    }

    fn create(&self, _name: &str, _req: &Request) -> delta::Result<Outcome> {
        Ok(Outcome::failure("Not implemented"))
    }
}

#[test]
fn test_reported_failure_stops_the_batch_like_an_error() {
    let fx = Fixture::new();
    fx.pair("a", 1, "exit 0\n", "exit 0\n");
    fx.pair("b", 2, "exit 0\n", "exit 0\n");
    fx.pair("c", 3, "exit 0\n", "exit 0\n");

    let scripted = Arc::new(ScriptedRunner::new("b"));
    fx.registry.register_runner("scripted", scripted.clone());

    let mut req = fx.request(Action::Commit);
    req.runner = Some("scripted".to_string());

    let outcome = fx.service.commit(&req);
    assert!(outcome.success);
    assert_eq!(outcome.data.as_array().unwrap().len(), 1);

    // b was attempted and failed; c was never attempted
    assert_eq!(*scripted.calls.lock().unwrap(), vec!["a", "b"]);
    assert_eq!(fx.applied_names(), vec!["a"]);
}
