// src/main.rs

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::{generate, Shell};
use delta::change::TIMESTAMP_FORMAT;
use delta::registry::{Registry, MIGRATION_KEY_PREFIX};
use delta::request::{Action, Filter, FilterKind, Outcome, Request};
use delta::runner::mongo::{ModuleRunner, ModuleRunnerConfig};
use delta::runner::mongosh::{MongoshConfig, MongoshRunner};
use delta::runner::shell::{ShellConfig, ShellRunner};
use delta::service::MigrationService;
use delta::tracker::mongo::{MongoConfig, MongoTracker};
use delta::tracker::sqlite::{SqliteConfig, SqliteTracker};
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(name = "delta")]
#[command(author, version, about = "Database change-management engine with pluggable trackers and runners", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply every available migration in order
    Commit(ActionArgs),
    /// Revert applied migrations, most recent first
    Rollback(ActionArgs),
    /// Show applied, available, ignored, and missing migrations
    Status(ActionArgs),
    /// Compare the target schema against the migration set
    Compare(ActionArgs),
    /// Scaffold a commit/rollback migration pair
    Create {
        /// Logical migration name
        name: String,
        #[command(flatten)]
        args: ActionArgs,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell type (bash, zsh, fish, powershell)
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FilterTypeArg {
    Include,
    Exclude,
    Start,
    Stop,
}

impl From<FilterTypeArg> for FilterKind {
    fn from(value: FilterTypeArg) -> Self {
        match value {
            FilterTypeArg::Include => FilterKind::Include,
            FilterTypeArg::Exclude => FilterKind::Exclude,
            FilterTypeArg::Start => FilterKind::Start,
            FilterTypeArg::Stop => FilterKind::Stop,
        }
    }
}

#[derive(Args)]
struct ActionArgs {
    /// Migration directory (default: current directory)
    #[arg(long, env = "KOZEN_DELTA_PATH")]
    path: Option<PathBuf>,

    /// Runner driver name
    #[arg(long, env = "KOZEN_DELTA_RUNNER")]
    runner: Option<String>,

    /// Tracker driver name
    #[arg(long, env = "KOZEN_DELTA_TRACKER")]
    tracker: Option<String>,

    /// Extension suffix filter for the scan
    #[arg(long, env = "KOZEN_DELTA_EXTENSION", default_value = "js")]
    extension: String,

    /// Force a filesystem stat for every scanned entry
    #[arg(long, env = "KOZEN_DELTA_STAT")]
    stat: bool,

    /// Migration-module key prefix override
    #[arg(long, env = "KOZEN_DELTA_PREFIX")]
    prefix: Option<String>,

    /// Tag stamped onto committed migrations
    #[arg(long, env = "KOZEN_DELTA_TAG")]
    tag: Option<String>,

    /// Select a single migration by id
    #[arg(long = "filterId", env = "KOZEN_DELTA_FILTER_ID")]
    filter_id: Option<String>,

    /// Regex matched against artifact paths
    #[arg(long = "filterName", env = "KOZEN_DELTA_FILTER_NAME")]
    filter_name: Option<String>,

    /// Regex matched against artifact paths
    #[arg(long = "filterFile", env = "KOZEN_DELTA_FILTER_FILE")]
    filter_file: Option<String>,

    /// Lower bound on creation time (YYYYMMDDhhmmss or RFC 3339)
    #[arg(long = "filterDate", env = "KOZEN_DELTA_FILTER_DATE")]
    filter_date: Option<String>,

    /// How filter matches are applied
    #[arg(long = "filterType", env = "KOZEN_DELTA_FILTER_TYPE", value_enum)]
    filter_type: Option<FilterTypeArg>,

    /// Take-limit over the available list
    #[arg(long, env = "KOZEN_DELTA_COUNT")]
    count: Option<usize>,

    /// Driver-opaque option as key=value (repeatable)
    #[arg(long = "param", value_parser = parse_key_val)]
    params: Vec<(String, String)>,
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))
}

fn parse_filter_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT) {
        return Ok(ts.and_utc());
    }
    let parsed = DateTime::parse_from_rfc3339(raw)
        .map_err(|e| anyhow::anyhow!("invalid --filterDate '{}': {}", raw, e))?;
    Ok(parsed.with_timezone(&Utc))
}

impl ActionArgs {
    fn into_request(self, action: Action) -> Result<Request> {
        let created = self
            .filter_date
            .as_deref()
            .map(parse_filter_date)
            .transpose()?;

        let filter = Filter {
            id: self.filter_id,
            tag: self.tag,
            count: self.count,
            created,
            name: self.filter_name,
            file: self.filter_file,
            kind: self.filter_type.map(Into::into).unwrap_or_default(),
        };

        let mut req = Request::new(action)
            .with_extension(self.extension)
            .with_filter(filter)
            .with_stat(self.stat);
        req.path = self.path;
        req.runner = self.runner;
        req.tracker = self.tracker;
        req.prefix = self.prefix;
        for (key, value) in self.params {
            req.params.insert(key, value);
        }
        Ok(req)
    }
}

/// Wire up the shipped drivers. Connection settings come from the
/// environment here, at the CLI boundary; the library itself only sees
/// explicit configuration records.
fn build_registry() -> Arc<Registry> {
    let registry = Arc::new(Registry::new());

    let mongo = MongoConfig {
        uri: std::env::var("MDB_URI").unwrap_or_else(|_| MongoConfig::default().uri),
        database: std::env::var("MDB_DBNAME").unwrap_or_else(|_| MongoConfig::default().database),
        ..MongoConfig::default()
    };
    let key_prefix =
        std::env::var("KOZEN_DELTA_KEY").unwrap_or_else(|_| MIGRATION_KEY_PREFIX.to_string());

    registry.register_tracker("mdb", Arc::new(MongoTracker::new(mongo.clone())));
    registry.register_runner(
        "mdb",
        Arc::new(ModuleRunner::new(
            ModuleRunnerConfig {
                key_prefix,
                mongo: mongo.clone(),
            },
            registry.clone(),
        )),
    );

    let sqlite_file = std::env::var("KOZEN_DELTA_SQLITE_FILE")
        .map(PathBuf::from)
        .unwrap_or_else(|_| SqliteConfig::default().file);
    registry.register_tracker(
        "sqlite",
        Arc::new(SqliteTracker::new(SqliteConfig { file: sqlite_file })),
    );

    registry.register_runner("shell", Arc::new(ShellRunner::new(ShellConfig::default())));
    registry.register_runner(
        "mongosh",
        Arc::new(MongoshRunner::new(MongoshConfig {
            uri: mongo.uri,
            ..MongoshConfig::default()
        })),
    );

    registry
}

fn report(outcome: Outcome) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(&outcome).unwrap_or_else(|_| "{}".to_string())
    );
    if !outcome.success {
        std::process::exit(1);
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let service = MigrationService::new(build_registry());

    match cli.command {
        Commands::Commit(args) => {
            let req = args.into_request(Action::Commit)?;
            debug!(flow = %req.flow, "commit requested");
            report(service.commit(&req))
        }
        Commands::Rollback(args) => {
            let req = args.into_request(Action::Rollback)?;
            debug!(flow = %req.flow, "rollback requested");
            report(service.rollback(&req))
        }
        Commands::Status(args) => {
            let req = args.into_request(Action::Status)?;
            report(service.status(&req))
        }
        Commands::Compare(args) => {
            let req = args.into_request(Action::Compare)?;
            report(service.compare(&req))
        }
        Commands::Create { name, args } => {
            let mut req = args.into_request(Action::Create)?;
            req.params.insert("name".to_string(), name);
            report(service.create(&req))
        }
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            let name = cmd.get_name().to_string();
            generate(shell, &mut cmd, name, &mut io::stdout());
            Ok(())
        }
    }
}
