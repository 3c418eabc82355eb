// src/change.rs

//! The migration change record
//!
//! A `Change` is a single migration unit: a file discovered on disk, a row
//! in the applied log, or both. It is pure data; the tracker and runner give
//! it behavior.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::PathBuf;
use std::str::FromStr;

/// Timestamp layout embedded in migration filenames
/// (`<YYYYMMDDhhmmss>.<name>.commit.<ext>`).
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

/// Kind of change artifact. Absent in a persisted record means `Module`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
    #[default]
    Module,
    Script,
    Data,
    Schema,
    Other,
}

impl ChangeKind {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeKind::Module => "module",
            ChangeKind::Script => "script",
            ChangeKind::Data => "data",
            ChangeKind::Schema => "schema",
            ChangeKind::Other => "other",
        }
    }
}

impl FromStr for ChangeKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "module" => Ok(ChangeKind::Module),
            "script" => Ok(ChangeKind::Script),
            "data" => Ok(ChangeKind::Data),
            "schema" => Ok(ChangeKind::Schema),
            "other" => Ok(ChangeKind::Other),
            _ => Err(format!("Invalid change kind: {}", s)),
        }
    }
}

/// A single migration unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Change {
    /// Stable identifier derived from the filename timestamp, when present
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Short logical name (filename without timestamp prefix and extension)
    pub name: String,
    /// Absolute path to the migration artifact
    pub file: PathBuf,
    /// Containing directory
    pub path: PathBuf,
    /// File extension without the leading dot
    pub extension: String,
    #[serde(rename = "type", default)]
    pub kind: ChangeKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Loaded body, populated on demand by runners
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Derived from the filename prefix or the filesystem birth time
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Stamped by the tracker when the change is persisted as applied
    #[serde(skip_serializing_if = "Option::is_none")]
    pub applied: Option<DateTime<Utc>>,
    /// Correlation id for logs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flow: Option<String>,
}

impl Change {
    /// Create a change for a scanned file
    pub fn new(file: PathBuf, name: String, created: Option<DateTime<Utc>>) -> Self {
        let path = file
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(PathBuf::new);
        let extension = file
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_default();
        let id = created.map(|ts| ts.format(TIMESTAMP_FORMAT).to_string());

        Self {
            id,
            name,
            file,
            path,
            extension,
            kind: ChangeKind::default(),
            owner: None,
            tags: Vec::new(),
            description: None,
            content: None,
            created,
            applied: None,
            flow: None,
        }
    }

    /// Basename of the artifact, for human-facing status output
    pub fn basename(&self) -> String {
        self.file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether this change refers to the same migration as `other`
    /// (log-dedup identity: the (`file`, `name`) pair)
    pub fn same_migration(&self, other: &Change) -> bool {
        self.file == other.file && self.name == other.name
    }
}

impl PartialEq for Change {
    fn eq(&self, other: &Change) -> bool {
        self.same_migration(other)
    }
}

impl Eq for Change {}

impl Ord for Change {
    /// Ordered by `created` ascending; ties broken by filename
    fn cmp(&self, other: &Change) -> Ordering {
        self.created
            .cmp(&other.created)
            .then_with(|| self.file.cmp(&other.file))
    }
}

impl PartialOrd for Change {
    fn partial_cmp(&self, other: &Change) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Parse a migration filename into its creation timestamp and logical name.
///
/// The first dot-separated segment is tried as a `%Y%m%d%H%M%S` timestamp
/// and the second segment becomes the name. Otherwise the stem (everything
/// before the final extension) is the name and no timestamp is derived.
pub fn parse_file_name(file_name: &str) -> (Option<DateTime<Utc>>, String) {
    let mut parts = file_name.split('.');
    if let Some(first) = parts.next() {
        if let Ok(ts) = NaiveDateTime::parse_from_str(first, TIMESTAMP_FORMAT) {
            if let Some(name) = parts.next() {
                return (Some(ts.and_utc()), name.to_string());
            }
        }
    }

    let stem = file_name
        .rsplit_once('.')
        .map(|(stem, _ext)| stem)
        .unwrap_or(file_name);
    (None, stem.to_string())
}
