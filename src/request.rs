// src/request.rs

//! Request and result records shared by every engine operation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::str::FromStr;

/// Engine action requested by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Commit,
    Rollback,
    Status,
    Compare,
    Create,
}

/// How a filter match is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    #[default]
    Include,
    Exclude,
    Start,
    Stop,
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "include" => Ok(FilterKind::Include),
            "exclude" => Ok(FilterKind::Exclude),
            "start" => Ok(FilterKind::Start),
            "stop" => Ok(FilterKind::Stop),
            _ => Err(format!("Invalid filter type: {}", s)),
        }
    }
}

/// Request-scoped selection of changes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Take-limit over the eligible list
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Lower bound on `created`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    /// Regex matched against the artifact path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Regex matched against the artifact path
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: FilterKind,
}

impl Filter {
    pub fn is_empty(&self) -> bool {
        self.id.is_none()
            && self.tag.is_none()
            && self.count.is_none()
            && self.created.is_none()
            && self.name.is_none()
            && self.file.is_none()
    }
}

/// Thin configuration record carried through a single engine invocation
#[derive(Debug, Clone)]
pub struct Request {
    /// Correlation id for logs
    pub flow: String,
    /// Scan root; defaults to the process working directory
    pub path: Option<PathBuf>,
    /// Extension suffix filter for the scan
    pub extension: Option<String>,
    /// Runner driver name (registry key suffix)
    pub runner: Option<String>,
    /// Tracker driver name (registry key suffix)
    pub tracker: Option<String>,
    /// Migration-module key prefix override
    pub prefix: Option<String>,
    pub filter: Filter,
    /// Driver-opaque options
    pub params: BTreeMap<String, String>,
    /// Force a filesystem stat for every scanned entry
    pub stat: bool,
    pub action: Action,
}

impl Request {
    pub fn new(action: Action) -> Self {
        Self {
            flow: generate_flow_id(),
            path: None,
            extension: None,
            runner: None,
            tracker: None,
            prefix: None,
            filter: Filter::default(),
            params: BTreeMap::new(),
            stat: false,
            action,
        }
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    pub fn with_runner(mut self, runner: impl Into<String>) -> Self {
        self.runner = Some(runner.into());
        self
    }

    pub fn with_tracker(mut self, tracker: impl Into<String>) -> Self {
        self.tracker = Some(tracker.into());
        self
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_stat(mut self, stat: bool) -> Self {
        self.stat = stat;
        self
    }
}

/// Correlation id for a single user invocation
fn generate_flow_id() -> String {
    format!(
        "{:x}-{:x}",
        std::process::id(),
        Utc::now().timestamp_micros()
    )
}

/// Uniform operation result
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub data: Value,
}

impl Outcome {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    pub fn ok_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: true,
            message: Some(message.into()),
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data: Value::Null,
        }
    }

    pub fn failure_with(message: impl Into<String>, data: Value) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            data,
        }
    }
}
