// src/tracker/scan.rs

//! Shared filesystem scan
//!
//! Every tracker operation that needs the filesystem view goes through this
//! single pass: extension filtering, filename parsing, stat fallback for the
//! creation time, and a per-change predicate that splits the directory into
//! two bags so the set algebra reuses the same walk.

use crate::change::{self, Change};
use crate::error::Result;
use crate::request::Request;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, warn};

/// Outcome of a directory scan, split by the caller's predicate
#[derive(Debug, Default)]
pub struct ScanBags {
    /// Predicate-accepted changes, ordered by `created` ascending
    pub eligible: Vec<Change>,
    /// Predicate-rejected changes (on disk but already covered by the log)
    pub superseded: Vec<Change>,
}

impl ScanBags {
    /// Whether the scan saw a change with the same (`file`, `name`) identity
    pub fn contains(&self, other: &Change) -> bool {
        self.eligible
            .iter()
            .chain(self.superseded.iter())
            .any(|c| c.same_migration(other))
    }
}

/// Suffix match for the request's extension filter.
///
/// `commit.js` matches `20240101.add.commit.js`; a bare `js` matches any
/// `.js` artifact. No filter accepts everything.
pub fn matches_extension(file_name: &str, extension: Option<&str>) -> bool {
    match extension {
        None => true,
        Some(ext) => {
            let ext = ext.trim_start_matches('.');
            file_name.ends_with(&format!(".{}", ext))
        }
    }
}

/// Scan `req.path` (default: working directory) and split the entries with
/// `predicate`. A missing or unreadable root is not fatal: it yields empty
/// bags with a logged warning.
pub fn scan_dir(
    req: &Request,
    accepts: &dyn Fn(&str) -> bool,
    predicate: &dyn Fn(&Change) -> bool,
) -> Result<ScanBags> {
    let root = match &req.path {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };

    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(flow = %req.flow, path = %root.display(), "scan root unreadable: {}", err);
            return Ok(ScanBags::default());
        }
    };

    let mut bags = ScanBags::default();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!(flow = %req.flow, path = %root.display(), "unreadable entry: {}", err);
                continue;
            }
        };

        let file_name = entry.file_name().to_string_lossy().into_owned();
        if !accepts(&file_name) {
            continue;
        }

        let (mut created, name) = change::parse_file_name(&file_name);
        if created.is_none() || req.stat {
            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(err) => {
                    warn!(flow = %req.flow, file = %file_name, "stat failed: {}", err);
                    continue;
                }
            };
            if !meta.is_file() {
                continue;
            }
            if created.is_none() {
                let birth = meta.created().or_else(|_| meta.modified());
                created = birth.ok().map(DateTime::<Utc>::from);
            }
        }

        let mut change = Change::new(absolute(&root, &file_name), name, created);
        change.flow = Some(req.flow.clone());
        debug!(flow = %req.flow, file = %file_name, "scanned");

        if predicate(&change) {
            bags.eligible.push(change);
        } else {
            bags.superseded.push(change);
        }
    }

    bags.eligible.sort();
    Ok(bags)
}

fn absolute(root: &PathBuf, file_name: &str) -> PathBuf {
    let joined = root.join(file_name);
    joined.canonicalize().unwrap_or(joined)
}
