// src/tracker/mod.rs

//! Tracker drivers
//!
//! A tracker owns the durable applied log and the set algebra between the
//! log and the filesystem scan. Backends implement the persistence
//! operations; the composed views (`available`, `info`, `status`) are
//! provided once on the trait over the shared scanner.

pub mod mongo;
pub mod scan;
pub mod sqlite;

use crate::change::Change;
use crate::error::Result;
use crate::request::{Filter, FilterKind, Outcome, Request};
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use tracing::debug;

use scan::ScanBags;

/// Composed view over the applied log and the filesystem scan.
/// All list fields are ordered by `created` ascending.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TrackerInfo {
    pub filter: Filter,
    /// Most recently applied change
    pub last: Option<Change>,
    /// Filesystem changes eligible for commit
    pub available: Vec<Change>,
    /// Filesystem changes already covered by the log
    pub applied: Vec<Change>,
    /// Eligible changes dropped by the `filter.count` take-limit
    pub ignored: Vec<Change>,
    /// Applied-log entries whose filesystem artifact is absent
    pub missing: Vec<Change>,
}

/// Durable applied-log driver
pub trait Tracker: Send + Sync {
    /// Idempotent backend initialization
    fn configure(&self, req: &Request) -> Result<()>;

    /// Append to the applied log, preserving order. Stamps `applied = now()`
    /// on entries that lack it. Atomic per batch where the backend supports
    /// it. Returns the inserted identifiers in `data`; empty input is a
    /// success with empty data.
    fn add(&self, changes: Vec<Change>, req: &Request) -> Result<Outcome>;

    /// Remove log entries matching each input's (`file`, `name`) pair.
    /// Returns the removed count in `data`.
    fn remove(&self, changes: &[Change], req: &Request) -> Result<Outcome>;

    /// Entire applied log, ordered by `created` ascending
    fn list(&self, req: &Request) -> Result<Vec<Change>>;

    /// Most recently applied change, by `created` descending
    fn last(&self, req: &Request) -> Result<Option<Change>>;

    /// Applied-log entries absent from the given filesystem bag, bounded by
    /// `created <= last.created`
    fn missing_in(&self, _scanned: &ScanBags, _req: &Request) -> Result<Vec<Change>> {
        Ok(Vec::new())
    }

    /// Whether a scanned file name passes the extension filter
    fn accepts_extension(&self, file_name: &str, req: &Request) -> bool {
        scan::matches_extension(file_name, req.extension.as_deref())
    }

    /// Applied-log entries whose filesystem artifact is absent
    fn missing(&self, req: &Request) -> Result<Vec<Change>> {
        self.configure(req)?;
        let bags = scan::scan_dir(req, &|name| self.accepts_extension(name, req), &|_| true)?;
        self.missing_in(&bags, req)
    }

    /// Filesystem changes eligible for commit
    fn available(&self, req: &Request) -> Result<Vec<Change>> {
        Ok(self.info(req)?.available)
    }

    /// Compose the full applied/available/ignored/missing view
    fn info(&self, req: &Request) -> Result<TrackerInfo> {
        self.configure(req)?;

        let last = self.last(req)?;
        let last_created = last.as_ref().and_then(|c| c.created);
        let name_re = req.filter.name.as_deref().map(Regex::new).transpose()?;
        let file_re = req.filter.file.as_deref().map(Regex::new).transpose()?;
        let exclude = req.filter.kind == FilterKind::Exclude;
        let filter = &req.filter;

        let predicate = move |change: &Change| {
            if let Some(bound) = last_created {
                match change.created {
                    Some(created) if created > bound => {}
                    _ => return false,
                }
            }
            if let Some(bound) = filter.created {
                match change.created {
                    Some(created) if created >= bound => {}
                    _ => return false,
                }
            }
            if let Some(id) = &filter.id {
                if change.id.as_deref() != Some(id.as_str()) {
                    return false;
                }
            }
            let path = change.file.to_string_lossy();
            if let Some(re) = &name_re {
                if re.is_match(&path) == exclude {
                    return false;
                }
            }
            if let Some(re) = &file_re {
                if re.is_match(&path) == exclude {
                    return false;
                }
            }
            true
        };

        let bags = scan::scan_dir(req, &|name| self.accepts_extension(name, req), &predicate)?;
        let missing = self.missing_in(&bags, req)?;
        let ScanBags {
            eligible,
            superseded,
        } = bags;

        let (available, ignored) = match req.filter.count {
            Some(limit) => {
                let mut available = eligible;
                let ignored = available.split_off(limit.min(available.len()));
                (available, ignored)
            }
            None => (eligible, Vec::new()),
        };

        debug!(
            flow = %req.flow,
            available = available.len(),
            applied = superseded.len(),
            ignored = ignored.len(),
            missing = missing.len(),
            "tracker info composed"
        );

        Ok(TrackerInfo {
            filter: req.filter.clone(),
            last,
            available,
            applied: superseded,
            ignored,
            missing,
        })
    }

    /// Human-facing projection of [`Tracker::info`] onto basenames
    fn status(&self, req: &Request) -> Result<Outcome> {
        let info = self.info(req)?;
        let names = |changes: &[Change]| -> Vec<String> {
            changes.iter().map(Change::basename).collect()
        };

        let data = json!({
            "last": info.last.as_ref().map(Change::basename),
            "applied": names(&info.applied),
            "available": names(&info.available),
            "ignored": names(&info.ignored),
            "missing": names(&info.missing),
        });
        Ok(Outcome::ok_with("Migration status", data))
    }
}
