// src/tracker/mongo.rs

//! Document-store applied-log tracker backed by MongoDB

use crate::change::Change;
use crate::error::{Error, Result};
use crate::request::{Outcome, Request};
use crate::tracker::scan::{self, ScanBags};
use crate::tracker::Tracker;
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOneOptions, FindOptions, InsertManyOptions};
use mongodb::sync::{Client, Collection};
use mongodb::IndexModel;
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info};

/// Default applied-log collection
pub const DEFAULT_COLLECTION: &str = "delta_migrations";

/// Module artifact extensions the document-store tracker always accepts
const MODULE_EXTENSIONS: [&str; 3] = [".js", ".cjs", ".mjs"];

/// Explicit configuration for the MongoDB tracker
#[derive(Debug, Clone)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
    pub collection: String,
}

impl Default for MongoConfig {
    fn default() -> Self {
        Self {
            uri: "mongodb://127.0.0.1:27017".to_string(),
            database: "delta".to_string(),
            collection: DEFAULT_COLLECTION.to_string(),
        }
    }
}

/// Applied-log tracker over a MongoDB collection
pub struct MongoTracker {
    config: MongoConfig,
    collection: Mutex<Option<Collection<Document>>>,
}

impl MongoTracker {
    pub fn new(config: MongoConfig) -> Self {
        Self {
            config,
            collection: Mutex::new(None),
        }
    }

    /// Connect lazily; the first call bootstraps the collection and its
    /// indexes, so `configure` is idempotent.
    fn ensure(&self, req: &Request) -> Result<MutexGuard<'_, Option<Collection<Document>>>> {
        let mut guard = self.collection.lock().unwrap_or_else(PoisonError::into_inner);
        if guard.is_none() {
            let collection_name = req
                .params
                .get("collection")
                .cloned()
                .unwrap_or_else(|| self.config.collection.clone());

            let client = Client::with_uri_str(&self.config.uri)?;
            let db = client.database(&self.config.database);

            let existing = db.list_collection_names(doc! { "name": collection_name.as_str() })?;
            if existing.is_empty() {
                db.create_collection(&collection_name, None)?;
                info!(collection = %collection_name, "applied-log collection created");
            }

            let collection = db.collection::<Document>(&collection_name);
            collection.create_index(
                IndexModel::builder().keys(doc! { "created": -1 }).build(),
                None,
            )?;
            collection.create_index(
                IndexModel::builder().keys(doc! { "owner": 1 }).build(),
                None,
            )?;

            *guard = Some(collection);
        }
        Ok(guard)
    }

    fn to_document(change: &Change) -> Document {
        let mut doc = doc! {
            "name": change.name.as_str(),
            "file": change.file.display().to_string(),
            "path": change.path.display().to_string(),
            "extension": change.extension.as_str(),
        };
        if let Some(id) = &change.id {
            doc.insert("_id", id.as_str());
        }
        if let Some(created) = change.created {
            doc.insert("created", BsonDateTime::from_chrono(created));
        }
        if let Some(applied) = change.applied {
            doc.insert("applied", BsonDateTime::from_chrono(applied));
        }
        if let Some(description) = &change.description {
            doc.insert("description", description.as_str());
        }
        if let Some(owner) = &change.owner {
            doc.insert("owner", owner.as_str());
        }
        if !change.tags.is_empty() {
            doc.insert("tags", change.tags.clone());
        }
        doc
    }

    fn from_document(doc: &Document) -> Result<Change> {
        let name = doc
            .get_str("name")
            .map_err(|e| Error::Migration(format!("Malformed log entry: {}", e)))?
            .to_string();
        let file = doc
            .get_str("file")
            .map_err(|e| Error::Migration(format!("Malformed log entry: {}", e)))?
            .to_string();
        let created = doc.get_datetime("created").ok().map(|dt| dt.to_chrono());

        let mut change = Change::new(PathBuf::from(file), name, created);
        if let Ok(path) = doc.get_str("path") {
            change.path = PathBuf::from(path);
        }
        if let Ok(extension) = doc.get_str("extension") {
            change.extension = extension.to_string();
        }
        if let Ok(id) = doc.get_str("_id") {
            change.id = Some(id.to_string());
        }
        change.applied = doc.get_datetime("applied").ok().map(|dt| dt.to_chrono());
        if let Ok(description) = doc.get_str("description") {
            change.description = Some(description.to_string());
        }
        if let Ok(owner) = doc.get_str("owner") {
            change.owner = Some(owner.to_string());
        }
        if let Ok(tags) = doc.get_array("tags") {
            change.tags = tags
                .iter()
                .filter_map(|tag| tag.as_str().map(str::to_string))
                .collect();
        }
        Ok(change)
    }

    fn identity_pair(change: &Change) -> Document {
        doc! {
            "file": change.file.display().to_string(),
            "name": change.name.as_str(),
        }
    }

    fn log_projection() -> Document {
        doc! {
            "name": 1,
            "file": 1,
            "path": 1,
            "extension": 1,
            "created": 1,
            "applied": 1,
        }
    }
}

impl Tracker for MongoTracker {
    fn configure(&self, req: &Request) -> Result<()> {
        self.ensure(req).map(|_| ())
    }

    fn add(&self, mut changes: Vec<Change>, req: &Request) -> Result<Outcome> {
        if changes.is_empty() {
            return Ok(Outcome::ok_with("No changes to record", json!([])));
        }

        let guard = self.ensure(req)?;
        let collection = guard.as_ref().ok_or_else(|| {
            Error::Config("document store connection unavailable".to_string())
        })?;

        let now = chrono::Utc::now();
        for change in &mut changes {
            change.applied.get_or_insert(now);
        }
        let docs: Vec<Document> = changes.iter().map(Self::to_document).collect();
        let count = docs.len();

        let options = InsertManyOptions::builder().ordered(true).build();
        let result = collection.insert_many(docs, options)?;
        if result.inserted_ids.len() != count {
            return Ok(Outcome::failure(format!(
                "Write not acknowledged for {} of {} change(s)",
                count - result.inserted_ids.len(),
                count
            )));
        }

        let ids: Vec<String> = (0..count)
            .filter_map(|idx| result.inserted_ids.get(&idx))
            .map(|id| match id {
                Bson::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();

        debug!(flow = %req.flow, count, "changes recorded");
        Ok(Outcome::ok_with(
            format!("Recorded {} change(s)", count),
            json!(ids),
        ))
    }

    fn remove(&self, changes: &[Change], req: &Request) -> Result<Outcome> {
        if changes.is_empty() {
            return Ok(Outcome::ok_with("No changes to remove", json!(0)));
        }

        let guard = self.ensure(req)?;
        let collection = guard.as_ref().ok_or_else(|| {
            Error::Config("document store connection unavailable".to_string())
        })?;

        let pairs: Vec<Document> = changes.iter().map(Self::identity_pair).collect();
        let result = collection.delete_many(doc! { "$or": pairs }, None)?;

        debug!(flow = %req.flow, removed = result.deleted_count, "changes removed from log");
        Ok(Outcome::ok_with(
            format!("Removed {} change(s)", result.deleted_count),
            json!(result.deleted_count),
        ))
    }

    fn list(&self, req: &Request) -> Result<Vec<Change>> {
        let guard = self.ensure(req)?;
        let collection = guard.as_ref().ok_or_else(|| {
            Error::Config("document store connection unavailable".to_string())
        })?;

        let options = FindOptions::builder()
            .projection(Self::log_projection())
            .sort(doc! { "created": 1 })
            .build();

        let mut changes = Vec::new();
        for doc in collection.find(doc! {}, options)? {
            changes.push(Self::from_document(&doc?)?);
        }
        Ok(changes)
    }

    fn last(&self, req: &Request) -> Result<Option<Change>> {
        let guard = self.ensure(req)?;
        let collection = guard.as_ref().ok_or_else(|| {
            Error::Config("document store connection unavailable".to_string())
        })?;

        let options = FindOneOptions::builder().sort(doc! { "created": -1 }).build();
        collection
            .find_one(doc! {}, options)?
            .map(|doc| Self::from_document(&doc))
            .transpose()
    }

    fn missing_in(&self, scanned: &ScanBags, req: &Request) -> Result<Vec<Change>> {
        let Some(last) = self.last(req)? else {
            return Ok(Vec::new());
        };
        let Some(bound) = last.created else {
            return Ok(Vec::new());
        };

        let guard = self.ensure(req)?;
        let collection = guard.as_ref().ok_or_else(|| {
            Error::Config("document store connection unavailable".to_string())
        })?;

        let mut filter = doc! { "created": { "$lte": BsonDateTime::from_chrono(bound) } };
        let pairs: Vec<Document> = scanned
            .eligible
            .iter()
            .chain(scanned.superseded.iter())
            .map(Self::identity_pair)
            .collect();
        if !pairs.is_empty() {
            filter.insert("$nor", pairs);
        }

        let options = FindOptions::builder()
            .projection(Self::log_projection())
            .sort(doc! { "created": 1 })
            .build();

        let mut missing = Vec::new();
        for doc in collection.find(filter, options)? {
            missing.push(Self::from_document(&doc?)?);
        }
        Ok(missing)
    }

    /// Module artifacts are accepted regardless of the request's extension
    /// filter; everything else honors it.
    fn accepts_extension(&self, file_name: &str, req: &Request) -> bool {
        MODULE_EXTENSIONS.iter().any(|ext| file_name.ends_with(ext))
            || scan::matches_extension(file_name, req.extension.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Action;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_document_round_trip() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        let mut change = Change::new(
            PathBuf::from("/m/20240101120000.addUsers.commit.js"),
            "addUsers".to_string(),
            Some(created),
        );
        change.applied = Some(created);
        change.description = Some("seed users".to_string());
        change.tags = vec!["seed".to_string()];
        change.owner = Some("platform".to_string());

        let doc = MongoTracker::to_document(&change);
        assert_eq!(doc.get_str("name").unwrap(), "addUsers");
        assert_eq!(doc.get_str("_id").unwrap(), "20240101120000");

        let back = MongoTracker::from_document(&doc).unwrap();
        assert_eq!(back, change);
        assert_eq!(back.created, Some(created));
        assert_eq!(back.applied, Some(created));
        assert_eq!(back.description.as_deref(), Some("seed users"));
        assert_eq!(back.tags, vec!["seed".to_string()]);
    }

    #[test]
    fn test_module_extensions_bypass_the_filter() {
        let tracker = MongoTracker::new(MongoConfig::default());
        let req = Request::new(Action::Status).with_extension("commit.ts");

        assert!(tracker.accepts_extension("20240101.a.commit.js", &req));
        assert!(tracker.accepts_extension("20240101.a.commit.mjs", &req));
        assert!(tracker.accepts_extension("20240101.a.commit.ts", &req));
        assert!(!tracker.accepts_extension("20240101.a.commit.py", &req));
    }
}
