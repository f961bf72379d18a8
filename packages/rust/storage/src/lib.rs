//! Durable JSON job store.
//!
//! The [`JobStore`] holds every work item and its lifecycle state, plus
//! run-level counters, in a single pretty-printed JSON file:
//!
//! ```json
//! {
//!   "meta": {"total": 80, "completed": 3, "last_updated": "2026-01-01T00:00:00Z"},
//!   "items": {"日": {"group": 1, "status": "pending"}, ...}
//! }
//! ```
//!
//! **Write rules:**
//! - Every [`JobStore::commit`] rewrites the whole file through
//!   [`write_atomic`]: sibling temp file, `fsync`, rename. Readers see either
//!   the old or the new file, never a torn one.
//! - One process owns the file for the duration of a run.

mod seed;

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use kanjigen_shared::{ItemEntry, ItemState, ItemStatus, KanjigenError, Result, StoreMeta, WorkItem};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use seed::Seed;

/// On-disk layout of the store file.
#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    meta: StoreMeta,
    items: BTreeMap<String, ItemEntry>,
}

/// In-memory job store bound to its durable file.
#[derive(Debug)]
pub struct JobStore {
    path: PathBuf,
    meta: StoreMeta,
    items: BTreeMap<String, ItemEntry>,
}

impl JobStore {
    /// Open the store at `path`, or create it from `seed` if the file does
    /// not exist yet.
    ///
    /// An existing file always wins over the seed. A missing file with no
    /// seed is a configuration error.
    pub fn load(path: &Path, seed: Option<&Seed>) -> Result<Self> {
        if path.exists() {
            return Self::open(path);
        }
        let seed = seed.ok_or_else(|| {
            KanjigenError::config(format!(
                "no job store at {} and no seed to create one from",
                path.display()
            ))
        })?;
        Self::create(path, seed)
    }

    /// Like [`load`](Self::load), but only reads the seed file when the
    /// store does not exist yet.
    pub fn open_or_init(path: &Path, seed_path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::open(path);
        }
        if !seed_path.exists() {
            return Err(KanjigenError::config(format!(
                "no job store at {} and seed file {} does not exist",
                path.display(),
                seed_path.display()
            )));
        }
        let seed = Seed::from_path(seed_path)?;
        Self::create(path, &seed)
    }

    /// Open an existing store file.
    pub fn open(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| KanjigenError::io(path, e))?;
        let file: StoreFile = serde_json::from_str(&raw)
            .map_err(|e| KanjigenError::corrupt_store(path, e.to_string()))?;

        let mut store = Self {
            path: path.to_path_buf(),
            meta: file.meta,
            items: file.items,
        };

        let (total, completed) = store.counts();
        if store.meta.total != total || store.meta.completed != completed {
            warn!(
                path = %path.display(),
                stored_total = store.meta.total,
                stored_completed = store.meta.completed,
                total,
                completed,
                "store counters out of date, recomputing"
            );
            store.meta.total = total;
            store.meta.completed = completed;
        }

        debug!(path = %path.display(), total, completed, "opened job store");
        Ok(store)
    }

    /// Build a fresh all-pending store from `seed` and persist it.
    pub fn create(path: &Path, seed: &Seed) -> Result<Self> {
        let items: BTreeMap<String, ItemEntry> = seed
            .iter()
            .map(|(id, group)| (id.to_string(), ItemEntry::pending(group)))
            .collect();

        let store = Self {
            path: path.to_path_buf(),
            meta: StoreMeta {
                total: items.len(),
                completed: 0,
                last_updated: Utc::now(),
            },
            items,
        };
        store.persist()?;

        info!(path = %path.display(), total = store.meta.total, "initialised job store from seed");
        Ok(store)
    }

    // -----------------------------------------------------------------------
    // Mutation
    // -----------------------------------------------------------------------

    /// Set the state of one item and durably persist the whole store.
    ///
    /// If persisting fails the in-memory state is rolled back, so memory and
    /// disk never disagree.
    pub fn commit(&mut self, id: &str, state: ItemState) -> Result<()> {
        let entry = self
            .items
            .get_mut(id)
            .ok_or_else(|| KanjigenError::UnknownItem(id.to_string()))?;
        let previous = std::mem::replace(&mut entry.state, state);
        let previous_meta = self.meta.clone();

        self.refresh_meta();
        if let Err(e) = self.persist() {
            if let Some(entry) = self.items.get_mut(id) {
                entry.state = previous;
            }
            self.meta = previous_meta;
            return Err(e);
        }

        debug!(id, completed = self.meta.completed, total = self.meta.total, "committed item");
        Ok(())
    }

    /// Reset every failed item to pending. Persists once if anything changed.
    ///
    /// Rolled back in memory if persisting fails, like [`JobStore::commit`].
    pub fn requeue_failed(&mut self) -> Result<usize> {
        let mut previous = Vec::new();
        for (id, entry) in self.items.iter_mut() {
            if entry.state.status() == ItemStatus::Failed {
                previous.push((id.clone(), std::mem::replace(&mut entry.state, ItemState::Pending)));
            }
        }

        let count = previous.len();
        if count == 0 {
            return Ok(0);
        }

        let previous_meta = self.meta.clone();
        self.refresh_meta();
        if let Err(e) = self.persist() {
            for (id, state) in previous {
                if let Some(entry) = self.items.get_mut(&id) {
                    entry.state = state;
                }
            }
            self.meta = previous_meta;
            return Err(e);
        }

        info!(count, "requeued failed items");
        Ok(count)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Pending items ordered by `(group, id)`.
    pub fn pending_items(&self) -> Vec<WorkItem> {
        self.items_with(ItemStatus::Pending)
    }

    /// Failed items ordered by `(group, id)`.
    pub fn failed_items(&self) -> Vec<WorkItem> {
        self.items_with(ItemStatus::Failed)
    }

    /// Completed items ordered by `(group, id)`.
    pub fn completed_items(&self) -> Vec<WorkItem> {
        self.items_with(ItemStatus::Completed)
    }

    pub fn get(&self, id: &str) -> Option<WorkItem> {
        self.items.get(id).map(|entry| entry.to_work_item(id))
    }

    /// All entries in id order.
    pub fn items(&self) -> impl Iterator<Item = (&str, &ItemEntry)> {
        self.items.iter().map(|(id, entry)| (id.as_str(), entry))
    }

    pub fn meta(&self) -> &StoreMeta {
        &self.meta
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn items_with(&self, status: ItemStatus) -> Vec<WorkItem> {
        let mut items: Vec<WorkItem> = self
            .items
            .iter()
            .filter(|(_, entry)| entry.state.status() == status)
            .map(|(id, entry)| entry.to_work_item(id))
            .collect();
        items.sort_by(|a, b| (a.group, &a.id).cmp(&(b.group, &b.id)));
        items
    }

    fn counts(&self) -> (usize, usize) {
        let completed = self
            .items
            .values()
            .filter(|entry| entry.state.is_completed())
            .count();
        (self.items.len(), completed)
    }

    fn refresh_meta(&mut self) {
        let (total, completed) = self.counts();
        self.meta.total = total;
        self.meta.completed = completed;
        self.meta.last_updated = Utc::now();
    }

    fn persist(&self) -> Result<()> {
        let file = StoreFile {
            meta: self.meta.clone(),
            items: self.items.clone(),
        };
        let mut json = serde_json::to_string_pretty(&file)?;
        json.push('\n');
        write_atomic(&self.path, json.as_bytes())
    }
}

/// Replace `path` with `contents` atomically.
///
/// The data goes to a uniquely named sibling temp file which is synced to
/// disk and then renamed over `path`. A crash leaves either the old file or
/// the new one; stray temp files are never read.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent).map_err(|e| KanjigenError::io(parent, e))?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "store".to_string());
    let tmp = parent.join(format!(".{file_name}.{}.tmp", Uuid::now_v7()));

    let write = || -> std::io::Result<()> {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp, path)
    };

    if let Err(e) = write() {
        let _ = std::fs::remove_file(&tmp);
        return Err(KanjigenError::io(path, e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kanjigen_shared::Record;
    use serde_json::{Value, json};

    fn temp_store_path() -> PathBuf {
        std::env::temp_dir()
            .join(format!("kanjigen_store_test_{}", Uuid::now_v7()))
            .join("kanji_db.json")
    }

    fn seed() -> Seed {
        Seed::from_pairs([("右", 1), ("一", 1), ("引", 2), ("羽", 2), ("円", 1)]).unwrap()
    }

    fn record(kanji: &str) -> Record {
        match json!({"kanji": kanji, "summary": "test"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    fn items_json(path: &Path) -> serde_json::Map<String, Value> {
        let doc: Value = serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        doc["items"].as_object().unwrap().clone()
    }

    #[test]
    fn creates_from_seed_and_persists() {
        let path = temp_store_path();
        let store = JobStore::load(&path, Some(&seed())).unwrap();
        assert_eq!(store.meta().total, 5);
        assert_eq!(store.meta().completed, 0);
        assert!(path.exists());

        let reopened = JobStore::load(&path, None).unwrap();
        assert_eq!(reopened.len(), 5);
        assert_eq!(reopened.pending_items().len(), 5);
    }

    #[test]
    fn missing_store_without_seed_is_config_error() {
        let err = JobStore::load(&temp_store_path(), None).unwrap_err();
        assert!(matches!(err, KanjigenError::Config { .. }));
    }

    #[test]
    fn existing_store_wins_over_seed() {
        let path = temp_store_path();
        JobStore::load(&path, Some(&seed())).unwrap();
        let other = Seed::from_pairs([("山", 1)]).unwrap();
        let store = JobStore::load(&path, Some(&other)).unwrap();
        assert!(store.get("山").is_none());
        assert_eq!(store.len(), 5);
    }

    #[test]
    fn pending_items_are_ordered_by_group_then_id() {
        let path = temp_store_path();
        let store = JobStore::load(&path, Some(&seed())).unwrap();
        let ids: Vec<String> = store.pending_items().into_iter().map(|i| i.id).collect();
        let mut expected = vec!["一", "円", "右"];
        expected.sort();
        let mut grade2 = vec!["引", "羽"];
        grade2.sort();
        expected.extend(grade2);
        assert_eq!(ids, expected);
    }

    #[test]
    fn commit_updates_counts_and_survives_reload() {
        let path = temp_store_path();
        let mut store = JobStore::load(&path, Some(&seed())).unwrap();
        store
            .commit("一", ItemState::Completed { payload: record("一") })
            .unwrap();
        store
            .commit("右", ItemState::Failed { last_error: "timeout_after=180s".into() })
            .unwrap();
        assert_eq!(store.meta().completed, 1);

        // Simulates a crash right after the commit: nothing but the file remains.
        drop(store);
        let reopened = JobStore::load(&path, None).unwrap();
        assert_eq!(reopened.meta().completed, 1);
        assert_eq!(reopened.get("一").unwrap().state.payload(), Some(&record("一")));
        assert_eq!(
            reopened.get("右").unwrap().state.last_error(),
            Some("timeout_after=180s")
        );
        assert_eq!(reopened.pending_items().len(), 3);
        assert_eq!(reopened.failed_items().len(), 1);
    }

    #[test]
    fn unchanged_items_round_trip_byte_for_byte() {
        let path = temp_store_path();
        let mut store = JobStore::load(&path, Some(&seed())).unwrap();
        store
            .commit("円", ItemState::Completed { payload: record("円") })
            .unwrap();
        let before = items_json(&path);

        let mut store = JobStore::load(&path, None).unwrap();
        store
            .commit("引", ItemState::Failed { last_error: "exit_code=1, stderr_tail=".into() })
            .unwrap();
        let after = items_json(&path);

        for (id, value) in &before {
            if id != "引" {
                assert_eq!(
                    serde_json::to_string(value).unwrap(),
                    serde_json::to_string(&after[id]).unwrap()
                );
            }
        }
    }

    #[test]
    fn payload_keys_keep_backend_order() {
        let path = temp_store_path();
        let mut store = JobStore::load(&path, Some(&seed())).unwrap();
        let payload = match json!({"summary": "s", "kanji": "一", "readings": [], "grade": 1}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        store
            .commit("一", ItemState::Completed { payload })
            .unwrap();

        let reopened = JobStore::load(&path, None).unwrap();
        let item = reopened.get("一").unwrap();
        let keys: Vec<&str> = item.state.payload().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, ["summary", "kanji", "readings", "grade"]);
    }

    #[test]
    fn non_ascii_is_written_unescaped() {
        let path = temp_store_path();
        JobStore::load(&path, Some(&seed())).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"羽\""));
        assert!(raw.ends_with('\n'));
    }

    #[test]
    fn commit_unknown_item_fails() {
        let path = temp_store_path();
        let mut store = JobStore::load(&path, Some(&seed())).unwrap();
        let err = store.commit("山", ItemState::Pending).unwrap_err();
        assert!(matches!(err, KanjigenError::UnknownItem(id) if id == "山"));
    }

    #[test]
    fn corrupt_store_is_reported() {
        let path = temp_store_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();

        std::fs::write(&path, "{ not json").unwrap();
        let err = JobStore::load(&path, Some(&seed())).unwrap_err();
        assert!(matches!(err, KanjigenError::CorruptStore { .. }));

        // Valid JSON, but a completed item without a payload.
        let bad = json!({
            "meta": {"total": 1, "completed": 1, "last_updated": "2026-01-01T00:00:00Z"},
            "items": {"山": {"group": 1, "status": "completed"}}
        });
        std::fs::write(&path, bad.to_string()).unwrap();
        let err = JobStore::load(&path, None).unwrap_err();
        assert!(matches!(err, KanjigenError::CorruptStore { .. }));
    }

    #[test]
    fn stale_counters_are_recomputed_on_open() {
        let path = temp_store_path();
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        let doc = json!({
            "meta": {"total": 9, "completed": 9, "last_updated": "2026-01-01T00:00:00Z"},
            "items": {
                "山": {"group": 1, "status": "completed", "payload": {"kanji": "山"}},
                "川": {"group": 1, "status": "pending"}
            }
        });
        std::fs::write(&path, doc.to_string()).unwrap();
        let store = JobStore::load(&path, None).unwrap();
        assert_eq!(store.meta().total, 2);
        assert_eq!(store.meta().completed, 1);
    }

    #[test]
    fn requeue_failed_resets_only_failed_items() {
        let path = temp_store_path();
        let mut store = JobStore::load(&path, Some(&seed())).unwrap();
        store
            .commit("一", ItemState::Failed { last_error: "boom".into() })
            .unwrap();
        store
            .commit("円", ItemState::Completed { payload: record("円") })
            .unwrap();

        assert_eq!(store.requeue_failed().unwrap(), 1);
        assert_eq!(store.requeue_failed().unwrap(), 0);

        let reopened = JobStore::load(&path, None).unwrap();
        assert_eq!(reopened.get("一").unwrap().state, ItemState::Pending);
        assert!(reopened.get("円").unwrap().state.is_completed());
    }

    #[test]
    fn requeue_failed_rolls_back_when_persist_fails() {
        let path = temp_store_path();
        let mut store = JobStore::load(&path, Some(&seed())).unwrap();
        store
            .commit("一", ItemState::Failed { last_error: "boom".into() })
            .unwrap();
        let meta_before = store.meta().clone();

        // A plain file where the store directory was makes every write fail.
        let dir = path.parent().unwrap();
        std::fs::remove_dir_all(dir).unwrap();
        std::fs::write(dir, "").unwrap();

        assert!(store.requeue_failed().is_err());
        assert_eq!(
            store.get("一").unwrap().state,
            ItemState::Failed { last_error: "boom".into() }
        );
        assert_eq!(store.failed_items().len(), 1);
        assert_eq!(store.meta(), &meta_before);

        std::fs::remove_file(dir).unwrap();
    }

    #[test]
    fn stray_temp_files_are_ignored() {
        let path = temp_store_path();
        let mut store = JobStore::load(&path, Some(&seed())).unwrap();
        let stray = path.with_file_name(".kanji_db.json.crashed.tmp");
        std::fs::write(&stray, "garbage").unwrap();

        store
            .commit("一", ItemState::Completed { payload: record("一") })
            .unwrap();
        let reopened = JobStore::load(&path, None).unwrap();
        assert_eq!(reopened.meta().completed, 1);
    }

    #[test]
    fn open_or_init_reads_seed_only_when_needed() {
        let dir = temp_store_path().parent().unwrap().to_path_buf();
        std::fs::create_dir_all(&dir).unwrap();
        let seed_path = dir.join("seed.json");
        std::fs::write(&seed_path, r#"{"by_grade": {"1": ["日", "月"]}}"#).unwrap();
        let store_path = dir.join("db.json");

        let store = JobStore::open_or_init(&store_path, &seed_path).unwrap();
        assert_eq!(store.len(), 2);

        std::fs::remove_file(&seed_path).unwrap();
        let store = JobStore::open_or_init(&store_path, &seed_path).unwrap();
        assert_eq!(store.len(), 2);
    }
}
