//! The index resource pool: one Writer and one Reader-Manager per named
//! index. Acquire/release of point-in-time snapshots is the only read path;
//! an acquired snapshot pins its segment files until it is released.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use log::{error, info, warn};
use once_cell::sync::OnceCell;
use tantivy::directory::MmapDirectory;
use tantivy::schema::Schema;
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, Searcher};
use tokio::sync::Mutex;

use studysearch_types::{Error, IndexMetadata, Result};

use crate::analyzers::AnalyzerRegistry;
use crate::schema::{index_dir, EFO, FILES, PAGETAB, SUBMISSION};
use crate::search::suggest::SpellChecker;
use crate::settings::Settings;

/// Commit user-data key stamped on the submission index.
pub const UPDATE_TIME_KEY: &str = "updateTime";

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// An acquired point-in-time view of one index. Must be handed back to the
/// pool via [`IndexPool::release`] on every exit path.
pub struct ReaderSnapshot {
    index: String,
    searcher: Searcher,
}

impl ReaderSnapshot {
    pub fn index_name(&self) -> &str {
        &self.index
    }

    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }
}

struct IndexHandle {
    index: Index,
    writer: Arc<Mutex<IndexWriter>>,
    reader: IndexReader,
    location: PathBuf,
}

pub type SharedPool = Arc<IndexPool>;

pub struct IndexPool {
    settings: Settings,
    base_path: PathBuf,
    analyzers: AnalyzerRegistry,
    handles: DashMap<String, IndexHandle>,
    spell: OnceCell<SpellChecker>,
}

impl IndexPool {
    pub fn new(settings: Settings) -> Self {
        let base_path = PathBuf::from(&settings.path);
        let analyzers = AnalyzerRegistry::from_stopwords_setting(&settings.efo.stopwords);
        Self {
            settings,
            base_path,
            analyzers,
            handles: DashMap::new(),
            spell: OnceCell::new(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Open (or create) a named index under the base path. I/O failures here
    /// are fatal to startup and propagate.
    pub fn open_index(&self, name: &str, schema: Schema) -> Result<()> {
        let location = self.base_path.join(index_dir(name));
        if !location.exists() {
            fs::create_dir_all(&location)?;
        }
        let dir = MmapDirectory::open(&location)?;
        let index = Index::open_or_create(dir, schema)?;
        self.analyzers.install(&index);
        let writer = index.writer(self.settings.writer_memory)?;
        writer.set_merge_policy(self.settings.get_merge_policy());
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommit)
            .try_into()?;
        info!("opened index '{}' at {}", name, location.display());
        self.handles.insert(
            name.to_string(),
            IndexHandle {
                index,
                writer: Arc::new(Mutex::new(writer)),
                reader,
                location,
            },
        );
        Ok(())
    }

    /// Open the four named indexes of the service.
    pub fn open_default_indexes(&self) -> Result<()> {
        self.open_index(SUBMISSION, crate::schema::submission_schema())?;
        self.open_index(PAGETAB, crate::schema::pagetab_schema())?;
        self.open_index(FILES, crate::schema::file_schema())?;
        self.open_index(EFO, crate::schema::efo_schema())?;
        Ok(())
    }

    pub fn exists(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// The most recent refreshed snapshot of `name`. Pair with [`release`].
    ///
    /// [`release`]: IndexPool::release
    pub fn acquire(&self, name: &str) -> Result<ReaderSnapshot> {
        let handle = self
            .handles
            .get(name)
            .ok_or_else(|| Error::UnknownIndex(name.into()))?;
        Ok(ReaderSnapshot {
            index: name.to_string(),
            searcher: handle.reader.searcher(),
        })
    }

    /// Hand a snapshot back. Releasing against the wrong index is an
    /// invariant violation and fails loudly.
    pub fn release(&self, name: &str, snapshot: ReaderSnapshot) -> Result<()> {
        if snapshot.index != name {
            error!(
                "snapshot of index '{}' released to '{}'",
                snapshot.index, name
            );
            return Err(Error::Internal(format!(
                "snapshot of index '{}' released to '{}'",
                snapshot.index, name
            )));
        }
        drop(snapshot);
        Ok(())
    }

    /// Shared writer handle. Concurrent use is allowed; the writer
    /// serialises internally behind its mutex.
    pub fn writer(&self, name: &str) -> Result<Arc<Mutex<IndexWriter>>> {
        self.handles
            .get(name)
            .map(|h| Arc::clone(&h.writer))
            .ok_or_else(|| Error::UnknownIndex(name.into()))
    }

    pub fn index(&self, name: &str) -> Result<Index> {
        self.handles
            .get(name)
            .map(|h| h.index.clone())
            .ok_or_else(|| Error::UnknownIndex(name.into()))
    }

    pub fn schema(&self, name: &str) -> Result<Schema> {
        self.index(name).map(|i| i.schema())
    }

    /// Commit one index without touching the others.
    pub async fn commit(&self, name: &str) -> Result<u64> {
        let writer = self.writer(name)?;
        let mut w = writer.lock().await;
        Ok(w.commit()?)
    }

    /// Stamp `updateTime` into the submission commit user-data, then commit
    /// `submission`, `pagetab` and `files` in that order. Not atomic across
    /// indexes; a concurrent reader may observe the partially committed
    /// window, which per-submission idempotence makes safe to retry over.
    pub async fn commit_submission_related(&self) -> Result<()> {
        let mut user_data = serde_json::Map::new();
        user_data.insert(
            UPDATE_TIME_KEY.to_string(),
            serde_json::Value::String(now_millis().to_string()),
        );
        let payload = serde_json::Value::Object(user_data).to_string();
        {
            let writer = self.writer(SUBMISSION)?;
            let mut w = writer.lock().await;
            let mut prepared = w.prepare_commit()?;
            prepared.set_payload(&payload);
            prepared.commit()?;
        }
        for &name in &[PAGETAB, FILES] {
            let writer = self.writer(name)?;
            let mut w = writer.lock().await;
            w.commit()?;
        }
        Ok(())
    }

    /// Force every Reader-Manager to observe the latest committed state.
    /// Refresh failures are logged; the previous snapshot stays current.
    pub fn refresh_all(&self) {
        for entry in self.handles.iter() {
            if let Err(e) = entry.value().reader.reload() {
                warn!("refresh of index '{}' failed: {}", entry.key(), e);
            }
        }
    }

    pub fn refresh(&self, name: &str) -> Result<()> {
        let handle = self
            .handles
            .get(name)
            .ok_or_else(|| Error::UnknownIndex(name.into()))?;
        handle.reader.reload()?;
        Ok(())
    }

    /// Wire the spell checker once the indexes it consults are open.
    pub fn set_spell_checker(&self, spell: SpellChecker) {
        if self.spell.set(spell).is_err() {
            warn!("spell checker was already configured");
        }
    }

    pub fn spell_checker(&self) -> Option<&SpellChecker> {
        self.spell.get()
    }

    /// The `updateTime` stamped by the last submission commit.
    pub fn update_time(&self) -> Option<i64> {
        let index = self.index(SUBMISSION).ok()?;
        let payload = index.load_metas().ok()?.payload?;
        let value: serde_json::Value = serde_json::from_str(&payload).ok()?;
        value.get(UPDATE_TIME_KEY)?.as_str()?.parse().ok()
    }

    pub fn metadata(&self) -> Vec<IndexMetadata> {
        let update_time = self.update_time();
        let mut out = Vec::new();
        for entry in self.handles.iter() {
            let handle = entry.value();
            let number_of_documents = handle.reader.searcher().num_docs();
            out.push(IndexMetadata {
                name: entry.key().clone(),
                location: handle.location.display().to_string(),
                update_time: if entry.key().as_str() == SUBMISSION {
                    update_time
                } else {
                    None
                },
                size: dir_size(&handle.location),
                number_of_documents,
            });
        }
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    /// Flush and commit every writer; called on shutdown.
    pub async fn close(&self) {
        let writers: Vec<(String, Arc<Mutex<IndexWriter>>)> = self
            .handles
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(&e.value().writer)))
            .collect();
        for (name, writer) in writers {
            let mut w = writer.lock().await;
            if let Err(e) = w.commit() {
                warn!("final commit of '{}' failed: {}", name, e);
            }
        }
        info!("index pool closed");
    }
}

/// Sum of regular file sizes directly under an index directory.
fn dir_size(path: &Path) -> u64 {
    let mut size = 0;
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                if meta.is_file() {
                    size += meta.len();
                }
            }
        }
    }
    size
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::schema;

    pub fn test_pool() -> (tempfile::TempDir, SharedPool) {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.path = dir.path().display().to_string();
        settings.writer_memory = 15_000_000;
        let pool = IndexPool::new(settings);
        pool.open_default_indexes().unwrap();
        (dir, Arc::new(pool))
    }

    #[test]
    fn acquire_release_round_trip() {
        let (_dir, pool) = test_pool();
        let snap = pool.acquire(schema::SUBMISSION).unwrap();
        assert_eq!(snap.index_name(), schema::SUBMISSION);
        pool.release(schema::SUBMISSION, snap).unwrap();
    }

    #[test]
    fn wrong_index_release_fails_loudly() {
        let (_dir, pool) = test_pool();
        let snap = pool.acquire(schema::SUBMISSION).unwrap();
        assert!(pool.release(schema::FILES, snap).is_err());
    }

    #[test]
    fn unknown_index_is_an_error() {
        let (_dir, pool) = test_pool();
        assert!(matches!(pool.acquire("nope"), Err(Error::UnknownIndex(_))));
    }

    #[tokio::test]
    async fn update_time_is_monotonic() {
        let (_dir, pool) = test_pool();
        pool.commit_submission_related().await.unwrap();
        let first = pool.update_time().unwrap();
        pool.commit_submission_related().await.unwrap();
        let second = pool.update_time().unwrap();
        assert!(second >= first);
    }
}
