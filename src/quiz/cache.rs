//! Write-through cache for model answers that are expensive to recompute:
//! explanations, prerequisite material and translations.
//!
//! The cache holds at most `capacity` entries and evicts the least recently
//! used one when a new key would exceed it. With [`CacheStore::File`] the
//! entries survive restarts; the file is rewritten after every `put`, off
//! the async worker threads.

use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::{debug, error, info};
use lru::LruCache;

use crate::error::StoreError;
use crate::quiz::Question;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    Explanation,
    Prerequisite,
    Translation,
}

/// Composite key: operation kind, question id and operation parameters.
///
/// The rendered form is a JSON array, so two keys render to the same string
/// only when every component is equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub kind: CacheKind,
    pub question_id: String,
    pub params: Vec<(String, String)>,
}

impl CacheKey {
    pub fn new(kind: CacheKind, question_id: impl Into<String>) -> Self {
        Self {
            kind,
            question_id: question_id.into(),
            params: Vec::new(),
        }
    }

    pub fn param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.push((name.to_string(), value.into()));
        self
    }

    /// Explanations depend on the full question content, including which
    /// letter is marked correct.
    pub fn explanation(question_id: &str, question: &Question) -> Self {
        Self::new(CacheKind::Explanation, question_id)
            .param("question", question.prompt.as_str())
            .param("options", question.options.join("\n"))
            .param("correct", question.correct_option.to_string())
    }

    pub fn prerequisite(question_id: &str, question: &Question) -> Self {
        Self::new(CacheKind::Prerequisite, question_id)
            .param("question", question.prompt.as_str())
            .param("options", question.options.join("\n"))
    }

    /// `field` names the translated part of the question, e.g. `prompt` or
    /// `option_B`.
    pub fn translation(question_id: &str, field: &str, language: &str, source: &str) -> Self {
        Self::new(CacheKind::Translation, question_id)
            .param("field", field)
            .param("language", language)
            .param("source", source)
    }

    pub fn render(&self) -> String {
        serde_json::json!([self.kind, self.question_id, self.params]).to_string()
    }
}

/// One persisted cache record.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheStore {
    Memory,
    File(PathBuf),
}

pub const DEFAULT_CAPACITY: usize = 1024;

pub struct ResultCache {
    inner: Mutex<Inner>,
    store: CacheStore,
    // Version of the newest snapshot on disk. Held while a snapshot is written.
    persisted: Arc<Mutex<u64>>,
}

struct Inner {
    entries: LruCache<String, String>,
    version: u64,
}

impl ResultCache {
    pub fn in_memory(capacity: usize) -> Self {
        Self::with_entries(CacheStore::Memory, capacity, Vec::new())
    }

    /// Opens a cache over `store`. A missing cache file is an empty cache.
    pub fn open(store: CacheStore, capacity: usize) -> Result<Self, StoreError> {
        let entries = match &store {
            CacheStore::Memory => Vec::new(),
            CacheStore::File(path) => load_entries(path)?,
        };
        if let CacheStore::File(path) = &store {
            info!("Loaded {} cached results from {}", entries.len(), path.display());
        }
        Ok(Self::with_entries(store, capacity, entries))
    }

    fn with_entries(store: CacheStore, capacity: usize, entries: Vec<CacheEntry>) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        let mut cache = LruCache::new(capacity);
        // Stored oldest first, so replaying them restores the recency order.
        for entry in entries {
            cache.put(entry.key, entry.value);
        }
        Self {
            inner: Mutex::new(Inner {
                entries: cache,
                version: 0,
            }),
            store,
            persisted: Arc::new(Mutex::new(0)),
        }
    }

    pub fn get(&self, key: &CacheKey) -> Option<String> {
        let rendered = key.render();
        let value = self.lock().entries.get(&rendered).cloned()?;
        debug!("Cache hit for {}", rendered);
        Some(value)
    }

    /// Stores `value` and, with a file store, writes the new snapshot on the
    /// blocking pool. The in-memory value is kept even if the write fails.
    pub async fn put(&self, key: &CacheKey, value: String) {
        let snapshot = {
            let mut inner = self.lock();
            let rendered = key.render();
            if let Some((evicted, _)) = inner.entries.push(rendered.clone(), value) {
                if evicted != rendered {
                    debug!("Evicting cached result {}", evicted);
                }
            }
            match self.store {
                CacheStore::Memory => None,
                CacheStore::File(_) => {
                    inner.version += 1;
                    Some((inner.version, inner.snapshot()))
                }
            }
        };

        let (Some((version, entries)), CacheStore::File(path)) = (snapshot, &self.store) else {
            return;
        };
        let path = path.clone();
        let persisted = Arc::clone(&self.persisted);
        let written = tokio::task::spawn_blocking(move || {
            if let Err(e) = persist(&path, &persisted, version, &entries) {
                error!("Failed to persist cache to {}: {}", path.display(), e);
            }
        })
        .await;
        if let Err(e) = written {
            error!("Cache writer task failed: {}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.lock().entries.cap().get()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn snapshot(&self) -> Vec<CacheEntry> {
        self.entries
            .iter()
            .rev()
            .map(|(key, value)| CacheEntry {
                key: key.clone(),
                value: value.clone(),
            })
            .collect()
    }
}

/// Writes `entries` unless a newer snapshot already reached the disk.
fn persist(
    path: &Path,
    persisted: &Mutex<u64>,
    version: u64,
    entries: &[CacheEntry],
) -> Result<(), StoreError> {
    let mut last = persisted.lock().unwrap_or_else(PoisonError::into_inner);
    if *last >= version {
        return Ok(());
    }
    save_entries(path, entries)?;
    *last = version;
    Ok(())
}

fn load_entries(path: &Path) -> Result<Vec<CacheEntry>, StoreError> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_str(&text)?)
}

fn save_entries(path: &Path, entries: &[CacheEntry]) -> Result<(), StoreError> {
    let json = serde_json::to_string(entries)?;
    write_atomically(path, json.as_bytes())?;
    Ok(())
}

/// Writes to a sibling temporary file first and renames it over `path`.
pub(crate) fn write_atomically(path: &Path, contents: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, contents)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quiz::OptionLetter;

    fn question() -> Question {
        Question::new(
            "What is gravity?".into(),
            vec!["A force".into(), "A colour".into(), "A sound".into(), "A taste".into()],
            OptionLetter::A,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn put_then_get_returns_the_value() {
        let cache = ResultCache::in_memory(8);
        let key = CacheKey::explanation("Physics_1", &question());
        cache.put(&key, "Because mass attracts mass.".into()).await;
        assert_eq!(cache.get(&key).as_deref(), Some("Because mass attracts mass."));
    }

    #[tokio::test]
    async fn get_is_idempotent() {
        let cache = ResultCache::in_memory(8);
        let key = CacheKey::prerequisite("Physics_1", &question());
        assert_eq!(cache.get(&key), None);
        assert_eq!(cache.get(&key), None);

        cache.put(&key, "Newton's laws".into()).await;
        assert_eq!(cache.get(&key), cache.get(&key));
    }

    #[test]
    fn keys_discriminate_kind_and_params() {
        let q = question();
        let explanation = CacheKey::new(CacheKind::Explanation, "Physics_1").param("p", "1");
        let prerequisite = CacheKey::new(CacheKind::Prerequisite, "Physics_1").param("p", "1");
        assert_ne!(explanation.render(), prerequisite.render());
        assert_ne!(
            CacheKey::explanation("Physics_1", &q).render(),
            CacheKey::prerequisite("Physics_1", &q).render()
        );

        let hindi = CacheKey::translation("Physics_1", "prompt", "Hindi", "What is gravity?");
        let french = CacheKey::translation("Physics_1", "prompt", "French", "What is gravity?");
        assert_ne!(hindi.render(), french.render());

        let mut other = q.clone();
        other.correct_option = OptionLetter::B;
        assert_ne!(
            CacheKey::explanation("Physics_1", &q).render(),
            CacheKey::explanation("Physics_1", &other).render()
        );
    }

    #[test]
    fn separators_inside_components_do_not_collide() {
        let a = CacheKey::new(CacheKind::Translation, "a_b").param("x", "c");
        let b = CacheKey::new(CacheKind::Translation, "a").param("b_x", "c");
        assert_ne!(a.render(), b.render());
    }

    #[tokio::test]
    async fn evicts_least_recently_used() {
        let cache = ResultCache::in_memory(2);
        let first = CacheKey::new(CacheKind::Explanation, "q_1");
        let second = CacheKey::new(CacheKind::Explanation, "q_2");
        let third = CacheKey::new(CacheKind::Explanation, "q_3");

        cache.put(&first, "one".into()).await;
        cache.put(&second, "two".into()).await;
        // Touch the first entry so the second becomes the eviction candidate.
        assert!(cache.get(&first).is_some());
        cache.put(&third, "three".into()).await;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get(&first).as_deref(), Some("one"));
        assert_eq!(cache.get(&second), None);
        assert_eq!(cache.get(&third).as_deref(), Some("three"));
    }

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let key = CacheKey::translation("Physics_1", "prompt", "Hindi", "What is gravity?");

        {
            let cache = ResultCache::open(CacheStore::File(path.clone()), 16).unwrap();
            assert!(cache.is_empty());
            cache.put(&key, "गुरुत्वाकर्षण क्या है?".into()).await;
        }

        let reopened = ResultCache::open(CacheStore::File(path), 16).unwrap();
        let value = reopened.get(&key);
        assert_eq!(value.as_deref(), Some("गुरुत्वाकर्षण क्या है?"));
    }

    #[tokio::test]
    async fn reopening_with_smaller_capacity_keeps_the_newest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        {
            let cache = ResultCache::open(CacheStore::File(path.clone()), 16).unwrap();
            for i in 0..5 {
                let key = CacheKey::new(CacheKind::Prerequisite, format!("q_{i}"));
                cache.put(&key, i.to_string()).await;
            }
        }
        let reopened = ResultCache::open(CacheStore::File(path), 2).unwrap();
        assert_eq!(reopened.len(), 2);
        assert!(reopened.get(&CacheKey::new(CacheKind::Prerequisite, "q_4")).is_some());
        assert!(reopened.get(&CacheKey::new(CacheKind::Prerequisite, "q_0")).is_none());
    }

    #[tokio::test]
    async fn concurrent_puts_leave_the_newest_snapshot_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        let cache = ResultCache::open(CacheStore::File(path.clone()), 16).unwrap();
        let keys: Vec<CacheKey> = (0..4)
            .map(|i| CacheKey::new(CacheKind::Explanation, format!("q_{i}")))
            .collect();

        tokio::join!(
            cache.put(&keys[0], "zero".into()),
            cache.put(&keys[1], "one".into()),
            cache.put(&keys[2], "two".into()),
            cache.put(&keys[3], "three".into()),
        );

        let reopened = ResultCache::open(CacheStore::File(path), 16).unwrap();
        assert_eq!(reopened.len(), 4);
        assert_eq!(reopened.get(&keys[3]).as_deref(), Some("three"));
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(ResultCache::in_memory(0).capacity(), 1);
        assert_eq!(ResultCache::in_memory(DEFAULT_CAPACITY).capacity(), 1024);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();
        assert!(matches!(
            ResultCache::open(CacheStore::File(path), 4),
            Err(StoreError::Json(_))
        ));
    }
}
