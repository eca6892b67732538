//! Append-only conversation history.
//!
//! Each (channel, personality) pair gets one `<key>.jsonl` file under the
//! history directory; every turn is one JSON line. A bounded write-through
//! cache keeps the most recently used conversations in memory; anything
//! evicted is read back from disk on next use.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use sha2::{Digest, Sha256};

use ch_domain::error::{Error, Result};
use ch_domain::model::HistoryEntry;
use ch_domain::trace::TraceEvent;

use crate::repository::HistoryRepository;

type ConversationKey = (String, String);

/// Conversations kept in memory when no capacity is given.
pub const DEFAULT_CACHED_CONVERSATIONS: usize = 256;

// ── conversation cache ──────────────────────────────────────────────

struct Cached {
    entries: Vec<HistoryEntry>,
    last_used: u64,
}

/// Least-recently-used map of loaded conversations.
struct ConversationCache {
    capacity: usize,
    clock: u64,
    map: HashMap<ConversationKey, Cached>,
}

impl ConversationCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            clock: 0,
            map: HashMap::new(),
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn get(&mut self, key: &ConversationKey) -> Option<Vec<HistoryEntry>> {
        let now = self.tick();
        self.map.get_mut(key).map(|c| {
            c.last_used = now;
            c.entries.clone()
        })
    }

    /// Insert a freshly read conversation unless a concurrent load beat us
    /// to it; returns whichever copy is cached.
    fn insert_if_absent(&mut self, key: &ConversationKey, entries: Vec<HistoryEntry>) -> Vec<HistoryEntry> {
        if self.capacity == 0 {
            return entries;
        }
        let now = self.tick();
        let cached = self
            .map
            .entry(key.clone())
            .or_insert(Cached { entries, last_used: now });
        cached.last_used = now;
        let entries = cached.entries.clone();
        self.evict_over_capacity();
        entries
    }

    /// A conversation evicted since it was loaded is left alone: the file
    /// already holds the new lines.
    fn extend_if_cached(&mut self, key: &ConversationKey, entries: &[HistoryEntry]) {
        if let Some(cached) = self.map.get_mut(key) {
            cached.entries.extend(entries.iter().cloned());
        }
    }

    fn evict_over_capacity(&mut self) {
        while self.map.len() > self.capacity {
            let Some(oldest) = self
                .map
                .iter()
                .min_by_key(|(_, c)| c.last_used)
                .map(|(k, _)| k.clone())
            else {
                return;
            };
            self.map.remove(&oldest);
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// JSONL store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct JsonlHistoryStore {
    base_dir: PathBuf,
    cache: Mutex<ConversationCache>,
}

impl JsonlHistoryStore {
    pub fn new(base_dir: &Path) -> Result<Self> {
        Self::with_cache_capacity(base_dir, DEFAULT_CACHED_CONVERSATIONS)
    }

    /// `capacity` conversations stay cached; 0 reads the file every time.
    pub fn with_cache_capacity(base_dir: &Path, capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(base_dir)?;
        Ok(Self {
            base_dir: base_dir.to_path_buf(),
            cache: Mutex::new(ConversationCache::new(capacity)),
        })
    }

    pub fn cached_conversations(&self) -> usize {
        self.cache.lock().len()
    }

    fn path_for(&self, channel_id: &str, personality_id: &str) -> PathBuf {
        self.base_dir.join(file_name(channel_id, personality_id))
    }

    async fn load(&self, key: &ConversationKey) -> Result<Vec<HistoryEntry>> {
        if let Some(entries) = self.cache.lock().get(key) {
            return Ok(entries);
        }

        let path = self.path_for(&key.0, &key.1);
        let entries = tokio::task::spawn_blocking(move || read_jsonl_file(&path))
            .await
            .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        Ok(self.cache.lock().insert_if_absent(key, entries))
    }
}

#[async_trait]
impl HistoryRepository for JsonlHistoryStore {
    async fn recent(&self, channel_id: &str, personality_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let key = (channel_id.to_owned(), personality_id.to_owned());
        let entries = self.load(&key).await?;
        Ok(newest_first(entries, limit))
    }

    async fn append(&self, entries: &[HistoryEntry]) -> Result<()> {
        let Some(first) = entries.first() else {
            return Ok(());
        };
        let key = conversation_key(entries)?;

        // Warm the cache first so the appended lines land after what's on disk.
        self.load(&key).await?;

        let buf = serialize_lines(entries)?;
        let path = self.path_for(&key.0, &key.1);
        tokio::task::spawn_blocking(move || {
            use std::io::Write;
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            file.write_all(buf.as_bytes())?;
            Ok::<(), Error>(())
        })
        .await
        .map_err(|e| Error::Other(format!("spawn_blocking join: {e}")))??;

        self.cache.lock().extend_if_cached(&key, entries);

        TraceEvent::HistoryAppend {
            channel_id: first.channel_id.clone(),
            personality_id: first.personality_id.clone(),
            lines: entries.len(),
        }
        .emit();
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// In-memory store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// History that lives only as long as the process.
#[derive(Default)]
pub struct InMemoryHistoryStore {
    entries: RwLock<HashMap<ConversationKey, Vec<HistoryEntry>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryRepository for InMemoryHistoryStore {
    async fn recent(&self, channel_id: &str, personality_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let key = (channel_id.to_owned(), personality_id.to_owned());
        let entries = self.entries.read().get(&key).cloned().unwrap_or_default();
        Ok(newest_first(entries, limit))
    }

    async fn append(&self, entries: &[HistoryEntry]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let key = conversation_key(entries)?;
        self.entries
            .write()
            .entry(key)
            .or_default()
            .extend(entries.iter().cloned());
        Ok(())
    }
}

// ── helpers ─────────────────────────────────────────────────────────

/// Order by creation time, newest first, and keep `limit`.
///
/// The sort is stable, so entries sharing a timestamp come back in reverse
/// append order.
fn newest_first(mut entries: Vec<HistoryEntry>, limit: usize) -> Vec<HistoryEntry> {
    entries.sort_by_key(|e| e.created_at);
    entries.into_iter().rev().take(limit).collect()
}

fn conversation_key(entries: &[HistoryEntry]) -> Result<ConversationKey> {
    let first = &entries[0];
    if entries
        .iter()
        .any(|e| e.channel_id != first.channel_id || e.personality_id != first.personality_id)
    {
        return Err(Error::Store(
            "history append spans more than one conversation".into(),
        ));
    }
    Ok((first.channel_id.clone(), first.personality_id.clone()))
}

/// Readable prefix plus a digest so distinct ids never share a file.
fn file_name(channel_id: &str, personality_id: &str) -> String {
    let readable: String = format!("{channel_id}_{personality_id}")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(48)
        .collect();
    let mut hasher = Sha256::new();
    hasher.update(channel_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(personality_id.as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{readable}-{}.jsonl", &digest[..16])
}

fn serialize_lines(entries: &[HistoryEntry]) -> Result<String> {
    let mut buf = String::new();
    for entry in entries {
        buf.push_str(&serde_json::to_string(entry)?);
        buf.push('\n');
    }
    Ok(buf)
}

fn read_jsonl_file(path: &Path) -> Result<Vec<HistoryEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }

    let raw = std::fs::read_to_string(path)?;
    let mut entries = Vec::new();
    for (lineno, line) in raw.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryEntry>(line) {
            Ok(entry) => entries.push(entry),
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    line = lineno + 1,
                    error = %e,
                    "skipping malformed history line"
                );
            }
        }
    }
    Ok(entries)
}
