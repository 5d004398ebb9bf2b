pub mod files;
pub mod memory;
pub mod sqlite;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::StoreError;
use crate::model::{HistoryInvalidation, Story, StoryEntityHistory, StoryLoreRelation};

pub use files::JsonDirStore;
pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

pub const STORIES_KEY: &str = "womb_stories";
pub const RELATIONS_KEY: &str = "womb_story_relations";
pub const HISTORY_KEY: &str = "deborah_history_logs_v1";
pub const INVALIDATIONS_KEY: &str = "deborah_history_invalidations_v1";
pub const CHAT_KEY_PREFIX: &str = "womb_chat_";

pub fn chat_key(story_id: &str) -> String {
    format!("{CHAT_KEY_PREFIX}{story_id}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Write {
    Put { key: String, value: String },
    Remove { key: String },
}

impl Write {
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Remove { key } => key,
        }
    }
}

/// String-keyed document storage. Values are JSON text.
pub trait KvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Applies every write or none of them, as far as the backend allows.
    fn apply(&mut self, writes: &[Write]) -> Result<(), StoreError>;

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;

    fn set(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.apply(&[Write::Put {
            key: key.to_string(),
            value: value.to_string(),
        }])
    }

    fn remove(&mut self, key: &str) -> Result<(), StoreError> {
        self.apply(&[Write::Remove {
            key: key.to_string(),
        }])
    }
}

/// Pending writes for one logical mutation.
#[derive(Debug, Default)]
pub struct Batch {
    writes: Vec<Write>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<(), StoreError> {
        let value = serde_json::to_string(value)?;
        self.writes.retain(|write| write.key() != key);
        self.writes.push(Write::Put {
            key: key.to_string(),
            value,
        });
        Ok(())
    }

    pub fn remove(&mut self, key: &str) {
        self.writes.retain(|write| write.key() != key);
        self.writes.push(Write::Remove {
            key: key.to_string(),
        });
    }

    pub fn stories(&mut self, stories: &[Story]) -> Result<(), StoreError> {
        self.put(STORIES_KEY, stories)
    }

    pub fn relations(&mut self, relations: &[StoryLoreRelation]) -> Result<(), StoreError> {
        self.put(RELATIONS_KEY, relations)
    }

    pub fn history(&mut self, history: &[StoryEntityHistory]) -> Result<(), StoreError> {
        self.put(HISTORY_KEY, history)
    }

    pub fn invalidations(&mut self, rows: &[HistoryInvalidation]) -> Result<(), StoreError> {
        self.put(INVALIDATIONS_KEY, rows)
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Typed access to the persisted documents. Every read goes to the backend.
pub struct Repository<S> {
    kv: S,
}

impl<S: KvStore> Repository<S> {
    pub fn new(kv: S) -> Self {
        Self { kv }
    }

    pub fn stories(&self) -> Result<Vec<Story>, StoreError> {
        self.load_list(STORIES_KEY)
    }

    pub fn story(&self, story_id: &str) -> Result<Option<Story>, StoreError> {
        Ok(self
            .stories()?
            .into_iter()
            .find(|story| story.id == story_id))
    }

    pub fn relations(&self) -> Result<Vec<StoryLoreRelation>, StoreError> {
        self.load_list(RELATIONS_KEY)
    }

    pub fn history(&self) -> Result<Vec<StoryEntityHistory>, StoreError> {
        self.load_list(HISTORY_KEY)
    }

    pub fn invalidations(&self) -> Result<Vec<HistoryInvalidation>, StoreError> {
        self.load_list(INVALIDATIONS_KEY)
    }

    pub fn raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.kv.get(key)
    }

    /// Story ids that have a chat transcript stored.
    pub fn chat_story_ids(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .kv
            .keys_with_prefix(CHAT_KEY_PREFIX)?
            .into_iter()
            .filter_map(|key| key.strip_prefix(CHAT_KEY_PREFIX).map(ToOwned::to_owned))
            .collect())
    }

    pub fn commit(&mut self, batch: Batch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.kv.apply(&batch.writes)
    }

    fn load_list<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, StoreError> {
        let Some(raw) = self.kv.get(key)? else {
            return Ok(Vec::new());
        };
        if raw.trim().is_empty() || raw.trim() == "null" {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
            key: key.to_string(),
            source,
        })
    }
}
