//! Durable store behind the engine.
//!
//! The engine writes through on every structural mutation, coalesces streamed content,
//! and reads a full [`Snapshot`] once at startup. Two implementations ship: JSON files under the data directory, and an
//! in-memory store for tests and one-shot runs.

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::core::conversation::Conversation;
use crate::core::ids::ConversationId;
use crate::core::message::Message;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub conversations: Vec<Conversation>,
    pub current: Option<ConversationId>,
    pub messages: HashMap<ConversationId, Vec<Message>>,
}

#[derive(Debug)]
pub enum PersistenceError {
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    Serialize {
        path: PathBuf,
        source: serde_json::Error,
    },
    Persist {
        path: PathBuf,
        source: tempfile::PersistError,
    },
}

impl fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PersistenceError::Io { path, source } => {
                write!(f, "I/O error on {}: {}", path.display(), source)
            }
            PersistenceError::Serialize { path, source } => {
                write!(f, "Invalid data in {}: {}", path.display(), source)
            }
            PersistenceError::Persist { path, source } => {
                write!(f, "Failed to replace {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for PersistenceError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            PersistenceError::Io { source, .. } => Some(source),
            PersistenceError::Serialize { source, .. } => Some(source),
            PersistenceError::Persist { source, .. } => Some(source),
        }
    }
}

pub trait Persistence: Send {
    fn load(&self) -> Result<Snapshot, PersistenceError>;

    fn save_conversations(
        &mut self,
        conversations: &[&Conversation],
        current: Option<&ConversationId>,
    ) -> Result<(), PersistenceError>;

    fn save_messages(
        &mut self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<(), PersistenceError>;

    fn remove_messages(&mut self, conversation_id: &ConversationId) -> Result<(), PersistenceError>;
}

#[derive(Serialize, Deserialize, Default)]
struct ConversationIndex {
    #[serde(default)]
    current: Option<ConversationId>,
    #[serde(default)]
    conversations: Vec<Conversation>,
}

/// `conversations.json` plus one `messages/<id>.json` per conversation.
#[derive(Debug, Clone)]
pub struct JsonFilePersistence {
    root: PathBuf,
}

impl JsonFilePersistence {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn index_path(&self) -> PathBuf {
        self.root.join("conversations.json")
    }

    fn messages_dir(&self) -> PathBuf {
        self.root.join("messages")
    }

    fn messages_path(&self, conversation_id: &ConversationId) -> PathBuf {
        self.messages_dir()
            .join(format!("{}.json", conversation_id.as_str()))
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>, PersistenceError> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = fs::read_to_string(path).map_err(|source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| PersistenceError::Serialize {
                path: path.to_path_buf(),
                source,
            })
    }

    fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
        let io_err = |source| PersistenceError::Io {
            path: path.to_path_buf(),
            source,
        };
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(dir).map_err(io_err)?;

        let contents =
            serde_json::to_vec_pretty(value).map_err(|source| PersistenceError::Serialize {
                path: path.to_path_buf(),
                source,
            })?;

        let mut temp_file = NamedTempFile::new_in(dir).map_err(io_err)?;
        temp_file.write_all(&contents).map_err(io_err)?;
        temp_file.as_file_mut().sync_all().map_err(io_err)?;
        temp_file
            .persist(path)
            .map_err(|source| PersistenceError::Persist {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(())
    }
}

impl Persistence for JsonFilePersistence {
    fn load(&self) -> Result<Snapshot, PersistenceError> {
        let index: ConversationIndex = Self::read_json(&self.index_path())?.unwrap_or_default();

        let mut messages = HashMap::new();
        for conversation in &index.conversations {
            let path = self.messages_path(&conversation.id);
            if let Some(list) = Self::read_json::<Vec<Message>>(&path)? {
                messages.insert(conversation.id.clone(), list);
            }
        }

        Ok(Snapshot {
            conversations: index.conversations,
            current: index.current,
            messages,
        })
    }

    fn save_conversations(
        &mut self,
        conversations: &[&Conversation],
        current: Option<&ConversationId>,
    ) -> Result<(), PersistenceError> {
        #[derive(Serialize)]
        struct IndexRef<'a> {
            current: Option<&'a ConversationId>,
            conversations: &'a [&'a Conversation],
        }

        Self::write_json(
            &self.index_path(),
            &IndexRef {
                current,
                conversations,
            },
        )
    }

    fn save_messages(
        &mut self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<(), PersistenceError> {
        Self::write_json(&self.messages_path(conversation_id), messages)
    }

    fn remove_messages(&mut self, conversation_id: &ConversationId) -> Result<(), PersistenceError> {
        let path = self.messages_path(conversation_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(PersistenceError::Io { path, source }),
        }
    }
}

/// Keeps the last written snapshot in memory. Clones share the same snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryPersistence {
    snapshot: Arc<Mutex<Snapshot>>,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn with_mut<R>(&self, f: impl FnOnce(&mut Snapshot) -> R) -> R {
        let mut guard = self
            .snapshot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

impl Persistence for MemoryPersistence {
    fn load(&self) -> Result<Snapshot, PersistenceError> {
        Ok(self.snapshot())
    }

    fn save_conversations(
        &mut self,
        conversations: &[&Conversation],
        current: Option<&ConversationId>,
    ) -> Result<(), PersistenceError> {
        self.with_mut(|snapshot| {
            snapshot.conversations = conversations.iter().map(|c| (*c).clone()).collect();
            snapshot.current = current.cloned();
        });
        Ok(())
    }

    fn save_messages(
        &mut self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Result<(), PersistenceError> {
        self.with_mut(|snapshot| {
            snapshot
                .messages
                .insert(conversation_id.clone(), messages.to_vec());
        });
        Ok(())
    }

    fn remove_messages(&mut self, conversation_id: &ConversationId) -> Result<(), PersistenceError> {
        self.with_mut(|snapshot| {
            snapshot.messages.remove(conversation_id);
        });
        Ok(())
    }
}
