//! Local Persistence
//!
//! Player identity and the dealer's last known room state. Persistence is
//! best effort: the engine logs storage errors and keeps playing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::core::room::RoomId;
use crate::game::state::{PlayerId, State};

/// Storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Filesystem failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// Stored document could not be (de)serialized.
    #[error("storage format error: {0}")]
    Format(#[from] serde_json::Error),
}

/// Key/value contract consumed by the engine.
pub trait Storage: Send + Sync {
    /// Stored player id.
    fn player_id(&self) -> Option<PlayerId>;
    /// Store the player id.
    fn set_player_id(&self, id: PlayerId) -> Result<(), StorageError>;
    /// Stored player name.
    fn player_name(&self) -> Option<String>;
    /// Store the player name.
    fn set_player_name(&self, name: &str) -> Result<(), StorageError>;
    /// Last saved state of a room.
    fn load_room_state(&self, room: &RoomId) -> Result<Option<State>, StorageError>;
    /// Save a room's state.
    fn save_room_state(&self, room: &RoomId, state: &State) -> Result<(), StorageError>;
}

/// Everything a store holds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    player_id: Option<PlayerId>,
    #[serde(default)]
    player_name: Option<String>,
    #[serde(default)]
    rooms: BTreeMap<RoomId, State>,
}

// =============================================================================
// MEMORY
// =============================================================================

/// Volatile store.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    doc: Mutex<Document>,
}

impl MemoryStorage {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn player_id(&self) -> Option<PlayerId> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).player_id
    }

    fn set_player_id(&self, id: PlayerId) -> Result<(), StorageError> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).player_id = Some(id);
        Ok(())
    }

    fn player_name(&self) -> Option<String> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).player_name.clone()
    }

    fn set_player_name(&self, name: &str) -> Result<(), StorageError> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).player_name = Some(name.to_string());
        Ok(())
    }

    fn load_room_state(&self, room: &RoomId) -> Result<Option<State>, StorageError> {
        Ok(self.doc.lock().unwrap_or_else(PoisonError::into_inner).rooms.get(room).cloned())
    }

    fn save_room_state(&self, room: &RoomId, state: &State) -> Result<(), StorageError> {
        self.doc
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .rooms
            .insert(room.clone(), state.clone());
        Ok(())
    }
}

// =============================================================================
// JSON FILE
// =============================================================================

/// Store backed by a single JSON file, rewritten on every change.
#[derive(Debug)]
pub struct JsonFileStorage {
    path: PathBuf,
    doc: Mutex<Document>,
}

impl JsonFileStorage {
    /// Open `path`, starting empty if the file does not exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let doc = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => Document::default(),
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, doc: Mutex::new(doc) })
    }

    /// Location on disk.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn update(&self, change: impl FnOnce(&mut Document)) -> Result<(), StorageError> {
        let mut doc = self.doc.lock().unwrap_or_else(PoisonError::into_inner);
        change(&mut doc);
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        // Write then rename so a crash never leaves a truncated file.
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&*doc)?)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), "storage saved");
        Ok(())
    }
}

impl Storage for JsonFileStorage {
    fn player_id(&self) -> Option<PlayerId> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).player_id
    }

    fn set_player_id(&self, id: PlayerId) -> Result<(), StorageError> {
        self.update(|doc| doc.player_id = Some(id))
    }

    fn player_name(&self) -> Option<String> {
        self.doc.lock().unwrap_or_else(PoisonError::into_inner).player_name.clone()
    }

    fn set_player_name(&self, name: &str) -> Result<(), StorageError> {
        self.update(|doc| doc.player_name = Some(name.to_string()))
    }

    fn load_room_state(&self, room: &RoomId) -> Result<Option<State>, StorageError> {
        Ok(self.doc.lock().unwrap_or_else(PoisonError::into_inner).rooms.get(room).cloned())
    }

    fn save_room_state(&self, room: &RoomId, state: &State) -> Result<(), StorageError> {
        self.update(|doc| {
            doc.rooms.insert(room.clone(), state.clone());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::room::Room;
    use crate::game::state::Player;

    #[test]
    fn test_memory_storage() {
        let storage = MemoryStorage::new();
        assert!(storage.player_id().is_none());

        let id = PlayerId::generate();
        storage.set_player_id(id).unwrap();
        storage.set_player_name("ana").unwrap();
        assert_eq!(storage.player_id(), Some(id));
        assert_eq!(storage.player_name().as_deref(), Some("ana"));

        let room = Room::generate().id();
        assert!(storage.load_room_state(&room).unwrap().is_none());
        let state = State::new(Player::new(id, "ana", 1), 1);
        storage.save_room_state(&room, &state).unwrap();
        assert_eq!(storage.load_room_state(&room).unwrap(), Some(state));
    }

    #[test]
    fn test_json_file_storage_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("poker.json");
        let id = PlayerId::generate();
        let room = Room::generate().id();
        let state = State::new(Player::new(id, "bo", 5), 5);

        {
            let storage = JsonFileStorage::open(&path).unwrap();
            storage.set_player_id(id).unwrap();
            storage.set_player_name("bo").unwrap();
            storage.save_room_state(&room, &state).unwrap();
        }

        let reopened = JsonFileStorage::open(&path).unwrap();
        assert_eq!(reopened.player_id(), Some(id));
        assert_eq!(reopened.player_name().as_deref(), Some("bo"));
        assert_eq!(reopened.load_room_state(&room).unwrap(), Some(state));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("poker.json");
        fs::write(&path, b"{ not json").unwrap();
        assert!(matches!(JsonFileStorage::open(&path), Err(StorageError::Format(_))));
    }
}
