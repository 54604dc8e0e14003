//! Persisted client identity and the game currently being played.

use std::time::{SystemTime, UNIX_EPOCH};

use engine::kv::{KeyValueStore, StoreError};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::debug;

use crate::model::GameId;

pub const SESSION_ID_KEY: &str = "sessionId";
pub const GAME_ID_KEY: &str = "currentGameRoomId";
const SESSION_SUFFIX_LEN: usize = 16;

#[derive(Debug)]
pub struct Session<S> {
    store: S,
}

impl<S: KeyValueStore> Session<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn session_id(&self) -> Option<String> {
        self.store.get(SESSION_ID_KEY).filter(|id| !id.is_empty())
    }

    /// Returns the persisted session id, generating and storing one on first use.
    pub fn ensure_session_id(&mut self) -> Result<String, StoreError> {
        if let Some(id) = self.session_id() {
            return Ok(id);
        }
        let id = generate_session_id();
        debug!(session_id = %id, "created session");
        self.store.set(SESSION_ID_KEY, &id)?;
        Ok(id)
    }

    pub fn game_id(&self) -> Option<GameId> {
        self.store
            .get(GAME_ID_KEY)
            .filter(|id| !id.is_empty())
            .map(GameId::new)
    }

    pub fn set_game_id(&mut self, game_id: &GameId) -> Result<(), StoreError> {
        self.store.set(GAME_ID_KEY, game_id.as_str())
    }

    pub fn clear_game_id(&mut self) -> Result<(), StoreError> {
        self.store.remove(GAME_ID_KEY)
    }

    /// Forgets both the session and the current game.
    pub fn reset(&mut self) -> Result<(), StoreError> {
        self.store.remove(GAME_ID_KEY)?;
        self.store.remove(SESSION_ID_KEY)
    }
}

/// `session_<unix millis>_<16 random alphanumerics>`.
pub fn generate_session_id() -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    let suffix: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SESSION_SUFFIX_LEN)
        .map(char::from)
        .collect();
    format!("session_{millis}_{suffix}")
}
