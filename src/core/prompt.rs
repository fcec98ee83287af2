//! Prompt id allocation over the locked state record.

use crate::core::error::WaiError;
use crate::core::events::{EventLog, WaiEvent};
use crate::core::lock::StateLock;
use crate::core::state::{PromptState, StateStore};
use crate::core::store::Store;
use sha2::{Digest, Sha256};
use std::time::Duration;

/// Content key for a payload: hex SHA-256 of its UTF-8 bytes.
pub fn payload_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct PromptIdAllocator {
    store: Store,
    states: StateStore,
    events: EventLog,
    retry: Duration,
}

impl PromptIdAllocator {
    pub fn new(store: &Store, retry: Duration) -> Self {
        Self {
            store: store.clone(),
            states: StateStore::new(store),
            events: EventLog::new(store),
            retry,
        }
    }

    /// Same hash as the last allocation returns the same id; anything else
    /// advances by one and remembers the hash.
    pub fn allocate_for_hash(&self, hash: &str) -> Result<u64, WaiError> {
        let lock = StateLock::acquire(&self.store, self.retry)?;
        let state = self.states.load(&lock);
        if state.last_hash == hash && state.last_id > 0 {
            tracing::debug!(prompt_id = state.last_id, "payload already has a prompt id");
            return Ok(state.last_id);
        }
        self.advance(&lock, state, hash)
    }

    /// Unconditional increment with the hash cleared.
    pub fn allocate_fresh(&self) -> Result<u64, WaiError> {
        let lock = StateLock::acquire(&self.store, self.retry)?;
        let state = self.states.load(&lock);
        self.advance(&lock, state, "")
    }

    /// Current record, read under the lock.
    pub fn current(&self) -> Result<PromptState, WaiError> {
        let lock = StateLock::acquire(&self.store, self.retry)?;
        Ok(self.states.load(&lock))
    }

    fn advance(&self, lock: &StateLock, state: PromptState, hash: &str) -> Result<u64, WaiError> {
        let next = PromptState {
            last_id: state.last_id + 1,
            last_hash: hash.to_string(),
        };
        self.states.save(lock, &next)?;
        self.events
            .record(WaiEvent::new("prompt.allocate", "success").prompt(next.last_id));
        tracing::debug!(prompt_id = next.last_id, "allocated prompt id");
        Ok(next.last_id)
    }
}
