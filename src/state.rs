//! Shared State: identity, user directory and channel list.
//!
//! Exactly one [`StateWriter`] exists per processor and it is the only way to
//! mutate the record. Any number of [`StateHandle`]s may read concurrently.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::model::{Channel, Handshake, User};

/// Snapshot of the shared record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct State {
    /// The connected account.
    pub self_user: User,
    /// Directory keyed by account id.
    pub users: HashMap<String, User>,
    /// Channels as reported by the last handshake.
    pub channels: Vec<Channel>,
}

type Shared = Arc<RwLock<State>>;

fn read(shared: &Shared) -> RwLockReadGuard<'_, State> {
    // A panicked writer cannot leave a half-applied record: every mutation
    // is a single assignment or insert.
    shared.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(shared: &Shared) -> RwLockWriteGuard<'_, State> {
    shared.write().unwrap_or_else(PoisonError::into_inner)
}

/// Read-only view of the shared record.
#[derive(Debug, Clone)]
pub struct StateHandle {
    shared: Shared,
}

impl StateHandle {
    /// The connected account.
    pub fn self_user(&self) -> User {
        read(&self.shared).self_user.clone()
    }

    /// Look up a directory entry by account id.
    pub fn user(&self, id: &str) -> Option<User> {
        read(&self.shared).users.get(id).cloned()
    }

    /// Look up a directory entry by handle.
    pub fn user_by_name(&self, name: &str) -> Option<User> {
        read(&self.shared)
            .users
            .values()
            .find(|u| u.name == name)
            .cloned()
    }

    /// Number of directory entries.
    pub fn user_count(&self) -> usize {
        read(&self.shared).users.len()
    }

    /// All channels.
    pub fn channels(&self) -> Vec<Channel> {
        read(&self.shared).channels.clone()
    }

    /// Look up a channel by id.
    pub fn channel(&self, id: &str) -> Option<Channel> {
        read(&self.shared)
            .channels
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }

    /// Look up a channel by name, with or without a leading `#`.
    pub fn channel_by_name(&self, name: &str) -> Option<Channel> {
        let name = name.trim_start_matches('#');
        read(&self.shared)
            .channels
            .iter()
            .find(|c| c.name == name)
            .cloned()
    }

    /// Copy of the whole record.
    pub fn snapshot(&self) -> State {
        read(&self.shared).clone()
    }

    /// Run `f` under the read lock without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&State) -> R) -> R {
        f(&read(&self.shared))
    }
}

/// The single mutator of the shared record. Not `Clone`.
#[derive(Debug)]
pub struct StateWriter {
    shared: Shared,
}

impl Default for StateWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StateWriter {
    /// An empty record.
    pub fn new() -> Self {
        Self {
            shared: Arc::new(RwLock::new(State::default())),
        }
    }

    /// A reader onto this record.
    pub fn handle(&self) -> StateHandle {
        StateHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Apply a negotiation result: identity and channels are replaced
    /// wholesale, users are upserted.
    pub fn apply_handshake(&self, handshake: &Handshake) {
        let mut state = write(&self.shared);
        state.self_user = handshake.self_user.clone();
        state.channels = handshake.channels.clone();
        for user in &handshake.users {
            state.users.insert(user.id.clone(), user.clone());
        }
    }

    /// Insert or fully replace a directory entry. Returns the previous entry.
    pub fn upsert_user(&self, user: User) -> Option<User> {
        write(&self.shared).users.insert(user.id.clone(), user)
    }
}
