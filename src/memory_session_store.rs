// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info};

use crate::error::StoreError;
use crate::session::{Session, SessionRepository};

/// Process-local session storage. Sessions are lost on restart.
#[derive(Debug, Clone, Default)]
pub struct InMemorySessionRepository {
    sessions: Arc<RwLock<HashMap<String, Session>>>,
}

impl InMemorySessionRepository {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Number of stored sessions, ended ones included until pruned.
    pub fn len(&self) -> usize {
        self.sessions.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned(op: &str) -> StoreError {
    error!("[MEMORY_STORE - {}] Session lock poisoned", op);
    StoreError::Unavailable("session store lock poisoned".to_owned())
}

#[async_trait]
impl SessionRepository for InMemorySessionRepository {
    async fn insert(&self, session: Session) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned("INSERT"))?;

        // Check and insert under one write lock so no reader sees a half-made entry.
        match sessions.entry(session.token.clone()) {
            Entry::Occupied(_) => Err(StoreError::Conflict),
            Entry::Vacant(slot) => {
                debug!("[MEMORY_STORE - INSERT] Stored session for user {}", session.user_id);
                slot.insert(session);
                Ok(())
            }
        }
    }

    async fn find(&self, token: &str) -> Result<Option<Session>, StoreError> {
        let sessions = self.sessions.read().map_err(|_| poisoned("FIND"))?;
        Ok(sessions.get(token).cloned())
    }

    async fn end(&self, token: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned("END"))?;
        match sessions.get_mut(token) {
            Some(session) => {
                session.ended_at.get_or_insert(at);
                debug!("[MEMORY_STORE - END] Session ended for user {}", session.user_id);
            }
            None => debug!("[MEMORY_STORE - END] No session for token, nothing to end"),
        }
        Ok(())
    }

    async fn prune(&self, now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut sessions = self.sessions.write().map_err(|_| poisoned("PRUNE"))?;
        let before = sessions.len();
        sessions.retain(|_, session| session.is_valid_at(now));
        let pruned = before.saturating_sub(sessions.len());
        if pruned > 0 {
            info!("[MEMORY_STORE - PRUNE] Removed {} expired or ended sessions", pruned);
        }
        Ok(u64::try_from(pruned).unwrap_or(u64::MAX))
    }
}
