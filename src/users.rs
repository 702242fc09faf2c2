// SPDX-License-Identifier: Apache-2.0
//! User records and the repository boundary the auth providers talk to.
//!
//! Persistent storage lives outside the gateway; [`InMemoryUserRepository`]
//! backs single-instance deployments and tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::error::StoreError;

/// Provider tag for users that log in with a password.
pub const LOCAL_PROVIDER: &str = "basic";

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub provider: String,
    pub provider_id: String,
    pub email_confirmed: bool,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// A password user. Local users are linked to themselves: `provider_id == id`.
    pub fn local(username: &str, email: &str, password_hash: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        Self {
            provider_id: id.clone(),
            id,
            username: username.to_owned(),
            email: email.to_owned(),
            password_hash: Some(password_hash.to_owned()),
            provider: LOCAL_PROVIDER.to_owned(),
            email_confirmed: true,
            name: None,
            picture: None,
            locale: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Looks a user up by username, or by email ignoring ASCII case.
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Inserts or replaces the user with the same id.
    async fn save(&self, user: User) -> Result<User, StoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<String, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let map = users.into_iter().map(|u| (u.id.clone(), u)).collect();
        Self {
            users: Arc::new(RwLock::new(map)),
        }
    }

    pub fn len(&self) -> usize {
        self.users.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn find_where<F>(&self, predicate: F) -> Result<Option<User>, StoreError>
    where
        F: Fn(&User) -> bool,
    {
        let users = self
            .users
            .read()
            .map_err(|_| StoreError::Unavailable("user store lock poisoned".to_owned()))?;
        Ok(users.values().find(|u| predicate(u)).cloned())
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn find_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.username == login || u.email.eq_ignore_ascii_case(login))
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.id == id)
    }

    async fn find_by_provider(
        &self,
        provider: &str,
        provider_id: &str,
    ) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.provider == provider && u.provider_id == provider_id)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.find_where(|u| u.email.eq_ignore_ascii_case(email))
    }

    async fn save(&self, user: User) -> Result<User, StoreError> {
        debug!(user_id = %user.id, provider = %user.provider, "Saving user");
        self.users
            .write()
            .map_err(|_| StoreError::Unavailable("user store lock poisoned".to_owned()))?
            .insert(user.id.clone(), user.clone());
        Ok(user)
    }
}
