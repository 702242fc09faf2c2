// SPDX-License-Identifier: Apache-2.0
//! Server-side sessions.
//!
//! The cookie only carries an opaque token; the [`SessionStore`] and its
//! repository are the source of truth for who is logged in and until when.

use std::sync::Arc;

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::HttpRequest;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, instrument, warn};

use crate::crypto::generate_token;
use crate::error::StoreError;
use crate::users::User;

/// Name of the cookie holding the session token.
pub const SESSION_COOKIE_NAME: &str = "wardgate_session";

/// Fresh tokens tried before giving up on a colliding insert.
const MAX_TOKEN_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub token: String,
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub is_authenticated: bool,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub valid_until: DateTime<Utc>,
    /// Set when the session was ended by logout.
    pub ended_at: Option<DateTime<Utc>>,
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.is_authenticated && self.ended_at.is_none() && now < self.valid_until
    }
}

/// Request metadata recorded on new sessions.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub client_ip: Option<String>,
    pub user_agent: Option<String>,
}

impl RequestContext {
    pub fn from_request(req: &HttpRequest) -> Self {
        Self {
            client_ip: req
                .connection_info()
                .realip_remote_addr()
                .map(str::to_owned),
            user_agent: req
                .headers()
                .get(actix_web::http::header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
                .map(str::to_owned),
        }
    }
}

/// Storage boundary for sessions.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Stores a new session. Returns [`StoreError::Conflict`] if the token is taken.
    async fn insert(&self, session: Session) -> Result<(), StoreError>;

    async fn find(&self, token: &str) -> Result<Option<Session>, StoreError>;

    /// Marks the session as ended. Unknown tokens are not an error.
    async fn end(&self, token: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    /// Physically removes expired and ended sessions, returning how many went.
    async fn prune(&self, now: DateTime<Utc>) -> Result<u64, StoreError>;
}

/// Owns the session lifecycle on top of a [`SessionRepository`].
#[derive(Clone)]
pub struct SessionStore {
    repository: Arc<dyn SessionRepository>,
}

impl SessionStore {
    pub fn new(repository: Arc<dyn SessionRepository>) -> Self {
        Self { repository }
    }

    /// Creates and persists a session for `user`, valid for `duration`.
    #[instrument(skip(self, ctx, user, duration), fields(user_id = %user.id))]
    pub async fn new_session(
        &self,
        ctx: &RequestContext,
        user: &User,
        provider: &str,
        duration: Duration,
    ) -> Result<Session, StoreError> {
        let now = Utc::now();
        let valid_until = now
            .checked_add_signed(duration)
            .ok_or_else(|| StoreError::Invalid(format!("session lifetime {duration} is out of range")))?;
        let mut attempts = 0;

        loop {
            attempts += 1;
            let session = Session {
                token: generate_token(),
                user_id: user.id.clone(),
                username: user.username.clone(),
                email: user.email.clone(),
                is_authenticated: true,
                provider: provider.to_owned(),
                created_at: now,
                valid_until,
                ended_at: None,
                client_ip: ctx.client_ip.clone(),
                user_agent: ctx.user_agent.clone(),
            };

            match self.repository.insert(session.clone()).await {
                Ok(()) => {
                    debug!("Session created");
                    return Ok(session);
                }
                Err(StoreError::Conflict) if attempts < MAX_TOKEN_ATTEMPTS => {
                    warn!(attempts, "Session token collision, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Resolves the session cookie on `req` into a live session.
    pub async fn validate_session(&self, req: &HttpRequest) -> Option<Session> {
        let token = session_token(req)?;
        self.validate_token(&token).await
    }

    pub async fn validate_token(&self, token: &str) -> Option<Session> {
        self.validate_token_at(token, Utc::now()).await
    }

    /// Validates `token` as of `now`. Repository failures count as "not authenticated".
    pub async fn validate_token_at(&self, token: &str, now: DateTime<Utc>) -> Option<Session> {
        if token.is_empty() {
            return None;
        }

        match self.repository.find(token).await {
            Ok(Some(session)) if session.is_valid_at(now) => Some(session),
            Ok(Some(_)) => {
                debug!("Session expired or ended");
                None
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "Session lookup failed, treating request as anonymous");
                None
            }
        }
    }

    pub async fn end_session(&self, token: &str) -> Result<(), StoreError> {
        self.repository.end(token, Utc::now()).await
    }

    pub async fn prune_expired(&self) -> Result<u64, StoreError> {
        self.repository.prune(Utc::now()).await
    }
}

/// Token from the session cookie, if any.
pub fn session_token(req: &HttpRequest) -> Option<String> {
    req.cookie(SESSION_COOKIE_NAME)
        .map(|c| c.value().to_owned())
        .filter(|v| !v.is_empty())
}

/// Whether the client reached us over TLS, either directly or via a TLS-terminating hop.
pub fn is_secure_request(req: &HttpRequest) -> bool {
    req.app_config().secure() || req.connection_info().scheme() == "https"
}

pub fn session_cookie(token: &str, lifetime: Duration, secure: bool) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE_NAME, token.to_owned())
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(lifetime.num_seconds()))
        .finish()
}

/// Clears the session cookie on the client.
pub fn removal_cookie(secure: bool) -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE_NAME, String::new())
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(-1))
        .finish()
}
