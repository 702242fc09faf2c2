// SPDX-License-Identifier: Apache-2.0
//! Username/password login against argon2 hashes.

use std::sync::Arc;

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest, HttpResponse};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use super::{safe_redirect, AuthProvider, Identity, LoginFlow, Verification};
use crate::crypto::{hash_password, verify_password};
use crate::error::AuthError;
use crate::middleware::login_redirect_location;
use crate::session::SessionStore;
use crate::users::{User, UserRepository, LOCAL_PROVIDER};

#[derive(Debug, Deserialize)]
pub struct BasicLoginForm {
    pub username: String,
    pub password: String,
    pub redirect: Option<String>,
}

pub struct BasicProvider {
    users: Arc<dyn UserRepository>,
    sessions: SessionStore,
    login_path: String,
    /// Verified when the login names no user so both paths cost the same.
    dummy_hash: Option<String>,
}

impl BasicProvider {
    pub fn new(
        users: Arc<dyn UserRepository>,
        sessions: SessionStore,
        login_path: impl Into<String>,
    ) -> Self {
        let dummy_hash = match hash_password("wardgate-timing-equalizer") {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(error = %e, "Could not prepare dummy password hash");
                None
            }
        };

        Self {
            users,
            sessions,
            login_path: login_path.into(),
            dummy_hash,
        }
    }

    async fn check_password(&self, password: String, hash: Option<String>) -> Result<bool, AuthError> {
        let Some(hash) = hash.or_else(|| self.dummy_hash.clone()) else {
            return Ok(false);
        };
        web::block(move || verify_password(&password, &hash))
            .await
            .map_err(|e| AuthError::Exchange(format!("password verification unavailable: {e}")))
    }
}

#[async_trait(?Send)]
impl AuthProvider for BasicProvider {
    fn id(&self) -> &str {
        LOCAL_PROVIDER
    }

    fn display_name(&self) -> &str {
        "Username and password"
    }

    fn flow(&self) -> LoginFlow {
        LoginFlow::Credentials
    }

    async fn initiate_login(
        &self,
        _req: &HttpRequest,
        redirect: &str,
    ) -> Result<HttpResponse, AuthError> {
        Ok(HttpResponse::Found()
            .append_header((header::LOCATION, login_redirect_location(&self.login_path, redirect)))
            .finish())
    }

    #[instrument(name = "basic_login", skip(self, req, payload))]
    async fn verify(
        &self,
        req: &HttpRequest,
        payload: &mut Payload,
    ) -> Result<Verification, AuthError> {
        let form = web::Form::<BasicLoginForm>::from_request(req, payload)
            .await
            .map(web::Form::into_inner);

        if self.sessions.validate_session(req).await.is_some() {
            debug!("Already authenticated, skipping credential check");
            let target = form.as_ref().ok().and_then(|f| f.redirect.as_deref());
            return Ok(Verification::AlreadyAuthenticated {
                redirect: safe_redirect(target),
            });
        }

        let form = form.map_err(|e| AuthError::BadRequest(e.to_string()))?;
        let redirect = safe_redirect(form.redirect.as_deref());

        let user = self.users.find_by_login(form.username.trim()).await?;
        let hash = user.as_ref().and_then(|u| u.password_hash.clone());
        let has_hash = hash.is_some();
        let password_ok = self.check_password(form.password, hash).await?;

        match user {
            Some(user) if has_hash && password_ok => {
                info!(username = %user.username, "Credentials accepted");
                Ok(Verification::Verified {
                    identity: Identity {
                        provider: LOCAL_PROVIDER.to_owned(),
                        provider_id: user.id.clone(),
                        email: user.email.clone(),
                        email_verified: user.email_confirmed,
                        username: Some(user.username),
                        name: user.name,
                        picture: user.picture,
                        locale: user.locale,
                    },
                    redirect,
                })
            }
            _ => {
                warn!(login = %form.username, "Rejected credentials");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    async fn resolve_user(&self, identity: &Identity) -> Result<User, AuthError> {
        self.users
            .find_by_id(&identity.provider_id)
            .await?
            .ok_or(AuthError::InvalidCredentials)
    }
}
