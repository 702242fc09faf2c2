// SPDX-License-Identifier: Apache-2.0
//! Authorization-code login against Google and GitHub.

use std::sync::Arc;
use std::time::Duration;

use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse};
use async_trait::async_trait;
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use url::Url;
use uuid::Uuid;

use super::{query_param, safe_redirect, transient_cookie, AuthProvider, Identity, LoginFlow, Verification};
use crate::crypto::{constant_time_eq, generate_token};
use crate::error::AuthError;
use crate::session::is_secure_request;
use crate::users::{User, UserRepository};

pub const STATE_COOKIE: &str = "wardgate_oauth_state";
pub const REDIRECT_COOKIE: &str = "wardgate_oauth_redirect";

const USER_AGENT: &str = concat!("wardgate/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Google,
    Github,
}

/// Well-known endpoints of a provider kind.
#[derive(Debug, Clone, Copy)]
pub struct DefaultEndpoints {
    pub auth_url: &'static str,
    pub token_url: &'static str,
    pub userinfo_url: &'static str,
    pub emails_url: Option<&'static str>,
    pub scopes: &'static [&'static str],
}

impl ProviderKind {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "google" => Some(ProviderKind::Google),
            "github" => Some(ProviderKind::Github),
            _ => None,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            ProviderKind::Google => "Google",
            ProviderKind::Github => "GitHub",
        }
    }

    pub fn defaults(self) -> DefaultEndpoints {
        match self {
            ProviderKind::Google => DefaultEndpoints {
                auth_url: "https://accounts.google.com/o/oauth2/v2/auth",
                token_url: "https://oauth2.googleapis.com/token",
                userinfo_url: "https://openidconnect.googleapis.com/v1/userinfo",
                emails_url: None,
                scopes: &["openid", "email", "profile"],
            },
            ProviderKind::Github => DefaultEndpoints {
                auth_url: "https://github.com/login/oauth/authorize",
                token_url: "https://github.com/login/oauth/access_token",
                userinfo_url: "https://api.github.com/user",
                emails_url: Some("https://api.github.com/user/emails"),
                scopes: &["read:user", "user:email"],
            },
        }
    }
}

/// Fully resolved provider settings; every endpoint is known here.
#[derive(Debug, Clone)]
pub struct OAuth2Settings {
    pub name: String,
    pub kind: ProviderKind,
    pub display_name: String,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_url: Option<Url>,
    pub auth_url: Url,
    pub token_url: Url,
    pub userinfo_url: Url,
    pub emails_url: Option<Url>,
    pub scopes: Vec<String>,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct GoogleProfile {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
    picture: Option<String>,
    locale: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubProfile {
    id: u64,
    login: String,
    email: Option<String>,
    name: Option<String>,
    avatar_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

pub struct OAuth2Provider {
    settings: OAuth2Settings,
    users: Arc<dyn UserRepository>,
    callback_path: String,
}

impl OAuth2Provider {
    /// `management_prefix` locates the callback when no redirect URL is configured.
    pub fn new(settings: OAuth2Settings, users: Arc<dyn UserRepository>, management_prefix: &str) -> Self {
        let callback_path = format!("{management_prefix}/auth/{}/callback", settings.name);
        Self {
            settings,
            users,
            callback_path,
        }
    }

    fn redirect_uri(&self, req: &HttpRequest) -> String {
        match &self.settings.redirect_url {
            Some(url) => url.to_string(),
            None => {
                let conn = req.connection_info();
                format!("{}://{}{}", conn.scheme(), conn.host(), self.callback_path)
            }
        }
    }

    /// Provider authorization URL for one login attempt.
    pub fn authorization_url(&self, redirect_uri: &str, state: &str) -> Url {
        let mut url = self.settings.auth_url.clone();
        url.query_pairs_mut()
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("response_type", "code")
            .append_pair("scope", &self.settings.scopes.join(" "))
            .append_pair("state", state);
        url
    }

    fn client(&self) -> awc::Client {
        let connector = awc::Connector::new().timeout(self.settings.timeout);
        awc::ClientBuilder::new()
            .timeout(self.settings.timeout)
            .connector(connector)
            .finish()
    }

    async fn exchange_code(
        &self,
        client: &awc::Client,
        code: &str,
        redirect_uri: &str,
    ) -> Result<String, AuthError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.as_str()),
        ];

        let mut res = client
            .post(self.settings.token_url.as_str())
            .insert_header((header::ACCEPT, "application/json"))
            .insert_header((header::USER_AGENT, USER_AGENT))
            .send_form(&form)
            .await
            .map_err(|e| AuthError::Exchange(format!("token request failed: {e}")))?;

        if !res.status().is_success() {
            return Err(AuthError::Exchange(format!(
                "token endpoint returned {}",
                res.status()
            )));
        }

        let token: TokenResponse = res
            .json()
            .await
            .map_err(|e| AuthError::Exchange(format!("unreadable token response: {e}")))?;
        Ok(token.access_token)
    }

    async fn get_json<T: DeserializeOwned>(
        client: &awc::Client,
        url: &Url,
        access_token: &str,
    ) -> Result<T, AuthError> {
        let mut res = client
            .get(url.as_str())
            .bearer_auth(access_token)
            .insert_header((header::ACCEPT, "application/json"))
            .insert_header((header::USER_AGENT, USER_AGENT))
            .send()
            .await
            .map_err(|e| AuthError::Exchange(format!("{url}: {e}")))?;

        if !res.status().is_success() {
            return Err(AuthError::Exchange(format!("{url} returned {}", res.status())));
        }
        res.json::<T>()
            .await
            .map_err(|e| AuthError::Exchange(format!("{url}: unreadable response: {e}")))
    }

    async fn fetch_identity(
        &self,
        client: &awc::Client,
        access_token: &str,
    ) -> Result<Identity, AuthError> {
        let provider = self.settings.name.clone();
        match self.settings.kind {
            ProviderKind::Google => {
                let profile: GoogleProfile =
                    Self::get_json(client, &self.settings.userinfo_url, access_token).await?;
                let email = profile.email.unwrap_or_default();
                Ok(Identity {
                    provider,
                    provider_id: profile.sub,
                    email_verified: profile.email_verified && !email.is_empty(),
                    email,
                    username: None,
                    name: profile.name,
                    picture: profile.picture,
                    locale: profile.locale,
                })
            }
            ProviderKind::Github => {
                let profile: GithubProfile =
                    Self::get_json(client, &self.settings.userinfo_url, access_token).await?;
                // GitHub only publishes verified addresses on the profile.
                let (email, email_verified) = match profile.email.filter(|e| !e.is_empty()) {
                    Some(email) => (email, true),
                    None => self.github_primary_email(client, access_token).await?,
                };
                Ok(Identity {
                    provider,
                    provider_id: profile.id.to_string(),
                    email,
                    email_verified,
                    username: Some(profile.login),
                    name: profile.name,
                    picture: profile.avatar_url,
                    locale: None,
                })
            }
        }
    }

    async fn github_primary_email(
        &self,
        client: &awc::Client,
        access_token: &str,
    ) -> Result<(String, bool), AuthError> {
        let Some(url) = &self.settings.emails_url else {
            return Ok((String::new(), false));
        };
        let emails: Vec<GithubEmail> = Self::get_json(client, url, access_token).await?;
        debug!(count = emails.len(), "Fetched GitHub email addresses");
        Ok(emails
            .into_iter()
            .find(|e| e.primary && e.verified)
            .map(|e| (e.email, true))
            .unwrap_or_default())
    }
}

#[async_trait(?Send)]
impl AuthProvider for OAuth2Provider {
    fn id(&self) -> &str {
        &self.settings.name
    }

    fn display_name(&self) -> &str {
        &self.settings.display_name
    }

    fn flow(&self) -> LoginFlow {
        LoginFlow::Redirect
    }

    async fn initiate_login(
        &self,
        req: &HttpRequest,
        redirect: &str,
    ) -> Result<HttpResponse, AuthError> {
        let state = generate_token();
        let url = self.authorization_url(&self.redirect_uri(req), &state);
        let secure = is_secure_request(req);
        debug!(provider = %self.settings.name, "Redirecting to authorization endpoint");

        Ok(HttpResponse::TemporaryRedirect()
            .append_header((header::LOCATION, url.as_str()))
            .cookie(transient_cookie(STATE_COOKIE, &state, secure))
            .cookie(transient_cookie(REDIRECT_COOKIE, redirect, secure))
            .finish())
    }

    #[instrument(name = "oauth2_callback", skip(self, req, _payload))]
    async fn verify(
        &self,
        req: &HttpRequest,
        _payload: &mut Payload,
    ) -> Result<Verification, AuthError> {
        let expected = req.cookie(STATE_COOKIE).map(|c| c.value().to_owned());
        let received = query_param(req, "state");
        match (expected, received) {
            (Some(expected), Some(received))
                if !expected.is_empty()
                    && constant_time_eq(expected.as_bytes(), received.as_bytes()) => {}
            _ => return Err(AuthError::StateMismatch),
        }

        if let Some(error) = query_param(req, "error") {
            return Err(AuthError::Denied(error));
        }

        let code = query_param(req, "code")
            .filter(|c| !c.is_empty())
            .ok_or_else(|| AuthError::BadRequest("missing authorization code".to_owned()))?;

        let redirect = safe_redirect(
            req.cookie(REDIRECT_COOKIE)
                .map(|c| c.value().to_owned())
                .as_deref(),
        );

        let client = self.client();
        let access_token = self.exchange_code(&client, &code, &self.redirect_uri(req)).await?;
        let identity = self.fetch_identity(&client, &access_token).await?;
        info!(provider_id = %identity.provider_id, "Identity verified by provider");

        Ok(Verification::Verified { identity, redirect })
    }

    async fn resolve_user(&self, identity: &Identity) -> Result<User, AuthError> {
        let now = Utc::now();

        if let Some(mut user) = self
            .users
            .find_by_provider(&identity.provider, &identity.provider_id)
            .await?
        {
            if !identity.email.is_empty() {
                user.email = identity.email.clone();
            }
            user.email_confirmed = identity.email_verified;
            user.name = identity.name.clone().or(user.name);
            user.picture = identity.picture.clone().or(user.picture);
            user.locale = identity.locale.clone().or(user.locale);
            user.updated_at = now;
            return Ok(self.users.save(user).await?);
        }

        if !identity.email_verified {
            return Err(AuthError::EmailNotConfirmed);
        }

        if let Some(existing) = self.users.find_by_email(&identity.email).await? {
            warn!(
                existing_provider = %existing.provider,
                provider = %identity.provider,
                "Email already linked to another sign-in method"
            );
            return Err(AuthError::ProviderConflict);
        }

        let user = User {
            id: Uuid::new_v4().to_string(),
            username: identity
                .username
                .clone()
                .unwrap_or_else(|| identity.email.clone()),
            email: identity.email.clone(),
            password_hash: None,
            provider: identity.provider.clone(),
            provider_id: identity.provider_id.clone(),
            email_confirmed: identity.email_verified,
            name: identity.name.clone(),
            picture: identity.picture.clone(),
            locale: identity.locale.clone(),
            created_at: now,
            updated_at: now,
        };
        info!(user_id = %user.id, provider = %user.provider, "Creating user for new identity");
        Ok(self.users.save(user).await?)
    }

    fn transient_cookies(&self) -> &'static [&'static str] {
        &[STATE_COOKIE, REDIRECT_COOKIE]
    }
}
