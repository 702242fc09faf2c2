// SPDX-License-Identifier: Apache-2.0
use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use actix_web::http::header::ContentType;
use thiserror::Error;

/// Failures raised while loading configuration or assembling the gateway.
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("route '{name}' is invalid: {reason}")]
    InvalidRoute { name: String, reason: String },
    #[error("oauth2 provider '{name}' is invalid: {reason}")]
    InvalidProvider { name: String, reason: String },
    #[error("invalid setting: {0}")]
    InvalidSetting(String),
}

impl ConfigError {
    pub(crate) fn route(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidRoute {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }

    pub(crate) fn provider(name: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidProvider {
            name: name.to_owned(),
            reason: reason.into(),
        }
    }
}

/// Repository failures for sessions and users.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum StoreError {
    #[error("record already exists")]
    Conflict,
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

/// Authentication failures. Response bodies never say which credential was wrong.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("oauth2 state missing or mismatched")]
    StateMismatch,
    #[error("provider denied the login: {0}")]
    Denied(String),
    #[error("email address is not confirmed")]
    EmailNotConfirmed,
    #[error("email is already linked to another sign-in method")]
    ProviderConflict,
    #[error("unknown auth provider '{0}'")]
    UnknownProvider(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("provider exchange failed: {0}")]
    Exchange(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AuthError {
    /// Client-facing message; internal detail stays in the log.
    fn public_message(&self) -> &'static str {
        match self {
            AuthError::InvalidCredentials => "Invalid credentials",
            AuthError::StateMismatch | AuthError::Denied(_) => "Login could not be verified",
            AuthError::EmailNotConfirmed => "Email address is not confirmed",
            AuthError::ProviderConflict => {
                "An account with this email already exists with a different sign-in method"
            }
            AuthError::UnknownProvider(_) => "Unknown login provider",
            AuthError::BadRequest(_) => "Bad request",
            AuthError::Exchange(_) | AuthError::Store(_) => "Authentication failed",
        }
    }
}

impl ResponseError for AuthError {
    fn status_code(&self) -> StatusCode {
        match self {
            AuthError::InvalidCredentials
            | AuthError::StateMismatch
            | AuthError::Denied(_)
            | AuthError::EmailNotConfirmed => StatusCode::UNAUTHORIZED,
            AuthError::ProviderConflict => StatusCode::CONFLICT,
            AuthError::UnknownProvider(_) => StatusCode::NOT_FOUND,
            AuthError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AuthError::Exchange(_) | AuthError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body(self.public_message())
    }
}

/// Upstream failures for proxy routes.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("upstream timed out")]
    Timeout,
    #[error("upstream request failed: {0}")]
    Upstream(String),
}

impl ResponseError for ProxyError {
    fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            ProxyError::Timeout => "Gateway Timeout",
            ProxyError::Upstream(_) => "Bad Gateway",
        };
        HttpResponse::build(self.status_code())
            .content_type(ContentType::plaintext())
            .body(body)
    }
}
