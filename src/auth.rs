// SPDX-License-Identifier: Apache-2.0
//! Authentication providers and the login/logout flows built on them.

pub mod basic;
pub mod oauth2;

use std::sync::Arc;

use actix_web::cookie::time::Duration as CookieDuration;
use actix_web::cookie::{Cookie, SameSite};
use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{HttpRequest, HttpResponse, ResponseError};
use async_trait::async_trait;
use tracing::{error, info, instrument, warn};

use crate::error::AuthError;
use crate::session::{
    is_secure_request, removal_cookie, session_cookie, session_token, RequestContext, SessionStore,
};
use crate::users::User;

/// How a provider collects proof of identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginFlow {
    /// The login form posts credentials straight to the gateway.
    Credentials,
    /// The browser is sent to a third party and comes back to a callback.
    Redirect,
}

/// Who a provider says the caller is.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub provider: String,
    pub provider_id: String,
    pub email: String,
    pub email_verified: bool,
    pub username: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
    pub locale: Option<String>,
}

#[derive(Debug)]
pub enum Verification {
    Verified { identity: Identity, redirect: String },
    /// The caller already holds a valid session; no new one is created.
    AlreadyAuthenticated { redirect: String },
}

#[async_trait(?Send)]
pub trait AuthProvider: Send + Sync {
    /// Path segment and session tag, e.g. `basic` or `github`.
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn flow(&self) -> LoginFlow;

    /// Starts a login that should land on `redirect` afterwards.
    async fn initiate_login(&self, req: &HttpRequest, redirect: &str)
        -> Result<HttpResponse, AuthError>;

    /// Checks submitted credentials or callback parameters.
    async fn verify(&self, req: &HttpRequest, payload: &mut Payload)
        -> Result<Verification, AuthError>;

    /// Maps a verified identity to a local user, linking or creating it.
    async fn resolve_user(&self, identity: &Identity) -> Result<User, AuthError>;

    /// Cookies holding in-flight login state, cleared on every completion response.
    fn transient_cookies(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Accepts only local absolute paths as post-login targets; anything else becomes `/`.
pub fn safe_redirect(target: Option<&str>) -> String {
    match target {
        Some(t) if t.starts_with('/') && !t.starts_with("//") && !t.contains('\\') => t.to_owned(),
        _ => "/".to_owned(),
    }
}

/// First value of a query parameter, percent-decoded.
pub fn query_param(req: &HttpRequest, name: &str) -> Option<String> {
    url::form_urlencoded::parse(req.query_string().as_bytes())
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

/// Short-lived cookie carrying login state between redirect and callback.
pub(crate) fn transient_cookie(name: &'static str, value: &str, secure: bool) -> Cookie<'static> {
    Cookie::build(name, value.to_owned())
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::minutes(10))
        .finish()
}

fn expired_cookie(name: &'static str, secure: bool) -> Cookie<'static> {
    Cookie::build(name, "")
        .path("/")
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .max_age(CookieDuration::seconds(-1))
        .finish()
}

/// Owns the configured providers and turns verified logins into sessions.
pub struct Authenticator {
    providers: Vec<Arc<dyn AuthProvider>>,
    sessions: SessionStore,
    session_duration: chrono::Duration,
}

impl Authenticator {
    pub fn new(
        providers: Vec<Arc<dyn AuthProvider>>,
        sessions: SessionStore,
        session_duration: chrono::Duration,
    ) -> Self {
        Self {
            providers,
            sessions,
            session_duration,
        }
    }

    pub fn providers(&self) -> &[Arc<dyn AuthProvider>] {
        &self.providers
    }

    pub fn provider(&self, id: &str) -> Option<&Arc<dyn AuthProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    #[instrument(skip(self, provider, req), fields(provider = %provider.id()))]
    pub async fn initiate(&self, provider: &dyn AuthProvider, req: &HttpRequest) -> HttpResponse {
        let redirect = safe_redirect(query_param(req, "redirect").as_deref());
        match provider.initiate_login(req, &redirect).await {
            Ok(res) => res,
            Err(e) => {
                error!(error = %e, "Failed to start login");
                e.error_response()
            }
        }
    }

    /// Finishes a login: verify, resolve the user, create the session and set
    /// its cookie. Transient provider cookies are cleared whatever the outcome.
    #[instrument(skip(self, provider, req, payload), fields(provider = %provider.id()))]
    pub async fn complete(
        &self,
        provider: &dyn AuthProvider,
        req: &HttpRequest,
        payload: &mut Payload,
    ) -> HttpResponse {
        let mut res = match self.try_complete(provider, req, payload).await {
            Ok(res) => res,
            Err(e) => {
                if e.status_code().is_server_error() {
                    error!(error = %e, "Login failed");
                } else {
                    warn!(error = %e, "Login rejected");
                }
                e.error_response()
            }
        };

        let secure = is_secure_request(req);
        for &name in provider.transient_cookies() {
            if let Err(e) = res.add_cookie(&expired_cookie(name, secure)) {
                warn!(cookie = %name, error = %e, "Failed to clear transient cookie");
            }
        }
        res
    }

    async fn try_complete(
        &self,
        provider: &dyn AuthProvider,
        req: &HttpRequest,
        payload: &mut Payload,
    ) -> Result<HttpResponse, AuthError> {
        let (identity, redirect) = match provider.verify(req, payload).await? {
            Verification::AlreadyAuthenticated { redirect } => {
                return Ok(HttpResponse::Found()
                    .append_header((header::LOCATION, redirect))
                    .finish());
            }
            Verification::Verified { identity, redirect } => (identity, redirect),
        };

        let user = provider.resolve_user(&identity).await?;
        if !user.email_confirmed {
            // A credentials login must not reveal that the password was right.
            return Err(match provider.flow() {
                LoginFlow::Credentials => AuthError::InvalidCredentials,
                LoginFlow::Redirect => AuthError::EmailNotConfirmed,
            });
        }

        let session = self
            .sessions
            .new_session(
                &RequestContext::from_request(req),
                &user,
                provider.id(),
                self.session_duration,
            )
            .await?;
        info!(user_id = %user.id, username = %user.username, "User logged in");

        Ok(HttpResponse::Found()
            .append_header((header::LOCATION, redirect))
            .cookie(session_cookie(
                &session.token,
                self.session_duration,
                is_secure_request(req),
            ))
            .finish())
    }

    /// Ends the current session (if any), clears the cookie and redirects.
    #[instrument(skip(self, req))]
    pub async fn logout(&self, req: &HttpRequest) -> HttpResponse {
        let redirect = safe_redirect(query_param(req, "redirect").as_deref());

        let ended = match session_token(req) {
            Some(token) => match self.sessions.end_session(&token).await {
                Ok(()) => {
                    info!("Session ended");
                    true
                }
                Err(e) => {
                    error!(error = %e, "Failed to end session");
                    false
                }
            },
            None => true,
        };

        let mut res = if ended {
            let mut found = HttpResponse::Found();
            found.append_header((header::LOCATION, redirect));
            found
        } else {
            HttpResponse::InternalServerError()
        };
        res.cookie(removal_cookie(is_secure_request(req)))
            .append_header((header::CACHE_CONTROL, "no-store, no-cache, must-revalidate"))
            .append_header((header::PRAGMA, "no-cache"))
            .append_header((header::EXPIRES, "0"))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_session_store::InMemorySessionRepository;
    use crate::users::LOCAL_PROVIDER;
    use actix_web::http::StatusCode;
    use actix_web::test::TestRequest;

    struct FixedProvider {
        email_confirmed: bool,
        flow: LoginFlow,
    }

    #[async_trait(?Send)]
    impl AuthProvider for FixedProvider {
        fn id(&self) -> &str {
            "fixed"
        }

        fn display_name(&self) -> &str {
            "Fixed"
        }

        fn flow(&self) -> LoginFlow {
            self.flow
        }

        async fn initiate_login(
            &self,
            _req: &HttpRequest,
            redirect: &str,
        ) -> Result<HttpResponse, AuthError> {
            Ok(HttpResponse::TemporaryRedirect()
                .append_header((header::LOCATION, format!("https://idp.test/?next={redirect}")))
                .finish())
        }

        async fn verify(
            &self,
            req: &HttpRequest,
            _payload: &mut Payload,
        ) -> Result<Verification, AuthError> {
            if query_param(req, "code").is_none() {
                return Err(AuthError::BadRequest("missing code".into()));
            }
            Ok(Verification::Verified {
                identity: Identity {
                    provider: "fixed".into(),
                    provider_id: "42".into(),
                    email: "fixed@example.com".into(),
                    email_verified: self.email_confirmed,
                    username: None,
                    name: None,
                    picture: None,
                    locale: None,
                },
                redirect: "/home".into(),
            })
        }

        async fn resolve_user(&self, identity: &Identity) -> Result<User, AuthError> {
            let mut user = User::local("fixed", &identity.email, "unused");
            user.provider = LOCAL_PROVIDER.into();
            user.email_confirmed = identity.email_verified;
            Ok(user)
        }

        fn transient_cookies(&self) -> &'static [&'static str] {
            &["fixed_state"]
        }
    }

    fn authenticator(email_confirmed: bool) -> (Authenticator, SessionStore) {
        authenticator_with_flow(email_confirmed, LoginFlow::Redirect)
    }

    fn authenticator_with_flow(email_confirmed: bool, flow: LoginFlow) -> (Authenticator, SessionStore) {
        let sessions = SessionStore::new(Arc::new(InMemorySessionRepository::new()));
        let provider: Arc<dyn AuthProvider> = Arc::new(FixedProvider { email_confirmed, flow });
        (
            Authenticator::new(vec![provider], sessions.clone(), chrono::Duration::hours(1)),
            sessions,
        )
    }

    fn set_cookies(res: &HttpResponse) -> Vec<Cookie<'static>> {
        res.cookies().map(|c| c.into_owned()).collect()
    }

    #[test]
    fn test_safe_redirect() {
        assert_eq!(safe_redirect(Some("/dashboard?tab=1")), "/dashboard?tab=1");
        assert_eq!(safe_redirect(Some("//evil.example")), "/");
        assert_eq!(safe_redirect(Some("https://evil.example")), "/");
        assert_eq!(safe_redirect(Some("/\\evil.example")), "/");
        assert_eq!(safe_redirect(Some("")), "/");
        assert_eq!(safe_redirect(None), "/");
    }

    #[test]
    fn test_query_param_decodes() {
        let req = TestRequest::get().uri("/x?redirect=%2Fa%3Fb%3D1&other=2").to_http_request();
        assert_eq!(query_param(&req, "redirect").as_deref(), Some("/a?b=1"));
        assert_eq!(query_param(&req, "missing"), None);
    }

    #[actix_web::test]
    async fn test_complete_creates_session_and_clears_transient_cookies() {
        let (auth, sessions) = authenticator(true);
        let provider = Arc::clone(auth.provider("fixed").unwrap());
        let req = TestRequest::get().uri("/cb?code=abc").to_http_request();

        let res = auth.complete(provider.as_ref(), &req, &mut Payload::None).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/home");

        let cookies = set_cookies(&res);
        let session = cookies
            .iter()
            .find(|c| c.name() == crate::session::SESSION_COOKIE_NAME)
            .unwrap();
        assert!(sessions.validate_token(session.value()).await.is_some());
        let cleared = cookies.iter().find(|c| c.name() == "fixed_state").unwrap();
        assert_eq!(cleared.max_age(), Some(CookieDuration::seconds(-1)));
    }

    #[actix_web::test]
    async fn test_failed_completion_still_clears_transient_cookies() {
        let (auth, _) = authenticator(true);
        let provider = Arc::clone(auth.provider("fixed").unwrap());
        let req = TestRequest::get().uri("/cb").to_http_request();

        let res = auth.complete(provider.as_ref(), &req, &mut Payload::None).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(set_cookies(&res).iter().any(|c| c.name() == "fixed_state"));
    }

    #[actix_web::test]
    async fn test_unconfirmed_email_is_rejected() {
        let (auth, _) = authenticator(false);
        let provider = Arc::clone(auth.provider("fixed").unwrap());
        let req = TestRequest::get().uri("/cb?code=abc").to_http_request();

        let res = auth.complete(provider.as_ref(), &req, &mut Payload::None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&res)
            .iter()
            .all(|c| c.name() != crate::session::SESSION_COOKIE_NAME));
    }

    #[actix_web::test]
    async fn test_unconfirmed_credentials_login_looks_like_bad_credentials() {
        let (auth, _) = authenticator_with_flow(false, LoginFlow::Credentials);
        let provider = Arc::clone(auth.provider("fixed").unwrap());
        let req = TestRequest::get().uri("/cb?code=abc").to_http_request();

        let res = auth.complete(provider.as_ref(), &req, &mut Payload::None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let body = actix_web::body::to_bytes(res.into_body()).await.unwrap();
        assert_eq!(body, "Invalid credentials");

        let (auth, _) = authenticator(false);
        let provider = Arc::clone(auth.provider("fixed").unwrap());
        let res = auth.complete(provider.as_ref(), &req, &mut Payload::None).await;
        let body = actix_web::body::to_bytes(res.into_body()).await.unwrap();
        assert_eq!(body, "Email address is not confirmed");
    }

    #[actix_web::test]
    async fn test_logout_without_session_redirects() {
        let (auth, _) = authenticator(true);
        let req = TestRequest::get()
            .uri("/gateway/logout?redirect=/bye")
            .to_http_request();

        let res = auth.logout(&req).await;
        assert_eq!(res.status(), StatusCode::FOUND);
        assert_eq!(res.headers().get(header::LOCATION).unwrap(), "/bye");
        assert_eq!(
            res.headers().get(header::CACHE_CONTROL).unwrap(),
            "no-store, no-cache, must-revalidate"
        );
        let removal = set_cookies(&res)
            .into_iter()
            .find(|c| c.name() == crate::session::SESSION_COOKIE_NAME)
            .unwrap();
        assert_eq!(removal.value(), "");
    }
}
