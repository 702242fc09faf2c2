// SPDX-License-Identifier: Apache-2.0
//! Interceptors for the global and per-route chains.

use std::sync::Arc;
use std::time::Instant;

use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::{self, HeaderValue};
use actix_web::http::StatusCode;
use actix_web::{Error, HttpMessage, HttpRequest, HttpResponse};
use tracing::{debug, field, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::chain::{HandlerFuture, Interceptor, SharedHandler};
use crate::fingerprint::{FingerprintCache, FingerprintSignals};
use crate::metrics::TrafficMetrics;
use crate::session::{session_token, Session, SessionStore};

/// Session attached to the request once its cookie has been validated.
#[derive(Debug, Clone)]
pub struct AuthenticatedSession(pub Session);

/// The validated session for this request, if an interceptor found one.
pub fn current_session(req: &HttpRequest) -> Option<Session> {
    req.extensions()
        .get::<AuthenticatedSession>()
        .map(|s| s.0.clone())
}

fn status_of(res: &Result<ServiceResponse, Error>) -> StatusCode {
    match res {
        Ok(res) => res.status(),
        Err(e) => e.as_response_error().status_code(),
    }
}

/// Computes (or reuses) the client fingerprint and stores it in request extensions.
pub struct FingerprintInterceptor {
    cache: Arc<FingerprintCache>,
}

impl FingerprintInterceptor {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self { cache }
    }
}

impl Interceptor for FingerprintInterceptor {
    fn name(&self) -> &'static str {
        "fingerprint"
    }

    fn intercept(&self, req: ServiceRequest, next: SharedHandler) -> HandlerFuture {
        let signals = FingerprintSignals::from_request(req.request());
        let fingerprint = self.cache.get_or_compute(&signals);
        req.extensions_mut().insert(fingerprint);
        next.call(req)
    }
}

/// Attaches the session behind a valid cookie. Never rejects a request.
pub struct SessionInterceptor {
    store: Arc<SessionStore>,
}

impl SessionInterceptor {
    pub fn new(store: Arc<SessionStore>) -> Self {
        Self { store }
    }
}

impl Interceptor for SessionInterceptor {
    fn name(&self) -> &'static str {
        "session"
    }

    fn intercept(&self, req: ServiceRequest, next: SharedHandler) -> HandlerFuture {
        let store = Arc::clone(&self.store);
        let token = session_token(req.request());

        Box::pin(async move {
            if let Some(token) = token {
                if let Some(session) = store.validate_token(&token).await {
                    req.extensions_mut().insert(AuthenticatedSession(session));
                }
            }
            next.call(req).await
        })
    }
}

/// Records status and latency for every request.
pub struct MetricsInterceptor {
    metrics: Arc<TrafficMetrics>,
}

impl MetricsInterceptor {
    pub fn new(metrics: Arc<TrafficMetrics>) -> Self {
        Self { metrics }
    }
}

impl Interceptor for MetricsInterceptor {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn intercept(&self, req: ServiceRequest, next: SharedHandler) -> HandlerFuture {
        let metrics = Arc::clone(&self.metrics);
        let path = req.path().to_owned();
        let started = Instant::now();

        Box::pin(async move {
            let res = next.call(req).await;
            metrics.record(&path, status_of(&res), started.elapsed());
            res
        })
    }
}

/// Opens one tracing span per request and logs its outcome.
#[derive(Default)]
pub struct LoggingInterceptor;

impl Interceptor for LoggingInterceptor {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn intercept(&self, req: ServiceRequest, next: SharedHandler) -> HandlerFuture {
        let span = info_span!(
            "http_request",
            request_id = %Uuid::new_v4(),
            method = %req.method(),
            path = %req.path(),
            client_ip = %req.connection_info().realip_remote_addr().unwrap_or("unknown"),
            user = field::Empty,
            status = field::Empty,
            latency_ms = field::Empty,
        );
        if let Some(session) = req.extensions().get::<AuthenticatedSession>() {
            span.record("user", session.0.username.as_str());
        }

        Box::pin(async move {
            let started = Instant::now();
            let res = next.call(req).instrument(span.clone()).await;
            let status = status_of(&res);
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

            span.record("status", status.as_u16());
            span.record("latency_ms", latency_ms);
            span.in_scope(|| {
                if status.is_server_error() {
                    warn!("Request failed");
                } else {
                    info!("Request completed");
                }
            });
            res
        })
    }
}

/// `Cache-Control` value for a route setting: `0` disables caching, `n` allows `n` seconds.
pub fn cache_control_value(seconds: u32) -> Option<HeaderValue> {
    if seconds == 0 {
        Some(HeaderValue::from_static("no-cache"))
    } else {
        HeaderValue::from_str(&format!("max-age={seconds}")).ok()
    }
}

/// Sets the route's configured `Cache-Control` header on the response.
pub struct CacheControlInterceptor {
    value: Option<HeaderValue>,
}

impl CacheControlInterceptor {
    pub fn new(seconds: Option<u32>) -> Self {
        Self {
            value: seconds.and_then(cache_control_value),
        }
    }
}

impl Interceptor for CacheControlInterceptor {
    fn name(&self) -> &'static str {
        "cache_control"
    }

    fn intercept(&self, req: ServiceRequest, next: SharedHandler) -> HandlerFuture {
        let value = self.value.clone();
        Box::pin(async move {
            let mut res = next.call(req).await?;
            // Login redirects and auth rejections must never be cached.
            let cacheable = !res.status().is_redirection() && res.status() != StatusCode::UNAUTHORIZED;
            if let (Some(value), true) = (value, cacheable) {
                res.headers_mut().insert(header::CACHE_CONTROL, value);
            }
            Ok(res)
        })
    }
}

/// Rejects anonymous requests: browsers are sent to the login page, API
/// clients get a 401.
pub struct AuthInterceptor {
    store: Arc<SessionStore>,
    login_path: String,
}

impl AuthInterceptor {
    pub fn new(store: Arc<SessionStore>, login_path: impl Into<String>) -> Self {
        Self {
            store,
            login_path: login_path.into(),
        }
    }
}

impl Interceptor for AuthInterceptor {
    fn name(&self) -> &'static str {
        "authentication"
    }

    fn intercept(&self, req: ServiceRequest, next: SharedHandler) -> HandlerFuture {
        let already_authenticated = req.extensions().contains::<AuthenticatedSession>();
        let token = if already_authenticated {
            None
        } else {
            session_token(req.request())
        };
        let store = Arc::clone(&self.store);
        let login_path = self.login_path.clone();

        Box::pin(async move {
            if !already_authenticated {
                let session = match token {
                    Some(token) => store.validate_token(&token).await,
                    None => None,
                };
                match session {
                    Some(session) => {
                        req.extensions_mut().insert(AuthenticatedSession(session));
                    }
                    None => {
                        info!(path = %req.path(), "Unauthenticated access attempt, redirecting to login");
                        return Ok(reject(req, &login_path));
                    }
                }
            }

            debug!(path = %req.path(), "User is authenticated, allowing access");
            next.call(req).await
        })
    }
}

/// API-style requests get a 401 instead of a login redirect.
fn is_api_request(req: &ServiceRequest) -> bool {
    req.path().starts_with("/api/")
        || req
            .headers()
            .get(header::ACCEPT)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|accept| accept.contains("application/json"))
}

/// Login URL carrying the original path (and query) as `redirect`.
pub fn login_redirect_location(login_path: &str, original: &str) -> String {
    let encoded: String = url::form_urlencoded::byte_serialize(original.as_bytes()).collect();
    format!("{login_path}?redirect={encoded}")
}

fn reject(req: ServiceRequest, login_path: &str) -> ServiceResponse {
    if is_api_request(&req) {
        let response = HttpResponse::Unauthorized()
            .insert_header((header::CACHE_CONTROL, "no-store"))
            .json(serde_json::json!({
            "error": "authentication required",
            "login": login_path,
        }));
        return req.into_response(response);
    }

    let original = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| req.path().to_owned());
    let response = HttpResponse::Found()
        .append_header((header::LOCATION, login_redirect_location(login_path, &original)))
        .insert_header((header::CACHE_CONTROL, "no-store"))
        .finish();
    req.into_response(response)
}
