// SPDX-License-Identifier: Apache-2.0
//! Endpoints under the management prefix: health, login, logout and status JSON.

use std::sync::Arc;

use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header::ContentType;
use actix_web::http::Method;
use actix_web::{HttpRequest, HttpResponse};
use serde_json::json;
use tracing::debug;

use crate::auth::{query_param, safe_redirect, Authenticator, LoginFlow};
use crate::chain::{Handler, HandlerFuture};
use crate::fingerprint::FingerprintCache;
use crate::metrics::TrafficMetrics;
use crate::middleware::current_session;
use crate::session::{Session, SessionStore};

#[derive(Clone)]
pub struct ManagementHandler {
    prefix: Arc<str>,
    authenticator: Arc<Authenticator>,
    sessions: Arc<SessionStore>,
    metrics: Arc<TrafficMetrics>,
    fingerprints: Arc<FingerprintCache>,
}

impl ManagementHandler {
    pub fn new(
        prefix: &str,
        authenticator: Arc<Authenticator>,
        sessions: Arc<SessionStore>,
        metrics: Arc<TrafficMetrics>,
        fingerprints: Arc<FingerprintCache>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            authenticator,
            sessions,
            metrics,
            fingerprints,
        }
    }

    /// Whether `path` belongs to the management API.
    pub fn owns(&self, path: &str) -> bool {
        path.strip_prefix(&*self.prefix)
            .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
    }

    /// Session from the extraction interceptor, or validated here when that
    /// interceptor is disabled.
    async fn session(&self, req: &HttpRequest) -> Option<Session> {
        match current_session(req) {
            Some(session) => Some(session),
            None => self.sessions.validate_session(req).await,
        }
    }

    async fn handle(&self, req: ServiceRequest) -> ServiceResponse {
        let sub = req
            .path()
            .strip_prefix(&*self.prefix)
            .unwrap_or_default()
            .to_owned();
        let method = req.method().clone();
        debug!(path = %sub, method = %method, "Management request");

        if let Some(rest) = sub.strip_prefix("/auth/") {
            return self.handle_auth(req, &method, rest).await;
        }

        let (http_req, _) = req.into_parts();
        let res = match (&method, sub.as_str()) {
            (&Method::GET, "/health") => HttpResponse::Ok().json(json!({ "status": "ok" })),
            (&Method::GET, "" | "/" | "/login") => self.login_page(&http_req),
            (&Method::GET | &Method::POST, "/logout") => self.authenticator.logout(&http_req).await,
            (&Method::GET, "/api/session") => match self.session(&http_req).await {
                Some(session) => HttpResponse::Ok().json(session_json(&session)),
                None => unauthorized(),
            },
            (&Method::GET, "/api/metrics") => match self.session(&http_req).await {
                Some(_) => HttpResponse::Ok().json(json!({
                    "traffic": self.metrics.snapshot(),
                    "fingerprint_cache": self.fingerprints.stats(),
                })),
                None => unauthorized(),
            },
            _ => HttpResponse::NotFound().body("Not Found"),
        };
        ServiceResponse::new(http_req, res)
    }

    async fn handle_auth(&self, req: ServiceRequest, method: &Method, rest: &str) -> ServiceResponse {
        let (provider_id, action) = rest.split_once('/').unwrap_or((rest, ""));
        let Some(provider) = self.authenticator.provider(provider_id).cloned() else {
            return req.into_response(HttpResponse::NotFound().body("Unknown login provider"));
        };

        let (http_req, mut payload) = req.into_parts();
        let res = match (method, action, provider.flow()) {
            (&Method::GET, "login", _) => self.authenticator.initiate(provider.as_ref(), &http_req).await,
            (&Method::POST, "login", LoginFlow::Credentials)
            | (&Method::GET, "callback", LoginFlow::Redirect) => {
                self.authenticator
                    .complete(provider.as_ref(), &http_req, &mut payload)
                    .await
            }
            _ => HttpResponse::NotFound().body("Not Found"),
        };
        ServiceResponse::new(http_req, res)
    }

    fn login_page(&self, req: &HttpRequest) -> HttpResponse {
        let redirect = safe_redirect(query_param(req, "redirect").as_deref());
        let encoded: String = url::form_urlencoded::byte_serialize(redirect.as_bytes()).collect();

        let mut body = String::from(
            "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Sign in</title></head><body>\n<h1>Sign in</h1>\n",
        );
        for provider in self.authenticator.providers() {
            match provider.flow() {
                LoginFlow::Credentials => body.push_str(&format!(
                    "<form method=\"post\" action=\"{prefix}/auth/{id}/login\">\n\
                     <input type=\"hidden\" name=\"redirect\" value=\"{redirect}\">\n\
                     <label>Username or email <input name=\"username\" autocomplete=\"username\"></label>\n\
                     <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\"></label>\n\
                     <button type=\"submit\">Sign in</button>\n</form>\n",
                    prefix = escape_html(&self.prefix),
                    id = escape_html(provider.id()),
                    redirect = escape_html(&redirect),
                )),
                LoginFlow::Redirect => body.push_str(&format!(
                    "<p><a href=\"{prefix}/auth/{id}/login?redirect={encoded}\">Continue with {name}</a></p>\n",
                    prefix = escape_html(&self.prefix),
                    id = escape_html(provider.id()),
                    name = escape_html(provider.display_name()),
                )),
            }
        }
        body.push_str("</body></html>\n");

        HttpResponse::Ok()
            .content_type(ContentType::html())
            .insert_header((actix_web::http::header::CACHE_CONTROL, "no-store"))
            .body(body)
    }
}

impl Handler for ManagementHandler {
    fn call(&self, req: ServiceRequest) -> HandlerFuture {
        let this = self.clone();
        Box::pin(async move { Ok(this.handle(req).await) })
    }
}

fn unauthorized() -> HttpResponse {
    HttpResponse::Unauthorized().json(json!({ "error": "authentication required" }))
}

fn session_json(session: &Session) -> serde_json::Value {
    json!({
        "user_id": session.user_id,
        "username": session.username,
        "email": session.email,
        "provider": session.provider,
        "created_at": session.created_at,
        "valid_until": session.valid_until,
    })
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
