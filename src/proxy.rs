// SPDX-License-Identifier: Apache-2.0
use std::time::Duration;

use actix_web::dev::{Payload, ServiceRequest};
use actix_web::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use actix_web::http::Method;
use actix_web::{HttpMessage, HttpRequest, HttpResponse, ResponseError};
use awc::error::{ConnectError, SendRequestError};
use futures::TryStreamExt;
use tracing::{debug, error, instrument, warn};

use crate::chain::{Handler, HandlerFuture};
use crate::error::ProxyError;
use crate::routes::ProxyTarget;
use crate::session::SESSION_COOKIE_NAME;

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

const X_FORWARDED_FOR: &str = "x-forwarded-for";
const X_FORWARDED_HOST: &str = "x-forwarded-host";
const X_FORWARDED_PROTO: &str = "x-forwarded-proto";

/// Timeouts applied to every upstream call.
#[derive(Debug, Clone, Copy)]
pub struct ProxySettings {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
        }
    }
}

/// Joins two path pieces with exactly one `/` between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

/// Path sent upstream: `remove_from_path` stripped, re-rooted, then joined to
/// the upstream base path.
pub fn upstream_path(target: &ProxyTarget, request_path: &str) -> String {
    let path = target
        .remove_from_path
        .as_deref()
        .and_then(|strip| request_path.strip_prefix(strip))
        .unwrap_or(request_path);

    let rooted = if path.starts_with('/') {
        path.to_owned()
    } else {
        format!("/{path}")
    };
    single_joining_slash(target.upstream.path(), &rooted)
}

/// Full upstream URL for a request. Upstream and request queries are merged.
pub fn outbound_url(target: &ProxyTarget, request_path: &str, request_query: &str) -> String {
    let upstream = &target.upstream;
    let scheme = upstream.scheme_str().unwrap_or("http");
    let authority = upstream.authority().map(|a| a.as_str()).unwrap_or_default();
    let mut url = format!("{scheme}://{authority}{}", upstream_path(target, request_path));

    let base_query = upstream.query().unwrap_or_default();
    let query = match (base_query.is_empty(), request_query.is_empty()) {
        (false, false) => format!("{base_query}&{request_query}"),
        (false, true) => base_query.to_owned(),
        (true, _) => request_query.to_owned(),
    };
    if !query.is_empty() {
        url.push('?');
        url.push_str(&query);
    }
    url
}

fn is_hop_by_hop(name: &HeaderName, connection_tokens: &[String]) -> bool {
    let name = name.as_str();
    HOP_BY_HOP.contains(&name) || connection_tokens.iter().any(|t| t == name)
}

/// Header names listed in `Connection`, which are hop-by-hop as well.
fn connection_tokens(headers: &HeaderMap) -> Vec<String> {
    headers
        .get_all(header::CONNECTION)
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(|t| t.trim().to_ascii_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Cookie header without the gateway's own session cookie.
fn strip_session_cookie(cookie_header: &str) -> Option<String> {
    let filtered = cookie_header
        .split(';')
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let name = parts.next()?.trim();
            let value = parts.next().unwrap_or("");
            (!name.is_empty() && !name.eq_ignore_ascii_case(SESSION_COOKIE_NAME))
                .then(|| format!("{name}={value}"))
        })
        .collect::<Vec<_>>()
        .join("; ");
    (!filtered.is_empty()).then_some(filtered)
}

/// Headers for the upstream request: the client's end-to-end headers plus the
/// `X-Forwarded-*` set and a `Host` naming the upstream.
pub fn forwarded_headers(req: &HttpRequest, upstream_authority: &str) -> HeaderMap {
    let incoming = req.headers();
    let tokens = connection_tokens(incoming);
    let mut headers = HeaderMap::new();

    for (name, value) in incoming.iter() {
        if is_hop_by_hop(name, &tokens)
            || *name == header::HOST
            || *name == header::CONTENT_LENGTH
            || *name == header::COOKIE
            || name.as_str() == X_FORWARDED_FOR
            || name.as_str() == X_FORWARDED_HOST
            || name.as_str() == X_FORWARDED_PROTO
        {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let cookies = incoming
        .get_all(header::COOKIE)
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join("; ");
    if let Some(value) = strip_session_cookie(&cookies).and_then(|c| HeaderValue::from_str(&c).ok()) {
        headers.insert(header::COOKIE, value);
    }

    let original_host = incoming
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| req.connection_info().host().to_owned());
    if let Ok(value) = HeaderValue::from_str(&original_host) {
        headers.insert(HeaderName::from_static(X_FORWARDED_HOST), value);
    }

    let proto = match incoming.get(X_FORWARDED_PROTO) {
        Some(existing) => existing.clone(),
        None if req.app_config().secure() => HeaderValue::from_static("https"),
        None => HeaderValue::from_static("http"),
    };
    headers.insert(HeaderName::from_static(X_FORWARDED_PROTO), proto);

    let prior = incoming
        .get_all(X_FORWARDED_FOR)
        .filter_map(|v| v.to_str().ok())
        .collect::<Vec<_>>()
        .join(", ");
    let forwarded_for = match (prior.is_empty(), req.peer_addr()) {
        (true, Some(peer)) => Some(peer.ip().to_string()),
        (false, Some(peer)) => Some(format!("{prior}, {}", peer.ip())),
        (false, None) => Some(prior),
        (true, None) => None,
    };
    if let Some(value) = forwarded_for.and_then(|v| HeaderValue::from_str(&v).ok()) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }

    if let Ok(value) = HeaderValue::from_str(upstream_authority) {
        headers.insert(header::HOST, value);
    }
    headers
}

fn classify(err: SendRequestError) -> ProxyError {
    match err {
        SendRequestError::Timeout | SendRequestError::Connect(ConnectError::Timeout) => {
            ProxyError::Timeout
        }
        other => ProxyError::Upstream(other.to_string()),
    }
}

/// Forwards requests for one route to its upstream.
pub struct ProxyHandler {
    route_name: String,
    target: ProxyTarget,
    settings: ProxySettings,
}

impl ProxyHandler {
    pub fn new(route_name: impl Into<String>, target: ProxyTarget, settings: ProxySettings) -> Self {
        Self {
            route_name: route_name.into(),
            target,
            settings,
        }
    }
}

impl Handler for ProxyHandler {
    fn call(&self, mut req: ServiceRequest) -> HandlerFuture {
        let url = outbound_url(&self.target, req.path(), req.query_string());
        let authority = self
            .target
            .upstream
            .authority()
            .map(|a| a.as_str().to_owned())
            .unwrap_or_default();
        let headers = forwarded_headers(req.request(), &authority);
        let payload = req.take_payload();
        let route_name = self.route_name.clone();
        let settings = self.settings;

        Box::pin(async move {
            match forward(&route_name, &url, req.method().clone(), headers, payload, settings).await {
                Ok(res) => Ok(req.into_response(res)),
                Err(err) => Ok(req.into_response(err.error_response())),
            }
        })
    }
}

#[instrument(skip(method, headers, payload, settings), fields(method = %method))]
async fn forward(
    route_name: &str,
    url: &str,
    method: Method,
    headers: HeaderMap,
    payload: Payload,
    settings: ProxySettings,
) -> Result<HttpResponse, ProxyError> {
    let connector = awc::Connector::new()
        .timeout(settings.connect_timeout)
        .conn_keep_alive(Duration::from_secs(15))
        .disconnect_timeout(Duration::from_secs(2));
    let client = awc::ClientBuilder::new()
        .timeout(settings.request_timeout)
        .connector(connector)
        .finish();

    let mut outbound = client.request(method.clone(), url).no_decompress();
    for (name, value) in headers.iter() {
        outbound = outbound.append_header((name.clone(), value.clone()));
    }

    // Only attach a body stream for methods that carry one; some upstreams
    // wait forever on an empty stream.
    let pending = match method {
        Method::POST | Method::PUT | Method::PATCH => outbound.send_stream(payload),
        _ => outbound.send(),
    };

    let upstream_res = pending.await.map_err(|e| {
        let err = classify(e);
        error!(error = %err, "Forwarding to upstream failed");
        err
    })?;

    debug!(status = %upstream_res.status(), "Received upstream response");

    let tokens = connection_tokens(upstream_res.headers());
    let mut res = HttpResponse::build(upstream_res.status());
    for (name, value) in upstream_res.headers().iter() {
        if is_hop_by_hop(name, &tokens) || *name == header::CONTENT_LENGTH {
            continue;
        }
        res.append_header((name.clone(), value.clone()));
    }

    let stream = upstream_res.map_err(|e| {
        warn!(error = %e, "Upstream body stream error");
        actix_web::error::ErrorBadGateway(e)
    });
    Ok(res.streaming(stream))
}

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::test::TestRequest;

    fn target(upstream: &str, remove: Option<&str>) -> ProxyTarget {
        ProxyTarget {
            upstream: upstream.parse().unwrap(),
            remove_from_path: remove.map(str::to_owned),
        }
    }

    #[test]
    fn test_single_joining_slash() {
        assert_eq!(single_joining_slash("/base/", "/users"), "/base/users");
        assert_eq!(single_joining_slash("/base", "users"), "/base/users");
        assert_eq!(single_joining_slash("/base", "/users"), "/base/users");
        assert_eq!(single_joining_slash("/", "/"), "/");
    }

    #[test]
    fn test_remove_from_path() {
        let t = target("http://backend:9000", Some("/api/v1/"));
        assert_eq!(upstream_path(&t, "/api/v1/users"), "/users");
        assert_eq!(upstream_path(&t, "/api/v1/"), "/");
        assert_eq!(upstream_path(&t, "/other"), "/other");

        let t = target("http://backend:9000/base/", Some("/api"));
        assert_eq!(upstream_path(&t, "/api/users"), "/base/users");
    }

    #[test]
    fn test_outbound_url_merges_queries() {
        let t = target("http://backend:9000/svc?key=1", None);
        assert_eq!(outbound_url(&t, "/x", "a=2"), "http://backend:9000/svc/x?key=1&a=2");
        assert_eq!(outbound_url(&t, "/x", ""), "http://backend:9000/svc/x?key=1");

        let t = target("https://backend", None);
        assert_eq!(outbound_url(&t, "/x", "a=2"), "https://backend/x?a=2");
    }

    #[test]
    fn test_forwarded_headers() {
        let req = TestRequest::get()
            .uri("/api/v1/users")
            .insert_header((header::HOST, "gateway.example.com"))
            .insert_header((header::CONNECTION, "keep-alive, x-secret-hop"))
            .insert_header(("x-secret-hop", "1"))
            .insert_header(("x-forwarded-for", "10.0.0.1"))
            .insert_header((header::ACCEPT, "text/plain"))
            .insert_header((header::COOKIE, "theme=dark; wardgate_session=abc; lang=en"))
            .peer_addr("192.168.1.5:40000".parse().unwrap())
            .to_http_request();

        let headers = forwarded_headers(&req, "backend:9000");

        assert_eq!(headers.get(header::HOST).unwrap(), "backend:9000");
        assert_eq!(headers.get(X_FORWARDED_HOST).unwrap(), "gateway.example.com");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "http");
        assert_eq!(headers.get(X_FORWARDED_FOR).unwrap(), "10.0.0.1, 192.168.1.5");
        assert_eq!(headers.get(header::COOKIE).unwrap(), "theme=dark; lang=en");
        assert_eq!(headers.get(header::ACCEPT).unwrap(), "text/plain");
        assert!(headers.get(header::CONNECTION).is_none());
        assert!(headers.get("x-secret-hop").is_none());
    }

    #[test]
    fn test_existing_proto_is_kept_and_lone_session_cookie_dropped() {
        let req = TestRequest::get()
            .insert_header((X_FORWARDED_PROTO, "https"))
            .insert_header((header::COOKIE, "wardgate_session=abc"))
            .to_http_request();

        let headers = forwarded_headers(&req, "backend");
        assert_eq!(headers.get(X_FORWARDED_PROTO).unwrap(), "https");
        assert!(headers.get(header::COOKIE).is_none());
    }

    #[test]
    fn test_timeouts_map_to_gateway_timeout() {
        assert!(matches!(classify(SendRequestError::Timeout), ProxyError::Timeout));
        assert!(matches!(
            classify(SendRequestError::Connect(ConnectError::Timeout)),
            ProxyError::Timeout
        ));
        assert!(matches!(
            classify(SendRequestError::Connect(ConnectError::Disconnected)),
            ProxyError::Upstream(_)
        ));
    }
}
