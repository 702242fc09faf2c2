// SPDX-License-Identifier: Apache-2.0
//! Assembles routes, chains and the management API into one root handler.

use std::sync::Arc;

use actix_web::dev::{fn_service, ServiceRequest};
use actix_web::web::ServiceConfig;
use actix_web::HttpResponse;
use tracing::{info, warn};

use crate::auth::basic::BasicProvider;
use crate::auth::oauth2::OAuth2Provider;
use crate::auth::{AuthProvider, Authenticator};
use crate::chain::{ChainBuilder, Handler, HandlerFuture, SharedHandler};
use crate::config::GatewayConfig;
use crate::error::ConfigError;
use crate::fingerprint::{FingerprintCache, HeaderFingerprinter};
use crate::management::ManagementHandler;
use crate::memory_session_store::InMemorySessionRepository;
use crate::metrics::TrafficMetrics;
use crate::middleware::{
    AuthInterceptor, CacheControlInterceptor, FingerprintInterceptor, LoggingInterceptor,
    MetricsInterceptor, SessionInterceptor,
};
use crate::proxy::{ProxyHandler, ProxySettings};
use crate::routes::{Route, RouteTable, RouteTarget};
use crate::session::{SessionRepository, SessionStore};
use crate::static_files::{StaticFileHandler, StaticFolderHandler};
use crate::users::{InMemoryUserRepository, UserRepository};

/// Sends management paths to the management API and everything else through
/// the route table.
struct Dispatcher {
    management: ManagementHandler,
    routes: RouteTable<SharedHandler>,
}

impl Handler for Dispatcher {
    fn call(&self, req: ServiceRequest) -> HandlerFuture {
        if self.management.owns(req.path()) {
            return self.management.call(req);
        }

        match self.routes.resolve(req.path()).map(|m| Arc::clone(m.handler)) {
            Some(handler) => handler.call(req),
            None => Box::pin(async move { Ok(req.into_response(HttpResponse::NotFound().body("Not Found"))) }),
        }
    }
}

fn final_handler(route: &Route, proxy: ProxySettings) -> SharedHandler {
    match &route.target {
        RouteTarget::Proxy(target) => Arc::new(ProxyHandler::new(&route.name, target.clone(), proxy)),
        RouteTarget::StaticFile { path } => Arc::new(StaticFileHandler::new(&route.name, path)),
        RouteTarget::StaticFolder { root, spa } => Arc::new(StaticFolderHandler::new(
            &route.name,
            route.pattern.clone(),
            root,
            *spa,
        )),
    }
}

/// The whole request pipeline, built once and shared by every worker.
#[derive(Clone)]
pub struct Gateway {
    root: SharedHandler,
    sessions: Arc<SessionStore>,
    metrics: Arc<TrafficMetrics>,
}

impl Gateway {
    pub fn new(
        config: &GatewayConfig,
        users: Arc<dyn UserRepository>,
        session_repository: Arc<dyn SessionRepository>,
    ) -> Result<Self, ConfigError> {
        let prefix = config.server.management_prefix.as_str();
        let login_path = format!("{prefix}/login");

        let sessions = Arc::new(SessionStore::new(session_repository));
        let metrics = Arc::new(TrafficMetrics::new(config.middleware.metrics_max_paths));
        let fingerprints = Arc::new(FingerprintCache::new(
            Box::new(HeaderFingerprinter),
            config.middleware.fingerprint_cache_size,
        ));

        let mut providers: Vec<Arc<dyn AuthProvider>> = Vec::new();
        if config.auth.basic.enabled {
            providers.push(Arc::new(BasicProvider::new(
                Arc::clone(&users),
                SessionStore::clone(&sessions),
                login_path.clone(),
            )));
        }
        for settings in config.oauth2_settings()? {
            providers.push(Arc::new(OAuth2Provider::new(settings, Arc::clone(&users), prefix)));
        }
        if providers.is_empty() {
            warn!("No authentication providers configured; protected routes cannot be reached");
        }
        info!(
            providers = ?providers.iter().map(|p| p.id().to_owned()).collect::<Vec<_>>(),
            "Authentication providers ready"
        );

        let authenticator = Arc::new(Authenticator::new(
            providers,
            SessionStore::clone(&sessions),
            config.session.duration()?,
        ));
        let management = ManagementHandler::new(
            prefix,
            authenticator,
            Arc::clone(&sessions),
            Arc::clone(&metrics),
            Arc::clone(&fingerprints),
        );

        let proxy_settings = config.proxy.settings();
        let mut routes = RouteTable::new();
        for route in config.routes()? {
            let mut chain = ChainBuilder::new();
            chain.add(CacheControlInterceptor::new(route.cache_control_seconds));
            if route.authentication_required {
                chain.add(AuthInterceptor::new(Arc::clone(&sessions), login_path.clone()));
            }
            info!(
                route = %route.name,
                from = %route.pattern.as_str(),
                kind = route.target.kind(),
                chain = ?chain.names(),
                "Registered route"
            );
            let handler = chain.build(final_handler(&route, proxy_settings));
            routes.register(route, handler);
        }
        if routes.is_empty() {
            warn!("No routes configured; every non-management request will get 404");
        }

        let mut global = ChainBuilder::new();
        if config.middleware.fingerprint {
            global.add(FingerprintInterceptor::new(fingerprints));
        }
        if config.middleware.session {
            global.add(SessionInterceptor::new(Arc::clone(&sessions)));
        }
        if config.middleware.metrics {
            global.add(MetricsInterceptor::new(Arc::clone(&metrics)));
        }
        if config.middleware.logging {
            global.add(LoggingInterceptor);
        }
        info!(chain = ?global.names(), "Global chain built");

        let root = global.build(Arc::new(Dispatcher { management, routes }));
        Ok(Self {
            root,
            sessions,
            metrics,
        })
    }

    /// Gateway backed by in-memory repositories seeded with the configured users.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, ConfigError> {
        let users = InMemoryUserRepository::with_users(config.basic_users()?);
        Self::new(
            config,
            Arc::new(users),
            Arc::new(InMemorySessionRepository::new()),
        )
    }

    /// Installs the gateway as the app's default service.
    pub fn configure(&self, cfg: &mut ServiceConfig) {
        let root = Arc::clone(&self.root);
        cfg.default_service(fn_service(move |req: ServiceRequest| {
            let root = Arc::clone(&root);
            async move { root.call(req).await }
        }));
    }

    pub fn handler(&self) -> SharedHandler {
        Arc::clone(&self.root)
    }

    pub fn sessions(&self) -> Arc<SessionStore> {
        Arc::clone(&self.sessions)
    }

    pub fn metrics(&self) -> Arc<TrafficMetrics> {
        Arc::clone(&self.metrics)
    }
}
