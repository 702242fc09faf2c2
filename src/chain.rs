// SPDX-License-Identifier: Apache-2.0
//! Request handlers and the builder that composes interceptors around them.
//!
//! Chains are assembled once at startup. Whether an interceptor takes part is
//! decided while building (`if enabled { chain.add(..) }`), so the handler
//! graph that serves requests never consults configuration.

use std::future::Future;
use std::sync::Arc;

use actix_web::Error;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use futures::future::LocalBoxFuture;

pub type HandlerFuture = LocalBoxFuture<'static, Result<ServiceResponse, Error>>;

/// Anything that turns a request into a response.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, req: ServiceRequest) -> HandlerFuture;
}

pub type SharedHandler = Arc<dyn Handler>;

/// A stage wrapped around the rest of a chain. It may act on the request,
/// short-circuit with its own response, or post-process what `next` returns.
pub trait Interceptor: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn intercept(&self, req: ServiceRequest, next: SharedHandler) -> HandlerFuture;
}

struct Link {
    interceptor: Arc<dyn Interceptor>,
    next: SharedHandler,
}

impl Handler for Link {
    fn call(&self, req: ServiceRequest) -> HandlerFuture {
        self.interceptor.intercept(req, Arc::clone(&self.next))
    }
}

/// Collects interceptors in order; the first added ends up outermost.
#[derive(Default)]
pub struct ChainBuilder {
    interceptors: Vec<Arc<dyn Interceptor>>,
}

impl ChainBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<I: Interceptor>(&mut self, interceptor: I) -> &mut Self {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.interceptors.iter().map(|i| i.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.interceptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }

    /// Wraps `final_handler` so the first added interceptor runs first and
    /// sees the response last.
    pub fn build(self, final_handler: SharedHandler) -> SharedHandler {
        self.interceptors
            .into_iter()
            .rev()
            .fold(final_handler, |next, interceptor| {
                Arc::new(Link { interceptor, next }) as SharedHandler
            })
    }
}

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceResponse, Error>> + 'static,
{
    fn call(&self, req: ServiceRequest) -> HandlerFuture {
        Box::pin((self.0)(req))
    }
}

/// Wraps an async function as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> SharedHandler
where
    F: Fn(ServiceRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<ServiceResponse, Error>> + 'static,
{
    Arc::new(FnHandler(f))
}
