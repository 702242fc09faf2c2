// SPDX-License-Identifier: Apache-2.0
//! Client fingerprint caching.
//!
//! The fingerprint algorithm itself sits behind [`Fingerprinter`]; this module
//! only caches its output per distinct set of request signals.

use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use actix_web::HttpRequest;
use actix_web::http::header;
use lru::LruCache;
use serde::Serialize;
use tracing::warn;

/// Request attributes a fingerprint is derived from.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct FingerprintSignals {
    pub user_agent: String,
    pub accept_language: String,
    pub accept_encoding: String,
    pub client_ip: String,
}

impl FingerprintSignals {
    pub fn from_request(req: &HttpRequest) -> Self {
        let header_value = |name: header::HeaderName| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_owned()
        };

        Self {
            user_agent: header_value(header::USER_AGENT),
            accept_language: header_value(header::ACCEPT_LANGUAGE),
            accept_encoding: header_value(header::ACCEPT_ENCODING),
            client_ip: req
                .connection_info()
                .realip_remote_addr()
                .unwrap_or_default()
                .to_owned(),
        }
    }
}

/// A fingerprinting algorithm. Implementations may be expensive; calls are cached.
pub trait Fingerprinter: Send + Sync {
    fn fingerprint(&self, signals: &FingerprintSignals) -> String;
}

/// Default stand-in: a 64-bit hash of the raw signals, hex encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderFingerprinter;

impl Fingerprinter for HeaderFingerprinter {
    fn fingerprint(&self, signals: &FingerprintSignals) -> String {
        format!("{:016x}", fxhash::hash64(signals))
    }
}

/// Fingerprint attached to request extensions by the fingerprint interceptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint(pub Arc<str>);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// LRU cache in front of a [`Fingerprinter`], keyed by the signal hash.
pub struct FingerprintCache {
    fingerprinter: Box<dyn Fingerprinter>,
    cache: Mutex<LruCache<u64, Arc<str>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl FingerprintCache {
    pub fn new(fingerprinter: Box<dyn Fingerprinter>, capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            fingerprinter,
            cache: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn get_or_compute(&self, signals: &FingerprintSignals) -> Fingerprint {
        let key = fxhash::hash64(signals);

        match self.cache.lock() {
            Ok(mut cache) => {
                if let Some(found) = cache.get(&key) {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    return Fingerprint(Arc::clone(found));
                }
                self.misses.fetch_add(1, Ordering::Relaxed);
                let value: Arc<str> = self.fingerprinter.fingerprint(signals).into();
                cache.put(key, Arc::clone(&value));
                Fingerprint(value)
            }
            Err(_) => {
                warn!("Fingerprint cache lock poisoned, computing uncached");
                self.misses.fetch_add(1, Ordering::Relaxed);
                Fingerprint(self.fingerprinter.fingerprint(signals).into())
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
