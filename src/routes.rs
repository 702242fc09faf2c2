// SPDX-License-Identifier: Apache-2.0
//! Route definitions and the table that resolves request paths to them.

use std::path::PathBuf;

use actix_web::http::Uri;

/// How a route's `from` pattern matches request paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutePattern {
    /// Matches exactly this path.
    Exact(String),
    /// Matches any path starting with this prefix. The prefix keeps its trailing `/`.
    Prefix(String),
}

impl RoutePattern {
    /// Parses a configured pattern. `/api/*` becomes `Prefix("/api/")`, a pattern
    /// ending in `/` is a prefix as well, anything else is exact.
    pub fn parse(from: &str) -> Option<Self> {
        if !from.starts_with('/') {
            return None;
        }

        if let Some(prefix) = from.strip_suffix('*') {
            if prefix.contains('*') {
                return None;
            }
            return Some(RoutePattern::Prefix(prefix.to_owned()));
        }

        if from.contains('*') {
            return None;
        }

        if from.ends_with('/') {
            Some(RoutePattern::Prefix(from.to_owned()))
        } else {
            Some(RoutePattern::Exact(from.to_owned()))
        }
    }

    /// Returns the part of `path` after the pattern when it matches.
    pub fn matches<'a>(&self, path: &'a str) -> Option<&'a str> {
        match self {
            RoutePattern::Exact(exact) => (path == exact.as_str()).then_some(""),
            RoutePattern::Prefix(prefix) => path.strip_prefix(prefix.as_str()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            RoutePattern::Exact(p) | RoutePattern::Prefix(p) => p,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProxyTarget {
    pub upstream: Uri,
    pub remove_from_path: Option<String>,
}

/// What a route serves. Each kind carries only the fields meaningful to it.
#[derive(Debug, Clone, PartialEq)]
pub enum RouteTarget {
    Proxy(ProxyTarget),
    StaticFile { path: PathBuf },
    StaticFolder { root: PathBuf, spa: bool },
}

impl RouteTarget {
    pub fn kind(&self) -> &'static str {
        match self {
            RouteTarget::Proxy(_) => "proxy",
            RouteTarget::StaticFile { .. } => "static_file",
            RouteTarget::StaticFolder { spa: true, .. } => "spa",
            RouteTarget::StaticFolder { spa: false, .. } => "static_folder",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Route {
    pub name: String,
    pub pattern: RoutePattern,
    pub target: RouteTarget,
    pub authentication_required: bool,
    /// `None` → no header, `Some(0)` → `no-cache`, `Some(n)` → `max-age=n`.
    pub cache_control_seconds: Option<u32>,
}

/// A successful lookup: the route, whatever was registered with it, and the
/// path remainder after the pattern.
#[derive(Debug)]
pub struct RouteMatch<'t, 'p, H> {
    pub route: &'t Route,
    pub handler: &'t H,
    pub remainder: &'p str,
}

/// Ordered routes. The first registered route that matches wins.
#[derive(Debug)]
pub struct RouteTable<H> {
    entries: Vec<(Route, H)>,
}

impl<H> Default for RouteTable<H> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<H> RouteTable<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, route: Route, handler: H) {
        self.entries.push((route, handler));
    }

    pub fn resolve<'t, 'p>(&'t self, path: &'p str) -> Option<RouteMatch<'t, 'p, H>> {
        self.entries.iter().find_map(|(route, handler)| {
            route.pattern.matches(path).map(|remainder| RouteMatch {
                route,
                handler,
                remainder,
            })
        })
    }

    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.entries.iter().map(|(route, _)| route)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
