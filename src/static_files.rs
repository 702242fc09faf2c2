// SPDX-License-Identifier: Apache-2.0
//! Static file and SPA serving.

use std::path::{Path, PathBuf};

use actix_files::NamedFile;
use actix_web::dev::{ServiceRequest, ServiceResponse};
use actix_web::http::header;
use actix_web::{Error, HttpResponse, web};
use percent_encoding::percent_decode_str;
use tracing::{debug, error, warn};

use crate::chain::{Handler, HandlerFuture};
use crate::routes::RoutePattern;

pub const INDEX_FILE: &str = "index.html";

/// Outcome of mapping a request onto the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    File(PathBuf),
    /// A directory with an index was requested without its trailing slash.
    AddTrailingSlash,
    /// A single-file route points at a directory.
    IsDirectory,
    NotFound,
}

/// Resolves a single-file route target.
pub fn resolve_file(path: &Path) -> Resolution {
    if path.is_dir() {
        Resolution::IsDirectory
    } else if path.is_file() {
        Resolution::File(path.to_path_buf())
    } else {
        Resolution::NotFound
    }
}

/// Resolves `relative` (the path after the route prefix, still percent-encoded)
/// inside `root`.
pub fn resolve_in_folder(root: &Path, relative: &str, spa: bool) -> Resolution {
    let decoded = percent_decode_str(relative).decode_utf8_lossy();
    let mut candidate = root.to_path_buf();
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => return Resolution::NotFound,
            s if s.contains('\\') || s.contains('\0') => return Resolution::NotFound,
            s => candidate.push(s),
        }
    }

    if relative.is_empty() || relative.ends_with('/') {
        let index = candidate.join(INDEX_FILE);
        if index.is_file() {
            return Resolution::File(index);
        }
        return fallback(root, spa);
    }

    if candidate.is_file() {
        return Resolution::File(candidate);
    }
    if candidate.is_dir() && candidate.join(INDEX_FILE).is_file() {
        return Resolution::AddTrailingSlash;
    }
    fallback(root, spa)
}

fn fallback(root: &Path, spa: bool) -> Resolution {
    let index = root.join(INDEX_FILE);
    if spa && index.is_file() {
        Resolution::File(index)
    } else {
        Resolution::NotFound
    }
}

async fn respond(
    req: ServiceRequest,
    resolution: Resolution,
    route_name: &str,
) -> Result<ServiceResponse, Error> {
    match resolution {
        Resolution::File(path) => match NamedFile::open_async(&path).await {
            Ok(file) => {
                debug!(route = %route_name, file = %path.display(), "Serving static file");
                let res = file.into_response(req.request());
                Ok(req.into_response(res))
            }
            Err(e) => {
                warn!(route = %route_name, file = %path.display(), error = %e, "Static file vanished before it could be opened");
                Ok(req.into_response(HttpResponse::NotFound().body("Not Found")))
            }
        },
        Resolution::AddTrailingSlash => {
            let location = match req.query_string() {
                "" => format!("{}/", req.path()),
                query => format!("{}/?{}", req.path(), query),
            };
            Ok(req.into_response(
                HttpResponse::MovedPermanently()
                    .append_header((header::LOCATION, location))
                    .finish(),
            ))
        }
        Resolution::IsDirectory => {
            error!(route = %route_name, "File route points at a directory");
            Ok(req.into_response(HttpResponse::InternalServerError().body("Internal Server Error")))
        }
        Resolution::NotFound => Ok(req.into_response(HttpResponse::NotFound().body("Not Found"))),
    }
}

/// Serves one fixed file for every request routed to it.
pub struct StaticFileHandler {
    route_name: String,
    path: PathBuf,
}

impl StaticFileHandler {
    pub fn new(route_name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            route_name: route_name.into(),
            path: path.into(),
        }
    }
}

impl Handler for StaticFileHandler {
    fn call(&self, req: ServiceRequest) -> HandlerFuture {
        let route_name = self.route_name.clone();
        let path = self.path.clone();
        Box::pin(async move {
            let resolution = web::block(move || resolve_file(&path)).await?;
            respond(req, resolution, &route_name).await
        })
    }
}

/// Serves a directory tree, optionally falling back to the root index (SPA mode).
pub struct StaticFolderHandler {
    route_name: String,
    pattern: RoutePattern,
    root: PathBuf,
    spa: bool,
}

impl StaticFolderHandler {
    pub fn new(
        route_name: impl Into<String>,
        pattern: RoutePattern,
        root: impl Into<PathBuf>,
        spa: bool,
    ) -> Self {
        Self {
            route_name: route_name.into(),
            pattern,
            root: root.into(),
            spa,
        }
    }
}

impl Handler for StaticFolderHandler {
    fn call(&self, req: ServiceRequest) -> HandlerFuture {
        let route_name = self.route_name.clone();
        let root = self.root.clone();
        let spa = self.spa;
        let relative = self.pattern.matches(req.path()).map(str::to_owned);

        Box::pin(async move {
            let Some(relative) = relative else {
                return respond(req, Resolution::NotFound, &route_name).await;
            };
            let resolution = web::block(move || resolve_in_folder(&root, &relative, spa)).await?;
            respond(req, resolution, &route_name).await
        })
    }
}
