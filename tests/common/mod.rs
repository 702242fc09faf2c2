// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]

use std::net::SocketAddr;

use actix_web::cookie::Cookie;
use actix_web::dev::ServiceResponse;
use actix_web::http::header;
use actix_web::{web, App, HttpServer};
use wardgate::session::SESSION_COOKIE_NAME;
use wardgate::{Gateway, GatewayConfig};

/// Parses and validates an inline TOML config.
pub fn config(toml: &str) -> GatewayConfig {
    let mut config = GatewayConfig::from_toml_str(toml).expect("config should parse");
    config.validate().expect("config should validate");
    config
}

pub fn gateway(toml: &str) -> Gateway {
    Gateway::from_config(&config(toml)).expect("gateway should build")
}

/// Runs a throwaway HTTP server on a random loopback port.
pub fn spawn_server(configure: fn(&mut web::ServiceConfig)) -> SocketAddr {
    let server = HttpServer::new(move || App::new().configure(configure))
        .workers(1)
        .bind(("127.0.0.1", 0))
        .expect("loopback bind");
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    addr
}

/// Serves `gateway` on a random loopback port.
pub fn spawn_gateway(gateway: Gateway) -> SocketAddr {
    let server = HttpServer::new(move || {
        let gateway = gateway.clone();
        App::new().configure(move |cfg| gateway.configure(cfg))
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .expect("loopback bind");
    let addr = server.addrs()[0];
    actix_web::rt::spawn(server.run());
    addr
}

/// A port nothing listens on.
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("loopback bind");
    listener.local_addr().expect("local addr").port()
}

pub fn cookie<B>(res: &ServiceResponse<B>, name: &str) -> Option<Cookie<'static>> {
    res.response()
        .cookies()
        .find(|c| c.name() == name)
        .map(|c| c.into_owned())
}

pub fn session_cookie<B>(res: &ServiceResponse<B>) -> Option<Cookie<'static>> {
    cookie(res, SESSION_COOKIE_NAME)
}

pub fn location<B>(res: &ServiceResponse<B>) -> String {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_owned()
}

/// Query parameter of a relative or absolute redirect target.
pub fn location_param(location: &str, name: &str) -> Option<String> {
    let base = url::Url::parse("http://localhost").expect("static url");
    base.join(location)
        .ok()?
        .query_pairs()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v.into_owned())
}
