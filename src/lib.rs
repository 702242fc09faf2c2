// SPDX-License-Identifier: Apache-2.0
pub mod auth;
pub mod chain;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fingerprint;
pub mod gateway;
pub mod logging;
pub mod management;
pub mod memory_session_store;
pub mod metrics;
pub mod middleware;
pub mod proxy;
pub mod routes;
pub mod session;
pub mod static_files;
pub mod users;

pub use config::GatewayConfig;
pub use gateway::Gateway;
