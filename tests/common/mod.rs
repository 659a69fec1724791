//! Shared helpers for the simple-dbal integration tests.
//!
//! SQLite tests run anywhere. PostgreSQL tests are `#[ignore]`d and need a
//! reachable server:
//!
//! ```bash
//! docker run -d --name dbal-pg -p 5432:5432 -e POSTGRES_PASSWORD=postgres postgres:16
//! cargo test --test postgres_integration -- --ignored
//! ```
//!
//! | Environment Variable | Default       |
//! |----------------------|---------------|
//! | `PG_HOST`            | "localhost"   |
//! | `PG_PORT`            | 5432          |
//! | `PG_USER`            | "postgres"    |
//! | `PG_PASSWORD`        | "postgres"    |
//! | `PG_DATABASE`        | "postgres"    |

#![allow(dead_code)]

use simple_dbal::{AdapterOptions, Credentials};
use std::env;
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

// ============================================================================
// Connection Constants with Default Values
// ============================================================================

pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_USER: &str = "postgres";
pub const DEFAULT_PASSWORD: &str = "postgres";
pub const DEFAULT_DATABASE: &str = "postgres";

// ============================================================================
// Configuration Helpers
// ============================================================================

pub fn get_host() -> String {
    env::var("PG_HOST").unwrap_or_else(|_| DEFAULT_HOST.to_string())
}

/// Falls back to the default when `PG_PORT` is not a valid port
pub fn get_port() -> u16 {
    env::var("PG_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT)
}

pub fn get_user() -> String {
    env::var("PG_USER").unwrap_or_else(|_| DEFAULT_USER.to_string())
}

pub fn get_password() -> String {
    env::var("PG_PASSWORD").unwrap_or_else(|_| DEFAULT_PASSWORD.to_string())
}

pub fn get_database() -> String {
    env::var("PG_DATABASE").unwrap_or_else(|_| DEFAULT_DATABASE.to_string())
}

pub fn pg_credentials() -> Credentials {
    Credentials::new(get_host(), get_user())
        .with_port(get_port())
        .with_password(get_password())
        .with_database(get_database())
}

/// Options with reconnection enabled and no backoff
pub fn fast_reconnect(max: u32) -> AdapterOptions {
    AdapterOptions::default()
        .with_max_reconnect_attempts(max)
        .with_reconnect_delay(Duration::ZERO)
}

/// TCP reachability of the configured PostgreSQL server
pub fn is_postgres_available() -> bool {
    let addr = format!("{}:{}", get_host(), get_port());
    let socket_addrs: Vec<_> = match addr.to_socket_addrs() {
        Ok(addrs) => addrs.collect(),
        Err(_) => return false,
    };
    socket_addrs
        .iter()
        .any(|socket_addr| TcpStream::connect_timeout(socket_addr, Duration::from_secs(2)).is_ok())
}

#[macro_export]
macro_rules! skip_if_no_postgres {
    () => {
        if !$crate::common::is_postgres_available() {
            eprintln!(
                "Skipping test: PostgreSQL not available at {}:{}",
                $crate::common::get_host(),
                $crate::common::get_port()
            );
            return;
        }
    };
}

/// Unique table name so parallel runs do not collide
pub fn unique_table(prefix: &str) -> String {
    format!("{}_{}", prefix, uuid::Uuid::new_v4().simple())
}

/// Database file path under the system temp directory
pub fn temp_database() -> PathBuf {
    env::temp_dir().join(format!("simple_dbal_{}.sqlite", uuid::Uuid::new_v4().simple()))
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
