// Adapter Traits
// Core abstraction shared by the SQLite and PostgreSQL adapters

use crate::db::credentials::Credentials;
use crate::db::error::DbalError;
use crate::db::options::AdapterOptions;
use crate::db::result::ResultSet;
use crate::db::scheduler::PendingResult;
use crate::db::statement::{Query, Statement};
use crate::db::value::Params;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Supported database types
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Sqlite,
    Postgresql,
}

impl DatabaseType {
    /// Human readable name
    pub fn display_name(&self) -> &'static str {
        match self {
            DatabaseType::Sqlite => "SQLite",
            DatabaseType::Postgresql => "PostgreSQL",
        }
    }

    /// Default port for the database type
    pub fn default_port(&self) -> u16 {
        match self {
            DatabaseType::Sqlite => 0, // File-based, no port
            DatabaseType::Postgresql => 5432,
        }
    }
}

/// Link state of an adapter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkState {
    Connected,
    Disconnected,
    Reconnecting,
}

/// Adapter trait - every database adapter implements this
#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    /// Driver-native prepared statement handle
    type Handle: Clone + Send + Sync + 'static;

    // --- Metadata ---
    /// Identifier stamped on statements and results of this adapter
    fn id(&self) -> Uuid;

    fn database_type(&self) -> DatabaseType;

    /// Credentials used for reconnection, if any
    fn credentials(&self) -> Option<&Credentials>;

    fn options(&self) -> &AdapterOptions;

    // --- Link Management ---
    /// Probe the live link
    async fn is_connected(&self) -> bool;

    async fn state(&self) -> LinkState;

    async fn reconnect_attempts(&self) -> u32;

    /// True when the link is down and the reconnection budget is not spent
    async fn should_reconnect(&self) -> bool {
        !self.is_connected().await
            && self.reconnect_attempts().await < self.options().max_reconnect_attempts
    }

    /// Replace the live link with a new one opened from the credentials
    async fn reconnect(&self) -> Result<(), DbalError>;

    /// Drop the live link; the next operation sees a lost connection
    async fn close(&self);

    // --- Statements ---
    async fn prepare(
        &self,
        query: &str,
        values: Option<Params>,
    ) -> Result<Statement<Self::Handle>, DbalError>;

    /// Run raw text or a prepared statement.
    ///
    /// Values given here replace the ones bound to a prepared statement.
    async fn execute<Q>(&self, query: Q, values: Option<Params>) -> Result<ResultSet, DbalError>
    where
        Q: Into<Query<Self::Handle>> + Send;

    /// Start a query without waiting for it
    fn execute_async<'a, Q>(&'a self, query: Q, values: Option<Params>) -> PendingResult<'a>
    where
        Q: Into<Query<Self::Handle>> + Send + 'a;
}

/// Explicit transaction control. Never retried on connection loss.
#[async_trait::async_trait]
pub trait TransactionAdapter: Adapter {
    async fn begin_transaction(&self) -> Result<(), DbalError>;

    async fn commit(&self) -> Result<(), DbalError>;

    async fn rollback(&self) -> Result<(), DbalError>;
}
