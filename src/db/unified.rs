// Unified Adapter
// Picks the driver from the credentials' platform and delegates to it

use crate::db::credentials::Credentials;
use crate::db::drivers::{PostgresAdapter, SqliteAdapter};
use crate::db::error::DbalError;
use crate::db::options::AdapterOptions;
use crate::db::result::ResultSet;
use crate::db::traits::{Adapter, DatabaseType, TransactionAdapter};
use crate::db::value::Params;
use uuid::Uuid;

/// Either adapter, for callers that only know the platform at runtime
pub enum AnyAdapter {
    Sqlite(SqliteAdapter),
    Postgres(PostgresAdapter),
}

/// Open an adapter for `credentials.platform()`
pub async fn connect(
    credentials: Credentials,
    options: Option<AdapterOptions>,
) -> Result<AnyAdapter, DbalError> {
    match credentials.platform() {
        DatabaseType::Sqlite => Ok(AnyAdapter::Sqlite(
            SqliteAdapter::factory(credentials, options).await?,
        )),
        DatabaseType::Postgresql => Ok(AnyAdapter::Postgres(
            PostgresAdapter::factory(credentials, options).await?,
        )),
    }
}

impl AnyAdapter {
    pub fn database_type(&self) -> DatabaseType {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.database_type(),
            AnyAdapter::Postgres(adapter) => adapter.database_type(),
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.id(),
            AnyAdapter::Postgres(adapter) => adapter.id(),
        }
    }

    pub async fn is_connected(&self) -> bool {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.is_connected().await,
            AnyAdapter::Postgres(adapter) => adapter.is_connected().await,
        }
    }

    /// Run raw query text
    pub async fn execute(&self, query: &str, values: Option<Params>) -> Result<ResultSet, DbalError> {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.execute(query, values).await,
            AnyAdapter::Postgres(adapter) => adapter.execute(query, values).await,
        }
    }

    pub async fn begin_transaction(&self) -> Result<(), DbalError> {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.begin_transaction().await,
            AnyAdapter::Postgres(adapter) => adapter.begin_transaction().await,
        }
    }

    pub async fn commit(&self) -> Result<(), DbalError> {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.commit().await,
            AnyAdapter::Postgres(adapter) => adapter.commit().await,
        }
    }

    pub async fn rollback(&self) -> Result<(), DbalError> {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.rollback().await,
            AnyAdapter::Postgres(adapter) => adapter.rollback().await,
        }
    }

    pub async fn close(&self) {
        match self {
            AnyAdapter::Sqlite(adapter) => adapter.close().await,
            AnyAdapter::Postgres(adapter) => adapter.close().await,
        }
    }

    pub fn into_sqlite(self) -> Option<SqliteAdapter> {
        match self {
            AnyAdapter::Sqlite(adapter) => Some(adapter),
            AnyAdapter::Postgres(_) => None,
        }
    }

    pub fn into_postgres(self) -> Option<PostgresAdapter> {
        match self {
            AnyAdapter::Postgres(adapter) => Some(adapter),
            AnyAdapter::Sqlite(_) => None,
        }
    }
}
