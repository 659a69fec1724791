// Connection Credentials
// Immutable description of where and as whom to connect

use crate::db::error::{DbalError, DriverDiagnostic};
use crate::db::traits::DatabaseType;
use serde::{Deserialize, Serialize};

/// Path used when a SQLite credential names no database file
pub const SQLITE_MEMORY: &str = ":memory:";

/// Connection credentials.
///
/// Reused for reconnection and for the side connections of parallel queries,
/// so adapters keep their own copy. The password is never serialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    hostname: String,
    user: String,
    #[serde(skip_serializing, default)]
    password: Option<String>,
    database: Option<String>,
    platform: DatabaseType,
    port: u16,
}

impl Credentials {
    /// PostgreSQL credentials on the default port
    pub fn new(hostname: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            user: user.into(),
            password: None,
            database: None,
            platform: DatabaseType::Postgresql,
            port: DatabaseType::Postgresql.default_port(),
        }
    }

    /// SQLite credentials for a database file
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            hostname: String::new(),
            user: String::new(),
            password: None,
            database: Some(path.into()),
            platform: DatabaseType::Sqlite,
            port: DatabaseType::Sqlite.default_port(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Switch platform; the port follows the platform default
    pub fn with_platform(mut self, platform: DatabaseType) -> Self {
        self.platform = platform;
        self.port = platform.default_port();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn platform(&self) -> DatabaseType {
        self.platform
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// SQLite file path, in-memory when none was given
    pub fn sqlite_path(&self) -> &str {
        self.database
            .as_deref()
            .filter(|path| !path.is_empty())
            .unwrap_or(SQLITE_MEMORY)
    }

    pub fn validate(&self) -> Result<(), DbalError> {
        match self.platform {
            DatabaseType::Sqlite => Ok(()),
            DatabaseType::Postgresql => {
                if self.hostname.is_empty() {
                    return Err(DbalError::AccessDenied(DriverDiagnostic::new(
                        "Host is required",
                    )));
                }
                if self.user.is_empty() {
                    return Err(DbalError::AccessDenied(DriverDiagnostic::new(
                        "Username is required",
                    )));
                }
                Ok(())
            }
        }
    }

    /// Client configuration for tokio-postgres
    pub fn to_postgres_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.hostname)
            .port(self.port)
            .user(&self.user)
            .application_name("simple-dbal");
        if let Some(password) = &self.password {
            config.password(password);
        }
        if let Some(database) = &self.database {
            config.dbname(database);
        }
        config
    }
}
