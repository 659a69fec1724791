// SQLite Adapter
// Synchronous prepared-statement adapter over rusqlite

use crate::db::credentials::Credentials;
use crate::db::error::{BindingFailure, DbalError, DriverDiagnostic};
use crate::db::options::AdapterOptions;
use crate::db::reconnect::{Connector, Supervisor};
use crate::db::result::{ConnectionContext, ResultSet};
use crate::db::scheduler::PendingResult;
use crate::db::statement::{BindPlan, BoundValues, Query, RunnableQuery, Statement};
use crate::db::traits::{Adapter, DatabaseType, LinkState, TransactionAdapter};
use crate::db::value::{Params, Value, TIMESTAMP_FORMAT};
use rusqlite::types::{FromSql, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection as RusqliteConnection, OpenFlags};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        use rusqlite::types::Value as Native;

        Ok(match self {
            Value::Null => ToSqlOutput::Owned(Native::Null),
            Value::Bool(b) => ToSqlOutput::Owned(Native::Integer(i64::from(*b))),
            Value::Int(i) => ToSqlOutput::Owned(Native::Integer(*i)),
            Value::Float(f) => ToSqlOutput::Owned(Native::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
            Value::Timestamp(ts) => {
                ToSqlOutput::Owned(Native::Text(ts.format(TIMESTAMP_FORMAT).to_string()))
            }
            Value::Json(json) => ToSqlOutput::Owned(Native::Text(json.to_string())),
        })
    }
}

impl FromSql for Value {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        Ok(match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Int(i),
            ValueRef::Real(f) => Value::Float(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Bytes(b.to_vec()),
        })
    }
}

/// Opens SQLite links from credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl SqliteConnector {
    /// Expand `~/` to the home directory
    fn database_path(credentials: &Credentials) -> String {
        let path = credentials.sqlite_path();
        match (path.strip_prefix("~/"), std::env::var_os("HOME")) {
            (Some(rest), Some(home)) => Path::new(&home).join(rest).to_string_lossy().to_string(),
            _ => path.to_string(),
        }
    }

    fn open_connection(path: &str) -> Result<RusqliteConnection, DbalError> {
        RusqliteConnection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_URI
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DbalError::AccessDenied(DriverDiagnostic::from(e)))
    }
}

#[async_trait::async_trait]
impl Connector for SqliteConnector {
    type Link = RusqliteConnection;

    async fn connect(
        &self,
        credentials: &Credentials,
        options: &AdapterOptions,
    ) -> Result<RusqliteConnection, DbalError> {
        let path = Self::database_path(credentials);
        let conn = Self::open_connection(&path)?;
        if let Some(charset) = &options.charset {
            conn.pragma_update(None, "encoding", charset)
                .map_err(|e| DbalError::AccessDenied(DriverDiagnostic::from(e)))?;
        }
        debug!(path = %path, "opened SQLite database");
        Ok(conn)
    }

    async fn probe(&self, link: &mut RusqliteConnection) -> bool {
        link.query_row("SELECT 1", [], |row| row.get::<_, i64>(0)).is_ok()
    }
}

/// Shape of a statement prepared by SQLite
#[derive(Debug, Clone)]
pub struct SqliteHandle {
    columns: Arc<[String]>,
    parameter_count: usize,
    readonly: bool,
}

impl SqliteHandle {
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn parameter_count(&self) -> usize {
        self.parameter_count
    }

    /// True when the statement does not write to the database
    pub fn readonly(&self) -> bool {
        self.readonly
    }
}

/// Driver failure while running a bound statement
enum Failure {
    LinkClosed,
    Driver(rusqlite::Error),
}

impl From<rusqlite::Error> for Failure {
    fn from(err: rusqlite::Error) -> Self {
        Failure::Driver(err)
    }
}

impl Failure {
    fn into_error(self, statement: &Statement<SqliteHandle>) -> DbalError {
        match self {
            Failure::LinkClosed => DbalError::Query(link_closed()),
            Failure::Driver(
                err @ (rusqlite::Error::InvalidParameterCount(..)
                | rusqlite::Error::InvalidParameterName(_)),
            ) => DbalError::binding(
                statement.snapshot(),
                BindingFailure::Driver(DriverDiagnostic::from(err)),
            ),
            Failure::Driver(err) => DbalError::Query(DriverDiagnostic::from(err)),
        }
    }
}

fn link_closed() -> DriverDiagnostic {
    DriverDiagnostic::new("Connection is closed")
}

/// SQLite adapter
pub struct SqliteAdapter {
    id: Uuid,
    credentials: Option<Credentials>,
    options: AdapterOptions,
    link: Mutex<Supervisor<SqliteConnector>>,
}

impl SqliteAdapter {
    /// Open a database from credentials
    pub async fn factory(
        credentials: Credentials,
        options: Option<AdapterOptions>,
    ) -> Result<Self, DbalError> {
        let options = options.unwrap_or_default();
        let conn = SqliteConnector.connect(&credentials, &options).await?;
        Ok(Self::from_connection(conn, Some(credentials), Some(options)))
    }

    /// Private in-memory database
    pub async fn open_in_memory(options: Option<AdapterOptions>) -> Result<Self, DbalError> {
        Self::factory(Credentials::sqlite(crate::db::credentials::SQLITE_MEMORY), options).await
    }

    /// Wrap an already open connection
    pub fn from_connection(
        conn: RusqliteConnection,
        credentials: Option<Credentials>,
        options: Option<AdapterOptions>,
    ) -> Self {
        let id = Uuid::new_v4();
        info!(adapter = %id, "SQLite adapter ready");
        Self {
            id,
            link: Mutex::new(Supervisor::new(SqliteConnector, conn, credentials.clone())),
            credentials,
            options: options.unwrap_or_default(),
        }
    }

    /// Run a closure against the live rusqlite connection
    pub async fn with_connection<F, R>(&self, f: F) -> Result<R, DbalError>
    where
        F: FnOnce(&RusqliteConnection) -> rusqlite::Result<R> + Send,
        R: Send,
    {
        let mut supervisor = self.link.lock().await;
        let conn = supervisor.link().ok_or_else(|| DbalError::Query(link_closed()))?;
        f(conn).map_err(|e| DbalError::Query(DriverDiagnostic::from(e)))
    }

    fn prepare_handle(
        supervisor: &mut Supervisor<SqliteConnector>,
        sql: &str,
    ) -> Result<SqliteHandle, DriverDiagnostic> {
        let conn = supervisor.link().ok_or_else(link_closed)?;
        let stmt = conn.prepare_cached(sql)?;
        Ok(SqliteHandle {
            columns: stmt
                .column_names()
                .into_iter()
                .map(String::from)
                .collect::<Vec<_>>()
                .into(),
            parameter_count: stmt.parameter_count(),
            readonly: stmt.readonly(),
        })
    }

    /// Turn raw text or a foreign statement into a statement of this adapter
    async fn resolve(
        &self,
        query: Query<SqliteHandle>,
        values: Option<Params>,
    ) -> Result<Statement<SqliteHandle>, DbalError> {
        match query {
            Query::Text(text) => self.prepare(&text, values).await,
            Query::Prepared(statement) if statement.connection_id() == self.id => Ok(match values {
                Some(values) => statement.with_values(Some(values)),
                None => statement,
            }),
            Query::Prepared(statement) => {
                debug!(
                    adapter = %self.id,
                    owner = %statement.connection_id(),
                    "re-preparing statement from another adapter"
                );
                let values = values.or_else(|| statement.values().cloned());
                self.prepare(statement.query(), values).await
            }
        }
    }

    fn run(&self, supervisor: &mut Supervisor<SqliteConnector>, plan: &BindPlan) -> Result<ResultSet, Failure> {
        let conn = supervisor.link().ok_or(Failure::LinkClosed)?;
        let result = if plan.emulated {
            let mut stmt = conn.prepare(&plan.sql)?;
            Self::run_statement(&mut stmt, &plan.values)?
        } else {
            let mut stmt = conn.prepare_cached(&plan.sql)?;
            Self::run_statement(&mut stmt, &plan.values)?
        };

        let last_insert_id = match conn.last_insert_rowid() {
            0 => None,
            id => Some(id),
        };
        Ok(result
            .with_policy(self.options.result_policy)
            .with_context(ConnectionContext {
                connection_id: self.id,
                last_insert_id,
            }))
    }

    fn run_statement(
        stmt: &mut rusqlite::Statement<'_>,
        values: &BoundValues,
    ) -> rusqlite::Result<ResultSet> {
        let expected = stmt.parameter_count();
        match values {
            BoundValues::None => {
                if expected > 0 {
                    return Err(rusqlite::Error::InvalidParameterCount(0, expected));
                }
            }
            BoundValues::Positional(values) => {
                if expected != values.len() {
                    return Err(rusqlite::Error::InvalidParameterCount(values.len(), expected));
                }
                for (index, value) in values.iter().enumerate() {
                    stmt.raw_bind_parameter(index + 1, value)?;
                }
            }
            BoundValues::Named(values) => {
                if expected != values.len() {
                    return Err(rusqlite::Error::InvalidParameterCount(values.len(), expected));
                }
                for (name, value) in values {
                    let key = format!(":{}", name);
                    match stmt.parameter_index(&key)? {
                        Some(index) => stmt.raw_bind_parameter(index, value)?,
                        None => return Err(rusqlite::Error::InvalidParameterName(key)),
                    }
                }
            }
        }

        let column_count = stmt.column_count();
        if column_count == 0 {
            let affected = stmt.raw_execute()?;
            return Ok(ResultSet::from_affected(affected as u64));
        }

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut fetched = Vec::new();
        let mut rows = stmt.raw_query();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for index in 0..column_count {
                values.push(row.get::<_, Value>(index)?);
            }
            fetched.push(values);
        }
        Ok(ResultSet::from_rows(columns, fetched))
    }

    async fn run_transaction_command(&self, sql: &str) -> Result<(), DbalError> {
        let mut supervisor = self.link.lock().await;
        let conn = supervisor.link().ok_or_else(|| DbalError::Query(link_closed()))?;
        conn.execute_batch(sql)
            .map_err(|e| DbalError::Query(DriverDiagnostic::from(e)))?;
        debug!(adapter = %self.id, command = sql, "transaction command");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Adapter for SqliteAdapter {
    type Handle = SqliteHandle;

    fn id(&self) -> Uuid {
        self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Sqlite
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    fn options(&self) -> &AdapterOptions {
        &self.options
    }

    async fn is_connected(&self) -> bool {
        self.link.lock().await.is_alive().await
    }

    async fn state(&self) -> LinkState {
        self.link.lock().await.state()
    }

    async fn reconnect_attempts(&self) -> u32 {
        self.link.lock().await.attempts()
    }

    async fn reconnect(&self) -> Result<(), DbalError> {
        self.link.lock().await.reconnect(&self.options).await
    }

    async fn close(&self) {
        self.link.lock().await.close();
    }

    async fn prepare(
        &self,
        query: &str,
        values: Option<Params>,
    ) -> Result<Statement<SqliteHandle>, DbalError> {
        if self.options.emulate_prepared_statements {
            return Ok(Statement::emulated(self.id, DatabaseType::Sqlite, query, values));
        }

        let runnable = RunnableQuery::plan(query, DatabaseType::Sqlite, self.options.resolve_named_params);
        let mut supervisor = self.link.lock().await;
        let handle = match Self::prepare_handle(&mut supervisor, runnable.sql()) {
            Ok(handle) => handle,
            Err(diag) => {
                if supervisor.is_alive().await {
                    return Err(DbalError::Query(diag));
                }
                warn!(adapter = %self.id, error = %diag, "link lost while preparing");
                supervisor.reconnect(&self.options).await?;
                Self::prepare_handle(&mut supervisor, runnable.sql()).map_err(DbalError::Query)?
            }
        };

        Ok(Statement::prepared(
            self.id,
            DatabaseType::Sqlite,
            query,
            runnable,
            values,
            handle,
        ))
    }

    async fn execute<Q>(&self, query: Q, values: Option<Params>) -> Result<ResultSet, DbalError>
    where
        Q: Into<Query<SqliteHandle>> + Send,
    {
        let statement = self.resolve(query.into(), values).await?;
        let plan = statement.bind()?;

        let mut supervisor = self.link.lock().await;
        let failure = match self.run(&mut supervisor, &plan) {
            Ok(result) => return Ok(result),
            Err(failure) => failure,
        };
        if supervisor.is_alive().await {
            return Err(failure.into_error(&statement));
        }

        warn!(adapter = %self.id, query = statement.query(), "link lost, reconnecting before retry");
        supervisor.reconnect(&self.options).await?;
        drop(supervisor);

        let statement = self
            .prepare(statement.query(), statement.values().cloned())
            .await?;
        let plan = statement.bind()?;
        let mut supervisor = self.link.lock().await;
        self.run(&mut supervisor, &plan)
            .map_err(|failure| failure.into_error(&statement))
    }

    fn execute_async<'a, Q>(&'a self, query: Q, values: Option<Params>) -> PendingResult<'a>
    where
        Q: Into<Query<SqliteHandle>> + Send + 'a,
    {
        PendingResult::deferred(self.execute(query, values))
    }
}

#[async_trait::async_trait]
impl TransactionAdapter for SqliteAdapter {
    async fn begin_transaction(&self) -> Result<(), DbalError> {
        self.run_transaction_command("BEGIN").await
    }

    async fn commit(&self) -> Result<(), DbalError> {
        self.run_transaction_command("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DbalError> {
        self.run_transaction_command("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::result::ResultPolicy;
    use crate::{named_params, params};

    async fn adapter(options: AdapterOptions) -> SqliteAdapter {
        let adapter = SqliteAdapter::open_in_memory(Some(options)).await.unwrap();
        adapter
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, score REAL, avatar BLOB)", None)
            .await
            .unwrap();
        adapter
    }

    #[tokio::test]
    async fn test_insert_then_select() {
        let adapter = adapter(AdapterOptions::default()).await;

        let inserted = adapter
            .execute("INSERT INTO users (name, score) VALUES (?, ?)", Some(params!["alice", 1.5]))
            .await
            .unwrap();
        assert_eq!(inserted.count(), 1);
        assert_eq!(inserted.last_insert_id().unwrap(), Some(1));

        let mut result = adapter
            .execute("SELECT name, score FROM users WHERE id = ?", Some(params![1]))
            .await
            .unwrap();
        assert_eq!(result.columns(), ["name".to_string(), "score".to_string()]);
        assert_eq!(result.as_value().unwrap(), Some(Value::Text("alice".into())));
    }

    #[tokio::test]
    async fn test_values_round_trip_through_sqlite() {
        let adapter = adapter(AdapterOptions::default()).await;
        adapter
            .execute(
                "INSERT INTO users (name, score, avatar) VALUES (?, ?, ?)",
                Some(params![None::<String>, 2.25, vec![1_u8, 2, 3]]),
            )
            .await
            .unwrap();

        let row = adapter
            .execute("SELECT id, name, score, avatar FROM users", None)
            .await
            .unwrap()
            .as_row()
            .unwrap()
            .unwrap();
        assert_eq!(row.get("id"), Some(&Value::Int(1)));
        assert_eq!(row.get("name"), Some(&Value::Null));
        assert_eq!(row.get("score"), Some(&Value::Float(2.25)));
        assert_eq!(row.get("avatar"), Some(&Value::Bytes(vec![1, 2, 3])));
    }

    #[tokio::test]
    async fn test_named_params_native_and_resolved() {
        for resolve in [false, true] {
            let adapter = adapter(AdapterOptions::default().with_resolve_named_params(resolve)).await;
            adapter
                .execute(
                    "INSERT INTO users (name, score) VALUES (:name, :score)",
                    Some(named_params! { "name" => "bob", ":score" => 3 }),
                )
                .await
                .unwrap();

            let statement = adapter
                .prepare("SELECT score FROM users WHERE name = :name OR name = :name", None)
                .await
                .unwrap();
            assert_eq!(statement.runnable_query().is_some(), resolve);

            let mut result = adapter
                .execute(&statement, Some(named_params! { "name" => "bob" }))
                .await
                .unwrap();
            assert_eq!(result.as_value().unwrap(), Some(Value::Float(3.0)));
        }
    }

    #[tokio::test]
    async fn test_binding_errors() {
        let adapter = adapter(AdapterOptions::default()).await;
        let err = adapter
            .execute("SELECT * FROM users WHERE id = ?", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbalError::ParamBinding { .. }));
        assert_eq!(err.statement().unwrap().query, "SELECT * FROM users WHERE id = ?");

        let err = adapter
            .execute("SELECT * FROM users WHERE id = ?", Some(params![1, 2]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DbalError::ParamBinding { cause: BindingFailure::CountMismatch { expected: 1, given: 2 }, .. }
        ));
    }

    #[tokio::test]
    async fn test_syntax_error_is_not_connection_loss() {
        let adapter = adapter(AdapterOptions::default().with_max_reconnect_attempts(3)).await;
        let err = adapter.execute("SELEC * FROM users", None).await.unwrap_err();

        assert!(matches!(err, DbalError::Query(_)));
        assert_eq!(adapter.reconnect_attempts().await, 0);
        assert_eq!(adapter.state().await, LinkState::Connected);
        assert!(adapter.is_connected().await);
    }

    #[tokio::test]
    async fn test_runtime_error_is_query_error() {
        let adapter = adapter(AdapterOptions::default()).await;
        adapter
            .execute("INSERT INTO users (id, name) VALUES (1, 'a')", None)
            .await
            .unwrap();
        let err = adapter
            .execute("INSERT INTO users (id, name) VALUES (1, 'b')", None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbalError::Query(_)));
        assert!(err.code().is_some());
    }

    #[tokio::test]
    async fn test_emulated_statements() {
        let adapter = adapter(AdapterOptions::default().with_emulated_statements(true)).await;
        let statement = adapter
            .prepare("INSERT INTO users (name) VALUES (:name)", Some(named_params! { "name" => "O'Hara" }))
            .await
            .unwrap();
        assert!(statement.is_emulated());
        assert_eq!(
            statement.preview().unwrap(),
            "INSERT INTO users (name) VALUES ('O''Hara')"
        );

        adapter.execute(statement, None).await.unwrap();
        let mut result = adapter.execute("SELECT name FROM users", None).await.unwrap();
        assert_eq!(result.as_list().unwrap(), vec![Value::Text("O'Hara".into())]);
    }

    #[tokio::test]
    async fn test_statement_from_other_adapter_is_reprepared() {
        let first = adapter(AdapterOptions::default()).await;
        let second = adapter(AdapterOptions::default()).await;
        second
            .execute("INSERT INTO users (name) VALUES ('only-in-second')", None)
            .await
            .unwrap();

        let statement = first.prepare("SELECT name FROM users", None).await.unwrap();
        let mut result = second.execute(statement, None).await.unwrap();
        assert_eq!(result.as_value().unwrap(), Some(Value::Text("only-in-second".into())));
        assert_eq!(result.context().unwrap().connection_id, second.id());
    }

    #[tokio::test]
    async fn test_transactions() {
        let adapter = adapter(AdapterOptions::default()).await;

        adapter.begin_transaction().await.unwrap();
        adapter.execute("INSERT INTO users (name) VALUES ('x')", None).await.unwrap();
        adapter.rollback().await.unwrap();
        let mut count = adapter.execute("SELECT COUNT(*) FROM users", None).await.unwrap();
        assert_eq!(count.as_value().unwrap(), Some(Value::Int(0)));

        adapter.begin_transaction().await.unwrap();
        adapter.execute("INSERT INTO users (name) VALUES ('y')", None).await.unwrap();
        adapter.commit().await.unwrap();
        let mut count = adapter.execute("SELECT COUNT(*) FROM users", None).await.unwrap();
        assert_eq!(count.as_value().unwrap(), Some(Value::Int(1)));

        assert!(adapter.commit().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_link_without_reconnection() {
        let adapter = adapter(AdapterOptions::default()).await;
        adapter.close().await;
        assert!(!adapter.is_connected().await);
        assert!(!adapter.should_reconnect().await);

        let err = adapter.execute("SELECT 1", None).await.unwrap_err();
        assert!(matches!(err, DbalError::MaxReconnect(ref msg) if msg == "Connection lost."));
        assert!(adapter.begin_transaction().await.is_err());
    }

    #[tokio::test]
    async fn test_closed_link_is_reopened() {
        let options = AdapterOptions::default()
            .with_max_reconnect_attempts(2)
            .with_reconnect_delay(std::time::Duration::ZERO);
        let adapter = SqliteAdapter::open_in_memory(Some(options)).await.unwrap();
        adapter.close().await;
        assert!(adapter.should_reconnect().await);

        let mut result = adapter.execute("SELECT 41 + 1", None).await.unwrap();
        assert_eq!(result.as_value().unwrap(), Some(Value::Int(42)));
        assert_eq!(adapter.state().await, LinkState::Connected);
        assert_eq!(adapter.reconnect_attempts().await, 0);
    }

    #[tokio::test]
    async fn test_result_policy_option() {
        let adapter = adapter(AdapterOptions::default().with_result_policy(ResultPolicy::Cache)).await;
        adapter.execute("INSERT INTO users (name) VALUES ('a'), ('b')", None).await.unwrap();

        let mut result = adapter.execute("SELECT name FROM users ORDER BY id", None).await.unwrap();
        assert_eq!(result.policy(), ResultPolicy::Cache);
        assert_eq!(result.as_array().unwrap().len(), 2);
        assert_eq!(result.as_value().unwrap(), Some(Value::Text("a".into())));

        let mut frozen = adapter
            .execute("SELECT name FROM users", None)
            .await
            .unwrap()
            .with_policy(ResultPolicy::Freeze);
        frozen.as_array().unwrap();
        assert!(matches!(frozen.as_array(), Err(DbalError::FrozenResult)));
    }

    #[tokio::test]
    async fn test_execute_async_is_deferred() {
        let adapter = adapter(AdapterOptions::default()).await;
        let pending = adapter.execute_async("INSERT INTO users (name) VALUES (?)", Some(params!["z"]));
        assert!(!pending.is_scheduled());
        assert_eq!(pending.await.unwrap().count(), 1);

        let err = adapter.execute_async("SELECT ?", None).await.unwrap_err();
        assert!(matches!(err, DbalError::ParamBinding { .. }));
    }

    #[tokio::test]
    async fn test_with_connection() {
        let adapter = adapter(AdapterOptions::default()).await;
        let tables: i64 = adapter
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'", [], |row| row.get(0))
            })
            .await
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[test]
    fn test_prepared_handle_shape() {
        let conn = RusqliteConnection::open_in_memory().unwrap();
        let mut supervisor = Supervisor::new(SqliteConnector, conn, None);
        let handle = SqliteAdapter::prepare_handle(&mut supervisor, "SELECT 1 AS one, ? AS two").unwrap();
        assert_eq!(handle.columns(), ["one".to_string(), "two".to_string()]);
        assert_eq!(handle.parameter_count(), 1);
        assert!(handle.readonly());
    }
}
