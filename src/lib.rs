// simple-dbal
// Uniform connection, statement and result layer over SQLite and PostgreSQL

pub mod db;

pub use db::{
    connect, Access, Adapter, AdapterOptions, AnyAdapter, AsyncScheduler, BindingFailure,
    ConnectionContext, Credentials, DatabaseType, DbalError, DriverDiagnostic, LinkState, Params,
    PendingResult, PgHandle, Pool, PostgresAdapter, Query, QueryHandle, ResultPolicy, ResultSet,
    Row, SqliteAdapter, SqliteHandle, Statement, StatementKind, StatementSnapshot,
    TransactionAdapter, Value,
};
