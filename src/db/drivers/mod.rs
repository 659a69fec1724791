// Database Drivers
// One adapter per supported client library

pub mod postgres;
pub mod sqlite;

pub use postgres::{PgHandle, PostgresAdapter};
pub use sqlite::{SqliteAdapter, SqliteHandle};
