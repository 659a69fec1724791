// Database Module
// Credentials, statements, results and the adapters that run them

pub mod credentials;
pub mod drivers;
pub mod error;
pub mod options;
pub mod placeholder;
pub mod pool;
pub mod reconnect;
pub mod result;
pub mod scheduler;
pub mod statement;
pub mod traits;
pub mod unified;
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use credentials::Credentials;
pub use drivers::{PgHandle, PostgresAdapter, SqliteAdapter, SqliteHandle};
pub use error::{BindingFailure, DbalError, DriverDiagnostic, StatementSnapshot};
pub use options::AdapterOptions;
pub use pool::{Access, Pool};
pub use result::{ConnectionContext, ResultPolicy, ResultSet, Row};
pub use scheduler::{AsyncScheduler, PendingResult, QueryHandle};
pub use statement::{Query, Statement, StatementKind};
pub use traits::{Adapter, DatabaseType, LinkState, TransactionAdapter};
pub use unified::{connect, AnyAdapter};
pub use value::{Params, Value};
