// Adapter Pool
// Weighted read/write routing among attached adapters

use crate::db::error::DbalError;
use crate::db::result::ResultSet;
use crate::db::statement::{Query, Statement};
use crate::db::traits::Adapter;
use crate::db::value::Params;
use rand::Rng;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Which side of the pool an adapter serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    ReadOnly,
    WriteOnly,
}

impl Access {
    fn reads(&self) -> bool {
        matches!(self, Access::ReadWrite | Access::ReadOnly)
    }

    fn writes(&self) -> bool {
        matches!(self, Access::ReadWrite | Access::WriteOnly)
    }
}

struct Member<A> {
    adapter: Arc<A>,
    weight: u32,
}

/// Weighted list of adapters split into readers and writers
pub struct Pool<A: Adapter> {
    readers: Vec<Member<A>>,
    writers: Vec<Member<A>>,
}

impl<A: Adapter> Default for Pool<A> {
    fn default() -> Self {
        Self {
            readers: Vec::new(),
            writers: Vec::new(),
        }
    }
}

impl<A: Adapter> Pool<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an adapter. A weight below 1 leaves the pool unchanged.
    pub fn attach(&mut self, adapter: Arc<A>, access: Access, weight: u32) -> &mut Self {
        if weight < 1 {
            debug!(adapter = %adapter.id(), "ignoring adapter attached with zero weight");
            return self;
        }
        if access.reads() {
            self.readers.push(Member {
                adapter: Arc::clone(&adapter),
                weight,
            });
        }
        if access.writes() {
            self.writers.push(Member {
                adapter: Arc::clone(&adapter),
                weight,
            });
        }
        debug!(adapter = %adapter.id(), ?access, weight, "adapter attached to pool");
        self
    }

    /// Remove every attachment of an adapter
    pub fn detach(&mut self, adapter: &Arc<A>) -> &mut Self {
        self.readers.retain(|member| !Arc::ptr_eq(&member.adapter, adapter));
        self.writers.retain(|member| !Arc::ptr_eq(&member.adapter, adapter));
        self
    }

    pub fn readers(&self) -> usize {
        self.readers.len()
    }

    pub fn writers(&self) -> usize {
        self.writers.len()
    }

    pub fn select_reader(&self) -> Result<Arc<A>, DbalError> {
        pick(&self.readers).ok_or_else(|| DbalError::NoConnection("read".to_string()))
    }

    pub fn select_writer(&self) -> Result<Arc<A>, DbalError> {
        pick(&self.writers).ok_or_else(|| DbalError::NoConnection("write".to_string()))
    }

    pub async fn prepare_read_stmt(
        &self,
        query: &str,
        values: Option<Params>,
    ) -> Result<Statement<A::Handle>, DbalError> {
        self.select_reader()?.prepare(query, values).await
    }

    pub async fn prepare_write_stmt(
        &self,
        query: &str,
        values: Option<Params>,
    ) -> Result<Statement<A::Handle>, DbalError> {
        self.select_writer()?.prepare(query, values).await
    }

    /// Run a query on a reader
    pub async fn read<Q>(&self, query: Q, values: Option<Params>) -> Result<ResultSet, DbalError>
    where
        Q: Into<Query<A::Handle>> + Send,
    {
        let query = query.into();
        let adapter = match owner(&self.readers, &query) {
            Some(adapter) => adapter,
            None => self.select_reader()?,
        };
        adapter.execute(query, values).await
    }

    /// Run a query on a writer
    pub async fn write<Q>(&self, query: Q, values: Option<Params>) -> Result<ResultSet, DbalError>
    where
        Q: Into<Query<A::Handle>> + Send,
    {
        let query = query.into();
        let adapter = match owner(&self.writers, &query) {
            Some(adapter) => adapter,
            None => self.select_writer()?,
        };
        adapter.execute(query, values).await
    }
}

/// The attached adapter that prepared the statement, if any
fn owner<A: Adapter>(members: &[Member<A>], query: &Query<A::Handle>) -> Option<Arc<A>> {
    let Query::Prepared(statement) = query else {
        return None;
    };
    let id: Uuid = statement.connection_id();
    members
        .iter()
        .find(|member| member.adapter.id() == id)
        .map(|member| Arc::clone(&member.adapter))
}

/// Weighted random choice
fn pick<A>(members: &[Member<A>]) -> Option<Arc<A>> {
    let total: u32 = members.iter().map(|member| member.weight).sum();
    if total == 0 {
        return None;
    }
    let mut roll = rand::rng().random_range(0..total);
    for member in members {
        if roll < member.weight {
            return Some(Arc::clone(&member.adapter));
        }
        roll -= member.weight;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::drivers::sqlite::SqliteAdapter;
    use crate::db::options::AdapterOptions;

    async fn adapter() -> Arc<SqliteAdapter> {
        let options = AdapterOptions::default().with_result_policy(crate::db::result::ResultPolicy::Cache);
        Arc::new(SqliteAdapter::open_in_memory(Some(options)).await.unwrap())
    }

    #[tokio::test]
    async fn test_empty_sides_fail() {
        let pool: Pool<SqliteAdapter> = Pool::new();
        assert!(matches!(pool.select_reader(), Err(DbalError::NoConnection(ref side)) if side == "read"));
        assert!(matches!(pool.select_writer(), Err(DbalError::NoConnection(ref side)) if side == "write"));
        assert!(pool.read("SELECT 1", None).await.is_err());
    }

    #[tokio::test]
    async fn test_attach_and_detach() {
        let primary = adapter().await;
        let replica = adapter().await;
        let mut pool = Pool::new();
        pool.attach(Arc::clone(&primary), Access::ReadWrite, 1)
            .attach(Arc::clone(&replica), Access::ReadOnly, 3)
            .attach(adapter().await, Access::WriteOnly, 0);

        assert_eq!(pool.readers(), 2);
        assert_eq!(pool.writers(), 1);
        assert_eq!(pool.select_writer().unwrap().id(), primary.id());

        pool.detach(&primary);
        assert_eq!(pool.readers(), 1);
        assert_eq!(pool.writers(), 0);
        assert_eq!(pool.select_reader().unwrap().id(), replica.id());
    }

    #[tokio::test]
    async fn test_selection_follows_weights() {
        let light = adapter().await;
        let heavy = adapter().await;
        let mut pool = Pool::new();
        pool.attach(Arc::clone(&light), Access::ReadOnly, 1)
            .attach(Arc::clone(&heavy), Access::ReadOnly, 9);

        let heavy_hits = (0..1000)
            .filter(|_| pool.select_reader().unwrap().id() == heavy.id())
            .count();
        assert!(heavy_hits > 700, "heavy adapter picked {} times", heavy_hits);
        assert!(heavy_hits < 1000);
    }

    #[tokio::test]
    async fn test_prepared_statement_returns_to_its_adapter() {
        let first = adapter().await;
        let second = adapter().await;
        first.execute("CREATE TABLE t (v INTEGER)", None).await.unwrap();
        second.execute("CREATE TABLE t (v INTEGER)", None).await.unwrap();
        first.execute("INSERT INTO t VALUES (1)", None).await.unwrap();

        let mut pool = Pool::new();
        pool.attach(Arc::clone(&first), Access::ReadWrite, 1)
            .attach(Arc::clone(&second), Access::ReadWrite, 1);

        let statement = first.prepare("SELECT COUNT(*) FROM t", None).await.unwrap();
        for _ in 0..20 {
            let mut result = pool.read(&statement, None).await.unwrap();
            assert_eq!(result.as_value().unwrap(), Some(crate::db::value::Value::Int(1)));
        }

        let insert = pool.prepare_write_stmt("INSERT INTO t VALUES (?)", None).await.unwrap();
        let target = insert.connection_id();
        pool.write(&insert, Some(crate::params![5])).await.unwrap();

        let owner = if target == first.id() { &first } else { &second };
        let mut result = owner.execute("SELECT MAX(v) FROM t", None).await.unwrap();
        assert_eq!(result.as_value().unwrap(), Some(crate::db::value::Value::Int(5)));
    }
}
