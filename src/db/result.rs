// Result Sets
// Forward-only results with array/row/list/value views and a consumption policy

use crate::db::error::DbalError;
use crate::db::value::Value;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::VecDeque;
use std::sync::Arc;
use uuid::Uuid;

/// What happens when a result is read more than once
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultPolicy {
    /// The first view consumes the cursor; later views fail
    #[default]
    Freeze,
    /// The first view caches every row; later views read the cache
    Cache,
}

/// One fetched row, keeping column order
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Value of the first column with this name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .and_then(|index| self.values.get(index))
    }

    pub fn get_index(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.iter() {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Buffered forward-only cursor over fetched rows
#[derive(Debug, Clone)]
pub struct Cursor {
    columns: Arc<[String]>,
    rows: VecDeque<Vec<Value>>,
    total: usize,
}

impl Cursor {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self {
            columns: columns.into(),
            total: rows.len(),
            rows: rows.into(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Rows the cursor held before anything was fetched
    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        self.rows.len()
    }

    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.by_ref().collect()
    }
}

impl Iterator for Cursor {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.rows
            .pop_front()
            .map(|values| Row::new(Arc::clone(&self.columns), values))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.rows.len(), Some(self.rows.len()))
    }
}

/// Connection a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionContext {
    pub connection_id: Uuid,
    pub last_insert_id: Option<i64>,
}

#[derive(Debug)]
enum Source {
    Rows(Cursor),
    Affected(u64),
}

#[derive(Debug)]
enum State {
    Fresh,
    Frozen,
    Cached(Vec<Row>),
}

/// Outcome of one statement execution
#[derive(Debug)]
pub struct ResultSet {
    context: Option<ConnectionContext>,
    source: Source,
    policy: ResultPolicy,
    state: State,
}

impl ResultSet {
    /// Detached result over already fetched rows
    pub fn from_rows(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Self {
        Self::from_cursor(Cursor::new(columns, rows))
    }

    pub fn from_cursor(cursor: Cursor) -> Self {
        Self {
            context: None,
            source: Source::Rows(cursor),
            policy: ResultPolicy::default(),
            state: State::Fresh,
        }
    }

    /// Result of a statement that produced no rows
    pub fn from_affected(affected: u64) -> Self {
        Self {
            context: None,
            source: Source::Affected(affected),
            policy: ResultPolicy::default(),
            state: State::Fresh,
        }
    }

    pub fn with_policy(mut self, policy: ResultPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_context(mut self, context: ConnectionContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn policy(&self) -> ResultPolicy {
        self.policy
    }

    pub fn context(&self) -> Option<&ConnectionContext> {
        self.context.as_ref()
    }

    /// True when the statement produced a result set
    pub fn has_rows(&self) -> bool {
        matches!(self.source, Source::Rows(_))
    }

    /// Affected rows for writes, total rows for reads. Never consumes the cursor.
    pub fn count(&self) -> u64 {
        match &self.source {
            Source::Rows(cursor) => cursor.total() as u64,
            Source::Affected(affected) => *affected,
        }
    }

    pub fn columns(&self) -> &[String] {
        match &self.source {
            Source::Rows(cursor) => cursor.columns(),
            Source::Affected(_) => &[],
        }
    }

    /// Last id generated on the connection that produced this result
    pub fn last_insert_id(&self) -> Result<Option<i64>, DbalError> {
        self.context
            .map(|context| context.last_insert_id)
            .ok_or_else(|| {
                DbalError::ResultUnavailable("result is not attached to a connection".to_string())
            })
    }

    fn cursor(&mut self) -> Result<&mut Cursor, DbalError> {
        match &mut self.source {
            Source::Rows(cursor) => Ok(cursor),
            Source::Affected(_) => Err(DbalError::ResultUnavailable(
                "statement did not produce a result set".to_string(),
            )),
        }
    }

    fn freeze(&mut self) -> Result<&mut Cursor, DbalError> {
        self.cursor()?;
        match self.state {
            State::Fresh => self.state = State::Frozen,
            _ => return Err(DbalError::FrozenResult),
        }
        self.cursor()
    }

    fn cached(&mut self) -> Result<&[Row], DbalError> {
        if let State::Fresh = self.state {
            let rows = self.cursor()?.fetch_all();
            self.state = State::Cached(rows);
        }
        match &self.state {
            State::Cached(rows) => Ok(rows),
            _ => Err(DbalError::FrozenResult),
        }
    }

    /// Every row
    pub fn as_array(&mut self) -> Result<Vec<Row>, DbalError> {
        match self.policy {
            ResultPolicy::Freeze => Ok(self.freeze()?.fetch_all()),
            ResultPolicy::Cache => Ok(self.cached()?.to_vec()),
        }
    }

    /// First row, if any
    pub fn as_row(&mut self) -> Result<Option<Row>, DbalError> {
        match self.policy {
            ResultPolicy::Freeze => Ok(self.freeze()?.next()),
            ResultPolicy::Cache => Ok(self.cached()?.first().cloned()),
        }
    }

    /// First column of every row
    pub fn as_list(&mut self) -> Result<Vec<Value>, DbalError> {
        let first_column = |row: Row| row.into_values().into_iter().next().unwrap_or(Value::Null);
        match self.policy {
            ResultPolicy::Freeze => Ok(self.freeze()?.map(first_column).collect()),
            ResultPolicy::Cache => Ok(self.cached()?.iter().cloned().map(first_column).collect()),
        }
    }

    /// First column of the first row, if any
    pub fn as_value(&mut self) -> Result<Option<Value>, DbalError> {
        Ok(self
            .as_row()?
            .and_then(|row| row.into_values().into_iter().next()))
    }

    /// Iterate over the rows
    pub fn rows(&mut self) -> Result<Rows<'_>, DbalError> {
        match self.policy {
            ResultPolicy::Freeze => Ok(Rows::Cursor(self.freeze()?)),
            ResultPolicy::Cache => Ok(Rows::Cached(self.cached()?.iter())),
        }
    }
}

/// Borrowing row iterator returned by [`ResultSet::rows`]
pub enum Rows<'a> {
    Cursor(&'a mut Cursor),
    Cached(std::slice::Iter<'a, Row>),
}

impl Iterator for Rows<'_> {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        match self {
            Rows::Cursor(cursor) => cursor.next(),
            Rows::Cached(rows) => rows.next().cloned(),
        }
    }
}

/// Owning row iterator; yields the view error first when the result cannot be read
pub struct IntoRows {
    error: Option<DbalError>,
    rows: std::vec::IntoIter<Row>,
}

impl Iterator for IntoRows {
    type Item = Result<Row, DbalError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(err) = self.error.take() {
            return Some(Err(err));
        }
        self.rows.next().map(Ok)
    }
}

impl IntoIterator for ResultSet {
    type Item = Result<Row, DbalError>;
    type IntoIter = IntoRows;

    fn into_iter(mut self) -> IntoRows {
        match self.as_array() {
            Ok(rows) => IntoRows {
                error: None,
                rows: rows.into_iter(),
            },
            Err(err) => IntoRows {
                error: Some(err),
                rows: Vec::new().into_iter(),
            },
        }
    }
}
