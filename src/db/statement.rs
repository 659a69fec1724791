// Statements
// Query text plus bound values, with validation, preview and bind planning

use crate::db::error::{BindingFailure, DbalError, StatementSnapshot};
use crate::db::placeholder::{self, Placeholder, PlaceholderScan, PlaceholderStyle};
use crate::db::traits::DatabaseType;
use crate::db::value::{Params, Value, TIMESTAMP_FORMAT};
use std::collections::BTreeMap;
use std::fmt::{self, Write as _};
use uuid::Uuid;

/// How a statement reaches the server
#[derive(Debug, Clone)]
pub enum StatementKind<H> {
    /// Prepared by the driver; `H` is the driver's handle
    Prepared(H),
    /// Values are inlined into the text at bind time
    Emulated,
}

/// Driver-ready text derived from the original query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnableQuery {
    sql: String,
    rewritten: bool,
    binding_order: Option<Vec<String>>,
}

impl RunnableQuery {
    /// Work out the text a driver should prepare.
    ///
    /// SQLite understands `:name` natively, so names are rewritten to `?` only
    /// when `resolve_named` is set. PostgreSQL only understands `$n`; both `?`
    /// and `:name` are always numbered for it.
    pub fn plan(query: &str, dialect: DatabaseType, resolve_named: bool) -> Self {
        let scan = placeholder::scan(query);
        let unchanged = || RunnableQuery {
            sql: query.to_string(),
            rewritten: false,
            binding_order: None,
        };

        match dialect {
            DatabaseType::Sqlite if resolve_named && scan.has_named() => {
                let rewrite = placeholder::rewrite_named(query, &scan, PlaceholderStyle::QuestionMark);
                RunnableQuery {
                    sql: rewrite.sql,
                    rewritten: true,
                    binding_order: Some(rewrite.order),
                }
            }
            DatabaseType::Sqlite => unchanged(),
            DatabaseType::Postgresql if scan.has_named() && !scan.has_positional() => {
                let rewrite = placeholder::rewrite_named(query, &scan, PlaceholderStyle::Numbered);
                RunnableQuery {
                    sql: rewrite.sql,
                    rewritten: true,
                    binding_order: Some(rewrite.order),
                }
            }
            DatabaseType::Postgresql if scan.has_positional() => RunnableQuery {
                sql: placeholder::number_positional(query, &scan),
                rewritten: true,
                binding_order: None,
            },
            DatabaseType::Postgresql => unchanged(),
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }
}

/// Values as they are handed to the driver
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValues {
    None,
    Positional(Vec<Value>),
    /// Name (without `:`) and value, for drivers that bind by name
    Named(Vec<(String, Value)>),
}

/// Everything a driver needs to run a statement once
#[derive(Debug, Clone, PartialEq)]
pub struct BindPlan {
    pub sql: String,
    pub values: BoundValues,
    /// The values are already inlined into `sql`
    pub emulated: bool,
}

/// A query prepared on an adapter, with its bound values
#[derive(Debug, Clone)]
pub struct Statement<H> {
    connection_id: Uuid,
    dialect: DatabaseType,
    query: String,
    runnable: RunnableQuery,
    values: Option<Params>,
    kind: StatementKind<H>,
}

impl<H> Statement<H> {
    /// Statement backed by a driver-prepared handle
    pub fn prepared(
        connection_id: Uuid,
        dialect: DatabaseType,
        query: impl Into<String>,
        runnable: RunnableQuery,
        values: Option<Params>,
        handle: H,
    ) -> Self {
        Self {
            connection_id,
            dialect,
            query: query.into(),
            runnable,
            values,
            kind: StatementKind::Prepared(handle),
        }
    }

    /// Statement whose values are inlined into the text when it runs
    pub fn emulated(
        connection_id: Uuid,
        dialect: DatabaseType,
        query: impl Into<String>,
        values: Option<Params>,
    ) -> Self {
        let query = query.into();
        Self {
            connection_id,
            dialect,
            runnable: RunnableQuery {
                sql: query.clone(),
                rewritten: false,
                binding_order: None,
            },
            query,
            values,
            kind: StatementKind::Emulated,
        }
    }

    /// Original query text
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Driver-native text when placeholders had to be rewritten
    pub fn runnable_query(&self) -> Option<&str> {
        self.runnable.rewritten.then_some(self.runnable.sql.as_str())
    }

    pub fn values(&self) -> Option<&Params> {
        self.values.as_ref()
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn dialect(&self) -> DatabaseType {
        self.dialect
    }

    pub fn kind(&self) -> &StatementKind<H> {
        &self.kind
    }

    pub fn native_handle(&self) -> Option<&H> {
        match &self.kind {
            StatementKind::Prepared(handle) => Some(handle),
            StatementKind::Emulated => None,
        }
    }

    pub fn is_emulated(&self) -> bool {
        matches!(self.kind, StatementKind::Emulated)
    }

    pub fn snapshot(&self) -> StatementSnapshot {
        StatementSnapshot::new(self.query.clone(), self.values.clone())
    }

    /// Check the bound values against the placeholders of the query
    pub fn validate(&self) -> Result<(), DbalError> {
        self.validate_scan(&placeholder::scan(&self.query))
    }

    fn validate_scan(&self, scan: &PlaceholderScan) -> Result<(), DbalError> {
        let fail = |cause| Err(DbalError::binding(self.snapshot(), cause));

        match &self.values {
            None => {
                if scan.is_empty() {
                    Ok(())
                } else {
                    fail(BindingFailure::CountMismatch {
                        expected: scan.expected_values(),
                        given: 0,
                    })
                }
            }
            Some(values) if values.is_empty() && !scan.is_empty() => {
                fail(BindingFailure::CountMismatch {
                    expected: scan.expected_values(),
                    given: 0,
                })
            }
            Some(Params::Positional(values)) => {
                if scan.has_named() {
                    return fail(BindingFailure::MixedPlaceholders);
                }
                let expected = scan.positional_count();
                if expected != values.len() {
                    return fail(BindingFailure::CountMismatch {
                        expected,
                        given: values.len(),
                    });
                }
                Ok(())
            }
            Some(Params::Named(values)) => {
                if scan.has_positional() {
                    return fail(BindingFailure::MixedPlaceholders);
                }
                let names = scan.unique_names();
                if names.len() != values.len() {
                    return fail(BindingFailure::CountMismatch {
                        expected: names.len(),
                        given: values.len(),
                    });
                }
                if let Some(missing) = names.iter().find(|name| !values.contains_key(**name)) {
                    return fail(BindingFailure::UnmatchedPlaceholder(missing.to_string()));
                }
                Ok(())
            }
        }
    }

    /// The original text with every value inlined as a literal
    pub fn preview(&self) -> Result<String, DbalError> {
        let scan = placeholder::scan(&self.query);
        self.validate_scan(&scan)?;

        let empty = BTreeMap::new();
        let (positional, named): (&[Value], &BTreeMap<String, Value>) = match &self.values {
            Some(Params::Positional(values)) => (values.as_slice(), &empty),
            Some(Params::Named(values)) => (&[], values),
            None => (&[], &empty),
        };

        let mut literals = Vec::with_capacity(scan.placeholders().len());
        let mut next_positional = 0;
        for placeholder in scan.placeholders() {
            let value = match placeholder {
                Placeholder::Positional { .. } => {
                    next_positional += 1;
                    positional.get(next_positional - 1)
                }
                Placeholder::Named { name, .. } => named.get(name),
            };
            let literal = match value {
                Some(value) => literal(&value.to_scalar()?, self.dialect),
                None => "NULL".to_string(),
            };
            literals.push(literal);
        }

        Ok(placeholder::substitute(&self.query, scan.placeholders(), |index, _| {
            std::mem::take(&mut literals[index])
        }))
    }

    /// Validate, coerce and arrange the values for one execution
    pub fn bind(&self) -> Result<BindPlan, DbalError> {
        if self.is_emulated() {
            return Ok(BindPlan {
                sql: self.preview()?,
                values: BoundValues::None,
                emulated: true,
            });
        }

        self.validate()?;

        let values = match (&self.values, &self.runnable.binding_order) {
            (None, _) => BoundValues::None,
            (Some(values), _) if values.is_empty() => BoundValues::None,
            (Some(Params::Positional(values)), _) => BoundValues::Positional(
                values
                    .iter()
                    .map(Value::to_scalar)
                    .collect::<Result<_, _>>()?,
            ),
            (Some(Params::Named(values)), Some(order)) => BoundValues::Positional(
                order
                    .iter()
                    .map(|name| match values.get(name) {
                        Some(value) => value.to_scalar(),
                        None => Err(DbalError::binding(
                            self.snapshot(),
                            BindingFailure::UnmatchedPlaceholder(name.clone()),
                        )),
                    })
                    .collect::<Result<_, _>>()?,
            ),
            (Some(Params::Named(values)), None) => BoundValues::Named(
                values
                    .iter()
                    .map(|(name, value)| Ok((name.clone(), value.to_scalar()?)))
                    .collect::<Result<_, DbalError>>()?,
            ),
        };

        Ok(BindPlan {
            sql: self.runnable.sql.clone(),
            values,
            emulated: false,
        })
    }
}

impl<H: Clone> Statement<H> {
    /// Copy of this statement with other values; never re-prepares
    pub fn with_values(&self, values: Option<Params>) -> Self {
        Self {
            values,
            ..self.clone()
        }
    }
}

/// Render a scalar value as an SQL literal of the given dialect
fn literal(value: &Value, dialect: DatabaseType) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Bool(b) => {
            let digit = if *b { 1 } else { 0 };
            match dialect {
                DatabaseType::Sqlite => digit.to_string(),
                DatabaseType::Postgresql => format!("'{}'", digit),
            }
        }
        Value::Int(i) => i.to_string(),
        Value::Float(f) if f.is_nan() => "'NaN'".to_string(),
        Value::Float(f) if f.is_infinite() && *f > 0.0 => "'Infinity'".to_string(),
        Value::Float(f) if f.is_infinite() => "'-Infinity'".to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => quote(s),
        Value::Bytes(bytes) => {
            let mut hex = String::with_capacity(bytes.len() * 2);
            for byte in bytes {
                let _ = write!(hex, "{:02x}", byte);
            }
            match dialect {
                DatabaseType::Sqlite => format!("X'{}'", hex),
                DatabaseType::Postgresql => format!("'\\x{}'::bytea", hex),
            }
        }
        Value::Timestamp(ts) => quote(&ts.format(TIMESTAMP_FORMAT).to_string()),
        Value::Json(json) => quote(&json.to_string()),
    }
}

fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

impl<H> fmt::Display for Statement<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.query)
    }
}

/// Anything an adapter can execute: raw text or a prepared statement
#[derive(Debug, Clone)]
pub enum Query<H> {
    Text(String),
    Prepared(Statement<H>),
}

impl<H> Query<H> {
    /// Query text as written by the caller
    pub fn text(&self) -> &str {
        match self {
            Query::Text(text) => text,
            Query::Prepared(statement) => statement.query(),
        }
    }
}

impl<H> From<&str> for Query<H> {
    fn from(text: &str) -> Self {
        Query::Text(text.to_string())
    }
}

impl<H> From<String> for Query<H> {
    fn from(text: String) -> Self {
        Query::Text(text)
    }
}

impl<H> From<Statement<H>> for Query<H> {
    fn from(statement: Statement<H>) -> Self {
        Query::Prepared(statement)
    }
}

impl<H: Clone> From<&Statement<H>> for Query<H> {
    fn from(statement: &Statement<H>) -> Self {
        Query::Prepared(statement.clone())
    }
}
