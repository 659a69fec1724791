// PostgreSQL Adapter
// Prepared and parallel query execution over tokio-postgres

use crate::db::credentials::Credentials;
use crate::db::error::{BindingFailure, DbalError, DriverDiagnostic, StatementSnapshot};
use crate::db::options::AdapterOptions;
use crate::db::reconnect::{Connector, Supervisor};
use crate::db::result::{ConnectionContext, Cursor, ResultSet};
use crate::db::scheduler::{AsyncScheduler, PendingResult, QueryHandle};
use crate::db::statement::{BindPlan, BoundValues, Query, RunnableQuery, Statement};
use crate::db::traits::{Adapter, DatabaseType, LinkState, TransactionAdapter};
use crate::db::value::{Params, Value, TIMESTAMP_FORMAT};
use bytes::{BufMut, BytesMut};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use futures::TryStreamExt;
use std::error::Error;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::{to_sql_checked, FromSql, IsNull, Kind, ToSql, Type};
use tokio_postgres::{Client, NoTls};
use tracing::{debug, info, warn};
use uuid::Uuid;

type BoxError = Box<dyn Error + Sync + Send>;

// ============================================================================
// Value conversion
// ============================================================================

/// Decode the binary NUMERIC format into its decimal text
fn decode_numeric(raw: &[u8]) -> Option<String> {
    // 2 bytes ndigits, 2 bytes weight, 2 bytes sign, 2 bytes dscale,
    // then ndigits base-10000 digits
    if raw.len() < 8 {
        return None;
    }
    let ndigits = u16::from_be_bytes([raw[0], raw[1]]) as usize;
    let weight = i16::from_be_bytes([raw[2], raw[3]]) as i32;
    let sign = u16::from_be_bytes([raw[4], raw[5]]);
    let dscale = u16::from_be_bytes([raw[6], raw[7]]) as usize;
    if raw.len() < 8 + ndigits * 2 {
        return None;
    }

    match sign {
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => {}
    }

    let digits: Vec<u16> = (0..ndigits)
        .map(|i| u16::from_be_bytes([raw[8 + i * 2], raw[9 + i * 2]]))
        .collect();
    let digit_at = |index: i32| -> u16 {
        usize::try_from(index)
            .ok()
            .and_then(|index| digits.get(index).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        for group in 0..=weight {
            if group == 0 {
                let _ = write!(out, "{}", digit_at(group));
            } else {
                let _ = write!(out, "{:04}", digit_at(group));
            }
        }
    }

    if dscale > 0 {
        let mut fraction = String::with_capacity(dscale + 4);
        let mut group = weight + 1;
        while fraction.len() < dscale {
            let _ = write!(fraction, "{:04}", digit_at(group));
            group += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}

/// Encode decimal text into the binary NUMERIC format
fn encode_numeric(text: &str, out: &mut BytesMut) -> Result<(), BoxError> {
    let text = text.trim();
    let (sign, special) = match text {
        "NaN" => (0xC000_u16, true),
        "Infinity" | "inf" => (0xD000, true),
        "-Infinity" | "-inf" => (0xF000, true),
        _ if text.starts_with('-') => (0x4000, false),
        _ => (0x0000, false),
    };
    if special {
        out.put_u16(0);
        out.put_i16(0);
        out.put_u16(sign);
        out.put_u16(0);
        return Ok(());
    }

    let unsigned = text.trim_start_matches(['-', '+']);
    let (int_part, frac_part) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit())
    {
        return Err(format!("invalid numeric value: {}", text).into());
    }

    let int_part = int_part.trim_start_matches('0');
    let int_padding = (4 - int_part.len() % 4) % 4;
    let frac_padding = (4 - frac_part.len() % 4) % 4;
    let digits_text = format!(
        "{}{}{}{}",
        "0".repeat(int_padding),
        int_part,
        frac_part,
        "0".repeat(frac_padding)
    );
    let mut groups: Vec<u16> = digits_text
        .as_bytes()
        .chunks(4)
        .map(|chunk| chunk.iter().fold(0u16, |acc, b| acc * 10 + u16::from(b - b'0')))
        .collect();
    let mut weight = ((int_part.len() + int_padding) / 4) as i32 - 1;

    while groups.first() == Some(&0) {
        groups.remove(0);
        weight -= 1;
    }
    while groups.last() == Some(&0) {
        groups.pop();
    }
    let sign = if groups.is_empty() { 0 } else { sign };
    if groups.is_empty() {
        weight = 0;
    }

    out.put_u16(u16::try_from(groups.len())?);
    out.put_i16(i16::try_from(weight)?);
    out.put_u16(sign);
    out.put_u16(u16::try_from(frac_part.len())?);
    for group in groups {
        out.put_u16(group);
    }
    Ok(())
}

fn encode_jsonb(text: &str, out: &mut BytesMut) {
    out.put_u8(1);
    out.put_slice(text.as_bytes());
}

/// Encode text for a parameter of the given type
fn text_to_sql(text: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::BOOL => {
            let value = match text.trim().to_ascii_lowercase().as_str() {
                "t" | "true" | "1" | "y" | "yes" | "on" => true,
                "f" | "false" | "0" | "n" | "no" | "off" => false,
                other => return Err(format!("invalid boolean value: {}", other).into()),
            };
            value.to_sql(ty, out)
        }
        Type::INT2 => text.trim().parse::<i16>()?.to_sql(ty, out),
        Type::INT4 => text.trim().parse::<i32>()?.to_sql(ty, out),
        Type::INT8 => text.trim().parse::<i64>()?.to_sql(ty, out),
        Type::OID => text.trim().parse::<u32>()?.to_sql(ty, out),
        Type::FLOAT4 => text.trim().parse::<f32>()?.to_sql(ty, out),
        Type::FLOAT8 => text.trim().parse::<f64>()?.to_sql(ty, out),
        Type::NUMERIC => encode_numeric(text, out).map(|_| IsNull::No),
        Type::TIMESTAMP => parse_timestamp(text)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(ts) => ts.with_timezone(&Utc).to_sql(ty, out),
            Err(_) => Utc.from_utc_datetime(&parse_timestamp(text)?).to_sql(ty, out),
        },
        Type::DATE => NaiveDate::parse_from_str(text.trim(), "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f")?.to_sql(ty, out),
        Type::UUID => {
            out.put_slice(Uuid::parse_str(text.trim())?.as_bytes());
            Ok(IsNull::No)
        }
        Type::JSONB => {
            encode_jsonb(text, out);
            Ok(IsNull::No)
        }
        _ => {
            out.put_slice(text.as_bytes());
            Ok(IsNull::No)
        }
    }
}

fn parse_timestamp(text: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f"))
        .or_else(|_| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f"))
}

impl ToSql for Value {
    /// Values adapt to the type the server inferred for the parameter
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                _ => Value::Int(i64::from(*b)).to_sql(ty, out),
            },
            Value::Int(i) => match *ty {
                Type::BOOL => (*i != 0).to_sql(ty, out),
                Type::INT2 => i16::try_from(*i)?.to_sql(ty, out),
                Type::INT4 => i32::try_from(*i)?.to_sql(ty, out),
                Type::INT8 => i.to_sql(ty, out),
                Type::OID => u32::try_from(*i)?.to_sql(ty, out),
                Type::FLOAT4 => (*i as f32).to_sql(ty, out),
                Type::FLOAT8 => (*i as f64).to_sql(ty, out),
                _ => text_to_sql(&i.to_string(), ty, out),
            },
            Value::Float(f) => match *ty {
                Type::FLOAT4 => (*f as f32).to_sql(ty, out),
                Type::FLOAT8 => f.to_sql(ty, out),
                Type::NUMERIC if f.is_nan() => encode_numeric("NaN", out).map(|_| IsNull::No),
                _ => text_to_sql(&f.to_string(), ty, out),
            },
            Value::Text(s) => text_to_sql(s, ty, out),
            Value::Bytes(b) => match *ty {
                Type::BYTEA => b.as_slice().to_sql(ty, out),
                _ => text_to_sql(std::str::from_utf8(b)?, ty, out),
            },
            Value::Timestamp(ts) => match *ty {
                Type::TIMESTAMP => ts.to_sql(ty, out),
                Type::TIMESTAMPTZ => Utc.from_utc_datetime(ts).to_sql(ty, out),
                Type::DATE => ts.date().to_sql(ty, out),
                _ => text_to_sql(&ts.format(TIMESTAMP_FORMAT).to_string(), ty, out),
            },
            Value::Json(json) => match *ty {
                Type::JSONB => {
                    encode_jsonb(&json.to_string(), out);
                    Ok(IsNull::No)
                }
                _ => text_to_sql(&json.to_string(), ty, out),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

impl<'a> FromSql<'a> for Value {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, BoxError> {
        Ok(match *ty {
            Type::BOOL => Value::Bool(bool::from_sql(ty, raw)?),
            Type::CHAR => Value::Int(i8::from_sql(ty, raw)?.into()),
            Type::INT2 => Value::Int(i16::from_sql(ty, raw)?.into()),
            Type::INT4 => Value::Int(i32::from_sql(ty, raw)?.into()),
            Type::INT8 => Value::Int(i64::from_sql(ty, raw)?),
            Type::OID => Value::Int(u32::from_sql(ty, raw)?.into()),
            Type::FLOAT4 => Value::Float(f32::from_sql(ty, raw)?.into()),
            Type::FLOAT8 => Value::Float(f64::from_sql(ty, raw)?),
            Type::NUMERIC => Value::Text(decode_numeric(raw).ok_or("invalid numeric value")?),
            Type::BYTEA => Value::Bytes(raw.to_vec()),
            Type::TIMESTAMP => Value::Timestamp(NaiveDateTime::from_sql(ty, raw)?),
            Type::TIMESTAMPTZ => Value::Timestamp(DateTime::<Utc>::from_sql(ty, raw)?.naive_utc()),
            Type::DATE => Value::Text(NaiveDate::from_sql(ty, raw)?.format("%Y-%m-%d").to_string()),
            Type::TIME => Value::Text(NaiveTime::from_sql(ty, raw)?.to_string()),
            Type::UUID => Value::Text(Uuid::from_slice(raw)?.to_string()),
            Type::JSON => Value::Json(serde_json::from_slice(raw)?),
            Type::JSONB => Value::Json(serde_json::from_slice(raw.get(1..).unwrap_or_default())?),
            Type::XML => Value::Text(std::str::from_utf8(raw)?.to_string()),
            _ => match ty.kind() {
                Kind::Array(_) => {
                    let items = Vec::<Value>::from_sql(ty, raw)?;
                    Value::Json(serde_json::to_value(items)?)
                }
                // enum labels travel as their text
                Kind::Enum(_) => Value::Text(std::str::from_utf8(raw)?.to_string()),
                _ if <&str as FromSql>::accepts(ty) => {
                    Value::Text(<&str as FromSql>::from_sql(ty, raw)?.to_string())
                }
                _ => return Err(format!("unsupported column type `{}`", ty.name()).into()),
            },
        })
    }

    fn from_sql_null(_ty: &Type) -> Result<Self, BoxError> {
        Ok(Value::Null)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }
}

// ============================================================================
// Connector
// ============================================================================

/// Opens PostgreSQL links from credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresConnector;

#[async_trait::async_trait]
impl Connector for PostgresConnector {
    type Link = Client;

    async fn connect(
        &self,
        credentials: &Credentials,
        options: &AdapterOptions,
    ) -> Result<Client, DbalError> {
        credentials.validate()?;
        let (client, connection) = credentials
            .to_postgres_config()
            .connect(NoTls)
            .await
            .map_err(|e| DbalError::AccessDenied(DriverDiagnostic::from(e)))?;

        let host = credentials.hostname().to_string();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                warn!(host = %host, error = %e, "PostgreSQL connection closed with error");
            }
        });

        if let Some(charset) = &options.charset {
            let sql = format!("SET client_encoding TO '{}'", charset.replace('\'', "''"));
            client
                .batch_execute(&sql)
                .await
                .map_err(|e| DbalError::AccessDenied(DriverDiagnostic::from(e)))?;
        }
        debug!(host = credentials.hostname(), port = credentials.port(), "connected to PostgreSQL");
        Ok(client)
    }

    async fn probe(&self, link: &mut Client) -> bool {
        if link.is_closed() {
            return false;
        }
        match link.simple_query("SELECT 1").await {
            Ok(_) => true,
            // an aborted transaction rejects the probe with 25P02 on a live session
            Err(e) => server_answered(&e) && !link.is_closed(),
        }
    }
}

/// True when the error is a regular answer from a backend that stays up
fn server_answered(err: &tokio_postgres::Error) -> bool {
    match err.as_db_error() {
        Some(db_error) => {
            let code = db_error.code().code();
            !matches!(db_error.severity(), "FATAL" | "PANIC")
                && !code.starts_with("08")
                && !code.starts_with("57P")
        }
        None => false,
    }
}

// ============================================================================
// Execution helpers
// ============================================================================

/// Server-side prepared statement and the link generation it belongs to
#[derive(Debug, Clone)]
pub struct PgHandle {
    statement: tokio_postgres::Statement,
    generation: u64,
}

impl PgHandle {
    pub fn statement(&self) -> &tokio_postgres::Statement {
        &self.statement
    }

    pub fn param_types(&self) -> &[Type] {
        self.statement.params()
    }
}

enum Failure {
    LinkClosed,
    Unbindable(BindingFailure),
    Driver(tokio_postgres::Error),
}

impl From<tokio_postgres::Error> for Failure {
    fn from(err: tokio_postgres::Error) -> Self {
        Failure::Driver(err)
    }
}

impl Failure {
    fn into_error(self, snapshot: StatementSnapshot) -> DbalError {
        match self {
            Failure::LinkClosed => DbalError::Query(link_closed()),
            Failure::Unbindable(cause) => DbalError::binding(snapshot, cause),
            Failure::Driver(err) => translate(err, snapshot),
        }
    }
}

fn link_closed() -> DriverDiagnostic {
    DriverDiagnostic::new("Connection is closed")
}

/// Map a driver error onto the error taxonomy
fn translate(err: tokio_postgres::Error, snapshot: StatementSnapshot) -> DbalError {
    let message = err.to_string();
    let binding = err.code() == Some(&SqlState::PROTOCOL_VIOLATION)
        || (message.starts_with("expected") && message.contains("parameters"))
        || message.starts_with("error serializing parameter");
    if binding {
        DbalError::binding(snapshot, BindingFailure::Driver(DriverDiagnostic::from(err)))
    } else {
        DbalError::Query(DriverDiagnostic::from(err))
    }
}

fn is_insert(query: &str) -> bool {
    query
        .trim_start()
        .get(..6)
        .map(|head| head.eq_ignore_ascii_case("insert"))
        .unwrap_or(false)
}

/// How a statement moves the session in or out of a transaction block
fn transaction_effect(query: &str) -> Option<bool> {
    let mut words = query
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|word| !word.is_empty());
    let first = words.next()?.to_ascii_uppercase();
    match first.as_str() {
        "BEGIN" | "START" => Some(true),
        // ROLLBACK TO SAVEPOINT stays inside the block
        "ROLLBACK" | "ABORT" => match words.next() {
            Some(word) if word.eq_ignore_ascii_case("to") => None,
            _ => Some(false),
        },
        "COMMIT" | "END" => Some(false),
        _ => None,
    }
}

fn positional(values: &BoundValues) -> Result<&[Value], Failure> {
    match values {
        BoundValues::None => Ok(&[]),
        BoundValues::Positional(values) => Ok(values.as_slice()),
        BoundValues::Named(_) => Err(Failure::Unbindable(BindingFailure::MixedPlaceholders)),
    }
}

/// Run a prepared statement and collect its outcome
async fn fetch(
    client: &Client,
    statement: &tokio_postgres::Statement,
    values: &[Value],
) -> Result<ResultSet, tokio_postgres::Error> {
    let stream = client.query_raw(statement, values.iter()).await?;
    let mut stream = std::pin::pin!(stream);
    let mut rows = Vec::new();
    while let Some(row) = stream.try_next().await? {
        let mut fetched = Vec::with_capacity(row.len());
        for index in 0..row.len() {
            fetched.push(row.try_get::<_, Value>(index)?);
        }
        rows.push(fetched);
    }

    if statement.columns().is_empty() {
        return Ok(ResultSet::from_affected(stream.rows_affected().unwrap_or(0)));
    }
    let columns = statement
        .columns()
        .iter()
        .map(|column| column.name().to_string())
        .collect();
    Ok(ResultSet::from_cursor(Cursor::new(columns, rows)))
}

const LASTVAL_SAVEPOINT: &str = "simple_dbal_lastval";

async fn lastval(client: &Client) -> Option<i64> {
    client
        .query_one("SELECT lastval()", &[])
        .await
        .ok()
        .and_then(|row| row.try_get::<_, i64>(0).ok())
}

/// Id generated by an INSERT without RETURNING rows, read with `lastval()`.
///
/// `lastval()` fails when the INSERT used no sequence. Inside a transaction
/// it runs under a savepoint so that failure never aborts the block.
async fn last_insert_id(
    client: &Client,
    query: &str,
    result: &ResultSet,
    in_transaction: bool,
) -> Option<i64> {
    if !is_insert(query) || result.has_rows() {
        return None;
    }
    if !in_transaction {
        return lastval(client).await;
    }

    if let Err(e) = client
        .batch_execute(&format!("SAVEPOINT {}", LASTVAL_SAVEPOINT))
        .await
    {
        debug!(error = %e, "savepoint for lastval() refused");
        return None;
    }
    let id = lastval(client).await;
    let close = match id {
        Some(_) => format!("RELEASE SAVEPOINT {}", LASTVAL_SAVEPOINT),
        None => format!(
            "ROLLBACK TO SAVEPOINT {0}; RELEASE SAVEPOINT {0}",
            LASTVAL_SAVEPOINT
        ),
    };
    if let Err(e) = client.batch_execute(&close).await {
        warn!(error = %e, "failed to close the lastval() savepoint");
    }
    id
}

/// Inlined query run on its own connection
async fn run_on_side_connection(
    side_id: Uuid,
    credentials: Option<Credentials>,
    options: AdapterOptions,
    plan: BindPlan,
    snapshot: StatementSnapshot,
) -> Result<ResultSet, DbalError> {
    let credentials = credentials.ok_or_else(|| {
        DbalError::AccessDenied(DriverDiagnostic::new(
            "Unable to open a parallel connection: credentials not provided.",
        ))
    })?;
    let client = PostgresConnector.connect(&credentials, &options).await?;

    let run = async {
        let statement = client.prepare(&plan.sql).await?;
        let result = fetch(&client, &statement, &[]).await?;
        let last_insert_id = last_insert_id(&client, &snapshot.query, &result, false).await;
        Ok::<_, tokio_postgres::Error>((result, last_insert_id))
    };
    let (result, last_insert_id) = run.await.map_err(|e| translate(e, snapshot))?;

    Ok(result
        .with_policy(options.result_policy)
        .with_context(ConnectionContext {
            connection_id: side_id,
            last_insert_id,
        }))
}

// ============================================================================
// Adapter
// ============================================================================

/// PostgreSQL adapter
pub struct PostgresAdapter {
    id: Uuid,
    credentials: Option<Credentials>,
    options: AdapterOptions,
    link: Mutex<Supervisor<PostgresConnector>>,
    scheduler: AsyncScheduler<ResultSet>,
    in_transaction: AtomicBool,
}

impl PostgresAdapter {
    /// Connect from credentials
    pub async fn factory(
        credentials: Credentials,
        options: Option<AdapterOptions>,
    ) -> Result<Self, DbalError> {
        let options = options.unwrap_or_default();
        let client = PostgresConnector.connect(&credentials, &options).await?;
        Ok(Self::from_connection(client, Some(credentials), Some(options)))
    }

    /// Wrap a connected client. Its connection future must already be driven.
    pub fn from_connection(
        client: Client,
        credentials: Option<Credentials>,
        options: Option<AdapterOptions>,
    ) -> Self {
        let options = options.unwrap_or_default();
        let id = Uuid::new_v4();
        info!(adapter = %id, "PostgreSQL adapter ready");
        Self {
            id,
            link: Mutex::new(Supervisor::new(PostgresConnector, client, credentials.clone())),
            credentials,
            scheduler: AsyncScheduler::with_poll_interval(options.poll_interval()),
            options,
            in_transaction: AtomicBool::new(false),
        }
    }

    /// Use a shared scheduler for parallel queries
    pub fn with_scheduler(mut self, scheduler: AsyncScheduler<ResultSet>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn scheduler(&self) -> &AsyncScheduler<ResultSet> {
        &self.scheduler
    }

    async fn prepare_handle(
        supervisor: &mut Supervisor<PostgresConnector>,
        sql: &str,
    ) -> Result<PgHandle, DriverDiagnostic> {
        let generation = supervisor.generation();
        let client = supervisor.link().ok_or_else(link_closed)?;
        let statement = client.prepare(sql).await?;
        Ok(PgHandle {
            statement,
            generation,
        })
    }

    async fn resolve(
        &self,
        query: Query<PgHandle>,
        values: Option<Params>,
    ) -> Result<Statement<PgHandle>, DbalError> {
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

    async fn run(
        &self,
        supervisor: &mut Supervisor<PostgresConnector>,
        statement: &Statement<PgHandle>,
        plan: &BindPlan,
    ) -> Result<ResultSet, Failure> {
        let generation = supervisor.generation();
        let client = supervisor.link().ok_or(Failure::LinkClosed)?;
        let values = positional(&plan.values)?;

        let prepared;
        let handle = match statement.native_handle() {
            Some(handle) if !plan.emulated && handle.generation == generation => &handle.statement,
            _ => {
                prepared = client.prepare(&plan.sql).await?;
                &prepared
            }
        };

        let result = fetch(client, handle, values).await?;
        let in_transaction = self.in_transaction.load(Ordering::SeqCst);
        let last_insert_id = last_insert_id(client, statement.query(), &result, in_transaction).await;
        Ok(result
            .with_policy(self.options.result_policy)
            .with_context(ConnectionContext {
                connection_id: self.id,
                last_insert_id,
            }))
    }

    /// Bind now, open a side connection and hand the query to the scheduler
    fn submit_parallel(
        &self,
        query: Query<PgHandle>,
        values: Option<Params>,
    ) -> Result<QueryHandle<ResultSet>, DbalError> {
        let (text, values) = match query {
            Query::Text(text) => (text, values),
            Query::Prepared(statement) => {
                let values = values.or_else(|| statement.values().cloned());
                (statement.query().to_string(), values)
            }
        };
        let statement: Statement<PgHandle> =
            Statement::emulated(self.id, DatabaseType::Postgresql, text, values);
        let plan = statement.bind()?;

        let side_id = Uuid::new_v4();
        let future = run_on_side_connection(
            side_id,
            self.credentials.clone(),
            self.options.clone(),
            plan,
            statement.snapshot(),
        );
        Ok(self.scheduler.submit(side_id.to_string(), future))
    }

    /// Follow BEGIN / COMMIT / ROLLBACK issued as plain statements
    fn track_transaction(&self, query: &str) {
        if let Some(open) = transaction_effect(query) {
            self.in_transaction.store(open, Ordering::SeqCst);
        }
    }

    async fn run_transaction_command(&self, sql: &str) -> Result<(), DbalError> {
        let mut supervisor = self.link.lock().await;
        let client = supervisor.link().ok_or_else(|| DbalError::Query(link_closed()))?;
        client
            .batch_execute(sql)
            .await
            .map_err(|e| DbalError::Query(DriverDiagnostic::from(e)))?;
        debug!(adapter = %self.id, command = sql, "transaction command");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Adapter for PostgresAdapter {
    type Handle = PgHandle;

    fn id(&self) -> Uuid {
        self.id
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::Postgresql
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
        self.in_transaction.store(false, Ordering::SeqCst);
        self.link.lock().await.reconnect(&self.options).await
    }

    async fn close(&self) {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.link.lock().await.close();
    }

    async fn prepare(
        &self,
        query: &str,
        values: Option<Params>,
    ) -> Result<Statement<PgHandle>, DbalError> {
        if self.options.emulate_prepared_statements {
            return Ok(Statement::emulated(self.id, DatabaseType::Postgresql, query, values));
        }

        let runnable =
            RunnableQuery::plan(query, DatabaseType::Postgresql, self.options.resolve_named_params);
        let mut supervisor = self.link.lock().await;
        let handle = match Self::prepare_handle(&mut supervisor, runnable.sql()).await {
            Ok(handle) => handle,
            Err(diag) => {
                if supervisor.is_alive().await {
                    return Err(DbalError::Query(diag));
                }
                if self.in_transaction.swap(false, Ordering::SeqCst) {
                    warn!(adapter = %self.id, error = %diag, "link lost inside a transaction");
                    return Err(DbalError::Query(diag));
                }
                warn!(adapter = %self.id, error = %diag, "link lost while preparing");
                supervisor.reconnect(&self.options).await?;
                Self::prepare_handle(&mut supervisor, runnable.sql())
                    .await
                    .map_err(DbalError::Query)?
            }
        };

        Ok(Statement::prepared(
            self.id,
            DatabaseType::Postgresql,
            query,
            runnable,
            values,
            handle,
        ))
    }

    async fn execute<Q>(&self, query: Q, values: Option<Params>) -> Result<ResultSet, DbalError>
    where
        Q: Into<Query<PgHandle>> + Send,
    {
        let statement = self.resolve(query.into(), values).await?;
        let plan = statement.bind()?;

        let mut supervisor = self.link.lock().await;
        let failure = match self.run(&mut supervisor, &statement, &plan).await {
            Ok(result) => {
                self.track_transaction(statement.query());
                return Ok(result);
            }
            Err(failure) => failure,
        };
        if supervisor.is_alive().await {
            return Err(failure.into_error(statement.snapshot()));
        }
        // a transaction block dies with its session and is never replayed
        if self.in_transaction.swap(false, Ordering::SeqCst) {
            warn!(adapter = %self.id, query = statement.query(), "link lost inside a transaction");
            return Err(failure.into_error(statement.snapshot()));
        }

        warn!(adapter = %self.id, query = statement.query(), "link lost, reconnecting before retry");
        supervisor.reconnect(&self.options).await?;
        drop(supervisor);

        let statement = self
            .prepare(statement.query(), statement.values().cloned())
            .await?;
        let plan = statement.bind()?;
        let mut supervisor = self.link.lock().await;
        let result = self
            .run(&mut supervisor, &statement, &plan)
            .await
            .map_err(|failure| failure.into_error(statement.snapshot()))?;
        self.track_transaction(statement.query());
        Ok(result)
    }

    fn execute_async<'a, Q>(&'a self, query: Q, values: Option<Params>) -> PendingResult<'a>
    where
        Q: Into<Query<PgHandle>> + Send + 'a,
    {
        if !self.options.enable_parallel_queries {
            return PendingResult::deferred(self.execute(query, values));
        }
        match self.submit_parallel(query.into(), values) {
            Ok(handle) => PendingResult::Scheduled(handle),
            Err(err) => PendingResult::Rejected(err),
        }
    }
}

#[async_trait::async_trait]
impl TransactionAdapter for PostgresAdapter {
    async fn begin_transaction(&self) -> Result<(), DbalError> {
        self.run_transaction_command("BEGIN").await?;
        self.in_transaction.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn commit(&self) -> Result<(), DbalError> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.run_transaction_command("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), DbalError> {
        self.in_transaction.store(false, Ordering::SeqCst);
        self.run_transaction_command("ROLLBACK").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(ndigits: u16, weight: i16, sign: u16, dscale: u16, digits: &[u16]) -> Vec<u8> {
        let mut raw = BytesMut::new();
        raw.put_u16(ndigits);
        raw.put_i16(weight);
        raw.put_u16(sign);
        raw.put_u16(dscale);
        for digit in digits {
            raw.put_u16(*digit);
        }
        raw.to_vec()
    }

    #[test]
    fn test_decode_numeric() {
        assert_eq!(decode_numeric(&numeric(3, 1, 0, 3, &[1, 2345, 6780])).unwrap(), "12345.678");
        assert_eq!(decode_numeric(&numeric(1, -1, 0, 4, &[1])).unwrap(), "0.0001");
        assert_eq!(decode_numeric(&numeric(1, -2, 0, 5, &[1000])).unwrap(), "0.00001");
        assert_eq!(decode_numeric(&numeric(1, 2, 0x4000, 0, &[5])).unwrap(), "-500000000");
        assert_eq!(decode_numeric(&numeric(0, 0, 0, 2, &[])).unwrap(), "0.00");
        assert_eq!(decode_numeric(&numeric(0, 0, 0xC000, 0, &[])).unwrap(), "NaN");
        assert!(decode_numeric(&[0, 1]).is_none());
    }

    #[test]
    fn test_encode_numeric_matches_decoder() {
        for text in ["12345.678", "-0.00001", "42", "0", "100000000", "3.14159265358979"] {
            let mut out = BytesMut::new();
            encode_numeric(text, &mut out).unwrap();
            assert_eq!(decode_numeric(&out).unwrap(), text);
        }

        let mut out = BytesMut::new();
        assert!(encode_numeric("12a", &mut out).is_err());
    }

    #[test]
    fn test_value_adapts_to_parameter_type() {
        let mut out = BytesMut::new();
        Value::Int(7).to_sql(&Type::INT4, &mut out).unwrap();
        assert_eq!(&out[..], &7_i32.to_be_bytes());

        let mut out = BytesMut::new();
        Value::Text("42".into()).to_sql(&Type::INT8, &mut out).unwrap();
        assert_eq!(&out[..], &42_i64.to_be_bytes());

        let mut out = BytesMut::new();
        Value::Bool(true).to_sql(&Type::INT2, &mut out).unwrap();
        assert_eq!(&out[..], &1_i16.to_be_bytes());

        let mut out = BytesMut::new();
        Value::Text("{\"a\":1}".into()).to_sql(&Type::JSONB, &mut out).unwrap();
        assert_eq!(out[0], 1);
        assert_eq!(&out[1..], b"{\"a\":1}");

        let mut out = BytesMut::new();
        assert!(Value::Text("abc".into()).to_sql(&Type::INT4, &mut out).is_err());
        assert!(matches!(Value::Null.to_sql(&Type::INT4, &mut out).unwrap(), IsNull::Yes));
    }

    #[test]
    fn test_value_from_sql() {
        assert_eq!(Value::from_sql(&Type::INT2, &5_i16.to_be_bytes()).unwrap(), Value::Int(5));
        assert_eq!(
            Value::from_sql(&Type::TEXT, b"hello").unwrap(),
            Value::Text("hello".into())
        );
        assert_eq!(
            Value::from_sql(&Type::JSONB, b"\x01{\"a\":1}").unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert_eq!(
            Value::from_sql(&Type::NUMERIC, &numeric(2, 0, 0, 2, &[3, 1400])).unwrap(),
            Value::Text("3.14".into())
        );
        assert_eq!(Value::from_sql_null(&Type::INT4).unwrap(), Value::Null);
    }

    #[test]
    fn test_arrays_decode_to_json() {
        let mut raw = BytesMut::new();
        raw.put_i32(1); // dimensions
        raw.put_i32(1); // has nulls
        raw.put_u32(Type::INT4.oid());
        raw.put_i32(2); // length
        raw.put_i32(1); // lower bound
        raw.put_i32(4);
        raw.put_i32(7);
        raw.put_i32(-1);
        assert_eq!(
            Value::from_sql(&Type::INT4_ARRAY, &raw).unwrap(),
            Value::Json(serde_json::json!([7, null]))
        );
    }

    #[test]
    fn test_unsupported_types_are_errors() {
        let interval = [0_u8; 16];
        let err = Value::from_sql(&Type::INTERVAL, &interval).unwrap_err();
        assert!(err.to_string().contains("interval"));
        assert!(Value::from_sql(&Type::INET, &[2, 32, 0, 4, 10, 0, 0, 1]).is_err());

        assert_eq!(
            Value::from_sql(&Type::VARCHAR, b"abc").unwrap(),
            Value::Text("abc".into())
        );
        assert_eq!(Value::from_sql(&Type::CHAR, &[b'r']).unwrap(), Value::Int(114));
    }

    #[test]
    fn test_transaction_effect() {
        assert_eq!(transaction_effect("BEGIN"), Some(true));
        assert_eq!(transaction_effect("  start transaction isolation level serializable"), Some(true));
        assert_eq!(transaction_effect("COMMIT"), Some(false));
        assert_eq!(transaction_effect("end"), Some(false));
        assert_eq!(transaction_effect("ROLLBACK"), Some(false));
        assert_eq!(transaction_effect("rollback to savepoint s1"), None);
        assert_eq!(transaction_effect("SAVEPOINT s1"), None);
        assert_eq!(transaction_effect("SELECT 'begin'"), None);
        assert_eq!(transaction_effect(""), None);
    }

    #[test]
    fn test_is_insert() {
        assert!(is_insert("  insert into t values (1)"));
        assert!(is_insert("INSERT INTO t VALUES (1)"));
        assert!(!is_insert("SELECT 1"));
        assert!(!is_insert("ins"));
    }

    #[test]
    fn test_named_values_are_not_bound_by_name() {
        let named = BoundValues::Named(vec![("a".into(), Value::Int(1))]);
        assert!(matches!(
            positional(&named),
            Err(Failure::Unbindable(BindingFailure::MixedPlaceholders))
        ));
        assert_eq!(positional(&BoundValues::None).ok().map(<[Value]>::len), Some(0));
    }

    #[tokio::test]
    async fn test_side_connection_without_credentials() {
        let err = run_on_side_connection(
            Uuid::new_v4(),
            None,
            AdapterOptions::default(),
            BindPlan {
                sql: "SELECT 1".into(),
                values: BoundValues::None,
                emulated: true,
            },
            StatementSnapshot::new("SELECT 1", None),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, DbalError::AccessDenied(_)));
    }

    #[tokio::test]
    async fn test_side_connection_refused_is_access_denied() {
        let credentials = Credentials::new("127.0.0.1", "nobody").with_port(1);
        let scheduler: AsyncScheduler<ResultSet> = AsyncScheduler::new();
        let handle = scheduler.submit(
            "side",
            run_on_side_connection(
                Uuid::new_v4(),
                Some(credentials),
                AdapterOptions::default(),
                BindPlan {
                    sql: "SELECT 1".into(),
                    values: BoundValues::None,
                    emulated: true,
                },
                StatementSnapshot::new("SELECT 1", None),
            ),
        );
        assert!(matches!(handle.await, Err(DbalError::AccessDenied(_))));
    }
}
