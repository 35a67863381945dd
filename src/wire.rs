use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;

use crate::auth::MaitredAuthSource;
use crate::engine::Engine;
use crate::engine::availability::AvailabilityRequest;
use crate::engine::booking::ReservationRequest;
use crate::engine::error::EngineError;
use crate::model::Window;
use crate::notify::RESERVATIONS_CHANNEL;
use crate::observability;
use crate::sql::{self, Command};
use crate::venue::VenueManager;

/// The anonymous login: may check availability and book, carries no
/// identity for staff operations or charges.
const GUEST_USER: &str = "guest";

pub struct MaitredHandler {
    venues: Arc<VenueManager>,
    query_parser: Arc<MaitredQueryParser>,
}

impl MaitredHandler {
    pub fn new(venues: Arc<VenueManager>) -> Self {
        Self {
            venues,
            query_parser: Arc::new(MaitredQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.venues.get_or_create(&db).map_err(|e| {
            PgWireError::UserError(Box::new(ErrorInfo::new(
                "ERROR".into(),
                "08006".into(),
                format!("venue error: {e}"),
            )))
        })
    }

    /// Caller identity from the login user. The guest user is anonymous.
    fn caller_of<C: ClientInfo>(client: &C) -> Option<String> {
        client
            .metadata()
            .get("user")
            .filter(|u| u.as_str() != GUEST_USER)
            .cloned()
    }

    async fn dispatch(
        &self,
        engine: &Engine,
        caller: Option<String>,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(
        &self,
        engine: &Engine,
        caller: Option<String>,
        cmd: Command,
    ) -> PgWireResult<Vec<Response>> {
        let caller = caller.as_deref();
        match cmd {
            Command::InsertTable {
                id,
                capacity,
                shape,
                status,
            } => {
                engine
                    .create_table(
                        caller,
                        id,
                        capacity,
                        shape.unwrap_or(crate::model::TableShape::Rect),
                        status,
                    )
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertOrder {
                id,
                table_id,
                subtotal,
            } => {
                engine
                    .record_order(caller, id, table_id, subtotal)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::InsertReservation {
                contact_name,
                contact_phone,
                contact_email,
                start,
                party_size,
                duration_minutes,
                notes,
                source,
            } => {
                let outcome = engine
                    .create_reservation(&ReservationRequest {
                        contact_name,
                        contact_phone,
                        contact_email,
                        start,
                        party_size,
                        duration_minutes,
                        notes,
                        source,
                        created_by: caller.map(|c| c.to_string()),
                    })
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(reservation_insert_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&outcome.reservation_id.to_string())?;
                encoder.encode_field(&outcome.table_id.to_string())?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::InsertCharge { order_id, tip } => {
                let outcome = engine
                    .create_charge(caller, order_id, tip.unwrap_or(0))
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(charge_schema());
                let mut encoder = DataRowEncoder::new(schema.clone());
                encoder.encode_field(&outcome.handle)?;
                encoder.encode_field(&outcome.client_secret)?;
                encoder.encode_field(&outcome.amounts.subtotal)?;
                encoder.encode_field(&outcome.amounts.tps)?;
                encoder.encode_field(&outcome.amounts.tvq)?;
                encoder.encode_field(&outcome.amounts.total)?;
                let rows = vec![Ok(encoder.take_row())];
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::UpdateReservationStatus { id, status } => {
                engine
                    .set_reservation_status(caller, id, status)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::SelectAvailability {
                start,
                party_size,
                duration_minutes,
            } => {
                let outcome = engine
                    .check_availability(&AvailabilityRequest {
                        start,
                        party_size,
                        duration_minutes,
                    })
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let rows: Vec<PgWireResult<_>> = if outcome.available {
                    outcome
                        .free_tables
                        .iter()
                        .map(|table_id| {
                            let mut encoder = DataRowEncoder::new(schema.clone());
                            encoder.encode_field(&Some(table_id.to_string()))?;
                            encoder.encode_field(&outcome.window.start)?;
                            encoder.encode_field(&outcome.window.end)?;
                            encoder.encode_field(&None::<String>)?;
                            Ok(encoder.take_row())
                        })
                        .collect()
                } else {
                    let mut encoder = DataRowEncoder::new(schema.clone());
                    encoder.encode_field(&None::<String>)?;
                    encoder.encode_field(&outcome.window.start)?;
                    encoder.encode_field(&outcome.window.end)?;
                    encoder.encode_field(&outcome.reason.map(|r| r.to_string()))?;
                    vec![Ok(encoder.take_row())]
                };

                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectTables => {
                let schema = Arc::new(tables_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_tables()
                    .into_iter()
                    .map(|t| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&t.id.to_string())?;
                        encoder.encode_field(&(t.capacity as i32))?;
                        encoder.encode_field(&t.shape.as_str())?;
                        encoder.encode_field(&t.status)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::SelectReservations {
                start_min,
                start_max,
            } => {
                let range = match (start_min, start_max) {
                    (Some(a), Some(b)) => Some(Window { start: a, end: b }),
                    (Some(a), None) => Some(Window {
                        start: a,
                        end: crate::limits::MAX_VALID_TIMESTAMP_MS,
                    }),
                    (None, Some(b)) => Some(Window { start: 0, end: b }),
                    (None, None) => None,
                };
                let schema = Arc::new(reservations_schema());
                let rows: Vec<PgWireResult<_>> = engine
                    .list_reservations(range)
                    .into_iter()
                    .map(|r| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&r.id.to_string())?;
                        encoder.encode_field(&r.table_id.to_string())?;
                        encoder.encode_field(&(r.party_size as i32))?;
                        encoder.encode_field(&r.window.start)?;
                        encoder.encode_field(&r.window.end)?;
                        encoder.encode_field(&r.status.as_str())?;
                        encoder.encode_field(&r.contact.name)?;
                        Ok(encoder.take_row())
                    })
                    .collect();
                Ok(vec![Response::Query(QueryResponse::new(
                    schema,
                    stream::iter(rows),
                ))])
            }
            Command::Listen { channel } => {
                if channel != RESERVATIONS_CHANNEL {
                    return Err(PgWireError::UserError(Box::new(ErrorInfo::new(
                        "ERROR".into(),
                        "42000".into(),
                        format!("unknown channel: {channel} (expected {RESERVATIONS_CHANNEL})"),
                    ))));
                }
                Ok(vec![Response::Execution(Tag::new("LISTEN"))])
            }
        }
    }
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("table_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("reason".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn reservation_insert_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new(
            "reservation_id".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("table_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn charge_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new(
            "charge_handle".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new(
            "client_secret".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
        FieldInfo::new("subtotal".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("tps".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("tvq".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("total".into(), None, None, Type::INT8, FieldFormat::Text),
    ]
}

fn tables_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("capacity".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("shape".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
    ]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("table_id".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new("party_size".into(), None, None, Type::INT4, FieldFormat::Text),
        FieldInfo::new("start".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("end".into(), None, None, Type::INT8, FieldFormat::Text),
        FieldInfo::new("status".into(), None, None, Type::VARCHAR, FieldFormat::Text),
        FieldInfo::new(
            "contact_name".into(),
            None,
            None,
            Type::VARCHAR,
            FieldFormat::Text,
        ),
    ]
}

#[async_trait]
impl SimpleQueryHandler for MaitredHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let caller = Self::caller_of(client);
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.dispatch(&engine, caller, cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct MaitredQueryParser;

#[async_trait]
impl QueryParser for MaitredQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

/// Result schema by statement shape, for Describe before Execute.
fn statement_schema(stmt: &str) -> Vec<FieldInfo> {
    let upper = stmt.to_uppercase();
    if upper.contains("SELECT") && upper.contains("AVAILABILITY") {
        availability_schema()
    } else if upper.contains("SELECT") && upper.contains("RESERVATIONS") {
        reservations_schema()
    } else if upper.contains("SELECT") && upper.contains("TABLES") {
        tables_schema()
    } else if upper.contains("INSERT") && upper.contains("RESERVATIONS") {
        reservation_insert_schema()
    } else if upper.contains("INSERT") && upper.contains("CHARGES") {
        charge_schema()
    } else {
        vec![]
    }
}

#[async_trait]
impl ExtendedQueryHandler for MaitredHandler {
    type Statement = String;
    type QueryParser = MaitredQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let caller = Self::caller_of(client);
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.dispatch(&engine, caller, cmd).await?;
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if i > start
                && let Ok(n) = sql[start..i].parse::<usize>()
                && n > max
            {
                max = n;
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let sql = portal.statement.statement.to_string();
    let params = &portal.parameters;
    let mut result = sql;

    for (i, param) in params.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }

    result
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct MaitredFactory {
    handler: Arc<MaitredHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<MaitredAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl MaitredFactory {
    pub fn new(venues: Arc<VenueManager>, password: String) -> Self {
        let auth_source = MaitredAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(MaitredHandler::new(venues)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for MaitredFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Drive one client connection through the pgwire state machine.
pub async fn process_connection(
    socket: tokio::net::TcpStream,
    factory: Arc<MaitredFactory>,
    tls: Option<pgwire::tokio::TlsAcceptor>,
) -> std::io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory.as_ref().clone()).await
}

/// One SQLSTATE per error class, so clients can branch on `code()`.
fn engine_err(e: EngineError) -> PgWireError {
    let code = match &e {
        EngineError::InvalidArgument(_) => "22023",
        EngineError::Unauthenticated(_) => "28000",
        EngineError::PermissionDenied(_) => "42501",
        EngineError::NotFound(_) => "P0002",
        EngineError::FailedPrecondition(_) => "55000",
        EngineError::ResourceExhausted(_) => "53000",
        EngineError::Aborted(_) => "40001",
        EngineError::Internal(_) => "XX000",
    };
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        e.to_string(),
    )))
}

fn sql_err(e: crate::sql::SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}
