use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
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
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use serde_json::json;
use tokio::net::TcpStream;

use crate::auth::BookdAuthSource;
use crate::datetime::format_timestamp;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command, Output, SqlError};

pub struct BookdHandler {
    engine: Arc<Engine>,
    query_parser: Arc<BookdQueryParser>,
}

impl BookdHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(BookdQueryParser),
        }
    }

    /// Run each statement in turn. Statements are committed one by one;
    /// the first failure stops the batch.
    async fn run_batch(&self, sql: &str) -> PgWireResult<Vec<Response>> {
        let mut responses = Vec::new();
        for cmd in sql::parse_batch(sql).map_err(sql_err)? {
            responses.extend(self.run(cmd, &Format::UnifiedText).await?);
        }
        Ok(responses)
    }

    async fn run(&self, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let label = observability::command_label(&cmd);
        let start = Instant::now();
        let result = self.execute_command(cmd, format).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status)
            .increment(1);
        result
    }

    /// `format` is the result column format requested by the client.
    async fn execute_command(&self, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::InsertResource { form, returning } => {
                let id = engine.create_resource(form).await.map_err(engine_err)?;
                Ok(vec![inserted(id, returning, format)?])
            }
            Command::UpdateResource { id, form } => {
                engine.update_resource(id, form).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteResource { id } => {
                engine.delete_resource(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertEvent { form, returning } => {
                let id = engine.create_event(form).await.map_err(engine_err)?;
                Ok(vec![inserted(id, returning, format)?])
            }
            Command::UpdateEvent { id, form } => {
                engine.update_event(id, form).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("UPDATE").with_rows(1))])
            }
            Command::DeleteEvent { id } => {
                engine.delete_event(id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::SelectResources { id } => {
                let resources = match id {
                    Some(id) => vec![engine.get_resource(id).await.map_err(engine_err)?],
                    None => engine.list_resources().await,
                };
                rows(Output::Resources, format, resources, |enc, r| {
                    enc.encode_field(&r.id)?;
                    enc.encode_field(&r.name)?;
                    enc.encode_field(&r.kind)
                })
            }
            Command::SelectEvents { id } => {
                let events = match id {
                    Some(id) => vec![engine.get_event(id).await.map_err(engine_err)?],
                    None => engine.list_events().await,
                };
                rows(Output::Events, format, events, |enc, info| {
                    let e = &info.event;
                    enc.encode_field(&e.id)?;
                    enc.encode_field(&e.title)?;
                    enc.encode_field(&format_timestamp(e.start))?;
                    enc.encode_field(&format_timestamp(e.end))?;
                    enc.encode_field(&e.description)?;
                    enc.encode_field(&id_list(&info.resource_ids))?;
                    enc.encode_field(&e.duration_hours())
                })
            }
            Command::SelectAllocations {
                event_id,
                resource_id,
            } => {
                let allocations = engine.list_allocations(event_id, resource_id).await;
                rows(Output::Allocations, format, allocations, |enc, a| {
                    enc.encode_field(&a.id)?;
                    enc.encode_field(&a.event_id)?;
                    enc.encode_field(&a.resource_id)
                })
            }
            Command::CheckConflicts {
                start_time,
                end_time,
                resources,
                event_id,
            } => {
                let messages = engine
                    .check(
                        start_time.as_deref(),
                        end_time.as_deref(),
                        resources.as_deref(),
                        event_id,
                    )
                    .await
                    .map_err(engine_err)?;
                rows(Output::ConflictCheck, format, messages, |enc, m| enc.encode_field(&m))
            }
            Command::SelectConflicts => {
                let pairs = engine.conflicts().await;
                rows(Output::Conflicts, format, pairs, |enc, p| {
                    enc.encode_field(&p.resource_id)?;
                    enc.encode_field(&p.resource_name)?;
                    for e in [&p.first, &p.second] {
                        enc.encode_field(&e.id)?;
                        enc.encode_field(&e.title)?;
                        enc.encode_field(&format_timestamp(e.start))?;
                        enc.encode_field(&format_timestamp(e.end))?;
                    }
                    Ok(())
                })
            }
            Command::SelectUtilisation {
                start_date,
                end_date,
            } => {
                let report = engine
                    .utilisation(start_date.as_deref(), end_date.as_deref())
                    .await
                    .map_err(engine_err)?;
                rows(Output::Utilisation, format, report.resources, |enc, r| {
                    let upcoming: Vec<_> = r.upcoming.iter().map(event_json).collect();
                    enc.encode_field(&r.resource.id)?;
                    enc.encode_field(&r.resource.name)?;
                    enc.encode_field(&r.resource.kind)?;
                    enc.encode_field(&r.total_hours)?;
                    enc.encode_field(&serde_json::Value::Array(upcoming).to_string())
                })
            }
            Command::SelectUpcoming {
                start_date,
                end_date,
            } => {
                let report = engine
                    .utilisation(start_date.as_deref(), end_date.as_deref())
                    .await
                    .map_err(engine_err)?;
                rows(Output::Upcoming, format, report.upcoming, |enc, u| {
                    enc.encode_field(&u.resource.id)?;
                    enc.encode_field(&u.resource.name)?;
                    enc.encode_field(&u.event.id)?;
                    enc.encode_field(&u.event.title)?;
                    enc.encode_field(&format_timestamp(u.event.start))?;
                    enc.encode_field(&format_timestamp(u.event.end))
                })
            }
            Command::SelectDashboard => {
                let dash = engine.dashboard().await;
                let next: Vec<_> = dash.next_events.iter().map(event_json).collect();
                rows(Output::Dashboard, format, [dash], |enc, d| {
                    enc.encode_field(&(d.events_count as i64))?;
                    enc.encode_field(&(d.resources_count as i64))?;
                    enc.encode_field(&serde_json::Value::Array(next.clone()).to_string())
                })
            }
        }
    }
}

/// Encode `items` into a single query response with the columns of `output`.
fn rows<T>(
    output: Output,
    format: &Format,
    items: impl IntoIterator<Item = T>,
    mut encode: impl FnMut(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(with_format(schema(output), format));
    let data: Vec<PgWireResult<DataRow>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(
        schema,
        stream::iter(data),
    ))])
}

fn inserted(id: Id, returning: bool, format: &Format) -> PgWireResult<Response> {
    if !returning {
        return Ok(Response::Execution(Tag::new("INSERT").with_rows(1)));
    }
    let mut responses = rows(Output::Id, format, [id], |enc, id| enc.encode_field(&id))?;
    Ok(responses.remove(0))
}

fn event_json(e: &Event) -> serde_json::Value {
    json!({
        "id": e.id,
        "title": e.title,
        "start_time": format_timestamp(e.start),
        "end_time": format_timestamp(e.end),
        "description": e.description,
    })
}

fn id_list(ids: &[Id]) -> String {
    ids.iter().map(Id::to_string).collect::<Vec<_>>().join(",")
}

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn schema(output: Output) -> Vec<FieldInfo> {
    match output {
        Output::Resources => vec![
            field("id", Type::INT8),
            field("resource_name", Type::VARCHAR),
            field("resource_type", Type::VARCHAR),
        ],
        Output::Events => vec![
            field("id", Type::INT8),
            field("title", Type::VARCHAR),
            field("start_time", Type::VARCHAR),
            field("end_time", Type::VARCHAR),
            field("description", Type::VARCHAR),
            field("resources", Type::VARCHAR),
            field("duration_hours", Type::FLOAT8),
        ],
        Output::Allocations => vec![
            field("id", Type::INT8),
            field("event_id", Type::INT8),
            field("resource_id", Type::INT8),
        ],
        Output::ConflictCheck => vec![field("message", Type::VARCHAR)],
        Output::Conflicts => vec![
            field("resource_id", Type::INT8),
            field("resource_name", Type::VARCHAR),
            field("first_event_id", Type::INT8),
            field("first_title", Type::VARCHAR),
            field("first_start_time", Type::VARCHAR),
            field("first_end_time", Type::VARCHAR),
            field("second_event_id", Type::INT8),
            field("second_title", Type::VARCHAR),
            field("second_start_time", Type::VARCHAR),
            field("second_end_time", Type::VARCHAR),
        ],
        Output::Utilisation => vec![
            field("resource_id", Type::INT8),
            field("resource_name", Type::VARCHAR),
            field("resource_type", Type::VARCHAR),
            field("total_hours", Type::FLOAT8),
            field("upcoming", Type::JSON),
        ],
        Output::Upcoming => vec![
            field("resource_id", Type::INT8),
            field("resource_name", Type::VARCHAR),
            field("event_id", Type::INT8),
            field("title", Type::VARCHAR),
            field("start_time", Type::VARCHAR),
            field("end_time", Type::VARCHAR),
        ],
        Output::Dashboard => vec![
            field("events_count", Type::INT8),
            field("resources_count", Type::INT8),
            field("next_events", Type::JSON),
        ],
        Output::Id => vec![field("id", Type::INT8)],
    }
}

/// Re-tag `fields` with the per-column format a client asked for in Bind.
/// Columns past the end of an explicit format list fall back to text.
fn with_format(fields: Vec<FieldInfo>, format: &Format) -> Vec<FieldInfo> {
    fields
        .into_iter()
        .enumerate()
        .map(|(idx, f)| {
            FieldInfo::new(f.name().into(), None, None, f.datatype().clone(), format_at(format, idx))
        })
        .collect()
}

fn result_schema(sql: &str, format: Option<&Format>) -> Vec<FieldInfo> {
    let fields = sql::describe(sql).map(schema).unwrap_or_default();
    match format {
        Some(format) => with_format(fields, format),
        None => fields,
    }
}

#[async_trait]
impl SimpleQueryHandler for BookdHandler {
    async fn do_query<C>(
        &self,
        _client: &mut C,
        query: &str,
    ) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        self.run_batch(query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct BookdQueryParser;

#[async_trait]
impl QueryParser for BookdQueryParser {
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
        column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format))
    }
}

#[async_trait]
impl ExtendedQueryHandler for BookdHandler {
    type Statement = String;
    type QueryParser = BookdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        let mut responses = self.run(cmd, &portal.result_column_format).await?;
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
        // Types the client declared in Parse win; the rest are text.
        let count = count_params(&target.statement).max(target.parameter_types.len());
        let param_types = (0..count)
            .map(|idx| {
                target
                    .parameter_types
                    .get(idx)
                    .cloned()
                    .flatten()
                    .unwrap_or(Type::VARCHAR)
            })
            .collect();
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, None),
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
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            Some(&target.result_column_format),
        )))
    }
}

/// A statement split on `$n` placeholders. `$` inside a quoted literal is text.
#[derive(Debug, PartialEq)]
enum Piece<'a> {
    Text(&'a str),
    Param(usize),
}

fn split_placeholders(sql: &str) -> Vec<Piece<'_>> {
    let bytes = sql.as_bytes();
    let mut pieces = Vec::new();
    let mut text_start = 0;
    let mut in_quote = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\'' => {
                in_quote = !in_quote;
                i += 1;
            }
            b'$' if !in_quote => {
                let digits = i + 1;
                let mut end = digits;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                match sql[digits..end].parse::<usize>() {
                    Ok(n) if n > 0 => {
                        pieces.push(Piece::Text(&sql[text_start..i]));
                        pieces.push(Piece::Param(n));
                        text_start = end;
                    }
                    _ => {}
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    pieces.push(Piece::Text(&sql[text_start..]));
    pieces
}

/// Highest `$n` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    split_placeholders(sql)
        .into_iter()
        .filter_map(|piece| match piece {
            Piece::Param(n) => Some(n),
            Piece::Text(_) => None,
        })
        .max()
        .unwrap_or(0)
}

/// Replace placeholders with quoted literals in a single pass over the
/// statement. Bound text is never rescanned, so a value containing `$1`
/// stays as written. Placeholders with no bound value are left in place.
fn bind_params(sql: &str, values: &[Option<String>]) -> String {
    let mut out = String::with_capacity(sql.len());
    for piece in split_placeholders(sql) {
        match piece {
            Piece::Text(text) => out.push_str(text),
            Piece::Param(n) => match values.get(n - 1) {
                Some(Some(value)) => {
                    out.push('\'');
                    out.push_str(&value.replace('\'', "''"));
                    out.push('\'');
                }
                Some(None) => out.push_str("NULL"),
                None => {
                    out.push('$');
                    out.push_str(&n.to_string());
                }
            },
        }
    }
    out
}

/// Format of column or parameter `idx`; an explicit list that is too short means text.
fn format_at(format: &Format, idx: usize) -> FieldFormat {
    match format {
        Format::Individual(codes) if idx >= codes.len() => FieldFormat::Text,
        _ => format.format_for(idx),
    }
}

/// Text of one bound value. Binary integers are decoded by their declared
/// type; everything else is read as UTF-8, which is also the binary form of
/// the text types.
fn param_text(bytes: &[u8], format: FieldFormat, ty: Option<&Type>) -> String {
    if format == FieldFormat::Binary {
        let int = match ty {
            Some(t) if *t == Type::INT8 => <[u8; 8]>::try_from(bytes).ok().map(i64::from_be_bytes),
            Some(t) if *t == Type::INT4 => <[u8; 4]>::try_from(bytes)
                .ok()
                .map(|b| i64::from(i32::from_be_bytes(b))),
            Some(t) if *t == Type::INT2 => <[u8; 2]>::try_from(bytes)
                .ok()
                .map(|b| i64::from(i16::from_be_bytes(b))),
            _ => None,
        };
        if let Some(n) = int {
            return n.to_string();
        }
    }
    String::from_utf8_lossy(bytes).into_owned()
}

fn substitute_params(portal: &Portal<String>) -> String {
    let stmt = &portal.statement;
    let values: Vec<Option<String>> = portal
        .parameters
        .iter()
        .enumerate()
        .map(|(idx, param)| {
            param.as_ref().map(|bytes| {
                let ty = stmt.parameter_types.get(idx).and_then(Option::as_ref);
                param_text(bytes, format_at(&portal.parameter_format, idx), ty)
            })
        })
        .collect();
    bind_params(&stmt.statement, &values)
}

// ── Factory ──────────────────────────────────────────────────────

pub struct BookdFactory {
    handler: Arc<BookdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<BookdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl BookdFactory {
    pub fn new(engine: Arc<Engine>, password: String) -> Self {
        let auth_source = BookdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(BookdHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                param_provider,
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for BookdFactory {
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

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    password: String,
) -> io::Result<()> {
    let factory = BookdFactory::new(engine, password);
    pgwire::tokio::process_socket(socket, None, factory).await
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::NotFound { .. } => "P0002",
        EngineError::Conflicts(_) => "23P01",
        EngineError::InvalidRange { .. } => "22007",
        EngineError::Invalid(_) => "22023",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    if let EngineError::WalError(msg) = &e {
        tracing::error!("WAL failure: {msg}");
    }
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        sqlstate(&e).into(),
        e.to_string(),
    )))
}

fn sql_err(e: SqlError) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        "42601".into(),
        e.to_string(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM events"), 0);
        assert_eq!(
            count_params("SELECT * FROM conflict_check WHERE start_time = $1 AND end_time = $2"),
            2
        );
        assert_eq!(count_params("UPDATE events SET title = $10 WHERE id = $2"), 10);
        assert_eq!(count_params("SELECT * FROM events WHERE title = 'costs $9'"), 0);
    }

    fn bound(values: &[Option<&str>]) -> Vec<Option<String>> {
        values.iter().map(|v| v.map(str::to_string)).collect()
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO resources (resource_type, resource_name) VALUES ($1, $2)";
        assert_eq!(
            bind_params(sql, &bound(&[Some("room"), Some("Desk $1")])),
            "INSERT INTO resources (resource_type, resource_name) VALUES ('room', 'Desk $1')"
        );
        assert_eq!(
            bind_params("VALUES ($2, $1)", &bound(&[Some("$2"), Some("a', 'b")])),
            "VALUES ('a'', ''b', '$2')"
        );
    }

    #[test]
    fn bind_handles_nulls_and_wide_placeholders() {
        let values: Vec<Option<String>> = (1..=10).map(|n| Some(n.to_string())).collect();
        assert_eq!(bind_params("$10 $1", &values), "'10' '1'");
        assert_eq!(bind_params("x = $1", &bound(&[None])), "x = NULL");
        assert_eq!(bind_params("x = $2", &bound(&[Some("a")])), "x = $2");
        assert_eq!(bind_params("x = '$1' AND y = $1", &bound(&[Some("a")])), "x = '$1' AND y = 'a'");
        assert_eq!(bind_params("price $ 5", &bound(&[])), "price $ 5");
    }

    #[test]
    fn binary_integer_params_are_decoded() {
        let bytes = 42i64.to_be_bytes();
        assert_eq!(param_text(&bytes, FieldFormat::Binary, Some(&Type::INT8)), "42");
        assert_eq!(
            param_text(&(-7i32).to_be_bytes(), FieldFormat::Binary, Some(&Type::INT4)),
            "-7"
        );
        assert_eq!(param_text(b"Room A", FieldFormat::Binary, Some(&Type::VARCHAR)), "Room A");
        assert_eq!(param_text(b"12", FieldFormat::Text, Some(&Type::INT8)), "12");
    }

    #[test]
    fn schemas_match_describe() {
        assert_eq!(
            result_schema("SELECT * FROM utilisation WHERE start_date = $1", None).len(),
            5
        );
        assert!(result_schema("DELETE FROM events WHERE id = $1", None).is_empty());
        assert_eq!(schema(Output::Id).len(), 1);
    }

    #[test]
    fn result_formats_follow_bind() {
        let binary = result_schema("SELECT * FROM resources", Some(&Format::UnifiedBinary));
        assert!(binary.iter().all(|f| f.format() == FieldFormat::Binary));

        let mixed = result_schema("SELECT * FROM resources", Some(&Format::Individual(vec![1, 0])));
        let formats: Vec<_> = mixed.iter().map(|f| f.format()).collect();
        assert_eq!(
            formats,
            vec![FieldFormat::Binary, FieldFormat::Text, FieldFormat::Text]
        );
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        let cases = [
            (
                EngineError::NotFound {
                    kind: crate::engine::EntityKind::Event,
                    id: 1,
                },
                "P0002",
            ),
            (EngineError::Conflicts(vec![]), "23P01"),
            (EngineError::InvalidRange { start: 1, end: 0 }, "22007"),
            (EngineError::Invalid(vec![]), "22023"),
            (EngineError::LimitExceeded("x"), "54000"),
            (EngineError::WalError("x".into()), "58030"),
        ];
        for (err, code) in cases {
            assert_eq!(sqlstate(&err), code);
        }
    }

    #[test]
    fn event_json_uses_form_timestamps() {
        let e = Event {
            id: 3,
            title: "Review".into(),
            start: 0,
            end: MS_PER_HOUR,
            description: None,
        };
        let v = event_json(&e);
        assert_eq!(v["start_time"], "1970-01-01T00:00");
        assert_eq!(v["end_time"], "1970-01-01T01:00");
        assert!(v["description"].is_null());
    }
}
