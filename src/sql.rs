use sqlparser::ast::{
    self, Assignment, AssignmentTarget, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::engine::validate::{EventForm, ResourceForm};
use crate::model::Id;

const RESOURCE_COLUMNS: [&str; 2] = ["resource_name", "resource_type"];
const EVENT_COLUMNS: [&str; 5] = ["title", "start_time", "end_time", "description", "resources"];

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertResource {
        form: ResourceForm,
        returning: bool,
    },
    UpdateResource {
        id: Id,
        form: ResourceForm,
    },
    DeleteResource {
        id: Id,
    },
    InsertEvent {
        form: EventForm,
        returning: bool,
    },
    UpdateEvent {
        id: Id,
        form: EventForm,
    },
    DeleteEvent {
        id: Id,
    },
    SelectResources {
        id: Option<Id>,
    },
    SelectEvents {
        id: Option<Id>,
    },
    SelectAllocations {
        event_id: Option<Id>,
        resource_id: Option<Id>,
    },
    CheckConflicts {
        start_time: Option<String>,
        end_time: Option<String>,
        resources: Option<String>,
        event_id: Option<Id>,
    },
    SelectConflicts,
    SelectUtilisation {
        start_date: Option<String>,
        end_date: Option<String>,
    },
    SelectUpcoming {
        start_date: Option<String>,
        end_date: Option<String>,
    },
    SelectDashboard,
}

/// Shape of the rows a statement produces, known before it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Resources,
    Events,
    Allocations,
    ConflictCheck,
    Conflicts,
    Utilisation,
    Upcoming,
    Dashboard,
    /// `INSERT ... RETURNING`: a single `id` column.
    Id,
}

/// Parse the first statement of `sql`.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut stmts = parse_statements(sql)?;
    command(stmts.swap_remove(0))
}

/// Parse every `;`-separated statement, as sent in one simple query.
pub fn parse_batch(sql: &str) -> Result<Vec<Command>, SqlError> {
    parse_statements(sql)?.into_iter().map(command).collect()
}

fn command(stmt: Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(&insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(&table.relation, &assignments, &selection),
        Statement::Delete(delete) => parse_delete(&delete),
        Statement::Query(query) => parse_select(&query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Result shape of `sql` without evaluating any values, so statements with
/// unbound `$n` placeholders can be described.
pub fn describe(sql: &str) -> Option<Output> {
    match parse_statements(sql).ok()?.swap_remove(0) {
        Statement::Insert(insert) if insert.returning.is_some() => Some(Output::Id),
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let table = table_factor_name(&select.from.first()?.relation).ok()?;
            match table.as_str() {
                "resources" => Some(Output::Resources),
                "events" => Some(Output::Events),
                "allocations" => Some(Output::Allocations),
                "conflict_check" => Some(Output::ConflictCheck),
                "conflicts" => Some(Output::Conflicts),
                "utilisation" => Some(Output::Utilisation),
                "upcoming" => Some(Output::Upcoming),
                "dashboard" => Some(Output::Dashboard),
                _ => None,
            }
        }
        _ => None,
    }
}

/// Never returns an empty list.
fn parse_statements(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(stmts)
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;
    let returning = insert.returning.is_some();

    let defaults: &[&str] = match table.as_str() {
        "resources" => &RESOURCE_COLUMNS,
        "events" => &EVENT_COLUMNS,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() > columns.len() {
        return Err(SqlError::WrongArity("VALUES", columns.len(), values.len()));
    }
    let pairs: Vec<(&str, &Expr)> = columns.iter().map(String::as_str).zip(&values).collect();

    match table.as_str() {
        "resources" => Ok(Command::InsertResource {
            form: resource_form(&pairs)?,
            returning,
        }),
        _ => Ok(Command::InsertEvent {
            form: event_form(&pairs)?,
            returning,
        }),
    }
}

fn parse_update(
    relation: &TableFactor,
    assignments: &[Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(relation)?;
    let id = extract_where_id(selection)?;

    let mut pairs = Vec::with_capacity(assignments.len());
    for assignment in assignments {
        let column = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name)
                .ok_or_else(|| SqlError::Parse("empty column name".into()))?,
            AssignmentTarget::Tuple(_) => {
                return Err(SqlError::Unsupported("tuple assignment".into()));
            }
        };
        pairs.push((column, &assignment.value));
    }
    let pairs: Vec<(&str, &Expr)> = pairs.iter().map(|(c, v)| (c.as_str(), *v)).collect();

    match table.as_str() {
        "resources" => Ok(Command::UpdateResource {
            id,
            form: resource_form(&pairs)?,
        }),
        "events" => Ok(Command::UpdateEvent {
            id,
            form: event_form(&pairs)?,
        }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "resources" => Ok(Command::DeleteResource { id }),
        "events" => Ok(Command::DeleteEvent { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }
    let mut filters = Filters(filters);

    let cmd = match table.as_str() {
        "resources" => Command::SelectResources {
            id: filters.id("id")?,
        },
        "events" => Command::SelectEvents {
            id: filters.id("id")?,
        },
        "allocations" => Command::SelectAllocations {
            event_id: filters.id("event_id")?,
            resource_id: filters.id("resource_id")?,
        },
        "conflict_check" => Command::CheckConflicts {
            start_time: filters.text("start_time")?,
            end_time: filters.text("end_time")?,
            resources: filters.text("resources")?,
            event_id: filters.id("event_id")?,
        },
        "conflicts" => Command::SelectConflicts,
        "utilisation" => Command::SelectUtilisation {
            start_date: filters.text("start_date")?,
            end_date: filters.text("end_date")?,
        },
        "upcoming" => Command::SelectUpcoming {
            start_date: filters.text("start_date")?,
            end_date: filters.text("end_date")?,
        },
        "dashboard" => Command::SelectDashboard,
        _ => return Err(SqlError::UnknownTable(table)),
    };
    filters.finish()?;
    Ok(cmd)
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_filters(expr: &Expr, out: &mut Vec<(String, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            let col = expr_column_name(left)
                .ok_or_else(|| SqlError::Parse(format!("expected column, got {left}")))?;
            out.push((col, right.as_ref().clone()));
            Ok(())
        }
        Expr::Nested(inner) => collect_filters(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

/// WHERE equalities not yet claimed by the command being built.
struct Filters(Vec<(String, Expr)>);

impl Filters {
    fn take(&mut self, column: &str) -> Option<Expr> {
        let pos = self.0.iter().position(|(c, _)| c == column)?;
        Some(self.0.remove(pos).1)
    }

    fn id(&mut self, column: &str) -> Result<Option<Id>, SqlError> {
        self.take(column).map(|e| parse_id_expr(&e)).transpose()
    }

    fn text(&mut self, column: &str) -> Result<Option<String>, SqlError> {
        self.take(column).map(|e| parse_text_expr(&e)).transpose()
    }

    fn finish(self) -> Result<(), SqlError> {
        match self.0.into_iter().next() {
            Some((column, _)) => Err(SqlError::UnknownColumn(column)),
            None => Ok(()),
        }
    }
}

fn resource_form(pairs: &[(&str, &Expr)]) -> Result<ResourceForm, SqlError> {
    let mut form = ResourceForm::default();
    for &(column, value) in pairs {
        match column {
            "resource_name" => form.name = Some(parse_text_expr(value)?),
            "resource_type" => form.kind = Some(parse_text_expr(value)?),
            _ => return Err(SqlError::UnknownColumn(column.to_string())),
        }
    }
    Ok(form)
}

fn event_form(pairs: &[(&str, &Expr)]) -> Result<EventForm, SqlError> {
    let mut form = EventForm::default();
    for &(column, value) in pairs {
        match column {
            "title" => form.title = Some(parse_text_expr(value)?),
            "start_time" => form.start_time = Some(parse_text_expr(value)?),
            "end_time" => form.end_time = Some(parse_text_expr(value)?),
            "description" => form.description = Some(parse_text_or_null(value)?),
            "resources" => form.resources = Some(parse_text_expr(value)?),
            _ => return Err(SqlError::UnknownColumn(column.to_string())),
        }
    }
    Ok(form)
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Id, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_id_expr(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_id_expr(expr: &Expr) -> Result<Id, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|_| SqlError::Parse(format!("bad id: {s}"))),
            _ => Err(SqlError::Parse(format!("expected id, got {value}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        parse_id_expr(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse(format!("id out of range: -{expr}")))
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr}")))
    }
}

/// Text column value. NULL reads as empty, which validation treats as missing.
fn parse_text_expr(expr: &Expr) -> Result<String, SqlError> {
    Ok(parse_text_or_null(expr)?.unwrap_or_default())
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(
            Value::SingleQuotedString(s)
            | Value::DoubleQuotedString(s)
            | Value::EscapedStringLiteral(s)
            | Value::Number(s, _),
        ) => Ok(Some(s.clone())),
        Some(other) => Err(SqlError::Parse(format!("expected string, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected at most {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
