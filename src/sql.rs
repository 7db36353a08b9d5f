use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertListing {
        id: Ulid,
        name: Option<String>,
    },
    DeleteListing {
        id: Ulid,
    },
    InsertPeriod {
        id: Ulid,
        listing_id: Ulid,
        start_date: Ms,
        end_date: Ms,
        kind: PeriodKind,
    },
    DeletePeriod {
        id: Ulid,
    },
    InsertBooking {
        id: Ulid,
        listing_id: Ulid,
        start: Ms,
        end: Ms,
        label: Option<String>,
    },
    BatchInsertBookings {
        bookings: Vec<(Ulid, Ulid, Ms, Ms)>, // (id, listing_id, start, end)
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectListings,
    SelectPeriods {
        listing_id: Option<Ulid>,
    },
    SelectBookings {
        listing_id: Option<Ulid>,
    },
    /// `strategy: None` means the server's configured default.
    SelectAvailableListings {
        strategy: Option<Strategy>,
        start: Ms,
        end: Ms,
    },
}

/// Parse a single statement. Anything after the first `;` is ignored.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let mut commands = parse_statements(sql)?;
    Ok(commands.swap_remove(0))
}

/// Parse every `;`-separated statement, as sent in a simple query.
pub fn parse_statements(sql: &str) -> Result<Vec<Command>, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }
    stmts.iter().map(parse_statement).collect()
}

fn parse_statement(stmt: &Statement) -> Result<Command, SqlError> {
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let rows = extract_insert_rows(insert)?;

    match table.as_str() {
        "listings" => {
            let values = single_row(&rows, "listings", 1)?;
            Ok(Command::InsertListing {
                id: parse_ulid_expr(&values[0])?,
                name: optional(values, 1, parse_string_or_null)?.flatten(),
            })
        }
        "periods" => {
            let values = single_row(&rows, "periods", 4)?;
            Ok(Command::InsertPeriod {
                id: parse_ulid_expr(&values[0])?,
                listing_id: parse_ulid_expr(&values[1])?,
                start_date: parse_instant_expr(&values[2])?,
                end_date: parse_instant_expr(&values[3])?,
                kind: optional(values, 4, parse_kind_expr)?.unwrap_or(PeriodKind::Available),
            })
        }
        "bookings" if rows.len() == 1 => {
            let values = single_row(&rows, "bookings", 4)?;
            Ok(Command::InsertBooking {
                id: parse_ulid_expr(&values[0])?,
                listing_id: parse_ulid_expr(&values[1])?,
                start: parse_instant_expr(&values[2])?,
                end: parse_instant_expr(&values[3])?,
                label: optional(values, 4, parse_string_or_null)?.flatten(),
            })
        }
        "bookings" => {
            let mut bookings = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if row.len() < 4 {
                    return Err(SqlError::WrongArity("bookings row", 4, row.len()));
                }
                let at_row = |e: SqlError| SqlError::Parse(format!("row {i}: {e}"));
                bookings.push((
                    parse_ulid_expr(&row[0]).map_err(at_row)?,
                    parse_ulid_expr(&row[1]).map_err(at_row)?,
                    parse_instant_expr(&row[2]).map_err(at_row)?,
                    parse_instant_expr(&row[3]).map_err(at_row)?,
                ));
            }
            Ok(Command::BatchInsertBookings { bookings })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "listings" => Ok(Command::DeleteListing { id }),
        "periods" => Ok(Command::DeletePeriod { id }),
        "bookings" => Ok(Command::DeleteBooking { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Filters collected from a WHERE clause of `col = value` conjuncts.
#[derive(Default)]
struct SelectFilters {
    listing_id: Option<Ulid>,
    start: Option<Ms>,
    end: Option<Ms>,
    strategy: Option<Strategy>,
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = SelectFilters::default();
    if let Some(selection) = &select.selection {
        extract_filters(selection, &mut filters)?;
    }

    let fixed = match table.as_str() {
        "listings" => return Ok(Command::SelectListings),
        "periods" => {
            return Ok(Command::SelectPeriods {
                listing_id: filters.listing_id,
            });
        }
        "bookings" => {
            return Ok(Command::SelectBookings {
                listing_id: filters.listing_id,
            });
        }
        "available_listings" => None,
        "available_listings_v1" => Some(Strategy::Scan),
        "available_listings_v2" => Some(Strategy::Join),
        _ => return Err(SqlError::UnknownTable(table)),
    };

    Ok(Command::SelectAvailableListings {
        strategy: fixed.or(filters.strategy),
        start: filters.start.ok_or(SqlError::MissingFilter("start_date"))?,
        end: filters.end.ok_or(SqlError::MissingFilter("end_date"))?,
    })
}

fn extract_filters(expr: &Expr, filters: &mut SelectFilters) -> Result<(), SqlError> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return Err(SqlError::Unsupported(format!("WHERE clause: {expr}")));
    };
    let column = expr_column_name(left);
    match (op, column.as_deref()) {
        (ast::BinaryOperator::And, _) => {
            extract_filters(left, filters)?;
            extract_filters(right, filters)?;
        }
        (ast::BinaryOperator::Eq, Some("listing_id")) => {
            filters.listing_id = Some(parse_ulid_expr(right)?);
        }
        (ast::BinaryOperator::Eq | ast::BinaryOperator::GtEq, Some("start_date")) => {
            filters.start = Some(parse_instant_expr(right)?);
        }
        (ast::BinaryOperator::Eq | ast::BinaryOperator::LtEq, Some("end_date")) => {
            filters.end = Some(parse_instant_expr(right)?);
        }
        (ast::BinaryOperator::Eq, Some("strategy")) => {
            let name = parse_string_expr(right)?;
            let strategy = name.parse::<Strategy>().map_err(|e| SqlError::Parse(format!("{e}")))?;
            filters.strategy = Some(strategy);
        }
        _ => return Err(SqlError::Unsupported(format!("WHERE clause: {expr}"))),
    }
    Ok(())
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
    match tables_with_joins.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
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

fn extract_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) if values.rows.is_empty() => {
            Err(SqlError::Parse("empty VALUES".into()))
        }
        SetExpr::Values(values) => Ok(values.rows.clone()),
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn single_row<'a>(rows: &'a [Vec<Expr>], table: &'static str, min: usize) -> Result<&'a [Expr], SqlError> {
    if rows.len() > 1 {
        return Err(SqlError::Unsupported(format!("multi-row INSERT into {table}")));
    }
    let values = &rows[0];
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(values)
}

/// Parse the value at `index` if the row has one.
fn optional<T>(
    values: &[Expr],
    index: usize,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    values.get(index).map(parse).transpose()
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    match selection {
        Some(Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        }) if expr_column_name(left).as_deref() == Some("id") => parse_ulid_expr(right),
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

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => {
            Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
        }
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_kind_expr(expr: &Expr) -> Result<PeriodKind, SqlError> {
    Ok(PeriodKind::from(parse_string_expr(expr)?.as_str()))
}

/// An instant is either integer unix milliseconds or a quoted date
/// (`'2024-01-05'`, midnight UTC) or RFC 3339 timestamp.
fn parse_instant_expr(expr: &Expr) -> Result<Ms, SqlError> {
    match extract_value(expr) {
        Some(Value::Number(s, _)) => s
            .parse()
            .map_err(|e| SqlError::Parse(format!("bad timestamp {s}: {e}"))),
        Some(Value::SingleQuotedString(s)) => parse_instant(s)
            .or_else(|| s.parse().ok())
            .ok_or_else(|| SqlError::Parse(format!("bad date: {s}"))),
        Some(value) => Err(SqlError::Parse(format!("expected date, got {value:?}"))),
        None => match expr {
            Expr::UnaryOp {
                op: ast::UnaryOperator::Minus,
                expr,
            } => Ok(-parse_instant_expr(expr)?),
            _ => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
        },
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}
