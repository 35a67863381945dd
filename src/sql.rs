use sqlparser::ast::{
    self, Expr, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::{Ms, ReservationStatus, Source, TableShape};

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertTable {
        id: Ulid,
        capacity: i64,
        shape: Option<TableShape>,
        status: Option<String>,
    },
    InsertOrder {
        id: Ulid,
        table_id: Ulid,
        subtotal: i64,
    },
    InsertReservation {
        contact_name: String,
        contact_phone: String,
        contact_email: Option<String>,
        start: Ms,
        party_size: i64,
        duration_minutes: Option<i64>,
        notes: Option<String>,
        source: Option<Source>,
    },
    InsertCharge {
        order_id: Ulid,
        tip: Option<i64>,
    },
    UpdateReservationStatus {
        id: Ulid,
        status: ReservationStatus,
    },
    SelectAvailability {
        start: Ms,
        party_size: i64,
        duration_minutes: Option<i64>,
    },
    SelectTables,
    SelectReservations {
        start_min: Option<Ms>,
        start_max: Option<Ms>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').to_string();
        return Ok(Command::Listen { channel });
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "tables" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("tables", 2, values.len()));
            }
            let shape = if values.len() >= 3 {
                match parse_string_or_null(&values[2])? {
                    Some(s) => Some(
                        TableShape::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad shape: {s}")))?,
                    ),
                    None => None,
                }
            } else {
                None
            };
            let status = if values.len() >= 4 {
                parse_string_or_null(&values[3])?
            } else {
                None
            };
            Ok(Command::InsertTable {
                id: parse_ulid(&values[0])?,
                capacity: parse_i64(&values[1])?,
                shape,
                status,
            })
        }
        "orders" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("orders", 3, values.len()));
            }
            Ok(Command::InsertOrder {
                id: parse_ulid(&values[0])?,
                table_id: parse_ulid(&values[1])?,
                subtotal: parse_i64(&values[2])?,
            })
        }
        "reservations" => {
            if values.len() < 5 {
                return Err(SqlError::WrongArity("reservations", 5, values.len()));
            }
            let duration_minutes = if values.len() >= 6 {
                parse_i64_or_null(&values[5])?
            } else {
                None
            };
            let notes = if values.len() >= 7 {
                parse_string_or_null(&values[6])?
            } else {
                None
            };
            let source = if values.len() >= 8 {
                match parse_string_or_null(&values[7])? {
                    Some(s) => Some(
                        Source::parse(&s)
                            .ok_or_else(|| SqlError::Parse(format!("bad source: {s}")))?,
                    ),
                    None => None,
                }
            } else {
                None
            };
            Ok(Command::InsertReservation {
                contact_name: parse_string(&values[0])?,
                contact_phone: parse_string(&values[1])?,
                contact_email: parse_string_or_null(&values[2])?,
                start: parse_i64(&values[3])?,
                party_size: parse_i64(&values[4])?,
                duration_minutes,
                notes,
                source,
            })
        }
        "charges" => {
            if values.is_empty() {
                return Err(SqlError::WrongArity("charges", 1, 0));
            }
            let tip = if values.len() >= 2 {
                parse_i64_or_null(&values[1])?
            } else {
                None
            };
            Ok(Command::InsertCharge {
                order_id: parse_ulid(&values[0])?,
                tip,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: &Option<Expr>,
) -> Result<Command, SqlError> {
    let table = table_factor_name(&table.relation)?;
    if table != "reservations" {
        return Err(SqlError::UnknownTable(table));
    }

    let mut status = None;
    for assignment in assignments {
        let col = match &assignment.target {
            ast::AssignmentTarget::ColumnName(name) => object_name_last(name),
            _ => None,
        };
        if col.as_deref() == Some("status") {
            let raw = parse_string(&assignment.value)?;
            status = Some(
                ReservationStatus::parse(&raw)
                    .ok_or_else(|| SqlError::Parse(format!("bad status: {raw}")))?,
            );
        }
    }
    let status = status.ok_or(SqlError::MissingFilter("status"))?;
    let id = extract_where_id(selection)?;
    Ok(Command::UpdateReservationStatus { id, status })
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

    match table.as_str() {
        "availability" => {
            let (mut start, mut party_size, mut duration_minutes) = (None, None, None);
            if let Some(selection) = &select.selection {
                extract_availability_filters(
                    selection,
                    &mut start,
                    &mut party_size,
                    &mut duration_minutes,
                )?;
            }
            Ok(Command::SelectAvailability {
                start: start.ok_or(SqlError::MissingFilter("start"))?,
                party_size: party_size.ok_or(SqlError::MissingFilter("party_size"))?,
                duration_minutes,
            })
        }
        "tables" => Ok(Command::SelectTables),
        "reservations" => {
            let (mut start_min, mut start_max) = (None, None);
            if let Some(selection) = &select.selection {
                extract_reservation_filters(selection, &mut start_min, &mut start_max)?;
            }
            Ok(Command::SelectReservations {
                start_min,
                start_max,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn extract_availability_filters(
    expr: &Expr,
    start: &mut Option<Ms>,
    party_size: &mut Option<i64>,
    duration_minutes: &mut Option<i64>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_availability_filters(left, start, party_size, duration_minutes)?;
                extract_availability_filters(right, start, party_size, duration_minutes)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("start") => *start = Some(parse_i64_expr(right)?),
                Some("party_size") => *party_size = Some(parse_i64_expr(right)?),
                Some("duration_minutes") => *duration_minutes = Some(parse_i64_expr(right)?),
                _ => {}
            },
            _ => {}
        }
    }
    Ok(())
}

fn extract_reservation_filters(
    expr: &Expr,
    start_min: &mut Option<Ms>,
    start_max: &mut Option<Ms>,
) -> Result<(), SqlError> {
    if let Expr::BinaryOp { left, op, right } = expr {
        match op {
            ast::BinaryOperator::And => {
                extract_reservation_filters(left, start_min, start_max)?;
                extract_reservation_filters(right, start_min, start_max)?;
            }
            ast::BinaryOperator::GtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start_min = Some(parse_i64_expr(right)?);
                }
            }
            ast::BinaryOperator::LtEq => {
                if expr_column_name(left).as_deref() == Some("start") {
                    *start_max = Some(parse_i64_expr(right)?);
                }
            }
            _ => {}
        }
    }
    Ok(())
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ast::ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
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
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows[0].clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
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

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    parse_i64_expr(expr)
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_i64_expr(expr)?))
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => Ok(s.clone()),
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if let Some(Value::Null) = extract_value(expr) {
        Ok(None)
    } else {
        Ok(Some(parse_string(expr)?))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
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
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    #[test]
    fn parse_insert_table_minimal() {
        let sql = format!("INSERT INTO tables (id, capacity) VALUES ('{ID}', 4)");
        match parse_sql(&sql).unwrap() {
            Command::InsertTable {
                id,
                capacity,
                shape,
                status,
            } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(capacity, 4);
                assert_eq!(shape, None);
                assert_eq!(status, None);
            }
            cmd => panic!("expected InsertTable, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_table_full() {
        let sql =
            format!("INSERT INTO tables (id, capacity, shape, status) VALUES ('{ID}', 6, 'round', 'available')");
        match parse_sql(&sql).unwrap() {
            Command::InsertTable { shape, status, .. } => {
                assert_eq!(shape, Some(TableShape::Round));
                assert_eq!(status.as_deref(), Some("available"));
            }
            cmd => panic!("expected InsertTable, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_table_bad_shape_errors() {
        let sql = format!("INSERT INTO tables (id, capacity, shape) VALUES ('{ID}', 6, 'oval')");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_insert_order() {
        let sql = format!("INSERT INTO orders (id, table_id, subtotal) VALUES ('{ID}', '{ID}', 1800)");
        match parse_sql(&sql).unwrap() {
            Command::InsertOrder { subtotal, .. } => assert_eq!(subtotal, 1800),
            cmd => panic!("expected InsertOrder, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_minimal() {
        let sql = "INSERT INTO reservations (name, phone, email, start, party_size) \
                   VALUES ('Gilles', '555-0102', NULL, 1700000000000, 4)";
        match parse_sql(sql).unwrap() {
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
                assert_eq!(contact_name, "Gilles");
                assert_eq!(contact_phone, "555-0102");
                assert_eq!(contact_email, None);
                assert_eq!(start, 1_700_000_000_000);
                assert_eq!(party_size, 4);
                assert_eq!(duration_minutes, None);
                assert_eq!(notes, None);
                assert_eq!(source, None);
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_full() {
        let sql = "INSERT INTO reservations VALUES \
                   ('Gilles', '555-0102', 'g@example.com', 1700000000000, 4, 120, 'window seat', 'phone')";
        match parse_sql(sql).unwrap() {
            Command::InsertReservation {
                contact_email,
                duration_minutes,
                notes,
                source,
                ..
            } => {
                assert_eq!(contact_email.as_deref(), Some("g@example.com"));
                assert_eq!(duration_minutes, Some(120));
                assert_eq!(notes.as_deref(), Some("window seat"));
                assert_eq!(source, Some(Source::Phone));
            }
            cmd => panic!("expected InsertReservation, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_reservation_too_few_values() {
        let sql = "INSERT INTO reservations (name, phone) VALUES ('Gilles', '555-0102')";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::WrongArity("reservations", 5, 2))
        ));
    }

    #[test]
    fn parse_insert_charge() {
        let sql = format!("INSERT INTO charges (order_id, tip) VALUES ('{ID}', 300)");
        match parse_sql(&sql).unwrap() {
            Command::InsertCharge { order_id, tip } => {
                assert_eq!(order_id.to_string(), ID);
                assert_eq!(tip, Some(300));
            }
            cmd => panic!("expected InsertCharge, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_charge_without_tip() {
        let sql = format!("INSERT INTO charges (order_id) VALUES ('{ID}')");
        match parse_sql(&sql).unwrap() {
            Command::InsertCharge { tip, .. } => assert_eq!(tip, None),
            cmd => panic!("expected InsertCharge, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_reservation_status() {
        let sql = format!("UPDATE reservations SET status = 'seated' WHERE id = '{ID}'");
        match parse_sql(&sql).unwrap() {
            Command::UpdateReservationStatus { id, status } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(status, ReservationStatus::Seated);
            }
            cmd => panic!("expected UpdateReservationStatus, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_update_without_id_errors() {
        let sql = "UPDATE reservations SET status = 'seated'";
        assert!(matches!(parse_sql(sql), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn parse_update_bad_status_errors() {
        let sql = format!("UPDATE reservations SET status = 'eating' WHERE id = '{ID}'");
        assert!(parse_sql(&sql).is_err());
    }

    #[test]
    fn parse_select_availability() {
        let sql = "SELECT * FROM availability WHERE start = 1700000000000 AND party_size = 2";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability {
                start,
                party_size,
                duration_minutes,
            } => {
                assert_eq!(start, 1_700_000_000_000);
                assert_eq!(party_size, 2);
                assert_eq!(duration_minutes, None);
            }
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_with_duration() {
        let sql = "SELECT * FROM availability WHERE start = 1000 AND party_size = 2 AND duration_minutes = 45";
        match parse_sql(sql).unwrap() {
            Command::SelectAvailability {
                duration_minutes, ..
            } => assert_eq!(duration_minutes, Some(45)),
            cmd => panic!("expected SelectAvailability, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_select_availability_missing_party_size() {
        let sql = "SELECT * FROM availability WHERE start = 1000";
        assert!(matches!(
            parse_sql(sql),
            Err(SqlError::MissingFilter("party_size"))
        ));
    }

    #[test]
    fn parse_select_tables() {
        assert_eq!(parse_sql("SELECT * FROM tables").unwrap(), Command::SelectTables);
    }

    #[test]
    fn parse_select_reservations_with_range() {
        let sql = "SELECT * FROM reservations WHERE start >= 1000 AND start <= 2000";
        match parse_sql(sql).unwrap() {
            Command::SelectReservations {
                start_min,
                start_max,
            } => {
                assert_eq!(start_min, Some(1000));
                assert_eq!(start_max, Some(2000));
            }
            cmd => panic!("expected SelectReservations, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_listen() {
        match parse_sql("LISTEN reservations").unwrap() {
            Command::Listen { channel } => assert_eq!(channel, "reservations"),
            cmd => panic!("expected Listen, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
    }

    #[test]
    fn parse_delete_unsupported() {
        let sql = format!("DELETE FROM reservations WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
