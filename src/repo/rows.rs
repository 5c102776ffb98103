use serde_json::{Map, Value};
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{Column as _, Row, Sqlite, SqliteConnection, TypeInfo, ValueRef};

use super::ListFilter;
use crate::entity::Entity;
use crate::error::{LedgerError, LedgerResult};
use crate::ledger::integrity::DUPLICATE;
use crate::policy::Scope;
use crate::schema::ColumnKind;

/// A row as a JSON object keyed by column name.
pub type Record = Map<String, Value>;

fn decode_by_type(row: &SqliteRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "INTEGER" => row
            .try_get::<i64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        "REAL" => row
            .try_get::<f64, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
        _ => row
            .try_get::<String, _>(idx)
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

fn decode_value(row: &SqliteRow, idx: usize, kind: Option<ColumnKind>, type_name: &str) -> Value {
    let decoded = match kind {
        Some(ColumnKind::Flag) => row.try_get::<i64, _>(idx).ok().map(|v| Value::Bool(v != 0)),
        Some(ColumnKind::Real) => row
            .try_get::<f64, _>(idx)
            .ok()
            .or_else(|| row.try_get::<i64, _>(idx).ok().map(|v| v as f64))
            .map(Value::from),
        Some(ColumnKind::Integer) => row.try_get::<i64, _>(idx).ok().map(Value::from),
        Some(ColumnKind::Text | ColumnKind::Timestamp | ColumnKind::Choice(_)) => {
            row.try_get::<String, _>(idx).ok().map(Value::from)
        }
        None => None,
    };
    decoded.unwrap_or_else(|| decode_by_type(row, idx, type_name))
}

/// Decode a row using the catalog kinds, so flags come back as booleans.
pub fn row_to_record(entity: Entity, row: &SqliteRow) -> Record {
    let mut map = Map::new();
    for col in row.columns() {
        let idx = col.ordinal();
        let value = match row.try_get_raw(idx) {
            Ok(raw) if !raw.is_null() => {
                let type_name = raw.type_info().name().to_string();
                let kind = entity.column(col.name()).map(|c| c.kind);
                decode_value(row, idx, kind, &type_name)
            }
            _ => Value::Null,
        };
        map.insert(col.name().to_string(), value);
    }
    map
}

pub fn bind_value<'q>(
    q: Query<'q, Sqlite, SqliteArguments<'q>>,
    v: &Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match v {
        Value::Null => q.bind(Option::<i64>::None),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                q.bind(i)
            } else if let Some(f) = n.as_f64() {
                q.bind(f)
            } else {
                q.bind(Option::<i64>::None)
            }
        }
        Value::Bool(b) => q.bind(*b as i64),
        Value::String(s) => q.bind(s.clone()),
        _ => q.bind(v.to_string()),
    }
}

pub async fn fetch_row(
    conn: &mut SqliteConnection,
    entity: Entity,
    id: &str,
) -> Result<Option<Record>, sqlx::Error> {
    let sql = format!("SELECT * FROM {} WHERE id = ?", entity.table());
    let row = sqlx::query(&sql).bind(id).fetch_optional(&mut *conn).await?;
    Ok(row.map(|r| row_to_record(entity, &r)))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn duplicate(entity: Entity) -> LedgerError {
    LedgerError::integrity(DUPLICATE, format!("{entity} already exists"))
}

pub async fn insert_row(
    conn: &mut SqliteConnection,
    entity: Entity,
    record: &Record,
) -> LedgerResult<()> {
    let cols: Vec<&String> = record.keys().collect();
    let placeholders: Vec<&str> = cols.iter().map(|_| "?").collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        entity.table(),
        cols.iter().map(|c| c.as_str()).collect::<Vec<_>>().join(","),
        placeholders.join(",")
    );
    let mut query = sqlx::query(&sql);
    for value in record.values() {
        query = bind_value(query, value);
    }
    match query.execute(&mut *conn).await {
        Ok(_) => Ok(()),
        Err(err) if is_unique_violation(&err) => Err(duplicate(entity)),
        Err(err) => Err(err.into()),
    }
}

pub async fn update_row(
    conn: &mut SqliteConnection,
    entity: Entity,
    id: &str,
    changes: &Record,
) -> LedgerResult<u64> {
    if changes.is_empty() {
        return Ok(0);
    }
    let set_clause: Vec<String> = changes.keys().map(|c| format!("{c} = ?")).collect();
    let sql = format!(
        "UPDATE {} SET {} WHERE id = ?",
        entity.table(),
        set_clause.join(",")
    );
    let mut query = sqlx::query(&sql);
    for value in changes.values() {
        query = bind_value(query, value);
    }
    match query.bind(id).execute(&mut *conn).await {
        Ok(res) => Ok(res.rows_affected()),
        Err(err) if is_unique_violation(&err) => Err(duplicate(entity)),
        Err(err) => Err(err.into()),
    }
}

pub async fn delete_row(
    conn: &mut SqliteConnection,
    entity: Entity,
    id: &str,
) -> Result<u64, sqlx::Error> {
    let sql = format!("DELETE FROM {} WHERE id = ?", entity.table());
    let res = sqlx::query(&sql).bind(id).execute(&mut *conn).await?;
    Ok(res.rows_affected())
}

/// `filter` must already be checked against the catalog.
pub async fn select_rows(
    conn: &mut SqliteConnection,
    entity: Entity,
    filter: &ListFilter,
) -> Result<Vec<Record>, sqlx::Error> {
    let mut clauses: Vec<String> = Vec::new();
    let mut binds: Vec<Value> = Vec::new();

    for (column, value) in &filter.eq {
        if value.is_null() {
            clauses.push(format!("{column} IS NULL"));
        } else {
            clauses.push(format!("{column} = ?"));
            binds.push(value.clone());
        }
    }
    match &filter.scope {
        Some(Scope::Owner(user_id)) => {
            clauses.push(format!("{} = ?", entity.owner_column()));
            binds.push(Value::from(user_id.as_str()));
        }
        Some(Scope::OwnerOrPublic(user_id)) => {
            clauses.push(format!(
                "({} = ? OR is_public_profile = 1)",
                entity.owner_column()
            ));
            binds.push(Value::from(user_id.as_str()));
        }
        None => {}
    }

    let mut sql = format!("SELECT * FROM {}", entity.table());
    if !clauses.is_empty() {
        sql.push_str(" WHERE ");
        sql.push_str(&clauses.join(" AND "));
    }
    let direction = if filter.descending { "DESC" } else { "ASC" };
    match &filter.order_by {
        Some(column) => sql.push_str(&format!(" ORDER BY {column} {direction}, id {direction}")),
        None => sql.push_str(&format!(" ORDER BY created_at {direction}, id {direction}")),
    }
    match (filter.limit, filter.offset) {
        (Some(limit), Some(offset)) => sql.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
        (Some(limit), None) => sql.push_str(&format!(" LIMIT {limit}")),
        (None, Some(offset)) => sql.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        (None, None) => {}
    }

    let mut query = sqlx::query(&sql);
    for value in &binds {
        query = bind_value(query, value);
    }
    let rows = query.fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(|r| row_to_record(entity, r)).collect())
}
