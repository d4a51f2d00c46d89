use std::collections::BTreeSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, params_from_iter};
use tokio::sync::broadcast;
use tracing::debug;

use curriculum_core::FieldValue;

use crate::error::RemoteError;
use crate::mapper::columns::ID;
use crate::traits::{
    Aggregate, AggregateStore, ChangeEvent, ChangeKind, Filter, RemoteRow, RemoteStore,
    Subscription, Table,
};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

struct SqlValue<'a>(&'a FieldValue);

impl ToSql for SqlValue<'_> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self.0 {
            FieldValue::Null => ToSqlOutput::Owned(Value::Null),
            FieldValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            FieldValue::Integer(n) | FieldValue::Timestamp(n) => ToSqlOutput::Owned(Value::Integer(*n)),
            FieldValue::Boolean(b) => ToSqlOutput::Owned(Value::Integer(i64::from(*b))),
            FieldValue::Bytes(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn read_value(value: ValueRef<'_>) -> FieldValue {
    match value {
        ValueRef::Null => FieldValue::Null,
        ValueRef::Integer(n) => FieldValue::Integer(n),
        ValueRef::Real(f) => FieldValue::Integer(f as i64),
        ValueRef::Text(t) => FieldValue::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => FieldValue::Bytes(b.to_vec()),
    }
}

/// Render a filter as a WHERE clause, appending its parameters to `params`.
fn where_clause<'a>(filter: &'a Filter, params: &mut Vec<&'a FieldValue>) -> String {
    match filter {
        Filter::All => "1 = 1".to_string(),
        Filter::Eq(column, value) => {
            params.push(value);
            format!("\"{column}\" = ?{}", params.len())
        }
        Filter::In(column, values) => {
            if values.is_empty() {
                return "0 = 1".to_string();
            }
            let placeholders: Vec<String> = values
                .iter()
                .map(|v| {
                    params.push(v);
                    format!("?{}", params.len())
                })
                .collect();
            format!("\"{column}\" IN ({})", placeholders.join(", "))
        }
        Filter::IsNull(column) => format!("\"{column}\" IS NULL"),
        Filter::And(filters) => {
            if filters.is_empty() {
                return "1 = 1".to_string();
            }
            let parts: Vec<String> = filters
                .iter()
                .map(|f| format!("({})", where_clause(f, params)))
                .collect();
            parts.join(" AND ")
        }
    }
}

fn table_columns(conn: &Connection, table: Table) -> Result<BTreeSet<String>, RemoteError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info(\"{}\")", table.as_str()))?;
    let names = stmt
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<Result<BTreeSet<_>, _>>()?;
    Ok(names)
}

/// Reject any column the table does not have, naming the first offender.
fn check_columns<'a>(
    conn: &Connection,
    table: Table,
    columns: impl IntoIterator<Item = &'a str>,
) -> Result<(), RemoteError> {
    let known = table_columns(conn, table)?;
    for column in columns {
        if !known.contains(column) {
            return Err(RemoteError::UnknownColumn {
                table,
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

fn insert_row(tx: &rusqlite::Transaction, table: Table, row: &RemoteRow) -> Result<(), RemoteError> {
    let names: Vec<String> = row.keys().map(|k| format!("\"{k}\"")).collect();
    let placeholders: Vec<String> = (1..=row.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.as_str(),
        names.join(", "),
        placeholders.join(", ")
    );
    tx.execute(&sql, params_from_iter(row.values().map(SqlValue)))?;
    Ok(())
}

/// Update-then-insert keyed by `id`.
fn upsert_row(tx: &rusqlite::Transaction, table: Table, row: &RemoteRow) -> Result<(), RemoteError> {
    let id = row
        .get(ID)
        .ok_or_else(|| RemoteError::ConstraintViolation(format!("upsert into {table} without id")))?;
    let rest: Vec<(&String, &FieldValue)> = row.iter().filter(|(k, _)| k.as_str() != ID).collect();
    let changed = if rest.is_empty() {
        tx.query_row(
            &format!("SELECT COUNT(*) FROM {} WHERE id = ?1", table.as_str()),
            params_from_iter(std::iter::once(SqlValue(id))),
            |r| r.get::<_, i64>(0),
        )? as usize
    } else {
        let assignments: Vec<String> = rest
            .iter()
            .enumerate()
            .map(|(i, (k, _))| format!("\"{k}\" = ?{}", i + 1))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE id = ?{}",
            table.as_str(),
            assignments.join(", "),
            rest.len() + 1
        );
        let params = rest.iter().map(|(_, v)| *v).chain(std::iter::once(id)).map(SqlValue);
        tx.execute(&sql, params_from_iter(params))?
    };
    if changed == 0 {
        insert_row(tx, table, row)?;
    }
    Ok(())
}

/// SQLite-backed remote store with enforced foreign keys and change notifications.
pub struct SqliteRemote {
    conn: Mutex<Connection>,
    changes: broadcast::Sender<ChangeEvent>,
}

impl SqliteRemote {
    pub fn open(path: &str) -> Result<Self, RemoteError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, RemoteError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, RemoteError> {
        crate::schema::init_schema(&conn)?;
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            conn: Mutex::new(conn),
            changes,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, RemoteError> {
        self.conn
            .lock()
            .map_err(|_| RemoteError::Transport("connection lock poisoned".into()))
    }

    fn publish(&self, table: Table, kind: ChangeKind) {
        // No receivers is fine.
        let _ = self.changes.send(ChangeEvent { table, kind });
    }

    /// Remove a column from a table, leaving the remote behind the client's model.
    pub fn drop_column(&self, table: Table, column: &str) -> Result<(), RemoteError> {
        let conn = self.conn()?;
        conn.execute_batch(&format!("ALTER TABLE {} DROP COLUMN \"{column}\"", table.as_str()))?;
        Ok(())
    }

    pub fn row_count(&self, table: Table) -> Result<u64, RemoteError> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.as_str()), [], |row| {
            row.get(0)
        })?;
        Ok(count as u64)
    }
}

#[async_trait]
impl RemoteStore for SqliteRemote {
    async fn select(&self, table: Table, filter: &Filter) -> Result<Vec<RemoteRow>, RemoteError> {
        let conn = self.conn()?;
        check_columns(&conn, table, filter.columns())?;
        let mut params = Vec::new();
        let clause = where_clause(filter, &mut params);
        let mut stmt = conn.prepare(&format!("SELECT * FROM {} WHERE {clause}", table.as_str()))?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let rows = stmt
            .query_map(params_from_iter(params.into_iter().map(SqlValue)), |row| {
                let mut out = RemoteRow::new();
                for (i, name) in names.iter().enumerate() {
                    out.insert(name.clone(), read_value(row.get_ref(i)?));
                }
                Ok(out)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    async fn insert(&self, table: Table, rows: &[RemoteRow]) -> Result<(), RemoteError> {
        if rows.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.conn()?;
            for row in rows {
                check_columns(&conn, table, row.keys().map(String::as_str))?;
            }
            let tx = conn.transaction()?;
            for row in rows {
                insert_row(&tx, table, row)?;
            }
            tx.commit()?;
        }
        debug!(%table, rows = rows.len(), "remote insert");
        self.publish(table, ChangeKind::Insert);
        Ok(())
    }

    async fn upsert(&self, table: Table, rows: &[RemoteRow]) -> Result<(), RemoteError> {
        if rows.is_empty() {
            return Ok(());
        }
        {
            let mut conn = self.conn()?;
            for row in rows {
                check_columns(&conn, table, row.keys().map(String::as_str))?;
            }
            let tx = conn.transaction()?;
            for row in rows {
                upsert_row(&tx, table, row)?;
            }
            tx.commit()?;
        }
        debug!(%table, rows = rows.len(), "remote upsert");
        self.publish(table, ChangeKind::Update);
        Ok(())
    }

    async fn update(&self, table: Table, patch: &RemoteRow, filter: &Filter) -> Result<u64, RemoteError> {
        if patch.is_empty() {
            return Ok(0);
        }
        let changed = {
            let conn = self.conn()?;
            check_columns(&conn, table, patch.keys().map(String::as_str).chain(filter.columns()))?;
            let mut params: Vec<&FieldValue> = Vec::new();
            let assignments: Vec<String> = patch
                .iter()
                .map(|(k, v)| {
                    params.push(v);
                    format!("\"{k}\" = ?{}", params.len())
                })
                .collect();
            let clause = where_clause(filter, &mut params);
            let sql = format!("UPDATE {} SET {} WHERE {clause}", table.as_str(), assignments.join(", "));
            conn.execute(&sql, params_from_iter(params.into_iter().map(SqlValue)))?
        };
        debug!(%table, changed, "remote update");
        if changed > 0 {
            self.publish(table, ChangeKind::Update);
        }
        Ok(changed as u64)
    }

    async fn delete(&self, table: Table, filter: &Filter) -> Result<u64, RemoteError> {
        if filter.is_empty_set() {
            return Ok(0);
        }
        let removed = {
            let conn = self.conn()?;
            check_columns(&conn, table, filter.columns())?;
            let mut params = Vec::new();
            let clause = where_clause(filter, &mut params);
            let sql = format!("DELETE FROM {} WHERE {clause}", table.as_str());
            conn.execute(&sql, params_from_iter(params.into_iter().map(SqlValue)))?
        };
        debug!(%table, removed, "remote delete");
        if removed > 0 {
            self.publish(table, ChangeKind::Delete);
        }
        Ok(removed as u64)
    }

    fn subscribe(&self, tables: &[Table]) -> Subscription {
        Subscription::new(self.changes.subscribe(), tables)
    }
}

#[async_trait]
impl AggregateStore for SqliteRemote {
    async fn save_aggregate_atomically(&self, aggregate: &Aggregate) -> Result<String, RemoteError> {
        let id = aggregate
            .header
            .get(ID)
            .and_then(FieldValue::as_text)
            .map(str::to_string)
            .ok_or_else(|| RemoteError::ConstraintViolation(format!("{} header without id", aggregate.table)))?;
        {
            let mut conn = self.conn()?;
            check_columns(&conn, aggregate.table, aggregate.header.keys().map(String::as_str))?;
            for child in &aggregate.children {
                check_columns(&conn, aggregate.child_table, child.keys().map(String::as_str))?;
            }
            let tx = conn.transaction()?;
            upsert_row(&tx, aggregate.table, &aggregate.header)?;
            tx.execute(
                &format!(
                    "DELETE FROM {} WHERE \"{}\" = ?1",
                    aggregate.child_table.as_str(),
                    aggregate.parent_column
                ),
                rusqlite::params![id],
            )?;
            for child in &aggregate.children {
                insert_row(&tx, aggregate.child_table, child)?;
            }
            tx.commit()?;
        }
        debug!(table = %aggregate.table, %id, children = aggregate.children.len(), "aggregate saved");
        self.publish(aggregate.table, ChangeKind::Update);
        self.publish(aggregate.child_table, ChangeKind::Update);
        Ok(id)
    }

    async fn delete_aggregate(
        &self,
        table: Table,
        child_table: Table,
        parent_column: &'static str,
        id: &str,
    ) -> Result<(), RemoteError> {
        {
            let mut conn = self.conn()?;
            let tx = conn.transaction()?;
            tx.execute(
                &format!("DELETE FROM {} WHERE \"{parent_column}\" = ?1", child_table.as_str()),
                rusqlite::params![id],
            )?;
            tx.execute(&format!("DELETE FROM {} WHERE id = ?1", table.as_str()), rusqlite::params![id])?;
            tx.commit()?;
        }
        self.publish(child_table, ChangeKind::Delete);
        self.publish(table, ChangeKind::Delete);
        Ok(())
    }
}
