//! SQLite-backed document store.

use std::path::Path;

use rusqlite::{Connection, params, params_from_iter, types::Value as SqlValue};
use serde_json::Value;

use crate::{action::ID_FIELD, types::RecordId};

use super::{
    BatchReport, Document, DocumentStore, Rejection, StoreError, StoreResult,
    filter::{Condition, Filter, Sort, SortOrder},
};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS documents (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    collection TEXT NOT NULL,
    body TEXT NOT NULL CHECK (json_valid(body) AND json_type(body) = 'object')
);
CREATE INDEX IF NOT EXISTS documents_by_collection ON documents(collection, id);
";

/// SQLite implementation of [`crate::persist::DocumentStore`].
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self { conn })
    }

    /// Number of documents in `collection`.
    pub fn count(&self, collection: &str) -> StoreResult<usize> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM documents WHERE collection = ?1",
            params![collection],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Inserts a raw JSON body, bypassing serialization. Exposes the
    /// table's own validation, e.g. for bodies written by older tools.
    pub fn insert_raw(&mut self, collection: &str, body: &str) -> StoreResult<RecordId> {
        self.conn.execute(
            "INSERT INTO documents(collection, body) VALUES (?1, ?2)",
            params![collection, body],
        )?;
        Ok(self.conn.last_insert_rowid())
    }
}

impl DocumentStore for SqliteStore {
    fn insert_batch(&mut self, collection: &str, docs: &[Document]) -> StoreResult<BatchReport> {
        let mut report = BatchReport::default();
        let mut tx = self.conn.transaction()?;

        for (index, doc) in docs.iter().enumerate() {
            let mut body = doc.clone();
            body.remove(ID_FIELD);
            let text = match serde_json::to_string(&body) {
                Ok(text) => text,
                Err(err) => {
                    report.rejected.push(Rejection {
                        index,
                        reason: err.to_string(),
                    });
                    continue;
                }
            };

            // One savepoint per document: a refused row rolls back alone.
            let sp = tx.savepoint()?;
            match sp.execute(
                "INSERT INTO documents(collection, body) VALUES (?1, ?2)",
                params![collection, text],
            ) {
                Ok(_) => {
                    let id = sp.last_insert_rowid();
                    sp.commit()?;
                    report.inserted.push((index, id));
                }
                Err(err) => {
                    drop(sp);
                    report.rejected.push(Rejection {
                        index,
                        reason: err.to_string(),
                    });
                }
            }
        }

        tx.commit()?;
        Ok(report)
    }

    fn update_by_id(&mut self, collection: &str, id: RecordId, doc: &Document) -> StoreResult<()> {
        let mut body = doc.clone();
        body.remove(ID_FIELD);
        let text = serde_json::to_string(&body)?;
        let changed = self.conn.execute(
            "UPDATE documents SET body = ?1 WHERE id = ?2 AND collection = ?3",
            params![text, id, collection],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    fn find(&self, collection: &str, filter: &Filter, sort: Option<&Sort>) -> StoreResult<Vec<Document>> {
        let mut sql = String::from("SELECT id, body FROM documents WHERE collection = ?");
        let mut args: Vec<SqlValue> = vec![SqlValue::Text(collection.to_string())];

        // Conditions on non-scalar values are checked after loading.
        let mut residual = Filter::new();
        for (path, cond) in filter.clauses() {
            match condition_sql(path, cond, &mut args) {
                Some(clause) => {
                    sql.push_str(" AND ");
                    sql.push_str(&clause);
                }
                None => {
                    residual.set(path, cond.clone());
                }
            }
        }

        match sort {
            Some(sort) => {
                let dir = match sort.order {
                    SortOrder::Ascending => "ASC",
                    SortOrder::Descending => "DESC",
                };
                args.push(SqlValue::Text(json_path(&sort.field)));
                sql.push_str(&format!(" ORDER BY json_extract(body, ?) {dir}, id {dir}"));
            }
            None => sql.push_str(" ORDER BY id ASC"),
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args.iter()), |row| {
            let id: i64 = row.get(0)?;
            let body: String = row.get(1)?;
            Ok((id, body))
        })?;

        let mut out = Vec::new();
        for row in rows {
            let (id, body) = row?;
            let mut doc: Document = serde_json::from_str(&body)?;
            if !residual.matches(&doc) {
                continue;
            }
            doc.insert(ID_FIELD.to_string(), Value::from(id));
            out.push(doc);
        }
        Ok(out)
    }
}

fn json_path(path: &str) -> String {
    format!("$.{path}")
}

fn scalar(value: &Value) -> Option<SqlValue> {
    match value {
        Value::Null => Some(SqlValue::Null),
        Value::Bool(b) => Some(SqlValue::Integer(i64::from(*b))),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Some(SqlValue::Integer(i)),
            None => n.as_f64().map(SqlValue::Real),
        },
        Value::String(s) => Some(SqlValue::Text(s.clone())),
        Value::Array(_) | Value::Object(_) => None,
    }
}

/// Renders one condition as SQL, pushing its bind values. `None` when the
/// condition needs in-process evaluation.
fn condition_sql(path: &str, cond: &Condition, args: &mut Vec<SqlValue>) -> Option<String> {
    let field = "json_extract(body, ?)";
    let mut local: Vec<SqlValue> = Vec::new();

    let clause = match cond {
        Condition::Eq(Value::Null) => {
            local.push(SqlValue::Text(json_path(path)));
            format!("{field} IS NULL")
        }
        Condition::Ne(Value::Null) => {
            local.push(SqlValue::Text(json_path(path)));
            format!("{field} IS NOT NULL")
        }
        Condition::Eq(v) => {
            let v = scalar(v)?;
            local.push(SqlValue::Text(json_path(path)));
            local.push(v);
            format!("{field} = ?")
        }
        Condition::Ne(v) => {
            let v = scalar(v)?;
            local.push(SqlValue::Text(json_path(path)));
            local.push(SqlValue::Text(json_path(path)));
            local.push(v);
            format!("({field} IS NULL OR {field} <> ?)")
        }
        Condition::In(vs) => {
            if vs.is_empty() {
                return Some("0".to_string());
            }
            let values = vs.iter().map(scalar).collect::<Option<Vec<_>>>()?;
            local.push(SqlValue::Text(json_path(path)));
            let marks = vec!["?"; values.len()].join(", ");
            local.extend(values);
            format!("{field} IN ({marks})")
        }
        Condition::Range { gte, lte } => {
            let mut parts = Vec::new();
            if let Some(lo) = gte {
                local.push(SqlValue::Text(json_path(path)));
                local.push(scalar(lo)?);
                parts.push(format!("{field} >= ?"));
            }
            if let Some(hi) = lte {
                local.push(SqlValue::Text(json_path(path)));
                local.push(scalar(hi)?);
                parts.push(format!("{field} <= ?"));
            }
            if parts.is_empty() {
                local.push(SqlValue::Text(json_path(path)));
                parts.push(format!("{field} IS NOT NULL"));
            }
            format!("({})", parts.join(" AND "))
        }
    };

    args.extend(local);
    Some(clause)
}
