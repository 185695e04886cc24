use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, types::Value, Connection, Row};

use super::{AuditError, AuditEvent, AuditFilter, AuditRecord, AuditStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    timestamp TEXT NOT NULL,
    event_type TEXT NOT NULL,
    batch_id TEXT,
    external_id TEXT,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_events_timestamp ON audit_events(timestamp);
CREATE INDEX IF NOT EXISTS idx_audit_events_batch ON audit_events(batch_id, external_id);
CREATE INDEX IF NOT EXISTS idx_audit_events_event_type ON audit_events(event_type);
"#;

const INSERT: &str = "INSERT INTO audit_events (timestamp, event_type, batch_id, external_id, data) \
                      VALUES (?1, ?2, ?3, ?4, ?5)";

/// Audit trail in the same SQLite file as the status store.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::open(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::open(Connection::open_in_memory()?)
    }

    fn open(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, AuditError> {
        self.conn
            .lock()
            .map_err(|_| AuditError::Database("connection mutex poisoned".to_string()))
    }

    fn insert_with(conn: &Connection, record: &AuditRecord) -> Result<i64, AuditError> {
        let data = serde_json::to_string(&record.data)?;
        conn.execute(
            INSERT,
            params![
                record.timestamp.to_rfc3339(),
                record.event_type,
                record.batch_id,
                record.external_id,
                data,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }
}

/// WHERE clause and its bound values for a filter.
fn conditions(filter: &AuditFilter) -> (String, Vec<Value>) {
    let mut clauses = Vec::new();
    let mut values = Vec::new();

    let columns = [
        ("batch_id = ?", filter.batch_id.clone()),
        ("external_id = ?", filter.external_id.clone()),
        ("event_type = ?", filter.event_type.clone()),
        ("timestamp >= ?", filter.from.map(|t| t.to_rfc3339())),
        ("timestamp <= ?", filter.to.map(|t| t.to_rfc3339())),
    ];
    for (clause, value) in columns {
        if let Some(value) = value {
            clauses.push(clause);
            values.push(Value::Text(value));
        }
    }

    if clauses.is_empty() {
        (String::new(), values)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), values)
    }
}

type RawRecord = (i64, String, String, Option<String>, Option<String>, String);

fn read_raw(row: &Row<'_>) -> rusqlite::Result<RawRecord> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn decode((id, timestamp, event_type, batch_id, external_id, data): RawRecord) -> Result<AuditRecord, AuditError> {
    let timestamp: DateTime<Utc> = DateTime::parse_from_rfc3339(&timestamp)
        .map_err(|e| AuditError::Database(format!("Invalid timestamp: {}", e)))?
        .into();
    let data: AuditEvent = serde_json::from_str(&data)?;
    Ok(AuditRecord {
        id,
        timestamp,
        event_type,
        batch_id,
        external_id,
        data,
    })
}

impl AuditStore for SqliteAuditStore {
    fn insert(&self, record: &AuditRecord) -> Result<i64, AuditError> {
        let conn = self.conn()?;
        Self::insert_with(&conn, record)
    }

    fn insert_many(&self, records: &[AuditRecord]) -> Result<usize, AuditError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        for record in records {
            Self::insert_with(&tx, record)?;
        }
        tx.commit()?;
        Ok(records.len())
    }

    fn query(&self, filter: &AuditFilter) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.conn()?;
        let (where_clause, mut values) = conditions(filter);
        values.push(Value::Integer(filter.limit));
        values.push(Value::Integer(filter.offset));

        let sql = format!(
            "SELECT id, timestamp, event_type, batch_id, external_id, data FROM audit_events {} \
             ORDER BY timestamp DESC, id DESC LIMIT ? OFFSET ?",
            where_clause
        );
        let mut stmt = conn.prepare(&sql)?;
        let raw = stmt
            .query_map(params_from_iter(values), read_raw)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter().map(decode).collect()
    }

    fn count(&self, filter: &AuditFilter) -> Result<i64, AuditError> {
        let conn = self.conn()?;
        let (where_clause, values) = conditions(filter);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", where_clause);
        Ok(conn.query_row(&sql, params_from_iter(values), |row| row.get(0))?)
    }
}
