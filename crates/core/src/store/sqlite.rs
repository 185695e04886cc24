//! SQLite-backed status store implementation.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    BatchFilter, BatchRecord, BatchState, ItemRecord, NewBatch, RowHandle, StatusStore,
    StatusUpdate, StoreError, VariantRecord,
};
use crate::batch::{next_batch_id, parse_batch_number, format_batch_id, VariantStatus, VariantTask, WorkItem};
use crate::orchestrator::{RunProfile, RunSummary};

const BATCH_COLUMNS: &str = "batch_id, created_at, item_count, profile, state, summary, updated_at";

/// SQLite-backed status store.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
}

fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn parse_timestamp(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl SqliteStatusStore {
    /// Create a new SQLite status store, creating the database file and tables if needed.
    pub fn new(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path).map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory SQLite status store (useful for testing).
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), StoreError> {
        conn.execute_batch(
            r#"
            PRAGMA foreign_keys = ON;

            CREATE TABLE IF NOT EXISTS batches (
                batch_id TEXT PRIMARY KEY,
                created_at TEXT NOT NULL,
                item_count INTEGER NOT NULL DEFAULT 0,
                profile TEXT NOT NULL,
                state TEXT NOT NULL,
                summary TEXT,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS work_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                batch_id TEXT NOT NULL REFERENCES batches(batch_id),
                external_id TEXT NOT NULL,
                source_asset_ref TEXT NOT NULL,
                sequence_number INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                UNIQUE (batch_id, external_id)
            );

            CREATE TABLE IF NOT EXISTS variants (
                item_id INTEGER NOT NULL REFERENCES work_items(id),
                variant_number INTEGER NOT NULL,
                directive TEXT,
                artifact_key TEXT NOT NULL,
                status TEXT NOT NULL,
                artifact_path TEXT,
                error TEXT,
                attempt_count INTEGER NOT NULL DEFAULT 0,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (item_id, variant_number)
            );

            CREATE INDEX IF NOT EXISTS idx_batches_state ON batches(state);
            CREATE INDEX IF NOT EXISTS idx_work_items_batch ON work_items(batch_id, sequence_number);
            "#,
        )
        .map_err(db_err)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Database("connection mutex poisoned".to_string()))
    }

    fn row_to_batch(row: &rusqlite::Row) -> rusqlite::Result<BatchRecord> {
        let batch_id: String = row.get(0)?;
        let created_at_str: String = row.get(1)?;
        let item_count: i64 = row.get(2)?;
        let profile_str: String = row.get(3)?;
        let state_str: String = row.get(4)?;
        let summary_json: Option<String> = row.get(5)?;
        let updated_at_str: String = row.get(6)?;

        let summary: Option<RunSummary> =
            summary_json.and_then(|json| serde_json::from_str(&json).ok());

        Ok(BatchRecord {
            batch_id,
            created_at: parse_timestamp(&created_at_str),
            item_count: item_count.max(0) as usize,
            profile: RunProfile::parse(&profile_str).unwrap_or_default(),
            state: BatchState::parse(&state_str).unwrap_or(BatchState::Running),
            summary,
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn row_to_variant(row: &rusqlite::Row) -> rusqlite::Result<VariantRecord> {
        let variant_number: u8 = row.get(0)?;
        let directive: Option<String> = row.get(1)?;
        let artifact_key: String = row.get(2)?;
        let status_str: String = row.get(3)?;
        let artifact_path: Option<String> = row.get(4)?;
        let error: Option<String> = row.get(5)?;
        let attempt_count: u32 = row.get(6)?;
        let updated_at_str: String = row.get(7)?;

        let status = VariantStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                rusqlite::types::Type::Text,
                format!("unknown variant status '{}'", status_str).into(),
            )
        })?;

        Ok(VariantRecord {
            task: VariantTask {
                variant_number,
                directive,
                artifact_key,
                status,
                attempt_count,
                last_error: error,
            },
            artifact_path,
            updated_at: parse_timestamp(&updated_at_str),
        })
    }

    fn variants_for(conn: &Connection, item_id: i64) -> Result<Vec<VariantRecord>, StoreError> {
        let mut stmt = conn
            .prepare(
                "SELECT variant_number, directive, artifact_key, status, artifact_path, error, attempt_count, updated_at
                 FROM variants WHERE item_id = ? ORDER BY variant_number",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![item_id], Self::row_to_variant)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn batch_exists(conn: &Connection, batch_id: &str) -> Result<bool, StoreError> {
        conn.query_row(
            "SELECT 1 FROM batches WHERE batch_id = ?",
            params![batch_id],
            |_| Ok(()),
        )
        .optional()
        .map(|r| r.is_some())
        .map_err(db_err)
    }

    fn latest_batch_id_locked(conn: &Connection) -> Result<Option<String>, StoreError> {
        conn.query_row(
            "SELECT batch_id FROM batches ORDER BY rowid DESC LIMIT 1",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)
    }

    fn free_batch_id_locked(conn: &Connection) -> Result<String, StoreError> {
        let latest = Self::latest_batch_id_locked(conn)?;
        let mut batch_id = next_batch_id(latest.as_deref());
        // A malformed latest id restarts numbering, which can collide with older batches.
        while Self::batch_exists(conn, &batch_id)? {
            let n = parse_batch_number(&batch_id).unwrap_or(0);
            batch_id = format_batch_id(n + 1);
        }
        Ok(batch_id)
    }
}

impl StatusStore for SqliteStatusStore {
    fn allocate_batch(&self, request: &NewBatch) -> Result<BatchRecord, StoreError> {
        let conn = self.conn()?;

        let batch_id = Self::free_batch_id_locked(&conn)?;

        let now = Utc::now();
        conn.execute(
            "INSERT INTO batches (batch_id, created_at, item_count, profile, state, summary, updated_at) VALUES (?, ?, ?, ?, ?, NULL, ?)",
            params![
                batch_id,
                now.to_rfc3339(),
                request.item_count as i64,
                request.profile.as_str(),
                BatchState::Running.as_str(),
                now.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(BatchRecord {
            batch_id,
            created_at: now,
            item_count: request.item_count,
            profile: request.profile,
            state: BatchState::Running,
            summary: None,
            updated_at: now,
        })
    }

    fn latest_batch_id(&self) -> Result<Option<String>, StoreError> {
        let conn = self.conn()?;
        Self::latest_batch_id_locked(&conn)
    }

    fn peek_batch_id(&self) -> Result<String, StoreError> {
        let conn = self.conn()?;
        Self::free_batch_id_locked(&conn)
    }

    fn get_batch(&self, batch_id: &str) -> Result<Option<BatchRecord>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM batches WHERE batch_id = ?", BATCH_COLUMNS),
            params![batch_id],
            Self::row_to_batch,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_batches(&self, filter: &BatchFilter) -> Result<Vec<BatchRecord>, StoreError> {
        let conn = self.conn()?;

        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        let where_clause = match filter.state {
            Some(state) => {
                params.push(Box::new(state.as_str()));
                "WHERE state = ?"
            }
            None => "",
        };
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT {} FROM batches {} ORDER BY rowid DESC LIMIT ? OFFSET ?",
            BATCH_COLUMNS, where_clause
        );
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();

        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(param_refs.as_slice(), Self::row_to_batch)
            .map_err(db_err)?;
        rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
    }

    fn set_batch_state(
        &self,
        batch_id: &str,
        state: BatchState,
        summary: Option<&RunSummary>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;

        let summary_json = summary
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339();
        // A running batch has no summary yet; a resumed one drops the stale one.
        let changed = if state == BatchState::Running {
            conn.execute(
                "UPDATE batches SET state = ?, summary = NULL, updated_at = ? WHERE batch_id = ?",
                params![state.as_str(), now, batch_id],
            )
        } else {
            conn.execute(
                "UPDATE batches SET state = ?, summary = COALESCE(?, summary), updated_at = ? WHERE batch_id = ?",
                params![state.as_str(), summary_json, now, batch_id],
            )
        }
        .map_err(db_err)?;

        if changed == 0 {
            return Err(StoreError::NotFound(format!("batch {}", batch_id)));
        }
        Ok(())
    }

    fn ensure_row(&self, batch_id: &str, item: &WorkItem) -> Result<RowHandle, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let now = Utc::now().to_rfc3339();

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM work_items WHERE batch_id = ? AND external_id = ?",
                params![batch_id, item.external_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)?;

        if let Some(id) = existing {
            return Ok(RowHandle(id));
        }

        tx.execute(
            "INSERT INTO work_items (batch_id, external_id, source_asset_ref, sequence_number, created_at) VALUES (?, ?, ?, ?, ?)",
            params![
                batch_id,
                item.external_id,
                item.source_asset_ref,
                item.sequence_number,
                now,
            ],
        )
        .map_err(db_err)?;
        let id = tx.last_insert_rowid();

        for variant in &item.variants {
            tx.execute(
                "INSERT INTO variants (item_id, variant_number, directive, artifact_key, status, artifact_path, error, attempt_count, updated_at) VALUES (?, ?, ?, ?, ?, NULL, ?, ?, ?)",
                params![
                    id,
                    variant.variant_number,
                    variant.directive,
                    variant.artifact_key,
                    variant.status.as_str(),
                    variant.last_error,
                    variant.attempt_count,
                    now,
                ],
            )
            .map_err(db_err)?;
        }

        tx.commit().map_err(db_err)?;
        Ok(RowHandle(id))
    }

    fn update_status(
        &self,
        row: RowHandle,
        variant_number: u8,
        update: &StatusUpdate,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;

        let current: Option<String> = conn
            .query_row(
                "SELECT status FROM variants WHERE item_id = ? AND variant_number = ?",
                params![row.0, variant_number],
                |r| r.get(0),
            )
            .optional()
            .map_err(db_err)?;

        let Some(current) = current else {
            return Err(StoreError::NotFound(format!(
                "row {} variant {}",
                row, variant_number
            )));
        };
        let current = VariantStatus::parse(&current)
            .ok_or_else(|| StoreError::Database(format!("unknown stored status '{}'", current)))?;

        if !current.can_transition_to(update.status) {
            return Err(StoreError::InvalidTransition {
                row: row.0,
                variant_number,
                from: current,
                to: update.status,
            });
        }

        conn.execute(
            "UPDATE variants SET status = ?, artifact_path = COALESCE(?, artifact_path), error = CASE WHEN ? THEN NULL ELSE COALESCE(?, error) END, attempt_count = COALESCE(?, attempt_count), updated_at = ? WHERE item_id = ? AND variant_number = ?",
            params![
                update.status.as_str(),
                update.artifact_path,
                update.status == VariantStatus::Completed,
                update.error,
                update.attempt_count,
                Utc::now().to_rfc3339(),
                row.0,
                variant_number,
            ],
        )
        .map_err(db_err)?;

        Ok(())
    }

    fn get_variant(
        &self,
        row: RowHandle,
        variant_number: u8,
    ) -> Result<Option<VariantRecord>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT variant_number, directive, artifact_key, status, artifact_path, error, attempt_count, updated_at
             FROM variants WHERE item_id = ? AND variant_number = ?",
            params![row.0, variant_number],
            Self::row_to_variant,
        )
        .optional()
        .map_err(db_err)
    }

    fn list_items(&self, batch_id: &str) -> Result<Vec<ItemRecord>, StoreError> {
        let conn = self.conn()?;

        let mut stmt = conn
            .prepare(
                "SELECT id, external_id, source_asset_ref, sequence_number FROM work_items
                 WHERE batch_id = ? ORDER BY sequence_number, id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![batch_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, u32>(3)?,
                ))
            })
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;

        let mut items = Vec::with_capacity(rows.len());
        for (id, external_id, source_asset_ref, sequence_number) in rows {
            items.push(ItemRecord {
                row: RowHandle(id),
                batch_id: batch_id.to_string(),
                external_id,
                source_asset_ref,
                sequence_number,
                variants: Self::variants_for(&conn, id)?,
            });
        }
        Ok(items)
    }
}
