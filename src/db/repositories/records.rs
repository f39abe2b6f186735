use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row, ToSql};

use crate::db::{
    connection::Database,
    helpers::{
        format_datetime, parse_datetime, parse_optional_datetime, parse_status, to_i64, to_u32,
        to_u64,
    },
    models::{CacheMetadata, Record, RecordStatus, DATA_VERSION},
};

const RECORD_COLUMNS: &str = "id, operator_id, status, category, scheduled_at, created_at, status_changed_at, quantity, weight_kg, cost";

fn row_to_record(row: &Row) -> Result<Record> {
    let status: String = row.get("status")?;
    let scheduled_at: String = row.get("scheduled_at")?;
    let created_at: Option<String> = row.get("created_at")?;
    let status_changed_at: Option<String> = row.get("status_changed_at")?;
    let quantity: i64 = row.get("quantity")?;

    Ok(Record {
        id: row.get("id")?,
        operator_id: row.get("operator_id")?,
        status: parse_status(&status)?,
        category: row.get("category")?,
        scheduled_at: parse_datetime(&scheduled_at, "scheduled_at")?,
        created_at: parse_optional_datetime(created_at, "created_at")?,
        status_changed_at: parse_optional_datetime(status_changed_at, "status_changed_at")?,
        quantity: to_u32(quantity, "quantity")?,
        weight_kg: row.get("weight_kg")?,
        cost: row.get("cost")?,
    })
}

fn query_records(conn: &Connection, sql: &str, args: &[&dyn ToSql]) -> Result<Vec<Record>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(args)?;
    let mut records = Vec::new();
    while let Some(row) = rows.next()? {
        records.push(row_to_record(row)?);
    }
    Ok(records)
}

impl Database {
    /// Clear the record table, insert `records` and rewrite the metadata row
    /// inside one transaction.
    pub async fn replace_records(
        &self,
        records: Vec<Record>,
        synced_at: DateTime<Utc>,
    ) -> Result<CacheMetadata> {
        self.execute(move |conn| {
            let tx = conn.transaction()?;

            tx.execute("DELETE FROM records", [])
                .context("failed to clear records")?;

            {
                let mut insert = tx.prepare(
                    "INSERT OR REPLACE INTO records (id, operator_id, status, category, scheduled_at, scheduled_date, created_at, status_changed_at, quantity, weight_kg, cost)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                )?;
                for record in &records {
                    insert
                        .execute(params![
                            record.id,
                            record.operator_id,
                            record.status.as_str(),
                            record.category,
                            format_datetime(&record.scheduled_at),
                            record.scheduled_at.date_naive().to_string(),
                            record.created_at.as_ref().map(format_datetime),
                            record.status_changed_at.as_ref().map(format_datetime),
                            i64::from(record.quantity),
                            record.weight_kg,
                            record.cost,
                        ])
                        .with_context(|| format!("failed to insert record {}", record.id))?;
                }
            }

            // Duplicate ids collapse on insert, so count what actually landed.
            let stored: i64 = tx.query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
            let metadata = CacheMetadata {
                last_synced_at: synced_at,
                record_count: to_u64(stored, "record_count")?,
                data_version: DATA_VERSION,
            };

            tx.execute(
                "INSERT INTO cache_metadata (id, last_synced_at, record_count, data_version)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                     last_synced_at = excluded.last_synced_at,
                     record_count = excluded.record_count,
                     data_version = excluded.data_version",
                params![
                    format_datetime(&metadata.last_synced_at),
                    to_i64(metadata.record_count)?,
                    metadata.data_version,
                ],
            )
            .context("failed to write cache metadata")?;

            tx.commit()?;
            Ok(metadata)
        })
        .await
    }

    pub async fn list_records(&self) -> Result<Vec<Record>> {
        self.execute(|conn| {
            query_records(conn, &format!("SELECT {RECORD_COLUMNS} FROM records"), &[])
        })
        .await
    }

    pub async fn list_records_by_operator(&self, operator_id: &str) -> Result<Vec<Record>> {
        let operator_id = operator_id.to_string();
        self.execute(move |conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE operator_id = ?1 ORDER BY scheduled_at ASC"
                ),
                &[&operator_id],
            )
        })
        .await
    }

    pub async fn list_records_by_status(&self, status: RecordStatus) -> Result<Vec<Record>> {
        self.execute(move |conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records WHERE status = ?1 ORDER BY scheduled_at ASC"
                ),
                &[&status.as_str()],
            )
        })
        .await
    }

    /// Records whose scheduled time falls in `[start, end]`.
    pub async fn list_records_scheduled_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Record>> {
        let start = format_datetime(&start);
        let end = format_datetime(&end);
        self.execute(move |conn| {
            query_records(
                conn,
                &format!(
                    "SELECT {RECORD_COLUMNS} FROM records
                     WHERE scheduled_at >= ?1 AND scheduled_at <= ?2
                     ORDER BY scheduled_at ASC"
                ),
                &[&start, &end],
            )
        })
        .await
    }
}
