use anyhow::Result;
use rusqlite::{OptionalExtension, Row};

use crate::db::{
    connection::Database,
    helpers::{parse_datetime, to_u32, to_u64},
    models::CacheMetadata,
};

fn row_to_metadata(row: &Row) -> Result<CacheMetadata> {
    let last_synced_at: String = row.get("last_synced_at")?;
    let record_count: i64 = row.get("record_count")?;
    let data_version: i64 = row.get("data_version")?;

    Ok(CacheMetadata {
        last_synced_at: parse_datetime(&last_synced_at, "last_synced_at")?,
        record_count: to_u64(record_count, "record_count")?,
        data_version: to_u32(data_version, "data_version")?,
    })
}

impl Database {
    pub async fn get_cache_metadata(&self) -> Result<Option<CacheMetadata>> {
        self.execute(|conn| {
            let raw = conn
                .query_row(
                    "SELECT last_synced_at, record_count, data_version
                     FROM cache_metadata
                     WHERE id = 1",
                    [],
                    |row| Ok(row_to_metadata(row)),
                )
                .optional()?;

            raw.transpose()
        })
        .await
    }
}
