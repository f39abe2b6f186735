//! Serialises the raw record set for download. Aggregates are never exported.

use anyhow::Context;
use chrono::{DateTime, Utc};
use csv::{QuoteStyle, WriterBuilder};
use serde::Serialize;

use crate::aggregation::FilterSet;
use crate::db::models::Record;

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const JSON_CONTENT_TYPE: &str = "application/json";

const CSV_HEADER: [&str; 8] = [
    "ID",
    "Operator",
    "Status",
    "Scheduled Date",
    "Created Date",
    "Quantity",
    "Weight",
    "Cost",
];

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, PartialEq)]
pub struct ExportBlob {
    pub content_type: &'static str,
    pub bytes: Vec<u8>,
    pub record_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JsonExport<'a> {
    exported_at: DateTime<Utc>,
    record_count: usize,
    filters: &'a FilterSet,
    records: &'a [Record],
}

/// One header row then one row per record, every field double-quoted.
pub fn to_csv(records: &[Record]) -> anyhow::Result<ExportBlob> {
    let mut writer = WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());
    writer.write_record(CSV_HEADER)?;

    for record in records {
        let created = record
            .created_at
            .map(|at| at.format(DATE_FORMAT).to_string())
            .unwrap_or_default();
        writer
            .write_record([
                record.id.clone(),
                record.operator_id.clone().unwrap_or_default(),
                record.status.as_str().to_string(),
                record.scheduled_at.format(DATE_FORMAT).to_string(),
                created,
                record.quantity.to_string(),
                record.weight_kg.to_string(),
                record.cost.to_string(),
            ])
            .with_context(|| format!("Failed to encode record {}", record.id))?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV export")?;
    Ok(ExportBlob {
        content_type: CSV_CONTENT_TYPE,
        bytes,
        record_count: records.len(),
    })
}

pub fn to_json(
    records: &[Record],
    filters: &FilterSet,
    exported_at: DateTime<Utc>,
) -> anyhow::Result<ExportBlob> {
    let envelope = JsonExport {
        exported_at,
        record_count: records.len(),
        filters,
        records,
    };
    let bytes = serde_json::to_vec_pretty(&envelope).context("Failed to encode JSON export")?;
    Ok(ExportBlob {
        content_type: JSON_CONTENT_TYPE,
        bytes,
        record_count: records.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RecordStatus;
    use chrono::TimeZone;

    fn records() -> Vec<Record> {
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 8, 30, 0).unwrap();
        vec![
            Record {
                id: "PU-1".into(),
                operator_id: Some("op-1".into()),
                status: RecordStatus::Completed,
                category: Some("bulk".into()),
                scheduled_at: at,
                created_at: Some(at),
                status_changed_at: None,
                quantity: 3,
                weight_kg: 12.5,
                cost: 40.0,
            },
            Record {
                id: "PU-2, \"rush\"".into(),
                operator_id: None,
                status: RecordStatus::Pending,
                category: None,
                scheduled_at: at,
                created_at: None,
                status_changed_at: None,
                quantity: 1,
                weight_kg: 0.5,
                cost: 9.99,
            },
        ]
    }

    #[test]
    fn csv_quotes_every_field_and_has_one_header() {
        let blob = to_csv(&records()).unwrap();
        assert_eq!(blob.content_type, CSV_CONTENT_TYPE);
        assert_eq!(blob.record_count, 2);

        let text = String::from_utf8(blob.bytes).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(
            lines[0],
            r#""ID","Operator","Status","Scheduled Date","Created Date","Quantity","Weight","Cost""#
        );
        assert_eq!(
            lines[1],
            r#""PU-1","op-1","completed","2026-03-09","2026-03-09","3","12.5","40""#
        );
        assert!(lines[2].starts_with(r#""PU-2, ""rush""","","pending""#));
    }

    #[test]
    fn csv_reader_sees_same_row_count() {
        let blob = to_csv(&records()).unwrap();
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .from_reader(blob.bytes.as_slice());
        assert_eq!(reader.records().count(), blob.record_count + 1);
    }

    #[test]
    fn json_envelope_carries_filters_and_ids() {
        let filters = FilterSet::new().with_operators(["op-1"]);
        let exported_at = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let blob = to_json(&records(), &filters, exported_at).unwrap();
        assert_eq!(blob.content_type, JSON_CONTENT_TYPE);

        let value: serde_json::Value = serde_json::from_slice(&blob.bytes).unwrap();
        assert_eq!(value["recordCount"], 2);
        assert_eq!(value["exportedAt"], "2026-03-10T00:00:00Z");
        assert_eq!(value["filters"]["operatorIds"][0], "op-1");
        let ids: Vec<&str> = value["records"]
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["PU-1", "PU-2, \"rush\""]);
    }

    #[test]
    fn empty_export_is_header_only() {
        let blob = to_csv(&[]).unwrap();
        assert_eq!(String::from_utf8(blob.bytes).unwrap().lines().count(), 1);
        let json = to_json(&[], &FilterSet::new(), Utc::now()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&json.bytes).unwrap();
        assert_eq!(value["records"].as_array().unwrap().len(), 0);
    }
}
