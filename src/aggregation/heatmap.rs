use chrono::{Datelike, Timelike};

use crate::db::models::Record;

use super::filter::FilterSet;
use super::types::HeatmapCell;

pub const DAYS_PER_WEEK: usize = 7;
pub const HOURS_PER_DAY: usize = 24;
pub const HEATMAP_CELLS: usize = DAYS_PER_WEEK * HOURS_PER_DAY;

const DAY_NAMES: [&str; DAYS_PER_WEEK] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

/// Scheduled activity by UTC weekday and hour.
///
/// Always returns the full 7 x 24 grid, day-major, zero-filled.
pub fn compute_heatmap(records: &[Record], filters: &FilterSet) -> Vec<HeatmapCell> {
    let mut grid = [[0u64; HOURS_PER_DAY]; DAYS_PER_WEEK];
    for record in filters.apply(records) {
        let day = record.scheduled_at.weekday().num_days_from_sunday() as usize;
        let hour = record.scheduled_at.hour() as usize;
        grid[day][hour] += 1;
    }

    let mut cells = Vec::with_capacity(HEATMAP_CELLS);
    for (day, hours) in grid.iter().enumerate() {
        for (hour, count) in hours.iter().enumerate() {
            cells.push(HeatmapCell {
                day_of_week: day as u8,
                hour: hour as u8,
                count: *count,
                label: format!("{} {:02}:00", DAY_NAMES[day], hour),
            });
        }
    }
    cells
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::RecordStatus;
    use chrono::{TimeZone, Utc};

    #[test]
    fn empty_input_still_emits_full_grid() {
        let cells = compute_heatmap(&[], &FilterSet::new());
        assert_eq!(cells.len(), HEATMAP_CELLS);
        assert!(cells.iter().all(|cell| cell.count == 0));
        assert_eq!(cells[0].label, "Sun 00:00");
        assert_eq!(cells[HEATMAP_CELLS - 1].label, "Sat 23:00");
    }

    #[test]
    fn counts_land_in_weekday_hour_cell() {
        // 2026-10-14 is a Wednesday.
        let scheduled_at = Utc.with_ymd_and_hms(2026, 10, 14, 15, 40, 0).unwrap();
        let record = Record {
            id: "PU-1".into(),
            operator_id: None,
            status: RecordStatus::Scheduled,
            category: None,
            scheduled_at,
            created_at: None,
            status_changed_at: None,
            quantity: 1,
            weight_kg: 1.0,
            cost: 1.0,
        };
        let cells = compute_heatmap(&[record.clone(), record], &FilterSet::new());
        let hit = &cells[3 * HOURS_PER_DAY + 15];
        assert_eq!((hit.day_of_week, hit.hour, hit.count), (3, 15, 2));
        assert_eq!(hit.label, "Wed 15:00");
        assert_eq!(cells.iter().map(|cell| cell.count).sum::<u64>(), 2);
    }
}
