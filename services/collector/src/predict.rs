//! Forecast hand-off.
//!
//! The forecaster itself is an external job. This module reads back the
//! recent canonical records of an operator, computes the carbon intensity of
//! every block and writes the series as JSON lines for that job to consume.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use gridmix_parser::interval::find_gaps;
use gridmix_parser::{compute_intensity, start_of_most_recent_half_hour, CarbonTables, StoredAreaRecord, Tso};
use serde::Serialize;
use tracing::{info, warn};

use crate::store::AreaStore;

/// Hours of history handed to the forecaster, counted back from the latest block.
pub const HISTORY_HOURS: i64 = 48;

/// Carbon intensity of one block, in gCO2eq/kWh.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntensityPoint {
    pub tso: Tso,
    pub from_utc: DateTime<Utc>,
    pub to_utc: DateTime<Utc>,
    pub carbon_intensity: f64,
}

pub fn intensity_series(records: &[StoredAreaRecord], tables: &CarbonTables) -> Result<Vec<IntensityPoint>> {
    records
        .iter()
        .map(|stored| -> Result<IntensityPoint> {
            let record = stored
                .to_record()
                .with_context(|| format!("stored record {} is unreadable", stored.data_id))?;
            Ok(IntensityPoint {
                tso: record.tso,
                from_utc: record.from_utc,
                to_utc: record.to_utc,
                carbon_intensity: compute_intensity(&record, tables, None),
            })
        })
        .collect()
}

/// Write the intensity series of the 48 hours up to `latest` as JSON lines.
///
/// Returns the number of points written.
pub async fn predict_handoff<S: AreaStore>(
    store: &S,
    tso: Tso,
    latest: DateTime<Utc>,
    tables: &CarbonTables,
    out: &mut impl Write,
) -> Result<usize> {
    let half_hour = TimeDelta::minutes(30);
    let from = start_of_most_recent_half_hour(&latest) - TimeDelta::hours(HISTORY_HOURS);
    let to = latest + half_hour;
    let records = store
        .area_records_between(tso, from, to)
        .await
        .with_context(|| format!("{tso}: failed to read back records"))?;

    // legacy hourly blocks count as two half hours
    let starts: Vec<DateTime<Utc>> = records
        .iter()
        .flat_map(|r| {
            let mut halves = vec![r.datetime_from];
            if r.datetime_to - r.datetime_from > half_hour {
                halves.push(r.datetime_from + half_hour);
            }
            halves
        })
        .collect();
    for gap in find_gaps(&starts, from, start_of_most_recent_half_hour(&to), half_hour) {
        warn!(
            tso = %tso,
            from = %gap.from,
            to = %gap.to,
            missing = gap.missing_blocks(half_hour),
            "gap in history"
        );
    }

    let series = intensity_series(&records, tables)?;
    for point in &series {
        serde_json::to_writer(&mut *out, point)?;
        writeln!(out)?;
    }
    info!(tso = %tso, points = series.len(), from = %from, "intensity series handed off");
    Ok(series.len())
}

/// Run [`predict_handoff`] into a buffer, so the caller only holds its
/// output handle for one synchronous write.
pub async fn handoff_lines<S: AreaStore>(
    store: &S,
    tso: Tso,
    latest: DateTime<Utc>,
    tables: &CarbonTables,
) -> Result<Vec<u8>> {
    let mut lines = Vec::new();
    predict_handoff(store, tso, latest, tables, &mut lines).await?;
    Ok(lines)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::new_format_csv;
    use crate::store::MemoryStore;
    use gridmix_parser::layout::NEW_FORMAT;
    use gridmix_parser::{build_records, bytes_to_grid, parse_rows};

    fn stored(date: &str, times: &[&str]) -> Vec<StoredAreaRecord> {
        let bytes = new_format_csv(date, times);
        let grid = bytes_to_grid(&bytes, NEW_FORMAT.file_kind, NEW_FORMAT.encoding).unwrap();
        let rows = parse_rows(&grid, &NEW_FORMAT, Tso::Tepco).unwrap();
        build_records(&rows).unwrap()
    }

    #[test]
    fn test_intensity_series() {
        let series = intensity_series(&stored("2024/05/10", &["0:00"]), &CarbonTables::default()).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].carbon_intensity, 520.119);
        assert_eq!(series[0].from_utc.to_rfc3339(), "2024-05-09T15:00:00+00:00");
    }

    #[test]
    fn test_unreadable_record_is_an_error() {
        let mut records = stored("2024/05/10", &["0:00"]);
        records[0].total_kwh = "n/a".to_string();
        assert!(intensity_series(&records, &CarbonTables::default()).is_err());
    }

    #[tokio::test]
    async fn test_handoff_writes_window_as_json_lines() {
        let store = MemoryStore::new();
        store
            .upsert_area_records(&stored("2024/05/10", &["0:00", "0:30"]))
            .await
            .unwrap();
        // older than the window
        store
            .upsert_area_records(&stored("2024/05/01", &["0:00"]))
            .await
            .unwrap();

        let latest = DateTime::parse_from_rfc3339("2024-05-09T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let mut out = Vec::new();
        let written = predict_handoff(&store, Tso::Tepco, latest, &CarbonTables::default(), &mut out)
            .await
            .unwrap();

        assert_eq!(written, 2);
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["carbon_intensity"], 520.119);
        assert_eq!(first["from_utc"], "2024-05-09T15:00:00Z");
    }

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_handoff_lines_buffers_whole_series() {
        let store = MemoryStore::new();
        store
            .upsert_area_records(&stored("2024/05/10", &["0:00", "0:30"]))
            .await
            .unwrap();
        let latest = DateTime::parse_from_rfc3339("2024-05-09T15:30:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let tables = CarbonTables::default();

        let pending = handoff_lines(&store, Tso::Tepco, latest, &tables);
        // nothing borrowed across the await pins it to one thread
        assert_send(&pending);
        let lines = pending.await.unwrap();

        let text = String::from_utf8(lines).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.ends_with('\n'));
    }

    #[tokio::test]
    async fn test_handoff_other_operator_is_empty() {
        let store = MemoryStore::new();
        store
            .upsert_area_records(&stored("2024/05/10", &["0:00"]))
            .await
            .unwrap();
        let latest = Utc::now();
        let mut out = Vec::new();
        let written = predict_handoff(&store, Tso::Kyuden, latest, &CarbonTables::default(), &mut out)
            .await
            .unwrap();
        assert_eq!(written, 0);
        assert!(out.is_empty());
    }
}
