//! Canonical Record Builder
//!
//! Assigns natural keys and converts parsed numbers into the storage shape.
//! Null stays null, zero stays "0".

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use crate::area::{AreaRecord, StoredAreaRecord};
use crate::error::{Error, Result};
use crate::rows::ParsedRow;

/// Decimal places kept in storage.
const STORAGE_DECIMALS: f64 = 1000.0;

/// Format a kWh quantity as an exact decimal string (3 dp, no exponent).
pub fn format_decimal(value: f64) -> String {
    let rounded = (value * STORAGE_DECIMALS).round() / STORAGE_DECIMALS;
    // -0.0 would otherwise render as "-0"
    if rounded == 0.0 {
        "0".to_string()
    } else {
        format!("{rounded}")
    }
}

fn finite(field: &'static str, value: f64) -> std::result::Result<String, &'static str> {
    if value.is_finite() {
        Ok(format_decimal(value))
    } else {
        Err(field)
    }
}

fn finite_opt(
    field: &'static str,
    value: Option<f64>,
) -> std::result::Result<Option<String>, &'static str> {
    value.map(|v| finite(field, v)).transpose()
}

impl StoredAreaRecord {
    /// Build the storage representation of a record.
    ///
    /// Returns the name of the first non-finite field on failure.
    pub fn from_record(record: &AreaRecord) -> std::result::Result<Self, &'static str> {
        let local_to = record.local_to();
        Ok(StoredAreaRecord {
            data_id: record.natural_key(),
            tso: record.tso,
            date_jst: record.local_date(),
            time_from_jst: record.local_start_time(),
            time_to_jst: local_to.format("%H:%M").to_string(),
            datetime_from: record.from_utc,
            datetime_to: record.to_utc,
            total_demand_kwh: finite("total_demand_kwh", record.total_demand_kwh)?,
            nuclear_kwh: finite("nuclear_kwh", record.nuclear_kwh)?,
            all_fossil_kwh: finite("all_fossil_kwh", record.all_fossil_kwh)?,
            lng_kwh: finite_opt("lng_kwh", record.lng_kwh)?,
            coal_kwh: finite_opt("coal_kwh", record.coal_kwh)?,
            oil_kwh: finite_opt("oil_kwh", record.oil_kwh)?,
            other_fossil_kwh: finite_opt("other_fossil_kwh", record.other_fossil_kwh)?,
            hydro_kwh: finite("hydro_kwh", record.hydro_kwh)?,
            geothermal_kwh: finite("geothermal_kwh", record.geothermal_kwh)?,
            biomass_kwh: finite("biomass_kwh", record.biomass_kwh)?,
            solar_output_kwh: finite("solar_output_kwh", record.solar_output_kwh)?,
            solar_throttling_kwh: finite("solar_throttling_kwh", record.solar_throttling_kwh)?,
            wind_output_kwh: finite("wind_output_kwh", record.wind_output_kwh)?,
            wind_throttling_kwh: finite("wind_throttling_kwh", record.wind_throttling_kwh)?,
            pumped_storage_kwh: finite("pumped_storage_kwh", record.pumped_storage_kwh)?,
            battery_storage_kwh: finite_opt("battery_storage_kwh", record.battery_storage_kwh)?,
            interconnectors_kwh: finite("interconnectors_kwh", record.interconnectors_kwh)?,
            other_kwh: finite_opt("other_kwh", record.other_kwh)?,
            total_kwh: finite("total_kwh", record.total_generation_kwh)?,
            updated_at: None,
        })
    }
}

/// Convert parsed rows into storage records, one per natural key.
///
/// A non-finite value fails the whole batch. Later rows win over earlier
/// rows with the same key. Output is ordered by block start.
pub fn build_records(rows: &[ParsedRow]) -> Result<Vec<StoredAreaRecord>> {
    let mut by_key: BTreeMap<(DateTime<Utc>, String), StoredAreaRecord> = BTreeMap::new();

    for row in rows {
        let stored = StoredAreaRecord::from_record(&row.record).map_err(|field| {
            error!(line = row.line, field, raw = ?row.raw, "non-finite value in parsed row");
            Error::malformed(row.line, format!("{field} is not finite"), &row.raw)
        })?;
        let key = (stored.datetime_from, stored.data_id.clone());
        if by_key.insert(key, stored).is_some() {
            debug!(line = row.line, "duplicate block replaced by later row");
        }
    }

    Ok(by_key.into_values().collect())
}

/// Keep only rows whose block starts strictly before `cutover`.
pub fn retain_before(rows: Vec<ParsedRow>, cutover: DateTime<Utc>) -> Vec<ParsedRow> {
    let before = rows.len();
    let kept: Vec<ParsedRow> = rows
        .into_iter()
        .filter(|r| r.record.from_utc < cutover)
        .collect();
    if kept.len() != before {
        debug!(
            dropped = before - kept.len(),
            cutover = %cutover,
            "legacy rows overlapping the new format dropped"
        );
    }
    kept
}

/// Latest block start among the records.
pub fn max_from_utc(records: &[StoredAreaRecord]) -> Option<DateTime<Utc>> {
    records.iter().map(|r| r.datetime_from).max()
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::fixtures::{legacy_tepco_record, new_format_record};
    use chrono::TimeZone;

    fn row(line: usize, record: AreaRecord) -> ParsedRow {
        ParsedRow {
            line,
            raw: vec!["raw".to_string()],
            record,
        }
    }

    // -------------------------------------------------------------------------
    // DECIMALS
    // -------------------------------------------------------------------------

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(7_588_000.0), "7588000");
        assert_eq!(format_decimal(-3_500.0), "-3500");
        assert_eq!(format_decimal(1234.5678), "1234.568");
        assert_eq!(format_decimal(0.1 + 0.2), "0.3");
        assert_eq!(format_decimal(-0.0), "0");
        assert_eq!(format_decimal(-0.0001), "0");
    }

    // -------------------------------------------------------------------------
    // BUILDER
    // -------------------------------------------------------------------------

    #[test]
    fn test_from_record_keeps_null_and_zero_apart() {
        let stored = StoredAreaRecord::from_record(&legacy_tepco_record()).unwrap();
        assert_eq!(stored.data_id, "tepco_2020-04-01_00:00");
        assert_eq!(stored.time_from_jst, "00:00");
        assert_eq!(stored.time_to_jst, "01:00");
        assert_eq!(stored.lng_kwh, None);
        assert_eq!(stored.battery_storage_kwh, None);
        assert_eq!(stored.nuclear_kwh, "0");
        assert_eq!(stored.total_kwh, "25550000");

        let stored = StoredAreaRecord::from_record(&new_format_record()).unwrap();
        assert_eq!(stored.battery_storage_kwh.as_deref(), Some("0"));
        assert_eq!(stored.pumped_storage_kwh, "-3500");
    }

    #[test]
    fn test_stored_record_reads_back() {
        let record = new_format_record();
        let stored = StoredAreaRecord::from_record(&record).unwrap();
        assert_eq!(stored.to_record().unwrap(), record);
    }

    #[test]
    fn test_non_finite_value_fails_batch() {
        let mut bad = new_format_record();
        bad.hydro_kwh = f64::NAN;
        let rows = vec![row(3, legacy_tepco_record()), row(4, bad)];

        match build_records(&rows).unwrap_err() {
            Error::MalformedRow { line, reason, .. } => {
                assert_eq!(line, 4);
                assert!(reason.contains("hydro_kwh"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_keys_keep_last_and_sort() {
        let mut later = new_format_record();
        later.total_demand_kwh = 1.0;
        let rows = vec![
            row(3, new_format_record()),
            row(4, legacy_tepco_record()),
            row(5, later),
        ];

        let records = build_records(&rows).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data_id, "tepco_2020-04-01_00:00");
        assert_eq!(records[1].total_demand_kwh, "1");
        assert_eq!(max_from_utc(&records), Some(new_format_record().from_utc));
    }

    // -------------------------------------------------------------------------
    // CUTOVER
    // -------------------------------------------------------------------------

    #[test]
    fn test_retain_before_is_strict() {
        let cutover = Utc.with_ymd_and_hms(2024, 3, 31, 15, 0, 0).unwrap();
        let rows = vec![row(3, legacy_tepco_record()), row(4, new_format_record())];

        let kept = retain_before(rows, cutover);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].record.tso.id(), "tepco");
    }
}
