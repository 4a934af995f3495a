//! Canonical area records
//!
//! [`AreaRecord`] is the in-flight numeric shape produced by the row parsers and
//! consumed by the carbon calculator. [`StoredAreaRecord`] is the storage shape:
//! natural key, denormalized JST strings and kWh quantities as exact decimal
//! strings. Numbers are only re-parsed at the calculation/display edge.

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::tso::Tso;

/// Japan Standard Time. No daylight saving, so a fixed offset is exact.
pub const JST: FixedOffset = match FixedOffset::east_opt(9 * 3600) {
    Some(offset) => offset,
    None => panic!("JST offset out of range"),
};

/// One reporting block of generation-mix data for one operator.
///
/// Signed fields (`pumped_storage_kwh`, `battery_storage_kwh`,
/// `interconnectors_kwh`) are positive for net generation/export and negative
/// for net consumption/import.
///
/// The four fossil sub-types are either all `Some` or all `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AreaRecord {
    pub tso: Tso,
    pub from_utc: DateTime<Utc>,
    pub to_utc: DateTime<Utc>,
    pub total_demand_kwh: f64,
    pub nuclear_kwh: f64,
    pub all_fossil_kwh: f64,
    pub lng_kwh: Option<f64>,
    pub coal_kwh: Option<f64>,
    pub oil_kwh: Option<f64>,
    pub other_fossil_kwh: Option<f64>,
    pub hydro_kwh: f64,
    pub geothermal_kwh: f64,
    pub biomass_kwh: f64,
    pub solar_output_kwh: f64,
    pub solar_throttling_kwh: f64,
    pub wind_output_kwh: f64,
    pub wind_throttling_kwh: f64,
    pub pumped_storage_kwh: f64,
    pub battery_storage_kwh: Option<f64>,
    pub interconnectors_kwh: f64,
    pub other_kwh: Option<f64>,
    pub total_generation_kwh: f64,
}

impl AreaRecord {
    /// True when fossil generation is broken out by fuel.
    pub fn has_fuel_types_separated(&self) -> bool {
        self.lng_kwh.is_some()
            && self.coal_kwh.is_some()
            && self.oil_kwh.is_some()
            && self.other_fossil_kwh.is_some()
    }

    pub fn local_from(&self) -> DateTime<FixedOffset> {
        self.from_utc.with_timezone(&JST)
    }

    pub fn local_to(&self) -> DateTime<FixedOffset> {
        self.to_utc.with_timezone(&JST)
    }

    /// `YYYY-MM-DD` of the block start in JST.
    pub fn local_date(&self) -> String {
        self.local_from().format("%Y-%m-%d").to_string()
    }

    /// `HH:MM` of the block start in JST.
    pub fn local_start_time(&self) -> String {
        self.local_from().format("%H:%M").to_string()
    }

    /// `operatorId_localDate_localStartTime`, e.g. `tepco_2024-04-01_00:30`.
    pub fn natural_key(&self) -> String {
        format!(
            "{}_{}_{}",
            self.tso.id(),
            self.local_date(),
            self.local_start_time()
        )
    }

    /// Sum of the positive generation and flow contributions.
    ///
    /// Net-importing interconnectors and net-charging storage are not
    /// generation, so negative entries are left out.
    pub fn positive_generation_kwh(&self) -> f64 {
        [
            Some(self.nuclear_kwh),
            Some(self.all_fossil_kwh),
            Some(self.hydro_kwh),
            Some(self.geothermal_kwh),
            Some(self.biomass_kwh),
            Some(self.solar_output_kwh),
            Some(self.wind_output_kwh),
            Some(self.pumped_storage_kwh),
            self.battery_storage_kwh,
            Some(self.interconnectors_kwh),
            self.other_kwh,
        ]
        .into_iter()
        .flatten()
        .filter(|v| *v > 0.0)
        .sum()
    }
}

/// Storage representation of an [`AreaRecord`], keyed by `data_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAreaRecord {
    pub data_id: String,
    pub tso: Tso,
    pub date_jst: String,
    pub time_from_jst: String,
    pub time_to_jst: String,
    pub datetime_from: DateTime<Utc>,
    pub datetime_to: DateTime<Utc>,
    pub total_demand_kwh: String,
    pub nuclear_kwh: String,
    pub all_fossil_kwh: String,
    pub lng_kwh: Option<String>,
    pub coal_kwh: Option<String>,
    pub oil_kwh: Option<String>,
    pub other_fossil_kwh: Option<String>,
    pub hydro_kwh: String,
    pub geothermal_kwh: String,
    pub biomass_kwh: String,
    pub solar_output_kwh: String,
    pub solar_throttling_kwh: String,
    pub wind_output_kwh: String,
    pub wind_throttling_kwh: String,
    pub pumped_storage_kwh: String,
    pub battery_storage_kwh: Option<String>,
    pub interconnectors_kwh: String,
    pub other_kwh: Option<String>,
    pub total_kwh: String,
    /// When the store last wrote the row; `None` until it is stored.
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl StoredAreaRecord {
    /// Parse the stored decimals back into an [`AreaRecord`].
    pub fn to_record(&self) -> Result<AreaRecord> {
        fn num(field: &'static str, value: &str) -> Result<f64> {
            value
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| Error::InvalidDecimal {
                    field,
                    value: value.to_string(),
                })
        }
        fn opt(
            field: &'static str,
            value: &Option<String>,
        ) -> Result<Option<f64>> {
            value.as_deref().map(|v| num(field, v)).transpose()
        }

        Ok(AreaRecord {
            tso: self.tso,
            from_utc: self.datetime_from,
            to_utc: self.datetime_to,
            total_demand_kwh: num("total_demand_kwh", &self.total_demand_kwh)?,
            nuclear_kwh: num("nuclear_kwh", &self.nuclear_kwh)?,
            all_fossil_kwh: num("all_fossil_kwh", &self.all_fossil_kwh)?,
            lng_kwh: opt("lng_kwh", &self.lng_kwh)?,
            coal_kwh: opt("coal_kwh", &self.coal_kwh)?,
            oil_kwh: opt("oil_kwh", &self.oil_kwh)?,
            other_fossil_kwh: opt("other_fossil_kwh", &self.other_fossil_kwh)?,
            hydro_kwh: num("hydro_kwh", &self.hydro_kwh)?,
            geothermal_kwh: num("geothermal_kwh", &self.geothermal_kwh)?,
            biomass_kwh: num("biomass_kwh", &self.biomass_kwh)?,
            solar_output_kwh: num("solar_output_kwh", &self.solar_output_kwh)?,
            solar_throttling_kwh: num("solar_throttling_kwh", &self.solar_throttling_kwh)?,
            wind_output_kwh: num("wind_output_kwh", &self.wind_output_kwh)?,
            wind_throttling_kwh: num("wind_throttling_kwh", &self.wind_throttling_kwh)?,
            pumped_storage_kwh: num("pumped_storage_kwh", &self.pumped_storage_kwh)?,
            battery_storage_kwh: opt("battery_storage_kwh", &self.battery_storage_kwh)?,
            interconnectors_kwh: num("interconnectors_kwh", &self.interconnectors_kwh)?,
            other_kwh: opt("other_kwh", &self.other_kwh)?,
            total_generation_kwh: num("total_kwh", &self.total_kwh)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;
    use chrono::TimeZone;

    /// New-format Kansai block, 2024-04-01 00:00-00:30 JST.
    pub fn new_format_record() -> AreaRecord {
        AreaRecord {
            tso: Tso::Kepco,
            from_utc: Utc.with_ymd_and_hms(2024, 3, 31, 15, 0, 0).unwrap(),
            to_utc: Utc.with_ymd_and_hms(2024, 3, 31, 15, 30, 0).unwrap(),
            total_demand_kwh: 7_588_000.0,
            nuclear_kwh: 0.0,
            all_fossil_kwh: 7_599_500.0,
            lng_kwh: Some(5_066_000.0),
            coal_kwh: Some(1_984_000.0),
            oil_kwh: Some(86_500.0),
            other_fossil_kwh: Some(463_000.0),
            hydro_kwh: 908_000.0,
            geothermal_kwh: 0.0,
            biomass_kwh: 254_000.0,
            solar_output_kwh: 0.0,
            solar_throttling_kwh: 0.0,
            wind_output_kwh: 14_500.0,
            wind_throttling_kwh: 0.0,
            pumped_storage_kwh: -3_500.0,
            battery_storage_kwh: Some(0.0),
            interconnectors_kwh: 2_134_500.0,
            other_kwh: Some(0.0),
            total_generation_kwh: 11_040_500.0,
        }
    }

    /// Legacy TEPCO block without fuel separation, 2020-04-01 00:00-01:00 JST.
    pub fn legacy_tepco_record() -> AreaRecord {
        AreaRecord {
            tso: Tso::Tepco,
            from_utc: Utc.with_ymd_and_hms(2020, 3, 31, 15, 0, 0).unwrap(),
            to_utc: Utc.with_ymd_and_hms(2020, 3, 31, 16, 0, 0).unwrap(),
            total_demand_kwh: 25_550_000.0,
            nuclear_kwh: 0.0,
            all_fossil_kwh: 22_580_000.0,
            lng_kwh: None,
            coal_kwh: None,
            oil_kwh: None,
            other_fossil_kwh: None,
            hydro_kwh: 920_000.0,
            geothermal_kwh: 0.0,
            biomass_kwh: 20_000.0,
            solar_output_kwh: 0.0,
            solar_throttling_kwh: 0.0,
            wind_output_kwh: 20_000.0,
            wind_throttling_kwh: 0.0,
            pumped_storage_kwh: 0.0,
            battery_storage_kwh: None,
            interconnectors_kwh: 2_010_000.0,
            other_kwh: None,
            total_generation_kwh: 25_550_000.0,
        }
    }
}
