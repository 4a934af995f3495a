//! Carbon Intensity Calculator
//!
//! Lifecycle gCO2eq/kWh of one block of generation. Pure: the emission-factor
//! and fuel-mix tables are passed in, never read from global state.

use serde::{Deserialize, Serialize};

use crate::area::AreaRecord;
use crate::error::{Error, Result};
use crate::tso::Tso;

/// Generation categories with a lifecycle emission factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationSource {
    Lng,
    Coal,
    Oil,
    OtherFossil,
    Nuclear,
    Hydro,
    Geothermal,
    Biomass,
    Solar,
    Wind,
    PumpedHydro,
    Battery,
    Other,
    Interconnectors,
}

impl GenerationSource {
    pub const ALL: [GenerationSource; 14] = [
        GenerationSource::Lng,
        GenerationSource::Coal,
        GenerationSource::Oil,
        GenerationSource::OtherFossil,
        GenerationSource::Nuclear,
        GenerationSource::Hydro,
        GenerationSource::Geothermal,
        GenerationSource::Biomass,
        GenerationSource::Solar,
        GenerationSource::Wind,
        GenerationSource::PumpedHydro,
        GenerationSource::Battery,
        GenerationSource::Other,
        GenerationSource::Interconnectors,
    ];
}

/// Lifecycle emission factors in gCO2eq/kWh.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EmissionFactors {
    pub lng: f64,
    pub coal: f64,
    pub oil: f64,
    pub other_fossil: f64,
    pub nuclear: f64,
    pub hydro: f64,
    pub geothermal: f64,
    pub biomass: f64,
    pub solar: f64,
    pub wind: f64,
    pub pumped_hydro: f64,
    pub battery: f64,
    pub other: f64,
    /// Default for imported energy; callers may override per calculation.
    pub interconnectors: f64,
}

impl Default for EmissionFactors {
    fn default() -> Self {
        Self {
            lng: 490.0,
            coal: 820.0,
            oil: 650.0,
            other_fossil: 729.0,
            nuclear: 12.0,
            hydro: 24.0,
            geothermal: 38.0,
            biomass: 230.0,
            solar: 48.0,
            wind: 11.0,
            pumped_hydro: 24.0,
            battery: 0.0,
            other: 0.0,
            interconnectors: 543.0,
        }
    }
}

impl EmissionFactors {
    pub fn factor(&self, source: GenerationSource) -> f64 {
        match source {
            GenerationSource::Lng => self.lng,
            GenerationSource::Coal => self.coal,
            GenerationSource::Oil => self.oil,
            GenerationSource::OtherFossil => self.other_fossil,
            GenerationSource::Nuclear => self.nuclear,
            GenerationSource::Hydro => self.hydro,
            GenerationSource::Geothermal => self.geothermal,
            GenerationSource::Biomass => self.biomass,
            GenerationSource::Solar => self.solar,
            GenerationSource::Wind => self.wind,
            GenerationSource::PumpedHydro => self.pumped_hydro,
            GenerationSource::Battery => self.battery,
            GenerationSource::Other => self.other,
            GenerationSource::Interconnectors => self.interconnectors,
        }
    }
}

/// Relative historical volumes of the three main fossil fuels for one operator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FuelMix {
    pub coal: f64,
    pub oil: f64,
    pub lng: f64,
}

impl FuelMix {
    const fn new(coal: f64, oil: f64, lng: f64) -> Self {
        Self { coal, oil, lng }
    }

    /// Volume-weighted factor for a combined fossil figure.
    pub fn blended_intensity(&self, factors: &EmissionFactors) -> f64 {
        let volume = self.coal + self.oil + self.lng;
        if volume <= 0.0 {
            return 0.0;
        }
        (self.coal * factors.coal + self.oil * factors.oil + self.lng * factors.lng) / volume
    }

    fn validate(&self, tso: Tso) -> Result<()> {
        let parts = [self.coal, self.oil, self.lng];
        if parts.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::InvalidCarbonTables(format!(
                "{tso}: fuel mix volumes must be finite and non-negative"
            )));
        }
        if parts.iter().sum::<f64>() <= 0.0 {
            return Err(Error::InvalidCarbonTables(format!(
                "{tso}: fuel mix volumes sum to zero"
            )));
        }
        Ok(())
    }
}

/// Fuel-mix proxy weights per operator.
///
/// Used only for records without fuel separation. Coal-heavy grids
/// (Hokkaido, Hokuriku, Chugoku, Shikoku, Okinawa) and LNG-heavy grids
/// (Tokyo, Chubu, Kansai) differ by more than 150 g/kWh in their blend.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FuelMixProfiles {
    pub hepco: FuelMix,
    pub tohoku: FuelMix,
    pub tepco: FuelMix,
    pub chubu: FuelMix,
    pub hokuden: FuelMix,
    pub kepco: FuelMix,
    pub chugoku: FuelMix,
    pub yonden: FuelMix,
    pub kyuden: FuelMix,
    pub okiden: FuelMix,
}

impl Default for FuelMixProfiles {
    fn default() -> Self {
        // GWh per fiscal year
        Self {
            hepco: FuelMix::new(9_812.0, 1_830.0, 2_540.0),
            tohoku: FuelMix::new(27_143.0, 2_410.0, 25_980.0),
            tepco: FuelMix::new(40_016.0, 12_000.0, 153_096.0),
            chubu: FuelMix::new(22_310.0, 1_120.0, 75_380.0),
            hokuden: FuelMix::new(13_460.0, 1_520.0, 1_180.0),
            kepco: FuelMix::new(13_750.0, 2_870.0, 47_930.0),
            chugoku: FuelMix::new(18_920.0, 2_650.0, 6_740.0),
            yonden: FuelMix::new(8_470.0, 960.0, 2_310.0),
            kyuden: FuelMix::new(19_880.0, 1_740.0, 22_460.0),
            okiden: FuelMix::new(4_630.0, 1_640.0, 1_310.0),
        }
    }
}

impl FuelMixProfiles {
    pub fn get(&self, tso: Tso) -> &FuelMix {
        match tso {
            Tso::Hepco => &self.hepco,
            Tso::Tohoku => &self.tohoku,
            Tso::Tepco => &self.tepco,
            Tso::Chubu => &self.chubu,
            Tso::Hokuden => &self.hokuden,
            Tso::Kepco => &self.kepco,
            Tso::Chugoku => &self.chugoku,
            Tso::Yonden => &self.yonden,
            Tso::Kyuden => &self.kyuden,
            Tso::Okiden => &self.okiden,
        }
    }
}

/// Everything the calculator needs, loaded once at start-up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CarbonTables {
    pub factors: EmissionFactors,
    pub fuel_mix: FuelMixProfiles,
}

impl CarbonTables {
    /// Parse tables from JSON. Missing entries keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let tables: CarbonTables = serde_json::from_str(json)?;
        tables.validate()?;
        Ok(tables)
    }

    pub fn validate(&self) -> Result<()> {
        for source in GenerationSource::ALL {
            let factor = self.factors.factor(source);
            if !factor.is_finite() || factor < 0.0 {
                return Err(Error::InvalidCarbonTables(format!(
                    "factor for {source:?} must be finite and non-negative, got {factor}"
                )));
            }
        }
        for tso in Tso::ALL {
            self.fuel_mix.get(tso).validate(tso)?;
        }
        Ok(())
    }
}

/// Round half away from zero to 3 decimal places.
fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// Carbon intensity of one block in gCO2eq/kWh, rounded to 3 dp.
///
/// Negative contributions (net import, net charging) are not this operator's
/// emissions and are left out. A block with no generation yields 0.
pub fn compute_intensity(
    record: &AreaRecord,
    tables: &CarbonTables,
    interconnector_override: Option<f64>,
) -> f64 {
    let total = record.total_generation_kwh;
    if total == 0.0 || !total.is_finite() {
        return 0.0;
    }

    let f = &tables.factors;
    let fossil = match (
        record.lng_kwh,
        record.coal_kwh,
        record.oil_kwh,
        record.other_fossil_kwh,
    ) {
        (Some(lng), Some(coal), Some(oil), Some(other_fossil)) => vec![
            lng * f.lng,
            coal * f.coal,
            oil * f.oil,
            other_fossil * f.other_fossil,
        ],
        _ => {
            let blended = tables.fuel_mix.get(record.tso).blended_intensity(f);
            vec![record.all_fossil_kwh * blended]
        }
    };

    let interconnector_factor = interconnector_override.unwrap_or(f.interconnectors);
    let others = [
        record.nuclear_kwh * f.nuclear,
        record.hydro_kwh * f.hydro,
        record.geothermal_kwh * f.geothermal,
        record.biomass_kwh * f.biomass,
        record.solar_output_kwh * f.solar,
        record.wind_output_kwh * f.wind,
        record.pumped_storage_kwh * f.pumped_hydro,
        record.interconnectors_kwh * interconnector_factor,
        record.battery_storage_kwh.unwrap_or(0.0) * f.battery,
        record.other_kwh.unwrap_or(0.0) * f.other,
    ];

    let emissions: f64 = fossil
        .into_iter()
        .chain(others)
        .filter(|c| *c > 0.0)
        .sum();

    let intensity = round3(emissions / total);
    // a negative total would flip the sign
    intensity.max(0.0)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::area::fixtures::{legacy_tepco_record, new_format_record};

    // -------------------------------------------------------------------------
    // INTENSITY
    // -------------------------------------------------------------------------

    #[test]
    fn test_new_format_intensity() {
        let tables = CarbonTables::default();
        assert_eq!(compute_intensity(&new_format_record(), &tables, None), 520.119);
    }

    #[test]
    fn test_legacy_aggregate_path_intensity() {
        let tables = CarbonTables::default();
        assert_eq!(compute_intensity(&legacy_tepco_record(), &tables, None), 541.981);
    }

    #[test]
    fn test_all_zero_record_is_zero() {
        let mut record = new_format_record();
        record.total_demand_kwh = 0.0;
        record.all_fossil_kwh = 0.0;
        record.lng_kwh = Some(0.0);
        record.coal_kwh = Some(0.0);
        record.oil_kwh = Some(0.0);
        record.other_fossil_kwh = Some(0.0);
        record.hydro_kwh = 0.0;
        record.biomass_kwh = 0.0;
        record.wind_output_kwh = 0.0;
        record.pumped_storage_kwh = 0.0;
        record.interconnectors_kwh = 0.0;
        record.total_generation_kwh = 0.0;

        assert_eq!(compute_intensity(&record, &CarbonTables::default(), None), 0.0);
    }

    #[test]
    fn test_zero_total_guards_division() {
        let mut record = legacy_tepco_record();
        record.total_generation_kwh = 0.0;
        let intensity = compute_intensity(&record, &CarbonTables::default(), None);
        assert_eq!(intensity, 0.0);
        assert!(intensity.is_finite());
    }

    #[test]
    fn test_interconnector_override() {
        let tables = CarbonTables::default();
        let record = new_format_record();
        let default = compute_intensity(&record, &tables, None);
        let clean = compute_intensity(&record, &tables, Some(0.0));
        // 2134500 kWh * 543 g / 11040500 kWh
        assert!((default - clean - 104.980).abs() < 0.002);
    }

    #[test]
    fn test_imports_do_not_count() {
        let tables = CarbonTables::default();
        let mut record = new_format_record();
        let with_export = compute_intensity(&record, &tables, None);
        record.interconnectors_kwh = -record.interconnectors_kwh;
        assert!(compute_intensity(&record, &tables, None) < with_export);
        assert!(compute_intensity(&record, &tables, None) >= 0.0);
    }

    // -------------------------------------------------------------------------
    // TABLES
    // -------------------------------------------------------------------------

    #[test]
    fn test_blended_intensity_is_weighted_average() {
        let factors = EmissionFactors::default();
        let coal_only = FuelMix::new(1.0, 0.0, 0.0);
        assert_eq!(coal_only.blended_intensity(&factors), 820.0);

        let tepco = CarbonTables::default().fuel_mix.get(Tso::Tepco).blended_intensity(&factors);
        assert!((tepco - 563.7416).abs() < 1e-4);

        let hokuden = CarbonTables::default()
            .fuel_mix
            .get(Tso::Hokuden)
            .blended_intensity(&factors);
        assert!(hokuden > tepco);
    }

    #[test]
    fn test_default_tables_are_valid() {
        CarbonTables::default().validate().unwrap();
    }

    #[test]
    fn test_from_json_overrides_partially() {
        let tables = CarbonTables::from_json(
            r#"{"factors": {"coal": 900}, "fuel_mix": {"okiden": {"coal": 1, "oil": 0, "lng": 0}}}"#,
        )
        .unwrap();
        assert_eq!(tables.factors.coal, 900.0);
        assert_eq!(tables.factors.lng, 490.0);
        assert_eq!(tables.fuel_mix.okiden, FuelMix::new(1.0, 0.0, 0.0));
        assert_eq!(tables.fuel_mix.tepco, FuelMixProfiles::default().tepco);
    }

    #[test]
    fn test_from_json_rejects_bad_tables() {
        assert!(matches!(
            CarbonTables::from_json(r#"{"factors": {"coal": -1}}"#),
            Err(Error::InvalidCarbonTables(_))
        ));
        assert!(matches!(
            CarbonTables::from_json(r#"{"fuel_mix": {"tepco": {"coal": 0, "oil": 0, "lng": 0}}}"#),
            Err(Error::InvalidCarbonTables(_))
        ));
        assert!(matches!(
            CarbonTables::from_json(r#"{"factors": {"uranium": 5}}"#),
            Err(Error::Json(_))
        ));
    }
}
