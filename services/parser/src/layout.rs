//! Report layouts (format configs)
//!
//! Every operator publishes two families of reports:
//! - Legacy: one file per historical period, 60-minute blocks, energy already
//!   accumulated per block (MWh or 万kWh), operator-specific column sets.
//! - New: the industry-standard 20-column layout used by all ten operators
//!   since April 2024, 30-minute blocks, average MW per block.
//!
//! A layout is a fixed description. Whether a missing value means null or
//! zero is decided here per field, never inferred from the data.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::grid::{FileKind, TextEncoding};
use crate::tso::Tso;

/// Which family of layouts a source file belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatTag {
    Legacy,
    New,
}

impl FormatTag {
    pub fn as_str(self) -> &'static str {
        match self {
            FormatTag::Legacy => "legacy",
            FormatTag::New => "new",
        }
    }
}

/// How one canonical field is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Column {
    /// Mandatory. A blank cell drops the row (not-yet-elapsed block).
    Required(&'static [&'static str]),
    /// Present in the file; blank or dash placeholders read as zero.
    ZeroWhenBlank(&'static [&'static str]),
    /// The operator has no such source; always zero.
    Zero,
    /// The file never carries this field; null for every row.
    Absent,
}

impl Column {
    pub fn labels(self) -> Option<&'static [&'static str]> {
        match self {
            Column::Required(labels) | Column::ZeroWhenBlank(labels) => Some(labels),
            Column::Zero | Column::Absent => None,
        }
    }
}

/// Where the block timestamp lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeColumns {
    /// Separate date and clock-time cells.
    Split {
        date: &'static [&'static str],
        time: &'static [&'static str],
    },
    /// One cell holding `date time`.
    Combined(&'static [&'static str]),
}

/// Numeric convention of the value cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Units {
    /// Energy per block in MWh.
    MegawattHours,
    /// Energy per block in 万kWh (10,000 kWh).
    TenThousandKwh,
    /// Average power over the block in MW.
    AverageMegawatts,
}

impl Units {
    /// Convert a raw cell value to kWh for a block of `block_minutes`.
    pub fn to_kwh(self, value: f64, block_minutes: u32) -> f64 {
        match self {
            Units::MegawattHours => value * 1000.0,
            Units::TenThousandKwh => value * 10_000.0,
            Units::AverageMegawatts => value * 1000.0 * (f64::from(block_minutes) / 60.0),
        }
    }
}

/// Column spec for every canonical field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Columns {
    pub demand: Column,
    pub nuclear: Column,
    /// `Absent` means: derive from the four fuel columns.
    pub all_fossil: Column,
    pub lng: Column,
    pub coal: Column,
    pub oil: Column,
    pub other_fossil: Column,
    pub hydro: Column,
    pub geothermal: Column,
    pub biomass: Column,
    pub solar_output: Column,
    pub solar_throttling: Column,
    pub wind_output: Column,
    pub wind_throttling: Column,
    pub pumped_storage: Column,
    pub battery: Column,
    pub interconnectors: Column,
    pub other: Column,
    /// `Absent`, or a blank cell, means: sum of positive contributions.
    pub total: Column,
}

impl Columns {
    fn fuel_columns(&self) -> [Column; 4] {
        [self.lng, self.coal, self.oil, self.other_fossil]
    }
}

/// A complete parser configuration for one report layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub name: &'static str,
    pub format: FormatTag,
    pub encoding: TextEncoding,
    pub file_kind: FileKind,
    /// Cell text identifying the header row.
    pub header_token: &'static str,
    pub time: TimeColumns,
    /// chrono formats tried in order for the date part.
    pub date_formats: &'static [&'static str],
    pub block_minutes: u32,
    pub units: Units,
    /// The clock time labels the end of the block instead of its start.
    pub is_time_at_end_of_block: bool,
    /// Source reports imports as positive; negate to the canonical sign.
    pub flip_interconnectors: bool,
    pub columns: Columns,
}

impl Layout {
    /// Check the structural invariants of a layout.
    ///
    /// The four fuel columns must be all present or all absent, and the
    /// all-fossil figure must be either read or derivable.
    pub fn validate(&self) -> Result<()> {
        let fuels = self.columns.fuel_columns();
        let absent = fuels.iter().filter(|c| **c == Column::Absent).count();
        if absent != 0 && absent != fuels.len() {
            return Err(Error::InvalidLayout(format!(
                "{}: fuel columns must be all present or all absent",
                self.name
            )));
        }
        if self.columns.all_fossil == Column::Absent && absent == fuels.len() {
            return Err(Error::InvalidLayout(format!(
                "{}: no fossil figure can be read or derived",
                self.name
            )));
        }
        if matches!(self.columns.demand, Column::Zero | Column::Absent) {
            return Err(Error::InvalidLayout(format!(
                "{}: demand column is mandatory",
                self.name
            )));
        }
        Ok(())
    }
}

// =============================================================================
// NEW LAYOUT - shared by all operators from April 2024
// =============================================================================

const DATE_SLASH: &[&str] = &["%Y/%m/%d", "%Y-%m-%d", "%Y%m%d"];

/// The standardized 20-column "エリア需給実績" layout.
pub static NEW_FORMAT: Layout = Layout {
    name: "eria_jukyu",
    format: FormatTag::New,
    encoding: TextEncoding::ShiftJis,
    file_kind: FileKind::Csv,
    header_token: "DATE",
    time: TimeColumns::Split {
        date: &["DATE"],
        time: &["TIME"],
    },
    date_formats: DATE_SLASH,
    block_minutes: 30,
    units: Units::AverageMegawatts,
    is_time_at_end_of_block: false,
    flip_interconnectors: false,
    columns: Columns {
        demand: Column::Required(&["エリア需要"]),
        nuclear: Column::ZeroWhenBlank(&["原子力"]),
        all_fossil: Column::Absent,
        lng: Column::ZeroWhenBlank(&["火力(LNG)"]),
        coal: Column::ZeroWhenBlank(&["火力(石炭)"]),
        oil: Column::ZeroWhenBlank(&["火力(石油)"]),
        other_fossil: Column::ZeroWhenBlank(&["火力(その他)"]),
        hydro: Column::ZeroWhenBlank(&["水力"]),
        geothermal: Column::ZeroWhenBlank(&["地熱"]),
        biomass: Column::ZeroWhenBlank(&["バイオマス"]),
        solar_output: Column::ZeroWhenBlank(&["太陽光発電実績"]),
        solar_throttling: Column::ZeroWhenBlank(&["太陽光出力制御量"]),
        wind_output: Column::ZeroWhenBlank(&["風力発電実績"]),
        wind_throttling: Column::ZeroWhenBlank(&["風力出力制御量"]),
        pumped_storage: Column::ZeroWhenBlank(&["揚水"]),
        battery: Column::ZeroWhenBlank(&["蓄電池"]),
        interconnectors: Column::ZeroWhenBlank(&["連系線"]),
        other: Column::ZeroWhenBlank(&["その他"]),
        total: Column::ZeroWhenBlank(&["合計"]),
    },
};

// =============================================================================
// LEGACY LAYOUTS - one per operator
// =============================================================================

const DEMAND: Column = Column::Required(&["エリア需要", "需要"]);
const NUCLEAR: Column = Column::ZeroWhenBlank(&["原子力"]);
const FOSSIL: Column = Column::ZeroWhenBlank(&["火力"]);
const HYDRO: Column = Column::ZeroWhenBlank(&["水力"]);
const GEOTHERMAL: Column = Column::ZeroWhenBlank(&["地熱"]);
const BIOMASS: Column = Column::ZeroWhenBlank(&["バイオマス"]);
const SOLAR: Column = Column::ZeroWhenBlank(&["太陽光発電実績", "太陽光実績"]);
const SOLAR_THROTTLING: Column = Column::ZeroWhenBlank(&["太陽光出力制御量", "太陽光抑制量"]);
const WIND: Column = Column::ZeroWhenBlank(&["風力発電実績", "風力実績"]);
const WIND_THROTTLING: Column = Column::ZeroWhenBlank(&["風力出力制御量", "風力抑制量"]);
const PUMPED: Column = Column::ZeroWhenBlank(&["揚水"]);
const INTERCONNECTORS: Column = Column::ZeroWhenBlank(&["連系線"]);
const TOTAL: Column = Column::ZeroWhenBlank(&["合計"]);

const LEGACY_COLUMNS: Columns = Columns {
    demand: DEMAND,
    nuclear: NUCLEAR,
    all_fossil: FOSSIL,
    lng: Column::Absent,
    coal: Column::Absent,
    oil: Column::Absent,
    other_fossil: Column::Absent,
    hydro: HYDRO,
    geothermal: GEOTHERMAL,
    biomass: BIOMASS,
    solar_output: SOLAR,
    solar_throttling: SOLAR_THROTTLING,
    wind_output: WIND,
    wind_throttling: WIND_THROTTLING,
    pumped_storage: PUMPED,
    battery: Column::Absent,
    interconnectors: INTERCONNECTORS,
    other: Column::Absent,
    total: TOTAL,
};

const SPLIT_DATE_TIME: TimeColumns = TimeColumns::Split {
    date: &["DATE"],
    time: &["TIME"],
};

const LEGACY_CSV: Layout = Layout {
    name: "legacy",
    format: FormatTag::Legacy,
    encoding: TextEncoding::ShiftJis,
    file_kind: FileKind::Csv,
    header_token: "DATE",
    time: SPLIT_DATE_TIME,
    date_formats: DATE_SLASH,
    block_minutes: 60,
    units: Units::MegawattHours,
    is_time_at_end_of_block: false,
    flip_interconnectors: false,
    columns: LEGACY_COLUMNS,
};

pub static HEPCO_LEGACY: Layout = Layout {
    name: "hepco_legacy",
    header_token: "日付",
    time: TimeColumns::Split {
        date: &["日付"],
        time: &["時刻"],
    },
    columns: Columns {
        battery: Column::ZeroWhenBlank(&["蓄電池"]),
        total: Column::Absent,
        ..LEGACY_COLUMNS
    },
    ..LEGACY_CSV
};

pub static TOHOKU_LEGACY: Layout = Layout {
    name: "tohoku_legacy",
    is_time_at_end_of_block: true,
    ..LEGACY_CSV
};

pub static TEPCO_LEGACY: Layout = Layout {
    name: "tepco_legacy",
    units: Units::TenThousandKwh,
    ..LEGACY_CSV
};

pub static CHUBU_LEGACY: Layout = Layout {
    name: "chubu_legacy",
    flip_interconnectors: true,
    ..LEGACY_CSV
};

pub static HOKUDEN_LEGACY: Layout = Layout {
    name: "hokuden_legacy",
    file_kind: FileKind::Xls,
    header_token: "日時",
    time: TimeColumns::Combined(&["日時"]),
    ..LEGACY_CSV
};

pub static KEPCO_LEGACY: Layout = Layout {
    name: "kepco_legacy",
    ..LEGACY_CSV
};

pub static CHUGOKU_LEGACY: Layout = Layout {
    name: "chugoku_legacy",
    file_kind: FileKind::Xls,
    header_token: "日時",
    time: TimeColumns::Combined(&["日時"]),
    columns: Columns {
        total: Column::Absent,
        ..LEGACY_COLUMNS
    },
    ..LEGACY_CSV
};

pub static YONDEN_LEGACY: Layout = Layout {
    name: "yonden_legacy",
    columns: Columns {
        other: Column::ZeroWhenBlank(&["その他"]),
        ..LEGACY_COLUMNS
    },
    ..LEGACY_CSV
};

pub static KYUDEN_LEGACY: Layout = Layout {
    name: "kyuden_legacy",
    encoding: TextEncoding::Utf8,
    header_token: "DATE_TIME",
    time: TimeColumns::Combined(&["DATE_TIME"]),
    ..LEGACY_CSV
};

pub static OKIDEN_LEGACY: Layout = Layout {
    name: "okiden_legacy",
    file_kind: FileKind::Zip,
    columns: Columns {
        nuclear: Column::Zero,
        pumped_storage: Column::Zero,
        interconnectors: Column::Zero,
        ..LEGACY_COLUMNS
    },
    ..LEGACY_CSV
};

/// The legacy layout for an operator.
pub fn legacy_layout(tso: Tso) -> &'static Layout {
    match tso {
        Tso::Hepco => &HEPCO_LEGACY,
        Tso::Tohoku => &TOHOKU_LEGACY,
        Tso::Tepco => &TEPCO_LEGACY,
        Tso::Chubu => &CHUBU_LEGACY,
        Tso::Hokuden => &HOKUDEN_LEGACY,
        Tso::Kepco => &KEPCO_LEGACY,
        Tso::Chugoku => &CHUGOKU_LEGACY,
        Tso::Yonden => &YONDEN_LEGACY,
        Tso::Kyuden => &KYUDEN_LEGACY,
        Tso::Okiden => &OKIDEN_LEGACY,
    }
}

/// The layout for an operator's file of the given family.
pub fn layout_for(tso: Tso, format: FormatTag) -> &'static Layout {
    match format {
        FormatTag::Legacy => legacy_layout(tso),
        FormatTag::New => &NEW_FORMAT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_layouts_are_valid() {
        NEW_FORMAT.validate().unwrap();
        for tso in Tso::ALL {
            legacy_layout(tso).validate().unwrap();
        }
    }

    #[test]
    fn test_partial_fuel_columns_rejected() {
        let layout = Layout {
            columns: Columns {
                lng: Column::ZeroWhenBlank(&["火力(LNG)"]),
                ..LEGACY_COLUMNS
            },
            ..LEGACY_CSV
        };
        assert!(matches!(layout.validate(), Err(Error::InvalidLayout(_))));
    }

    #[test]
    fn test_unit_conversion() {
        // average MW over 30 minutes
        assert_eq!(Units::AverageMegawatts.to_kwh(100.0, 30), 50_000.0);
        // MWh over 60 minutes
        assert_eq!(Units::MegawattHours.to_kwh(100.0, 60), 100_000.0);
        assert_eq!(Units::TenThousandKwh.to_kwh(2258.0, 60), 22_580_000.0);
    }

    #[test]
    fn test_only_chubu_flips_interconnectors() {
        let flipped: Vec<Tso> = Tso::ALL
            .into_iter()
            .filter(|t| legacy_layout(*t).flip_interconnectors)
            .collect();
        assert_eq!(flipped, vec![Tso::Chubu]);
    }

    #[test]
    fn test_only_kyuden_is_utf8() {
        for tso in Tso::ALL {
            let expected = if tso == Tso::Kyuden {
                TextEncoding::Utf8
            } else {
                TextEncoding::ShiftJis
            };
            assert_eq!(legacy_layout(tso).encoding, expected, "{tso}");
        }
    }

    #[test]
    fn test_layout_for_new_format_is_shared() {
        assert_eq!(layout_for(Tso::Hepco, FormatTag::New), &NEW_FORMAT);
        assert_eq!(layout_for(Tso::Okiden, FormatTag::New), &NEW_FORMAT);
        assert_eq!(layout_for(Tso::Tepco, FormatTag::Legacy).name, "tepco_legacy");
    }
}
