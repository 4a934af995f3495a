//! OCCTO interconnector flows
//!
//! OCCTO publishes one reading per interconnector every 5 minutes (average MW,
//! labelled by the start of the reading). Six consecutive readings aligned on
//! :00 or :30 form one 30-minute block, matching the new-format area data.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::area::JST;
use crate::error::{Error, Result};
use crate::grid::{find_column, find_header_row, normalize_label, Grid};
use crate::interval::start_of_most_recent_half_hour;
use crate::rows::{label_datetime, parse_clock, parse_date, PLACEHOLDERS};
use crate::tso::Tso;

const READING_MINUTES: i64 = 5;
const READINGS_PER_BLOCK: usize = 6;
const BLOCK_MINUTES: i64 = 30;

/// One physical link between two operator areas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interconnector {
    pub id: &'static str,
    /// Label as printed in OCCTO reports.
    pub label: &'static str,
    /// Positive flow runs from `from` to `to`.
    pub from: Tso,
    pub to: Tso,
}

pub static INTERCONNECTORS: [Interconnector; 10] = [
    Interconnector {
        id: "hokkaido_honshu",
        label: "北海道本州間電力連系設備",
        from: Tso::Hepco,
        to: Tso::Tohoku,
    },
    Interconnector {
        id: "tohoku_tokyo",
        label: "相馬双葉幹線",
        from: Tso::Tohoku,
        to: Tso::Tepco,
    },
    Interconnector {
        id: "tokyo_chubu",
        label: "周波数変換設備",
        from: Tso::Tepco,
        to: Tso::Chubu,
    },
    Interconnector {
        id: "chubu_kansai",
        label: "三重東近江線",
        from: Tso::Chubu,
        to: Tso::Kepco,
    },
    Interconnector {
        id: "chubu_hokuriku",
        label: "南福光連系所・南福光変電所の連系設備",
        from: Tso::Chubu,
        to: Tso::Hokuden,
    },
    Interconnector {
        id: "hokuriku_kansai",
        label: "越前嶺南線",
        from: Tso::Hokuden,
        to: Tso::Kepco,
    },
    Interconnector {
        id: "kansai_chugoku",
        label: "西播東岡山線・山崎智頭線",
        from: Tso::Kepco,
        to: Tso::Chugoku,
    },
    Interconnector {
        id: "kansai_shikoku",
        label: "阿南紀北直流幹線",
        from: Tso::Kepco,
        to: Tso::Yonden,
    },
    Interconnector {
        id: "chugoku_shikoku",
        label: "本四連系線",
        from: Tso::Chugoku,
        to: Tso::Yonden,
    },
    Interconnector {
        id: "chugoku_kyushu",
        label: "関門連系線",
        from: Tso::Chugoku,
        to: Tso::Kyuden,
    },
];

/// Look up an interconnector by its OCCTO label.
pub fn lookup(label: &str) -> Result<&'static Interconnector> {
    let wanted = normalize_label(label);
    INTERCONNECTORS
        .iter()
        .find(|ic| normalize_label(ic.label) == wanted)
        .ok_or_else(|| Error::MissingInterconnectorMapping(label.to_string()))
}

/// One 5-minute reading. Blank cells are kept as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowReading {
    pub label: String,
    pub at_utc: DateTime<Utc>,
    pub mw: f64,
}

/// Net energy over one 30-minute block of one interconnector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterconnectorFlow {
    pub interconnector: String,
    pub from_tso: Tso,
    pub to_tso: Tso,
    pub from_utc: DateTime<Utc>,
    pub to_utc: DateTime<Utc>,
    pub flow_kwh: f64,
}

const LABEL: &[&str] = &["連系線"];
const DATE: &[&str] = &["対象日付", "年月日", "日付"];
const TIME: &[&str] = &["対象時刻", "時刻"];
const FLOW: &[&str] = &["潮流実績", "実績"];
const DATE_FORMATS: &[&str] = &["%Y/%m/%d", "%Y-%m-%d", "%Y%m%d"];

/// Parse an OCCTO flow report grid into readings.
pub fn parse_flow_grid(grid: &Grid) -> Result<Vec<FlowReading>> {
    let header_idx = find_header_row(grid, LABEL[0])?;
    let headers = &grid[header_idx];
    let column = |field: &'static str, labels: &'static [&'static str]| {
        find_column(headers, labels).ok_or(Error::MissingColumn { field, labels })
    };
    let label_col = column("interconnector", LABEL)?;
    let date_col = column("date", DATE)?;
    let time_col = column("time", TIME)?;
    let flow_col = column("flow", FLOW)?;

    let mut readings = Vec::new();
    for (idx, row) in grid.iter().enumerate().skip(header_idx + 1) {
        let line = idx + 1;
        let cell = |i: usize| row.get(i).map(|c| c.trim()).unwrap_or("");
        if cell(label_col).is_empty() {
            continue;
        }

        let date = parse_date(cell(date_col), DATE_FORMATS)
            .ok_or_else(|| Error::malformed(line, "unparseable date", row))?;
        let local = parse_clock(cell(time_col))
            .and_then(|clock| label_datetime(date, clock))
            .ok_or_else(|| Error::malformed(line, "unparseable time", row))?;
        let at = local
            .and_local_timezone(JST)
            .single()
            .ok_or_else(|| Error::malformed(line, "ambiguous local time", row))?;

        let raw_flow = cell(flow_col);
        let mw = if PLACEHOLDERS.contains(&raw_flow) {
            f64::NAN
        } else {
            raw_flow
                .replace(',', "")
                .parse::<f64>()
                .map_err(|_| Error::malformed(line, format!("non-numeric flow {raw_flow:?}"), row))?
        };

        readings.push(FlowReading {
            label: cell(label_col).to_string(),
            at_utc: at.with_timezone(&Utc),
            mw,
        });
    }

    debug!(readings = readings.len(), "parsed interconnector readings");
    Ok(readings)
}

/// Group 5-minute readings into 30-minute blocks per interconnector.
///
/// Incomplete blocks and blocks with more than a third of non-finite
/// readings are dropped. Duplicate or misaligned readings fail the batch.
pub fn consolidate_flows(readings: &[FlowReading]) -> Result<Vec<InterconnectorFlow>> {
    let mut seen: BTreeSet<(&'static str, DateTime<Utc>)> = BTreeSet::new();
    let mut blocks: BTreeMap<(&'static str, DateTime<Utc>), (&'static Interconnector, Vec<f64>)> =
        BTreeMap::new();

    for reading in readings {
        let ic = lookup(&reading.label)?;
        let at = reading.at_utc;
        if at.minute() % READING_MINUTES as u32 != 0 || at.second() != 0 || at.nanosecond() != 0 {
            return Err(Error::UpstreamDataIntegrity(format!(
                "{} reading at {at} is not on a {READING_MINUTES}-minute boundary",
                ic.id
            )));
        }
        if !seen.insert((ic.id, at)) {
            return Err(Error::UpstreamDataIntegrity(format!(
                "duplicate {} reading at {at}",
                ic.id
            )));
        }
        let start = start_of_most_recent_half_hour(&at);
        blocks
            .entry((ic.id, start))
            .or_insert_with(|| (ic, Vec::with_capacity(READINGS_PER_BLOCK)))
            .1
            .push(reading.mw);
    }

    let mut flows = Vec::with_capacity(blocks.len());
    for ((id, start), (ic, values)) in blocks {
        if values.len() < READINGS_PER_BLOCK {
            warn!(
                interconnector = id,
                from = %start,
                readings = values.len(),
                "incomplete block dropped"
            );
            continue;
        }
        let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
        let non_finite = values.len() - finite.len();
        if non_finite * 3 > values.len() {
            warn!(
                interconnector = id,
                from = %start,
                non_finite,
                "too many missing readings, block dropped"
            );
            continue;
        }

        let mean_mw = finite.iter().sum::<f64>() / finite.len() as f64;
        flows.push(InterconnectorFlow {
            interconnector: id.to_string(),
            from_tso: ic.from,
            to_tso: ic.to,
            from_utc: start,
            to_utc: start + TimeDelta::minutes(BLOCK_MINUTES),
            flow_kwh: mean_mw * 1000.0 * (BLOCK_MINUTES as f64 / 60.0),
        });
    }

    Ok(flows)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::csv_to_grid;
    use chrono::TimeZone;

    fn reading(label: &str, minute: u32, mw: f64) -> FlowReading {
        FlowReading {
            label: label.to_string(),
            at_utc: Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
                + TimeDelta::minutes(i64::from(minute)),
            mw,
        }
    }

    fn block(label: &str, first_minute: u32, values: &[f64]) -> Vec<FlowReading> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| reading(label, first_minute + 5 * i as u32, *v))
            .collect()
    }

    // -------------------------------------------------------------------------
    // TABLE
    // -------------------------------------------------------------------------

    #[test]
    fn test_lookup() {
        let ic = lookup("関門連系線").unwrap();
        assert_eq!(ic.from, Tso::Chugoku);
        assert_eq!(ic.to, Tso::Kyuden);
        assert!(lookup(" 関門 連系線 ").is_ok());
        assert!(matches!(
            lookup("沖縄本土連系線"),
            Err(Error::MissingInterconnectorMapping(_))
        ));
    }

    #[test]
    fn test_okinawa_is_isolated() {
        assert!(INTERCONNECTORS
            .iter()
            .all(|ic| ic.from != Tso::Okiden && ic.to != Tso::Okiden));
    }

    // -------------------------------------------------------------------------
    // CONSOLIDATION
    // -------------------------------------------------------------------------

    #[test]
    fn test_consolidate_full_block() {
        let readings = block("関門連系線", 0, &[100.0, 110.0, 120.0, 130.0, 140.0, 150.0]);
        let flows = consolidate_flows(&readings).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].interconnector, "chugoku_kyushu");
        assert_eq!(flows[0].from_utc, Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap());
        assert_eq!(flows[0].to_utc, Utc.with_ymd_and_hms(2024, 4, 1, 0, 30, 0).unwrap());
        // mean 125 MW over half an hour
        assert_eq!(flows[0].flow_kwh, 62_500.0);
    }

    #[test]
    fn test_consolidate_tolerates_a_third_missing() {
        let readings = block("本四連系線", 30, &[-60.0, f64::NAN, -60.0, f64::NAN, -60.0, -60.0]);
        let flows = consolidate_flows(&readings).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow_kwh, -30_000.0);
    }

    #[test]
    fn test_consolidate_drops_poor_blocks() {
        let mut readings = block("本四連系線", 0, &[1.0, f64::NAN, f64::NAN, f64::NAN, 1.0, 1.0]);
        readings.extend(block("関門連系線", 0, &[1.0, 1.0, 1.0]));
        readings.extend(block("関門連系線", 30, &[2.0; 6]));

        let flows = consolidate_flows(&readings).unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].flow_kwh, 1_000.0);
    }

    #[test]
    fn test_consolidate_rejects_duplicates_and_misalignment() {
        let mut readings = block("関門連系線", 0, &[1.0; 6]);
        readings.push(reading("関門連系線", 10, 1.0));
        assert!(matches!(
            consolidate_flows(&readings),
            Err(Error::UpstreamDataIntegrity(_))
        ));

        let readings = vec![reading("関門連系線", 7, 1.0)];
        assert!(matches!(
            consolidate_flows(&readings),
            Err(Error::UpstreamDataIntegrity(_))
        ));
    }

    #[test]
    fn test_consolidate_rejects_unknown_label() {
        let readings = block("新連系線", 0, &[1.0; 6]);
        assert!(matches!(
            consolidate_flows(&readings),
            Err(Error::MissingInterconnectorMapping(_))
        ));
    }

    // -------------------------------------------------------------------------
    // GRID
    // -------------------------------------------------------------------------

    #[test]
    fn test_parse_flow_grid() {
        let text = "連系線潮流実績\n\
                    連系線,対象日付,対象時刻,潮流実績(MW)\n\
                    関門連系線,2024/04/01,9:00,\"1,200\"\n\
                    関門連系線,2024/04/01,9:05,－\n";
        let grid = csv_to_grid(text).unwrap();
        let readings = parse_flow_grid(&grid).unwrap();
        assert_eq!(readings.len(), 2);
        assert_eq!(
            readings[0].at_utc,
            Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(readings[0].mw, 1_200.0);
        assert!(readings[1].mw.is_nan());
    }
}
