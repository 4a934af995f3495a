//! Row Parser - string grid -> canonical area records
//!
//! One shared implementation drives every layout:
//! - Locates the header row dynamically (header row count varies by vintage)
//! - Combines date and time cells, localizes to JST, converts to UTC
//! - Converts values to kWh by the layout's unit convention
//! - Maps dash/blank placeholders to zero only for columns the layout declares
//! - Drops rows whose mandatory cells are still blank (today-so-far rows)
//!
//! This function is DETERMINISTIC and performs no I/O.

use chrono::{NaiveDate, NaiveDateTime, TimeDelta, Utc};
use tracing::{debug, info};

use crate::area::{AreaRecord, JST};
use crate::error::{Error, Result};
use crate::grid::{find_column, find_header_row, Grid};
use crate::layout::{Column, Layout, TimeColumns};
use crate::tso::Tso;

/// Tokens that stand for "no value" in the sources.
pub(crate) const PLACEHOLDERS: &[&str] = &["", "-", "－", "―", "—", "‐", "ー", "*", "＊"];

/// A parsed record plus the raw row it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRow {
    /// 1-indexed row number in the grid.
    pub line: usize,
    pub raw: Vec<String>,
    pub record: AreaRecord,
}

/// A layout column resolved against one file's header row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolved {
    Required(usize),
    ZeroWhenBlank(usize),
    Zero,
    Absent,
}

fn resolve(field: &'static str, column: Column, headers: &[String]) -> Result<Resolved> {
    let lookup = |labels: &'static [&'static str]| {
        find_column(headers, labels).ok_or(Error::MissingColumn { field, labels })
    };
    Ok(match column {
        Column::Required(labels) => Resolved::Required(lookup(labels)?),
        Column::ZeroWhenBlank(labels) => Resolved::ZeroWhenBlank(lookup(labels)?),
        Column::Zero => Resolved::Zero,
        Column::Absent => Resolved::Absent,
    })
}

/// Cell content after placeholder handling.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell {
    Blank,
    Number(f64),
}

fn parse_cell(raw: &str) -> Option<Cell> {
    let trimmed = raw.trim();
    if PLACEHOLDERS.contains(&trimmed) {
        return Some(Cell::Blank);
    }
    trimmed.replace(',', "").parse::<f64>().ok().map(Cell::Number)
}

/// Parse `H:MM`, `HH:MM` or `HH:MM:SS`. `24:00` is accepted.
pub(crate) fn parse_clock(raw: &str) -> Option<(u32, u32)> {
    let mut parts = raw.trim().split(':');
    let hour: u32 = parts.next()?.trim().parse().ok()?;
    let minute: u32 = parts.next()?.trim().parse().ok()?;
    if let Some(seconds) = parts.next() {
        if seconds.trim().parse::<u32>().ok()? != 0 {
            return None;
        }
    }
    if parts.next().is_some() || minute > 59 || hour > 24 || (hour == 24 && minute != 0) {
        return None;
    }
    Some((hour, minute))
}

pub(crate) fn parse_date(raw: &str, formats: &[&str]) -> Option<NaiveDate> {
    let raw = raw.trim();
    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(raw, fmt).ok())
}

/// Join a date and a clock time, rolling `24:00` over to the next day.
pub(crate) fn label_datetime(
    date: NaiveDate,
    (hour, minute): (u32, u32),
) -> Option<NaiveDateTime> {
    if hour == 24 {
        date.succ_opt()?.and_hms_opt(0, 0, 0)
    } else {
        date.and_hms_opt(hour, minute, 0)
    }
}

struct TimeIndex {
    date: usize,
    time: Option<usize>,
}

struct RowReader<'a> {
    layout: &'a Layout,
    row: &'a [String],
    line: usize,
    dropped: bool,
}

impl RowReader<'_> {
    fn cell(&self, idx: usize) -> &str {
        self.row.get(idx).map(String::as_str).unwrap_or("")
    }

    fn number(&self, idx: usize, field: &str) -> Result<Cell> {
        let raw = self.cell(idx);
        parse_cell(raw).ok_or_else(|| {
            Error::malformed(
                self.line,
                format!("{field}: non-numeric value {raw:?}"),
                self.row,
            )
        })
    }

    fn kwh(&self, value: f64) -> f64 {
        self.layout.units.to_kwh(value, self.layout.block_minutes)
    }

    /// Value of a field in kWh; `None` when the layout declares it absent.
    fn get(&mut self, field: &str, resolved: Resolved) -> Result<Option<f64>> {
        match resolved {
            Resolved::Required(idx) => match self.number(idx, field)? {
                Cell::Number(v) => Ok(Some(self.kwh(v))),
                Cell::Blank => {
                    self.dropped = true;
                    Ok(None)
                }
            },
            Resolved::ZeroWhenBlank(idx) => match self.number(idx, field)? {
                Cell::Number(v) => Ok(Some(self.kwh(v))),
                Cell::Blank => Ok(Some(0.0)),
            },
            Resolved::Zero => Ok(Some(0.0)),
            Resolved::Absent => Ok(None),
        }
    }

    /// Like [`RowReader::get`] but blank means "not given" rather than zero.
    fn get_given(&self, field: &str, resolved: Resolved) -> Result<Option<f64>> {
        match resolved {
            Resolved::Required(idx) | Resolved::ZeroWhenBlank(idx) => {
                match self.number(idx, field)? {
                    Cell::Number(v) => Ok(Some(self.kwh(v))),
                    Cell::Blank => Ok(None),
                }
            }
            Resolved::Zero => Ok(Some(0.0)),
            Resolved::Absent => Ok(None),
        }
    }

    /// Local start of the block, or `None` for rows without a date.
    fn block_start(&self, index: &TimeIndex) -> Result<Option<NaiveDateTime>> {
        let date_cell = self.cell(index.date).trim();
        if date_cell.is_empty() {
            return Ok(None);
        }

        let (date_part, time_part) = match index.time {
            Some(time_idx) => (date_cell, self.cell(time_idx).trim()),
            None => match date_cell.rsplit_once(char::is_whitespace) {
                Some((date, time)) => (date.trim(), time.trim()),
                // midnight cells in spreadsheets render as a bare date
                None => (date_cell, "0:00"),
            },
        };

        let malformed = |what: &str| {
            Error::malformed(
                self.line,
                format!("unparseable {what} {date_part:?} {time_part:?}"),
                self.row,
            )
        };
        let date = parse_date(date_part, self.layout.date_formats)
            .ok_or_else(|| malformed("date"))?;
        let clock = parse_clock(time_part).ok_or_else(|| malformed("time"))?;
        let label = label_datetime(date, clock).ok_or_else(|| malformed("timestamp"))?;

        let block = TimeDelta::minutes(i64::from(self.layout.block_minutes));
        Ok(Some(if self.layout.is_time_at_end_of_block {
            label - block
        } else {
            label
        }))
    }
}

struct ResolvedColumns {
    demand: Resolved,
    nuclear: Resolved,
    all_fossil: Resolved,
    lng: Resolved,
    coal: Resolved,
    oil: Resolved,
    other_fossil: Resolved,
    hydro: Resolved,
    geothermal: Resolved,
    biomass: Resolved,
    solar_output: Resolved,
    solar_throttling: Resolved,
    wind_output: Resolved,
    wind_throttling: Resolved,
    pumped_storage: Resolved,
    battery: Resolved,
    interconnectors: Resolved,
    other: Resolved,
    total: Resolved,
}

impl ResolvedColumns {
    fn new(layout: &Layout, headers: &[String]) -> Result<Self> {
        let c = &layout.columns;
        Ok(Self {
            demand: resolve("demand", c.demand, headers)?,
            nuclear: resolve("nuclear", c.nuclear, headers)?,
            all_fossil: resolve("all_fossil", c.all_fossil, headers)?,
            lng: resolve("lng", c.lng, headers)?,
            coal: resolve("coal", c.coal, headers)?,
            oil: resolve("oil", c.oil, headers)?,
            other_fossil: resolve("other_fossil", c.other_fossil, headers)?,
            hydro: resolve("hydro", c.hydro, headers)?,
            geothermal: resolve("geothermal", c.geothermal, headers)?,
            biomass: resolve("biomass", c.biomass, headers)?,
            solar_output: resolve("solar_output", c.solar_output, headers)?,
            solar_throttling: resolve("solar_throttling", c.solar_throttling, headers)?,
            wind_output: resolve("wind_output", c.wind_output, headers)?,
            wind_throttling: resolve("wind_throttling", c.wind_throttling, headers)?,
            pumped_storage: resolve("pumped_storage", c.pumped_storage, headers)?,
            battery: resolve("battery", c.battery, headers)?,
            interconnectors: resolve("interconnectors", c.interconnectors, headers)?,
            other: resolve("other", c.other, headers)?,
            total: resolve("total", c.total, headers)?,
        })
    }
}

fn time_index(layout: &Layout, headers: &[String]) -> Result<TimeIndex> {
    let lookup = |field: &'static str, labels: &'static [&'static str]| {
        find_column(headers, labels).ok_or(Error::MissingColumn { field, labels })
    };
    Ok(match layout.time {
        TimeColumns::Split { date, time } => TimeIndex {
            date: lookup("date", date)?,
            time: Some(lookup("time", time)?),
        },
        TimeColumns::Combined(labels) => TimeIndex {
            date: lookup("datetime", labels)?,
            time: None,
        },
    })
}

/// Parse every data row of a grid with the given layout.
///
/// Rows with a blank date or a blank mandatory value are skipped. Any cell
/// that is present but unparseable fails the whole file.
pub fn parse_rows(grid: &Grid, layout: &Layout, tso: Tso) -> Result<Vec<ParsedRow>> {
    let header_idx = find_header_row(grid, layout.header_token)?;
    let headers = &grid[header_idx];
    let times = time_index(layout, headers)?;
    let cols = ResolvedColumns::new(layout, headers)?;
    let block = TimeDelta::minutes(i64::from(layout.block_minutes));

    debug!(
        layout = layout.name,
        header_row = header_idx + 1,
        columns = headers.len(),
        "header located"
    );

    let mut parsed = Vec::new();
    let mut skipped = 0usize;

    for (idx, row) in grid.iter().enumerate().skip(header_idx + 1) {
        let mut reader = RowReader {
            layout,
            row,
            line: idx + 1,
            dropped: false,
        };

        let Some(start_local) = reader.block_start(&times)? else {
            skipped += 1;
            continue;
        };

        let total_demand = reader.get("demand", cols.demand)?;
        let nuclear = reader.get("nuclear", cols.nuclear)?;
        let lng = reader.get("lng", cols.lng)?;
        let coal = reader.get("coal", cols.coal)?;
        let oil = reader.get("oil", cols.oil)?;
        let other_fossil = reader.get("other_fossil", cols.other_fossil)?;
        let all_fossil = match cols.all_fossil {
            Resolved::Absent => [lng, coal, oil, other_fossil]
                .into_iter()
                .sum::<Option<f64>>(),
            resolved => reader.get("all_fossil", resolved)?,
        };
        let hydro = reader.get("hydro", cols.hydro)?;
        let geothermal = reader.get("geothermal", cols.geothermal)?;
        let biomass = reader.get("biomass", cols.biomass)?;
        let solar_output = reader.get("solar_output", cols.solar_output)?;
        let solar_throttling = reader.get("solar_throttling", cols.solar_throttling)?;
        let wind_output = reader.get("wind_output", cols.wind_output)?;
        let wind_throttling = reader.get("wind_throttling", cols.wind_throttling)?;
        let pumped_storage = reader.get("pumped_storage", cols.pumped_storage)?;
        let battery = reader.get("battery", cols.battery)?;
        let interconnectors = reader
            .get("interconnectors", cols.interconnectors)?
            .map(|v| if layout.flip_interconnectors && v != 0.0 { -v } else { v });
        let other = reader.get("other", cols.other)?;
        let given_total = reader.get_given("total", cols.total)?;

        let Some(total_demand) = total_demand.filter(|_| !reader.dropped) else {
            debug!(line = idx + 1, "mandatory value blank, row skipped");
            skipped += 1;
            continue;
        };

        let Some(start) = start_local.and_local_timezone(JST).single() else {
            return Err(Error::malformed(idx + 1, "ambiguous local time", row));
        };
        let from_utc = start.with_timezone(&Utc);

        let mut record = AreaRecord {
            tso,
            from_utc,
            to_utc: from_utc + block,
            total_demand_kwh: total_demand,
            nuclear_kwh: nuclear.unwrap_or(0.0),
            all_fossil_kwh: all_fossil.unwrap_or(0.0),
            lng_kwh: lng,
            coal_kwh: coal,
            oil_kwh: oil,
            other_fossil_kwh: other_fossil,
            hydro_kwh: hydro.unwrap_or(0.0),
            geothermal_kwh: geothermal.unwrap_or(0.0),
            biomass_kwh: biomass.unwrap_or(0.0),
            solar_output_kwh: solar_output.unwrap_or(0.0),
            solar_throttling_kwh: solar_throttling.unwrap_or(0.0),
            wind_output_kwh: wind_output.unwrap_or(0.0),
            wind_throttling_kwh: wind_throttling.unwrap_or(0.0),
            pumped_storage_kwh: pumped_storage.unwrap_or(0.0),
            battery_storage_kwh: battery,
            interconnectors_kwh: interconnectors.unwrap_or(0.0),
            other_kwh: other,
            total_generation_kwh: 0.0,
        };
        record.total_generation_kwh =
            given_total.unwrap_or_else(|| record.positive_generation_kwh());

        parsed.push(ParsedRow {
            line: idx + 1,
            raw: row.clone(),
            record,
        });
    }

    info!(
        tso = %tso,
        layout = layout.name,
        rows = parsed.len(),
        skipped,
        "parsed rows"
    );

    Ok(parsed)
}

// =============================================================================
// TESTS
// =============================================================================
