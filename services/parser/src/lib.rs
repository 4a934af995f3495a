//! Gridmix Parser - Pure normalization of Japanese grid operator reports
//!
//! Responsibilities:
//! - Decode raw report bytes (Shift-JIS / UTF-8 CSV, ZIP, XLS) into string grids
//! - Describe every operator's report layouts as static format configs
//! - Parse grids into canonical half-hourly / hourly area records (kWh, UTC)
//! - Build stable natural keys and the exact decimal storage representation
//! - Compute lifecycle carbon intensity from a record and static tables
//! - Consolidate OCCTO 5-minute interconnector readings into 30-minute blocks
//!
//! Nothing in this crate performs I/O: same bytes in = same records out.

pub mod area;
pub mod canonical;
pub mod carbon;
pub mod error;
pub mod grid;
pub mod interconnector;
pub mod interval;
pub mod layout;
pub mod rows;
pub mod tso;

pub use area::{AreaRecord, StoredAreaRecord, JST};
pub use canonical::{build_records, retain_before};
pub use carbon::{compute_intensity, CarbonTables, EmissionFactors, FuelMix, GenerationSource};
pub use error::{Error, Result};
pub use grid::{bytes_to_grid, FileKind, Grid, TextEncoding};
pub use interconnector::{consolidate_flows, parse_flow_grid, InterconnectorFlow};
pub use interval::start_of_most_recent_half_hour;
pub use layout::{FormatTag, Layout};
pub use rows::{parse_rows, ParsedRow};
pub use tso::Tso;
