//! Gridmix Collector - Scrapes Japanese grid operator reports into a store
//!
//! Responsibilities:
//! - Discover each operator's report files (HTML index, JSON list, URL templates)
//! - Download them with bounded retries and session handshakes where required
//! - Hand the bytes to `gridmix_parser` and upsert the canonical records
//! - Keep per-file bookkeeping and a `job_runs` audit row per operator
//! - Consolidate OCCTO interconnector flows
//! - Hand recent carbon-intensity series to the forecaster

pub mod config;
pub mod discovery;
pub mod fetch;
pub mod occto;
pub mod operators;
pub mod pipeline;
pub mod predict;
pub mod store;

pub use config::Config;
pub use discovery::{ScrapeScope, UnsupportedScrapeScopeError};
pub use fetch::{FetchError, Fetcher, SourceReader};
pub use pipeline::{scrape_operator, ScrapeSummary};
pub use store::{AreaStore, MemoryStore, PgStore};
