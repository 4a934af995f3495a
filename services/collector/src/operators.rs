//! Per-operator source table.
//!
//! Parsing is driven by the layouts in `gridmix_parser::layout`; this table
//! only says where the files are and how hard the hosts may be hit.

use anyhow::{Context, Result};
use chrono::{DateTime, TimeDelta, Utc};
use gridmix_parser::{FormatTag, Tso, JST};

use crate::discovery::{fiscal_year, DiscoveryStrategy};

/// How an operator's files may be downloaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Concurrency {
    /// All files at once.
    Parallel,
    /// One at a time (rate-limited hosts, session-bound downloads).
    Sequential,
}

#[derive(Debug, Clone, Copy)]
pub struct Operator {
    pub tso: Tso,
    pub sources: &'static [DiscoveryStrategy],
    pub concurrency: Concurrency,
    /// First instant covered by the new format (RFC 3339).
    pub cutover: &'static str,
}

impl Operator {
    /// Legacy rows at or after this instant are dropped.
    pub fn cutover_utc(&self) -> Result<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(self.cutover)
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("{}: invalid cutover {:?}", self.tso, self.cutover))
    }

    /// Last fiscal year that still holds legacy blocks.
    pub fn last_legacy_fiscal_year(&self) -> Result<i32> {
        let last_legacy_day = (self.cutover_utc()? - TimeDelta::nanoseconds(1))
            .with_timezone(&JST)
            .date_naive();
        Ok(fiscal_year(last_legacy_day))
    }
}

/// The new-format files share one naming scheme across operators.
const NEW_FORMAT_FIRST_MONTH: (i32, u32) = (2024, 4);
const CUTOVER_2024: &str = "2024-04-01T00:00:00+09:00";

pub static OPERATORS: [Operator; 10] = [
    Operator {
        tso: Tso::Hepco,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://www.hepco.co.jp/network/renewable_energy/fixedprice_purchase/supply_demand_results.html",
                pattern: r#"href="(?P<href>[^"]*sup_dem_results_(?P<key>\d{4}_\d)q\.csv)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.hepco.co.jp/network/con_service/public_document/supply_demand_results/csv/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Parallel,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Tohoku,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://setsuden.nw.tohoku-epco.co.jp/download.html",
                pattern: r#"href="(?P<href>[^"]*juyo_(?P<key>\d{4})_tohoku\.csv)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://setsuden.nw.tohoku-epco.co.jp/common/demand/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Parallel,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Tepco,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://www.tepco.co.jp/forecast/html/area_data-j.html",
                pattern: r#"href="(?P<href>[^"]*area-(?P<key>\d{4})\.csv)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.tepco.co.jp/forecast/html/images/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Parallel,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Chubu,
        sources: &[
            DiscoveryStrategy::JsonFileList {
                list_url: "https://powergrid.chuden.co.jp/denkiyoho/resource/js/filelist.json",
                base: "https://powergrid.chuden.co.jp/denki_yoho_content_data/download_csv/",
                pattern: r"(?P<href>areabalance_(?P<key>\d{4}_\d)q\.csv)",
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://powergrid.chuden.co.jp/denki_yoho_content_data/download_csv/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Parallel,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Hokuden,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://www.rikuden.co.jp/nw_jyukyudata/area_jisseki.html",
                pattern: r#"href="(?P<href>[^"]*area_jisseki_(?P<key>\d{4}(?:_\d)?)\.xls)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.rikuden.co.jp/nw_jyukyudata/attach/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        // host throttles bursts of spreadsheet downloads
        concurrency: Concurrency::Sequential,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Kepco,
        sources: &[
            DiscoveryStrategy::FiscalYearRequests {
                session_url: "https://www.kansai-td.co.jp/denkiyoho/area-performance/past.html",
                template: "https://www.kansai-td.co.jp/interchange/denkiyoho/area-performance/past/{fy}_areajyukyu.csv",
                first_fy: 2016,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.kansai-td.co.jp/interchange/denkiyoho/area-performance/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Sequential,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Chugoku,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://www.energia.co.jp/nw/service/retailer/data/area/",
                pattern: r#"href="(?P<href>[^"]*jukyu-jisseki-(?P<key>\d{4})\.xlsx?)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.energia.co.jp/nw/jukyuu/sys/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Sequential,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Yonden,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://www.yonden.co.jp/nw/supply_demand/data_download.html",
                pattern: r#"href="(?P<href>[^"]*juyo_(?P<key>\d{4}(?:_\d)?)\.csv)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.yonden.co.jp/nw/supply_demand/csv/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Parallel,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Kyuden,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://www.kyuden.co.jp/td_area_jukyu/jukyu.html",
                pattern: r#"href="(?P<href>[^"]*area_jukyu_jisseki_(?P<key>\d{4}_\d)Q\.csv)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.kyuden.co.jp/td_area_jukyu/csv/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Parallel,
        cutover: CUTOVER_2024,
    },
    Operator {
        tso: Tso::Okiden,
        sources: &[
            DiscoveryStrategy::HtmlLinks {
                page: "https://www.okiden.co.jp/business-support/service/supply-and-demand/",
                pattern: r#"href="(?P<href>[^"]*(?P<key>\d{4})_jukyu\.zip)""#,
                format: FormatTag::Legacy,
            },
            DiscoveryStrategy::Monthly {
                template: "https://www.okiden.co.jp/business-support/service/supply-and-demand/csv/eria_jukyu_{yyyy}{mm}_{area}.csv",
                first_month: NEW_FORMAT_FIRST_MONTH,
                format: FormatTag::New,
            },
        ],
        concurrency: Concurrency::Parallel,
        cutover: CUTOVER_2024,
    },
];

pub fn operator(tso: Tso) -> &'static Operator {
    // OPERATORS is ordered like Tso::ALL
    &OPERATORS[tso as usize]
}
