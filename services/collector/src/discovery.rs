//! Format Detector - which source files exist for an operator.
//!
//! Each operator publishes its files differently, so discovery is a small
//! set of strategies. All of them produce [`SourceFile`]s; scope filtering
//! happens afterwards and is shared.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Months, NaiveDate};
use gridmix_parser::{FormatTag, Tso};
use regex::Regex;
use reqwest::Url;
use thiserror::Error;

/// How much history to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrapeScope {
    /// Every file, legacy included.
    All,
    /// New-format files of the current and the two preceding months.
    New,
    /// Only the most recent new-format file.
    Latest,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported scrape scope {0:?}, expected one of: all, new, latest")]
pub struct UnsupportedScrapeScopeError(pub String);

impl ScrapeScope {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeScope::All => "all",
            ScrapeScope::New => "new",
            ScrapeScope::Latest => "latest",
        }
    }
}

impl FromStr for ScrapeScope {
    type Err = UnsupportedScrapeScopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(ScrapeScope::All),
            "new" => Ok(ScrapeScope::New),
            "latest" => Ok(ScrapeScope::Latest),
            _ => Err(UnsupportedScrapeScopeError(s.to_string())),
        }
    }
}

impl fmt::Display for ScrapeScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One downloadable source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    pub url: String,
    pub format: FormatTag,
    /// Period covered, e.g. `2023`, `FY2021` or `202404`. Unique per operator.
    pub file_date_key: String,
    /// Page that must be requested right before the download (session cookie).
    pub session_url: Option<String>,
}

impl SourceFile {
    fn new(url: String, format: FormatTag, file_date_key: String) -> Self {
        Self {
            url,
            format,
            file_date_key,
            session_url: None,
        }
    }
}

/// How an operator's files are found.
///
/// URL templates understand `{yyyy}`, `{mm}`, `{area}` and `{fy}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// Scrape links from an HTML page. `pattern` must have named groups
    /// `href` (the link, possibly relative) and `key` (the file date key).
    HtmlLinks {
        page: &'static str,
        pattern: &'static str,
        format: FormatTag,
    },
    /// Every string in a JSON file list that matches `pattern` (groups as
    /// above), resolved against `base`.
    JsonFileList {
        list_url: &'static str,
        base: &'static str,
        pattern: &'static str,
        format: FormatTag,
    },
    /// One file per month from `first_month` to the current month.
    Monthly {
        template: &'static str,
        first_month: (i32, u32),
        format: FormatTag,
    },
    /// One data request per fiscal year (April to March), each preceded by a
    /// session handshake. Always legacy files, so the range ends at the
    /// operator's last legacy fiscal year.
    FiscalYearRequests {
        session_url: &'static str,
        template: &'static str,
        first_fy: i32,
    },
}

impl DiscoveryStrategy {
    pub fn format(&self) -> FormatTag {
        match self {
            DiscoveryStrategy::HtmlLinks { format, .. }
            | DiscoveryStrategy::JsonFileList { format, .. }
            | DiscoveryStrategy::Monthly { format, .. } => *format,
            DiscoveryStrategy::FiscalYearRequests { .. } => FormatTag::Legacy,
        }
    }

    /// Whether this strategy can contribute anything to `scope`.
    pub fn is_needed_for(&self, scope: ScrapeScope) -> bool {
        scope == ScrapeScope::All || self.format() == FormatTag::New
    }
}

fn fill_template(template: &str, tso: Tso, year: i32, month: u32) -> String {
    template
        .replace("{yyyy}", &format!("{year:04}"))
        .replace("{mm}", &format!("{month:02}"))
        .replace("{area}", tso.area_code())
        .replace("{fy}", &format!("{year:04}"))
}

fn resolve(base: &str, href: &str) -> Option<String> {
    let base = Url::parse(base).ok()?;
    base.join(&href.replace("&amp;", "&")).ok().map(String::from)
}

fn matches_to_files<'a>(
    candidates: impl IntoIterator<Item = &'a str>,
    base: &str,
    pattern: &Regex,
    format: FormatTag,
) -> Vec<SourceFile> {
    let mut seen = BTreeSet::new();
    let mut files = Vec::new();
    for candidate in candidates {
        for caps in pattern.captures_iter(candidate) {
            let (Some(href), Some(key)) = (caps.name("href"), caps.name("key")) else {
                continue;
            };
            let Some(url) = resolve(base, href.as_str()) else {
                continue;
            };
            if seen.insert(url.clone()) {
                files.push(SourceFile::new(url, format, key.as_str().to_string()));
            }
        }
    }
    files
}

/// Links on an HTML page matching `pattern`, resolved against `page_url`.
pub fn html_links(html: &str, page_url: &str, pattern: &Regex, format: FormatTag) -> Vec<SourceFile> {
    matches_to_files([html], page_url, pattern, format)
}

/// String entries of a JSON file list matching `pattern`.
pub fn json_file_list(
    json: &str,
    base: &str,
    pattern: &Regex,
    format: FormatTag,
) -> serde_json::Result<Vec<SourceFile>> {
    fn strings<'a>(value: &'a serde_json::Value, out: &mut Vec<&'a str>) {
        match value {
            serde_json::Value::String(s) => out.push(s),
            serde_json::Value::Array(items) => items.iter().for_each(|v| strings(v, out)),
            serde_json::Value::Object(map) => map.values().for_each(|v| strings(v, out)),
            _ => {}
        }
    }

    let value: serde_json::Value = serde_json::from_str(json)?;
    let mut found = Vec::new();
    strings(&value, &mut found);
    Ok(matches_to_files(found, base, pattern, format))
}

/// One URL per month from `first_month` through the month of `today`.
pub fn monthly_files(
    template: &str,
    tso: Tso,
    first_month: (i32, u32),
    today: NaiveDate,
    format: FormatTag,
) -> Vec<SourceFile> {
    let Some(mut month) = NaiveDate::from_ymd_opt(first_month.0, first_month.1, 1) else {
        return Vec::new();
    };
    let mut files = Vec::new();
    while month <= today {
        files.push(SourceFile::new(
            fill_template(template, tso, month.year(), month.month()),
            format,
            format!("{:04}{:02}", month.year(), month.month()),
        ));
        let Some(next) = month.checked_add_months(Months::new(1)) else {
            break;
        };
        month = next;
    }
    files
}

/// Japanese fiscal year (starting April 1) containing `date`.
pub fn fiscal_year(date: NaiveDate) -> i32 {
    if date.month() >= 4 {
        date.year()
    } else {
        date.year() - 1
    }
}

/// One session-bound request per fiscal year from `first_fy` through
/// `last_fy`, never past the current one.
pub fn fiscal_year_files(
    session_url: &str,
    template: &str,
    tso: Tso,
    (first_fy, last_fy): (i32, i32),
    today: NaiveDate,
) -> Vec<SourceFile> {
    (first_fy..=last_fy.min(fiscal_year(today)))
        .map(|fy| SourceFile {
            url: fill_template(template, tso, fy, 4),
            format: FormatTag::Legacy,
            file_date_key: format!("FY{fy}"),
            session_url: Some(session_url.to_string()),
        })
        .collect()
}

/// First day of the month a `YYYYMM...` key starts with.
fn key_month(key: &str) -> Option<NaiveDate> {
    let year = key.get(0..4)?.parse().ok()?;
    let month = key.get(4..6)?.parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Filter discovered files down to a scrape scope.
pub fn select_scope(files: Vec<SourceFile>, scope: ScrapeScope, today: NaiveDate) -> Vec<SourceFile> {
    match scope {
        ScrapeScope::All => files,
        ScrapeScope::New => {
            let Some(earliest) = today
                .with_day(1)
                .and_then(|d| d.checked_sub_months(Months::new(2)))
            else {
                return Vec::new();
            };
            files
                .into_iter()
                .filter(|f| f.format == FormatTag::New)
                .filter(|f| key_month(&f.file_date_key).is_some_and(|m| m >= earliest))
                .collect()
        }
        ScrapeScope::Latest => files
            .into_iter()
            .filter(|f| f.format == FormatTag::New)
            .max_by(|a, b| a.file_date_key.cmp(&b.file_date_key))
            .into_iter()
            .collect(),
    }
}

// =============================================================================
// TESTS
// =============================================================================
