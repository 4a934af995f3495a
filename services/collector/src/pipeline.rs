//! Scrape pipeline: discover -> fetch -> parse -> upsert, per operator.
//!
//! Per-file failures never abort the operator: they are collected, logged and
//! reported in the job run. Operator-level failures (discovery, storage) are
//! returned to the caller.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use futures::future::join_all;
use gridmix_parser::canonical::max_from_utc;
use gridmix_parser::layout::layout_for;
use gridmix_parser::{build_records, bytes_to_grid, parse_rows, retain_before, FormatTag, StoredAreaRecord, Tso};
use regex::Regex;
use serde_json::json;
use sha2::{Digest, Sha256};
use tracing::{debug, error, info, warn};

use crate::discovery::{
    fiscal_year_files, html_links, json_file_list, monthly_files, select_scope, DiscoveryStrategy,
    ScrapeScope, SourceFile,
};
use crate::fetch::SourceReader;
use crate::operators::{Concurrency, Operator};
use crate::store::{AreaStore, JobStatus, SourceFileRecord};

/// A file that could not be fetched or parsed.
#[derive(Debug)]
pub struct FileFailure {
    pub url: String,
    pub error: anyhow::Error,
}

/// A successfully parsed file, ready for the writer.
#[derive(Debug, Clone)]
pub struct ParsedFile {
    pub source: SourceFile,
    pub records: Vec<StoredAreaRecord>,
    pub content_hash: String,
}

/// Outcome of one operator scrape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub tso: Tso,
    pub files_ok: usize,
    pub files_failed: usize,
    pub files_skipped: usize,
    pub rows_written: usize,
    /// Latest block start written, for chaining the forecast hand-off.
    pub latest_from_utc: Option<DateTime<Utc>>,
}

impl ScrapeSummary {
    fn new(tso: Tso) -> Self {
        Self {
            tso,
            files_ok: 0,
            files_failed: 0,
            files_skipped: 0,
            rows_written: 0,
            latest_from_utc: None,
        }
    }

    pub fn status(&self) -> JobStatus {
        if self.files_failed == 0 {
            JobStatus::Ok
        } else {
            JobStatus::Partial
        }
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("sha256:{:x}", hasher.finalize())
}

/// Enumerate an operator's source files for a scope.
pub async fn discover_sources<R: SourceReader>(
    reader: &R,
    operator: &Operator,
    scope: ScrapeScope,
    today: NaiveDate,
) -> Result<Vec<SourceFile>> {
    let tso = operator.tso;
    let mut files = Vec::new();

    for strategy in operator.sources {
        if !strategy.is_needed_for(scope) {
            continue;
        }
        let found = match *strategy {
            DiscoveryStrategy::HtmlLinks {
                page,
                pattern,
                format,
            } => {
                let re = Regex::new(pattern).with_context(|| format!("{tso}: bad link pattern"))?;
                let html = reader
                    .text(page)
                    .await
                    .with_context(|| format!("{tso}: failed to load file index"))?;
                html_links(&html, page, &re, format)
            }
            DiscoveryStrategy::JsonFileList {
                list_url,
                base,
                pattern,
                format,
            } => {
                let re = Regex::new(pattern).with_context(|| format!("{tso}: bad file pattern"))?;
                let json = reader
                    .text(list_url)
                    .await
                    .with_context(|| format!("{tso}: failed to load file list"))?;
                json_file_list(&json, base, &re, format)
                    .with_context(|| format!("{tso}: file list is not valid JSON"))?
            }
            DiscoveryStrategy::Monthly {
                template,
                first_month,
                format,
            } => monthly_files(template, tso, first_month, today, format),
            DiscoveryStrategy::FiscalYearRequests {
                session_url,
                template,
                first_fy,
            } => {
                let last_fy = operator.last_legacy_fiscal_year()?;
                fiscal_year_files(session_url, template, tso, (first_fy, last_fy), today)
            }
        };
        debug!(tso = %tso, format = strategy.format().as_str(), found = found.len(), "discovered");
        files.extend(found);
    }

    let selected = select_scope(files, scope, today);
    info!(tso = %tso, scope = %scope, files = selected.len(), "sources selected");
    Ok(selected)
}

/// Fetch, parse and canonicalize one file.
pub async fn load_file<R: SourceReader>(
    reader: &R,
    operator: &Operator,
    source: SourceFile,
) -> Result<ParsedFile> {
    let tso = operator.tso;
    if let Some(session_url) = &source.session_url {
        reader
            .text(session_url)
            .await
            .context("session handshake failed")?;
    }

    let bytes = reader.bytes(&source.url).await?;
    let content_hash = content_hash(&bytes);
    let layout = layout_for(tso, source.format);
    let grid = bytes_to_grid(&bytes, layout.file_kind, layout.encoding)
        .with_context(|| format!("could not read {}", layout.name))?;

    let mut rows = parse_rows(&grid, layout, tso).inspect_err(|e| {
        if let gridmix_parser::Error::MalformedRow { line, raw, .. } = e {
            error!(tso = %tso, url = %source.url, line, raw = ?raw, "malformed row");
        }
    })?;
    if source.format == FormatTag::Legacy {
        rows = retain_before(rows, operator.cutover_utc()?);
    }
    let records = build_records(&rows)?;

    debug!(tso = %tso, url = %source.url, records = records.len(), "file parsed");
    Ok(ParsedFile {
        source,
        records,
        content_hash,
    })
}

/// Load every file, keeping going past individual failures.
///
/// Parallel operators fetch all files at once; sequential operators one
/// after another (rate limits, session-bound downloads).
pub async fn collect_best_effort<R: SourceReader>(
    reader: &R,
    operator: &Operator,
    files: Vec<SourceFile>,
) -> (Vec<ParsedFile>, Vec<FileFailure>) {
    let mut results = Vec::with_capacity(files.len());
    match operator.concurrency {
        Concurrency::Parallel => {
            let loads = files.into_iter().map(|file| async move {
                let url = file.url.clone();
                (url, load_file(reader, operator, file).await)
            });
            results = join_all(loads).await;
        }
        Concurrency::Sequential => {
            for file in files {
                let url = file.url.clone();
                results.push((url, load_file(reader, operator, file).await));
            }
        }
    }

    let mut parsed = Vec::new();
    let mut failures = Vec::new();
    for (url, result) in results {
        match result {
            Ok(file) => parsed.push(file),
            Err(error) => {
                warn!(tso = %operator.tso, url = %url, error = %format!("{error:#}"), "file skipped");
                failures.push(FileFailure { url, error });
            }
        }
    }
    (parsed, failures)
}

/// Write one parsed file and its bookkeeping row.
async fn write_file<S: AreaStore>(store: &S, tso: Tso, file: &ParsedFile) -> Result<usize> {
    let written = store.upsert_area_records(&file.records).await?;
    store
        .upsert_source_file(&SourceFileRecord {
            tso,
            file_date_key: file.source.file_date_key.clone(),
            url: file.source.url.clone(),
            format: file.source.format,
            from_utc: file.records.first().map(|r| r.datetime_from),
            to_utc: file.records.last().map(|r| r.datetime_to),
            row_count: file.records.len() as i64,
            content_hash: file.content_hash.clone(),
            last_updated: Utc::now(),
        })
        .await?;
    Ok(written)
}

async fn run_scrape<R: SourceReader, S: AreaStore>(
    reader: &R,
    store: &S,
    operator: &Operator,
    scope: ScrapeScope,
    force: bool,
    today: NaiveDate,
    summary: &mut ScrapeSummary,
) -> Result<Vec<FileFailure>> {
    let tso = operator.tso;
    let discovered = discover_sources(reader, operator, scope, today).await?;

    let mut files = Vec::with_capacity(discovered.len());
    for file in discovered {
        // legacy files cover closed periods; once ingested they do not change
        let closed = scope == ScrapeScope::All && file.format == FormatTag::Legacy;
        if closed && !force && store.source_file(tso, &file.file_date_key).await?.is_some() {
            debug!(tso = %tso, key = %file.file_date_key, "already ingested, skipped");
            summary.files_skipped += 1;
            continue;
        }
        files.push(file);
    }

    let (parsed, failures) = collect_best_effort(reader, operator, files).await;
    for file in &parsed {
        let written = write_file(store, tso, file)
            .await
            .with_context(|| format!("{tso}: failed to store {}", file.source.url))?;
        summary.rows_written += written;
        summary.latest_from_utc = summary.latest_from_utc.max(max_from_utc(&file.records));
        info!(tso = %tso, url = %file.source.url, rows = written, "rows written");
    }
    summary.files_ok = parsed.len();
    summary.files_failed = failures.len();
    Ok(failures)
}

/// Scrape one operator and record the run in `job_runs`.
pub async fn scrape_operator<R: SourceReader, S: AreaStore>(
    reader: &R,
    store: &S,
    operator: &Operator,
    scope: ScrapeScope,
    force: bool,
    today: NaiveDate,
) -> Result<ScrapeSummary> {
    let tso = operator.tso;
    let job_run_id = store
        .create_job_run(tso.id(), json!({ "scope": scope.as_str(), "force": force }))
        .await?;

    let mut summary = ScrapeSummary::new(tso);
    let outcome = run_scrape(reader, store, operator, scope, force, today, &mut summary).await;
    let detail = json!({
        "files_ok": summary.files_ok,
        "files_failed": summary.files_failed,
        "files_skipped": summary.files_skipped,
        "rows_written": summary.rows_written,
    });

    match outcome {
        Ok(failures) => {
            let error = (!failures.is_empty()).then(|| {
                failures
                    .iter()
                    .map(|f| format!("{}: {:#}", f.url, f.error))
                    .collect::<Vec<_>>()
                    .join("\n")
            });
            store
                .finish_job_run(job_run_id, summary.status(), error.as_deref(), detail)
                .await?;
            info!(
                tso = %tso,
                ok = summary.files_ok,
                failed = summary.files_failed,
                skipped = summary.files_skipped,
                rows = summary.rows_written,
                "operator done"
            );
            Ok(summary)
        }
        Err(e) => {
            store
                .finish_job_run(job_run_id, JobStatus::Failed, Some(&format!("{e:#}")), detail)
                .await?;
            Err(e)
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::fetch::FetchError;
    use crate::operators::operator;
    use crate::store::tests::content;
    use crate::store::MemoryStore;
    use std::cell::RefCell;
    use std::collections::HashMap;

    /// Canned responses keyed by URL; records every request.
    #[derive(Default)]
    pub(crate) struct StubReader {
        pub responses: HashMap<String, Vec<u8>>,
        pub requests: RefCell<Vec<String>>,
    }

    impl StubReader {
        pub fn with(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.responses.insert(url.to_string(), body.into());
            self
        }
    }

    impl SourceReader for StubReader {
        async fn bytes(&self, url: &str) -> Result<Vec<u8>, FetchError> {
            self.requests.borrow_mut().push(url.to_string());
            self.responses
                .get(url)
                .cloned()
                .ok_or_else(|| FetchError::EmptyBody {
                    url: url.to_string(),
                    attempts: 4,
                })
        }
    }

    const NEW_HEADER: &str = "DATE,TIME,エリア需要,原子力,火力(LNG),火力(石炭),火力(石油),火力(その他),水力,地熱,バイオマス,太陽光発電実績,太陽光出力制御量,風力発電実績,風力出力制御量,揚水,蓄電池,連系線,その他,合計";

    /// Shift-JIS new-format file with one row per given JST `H:MM`.
    pub(crate) fn new_format_csv(date: &str, times: &[&str]) -> Vec<u8> {
        let mut text = format!("単位[MW平均]\r\n{NEW_HEADER}\r\n");
        for t in times {
            text.push_str(&format!(
                "{date},{t},15176,0,10132,3968,173,926,1816,0,508,0,0,29,0,-7,0,4269,0,22081\r\n"
            ));
        }
        text.push_str(&format!("{date},23:30,,,,,,,,,,,,,,,,,,\r\n"));
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(&text);
        bytes.into_owned()
    }

    fn tepco_legacy_csv() -> Vec<u8> {
        let text = "単位[万kWh]\r\n\
                    DATE,TIME,東京エリア需要,原子力,火力,水力,地熱,バイオマス,太陽光発電実績,太陽光出力制御量,風力発電実績,風力出力制御量,揚水,連系線,合計\r\n\
                    2024/3/31,23:00,2555,0,2258,92,0,2,0,0,2,0,0,201,2555\r\n\
                    2024/4/1,0:00,2555,0,2258,92,0,2,0,0,2,0,0,201,2555\r\n";
        let (bytes, _, _) = encoding_rs::SHIFT_JIS.encode(text);
        bytes.into_owned()
    }

    const TEPCO_INDEX: &str = "https://www.tepco.co.jp/forecast/html/area_data-j.html";

    fn tepco_new_url(yyyymm: &str) -> String {
        format!("https://www.tepco.co.jp/forecast/html/images/eria_jukyu_{yyyymm}_03.csv")
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    // -------------------------------------------------------------------------
    // DISCOVERY
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_latest_scope_skips_legacy_index() {
        let reader = StubReader::default();
        let files = discover_sources(&reader, operator(Tso::Tepco), ScrapeScope::Latest, today())
            .await
            .unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].url, tepco_new_url("202405"));
        assert!(reader.requests.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_fiscal_year_requests_stop_at_cutover() {
        let reader = StubReader::default();
        let today = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        let files = discover_sources(&reader, operator(Tso::Kepco), ScrapeScope::All, today)
            .await
            .unwrap();

        let legacy: Vec<&str> = files
            .iter()
            .filter(|f| f.format == FormatTag::Legacy)
            .map(|f| f.file_date_key.as_str())
            .collect();
        assert_eq!(legacy.first(), Some(&"FY2016"));
        assert_eq!(legacy.last(), Some(&"FY2023"));
        assert_eq!(legacy.len(), 8);
        assert!(files
            .iter()
            .any(|f| f.format == FormatTag::New && f.file_date_key == "202610"));
    }

    #[tokio::test]
    async fn test_discovery_failure_is_operator_level() {
        let reader = StubReader::default();
        let result = discover_sources(&reader, operator(Tso::Tepco), ScrapeScope::All, today()).await;
        assert!(result.is_err());
    }

    // -------------------------------------------------------------------------
    // SCRAPE
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_scrape_latest_writes_rows_and_bookkeeping() {
        let reader = StubReader::default().with(
            &tepco_new_url("202405"),
            new_format_csv("2024/05/10", &["0:00", "0:30"]),
        );
        let store = MemoryStore::new();

        let summary = scrape_operator(&reader, &store, operator(Tso::Tepco), ScrapeScope::Latest, false, today())
            .await
            .unwrap();

        assert_eq!(summary.files_ok, 1);
        assert_eq!(summary.rows_written, 2);
        assert_eq!(summary.status(), JobStatus::Ok);
        assert_eq!(
            summary.latest_from_utc.map(|t| t.to_rfc3339()),
            Some("2024-05-09T15:30:00+00:00".to_string())
        );

        let records = store.area_records();
        assert_eq!(records[0].data_id, "tepco_2024-05-10_00:00");
        assert_eq!(records[0].total_demand_kwh, "7588000");

        let file = store.source_file(Tso::Tepco, "202405").await.unwrap().unwrap();
        assert_eq!(file.row_count, 2);
        assert!(file.content_hash.starts_with("sha256:"));

        let jobs = store.job_runs();
        assert_eq!(jobs[0].status, JobStatus::Ok);
        assert_eq!(jobs[0].detail["rows_written"], 2);
    }

    #[tokio::test]
    async fn test_rescrape_is_idempotent() {
        let reader = StubReader::default().with(
            &tepco_new_url("202405"),
            new_format_csv("2024/05/10", &["0:00", "0:30"]),
        );
        let store = MemoryStore::new();
        let op = operator(Tso::Tepco);

        scrape_operator(&reader, &store, op, ScrapeScope::Latest, false, today()).await.unwrap();
        let first = content(store.area_records());
        scrape_operator(&reader, &store, op, ScrapeScope::Latest, false, today()).await.unwrap();
        assert_eq!(content(store.area_records()), first);
    }

    #[tokio::test]
    async fn test_failed_file_does_not_abort_batch() {
        // April is served, May is missing
        let reader = StubReader::default().with(
            &tepco_new_url("202404"),
            new_format_csv("2024/04/30", &["12:00"]),
        );
        let store = MemoryStore::new();

        let summary = scrape_operator(&reader, &store, operator(Tso::Tepco), ScrapeScope::New, false, today())
            .await
            .unwrap();

        assert_eq!(summary.files_ok, 1);
        assert_eq!(summary.files_failed, 1);
        assert_eq!(summary.status(), JobStatus::Partial);
        assert_eq!(store.area_records().len(), 1);

        let jobs = store.job_runs();
        assert_eq!(jobs[0].status, JobStatus::Partial);
        assert!(jobs[0].error.as_deref().unwrap().contains("202405"));
    }

    #[tokio::test]
    async fn test_malformed_file_fails_only_that_file() {
        let bad = {
            let text = format!("{NEW_HEADER}\r\n2024/05/01,0:00,abc,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0\r\n");
            encoding_rs::SHIFT_JIS.encode(&text).0.into_owned()
        };
        let reader = StubReader::default()
            .with(&tepco_new_url("202404"), new_format_csv("2024/04/30", &["12:00"]))
            .with(&tepco_new_url("202405"), bad);
        let store = MemoryStore::new();

        let summary = scrape_operator(&reader, &store, operator(Tso::Tepco), ScrapeScope::New, false, today())
            .await
            .unwrap();
        assert_eq!((summary.files_ok, summary.files_failed), (1, 1));
    }

    #[tokio::test]
    async fn test_full_scrape_truncates_legacy_at_cutover_and_skips_known_files() {
        let index = r#"<a href="/forecast/html/images/area-2023.csv">FY2023</a>"#;
        let legacy_url = "https://www.tepco.co.jp/forecast/html/images/area-2023.csv";
        let reader = StubReader::default()
            .with(TEPCO_INDEX, index)
            .with(legacy_url, tepco_legacy_csv())
            .with(&tepco_new_url("202404"), new_format_csv("2024/04/01", &["0:00"]))
            .with(&tepco_new_url("202405"), new_format_csv("2024/05/01", &["0:00"]));
        let store = MemoryStore::new();
        let op = operator(Tso::Tepco);

        let summary = scrape_operator(&reader, &store, op, ScrapeScope::All, false, today())
            .await
            .unwrap();
        assert_eq!(summary.files_ok, 3);

        // legacy 2024-04-01 00:00 JST row is dropped in favour of the new format
        let keys: Vec<String> = store.area_records().into_iter().map(|r| r.data_id).collect();
        assert_eq!(
            keys,
            vec![
                "tepco_2024-03-31_23:00",
                "tepco_2024-04-01_00:00",
                "tepco_2024-05-01_00:00",
            ]
        );
        let overlap = store
            .area_records()
            .into_iter()
            .find(|r| r.data_id == "tepco_2024-04-01_00:00")
            .unwrap();
        assert_eq!(overlap.time_to_jst, "00:30");

        // second full run does not download the closed legacy file again
        reader.requests.borrow_mut().clear();
        let summary = scrape_operator(&reader, &store, op, ScrapeScope::All, false, today())
            .await
            .unwrap();
        assert_eq!(summary.files_skipped, 1);
        assert!(!reader.requests.borrow().iter().any(|u| u == legacy_url));

        // unless forced
        reader.requests.borrow_mut().clear();
        scrape_operator(&reader, &store, op, ScrapeScope::All, true, today())
            .await
            .unwrap();
        assert!(reader.requests.borrow().iter().any(|u| u == legacy_url));
    }

    #[tokio::test]
    async fn test_session_handshake_precedes_each_download() {
        let session = "https://www.kansai-td.co.jp/denkiyoho/area-performance/past.html";
        let template = "https://www.kansai-td.co.jp/interchange/denkiyoho/area-performance/past/{fy}_areajyukyu.csv";
        let files = fiscal_year_files(session, template, Tso::Kepco, (2022, 2023), NaiveDate::from_ymd_opt(2023, 5, 1).unwrap());
        let fy = |y: &str| template.replace("{fy}", y);
        let reader = StubReader::default().with(session, "<html></html>");

        let (parsed, failures) = collect_best_effort(&reader, operator(Tso::Kepco), files).await;
        assert!(parsed.is_empty());
        assert_eq!(failures.len(), 2);
        assert_eq!(
            *reader.requests.borrow(),
            vec![session.to_string(), fy("2022"), session.to_string(), fy("2023")]
        );
    }
}
