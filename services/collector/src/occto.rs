//! OCCTO interconnector flows.
//!
//! One Shift-JIS CSV per day of 5-minute readings. Unlike operator files
//! there is no best-effort mode: a structurally broken day fails the run.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use gridmix_parser::{bytes_to_grid, consolidate_flows, parse_flow_grid, FileKind, TextEncoding};
use serde_json::json;
use tracing::info;

use crate::fetch::SourceReader;
use crate::store::{AreaStore, JobStatus};

pub const FLOW_URL_TEMPLATE: &str =
    "https://occtonet3.occto.or.jp/public/dfw/RP11/OCCTO/SD/renkeisen_jisseki_{yyyymmdd}.csv";

const SOURCE_ID: &str = "occto";

pub fn flow_url(template: &str, date: NaiveDate) -> String {
    template.replace("{yyyymmdd}", &date.format("%Y%m%d").to_string())
}

async fn ingest_day<R: SourceReader, S: AreaStore>(
    reader: &R,
    store: &S,
    template: &str,
    date: NaiveDate,
) -> Result<usize> {
    let url = flow_url(template, date);
    let bytes = reader.bytes(&url).await?;
    let grid = bytes_to_grid(&bytes, FileKind::Csv, TextEncoding::ShiftJis)?;
    let readings = parse_flow_grid(&grid).with_context(|| format!("could not read {url}"))?;
    let flows = consolidate_flows(&readings).with_context(|| format!("could not consolidate {url}"))?;
    let written = store.upsert_interconnector_flows(&flows).await?;
    info!(date = %date, readings = readings.len(), blocks = written, "interconnector flows written");
    Ok(written)
}

/// Fetch, consolidate and store the flows of each day. Returns blocks written.
pub async fn scrape_interconnectors<R: SourceReader, S: AreaStore>(
    reader: &R,
    store: &S,
    template: &str,
    dates: &[NaiveDate],
) -> Result<usize> {
    let job_run_id = store
        .create_job_run(SOURCE_ID, json!({ "dates": dates.iter().map(|d| d.to_string()).collect::<Vec<_>>() }))
        .await?;

    let mut written = 0;
    for date in dates {
        match ingest_day(reader, store, template, *date).await {
            Ok(blocks) => written += blocks,
            Err(e) => {
                store
                    .finish_job_run(
                        job_run_id,
                        JobStatus::Failed,
                        Some(&format!("{date}: {e:#}")),
                        json!({ "blocks_written": written }),
                    )
                    .await?;
                return Err(e.context(format!("interconnector flows for {date}")));
            }
        }
    }

    store
        .finish_job_run(job_run_id, JobStatus::Ok, None, json!({ "blocks_written": written }))
        .await?;
    Ok(written)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::tests::StubReader;
    use crate::store::MemoryStore;
    use gridmix_parser::Tso;

    const TEMPLATE: &str = "https://occto.test/flows_{yyyymmdd}.csv";

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 4, 1).unwrap()
    }

    fn flow_csv(label: &str, values: &[&str]) -> Vec<u8> {
        let mut text = String::from("連系線潮流実績\r\n連系線,対象日付,対象時刻,潮流実績(MW)\r\n");
        for (i, v) in values.iter().enumerate() {
            text.push_str(&format!("{label},2024/04/01,9:{:02},{v}\r\n", i * 5));
        }
        encoding_rs::SHIFT_JIS.encode(&text).0.into_owned()
    }

    #[test]
    fn test_flow_url() {
        assert_eq!(flow_url(TEMPLATE, day()), "https://occto.test/flows_20240401.csv");
    }

    #[tokio::test]
    async fn test_scrape_writes_consolidated_blocks() {
        let reader = StubReader::default().with(
            &flow_url(TEMPLATE, day()),
            flow_csv("関門連系線", &["100", "110", "120", "130", "140", "150"]),
        );
        let store = MemoryStore::new();

        let written = scrape_interconnectors(&reader, &store, TEMPLATE, &[day()]).await.unwrap();
        assert_eq!(written, 1);

        let flows = store.interconnector_flows();
        assert_eq!(flows[0].interconnector, "chugoku_kyushu");
        assert_eq!((flows[0].from_tso, flows[0].to_tso), (Tso::Chugoku, Tso::Kyuden));
        assert_eq!(flows[0].from_utc.to_rfc3339(), "2024-04-01T00:00:00+00:00");
        assert_eq!(flows[0].flow_kwh, 62_500.0);
        assert_eq!(store.job_runs()[0].status, JobStatus::Ok);
    }

    #[tokio::test]
    async fn test_unknown_label_is_fatal() {
        let reader = StubReader::default().with(
            &flow_url(TEMPLATE, day()),
            flow_csv("新連系線", &["1", "1", "1", "1", "1", "1"]),
        );
        let store = MemoryStore::new();

        let err = scrape_interconnectors(&reader, &store, TEMPLATE, &[day()]).await.unwrap_err();
        assert!(err
            .chain()
            .any(|c| c.downcast_ref::<gridmix_parser::Error>().is_some()));
        let job = &store.job_runs()[0];
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.as_deref().unwrap().starts_with("2024-04-01"));
    }

    #[tokio::test]
    async fn test_missing_day_is_fatal() {
        let store = MemoryStore::new();
        let result = scrape_interconnectors(&StubReader::default(), &store, TEMPLATE, &[day()]).await;
        assert!(result.is_err());
        assert!(store.interconnector_flows().is_empty());
    }
}
