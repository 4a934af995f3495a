//! Upsert Writer - storage behind one trait.
//!
//! `PgStore` writes to PostgreSQL with sqlx. `MemoryStore` keeps everything in
//! ordered maps for `--dry-run` and tests. Both honour the natural-key
//! contract: at most one row per key, last write wins.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use gridmix_parser::canonical::format_decimal;
use gridmix_parser::{FormatTag, InterconnectorFlow, StoredAreaRecord, Tso};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool, Postgres, QueryBuilder};
use tracing::{debug, info};
use uuid::Uuid;

/// Rows per INSERT statement; keeps bind parameters well under the limit.
const CHUNK_ROWS: usize = 900;

const MIGRATION: &str = include_str!("../migrations/0001_init.sql");

/// Bookkeeping for one ingested source file.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFileRecord {
    pub tso: Tso,
    pub file_date_key: String,
    pub url: String,
    pub format: FormatTag,
    pub from_utc: Option<DateTime<Utc>>,
    pub to_utc: Option<DateTime<Utc>>,
    pub row_count: i64,
    pub content_hash: String,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Running,
    Ok,
    Partial,
    Failed,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Ok => "ok",
            JobStatus::Partial => "partial",
            JobStatus::Failed => "failed",
        }
    }
}

/// A job run as kept by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub job_run_id: Uuid,
    pub source_id: String,
    pub status: JobStatus,
    pub detail: Value,
    pub error: Option<String>,
}

#[allow(async_fn_in_trait)]
pub trait AreaStore {
    /// Insert or overwrite records by `data_id`. Returns rows written.
    async fn upsert_area_records(&self, records: &[StoredAreaRecord]) -> Result<usize>;

    async fn upsert_source_file(&self, record: &SourceFileRecord) -> Result<()>;

    async fn source_file(&self, tso: Tso, file_date_key: &str) -> Result<Option<SourceFileRecord>>;

    /// Records with `from <= datetime_from < to`, ordered by `datetime_from`.
    async fn area_records_between(
        &self,
        tso: Tso,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredAreaRecord>>;

    async fn upsert_interconnector_flows(&self, flows: &[InterconnectorFlow]) -> Result<usize>;

    async fn create_job_run(&self, source_id: &str, detail: Value) -> Result<Uuid>;

    async fn finish_job_run(
        &self,
        job_run_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        detail: Value,
    ) -> Result<()>;
}

fn parse_format(raw: &str) -> Result<FormatTag> {
    match raw {
        "legacy" => Ok(FormatTag::Legacy),
        "new" => Ok(FormatTag::New),
        other => bail!("unknown format tag {other:?} in source_files"),
    }
}

// =============================================================================
// PostgreSQL
// =============================================================================

/// Columns of `area_data` in insert order. The first seven are plain, the
/// rest are NUMERIC kWh quantities.
const AREA_COLUMNS: [&str; 26] = [
    "data_id",
    "tso",
    "date_jst",
    "time_from_jst",
    "time_to_jst",
    "datetime_from",
    "datetime_to",
    "total_demand_kwh",
    "nuclear_kwh",
    "all_fossil_kwh",
    "lng_kwh",
    "coal_kwh",
    "oil_kwh",
    "other_fossil_kwh",
    "hydro_kwh",
    "geothermal_kwh",
    "biomass_kwh",
    "solar_output_kwh",
    "solar_throttling_kwh",
    "wind_output_kwh",
    "wind_throttling_kwh",
    "pumped_storage_kwh",
    "battery_storage_kwh",
    "interconnectors_kwh",
    "other_kwh",
    "total_kwh",
];
const PLAIN_COLUMNS: usize = 7;

/// kWh decimals in `AREA_COLUMNS` order.
fn kwh_values(r: &StoredAreaRecord) -> [Option<&str>; 19] {
    [
        Some(r.total_demand_kwh.as_str()),
        Some(r.nuclear_kwh.as_str()),
        Some(r.all_fossil_kwh.as_str()),
        r.lng_kwh.as_deref(),
        r.coal_kwh.as_deref(),
        r.oil_kwh.as_deref(),
        r.other_fossil_kwh.as_deref(),
        Some(r.hydro_kwh.as_str()),
        Some(r.geothermal_kwh.as_str()),
        Some(r.biomass_kwh.as_str()),
        Some(r.solar_output_kwh.as_str()),
        Some(r.solar_throttling_kwh.as_str()),
        Some(r.wind_output_kwh.as_str()),
        Some(r.wind_throttling_kwh.as_str()),
        Some(r.pumped_storage_kwh.as_str()),
        r.battery_storage_kwh.as_deref(),
        Some(r.interconnectors_kwh.as_str()),
        r.other_kwh.as_deref(),
        Some(r.total_kwh.as_str()),
    ]
}

#[derive(Debug, FromRow)]
struct AreaRow {
    data_id: String,
    tso: String,
    date_jst: String,
    time_from_jst: String,
    time_to_jst: String,
    datetime_from: DateTime<Utc>,
    datetime_to: DateTime<Utc>,
    total_demand_kwh: String,
    nuclear_kwh: String,
    all_fossil_kwh: String,
    lng_kwh: Option<String>,
    coal_kwh: Option<String>,
    oil_kwh: Option<String>,
    other_fossil_kwh: Option<String>,
    hydro_kwh: String,
    geothermal_kwh: String,
    biomass_kwh: String,
    solar_output_kwh: String,
    solar_throttling_kwh: String,
    wind_output_kwh: String,
    wind_throttling_kwh: String,
    pumped_storage_kwh: String,
    battery_storage_kwh: Option<String>,
    interconnectors_kwh: String,
    other_kwh: Option<String>,
    total_kwh: String,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AreaRow> for StoredAreaRecord {
    type Error = anyhow::Error;

    fn try_from(row: AreaRow) -> Result<Self> {
        Ok(StoredAreaRecord {
            tso: Tso::from_str(&row.tso)?,
            data_id: row.data_id,
            date_jst: row.date_jst,
            time_from_jst: row.time_from_jst,
            time_to_jst: row.time_to_jst,
            datetime_from: row.datetime_from,
            datetime_to: row.datetime_to,
            total_demand_kwh: row.total_demand_kwh,
            nuclear_kwh: row.nuclear_kwh,
            all_fossil_kwh: row.all_fossil_kwh,
            lng_kwh: row.lng_kwh,
            coal_kwh: row.coal_kwh,
            oil_kwh: row.oil_kwh,
            other_fossil_kwh: row.other_fossil_kwh,
            hydro_kwh: row.hydro_kwh,
            geothermal_kwh: row.geothermal_kwh,
            biomass_kwh: row.biomass_kwh,
            solar_output_kwh: row.solar_output_kwh,
            solar_throttling_kwh: row.solar_throttling_kwh,
            wind_output_kwh: row.wind_output_kwh,
            wind_throttling_kwh: row.wind_throttling_kwh,
            pumped_storage_kwh: row.pumped_storage_kwh,
            battery_storage_kwh: row.battery_storage_kwh,
            interconnectors_kwh: row.interconnectors_kwh,
            other_kwh: row.other_kwh,
            total_kwh: row.total_kwh,
            updated_at: Some(row.updated_at),
        })
    }
}

#[derive(Debug, FromRow)]
struct SourceFileRow {
    tso: String,
    file_date_key: String,
    url: String,
    format: String,
    from_utc: Option<DateTime<Utc>>,
    to_utc: Option<DateTime<Utc>>,
    row_count: i64,
    content_hash: String,
    last_updated: DateTime<Utc>,
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
            .context("Failed to connect to database")?;
        Ok(Self { pool })
    }

    /// Apply the schema. Safe to run on every start.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::raw_sql(MIGRATION)
            .execute(&self.pool)
            .await
            .context("Failed to apply schema")?;
        debug!("schema up to date");
        Ok(())
    }
}

impl AreaStore for PgStore {
    async fn upsert_area_records(&self, records: &[StoredAreaRecord]) -> Result<usize> {
        let update_set = AREA_COLUMNS[1..]
            .iter()
            .map(|c| format!("{c} = EXCLUDED.{c}"))
            .collect::<Vec<_>>()
            .join(", ");

        let mut written = 0usize;
        for chunk in records.chunks(CHUNK_ROWS) {
            let mut qb: QueryBuilder<Postgres> =
                QueryBuilder::new(format!("INSERT INTO area_data ({}) ", AREA_COLUMNS.join(", ")));
            qb.push_values(chunk, |mut row, r| {
                row.push_bind(&r.data_id)
                    .push_bind(r.tso.id())
                    .push_bind(&r.date_jst)
                    .push_bind(&r.time_from_jst)
                    .push_bind(&r.time_to_jst)
                    .push_bind(r.datetime_from)
                    .push_bind(r.datetime_to);
                for value in kwh_values(r) {
                    row.push_bind(value).push_unseparated("::numeric");
                }
            });
            qb.push(" ON CONFLICT (data_id) DO UPDATE SET ");
            qb.push(&update_set);
            qb.push(", updated_at = now()");

            let result = qb
                .build()
                .execute(&self.pool)
                .await
                .context("Failed to upsert area records")?;
            written += result.rows_affected() as usize;
        }

        Ok(written)
    }

    async fn upsert_source_file(&self, record: &SourceFileRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO source_files
            (tso, file_date_key, url, format, from_utc, to_utc, row_count, content_hash, last_updated)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (tso, file_date_key) DO UPDATE SET
                url = EXCLUDED.url,
                format = EXCLUDED.format,
                from_utc = EXCLUDED.from_utc,
                to_utc = EXCLUDED.to_utc,
                row_count = EXCLUDED.row_count,
                content_hash = EXCLUDED.content_hash,
                last_updated = EXCLUDED.last_updated
            "#,
        )
        .bind(record.tso.id())
        .bind(&record.file_date_key)
        .bind(&record.url)
        .bind(record.format.as_str())
        .bind(record.from_utc)
        .bind(record.to_utc)
        .bind(record.row_count)
        .bind(&record.content_hash)
        .bind(record.last_updated)
        .execute(&self.pool)
        .await
        .context("Failed to upsert source file")?;
        Ok(())
    }

    async fn source_file(&self, tso: Tso, file_date_key: &str) -> Result<Option<SourceFileRecord>> {
        let row: Option<SourceFileRow> = sqlx::query_as(
            r#"
            SELECT tso, file_date_key, url, format, from_utc, to_utc, row_count, content_hash, last_updated
            FROM source_files
            WHERE tso = $1 AND file_date_key = $2
            "#,
        )
        .bind(tso.id())
        .bind(file_date_key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| -> Result<SourceFileRecord> {
            Ok(SourceFileRecord {
                tso: Tso::from_str(&r.tso)?,
                format: parse_format(&r.format)?,
                file_date_key: r.file_date_key,
                url: r.url,
                from_utc: r.from_utc,
                to_utc: r.to_utc,
                row_count: r.row_count,
                content_hash: r.content_hash,
                last_updated: r.last_updated,
            })
        })
        .transpose()
    }

    async fn area_records_between(
        &self,
        tso: Tso,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredAreaRecord>> {
        // NUMERIC comes back as text so stored precision is untouched
        let select = AREA_COLUMNS
            .iter()
            .enumerate()
            .map(|(i, c)| {
                if i < PLAIN_COLUMNS {
                    c.to_string()
                } else {
                    format!("{c}::text AS {c}")
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        let sql = format!(
            "SELECT {select}, updated_at FROM area_data \
             WHERE tso = $1 AND datetime_from >= $2 AND datetime_from < $3 \
             ORDER BY datetime_from"
        );

        let rows: Vec<AreaRow> = sqlx::query_as(&sql)
            .bind(tso.id())
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await
            .context("Failed to read area records")?;

        rows.into_iter().map(StoredAreaRecord::try_from).collect()
    }

    async fn upsert_interconnector_flows(&self, flows: &[InterconnectorFlow]) -> Result<usize> {
        let mut written = 0usize;
        for chunk in flows.chunks(CHUNK_ROWS) {
            let amounts: Vec<String> = chunk.iter().map(|f| format_decimal(f.flow_kwh)).collect();
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO interconnector_flows (interconnector, from_tso, to_tso, from_utc, to_utc, flow_kwh) ",
            );
            qb.push_values(chunk.iter().zip(&amounts), |mut row, (f, kwh)| {
                row.push_bind(&f.interconnector)
                    .push_bind(f.from_tso.id())
                    .push_bind(f.to_tso.id())
                    .push_bind(f.from_utc)
                    .push_bind(f.to_utc)
                    .push_bind(kwh)
                    .push_unseparated("::numeric");
            });
            qb.push(
                " ON CONFLICT (interconnector, from_utc) DO UPDATE SET \
                 from_tso = EXCLUDED.from_tso, to_tso = EXCLUDED.to_tso, \
                 to_utc = EXCLUDED.to_utc, flow_kwh = EXCLUDED.flow_kwh, updated_at = now()",
            );
            let result = qb
                .build()
                .execute(&self.pool)
                .await
                .context("Failed to upsert interconnector flows")?;
            written += result.rows_affected() as usize;
        }
        Ok(written)
    }

    async fn create_job_run(&self, source_id: &str, detail: Value) -> Result<Uuid> {
        let job_run_id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO job_runs (job_run_id, component, source_id, status, detail)
            VALUES ($1, 'collector', $2, 'running', $3)
            "#,
        )
        .bind(job_run_id)
        .bind(source_id)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(job_run_id)
    }

    async fn finish_job_run(
        &self,
        job_run_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        detail: Value,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE job_runs
            SET finished_at = now(), status = $2, error = $3, detail = detail || $4
            WHERE job_run_id = $1
            "#,
        )
        .bind(job_run_id)
        .bind(status.as_str())
        .bind(error)
        .bind(detail)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

// =============================================================================
// In-memory
// =============================================================================

#[derive(Debug, Default)]
struct MemoryInner {
    area: BTreeMap<String, StoredAreaRecord>,
    source_files: BTreeMap<(Tso, String), SourceFileRecord>,
    flows: BTreeMap<(String, DateTime<Utc>), InterconnectorFlow>,
    jobs: BTreeMap<Uuid, JobRun>,
}

/// Store for dry runs and tests. Nothing survives the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Every stored record ordered by natural key.
    pub fn area_records(&self) -> Vec<StoredAreaRecord> {
        self.lock().area.values().cloned().collect()
    }

    pub fn interconnector_flows(&self) -> Vec<InterconnectorFlow> {
        self.lock().flows.values().cloned().collect()
    }

    pub fn job_runs(&self) -> Vec<JobRun> {
        self.lock().jobs.values().cloned().collect()
    }

    /// One-line summary for the end of a dry run.
    pub fn log_summary(&self) {
        let inner = self.lock();
        info!(
            area_records = inner.area.len(),
            source_files = inner.source_files.len(),
            interconnector_flows = inner.flows.len(),
            job_runs = inner.jobs.len(),
            "dry run: nothing written to the database"
        );
    }
}

impl AreaStore for MemoryStore {
    async fn upsert_area_records(&self, records: &[StoredAreaRecord]) -> Result<usize> {
        let now = Utc::now();
        let mut inner = self.lock();
        for record in records {
            let stored = StoredAreaRecord {
                updated_at: Some(now),
                ..record.clone()
            };
            inner.area.insert(record.data_id.clone(), stored);
        }
        Ok(records.len())
    }

    async fn upsert_source_file(&self, record: &SourceFileRecord) -> Result<()> {
        self.lock()
            .source_files
            .insert((record.tso, record.file_date_key.clone()), record.clone());
        Ok(())
    }

    async fn source_file(&self, tso: Tso, file_date_key: &str) -> Result<Option<SourceFileRecord>> {
        Ok(self
            .lock()
            .source_files
            .get(&(tso, file_date_key.to_string()))
            .cloned())
    }

    async fn area_records_between(
        &self,
        tso: Tso,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<StoredAreaRecord>> {
        let mut records: Vec<StoredAreaRecord> = self
            .lock()
            .area
            .values()
            .filter(|r| r.tso == tso && r.datetime_from >= from && r.datetime_from < to)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.datetime_from);
        Ok(records)
    }

    async fn upsert_interconnector_flows(&self, flows: &[InterconnectorFlow]) -> Result<usize> {
        let mut inner = self.lock();
        for flow in flows {
            inner
                .flows
                .insert((flow.interconnector.clone(), flow.from_utc), flow.clone());
        }
        Ok(flows.len())
    }

    async fn create_job_run(&self, source_id: &str, detail: Value) -> Result<Uuid> {
        let job_run_id = Uuid::new_v4();
        self.lock().jobs.insert(
            job_run_id,
            JobRun {
                job_run_id,
                source_id: source_id.to_string(),
                status: JobStatus::Running,
                detail,
                error: None,
            },
        );
        Ok(job_run_id)
    }

    async fn finish_job_run(
        &self,
        job_run_id: Uuid,
        status: JobStatus,
        error: Option<&str>,
        detail: Value,
    ) -> Result<()> {
        let mut inner = self.lock();
        let Some(job) = inner.jobs.get_mut(&job_run_id) else {
            bail!("unknown job run {job_run_id}");
        };
        job.status = status;
        job.error = error.map(str::to_string);
        if let (Value::Object(existing), Value::Object(extra)) = (&mut job.detail, detail) {
            existing.extend(extra);
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
