//! Artist document store gateway + shared HTTP client utilities.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use duende_core::{ArtistRecord, ArtistUpdate, ProfileState, ProfileStatus};
use reqwest::StatusCode;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "duende-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: None,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Thin wrapper over a shared [`reqwest::Client`] enforcing the bounded
/// per-call timeout and a small retry-with-backoff loop for transient
/// failures (5xx, 429, connect/timeout errors). Everything else surfaces
/// immediately as a [`FetchError`].
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    backoff: BackoffPolicy,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            backoff: config.backoff,
        })
    }

    /// Execute a request, rebuilding it per attempt so bodies need not be
    /// cloneable. Returns the first successful (2xx) response.
    pub async fn execute<F>(&self, build: F) -> Result<reqwest::Response, FetchError>
    where
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            match build(&self.client).send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    let url = resp.url().to_string();
                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        debug!(status = status.as_u16(), %url, attempt, "retrying request");
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store query failed: {0}")]
    Query(#[from] sqlx::Error),
    #[error("decoding artist document {id}: {source}")]
    Decode {
        id: String,
        source: serde_json::Error,
    },
}

/// Persistence gateway for artist records.
///
/// Writes go through [`ArtistStore::apply_update`] only: a field-wise merge
/// that never replaces the whole document and is safe to apply twice.
#[async_trait]
pub trait ArtistStore: Send + Sync {
    /// Records needing enrichment work (no page, failed, or page without
    /// status), most popular first, bounded by `limit`.
    async fn find_candidates(&self, limit: i64) -> Result<Vec<ArtistRecord>, StoreError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<ArtistRecord>, StoreError>;

    /// Completed records with a page URL but no stored short bio.
    async fn find_backfill_targets(&self, limit: i64) -> Result<Vec<ArtistRecord>, StoreError>;

    async fn apply_update(&self, id: &str, update: &ArtistUpdate) -> Result<(), StoreError>;
}

/// Postgres-backed store: one JSONB document per artist, merged with the
/// `||` shallow-merge operator so updates are field-set upserts.
#[derive(Debug, Clone)]
pub struct PgArtistStore {
    pool: PgPool,
}

const CANDIDATE_PREDICATE: &str = "(doc->>'hasProfilePage') IS DISTINCT FROM 'true' \
     OR (doc->>'profileStatus') = 'failed' \
     OR ((doc->>'hasProfilePage') = 'true' AND NOT jsonb_exists(doc, 'profileStatus'))";

impl PgArtistStore {
    /// Connect eagerly so an unreachable store fails at startup, before any
    /// record is touched.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(database_url)
            .await
            .context("connecting to artist document store")?;
        Ok(Self { pool })
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query("CREATE TABLE IF NOT EXISTS artists (id TEXT PRIMARY KEY, doc JSONB NOT NULL)")
            .execute(&self.pool)
            .await
            .context("creating artists table")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn row_to_record(row: &sqlx::postgres::PgRow) -> Result<ArtistRecord, StoreError> {
        let id: String = row.try_get("id")?;
        let doc: serde_json::Value = row.try_get("doc")?;
        let mut record: ArtistRecord =
            serde_json::from_value(doc).map_err(|source| StoreError::Decode {
                id: id.clone(),
                source,
            })?;
        record.id = id;
        Ok(record)
    }
}

#[async_trait]
impl ArtistStore for PgArtistStore {
    async fn find_candidates(&self, limit: i64) -> Result<Vec<ArtistRecord>, StoreError> {
        let sql = format!(
            "SELECT id, doc FROM artists WHERE {CANDIDATE_PREDICATE} \
             ORDER BY COALESCE((doc->>'eventCount')::bigint, 0) DESC LIMIT $1"
        );
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ArtistRecord>, StoreError> {
        let row = sqlx::query("SELECT id, doc FROM artists WHERE doc->>'name' = $1 LIMIT 1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_backfill_targets(&self, limit: i64) -> Result<Vec<ArtistRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, doc FROM artists \
             WHERE doc->>'profileStatus' = 'complete' \
               AND COALESCE(doc->>'profilePageUrl', '') <> '' \
               AND NOT jsonb_exists(doc, 'short_bio') \
             ORDER BY COALESCE((doc->>'eventCount')::bigint, 0) DESC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::row_to_record).collect()
    }

    async fn apply_update(&self, id: &str, update: &ArtistUpdate) -> Result<(), StoreError> {
        if update.is_empty() {
            return Ok(());
        }
        sqlx::query("UPDATE artists SET doc = doc || $2 WHERE id = $1")
            .bind(id)
            .bind(update.to_document())
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// In-memory store with the same selection and merge semantics as the
/// Postgres store. Backs the test suites and local dry runs.
#[derive(Debug, Default)]
pub struct MemoryArtistStore {
    records: Mutex<HashMap<String, ArtistRecord>>,
}

impl MemoryArtistStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, record: ArtistRecord) {
        self.records
            .lock()
            .expect("store lock")
            .insert(record.id.clone(), record);
    }

    pub fn get(&self, id: &str) -> Option<ArtistRecord> {
        self.records.lock().expect("store lock").get(id).cloned()
    }

    fn sorted_matches(
        &self,
        limit: i64,
        predicate: impl Fn(&ArtistRecord) -> bool,
    ) -> Vec<ArtistRecord> {
        let records = self.records.lock().expect("store lock");
        let mut matches: Vec<ArtistRecord> =
            records.values().filter(|r| predicate(r)).cloned().collect();
        matches.sort_by(|a, b| b.event_count.cmp(&a.event_count).then(a.id.cmp(&b.id)));
        matches.truncate(limit.max(0) as usize);
        matches
    }
}

#[async_trait]
impl ArtistStore for MemoryArtistStore {
    async fn find_candidates(&self, limit: i64) -> Result<Vec<ArtistRecord>, StoreError> {
        Ok(self.sorted_matches(limit, |r| ProfileState::of(r).needs_work()))
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<ArtistRecord>, StoreError> {
        let records = self.records.lock().expect("store lock");
        Ok(records.values().find(|r| r.name == name).cloned())
    }

    async fn find_backfill_targets(&self, limit: i64) -> Result<Vec<ArtistRecord>, StoreError> {
        Ok(self.sorted_matches(limit, |r| {
            r.profile_status == Some(ProfileStatus::Complete)
                && r.profile_page_url.as_deref().is_some_and(|u| !u.is_empty())
                && r.short_bio.is_none()
        }))
    }

    async fn apply_update(&self, id: &str, update: &ArtistUpdate) -> Result<(), StoreError> {
        let mut records = self.records.lock().expect("store lock");
        if let Some(record) = records.get_mut(id) {
            update.apply_to(record);
        }
        Ok(())
    }
}
