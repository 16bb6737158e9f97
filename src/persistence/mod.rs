//! Transcript persistence: schema bootstrap, row lifecycle, and chunked
//! embeddings against a Postgres + `pgvector` store.
//!
//! Grounded on `original_source/db.py` (schema shape, upsert semantics,
//! extension-missing recovery) adapted from `psycopg` to `sqlx`'s async
//! `PgPool`, in the style of the pack's `gglib-db::setup` module.

pub mod embeddings;

use crate::{
    config::PersistenceConfig,
    error::{PersistenceError, PersistenceResult},
    text_split,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use sqlx::{Row, postgres::PgPoolOptions};
use std::{fmt, str::FromStr, sync::OnceLock, time::Duration};
use tokio::sync::OnceCell;
use tracing::{instrument, warn};

const EMBEDDING_DIM: usize = 1536;
const CHUNK_SIZE: usize = 2000;
const CHUNK_OVERLAP: usize = 200;

fn uniqueid_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("static regex"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriptState {
    Progress,
    Summarizing,
    Done,
    Failed,
}

impl TranscriptState {
    fn as_str(self) -> &'static str {
        match self {
            TranscriptState::Progress => "progress",
            TranscriptState::Summarizing => "summarizing",
            TranscriptState::Done => "done",
            TranscriptState::Failed => "failed",
        }
    }
}

impl fmt::Display for TranscriptState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TranscriptState {
    type Err = PersistenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "progress" => Ok(TranscriptState::Progress),
            "summarizing" => Ok(TranscriptState::Summarizing),
            "done" => Ok(TranscriptState::Done),
            "failed" => Ok(TranscriptState::Failed),
            other => Err(PersistenceError::InvalidUniqueId(other.to_owned())),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transcript {
    pub id: i64,
    pub uniqueid: String,
    pub raw_transcription: String,
    pub cleaned_transcription: Option<String>,
    pub summary: Option<String>,
    pub sentiment: Option<i32>,
    pub state: TranscriptState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Handle to the persistence layer. Cheap to clone: the pool is internally
/// reference-counted and connects lazily, so constructing this when
/// `PGVECTOR_*` is unset is free and every operation simply returns
/// [`PersistenceError::NotConfigured`].
#[derive(Clone)]
pub struct PersistenceApi {
    pool: Option<sqlx::PgPool>,
    http: reqwest::Client,
    embedding_model: String,
    openai_api_key: Option<String>,
    schema_ready: std::sync::Arc<OnceCell<()>>,
}

impl PersistenceApi {
    pub fn new(config: &PersistenceConfig) -> PersistenceApi {
        let pool = config.connection_string().map(|url| {
            PgPoolOptions::new()
                .max_connections(8)
                .connect_lazy(&url)
                .expect("connect_lazy never actually dials the database")
        });
        PersistenceApi {
            pool,
            http: reqwest::Client::builder()
                .timeout(EMBEDDING_REQUEST_TIMEOUT)
                .build()
                .expect("static reqwest client config is always valid"),
            embedding_model: config.embedding_model.clone(),
            openai_api_key: config.openai_api_key.as_ref().map(|s| s.expose().to_owned()),
            schema_ready: std::sync::Arc::new(OnceCell::new()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.pool.is_some()
    }

    /// Whether an OpenAI-like key is present, i.e. whether the enrichment
    /// pipeline (C7) and embedding replacement have anything to call.
    pub fn enrichment_enabled(&self) -> bool {
        self.openai_api_key.is_some()
    }

    pub fn validate_uniqueid(uniqueid: &str) -> PersistenceResult<()> {
        let trimmed = uniqueid.trim();
        if trimmed.is_empty() || !uniqueid_re().is_match(trimmed) {
            return Err(PersistenceError::InvalidUniqueId(uniqueid.to_owned()));
        }
        Ok(())
    }

    fn pool(&self) -> PersistenceResult<&sqlx::PgPool> {
        self.pool
            .as_ref()
            .ok_or(PersistenceError::NotConfigured("PGVECTOR_* persistence"))
    }

    /// One-time, thread-safe bootstrap: the `vector` extension, both
    /// tables with their CHECK constraints, the secondary index, and a
    /// best-effort HNSW index. Safe to call from many tasks; only the
    /// first call does the work.
    #[instrument(skip(self))]
    async fn ensure_schema(&self) -> PersistenceResult<()> {
        let pool = self.pool()?;
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
                    .execute(pool)
                    .await?;

                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS transcripts (
                        id BIGSERIAL PRIMARY KEY,
                        uniqueid TEXT NOT NULL UNIQUE,
                        raw_transcription TEXT NOT NULL DEFAULT '',
                        state TEXT NOT NULL DEFAULT 'progress'
                            CONSTRAINT transcripts_state_check
                            CHECK (state IN ('progress', 'failed', 'summarizing', 'done')),
                        cleaned_transcription TEXT,
                        summary TEXT,
                        sentiment SMALLINT CHECK (sentiment BETWEEN 0 AND 10),
                        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                        updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
                    )"
                ))
                .execute(pool)
                .await?;

                sqlx::query(&format!(
                    "CREATE TABLE IF NOT EXISTS transcript_chunks (
                        id BIGSERIAL PRIMARY KEY,
                        transcript_id BIGINT NOT NULL REFERENCES transcripts(id) ON DELETE CASCADE,
                        chunk_index INTEGER NOT NULL,
                        content TEXT NOT NULL,
                        embedding vector({EMBEDDING_DIM}) NOT NULL,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                        UNIQUE (transcript_id, chunk_index)
                    )"
                ))
                .execute(pool)
                .await?;

                sqlx::query(
                    "CREATE INDEX IF NOT EXISTS transcript_chunks_transcript_id_idx
                     ON transcript_chunks (transcript_id)",
                )
                .execute(pool)
                .await?;

                if let Err(e) = sqlx::query(
                    "CREATE INDEX IF NOT EXISTS transcript_chunks_embedding_hnsw
                     ON transcript_chunks USING hnsw (embedding vector_cosine_ops)
                     WITH (m = 16, ef_construction = 64)",
                )
                .execute(pool)
                .await
                {
                    warn!(error = %e, "HNSW index creation failed; pgvector may be too old, continuing without ANN");
                }

                Ok::<(), PersistenceError>(())
            })
            .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn upsert_transcript_progress(&self, uniqueid: &str) -> PersistenceResult<i64> {
        Self::validate_uniqueid(uniqueid)?;
        self.ensure_schema().await?;
        let row = sqlx::query(
            "INSERT INTO transcripts (uniqueid, raw_transcription, state)
             VALUES ($1, '', 'progress')
             ON CONFLICT (uniqueid) DO UPDATE SET state = 'progress', updated_at = now()
             RETURNING id",
        )
        .bind(uniqueid)
        .fetch_one(self.pool()?)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    #[instrument(skip(self, raw))]
    pub async fn upsert_transcript_raw(&self, uniqueid: &str, raw: &str) -> PersistenceResult<i64> {
        Self::validate_uniqueid(uniqueid)?;
        self.ensure_schema().await?;
        let row = sqlx::query(
            "INSERT INTO transcripts (uniqueid, raw_transcription)
             VALUES ($1, $2)
             ON CONFLICT (uniqueid)
             DO UPDATE SET raw_transcription = EXCLUDED.raw_transcription, updated_at = now()
             RETURNING id",
        )
        .bind(uniqueid)
        .bind(raw)
        .fetch_one(self.pool()?)
        .await?;
        Ok(row.get::<i64, _>("id"))
    }

    #[instrument(skip(self))]
    pub async fn set_transcript_state(&self, id: i64, state: TranscriptState) -> PersistenceResult<()> {
        self.ensure_schema().await?;
        sqlx::query("UPDATE transcripts SET state = $1, updated_at = now() WHERE id = $2")
            .bind(state.as_str())
            .bind(id)
            .execute(self.pool()?)
            .await?;
        Ok(())
    }

    #[instrument(skip(self, cleaned, summary))]
    pub async fn update_transcript_ai_fields(
        &self,
        id: i64,
        cleaned: &str,
        summary: &str,
        sentiment: Option<i32>,
    ) -> PersistenceResult<()> {
        self.ensure_schema().await?;
        sqlx::query(
            "UPDATE transcripts
             SET cleaned_transcription = $1, summary = $2, sentiment = $3, updated_at = now()
             WHERE id = $4",
        )
        .bind(cleaned)
        .bind(summary)
        .bind(sentiment)
        .bind(id)
        .execute(self.pool()?)
        .await?;
        Ok(())
    }

    /// Splits `raw` into overlapping chunks, embeds each, and atomically
    /// replaces the transcript's chunk rows with dense `0..N-1` indices.
    #[instrument(skip(self, raw))]
    pub async fn replace_transcript_embeddings(&self, id: i64, raw: &str) -> PersistenceResult<usize> {
        self.ensure_schema().await?;
        let chunks = text_split::split(raw, CHUNK_SIZE, CHUNK_OVERLAP);
        if chunks.is_empty() {
            return Ok(0);
        }
        let api_key = self
            .openai_api_key
            .as_deref()
            .ok_or(PersistenceError::NotConfigured("OPENAI_API_KEY"))?;
        let vectors = embeddings::embed_batch(&self.http, api_key, &self.embedding_model, &chunks).await?;

        let mut tx = self.pool()?.begin().await?;
        sqlx::query("DELETE FROM transcript_chunks WHERE transcript_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for (idx, (chunk, vector)) in chunks.iter().zip(vectors.iter()).enumerate() {
            sqlx::query(
                "INSERT INTO transcript_chunks (transcript_id, chunk_index, content, embedding)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(id)
            .bind(idx as i32)
            .bind(chunk)
            .bind(pgvector::Vector::from(vector.clone()))
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(chunks.len())
    }

    #[instrument(skip(self))]
    pub async fn get_transcript(&self, id: i64) -> PersistenceResult<Option<Transcript>> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            "SELECT id, uniqueid, raw_transcription, cleaned_transcription, summary,
                    sentiment, state, created_at, updated_at
             FROM transcripts WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(self.pool()?)
        .await?;
        let Some(row) = row else { return Ok(None) };
        let state: String = row.get("state");
        Ok(Some(Transcript {
            id: row.get("id"),
            uniqueid: row.get("uniqueid"),
            raw_transcription: row.get("raw_transcription"),
            cleaned_transcription: row.get("cleaned_transcription"),
            summary: row.get("summary"),
            sentiment: row.get("sentiment"),
            state: state.parse()?,
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }))
    }
}

/// Overall request timeout for the embeddings HTTP client; kept here rather
/// than in `config` since it is an implementation detail of this layer, not
/// an externally configurable knob.
pub const EMBEDDING_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniqueid_accepts_digits_dot_digits() {
        assert!(PersistenceApi::validate_uniqueid("1234567890.1234").is_ok());
        assert!(PersistenceApi::validate_uniqueid("not-a-uniqueid").is_err());
        assert!(PersistenceApi::validate_uniqueid("").is_err());
    }

    #[test]
    fn state_round_trips_through_str() {
        for s in [
            TranscriptState::Progress,
            TranscriptState::Summarizing,
            TranscriptState::Done,
            TranscriptState::Failed,
        ] {
            assert_eq!(s.as_str().parse::<TranscriptState>().expect("parse"), s);
        }
    }
}
