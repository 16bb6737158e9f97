//! Thin OpenAI-compatible embeddings client used by
//! [`super::PersistenceApi::replace_transcript_embeddings`].

use crate::error::PersistenceError;
use serde::{Deserialize, Serialize};

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    index: usize,
}

/// Embeds every chunk in one request and returns vectors in `chunks` order.
pub async fn embed_batch(
    http: &reqwest::Client,
    api_key: &str,
    model: &str,
    chunks: &[String],
) -> Result<Vec<Vec<f32>>, PersistenceError> {
    let response = http
        .post(EMBEDDINGS_URL)
        .bearer_auth(api_key)
        .json(&EmbeddingRequest { model, input: chunks })
        .send()
        .await?
        .error_for_status()?;
    let mut body: EmbeddingResponse = response.json().await?;
    body.data.sort_by_key(|d| d.index);
    Ok(body.data.into_iter().map(|d| d.embedding).collect())
}
