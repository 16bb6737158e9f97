//! Out-of-process transcript enrichment: clean, summarize and sentiment-score
//! a raw call transcript via an LLM, then persist the result directly.
//!
//! Spoken to over stdin/stdout as a single JSON request/response pair so a
//! wedged upstream call can never block the parent event loop; grounded on
//! the teacher's `tokio::process::Command` child-process pattern
//! (`aes67-rs-vsc-management-agent::run_rest_api`'s `xdg-open` spawn) scaled
//! up to a JSON-speaking worker, and on `original_source/ai.py` for the
//! clean/summarize/reduce/sentiment prompt shapes.

use callbridge::{
    config::PersistenceConfig,
    persistence::PersistenceApi,
    text_split,
};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::process::ExitCode;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{error, info, instrument, warn};

const LARGE_CHUNK_SIZE: usize = 400_000;
const SENTIMENT_PREFIX_CAP: usize = 20_000;
const CHAT_COMPLETIONS_URL: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

const CLEAN_PROMPT: &str = "You are cleaning a raw, auto-generated phone call transcript. \
The input interleaves short fragments from two speakers, labelled `Channel 0:`/`Channel 1:` \
or `Speaker 0:`/`Speaker 1:`. Repair it into coherent sentences per speaker turn: fix obviously \
broken words, merge fragments that belong to the same utterance, and remove filler noise, but \
never invent content that is not implied by the input. Preserve every speaker label exactly as \
given and keep the transcript in its original language. Reply with only the cleaned transcript.";

const SUMMARIZE_PROMPT: &str = "Summarize the following call transcript excerpt as a short list \
of bullet points covering what was discussed, any decisions made, and any follow-up actions. \
Reply with only the bullet points, one per line, starting with \"- \".";

const REDUCE_PROMPT: &str = "You are given several partial bullet-point summaries of consecutive \
parts of the same phone call, in order. Merge them into a single bullet-point summary of the \
whole call, removing duplicate points and keeping the overall order of topics. Reply with only \
the merged bullet points.";

const SENTIMENT_PROMPT: &str = "Rate the overall caller sentiment of the following call \
transcript on a scale from 0 (extremely negative) to 10 (extremely positive). Reply with only \
the integer, nothing else.";

#[derive(Error, Debug)]
enum WorkerError {
    #[error("failed to read request from stdin: {0}")]
    Stdin(#[source] std::io::Error),
    #[error("malformed request on stdin: {0}")]
    Request(#[source] serde_json::Error),
    #[error("chat completion request failed: {0}")]
    Completion(#[source] reqwest::Error),
    #[error("chat completion response had no choices")]
    EmptyCompletion,
    #[error("persistence error: {0}")]
    Persistence(#[from] callbridge::error::PersistenceError),
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,
}

#[derive(Deserialize)]
struct WorkerRequest {
    transcript_id: i64,
    raw_transcription: String,
    #[serde(default)]
    summary: bool,
}

#[derive(Serialize)]
struct WorkerResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    sentiment: Option<i32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

async fn complete(
    http: &reqwest::Client,
    api_key: &str,
    model: &str,
    system_prompt: &str,
    user_content: String,
) -> Result<String, WorkerError> {
    let request = ChatRequest {
        model,
        temperature: 0.2,
        messages: vec![
            ChatMessage {
                role: "system",
                content: system_prompt.to_owned(),
            },
            ChatMessage {
                role: "user",
                content: user_content,
            },
        ],
    };
    let response: ChatResponse = http
        .post(CHAT_COMPLETIONS_URL)
        .bearer_auth(api_key)
        .json(&request)
        .send()
        .await
        .map_err(WorkerError::Completion)?
        .error_for_status()
        .map_err(WorkerError::Completion)?
        .json()
        .await
        .map_err(WorkerError::Completion)?;
    response
        .choices
        .into_iter()
        .next()
        .map(|c| c.message.content)
        .ok_or(WorkerError::EmptyCompletion)
}

#[instrument(skip_all)]
async fn clean_transcript(http: &reqwest::Client, api_key: &str, model: &str, raw: &str) -> Result<String, WorkerError> {
    let chunks = text_split::split(raw, LARGE_CHUNK_SIZE, 0);
    let mut cleaned = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        cleaned.push(complete(http, api_key, model, CLEAN_PROMPT, chunk).await?);
    }
    Ok(cleaned.join("\n\n"))
}

#[instrument(skip_all)]
async fn summarize_transcript(http: &reqwest::Client, api_key: &str, model: &str, cleaned: &str) -> Result<String, WorkerError> {
    let chunks = text_split::split(cleaned, LARGE_CHUNK_SIZE, 0);
    let mut partials = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        partials.push(complete(http, api_key, model, SUMMARIZE_PROMPT, chunk).await?);
    }
    if partials.len() <= 1 {
        return Ok(partials.into_iter().next().unwrap_or_default());
    }
    complete(http, api_key, model, REDUCE_PROMPT, partials.join("\n\n")).await
}

#[instrument(skip_all)]
async fn score_sentiment(http: &reqwest::Client, api_key: &str, model: &str, cleaned: &str) -> Option<i32> {
    let prefix: String = cleaned.chars().take(SENTIMENT_PREFIX_CAP).collect();
    let reply = match complete(http, api_key, model, SENTIMENT_PROMPT, prefix).await {
        Ok(r) => r,
        Err(e) => {
            warn!(error = %e, "sentiment scoring request failed");
            return None;
        }
    };
    reply
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect::<String>()
        .parse::<i32>()
        .ok()
        .map(|n| n.clamp(0, 10))
}

#[instrument(skip_all, fields(transcript_id = request.transcript_id))]
async fn run_pipeline(request: &WorkerRequest) -> Result<Option<i32>, WorkerError> {
    let persistence_config = PersistenceConfig::parse_from(std::iter::empty::<String>());
    let api_key = persistence_config
        .openai_api_key
        .as_ref()
        .ok_or(WorkerError::MissingApiKey)?
        .expose()
        .to_owned();
    let model = std::env::var("ENRICHMENT_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_owned());
    let http = reqwest::Client::new();

    let cleaned = clean_transcript(&http, &api_key, &model, &request.raw_transcription).await?;
    let summary = if request.summary {
        summarize_transcript(&http, &api_key, &model, &cleaned).await?
    } else {
        String::new()
    };
    let sentiment = score_sentiment(&http, &api_key, &model, &cleaned).await;

    let persistence = PersistenceApi::new(&persistence_config);
    persistence
        .update_transcript_ai_fields(request.transcript_id, &cleaned, &summary, sentiment)
        .await?;

    Ok(sentiment)
}

async fn read_request() -> Result<WorkerRequest, WorkerError> {
    let mut buf = String::new();
    tokio::io::stdin()
        .read_to_string(&mut buf)
        .await
        .map_err(WorkerError::Stdin)?;
    serde_json::from_str(&buf).map_err(WorkerError::Request)
}

async fn write_response(response: &WorkerResponse) {
    let body = match serde_json::to_vec(response) {
        Ok(b) => b,
        Err(e) => {
            error!(error = %e, "failed to serialize worker response");
            return;
        }
    };
    let mut stdout = tokio::io::stdout();
    if stdout.write_all(&body).await.is_ok() {
        stdout.write_all(b"\n").await.ok();
        stdout.flush().await.ok();
    }
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start worker runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async_main())
}

async fn async_main() -> ExitCode {
    let request = match read_request().await {
        Ok(r) => r,
        Err(e) => {
            error!(error = %e, "failed to read enrichment request");
            write_response(&WorkerResponse { ok: false, sentiment: None }).await;
            return ExitCode::FAILURE;
        }
    };

    match run_pipeline(&request).await {
        Ok(sentiment) => {
            info!(transcript_id = request.transcript_id, "enrichment pipeline completed");
            write_response(&WorkerResponse { ok: true, sentiment }).await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(transcript_id = request.transcript_id, error = %e, "enrichment pipeline failed");
            write_response(&WorkerResponse { ok: false, sentiment: None }).await;
            ExitCode::FAILURE
        }
    }
}
