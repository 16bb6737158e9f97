//! `POST /api/get_transcription`: upload a WAV file, transcribe it via the
//! batch provider, persist and enrich it, and return the renamed transcript.
//!
//! Provider request shape grounded on `original_source/api.py`'s Deepgram
//! `/v1/listen` query-parameter table and response-path parsing.

use super::{AppState, map_reqwest_error, validation_error};
use crate::{
    error::{ApiError, ApiResult},
    persistence::{PersistenceApi, TranscriptState},
};
use axum::{Json, extract::{Multipart, State}};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{error, warn};

const DEEPGRAM_LISTEN_URL: &str = "https://api.deepgram.com/v1/listen";

#[derive(Serialize)]
pub struct BatchTranscriptionResponse {
    transcript: String,
    detected_language: Option<String>,
}

struct Upload {
    bytes: Vec<u8>,
    content_type: String,
    fields: HashMap<String, String>,
}

async fn collect_multipart(mut multipart: Multipart) -> ApiResult<Upload> {
    let mut bytes = None;
    let mut content_type = None;
    let mut fields = HashMap::new();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| validation_error(format!("invalid multipart body: {e}")))?
    {
        let name = field.name().unwrap_or("").to_owned();
        if name == "file" {
            content_type = field.content_type().map(str::to_owned);
            bytes = Some(
                field
                    .bytes()
                    .await
                    .map_err(|e| validation_error(format!("failed to read upload: {e}")))?
                    .to_vec(),
            );
        } else {
            let value = field
                .text()
                .await
                .map_err(|e| validation_error(format!("invalid form field {name}: {e}")))?;
            fields.insert(name, value);
        }
    }

    Ok(Upload {
        bytes: bytes.ok_or_else(|| validation_error("missing required `file` upload"))?,
        content_type: content_type.ok_or_else(|| validation_error("upload is missing a content type"))?,
        fields,
    })
}

fn form_bool(fields: &HashMap<String, String>, key: &str) -> bool {
    fields.get(key).is_some_and(|v| v == "true" || v == "1")
}

fn form_bool_or(fields: &HashMap<String, String>, key: &str, default: bool) -> bool {
    fields
        .get(key)
        .map_or(default, |v| v == "true" || v == "1")
}

#[derive(Deserialize)]
struct ListenChannel {
    alternatives: Vec<ListenAlternative>,
    detected_language: Option<String>,
}

#[derive(Deserialize)]
struct ListenAlternative {
    transcript: String,
    paragraphs: Option<ListenParagraphs>,
}

#[derive(Deserialize)]
struct ListenParagraphs {
    transcript: Option<String>,
}

#[derive(Deserialize)]
struct ListenResults {
    channels: Vec<ListenChannel>,
    paragraphs: Option<ListenParagraphsTop>,
}

#[derive(Deserialize)]
struct ListenParagraphsTop {
    transcript: Option<String>,
}

#[derive(Deserialize)]
struct ListenResponse {
    results: ListenResults,
}

async fn call_deepgram_listen(
    http: &reqwest::Client,
    api_key: &str,
    audio: Vec<u8>,
    content_type: &str,
    fields: &HashMap<String, String>,
) -> ApiResult<(String, Option<String>)> {
    let model = fields.get("model").filter(|v| !v.is_empty()).cloned().unwrap_or_else(|| "nova-3".to_owned());
    let mut params: Vec<(&str, String)> = vec![
        ("model", model),
        ("punctuate", "true".to_owned()),
        ("numerals", "true".to_owned()),
        ("paragraphs", "true".to_owned()),
        ("multichannel", "true".to_owned()),
        ("sentiment", "true".to_owned()),
        ("detect_language", form_bool_or(fields, "detect_language", true).to_string()),
        ("diarize", form_bool_or(fields, "diarize", true).to_string()),
    ];
    if let Some(keywords) = fields.get("keywords").filter(|v| !v.is_empty()) {
        params.push(("keywords", keywords.clone()));
    }

    let response = http
        .post(DEEPGRAM_LISTEN_URL)
        .header("Authorization", format!("Token {api_key}"))
        .header("Content-Type", content_type)
        .query(&params)
        .body(audio)
        .send()
        .await
        .map_err(map_reqwest_error)?
        .error_for_status()
        .map_err(map_reqwest_error)?;

    let parsed: ListenResponse = response
        .json()
        .await
        .map_err(|e| ApiError::Internal(format!("failed to parse provider response: {e}")))?;

    let channel = parsed
        .results
        .channels
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Internal("provider response had no channels".to_owned()))?;
    let detected_language = channel.detected_language.clone();

    let transcript = parsed
        .results
        .paragraphs
        .and_then(|p| p.transcript)
        .or_else(|| {
            channel
                .alternatives
                .first()
                .and_then(|a| a.paragraphs.as_ref())
                .and_then(|p| p.transcript.clone())
        })
        .or_else(|| channel.alternatives.into_iter().next().map(|a| a.transcript))
        .ok_or_else(|| ApiError::Internal("failed to parse transcription response".to_owned()))?;

    Ok((transcript, detected_language))
}

fn rename_channels(transcript: &str, channel0_name: Option<&str>, channel1_name: Option<&str>) -> String {
    let mut out = transcript.to_owned();
    if let Some(name) = channel0_name {
        out = out.replace("Channel 0:", &format!("{name}:")).replace("Speaker 0:", &format!("{name}:"));
    }
    if let Some(name) = channel1_name {
        out = out.replace("Channel 1:", &format!("{name}:")).replace("Speaker 1:", &format!("{name}:"));
    }
    out
}

/// Best-effort transition to `failed`; persistence errors here are logged,
/// never layered onto the caller's already-determined error response.
async fn mark_failed(persistence: &PersistenceApi, id: Option<i64>) {
    if let Some(id) = id {
        if let Err(e) = persistence.set_transcript_state(id, TranscriptState::Failed).await {
            warn!(transcript_id = id, error = %e, "failed to mark transcript as failed");
        }
    }
}

/// Re-chunks and re-embeds the raw transcript, grounded on
/// `original_source/api.py`'s AI-enrichment block, which calls
/// `db.replace_transcript_embeddings` right after persisting the
/// transcript and logs-and-continues on failure rather than failing the
/// request.
async fn replace_embeddings_best_effort(persistence: &PersistenceApi, id: i64, raw: &str) {
    if raw.trim().is_empty() {
        return;
    }
    if let Err(e) = persistence.replace_transcript_embeddings(id, raw).await {
        warn!(transcript_id = id, error = %e, "failed to generate/store transcript embeddings");
    }
}

pub async fn get_transcription(
    State(state): State<AppState>,
    multipart: Multipart,
) -> ApiResult<Json<Value>> {
    let upload = collect_multipart(multipart).await?;
    if upload.content_type != "audio/wav" && upload.content_type != "audio/x-wav" {
        return Err(validation_error("Invalid file type. Only WAV files are supported."));
    }

    let persist = form_bool(&upload.fields, "persist");
    let summary_requested = form_bool(&upload.fields, "summary");
    let channel0_name = upload.fields.get("channel0_name").cloned();
    let channel1_name = upload.fields.get("channel1_name").cloned();
    let uniqueid = upload.fields.get("uniqueid").cloned().unwrap_or_default();

    let mut transcript_id = None;
    if persist {
        PersistenceApi::validate_uniqueid(&uniqueid)?;
        transcript_id = Some(state.persistence.upsert_transcript_progress(&uniqueid).await?);
    }

    let api_key = state
        .stt
        .deepgram_api_key
        .as_ref()
        .ok_or_else(|| ApiError::Internal("DEEPGRAM_API_KEY is not configured".to_owned()))?
        .expose()
        .to_owned();

    let (transcript, detected_language) = match call_deepgram_listen(
        &state.http,
        &api_key,
        upload.bytes,
        &upload.content_type,
        &upload.fields,
    )
    .await
    {
        Ok(it) => it,
        Err(e) => {
            mark_failed(&state.persistence, transcript_id).await;
            return Err(e);
        }
    };

    let renamed = rename_channels(&transcript, channel0_name.as_deref(), channel1_name.as_deref());

    if let Some(id) = transcript_id {
        if let Err(e) = state.persistence.upsert_transcript_raw(&uniqueid, &renamed).await {
            mark_failed(&state.persistence, transcript_id).await;
            return Err(e.into());
        }

        if state.persistence.enrichment_enabled() && summary_requested {
            state.persistence.set_transcript_state(id, TranscriptState::Summarizing).await?;
            match state.enrichment.enrich(id, &renamed, true).await {
                Ok(outcome) if outcome.ok => {
                    replace_embeddings_best_effort(&state.persistence, id, &renamed).await;
                    state.persistence.set_transcript_state(id, TranscriptState::Done).await?;
                }
                Ok(_) => mark_failed(&state.persistence, transcript_id).await,
                Err(e) => {
                    error!(transcript_id = id, error = %e, "enrichment pipeline failed");
                    mark_failed(&state.persistence, transcript_id).await;
                }
            }
        } else {
            if state.persistence.enrichment_enabled() {
                replace_embeddings_best_effort(&state.persistence, id, &renamed).await;
            }
            state.persistence.set_transcript_state(id, TranscriptState::Done).await?;
        }
    }

    Ok(Json(serde_json::json!(BatchTranscriptionResponse {
        transcript: renamed,
        detected_language,
    })))
}
