//! `POST /api/get_speech`: chunked text-to-speech via the Deepgram `speak`
//! endpoint, concatenated into one MP3 response.

use super::{AppState, map_reqwest_error, validation_error};
use crate::{error::ApiResult, text_split};
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Uri, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

const DEEPGRAM_SPEAK_URL: &str = "https://api.deepgram.com/v1/speak";
const DEFAULT_TTS_MODEL: &str = "aura-asteria-en";
const TTS_CHUNK_SIZE: usize = 2000;

#[derive(Deserialize, Default)]
struct SpeechParams {
    text: Option<String>,
    language: Option<String>,
    model: Option<String>,
}

impl SpeechParams {
    fn merge(mut self, other: SpeechParams) -> SpeechParams {
        if other.text.is_some() {
            self.text = other.text;
        }
        if other.language.is_some() {
            self.language = other.language;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        self
    }
}

#[derive(Serialize)]
struct SpeakRequest<'a> {
    text: &'a str,
}

async fn synthesize_chunk(http: &reqwest::Client, api_key: &str, model: &str, language: Option<&str>, text: &str) -> ApiResult<Vec<u8>> {
    let mut request = http
        .post(DEEPGRAM_SPEAK_URL)
        .header("Authorization", format!("Token {api_key}"))
        .query(&[("model", model), ("encoding", "mp3")]);
    if let Some(language) = language {
        request = request.query(&[("language", language)]);
    }
    let response = request
        .json(&SpeakRequest { text })
        .send()
        .await
        .map_err(map_reqwest_error)?
        .error_for_status()
        .map_err(map_reqwest_error)?;
    Ok(response.bytes().await.map_err(map_reqwest_error)?.to_vec())
}

pub async fn get_speech(State(state): State<AppState>, uri: Uri, headers: HeaderMap, body: Bytes) -> ApiResult<Response> {
    let from_query: SpeechParams = uri
        .query()
        .map(serde_urlencoded::from_str)
        .transpose()
        .map_err(|e| validation_error(format!("invalid query string: {e}")))?
        .unwrap_or_default();

    let is_form = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("application/x-www-form-urlencoded"));
    let from_form: SpeechParams = if is_form && !body.is_empty() {
        serde_urlencoded::from_bytes(&body).map_err(|e| validation_error(format!("invalid form body: {e}")))?
    } else {
        SpeechParams::default()
    };

    let params = from_query.merge(from_form);
    let text = params
        .text
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| validation_error("missing required `text` parameter"))?;
    let model = params.model.unwrap_or_else(|| DEFAULT_TTS_MODEL.to_owned());

    let api_key = state
        .stt
        .deepgram_api_key
        .as_ref()
        .ok_or_else(|| validation_error("DEEPGRAM_API_KEY is not configured"))?
        .expose()
        .to_owned();

    let chunks = text_split::split(&text, TTS_CHUNK_SIZE, 0);
    let mut audio = Vec::new();
    for chunk in chunks {
        let mp3 = synthesize_chunk(&state.http, &api_key, &model, params.language.as_deref(), &chunk).await?;
        audio.extend(mp3);
    }

    let filename = format!("speech-{}.mp3", hex::encode(rand::random::<[u8; 8]>()));
    Ok((
        [
            (header::CONTENT_TYPE.as_str(), "audio/mpeg".to_owned()),
            (
                header::CONTENT_DISPOSITION.as_str(),
                format!("attachment; filename=\"{filename}\""),
            ),
            (header::CACHE_CONTROL.as_str(), "no-store".to_owned()),
            ("x-content-type-options", "nosniff".to_owned()),
        ],
        audio,
    )
        .into_response())
}
