//! `GET /api/get_models`: a statically compiled catalog of the STT/TTS
//! models this deployment knows how to ask the provider for, filtered by
//! language suffix.

use axum::{Json, extract::Query};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Clone, Copy)]
struct ModelInfo {
    id: &'static str,
    kind: &'static str,
    language: &'static str,
}

const MODELS: &[ModelInfo] = &[
    ModelInfo { id: "nova-3", kind: "stt", language: "en" },
    ModelInfo { id: "nova-2", kind: "stt", language: "multi" },
    ModelInfo { id: "nova-2-meeting", kind: "stt", language: "en" },
    ModelInfo { id: "nova-2-phonecall", kind: "stt", language: "en" },
    ModelInfo { id: "aura-asteria-en", kind: "tts", language: "en" },
    ModelInfo { id: "aura-luna-en", kind: "tts", language: "en" },
    ModelInfo { id: "aura-2-thalia-en", kind: "tts", language: "en" },
    ModelInfo { id: "aura-2-celeste-es", kind: "tts", language: "es" },
    ModelInfo { id: "aura-2-pandora-fr", kind: "tts", language: "fr" },
    ModelInfo { id: "aura-2-helios-de", kind: "tts", language: "de" },
];

#[derive(Deserialize)]
pub struct ModelsQuery {
    language: Option<String>,
}

pub async fn get_models(Query(query): Query<ModelsQuery>) -> Json<Vec<ModelInfo>> {
    let filtered = match query.language.as_deref() {
        Some(lang) if !lang.is_empty() => MODELS
            .iter()
            .copied()
            .filter(|m| m.language == lang || m.language == "multi")
            .collect(),
        _ => MODELS.to_vec(),
    };
    Json(filtered)
}
