use crate::{
    config::SttConfig,
    error::{SttError, SttResult},
    stt::provider::{ProviderTranscript, RealtimeSttProvider},
};
use async_trait::async_trait;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use serde::Deserialize;
use tokio::{net::TcpStream, sync::Mutex};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::client::IntoClientRequest,
    tungstenite::protocol::Message,
};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Realtime Deepgram `listen` WebSocket session: one stereo (`channels=2`)
/// stream carrying the "in" side on channel 0 and "out" on channel 1,
/// matching how audio is interleaved before it is sent.
pub struct DeepgramProvider {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
}

impl DeepgramProvider {
    pub async fn connect(config: &SttConfig, language: &str) -> SttResult<Self> {
        let api_key = config
            .deepgram_api_key
            .as_ref()
            .ok_or_else(|| SttError::Connect("DEEPGRAM_API_KEY not set".to_owned()))?;
        let url = format!(
            "wss://api.deepgram.com/v1/listen?model=nova-2&punctuate=true&language={language}\
             &encoding=linear16&multichannel=true&channels=2&sample_rate=16000\
             &interim_results=true&utterance_end_ms=1000&vad_events=true"
        );
        let mut request = url
            .into_client_request()
            .map_err(SttError::WebSocket)?;
        let header_value = format!("Token {}", api_key.expose())
            .parse()
            .map_err(|_| SttError::Connect("invalid Deepgram API key".to_owned()))?;
        request.headers_mut().insert("Authorization", header_value);

        let (ws, _) = connect_async(request).await.map_err(SttError::WebSocket)?;
        let (sink, source) = ws.split();
        Ok(Self {
            sink: Mutex::new(sink),
            source: Mutex::new(source),
        })
    }
}

#[derive(Debug, Deserialize)]
struct DgAlternative {
    transcript: String,
}

#[derive(Debug, Deserialize)]
struct DgChannel {
    alternatives: Vec<DgAlternative>,
}

#[derive(Debug, Deserialize)]
struct DgResult {
    #[serde(rename = "type")]
    kind: String,
    channel: Option<DgChannel>,
    channel_index: Option<Vec<u32>>,
    start: Option<f64>,
    is_final: Option<bool>,
}

#[async_trait]
impl RealtimeSttProvider for DeepgramProvider {
    async fn send_audio(&self, pcm: &[u8]) -> SttResult<()> {
        self.sink
            .lock()
            .await
            .send(Message::Binary(pcm.to_vec()))
            .await
            .map_err(SttError::WebSocket)
    }

    async fn next_event(&self) -> SttResult<Option<ProviderTranscript>> {
        let mut source = self.source.lock().await;
        loop {
            match source.next().await {
                None => return Ok(None),
                Some(Err(e)) => return Err(SttError::WebSocket(e)),
                Some(Ok(Message::Text(text))) => {
                    let Ok(parsed) = serde_json::from_str::<DgResult>(&text) else {
                        continue;
                    };
                    if parsed.kind != "Results" {
                        continue;
                    }
                    let Some(alt) = parsed
                        .channel
                        .and_then(|c| c.alternatives.into_iter().next())
                    else {
                        continue;
                    };
                    if alt.transcript.is_empty() {
                        continue;
                    }
                    let is_channel_zero = parsed
                        .channel_index
                        .as_deref()
                        .and_then(|idx| idx.first())
                        .copied()
                        .unwrap_or(0)
                        == 0;
                    return Ok(Some(ProviderTranscript {
                        transcript: alt.transcript,
                        start_seconds: parsed.start.unwrap_or(0.0),
                        is_channel_zero,
                        is_final: parsed.is_final.unwrap_or(false),
                    }));
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    async fn close(&self) -> SttResult<()> {
        let mut sink = self.sink.lock().await;
        sink.send(Message::Text("{\"type\":\"CloseStream\"}".to_owned()))
            .await
            .ok();
        sink.close().await.map_err(SttError::WebSocket)
    }
}
