pub mod deepgram;
pub mod interleave;
pub mod provider;

use crate::{bus::BusApi, config::SttConfig, error::SttResult, rtp::RtpServerApi};
use deepgram::DeepgramProvider;
use provider::RealtimeSttProvider;
use serde_json::json;
use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::mpsc;
use tracing::{info, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone)]
pub struct SpeakerIdentity {
    pub name: String,
    pub number: String,
}

pub struct ConnectorParams {
    pub uniqueid: String,
    pub language: String,
    pub port_in: u16,
    pub port_out: u16,
    pub speaker_in: SpeakerIdentity,
    pub speaker_out: SpeakerIdentity,
    pub call_elapsed_at_start: Option<f64>,
}

/// `Clone`-able handle to a running realtime connector. `close` is
/// idempotent and callable from any task: only the first caller tears the
/// pump/sender/receiver tasks down and publishes the consolidated
/// transcript.
#[derive(Clone)]
pub struct SttConnectorApi {
    closed: Arc<AtomicBool>,
}

impl SttConnectorApi {
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct TranscriptRecord {
    speaker_name: String,
    transcription: String,
}

/// Starts the realtime pipeline for one call: one task pumps interleaved
/// audio off the call's two RTP streams into a bounded queue, one drains
/// that queue into the provider, and one consumes provider transcripts,
/// publishing each on the bus and accumulating finals for the
/// end-of-call consolidated transcript.
pub async fn start(
    config: &SttConfig,
    bus: BusApi,
    rtp: RtpServerApi,
    params: ConnectorParams,
) -> SttResult<SttConnectorApi> {
    let provider: Arc<dyn RealtimeSttProvider> =
        Arc::new(DeepgramProvider::connect(config, &params.language).await?);

    let closed = Arc::new(AtomicBool::new(false));
    let complete_call = Arc::new(Mutex::new(Vec::<TranscriptRecord>::new()));
    let (audio_tx, audio_rx) = mpsc::channel::<Vec<u8>>(100);

    tokio::spawn(audio_pump(
        rtp,
        params.port_in,
        params.port_out,
        audio_tx,
        closed.clone(),
    ));
    tokio::spawn(sender_loop(audio_rx, provider.clone(), closed.clone()));
    tokio::spawn(receiver_loop(
        provider.clone(),
        bus.clone(),
        params.uniqueid.clone(),
        params.speaker_in,
        params.speaker_out,
        params.call_elapsed_at_start,
        complete_call.clone(),
        closed.clone(),
    ));
    tokio::spawn(finalize_on_close(
        provider,
        bus,
        params.uniqueid,
        complete_call,
        closed.clone(),
    ));

    Ok(SttConnectorApi { closed })
}

async fn audio_pump(
    rtp: RtpServerApi,
    port_in: u16,
    port_out: u16,
    tx: mpsc::Sender<Vec<u8>>,
    closed: Arc<AtomicBool>,
) {
    const TARGET_SIZE: usize = 5120;
    const CHUNK: usize = 320;
    let deadline = Duration::from_millis(250);
    while !closed.load(Ordering::SeqCst) {
        let start = Instant::now();
        let mut side_in = Vec::new();
        let mut side_out = Vec::new();
        while (side_in.len() < TARGET_SIZE || side_out.len() < TARGET_SIZE)
            && start.elapsed() < deadline
        {
            if side_in.len() < TARGET_SIZE {
                side_in.extend(rtp.read(port_in, CHUNK).await);
            }
            if side_out.len() < TARGET_SIZE {
                side_out.extend(rtp.read(port_out, CHUNK).await);
            }
            tokio::task::yield_now().await;
        }
        if side_in.is_empty() && side_out.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
            continue;
        }
        let interleaved = interleave::interleave(&side_in, &side_out);
        if tx.send(interleaved).await.is_err() {
            break;
        }
    }
}

async fn sender_loop(
    mut rx: mpsc::Receiver<Vec<u8>>,
    provider: Arc<dyn RealtimeSttProvider>,
    closed: Arc<AtomicBool>,
) {
    while !closed.load(Ordering::SeqCst) {
        let Some(chunk) = rx.recv().await else { break };
        if let Err(e) = provider.send_audio(&chunk).await {
            warn!(error = %e, "failed to send audio to provider, stopping");
            break;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn receiver_loop(
    provider: Arc<dyn RealtimeSttProvider>,
    bus: BusApi,
    uniqueid: String,
    speaker_in: SpeakerIdentity,
    speaker_out: SpeakerIdentity,
    call_elapsed_at_start: Option<f64>,
    complete_call: Arc<Mutex<Vec<TranscriptRecord>>>,
    closed: Arc<AtomicBool>,
) {
    while !closed.load(Ordering::SeqCst) {
        let event = tokio::select! {
            event = provider.next_event() => event,
            _ = tokio::time::sleep(POLL_INTERVAL) => continue,
        };
        match event {
            Ok(Some(t)) => {
                let (speaker, counterpart) = if t.is_channel_zero {
                    (&speaker_in, &speaker_out)
                } else {
                    (&speaker_out, &speaker_in)
                };
                let call_elapsed_seconds = call_elapsed_at_start.map(|s| s + t.start_seconds);
                let mut payload = json!({
                    "uniqueid": uniqueid,
                    "transcription": t.transcript,
                    "timestamp": t.start_seconds,
                    "speaker_name": speaker.name,
                    "speaker_number": speaker.number,
                    "speaker_counterpart_name": counterpart.name,
                    "speaker_counterpart_number": counterpart.number,
                    "is_final": t.is_final,
                });
                if let Some(elapsed) = call_elapsed_seconds {
                    payload["call_elapsed_seconds"] = json!(elapsed);
                }
                bus.publish("transcription", payload).await;
                if t.is_final {
                    complete_call
                        .lock()
                        .expect("complete_call lock poisoned")
                        .push(TranscriptRecord {
                            speaker_name: speaker.name.clone(),
                            transcription: t.transcript,
                        });
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "provider event stream error, closing connector");
                break;
            }
        }
    }
}

async fn finalize_on_close(
    provider: Arc<dyn RealtimeSttProvider>,
    bus: BusApi,
    uniqueid: String,
    complete_call: Arc<Mutex<Vec<TranscriptRecord>>>,
    closed: Arc<AtomicBool>,
) {
    while !closed.load(Ordering::SeqCst) {
        tokio::time::sleep(POLL_INTERVAL).await;
    }
    provider.close().await.ok();

    let mut text = String::new();
    let mut last_speaker: Option<String> = None;
    for record in complete_call
        .lock()
        .expect("complete_call lock poisoned")
        .iter()
    {
        if last_speaker.as_deref() != Some(record.speaker_name.as_str()) {
            text.push('\n');
            text.push_str(&record.speaker_name);
            text.push_str(": ");
        }
        text.push_str(&record.transcription);
        text.push('\n');
        last_speaker = Some(record.speaker_name.clone());
    }

    bus.publish(
        "final",
        json!({ "uniqueid": uniqueid, "raw_transcription": text }),
    )
    .await;
    info!(uniqueid, "realtime connector closed");
}
