use crate::error::SttResult;
use async_trait::async_trait;

/// A single transcript fragment reported by a realtime speech provider,
/// already normalized away from any provider-specific wire shape.
#[derive(Debug, Clone)]
pub struct ProviderTranscript {
    pub transcript: String,
    /// Utterance start, in seconds from the beginning of this session.
    pub start_seconds: f64,
    /// `true` when the provider attributed this utterance to channel 0
    /// ("in"); `false` for channel 1 ("out") or higher.
    pub is_channel_zero: bool,
    pub is_final: bool,
}

/// Abstraction over a realtime speech-to-text provider's duplex session:
/// push interleaved 16-bit stereo PCM in, pull transcript fragments out.
/// Concrete providers (Deepgram today) hide their own wire protocol behind
/// this trait so the connector logic in [`super::SttConnector`] stays
/// provider-agnostic.
#[async_trait]
pub trait RealtimeSttProvider: Send + Sync {
    async fn send_audio(&self, pcm: &[u8]) -> SttResult<()>;

    /// Awaits the next transcript fragment. Returns `Ok(None)` when the
    /// provider closed the session cleanly.
    async fn next_event(&self) -> SttResult<Option<ProviderTranscript>>;

    async fn close(&self) -> SttResult<()>;
}
