use crate::ari::events::CallerId;
use crate::orchestrator::reconcile::Direction;
use crate::stt::SttConnectorApi;

/// Per-direction plumbing state: the snoop channel peeling audio off the
/// bridge, the externalMedia channel carrying it out over RTP, the bridge
/// joining the two, and the RTP port the audio actually lands on.
#[derive(Debug, Default, Clone)]
pub struct Tap {
    pub snoop_channel_id: Option<String>,
    pub external_media_channel_id: Option<String>,
    pub bridge_id: Option<String>,
    pub rtp_port: Option<u16>,
    pub bound: bool,
}

impl Tap {
    pub fn is_ready(&self) -> bool {
        self.bridge_id.is_some() && self.bound
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    New,
    TapsCreating,
    ExtMediaPending,
    BridgeReady,
    AudioReady,
    Live,
    Teardown,
    Closed,
}

/// A single PBX call under orchestration, keyed by its Stasis channel id.
pub struct Call {
    pub channel_id: String,
    pub linkedid: String,
    pub language: String,
    pub caller: CallerId,
    pub connected: CallerId,
    pub call_start_epoch: Option<f64>,
    /// Seconds elapsed since the call was answered, snapshotted the moment
    /// transcription was requested; used to align this session's
    /// provider-relative timestamps to the call's own timeline.
    pub call_elapsed_at_start: Option<f64>,
    pub state: CallState,
    pub transcription_requested: bool,
    pub connector_started: bool,
    /// `true` once reconciliation has detected the PBX reported the two
    /// external-media ports in reversed order, so `caller`/`connected`
    /// must be swapped when labeling speakers.
    pub identity_swapped: bool,
    pub tap_in: Tap,
    pub tap_out: Tap,
    pub stt: Option<SttConnectorApi>,
}

impl Call {
    pub fn new(
        channel_id: String,
        linkedid: Option<String>,
        language: String,
        caller: CallerId,
        connected: CallerId,
    ) -> Self {
        let linkedid = linkedid.unwrap_or_else(|| channel_id.clone());
        let call_start_epoch = super::reconcile::call_start_epoch(&linkedid);
        Self {
            channel_id,
            linkedid,
            language,
            caller,
            connected,
            call_start_epoch,
            call_elapsed_at_start: None,
            state: CallState::New,
            transcription_requested: false,
            connector_started: false,
            identity_swapped: false,
            tap_in: Tap::default(),
            tap_out: Tap::default(),
            stt: None,
        }
    }

    /// Speaker identity for the "in" RTP stream, accounting for a detected
    /// port swap.
    pub fn speaker_in(&self) -> &CallerId {
        if self.identity_swapped {
            &self.connected
        } else {
            &self.caller
        }
    }

    pub fn speaker_out(&self) -> &CallerId {
        if self.identity_swapped {
            &self.caller
        } else {
            &self.connected
        }
    }

    pub fn tap(&self, direction: Direction) -> &Tap {
        match direction {
            Direction::In => &self.tap_in,
            Direction::Out => &self.tap_out,
        }
    }

    pub fn tap_mut(&mut self, direction: Direction) -> &mut Tap {
        match direction {
            Direction::In => &mut self.tap_in,
            Direction::Out => &mut self.tap_out,
        }
    }

    pub fn both_taps_ready(&self) -> bool {
        self.tap_in.is_ready() && self.tap_out.is_ready()
    }

    /// Any auxiliary channel/bridge id currently belonging to this call,
    /// used to resolve a StasisEnd/ChannelHangup/ChannelLeftBridge event
    /// back to the owning call.
    pub fn owns_id(&self, id: &str) -> bool {
        self.channel_id == id
            || self.linkedid == id
            || [&self.tap_in, &self.tap_out].iter().any(|t| {
                t.snoop_channel_id.as_deref() == Some(id)
                    || t.external_media_channel_id.as_deref() == Some(id)
                    || t.bridge_id.as_deref() == Some(id)
            })
    }
}
