pub mod call;
pub mod reconcile;

use crate::{
    ari::{
        client::AriClient,
        events::{AriEvent, Channel},
    },
    bus::BusApi,
    config::SttConfig,
    rtp::RtpServerApi,
    stt::{self, ConnectorParams, SpeakerIdentity, SttConnectorApi},
};
use call::{Call, CallState};
use reconcile::{AuxKind, Direction};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tokio_graceful_shutdown::SubsystemHandle;
use tracing::{debug, info, instrument, warn};

const BRIDGE_SETTLE_DELAY: std::time::Duration = std::time::Duration::from_millis(100);

enum OrchestratorMessage {
    StartTranscription(String),
    StopTranscription(String),
    ConnectorReady(String, SttConnectorApi),
    ConnectorFailed(String),
}

/// `Clone`-able handle to the call orchestrator. Every external caller —
/// the batch API, a future control surface — posts through this instead
/// of touching the Call/Tap registries directly, which remain owned
/// solely by the actor loop.
#[derive(Clone)]
pub struct OrchestratorApi {
    tx: mpsc::Sender<OrchestratorMessage>,
}

impl OrchestratorApi {
    pub async fn start_transcription(&self, call_id: &str) {
        self.tx
            .send(OrchestratorMessage::StartTranscription(call_id.to_owned()))
            .await
            .ok();
    }

    pub async fn stop_transcription(&self, call_id: &str) {
        self.tx
            .send(OrchestratorMessage::StopTranscription(call_id.to_owned()))
            .await
            .ok();
    }

    async fn connector_ready(&self, call_id: String, conn: SttConnectorApi) {
        self.tx
            .send(OrchestratorMessage::ConnectorReady(call_id, conn))
            .await
            .ok();
    }

    async fn connector_failed(&self, call_id: String) {
        self.tx
            .send(OrchestratorMessage::ConnectorFailed(call_id))
            .await
            .ok();
    }
}

struct Orchestrator {
    calls: HashMap<String, Call>,
    pending_transcription: HashSet<String>,
    ari: AriClient,
    rtp: RtpServerApi,
    bus: BusApi,
    stt_config: SttConfig,
    app: String,
    external_host: String,
    self_api: OrchestratorApi,
}

impl Orchestrator {
    fn resolve_channel_id(&self, call_id: &str) -> Option<String> {
        self.calls
            .values()
            .find(|c| c.channel_id == call_id || c.linkedid == call_id)
            .map(|c| c.channel_id.clone())
    }

    fn find_owner(&self, id: &str) -> Option<String> {
        self.calls
            .values()
            .find(|c| c.owns_id(id))
            .map(|c| c.channel_id.clone())
    }

    #[instrument(skip(self, event))]
    async fn handle_event(&mut self, event: AriEvent) {
        match event {
            AriEvent::StasisStart { channel, .. } => self.handle_stasis_start(channel).await,
            AriEvent::StasisEnd { .. } => {}
            AriEvent::ChannelHangup { channel } => self.teardown_owner_of(&channel.id).await,
            AriEvent::ChannelLeftBridge { channel, .. } => {
                self.teardown_owner_of(&channel.id).await
            }
            AriEvent::Other => {}
        }
    }

    async fn teardown_owner_of(&mut self, id: &str) {
        if let Some(owner) = self.find_owner(id) {
            self.teardown_call(&owner).await;
        }
    }

    async fn handle_stasis_start(&mut self, channel: Channel) {
        let id = channel.id.clone();
        if self.calls.contains_key(&id) {
            self.continue_channel(&id).await;
            return;
        }
        match reconcile::parse_auxiliary_id(&id) {
            Some((AuxKind::Snoop, direction, call_id)) => {
                self.on_snoop_start(call_id.to_owned(), direction, id).await;
            }
            Some((AuxKind::ExtMedia, direction, call_id)) => {
                self.on_ext_media_start(call_id.to_owned(), direction, id)
                    .await;
            }
            None => self.on_call_start(channel).await,
        }
    }

    async fn continue_channel(&self, channel_id: &str) {
        if let Err(e) = self.ari.channel_continue(channel_id).await {
            debug!(error = %e, channel_id, "failed to continue channel");
        }
    }

    async fn on_call_start(&mut self, channel: Channel) {
        let channel_id = channel.id.clone();
        let mut call = Call::new(
            channel.id,
            channel.linkedid,
            channel.language,
            channel.caller,
            channel.connected,
        );
        call.transcription_requested = self.pending_transcription.remove(&call.channel_id)
            || self.pending_transcription.remove(&call.linkedid);
        call.state = CallState::TapsCreating;
        self.calls.insert(channel_id.clone(), call);

        if let Ok(Some(number)) = self
            .ari
            .get_channel_variable(&channel_id, "CALLERIDNUMINTERNAL")
            .await
        {
            if let Some(c) = self.calls.get_mut(&channel_id) {
                c.connected.number = number;
            }
        }
        if let Ok(Some(name)) = self
            .ari
            .get_channel_variable(&channel_id, "CALLERIDNAMEINTERNAL")
            .await
        {
            if let Some(c) = self.calls.get_mut(&channel_id) {
                c.connected.name = name;
            }
        }

        for direction in [Direction::In, Direction::Out] {
            let snoop_id = reconcile::snoop_id(&channel_id, direction);
            match self
                .ari
                .create_snoop(&channel_id, &snoop_id, &self.app, direction.as_str())
                .await
            {
                Ok(snoop) => {
                    if let Some(c) = self.calls.get_mut(&channel_id) {
                        c.tap_mut(direction).snoop_channel_id = Some(snoop.id);
                    }
                }
                Err(e) => {
                    warn!(error = %e, channel_id, %direction, "failed to create snoop channel");
                    self.teardown_call(&channel_id).await;
                    return;
                }
            }
        }
    }

    async fn on_snoop_start(&mut self, call_id: String, direction: Direction, snoop_channel_id: String) {
        if !self.calls.contains_key(&call_id) {
            warn!(call_id, "snoop channel for unknown call, deleting");
            self.ari.delete_channel(&snoop_channel_id).await.ok();
            return;
        }
        let ext_media_id = reconcile::ext_media_id(&call_id, direction);
        match self
            .ari
            .create_external_media(&ext_media_id, &self.app, &self.external_host, "slin16")
            .await
        {
            Ok(em) => match em.channelvars.unicastrtp_local_port.parse::<u16>() {
                Ok(port) => {
                    if let Some(c) = self.calls.get_mut(&call_id) {
                        let tap = c.tap_mut(direction);
                        tap.external_media_channel_id = Some(em.id);
                        tap.rtp_port = Some(port);
                    }
                }
                Err(_) => {
                    warn!(call_id, port = em.channelvars.unicastrtp_local_port, "unparseable RTP source port");
                    self.teardown_call(&call_id).await;
                }
            },
            Err(e) => {
                warn!(error = %e, call_id, %direction, "failed to create external media channel");
                self.teardown_call(&call_id).await;
            }
        }
    }

    async fn on_ext_media_start(
        &mut self,
        call_id: String,
        direction: Direction,
        external_media_channel_id: String,
    ) {
        let Some(snoop_channel_id) = self
            .calls
            .get(&call_id)
            .and_then(|c| c.tap(direction).snoop_channel_id.clone())
        else {
            warn!(call_id, "external-media channel for call with no snoop tap");
            return;
        };
        let bridge_id = reconcile::bridge_id(&call_id, direction);
        match self.ari.create_bridge(&bridge_id).await {
            Ok(bridge) => {
                if let Err(e) = self.ari.add_channel_to_bridge(&bridge.id, &snoop_channel_id).await {
                    warn!(error = %e, bridge_id = bridge.id, "failed to add snoop channel to bridge");
                }
                if let Err(e) = self
                    .ari
                    .add_channel_to_bridge(&bridge.id, &external_media_channel_id)
                    .await
                {
                    warn!(error = %e, bridge_id = bridge.id, "failed to add external-media channel to bridge");
                }
                if let Some(c) = self.calls.get_mut(&call_id) {
                    c.tap_mut(direction).bridge_id = Some(bridge.id);
                }
            }
            Err(e) => {
                warn!(error = %e, call_id, %direction, "failed to create mixing bridge");
                self.teardown_call(&call_id).await;
                return;
            }
        }

        let both_ready = self
            .calls
            .get(&call_id)
            .is_some_and(|c| c.tap_in.bridge_id.is_some() && c.tap_out.bridge_id.is_some());
        if both_ready {
            self.on_both_bridges_ready(call_id).await;
        }
    }

    async fn on_both_bridges_ready(&mut self, call_id: String) {
        let Some((port_in, port_out)) = self
            .calls
            .get(&call_id)
            .map(|c| (c.tap_in.rtp_port, c.tap_out.rtp_port))
        else {
            return;
        };
        let (Some(port_in), Some(port_out)) = (port_in, port_out) else {
            warn!(call_id, "both bridges ready but an RTP source port is missing");
            return;
        };

        self.rtp.create_stream(port_in).await;
        self.rtp.create_stream(port_out).await;
        tokio::time::sleep(BRIDGE_SETTLE_DELAY).await;

        // Critical correctness step: the PBX may have reported the two
        // external-media local ports in reversed order. Detect this from
        // the "in" stream's actual bound remote port and swap speaker
        // labeling accordingly, never the streams themselves.
        let swapped = self
            .rtp
            .remote_port(port_in)
            .await
            .is_some_and(|observed| reconcile::ports_need_swap(observed, port_out));

        if let Some(c) = self.calls.get_mut(&call_id) {
            c.tap_mut(Direction::In).bound = true;
            c.tap_mut(Direction::Out).bound = true;
            c.identity_swapped = swapped;
            c.state = CallState::AudioReady;
        }

        self.maybe_start_connector(&call_id).await;
        self.continue_channel(&call_id).await;
        if let Some(c) = self.calls.get_mut(&call_id) {
            c.state = CallState::Live;
        }
    }

    async fn fetch_answered_elapsed(&self, channel_id: &str) -> Option<f64> {
        for variable in ["CHANNEL(answeredtime)", "ANSWEREDTIME"] {
            if let Ok(Some(value)) = self.ari.get_channel_variable(channel_id, variable).await {
                if let Ok(elapsed) = value.parse::<f64>() {
                    if elapsed >= 0.0 {
                        return Some(elapsed);
                    }
                }
            }
        }
        None
    }

    async fn maybe_start_connector(&mut self, call_id: &str) {
        let Some(call) = self.calls.get(call_id) else {
            return;
        };
        if !call.transcription_requested || call.connector_started {
            return;
        }
        if !call.both_taps_ready() {
            return;
        }
        let Some(port_in) = call.tap_in.rtp_port else {
            return;
        };
        let Some(port_out) = call.tap_out.rtp_port else {
            return;
        };

        let params = ConnectorParams {
            uniqueid: call.linkedid.clone(),
            language: call.language.clone(),
            port_in,
            port_out,
            speaker_in: SpeakerIdentity {
                name: call.speaker_in().name.clone(),
                number: call.speaker_in().number.clone(),
            },
            speaker_out: SpeakerIdentity {
                name: call.speaker_out().name.clone(),
                number: call.speaker_out().number.clone(),
            },
            call_elapsed_at_start: call.call_elapsed_at_start,
        };

        if let Some(c) = self.calls.get_mut(call_id) {
            c.connector_started = true;
        }

        let stt_config = self.stt_config.clone();
        let bus = self.bus.clone();
        let rtp = self.rtp.clone();
        let api = self.self_api.clone();
        let call_id = call_id.to_owned();
        tokio::spawn(async move {
            match stt::start(&stt_config, bus, rtp, params).await {
                Ok(conn) => api.connector_ready(call_id, conn).await,
                Err(e) => {
                    warn!(error = %e, call_id, "failed to start realtime connector");
                    api.connector_failed(call_id).await;
                }
            }
        });
    }

    async fn handle_connector_ready(&mut self, call_id: String, conn: SttConnectorApi) {
        match self.calls.get_mut(&call_id) {
            Some(c) if c.transcription_requested => {
                c.stt = Some(conn);
                info!(call_id, "realtime connector started");
            }
            _ => {
                // Call was torn down or transcription was cancelled while
                // the connector was still connecting.
                conn.close().await;
            }
        }
    }

    async fn handle_connector_failed(&mut self, call_id: String) {
        if let Some(c) = self.calls.get_mut(&call_id) {
            c.connector_started = false;
        }
    }

    async fn handle_start_transcription(&mut self, call_id: String) {
        let Some(channel_id) = self.resolve_channel_id(&call_id) else {
            self.pending_transcription.insert(call_id);
            return;
        };
        if let Some(c) = self.calls.get_mut(&channel_id) {
            c.transcription_requested = true;
        }
        let elapsed = self.fetch_answered_elapsed(&channel_id).await;
        if let Some(c) = self.calls.get_mut(&channel_id) {
            c.call_elapsed_at_start = elapsed;
        }
        self.maybe_start_connector(&channel_id).await;
    }

    async fn handle_stop_transcription(&mut self, call_id: String) {
        self.pending_transcription.remove(&call_id);
        let Some(channel_id) = self.resolve_channel_id(&call_id) else {
            return;
        };
        if let Some(c) = self.calls.get_mut(&channel_id) {
            c.transcription_requested = false;
            c.connector_started = false;
            if let Some(conn) = c.stt.take() {
                tokio::spawn(async move { conn.close().await });
            }
        }
    }

    async fn teardown_call(&mut self, channel_id: &str) {
        let Some(mut call) = self.calls.remove(channel_id) else {
            return;
        };
        if let Some(conn) = call.stt.take() {
            conn.close().await;
        }
        for direction in [Direction::In, Direction::Out] {
            if let Some(bridge_id) = call.tap(direction).bridge_id.clone() {
                if let Err(e) = self.ari.delete_bridge(&bridge_id).await {
                    debug!(error = %e, bridge_id, "failed to delete bridge during teardown");
                }
            }
        }
        for direction in [Direction::In, Direction::Out] {
            if let Some(id) = call.tap(direction).external_media_channel_id.clone() {
                if let Err(e) = self.ari.delete_channel(&id).await {
                    debug!(error = %e, channel_id = id, "failed to delete external-media channel");
                }
            }
        }
        for direction in [Direction::In, Direction::Out] {
            if let Some(id) = call.tap(direction).snoop_channel_id.clone() {
                if let Err(e) = self.ari.delete_channel(&id).await {
                    debug!(error = %e, channel_id = id, "failed to delete snoop channel");
                }
            }
        }
        for direction in [Direction::In, Direction::Out] {
            if let Some(port) = call.tap(direction).rtp_port {
                self.rtp.end_stream(port).await;
            }
        }
        self.pending_transcription.remove(&call.channel_id);
        self.pending_transcription.remove(&call.linkedid);
        info!(channel_id, "call torn down");
    }

    async fn teardown_all(&mut self) {
        let ids: Vec<String> = self.calls.keys().cloned().collect();
        for id in ids {
            self.teardown_call(&id).await;
        }
    }
}

/// Spawns the orchestrator subsystem: it owns the Call/Tap registries
/// exclusively, draining both the ARI event stream and externally posted
/// [`OrchestratorMessage`]s from a single select loop.
#[allow(clippy::too_many_arguments)]
pub fn start(
    subsys: &SubsystemHandle,
    app: String,
    external_host: String,
    stt_config: SttConfig,
    ari: AriClient,
    rtp: RtpServerApi,
    bus: BusApi,
    mut ari_events_rx: mpsc::Receiver<AriEvent>,
) -> OrchestratorApi {
    let (tx, mut rx) = mpsc::channel(256);
    let api = OrchestratorApi { tx };

    let mut actor = Orchestrator {
        calls: HashMap::new(),
        pending_transcription: HashSet::new(),
        ari,
        rtp,
        bus,
        stt_config,
        app,
        external_host,
        self_api: api.clone(),
    };

    subsys.start(tokio_graceful_shutdown::SubsystemBuilder::new(
        "call-orchestrator",
        async move |s: &mut SubsystemHandle| {
            let mut ari_events_open = true;
            loop {
                tokio::select! {
                    maybe_event = ari_events_rx.recv(), if ari_events_open => {
                        match maybe_event {
                            Some(event) => actor.handle_event(event).await,
                            None => ari_events_open = false,
                        }
                    }
                    Some(msg) = rx.recv() => {
                        match msg {
                            OrchestratorMessage::StartTranscription(id) => actor.handle_start_transcription(id).await,
                            OrchestratorMessage::StopTranscription(id) => actor.handle_stop_transcription(id).await,
                            OrchestratorMessage::ConnectorReady(id, conn) => actor.handle_connector_ready(id, conn).await,
                            OrchestratorMessage::ConnectorFailed(id) => actor.handle_connector_failed(id).await,
                        }
                    }
                    _ = s.on_shutdown_requested() => break,
                }
            }
            actor.teardown_all().await;
            Ok::<(), std::convert::Infallible>(())
        },
    ));

    api
}
