//! ARI call bridge, RTP media ingest and realtime/batch speech
//! transcription service.
//!
//! Module map: [`ari`] drives the PBX control plane, [`rtp`] demultiplexes
//! inbound media, [`stt`] bridges RTP to a realtime transcription provider,
//! [`orchestrator`] is the single actor that owns per-call state and wires
//! the above together, [`bus`] publishes outward over MQTT, [`persistence`]
//! and [`enrichment`] back the batch/post-call pipeline that [`http`]
//! exposes.

pub mod ari;
pub mod bus;
pub mod config;
pub mod enrichment;
pub mod error;
pub mod http;
pub mod orchestrator;
pub mod persistence;
pub mod rtp;
pub mod stt;
pub mod telemetry;
pub mod text_split;
