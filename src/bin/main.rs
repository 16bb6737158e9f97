//! Process entry point: loads configuration, initializes tracing, and runs
//! every subsystem under one `tokio_graceful_shutdown::Toplevel` on a
//! single current-thread runtime, matching the teacher's `aes67-jack-vsc`
//! binary shape.

use callbridge::{
    ari, bus,
    config::Config,
    enrichment::EnrichmentApi,
    error::{AppResult, ToBoxedResult},
    http, orchestrator, persistence::PersistenceApi, rtp, telemetry,
};
use miette::IntoDiagnostic;
use std::time::Duration;
use tokio::{runtime, sync::mpsc};
use tokio_graceful_shutdown::{SubsystemBuilder, SubsystemHandle, Toplevel};

fn main() -> miette::Result<()> {
    let config = Config::load().into_diagnostic()?;

    runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .into_diagnostic()?
        .block_on(async_main(config))
}

async fn async_main(config: Config) -> miette::Result<()> {
    telemetry::init(&config);

    Toplevel::new(move |s| async move {
        s.start(SubsystemBuilder::new("callbridge", move |s| run(s, config)));
    })
    .catch_signals()
    .handle_shutdown_requests(Duration::from_secs(1))
    .await
    .into_diagnostic()?;

    Ok(())
}

/// Wires every subsystem in dependency order (ARI, then RTP, then the bus,
/// per §5), then the orchestrator that ties them together, then the
/// persistence-backed batch HTTP API. Each `*::start` call spawns its own
/// child subsystem and returns immediately; this function itself only
/// blocks waiting for shutdown.
async fn run(subsys: SubsystemHandle, config: Config) -> AppResult<()> {
    let (ari_events_tx, ari_events_rx) = mpsc::channel(256);
    let ari_client = ari::start(&subsys, config.ari.clone(), ari_events_tx)?;
    let rtp_api = rtp::start(&subsys, config.rtp.clone()).await.boxed()?;
    let bus_api = bus::start(&subsys, config.bus.clone());

    let external_host = format!("{}:{}", config.rtp.host, config.rtp.port);
    let _orchestrator_api = orchestrator::start(
        &subsys,
        config.ari.app.clone(),
        external_host,
        config.stt.clone(),
        ari_client,
        rtp_api,
        bus_api,
        ari_events_rx,
    );

    let persistence = PersistenceApi::new(&config.persistence);
    let enrichment = EnrichmentApi::new(Duration::from_secs(config.stt.call_processor_timeout_seconds));
    http::start(&subsys, config.api.clone(), config.stt.clone(), persistence, enrichment)
        .await
        .boxed()?;

    subsys.on_shutdown_requested().await;
    Ok(())
}
