//! Client side of the out-of-process enrichment pipeline: spawns the
//! `bridge-enrichment-worker` binary per transcript and speaks a single
//! JSON request/response pair over its stdio.
//!
//! Grounded on the teacher's `tokio::process::Command` spawn of `xdg-open`
//! in `aes67-rs-vsc-management-agent::run_rest_api`, generalized to a
//! piped-stdio JSON worker per `SPEC_FULL.md`'s C7 implementation shape.

use crate::error::{EnrichmentError, EnrichmentResult};
use serde::{Deserialize, Serialize};
use std::{path::PathBuf, time::Duration};
use tokio::{
    io::{AsyncWriteExt, AsyncReadExt},
    process::Command,
    time::timeout,
};
use tracing::{info, instrument, warn};

const WORKER_BIN_NAME: &str = "bridge-enrichment-worker";

#[derive(Serialize)]
struct WorkerRequest<'a> {
    transcript_id: i64,
    raw_transcription: &'a str,
    summary: bool,
}

#[derive(Deserialize)]
struct WorkerResponse {
    ok: bool,
    sentiment: Option<i32>,
}

/// Result of a completed enrichment run: whether to mark the transcript
/// `done` or `failed`, and the sentiment score if one was produced.
#[derive(Debug, Clone, Copy)]
pub struct EnrichmentOutcome {
    pub ok: bool,
    pub sentiment: Option<i32>,
}

#[derive(Clone)]
pub struct EnrichmentApi {
    worker_path: PathBuf,
    timeout: Duration,
}

impl EnrichmentApi {
    pub fn new(timeout: Duration) -> EnrichmentApi {
        EnrichmentApi {
            worker_path: locate_worker_binary(),
            timeout,
        }
    }

    /// Spawns the worker, writes the request, and waits up to the
    /// configured timeout for it to exit. The worker persists the cleaned
    /// transcript and summary itself; the caller only needs the resulting
    /// state transition and, for the message bus, the sentiment score.
    #[instrument(skip(self, raw_transcription), fields(transcript_id))]
    pub async fn enrich(
        &self,
        transcript_id: i64,
        raw_transcription: &str,
        summary: bool,
    ) -> EnrichmentResult<EnrichmentOutcome> {
        let request = WorkerRequest {
            transcript_id,
            raw_transcription,
            summary,
        };
        let payload = serde_json::to_vec(&request)?;

        let mut child = Command::new(&self.worker_path)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let mut stdin = child.stdin.take().expect("piped stdin");
        stdin.write_all(&payload).await?;
        drop(stdin);

        let run = async {
            let status = child.wait().await?;
            let mut stdout_buf = Vec::new();
            if let Some(mut stdout) = child.stdout.take() {
                stdout.read_to_end(&mut stdout_buf).await?;
            }
            let mut stderr_buf = String::new();
            if let Some(mut stderr) = child.stderr.take() {
                stderr.read_to_string(&mut stderr_buf).await?;
            }
            Ok::<_, std::io::Error>((status, stdout_buf, stderr_buf))
        };

        let (status, stdout_buf, stderr_buf) = match timeout(self.timeout, run).await {
            Ok(res) => res?,
            Err(_) => {
                warn!(transcript_id, "enrichment worker timed out, killing");
                return Err(EnrichmentError::Timeout);
            }
        };

        if !stderr_buf.trim().is_empty() {
            info!(transcript_id, worker_log = %stderr_buf.trim(), "enrichment worker stderr");
        }

        if !status.success() {
            return Err(EnrichmentError::NonZeroExit(status.code().unwrap_or(-1)));
        }

        let response: WorkerResponse = serde_json::from_slice(&stdout_buf)?;
        Ok(EnrichmentOutcome {
            ok: response.ok,
            sentiment: response.sentiment,
        })
    }
}

/// The worker binary is built as a workspace sibling, so it lands next to
/// this binary in the same `target/{debug,release}` directory; falls back
/// to PATH lookup (and an explicit override) for non-Cargo deployments.
fn locate_worker_binary() -> PathBuf {
    if let Ok(path) = std::env::var("ENRICHMENT_WORKER_PATH") {
        return PathBuf::from(path);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join(WORKER_BIN_NAME);
            if sibling.is_file() {
                return sibling;
            }
        }
    }
    PathBuf::from(WORKER_BIN_NAME)
}
