use crate::error::{ConfigError, ConfigResult};
use clap::Parser;
use std::{fmt, net::IpAddr, time::Duration};
use tracing::instrument;

/// Top-level process configuration, assembled entirely from CLI args /
/// environment variables (no config-file layer).
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub ari: AriConfig,
    #[command(flatten)]
    pub rtp: RtpConfig,
    #[command(flatten)]
    pub bus: BusConfig,
    #[command(flatten)]
    pub persistence: PersistenceConfig,
    #[command(flatten)]
    pub stt: SttConfig,
    #[command(flatten)]
    pub api: ApiConfig,

    /// Minimum log level when RUST_LOG is unset.
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

#[derive(Parser, Debug, Clone)]
pub struct AriConfig {
    #[arg(long, env = "ASTERISK_URL")]
    pub asterisk_url: String,
    #[arg(long, env = "ARI_APP")]
    pub app: String,
    #[arg(long, env = "ARI_USERNAME")]
    pub username: String,
    #[arg(long, env = "ARI_PASSWORD")]
    pub password: Secret,
}

impl AriConfig {
    pub fn websocket_url(&self) -> ConfigResult<String> {
        let ws_base = if let Some(rest) = self.asterisk_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.asterisk_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(ConfigError::InvalidValue {
                name: "ASTERISK_URL",
                value: self.asterisk_url.clone(),
            });
        };
        Ok(format!(
            "{ws_base}/ari/events?app={app}&api_key={user}:{pass}&subscribeAll=true",
            app = self.app,
            user = self.username,
            pass = self.password.expose(),
        ))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct RtpConfig {
    #[arg(long, env = "RTP_HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,
    #[arg(long, env = "RTP_PORT", default_value_t = 40000)]
    pub port: u16,
    #[arg(long, env = "RTP_SWAP16", default_value_t = true)]
    pub swap16: bool,
    #[arg(long, env = "RTP_HEADER_SIZE", default_value_t = 12)]
    pub header_size: usize,
    /// Cap in bytes for each stream's ring buffer (~1.6s of 16kHz/16-bit audio).
    #[arg(long, default_value_t = 51_200)]
    pub ring_buffer_cap: usize,
}

#[derive(Parser, Debug, Clone)]
pub struct BusConfig {
    #[arg(long, env = "MQTT_URL")]
    pub url: String,
    #[arg(long, env = "MQTT_TOPIC_PREFIX", default_value = "")]
    pub topic_prefix: String,
    #[arg(long, env = "MQTT_USERNAME")]
    pub username: Option<String>,
    #[arg(long, env = "MQTT_PASSWORD")]
    pub password: Option<Secret>,
    #[arg(skip = Duration::from_secs(5))]
    pub reconnect_delay: Duration,
}

#[derive(Parser, Debug, Clone)]
pub struct PersistenceConfig {
    #[arg(long, env = "PGVECTOR_HOST")]
    pub host: Option<String>,
    #[arg(long, env = "PGVECTOR_PORT")]
    pub port: Option<u16>,
    #[arg(long, env = "PGVECTOR_USER")]
    pub user: Option<String>,
    #[arg(long, env = "PGVECTOR_PASSWORD")]
    pub password: Option<Secret>,
    #[arg(long, env = "PGVECTOR_DATABASE")]
    pub database: Option<String>,
    #[arg(long, env = "OPENAI_API_KEY")]
    pub openai_api_key: Option<Secret>,
    #[arg(long, env = "EMBEDDING_MODEL", default_value = "text-embedding-3-small")]
    pub embedding_model: String,
}

impl PersistenceConfig {
    pub fn is_configured(&self) -> bool {
        self.host.is_some()
            && self.port.is_some()
            && self.user.is_some()
            && self.password.is_some()
            && self.database.is_some()
    }

    pub fn connection_string(&self) -> Option<String> {
        Some(format!(
            "postgres://{user}:{password}@{host}:{port}/{database}",
            user = self.user.as_ref()?,
            password = self.password.as_ref()?.expose(),
            host = self.host.as_ref()?,
            port = self.port?,
            database = self.database.as_ref()?,
        ))
    }
}

#[derive(Parser, Debug, Clone)]
pub struct SttConfig {
    #[arg(long, env = "DEEPGRAM_API_KEY")]
    pub deepgram_api_key: Option<Secret>,
    #[arg(long, env = "DEEPGRAM_TIMEOUT_SECONDS", default_value_t = 300)]
    pub timeout_seconds: u64,
    #[arg(long, env = "CALL_PROCESSOR_TIMEOUT_SECONDS", default_value_t = 600)]
    pub call_processor_timeout_seconds: u64,
}

#[derive(Parser, Debug, Clone)]
pub struct ApiConfig {
    #[arg(long, env = "API_TOKEN")]
    pub api_token: Option<Secret>,
    #[arg(long, env = "API_BIND_ADDRESS", default_value = "0.0.0.0")]
    pub bind_address: IpAddr,
    #[arg(long, env = "API_PORT", default_value_t = 8080)]
    pub port: u16,
}

impl Config {
    #[instrument(skip_all)]
    pub fn load() -> ConfigResult<Config> {
        let config = Config::try_parse().map_err(ConfigError::Clap)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> ConfigResult<()> {
        if self.stt.deepgram_api_key.is_none() {
            return Err(ConfigError::MissingVar("DEEPGRAM_API_KEY"));
        }
        self.ari.websocket_url().map(|_| ())
    }
}

/// A string that never prints its contents via `Debug`/`Display`.
#[derive(Clone)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::str::FromStr for Secret {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Secret(s.to_owned()))
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("***")
    }
}
