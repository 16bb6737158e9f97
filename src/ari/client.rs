use crate::{
    ari::events::{Bridge, Channel, ExternalMediaChannel},
    config::AriConfig,
    error::{AriError, AriResult},
};
use std::time::Duration;
use tracing::instrument;

/// Thin REST wrapper over the ARI HTTP control plane. Every call uses HTTP
/// Basic auth and a 10s connect timeout; failures are returned, never
/// panicked on — the orchestrator decides whether a failure tears down a
/// Call or is merely logged.
#[derive(Clone)]
pub struct AriClient {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
}

impl AriClient {
    pub fn new(config: &AriConfig) -> AriResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(AriError::Request)?;
        Ok(Self {
            http,
            base_url: config.asterisk_url.trim_end_matches('/').to_owned(),
            username: config.username.clone(),
            password: config.password.expose().to_owned(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/ari{path}", self.base_url)
    }

    async fn check(resp: reqwest::Response) -> AriResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(AriError::Status { status, body })
    }

    #[instrument(skip(self))]
    pub async fn create_snoop(
        &self,
        channel_id: &str,
        snoop_id: &str,
        app: &str,
        direction: &str,
    ) -> AriResult<Channel> {
        let spy = match direction {
            "in" => "in",
            _ => "out",
        };
        let resp = self
            .http
            .post(self.url(&format!("/channels/{channel_id}/snoop")))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[
                ("spy", spy),
                ("app", app),
                ("subscribeAll", "yes"),
                ("snoopId", snoop_id),
            ])
            .send()
            .await
            .map_err(AriError::Request)?;
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(AriError::Request)
    }

    #[instrument(skip(self))]
    pub async fn create_external_media(
        &self,
        channel_id: &str,
        app: &str,
        external_host: &str,
        format: &str,
    ) -> AriResult<ExternalMediaChannel> {
        let resp = self
            .http
            .post(self.url("/channels/externalMedia"))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[
                ("app", app),
                ("channelId", channel_id),
                ("external_host", external_host),
                ("format", format),
                ("encapsulation", "rtp"),
                ("transport", "udp"),
                ("connection_type", "client"),
            ])
            .send()
            .await
            .map_err(AriError::Request)?;
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(AriError::Request)
    }

    #[instrument(skip(self))]
    pub async fn create_bridge(&self, bridge_id: &str) -> AriResult<Bridge> {
        let resp = self
            .http
            .post(self.url("/bridges"))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("type", "mixing"), ("bridgeId", bridge_id)])
            .send()
            .await
            .map_err(AriError::Request)?;
        let resp = Self::check(resp).await?;
        resp.json().await.map_err(AriError::Request)
    }

    #[instrument(skip(self))]
    pub async fn add_channel_to_bridge(&self, bridge_id: &str, channel_id: &str) -> AriResult<()> {
        let resp = self
            .http
            .post(self.url(&format!("/bridges/{bridge_id}/addChannel")))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("channel", channel_id)])
            .send()
            .await
            .map_err(AriError::Request)?;
        Self::check(resp).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn delete_bridge(&self, bridge_id: &str) -> AriResult<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/bridges/{bridge_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(AriError::Request)?;
        Self::check(resp).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn delete_channel(&self, channel_id: &str) -> AriResult<()> {
        let resp = self
            .http
            .delete(self.url(&format!("/channels/{channel_id}")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(AriError::Request)?;
        Self::check(resp).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn channel_continue(&self, channel_id: &str) -> AriResult<()> {
        let resp = self
            .http
            .post(self.url(&format!("/channels/{channel_id}/continue")))
            .basic_auth(&self.username, Some(&self.password))
            .send()
            .await
            .map_err(AriError::Request)?;
        Self::check(resp).await.map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn get_channel_variable(
        &self,
        channel_id: &str,
        variable: &str,
    ) -> AriResult<Option<String>> {
        let resp = self
            .http
            .get(self.url(&format!("/channels/{channel_id}/variable")))
            .basic_auth(&self.username, Some(&self.password))
            .query(&[("variable", variable)])
            .send()
            .await
            .map_err(AriError::Request)?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = Self::check(resp).await?;
        #[derive(serde::Deserialize)]
        struct VarResult {
            value: String,
        }
        let v: VarResult = resp.json().await.map_err(AriError::Request)?;
        Ok(Some(v.value))
    }
}
