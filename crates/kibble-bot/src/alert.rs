use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;
use tracing::{info, warn};

use kibble_gateway::RestClient;
use kibble_types::{Channel, ChannelId};

/// Operator channel that receives store connection diagnostics.
pub const ALERT_CHANNEL_ID: ChannelId = ChannelId(883_631_359_699_087_380);

const IPIFY_URL: &str = "https://api.ipify.org";

/// Out-of-band operator notifications.
#[async_trait]
pub trait Alerter: Send + Sync {
    async fn send(&self, text: &str) -> Result<()>;
}

/// Resolves the address the outside world sees us connect from.
#[async_trait]
pub trait AddressLookup: Send + Sync {
    async fn public_address(&self) -> Result<String>;
}

/// Deliver an alert, never failing the caller. Returns whether it went out.
pub async fn notify(alerter: &dyn Alerter, text: &str) -> bool {
    match alerter.send(text).await {
        Ok(()) => {
            info!("Operator alert sent");
            true
        }
        Err(e) => {
            warn!("Failed to send operator alert: {:#}", e);
            false
        }
    }
}

/// Posts alerts through a short-lived REST session of its own, separate
/// from the main bot session.
pub struct DiscordAlerter {
    token: String,
    channel_id: ChannelId,
}

impl std::fmt::Debug for DiscordAlerter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordAlerter")
            .field("token", &"[REDACTED]")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

impl DiscordAlerter {
    pub fn new(token: impl Into<String>, channel_id: ChannelId) -> Self {
        Self {
            token: token.into(),
            channel_id,
        }
    }
}

#[async_trait]
impl Alerter for DiscordAlerter {
    async fn send(&self, text: &str) -> Result<()> {
        // Fresh session per alert; dropped when we return.
        let session = RestClient::new(&self.token)?;

        let channel = session.get_channel(self.channel_id).await?;
        ensure_postable(&channel)?;

        session.create_message(self.channel_id, text, None).await?;
        Ok(())
    }
}

fn ensure_postable(channel: &Channel) -> Result<()> {
    if !channel.kind.is_text_based() {
        bail!("alert channel {} cannot take messages", channel.id);
    }
    Ok(())
}

/// Public address lookup against ipify.
pub struct IpifyLookup {
    client: reqwest::Client,
    url: String,
}

impl IpifyLookup {
    pub fn new() -> Result<Self> {
        Self::with_url(IPIFY_URL)
    }

    pub fn with_url(url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl AddressLookup for IpifyLookup {
    async fn public_address(&self) -> Result<String> {
        let address = self
            .client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        Ok(address.trim().to_string())
    }
}
