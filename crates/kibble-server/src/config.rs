use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};

use kibble_bot::OutagePolicy;
use kibble_types::ChannelId;

const DEFAULT_DB_PATH: &str = "kibble.db";
const DEFAULT_RETRY_DELAY_SECS: u64 = 180;
const DEFAULT_QUEUE_CAPACITY: usize = 32;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;

pub struct Config {
    pub discord_token: String,
    pub intake_channel: ChannelId,
    pub db_path: PathBuf,
    pub db_retry_delay: Duration,
    pub outage_policy: OutagePolicy,
    pub sweep_interval: Duration,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"[REDACTED]")
            .field("intake_channel", &self.intake_channel)
            .field("db_path", &self.db_path)
            .field("db_retry_delay", &self.db_retry_delay)
            .field("outage_policy", &self.outage_policy)
            .field("sweep_interval", &self.sweep_interval)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let discord_token = lookup("KIBBLE_DISCORD_TOKEN")
            .filter(|t| !t.trim().is_empty())
            .context("KIBBLE_DISCORD_TOKEN must be set")?;

        let intake_channel = lookup("KIBBLE_INTAKE_CHANNEL_ID")
            .context("KIBBLE_INTAKE_CHANNEL_ID must be set")?
            .parse::<ChannelId>()
            .context("KIBBLE_INTAKE_CHANNEL_ID is not a channel id")?;

        let db_path = lookup("KIBBLE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        let db_retry_delay = Duration::from_secs(parse_or(
            &lookup,
            "KIBBLE_DB_RETRY_DELAY_SECS",
            DEFAULT_RETRY_DELAY_SECS,
        )?);

        let capacity = parse_or(&lookup, "KIBBLE_OUTAGE_QUEUE_CAPACITY", DEFAULT_QUEUE_CAPACITY)?;
        let outage_policy = match lookup("KIBBLE_OUTAGE_POLICY")
            .unwrap_or_else(|| "drop".into())
            .trim()
            .to_lowercase()
            .as_str()
        {
            "drop" => OutagePolicy::Drop,
            "queue" => OutagePolicy::Queue { capacity },
            other => bail!("KIBBLE_OUTAGE_POLICY must be 'drop' or 'queue', got '{}'", other),
        };

        let sweep_secs = parse_or(&lookup, "KIBBLE_SWEEP_INTERVAL_SECS", DEFAULT_SWEEP_INTERVAL_SECS)?;
        if sweep_secs == 0 {
            bail!("KIBBLE_SWEEP_INTERVAL_SECS must be greater than zero");
        }

        Ok(Self {
            discord_token,
            intake_channel,
            db_path,
            db_retry_delay,
            outage_policy,
            sweep_interval: Duration::from_secs(sweep_secs),
        })
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("{key} has an invalid value '{raw}'")),
        None => Ok(default),
    }
}
