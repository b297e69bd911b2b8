use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use kibble_db::Database;

use crate::alert::{AddressLookup, Alerter, notify};
use crate::state::{ConnectionState, StateWriter};

/// Connection attempts before giving up for good.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Fixed pause between attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(180);

/// Opens a connection to the durable store.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Database>;
}

/// Opens the SQLite image store at a path.
pub struct SqliteConnector {
    path: PathBuf,
}

impl SqliteConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StoreConnector for SqliteConnector {
    async fn connect(&self) -> Result<Database> {
        let path = self.path.clone();
        let db = tokio::task::spawn_blocking(move || Database::open(&path)).await??;

        let stored = db.count()?;
        info!("Image store holds {} approved images", stored);
        Ok(db)
    }
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error(
        "could not connect to the store after {attempts} attempts (last public address: {address})",
        address = .last_address.as_deref().unwrap_or("unknown")
    )]
    Exhausted {
        attempts: u32,
        last_address: Option<String>,
    },
}

/// Owns the store connection lifecycle: sequential attempts with a fixed
/// delay, an operator alert per failure, and a single success notice.
pub struct Supervisor {
    connector: Arc<dyn StoreConnector>,
    alerter: Arc<dyn Alerter>,
    lookup: Arc<dyn AddressLookup>,
    writer: StateWriter,
    max_attempts: u32,
    retry_delay: Duration,
}

impl Supervisor {
    pub fn new(
        connector: Arc<dyn StoreConnector>,
        alerter: Arc<dyn Alerter>,
        lookup: Arc<dyn AddressLookup>,
        writer: StateWriter,
    ) -> Self {
        Self {
            connector,
            alerter,
            lookup,
            writer,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    #[must_use]
    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Connect, retrying until the budget runs out. On exhaustion the state
    /// is left at [`ConnectionState::Exhausted`] and the caller is expected
    /// to terminate the process.
    pub async fn supervise(self) -> Result<(), SupervisorError> {
        let mut remaining = self.max_attempts;
        let retry_minutes = format_minutes(self.retry_delay);
        let mut last_address: Option<String> = None;

        loop {
            let attempt = self.max_attempts - remaining + 1;
            self.writer.set(ConnectionState::Connecting { attempt });

            match self.connector.connect().await {
                Ok(db) => {
                    info!("Connected to the image store");
                    self.writer.set(ConnectionState::Ready(Arc::new(db)));
                    notify(&*self.alerter, "✅ Successfully connected to the image store.").await;
                    return Ok(());
                }
                Err(e) => {
                    remaining -= 1;
                    let attempt = self.max_attempts - remaining;

                    warn!(
                        "Store connection failed: {:#}. Retrying in {}min... (Attempt {}/{})",
                        e, retry_minutes, attempt, self.max_attempts
                    );

                    match self.lookup.public_address().await {
                        Ok(address) => {
                            if last_address.as_deref() != Some(address.as_str()) {
                                info!("Current public address: {}", address);
                            }
                            last_address = Some(address);
                        }
                        Err(e) => warn!("Public address lookup failed: {:#}", e),
                    }
                    // Falls back to the last address we saw
                    let address = last_address.as_deref().unwrap_or("unknown");

                    notify(
                        &*self.alerter,
                        &failure_alert(attempt, self.max_attempts, address, &retry_minutes),
                    )
                    .await;

                    if remaining == 0 {
                        error!("Could not connect after final retry");
                        self.writer.set(ConnectionState::Exhausted);
                        return Err(SupervisorError::Exhausted {
                            attempts: self.max_attempts,
                            last_address,
                        });
                    }

                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }
}

fn failure_alert(attempt: u32, max_attempts: u32, address: &str, retry_minutes: &str) -> String {
    format!(
        "🚨 Store connection attempt **{attempt}/{max_attempts}** failed.\n\
         IP `{address}` may not be allow-listed.\n\
         Retrying in {retry_minutes}min..."
    )
}

/// Whole minutes print bare, anything else with one decimal.
fn format_minutes(delay: Duration) -> String {
    let secs = delay.as_secs();
    if secs % 60 == 0 && delay.subsec_nanos() == 0 {
        (secs / 60).to_string()
    } else {
        format!("{:.1}", delay.as_secs_f64() / 60.0)
    }
}
