use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use kibble_gateway::{ChatPlatform, PlatformError};
use kibble_types::ChannelId;

use crate::teams::TeamManager;

/// A team channel is reclaimed after sitting empty this long.
pub const IDLE_THRESHOLD: Duration = Duration::from_secs(5 * 60);

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

pub const RECLAIM_REASON: &str = "PUG channel empty for 5+ minutes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrackedChannel {
    pub created_at: Instant,
    pub last_occupied: Instant,
}

/// Team channels under reclamation, keyed by channel id.
#[derive(Debug, Default)]
pub struct ChannelTracker {
    channels: Mutex<HashMap<ChannelId, TrackedChannel>>,
}

impl ChannelTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, channel_id: ChannelId, now: Instant) {
        self.channels.lock().await.insert(
            channel_id,
            TrackedChannel {
                created_at: now,
                last_occupied: now,
            },
        );
    }

    pub async fn untrack(&self, channel_id: ChannelId) -> bool {
        self.channels.lock().await.remove(&channel_id).is_some()
    }

    pub async fn get(&self, channel_id: ChannelId) -> Option<TrackedChannel> {
        self.channels.lock().await.get(&channel_id).copied()
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    async fn snapshot(&self) -> Vec<(ChannelId, TrackedChannel)> {
        self.channels
            .lock()
            .await
            .iter()
            .map(|(id, tracked)| (*id, *tracked))
            .collect()
    }

    async fn mark_occupied(&self, channel_id: ChannelId, now: Instant) {
        if let Some(tracked) = self.channels.lock().await.get_mut(&channel_id) {
            tracked.last_occupied = now;
        }
    }
}

/// Tally of one sweep pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub occupied: usize,
    pub deleted: usize,
    pub vanished: usize,
    pub failed: usize,
}

/// Check every tracked channel once. Occupied channels get their idle clock
/// reset, channels empty for at least `idle_threshold` are deleted, and
/// channels the platform no longer knows are forgotten.
pub async fn sweep(
    tracker: &ChannelTracker,
    platform: &dyn ChatPlatform,
    idle_threshold: Duration,
    now: Instant,
) -> SweepReport {
    let mut report = SweepReport::default();

    for (channel_id, tracked) in tracker.snapshot().await {
        report.checked += 1;

        let channel = match platform.fetch_channel(channel_id).await {
            Ok(Some(channel)) => channel,
            Ok(None) => {
                debug!(%channel_id, "Tracked channel is gone");
                tracker.untrack(channel_id).await;
                report.vanished += 1;
                continue;
            }
            Err(e) => {
                log_failure(channel_id, "fetch", &e);
                report.failed += 1;
                continue;
            }
        };

        // Bots count as occupants too.
        if !platform.voice_members(channel_id).await.is_empty() {
            tracker.mark_occupied(channel_id, now).await;
            report.occupied += 1;
            continue;
        }

        if now.saturating_duration_since(tracked.last_occupied) < idle_threshold {
            continue;
        }

        match platform.delete_channel(channel_id, RECLAIM_REASON).await {
            Ok(()) => {
                info!(%channel_id, name = %channel.name, "Deleted empty PUG channel");
                tracker.untrack(channel_id).await;
                report.deleted += 1;
            }
            Err(PlatformError::UnknownChannel) => {
                tracker.untrack(channel_id).await;
                report.vanished += 1;
            }
            Err(e) => {
                log_failure(channel_id, "delete", &e);
                report.failed += 1;
            }
        }
    }

    report
}

fn log_failure(channel_id: ChannelId, op: &str, e: &PlatformError) {
    if e.is_transient() {
        warn!(%channel_id, "Sweep could not {} channel: {}", op, e);
    } else {
        error!(%channel_id, "Sweep could not {} channel: {}", op, e);
    }
}

/// Background task that reclaims idle team channels.
pub async fn run_sweep_loop(manager: Arc<TeamManager>, period: Duration) {
    let mut interval = tokio::time::interval(period);

    loop {
        interval.tick().await;

        let report = manager.sweep(Instant::now()).await;
        if report.deleted > 0 || report.failed > 0 {
            info!(
                "Sweep: checked {}, deleted {}, failed {}",
                report.checked, report.deleted, report.failed
            );
        }
    }
}
