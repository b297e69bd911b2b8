//! The kibble bot: image approval, store connection supervision and PUG
//! team splits with idle channel reclamation.

pub mod alert;
pub mod approval;
pub mod router;
pub mod state;
pub mod supervisor;
pub mod teams;
pub mod tracker;

#[cfg(test)]
mod testing;

pub use alert::{ALERT_CHANNEL_ID, DiscordAlerter, IpifyLookup};
pub use approval::{ApprovalPipeline, OutagePolicy, ReviewState};
pub use router::Bot;
pub use state::{ConnectionState, StoreHandle, connection_state};
pub use supervisor::{SqliteConnector, Supervisor, SupervisorError};
pub use teams::TeamManager;
pub use tracker::run_sweep_loop;
