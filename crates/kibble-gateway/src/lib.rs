//! Chat platform plumbing for kibble.
//!
//! - [`ChatPlatform`]: the seam the bot talks through
//! - [`RestClient`]: outbound Discord REST calls
//! - [`connection::run_gateway`]: the inbound websocket session
//! - [`Dispatcher`]: event fan-out plus cached session and voice state

pub mod connection;
pub mod discord;
pub mod dispatcher;
pub mod error;
pub mod platform;
pub mod protocol;
pub mod rest;

pub use discord::DiscordPlatform;
pub use dispatcher::Dispatcher;
pub use error::PlatformError;
pub use platform::{ChatPlatform, Permission};
pub use rest::RestClient;
