//! Shared types for kibble: platform ids, the models the bot reads off the
//! chat platform, and the inbound events it reacts to.

pub mod events;
pub mod ids;
pub mod models;

pub use events::PlatformEvent;
pub use ids::{ChannelId, GuildId, MessageId, RoleId, UserId};
pub use models::{Attachment, Channel, ChannelKind, Member, Message, MessageRef, Reaction, User};
