use async_trait::async_trait;
use tokio::sync::broadcast;

use kibble_types::{Channel, ChannelId, GuildId, Member, MessageRef, PlatformEvent, UserId};

use crate::error::PlatformError;

/// Guild-level capabilities the bot checks before mutating anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    ManageChannels,
}

impl Permission {
    pub const ADMINISTRATOR: u64 = 1 << 3;

    pub fn bits(self) -> u64 {
        match self {
            Self::ManageChannels => 1 << 4,
        }
    }

    /// Whether a computed permission set grants this capability.
    /// Administrators implicitly hold everything.
    pub fn granted_by(self, permissions: u64) -> bool {
        permissions & Self::ADMINISTRATOR != 0 || permissions & self.bits() == self.bits()
    }
}

/// Everything the bot needs from the chat platform.
///
/// Object-safe so the bot can hold an `Arc<dyn ChatPlatform>` and tests can
/// swap in an in-memory platform.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Our own user id, once the session is ready.
    async fn bot_user_id(&self) -> Option<UserId>;

    /// Subscribe to inbound events. Events published before the call are not replayed.
    fn subscribe(&self) -> broadcast::Receiver<PlatformEvent>;

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<MessageRef, PlatformError>;

    async fn reply(&self, to: MessageRef, content: &str) -> Result<MessageRef, PlatformError>;

    async fn edit_message(&self, message: MessageRef, content: &str) -> Result<(), PlatformError>;

    async fn add_reaction(&self, message: MessageRef, emoji: &str) -> Result<(), PlatformError>;

    async fn has_permission(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        permission: Permission,
    ) -> Result<bool, PlatformError>;

    /// The voice channel a member currently sits in.
    async fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId>;

    /// Everyone currently connected to a voice channel, bots included.
    async fn voice_members(&self, channel_id: ChannelId) -> Vec<Member>;

    /// `Ok(None)` when the platform reports the channel no longer exists.
    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>, PlatformError>;

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        parent_id: Option<ChannelId>,
        reason: &str,
    ) -> Result<Channel, PlatformError>;

    async fn delete_channel(&self, channel_id: ChannelId, reason: &str) -> Result<(), PlatformError>;

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError>;
}
