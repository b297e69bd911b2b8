use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::debug;

use kibble_types::{Channel, ChannelId, ChannelKind, GuildId, Member, MessageRef, PlatformEvent, UserId};

use crate::dispatcher::Dispatcher;
use crate::error::PlatformError;
use crate::platform::{ChatPlatform, Permission};
use crate::rest::RestClient;

/// The live Discord platform: REST calls for outbound actions, the gateway
/// dispatcher for inbound events and cached voice state.
#[derive(Clone)]
pub struct DiscordPlatform {
    rest: RestClient,
    dispatcher: Dispatcher,
}

impl DiscordPlatform {
    pub fn new(rest: RestClient, dispatcher: Dispatcher) -> Self {
        Self { rest, dispatcher }
    }
}

#[async_trait]
impl ChatPlatform for DiscordPlatform {
    async fn bot_user_id(&self) -> Option<UserId> {
        self.dispatcher.current_user_id().await
    }

    fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.dispatcher.subscribe()
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<MessageRef, PlatformError> {
        self.rest.create_message(channel_id, content, None).await
    }

    async fn reply(&self, to: MessageRef, content: &str) -> Result<MessageRef, PlatformError> {
        self.rest
            .create_message(to.channel_id, content, Some(to.message_id))
            .await
    }

    async fn edit_message(&self, message: MessageRef, content: &str) -> Result<(), PlatformError> {
        self.rest.edit_message(message, content).await
    }

    async fn add_reaction(&self, message: MessageRef, emoji: &str) -> Result<(), PlatformError> {
        self.rest.create_reaction(message, emoji).await
    }

    async fn has_permission(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        permission: Permission,
    ) -> Result<bool, PlatformError> {
        let permissions = self.rest.base_permissions(guild_id, user_id).await?;
        debug!(%guild_id, %user_id, permissions, ?permission, "Checked permissions");
        Ok(permission.granted_by(permissions))
    }

    async fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.dispatcher.voice_channel_of(guild_id, user_id).await
    }

    async fn voice_members(&self, channel_id: ChannelId) -> Vec<Member> {
        self.dispatcher.voice_members(channel_id).await
    }

    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>, PlatformError> {
        match self.rest.get_channel(channel_id).await {
            Ok(channel) => Ok(Some(channel)),
            Err(PlatformError::UnknownChannel) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        parent_id: Option<ChannelId>,
        reason: &str,
    ) -> Result<Channel, PlatformError> {
        self.rest
            .create_guild_channel(guild_id, name, ChannelKind::Voice, parent_id, reason)
            .await
    }

    async fn delete_channel(&self, channel_id: ChannelId, reason: &str) -> Result<(), PlatformError> {
        self.rest.delete_channel(channel_id, reason).await
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        self.rest.move_member(guild_id, user_id, channel_id).await
    }
}
