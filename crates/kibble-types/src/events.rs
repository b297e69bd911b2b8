use crate::ids::{ChannelId, GuildId, UserId};
use crate::models::{Member, Message, Reaction, User};

/// Inbound events surfaced by the chat platform, already decoded from the
/// wire format.
#[derive(Debug, Clone)]
pub enum PlatformEvent {
    /// The session is established and we know who we are.
    Ready { user: User },

    /// A message was posted in a channel we can see.
    MessageCreate(Box<Message>),

    /// Someone reacted to a message.
    ReactionAdd(Reaction),

    /// A member joined, moved between or left voice channels.
    /// `channel_id` is `None` when they disconnected from voice.
    VoiceStateUpdate {
        guild_id: GuildId,
        channel_id: Option<ChannelId>,
        member: Member,
    },

    /// A channel was deleted, by us or by someone else.
    ChannelDelete { channel_id: ChannelId },
}

impl PlatformEvent {
    /// The user this event originates from, if it has one.
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Self::Ready { user } => Some(user.id),
            Self::MessageCreate(msg) => Some(msg.author.id),
            Self::ReactionAdd(reaction) => Some(reaction.user.id),
            Self::VoiceStateUpdate { member, .. } => Some(member.user.id),
            Self::ChannelDelete { .. } => None,
        }
    }
}
