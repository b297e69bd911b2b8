use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};
use tracing::trace;

use kibble_types::{ChannelId, GuildId, Member, PlatformEvent, User, UserId};

/// Voice channel participant state.
#[derive(Debug, Clone)]
pub struct VoiceParticipant {
    pub guild_id: GuildId,
    pub member: Member,
}

/// Fans inbound platform events out to every subscriber and keeps the
/// pieces of session state the bot reads back (who we are, who sits in
/// which voice channel).
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    /// Fan-out of platform events; every subscriber receives every event
    broadcast_tx: broadcast::Sender<PlatformEvent>,

    /// Set by the Ready event
    current_user: RwLock<Option<User>>,

    /// Voice state: channel_id -> (user_id -> participant)
    voice_states: RwLock<HashMap<ChannelId, HashMap<UserId, VoiceParticipant>>>,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        let (broadcast_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(DispatcherInner {
                broadcast_tx,
                current_user: RwLock::new(None),
                voice_states: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Subscribe to platform events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.inner.broadcast_tx.subscribe()
    }

    /// Apply an event to the cached session state, then broadcast it.
    pub async fn publish(&self, event: PlatformEvent) {
        match &event {
            PlatformEvent::Ready { user } => {
                *self.inner.current_user.write().await = Some(user.clone());
            }
            PlatformEvent::VoiceStateUpdate {
                guild_id,
                channel_id: Some(channel_id),
                member,
            } => {
                self.voice_join(*channel_id, *guild_id, member.clone()).await;
            }
            PlatformEvent::VoiceStateUpdate {
                channel_id: None,
                member,
                ..
            } => {
                self.voice_leave(member.user.id).await;
            }
            PlatformEvent::ChannelDelete { channel_id } => {
                self.inner.voice_states.write().await.remove(channel_id);
            }
            PlatformEvent::MessageCreate(_) | PlatformEvent::ReactionAdd(_) => {}
        }

        trace!(user_id = ?event.user_id(), "dispatching platform event");
        // No subscribers is fine; the event is simply dropped.
        let _ = self.inner.broadcast_tx.send(event);
    }

    pub async fn current_user_id(&self) -> Option<UserId> {
        self.inner.current_user.read().await.as_ref().map(|u| u.id)
    }

    /// Replace a guild's voice states wholesale, as delivered when the guild
    /// becomes available.
    pub async fn load_guild_voice_states(
        &self,
        guild_id: GuildId,
        states: Vec<(ChannelId, Member)>,
    ) {
        let mut voice_states = self.inner.voice_states.write().await;

        for participants in voice_states.values_mut() {
            participants.retain(|_, p| p.guild_id != guild_id);
        }
        voice_states.retain(|_, participants| !participants.is_empty());

        for (channel_id, member) in states {
            voice_states
                .entry(channel_id)
                .or_default()
                .insert(member.user.id, VoiceParticipant { guild_id, member });
        }
    }

    /// Join a voice channel, leaving whichever one the member was in before.
    pub async fn voice_join(&self, channel_id: ChannelId, guild_id: GuildId, member: Member) {
        let mut voice_states = self.inner.voice_states.write().await;

        // Remove from any existing channel first
        for participants in voice_states.values_mut() {
            participants.remove(&member.user.id);
        }

        voice_states
            .entry(channel_id)
            .or_default()
            .insert(member.user.id, VoiceParticipant { guild_id, member });
    }

    /// Leave voice. Returns the channel_id they were in, if any.
    pub async fn voice_leave(&self, user_id: UserId) -> Option<ChannelId> {
        let mut voice_states = self.inner.voice_states.write().await;

        for (&channel_id, participants) in voice_states.iter_mut() {
            if participants.remove(&user_id).is_some() {
                return Some(channel_id);
            }
        }

        None
    }

    pub async fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        let voice_states = self.inner.voice_states.read().await;

        voice_states.iter().find_map(|(&channel_id, participants)| {
            participants
                .get(&user_id)
                .filter(|p| p.guild_id == guild_id)
                .map(|_| channel_id)
        })
    }

    pub async fn voice_members(&self, channel_id: ChannelId) -> Vec<Member> {
        self.inner
            .voice_states
            .read()
            .await
            .get(&channel_id)
            .map(|participants| participants.values().map(|p| p.member.clone()).collect())
            .unwrap_or_default()
    }
}
