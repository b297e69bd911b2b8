//! In-memory `ChatPlatform` for exercising the bot without Discord.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use kibble_gateway::{ChatPlatform, Dispatcher, Permission, PlatformError};
use kibble_types::{
    Attachment, Channel, ChannelId, ChannelKind, GuildId, Member, Message, MessageId, MessageRef, PlatformEvent,
    Reaction, User, UserId,
};

pub const GUILD: GuildId = GuildId(1);
pub const BOT_ID: UserId = UserId(2);

/// Every outbound call the bot made, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Send {
        message: MessageRef,
        content: String,
    },
    Reply {
        to: MessageRef,
        message: MessageRef,
        content: String,
    },
    Edit {
        message: MessageRef,
        content: String,
    },
    React {
        message: MessageRef,
        emoji: String,
    },
    CreateChannel {
        channel: Channel,
        reason: String,
    },
    DeleteChannel {
        channel_id: ChannelId,
        reason: String,
    },
    Move {
        user_id: UserId,
        channel_id: ChannelId,
    },
}

pub struct FakePlatform {
    dispatcher: Dispatcher,
    next_id: AtomicU64,
    log: Mutex<Vec<Action>>,
    action_tx: mpsc::UnboundedSender<Action>,
    action_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Action>>,
    channels: Mutex<HashMap<ChannelId, Channel>>,
    managers: Mutex<HashSet<UserId>>,
    failing_moves: Mutex<HashSet<UserId>>,
    failing_fetches: Mutex<HashSet<ChannelId>>,
    failing_sends: Mutex<Vec<String>>,
    fail_channel_creates: AtomicBool,
}

impl FakePlatform {
    pub fn new() -> Arc<Self> {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            dispatcher: Dispatcher::new(),
            next_id: AtomicU64::new(10_000),
            log: Mutex::new(Vec::new()),
            action_tx,
            action_rx: tokio::sync::Mutex::new(action_rx),
            channels: Mutex::new(HashMap::new()),
            managers: Mutex::new(HashSet::new()),
            failing_moves: Mutex::new(HashSet::new()),
            failing_fetches: Mutex::new(HashSet::new()),
            failing_sends: Mutex::new(Vec::new()),
            fail_channel_creates: AtomicBool::new(false),
        })
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn record(&self, action: Action) {
        self.log.lock().unwrap().push(action.clone());
        let _ = self.action_tx.send(action);
    }

    pub fn actions(&self) -> Vec<Action> {
        self.log.lock().unwrap().clone()
    }

    /// Wait for the next recorded action matching `pred`, skipping others.
    pub async fn wait_for(&self, pred: impl Fn(&Action) -> bool) -> Action {
        let mut rx = self.action_rx.lock().await;
        let wait = async {
            loop {
                let action = rx.recv().await.unwrap();
                if pred(&action) {
                    return action;
                }
            }
        };
        tokio::time::timeout(Duration::from_secs(5), wait)
            .await
            .expect("expected action never happened")
    }

    pub fn add_channel(&self, id: ChannelId, name: &str, kind: ChannelKind, parent_id: Option<ChannelId>) {
        self.channels.lock().unwrap().insert(
            id,
            Channel {
                id,
                guild_id: Some(GUILD),
                name: name.to_string(),
                kind,
                parent_id,
            },
        );
    }

    pub fn has_channel(&self, id: ChannelId) -> bool {
        self.channels.lock().unwrap().contains_key(&id)
    }

    pub fn remove_channel(&self, id: ChannelId) {
        self.channels.lock().unwrap().remove(&id);
    }

    pub fn grant_manage_channels(&self, user_id: UserId) {
        self.managers.lock().unwrap().insert(user_id);
    }

    pub fn fail_move_of(&self, user_id: UserId) {
        self.failing_moves.lock().unwrap().insert(user_id);
    }

    pub fn fail_fetch_of(&self, channel_id: ChannelId) {
        self.failing_fetches.lock().unwrap().insert(channel_id);
    }

    /// Make any send or reply whose content contains `needle` fail.
    pub fn fail_sends_containing(&self, needle: &str) {
        self.failing_sends.lock().unwrap().push(needle.to_string());
    }

    pub fn fail_channel_creates(&self) {
        self.fail_channel_creates.store(true, Ordering::SeqCst);
    }

    pub async fn join_voice(&self, channel_id: ChannelId, member: Member) {
        self.dispatcher.voice_join(channel_id, GUILD, member).await;
    }

    pub async fn leave_voice(&self, user_id: UserId) {
        self.dispatcher.voice_leave(user_id).await;
    }

    /// Deliver a reaction event as if `user` clicked `emoji` on `message`.
    pub async fn react(&self, message: MessageRef, user: &User, emoji: &str) {
        self.dispatcher
            .publish(PlatformEvent::ReactionAdd(Reaction {
                message,
                guild_id: Some(GUILD),
                user: user.clone(),
                emoji: emoji.to_string(),
            }))
            .await;
    }

    pub async fn publish(&self, event: PlatformEvent) {
        self.dispatcher.publish(event).await;
    }

    fn check_send(&self, content: &str) -> Result<(), PlatformError> {
        if self.failing_sends.lock().unwrap().iter().any(|n| content.contains(n.as_str())) {
            return Err(PlatformError::Api {
                status: 500,
                code: 0,
                message: "send rejected".into(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ChatPlatform for FakePlatform {
    async fn bot_user_id(&self) -> Option<UserId> {
        Some(BOT_ID)
    }

    fn subscribe(&self) -> broadcast::Receiver<PlatformEvent> {
        self.dispatcher.subscribe()
    }

    async fn send_message(&self, channel_id: ChannelId, content: &str) -> Result<MessageRef, PlatformError> {
        self.check_send(content)?;
        let message = MessageRef {
            channel_id,
            message_id: MessageId(self.next_id()),
        };
        self.record(Action::Send {
            message,
            content: content.to_string(),
        });
        Ok(message)
    }

    async fn reply(&self, to: MessageRef, content: &str) -> Result<MessageRef, PlatformError> {
        self.check_send(content)?;
        let message = MessageRef {
            channel_id: to.channel_id,
            message_id: MessageId(self.next_id()),
        };
        self.record(Action::Reply {
            to,
            message,
            content: content.to_string(),
        });
        Ok(message)
    }

    async fn edit_message(&self, message: MessageRef, content: &str) -> Result<(), PlatformError> {
        self.record(Action::Edit {
            message,
            content: content.to_string(),
        });
        Ok(())
    }

    async fn add_reaction(&self, message: MessageRef, emoji: &str) -> Result<(), PlatformError> {
        self.record(Action::React {
            message,
            emoji: emoji.to_string(),
        });
        Ok(())
    }

    async fn has_permission(
        &self,
        _guild_id: GuildId,
        user_id: UserId,
        permission: Permission,
    ) -> Result<bool, PlatformError> {
        Ok(permission == Permission::ManageChannels && self.managers.lock().unwrap().contains(&user_id))
    }

    async fn voice_channel_of(&self, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
        self.dispatcher.voice_channel_of(guild_id, user_id).await
    }

    async fn voice_members(&self, channel_id: ChannelId) -> Vec<Member> {
        self.dispatcher.voice_members(channel_id).await
    }

    async fn fetch_channel(&self, channel_id: ChannelId) -> Result<Option<Channel>, PlatformError> {
        if self.failing_fetches.lock().unwrap().contains(&channel_id) {
            return Err(PlatformError::Api {
                status: 502,
                code: 0,
                message: "bad gateway".into(),
            });
        }
        Ok(self.channels.lock().unwrap().get(&channel_id).cloned())
    }

    async fn create_voice_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        parent_id: Option<ChannelId>,
        reason: &str,
    ) -> Result<Channel, PlatformError> {
        if self.fail_channel_creates.load(Ordering::SeqCst) {
            return Err(PlatformError::MissingPermission("Missing Permissions".into()));
        }
        let channel = Channel {
            id: ChannelId(self.next_id()),
            guild_id: Some(guild_id),
            name: name.to_string(),
            kind: ChannelKind::Voice,
            parent_id,
        };
        self.channels.lock().unwrap().insert(channel.id, channel.clone());
        self.record(Action::CreateChannel {
            channel: channel.clone(),
            reason: reason.to_string(),
        });
        Ok(channel)
    }

    async fn delete_channel(&self, channel_id: ChannelId, reason: &str) -> Result<(), PlatformError> {
        if self.channels.lock().unwrap().remove(&channel_id).is_none() {
            return Err(PlatformError::UnknownChannel);
        }
        self.record(Action::DeleteChannel {
            channel_id,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        if self.failing_moves.lock().unwrap().contains(&user_id) {
            return Err(PlatformError::MissingPermission("Missing Permissions".into()));
        }

        let current = self.dispatcher.voice_channel_of(guild_id, user_id).await;
        if let Some(current) = current {
            let member = self
                .dispatcher
                .voice_members(current)
                .await
                .into_iter()
                .find(|m| m.user.id == user_id);
            if let Some(member) = member {
                self.dispatcher.voice_join(channel_id, guild_id, member).await;
            }
        }

        self.record(Action::Move { user_id, channel_id });
        Ok(())
    }
}

pub fn user(id: u64, name: &str) -> User {
    User {
        id: UserId(id),
        username: name.to_string(),
        global_name: None,
        bot: false,
    }
}

pub fn bot_user(id: u64, name: &str) -> User {
    User {
        bot: true,
        ..user(id, name)
    }
}

pub fn member(id: u64, name: &str) -> Member {
    Member {
        user: user(id, name),
        nick: None,
        roles: vec![],
    }
}

pub fn image(url: &str) -> Attachment {
    Attachment {
        id: url.to_string(),
        filename: "pet.png".into(),
        url: url.to_string(),
        content_type: Some("image/png".into()),
    }
}

pub fn message(channel_id: ChannelId, author: User, content: &str) -> Message {
    Message {
        id: MessageId(500),
        channel_id,
        guild_id: Some(GUILD),
        author,
        content: content.to_string(),
        attachments: vec![],
        mentions: vec![],
    }
}
