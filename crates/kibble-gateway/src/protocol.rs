//! Discord gateway wire format: opcodes, the payload envelope, and decoding
//! of the dispatch events the bot cares about.

use serde::Deserialize;
use serde_json::{Value, json};

use kibble_types::{
    ChannelId, GuildId, Member, Message, MessageId, MessageRef, PlatformEvent, Reaction, User,
    UserId,
};

pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/?v=10&encoding=json";

pub mod op {
    pub const DISPATCH: u8 = 0;
    pub const HEARTBEAT: u8 = 1;
    pub const IDENTIFY: u8 = 2;
    pub const RECONNECT: u8 = 7;
    pub const INVALID_SESSION: u8 = 9;
    pub const HELLO: u8 = 10;
    pub const HEARTBEAT_ACK: u8 = 11;
}

pub mod intents {
    pub const GUILDS: u64 = 1 << 0;
    pub const GUILD_VOICE_STATES: u64 = 1 << 7;
    pub const GUILD_MESSAGES: u64 = 1 << 9;
    pub const GUILD_MESSAGE_REACTIONS: u64 = 1 << 10;
    pub const MESSAGE_CONTENT: u64 = 1 << 15;

    pub const BOT: u64 =
        GUILDS | GUILD_VOICE_STATES | GUILD_MESSAGES | GUILD_MESSAGE_REACTIONS | MESSAGE_CONTENT;
}

/// Close codes after which reconnecting cannot help.
pub const FATAL_CLOSE_CODES: &[u16] = &[
    4004, // authentication failed
    4010, // invalid shard
    4011, // sharding required
    4012, // invalid API version
    4013, // invalid intents
    4014, // disallowed intents
];

/// Envelope of every gateway message.
#[derive(Debug, Deserialize)]
pub struct GatewayPayload {
    pub op: u8,
    #[serde(default)]
    pub d: Value,
    #[serde(default)]
    pub s: Option<u64>,
    #[serde(default)]
    pub t: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Hello {
    pub heartbeat_interval: u64,
}

pub fn identify(token: &str) -> Value {
    json!({
        "op": op::IDENTIFY,
        "d": {
            "token": token,
            "intents": intents::BOT,
            "properties": {
                "os": std::env::consts::OS,
                "browser": "kibble",
                "device": "kibble",
            },
        },
    })
}

pub fn heartbeat(seq: Option<u64>) -> Value {
    json!({ "op": op::HEARTBEAT, "d": seq })
}

/// Result of decoding one dispatch.
#[derive(Debug)]
pub enum Dispatch {
    Event(PlatformEvent),
    /// Snapshot of a guild's voice channels: (channel, occupant) pairs.
    GuildVoiceStates {
        guild_id: GuildId,
        states: Vec<(ChannelId, Member)>,
    },
    Ignored,
}

#[derive(Debug, Deserialize)]
struct ReadyData {
    user: User,
}

#[derive(Debug, Deserialize)]
struct EmojiData {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReactionAddData {
    user_id: UserId,
    channel_id: ChannelId,
    message_id: MessageId,
    #[serde(default)]
    guild_id: Option<GuildId>,
    #[serde(default)]
    member: Option<Member>,
    emoji: EmojiData,
}

#[derive(Debug, Deserialize)]
struct VoiceStateData {
    #[serde(default)]
    guild_id: Option<GuildId>,
    #[serde(default)]
    channel_id: Option<ChannelId>,
    user_id: UserId,
    #[serde(default)]
    member: Option<Member>,
}

#[derive(Debug, Deserialize)]
struct GuildCreateData {
    id: GuildId,
    #[serde(default)]
    voice_states: Vec<VoiceStateData>,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
struct ChannelDeleteData {
    id: ChannelId,
}

/// Decode a dispatch (`op` 0) by its event name.
pub fn decode_dispatch(event_name: &str, data: Value) -> Result<Dispatch, serde_json::Error> {
    let dispatch = match event_name {
        "READY" => {
            let ready: ReadyData = serde_json::from_value(data)?;
            Dispatch::Event(PlatformEvent::Ready { user: ready.user })
        }
        "MESSAGE_CREATE" => {
            let message: Message = serde_json::from_value(data)?;
            Dispatch::Event(PlatformEvent::MessageCreate(Box::new(message)))
        }
        "MESSAGE_REACTION_ADD" => {
            let data: ReactionAddData = serde_json::from_value(data)?;
            let Some(emoji) = data.emoji.name else {
                return Ok(Dispatch::Ignored);
            };
            let user = data
                .member
                .map(|m| m.user)
                .unwrap_or_else(|| placeholder_user(data.user_id));
            Dispatch::Event(PlatformEvent::ReactionAdd(Reaction {
                message: MessageRef {
                    channel_id: data.channel_id,
                    message_id: data.message_id,
                },
                guild_id: data.guild_id,
                user,
                emoji,
            }))
        }
        "VOICE_STATE_UPDATE" => {
            let data: VoiceStateData = serde_json::from_value(data)?;
            let Some(guild_id) = data.guild_id else {
                return Ok(Dispatch::Ignored);
            };
            let member = data.member.unwrap_or_else(|| placeholder_member(data.user_id));
            Dispatch::Event(PlatformEvent::VoiceStateUpdate {
                guild_id,
                channel_id: data.channel_id,
                member,
            })
        }
        "GUILD_CREATE" => {
            let guild: GuildCreateData = serde_json::from_value(data)?;
            let states = guild
                .voice_states
                .into_iter()
                .filter_map(|vs| {
                    let channel_id = vs.channel_id?;
                    let member = vs
                        .member
                        .or_else(|| guild.members.iter().find(|m| m.user.id == vs.user_id).cloned())
                        .unwrap_or_else(|| placeholder_member(vs.user_id));
                    Some((channel_id, member))
                })
                .collect();
            Dispatch::GuildVoiceStates {
                guild_id: guild.id,
                states,
            }
        }
        "CHANNEL_DELETE" => {
            let data: ChannelDeleteData = serde_json::from_value(data)?;
            Dispatch::Event(PlatformEvent::ChannelDelete { channel_id: data.id })
        }
        _ => Dispatch::Ignored,
    };

    Ok(dispatch)
}

/// Stand-in for a user the payload only named by id.
fn placeholder_user(id: UserId) -> User {
    User {
        id,
        username: id.to_string(),
        global_name: None,
        bot: false,
    }
}

fn placeholder_member(id: UserId) -> Member {
    Member {
        user: placeholder_user(id),
        nick: None,
        roles: vec![],
    }
}
