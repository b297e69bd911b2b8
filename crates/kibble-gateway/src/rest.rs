use std::time::Duration;

use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use kibble_types::{Channel, ChannelId, ChannelKind, GuildId, Member, MessageId, MessageRef, RoleId, UserId};

use crate::error::{PlatformError, UNKNOWN_CHANNEL};

pub const API_BASE: &str = "https://discord.com/api/v10";

const AUDIT_REASON_HEADER: &str = "X-Audit-Log-Reason";

/// Thin Discord REST v10 client authenticated as a bot.
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    code: u32,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitBody {
    #[serde(default)]
    retry_after: f64,
}

#[derive(Debug, Deserialize)]
struct ChannelBody {
    id: ChannelId,
    #[serde(rename = "type")]
    kind: u8,
    #[serde(default)]
    guild_id: Option<GuildId>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    parent_id: Option<ChannelId>,
}

impl From<ChannelBody> for Channel {
    fn from(body: ChannelBody) -> Self {
        Self {
            id: body.id,
            guild_id: body.guild_id,
            name: body.name.unwrap_or_default(),
            kind: ChannelKind::from_code(body.kind),
            parent_id: body.parent_id,
        }
    }
}

#[derive(Debug, Deserialize)]
struct MessageBody {
    id: MessageId,
    channel_id: ChannelId,
}

#[derive(Debug, Deserialize)]
struct RoleBody {
    id: RoleId,
    /// Discord sends the bitset as a decimal string.
    permissions: String,
}

#[derive(Debug, Deserialize)]
struct GuildBody {
    id: GuildId,
    owner_id: UserId,
    #[serde(default)]
    roles: Vec<RoleBody>,
}

impl RestClient {
    pub fn new(token: &str) -> Result<Self, PlatformError> {
        Self::with_base_url(token, API_BASE)
    }

    pub fn with_base_url(token: &str, base_url: impl Into<String>) -> Result<Self, PlatformError> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bot {token}"))
            .map_err(|_| PlatformError::InvalidPayload("token is not a valid header value".into()))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .default_headers(headers)
            .user_agent(concat!("DiscordBot (kibble, ", env!("CARGO_PKG_VERSION"), ")"))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, reason: Option<&str>) -> RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base_url, path));
        match reason {
            Some(reason) => builder.header(AUDIT_REASON_HEADER, encode_reason(reason)),
            None => builder,
        }
    }

    /// Send a request and decode the JSON body of a success response.
    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, PlatformError> {
        let response = check(builder.send().await?).await?;
        Ok(response.json::<T>().await?)
    }

    /// Send a request whose success response carries no body we need.
    async fn send_empty(&self, builder: RequestBuilder) -> Result<(), PlatformError> {
        check(builder.send().await?).await?;
        Ok(())
    }

    // -- Channels --

    pub async fn get_channel(&self, channel_id: ChannelId) -> Result<Channel, PlatformError> {
        let body: ChannelBody = self
            .send_json(self.request(Method::GET, &format!("/channels/{channel_id}"), None))
            .await?;
        Ok(body.into())
    }

    pub async fn create_guild_channel(
        &self,
        guild_id: GuildId,
        name: &str,
        kind: ChannelKind,
        parent_id: Option<ChannelId>,
        reason: &str,
    ) -> Result<Channel, PlatformError> {
        let mut payload = json!({ "name": name, "type": kind.code() });
        if let Some(parent_id) = parent_id {
            payload["parent_id"] = json!(parent_id);
        }

        let body: ChannelBody = self
            .send_json(
                self.request(Method::POST, &format!("/guilds/{guild_id}/channels"), Some(reason))
                    .json(&payload),
            )
            .await?;
        Ok(body.into())
    }

    pub async fn delete_channel(&self, channel_id: ChannelId, reason: &str) -> Result<(), PlatformError> {
        self.send_empty(self.request(Method::DELETE, &format!("/channels/{channel_id}"), Some(reason)))
            .await
    }

    // -- Messages --

    pub async fn create_message(
        &self,
        channel_id: ChannelId,
        content: &str,
        reply_to: Option<MessageId>,
    ) -> Result<MessageRef, PlatformError> {
        let mut payload = json!({ "content": content });
        if let Some(message_id) = reply_to {
            payload["message_reference"] = json!({
                "message_id": message_id,
                "fail_if_not_exists": false,
            });
        }

        let body: MessageBody = self
            .send_json(
                self.request(Method::POST, &format!("/channels/{channel_id}/messages"), None)
                    .json(&payload),
            )
            .await?;

        debug!(%channel_id, message_id = %body.id, "Message posted");
        Ok(MessageRef {
            channel_id: body.channel_id,
            message_id: body.id,
        })
    }

    pub async fn edit_message(&self, message: MessageRef, content: &str) -> Result<(), PlatformError> {
        let path = format!("/channels/{}/messages/{}", message.channel_id, message.message_id);
        self.send_empty(self.request(Method::PATCH, &path, None).json(&json!({ "content": content })))
            .await
    }

    pub async fn create_reaction(&self, message: MessageRef, emoji: &str) -> Result<(), PlatformError> {
        let path = format!(
            "/channels/{}/messages/{}/reactions/{}/@me",
            message.channel_id,
            message.message_id,
            utf8_percent_encode(emoji, NON_ALPHANUMERIC)
        );
        self.send_empty(self.request(Method::PUT, &path, None)).await
    }

    // -- Members --

    pub async fn get_member(&self, guild_id: GuildId, user_id: UserId) -> Result<Member, PlatformError> {
        self.send_json(self.request(Method::GET, &format!("/guilds/{guild_id}/members/{user_id}"), None))
            .await
    }

    /// Move a member connected to voice into another voice channel.
    pub async fn move_member(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        channel_id: ChannelId,
    ) -> Result<(), PlatformError> {
        self.send_empty(
            self.request(Method::PATCH, &format!("/guilds/{guild_id}/members/{user_id}"), None)
                .json(&json!({ "channel_id": channel_id })),
        )
        .await
    }

    /// Guild-wide permissions of a member: `@everyone` plus every role they
    /// hold. Channel overwrites are not applied.
    pub async fn base_permissions(&self, guild_id: GuildId, user_id: UserId) -> Result<u64, PlatformError> {
        let guild: GuildBody = self
            .send_json(self.request(Method::GET, &format!("/guilds/{guild_id}"), None))
            .await?;
        if guild.owner_id == user_id {
            return Ok(u64::MAX);
        }

        let member = self.get_member(guild_id, user_id).await?;
        Ok(compute_base_permissions(&guild, &member.roles))
    }
}

fn compute_base_permissions(guild: &GuildBody, member_roles: &[RoleId]) -> u64 {
    // The @everyone role shares the guild's id.
    let everyone = RoleId(guild.id.get());

    guild
        .roles
        .iter()
        .filter(|role| role.id == everyone || member_roles.contains(&role.id))
        .filter_map(|role| match role.permissions.parse::<u64>() {
            Ok(bits) => Some(bits),
            Err(_) => {
                warn!(role_id = %role.id, "Unparseable permission bitset");
                None
            }
        })
        .fold(0, |acc, bits| acc | bits)
}

/// Map a response onto success or a typed platform error.
async fn check(response: reqwest::Response) -> Result<reqwest::Response, PlatformError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let body: RateLimitBody = response
            .json()
            .await
            .unwrap_or(RateLimitBody { retry_after: 1.0 });
        warn!(retry_after = body.retry_after, "Discord API rate limit hit");
        return Err(PlatformError::RateLimited {
            retry_after: body.retry_after,
        });
    }

    let text = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or(ApiErrorBody {
        code: 0,
        message: text,
    });

    Err(classify(status, body))
}

fn classify(status: StatusCode, body: ApiErrorBody) -> PlatformError {
    if body.code == UNKNOWN_CHANNEL {
        return PlatformError::UnknownChannel;
    }
    if status == StatusCode::FORBIDDEN {
        return PlatformError::MissingPermission(body.message);
    }
    PlatformError::Api {
        status: status.as_u16(),
        code: body.code,
        message: body.message,
    }
}

/// Audit log reasons travel in a header, so they must be URL-encoded.
fn encode_reason(reason: &str) -> String {
    utf8_percent_encode(reason, NON_ALPHANUMERIC).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn guild(roles: &[(u64, &str)]) -> GuildBody {
        GuildBody {
            id: GuildId(1),
            owner_id: UserId(99),
            roles: roles
                .iter()
                .map(|(id, perms)| RoleBody {
                    id: RoleId(*id),
                    permissions: (*perms).to_string(),
                })
                .collect(),
        }
    }

    #[test]
    fn everyone_role_always_applies() {
        let g = guild(&[(1, "1024"), (5, "16")]);
        assert_eq!(compute_base_permissions(&g, &[]), 1024);
        assert_eq!(compute_base_permissions(&g, &[RoleId(5)]), 1024 | 16);
    }

    #[test]
    fn bad_bitsets_are_skipped() {
        let g = guild(&[(1, "0"), (5, "lots")]);
        assert_eq!(compute_base_permissions(&g, &[RoleId(5)]), 0);
    }

    #[test]
    fn unknown_channel_code_wins_over_status() {
        let err = classify(
            StatusCode::NOT_FOUND,
            ApiErrorBody {
                code: UNKNOWN_CHANNEL,
                message: "Unknown Channel".into(),
            },
        );
        assert!(matches!(err, PlatformError::UnknownChannel));
    }

    #[test]
    fn forbidden_maps_to_missing_permission() {
        let err = classify(
            StatusCode::FORBIDDEN,
            ApiErrorBody {
                code: 50013,
                message: "Missing Permissions".into(),
            },
        );
        assert!(matches!(err, PlatformError::MissingPermission(m) if m == "Missing Permissions"));
    }

    #[test]
    fn reasons_are_header_safe() {
        assert_eq!(encode_reason("PUG split"), "PUG%20split");
        assert!(encode_reason("Zoë").is_ascii());
    }

    #[test]
    fn debug_redacts_token() {
        let client = RestClient::new("super-secret-token").unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-token"));
    }
}
