use std::sync::{Arc, LazyLock};
use std::time::Duration;

use futures_util::future::join_all;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use kibble_gateway::{ChatPlatform, Permission, PlatformError};
use kibble_types::{Channel, ChannelId, GuildId, Member, Message};

use crate::tracker::{self, ChannelTracker, IDLE_THRESHOLD, SweepReport, TrackedChannel};

static TEAMS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"n\s*(\d+)").expect("Invalid regex"));
static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"s\s*(\d+)").expect("Invalid regex"));

/// Requested split: `teams` groups of up to `size` members.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeamSpec {
    pub teams: usize,
    pub size: usize,
}

/// Why a split command was refused or failed. The message is the reply
/// the invoker sees.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("❌ You need 'Manage Channels' permission to use this command.")]
    MissingPermission,

    #[error("❌ You must be in a voice channel to use this command.")]
    NotInVoice,

    #[error("❌ Invalid format. Use: `@bot pug us N<teams> S<size>`\nExample: `@bot pug us N2 S5`")]
    InvalidFormat,

    #[error("❌ Number of teams and team size must be at least 1.")]
    BelowMinimum,

    #[error("❌ Not enough members in the voice channel. Need at least {needed} members for {needed} teams.")]
    NotEnoughMembers { needed: usize },

    #[error("❌ An error occurred: {0}")]
    Platform(#[from] PlatformError),
}

/// Pull `N<teams>` and `S<size>` out of free text, case-insensitively.
pub fn parse_team_spec(content: &str) -> Result<TeamSpec, CommandError> {
    let content = content.to_lowercase();
    let capture = |re: &Regex| -> Result<usize, CommandError> {
        re.captures(&content)
            .and_then(|caps| caps[1].parse().ok())
            .ok_or(CommandError::InvalidFormat)
    };

    let spec = TeamSpec {
        teams: capture(&TEAMS_RE)?,
        size: capture(&SIZE_RE)?,
    };
    if spec.teams < 1 || spec.size < 1 {
        return Err(CommandError::BelowMinimum);
    }
    Ok(spec)
}

/// Fisher–Yates: every permutation is equally likely.
pub fn shuffle<T, R: Rng + ?Sized>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.random_range(0..=i);
        items.swap(i, j);
    }
}

/// Cut `items` into up to `spec.teams` consecutive groups of `spec.size`.
/// Empty groups are never produced; whatever does not fit is returned
/// separately.
pub fn partition<T>(items: Vec<T>, spec: TeamSpec) -> (Vec<Vec<T>>, Vec<T>) {
    let mut rest = items.into_iter();
    let mut teams = Vec::new();

    for _ in 0..spec.teams {
        let team: Vec<T> = rest.by_ref().take(spec.size).collect();
        if team.is_empty() {
            break;
        }
        teams.push(team);
    }

    (teams, rest.collect())
}

pub fn team_channel_name(index: usize) -> String {
    format!("Team {} - PUG", index + 1)
}

#[derive(Debug, Clone)]
pub struct TeamRoster {
    pub channel: Channel,
    pub members: Vec<Member>,
}

#[derive(Debug, Clone)]
pub struct SplitReport {
    pub teams: Vec<TeamRoster>,
    pub unassigned: Vec<Member>,
}

/// Splits voice channels into random teams and reclaims the team channels
/// once they go idle.
pub struct TeamManager {
    platform: Arc<dyn ChatPlatform>,
    tracker: ChannelTracker,
    rng: Mutex<StdRng>,
    idle_threshold: Duration,
}

impl TeamManager {
    pub fn new(platform: Arc<dyn ChatPlatform>) -> Self {
        Self {
            platform,
            tracker: ChannelTracker::new(),
            rng: Mutex::new(StdRng::from_os_rng()),
            idle_threshold: IDLE_THRESHOLD,
        }
    }

    /// Reproducible team assignments.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    #[must_use]
    pub fn with_idle_threshold(mut self, threshold: Duration) -> Self {
        self.idle_threshold = threshold;
        self
    }

    pub async fn tracked(&self, channel_id: ChannelId) -> Option<TrackedChannel> {
        self.tracker.get(channel_id).await
    }

    pub async fn tracked_count(&self) -> usize {
        self.tracker.len().await
    }

    pub async fn sweep(&self, now: Instant) -> SweepReport {
        tracker::sweep(&self.tracker, &*self.platform, self.idle_threshold, now).await
    }

    /// Run a split command and answer the invoker either way.
    pub async fn handle_split(&self, message: &Message) {
        match self.split(message).await {
            Ok(report) => info!(
                invoker = %message.author.tag(),
                teams = report.teams.len(),
                unassigned = report.unassigned.len(),
                "PUG split done"
            ),
            Err(e) => {
                match &e {
                    CommandError::Platform(err) => error!("Error in PUG command: {}", err),
                    other => debug!(invoker = %message.author.tag(), "PUG split refused: {:?}", other),
                }
                if let Err(err) = self.platform.reply(message.reference(), &e.to_string()).await {
                    warn!("Failed to answer PUG command: {}", err);
                }
            }
        }
    }

    pub async fn split(&self, message: &Message) -> Result<SplitReport, CommandError> {
        let author = &message.author;
        let guild_id = message.guild_id.ok_or(CommandError::MissingPermission)?;

        if !self
            .platform
            .has_permission(guild_id, author.id, Permission::ManageChannels)
            .await?
        {
            return Err(CommandError::MissingPermission);
        }

        let source = self
            .platform
            .voice_channel_of(guild_id, author.id)
            .await
            .ok_or(CommandError::NotInVoice)?;

        let spec = parse_team_spec(&message.content)?;

        let mut members: Vec<Member> = self
            .platform
            .voice_members(source)
            .await
            .into_iter()
            .filter(|m| !m.user.bot)
            .collect();
        if members.len() < spec.teams {
            return Err(CommandError::NotEnoughMembers { needed: spec.teams });
        }

        // Stable order in, so a seeded rng gives reproducible teams.
        members.sort_by_key(|m| m.user.id);
        shuffle(&mut members, &mut *self.rng.lock().await);

        let available = members.len();
        let (teams, unassigned) = partition(members, spec);

        if !unassigned.is_empty() {
            let warning = overflow_warning(available, spec, &unassigned);
            if let Err(e) = self.platform.reply(message.reference(), &warning).await {
                warn!("Failed to post overflow warning: {}", e);
            }
        }

        let parent = self
            .platform
            .fetch_channel(source)
            .await?
            .and_then(|channel| channel.parent_id);

        let status = self
            .platform
            .reply(
                message.reference(),
                &format!("🎮 Creating {} team channels...", teams.len()),
            )
            .await?;

        let reason = format!("PUG split requested by {}", author.tag());
        let created = join_all(
            teams
                .iter()
                .enumerate()
                .map(|(index, team)| self.provision(guild_id, index, team, parent, &reason)),
        )
        .await;

        let mut rosters = Vec::with_capacity(teams.len());
        for (result, members) in created.into_iter().zip(teams) {
            rosters.push(TeamRoster {
                channel: result?,
                members,
            });
        }

        self.platform.edit_message(status, &summary(&rosters)).await?;

        Ok(SplitReport {
            teams: rosters,
            unassigned,
        })
    }

    /// Create one team channel, start tracking it, then move its members in.
    async fn provision(
        &self,
        guild_id: GuildId,
        index: usize,
        team: &[Member],
        parent: Option<ChannelId>,
        reason: &str,
    ) -> Result<Channel, PlatformError> {
        let channel = self
            .platform
            .create_voice_channel(guild_id, &team_channel_name(index), parent, reason)
            .await?;
        self.tracker.track(channel.id, Instant::now()).await;
        info!(channel_id = %channel.id, name = %channel.name, "Created PUG channel");

        for member in team {
            if let Err(e) = self.platform.move_member(guild_id, member.user.id, channel.id).await {
                warn!(channel_id = %channel.id, "Failed to move {}: {}", member.user.tag(), e);
            }
        }

        Ok(channel)
    }
}

fn names(members: &[Member]) -> String {
    members
        .iter()
        .map(Member::display_name)
        .collect::<Vec<_>>()
        .join(", ")
}

fn overflow_warning(available: usize, spec: TeamSpec, unassigned: &[Member]) -> String {
    format!(
        "⚠️ Warning: {} members available, but only {} will be split into teams. {} will remain in the original channel: {}",
        available,
        spec.teams.saturating_mul(spec.size),
        unassigned.len(),
        names(unassigned)
    )
}

fn summary(rosters: &[TeamRoster]) -> String {
    let lines: Vec<String> = rosters
        .iter()
        .enumerate()
        .map(|(i, roster)| format!("**Team {}**: {}", i + 1, names(&roster.members)))
        .collect();

    format!(
        "✅ Successfully created {} teams!\n\n{}\n\n*Channels will be deleted after 5 minutes of being empty.*",
        rosters.len(),
        lines.join("\n")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Action, BOT_ID, FakePlatform, GUILD, bot_user, member, message, user};
    use kibble_types::{ChannelKind, MessageRef, User, UserId};
    use std::collections::HashSet;

    const CATEGORY: ChannelId = ChannelId(299);
    const LOBBY: ChannelId = ChannelId(300);
    const CAPTAIN: u64 = 100;

    fn spec(teams: usize, size: usize) -> TeamSpec {
        TeamSpec { teams, size }
    }

    fn captain() -> User {
        user(CAPTAIN, "captain")
    }

    /// A lobby holding the captain plus `others` more players and one bot.
    async fn lobby(others: u64) -> Arc<FakePlatform> {
        let platform = FakePlatform::new();
        platform.add_channel(CATEGORY, "Games", ChannelKind::Category, None);
        platform.add_channel(LOBBY, "Lobby", ChannelKind::Voice, Some(CATEGORY));
        platform.grant_manage_channels(UserId(CAPTAIN));
        platform.join_voice(LOBBY, member(CAPTAIN, "captain")).await;
        for id in 1..=others {
            platform.join_voice(LOBBY, member(CAPTAIN + id, &format!("p{id}"))).await;
        }
        platform
            .join_voice(
                LOBBY,
                Member {
                    user: bot_user(999, "music-bot"),
                    nick: None,
                    roles: vec![],
                },
            )
            .await;
        platform
    }

    fn command(text: &str) -> Message {
        let mut msg = message(ChannelId(50), captain(), &format!("<@{BOT_ID}> {text}"));
        msg.mentions = vec![user(BOT_ID.get(), "kibble")];
        msg
    }

    fn replies(platform: &FakePlatform) -> Vec<String> {
        platform
            .actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Reply { content, .. } => Some(content),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn parses_team_spec() {
        assert_eq!(parse_team_spec("<@1> pug us N2 S5").unwrap(), spec(2, 5));
        assert_eq!(parse_team_spec("pug us n 3 s 4").unwrap(), spec(3, 4));
        assert_eq!(parse_team_spec("PUG US S4 N3").unwrap(), spec(3, 4));
        assert!(matches!(parse_team_spec("pug us"), Err(CommandError::InvalidFormat)));
        assert!(matches!(parse_team_spec("pug us N2"), Err(CommandError::InvalidFormat)));
        assert!(matches!(parse_team_spec("pug us N0 S5"), Err(CommandError::BelowMinimum)));
        assert!(matches!(
            parse_team_spec("pug us N99999999999999999999999 S5"),
            Err(CommandError::InvalidFormat)
        ));
    }

    #[test]
    fn partition_drops_empty_groups_and_returns_overflow() {
        let (teams, rest) = partition((1..=5).collect(), spec(3, 2));
        assert_eq!(teams, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert!(rest.is_empty());

        let (teams, rest) = partition((1..=7).collect(), spec(2, 3));
        assert_eq!(teams, vec![vec![1, 2, 3], vec![4, 5, 6]]);
        assert_eq!(rest, vec![7]);

        let (teams, _) = partition((1..=2).collect::<Vec<_>>(), spec(4, 3));
        assert_eq!(teams.len(), 1);
    }

    #[test]
    fn partition_never_duplicates_members() {
        let (teams, rest) = partition((0..11).collect(), spec(3, 3));
        let mut seen = HashSet::new();
        for id in teams.iter().flatten().chain(rest.iter()) {
            assert!(seen.insert(*id));
        }
        assert_eq!(seen.len(), 11);
    }

    #[test]
    fn shuffle_is_uniform() {
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 40_000;
        let mut position_of_first = [0u32; 4];

        for _ in 0..trials {
            let mut items = [0, 1, 2, 3];
            shuffle(&mut items, &mut rng);
            let pos = items.iter().position(|&x| x == 0).unwrap();
            position_of_first[pos] += 1;
        }

        for count in position_of_first {
            let share = f64::from(count) / f64::from(trials);
            assert!((share - 0.25).abs() < 0.02, "skewed share {share}");
        }
    }

    #[test]
    fn shuffle_with_same_seed_is_reproducible() {
        let mut a: Vec<u32> = (0..20).collect();
        let mut b = a.clone();
        shuffle(&mut a, &mut StdRng::seed_from_u64(42));
        shuffle(&mut b, &mut StdRng::seed_from_u64(42));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn split_end_to_end() {
        let platform = lobby(4).await;
        let manager = TeamManager::new(platform.clone()).with_seed(1);

        let report = manager.split(&command("pug us N2 S2")).await.unwrap();

        assert_eq!(report.teams.len(), 2);
        assert_eq!(report.unassigned.len(), 1);
        assert_eq!(report.teams[0].channel.name, "Team 1 - PUG");
        assert_eq!(report.teams[1].channel.name, "Team 2 - PUG");

        let mut everyone: Vec<UserId> = report
            .teams
            .iter()
            .flat_map(|t| t.members.iter())
            .chain(report.unassigned.iter())
            .map(|m| m.user.id)
            .collect();
        everyone.sort();
        assert_eq!(everyone, (100..=104).map(UserId).collect::<Vec<_>>());

        let actions = platform.actions();
        let created: Vec<_> = actions
            .iter()
            .filter_map(|a| match a {
                Action::CreateChannel { channel, reason } => Some((channel.parent_id, reason.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(created.len(), 2);
        for (parent, reason) in created {
            assert_eq!(parent, Some(CATEGORY));
            assert_eq!(reason, "PUG split requested by captain (100)");
        }

        let moved: Vec<UserId> = actions
            .iter()
            .filter_map(|a| match a {
                Action::Move { user_id, .. } => Some(*user_id),
                _ => None,
            })
            .collect();
        assert_eq!(moved.len(), 4);
        assert!(!moved.contains(&UserId(999)));
        assert_eq!(moved.iter().collect::<HashSet<_>>().len(), 4);

        for roster in &report.teams {
            assert!(manager.tracked(roster.channel.id).await.is_some());
            assert_eq!(platform.voice_members(roster.channel.id).await.len(), 2);
        }

        let replies = replies(&platform);
        assert!(replies[0].starts_with("⚠️ Warning: 5 members available, but only 4 will be split into teams. 1 will remain in the original channel: "));
        assert!(replies[0].ends_with(report.unassigned[0].display_name()));
        assert_eq!(replies[1], "🎮 Creating 2 team channels...");

        let edited = actions.iter().find_map(|a| match a {
            Action::Edit { content, .. } => Some(content.clone()),
            _ => None,
        });
        let edited = edited.unwrap();
        assert!(edited.starts_with("✅ Successfully created 2 teams!\n\n**Team 1**: "));
        assert!(edited.ends_with("\n\n*Channels will be deleted after 5 minutes of being empty.*"));
    }

    #[tokio::test]
    async fn fewer_members_than_slots_drops_empty_teams() {
        let platform = lobby(1).await;
        let manager = TeamManager::new(platform.clone()).with_seed(3);

        let report = manager.split(&command("pug us N2 S5")).await.unwrap();

        assert_eq!(report.teams.len(), 2);
        assert!(report.unassigned.is_empty());
        assert_eq!(manager.tracked_count().await, 2);
        assert!(!replies(&platform)[0].starts_with("⚠️"));
    }

    #[tokio::test]
    async fn refusals_reply_without_side_effects() {
        let cases = [
            ("pug us", "❌ Invalid format. Use: `@bot pug us N<teams> S<size>`\nExample: `@bot pug us N2 S5`"),
            ("pug us N0 S3", "❌ Number of teams and team size must be at least 1."),
            (
                "pug us N4 S3",
                "❌ Not enough members in the voice channel. Need at least 4 members for 4 teams.",
            ),
        ];

        for (text, expected) in cases {
            let platform = lobby(2).await;
            let manager = TeamManager::new(platform.clone());
            manager.handle_split(&command(text)).await;
            assert_eq!(replies(&platform), vec![expected.to_string()]);
            assert_eq!(platform.actions().len(), 1);
        }
    }

    #[tokio::test]
    async fn requires_manage_channels() {
        let platform = lobby(2).await;
        let manager = TeamManager::new(platform.clone());

        let mut msg = command("pug us N2 S2");
        msg.author = user(101, "p1");
        manager.handle_split(&msg).await;

        assert_eq!(
            replies(&platform),
            vec!["❌ You need 'Manage Channels' permission to use this command.".to_string()]
        );
    }

    #[tokio::test]
    async fn requires_voice_presence() {
        let platform = lobby(2).await;
        platform.leave_voice(UserId(CAPTAIN)).await;
        let manager = TeamManager::new(platform.clone());

        manager.handle_split(&command("pug us N2 S2")).await;

        assert_eq!(
            replies(&platform),
            vec!["❌ You must be in a voice channel to use this command.".to_string()]
        );
    }

    #[tokio::test]
    async fn failed_move_does_not_abort_the_rest() {
        let platform = lobby(3).await;
        platform.fail_move_of(UserId(101));
        let manager = TeamManager::new(platform.clone()).with_seed(5);

        let report = manager.split(&command("pug us N2 S2")).await.unwrap();

        assert_eq!(report.teams.len(), 2);
        let moved = platform
            .actions()
            .iter()
            .filter(|a| matches!(a, Action::Move { .. }))
            .count();
        assert_eq!(moved, 3);
        assert!(platform.actions().iter().any(|a| matches!(a, Action::Edit { .. })));
    }

    #[tokio::test]
    async fn platform_failures_are_reported_to_the_invoker() {
        let platform = lobby(3).await;
        platform.fail_channel_creates();
        let manager = TeamManager::new(platform.clone());

        manager.handle_split(&command("pug us N2 S2")).await;

        let replies = replies(&platform);
        assert_eq!(replies.len(), 2);
        assert!(replies[1].starts_with("❌ An error occurred: "));
        assert_eq!(manager.tracked_count().await, 0);
    }

    #[tokio::test]
    async fn same_seed_same_teams() {
        let mut rosters = Vec::new();
        for _ in 0..2 {
            let platform = lobby(5).await;
            let manager = TeamManager::new(platform).with_seed(99);
            let report = manager.split(&command("pug us N3 S2")).await.unwrap();
            let names: Vec<Vec<UserId>> = report
                .teams
                .iter()
                .map(|t| t.members.iter().map(|m| m.user.id).collect())
                .collect();
            rosters.push(names);
        }
        assert_eq!(rosters[0], rosters[1]);
    }

    #[tokio::test(start_paused = true)]
    async fn created_channels_are_reclaimed_once_empty() {
        let platform = lobby(1).await;
        let manager = TeamManager::new(platform.clone()).with_seed(2);
        let report = manager.split(&command("pug us N2 S1")).await.unwrap();

        for roster in &report.teams {
            for m in &roster.members {
                platform.leave_voice(m.user.id).await;
            }
        }

        let start = Instant::now();
        assert_eq!(manager.sweep(start + Duration::from_secs(60)).await.deleted, 0);
        let swept = manager.sweep(start + IDLE_THRESHOLD).await;
        assert_eq!(swept.deleted, 2);
        assert_eq!(manager.tracked_count().await, 0);

        let reply_target = MessageRef {
            channel_id: ChannelId(50),
            message_id: kibble_types::MessageId(500),
        };
        assert!(platform
            .actions()
            .iter()
            .any(|a| matches!(a, Action::Reply { to, .. } if *to == reply_target)));
        assert_eq!(GUILD, report.teams[0].channel.guild_id.unwrap());
    }
}
