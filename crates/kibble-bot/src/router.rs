use std::sync::Arc;

use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, info, warn};

use kibble_gateway::ChatPlatform;
use kibble_types::{Message, PlatformEvent, UserId};

use crate::approval::ApprovalPipeline;
use crate::teams::TeamManager;

const SPLIT_COMMAND: &str = "pug us";

/// Where an inbound message goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Ignore,
    TeamSplit,
    /// Mentioned without a known command. Nothing to do.
    Mention,
    /// Candidate submission for the approval gate.
    Intake,
}

pub fn route(message: &Message, bot_id: Option<UserId>) -> Route {
    if message.author.bot {
        return Route::Ignore;
    }

    let mentioned = bot_id.is_some_and(|id| message.mentions_user(id));
    if !mentioned {
        return Route::Intake;
    }

    if message.content.to_lowercase().contains(SPLIT_COMMAND) {
        Route::TeamSplit
    } else {
        Route::Mention
    }
}

/// The bot proper: pulls platform events and hands messages to the
/// approval pipeline or the team manager.
#[derive(Clone)]
pub struct Bot {
    platform: Arc<dyn ChatPlatform>,
    approvals: Arc<ApprovalPipeline>,
    teams: Arc<TeamManager>,
}

impl Bot {
    pub fn new(platform: Arc<dyn ChatPlatform>, approvals: Arc<ApprovalPipeline>, teams: Arc<TeamManager>) -> Self {
        Self {
            platform,
            approvals,
            teams,
        }
    }

    /// Consume events until the stream closes. Every message is handled on
    /// its own task so a slow review or split never holds up the next one.
    pub async fn run(self, mut events: broadcast::Receiver<PlatformEvent>) {
        loop {
            match events.recv().await {
                Ok(PlatformEvent::MessageCreate(message)) => {
                    let bot = self.clone();
                    tokio::spawn(async move { bot.dispatch(&message).await });
                }
                Ok(PlatformEvent::Ready { user }) => info!("Logged in as {}", user.tag()),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event loop fell behind, messages dropped"),
                Err(RecvError::Closed) => {
                    info!("Event stream closed, stopping");
                    break;
                }
            }
        }
    }

    async fn dispatch(&self, message: &Message) {
        let bot_id = self.platform.bot_user_id().await;
        match route(message, bot_id) {
            Route::Ignore => {}
            Route::TeamSplit => self.teams.handle_split(message).await,
            Route::Mention => debug!(author = %message.author.tag(), "Mentioned without a command"),
            Route::Intake => {
                let flows = self.approvals.handle_message(message).await;
                if !flows.is_empty() {
                    debug!(count = flows.len(), "Started reviews");
                }
            }
        }
    }
}
