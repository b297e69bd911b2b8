use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use kibble_gateway::ChatPlatform;
use kibble_types::{ChannelId, Message, MessageRef, PlatformEvent, Reaction, User, UserId};

use crate::state::StoreHandle;

/// Where review prompts are posted.
pub const MODERATION_CHANNEL_ID: ChannelId = ChannelId(1_324_409_075_508_707_358);

pub const APPROVE: &str = "✅";
pub const REJECT: &str = "❌";

/// How long moderators have to decide on a submission.
pub const REVIEW_WINDOW: Duration = Duration::from_secs(12 * 60 * 60);

const CRITERIA: &str = "*Approval Criteria:*\n\
    - the photo is of something that is considered a pet\n\
    - it does not show anything that might be personal information (address, bank or real name information etc)\n\
    - the image does not contain anything against server rules";

/// One image attachment awaiting a moderation decision.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: Uuid,
    pub url: String,
    pub submitter: User,
    pub origin: MessageRef,
    pub created_at: DateTime<Utc>,
}

impl Submission {
    fn new(url: &str, message: &Message) -> Self {
        Self {
            id: Uuid::new_v4(),
            url: url.to_string(),
            submitter: message.author.clone(),
            origin: message.reference(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewState {
    Pending,
    Approved { by: User },
    Rejected { by: User },
    Expired,
}

impl ReviewState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// The prompt posted for a submission, its deadline and where it stands.
#[derive(Debug)]
pub struct Review {
    pub prompt: MessageRef,
    pub deadline: Instant,
    state: ReviewState,
}

impl Review {
    pub fn new(prompt: MessageRef, deadline: Instant) -> Self {
        Self {
            prompt,
            deadline,
            state: ReviewState::Pending,
        }
    }

    pub fn state(&self) -> &ReviewState {
        &self.state
    }

    /// Settle the review. Only the first terminal outcome sticks.
    pub fn resolve(&mut self, outcome: ReviewState) -> bool {
        if self.state.is_terminal() || !outcome.is_terminal() {
            return false;
        }
        self.state = outcome;
        true
    }
}

/// What happens to submissions that arrive while the store is not ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutagePolicy {
    /// Discard them.
    #[default]
    Drop,
    /// Hold up to `capacity` in memory until the store comes up. Lost on restart.
    Queue { capacity: usize },
}

pub struct ApprovalPipeline {
    platform: Arc<dyn ChatPlatform>,
    store: StoreHandle,
    intake_channel: ChannelId,
    moderation_channel: ChannelId,
    review_window: Duration,
    policy: OutagePolicy,
    backlog: Mutex<VecDeque<Submission>>,
}

impl ApprovalPipeline {
    pub fn new(platform: Arc<dyn ChatPlatform>, store: StoreHandle, intake_channel: ChannelId) -> Self {
        Self {
            platform,
            store,
            intake_channel,
            moderation_channel: MODERATION_CHANNEL_ID,
            review_window: REVIEW_WINDOW,
            policy: OutagePolicy::Drop,
            backlog: Mutex::new(VecDeque::new()),
        }
    }

    #[must_use]
    pub fn with_moderation_channel(mut self, channel_id: ChannelId) -> Self {
        self.moderation_channel = channel_id;
        self
    }

    #[must_use]
    pub fn with_review_window(mut self, window: Duration) -> Self {
        self.review_window = window;
        self
    }

    #[must_use]
    pub fn with_outage_policy(mut self, policy: OutagePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Start an independent review for every image attached to an intake
    /// message. Anything else is ignored without creating state.
    pub async fn handle_message(self: &Arc<Self>, message: &Message) -> Vec<JoinHandle<Option<ReviewState>>> {
        if message.channel_id != self.intake_channel {
            return Vec::new();
        }

        let submissions: Vec<Submission> = message
            .image_attachments()
            .map(|attachment| Submission::new(&attachment.url, message))
            .collect();
        if submissions.is_empty() {
            return Vec::new();
        }

        let ready = if self.store.is_ready() {
            submissions
        } else {
            self.hold(submissions).await
        };

        ready.into_iter().map(|s| self.spawn_review(s)).collect()
    }

    /// Apply the outage policy. Returns whatever can go ahead right away.
    async fn hold(&self, submissions: Vec<Submission>) -> Vec<Submission> {
        let capacity = match self.policy {
            OutagePolicy::Drop => {
                info!(count = submissions.len(), "Store not ready, dropping submissions");
                return Vec::new();
            }
            OutagePolicy::Queue { capacity } => capacity,
        };

        let mut backlog = self.backlog.lock().await;

        // The drain runs under this lock once the store is up, so a submission
        // either lands before it or sees the store ready here.
        if self.store.is_ready() {
            return submissions;
        }

        for submission in submissions {
            if backlog.len() >= capacity {
                warn!(url = %submission.url, capacity, "Outage queue full, dropping submission");
            } else {
                debug!(url = %submission.url, "Queued submission until the store is ready");
                backlog.push_back(submission);
            }
        }
        Vec::new()
    }

    /// Release queued submissions once the store connects. Returns at once
    /// under [`OutagePolicy::Drop`].
    pub async fn run_outage_drain(self: Arc<Self>) {
        if self.policy == OutagePolicy::Drop {
            return;
        }

        if self.store.wait_ready().await.is_none() {
            warn!("Store never became ready, queued submissions are lost");
            return;
        }

        let queued: Vec<Submission> = self.backlog.lock().await.drain(..).collect();
        if !queued.is_empty() {
            info!(count = queued.len(), "Store ready, releasing queued submissions");
        }
        for submission in queued {
            self.spawn_review(submission);
        }
    }

    fn spawn_review(self: &Arc<Self>, submission: Submission) -> JoinHandle<Option<ReviewState>> {
        let pipeline = Arc::clone(self);
        tokio::spawn(async move {
            let id = submission.id;
            match pipeline.review(submission).await {
                Ok(state) => Some(state),
                Err(e) => {
                    error!(submission = %id, "Review abandoned: {:#}", e);
                    None
                }
            }
        })
    }

    async fn review(&self, submission: Submission) -> Result<ReviewState> {
        // Subscribe before the prompt exists so no early reaction is missed.
        let mut events = self.platform.subscribe();

        let prompt = self
            .platform
            .send_message(self.moderation_channel, &prompt_text(&submission.url))
            .await
            .context("posting review prompt")?;
        let mut review = Review::new(prompt, Instant::now() + self.review_window);

        for marker in [APPROVE, REJECT] {
            self.platform
                .add_reaction(prompt, marker)
                .await
                .with_context(|| format!("adding {marker} marker"))?;
        }

        info!(
            submission = %submission.id,
            submitter = %submission.submitter.tag(),
            url = %submission.url,
            "Awaiting moderation"
        );

        let bot_id = self.platform.bot_user_id().await;
        let outcome = timeout_at(review.deadline, first_verdict(&mut events, prompt, bot_id))
            .await
            .unwrap_or(ReviewState::Expired);
        review.resolve(outcome);

        if let Err(e) = self.conclude(&submission, &review).await {
            error!(submission = %submission.id, "Failed to finish review: {:#}", e);
        }
        Ok(review.state)
    }

    async fn conclude(&self, submission: &Submission, review: &Review) -> Result<()> {
        let notice = match review.state() {
            ReviewState::Approved { by } => {
                let db = self
                    .store
                    .store()
                    .context("store unavailable while saving approved image")?;
                let url = submission.url.clone();
                let row = tokio::task::spawn_blocking(move || db.create_image(&url)).await??;
                info!(id = row.id, approver = %by.tag(), url = %row.url, "Image approved and saved");
                format!("{APPROVE} Approved by {}. Image saved!", by.username)
            }
            ReviewState::Rejected { by } => {
                info!(rejecter = %by.tag(), url = %submission.url, "Image rejected");
                format!("{REJECT} Rejected by {}. Image not saved.", by.username)
            }
            ReviewState::Expired => {
                info!(url = %submission.url, "Review window lapsed");
                "⏱️ Approval time expired. Image not saved.".to_string()
            }
            ReviewState::Pending => return Ok(()),
        };

        self.platform
            .reply(review.prompt, &notice)
            .await
            .context("posting review outcome")?;
        Ok(())
    }
}

fn prompt_text(url: &str) -> String {
    format!("🖼️ Awaiting approval for image:\n{CRITERIA}\n{url}")
}

/// The outcome a reaction stands for, if it counts toward this prompt.
fn verdict(reaction: &Reaction, prompt: MessageRef, bot_id: Option<UserId>) -> Option<ReviewState> {
    if reaction.message != prompt || reaction.user.bot || Some(reaction.user.id) == bot_id {
        return None;
    }
    let by = reaction.user.clone();
    match reaction.emoji.as_str() {
        APPROVE => Some(ReviewState::Approved { by }),
        REJECT => Some(ReviewState::Rejected { by }),
        _ => None,
    }
}

async fn first_verdict(
    events: &mut broadcast::Receiver<PlatformEvent>,
    prompt: MessageRef,
    bot_id: Option<UserId>,
) -> ReviewState {
    loop {
        match events.recv().await {
            Ok(PlatformEvent::ReactionAdd(reaction)) => {
                if let Some(outcome) = verdict(&reaction, prompt, bot_id) {
                    return outcome;
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, prompt = %prompt.message_id, "Review fell behind the event stream");
            }
            // Nothing more will arrive; let the deadline decide.
            Err(RecvError::Closed) => return std::future::pending().await,
        }
    }
}
