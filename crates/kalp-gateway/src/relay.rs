use std::sync::Arc;

use chrono::{DateTime, Datelike, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use kalp_db::Database;
use kalp_db::convert::timestamp;
use kalp_db::models::{MessageRow, NewMessage};
use kalp_provider::{GenerateOptions, ModelClient, ProviderError};
use kalp_types::api::SendResponse;
use kalp_types::models::{Role, Usage};

use crate::context;

const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Message cannot be empty")]
    EmptyPrompt,

    #[error("Monthly message limit reached")]
    LimitReached,

    #[error("Access denied to session")]
    SessionForbidden,

    #[error("AI service error: {0}")]
    Provider(#[from] ProviderError),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

impl RelayError {
    /// Text safe to show to the client. Storage failures stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Self::Storage(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// One prompt from a user, addressed to a session.
#[derive(Debug, Clone)]
pub struct Turn {
    pub user_id: Uuid,
    pub session_id: String,
    pub prompt: String,
    pub options: GenerateOptions,
}

/// Relays prompts to the model and keeps the session transcript.
pub struct Relay {
    db: Arc<Database>,
    model: ModelClient,
    context_messages: usize,
    monthly_limit: Option<u64>,
}

impl Relay {
    pub fn new(
        db: Arc<Database>,
        model: ModelClient,
        context_messages: usize,
        monthly_limit: Option<u64>,
    ) -> Self {
        Self {
            db,
            model,
            context_messages,
            monthly_limit,
        }
    }

    pub fn model(&self) -> &ModelClient {
        &self.model
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    /// `Ok(true)` if the session exists and is owned by `user_id`, `Ok(false)`
    /// if it does not exist yet.
    pub async fn check_access(&self, user_id: Uuid, session_id: &str) -> Result<bool, RelayError> {
        let sid = session_id.to_string();
        let session = self.blocking(move |db| db.get_session(&sid)).await?;
        match session {
            Some(row) if row.user_id == user_id.to_string() => Ok(true),
            Some(_) => Err(RelayError::SessionForbidden),
            None => Ok(false),
        }
    }

    /// Everything that can reject a turn before the model is involved.
    pub async fn preflight(&self, turn: &Turn) -> Result<bool, RelayError> {
        if turn.prompt.trim().is_empty() {
            return Err(RelayError::EmptyPrompt);
        }

        let exists = self.check_access(turn.user_id, &turn.session_id).await?;

        if let Some(limit) = self.monthly_limit {
            if self.prompts_this_month(turn.user_id).await? >= limit {
                return Err(RelayError::LimitReached);
            }
        }

        Ok(exists)
    }

    /// Run one chat turn: store the prompt, ask the model with recent context,
    /// store the reply. A provider failure is stored as an error reply.
    pub async fn run_turn(&self, turn: Turn) -> Result<SendResponse, RelayError> {
        let exists = self.preflight(&turn).await?;
        let prompt = turn.prompt.trim().to_string();
        let uid = turn.user_id.to_string();

        if !exists {
            let title = session_title(&prompt);
            let (sid, owner) = (turn.session_id.clone(), uid.clone());
            self.blocking(move |db| db.create_session(&sid, &owner, &title)).await?;
            info!("Created session {} for {}", turn.session_id, turn.user_id);
        }

        let (sid, limit) = (turn.session_id.clone(), self.context_messages);
        let history: Vec<_> = self
            .blocking(move |db| db.recent_messages(&sid, limit))
            .await?
            .iter()
            .map(MessageRow::to_message)
            .collect();

        self.append(&turn.session_id, &uid, Role::User, &prompt, false, None).await?;

        let ctx = context::summarize(&history);
        let model_prompt = context::build_prompt(&history, &prompt);

        let completion = match self.model.complete(&model_prompt, turn.options).await {
            Ok(c) => c,
            Err(e) => {
                warn!("Model call failed for session {}: {}", turn.session_id, e);
                let err = RelayError::Provider(e);
                self.append(&turn.session_id, &uid, Role::Ai, &err.public_message(), true, None)
                    .await?;
                return Err(err);
            }
        };

        let ctx_json = serde_json::to_string(&ctx).map_err(anyhow::Error::from)?;
        self.append(&turn.session_id, &uid, Role::Ai, &completion.text, false, Some(ctx_json))
            .await?;

        Ok(SendResponse {
            success: true,
            message: completion.text,
            session_id: turn.session_id,
            context: ctx,
            usage: Usage {
                messages_this_month: self.prompts_this_month(turn.user_id).await?,
                prompt_tokens: completion.prompt_tokens,
                completion_tokens: completion.completion_tokens,
            },
        })
    }

    async fn prompts_this_month(&self, user_id: Uuid) -> Result<u64, RelayError> {
        let since = timestamp(month_start(Utc::now()));
        let uid = user_id.to_string();
        self.blocking(move |db| db.count_user_prompts_since(&uid, &since)).await
    }

    async fn append(
        &self,
        session_id: &str,
        user_id: &str,
        role: Role,
        content: &str,
        is_error: bool,
        context: Option<String>,
    ) -> Result<(), RelayError> {
        let (sid, uid, content) = (session_id.to_string(), user_id.to_string(), content.to_string());
        self.blocking(move |db| {
            db.append_message(&NewMessage {
                session_id: &sid,
                user_id: &uid,
                role: role.as_str(),
                content: &content,
                is_error,
                context: context.as_deref(),
            })
            .map(|_| ())
        })
        .await
    }

    /// Run a DB call off the async runtime.
    async fn blocking<F, T>(&self, f: F) -> Result<T, RelayError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                anyhow::anyhow!("blocking task failed: {}", e)
            })?
            .map_err(RelayError::Storage)
    }
}

fn session_title(prompt: &str) -> String {
    let title: String = prompt.chars().take(TITLE_MAX_CHARS).collect();
    if title.trim().is_empty() {
        "New Conversation".to_string()
    } else {
        title
    }
}

/// Midnight UTC on the first day of `now`'s month.
fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now.date_naive()
        .with_day(1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|ndt| ndt.and_utc())
        .unwrap_or(now)
}
