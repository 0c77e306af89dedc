use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Local bookkeeping for a remote conversation thread. Immutable once
/// created; only used to list a user's past conversations. The message
/// history itself lives on the remote thread and is never stored here.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ChatThread {
    pub id: Uuid,
    pub user_id: Uuid,
    pub thread_id: String,
    pub created_at: DateTime<Utc>,
}

/// A message reconstructed live from the remote thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub message: String,
    pub sender: MessageSender,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageSender {
    User,
    Bot,
}
