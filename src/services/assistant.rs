use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::Method;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::AssistantError;
use crate::models::chat::{ChatMessage, MessageSender};

/// Run lifecycle as the rest of the app sees it. The remote service has more
/// states than these; every terminal state other than `completed` (failed,
/// cancelled, expired, incomplete) collapses to `Failed`, and every
/// non-terminal state other than `queued` collapses to `InProgress`.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn from_remote(status: &str) -> Self {
        match status {
            "completed" => Self::Completed,
            "queued" => Self::Queued,
            "failed" | "cancelled" | "expired" | "incomplete" => Self::Failed,
            _ => Self::InProgress,
        }
    }
}

/// One poll of a run. `reply` is only present when the run completed and an
/// assistant message for it exists on the thread.
#[derive(Debug, Clone)]
pub struct RunPoll {
    pub status: RunStatus,
    pub reply: Option<String>,
}

/// The remote conversation service, reduced to the five calls the app makes.
/// Production uses [`OpenAiAssistant`]; orchestrator tests swap in a scripted
/// implementation.
pub trait AssistantApi {
    async fn create_thread(&self) -> Result<String, AssistantError>;
    async fn post_user_message(&self, thread_id: &str, content: &str)
        -> Result<(), AssistantError>;
    async fn start_run(&self, thread_id: &str) -> Result<String, AssistantError>;
    async fn poll_run(&self, thread_id: &str, run_id: &str) -> Result<RunPoll, AssistantError>;
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, AssistantError>;
}

// Wire types for the Assistants v2 API. Unknown fields are ignored.

#[derive(Debug, Deserialize)]
struct ThreadObject {
    id: String,
}

#[derive(Debug, Deserialize)]
struct RunObject {
    id: String,
    status: String,
}

#[derive(Debug, Deserialize)]
struct MessageList {
    data: Vec<MessageObject>,
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Deserialize)]
struct MessageObject {
    id: String,
    role: String,
    #[serde(default)]
    run_id: Option<String>,
    created_at: i64,
    content: Vec<ContentPart>,
}

#[derive(Debug, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: Option<TextFragment>,
}

#[derive(Debug, Deserialize)]
struct TextFragment {
    value: String,
}

pub struct OpenAiAssistant {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    assistant_id: String,
}

impl OpenAiAssistant {
    pub fn new(config: &Config) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            client,
            base_url: config.openai_base_url.trim_end_matches('/').to_string(),
            api_key: config.openai_api_key.clone(),
            assistant_id: config.openai_assistant_id.clone(),
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .header("OpenAI-Beta", "assistants=v2")
    }

    async fn send(
        &self,
        builder: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, AssistantError> {
        let response = builder.send().await.map_err(|e| {
            tracing::warn!(error = %e, "Assistant service unreachable");
            AssistantError::RemoteUnavailable
        })?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AssistantError::InvalidThread);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = %status, body = %body, "Assistant service error");
            return Err(AssistantError::RemoteUnavailable);
        }

        Ok(response)
    }
}

async fn decode<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, AssistantError> {
    response.json().await.map_err(|e| {
        tracing::warn!(error = %e, "Malformed assistant service response");
        AssistantError::RemoteUnavailable
    })
}

impl AssistantApi for OpenAiAssistant {
    async fn create_thread(&self) -> Result<String, AssistantError> {
        let builder = self
            .request(Method::POST, "/threads")
            .json(&serde_json::json!({}));

        let thread: ThreadObject = decode(self.send(builder).await?).await?;
        tracing::info!(thread_id = %thread.id, "Created assistant thread");
        Ok(thread.id)
    }

    async fn post_user_message(
        &self,
        thread_id: &str,
        content: &str,
    ) -> Result<(), AssistantError> {
        let builder = self
            .request(Method::POST, &format!("/threads/{}/messages", thread_id))
            .json(&serde_json::json!({ "role": "user", "content": content }));

        self.send(builder).await?;
        Ok(())
    }

    async fn start_run(&self, thread_id: &str) -> Result<String, AssistantError> {
        let builder = self
            .request(Method::POST, &format!("/threads/{}/runs", thread_id))
            .json(&serde_json::json!({ "assistant_id": self.assistant_id }));

        let run: RunObject = decode(self.send(builder).await?).await?;
        tracing::debug!(thread_id = %thread_id, run_id = %run.id, "Started assistant run");
        Ok(run.id)
    }

    async fn poll_run(&self, thread_id: &str, run_id: &str) -> Result<RunPoll, AssistantError> {
        let builder = self.request(
            Method::GET,
            &format!("/threads/{}/runs/{}", thread_id, run_id),
        );
        let run: RunObject = decode(self.send(builder).await?).await?;
        let status = RunStatus::from_remote(&run.status);

        if status != RunStatus::Completed {
            return Ok(RunPoll {
                status,
                reply: None,
            });
        }

        // Service lists newest first, so the first match is the freshest
        // assistant message produced by this run.
        let builder = self.request(Method::GET, &format!("/threads/{}/messages", thread_id));
        let list: MessageList = decode(self.send(builder).await?).await?;

        Ok(RunPoll {
            status,
            reply: find_reply(&list, run_id),
        })
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ChatMessage>, AssistantError> {
        // The service pages at 100 messages; follow the `after` cursor so a
        // long conversation is reconstructed in full, not cut at one page.
        let mut messages = Vec::new();
        let mut after: Option<String> = None;

        loop {
            let mut path = format!("/threads/{}/messages?order=asc&limit=100", thread_id);
            if let Some(cursor) = &after {
                path.push_str("&after=");
                path.push_str(cursor);
            }

            let builder = self.request(Method::GET, &path);
            let list: MessageList = decode(self.send(builder).await?).await?;
            messages.extend(list.data.iter().map(to_chat_message));

            match next_page_cursor(&list) {
                Some(cursor) => after = Some(cursor.to_string()),
                None => break,
            }
        }

        Ok(messages)
    }
}

/// Cursor for the next page of a message listing: the id of the last item,
/// but only while the service reports more pages. An empty page yields no
/// cursor regardless of `has_more`, so the loop always terminates.
fn next_page_cursor(list: &MessageList) -> Option<&str> {
    if !list.has_more {
        return None;
    }
    list.data.last().map(|m| m.id.as_str())
}

fn find_reply(list: &MessageList, run_id: &str) -> Option<String> {
    list.data
        .iter()
        .find(|m| m.role == "assistant" && m.run_id.as_deref() == Some(run_id))
        .map(message_text)
}

/// Join the text fragments of one message with newlines, skipping non-text
/// parts (e.g. images).
fn message_text(msg: &MessageObject) -> String {
    msg.content
        .iter()
        .filter_map(|part| part.text.as_ref().map(|t| t.value.as_str()))
        .collect::<Vec<_>>()
        .join("\n")
}

fn to_chat_message(msg: &MessageObject) -> ChatMessage {
    let sender = if msg.role == "user" {
        MessageSender::User
    } else {
        MessageSender::Bot
    };

    ChatMessage {
        message: message_text(msg),
        sender,
        created_at: DateTime::from_timestamp(msg.created_at, 0).unwrap_or(DateTime::<Utc>::MIN_UTC),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_normalization_covers_remote_states() {
        assert_eq!(RunStatus::from_remote("completed"), RunStatus::Completed);
        assert_eq!(RunStatus::from_remote("queued"), RunStatus::Queued);

        for s in ["failed", "cancelled", "expired", "incomplete"] {
            assert_eq!(RunStatus::from_remote(s), RunStatus::Failed, "{}", s);
        }
        for s in ["in_progress", "requires_action", "cancelling", "something_new"] {
            assert_eq!(RunStatus::from_remote(s), RunStatus::InProgress, "{}", s);
        }
    }

    #[test]
    fn status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_string(&RunStatus::InProgress).unwrap(),
            "\"in_progress\""
        );
    }

    fn fixture() -> MessageList {
        serde_json::from_value(serde_json::json!({
            "data": [
                {
                    "id": "msg_3", "role": "assistant", "run_id": "run_2", "created_at": 1700000030,
                    "content": [{"type": "text", "text": {"value": "newer reply"}}]
                },
                {
                    "id": "msg_2", "role": "assistant", "run_id": "run_1", "created_at": 1700000020,
                    "content": [
                        {"type": "text", "text": {"value": "part one"}},
                        {"type": "image_file", "image_file": {"file_id": "file_1"}},
                        {"type": "text", "text": {"value": "part two"}}
                    ]
                },
                {
                    "id": "msg_1", "role": "user", "run_id": null, "created_at": 1700000010,
                    "content": [{"type": "text", "text": {"value": "hi there"}}]
                }
            ],
            "has_more": false
        }))
        .unwrap()
    }

    #[test]
    fn reply_joins_text_fragments_for_the_matching_run() {
        let list = fixture();

        assert_eq!(find_reply(&list, "run_1").unwrap(), "part one\npart two");
        assert_eq!(find_reply(&list, "run_2").unwrap(), "newer reply");
        assert!(find_reply(&list, "run_missing").is_none());
    }

    #[test]
    fn full_pages_yield_a_cursor_for_the_next_fetch() {
        let page: MessageList = serde_json::from_value(serde_json::json!({
            "data": [
                {
                    "id": "msg_100", "role": "user", "run_id": null, "created_at": 1700000000,
                    "content": [{"type": "text", "text": {"value": "turn 100"}}]
                },
                {
                    "id": "msg_101", "role": "assistant", "run_id": "run_50", "created_at": 1700000001,
                    "content": [{"type": "text", "text": {"value": "reply 50"}}]
                }
            ],
            "has_more": true
        }))
        .unwrap();

        // A conversation longer than one page keeps paging from the last id.
        assert_eq!(next_page_cursor(&page), Some("msg_101"));
    }

    #[test]
    fn final_page_yields_no_cursor() {
        assert_eq!(next_page_cursor(&fixture()), None);

        // has_more without items must not loop forever
        let empty: MessageList =
            serde_json::from_value(serde_json::json!({ "data": [], "has_more": true })).unwrap();
        assert_eq!(next_page_cursor(&empty), None);
    }

    #[test]
    fn has_more_defaults_to_false_when_omitted() {
        let page: MessageList =
            serde_json::from_value(serde_json::json!({ "data": [] })).unwrap();
        assert_eq!(next_page_cursor(&page), None);
    }

    #[test]
    fn messages_map_roles_and_timestamps() {
        let list = fixture();
        let messages: Vec<ChatMessage> = list.data.iter().map(to_chat_message).collect();

        assert_eq!(messages[0].sender, MessageSender::Bot);
        assert_eq!(messages[2].sender, MessageSender::User);
        assert_eq!(messages[2].message, "hi there");
        assert_eq!(
            messages[2].created_at,
            DateTime::from_timestamp(1700000010, 0).unwrap()
        );
    }
}
