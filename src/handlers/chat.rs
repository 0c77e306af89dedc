use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::dto::{RunStatusQuery, RunStatusResponse, SendMessageRequest, ThreadMessagesResponse};
use crate::error::{AppError, AppResult};
use crate::models::chat::ChatThread;
use crate::services::chat::{ChatReply, ChatSession};
use crate::AppState;

/// Send one chat message and wait for the assistant's reply. The response
/// carries the thread id so a client that started without one can keep the
/// conversation going.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<SendMessageRequest>,
) -> AppResult<Json<ChatReply>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let mut session = match body.thread_id.as_deref() {
        Some(thread_id) => state.chat.resume(auth_user.id, thread_id).await?,
        None => ChatSession::new(auth_user.id),
    };

    let reply = state.chat.send_message(&mut session, &body.message).await?;

    Ok(Json(reply))
}

pub async fn list_threads(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Vec<ChatThread>>> {
    let threads = sqlx::query_as::<_, ChatThread>(
        "SELECT * FROM chat_threads WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(auth_user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(threads))
}

/// Full transcript of one past conversation, rebuilt from the assistant
/// service rather than local state.
pub async fn thread_messages(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(thread_id): Path<String>,
) -> AppResult<Json<ThreadMessagesResponse>> {
    let session = state.chat.select_thread(auth_user.id, &thread_id).await?;

    Ok(Json(ThreadMessagesResponse {
        thread_id,
        messages: session.history,
    }))
}

/// One-off status probe for a run, for clients that poll on their own
/// instead of holding the send request open.
pub async fn run_status(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(run_id): Path<String>,
    Query(query): Query<RunStatusQuery>,
) -> AppResult<Json<RunStatusResponse>> {
    let poll = state
        .chat
        .run_status(auth_user.id, &query.thread_id, &run_id)
        .await?;

    Ok(Json(RunStatusResponse {
        status: poll.status,
        message: poll.reply,
    }))
}
