use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::auth::middleware::AuthUser;
use crate::error::{AppError, AppResult};
use crate::models::task::{DailyTask, ToggleTaskRequest};
use crate::AppState;

/// Inserts today's row for the user, or returns None when it already exists.
/// The UNIQUE (user_id, task_date) constraint makes concurrent creates safe.
async fn insert_today(db: &sqlx::PgPool, user_id: Uuid) -> AppResult<Option<DailyTask>> {
    let task = sqlx::query_as::<_, DailyTask>(
        r#"
        INSERT INTO daily_tasks (id, user_id, task_date)
        VALUES ($1, $2, CURRENT_DATE)
        ON CONFLICT (user_id, task_date) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .fetch_optional(db)
    .await?;

    Ok(task)
}

async fn fetch_all_tasks(db: &sqlx::PgPool, user_id: Uuid) -> AppResult<Vec<DailyTask>> {
    let tasks = sqlx::query_as::<_, DailyTask>(
        "SELECT * FROM daily_tasks WHERE user_id = $1 ORDER BY task_date ASC",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    Ok(tasks)
}

pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Vec<DailyTask>>> {
    let tasks = fetch_all_tasks(&state.db, auth_user.id).await?;
    if !tasks.is_empty() {
        return Ok(Json(tasks));
    }

    // First fetch ever for this user: seed today's row so the client always
    // has something to toggle.
    match insert_today(&state.db, auth_user.id).await? {
        Some(task) => Ok(Json(vec![task])),
        // Lost a race with another first fetch; the row exists now.
        None => Ok(Json(fetch_all_tasks(&state.db, auth_user.id).await?)),
    }
}

pub async fn create_today(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<DailyTask>> {
    let task = insert_today(&state.db, auth_user.id)
        .await?
        .ok_or(AppError::Conflict("Task for today already exists".into()))?;

    tracing::debug!(user_id = %auth_user.id, task_date = %task.task_date, "Created daily task row");

    Ok(Json(task))
}

pub async fn toggle_task(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(task_id): Path<Uuid>,
    Json(body): Json<ToggleTaskRequest>,
) -> AppResult<Json<DailyTask>> {
    // Column name comes from the TaskField enum, never from raw input.
    let column = body.field.column();
    let query = format!(
        "UPDATE daily_tasks SET {column} = NOT {column}, updated_at = NOW() \
         WHERE id = $1 AND user_id = $2 RETURNING *"
    );

    let task = sqlx::query_as::<_, DailyTask>(&query)
        .bind(task_id)
        .bind(auth_user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("Task not found".into()))?;

    // Broadcast via WebSocket
    if let Some(tx) = state.ws_tx.as_ref() {
        let msg = serde_json::json!({
            "type": "task_toggled",
            "user_id": auth_user.id,
            "task_id": task.id,
            "field": body.field,
            "completed": body.field.get(&task),
        });
        let _ = tx.send(msg.to_string());
    }

    Ok(Json(task))
}
