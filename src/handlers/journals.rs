use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::dto::{CreateJournalRequest, DeleteResponse, UpdateJournalRequest};
use crate::error::{AppError, AppResult};
use crate::models::journal::Journal;
use crate::AppState;

pub async fn list_journals(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Vec<Journal>>> {
    let journals = sqlx::query_as::<_, Journal>(
        "SELECT * FROM journals WHERE user_id = $1 ORDER BY created_at DESC",
    )
    .bind(auth_user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(journals))
}

pub async fn get_journal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(journal_id): Path<Uuid>,
) -> AppResult<Json<Journal>> {
    let journal = sqlx::query_as::<_, Journal>(
        "SELECT * FROM journals WHERE id = $1 AND user_id = $2",
    )
    .bind(journal_id)
    .bind(auth_user.id)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("Journal not found".into()))?;

    Ok(Json(journal))
}

pub async fn create_journal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<CreateJournalRequest>,
) -> AppResult<Json<Journal>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let journal = sqlx::query_as::<_, Journal>(
        r#"
        INSERT INTO journals (id, user_id, title, description)
        VALUES ($1, $2, $3, $4)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth_user.id)
    .bind(&body.title)
    .bind(&body.description)
    .fetch_one(&state.db)
    .await?;

    tracing::debug!(user_id = %auth_user.id, journal_id = %journal.id, "Journal created");

    Ok(Json(journal))
}

pub async fn update_journal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(journal_id): Path<Uuid>,
    Json(body): Json<UpdateJournalRequest>,
) -> AppResult<Json<Journal>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    body.validate_any_field().map_err(AppError::Validation)?;

    let journal = sqlx::query_as::<_, Journal>(
        r#"
        UPDATE journals SET
            title = COALESCE($3, title),
            description = COALESCE($4, description),
            updated_at = NOW()
        WHERE id = $1 AND user_id = $2
        RETURNING *
        "#,
    )
    .bind(journal_id)
    .bind(auth_user.id)
    .bind(&body.title)
    .bind(&body.description)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::NotFound("Journal not found".into()))?;

    Ok(Json(journal))
}

pub async fn delete_journal(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(journal_id): Path<Uuid>,
) -> AppResult<Json<DeleteResponse>> {
    let result = sqlx::query("DELETE FROM journals WHERE id = $1 AND user_id = $2")
        .bind(journal_id)
        .bind(auth_user.id)
        .execute(&state.db)
        .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound("Journal not found".into()));
    }

    Ok(Json(DeleteResponse {
        deleted: true,
        id: journal_id,
    }))
}
