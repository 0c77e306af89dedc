use axum::{extract::State, Extension, Json};
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::dto::CreateMeditationRequest;
use crate::error::{AppError, AppResult};
use crate::models::meditation::Meditation;
use crate::AppState;

pub async fn list_meditations(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<Vec<Meditation>>> {
    let meditations = sqlx::query_as::<_, Meditation>(
        "SELECT * FROM meditations WHERE user_id = $1 ORDER BY started_at DESC",
    )
    .bind(auth_user.id)
    .fetch_all(&state.db)
    .await?;

    Ok(Json(meditations))
}

pub async fn create_meditation(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<CreateMeditationRequest>,
) -> AppResult<Json<Meditation>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    body.validate_times().map_err(AppError::Validation)?;

    let meditation = sqlx::query_as::<_, Meditation>(
        r#"
        INSERT INTO meditations (id, user_id, session_type, started_at, completed_at)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(auth_user.id)
    .bind(&body.session_type)
    .bind(body.started_at)
    .bind(body.completed_at)
    .fetch_one(&state.db)
    .await?;

    tracing::debug!(
        user_id = %auth_user.id,
        session_type = %meditation.session_type,
        "Meditation session logged"
    );

    Ok(Json(meditation))
}
