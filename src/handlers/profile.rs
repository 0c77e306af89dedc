use axum::{extract::State, Extension, Json};
use uuid::Uuid;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::dto::{QuestionnaireRequest, UpdateProfileRequest};
use crate::error::{AppError, AppResult};
use crate::models::user::{FullProfile, ProfileItem, ProfileItemKind, UserProfile};
use crate::AppState;

async fn fetch_full_profile(db: &sqlx::PgPool, user_id: Uuid) -> AppResult<FullProfile> {
    let user = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE id = $1")
        .bind(user_id)
        .fetch_optional(db)
        .await?
        .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    let items = sqlx::query_as::<_, ProfileItem>(
        "SELECT * FROM profile_items WHERE user_id = $1 ORDER BY kind, position",
    )
    .bind(user_id)
    .fetch_all(db)
    .await?;

    Ok(FullProfile::assemble(user, items))
}

// ── GET /api/profile ─────────────────────────────────────────────────────────

pub async fn get_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<FullProfile>> {
    let profile = fetch_full_profile(&state.db, auth_user.id).await?;
    Ok(Json(profile))
}

// ── PUT /api/profile ─────────────────────────────────────────────────────────

pub async fn update_profile(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<UpdateProfileRequest>,
) -> AppResult<Json<FullProfile>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    body.validate_lists().map_err(AppError::Validation)?;

    let username_taken = sqlx::query_scalar::<_, bool>(
        "SELECT EXISTS(SELECT 1 FROM user_profiles WHERE username = $1 AND id <> $2)",
    )
    .bind(&body.username)
    .bind(auth_user.id)
    .fetch_one(&state.db)
    .await?;
    if username_taken {
        return Err(AppError::Conflict("Username already taken".into()));
    }

    // Display fields and list replacement commit together or not at all.
    let mut tx = state.db.begin().await?;

    let updated = sqlx::query(
        r#"
        UPDATE user_profiles SET
            name = $2, username = $3, profile_picture = $4, description = $5,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(auth_user.id)
    .bind(&body.name)
    .bind(&body.username)
    .bind(&body.profile_picture)
    .bind(&body.description)
    .execute(&mut *tx)
    .await?;

    if updated.rows_affected() == 0 {
        return Err(AppError::NotFound("User not found".into()));
    }

    sqlx::query("DELETE FROM profile_items WHERE user_id = $1")
        .bind(auth_user.id)
        .execute(&mut *tx)
        .await?;

    for (kind, items) in [
        (ProfileItemKind::Loves, &body.loves),
        (ProfileItemKind::Struggles, &body.struggles),
        (ProfileItemKind::Activities, &body.activities),
        (ProfileItemKind::FunFacts, &body.fun_facts),
    ] {
        for (position, content) in items.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO profile_items (id, user_id, kind, content, position)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(auth_user.id)
            .bind(kind)
            .bind(content)
            .bind(position as i32)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;

    let profile = fetch_full_profile(&state.db, auth_user.id).await?;
    Ok(Json(profile))
}

// ── POST /api/profile/questionnaire ──────────────────────────────────────────

pub async fn submit_questionnaire(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(body): Json<QuestionnaireRequest>,
) -> AppResult<Json<UserProfile>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let user = sqlx::query_as::<_, UserProfile>(
        r#"
        UPDATE user_profiles SET
            meditation = $2, journaling = $3, meals = $4, sleep = $5, exercise = $6,
            questionnaire_complete = true,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(auth_user.id)
    .bind(&body.meditation)
    .bind(&body.journaling)
    .bind(&body.meals)
    .bind(&body.sleep)
    .bind(&body.exercise)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| AppError::NotFound("User not found".into()))?;

    Ok(Json(user))
}
