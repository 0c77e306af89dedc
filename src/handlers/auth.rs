use axum::{extract::State, Extension, Json};
use chrono::{Duration, Utc};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{
    jwt::{create_token_pair, hash_token, verify_token, TokenPair, TokenType},
    middleware::AuthUser,
    password::{hash_password, verify_password},
};
use crate::dto::{AuthResponse, LoginRequest, MessageResponse, RefreshRequest, SignupRequest};
use crate::error::{AppError, AppResult};
use crate::models::user::UserProfile;
use crate::AppState;

/// Mint a token pair and persist the refresh token's hash. `rotated_from`
/// links a rotation to the token it replaced.
async fn issue_tokens(
    state: &AppState,
    user: &UserProfile,
    rotated_from: Option<Uuid>,
) -> AppResult<TokenPair> {
    let pair = create_token_pair(user.id, &user.email, &state.config)?;

    sqlx::query(
        r#"
        INSERT INTO refresh_tokens (id, user_id, token_hash, expires_at, parent_token_id)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user.id)
    .bind(hash_token(&pair.refresh_token))
    .bind(Utc::now() + Duration::seconds(state.config.jwt_refresh_ttl_secs))
    .bind(rotated_from)
    .execute(&state.db)
    .await?;

    Ok(pair)
}

async fn revoke_active_tokens(db: &sqlx::PgPool, user_id: Uuid) -> AppResult<()> {
    sqlx::query(
        "UPDATE refresh_tokens SET revoked = true, revoked_at = NOW() \
         WHERE user_id = $1 AND revoked = false",
    )
    .bind(user_id)
    .execute(db)
    .await?;
    Ok(())
}

fn auth_response(tokens: TokenPair, user: &UserProfile) -> AuthResponse {
    AuthResponse {
        access_token: tokens.access_token,
        refresh_token: tokens.refresh_token,
        expires_in: tokens.expires_in,
        user: user.into(),
    }
}

pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> AppResult<Json<AuthResponse>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    let (email_taken, username_taken) = sqlx::query_as::<_, (bool, bool)>(
        r#"
        SELECT
            EXISTS(SELECT 1 FROM user_profiles WHERE email = $1),
            EXISTS(SELECT 1 FROM user_profiles WHERE username = $2)
        "#,
    )
    .bind(&body.email)
    .bind(&body.username)
    .fetch_one(&state.db)
    .await?;

    if email_taken {
        return Err(AppError::Conflict("Email already registered".into()));
    }
    if username_taken {
        return Err(AppError::Conflict("Username already taken".into()));
    }

    let user = sqlx::query_as::<_, UserProfile>(
        r#"
        INSERT INTO user_profiles (id, name, email, username, password_hash)
        VALUES ($1, $2, $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(&body.name)
    .bind(&body.email)
    .bind(&body.username)
    .bind(hash_password(&body.password)?)
    .fetch_one(&state.db)
    .await?;

    tracing::info!(user_id = %user.id, "New signup");

    let tokens = issue_tokens(&state, &user, None).await?;
    Ok(Json(auth_response(tokens, &user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    body.validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;

    // The identifier matches either the email or the username.
    let user = sqlx::query_as::<_, UserProfile>(
        "SELECT * FROM user_profiles WHERE email = $1 OR username = $1",
    )
    .bind(&body.identifier)
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::Unauthorized)?;

    if !verify_password(&body.password, &user.password_hash)? {
        return Err(AppError::Unauthorized);
    }

    let tokens = issue_tokens(&state, &user, None).await?;
    Ok(Json(auth_response(tokens, &user)))
}

pub async fn refresh(
    State(state): State<AppState>,
    Json(body): Json<RefreshRequest>,
) -> AppResult<Json<AuthResponse>> {
    let claims = verify_token(&body.refresh_token, &state.config)?.claims;
    if claims.token_type != TokenType::Refresh {
        return Err(AppError::Unauthorized);
    }

    let (stored_id, stored_user_id, revoked) = sqlx::query_as::<_, (Uuid, Uuid, bool)>(
        "SELECT id, user_id, revoked FROM refresh_tokens WHERE token_hash = $1",
    )
    .bind(hash_token(&body.refresh_token))
    .fetch_optional(&state.db)
    .await?
    .ok_or(AppError::Unauthorized)?;

    // A revoked token showing up again means it leaked or was replayed; the
    // whole family goes.
    if revoked {
        tracing::warn!(
            user_id = %stored_user_id,
            token_id = %stored_id,
            "Refresh token reuse detected, revoking all tokens for user"
        );
        revoke_active_tokens(&state.db, stored_user_id).await?;
        return Err(AppError::Unauthorized);
    }

    if stored_user_id != claims.sub {
        return Err(AppError::Unauthorized);
    }

    // Single-use rotation: spend this token before minting its successor.
    sqlx::query("UPDATE refresh_tokens SET revoked = true, revoked_at = NOW() WHERE id = $1")
        .bind(stored_id)
        .execute(&state.db)
        .await?;

    let user = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE id = $1")
        .bind(stored_user_id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::Unauthorized)?;

    let tokens = issue_tokens(&state, &user, Some(stored_id)).await?;
    Ok(Json(auth_response(tokens, &user)))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<MessageResponse>> {
    revoke_active_tokens(&state.db, auth_user.id).await?;
    Ok(Json(MessageResponse {
        message: "Logged out successfully".into(),
    }))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> AppResult<Json<UserProfile>> {
    let user = sqlx::query_as::<_, UserProfile>("SELECT * FROM user_profiles WHERE id = $1")
        .bind(auth_user.id)
        .fetch_optional(&state.db)
        .await?
        .ok_or(AppError::NotFound("User not found".into()))?;

    Ok(Json(user))
}
