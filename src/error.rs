use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Faults raised by the assistant gateway. Everything here is scoped to one
/// request; a failed run is never retried automatically.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum AssistantError {
    #[error("Assistant service unavailable")]
    RemoteUnavailable,

    #[error("Thread not found")]
    InvalidThread,

    #[error("Assistant run failed")]
    RunFailed,

    #[error("Timed out waiting for the assistant reply")]
    PollTimeout,
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Rate limited")]
    RateLimited,

    #[error(transparent)]
    Assistant(#[from] AssistantError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, self.to_string()),
            AppError::Forbidden => (StatusCode::FORBIDDEN, self.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            AppError::Validation(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            AppError::RateLimited => (StatusCode::TOO_MANY_REQUESTS, self.to_string()),
            AppError::Assistant(e) => {
                let status = match e {
                    AssistantError::InvalidThread => StatusCode::NOT_FOUND,
                    AssistantError::PollTimeout => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                tracing::warn!(error = %e, "Assistant gateway error");
                (status, e.to_string())
            }
            AppError::Database(e) => {
                tracing::error!(error = %e, "Database error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!(error = %e, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".into(),
                )
            }
        };

        let body = json!({
            "error": {
                "message": message,
                "code": status.as_u16(),
            }
        });

        (status, Json(body)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    async fn not_found() -> AppResult<Json<serde_json::Value>> {
        Err(AppError::NotFound("Journal not found".into()))
    }

    async fn timed_out() -> AppResult<Json<serde_json::Value>> {
        Err(AssistantError::PollTimeout.into())
    }

    #[tokio::test]
    async fn test_error_envelope_shape() {
        let app = Router::new().route("/x", get(not_found));
        let res = app
            .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);

        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["message"], "Journal not found");
        assert_eq!(body["error"]["code"], 404);
    }

    #[tokio::test]
    async fn test_poll_timeout_maps_to_gateway_timeout() {
        let app = Router::new().route("/x", get(timed_out));
        let res = app
            .oneshot(Request::builder().uri("/x").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
