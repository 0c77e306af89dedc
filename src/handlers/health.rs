use axum::{extract::State, http::StatusCode, Json};
use serde_json::{json, Value};

use crate::AppState;

pub async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "empathica-api",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn readyz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db_ok = sqlx::query_scalar::<_, i32>("SELECT 1")
        .fetch_one(&state.db)
        .await
        .is_ok();

    // sqlx::migrate! records applied migrations here; zero rows means the
    // schema was never set up.
    let migrations_ok = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM _sqlx_migrations WHERE success",
    )
    .fetch_one(&state.db)
    .await
    .map(|applied| applied > 0)
    .unwrap_or(false);

    let ready = db_ok && migrations_ok;
    let database = if db_ok { "ok" } else { "failed" };
    let migrations = if migrations_ok { "ok" } else { "failed" };

    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": { "database": database, "migrations": migrations },
        })),
    )
}
