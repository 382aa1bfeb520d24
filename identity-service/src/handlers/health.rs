use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::AppState;

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let db_ok = state.db.health_check().await.is_ok();
    let cache_ok = state.cache.health_check().await.is_ok();

    let status = if db_ok && cache_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(serde_json::json!({
            "status": if db_ok && cache_ok { "ok" } else { "degraded" },
            "mongodb": db_ok,
            "redis": cache_ok,
        })),
    )
}
