use axum::Json;
use axum::extract::State;
use axum::response::IntoResponse;

use crate::state::AppState;

// health handler
pub async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "routes": state.routes.len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}
