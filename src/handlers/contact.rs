use axum::Json;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodRouter, post};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::error::AppError;
use crate::identity::client_identity;
use crate::metrics::{NOTIFY_LATENCY, REQUEST_TOTAL, record_outcome};
use crate::models::{ContactSubmission, SuccessResponse};
use crate::routes::Route;
use crate::state::AppState;

// Contact forms are small; anything past this is rejected unread
const MAX_BODY_BYTES: usize = 64 * 1024;

/// POST handler bound to one configured route.
pub fn contact_route(route: Arc<Route>) -> MethodRouter<AppState> {
    post(move |State(state): State<AppState>, req: Request| {
        let route = Arc::clone(&route);
        async move { handle_contact(state, route, req).await }
    })
}

// identity -> rate check -> body -> notifier, stopping at the first failure
async fn handle_contact(state: AppState, route: Arc<Route>, req: Request) -> Response {
    REQUEST_TOTAL.inc();

    let method = req.method().clone();
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    let client = client_identity(req.headers(), peer, state.trust_proxy);

    // Cheap check first: throttled requests never have their body read
    if !state.limiter.allow(&client, &route.path, route.window) {
        warn!(status = 429, %method, path = %route.path, %client, "rate limited");
        return reject(AppError::TooManyRequests);
    }

    let submission = match read_submission(req).await {
        Ok(submission) => submission,
        Err(err) => {
            warn!(status = 400, %method, path = %route.path, %client, reason = %err, "bad submission");
            return reject(err);
        }
    };

    let timer = NOTIFY_LATENCY.start_timer();
    let sent = state
        .notifier
        .send(&route.bot_token, &route.chat_id, &submission)
        .await;
    timer.observe_duration();

    if let Err(err) = sent {
        error!(status = 500, %method, path = %route.path, %client, error = %err, "delivery failed");
        return reject(AppError::Delivery);
    }

    info!(status = 200, %method, path = %route.path, %client, "message sent");
    record_outcome(StatusCode::OK.as_u16());
    let body = SuccessResponse {
        status: "Message sent successfully.".to_string(),
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn reject(err: AppError) -> Response {
    record_outcome(err.status().as_u16());
    err.into_response()
}

async fn read_submission(req: Request) -> Result<ContactSubmission, AppError> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_BODY_BYTES)
        .await
        .map_err(|_| AppError::BadRequest("Request body is too large or unreadable.".to_string()))?;

    let submission: ContactSubmission = serde_json::from_slice(&bytes).map_err(|_| {
        AppError::BadRequest(
            "Invalid request body. Expected JSON with name, email, and message.".to_string(),
        )
    })?;

    if !submission.is_complete() {
        return Err(AppError::BadRequest(
            "All fields (name, email, message) are required.".to_string(),
        ));
    }

    Ok(submission)
}
