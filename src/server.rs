use anyhow::Context;
use axum::Router;
use axum::routing::get;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::config::Config;
use crate::cors::{CorsPolicy, cors_middleware};
use crate::handlers::{contact_route, health_handler, metrics_handler, not_found};
use crate::notifier::TelegramNotifier;
use crate::rate_limit::RateLimiter;
use crate::routes::RouteTable;
use crate::state::AppState;

/// Router with health, metrics and one POST route per configured path,
/// all wrapped in the CORS layer.
pub fn build_router(state: AppState, cors: CorsPolicy) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    for route in state.routes.iter() {
        info!(
            path = %route.path,
            bot = %route.token_fingerprint(),
            chat_id = %route.chat_id,
            window = ?route.window,
            "registered route"
        );
        router = router.route(&route.path, contact_route(Arc::clone(route)));
    }

    router
        .fallback(not_found)
        .layer(axum::middleware::from_fn_with_state(cors, cors_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves until Ctrl-C / SIGTERM, then drains for the grace period.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let routes = Arc::new(RouteTable::from_config(&config)?);

    let retention = routes.retention(config.retention());
    if retention > config.retention() {
        warn!(
            configured = ?config.retention(),
            effective = ?retention,
            "retention raised to the longest route window"
        );
    }

    let limiter = RateLimiter::new(retention);
    let sweeper = limiter.spawn_sweeper(config.sweep_interval());

    let notifier = TelegramNotifier::new(&config.server.telegram_api_base, config.notify_timeout())
        .context("building HTTP client")?;

    let state = AppState {
        limiter,
        notifier: Arc::new(notifier),
        routes,
        trust_proxy: config.server.trust_proxy,
    };
    let app = build_router(state, CorsPolicy::parse(&config.server.allowed_origins));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("Relay listening on http://{addr}");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let serve = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
        });
    let mut server = tokio::spawn(async move { serve.await });

    tokio::select! {
        res = &mut server => {
            sweeper.stop();
            return res.context("server task panicked")?.context("server error");
        }
        _ = shutdown_signal() => {}
    }

    info!("Shutting down...");
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.shutdown_grace(), &mut server).await {
        Ok(res) => res.context("server task panicked")?.context("server error")?,
        Err(_) => {
            warn!(grace = ?config.shutdown_grace(), "in-flight requests did not finish in time");
            server.abort();
        }
    }

    sweeper.stop();
    info!("Goodbye.");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{RecordingNotifier, test_state};
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use std::time::Duration;
    use tower::ServiceExt;

    fn app(notifier: Arc<RecordingNotifier>, cors: &str) -> Router {
        build_router(test_state(notifier, Duration::from_secs(60)), CorsPolicy::parse(cors))
    }

    fn submit(path: &str, client: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .header("x-forwarded-for", client)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(res: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const VALID: &str = r#"{"name":"Ana","email":"ana@example.com","message":"Hello","source":"site"}"#;

    #[tokio::test]
    async fn health_reports_route_count() {
        let app = app(RecordingNotifier::ok(), "*");

        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let body = json_body(res).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["routes"], 2);
    }

    #[tokio::test]
    async fn valid_submission_is_sent_once() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier.clone(), "*");

        let res = app.oneshot(submit("/contact", "1.1.1.1", VALID)).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(json_body(res).await["status"].is_string());
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bot_token, "token-contact");
        assert_eq!(sent[0].chat_id, "100");
        assert_eq!(sent[0].submission.source.as_deref(), Some("site"));
    }

    #[tokio::test]
    async fn second_submission_in_window_is_throttled() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier.clone(), "*");

        let first = app.clone().oneshot(submit("/contact", "1.1.1.1", VALID)).await.unwrap();
        let second = app.clone().oneshot(submit("/contact", "1.1.1.1", VALID)).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(json_body(second).await["error"].is_string());
        assert_eq!(notifier.sent().len(), 1);

        // other clients and other routes are unaffected
        let other_client = app.clone().oneshot(submit("/contact", "2.2.2.2", VALID)).await.unwrap();
        let other_route = app.oneshot(submit("/support", "1.1.1.1", VALID)).await.unwrap();
        assert_eq!(other_client.status(), StatusCode::OK);
        assert_eq!(other_route.status(), StatusCode::OK);
        assert_eq!(notifier.sent().len(), 3);
    }

    #[tokio::test]
    async fn incomplete_submission_is_rejected() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier.clone(), "*");

        let res = app
            .oneshot(submit(
                "/contact",
                "1.1.1.1",
                r#"{"name":"Ana","email":"ana@example.com","message":""}"#,
            ))
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(res).await["error"].is_string());
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn malformed_json_is_rejected() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier.clone(), "*");

        let res = app.oneshot(submit("/contact", "1.1.1.1", "{not json")).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn throttled_requests_are_rejected_before_validation() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier.clone(), "*");

        let first = app.clone().oneshot(submit("/contact", "1.1.1.1", "{bad")).await.unwrap();
        let second = app.oneshot(submit("/contact", "1.1.1.1", "{bad")).await.unwrap();

        // the bad body still used up the slot
        assert_eq!(first.status(), StatusCode::BAD_REQUEST);
        assert_eq!(second.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn delivery_failure_is_a_server_error() {
        let notifier = RecordingNotifier::failing();
        let app = app(notifier.clone(), "*");

        let res = app.oneshot(submit("/contact", "1.1.1.1", VALID)).await.unwrap();

        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(res).await;
        assert_eq!(body["error"], "Failed to send message. Please try again later.");
        assert_eq!(notifier.attempts(), 1);
    }

    #[tokio::test]
    async fn oversized_body_is_rejected() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier.clone(), "*");
        let huge = format!(
            r#"{{"name":"Ana","email":"a@b.c","message":"{}"}}"#,
            "x".repeat(100 * 1024)
        );

        let res = app.oneshot(submit("/contact", "1.1.1.1", &huge)).await.unwrap();

        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn unknown_path_is_not_found() {
        let app = app(RecordingNotifier::ok(), "*");

        let res = app.oneshot(submit("/nope", "1.1.1.1", VALID)).await.unwrap();

        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn options_is_answered_with_cors_headers() {
        let app = app(RecordingNotifier::ok(), "https://a.com,https://b.com");

        for path in ["/contact", "/anything"] {
            let res = app
                .clone()
                .oneshot(
                    Request::builder()
                        .method("OPTIONS")
                        .uri(path)
                        .header(header::ORIGIN, "https://a.com")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();

            assert_eq!(res.status(), StatusCode::NO_CONTENT);
            let headers = res.headers();
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://a.com");
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "POST, OPTIONS");
            assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "Content-Type");
            let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
            assert!(bytes.is_empty());
        }
    }

    #[tokio::test]
    async fn cors_origin_omitted_when_not_listed() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier, "https://a.com,https://b.com");

        let mut req = submit("/contact", "1.1.1.1", VALID);
        req.headers_mut()
            .insert(header::ORIGIN, "https://c.com".parse().unwrap());
        let res = app.oneshot(req).await.unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        assert!(res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn cors_wildcard_on_regular_responses() {
        let app = app(RecordingNotifier::ok(), "*");

        let res = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }

    #[tokio::test]
    async fn concurrent_submissions_send_one_message() {
        let notifier = RecordingNotifier::ok();
        let app = app(notifier.clone(), "*");

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let app = app.clone();
                tokio::spawn(async move {
                    app.oneshot(submit("/contact", "9.9.9.9", VALID))
                        .await
                        .unwrap()
                        .status()
                })
            })
            .collect();

        let mut ok = 0;
        let mut throttled = 0;
        for task in tasks {
            let status = task.await.unwrap();
            if status == StatusCode::OK {
                ok += 1;
            } else if status == StatusCode::TOO_MANY_REQUESTS {
                throttled += 1;
            } else {
                panic!("unexpected status {status}");
            }
        }

        assert_eq!(ok, 1);
        assert_eq!(throttled, 15);
        assert_eq!(notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn metrics_are_exposed() {
        let app = app(RecordingNotifier::ok(), "*");
        let _ = app.clone().oneshot(submit("/contact", "1.1.1.1", VALID)).await.unwrap();

        let res = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(res.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("relay_requests_total"));
    }
}
