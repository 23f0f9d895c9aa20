use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

/// Which origins get an Access-Control-Allow-Origin header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsPolicy {
    Any,
    List(Vec<String>),
}

impl CorsPolicy {
    /// "*" or a comma-separated allow-list.
    pub fn parse(allowed: &str) -> Self {
        if allowed.trim() == "*" {
            return CorsPolicy::Any;
        }
        let origins = allowed
            .split(',')
            .map(|o| o.trim().to_string())
            .filter(|o| !o.is_empty())
            .collect();
        CorsPolicy::List(origins)
    }

    /// Value for Access-Control-Allow-Origin, if any.
    pub fn allow_origin(&self, origin: Option<&str>) -> Option<HeaderValue> {
        match self {
            CorsPolicy::Any => Some(HeaderValue::from_static("*")),
            CorsPolicy::List(origins) => {
                let origin = origin?;
                if origins.iter().any(|o| o == origin) {
                    HeaderValue::from_str(origin).ok()
                } else {
                    None
                }
            }
        }
    }
}

/// Adds CORS headers to every response and answers preflights directly.
pub async fn cors_middleware(
    State(policy): State<CorsPolicy>,
    req: Request,
    next: Next,
) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut response = if req.method() == Method::OPTIONS {
        (StatusCode::NO_CONTENT, Body::empty()).into_response()
    } else {
        next.run(req).await
    };

    let headers = response.headers_mut();
    if let Some(value) = policy.allow_origin(origin.as_deref()) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, value);
    }
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );

    response
}
