//! Cross-origin protection for the API.
//!
//! The API clones repositories and runs scripts, so requests carrying an
//! `Origin` header are only served when that origin is the server itself or
//! was allowed with `--allow-origin`. Browsers always send `Origin` on
//! cross-site requests; tools like curl send none and are let through.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Request, State};
use axum::http::header::{HOST, ORIGIN};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tracing::warn;

/// Origins besides the server's own that may call the API.
#[derive(Debug, Clone, Default)]
pub struct AllowedOrigins(Arc<Vec<HeaderValue>>);

impl AllowedOrigins {
    pub fn new(origins: &[String]) -> anyhow::Result<Self> {
        let values = origins
            .iter()
            .map(|origin| {
                HeaderValue::from_str(origin.trim_end_matches('/'))
                    .map_err(|_| anyhow::anyhow!("invalid origin {origin:?}"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(Self(Arc::new(values)))
    }

    fn allows(&self, origin: &HeaderValue, host: Option<&HeaderValue>) -> bool {
        if self.0.iter().any(|allowed| allowed == origin) {
            return true;
        }
        let (Ok(origin), Some(Ok(host))) = (origin.to_str(), host.map(|h| h.to_str())) else {
            return false;
        };
        origin
            .strip_prefix("http://")
            .or_else(|| origin.strip_prefix("https://"))
            .is_some_and(|authority| authority.eq_ignore_ascii_case(host))
    }

    /// CORS headers for the extra origins; `None` when only same-origin
    /// requests are served.
    pub fn cors_layer(&self) -> Option<CorsLayer> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(self.0.iter().cloned()))
                .allow_methods(Any)
                .allow_headers(Any),
        )
    }
}

/// Middleware rejecting browser requests from foreign origins with 403.
pub async fn reject_foreign_origin(
    State(allowed): State<AllowedOrigins>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(ORIGIN)
        && !allowed.allows(origin, request.headers().get(HOST))
    {
        warn!(origin = ?origin, path = %request.uri().path(), "rejected cross-origin request");
        return (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "cross-origin requests are not allowed" })),
        )
            .into_response();
    }
    next.run(request).await
}
