//! Chat page rendering and security headers.
//!
//! Every response carries a content security policy. Scripts are allowed
//! from our own origin, any configured extra origins, and inline blocks
//! tagged with a per-request nonce.

use crate::handlers::AppState;
use axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue},
    middleware::Next,
    response::{Html, IntoResponse, Response},
    Extension,
};
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

const CHAT_TEMPLATE: &str = include_str!("../templates/chat.html");

/// Per-request script nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nonce(pub String);

impl Nonce {
    /// Generate a fresh nonce.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

/// Build the `Content-Security-Policy` value for a request.
#[must_use]
pub fn content_security_policy(nonce: &Nonce, script_sources: &[String]) -> String {
    let mut script_src = vec!["'self'".to_string()];
    script_src.extend(script_sources.iter().cloned());
    script_src.push(format!("'nonce-{}'", nonce.0));

    format!(
        "default-src 'self'; script-src {}; object-src 'none'; base-uri 'self'; frame-ancestors 'self'",
        script_src.join(" ")
    )
}

/// Middleware attaching a nonce to the request and security headers to the response.
pub async fn security_headers(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let nonce = Nonce::generate();
    let csp = content_security_policy(&nonce, &state.config.http.script_sources);
    request.extensions_mut().insert(nonce);

    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    match HeaderValue::from_str(&csp) {
        Ok(value) => {
            headers.insert(header::CONTENT_SECURITY_POLICY, value);
        }
        Err(e) => warn!(error = %e, "Content security policy is not a valid header value"),
    }
    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        header::X_FRAME_OPTIONS,
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        HeaderName::from_static("cross-origin-opener-policy"),
        HeaderValue::from_static("same-origin"),
    );

    response
}

/// Render the chat page.
#[must_use]
pub fn render_chat_page(nonce: &Nonce, websocket_path: &str) -> String {
    CHAT_TEMPLATE
        .replace("{{nonce}}", &nonce.0)
        .replace("{{ws_path}}", websocket_path)
}

/// Chat page handler.
pub async fn chat_page(
    State(state): State<Arc<AppState>>,
    Extension(nonce): Extension<Nonce>,
) -> impl IntoResponse {
    Html(render_chat_page(
        &nonce,
        &state.config.transport.websocket_path,
    ))
}
