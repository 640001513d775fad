use std::any::Any;
use std::net::SocketAddr;

use axum::body::{Body, to_bytes};
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use bytes::Bytes;
use http_body_util::Full;
use serde::Deserialize;
use tracing::{error, info};

use snippetbox_db::StoreError;

use crate::AppState;
use crate::session::Session;

/// Set in request extensions by `authenticate`; read by `require_auth`
/// and by handlers assembling template data.
#[derive(Debug, Clone, Copy)]
pub struct IsAuthenticated(pub bool);

const FORM_BODY_LIMIT: usize = 1024 * 1024;

/// Fixed security headers on every response.
pub async fn security_headers(req: Request<Body>, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();
    headers.insert("X-XSS-Protection", HeaderValue::from_static("1; mode=block"));
    headers.insert("X-Frame-Options", HeaderValue::from_static("deny"));
    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        "Referrer-Policy",
        HeaderValue::from_static("origin-when-cross-origin"),
    );
    res
}

/// One log line per request: method, URI, remote address. The remote
/// address is only present when the server is started with connect info.
pub async fn log_requests(req: Request<Body>, next: Next) -> Response {
    let method = req.method().clone();
    let uri = req.uri().clone();
    let remote = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "-".into());

    info!(%method, %uri, %remote, "request");
    next.run(req).await
}

#[derive(Debug, Default, Deserialize)]
struct CsrfField {
    #[serde(default)]
    csrf_token: Option<String>,
}

/// Reject state-changing requests whose form body lacks a `csrf_token`
/// matching the session token. Runs before the handler; the buffered body
/// is handed back to the request so extractors downstream still work.
pub async fn csrf_guard(req: Request<Body>, next: Next) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let Some(session) = req.extensions().get::<Session>().cloned() else {
        error!("csrf guard ran without a session");
        return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
    };

    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, FORM_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => return (StatusCode::BAD_REQUEST, "Bad Request").into_response(),
    };

    let field: CsrfField = serde_urlencoded::from_bytes(&bytes).unwrap_or_default();
    if field.csrf_token.as_deref() != Some(session.csrf_token().as_str()) {
        return (StatusCode::BAD_REQUEST, "Bad Request").into_response();
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}

/// Resolve the session's user id against the database and record the
/// outcome. A stale id (user row gone) is scrubbed from the session.
pub async fn authenticate(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let session = req.extensions().get::<Session>().cloned();

    let mut authed = false;
    if let Some(session) = session {
        if let Some(id) = session.user_id() {
            let users = state.users.clone();
            match tokio::task::spawn_blocking(move || users.get(id)).await {
                Ok(Ok(_)) => authed = true,
                Ok(Err(StoreError::NoRecord)) => session.set_user_id(None),
                Ok(Err(e)) => error!("auth lookup failed: {:?}", e),
                Err(e) => error!("spawn_blocking join error: {}", e),
            }
        }
    }

    req.extensions_mut().insert(IsAuthenticated(authed));
    next.run(req).await
}

/// Gate for routes that need a logged-in user: unauthenticated callers are
/// redirected to the login page, and authenticated responses are marked
/// uncacheable.
pub async fn require_auth(req: Request<Body>, next: Next) -> Response {
    let authed = matches!(
        req.extensions().get::<IsAuthenticated>(),
        Some(IsAuthenticated(true))
    );

    if !authed {
        return Redirect::to("/user/login").into_response();
    }

    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res
}

/// Panic handler for the recovery layer: log the payload, answer with a
/// generic 500 and ask the client to drop the connection.
pub fn handle_panic(err: Box<dyn Any + Send + 'static>) -> axum::http::Response<Full<Bytes>> {
    let detail = if let Some(s) = err.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s
    } else {
        "unknown panic payload"
    };
    error!("handler panicked: {}", detail);

    let mut res = axum::http::Response::new(Full::from("Internal Server Error"));
    *res.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    res.headers_mut()
        .insert(header::CONNECTION, HeaderValue::from_static("close"));
    res
}
