use std::path::PathBuf;

use axum::Router;
use axum::handler::Handler;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::AppState;
use crate::{handlers, middleware, session};

/// Assemble the full application router.
///
/// Dynamic routes run under session → CSRF → authentication (outer to
/// inner); `/ping` and `/static/` bypass all three. Recovery, logging and
/// security headers wrap everything.
pub fn router(state: AppState, static_dir: PathBuf) -> Router {
    // The login gate hangs off each handler, not the route: a method
    // mismatch on a gated path must still answer 405 from the method
    // router, never a login redirect.
    let auth = || from_fn(middleware::require_auth);

    let dynamic = Router::new()
        .route("/", get(handlers::home))
        .route("/snippet/{id}", get(handlers::show_snippet))
        .route(
            "/snippet/create",
            get(handlers::create_snippet_form.layer(auth()))
                .post(handlers::create_snippet.layer(auth())),
        )
        .route(
            "/user/signup",
            get(handlers::signup_form).post(handlers::signup),
        )
        .route(
            "/user/login",
            get(handlers::login_form).post(handlers::login),
        )
        .route("/user/logout", post(handlers::logout.layer(auth())))
        .layer(from_fn_with_state(state.clone(), middleware::authenticate))
        .layer(from_fn(middleware::csrf_guard))
        .layer(from_fn_with_state(state.clone(), session::load_session));

    Router::new()
        .merge(dynamic)
        .route("/ping", get(handlers::ping))
        .nest_service("/static", ServeDir::new(static_dir))
        .fallback(handlers::not_found)
        .layer(from_fn(middleware::security_headers))
        .layer(from_fn(middleware::log_requests))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(middleware::handle_panic))
        .with_state(state)
}
