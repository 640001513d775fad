use axum::extract::{Path, State};
use axum::{Extension, Form};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Redirect, Response};
use serde::Serialize;
use tracing::error;

use snippetbox_db::StoreError;

use crate::AppState;
use crate::error::WebError;
use crate::forms::{LoginForm, SignupForm, SnippetForm};
use crate::middleware::IsAuthenticated;
use crate::session::Session;
use crate::templates::{SnippetView, TemplateData};

/// Run a blocking store call off the async runtime.
async fn run_blocking<T, F>(f: F) -> Result<T, WebError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    let result = tokio::task::spawn_blocking(f).await.map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        WebError::Internal(anyhow::anyhow!("blocking task failed: {}", e))
    })?;
    Ok(result?)
}

/// Cross-cutting template fields: year, flash (popped), CSRF token,
/// authentication flag.
fn base_data(session: &Session, auth: IsAuthenticated) -> TemplateData {
    let mut data = TemplateData::new();
    data.flash = session.pop_flash();
    data.csrf_token = session.csrf_token();
    data.is_authenticated = auth.0;
    data
}

fn form_value<T: Serialize>(form: &T) -> Result<serde_json::Value, WebError> {
    serde_json::to_value(form).map_err(|e| WebError::Internal(e.into()))
}

/// GET / — the ten most recent unexpired snippets.
pub async fn home(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
) -> Result<Html<String>, WebError> {
    let snippets = state.snippets.clone();
    let latest = run_blocking(move || snippets.latest(10)).await?;

    let mut data = base_data(&session, auth);
    data.snippets = latest.into_iter().map(SnippetView::from).collect();
    Ok(Html(state.templates.render("home", &data)?))
}

/// GET /snippet/{id} — one snippet. Non-numeric, non-positive and unknown
/// ids all surface as 404.
pub async fn show_snippet(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
    Path(id): Path<String>,
) -> Result<Html<String>, WebError> {
    let id: i64 = match id.parse() {
        Ok(id) if id >= 1 => id,
        _ => return Err(WebError::NotFound),
    };

    let snippets = state.snippets.clone();
    let snippet = run_blocking(move || snippets.get(id)).await?;

    let mut data = base_data(&session, auth);
    data.snippet = Some(SnippetView::from(snippet));
    Ok(Html(state.templates.render("show", &data)?))
}

/// GET /snippet/create
pub async fn create_snippet_form(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
) -> Result<Html<String>, WebError> {
    let mut data = base_data(&session, auth);
    data.form = form_value(&SnippetForm {
        expires: "365".into(),
        ..Default::default()
    })?;
    Ok(Html(state.templates.render("create", &data)?))
}

/// POST /snippet/create — validate, insert, flash, redirect to the new
/// snippet. Validation failures re-render the form with field errors.
pub async fn create_snippet(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
    Form(mut form): Form<SnippetForm>,
) -> Result<Response, WebError> {
    if !form.validate() {
        let mut data = base_data(&session, auth);
        data.form = form_value(&form)?;
        let html = state.templates.render("create", &data)?;
        return Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response());
    }

    let snippets = state.snippets.clone();
    let (title, content, days) = (form.title.clone(), form.content.clone(), form.expires_days());
    let id = run_blocking(move || snippets.insert(&title, &content, days)).await?;

    session.set_flash("Snippet successfully created!");
    Ok(Redirect::to(&format!("/snippet/{}", id)).into_response())
}

/// GET /user/signup
pub async fn signup_form(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
) -> Result<Html<String>, WebError> {
    let mut data = base_data(&session, auth);
    data.form = form_value(&SignupForm::default())?;
    Ok(Html(state.templates.render("signup", &data)?))
}

/// POST /user/signup
pub async fn signup(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
    Form(mut form): Form<SignupForm>,
) -> Result<Response, WebError> {
    let rerender = |form: &SignupForm| -> Result<Response, WebError> {
        let mut data = base_data(&session, auth);
        data.form = form_value(form)?;
        let html = state.templates.render("signup", &data)?;
        Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response())
    };

    if !form.validate() {
        return rerender(&form);
    }

    let users = state.users.clone();
    let (name, email, password) = (form.name.clone(), form.email.clone(), form.password.clone());
    let result = tokio::task::spawn_blocking(move || users.insert(&name, &email, &password))
        .await
        .map_err(|e| WebError::Internal(anyhow::anyhow!("blocking task failed: {}", e)))?;

    match result {
        Ok(()) => {
            session.set_flash("Your signup was successful. Please log in.");
            Ok(Redirect::to("/user/login").into_response())
        }
        Err(StoreError::DuplicateEmail) => {
            form.errors
                .insert("email".into(), "Address is already in use".into());
            rerender(&form)
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /user/login
pub async fn login_form(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
) -> Result<Html<String>, WebError> {
    let mut data = base_data(&session, auth);
    data.form = form_value(&LoginForm::default())?;
    Ok(Html(state.templates.render("login", &data)?))
}

/// POST /user/login — on success the CSRF token is rotated before the
/// session becomes authenticated.
pub async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Extension(auth): Extension<IsAuthenticated>,
    Form(mut form): Form<LoginForm>,
) -> Result<Response, WebError> {
    let users = state.users.clone();
    let (email, password) = (form.email.clone(), form.password.clone());
    let result = tokio::task::spawn_blocking(move || users.authenticate(&email, &password))
        .await
        .map_err(|e| WebError::Internal(anyhow::anyhow!("blocking task failed: {}", e)))?;

    match result {
        Ok(id) => {
            session.renew_token();
            session.set_user_id(Some(id));
            Ok(Redirect::to("/snippet/create").into_response())
        }
        Err(StoreError::InvalidCredentials) => {
            form.non_field_errors
                .push("Email or Password is incorrect".into());
            let mut data = base_data(&session, auth);
            data.form = form_value(&form)?;
            let html = state.templates.render("login", &data)?;
            Ok((StatusCode::UNPROCESSABLE_ENTITY, Html(html)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// POST /user/logout
pub async fn logout(Extension(session): Extension<Session>) -> Redirect {
    session.set_user_id(None);
    session.renew_token();
    session.set_flash("You've been logged out successfully!");
    Redirect::to("/")
}

/// GET /ping — liveness.
pub async fn ping() -> &'static str {
    "OK"
}

/// Fallback for unmatched paths.
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
