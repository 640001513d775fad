//! Signed-cookie sessions.
//!
//! The whole session lives in the cookie: a JSON payload (user id, flash
//! message, CSRF token, expiry) base64-encoded and authenticated with
//! HMAC-SHA256 under the server secret. Tampered or expired cookies are
//! discarded and the request starts with a fresh session.

use std::sync::{Arc, Mutex};

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::error;

use crate::AppState;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "session";
pub const SESSION_LIFETIME_HOURS: i64 = 12;

/// The serialized session payload. Short field names keep the cookie small.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    #[serde(rename = "u", default, skip_serializing_if = "Option::is_none")]
    user_id: Option<i64>,
    #[serde(rename = "f", default, skip_serializing_if = "Option::is_none")]
    flash: Option<String>,
    #[serde(rename = "c")]
    csrf_token: String,
    /// Absolute expiry, unix seconds. The lifetime is fixed, not sliding.
    #[serde(rename = "e")]
    expires: i64,
}

impl SessionData {
    pub fn new() -> Self {
        let mut buf = [0u8; 32];
        rand::rng().fill_bytes(&mut buf);
        Self {
            user_id: None,
            flash: None,
            csrf_token: hex::encode(buf),
            expires: (Utc::now() + Duration::hours(SESSION_LIFETIME_HOURS)).timestamp(),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.user_id
    }

    pub fn set_user_id(&mut self, id: Option<i64>) {
        self.user_id = id;
    }

    pub fn csrf_token(&self) -> &str {
        &self.csrf_token
    }

    pub fn flash(&self) -> Option<&str> {
        self.flash.as_deref()
    }

    fn expired(&self) -> bool {
        self.expires <= Utc::now().timestamp()
    }
}

impl Default for SessionData {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-request handle shared between the session middleware and handlers.
/// Mutations flip the `changed` flag; the middleware only re-issues the
/// cookie when something actually changed.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    data: SessionData,
    changed: bool,
}

impl Session {
    pub fn new(data: SessionData) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data,
                changed: false,
            })),
        }
    }

    /// Fresh session: marked changed so the cookie (and with it the CSRF
    /// token) reaches the client even if no handler touches it.
    pub fn fresh() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                data: SessionData::new(),
                changed: true,
            })),
        }
    }

    pub fn user_id(&self) -> Option<i64> {
        self.lock().data.user_id
    }

    pub fn set_user_id(&self, id: Option<i64>) {
        let mut inner = self.lock();
        inner.data.user_id = id;
        inner.changed = true;
    }

    pub fn csrf_token(&self) -> String {
        self.lock().data.csrf_token.clone()
    }

    pub fn set_flash(&self, message: &str) {
        let mut inner = self.lock();
        inner.data.flash = Some(message.to_string());
        inner.changed = true;
    }

    /// Read-and-clear the flash message.
    pub fn pop_flash(&self) -> Option<String> {
        let mut inner = self.lock();
        let flash = inner.data.flash.take();
        if flash.is_some() {
            inner.changed = true;
        }
        flash
    }

    /// Rotate the CSRF token. Done on login so a token handed out before
    /// authentication is not valid afterwards.
    pub fn renew_token(&self) {
        let mut buf = [0u8; 32];
        rand::rng().fill_bytes(&mut buf);
        let mut inner = self.lock();
        inner.data.csrf_token = hex::encode(buf);
        inner.changed = true;
    }

    pub fn is_changed(&self) -> bool {
        self.lock().changed
    }

    pub fn data(&self) -> SessionData {
        self.lock().data.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a handler panicked mid-mutation; the panic
        // recovery layer already turned that request into a 500.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Encodes, signs and verifies session cookies.
#[derive(Clone)]
pub struct SessionManager {
    key: Arc<Vec<u8>>,
}

impl SessionManager {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: Arc::new(secret.to_vec()),
        }
    }

    /// `<base64 payload>.<base64 mac>`
    pub fn encode(&self, data: &SessionData) -> Result<String, anyhow::Error> {
        let payload = B64.encode(serde_json::to_vec(data)?);
        let mut mac = HmacSha256::new_from_slice(&self.key)
            .map_err(|e| anyhow::anyhow!("invalid session key: {}", e))?;
        mac.update(payload.as_bytes());
        let sig = B64.encode(mac.finalize().into_bytes());
        Ok(format!("{}.{}", payload, sig))
    }

    /// Returns `None` for anything not verifiably ours: bad structure, bad
    /// signature, unparsable payload, or an expired session.
    pub fn decode(&self, value: &str) -> Option<SessionData> {
        let (payload, sig) = value.split_once('.')?;

        let mut mac = HmacSha256::new_from_slice(&self.key).ok()?;
        mac.update(payload.as_bytes());
        mac.verify_slice(&B64.decode(sig).ok()?).ok()?;

        let data: SessionData = serde_json::from_slice(&B64.decode(payload).ok()?).ok()?;
        if data.expired() {
            return None;
        }
        Some(data)
    }

    fn set_cookie(&self, data: &SessionData) -> Result<String, anyhow::Error> {
        let value = self.encode(data)?;
        Ok(format!(
            "{}={}; Path=/; Max-Age={}; HttpOnly; Secure; SameSite=Lax",
            SESSION_COOKIE,
            value,
            SESSION_LIFETIME_HOURS * 3600,
        ))
    }
}

/// Session middleware: hydrate the session from the request cookie, expose
/// it through request extensions, and persist it after the handler returns.
pub async fn load_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Response {
    let session = match cookie_value(&req, SESSION_COOKIE).and_then(|v| state.sessions.decode(v)) {
        Some(data) => Session::new(data),
        None => Session::fresh(),
    };

    req.extensions_mut().insert(session.clone());
    let mut res = next.run(req).await;

    if session.is_changed() {
        match state.sessions.set_cookie(&session.data()) {
            Ok(cookie) => match cookie.parse() {
                Ok(value) => {
                    res.headers_mut().append(header::SET_COOKIE, value);
                }
                Err(e) => error!("session cookie not header-safe: {}", e),
            },
            Err(e) => error!("failed to encode session cookie: {:?}", e),
        }
    }

    res
}

fn cookie_value<'a>(req: &'a Request<Body>, name: &str) -> Option<&'a str> {
    req.headers()
        .get(header::COOKIE)?
        .to_str()
        .ok()?
        .split(';')
        .map(str::trim)
        .find_map(|pair| pair.strip_prefix(name)?.strip_prefix('='))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> SessionManager {
        SessionManager::new(b"n6Gdh+pPbnzHbS*+9Pk8qGWhTzbpa@gd")
    }

    #[test]
    fn roundtrip() {
        let manager = manager();
        let mut data = SessionData::new();
        data.set_user_id(Some(7));
        data.flash = Some("hello".into());

        let cookie = manager.encode(&data).unwrap();
        let decoded = manager.decode(&cookie).unwrap();
        assert_eq!(decoded.user_id, Some(7));
        assert_eq!(decoded.flash.as_deref(), Some("hello"));
        assert_eq!(decoded.csrf_token, data.csrf_token);
    }

    #[test]
    fn tampered_cookie_is_rejected() {
        let manager = manager();
        let data = SessionData::new();
        let cookie = manager.encode(&data).unwrap();

        // Flip a character in the payload half.
        let mut bytes = cookie.into_bytes();
        bytes[0] = if bytes[0] == b'A' { b'B' } else { b'A' };
        let tampered = String::from_utf8(bytes).unwrap();

        assert!(manager.decode(&tampered).is_none());
    }

    #[test]
    fn wrong_key_is_rejected() {
        let data = SessionData::new();
        let cookie = manager().encode(&data).unwrap();
        let other = SessionManager::new(b"a completely different secret!!!40");
        assert!(other.decode(&cookie).is_none());
    }

    #[test]
    fn expired_session_is_rejected() {
        let manager = manager();
        let mut data = SessionData::new();
        data.expires = Utc::now().timestamp() - 1;

        let cookie = manager.encode(&data).unwrap();
        assert!(manager.decode(&cookie).is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(manager().decode("not-a-session").is_none());
        assert!(manager().decode("aaaa.bbbb").is_none());
        assert!(manager().decode("").is_none());
    }
}
