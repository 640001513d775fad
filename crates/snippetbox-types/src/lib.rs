use chrono::{DateTime, Utc};
use serde::Serialize;

/// A stored text snippet. Visible only while `expires > now`; the store
/// enforces that filter at query time, there is no background cleanup.
#[derive(Debug, Clone, Serialize)]
pub struct Snippet {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created: DateTime<Utc>,
    pub expires: DateTime<Utc>,
}

/// A registered user. The password hash never leaves the store layer,
/// so it is deliberately absent here.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub created: DateTime<Utc>,
}
