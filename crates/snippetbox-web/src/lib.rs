pub mod error;
pub mod forms;
pub mod handlers;
pub mod middleware;
pub mod router;
pub mod session;
pub mod templates;

use std::sync::Arc;

use snippetbox_db::{SnippetStore, UserStore};

use crate::session::SessionManager;
use crate::templates::TemplateCache;

/// Application-wide dependencies, injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub snippets: Arc<dyn SnippetStore>,
    pub users: Arc<dyn UserStore>,
    pub templates: TemplateCache,
    pub sessions: SessionManager,
}
