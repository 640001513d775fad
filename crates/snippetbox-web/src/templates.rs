use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Datelike, Utc};
use handlebars::Handlebars;
use serde::Serialize;
use tracing::info;

use snippetbox_types::Snippet;

use crate::error::WebError;

/// Precompiled template registry, built once at startup from `ui/html/`:
/// `*.page.hbs` files become renderable pages keyed by their stem, while
/// `*.layout.hbs` and `*.partial.hbs` are registered as partials shared by
/// every page. Read-only after startup, so cloning is cheap and lock-free.
#[derive(Clone)]
pub struct TemplateCache {
    registry: Arc<Handlebars<'static>>,
}

impl TemplateCache {
    pub fn new(dir: &Path) -> Result<Self> {
        let mut registry = Handlebars::new();
        let mut pages = 0usize;

        for entry in fs::read_dir(dir)
            .with_context(|| format!("template directory {}", dir.display()))?
        {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            if let Some(stem) = file_name.strip_suffix(".page.hbs") {
                registry
                    .register_template_file(stem, &path)
                    .with_context(|| format!("parsing {}", path.display()))?;
                pages += 1;
            } else if let Some(stem) = file_name
                .strip_suffix(".layout.hbs")
                .or_else(|| file_name.strip_suffix(".partial.hbs"))
            {
                registry
                    .register_template_file(stem, &path)
                    .with_context(|| format!("parsing {}", path.display()))?;
            }
        }

        if pages == 0 {
            return Err(anyhow!("no page templates found in {}", dir.display()));
        }

        info!("Template cache built: {} pages from {}", pages, dir.display());
        Ok(Self {
            registry: Arc::new(registry),
        })
    }

    /// Render a page into a buffer. An unknown page name or a render
    /// failure is a misconfiguration, reported as a server error.
    pub fn render(&self, page: &str, data: &TemplateData) -> Result<String, WebError> {
        if !self.registry.has_template(page) {
            return Err(WebError::Internal(anyhow!(
                "the template '{}' does not exist",
                page
            )));
        }

        self.registry
            .render(page, data)
            .map_err(|e| WebError::Internal(anyhow!("rendering '{}': {}", page, e)))
    }
}

/// Per-request data handed to the template engine: cross-cutting fields
/// plus the page's own payload. Assembled fresh for every render.
#[derive(Debug, Default, Serialize)]
pub struct TemplateData {
    pub current_year: i32,
    pub flash: Option<String>,
    pub csrf_token: String,
    pub is_authenticated: bool,
    pub snippet: Option<SnippetView>,
    pub snippets: Vec<SnippetView>,
    pub form: serde_json::Value,
}

impl TemplateData {
    pub fn new() -> Self {
        Self {
            current_year: Utc::now().year(),
            ..Self::default()
        }
    }
}

/// A snippet with timestamps pre-formatted for display.
#[derive(Debug, Serialize)]
pub struct SnippetView {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub created: String,
    pub expires: String,
}

impl From<Snippet> for SnippetView {
    fn from(s: Snippet) -> Self {
        Self {
            id: s.id,
            title: s.title,
            content: s.content,
            created: human_date(s.created),
            expires: human_date(s.expires),
        }
    }
}

fn human_date(t: DateTime<Utc>) -> String {
    t.format("%d %b %Y at %H:%M").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn ui_html() -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../ui/html")
    }

    #[test]
    fn cache_builds_and_renders_home() {
        let cache = TemplateCache::new(&ui_html()).unwrap();

        let mut data = TemplateData::new();
        data.flash = Some("hello".into());
        data.snippets = vec![SnippetView {
            id: 1,
            title: "O snail".into(),
            content: "Climb Mount Fuji".into(),
            created: "27 Aug 2026 at 10:00".into(),
            expires: "03 Sep 2026 at 10:00".into(),
        }];

        let html = cache.render("home", &data).unwrap();
        assert!(html.contains("O snail"));
        assert!(html.contains("hello"));
        assert!(html.contains(&data.current_year.to_string()));
    }

    #[test]
    fn html_is_escaped() {
        let cache = TemplateCache::new(&ui_html()).unwrap();

        let mut data = TemplateData::new();
        data.snippet = Some(SnippetView {
            id: 1,
            title: "<script>alert(1)</script>".into(),
            content: "body".into(),
            created: String::new(),
            expires: String::new(),
        });

        let html = cache.render("show", &data).unwrap();
        assert!(!html.contains("<script>alert(1)</script>"));
        assert!(html.contains("&lt;script&gt;"));
    }

    #[test]
    fn unknown_page_is_an_error() {
        let cache = TemplateCache::new(&ui_html()).unwrap();
        assert!(cache.render("no-such-page", &TemplateData::new()).is_err());
    }
}
