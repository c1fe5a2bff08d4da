//! Browser collaborator interfaces.
//!
//! The engine never drives Chromium itself; it talks to a [`Tab`] trait whose
//! production implementation lives in the CLI (CDP adapter). This module also
//! owns what the engine *does* decide about pages: the trivial-page rules and
//! DOM-skeleton capture through the injected script.

mod mock;

pub use mock::MockTab;

use async_trait::async_trait;
use std::time::Duration;

use thiserror::Error;

/// The skeletonizer script injected into pages. Returns a compressed JSON tree
/// (`t`/`c`/`x`/`txt`/`href`/`kids`, with repeated siblings folded into
/// `compressed_list` nodes).
pub const DOM_SKELETON_JS: &str = include_str!("skeleton.js");

#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script evaluation failed: {0}")]
    Eval(String),
    #[error("tab gone: {0}")]
    TabGone(String),
}

/// One browser tab: navigation, load waiting, script evaluation.
#[async_trait]
pub trait Tab: Send + Sync {
    async fn url(&self) -> Result<String, BrowserError>;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Best-effort wait for the page to start loading/settle.
    async fn wait_for_load(&self, timeout: Duration) -> Result<(), BrowserError>;

    /// Evaluates a script and returns its JSON result.
    async fn run_js(&self, script: &str) -> Result<serde_json::Value, BrowserError>;
}

/// Captures the DOM skeleton as a string. Evaluation failures come back as an
/// error-shaped JSON document rather than breaking the turn.
pub async fn capture_dom_skeleton(tab: &dyn Tab) -> String {
    match tab.run_js(DOM_SKELETON_JS).await {
        Ok(serde_json::Value::String(s)) => s,
        Ok(other) => other.to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "dom skeleton capture failed");
            serde_json::json!({ "error": e.to_string() }).to_string()
        }
    }
}

/// Hosts treated as search engines for the trivial-page rule.
const SEARCH_ENGINE_HOSTS: &[&str] = &["google.", "bing.", "baidu.", "duckduckgo."];

/// A trivial page carries nothing worth analyzing: blank/new-tab surfaces,
/// `data:`/`chrome://` internals, or a search engine's home page without a
/// query.
pub fn is_trivial_page(url: &str) -> bool {
    let url = url.trim();
    if url.is_empty()
        || url == "about:blank"
        || url.starts_with("about:")
        || url.starts_with("data:")
        || url.starts_with("chrome://")
    {
        return true;
    }
    let Ok(parsed) = url::Url::parse(url) else {
        return false;
    };
    let host = parsed.host_str().unwrap_or_default();
    let is_search_engine = SEARCH_ENGINE_HOSTS
        .iter()
        .any(|engine| host.contains(engine));
    if !is_search_engine {
        return false;
    }
    let path_is_home = matches!(parsed.path(), "" | "/" | "/index.html");
    path_is_home && parsed.query().is_none()
}
