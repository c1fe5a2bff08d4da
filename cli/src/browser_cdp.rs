//! Chromium adapter: implements the core `Tab` trait over CDP.
//!
//! The handler task must be polled for the browser connection to make
//! progress, and aborted once the browser closes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;

use autoweb::browser::{BrowserError, Tab};
use env_config::Settings;

/// A launched Chromium process plus its polled event handler.
pub struct CdpBrowser {
    browser: Browser,
    handler: JoinHandle<()>,
    page: Arc<CdpTab>,
}

/// One CDP page behind the core `Tab` trait.
pub struct CdpTab {
    page: Page,
}

impl CdpBrowser {
    pub async fn launch(settings: &Settings) -> Result<Self, BrowserError> {
        let mut builder = BrowserConfig::builder();
        if !settings.headless_mode {
            builder = builder.with_head();
        }
        if let Some(dir) = &settings.browser_user_data_dir {
            builder = builder.user_data_dir(dir);
        }
        let config = builder
            .build()
            .map_err(|e| BrowserError::Navigation(format!("browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Navigation(format!("browser launch: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Navigation(format!("new page: {e}")))?;
        tracing::info!(headless = settings.headless_mode, "browser launched");

        Ok(Self {
            browser,
            handler,
            page: Arc::new(CdpTab { page }),
        })
    }

    pub fn tab(&self) -> Arc<dyn Tab> {
        Arc::clone(&self.page) as Arc<dyn Tab>
    }

    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            tracing::warn!(error = %e, "browser close failed");
        }
        let _ = self.browser.wait().await;
        self.handler.abort();
    }
}

#[async_trait]
impl Tab for CdpTab {
    async fn url(&self) -> Result<String, BrowserError> {
        self.page
            .url()
            .await
            .map_err(|e| BrowserError::TabGone(e.to_string()))
            .map(|url| url.unwrap_or_default())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| BrowserError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<(), BrowserError> {
        // Best effort: a page that is already settled times out harmlessly.
        let _ = tokio::time::timeout(timeout, self.page.wait_for_navigation()).await;
        Ok(())
    }

    async fn run_js(&self, script: &str) -> Result<serde_json::Value, BrowserError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| BrowserError::Eval(e.to_string()))?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }
}
