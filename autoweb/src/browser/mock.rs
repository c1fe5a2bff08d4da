//! Scriptable tab double for tests.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{BrowserError, Tab};

/// A fake tab with a settable URL and DOM payload.
pub struct MockTab {
    url: Mutex<String>,
    dom: Mutex<String>,
    navigations: Mutex<Vec<String>>,
}

impl MockTab {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Mutex::new(url.into()),
            dom: Mutex::new(r#"{"t":"body"}"#.to_string()),
            navigations: Mutex::new(Vec::new()),
        }
    }

    pub fn set_url(&self, url: impl Into<String>) {
        *self.url.lock().unwrap() = url.into();
    }

    pub fn set_dom(&self, dom: impl Into<String>) {
        *self.dom.lock().unwrap() = dom.into();
    }

    /// URLs passed to `navigate`, in order.
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }
}

#[async_trait]
impl Tab for MockTab {
    async fn url(&self) -> Result<String, BrowserError> {
        Ok(self.url.lock().unwrap().clone())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.navigations.lock().unwrap().push(url.to_string());
        *self.url.lock().unwrap() = url.to_string();
        Ok(())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<(), BrowserError> {
        Ok(())
    }

    async fn run_js(&self, _script: &str) -> Result<Value, BrowserError> {
        Ok(Value::String(self.dom.lock().unwrap().clone()))
    }
}
