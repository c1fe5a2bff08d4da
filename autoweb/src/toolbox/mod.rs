//! Side-effect helpers surfaced to generated code (through the runner host)
//! and reused by the RAG ingestion path.
//!
//! File output routes under `output/<host>/…` once `set_current_url` has been
//! called, so every site's artifacts land in their own directory.

use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ToolboxError {
    #[error("http: {0}")]
    Http(String),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("db: {0}")]
    Db(String),
    #[error("serialize: {0}")]
    Serialize(String),
}

/// Shared helper surface with per-domain output routing.
pub struct Toolbox {
    http: reqwest::Client,
    output_dir: PathBuf,
    current_host: RwLock<Option<String>>,
}

impl Toolbox {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            output_dir: output_dir.into(),
            current_host: RwLock::new(None),
        }
    }

    /// Routes subsequent file output under `output/<host>/`.
    pub fn set_current_url(&self, url: &str) {
        let host = url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.trim_start_matches("www.").to_string()));
        *self.current_host.write().unwrap() = host;
    }

    /// Directory files are written into: `output/<host>/` or plain `output/`.
    pub fn target_dir(&self) -> PathBuf {
        match self.current_host.read().unwrap().as_deref() {
            Some(host) if !host.is_empty() => self.output_dir.join(host),
            _ => self.output_dir.clone(),
        }
    }

    /// Plain HTTP request; returns the body text.
    pub async fn http_request(
        &self,
        url: &str,
        method: &str,
        headers: &[(String, String)],
        params: &[(String, String)],
        data: Option<&Value>,
    ) -> Result<String, ToolboxError> {
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|e| ToolboxError::Http(e.to_string()))?;
        let mut request = self.http.request(method, url).query(params);
        for (name, value) in headers {
            request = request.header(name, value);
        }
        if let Some(body) = data {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| ToolboxError::Http(e.to_string()))?;
        response
            .text()
            .await
            .map_err(|e| ToolboxError::Http(e.to_string()))
    }

    /// Downloads a URL into the routed output directory; returns the file path.
    pub async fn download_file(&self, url: &str, filename: &str) -> Result<PathBuf, ToolboxError> {
        let bytes = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| ToolboxError::Http(e.to_string()))?
            .bytes()
            .await
            .map_err(|e| ToolboxError::Http(e.to_string()))?;
        let dir = self.target_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(filename);
        std::fs::write(&path, &bytes)?;
        tracing::info!(path = %path.display(), bytes = bytes.len(), "file downloaded");
        Ok(path)
    }

    /// Inserts one row into a SQLite table under the routed output directory
    /// (`data.sqlite`), creating the table from the row's keys on first use.
    pub fn db_insert(&self, table: &str, row: &serde_json::Map<String, Value>) -> Result<(), ToolboxError> {
        if row.is_empty() {
            return Ok(());
        }
        let dir = self.target_dir();
        std::fs::create_dir_all(&dir)?;
        let conn = rusqlite::Connection::open(dir.join("data.sqlite"))
            .map_err(|e| ToolboxError::Db(e.to_string()))?;

        let safe_table: String = table
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
            .collect();
        let columns: Vec<String> = row
            .keys()
            .map(|k| {
                k.chars()
                    .map(|c| if c.is_alphanumeric() || c == '_' { c } else { '_' })
                    .collect()
            })
            .collect();
        let column_defs = columns
            .iter()
            .map(|c| format!("\"{c}\" TEXT"))
            .collect::<Vec<_>>()
            .join(", ");
        conn.execute(
            &format!("CREATE TABLE IF NOT EXISTS \"{safe_table}\" ({column_defs})"),
            [],
        )
        .map_err(|e| ToolboxError::Db(e.to_string()))?;

        let placeholders = (1..=columns.len())
            .map(|i| format!("?{i}"))
            .collect::<Vec<_>>()
            .join(", ");
        let column_list = columns
            .iter()
            .map(|c| format!("\"{c}\""))
            .collect::<Vec<_>>()
            .join(", ");
        let values: Vec<String> = row
            .values()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        conn.execute(
            &format!("INSERT INTO \"{safe_table}\" ({column_list}) VALUES ({placeholders})"),
            rusqlite::params_from_iter(values.iter()),
        )
        .map_err(|e| ToolboxError::Db(e.to_string()))?;
        Ok(())
    }

    /// Writes rows to a JSON or CSV file (by extension) in the routed output
    /// directory; returns the file path.
    pub fn save_data(&self, rows: &[Value], filename: &str) -> Result<PathBuf, ToolboxError> {
        let dir = self.target_dir();
        std::fs::create_dir_all(&dir)?;
        let path = dir.join(filename);

        if Path::new(filename)
            .extension()
            .map(|e| e.eq_ignore_ascii_case("csv"))
            .unwrap_or(false)
        {
            let mut writer = csv::Writer::from_path(&path)
                .map_err(|e| ToolboxError::Serialize(e.to_string()))?;
            // Header from the union of keys, first-row order first.
            let mut columns: Vec<String> = Vec::new();
            for row in rows {
                if let Value::Object(obj) = row {
                    for key in obj.keys() {
                        if !columns.contains(key) {
                            columns.push(key.clone());
                        }
                    }
                }
            }
            writer
                .write_record(&columns)
                .map_err(|e| ToolboxError::Serialize(e.to_string()))?;
            for row in rows {
                if let Value::Object(obj) = row {
                    let record: Vec<String> = columns
                        .iter()
                        .map(|c| match obj.get(c) {
                            Some(Value::String(s)) => s.clone(),
                            Some(other) => other.to_string(),
                            None => String::new(),
                        })
                        .collect();
                    writer
                        .write_record(&record)
                        .map_err(|e| ToolboxError::Serialize(e.to_string()))?;
                }
            }
            writer
                .flush()
                .map_err(|e| ToolboxError::Serialize(e.to_string()))?;
        } else {
            let content = serde_json::to_string_pretty(rows)
                .map_err(|e| ToolboxError::Serialize(e.to_string()))?;
            std::fs::write(&path, content)?;
        }
        tracing::info!(path = %path.display(), rows = rows.len(), "data saved");
        Ok(path)
    }

    /// Strips tags/scripts/styles and collapses whitespace.
    pub fn clean_html(html: &str) -> String {
        let no_scripts = regex::Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>")
            .map(|re| re.replace_all(html, " ").into_owned())
            .unwrap_or_else(|_| html.to_string());
        let no_tags = regex::Regex::new(r"<[^>]+>")
            .map(|re| re.replace_all(&no_scripts, " ").into_owned())
            .unwrap_or(no_scripts);
        no_tags.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    /// User-facing notification line.
    pub fn notify(message: &str) {
        tracing::info!(target: "autoweb::notify", "{message}");
        println!("[notify] {message}");
    }
}
