//! Field registry: the queryable-schema ledger for dynamic metadata fields.
//!
//! Every KB insert registers its dynamic field names first, so the query
//! analyzer always sees at least the schema of rows already visible. Backends:
//! a JSON file (default) and Redis.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::AgentError;

/// Fixed metadata columns present on every document.
pub const FIXED_FILTERABLE_FIELDS: &[&str] = &[
    "source",
    "title",
    "category",
    "data_type",
    "platform",
    "crawled_at",
];

/// Promoted type of a dynamic field. Number wins over string once seen.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Number,
    String,
}

/// Per-field bookkeeping.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FieldMeta {
    pub first_seen: String,
    pub count: u64,
    #[serde(rename = "type")]
    pub field_type: FieldType,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RegistryData {
    #[serde(default)]
    pub dynamic_fields: BTreeMap<String, FieldMeta>,
}

/// Persistence backend for the registry.
#[async_trait::async_trait]
pub trait RegistryStore: Send + Sync {
    async fn load(&self) -> Result<RegistryData, AgentError>;
    async fn save(&self, data: &RegistryData) -> Result<(), AgentError>;
}

/// JSON file backend (`data/field_registry.json`).
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait::async_trait]
impl RegistryStore for JsonFileStore {
    async fn load(&self) -> Result<RegistryData, AgentError> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => serde_json::from_str(&content)
                .map_err(|e| AgentError::failed(format!("field registry parse: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(RegistryData::default()),
            Err(e) => Err(AgentError::failed(format!("field registry read: {e}"))),
        }
    }

    async fn save(&self, data: &RegistryData) -> Result<(), AgentError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AgentError::failed(format!("field registry mkdir: {e}")))?;
        }
        let content = serde_json::to_string_pretty(data)
            .map_err(|e| AgentError::failed(format!("field registry serialize: {e}")))?;
        std::fs::write(&self.path, content)
            .map_err(|e| AgentError::failed(format!("field registry write: {e}")))
    }
}

const REDIS_KEY: &str = "autoweb:field_registry";

/// Redis backend; the whole registry lives under one JSON key.
pub struct RedisStore {
    client: redis::Client,
}

impl RedisStore {
    pub fn new(url: &str) -> Result<Self, AgentError> {
        Ok(Self {
            client: redis::Client::open(url)
                .map_err(|e| AgentError::failed(format!("redis open: {e}")))?,
        })
    }
}

#[async_trait::async_trait]
impl RegistryStore for RedisStore {
    async fn load(&self) -> Result<RegistryData, AgentError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AgentError::failed(format!("redis connect: {e}")))?;
        let raw: Option<String> = redis::cmd("GET")
            .arg(REDIS_KEY)
            .query_async(&mut conn)
            .await
            .map_err(|e| AgentError::failed(format!("redis get: {e}")))?;
        match raw {
            Some(json) => serde_json::from_str(&json)
                .map_err(|e| AgentError::failed(format!("field registry parse: {e}"))),
            None => Ok(RegistryData::default()),
        }
    }

    async fn save(&self, data: &RegistryData) -> Result<(), AgentError> {
        let mut conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| AgentError::failed(format!("redis connect: {e}")))?;
        let json = serde_json::to_string(data)
            .map_err(|e| AgentError::failed(format!("field registry serialize: {e}")))?;
        redis::cmd("SET")
            .arg(REDIS_KEY)
            .arg(json)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| AgentError::failed(format!("redis set: {e}")))
    }
}

/// The registry proper: cached in memory, persisted through a [`RegistryStore`].
pub struct FieldRegistry {
    store: Box<dyn RegistryStore>,
    cache: Mutex<Option<RegistryData>>,
}

impl FieldRegistry {
    pub fn new(store: Box<dyn RegistryStore>) -> Self {
        Self {
            store,
            cache: Mutex::new(None),
        }
    }

    async fn data(&self) -> Result<RegistryData, AgentError> {
        if let Some(data) = self.cache.lock().unwrap().clone() {
            return Ok(data);
        }
        let loaded = self.store.load().await?;
        *self.cache.lock().unwrap() = Some(loaded.clone());
        Ok(loaded)
    }

    /// Registers one batch of `(name, is_number)` observations: increments
    /// counts, stamps first-seen dates, and promotes string → number when a
    /// numeric observation arrives.
    pub async fn register(&self, fields: &[(String, bool)]) -> Result<(), AgentError> {
        if fields.is_empty() {
            return Ok(());
        }
        let mut data = self.data().await?;
        let today = chrono::Local::now().format("%Y-%m-%d").to_string();
        for (name, is_number) in fields {
            let observed = if *is_number {
                FieldType::Number
            } else {
                FieldType::String
            };
            data.dynamic_fields
                .entry(name.clone())
                .and_modify(|meta| {
                    meta.count += 1;
                    if observed == FieldType::Number {
                        meta.field_type = FieldType::Number;
                    }
                })
                .or_insert_with(|| FieldMeta {
                    first_seen: today.clone(),
                    count: 1,
                    field_type: observed,
                });
        }
        self.store.save(&data).await?;
        *self.cache.lock().unwrap() = Some(data);
        Ok(())
    }

    /// All filterable field names: fixed first, then dynamic by frequency.
    pub async fn all_filterable_fields(&self) -> Result<Vec<String>, AgentError> {
        let data = self.data().await?;
        let mut dynamic: Vec<(&String, &FieldMeta)> = data.dynamic_fields.iter().collect();
        dynamic.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
        Ok(FIXED_FILTERABLE_FIELDS
            .iter()
            .map(|s| s.to_string())
            .chain(dynamic.into_iter().map(|(name, _)| name.clone()))
            .collect())
    }

    /// Prompt-friendly listing consumed by the query analyzer: fixed fields,
    /// then dynamic fields ranked by count with type annotations.
    pub async fn format_for_prompt(&self) -> Result<String, AgentError> {
        let data = self.data().await?;
        let mut out = format!("Fixed fields: {}", FIXED_FILTERABLE_FIELDS.join(", "));
        let mut dynamic: Vec<(&String, &FieldMeta)> = data.dynamic_fields.iter().collect();
        if dynamic.is_empty() {
            return Ok(out);
        }
        dynamic.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.cmp(b.0)));
        out.push_str("\nDynamic fields (name, type, seen):");
        for (name, meta) in dynamic {
            let ty = match meta.field_type {
                FieldType::Number => "number",
                FieldType::String => "string",
            };
            out.push_str(&format!("\n- {name} ({ty}, {}x)", meta.count));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn json_registry(dir: &std::path::Path) -> FieldRegistry {
        FieldRegistry::new(Box::new(JsonFileStore::new(dir.join("field_registry.json"))))
    }

    /// **Scenario**: registration persists counts and first-seen dates; number
    /// wins over string on promotion.
    #[tokio::test]
    async fn register_and_promote() {
        let dir = tempfile::tempdir().unwrap();
        let reg = json_registry(dir.path());
        reg.register(&[("rating".into(), false)]).await.unwrap();
        reg.register(&[("rating".into(), true), ("year".into(), true)])
            .await
            .unwrap();

        // Reload from disk through a fresh instance.
        let reg2 = json_registry(dir.path());
        let listing = reg2.format_for_prompt().await.unwrap();
        assert!(listing.contains("rating (number, 2x)"));
        assert!(listing.contains("year (number, 1x)"));
        assert!(listing.starts_with("Fixed fields: source, title"));
    }

    /// **Scenario**: all_filterable_fields puts fixed fields first and ranks
    /// dynamic fields by count.
    #[tokio::test]
    async fn field_ordering() {
        let dir = tempfile::tempdir().unwrap();
        let reg = json_registry(dir.path());
        reg.register(&[("rare".into(), false)]).await.unwrap();
        reg.register(&[("common".into(), true)]).await.unwrap();
        reg.register(&[("common".into(), true)]).await.unwrap();

        let fields = reg.all_filterable_fields().await.unwrap();
        assert_eq!(&fields[..6], FIXED_FILTERABLE_FIELDS);
        let common_pos = fields.iter().position(|f| f == "common").unwrap();
        let rare_pos = fields.iter().position(|f| f == "rare").unwrap();
        assert!(common_pos < rare_pos);
    }

    /// **Scenario**: a missing registry file loads as empty, not an error.
    #[tokio::test]
    async fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let reg = json_registry(dir.path());
        let fields = reg.all_filterable_fields().await.unwrap();
        assert_eq!(fields.len(), FIXED_FILTERABLE_FIELDS.len());
    }
}
