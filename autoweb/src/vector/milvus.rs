//! Milvus backend over the v2 REST API.
//!
//! Every call goes through [`run_with_retry`]; the server's error message
//! drives retryability, so a schema complaint aborts while a gRPC hiccup
//! backs off and retries.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use super::retry::{run_with_retry, RetryPolicy};
use super::{
    AnnRequest, CollectionSchema, FieldKind, FieldSchema, KbDocument, Row, SearchHit,
    VectorBackend, VectorError,
};

/// Parses a store URI into `(host, port)`. Accepts bare `host:port` and full
/// `http://host:port` forms; defaults port 19530.
pub fn parse_uri(uri: &str) -> (String, u16) {
    let raw = uri.trim();
    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("http://{raw}")
    };
    match url::Url::parse(&with_scheme) {
        Ok(parsed) => (
            parsed.host_str().unwrap_or("localhost").to_string(),
            parsed.port().unwrap_or(19530),
        ),
        Err(_) => ("localhost".to_string(), 19530),
    }
}

/// REST v2 Milvus client.
pub struct MilvusClient {
    http: reqwest::Client,
    base: String,
    policy: RetryPolicy,
}

impl MilvusClient {
    pub fn new(uri: &str) -> Self {
        let (host, port) = parse_uri(uri);
        Self {
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base: format!("http://{host}:{port}"),
            policy: RetryPolicy::default(),
        }
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, VectorError> {
        let url = format!("{}{}", self.base, path);
        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| VectorError::Transport(format!("{url}: {e}")))?;
        let status = response.status();
        let payload: Value = response
            .json()
            .await
            .map_err(|e| VectorError::Decode(format!("{url}: {e}")))?;
        if !status.is_success() {
            return Err(VectorError::Transport(format!("{url}: http {status}")));
        }
        match payload.get("code").and_then(Value::as_i64) {
            Some(0) | None => Ok(payload),
            Some(code) => {
                let message = payload
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown server error");
                Err(VectorError::Rejected(format!("code {code}: {message}")))
            }
        }
    }

    async fn call(&self, operation: &str, path: &str, body: Value) -> Result<Value, VectorError> {
        run_with_retry(operation, self.policy, || self.post(path, body.clone())).await
    }

    fn field_to_json(field: &FieldSchema) -> Value {
        let mut obj = Map::new();
        obj.insert("fieldName".into(), json!(field.name));
        match field.kind {
            FieldKind::Vector(dim) => {
                obj.insert("dataType".into(), json!("FloatVector"));
                obj.insert("elementTypeParams".into(), json!({ "dim": dim }));
            }
            FieldKind::VarChar(max_length) => {
                obj.insert("dataType".into(), json!("VarChar"));
                obj.insert("elementTypeParams".into(), json!({ "max_length": max_length }));
            }
            FieldKind::Int64 => {
                obj.insert("dataType".into(), json!("Int64"));
            }
        }
        if field.primary {
            obj.insert("isPrimary".into(), json!(true));
        }
        Value::Object(obj)
    }

    fn hit_from_json(value: &Value) -> SearchHit {
        let score = value
            .get("distance")
            .or_else(|| value.get("score"))
            .and_then(Value::as_f64)
            .unwrap_or(0.0) as f32;
        let fields = value
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter(|(k, _)| *k != "distance" && *k != "score")
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect()
            })
            .unwrap_or_default();
        SearchHit::new(score, fields)
    }

    fn hits_from_data(payload: &Value) -> Vec<SearchHit> {
        payload
            .get("data")
            .and_then(Value::as_array)
            .map(|rows| rows.iter().map(Self::hit_from_json).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl VectorBackend for MilvusClient {
    async fn connect(&self) -> Result<(), VectorError> {
        let (host, port) = {
            let trimmed = self.base.trim_start_matches("http://");
            let mut parts = trimmed.splitn(2, ':');
            (
                parts.next().unwrap_or("localhost").to_string(),
                parts.next().unwrap_or("19530").to_string(),
            )
        };
        self.call(
            "connect",
            "/v2/vectordb/collections/list",
            json!({}),
        )
        .await?;
        tracing::info!(%host, %port, "vector store connected");
        Ok(())
    }

    async fn has_collection(&self, name: &str) -> Result<bool, VectorError> {
        let payload = self
            .call(
                "has_collection",
                "/v2/vectordb/collections/has",
                json!({ "collectionName": name }),
            )
            .await?;
        Ok(payload
            .pointer("/data/has")
            .and_then(Value::as_bool)
            .unwrap_or(false))
    }

    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema, VectorError> {
        let payload = self
            .call(
                "describe_collection",
                "/v2/vectordb/collections/describe",
                json!({ "collectionName": name }),
            )
            .await?;
        let fields = payload
            .pointer("/data/fields")
            .and_then(Value::as_array)
            .ok_or_else(|| VectorError::Decode("describe: missing fields".into()))?;
        let mut out = Vec::new();
        for f in fields {
            let field_name = f
                .get("name")
                .or_else(|| f.get("fieldName"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let data_type = f
                .get("type")
                .or_else(|| f.get("dataType"))
                .and_then(Value::as_str)
                .unwrap_or_default();
            let kind = if data_type.eq_ignore_ascii_case("floatvector") {
                let dim = f
                    .pointer("/params/dim")
                    .or_else(|| f.pointer("/elementTypeParams/dim"))
                    .and_then(|v| {
                        v.as_u64()
                            .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
                    })
                    .unwrap_or(0) as usize;
                FieldKind::Vector(dim)
            } else if data_type.eq_ignore_ascii_case("int64") {
                FieldKind::Int64
            } else {
                FieldKind::VarChar(0)
            };
            out.push(FieldSchema {
                name: field_name,
                kind,
                primary: f.get("primaryKey").and_then(Value::as_bool).unwrap_or(false),
                auto_id: false,
            });
        }
        Ok(CollectionSchema {
            name: name.to_string(),
            fields: out,
            scalar_indexes: Vec::new(),
        })
    }

    async fn create_collection(&self, schema: &CollectionSchema) -> Result<(), VectorError> {
        let mut index_params: Vec<Value> = schema
            .vector_fields()
            .iter()
            .map(|field| {
                json!({
                    "fieldName": field,
                    "indexName": format!("{field}_idx"),
                    "metricType": "COSINE",
                    "indexType": "AUTOINDEX",
                })
            })
            .collect();
        for scalar in &schema.scalar_indexes {
            index_params.push(json!({
                "fieldName": scalar,
                "indexName": format!("{scalar}_idx"),
                "indexType": "INVERTED",
            }));
        }
        self.call(
            "create_collection",
            "/v2/vectordb/collections/create",
            json!({
                "collectionName": schema.name,
                "schema": {
                    "autoId": true,
                    "enableDynamicField": true,
                    "fields": schema.fields.iter().map(Self::field_to_json).collect::<Vec<_>>(),
                },
                "indexParams": index_params,
            }),
        )
        .await?;
        self.call(
            "load_collection",
            "/v2/vectordb/collections/load",
            json!({ "collectionName": schema.name }),
        )
        .await?;
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> Result<(), VectorError> {
        self.call(
            "drop_collection",
            "/v2/vectordb/collections/drop",
            json!({ "collectionName": name }),
        )
        .await?;
        Ok(())
    }

    async fn insert_and_flush(&self, collection: &str, row: Row) -> Result<(), VectorError> {
        self.call(
            "insert",
            "/v2/vectordb/entities/insert",
            json!({ "collectionName": collection, "data": [row] }),
        )
        .await?;
        self.call(
            "flush",
            "/v2/vectordb/collections/flush",
            json!({ "collectionName": collection }),
        )
        .await?;
        Ok(())
    }

    async fn delete(&self, collection: &str, filter: &str) -> Result<(), VectorError> {
        self.call(
            "delete",
            "/v2/vectordb/entities/delete",
            json!({ "collectionName": collection, "filter": filter }),
        )
        .await?;
        Ok(())
    }

    async fn hybrid_search(
        &self,
        collection: &str,
        requests: &[AnnRequest],
        weights: &[f32],
        limit: usize,
        output_fields: &[&str],
    ) -> Result<Vec<SearchHit>, VectorError> {
        let started = std::time::Instant::now();
        let search: Vec<Value> = requests
            .iter()
            .map(|r| {
                json!({
                    "data": [r.vector],
                    "annsField": r.field,
                    "limit": r.limit,
                    "metricType": "COSINE",
                })
            })
            .collect();
        let payload = self
            .call(
                "hybrid_search",
                "/v2/vectordb/entities/advanced_search",
                json!({
                    "collectionName": collection,
                    "search": search,
                    "rerank": { "strategy": "weighted", "params": { "weights": weights } },
                    "limit": limit,
                    "outputFields": output_fields,
                }),
            )
            .await?;
        let hits = Self::hits_from_data(&payload);
        tracing::debug!(
            collection,
            hits = hits.len(),
            limit,
            cost_ms = started.elapsed().as_millis() as u64,
            "hybrid_search done"
        );
        Ok(hits)
    }

    async fn search(
        &self,
        collection: &str,
        request: &AnnRequest,
        filter: Option<&str>,
        output_fields: &[&str],
    ) -> Result<Vec<SearchHit>, VectorError> {
        let mut body = json!({
            "collectionName": collection,
            "data": [request.vector],
            "annsField": request.field,
            "limit": request.limit,
            "outputFields": output_fields,
        });
        if let Some(f) = filter {
            body["filter"] = json!(f);
        }
        let payload = self
            .call("search", "/v2/vectordb/entities/search", body)
            .await?;
        Ok(Self::hits_from_data(&payload))
    }

    async fn add_documents(
        &self,
        collection: &str,
        docs: Vec<KbDocument>,
    ) -> Result<(), VectorError> {
        let data: Vec<Value> = docs
            .into_iter()
            .map(|doc| {
                let mut row = Map::new();
                row.insert("text".into(), Value::String(doc.text));
                row.insert(
                    "vector".into(),
                    Value::Array(doc.vector.iter().map(|f| Value::from(*f as f64)).collect()),
                );
                for (k, v) in doc.metadata {
                    row.insert(k, v);
                }
                Value::Object(row)
            })
            .collect();
        self.call(
            "add_documents",
            "/v2/vectordb/entities/insert",
            json!({ "collectionName": collection, "data": data }),
        )
        .await?;
        self.call(
            "flush",
            "/v2/vectordb/collections/flush",
            json!({ "collectionName": collection }),
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// **Scenario**: bare, schemed, and port-less URIs all parse; default port 19530.
    #[test]
    fn uri_parsing() {
        assert_eq!(parse_uri("localhost:19530"), ("localhost".into(), 19530));
        assert_eq!(parse_uri("http://milvus:9091"), ("milvus".into(), 9091));
        assert_eq!(parse_uri("milvus.internal"), ("milvus.internal".into(), 19530));
        assert_eq!(parse_uri("  10.0.0.2:19530  "), ("10.0.0.2".into(), 19530));
    }

    /// **Scenario**: hit decoding reads distance-or-score and keeps payload fields.
    #[test]
    fn hit_decoding() {
        let hit = MilvusClient::hit_from_json(&json!({
            "distance": 0.91, "cache_id": "abc", "code": "x = 1"
        }));
        assert!((hit.score - 0.91).abs() < 1e-6);
        assert_eq!(hit.field_str("cache_id"), "abc");

        let hit = MilvusClient::hit_from_json(&json!({ "score": 0.5 }));
        assert!((hit.score - 0.5).abs() < 1e-6);
    }
}
