//! Schema, row, request, and hit types shared by all backends.

use std::collections::HashMap;

use serde_json::Value;

/// Timestamp format used in scalar time columns (`created_at`, `expire_at`, …).
pub const EXPIRE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Column kind in a collection schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldKind {
    /// Dense float vector of the given dimension.
    Vector(usize),
    /// Variable-length string with a maximum length.
    VarChar(usize),
    Int64,
}

/// One column declaration.
#[derive(Clone, Debug)]
pub struct FieldSchema {
    pub name: String,
    pub kind: FieldKind,
    pub primary: bool,
    pub auto_id: bool,
}

impl FieldSchema {
    pub fn vector(name: &str, dim: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Vector(dim),
            primary: false,
            auto_id: false,
        }
    }

    pub fn varchar(name: &str, max_length: usize) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::VarChar(max_length),
            primary: false,
            auto_id: false,
        }
    }

    pub fn int64(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Int64,
            primary: false,
            auto_id: false,
        }
    }

    pub fn primary_auto(mut self) -> Self {
        self.primary = true;
        self.auto_id = true;
        self
    }
}

/// Collection declaration: columns plus which scalar columns get an INVERTED
/// index (every vector column gets a COSINE AUTOINDEX).
#[derive(Clone, Debug, Default)]
pub struct CollectionSchema {
    pub name: String,
    pub fields: Vec<FieldSchema>,
    pub scalar_indexes: Vec<String>,
}

impl CollectionSchema {
    /// Vector field names in declaration order.
    pub fn vector_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|f| matches!(f.kind, FieldKind::Vector(_)))
            .map(|f| f.name.as_str())
            .collect()
    }

    /// Dimension of the named vector field, if present.
    pub fn vector_dim(&self, name: &str) -> Option<usize> {
        self.fields.iter().find(|f| f.name == name).and_then(|f| match f.kind {
            FieldKind::Vector(dim) => Some(dim),
            _ => None,
        })
    }

    /// True when this schema carries every required field with matching vector dims.
    pub fn is_compatible_with(&self, required: &CollectionSchema) -> bool {
        for want in &required.fields {
            let Some(have) = self.fields.iter().find(|f| f.name == want.name) else {
                return false;
            };
            match (&want.kind, &have.kind) {
                (FieldKind::Vector(a), FieldKind::Vector(b)) => {
                    if a != b {
                        return false;
                    }
                }
                (FieldKind::Vector(_), _) | (_, FieldKind::Vector(_)) => return false,
                _ => {}
            }
        }
        true
    }
}

/// One row to insert: field name → JSON value (vectors as arrays of numbers).
pub type Row = HashMap<String, Value>;

/// One ANN sub-request of a hybrid search.
#[derive(Clone, Debug)]
pub struct AnnRequest {
    pub field: String,
    pub vector: Vec<f32>,
    pub limit: usize,
}

/// One hit returned by a search.
#[derive(Clone, Debug)]
pub struct SearchHit {
    /// Fused (or single-request) score as reported by the backend.
    pub score: f32,
    fields: HashMap<String, Value>,
}

impl SearchHit {
    pub fn new(score: f32, fields: HashMap<String, Value>) -> Self {
        Self { score, fields }
    }

    /// Resilient field getter: direct entry first, then a nested `entity`
    /// object (some backends nest payload fields one level down).
    pub fn field(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.fields.get(name) {
            return Some(v);
        }
        self.fields.get("entity").and_then(|e| e.get(name))
    }

    /// String form of a field; empty when missing or not a string.
    pub fn field_str(&self, name: &str) -> String {
        self.field(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    }
}

/// Drops hits whose `expire_field` timestamp is before `now` or unparseable.
pub fn filter_not_expired(
    hits: Vec<SearchHit>,
    expire_field: &str,
    now: chrono::NaiveDateTime,
) -> Vec<SearchHit> {
    let before = hits.len();
    let kept: Vec<SearchHit> = hits
        .into_iter()
        .filter(|hit| {
            let raw = hit.field_str(expire_field);
            match chrono::NaiveDateTime::parse_from_str(&raw, EXPIRE_TIME_FORMAT) {
                Ok(expire_at) => expire_at >= now,
                Err(_) => false,
            }
        })
        .collect();
    let dropped = before - kept.len();
    if dropped > 0 {
        tracing::debug!(dropped, expire_field, "ttl filtered expired/invalid hits");
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hit(score: f32, fields: &[(&str, Value)]) -> SearchHit {
        SearchHit::new(
            score,
            fields.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
        )
    }

    /// **Scenario**: field lookup falls back to the nested entity object.
    #[test]
    fn hit_field_falls_back_to_entity() {
        let h = hit(0.9, &[("entity", json!({"code": "x = 1"}))]);
        assert_eq!(h.field_str("code"), "x = 1");
        let h = hit(0.9, &[("code", json!("y = 2"))]);
        assert_eq!(h.field_str("code"), "y = 2");
        assert_eq!(h.field_str("missing"), "");
    }

    /// **Scenario**: expired and unparseable timestamps are dropped, future kept.
    #[test]
    fn ttl_filter() {
        let now = chrono::NaiveDate::from_ymd_opt(2026, 6, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let hits = vec![
            hit(0.9, &[("expire_at", json!("2026-06-02T00:00:00"))]),
            hit(0.8, &[("expire_at", json!("2026-05-31T23:59:59"))]),
            hit(0.7, &[("expire_at", json!("not a date"))]),
        ];
        let kept = filter_not_expired(hits, "expire_at", now);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].field_str("expire_at"), "2026-06-02T00:00:00");
    }

    /// **Scenario**: schema compatibility requires presence and matching dims.
    #[test]
    fn schema_compatibility() {
        let required = CollectionSchema {
            name: "c".into(),
            fields: vec![FieldSchema::vector("v", 4), FieldSchema::varchar("s", 10)],
            scalar_indexes: vec![],
        };
        let same = required.clone();
        assert!(same.is_compatible_with(&required));

        let wrong_dim = CollectionSchema {
            name: "c".into(),
            fields: vec![FieldSchema::vector("v", 8), FieldSchema::varchar("s", 10)],
            scalar_indexes: vec![],
        };
        assert!(!wrong_dim.is_compatible_with(&required));

        let missing = CollectionSchema {
            name: "c".into(),
            fields: vec![FieldSchema::vector("v", 4)],
            scalar_indexes: vec![],
        };
        assert!(!missing.is_compatible_with(&required));
    }
}
