//! Object write requests submitted for batch ingestion.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{ClientError, ClientResult};
use crate::ids::{generate_uuid5, CorrelationToken};

/// Fixed per-object framing overhead used by size estimates.
const OBJECT_OVERHEAD_BYTES: usize = 32;

/// Vector attached to an object or a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VectorValue {
    /// One dense embedding.
    Single(Vec<f32>),
    /// A sequence of same-dimension embeddings (late-interaction models).
    Multi(Vec<Vec<f32>>),
}

impl VectorValue {
    /// Returns true for multi-vectors.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        matches!(self, Self::Multi(_))
    }

    /// Dimension of a single vector, or of each inner vector of a multi-vector.
    #[must_use]
    pub fn dimension(&self) -> usize {
        match self {
            Self::Single(values) => values.len(),
            Self::Multi(rows) => rows.first().map_or(0, Vec::len),
        }
    }

    /// Number of `f32` values carried.
    #[must_use]
    pub fn value_count(&self) -> usize {
        match self {
            Self::Single(values) => values.len(),
            Self::Multi(rows) => rows.iter().map(Vec::len).sum(),
        }
    }
}

impl From<Vec<f32>> for VectorValue {
    fn from(value: Vec<f32>) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<Vec<f32>>> for VectorValue {
    fn from(value: Vec<Vec<f32>>) -> Self {
        Self::Multi(value)
    }
}

/// One object to be written by a batch operation.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectWriteRequest {
    /// Caller-assigned correlation token
    pub token: CorrelationToken,

    /// Object id; derived from the token unless set explicitly
    pub id: Uuid,

    /// Target collection; falls back to the client default when `None`
    pub collection: Option<String>,

    /// Tenant for multi-tenant collections
    pub tenant: Option<String>,

    /// Serialized JSON object with the object's properties
    pub properties: Bytes,

    /// Unnamed vector
    pub vector: Option<VectorValue>,

    /// Named vectors
    pub named_vectors: BTreeMap<String, VectorValue>,
}

impl ObjectWriteRequest {
    /// Creates a request from a JSON properties value.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Validation` when `properties` is neither an
    /// object nor `null`.
    pub fn new(token: impl Into<CorrelationToken>, properties: &JsonValue) -> ClientResult<Self> {
        let payload = match properties {
            JsonValue::Object(_) => serde_json::to_vec(properties)?,
            JsonValue::Null => b"{}".to_vec(),
            other => {
                return Err(ClientError::validation(format!(
                    "object properties must be a JSON object, got {}",
                    json_kind(other)
                )))
            }
        };
        Ok(Self::from_payload(token, Bytes::from(payload)))
    }

    /// Creates a request from already serialized JSON properties.
    #[must_use]
    pub fn from_payload(token: impl Into<CorrelationToken>, properties: Bytes) -> Self {
        let token = token.into();
        Self {
            id: generate_uuid5(token.as_str(), ""),
            token,
            collection: None,
            tenant: None,
            properties,
            vector: None,
            named_vectors: BTreeMap::new(),
        }
    }

    /// Sets an explicit object id (builder pattern).
    #[must_use]
    pub fn with_id(mut self, id: Uuid) -> Self {
        self.id = id;
        self
    }

    /// Sets the target collection (builder pattern).
    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = Some(collection.into());
        self
    }

    /// Sets the tenant (builder pattern).
    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    /// Sets the unnamed vector (builder pattern).
    #[must_use]
    pub fn with_vector(mut self, vector: impl Into<VectorValue>) -> Self {
        self.vector = Some(vector.into());
        self
    }

    /// Adds a named vector (builder pattern).
    #[must_use]
    pub fn with_named_vector(
        mut self,
        name: impl Into<String>,
        vector: impl Into<VectorValue>,
    ) -> Self {
        self.named_vectors.insert(name.into(), vector.into());
        self
    }

    /// Returns true when any attached vector is a multi-vector.
    #[must_use]
    pub fn has_multi_vector(&self) -> bool {
        self.vector.as_ref().is_some_and(VectorValue::is_multi)
            || self.named_vectors.values().any(VectorValue::is_multi)
    }

    /// Upper-bound estimate of the encoded size in bytes.
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        let vectors: usize = self
            .vector
            .iter()
            .chain(self.named_vectors.values())
            .map(|vector| vector.value_count() * 4 + 2)
            .sum();
        let names: usize = self.named_vectors.keys().map(String::len).sum();
        OBJECT_OVERHEAD_BYTES
            + 36
            + self.properties.len()
            + self.collection.as_ref().map_or(0, String::len)
            + self.tenant.as_ref().map_or(0, String::len)
            + vectors
            + names
    }

    /// [`estimated_size`](Self::estimated_size) plus the collection name the
    /// encoder fills in when the object names none.
    #[must_use]
    pub fn estimated_size_with_default(&self, default_collection: Option<&str>) -> usize {
        let fallback = match (&self.collection, default_collection) {
            (None, Some(default)) => default.len(),
            _ => 0,
        };
        self.estimated_size() + fallback
    }
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_id_derived_from_token() {
        let a = ObjectWriteRequest::new("article-1", &json!({"title": "a"})).unwrap();
        let b = ObjectWriteRequest::new("article-1", &json!({"title": "b"})).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.id, generate_uuid5("article-1", ""));

        let explicit = Uuid::new_v4();
        assert_eq!(a.with_id(explicit).id, explicit);
    }

    #[test]
    fn test_rejects_non_object_properties() {
        let err = ObjectWriteRequest::new("t", &json!([1, 2])).unwrap_err();
        assert!(err.to_string().contains("an array"));

        let empty = ObjectWriteRequest::new("t", &JsonValue::Null).unwrap();
        assert_eq!(&empty.properties[..], b"{}");
    }

    #[test]
    fn test_estimated_size_grows_with_vectors() {
        let bare = ObjectWriteRequest::new("t", &json!({"k": "v"})).unwrap();
        let with_vector = bare.clone().with_vector(vec![0.0_f32; 128]);
        assert!(with_vector.estimated_size() >= bare.estimated_size() + 512);

        let multi = bare
            .clone()
            .with_named_vector("colbert", vec![vec![0.0_f32; 4]; 3]);
        assert!(multi.has_multi_vector());
        assert!(!with_vector.has_multi_vector());
    }

    #[test]
    fn test_estimate_counts_default_collection_only_when_used() {
        let bare = ObjectWriteRequest::new("t", &json!({"k": "v"})).unwrap();
        let base = bare.estimated_size();
        assert_eq!(bare.estimated_size_with_default(None), base);
        assert_eq!(bare.estimated_size_with_default(Some("Articles")), base + 8);

        let named = bare.with_collection("Docs");
        assert_eq!(
            named.estimated_size_with_default(Some("Articles")),
            named.estimated_size()
        );
    }
}
