//! Structured query descriptions and decoded result records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use crate::object::VectorValue;

/// Name under which an unnamed vector is reported in `QueryRecord::vectors`.
pub const DEFAULT_VECTOR_NAME: &str = "default";

/// Replica agreement required for a read or write.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConsistencyLevel {
    One,
    Quorum,
    All,
}

/// Comparison operator of a property filter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterOperator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    Like,
    ContainsAny,
    ContainsAll,
}

/// Literal compared against a property.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FilterValue {
    Text(String),
    Int(i64),
    Number(f64),
    Boolean(bool),
    TextArray(Vec<String>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for FilterValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Boolean(value)
    }
}

/// Filter predicate tree.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Filter {
    Property {
        path: Vec<String>,
        operator: FilterOperator,
        value: FilterValue,
    },
    IsNull {
        path: Vec<String>,
        is_null: bool,
    },
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

impl Filter {
    /// Builds a comparison against a top-level property.
    #[must_use]
    pub fn property(
        name: impl Into<String>,
        operator: FilterOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        Self::Property {
            path: vec![name.into()],
            operator,
            value: value.into(),
        }
    }

    /// Shorthand for an equality comparison.
    #[must_use]
    pub fn equal(name: impl Into<String>, value: impl Into<FilterValue>) -> Self {
        Self::property(name, FilterOperator::Equal, value)
    }

    #[must_use]
    pub fn is_null(name: impl Into<String>, is_null: bool) -> Self {
        Self::IsNull {
            path: vec![name.into()],
            is_null,
        }
    }

    /// Combines with another filter under a logical AND.
    #[must_use]
    pub fn and(self, other: Filter) -> Self {
        match self {
            Self::And(mut operands) => {
                operands.push(other);
                Self::And(operands)
            }
            first => Self::And(vec![first, other]),
        }
    }

    /// Combines with another filter under a logical OR.
    #[must_use]
    pub fn or(self, other: Filter) -> Self {
        match self {
            Self::Or(mut operands) => {
                operands.push(other);
                Self::Or(operands)
            }
            first => Self::Or(vec![first, other]),
        }
    }
}

/// Vector similarity search parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearVector {
    pub vector: VectorValue,
    pub certainty: Option<f64>,
    pub distance: Option<f64>,
    /// Named vectors to search; empty searches the unnamed vector.
    #[serde(default)]
    pub target_vectors: Vec<String>,
}

impl NearVector {
    #[must_use]
    pub fn new(vector: impl Into<VectorValue>) -> Self {
        Self {
            vector: vector.into(),
            certainty: None,
            distance: None,
            target_vectors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }

    #[must_use]
    pub fn with_certainty(mut self, certainty: f64) -> Self {
        self.certainty = Some(certainty);
        self
    }

    #[must_use]
    pub fn with_target_vector(mut self, name: impl Into<String>) -> Self {
        self.target_vectors.push(name.into());
        self
    }
}

/// Image similarity search, vectorised server-side.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NearImage {
    /// Base64-encoded image bytes.
    pub image: String,
    pub certainty: Option<f64>,
    pub distance: Option<f64>,
    #[serde(default)]
    pub target_vectors: Vec<String>,
}

impl NearImage {
    #[must_use]
    pub fn new(image_base64: impl Into<String>) -> Self {
        Self {
            image: image_base64.into(),
            certainty: None,
            distance: None,
            target_vectors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_distance(mut self, distance: f64) -> Self {
        self.distance = Some(distance);
        self
    }

    #[must_use]
    pub fn with_certainty(mut self, certainty: f64) -> Self {
        self.certainty = Some(certainty);
        self
    }

    #[must_use]
    pub fn with_target_vector(mut self, name: impl Into<String>) -> Self {
        self.target_vectors.push(name.into());
        self
    }
}

/// Keyword plus vector fusion search.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HybridQuery {
    pub query: String,
    /// 0.0 is pure keyword, 1.0 is pure vector.
    pub alpha: f32,
    pub vector: Option<VectorValue>,
    #[serde(default)]
    pub properties: Vec<String>,
    #[serde(default)]
    pub target_vectors: Vec<String>,
}

impl HybridQuery {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            alpha: 0.75,
            vector: None,
            properties: Vec::new(),
            target_vectors: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_alpha(mut self, alpha: f32) -> Self {
        self.alpha = alpha;
        self
    }

    #[must_use]
    pub fn with_vector(mut self, vector: impl Into<VectorValue>) -> Self {
        self.vector = Some(vector.into());
        self
    }
}

/// Which search drives the query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Plain object listing, optionally filtered.
    Fetch,
    NearVector(NearVector),
    NearImage(NearImage),
    Hybrid(HybridQuery),
}

/// Retrieval-augmented generation applied to the results.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerativeParams {
    /// Prompt evaluated once per result; `{property}` placeholders are filled server-side.
    pub single_prompt: Option<String>,
    /// Task evaluated once over all results.
    pub grouped_task: Option<String>,
    /// Properties passed to the grouped task; empty passes all.
    #[serde(default)]
    pub grouped_properties: Vec<String>,
}

/// Grouping of results by a property value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupBy {
    pub property: String,
    pub number_of_groups: u32,
    pub objects_per_group: u32,
}

/// A reference property to follow, returning properties of the linked objects.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryReference {
    /// Reference property on the queried collection.
    pub link_on: String,
    #[serde(default)]
    pub return_properties: Vec<String>,
    /// Restricts multi-target references to one collection.
    pub target_collection: Option<String>,
}

impl QueryReference {
    #[must_use]
    pub fn new(link_on: impl Into<String>) -> Self {
        Self {
            link_on: link_on.into(),
            return_properties: Vec::new(),
            target_collection: None,
        }
    }

    #[must_use]
    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.return_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_target_collection(mut self, collection: impl Into<String>) -> Self {
        self.target_collection = Some(collection.into());
        self
    }
}

/// Metadata fields returned with each record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataQuery {
    pub uuid: bool,
    pub vector: bool,
    pub creation_time: bool,
    pub last_update_time: bool,
    pub distance: bool,
    pub certainty: bool,
    pub score: bool,
    pub explain_score: bool,
}

impl Default for MetadataQuery {
    fn default() -> Self {
        Self {
            uuid: true,
            vector: false,
            creation_time: false,
            last_update_time: false,
            distance: false,
            certainty: false,
            score: false,
            explain_score: false,
        }
    }
}

impl MetadataQuery {
    /// Requests every metadata field.
    #[must_use]
    pub fn full() -> Self {
        Self {
            uuid: true,
            vector: true,
            creation_time: true,
            last_update_time: true,
            distance: true,
            certainty: true,
            score: true,
            explain_score: true,
        }
    }
}

/// A complete query against one collection.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryDescription {
    pub collection: String,
    pub tenant: Option<String>,
    pub consistency_level: Option<ConsistencyLevel>,
    pub mode: SearchMode,
    pub filter: Option<Filter>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    pub autocut: Option<u32>,
    /// Properties to return; empty returns all non-reference properties.
    pub return_properties: Vec<String>,
    #[serde(default)]
    pub return_references: Vec<QueryReference>,
    pub return_metadata: MetadataQuery,
    pub generative: Option<GenerativeParams>,
    pub group_by: Option<GroupBy>,
}

impl QueryDescription {
    /// Starts a fetch query against `collection`.
    #[must_use]
    pub fn fetch(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            tenant: None,
            consistency_level: None,
            mode: SearchMode::Fetch,
            filter: None,
            limit: None,
            offset: None,
            autocut: None,
            return_properties: Vec::new(),
            return_references: Vec::new(),
            return_metadata: MetadataQuery::default(),
            generative: None,
            group_by: None,
        }
    }

    /// Starts a near-vector query against `collection`.
    #[must_use]
    pub fn near_vector(collection: impl Into<String>, near: NearVector) -> Self {
        Self {
            mode: SearchMode::NearVector(near),
            ..Self::fetch(collection)
        }
    }

    /// Starts a near-image query against `collection`.
    #[must_use]
    pub fn near_image(collection: impl Into<String>, near: NearImage) -> Self {
        Self {
            mode: SearchMode::NearImage(near),
            ..Self::fetch(collection)
        }
    }

    /// Starts a hybrid query against `collection`.
    #[must_use]
    pub fn hybrid(collection: impl Into<String>, hybrid: HybridQuery) -> Self {
        Self {
            mode: SearchMode::Hybrid(hybrid),
            ..Self::fetch(collection)
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    #[must_use]
    pub fn with_consistency_level(mut self, level: ConsistencyLevel) -> Self {
        self.consistency_level = Some(level);
        self
    }

    #[must_use]
    pub fn with_metadata(mut self, metadata: MetadataQuery) -> Self {
        self.return_metadata = metadata;
        self
    }

    #[must_use]
    pub fn with_properties<I, S>(mut self, properties: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.return_properties = properties.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_reference(mut self, reference: QueryReference) -> Self {
        self.return_references.push(reference);
        self
    }

    #[must_use]
    pub fn with_generative(mut self, generative: GenerativeParams) -> Self {
        self.generative = Some(generative);
        self
    }

    #[must_use]
    pub fn with_group_by(mut self, group_by: GroupBy) -> Self {
        self.group_by = Some(group_by);
        self
    }
}

/// Metadata returned with a record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordMetadata {
    pub distance: Option<f32>,
    pub certainty: Option<f32>,
    pub score: Option<f32>,
    pub explain_score: Option<String>,
    pub creation_time: Option<DateTime<Utc>>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub is_consistent: Option<bool>,
}

/// One decoded result of a query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: Option<Uuid>,
    pub properties: Map<String, JsonValue>,
    /// Returned vectors; the unnamed vector is keyed by `DEFAULT_VECTOR_NAME`.
    pub vectors: BTreeMap<String, VectorValue>,
    pub metadata: RecordMetadata,
    /// Output of the single-prompt generative task.
    pub generated: Option<String>,
    /// Group this record belongs to for group-by queries.
    pub group: Option<String>,
    /// Collection the record was read from, when the server reports it.
    pub collection: Option<String>,
    /// Linked objects per reference property. `Some` (possibly empty) when
    /// references were requested, `None` otherwise.
    pub references: Option<BTreeMap<String, Vec<QueryRecord>>>,
}

/// Summary of one group of a group-by query.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub name: String,
    pub min_distance: f32,
    pub max_distance: f32,
    pub number_of_objects: u64,
    pub generated: Option<String>,
}

/// Converts a server timestamp into UTC.
///
/// Values with at most 13 digits are milliseconds since the epoch, longer
/// values are nanoseconds.
#[must_use]
pub fn timestamp_from_unix(value: i64) -> Option<DateTime<Utc>> {
    let nanos_per_unit: i64 = if value.unsigned_abs().to_string().len() <= 13 {
        1_000_000
    } else {
        1
    };
    let units_per_second = 1_000_000_000 / nanos_per_unit;
    let secs = value.div_euclid(units_per_second);
    let subsec_nanos = value.rem_euclid(units_per_second) * nanos_per_unit;
    DateTime::from_timestamp(secs, u32::try_from(subsec_nanos).ok()?)
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, Timelike};

    use super::*;

    #[test]
    fn test_timestamp_unit_heuristic() {
        let millis = timestamp_from_unix(1_700_000_000_123).unwrap();
        assert_eq!(millis.year(), 2023);
        assert_eq!(millis.timestamp_subsec_millis(), 123);

        let nanos = timestamp_from_unix(1_700_000_000_123_456_789).unwrap();
        assert_eq!(nanos.year(), 2023);
        assert_eq!(nanos.nanosecond(), 123_456_789);
    }

    #[test]
    fn test_filter_combinators_flatten() {
        let filter = Filter::equal("genre", "jazz")
            .and(Filter::property("year", FilterOperator::GreaterThan, 1960_i64))
            .and(Filter::is_null("deleted", true));
        match filter {
            Filter::And(operands) => assert_eq!(operands.len(), 3),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn test_description_builders() {
        let query = QueryDescription::near_vector("Articles", NearVector::new(vec![0.1, 0.2]))
            .with_limit(5)
            .with_properties(["title"]);
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.return_properties, vec!["title".to_string()]);
        assert!(matches!(query.mode, SearchMode::NearVector(_)));
        assert!(query.return_metadata.uuid);
    }

    #[test]
    fn test_references_and_image_builders() {
        let query = QueryDescription::near_image(
            "Photos",
            NearImage::new("aGVsbG8=").with_certainty(0.7).with_target_vector("clip"),
        )
        .with_reference(
            QueryReference::new("author")
                .with_properties(["name"])
                .with_target_collection("People"),
        );
        match &query.mode {
            SearchMode::NearImage(near) => {
                assert_eq!(near.certainty, Some(0.7));
                assert_eq!(near.target_vectors, vec!["clip".to_string()]);
            }
            other => panic!("expected NearImage, got {other:?}"),
        }
        assert_eq!(query.return_references.len(), 1);
        assert_eq!(query.return_references[0].target_collection.as_deref(), Some("People"));
        assert!(QueryDescription::fetch("Photos").return_references.is_empty());
    }
}
