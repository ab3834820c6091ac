//! Conversions for messages that every schema generation shares.

use std::collections::BTreeMap;

use akidb_client_core::{
    timestamp_from_unix, ClientError, ClientResult, ConsistencyLevel, Filter, FilterOperator,
    FilterValue, GenerativeParams, GroupBy, MetadataQuery, ObjectWriteRequest, QueryDescription,
    QueryRecord, QueryReference, RecordMetadata, SchemaVersion, TransportErrorKind, VectorValue,
};
use akidb_client_proto::common;
use prost::Message;
use serde_json::{Map, Value as JsonValue};
use uuid::Uuid;

use super::{BatchContext, BatchReply, ObjectError};
use crate::query::RecordIter;

pub(crate) fn consistency(level: Option<ConsistencyLevel>) -> Option<i32> {
    level.map(|level| {
        let wire = match level {
            ConsistencyLevel::One => common::ConsistencyLevel::One,
            ConsistencyLevel::Quorum => common::ConsistencyLevel::Quorum,
            ConsistencyLevel::All => common::ConsistencyLevel::All,
        };
        wire as i32
    })
}

pub(crate) fn resolve_collection<'a>(
    object: &'a ObjectWriteRequest,
    ctx: &'a BatchContext,
) -> ClientResult<&'a str> {
    object
        .collection
        .as_deref()
        .or(ctx.default_collection.as_deref())
        .ok_or_else(|| {
            ClientError::validation(format!(
                "object `{}` names no collection and no default is configured",
                object.token
            ))
        })
}

/// Rejects vector shapes the generation cannot carry.
pub(crate) fn check_vectors(
    version: SchemaVersion,
    object: &ObjectWriteRequest,
) -> ClientResult<()> {
    if !object.named_vectors.is_empty() && !version.supports_named_vectors() {
        return Err(ClientError::schema_incompatible(
            version,
            "named vectors require schema v52 or newer",
        ));
    }
    if object.has_multi_vector() && !version.supports_multi_vectors() {
        return Err(ClientError::schema_incompatible(
            version,
            "multi-vectors require schema v6 or newer",
        ));
    }
    if object.vector.as_ref().is_some_and(VectorValue::is_multi) {
        return Err(ClientError::validation(
            "multi-vectors must be attached under a vector name",
        ));
    }
    Ok(())
}

pub(crate) fn single_values(vector: &VectorValue) -> &[f32] {
    match vector {
        VectorValue::Single(values) => values,
        VectorValue::Multi(_) => &[],
    }
}

pub(crate) fn encode_filter(filter: &Filter) -> common::Filters {
    match filter {
        Filter::And(operands) => logical(common::FilterOperator::And, operands),
        Filter::Or(operands) => logical(common::FilterOperator::Or, operands),
        Filter::IsNull { path, is_null } => common::Filters {
            operator: common::FilterOperator::IsNull as i32,
            on: path.clone(),
            value_boolean: Some(*is_null),
            ..Default::default()
        },
        Filter::Property {
            path,
            operator,
            value,
        } => {
            let mut node = common::Filters {
                operator: comparison(*operator) as i32,
                on: path.clone(),
                ..Default::default()
            };
            match value {
                FilterValue::Text(text) => node.value_text = Some(text.clone()),
                FilterValue::Int(int) => node.value_int = Some(*int),
                FilterValue::Number(number) => node.value_number = Some(*number),
                FilterValue::Boolean(flag) => node.value_boolean = Some(*flag),
                FilterValue::TextArray(values) => {
                    node.value_text_array = Some(common::TextArray {
                        values: values.clone(),
                    });
                }
            }
            node
        }
    }
}

fn logical(operator: common::FilterOperator, operands: &[Filter]) -> common::Filters {
    common::Filters {
        operator: operator as i32,
        filters: operands.iter().map(encode_filter).collect(),
        ..Default::default()
    }
}

fn comparison(operator: FilterOperator) -> common::FilterOperator {
    match operator {
        FilterOperator::Equal => common::FilterOperator::Equal,
        FilterOperator::NotEqual => common::FilterOperator::NotEqual,
        FilterOperator::GreaterThan => common::FilterOperator::GreaterThan,
        FilterOperator::GreaterThanEqual => common::FilterOperator::GreaterThanEqual,
        FilterOperator::LessThan => common::FilterOperator::LessThan,
        FilterOperator::LessThanEqual => common::FilterOperator::LessThanEqual,
        FilterOperator::Like => common::FilterOperator::Like,
        FilterOperator::ContainsAny => common::FilterOperator::ContainsAny,
        FilterOperator::ContainsAll => common::FilterOperator::ContainsAll,
    }
}

pub(crate) fn encode_generative(params: &GenerativeParams) -> common::GenerativeSearch {
    common::GenerativeSearch {
        single_response_prompt: params.single_prompt.clone().unwrap_or_default(),
        grouped_response_task: params.grouped_task.clone().unwrap_or_default(),
        grouped_properties: params.grouped_properties.clone(),
    }
}

pub(crate) fn encode_group_by(group_by: &GroupBy) -> common::GroupBy {
    common::GroupBy {
        path: vec![group_by.property.clone()],
        number_of_groups: i32::try_from(group_by.number_of_groups).unwrap_or(i32::MAX),
        objects_per_group: i32::try_from(group_by.objects_per_group).unwrap_or(i32::MAX),
    }
}

pub(crate) fn encode_metadata(metadata: &MetadataQuery) -> common::MetadataRequest {
    common::MetadataRequest {
        uuid: metadata.uuid,
        vector: metadata.vector,
        creation_time_unix: metadata.creation_time,
        last_update_time_unix: metadata.last_update_time,
        distance: metadata.distance,
        certainty: metadata.certainty,
        score: metadata.score,
        explain_score: metadata.explain_score,
        is_consistent: false,
    }
}

pub(crate) fn check_references(
    version: SchemaVersion,
    query: &QueryDescription,
) -> ClientResult<()> {
    if query.return_references.is_empty() || version.supports_references() {
        Ok(())
    } else {
        Err(ClientError::schema_incompatible(
            version,
            "reference properties require schema v52 or newer",
        ))
    }
}

pub(crate) fn encode_references(
    references: &[QueryReference],
) -> Vec<common::RefPropertiesRequest> {
    references
        .iter()
        .map(|reference| common::RefPropertiesRequest {
            reference_property: reference.link_on.clone(),
            properties: reference.return_properties.clone(),
            metadata: Some(encode_metadata(&MetadataQuery::default())),
            target_collection: reference.target_collection.clone().unwrap_or_default(),
        })
        .collect()
}

pub(crate) fn decode_properties(bytes: &[u8]) -> ClientResult<Map<String, JsonValue>> {
    if bytes.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_slice::<JsonValue>(bytes) {
        Ok(JsonValue::Object(map)) => Ok(map),
        Ok(_) => Err(ClientError::protocol("result properties are not a JSON object")),
        Err(err) => Err(ClientError::protocol(format!(
            "result properties are not valid JSON: {err}"
        ))),
    }
}

/// Reads the record id, preferring the 16-byte form when the server sent it.
pub(crate) fn decode_id(text: &str, raw: &[u8]) -> ClientResult<Option<Uuid>> {
    if !raw.is_empty() {
        return Uuid::from_slice(raw)
            .map(Some)
            .map_err(|err| ClientError::protocol(format!("invalid record id bytes: {err}")));
    }
    if text.is_empty() {
        return Ok(None);
    }
    Uuid::parse_str(text)
        .map(Some)
        .map_err(|err| ClientError::protocol(format!("invalid record id `{text}`: {err}")))
}

/// Metadata scalars that every generation carries with identical tags.
pub(crate) struct MetadataScalars {
    pub creation_time_unix: Option<i64>,
    pub last_update_time_unix: Option<i64>,
    pub distance: Option<f32>,
    pub certainty: Option<f32>,
    pub score: Option<f32>,
    pub explain_score: Option<String>,
    pub is_consistent: Option<bool>,
}

impl From<MetadataScalars> for RecordMetadata {
    fn from(raw: MetadataScalars) -> Self {
        Self {
            distance: raw.distance,
            certainty: raw.certainty,
            score: raw.score,
            explain_score: raw.explain_score.filter(|text| !text.is_empty()),
            creation_time: raw.creation_time_unix.and_then(timestamp_from_unix),
            last_update_time: raw.last_update_time_unix.and_then(timestamp_from_unix),
            is_consistent: raw.is_consistent,
        }
    }
}

pub(crate) fn default_vector(
    vectors: &mut BTreeMap<String, VectorValue>,
    values: Vec<f32>,
) {
    if !values.is_empty() {
        vectors.insert(
            akidb_client_core::DEFAULT_VECTOR_NAME.to_string(),
            VectorValue::Single(values),
        );
    }
}

pub(crate) fn non_empty(text: String) -> Option<String> {
    (!text.is_empty()).then_some(text)
}

/// Groups linked objects by reference property. `None` unless the server
/// reports that references were requested or returned some.
pub(crate) fn decode_references<R>(
    requested: bool,
    refs: Vec<(String, Vec<R>)>,
    decode: fn(R, Option<String>) -> ClientResult<QueryRecord>,
) -> ClientResult<Option<BTreeMap<String, Vec<QueryRecord>>>> {
    if !requested && refs.is_empty() {
        return Ok(None);
    }
    let mut references: BTreeMap<String, Vec<QueryRecord>> = BTreeMap::new();
    for (property, objects) in refs {
        let linked = references.entry(property).or_default();
        for object in objects {
            linked.push(decode(object, None)?);
        }
    }
    Ok(Some(references))
}

/// Chains ungrouped results with grouped ones, tagging the latter with
/// their group name. Decoding happens as the iterator is advanced.
pub(crate) fn flatten_records<R>(
    results: Vec<R>,
    groups: Vec<(String, Vec<R>)>,
    decode: fn(R, Option<String>) -> ClientResult<QueryRecord>,
) -> RecordIter
where
    R: Send + 'static,
{
    let ungrouped = results.into_iter().map(move |result| decode(result, None));
    let grouped = groups.into_iter().flat_map(move |(name, objects)| {
        objects
            .into_iter()
            .map(move |result| decode(result, Some(name.clone())))
    });
    Box::new(ungrouped.chain(grouped))
}

/// Best-effort category for an untyped per-object error message.
pub(crate) fn kind_from_message(message: &str) -> TransportErrorKind {
    let lower = message.to_ascii_lowercase();
    if lower.contains("already exists") {
        TransportErrorKind::AlreadyExists
    } else if lower.contains("permission") || lower.contains("forbidden") {
        TransportErrorKind::PermissionDenied
    } else {
        TransportErrorKind::InvalidArgument
    }
}

/// Decodes the batch reply used by generations before v6.
pub(crate) fn decode_untyped_batch_reply(
    body: &[u8],
    sent: usize,
) -> ClientResult<BatchReply> {
    let reply = common::BatchObjectsReply::decode(body)
        .map_err(|err| ClientError::protocol(format!("invalid batch reply: {err}")))?;
    let errors = reply
        .errors
        .into_iter()
        .map(|error| {
            let index = checked_index(error.index, sent)?;
            Ok(ObjectError {
                index,
                kind: kind_from_message(&error.error),
                message: error.error,
            })
        })
        .collect::<ClientResult<Vec<_>>>()?;
    Ok(BatchReply {
        took: reply.took,
        errors,
    })
}

pub(crate) fn checked_index(index: i32, sent: usize) -> ClientResult<usize> {
    usize::try_from(index)
        .ok()
        .filter(|index| *index < sent)
        .ok_or_else(|| {
            ClientError::protocol(format!(
                "batch reply references object {index} of a {sent}-object request"
            ))
        })
}
