use std::collections::BTreeMap;

use akidb_client_core::{
    ClientError, ClientResult, GroupSummary, ObjectWriteRequest, QueryDescription, QueryRecord,
    SchemaVersion, SearchMode, TransportErrorKind, VectorValue,
};
use akidb_client_proto::v6;
use bytes::Bytes;
use prost::Message;

use super::shared::{self, MetadataScalars};
use super::vectors::{pack_multi, pack_single, unpack_multi, unpack_single};
use super::{BatchContext, BatchReply, ObjectError, WireCodec};
use crate::query::QueryResults;

/// Codec for `akidb.v6`.
#[derive(Debug, Clone, Copy, Default)]
pub struct V6Codec;

fn typed_vector(name: &str, vector: &VectorValue) -> ClientResult<v6::Vectors> {
    let (vector_bytes, kind) = match vector {
        VectorValue::Single(values) => (pack_single(values), v6::VectorType::SingleFp32),
        VectorValue::Multi(rows) => (pack_multi(rows)?, v6::VectorType::MultiFp32),
    };
    Ok(v6::Vectors {
        name: name.to_string(),
        vector_bytes,
        r#type: kind as i32,
    })
}

fn decode_typed_vector(vector: &v6::Vectors) -> ClientResult<VectorValue> {
    match v6::VectorType::try_from(vector.r#type) {
        Ok(v6::VectorType::MultiFp32) => {
            Ok(VectorValue::Multi(unpack_multi(&vector.vector_bytes)?))
        }
        Ok(v6::VectorType::SingleFp32 | v6::VectorType::Unspecified) => {
            Ok(VectorValue::Single(unpack_single(&vector.vector_bytes)?))
        }
        Err(_) => Err(ClientError::protocol(format!(
            "unknown vector type {} for `{}`",
            vector.r#type, vector.name
        ))),
    }
}

/// Query vectors: single vectors go in `vector_bytes`, multi-vectors as typed
/// entries, one per target (or one unnamed entry without targets).
fn query_vectors(
    vector: &VectorValue,
    targets: &[String],
) -> ClientResult<(Vec<u8>, Vec<v6::Vectors>)> {
    match vector {
        VectorValue::Single(values) => Ok((pack_single(values), Vec::new())),
        VectorValue::Multi(_) if targets.is_empty() => {
            Ok((Vec::new(), vec![typed_vector("", vector)?]))
        }
        VectorValue::Multi(_) => {
            let typed = targets
                .iter()
                .map(|target| typed_vector(target, vector))
                .collect::<ClientResult<Vec<_>>>()?;
            Ok((Vec::new(), typed))
        }
    }
}

fn error_kind(code: i32, message: &str) -> TransportErrorKind {
    match v6::ErrorCode::try_from(code) {
        Ok(v6::ErrorCode::InvalidArgument) => TransportErrorKind::InvalidArgument,
        Ok(v6::ErrorCode::AlreadyExists) => TransportErrorKind::AlreadyExists,
        Ok(v6::ErrorCode::PermissionDenied) => TransportErrorKind::PermissionDenied,
        Ok(v6::ErrorCode::NotFound) => TransportErrorKind::NotFound,
        Ok(v6::ErrorCode::Unavailable) => TransportErrorKind::Unavailable,
        Ok(v6::ErrorCode::ResourceExhausted) => TransportErrorKind::ResourceExhausted,
        Ok(v6::ErrorCode::DeadlineExceeded) => TransportErrorKind::DeadlineExceeded,
        Ok(v6::ErrorCode::Internal) => TransportErrorKind::Internal,
        Ok(v6::ErrorCode::Unspecified) | Err(_) => shared::kind_from_message(message),
    }
}

fn first_generated(result: Option<v6::GenerativeResult>) -> Option<String> {
    result.and_then(|result| result.values.into_iter().next().map(|reply| reply.result))
}

impl WireCodec for V6Codec {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::V6
    }

    fn check_object(&self, object: &ObjectWriteRequest) -> ClientResult<()> {
        shared::check_vectors(self.version(), object)?;
        for (name, vector) in &object.named_vectors {
            if let VectorValue::Multi(rows) = vector {
                pack_multi(rows).map_err(|err| {
                    ClientError::validation(format!("vector `{name}`: {err}"))
                })?;
            }
        }
        Ok(())
    }

    fn encode_batch(
        &self,
        objects: &[&ObjectWriteRequest],
        ctx: &BatchContext,
    ) -> ClientResult<Bytes> {
        let objects = objects
            .iter()
            .map(|object| {
                shared::check_vectors(self.version(), object)?;
                let vectors = object
                    .named_vectors
                    .iter()
                    .map(|(name, vector)| typed_vector(name, vector))
                    .collect::<ClientResult<Vec<_>>>()?;
                Ok(v6::BatchObject {
                    uuid: object.id.to_string(),
                    vector_bytes: object
                        .vector
                        .as_ref()
                        .map(|vector| pack_single(shared::single_values(vector)))
                        .unwrap_or_default(),
                    vectors,
                    properties: object.properties.to_vec(),
                    collection: shared::resolve_collection(object, ctx)?.to_string(),
                    tenant: object.tenant.clone().unwrap_or_default(),
                    ..Default::default()
                })
            })
            .collect::<ClientResult<Vec<_>>>()?;
        let request = v6::BatchObjectsRequest {
            objects,
            consistency_level: shared::consistency(ctx.consistency_level),
        };
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode_batch_reply(&self, body: &[u8], sent: usize) -> ClientResult<BatchReply> {
        let reply = v6::BatchObjectsReply::decode(body)
            .map_err(|err| ClientError::protocol(format!("invalid batch reply: {err}")))?;
        let errors = reply
            .errors
            .into_iter()
            .map(|error| {
                Ok(ObjectError {
                    index: shared::checked_index(error.index, sent)?,
                    kind: error_kind(error.code, &error.error),
                    message: error.error,
                })
            })
            .collect::<ClientResult<Vec<_>>>()?;
        Ok(BatchReply {
            took: reply.took,
            errors,
        })
    }

    fn encode_query(&self, query: &QueryDescription) -> ClientResult<Bytes> {
        let mut request = v6::SearchRequest {
            collection: query.collection.clone(),
            tenant: query.tenant.clone().unwrap_or_default(),
            consistency_level: shared::consistency(query.consistency_level),
            limit: query.limit.unwrap_or_default(),
            offset: query.offset.unwrap_or_default(),
            autocut: query.autocut.unwrap_or_default(),
            filters: query.filter.as_ref().map(shared::encode_filter),
            generative: query.generative.as_ref().map(shared::encode_generative),
            group_by: query.group_by.as_ref().map(shared::encode_group_by),
            metadata: Some(shared::encode_metadata(&query.return_metadata)),
            properties: query.return_properties.clone(),
            ref_properties: shared::encode_references(&query.return_references),
            ..Default::default()
        };
        match &query.mode {
            SearchMode::Fetch => {}
            SearchMode::NearVector(near) => {
                let (vector_bytes, vectors) = query_vectors(&near.vector, &near.target_vectors)?;
                request.near_vector = Some(v6::NearVector {
                    vector_bytes,
                    vectors,
                    certainty: near.certainty,
                    distance: near.distance,
                    target_vectors: near.target_vectors.clone(),
                    ..Default::default()
                });
            }
            SearchMode::NearImage(near) => {
                request.near_image = Some(v6::NearImageSearch {
                    image: near.image.clone(),
                    certainty: near.certainty,
                    distance: near.distance,
                    target_vectors: near.target_vectors.clone(),
                });
            }
            SearchMode::Hybrid(hybrid) => {
                let (vector_bytes, vectors) = match &hybrid.vector {
                    Some(vector) => query_vectors(vector, &hybrid.target_vectors)?,
                    None => (Vec::new(), Vec::new()),
                };
                request.hybrid = Some(v6::Hybrid {
                    query: hybrid.query.clone(),
                    properties: hybrid.properties.clone(),
                    vector_bytes,
                    vectors,
                    alpha: hybrid.alpha,
                    target_vectors: hybrid.target_vectors.clone(),
                    ..Default::default()
                });
            }
        }
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode_query_reply(&self, body: &[u8]) -> ClientResult<QueryResults> {
        let reply = v6::SearchReply::decode(body)
            .map_err(|err| ClientError::protocol(format!("invalid search reply: {err}")))?;

        let mut groups = Vec::with_capacity(reply.group_by_results.len());
        let mut grouped = Vec::with_capacity(reply.group_by_results.len());
        for group in reply.group_by_results {
            groups.push(GroupSummary {
                name: group.name.clone(),
                min_distance: group.min_distance,
                max_distance: group.max_distance,
                number_of_objects: u64::try_from(group.number_of_objects).unwrap_or_default(),
                generated: first_generated(group.generative),
            });
            grouped.push((group.name, group.objects));
        }

        Ok(QueryResults::new(
            reply.took,
            first_generated(reply.generative_grouped_results),
            groups,
            shared::flatten_records(reply.results, grouped, decode_result),
        ))
    }
}

fn decode_result(result: v6::SearchResult, group: Option<String>) -> ClientResult<QueryRecord> {
    let properties = shared::decode_properties(&result.properties)?;
    let metadata = result.metadata.unwrap_or_default();
    let mut vectors = BTreeMap::new();
    let values = if metadata.vector_bytes.is_empty() {
        metadata.vector
    } else {
        unpack_single(&metadata.vector_bytes)?
    };
    shared::default_vector(&mut vectors, values);
    for named in &metadata.vectors {
        vectors.insert(named.name.clone(), decode_typed_vector(named)?);
    }
    let refs = result
        .ref_props
        .into_iter()
        .map(|linked| (linked.prop_name, linked.properties))
        .collect();
    Ok(QueryRecord {
        id: shared::decode_id(&metadata.id, &metadata.id_as_bytes)?,
        properties,
        vectors,
        generated: first_generated(result.generative),
        metadata: MetadataScalars {
            creation_time_unix: metadata.creation_time_unix,
            last_update_time_unix: metadata.last_update_time_unix,
            distance: metadata.distance,
            certainty: metadata.certainty,
            score: metadata.score,
            explain_score: metadata.explain_score,
            is_consistent: metadata.is_consistent,
        }
        .into(),
        group,
        collection: shared::non_empty(result.target_collection),
        references: shared::decode_references(result.ref_props_requested, refs, decode_result)?,
    })
}

#[cfg(test)]
mod tests {
    use akidb_client_core::{GenerativeParams, NearImage, NearVector, QueryReference};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_multi_vector_encoded_with_type() {
        let rows = vec![vec![1.0_f32, 2.0], vec![3.0, 4.0]];
        let object = ObjectWriteRequest::new("a", &json!({}))
            .unwrap()
            .with_collection("Articles")
            .with_named_vector("colbert", rows.clone());
        let body = V6Codec
            .encode_batch(&[&object], &BatchContext::default())
            .unwrap();
        let decoded = v6::BatchObjectsRequest::decode(&body[..]).unwrap();
        let vector = &decoded.objects[0].vectors[0];
        assert_eq!(vector.r#type, v6::VectorType::MultiFp32 as i32);
        assert_eq!(unpack_multi(&vector.vector_bytes).unwrap(), rows);
    }

    #[test]
    fn test_ragged_multi_vector_rejected() {
        let object = ObjectWriteRequest::new("a", &json!({}))
            .unwrap()
            .with_named_vector("colbert", vec![vec![1.0_f32, 2.0], vec![3.0]]);
        assert!(matches!(
            V6Codec.check_object(&object),
            Err(ClientError::Validation(_))
        ));
    }

    #[test]
    fn test_reply_codes_map_to_kinds() {
        let reply = v6::BatchObjectsReply {
            took: 0.0,
            errors: vec![
                v6::BatchError {
                    index: 0,
                    error: "shard busy".into(),
                    code: v6::ErrorCode::Unavailable as i32,
                },
                v6::BatchError {
                    index: 2,
                    error: "bad property".into(),
                    code: v6::ErrorCode::Unspecified as i32,
                },
            ],
        };
        let decoded = V6Codec
            .decode_batch_reply(&reply.encode_to_vec(), 3)
            .unwrap();
        assert_eq!(decoded.errors[0].kind, TransportErrorKind::Unavailable);
        assert_eq!(decoded.errors[1].kind, TransportErrorKind::InvalidArgument);
    }

    #[test]
    fn test_multi_vector_query_per_target() {
        let query = QueryDescription::near_vector(
            "Articles",
            NearVector::new(vec![vec![1.0_f32], vec![2.0]]).with_target_vector("colbert"),
        )
        .with_generative(GenerativeParams {
            single_prompt: Some("Summarize {title}".into()),
            ..Default::default()
        });
        let body = V6Codec.encode_query(&query).unwrap();
        let decoded = v6::SearchRequest::decode(&body[..]).unwrap();
        let near = decoded.near_vector.unwrap();
        assert!(near.vector_bytes.is_empty());
        assert_eq!(near.vectors.len(), 1);
        assert_eq!(near.vectors[0].name, "colbert");
        assert_eq!(
            decoded.generative.unwrap().single_response_prompt,
            "Summarize {title}"
        );
    }

    #[test]
    fn test_generative_results_decoded() {
        let reply = v6::SearchReply {
            results: vec![v6::SearchResult {
                properties: Vec::new(),
                metadata: None,
                generative: Some(v6::GenerativeResult {
                    values: vec![v6::GenerativeReply {
                        result: "short summary".into(),
                    }],
                }),
                ..Default::default()
            }],
            generative_grouped_results: Some(v6::GenerativeResult {
                values: vec![v6::GenerativeReply {
                    result: "all of them".into(),
                }],
            }),
            ..Default::default()
        };
        let mut results = V6Codec
            .decode_query_reply(&reply.encode_to_vec())
            .unwrap();
        assert_eq!(results.generated(), Some("all of them"));
        let record = results.next().unwrap().unwrap();
        assert_eq!(record.generated.as_deref(), Some("short summary"));
        assert_eq!(record.id, None);
    }

    #[test]
    fn test_near_image_with_reference_target() {
        let query = QueryDescription::near_image("Photos", NearImage::new("aW1n"))
            .with_reference(QueryReference::new("owner").with_target_collection("People"));
        let body = V6Codec.encode_query(&query).unwrap();
        let decoded = v6::SearchRequest::decode(&body[..]).unwrap();
        assert_eq!(decoded.near_image.unwrap().image, "aW1n");
        assert_eq!(decoded.ref_properties[0].target_collection, "People");
        assert!(decoded.near_vector.is_none());
    }

    #[test]
    fn test_requested_references_without_links_are_empty() {
        let reply = v6::SearchReply {
            results: vec![
                v6::SearchResult {
                    ref_props_requested: true,
                    ..Default::default()
                },
                v6::SearchResult::default(),
            ],
            ..Default::default()
        };
        let records: Vec<_> = V6Codec
            .decode_query_reply(&reply.encode_to_vec())
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(records[0].references, Some(BTreeMap::new()));
        assert_eq!(records[1].references, None);
    }
}
