use std::collections::BTreeMap;

use akidb_client_core::{
    ClientError, ClientResult, GroupSummary, ObjectWriteRequest, QueryDescription, QueryRecord,
    SchemaVersion, SearchMode, VectorValue,
};
use akidb_client_proto::v52;
use bytes::Bytes;
use prost::Message;

use super::shared::{self, MetadataScalars};
use super::vectors::{pack_single, unpack_single};
use super::{BatchContext, BatchReply, WireCodec};
use crate::query::QueryResults;

/// Codec for `akidb.v52`.
#[derive(Debug, Clone, Copy, Default)]
pub struct V52Codec;

fn named_vectors(object: &ObjectWriteRequest) -> Vec<v52::Vectors> {
    object
        .named_vectors
        .iter()
        .map(|(name, vector)| v52::Vectors {
            name: name.clone(),
            vector_bytes: pack_single(shared::single_values(vector)),
        })
        .collect()
}

impl WireCodec for V52Codec {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::V52
    }

    fn check_object(&self, object: &ObjectWriteRequest) -> ClientResult<()> {
        shared::check_vectors(self.version(), object)
    }

    fn encode_batch(
        &self,
        objects: &[&ObjectWriteRequest],
        ctx: &BatchContext,
    ) -> ClientResult<Bytes> {
        let objects = objects
            .iter()
            .map(|object| {
                self.check_object(object)?;
                Ok(v52::BatchObject {
                    uuid: object.id.to_string(),
                    vector_bytes: object
                        .vector
                        .as_ref()
                        .map(|vector| pack_single(shared::single_values(vector)))
                        .unwrap_or_default(),
                    vectors: named_vectors(object),
                    properties: object.properties.to_vec(),
                    collection: shared::resolve_collection(object, ctx)?.to_string(),
                    tenant: object.tenant.clone().unwrap_or_default(),
                    ..Default::default()
                })
            })
            .collect::<ClientResult<Vec<_>>>()?;
        let request = v52::BatchObjectsRequest {
            objects,
            consistency_level: shared::consistency(ctx.consistency_level),
        };
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode_batch_reply(&self, body: &[u8], sent: usize) -> ClientResult<BatchReply> {
        shared::decode_untyped_batch_reply(body, sent)
    }

    fn encode_query(&self, query: &QueryDescription) -> ClientResult<Bytes> {
        let version = self.version();
        let multi_unsupported = || -> ClientResult<Bytes> {
            Err(ClientError::schema_incompatible(
                version,
                "multi-vector queries require schema v6 or newer",
            ))
        };
        let mut request = v52::SearchRequest {
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
                if near.vector.is_multi() {
                    return multi_unsupported();
                }
                request.near_vector = Some(v52::NearVector {
                    vector_bytes: pack_single(shared::single_values(&near.vector)),
                    certainty: near.certainty,
                    distance: near.distance,
                    target_vectors: near.target_vectors.clone(),
                    ..Default::default()
                });
            }
            SearchMode::NearImage(near) => {
                request.near_image = Some(v52::NearImageSearch {
                    image: near.image.clone(),
                    certainty: near.certainty,
                    distance: near.distance,
                    target_vectors: near.target_vectors.clone(),
                });
            }
            SearchMode::Hybrid(hybrid) => {
                if hybrid.vector.as_ref().is_some_and(VectorValue::is_multi) {
                    return multi_unsupported();
                }
                request.hybrid = Some(v52::Hybrid {
                    query: hybrid.query.clone(),
                    properties: hybrid.properties.clone(),
                    vector_bytes: hybrid
                        .vector
                        .as_ref()
                        .map(|vector| pack_single(shared::single_values(vector)))
                        .unwrap_or_default(),
                    alpha: hybrid.alpha,
                    target_vectors: hybrid.target_vectors.clone(),
                    ..Default::default()
                });
            }
        }
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode_query_reply(&self, body: &[u8]) -> ClientResult<QueryResults> {
        let reply = v52::SearchReply::decode(body)
            .map_err(|err| ClientError::protocol(format!("invalid search reply: {err}")))?;

        let mut groups = Vec::with_capacity(reply.group_by_results.len());
        let mut grouped = Vec::with_capacity(reply.group_by_results.len());
        for group in reply.group_by_results {
            groups.push(GroupSummary {
                name: group.name.clone(),
                min_distance: group.min_distance,
                max_distance: group.max_distance,
                number_of_objects: u64::try_from(group.number_of_objects).unwrap_or_default(),
                generated: group.generative,
            });
            grouped.push((group.name, group.objects));
        }

        Ok(QueryResults::new(
            reply.took,
            reply.generative_grouped_result,
            groups,
            shared::flatten_records(reply.results, grouped, decode_result),
        ))
    }
}

fn decode_result(result: v52::SearchResult, group: Option<String>) -> ClientResult<QueryRecord> {
    let properties = shared::decode_properties(&result.properties)?;
    let metadata = result.metadata.unwrap_or_default();
    let mut vectors = BTreeMap::new();
    let values = if metadata.vector_bytes.is_empty() {
        metadata.vector
    } else {
        unpack_single(&metadata.vector_bytes)?
    };
    shared::default_vector(&mut vectors, values);
    for named in metadata.vectors {
        vectors.insert(
            named.name,
            VectorValue::Single(unpack_single(&named.vector_bytes)?),
        );
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
        generated: metadata.generative,
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
    use akidb_client_core::{NearImage, NearVector, QueryReference};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_named_vectors_encoded() {
        let object = ObjectWriteRequest::new("a", &json!({"title": "x"}))
            .unwrap()
            .with_collection("Articles")
            .with_named_vector("title", vec![1.0, 0.0])
            .with_named_vector("body", vec![0.0, 1.0]);
        let body = V52Codec
            .encode_batch(&[&object], &BatchContext::default())
            .unwrap();
        let decoded = v52::BatchObjectsRequest::decode(&body[..]).unwrap();
        let wire = &decoded.objects[0];
        assert!(wire.vector_bytes.is_empty());
        let names: Vec<_> = wire.vectors.iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["body", "title"]);
        assert_eq!(wire.vectors[1].vector_bytes, pack_single(&[1.0, 0.0]));
    }

    #[test]
    fn test_multi_vectors_are_incompatible() {
        let object = ObjectWriteRequest::new("a", &json!({}))
            .unwrap()
            .with_collection("Articles")
            .with_named_vector("colbert", vec![vec![1.0_f32, 2.0]]);
        assert!(matches!(
            V52Codec.check_object(&object),
            Err(ClientError::SchemaIncompatible { .. })
        ));
    }

    #[test]
    fn test_target_vectors_in_query() {
        let query = QueryDescription::near_vector(
            "Articles",
            NearVector::new(vec![0.1]).with_target_vector("title"),
        );
        let body = V52Codec.encode_query(&query).unwrap();
        let decoded = v52::SearchRequest::decode(&body[..]).unwrap();
        assert_eq!(
            decoded.near_vector.unwrap().target_vectors,
            vec!["title".to_string()]
        );
    }

    #[test]
    fn test_named_result_vectors() {
        let reply = v52::SearchReply {
            results: vec![v52::SearchResult {
                properties: br#"{"title":"x"}"#.to_vec(),
                metadata: Some(v52::MetadataResult {
                    vectors: vec![v52::Vectors {
                        name: "title".into(),
                        vector_bytes: pack_single(&[0.5]),
                    }],
                    ..Default::default()
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let record = V52Codec
            .decode_query_reply(&reply.encode_to_vec())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.vectors["title"], VectorValue::Single(vec![0.5]));
        assert_eq!(record.vectors.len(), 1);
        assert_eq!(record.references, None);
        assert_eq!(record.collection, None);
    }

    #[test]
    fn test_references_and_image_encoded() {
        let query = QueryDescription::near_image(
            "Photos",
            NearImage::new("aW1n").with_target_vector("clip"),
        )
        .with_reference(QueryReference::new("author").with_properties(["name"]));
        let body = V52Codec.encode_query(&query).unwrap();
        let decoded = v52::SearchRequest::decode(&body[..]).unwrap();
        assert_eq!(decoded.near_image.unwrap().target_vectors, vec!["clip".to_string()]);
        let reference = &decoded.ref_properties[0];
        assert_eq!(reference.reference_property, "author");
        assert_eq!(reference.properties, vec!["name".to_string()]);
        assert!(reference.target_collection.is_empty());
    }

    #[test]
    fn test_linked_objects_decoded() {
        let author = v52::SearchResult {
            properties: br#"{"name":"Ada"}"#.to_vec(),
            target_collection: "People".into(),
            ..Default::default()
        };
        let reply = v52::SearchReply {
            results: vec![v52::SearchResult {
                properties: br#"{"title":"x"}"#.to_vec(),
                target_collection: "Articles".into(),
                ref_props: vec![v52::RefPropertiesResult {
                    prop_name: "author".into(),
                    properties: vec![author],
                }],
                ref_props_requested: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let record = V52Codec
            .decode_query_reply(&reply.encode_to_vec())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(record.collection.as_deref(), Some("Articles"));
        let references = record.references.unwrap();
        let linked = &references["author"][0];
        assert_eq!(linked.properties["name"], json!("Ada"));
        assert_eq!(linked.collection.as_deref(), Some("People"));
        assert_eq!(linked.references, None);
    }
}
