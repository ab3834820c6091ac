use std::collections::BTreeMap;

use akidb_client_core::{
    ClientError, ClientResult, GroupSummary, ObjectWriteRequest, QueryDescription, QueryRecord,
    SchemaVersion, SearchMode,
};
use akidb_client_proto::v51;
use bytes::Bytes;
use prost::Message;

use super::shared::{self, MetadataScalars};
use super::vectors::{pack_single, unpack_single};
use super::{BatchContext, BatchReply, WireCodec};
use crate::query::QueryResults;

/// Codec for `akidb.v51`. Vectors travel as packed bytes in both directions.
#[derive(Debug, Clone, Copy, Default)]
pub struct V51Codec;

impl WireCodec for V51Codec {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::V51
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
                Ok(v51::BatchObject {
                    uuid: object.id.to_string(),
                    vector_bytes: object
                        .vector
                        .as_ref()
                        .map(|vector| pack_single(shared::single_values(vector)))
                        .unwrap_or_default(),
                    properties: object.properties.to_vec(),
                    collection: shared::resolve_collection(object, ctx)?.to_string(),
                    tenant: object.tenant.clone().unwrap_or_default(),
                    ..Default::default()
                })
            })
            .collect::<ClientResult<Vec<_>>>()?;
        let request = v51::BatchObjectsRequest {
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
        shared::check_references(version, query)?;
        let mut request = v51::SearchRequest {
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
            ..Default::default()
        };
        let unsupported = |what: &str| -> ClientResult<Bytes> {
            Err(ClientError::schema_incompatible(
                version,
                format!("{what} not supported before schema v52"),
            ))
        };
        match &query.mode {
            SearchMode::Fetch => {}
            SearchMode::NearVector(near) => {
                if !near.target_vectors.is_empty() {
                    return unsupported("target vectors");
                }
                if near.vector.is_multi() {
                    return unsupported("multi-vector queries");
                }
                request.near_vector = Some(v51::NearVector {
                    vector_bytes: pack_single(shared::single_values(&near.vector)),
                    certainty: near.certainty,
                    distance: near.distance,
                    ..Default::default()
                });
            }
            SearchMode::NearImage(near) => {
                if !near.target_vectors.is_empty() {
                    return unsupported("target vectors");
                }
                request.near_image = Some(v51::NearImageSearch {
                    image: near.image.clone(),
                    certainty: near.certainty,
                    distance: near.distance,
                });
            }
            SearchMode::Hybrid(hybrid) => {
                if !hybrid.target_vectors.is_empty() {
                    return unsupported("target vectors");
                }
                if hybrid.vector.as_ref().is_some_and(|vector| vector.is_multi()) {
                    return unsupported("multi-vector queries");
                }
                request.hybrid = Some(v51::Hybrid {
                    query: hybrid.query.clone(),
                    properties: hybrid.properties.clone(),
                    vector_bytes: hybrid
                        .vector
                        .as_ref()
                        .map(|vector| pack_single(shared::single_values(vector)))
                        .unwrap_or_default(),
                    alpha: hybrid.alpha,
                    ..Default::default()
                });
            }
        }
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode_query_reply(&self, body: &[u8]) -> ClientResult<QueryResults> {
        let reply = v51::SearchReply::decode(body)
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

fn decode_result(result: v51::SearchResult, group: Option<String>) -> ClientResult<QueryRecord> {
    let properties = shared::decode_properties(&result.properties)?;
    let metadata = result.metadata.unwrap_or_default();
    let mut vectors = BTreeMap::new();
    let values = if metadata.vector_bytes.is_empty() {
        metadata.vector
    } else {
        unpack_single(&metadata.vector_bytes)?
    };
    shared::default_vector(&mut vectors, values);
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
        collection: None,
        references: None,
    })
}

#[cfg(test)]
mod tests {
    use akidb_client_core::{HybridQuery, NearImage, VectorValue, DEFAULT_VECTOR_NAME};
    use serde_json::json;

    use super::*;

    #[test]
    fn test_batch_packs_vector_bytes() {
        let object = ObjectWriteRequest::new("a", &json!({}))
            .unwrap()
            .with_collection("Articles")
            .with_vector(vec![1.0, 2.0, 3.0]);
        let body = V51Codec
            .encode_batch(&[&object], &BatchContext::default())
            .unwrap();
        let decoded = v51::BatchObjectsRequest::decode(&body[..]).unwrap();
        let wire = &decoded.objects[0];
        assert!(wire.vector.is_empty());
        assert_eq!(wire.vector_bytes, pack_single(&[1.0, 2.0, 3.0]));
    }

    #[test]
    fn test_hybrid_query_packs_vector() {
        let query =
            QueryDescription::hybrid("Articles", HybridQuery::new("jazz").with_vector(vec![0.5]));
        let body = V51Codec.encode_query(&query).unwrap();
        let decoded = v51::SearchRequest::decode(&body[..]).unwrap();
        let hybrid = decoded.hybrid.unwrap();
        assert_eq!(hybrid.query, "jazz");
        assert_eq!(hybrid.vector_bytes, pack_single(&[0.5]));
    }

    #[test]
    fn test_result_prefers_vector_bytes() {
        let reply = v51::SearchReply {
            results: vec![v51::SearchResult {
                properties: Vec::new(),
                metadata: Some(v51::MetadataResult {
                    vector: vec![9.0],
                    vector_bytes: pack_single(&[1.0, 2.0]),
                    creation_time_unix: Some(1_700_000_000_000),
                    ..Default::default()
                }),
            }],
            ..Default::default()
        };
        let record = V51Codec
            .decode_query_reply(&reply.encode_to_vec())
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(
            record.vectors[DEFAULT_VECTOR_NAME],
            VectorValue::Single(vec![1.0, 2.0])
        );
        assert!(record.metadata.creation_time.is_some());
        assert!(record.properties.is_empty());
        assert!(record.references.is_none());
    }

    #[test]
    fn test_near_image_keeps_thresholds() {
        let query =
            QueryDescription::near_image("Photos", NearImage::new("aW1n").with_certainty(0.8));
        let body = V51Codec.encode_query(&query).unwrap();
        let near = v51::SearchRequest::decode(&body[..]).unwrap().near_image.unwrap();
        assert_eq!(near.certainty, Some(0.8));
        assert_eq!(near.distance, None);

        let targeted = QueryDescription::near_image(
            "Photos",
            NearImage::new("aW1n").with_target_vector("clip"),
        );
        assert!(V51Codec.encode_query(&targeted).is_err());
    }
}
