use std::collections::BTreeMap;

use akidb_client_core::{
    ClientError, ClientResult, GroupSummary, ObjectWriteRequest, QueryDescription, QueryRecord,
    SchemaVersion, SearchMode,
};
use akidb_client_proto::v4;
use bytes::Bytes;
use prost::Message;

use super::shared::{self, MetadataScalars};
use super::{BatchContext, BatchReply, WireCodec};
use crate::query::QueryResults;

/// Codec for `akidb.v4`.
#[derive(Debug, Clone, Copy, Default)]
pub struct V4Codec;

impl WireCodec for V4Codec {
    fn version(&self) -> SchemaVersion {
        SchemaVersion::V4
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
                Ok(v4::BatchObject {
                    uuid: object.id.to_string(),
                    vector: object
                        .vector
                        .as_ref()
                        .map(|vector| shared::single_values(vector).to_vec())
                        .unwrap_or_default(),
                    properties: object.properties.to_vec(),
                    collection: shared::resolve_collection(object, ctx)?.to_string(),
                    tenant: object.tenant.clone().unwrap_or_default(),
                })
            })
            .collect::<ClientResult<Vec<_>>>()?;
        let request = v4::BatchObjectsRequest {
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
        let mut request = v4::SearchRequest {
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
        match &query.mode {
            SearchMode::Fetch => {}
            SearchMode::NearVector(near) => {
                if !near.target_vectors.is_empty() {
                    return Err(ClientError::schema_incompatible(
                        version,
                        "target vectors require schema v52 or newer",
                    ));
                }
                if near.vector.is_multi() {
                    return Err(ClientError::schema_incompatible(
                        version,
                        "multi-vector queries require schema v6 or newer",
                    ));
                }
                request.near_vector = Some(v4::NearVector {
                    vector: shared::single_values(&near.vector).to_vec(),
                    certainty: near.certainty,
                    distance: near.distance,
                });
            }
            SearchMode::NearImage(near) => {
                if !near.target_vectors.is_empty() {
                    return Err(ClientError::schema_incompatible(
                        version,
                        "target vectors require schema v52 or newer",
                    ));
                }
                request.near_image = Some(v4::NearImageSearch {
                    image: near.image.clone(),
                    certainty: near.certainty,
                    distance: near.distance,
                });
            }
            SearchMode::Hybrid(hybrid) => {
                if !hybrid.target_vectors.is_empty() {
                    return Err(ClientError::schema_incompatible(
                        version,
                        "target vectors require schema v52 or newer",
                    ));
                }
                if hybrid.vector.as_ref().is_some_and(|vector| vector.is_multi()) {
                    return Err(ClientError::schema_incompatible(
                        version,
                        "multi-vector queries require schema v6 or newer",
                    ));
                }
                request.hybrid = Some(v4::Hybrid {
                    query: hybrid.query.clone(),
                    properties: hybrid.properties.clone(),
                    vector: hybrid
                        .vector
                        .as_ref()
                        .map(|vector| shared::single_values(vector).to_vec())
                        .unwrap_or_default(),
                    alpha: hybrid.alpha,
                });
            }
        }
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode_query_reply(&self, body: &[u8]) -> ClientResult<QueryResults> {
        let reply = v4::SearchReply::decode(body)
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

fn decode_result(result: v4::SearchResult, group: Option<String>) -> ClientResult<QueryRecord> {
    let properties = shared::decode_properties(&result.properties)?;
    let metadata = result.metadata.unwrap_or_default();
    let mut vectors = BTreeMap::new();
    shared::default_vector(&mut vectors, metadata.vector);
    Ok(QueryRecord {
        id: shared::decode_id(&metadata.id, &[])?,
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
