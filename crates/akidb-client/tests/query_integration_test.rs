//! Query execution through the client against the in-memory server.

use std::time::Duration;

use akidb_client::transport::mock::MockTransport;
use akidb_client::{Client, ConnectionManager, RetryPolicy};
use akidb_client_core::{
    ClientConfig, ClientError, Filter, NearImage, NearVector, QueryDescription, QueryReference,
    TransportError, TransportErrorKind,
};
use akidb_client_proto::v6;
use prost::Message;
use uuid::Uuid;

async fn client(mock: &MockTransport) -> Client {
    let config = ClientConfig::default();
    let connection = ConnectionManager::new(&config)
        .open_with_transport(
            mock.clone().into_transport(),
            &config.connection.preferred_schema_versions,
        )
        .await
        .unwrap();
    Client::with_connection(connection, &config)
}

fn result(id: Uuid, properties: &[u8], distance: f32) -> v6::SearchResult {
    v6::SearchResult {
        properties: properties.to_vec(),
        metadata: Some(v6::MetadataResult {
            id: id.to_string(),
            distance: Some(distance),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_records_decode_lazily_and_in_order() {
    let mock = MockTransport::new();
    let ids = [Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4()];
    let reply = v6::SearchReply {
        took: 0.02,
        results: vec![
            result(ids[0], br#"{"title":"first"}"#, 0.1),
            result(ids[1], b"not json", 0.2),
            result(ids[2], br#"{"title":"third"}"#, 0.3),
        ],
        ..Default::default()
    };
    mock.push_search_reply(Ok(reply.encode_to_vec()));
    let client = client(&mock).await;

    let query = QueryDescription::near_vector("Articles", NearVector::new(vec![0.1_f32, 0.9]))
        .with_filter(Filter::equal("lang", "en"))
        .with_limit(3);
    let mut records = client.query(&query).await.unwrap();

    let first = records.next().unwrap().unwrap();
    assert_eq!(first.id, Some(ids[0]));
    assert_eq!(first.properties["title"], "first");
    assert_eq!(first.metadata.distance, Some(0.1));
    assert!(records.next().unwrap().is_err());
    let third = records.next().unwrap().unwrap();
    assert_eq!(third.id, Some(ids[2]));
    assert!(records.next().is_none());

    let request = v6::SearchRequest::decode(&mock.last_search_body().unwrap()[..]).unwrap();
    assert_eq!(request.collection, "Articles");
    assert_eq!(request.limit, 3);
    assert!(request.filters.is_some());
}

#[tokio::test]
async fn test_group_by_results_are_flattened() {
    let mock = MockTransport::new();
    let reply = v6::SearchReply {
        took: 0.01,
        group_by_results: vec![v6::GroupByResult {
            name: "science".into(),
            min_distance: 0.1,
            max_distance: 0.4,
            number_of_objects: 2,
            objects: vec![
                result(Uuid::new_v4(), b"{}", 0.1),
                result(Uuid::new_v4(), b"{}", 0.4),
            ],
            generative: None,
        }],
        ..Default::default()
    };
    mock.push_search_reply(Ok(reply.encode_to_vec()));
    let client = client(&mock).await;

    let results = client.query(&QueryDescription::fetch("Articles")).await.unwrap();
    assert_eq!(results.groups().len(), 1);
    assert_eq!(results.groups()[0].number_of_objects, 2);
    let groups: Vec<Option<String>> = results.map(|r| r.unwrap().group).collect();
    assert_eq!(groups, vec![Some("science".to_string()); 2]);
}

#[tokio::test(start_paused = true)]
async fn test_caller_opted_retry_recovers_from_transient_failure() {
    let mock = MockTransport::new();
    mock.push_search_reply(Err(TransportError::unavailable("restarting")));
    mock.push_search_reply(Ok(v6::SearchReply::default().encode_to_vec()));
    let client = client(&mock).await;
    let policy = RetryPolicy::new(3, Duration::from_millis(10), Duration::from_millis(100), 0.0);

    let query = QueryDescription::fetch("Articles");
    let results = policy
        .run(|_attempt| client.query(&query))
        .await
        .unwrap();
    assert_eq!(results.count(), 0);
    assert_eq!(mock.search_calls(), 2);
}

#[tokio::test]
async fn test_query_failure_surfaces_without_retry() {
    let mock = MockTransport::new();
    mock.push_search_reply(Err(TransportError::new(
        TransportErrorKind::NotFound,
        "collection Articles not found",
    )));
    let client = client(&mock).await;

    let err = client
        .query(&QueryDescription::fetch("Articles"))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ClientError::Transport(TransportError { kind: TransportErrorKind::NotFound, .. })
    ));
    assert_eq!(mock.search_calls(), 1);
}

#[tokio::test]
async fn test_linked_objects_nest_under_reference_properties() {
    let mock = MockTransport::new();
    let (article, author) = (Uuid::new_v4(), Uuid::new_v4());
    let mut linked = result(author, br#"{"name":"Ada"}"#, 0.0);
    linked.target_collection = "People".into();
    let mut with_link = result(article, br#"{"title":"first"}"#, 0.1);
    with_link.target_collection = "Articles".into();
    with_link.ref_props_requested = true;
    with_link.ref_props = vec![v6::RefPropertiesResult {
        prop_name: "author".into(),
        properties: vec![linked],
    }];
    let mut unlinked = result(Uuid::new_v4(), br#"{"title":"second"}"#, 0.2);
    unlinked.ref_props_requested = true;
    let reply = v6::SearchReply {
        results: vec![with_link, unlinked],
        ..Default::default()
    };
    mock.push_search_reply(Ok(reply.encode_to_vec()));
    let client = client(&mock).await;

    let query = QueryDescription::fetch("Articles")
        .with_reference(QueryReference::new("author").with_properties(["name"]));
    let records: Vec<_> = client
        .query(&query)
        .await
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(records[0].collection.as_deref(), Some("Articles"));
    let authors = &records[0].references.as_ref().unwrap()["author"];
    assert_eq!(authors.len(), 1);
    assert_eq!(authors[0].id, Some(author));
    assert_eq!(authors[0].collection.as_deref(), Some("People"));
    assert_eq!(authors[0].properties["name"], "Ada");
    assert_eq!(records[1].references.as_ref().map(|refs| refs.len()), Some(0));

    let request = v6::SearchRequest::decode(&mock.last_search_body().unwrap()[..]).unwrap();
    assert_eq!(request.ref_properties.len(), 1);
    assert_eq!(request.ref_properties[0].reference_property, "author");
}

#[tokio::test]
async fn test_near_image_reaches_the_server() {
    let mock = MockTransport::new();
    let id = Uuid::new_v4();
    let reply = v6::SearchReply {
        results: vec![result(id, br#"{"caption":"cat"}"#, 0.05)],
        ..Default::default()
    };
    mock.push_search_reply(Ok(reply.encode_to_vec()));
    let client = client(&mock).await;

    let query = QueryDescription::near_image(
        "Photos",
        NearImage::new("iVBORw0KGgo=")
            .with_distance(0.2)
            .with_target_vector("clip"),
    );
    let mut records = client.query(&query).await.unwrap();
    let record = records.next().unwrap().unwrap();
    assert_eq!(record.id, Some(id));
    assert_eq!(record.references, None);

    let request = v6::SearchRequest::decode(&mock.last_search_body().unwrap()[..]).unwrap();
    let near = request.near_image.unwrap();
    assert_eq!(near.image, "iVBORw0KGgo=");
    assert_eq!(near.distance, Some(0.2));
    assert_eq!(near.target_vectors, vec!["clip".to_string()]);
}

#[tokio::test]
async fn test_old_generation_rejects_before_sending() {
    let mock = MockTransport::new().with_schema_versions(&["v4"]);
    let client = client(&mock).await;

    let image = QueryDescription::near_image(
        "Photos",
        NearImage::new("iVBORw0KGgo=").with_target_vector("clip"),
    );
    let err = client.query(&image).await.unwrap_err();
    assert!(matches!(err, ClientError::SchemaIncompatible { .. }));

    let linked = QueryDescription::fetch("Articles").with_reference(QueryReference::new("author"));
    let err = client.query(&linked).await.unwrap_err();
    assert!(matches!(err, ClientError::SchemaIncompatible { .. }));
    assert_eq!(mock.search_calls(), 0);
}
