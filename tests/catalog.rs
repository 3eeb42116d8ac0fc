mod common;

use assert_matches::assert_matches;
use serde_json::json;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use common::MockHost;
use databus_client::catalog::{CatalogClient, CatalogHttpClient};
use databus_client::config::ClientConfig;
use databus_client::error::DatabusError;
use databus_client::sparql::{QueryClient, SparqlHttpClient};

fn config_with_key() -> ClientConfig {
    ClientConfig {
        api_key: Some("catalog-key".to_string()),
        ..ClientConfig::default()
    }
}

#[test]
fn graph_is_fetched_as_json_ld_with_api_key() {
    let host = MockHost::start();
    let artifact = host.url("/acc/grp/art");
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/art"))
            .and(header("accept", "application/ld+json"))
            .and(header("x-api-key", "catalog-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "@graph": [
                    {"@id": artifact, "@type": "databus:Artifact"},
                    {"@id": format!("{artifact}/1.0"), "@type": "databus:Version"}
                ]
            })))
            .expect(1),
    );

    let client = CatalogHttpClient::new(&config_with_key()).unwrap();
    let graph = client.fetch_graph(&artifact).unwrap();
    assert_eq!(graph.len(), 2);
    assert_eq!(graph.children_of(&artifact).len(), 1);
}

#[test]
fn api_key_is_not_sent_to_another_origin() {
    let host = MockHost::start();
    let mirror = MockHost::start();
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/art"))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("Location", mirror.url("/acc/grp/art").as_str()),
            )
            .expect(1),
    );
    mirror.mount(
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"@graph": []})))
            .expect(0),
    );

    let client = CatalogHttpClient::new(&config_with_key()).unwrap();
    let err = client.fetch_graph(&host.url("/acc/grp/art")).unwrap_err();
    assert_matches!(err, DatabusError::Metadata { ref message, .. } if message.contains("302"));
}

#[test]
fn same_origin_redirect_keeps_api_key() {
    let host = MockHost::start();
    let artifact = host.url("/acc/grp/art");
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/old"))
            .respond_with(ResponseTemplate::new(301).insert_header("Location", "/acc/grp/art"))
            .expect(1),
    );
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/art"))
            .and(header("x-api-key", "catalog-key"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"@id": artifact})),
            )
            .expect(1),
    );

    let client = CatalogHttpClient::new(&config_with_key()).unwrap();
    let graph = client.fetch_graph(&host.url("/acc/grp/old")).unwrap();
    assert_eq!(graph.len(), 1);
}

#[test]
fn cross_origin_redirect_is_followed_without_api_key() {
    let host = MockHost::start();
    let mirror = MockHost::start();
    let artifact = mirror.url("/acc/grp/art");
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/art"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", artifact.as_str())),
    );
    mirror.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/art"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"@id": artifact})),
            )
            .expect(1),
    );

    let client = CatalogHttpClient::new(&ClientConfig::default()).unwrap();
    let graph = client.fetch_graph(&host.url("/acc/grp/art")).unwrap();
    assert_eq!(graph.len(), 1);
}

#[test]
fn undecodable_graph_is_metadata_error() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/art"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not json</html>")),
    );
    let client = CatalogHttpClient::new(&ClientConfig::default()).unwrap();
    let err = client.fetch_graph(&host.url("/acc/grp/art")).unwrap_err();
    assert_matches!(err, DatabusError::Metadata { .. });
}

#[test]
fn missing_node_is_metadata_error() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/grp/gone"))
            .respond_with(ResponseTemplate::new(404)),
    );
    let client = CatalogHttpClient::new(&ClientConfig::default()).unwrap();
    let err = client.fetch_graph(&host.url("/acc/grp/gone")).unwrap_err();
    assert_matches!(err, DatabusError::Metadata { ref message, .. } if message.contains("404"));
}

#[test]
fn collection_query_is_fetched_as_text() {
    let host = MockHost::start();
    let query = "SELECT DISTINCT ?file WHERE { ?d <http://www.w3.org/ns/dcat#downloadURL> ?file }";
    host.mount(
        Mock::given(method("GET"))
            .and(path("/acc/collections/core"))
            .and(header("accept", "text/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_string(query)),
    );
    let client = CatalogHttpClient::new(&ClientConfig::default()).unwrap();
    let fetched = client
        .fetch_collection_query(&host.url("/acc/collections/core"))
        .unwrap();
    assert_eq!(fetched, query);
}

#[test]
fn query_is_posted_as_form_and_rows_read_in_order() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .and(path("/sparql"))
            .and(header("accept", "application/sparql-results+json"))
            .and(header("x-api-key", "catalog-key"))
            .and(body_string_contains("query=SELECT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "head": {"vars": ["file"]},
                "results": {"bindings": [
                    {"file": {"type": "uri", "value": "https://h/a/g/x/1/one.ttl"}},
                    {"file": {"type": "uri", "value": "https://h/a/g/x/1/two.ttl"}}
                ]}
            })))
            .expect(1),
    );
    let client = SparqlHttpClient::new(&config_with_key()).unwrap();
    let files = client
        .select_files(&host.url("/sparql"), "SELECT ?file WHERE { ?s ?p ?file }")
        .unwrap();
    assert_eq!(
        files,
        vec!["https://h/a/g/x/1/one.ttl", "https://h/a/g/x/1/two.ttl"]
    );
}

#[test]
fn query_redirect_to_another_origin_is_not_followed_with_api_key() {
    let host = MockHost::start();
    let mirror = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .and(path("/sparql"))
            .respond_with(
                ResponseTemplate::new(307)
                    .insert_header("Location", mirror.url("/sparql").as_str()),
            )
            .expect(1),
    );
    mirror.mount(
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0),
    );

    let client = SparqlHttpClient::new(&config_with_key()).unwrap();
    let err = client
        .select_files(&host.url("/sparql"), "SELECT ?file WHERE { ?s ?p ?file }")
        .unwrap_err();
    assert_matches!(err, DatabusError::Metadata { ref message, .. } if message.contains("307"));
}

#[test]
fn transient_endpoint_failure_is_retried() {
    let host = MockHost::start();
    host.mount(
        Mock::given(method("POST"))
            .and(path("/sparql"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .with_priority(1),
    );
    host.mount(
        Mock::given(method("POST"))
            .and(path("/sparql"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": {"bindings": [{"f": {"value": "https://h/f.nt"}}]}
            }))),
    );
    let client = SparqlHttpClient::new(&ClientConfig::default()).unwrap();
    let files = client.select_files(&host.url("/sparql"), "SELECT ?f {}").unwrap();
    assert_eq!(files, vec!["https://h/f.nt"]);
    assert_eq!(host.received().len(), 2);
}
