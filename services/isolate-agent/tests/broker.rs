//! Configuration broker HTTP contract.

use orbit_isolate::{BrokerClient, BrokerError};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_fetch_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/configuration/web"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "web",
            "kind": "native",
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = BrokerClient::new(&server.uri()).unwrap();
    let document = client.fetch_configuration("web").await.unwrap();
    assert_eq!(document["kind"], "native");
}

#[tokio::test]
async fn test_fetch_non_200_carries_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/configuration/ghost"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let client = BrokerClient::new(&server.uri()).unwrap();
    let err = client.fetch_configuration("ghost").await.unwrap_err();
    assert!(matches!(err, BrokerError::Status(404)));
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn test_other_success_codes_are_errors() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/configuration/web"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let client = BrokerClient::new(&server.uri()).unwrap();
    let err = client.delete_configuration("web").await.unwrap_err();
    assert_eq!(err.status(), Some(204));
}

#[tokio::test]
async fn test_delete_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/configuration/web"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let client = BrokerClient::new(&server.uri()).unwrap();
    client.delete_configuration("web").await.unwrap();
}

#[tokio::test]
async fn test_unreachable_broker_is_transport_error() {
    // Bound and immediately released, so nothing listens there.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let client = BrokerClient::new(&format!("http://127.0.0.1:{port}")).unwrap();
    let err = client.fetch_configuration("web").await.unwrap_err();
    assert!(matches!(err, BrokerError::Transport(_)));
}
