//! End-to-end S3: a second service for the same cloud name displaces the
//! first, and every client attached to the displaced service is dropped
//! with it.

mod common;

use common::client::{Frame, TestClient, TestService};
use common::TestServer;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn second_service_for_same_network_displaces_the_first() {
    let server = TestServer::spawn(18872).await.expect("failed to spawn switchboxd");

    let mut service_a = TestService::connect(&server.address(), "netA", b"relay")
        .await
        .expect("service A failed to connect");

    let mut client_b = TestClient::connect(&server.address(), "netA")
        .await
        .expect("client B failed to connect");

    service_a
        .collect_new_connections(1, WAIT)
        .await
        .expect("expected NEW_CONNECTION for B");

    // A second service claims the same cloud name; A should be displaced.
    let mut _service_a_prime = TestService::connect(&server.address(), "netA", b"relay")
        .await
        .expect("service A' failed to connect");

    // A is terminating: its socket should observe EOF rather than further
    // frames.
    let outcome = service_a.recv_frame(WAIT).await;
    assert!(outcome.is_err(), "displaced service A should be disconnected, got {outcome:?}");

    // B was attached to A; once A is gone B has no service and is unlinked.
    let b_outcome = client_b.recv(1, WAIT).await;
    assert!(
        matches!(&b_outcome, Ok(bytes) if bytes.is_empty()) || b_outcome.is_err(),
        "orphaned client B should be disconnected, got {b_outcome:?}"
    );
}

#[tokio::test]
async fn displacing_service_becomes_reachable_for_new_clients() {
    let server = TestServer::spawn(18873).await.expect("failed to spawn switchboxd");

    let _service_a = TestService::connect(&server.address(), "netA", b"relay")
        .await
        .expect("service A failed to connect");

    let mut service_a_prime = TestService::connect(&server.address(), "netA", b"relay")
        .await
        .expect("service A' failed to connect");

    let mut client_c = TestClient::connect(&server.address(), "netA")
        .await
        .expect("client C failed to connect");

    let ids = service_a_prime
        .collect_new_connections(1, WAIT)
        .await
        .expect("A' should see the NEW_CONNECTION for C, not A");
    assert_eq!(ids.len(), 1);

    client_c.send(b"ping").await.expect("client C write failed");
    match service_a_prime.recv_frame(WAIT).await.expect("expected payload on A'") {
        Frame::Payload { data, .. } => assert_eq!(data, b"ping"),
        other => panic!("expected payload frame, got {other:?}"),
    }
}
