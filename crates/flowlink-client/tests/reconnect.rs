//! Connection lifecycle: offline buffering, bounded reconnection, and the
//! terminal behaviors around first dial and explicit disconnect.

#![allow(clippy::unwrap_used)]

mod mock;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use flowlink_client::dispatch::{channel, BusEvent};
use flowlink_client::transport::ConnectionState;
use flowlink_client::FlowlinkClient;
use flowlink_core::error::ErrorCode;
use flowlink_core::protocol::envelope::{Envelope, EnvelopeKind};

use mock::{test_config, wait_for, MockConnector};

fn envelope(n: u32) -> Envelope {
    Envelope::new(EnvelopeKind::System, &serde_json::json!({ "n": n })).unwrap()
}

#[tokio::test]
async fn first_dial_failure_is_returned_not_retried() {
    let connector = MockConnector::new();
    connector.set_always_fail(true);
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    let err = client.connect(None).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ConnectFailed);
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // No background retry loop for a connection that never existed.
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(connector.dial_count(), 1);
}

#[tokio::test]
async fn connect_resolves_already_connected() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    client.send(envelope(1));

    // No settling period: a consumer may rely on the socket path for the
    // very next call after connect() resolves.
    client.connect(None).await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(client.queued(), 0, "offline backlog not flushed on connect");
}

#[tokio::test]
async fn offline_sends_flush_in_order_on_connect() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    client.send(envelope(1));
    client.send(envelope(2));
    client.send(envelope(3));
    assert_eq!(client.queued(), 3);

    client.connect(None).await.unwrap();
    let handle = {
        let c = connector.clone();
        assert!(wait_for(move || c.latest().is_some(), 2000).await);
        connector.latest().unwrap()
    };

    for n in 1..=3u32 {
        let sent = handle.next_sent().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(v["type"], "system");
        assert_eq!(v["data"]["n"], n);
    }
    assert_eq!(client.queued(), 0);
}

#[tokio::test]
async fn sends_during_outage_arrive_after_reconnect() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    client.connect(None).await.unwrap();
    let c = client_state(&client);
    assert!(wait_for(move || c() == ConnectionState::Connected, 2000).await);
    let first = connector.latest().unwrap();

    first.close_remote();
    let c = client_state(&client);
    assert!(wait_for(move || c() != ConnectionState::Connected, 2000).await);

    client.send(envelope(7));

    // One redial succeeds after the base delay.
    let c = client_state(&client);
    assert!(wait_for(move || c() == ConnectionState::Connected, 2000).await);
    let second = connector.latest().unwrap();
    assert_eq!(connector.connection_count(), 2);

    let sent = second.next_sent().await.unwrap();
    let v: serde_json::Value = serde_json::from_str(&sent).unwrap();
    assert_eq!(v["data"]["n"], 7);
}

#[tokio::test]
async fn accepted_sends_survive_a_failed_write() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    client.connect(None).await.unwrap();
    let first = connector.latest().unwrap();
    first.fail_writes();

    // Both are accepted while the writer still looks live; the first write
    // failure tears the session down with the second still in flight.
    client.send(envelope(1));
    client.send(envelope(2));

    let cc = connector.clone();
    assert!(wait_for(move || cc.connection_count() == 2, 2000).await);
    let second = connector.latest().unwrap();

    for n in 1..=2u32 {
        let sent = second.next_sent().await.unwrap();
        let v: serde_json::Value = serde_json::from_str(&sent).unwrap();
        assert_eq!(v["data"]["n"], n, "lost or reordered across reconnect");
    }
}

#[tokio::test]
async fn disconnect_during_dial_wins() {
    let connector = MockConnector::new();
    connector.set_dial_delay(200);
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    let (connected, ()) = tokio::join!(client.connect(None), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.disconnect();
    });
    connected.unwrap();

    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(connector.dial_count(), 1);

    // The dialed transport never came up, so sends buffer.
    client.send(envelope(1));
    assert_eq!(client.queued(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_dial_once() {
    let connector = MockConnector::new();
    connector.set_dial_delay(50);
    let client = Arc::new(
        FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone()).unwrap(),
    );

    let mut calls = Vec::new();
    for _ in 0..4 {
        let c = Arc::clone(&client);
        calls.push(tokio::spawn(async move { c.connect(None).await }));
    }
    for call in calls {
        call.await.unwrap().unwrap();
    }

    assert_eq!(connector.dial_count(), 1);
    assert_eq!(client.connection_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn exhausted_retry_budget_emits_exactly_one_fault() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    let faults: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&faults);
    client.on(channel::ERROR, move |ev| {
        if let BusEvent::Fault { code, .. } = ev {
            sink.lock().unwrap().push(code.as_str().to_string());
        }
    });

    client.connect(None).await.unwrap();
    let c = client_state(&client);
    assert!(wait_for(move || c() == ConnectionState::Connected, 2000).await);

    connector.set_always_fail(true);
    connector.latest().unwrap().close_remote();

    // 3 failed redials at 100/200/200ms, then terminal disconnect.
    let c = client_state(&client);
    assert!(wait_for(move || c() == ConnectionState::Disconnected, 4000).await);
    let cc = connector.clone();
    assert!(wait_for(move || cc.dial_count() == 4, 2000).await);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(*faults.lock().unwrap(), ["RETRIES_EXHAUSTED"]);
    assert_eq!(connector.dial_count(), 4, "retries continued past the budget");
}

#[tokio::test]
async fn client_disconnect_is_terminal() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    client.connect(None).await.unwrap();
    let c = client_state(&client);
    assert!(wait_for(move || c() == ConnectionState::Connected, 2000).await);

    client.disconnect();
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);

    // Long enough for any (wrong) reconnect to have dialed.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(connector.dial_count(), 1);
    client.disconnect();
}

#[tokio::test]
async fn state_transitions_are_published() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    let states: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&states);
    client.on(channel::CONNECTION, move |ev| {
        if let BusEvent::State(s) = ev {
            sink.lock().unwrap().push(s.as_str());
        }
    });

    client.connect(None).await.unwrap();
    let s = Arc::clone(&states);
    assert!(wait_for(move || s.lock().unwrap().contains(&"connected"), 2000).await);
    assert_eq!(&states.lock().unwrap()[..2], ["connecting", "connected"]);

    client.disconnect();
    let s = Arc::clone(&states);
    assert!(wait_for(move || s.lock().unwrap().last() == Some(&"disconnected"), 2000).await);
}

#[tokio::test]
async fn connect_while_connected_is_a_no_op() {
    let connector = MockConnector::new();
    let client = FlowlinkClient::with_connector(test_config(3, 100, 200, 1000), connector.clone())
        .unwrap();

    client.connect(None).await.unwrap();
    let c = client_state(&client);
    assert!(wait_for(move || c() == ConnectionState::Connected, 2000).await);

    client.connect(None).await.unwrap();
    assert_eq!(connector.dial_count(), 1);
}

fn client_state(client: &FlowlinkClient) -> impl Fn() -> ConnectionState + '_ {
    move || client.connection_state()
}
