//! Pushed updates: live queries and channel subscriptions.

use std::time::Duration;

use serde_json::json;

use crate::helpers::TestServer;

#[tokio::test]
async fn qwatch_receives_updates_from_other_connections() {
    let server = TestServer::start();
    let mut watcher = server.connect().await;
    let mut writer = server.connect().await;

    assert_eq!(
        watcher.cmd("QWATCH \"SELECT * FROM k\"").await,
        json!(["qwatch", "SELECT * FROM k", []])
    );

    assert_eq!(writer.cmd("SET k v").await, json!("OK"));
    assert_eq!(
        watcher.read_json().await,
        json!(["qwatch", "SELECT * FROM k", [["k", "v"]]])
    );

    // the writer only ever sees its own reply
    writer.assert_silent(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn updates_stay_with_their_subscriber() {
    let server = TestServer::start();
    let mut watches_a = server.connect().await;
    let mut watches_b = server.connect().await;
    let mut writer = server.connect().await;

    watches_a.cmd("QWATCH \"SELECT * FROM a\"").await;
    watches_b.cmd("QWATCH \"SELECT * FROM b\"").await;

    writer.cmd("SET a 1").await;
    assert_eq!(
        watches_a.read_json().await,
        json!(["qwatch", "SELECT * FROM a", [["a", "1"]]])
    );
    watches_b.assert_silent(Duration::from_millis(200)).await;
}

#[tokio::test]
async fn publish_reaches_subscriber() {
    let server = TestServer::start();
    let mut sub = server.connect().await;
    let mut publisher = server.connect().await;

    assert_eq!(
        sub.cmd("SUBSCRIBE events").await,
        json!(["subscribe", "events", 1])
    );
    assert_eq!(publisher.cmd("PUBLISH events hello").await, json!("1"));
    assert_eq!(
        sub.read_json().await,
        json!(["message", "events", "hello"])
    );
}
