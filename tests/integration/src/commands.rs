//! Request/response commands over a single websocket.

use serde_json::json;

use crate::helpers::TestServer;

#[tokio::test]
async fn set_then_get() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd("SET k v").await, json!("OK"));
    assert_eq!(c.cmd("GET k").await, json!("v"));
}

#[tokio::test]
async fn missing_key_reads_as_nil() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd("GET nope").await, json!("(nil)"));
}

#[tokio::test]
async fn quoted_arguments_keep_their_spaces() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd("SET greeting \"hello world\"").await, json!("OK"));
    assert_eq!(c.cmd("GET greeting").await, json!("hello world"));
}

#[tokio::test]
async fn counters_and_expiry_sentinels() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd("INCR hits").await, json!("1"));
    assert_eq!(c.cmd("TTL hits").await, json!("-1"));
    assert_eq!(c.cmd("TTL ghost").await, json!("-2"));
    assert_eq!(c.cmd("DEL hits").await, json!("1"));
    assert_eq!(c.cmd("DEL hits").await, json!("0"));
}

#[tokio::test]
async fn errors_are_reported_as_text() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    let reply = c.cmd_text("GET").await;
    assert!(reply.contains("wrong number of arguments"), "{reply}");
    // the connection stays usable
    assert_eq!(c.cmd("PING").await, json!("PONG"));
}

#[tokio::test]
async fn unimplemented_command_gets_a_notice() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(
        c.cmd_text("QUNWATCH \"SELECT * FROM k\"").await,
        "Command is not implemented with Websocket"
    );
    assert_eq!(c.cmd("PING").await, json!("PONG"));
}

#[tokio::test]
async fn unbalanced_quotes_fail_parsing() {
    let server = TestServer::start();
    let mut c = server.connect().await;

    assert_eq!(c.cmd_text("SET k \"open").await, "error: parsing failed");
}
