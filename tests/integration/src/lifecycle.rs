//! Process lifecycle: health checks, ABORT, and connection teardown.

use std::time::Duration;

use serde_json::json;

use crate::helpers::TestServer;

#[test]
fn health_endpoint_answers_ok() {
    let server = TestServer::start();
    let reply = server.http_get("/health");
    assert!(reply.starts_with("HTTP/1.1 200"), "{reply}");
    assert!(reply.ends_with("ok"), "{reply}");
}

#[tokio::test]
async fn abort_stops_the_process() {
    let mut server = TestServer::start();
    let mut c = server.connect().await;
    let mut idle = server.connect().await;

    assert_eq!(c.cmd("SET k v").await, json!("OK"));
    c.send("ABORT").await;

    let (code, reason) = c.read_close().await;
    assert_eq!(code, 1000);
    assert_eq!(reason, "close 1000 (normal)");
    let (code, _) = idle.read_close().await;
    assert_eq!(code, 1000);

    let status = server.wait_exit(Duration::from_secs(5));
    assert!(status.success(), "exit status {status:?}");
}

#[tokio::test]
async fn client_close_leaves_server_running() {
    let server = TestServer::start();
    {
        let mut c = server.connect().await;
        c.cmd("SET k v").await;
    }
    let mut c = server.connect().await;
    assert_eq!(c.cmd("GET k").await, json!("v"));
}
