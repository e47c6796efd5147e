//! Test helpers for spawning a cinder-server and talking to it over
//! websockets.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus};
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

/// How long a test waits for any single frame before failing.
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// A cinder-server subprocess managed by the test harness.
pub struct TestServer {
    child: Child,
    pub port: u16,
}

impl TestServer {
    /// Starts a new cinder-server on a random port.
    ///
    /// Blocks until the server is accepting connections (up to 5 seconds).
    pub fn start() -> Self {
        let port = find_free_port();
        let binary = server_binary();

        let child = Command::new(&binary)
            .arg("--host")
            .arg("127.0.0.1")
            .arg("--port")
            .arg(port.to_string())
            // suppress tracing output in tests
            .env("RUST_LOG", "error")
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()
            .unwrap_or_else(|e| {
                panic!("failed to spawn cinder-server at {}: {e}", binary.display())
            });

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if Instant::now() > deadline {
                panic!("cinder-server failed to start within 5 seconds on port {port}");
            }
            if std::net::TcpStream::connect(format!("127.0.0.1:{port}")).is_ok() {
                break;
            }
            std::thread::sleep(Duration::from_millis(50));
        }

        Self { child, port }
    }

    /// Opens a websocket client against this server.
    pub async fn connect(&self) -> TestClient {
        TestClient::connect(self.port).await
    }

    /// Plain HTTP GET returning the response body.
    pub fn http_get(&self, path: &str) -> String {
        let mut stream = std::net::TcpStream::connect(format!("127.0.0.1:{}", self.port))
            .expect("connect for http get");
        let req = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(req.as_bytes()).unwrap();
        let mut reply = String::new();
        stream.read_to_string(&mut reply).unwrap();
        reply
    }

    /// Waits for the process to exit on its own.
    pub fn wait_exit(&mut self, within: Duration) -> ExitStatus {
        let deadline = Instant::now() + within;
        loop {
            if let Some(status) = self.child.try_wait().unwrap() {
                return status;
            }
            if Instant::now() > deadline {
                panic!("cinder-server still running after {within:?}");
            }
            std::thread::sleep(Duration::from_millis(25));
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A websocket client that sends text commands and reads text replies.
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    async fn connect(port: u16) -> Self {
        let url = format!("ws://127.0.0.1:{port}/");
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .unwrap_or_else(|e| panic!("failed to open websocket to {url}: {e}"));
        Self { ws }
    }

    /// Sends one command line without waiting for a reply.
    pub async fn send(&mut self, line: &str) {
        self.ws.send(Message::text(line.to_owned())).await.unwrap();
    }

    /// Reads the next frame, skipping control frames.
    pub async fn read(&mut self) -> Message {
        loop {
            let frame = tokio::time::timeout(FRAME_TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a frame")
                .expect("websocket closed while waiting for a frame")
                .expect("websocket read failed");
            match frame {
                Message::Ping(_) | Message::Pong(_) => continue,
                other => return other,
            }
        }
    }

    /// Reads the next text frame.
    pub async fn read_text(&mut self) -> String {
        match self.read().await {
            Message::Text(text) => text.as_str().to_owned(),
            other => panic!("expected text frame, got {other:?}"),
        }
    }

    /// Reads the next text frame and parses it as JSON.
    pub async fn read_json(&mut self) -> Value {
        let text = self.read_text().await;
        serde_json::from_str(&text).unwrap_or_else(|e| panic!("not json ({e}): {text}"))
    }

    /// Sends a command and returns its JSON reply.
    pub async fn cmd(&mut self, line: &str) -> Value {
        self.send(line).await;
        self.read_json().await
    }

    /// Sends a command and returns its raw text reply.
    pub async fn cmd_text(&mut self, line: &str) -> String {
        self.send(line).await;
        self.read_text().await
    }

    /// Asserts nothing arrives within `quiet`.
    pub async fn assert_silent(&mut self, quiet: Duration) {
        if let Ok(frame) = tokio::time::timeout(quiet, self.ws.next()).await {
            panic!("expected no frame, got {frame:?}");
        }
    }

    /// Reads until the server's close frame and returns its code and reason.
    pub async fn read_close(&mut self) -> (u16, String) {
        loop {
            match self.read().await {
                Message::Close(Some(frame)) => {
                    return (u16::from(frame.code), frame.reason.as_str().to_owned())
                }
                Message::Close(None) => panic!("close frame without a status"),
                _ => continue,
            }
        }
    }
}

/// Finds a free TCP port by binding to port 0.
fn find_free_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// Locates the cinder-server binary next to the test binary.
fn server_binary() -> PathBuf {
    let mut path = std::env::current_exe().unwrap();
    // test binary lives in target/<profile>/deps/
    path.pop();
    if path.ends_with("deps") {
        path.pop();
    }
    path.push("cinder-server");
    if !path.exists() {
        panic!(
            "cinder-server binary not found. run `cargo build` first.\nlooked at: {}",
            path.display()
        );
    }
    path
}
