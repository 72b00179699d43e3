//! Integration tests for QuickPoll.
//!
//! Each test spawns the real router on an ephemeral port and talks to it
//! over HTTP with `reqwest`, so cookies, connect-info and SSE framing behave
//! as they do in production.
//!
//! ```bash
//! cargo test -p quickpoll-integration-tests
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;
use tokio::{net::TcpListener, task::JoinHandle};

use quickpoll_server::{AppState, ServerConfig, build_router};

/// A running server bound to `127.0.0.1` on a random port.
pub struct TestServer {
    base_url: String,
    state: AppState,
    handle: JoinHandle<()>,
}

impl TestServer {
    /// Spawn a server with rate limiting off and a one second heartbeat.
    pub async fn spawn() -> Self {
        Self::spawn_with(ServerConfig {
            rate_limit: false,
            heartbeat_interval: Duration::from_secs(1),
            ..ServerConfig::default()
        })
        .await
    }

    /// Spawn a server with a custom configuration. Host and port are ignored.
    ///
    /// # Panics
    ///
    /// Panics if no local port can be bound.
    pub async fn spawn_with(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind test listener");
        let addr = listener.local_addr().expect("Listener has no address");

        let state = AppState::new(config);
        let app = build_router(state.clone());

        let handle = tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            handle,
        }
    }

    /// Absolute URL for `path`.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Direct access to server state for assertions.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// A fresh browser-like client with its own cookie jar, i.e. a new
    /// QuickPoll client id.
    ///
    /// # Panics
    ///
    /// Panics if the HTTP client cannot be built.
    #[must_use]
    pub fn client() -> Client {
        Client::builder()
            .cookie_store(true)
            .build()
            .expect("Failed to create HTTP client")
    }

    /// POST `body` as JSON and return the response.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be sent.
    pub async fn post(&self, client: &Client, path: &str, body: &Value) -> Response {
        client
            .post(self.url(path))
            .json(body)
            .send()
            .await
            .expect("Failed to send POST")
    }

    /// GET `path` and return the response.
    ///
    /// # Panics
    ///
    /// Panics if the request cannot be sent.
    pub async fn get(&self, client: &Client, path: &str) -> Response {
        client
            .get(self.url(path))
            .send()
            .await
            .expect("Failed to send GET")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Read a response body as JSON.
///
/// # Panics
///
/// Panics if the body is not JSON.
pub async fn json_body(response: Response) -> Value {
    response.json().await.expect("Response body is not JSON")
}
