//! Common test utilities for fleet-realtime integration tests.
//!
//! - [`FakeTransport`]: scripted in-memory endpoint, driven with a paused clock
//! - [`MockEndpoint`]: real WebSocket server for end-to-end tests

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::sync::Notify;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use url::Url;

use fleet_realtime::{
    Backoff, ChannelKey, ClientFrame, ConnectionState, Error, InboundMessage, Link, Peer, RealtimeClient,
    RealtimeOptions, Result, Sequence, ServerFrame, Transport,
};

/// Macro for verbose test output (controlled by TEST_VERBOSE env var)
#[macro_export]
macro_rules! verbose_println {
    ($($arg:tt)*) => {
        if std::env::var("TEST_VERBOSE").is_ok() {
            println!($($arg)*);
        }
    };
}

/// Installs a tracing subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// FakeTransport
// ============================================================================

/// How the fake endpoint answers one dial.
#[derive(Debug, Clone, Copy)]
pub enum Step {
    /// Open and acknowledge.
    Accept,
    /// Open and reject the token.
    Reject(&'static str),
    /// Fail to open.
    Refuse,
    /// Open and never answer.
    Hang,
}

/// In-memory endpoint recording every dial and intent frame.
pub struct FakeTransport {
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    dials: AtomicUsize,
    urls: Mutex<Vec<Url>>,
    peer: Mutex<Option<Peer>>,
    sent: Mutex<Vec<ClientFrame>>,
}

impl FakeTransport {
    /// Endpoint that accepts every dial.
    pub fn new() -> Arc<Self> {
        Self::scripted([], Step::Accept)
    }

    /// Endpoint following `steps`, then `fallback` forever.
    pub fn scripted(steps: impl IntoIterator<Item = Step>, fallback: Step) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(steps.into_iter().collect()),
            fallback,
            dials: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
            peer: Mutex::new(None),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Number of dials so far.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    /// URL of the most recent dial.
    pub fn last_url(&self) -> Option<Url> {
        self.urls.lock().last().cloned()
    }

    /// Simulates the connection dropping.
    pub fn drop_connection(&self) {
        self.collect();
        self.peer.lock().take();
    }

    /// Pushes a message on the current connection.
    pub fn push(&self, message: InboundMessage) -> bool {
        let text = ServerFrame::from(message)
            .encode()
            .expect("encodable frame");
        self.push_raw(text)
    }

    /// Pushes raw text on the current connection.
    pub fn push_raw(&self, text: impl Into<String>) -> bool {
        self.peer
            .lock()
            .as_ref()
            .is_some_and(|peer| peer.send(text))
    }

    /// Every intent frame written so far.
    pub fn sent(&self) -> Vec<ClientFrame> {
        self.collect();
        self.sent.lock().clone()
    }

    /// Subscribe intents written for `key`.
    pub fn subscribes(&self, key: &ChannelKey) -> usize {
        self.sent()
            .iter()
            .filter(|f| matches!(f, ClientFrame::Subscribe { .. }) && f.key() == key)
            .count()
    }

    /// Unsubscribe intents written for `key`.
    pub fn unsubscribes(&self, key: &ChannelKey) -> usize {
        self.sent()
            .iter()
            .filter(|f| matches!(f, ClientFrame::Unsubscribe { .. }) && f.key() == key)
            .count()
    }

    fn collect(&self) {
        let mut peer = self.peer.lock();
        let Some(peer) = peer.as_mut() else {
            return;
        };
        let mut sent = self.sent.lock();
        while let Some(text) = peer.try_recv() {
            sent.push(serde_json::from_str(&text).expect("valid intent frame"));
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, endpoint: &Url) -> Result<Link> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().push(endpoint.clone());

        let step = self.script.lock().pop_front().unwrap_or(self.fallback);
        let (link, peer) = Link::pair();

        match step {
            Step::Refuse => return Err(Error::connection("connection refused")),
            Step::Accept => {
                peer.send(ServerFrame::Ack.encode()?);
            }
            Step::Reject(reason) => {
                peer.send(
                    ServerFrame::Reject {
                        reason: reason.to_string(),
                    }
                    .encode()?,
                );
            }
            Step::Hang => {}
        }

        self.collect();
        *self.peer.lock() = Some(peer);
        Ok(link)
    }
}

// ============================================================================
// Client helpers
// ============================================================================

/// Options with deterministic backoff for paused-clock tests.
pub fn test_options() -> RealtimeOptions {
    RealtimeOptions::new()
        .with_backoff(Backoff::new().with_jitter(0.0))
        .with_grace_window(Duration::from_secs(2))
        .with_max_reconnect_attempts(5)
}

/// Builds a client over `transport`.
pub fn client_with(transport: &Arc<FakeTransport>, options: RealtimeOptions) -> RealtimeClient {
    init_tracing();
    RealtimeClient::builder()
        .endpoint("wss://realtime.test/socket")
        .shared_transport(Arc::clone(transport) as Arc<dyn Transport>)
        .options(options)
        .build()
        .expect("valid client")
}

/// Waits (in virtual time) until the client reaches `state`.
pub async fn wait_for_state(client: &RealtimeClient, state: ConnectionState) {
    let mut status = client.watch_status();
    tokio::time::timeout(Duration::from_secs(600), status.wait_for(|s| s.state == state))
        .await
        .unwrap_or_else(|_| panic!("client never reached {state}"))
        .expect("supervisor gone");
}

/// Lets the supervisor process everything queued.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Message on `key` carrying `seq` in both the marker and the payload.
pub fn sequenced(key: &ChannelKey, seq: i64) -> InboundMessage {
    InboundMessage::new(key.clone(), "update", serde_json::json!({ "seq": seq }))
        .with_seq(Sequence::new(seq))
}

/// Callback collecting payloads.
pub fn collector() -> (
    impl Fn(&str, &Value) + Send + Sync + 'static,
    Arc<Mutex<Vec<Value>>>,
) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (
        move |_event: &str, payload: &Value| sink.lock().push(payload.clone()),
        seen,
    )
}

/// Sequence numbers seen by a collector.
pub fn seqs(seen: &Mutex<Vec<Value>>) -> Vec<i64> {
    seen.lock()
        .iter()
        .filter_map(|v| v["seq"].as_i64())
        .collect()
}

// ============================================================================
// MockEndpoint
// ============================================================================

/// WebSocket server speaking the real-time protocol.
///
/// Accepts only `valid_token`; answers each subscribe with one message
/// (`seq` 1) on that channel.
pub struct MockEndpoint {
    pub addr: SocketAddr,
    shutdown: Arc<Notify>,
    pub subscribes: Arc<AtomicUsize>,
}

impl MockEndpoint {
    /// Starts the server on an ephemeral port.
    pub async fn start(valid_token: &'static str) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = Arc::new(Notify::new());
        let subscribes = Arc::new(AtomicUsize::new(0));

        let stop = Arc::clone(&shutdown);
        let counter = Arc::clone(&subscribes);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = listener.accept() => {
                        let Ok((stream, _)) = result else { break };
                        let counter = Arc::clone(&counter);
                        tokio::spawn(Self::handle_connection(stream, valid_token, counter));
                    }
                    _ = stop.notified() => break,
                }
            }
        });

        Self {
            addr,
            shutdown,
            subscribes,
        }
    }

    async fn handle_connection(
        stream: tokio::net::TcpStream,
        valid_token: &'static str,
        subscribes: Arc<AtomicUsize>,
    ) {
        let token = Arc::new(Mutex::new(None::<String>));
        let capture = Arc::clone(&token);

        let callback = move |request: &Request,
                             response: Response|
              -> std::result::Result<Response, ErrorResponse> {
            let query = request.uri().query().unwrap_or_default().to_string();
            let url = Url::parse(&format!("ws://local/?{query}")).ok();
            *capture.lock() = url.and_then(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "token")
                    .map(|(_, v)| v.into_owned())
            });
            Ok(response)
        };

        let Ok(ws) = tokio_tungstenite::accept_hdr_async(stream, callback).await else {
            return;
        };
        let (mut write, mut read) = ws.split();

        let verdict = if token.lock().as_deref() == Some(valid_token) {
            ServerFrame::Ack
        } else {
            ServerFrame::Reject {
                reason: "invalid token".to_string(),
            }
        };
        let accepted = matches!(verdict, ServerFrame::Ack);
        if write
            .send(Message::Text(verdict.encode().unwrap().into()))
            .await
            .is_err()
            || !accepted
        {
            return;
        }

        while let Some(Ok(message)) = read.next().await {
            let Message::Text(text) = message else {
                continue;
            };
            let Ok(ClientFrame::Subscribe { key, .. }) = serde_json::from_str(text.as_str())
            else {
                continue;
            };
            subscribes.fetch_add(1, Ordering::SeqCst);

            let reply = ServerFrame::Message {
                key,
                event: "snapshot".to_string(),
                payload: serde_json::json!({ "seq": 1 }),
                seq: Some(Sequence::new(1)),
            };
            if write
                .send(Message::Text(reply.encode().unwrap().into()))
                .await
                .is_err()
            {
                break;
            }
        }
    }

    /// WebSocket URL for this server.
    pub fn ws_url(&self) -> String {
        format!("ws://{}/realtime", self.addr)
    }

    /// Stops accepting connections.
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockEndpoint {
    fn drop(&mut self) {
        self.shutdown();
    }
}
