//! WebSocket transport
//!
//! One logical connection to the CSMS over `wss://` (or `ws://` during
//! development), subprotocol `ocpp2.0.1`. Owns the I/O worker: connect
//! attempts with randomized exponential backoff, ping/pong liveness,
//! inbound frame reassembly, and connection-failure classification.
//! Everything observable is delivered as [`TransportEvent`]s; no
//! callback ever runs on the I/O task itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use rand::Rng;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::Error as WsError;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::domain::InfraError;
use crate::support::ocpp_frame::FrameAssembler;
use crate::support::shutdown::ShutdownSignal;

/// OCPP 2.0.1 WebSocket subprotocol
const OCPP_SUBPROTOCOL: &str = "ocpp2.0.1";

// ── Events & failure classification ────────────────────────────

/// Why a connection attempt (or an established connection) failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailedReason {
    InvalidCsmsCertificate,
    FailedToAuthenticate,
    PongTimeout,
    Network,
    Other,
}

/// Transport-side events, delivered to the orchestrator's event loop.
#[derive(Debug)]
pub enum TransportEvent {
    Connected {
        configuration_slot: i32,
    },
    Disconnected {
        configuration_slot: i32,
        reason: String,
    },
    ConnectionFailed {
        configuration_slot: i32,
        reason: ConnectionFailedReason,
    },
    /// All attempts on the current network profile are spent; the
    /// connectivity manager should advance to the next profile.
    ProfileExhausted {
        configuration_slot: i32,
    },
    Frame(String),
}

// ── Options ────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub csms_url: String,
    pub security_profile: i32,
    /// `(identity, password)` for security profiles 1 and 2.
    pub basic_auth: Option<(String, String)>,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub retry_backoff_wait_minimum: Duration,
    pub retry_backoff_repeat_times: u32,
    /// Upper bound of the random jitter, in seconds.
    pub retry_backoff_random_range: u64,
    /// Attempts before the profile is reported exhausted.
    pub connection_attempts: u32,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            csms_url: String::new(),
            security_profile: 1,
            basic_auth: None,
            ping_interval: Duration::from_secs(30),
            pong_timeout: Duration::from_secs(15),
            retry_backoff_wait_minimum: Duration::from_secs(3),
            retry_backoff_repeat_times: 5,
            retry_backoff_random_range: 10,
            connection_attempts: 5,
        }
    }
}

/// Randomized exponential backoff: `wait_minimum * 2^n` plus jitter,
/// with the exponent capped at `repeat_times`.
pub fn reconnect_delay(options: &ConnectionOptions, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(options.retry_backoff_repeat_times);
    let base = options.retry_backoff_wait_minimum * 2u32.saturating_pow(exponent);
    let jitter = if options.retry_backoff_random_range > 0 {
        Duration::from_secs(rand::thread_rng().gen_range(0..=options.retry_backoff_random_range))
    } else {
        Duration::ZERO
    };
    base + jitter
}

/// Map a websocket error to a failure class.
pub fn classify_error(error: &WsError) -> ConnectionFailedReason {
    match error {
        WsError::Tls(_) => ConnectionFailedReason::InvalidCsmsCertificate,
        WsError::Http(response) => {
            let status = response.status();
            if status == 401 || status == 403 {
                ConnectionFailedReason::FailedToAuthenticate
            } else {
                ConnectionFailedReason::Other
            }
        }
        WsError::Io(_) | WsError::ConnectionClosed | WsError::AlreadyClosed => {
            ConnectionFailedReason::Network
        }
        _ => ConnectionFailedReason::Other,
    }
}

// ── Transport ──────────────────────────────────────────────────

pub struct WebSocketTransport {
    options: ConnectionOptions,
    configuration_slot: i32,
    events: mpsc::UnboundedSender<TransportEvent>,
    outbound: std::sync::Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connected: AtomicBool,
    shutdown: ShutdownSignal,
}

impl WebSocketTransport {
    pub fn new(
        configuration_slot: i32,
        options: ConnectionOptions,
        events: mpsc::UnboundedSender<TransportEvent>,
    ) -> Arc<Self> {
        Arc::new(Self {
            options,
            configuration_slot,
            events,
            outbound: std::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            shutdown: ShutdownSignal::new(),
        })
    }

    /// Begin connection attempts against the configured endpoint.
    pub fn start(self: &Arc<Self>) {
        let transport = self.clone();
        tokio::spawn(async move {
            transport.connection_loop().await;
        });
    }

    /// Hand a text frame to the socket. Returns whether the frame was
    /// accepted by the connection (not whether it reached the peer).
    pub fn send(&self, text: String) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        match self.outbound.lock().unwrap().as_ref() {
            Some(tx) => tx.send(Message::Text(text)).is_ok(),
            None => false,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Close the connection and stop reconnecting.
    pub fn disconnect(&self) {
        self.shutdown.trigger();
    }

    async fn connection_loop(self: Arc<Self>) {
        let mut attempt: u32 = 0;
        loop {
            if self.shutdown.is_triggered() {
                break;
            }

            match self.connect_once().await {
                Ok(reason) => {
                    attempt = 0;
                    let _ = self.events.send(TransportEvent::Disconnected {
                        configuration_slot: self.configuration_slot,
                        reason,
                    });
                    if self.shutdown.is_triggered() {
                        break;
                    }
                }
                Err(reason) => {
                    attempt += 1;
                    warn!(
                        configuration_slot = self.configuration_slot,
                        ?reason,
                        attempt,
                        "Connection attempt failed"
                    );
                    let _ = self.events.send(TransportEvent::ConnectionFailed {
                        configuration_slot: self.configuration_slot,
                        reason,
                    });
                    if attempt >= self.options.connection_attempts {
                        let _ = self.events.send(TransportEvent::ProfileExhausted {
                            configuration_slot: self.configuration_slot,
                        });
                        break;
                    }
                }
            }

            let delay = reconnect_delay(&self.options, attempt.max(1));
            debug!(delay_ms = delay.as_millis() as u64, "Waiting before reconnect");
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.notified().wait() => break,
            }
        }
    }

    fn build_request(&self) -> Result<Request<()>, InfraError> {
        let mut request = self
            .options
            .csms_url
            .as_str()
            .into_client_request()
            .map_err(|e| InfraError::Websocket(e.to_string()))?;

        request.headers_mut().insert(
            SEC_WEBSOCKET_PROTOCOL,
            OCPP_SUBPROTOCOL
                .parse()
                .map_err(|_| InfraError::Websocket("invalid subprotocol header".into()))?,
        );

        if self.options.security_profile < 3 {
            if let Some((identity, password)) = &self.options.basic_auth {
                let credentials =
                    BASE64_STANDARD.encode(format!("{}:{}", identity, password));
                request.headers_mut().insert(
                    AUTHORIZATION,
                    format!("Basic {}", credentials)
                        .parse()
                        .map_err(|_| InfraError::Websocket("invalid auth header".into()))?,
                );
            }
        }

        Ok(request)
    }

    /// Run one connection until it closes. `Ok` carries the close reason
    /// of an established connection; `Err` a classified failure.
    async fn connect_once(&self) -> Result<String, ConnectionFailedReason> {
        let request = match self.build_request() {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "Could not build websocket request");
                return Err(ConnectionFailedReason::Other);
            }
        };

        info!(
            url = self.options.csms_url.as_str(),
            configuration_slot = self.configuration_slot,
            security_profile = self.options.security_profile,
            "Connecting to CSMS"
        );

        let (ws_stream, response) = match connect_async(request).await {
            Ok(ok) => ok,
            Err(e) => return Err(classify_error(&e)),
        };

        let negotiated = response
            .headers()
            .get(SEC_WEBSOCKET_PROTOCOL)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        if negotiated != OCPP_SUBPROTOCOL {
            warn!(negotiated, "CSMS did not confirm the ocpp2.0.1 subprotocol");
        }

        let (mut ws_sender, mut ws_receiver) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock().unwrap() = Some(out_tx);
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::Connected {
            configuration_slot: self.configuration_slot,
        });

        let mut assembler = FrameAssembler::new();
        let mut ping_ticker = tokio::time::interval(self.options.ping_interval);
        ping_ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ping_ticker.tick().await; // first tick fires immediately, skip it
        let mut awaiting_pong_since: Option<tokio::time::Instant> = None;
        let pong_deadline = |since: Option<tokio::time::Instant>, timeout: Duration| async move {
            match since {
                Some(at) => tokio::time::sleep_until(at + timeout).await,
                None => std::future::pending::<()>().await,
            }
        };

        let shutdown = self.shutdown.clone();
        let result = loop {
            tokio::select! {
                message = ws_receiver.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        for frame in assembler.push(&text) {
                            let _ = self.events.send(TransportEvent::Frame(frame));
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        awaiting_pong_since = None;
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = ws_sender.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| f.reason.to_string())
                            .unwrap_or_else(|| "closed by peer".to_string());
                        break Ok(reason);
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!(bytes = data.len(), "Ignoring binary websocket message");
                    }
                    Some(Ok(Message::Frame(_))) => {}
                    Some(Err(e)) => break Err(classify_error(&e)),
                    None => break Err(ConnectionFailedReason::Network),
                },
                outbound = out_rx.recv() => match outbound {
                    Some(message) => {
                        if let Err(e) = ws_sender.send(message).await {
                            break Err(classify_error(&e));
                        }
                    }
                    None => break Ok("sender dropped".to_string()),
                },
                _ = ping_ticker.tick() => {
                    if awaiting_pong_since.is_none() {
                        awaiting_pong_since = Some(tokio::time::Instant::now());
                        if let Err(e) = ws_sender.send(Message::Ping(Vec::new())).await {
                            break Err(classify_error(&e));
                        }
                    }
                }
                _ = pong_deadline(awaiting_pong_since, self.options.pong_timeout) => {
                    warn!("No pong within PongTimeout, tearing down connection");
                    break Err(ConnectionFailedReason::PongTimeout);
                }
                _ = shutdown.notified().wait() => {
                    let _ = ws_sender
                        .send(Message::Close(Some(CloseFrame {
                            code: CloseCode::Away,
                            reason: "GoingAway".into(),
                        })))
                        .await;
                    break Ok("GoingAway".to_string());
                }
            }
        };

        self.connected.store(false, Ordering::SeqCst);
        *self.outbound.lock().unwrap() = None;
        result
    }
}
