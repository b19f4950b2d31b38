//! Gemini Live session controller.
//!
//! Owns one WebSocket connection to the Live API and drives it through the
//! [`SessionState`] machine. Captured audio is buffered locally and released
//! as a single framed turn:
//!
//! ```text
//! {"realtimeInput":{"activityStart":{}}}
//! {"realtimeInput":{"audio":{"data":"...","mimeType":"audio/pcm;rate=16000"}}}
//! {"realtimeInput":{"activityEnd":{}}}
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use gemini_live_gateway::core::realtime::{LiveSession, LiveSessionConfig};
//!
//! let session = LiveSession::new(LiveSessionConfig::default(), credentials);
//! session.on_transcript(Arc::new(|event| Box::pin(async move {
//!     println!("{event:?}");
//! })));
//! session.open().await?;
//!
//! for fragment in captured {
//!     session.append_audio(fragment);
//! }
//! session.send_turn().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use super::config::LiveSessionConfig;
use super::messages::{ClientMessage, SetupConfig};
use super::router::{EventRouter, SessionCallbacks, spawn_playback_task};
use crate::core::audio::AudioTurnBuffer;
use crate::core::credentials::CredentialCache;
use crate::core::realtime::base::{
    AudioOutputCallback, RealtimeError, RealtimeErrorCallback, RealtimeResult, SessionEvent,
    SessionState, TranscriptCallback, TurnOutcome, UsageCallback,
};

/// Channel capacity for WebSocket message sending.
const WS_CHANNEL_CAPACITY: usize = 256;

/// How long `close()` waits for the connection and playback tasks to wind down.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// State shared between the session handle and its connection task.
struct SessionShared {
    session_id: String,
    state: RwLock<SessionState>,
    buffer: Mutex<AudioTurnBuffer>,
    credentials: Arc<CredentialCache>,
    credential_released: AtomicBool,
    ws_sender: Mutex<Option<mpsc::Sender<ClientMessage>>>,
    callbacks: Arc<SessionCallbacks>,
}

impl SessionShared {
    fn apply(&self, event: SessionEvent) -> RealtimeResult<SessionState> {
        let mut state = self.state.write();
        let next = state.transition(event)?;
        if next != *state {
            tracing::info!(session_id = %self.session_id, "Session {} -> {}", *state, next);
        }
        *state = next;
        Ok(next)
    }

    /// Enter `Closed` and drop everything tied to the connection.
    ///
    /// Returns the state the session was in before.
    fn shut_down(&self) -> SessionState {
        let previous = {
            let mut state = self.state.write();
            let previous = *state;
            *state = SessionState::Closed;
            previous
        };
        if previous != SessionState::Closed {
            tracing::info!(session_id = %self.session_id, "Session {} -> Closed", previous);
        }

        self.ws_sender.lock().take();
        self.buffer.lock().clear();
        self.release_credential();
        previous
    }

    /// Credentials are single-session; invalidate exactly once per session.
    fn release_credential(&self) {
        if !self.credential_released.swap(true, Ordering::SeqCst) {
            self.credentials.invalidate();
            tracing::debug!(session_id = %self.session_id, "Released session credential");
        }
    }
}

/// How the connection task ended.
enum ConnectionEnd {
    /// The local handle dropped its sender
    Local,
    /// The peer closed the socket
    Remote,
    /// Transport failure
    Failed(RealtimeError),
}

/// One realtime audio conversation with the Gemini Live API.
pub struct LiveSession {
    config: LiveSessionConfig,
    shared: Arc<SessionShared>,
    connection_handle: Mutex<Option<JoinHandle<()>>>,
    playback_handle: Mutex<Option<JoinHandle<()>>>,
}

impl LiveSession {
    pub fn new(config: LiveSessionConfig, credentials: Arc<CredentialCache>) -> Self {
        Self {
            config,
            shared: Arc::new(SessionShared {
                session_id: Uuid::new_v4().to_string(),
                state: RwLock::new(SessionState::Idle),
                buffer: Mutex::new(AudioTurnBuffer::new()),
                credentials,
                credential_released: AtomicBool::new(false),
                ws_sender: Mutex::new(None),
                callbacks: Arc::new(SessionCallbacks::default()),
            }),
            connection_handle: Mutex::new(None),
            playback_handle: Mutex::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.read()
    }

    pub fn session_id(&self) -> &str {
        &self.shared.session_id
    }

    pub fn config(&self) -> &LiveSessionConfig {
        &self.config
    }

    pub fn buffered_fragments(&self) -> usize {
        self.shared.buffer.lock().len()
    }

    // -------------------------------------------------------------------------
    // Callbacks
    // -------------------------------------------------------------------------

    pub fn on_transcript(&self, callback: TranscriptCallback) {
        self.shared.callbacks.set_transcript(callback);
    }

    /// Audio chunks are delivered sequentially from a dedicated playback task.
    pub fn on_audio(&self, callback: AudioOutputCallback) {
        self.shared.callbacks.set_audio(callback);
    }

    /// Receives transport failures and unexpected remote closes.
    pub fn on_error(&self, callback: RealtimeErrorCallback) {
        self.shared.callbacks.set_error(callback);
    }

    pub fn on_usage(&self, callback: UsageCallback) {
        self.shared.callbacks.set_usage(callback);
    }

    // -------------------------------------------------------------------------
    // Audio capture
    // -------------------------------------------------------------------------

    /// Queue a captured base64 PCM fragment for the next turn.
    pub fn append_audio(&self, fragment: impl Into<String>) {
        self.shared.buffer.lock().append(fragment);
    }

    /// Drop captured audio without sending it.
    pub fn clear_audio(&self) {
        self.shared.buffer.lock().clear();
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Obtain a credential, connect, and send the setup frame.
    ///
    /// On return the session is `Active`. Issuance failures leave it `Idle`;
    /// connection failures leave it `Closed`.
    pub async fn open(&self) -> RealtimeResult<()> {
        self.config.validate()?;
        self.shared.apply(SessionEvent::Open)?;

        let credentials = &self.shared.credentials;
        let credential = match credentials.get(!credentials.is_valid()).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::error!(session_id = %self.session_id(), "Credential issuance failed: {}", e);
                self.shared.buffer.lock().clear();
                self.shared.apply(SessionEvent::IssuanceFailed)?;
                return Err(e.into());
            }
        };

        let url = match self.config.build_ws_url(&credential.token) {
            Ok(url) => url,
            Err(e) => return Err(self.fail(e)),
        };

        tracing::info!(
            session_id = %self.session_id(),
            "Connecting to {} with credential {}",
            self.config.ws_url,
            credential.redacted()
        );

        let ws_stream = match tokio::time::timeout(
            self.config.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        {
            Ok(Ok((ws_stream, _response))) => ws_stream,
            Ok(Err(e)) => return Err(self.fail(RealtimeError::ConnectionFailed(e.to_string()))),
            Err(_) => {
                return Err(self.fail(RealtimeError::Timeout(format!(
                    "connect did not complete within {:?}",
                    self.config.connect_timeout
                ))));
            }
        };

        if let Err(e) = self.shared.apply(SessionEvent::Connected) {
            return Err(self.fail(e));
        }

        let (mut ws_sink, ws_stream) = ws_stream.split();

        // Setup must be the first frame on the socket
        let setup = ClientMessage::Setup(SetupConfig::from_config(&self.config));
        let setup_json = match serde_json::to_string(&setup) {
            Ok(json) => json,
            Err(e) => return Err(self.fail(RealtimeError::SerializationError(e.to_string()))),
        };
        if let Err(e) = ws_sink.send(Message::Text(setup_json.into())).await {
            return Err(self.fail(RealtimeError::WebSocketError(e.to_string())));
        }
        tracing::info!(
            session_id = %self.session_id(),
            "Sent setup (model={}, voice={})",
            self.config.model,
            self.config.voice
        );

        let (tx, rx) = mpsc::channel::<ClientMessage>(WS_CHANNEL_CAPACITY);
        *self.shared.ws_sender.lock() = Some(tx);

        let (playback_tx, playback_rx) = mpsc::unbounded_channel();
        *self.playback_handle.lock() = Some(spawn_playback_task(
            playback_rx,
            self.shared.callbacks.clone(),
        ));

        let mut router = EventRouter::new(
            self.shared.session_id.clone(),
            self.shared.callbacks.clone(),
            playback_tx,
        );
        let setup_ack = if self.config.await_setup_complete {
            let (ack_tx, ack_rx) = oneshot::channel();
            router = router.with_setup_waiter(ack_tx);
            Some(ack_rx)
        } else {
            None
        };

        let shared = self.shared.clone();
        *self.connection_handle.lock() = Some(tokio::spawn(async move {
            let end = run_connection(ws_sink, ws_stream, rx, router).await;
            finish_connection(&shared, end).await;
        }));

        if let Some(ack_rx) = setup_ack {
            match tokio::time::timeout(self.config.connect_timeout, ack_rx).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => return Err(self.fail(RealtimeError::ConnectionClosed)),
                Err(_) => {
                    return Err(self.fail(RealtimeError::Timeout(
                        "no setupComplete received".to_string(),
                    )));
                }
            }
        }

        match self.shared.apply(SessionEvent::SetupAcknowledged) {
            Ok(_) => Ok(()),
            Err(RealtimeError::InvalidTransition {
                from: SessionState::Closed,
                ..
            }) => Err(RealtimeError::ConnectionClosed),
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Release the buffered audio as one framed turn.
    ///
    /// Rejected without touching the buffer unless the session is `Active`.
    /// An empty buffer sends nothing.
    pub async fn send_turn(&self) -> RealtimeResult<TurnOutcome> {
        let state = self.state();
        if !state.is_active() {
            return Err(RealtimeError::NotActive { state });
        }

        let sender = self
            .shared
            .ws_sender
            .lock()
            .clone()
            .ok_or(RealtimeError::ConnectionClosed)?;

        let permits = sender
            .reserve_many(3)
            .await
            .map_err(|_| RealtimeError::ConnectionClosed)?;

        // Frames enter the queue on `permit.send`; the buffer lock keeps a
        // concurrent turn from interleaving with this one.
        let (fragments, bytes) = {
            let mut buffer = self.shared.buffer.lock();
            let Some(payload) = buffer.release()? else {
                tracing::debug!(session_id = %self.session_id(), "No audio buffered, nothing to send");
                return Ok(TurnOutcome::NothingToSend);
            };

            let frames = [
                ClientMessage::activity_start(),
                ClientMessage::audio(payload.data),
                ClientMessage::activity_end(),
            ];
            for (permit, frame) in permits.zip(frames) {
                permit.send(frame);
            }
            (payload.fragments, payload.byte_len)
        };

        tracing::info!(
            session_id = %self.session_id(),
            "Sent turn ({} fragments, {} bytes)",
            fragments,
            bytes
        );
        Ok(TurnOutcome::Sent { fragments, bytes })
    }

    /// Close the connection and release the credential. Idempotent.
    pub async fn close(&self) -> RealtimeResult<()> {
        let previous = self.shared.shut_down();
        if previous == SessionState::Closed {
            return Ok(());
        }

        let connection = self.connection_handle.lock().take();
        if let Some(handle) = connection {
            wait_or_abort(handle, "connection").await;
        }
        let playback = self.playback_handle.lock().take();
        if let Some(handle) = playback {
            wait_or_abort(handle, "playback").await;
        }

        tracing::info!(session_id = %self.session_id(), "Session closed");
        Ok(())
    }

    /// Close after a failed connect and hand the error back.
    fn fail(&self, error: RealtimeError) -> RealtimeError {
        tracing::error!(session_id = %self.session_id(), "Session failed: {}", error);
        self.shared.shut_down();
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
        error
    }

    #[cfg(test)]
    fn activate_with_channel(&self) -> mpsc::Receiver<ClientMessage> {
        let (tx, rx) = mpsc::channel(WS_CHANNEL_CAPACITY);
        *self.shared.ws_sender.lock() = Some(tx);
        *self.shared.state.write() = SessionState::Active;
        rx
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        if let Some(handle) = self.connection_handle.lock().take() {
            handle.abort();
        }
        if !self.state().is_closed() {
            self.shared.shut_down();
        }
    }
}

async fn wait_or_abort(handle: JoinHandle<()>, name: &str) {
    let abort = handle.abort_handle();
    if tokio::time::timeout(SHUTDOWN_GRACE, handle).await.is_err() {
        tracing::warn!("{} task did not stop in time, aborting", name);
        abort.abort();
    }
}

/// Pump frames in both directions until either side stops.
async fn run_connection(
    mut ws_sink: SplitSink<WsStream, Message>,
    mut ws_stream: SplitStream<WsStream>,
    mut outgoing: mpsc::Receiver<ClientMessage>,
    mut router: EventRouter,
) -> ConnectionEnd {
    loop {
        tokio::select! {
            message = outgoing.recv() => {
                let Some(message) = message else {
                    let _ = ws_sink.send(Message::Close(None)).await;
                    return ConnectionEnd::Local;
                };

                let json = match serde_json::to_string(&message) {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::error!("Failed to serialize {}: {}", message.kind(), e);
                        continue;
                    }
                };
                tracing::debug!("Sending {} frame", message.kind());

                if let Err(e) = ws_sink.send(Message::Text(json.into())).await {
                    tracing::error!("Failed to send WebSocket message: {}", e);
                    return ConnectionEnd::Failed(RealtimeError::WebSocketError(e.to_string()));
                }
            }

            incoming = ws_stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => router.handle_frame(text.as_bytes()).await,
                Some(Ok(Message::Binary(data))) => router.handle_frame(&data).await,
                Some(Ok(Message::Ping(data))) => {
                    if let Err(e) = ws_sink.send(Message::Pong(data)).await {
                        tracing::error!("Failed to send pong: {}", e);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(frame) => tracing::info!(
                            "WebSocket closed by server ({}: {})",
                            frame.code,
                            frame.reason.as_str()
                        ),
                        None => tracing::info!("WebSocket closed by server"),
                    }
                    return ConnectionEnd::Remote;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::error!("WebSocket error: {}", e);
                    return ConnectionEnd::Failed(RealtimeError::WebSocketError(e.to_string()));
                }
                None => return ConnectionEnd::Remote,
            },
        }
    }
}

async fn finish_connection(shared: &SessionShared, end: ConnectionEnd) {
    let previous = shared.shut_down();

    // A local close already went through `close()`; only surprises are reported
    if previous != SessionState::Closed {
        match end {
            ConnectionEnd::Local => {}
            ConnectionEnd::Remote => shared.callbacks.emit_error(RealtimeError::ConnectionClosed).await,
            ConnectionEnd::Failed(e) => shared.callbacks.emit_error(e).await,
        }
    }

    tracing::info!(session_id = %shared.session_id, "Gemini Live connection task ended");
}
