//! Live Session Tests
//!
//! Drives `LiveSession` against a local WebSocket peer that plays the part of
//! the Live API: it records every client frame and replies with scripted
//! server frames.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use gemini_live_gateway::core::credentials::{
    Credential, CredentialCache, IssuanceError, TokenIssuer, TokenRequest,
};
use gemini_live_gateway::core::realtime::{
    LiveSession, LiveSessionConfig, RealtimeAudioData, RealtimeError, SessionState,
    TranscriptEvent, TranscriptRole, TurnOutcome,
};

/// Issues `auth_tokens/<n>` and counts calls.
struct CountingIssuer {
    issued: AtomicUsize,
}

#[async_trait]
impl TokenIssuer for CountingIssuer {
    async fn issue(&self, request: &TokenRequest) -> Result<Credential, IssuanceError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(Credential {
            token: format!("auth_tokens/{n}"),
            expires_at: OffsetDateTime::now_utc() + request.lifetime,
            new_session_expires_at: None,
            uses: request.uses,
        })
    }
}

/// What the mock peer saw.
struct PeerLog {
    uri: oneshot::Receiver<String>,
    frames: mpsc::UnboundedReceiver<Value>,
}

/// Accept one connection; after `reply_after` client frames, send `replies`
/// and, if `close_after_reply`, close the socket.
async fn spawn_peer(
    reply_after: usize,
    replies: Vec<Value>,
    close_after_reply: bool,
) -> (String, PeerLog) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (uri_tx, uri_rx) = oneshot::channel();
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let callback = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
            let _ = uri_tx.send(req.uri().to_string());
            Ok(resp)
        };
        let ws = accept_hdr_async(stream, callback).await.unwrap();
        let (mut write, mut read) = ws.split();

        let mut seen = 0;
        while let Some(Ok(msg)) = read.next().await {
            let frame: Value = match msg {
                Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
                Message::Close(_) => break,
                _ => continue,
            };
            let _ = frame_tx.send(frame);
            seen += 1;

            if seen == reply_after {
                for reply in &replies {
                    write
                        .send(Message::Text(reply.to_string().into()))
                        .await
                        .unwrap();
                }
                if close_after_reply {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    });

    (
        format!("ws://{addr}/ws"),
        PeerLog {
            uri: uri_rx,
            frames: frame_rx,
        },
    )
}

fn session_for(ws_url: String) -> (LiveSession, Arc<CountingIssuer>, Arc<CredentialCache>) {
    let issuer = Arc::new(CountingIssuer {
        issued: AtomicUsize::new(0),
    });
    let cache = Arc::new(CredentialCache::new(issuer.clone(), TokenRequest::default()));
    let config = LiveSessionConfig {
        ws_url,
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    };
    (LiveSession::new(config, cache.clone()), issuer, cache)
}

async fn next_frame(frames: &mut mpsc::UnboundedReceiver<Value>) -> Value {
    tokio::time::timeout(Duration::from_secs(2), frames.recv())
        .await
        .expect("timed out waiting for a client frame")
        .expect("peer closed")
}

#[tokio::test]
async fn test_open_sends_setup_with_credential() {
    let (url, mut peer) = spawn_peer(usize::MAX, Vec::new(), false).await;
    let (session, issuer, _cache) = session_for(url);

    session.open().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);

    let uri = peer.uri.await.unwrap();
    assert!(uri.starts_with("/ws?"));
    assert!(uri.contains("access_token=auth_tokens%2F0"));

    let setup = next_frame(&mut peer.frames).await;
    let setup = &setup["setup"];
    assert_eq!(
        setup["model"],
        "models/gemini-2.5-flash-native-audio-preview-09-2025"
    );
    assert_eq!(setup["generationConfig"]["responseModalities"], json!(["AUDIO"]));
    assert_eq!(
        setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]
            ["voiceName"],
        "Fenrir"
    );
    assert_eq!(
        setup["realtimeInputConfig"]["automaticActivityDetection"]["disabled"],
        true
    );
    assert_eq!(setup["inputAudioTranscription"], json!({}));
    assert_eq!(setup["outputAudioTranscription"], json!({}));

    session.close().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_turn_is_framed_and_reply_routed() {
    // setup + start + audio + end, then the scripted reply
    let replies = vec![
        json!({"serverContent": {"inputTranscription": {"text": "hello"}}}),
        json!({"serverContent": {"outputTranscription": {"text": "Hi there"}}}),
        json!({"serverContent": {"modelTurn": {"parts": [
            {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQIDBA=="}}
        ]}}}),
        json!({"serverContent": {"turnComplete": true}}),
    ];
    let (url, mut peer) = spawn_peer(4, replies, false).await;
    let (session, _issuer, _cache) = session_for(url);

    let events = Arc::new(Mutex::new(Vec::new()));
    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    {
        let events = events.clone();
        session.on_transcript(Arc::new(move |event: TranscriptEvent| {
            let events = events.clone();
            let done_tx = done_tx.clone();
            Box::pin(async move {
                let finished = event
                    == TranscriptEvent::NewParagraph {
                        role: TranscriptRole::User,
                    };
                events.lock().push(event);
                if finished {
                    let _ = done_tx.send(());
                }
            })
        }));
    }
    let audio = Arc::new(Mutex::new(Vec::new()));
    {
        let audio = audio.clone();
        session.on_audio(Arc::new(move |chunk: RealtimeAudioData| {
            let audio = audio.clone();
            Box::pin(async move {
                audio.lock().push(chunk);
            })
        }));
    }

    session.open().await.unwrap();
    session.append_audio("AAA=");
    session.append_audio("BBB=");

    let outcome = session.send_turn().await.unwrap();
    assert_eq!(
        outcome,
        TurnOutcome::Sent {
            fragments: 2,
            bytes: 4
        }
    );
    assert_eq!(session.buffered_fragments(), 0);

    let _setup = next_frame(&mut peer.frames).await;
    assert_eq!(
        next_frame(&mut peer.frames).await,
        json!({"realtimeInput": {"activityStart": {}}})
    );
    assert_eq!(
        next_frame(&mut peer.frames).await,
        json!({"realtimeInput": {"audio": {
            "data": "AAAEEA==",
            "mimeType": "audio/pcm;rate=16000"
        }}})
    );
    assert_eq!(
        next_frame(&mut peer.frames).await,
        json!({"realtimeInput": {"activityEnd": {}}})
    );

    tokio::time::timeout(Duration::from_secs(2), done_rx.recv())
        .await
        .unwrap();

    // Close drains the playback queue before returning
    session.close().await.unwrap();

    assert_eq!(
        *events.lock(),
        vec![
            TranscriptEvent::Append {
                role: TranscriptRole::User,
                text: "hello".to_string()
            },
            TranscriptEvent::Append {
                role: TranscriptRole::Model,
                text: "Hi there".to_string()
            },
            TranscriptEvent::NewParagraph {
                role: TranscriptRole::Model
            },
            TranscriptEvent::NewParagraph {
                role: TranscriptRole::User
            },
        ]
    );

    let audio = audio.lock();
    assert_eq!(audio.len(), 1);
    assert_eq!(&audio[0].data[..], &[1, 2, 3, 4]);
    assert_eq!(audio[0].sample_rate, 24000);
}

#[tokio::test]
async fn test_empty_turn_sends_nothing() {
    let (url, mut peer) = spawn_peer(usize::MAX, Vec::new(), false).await;
    let (session, _issuer, _cache) = session_for(url);

    session.open().await.unwrap();
    let _setup = next_frame(&mut peer.frames).await;

    assert_eq!(
        session.send_turn().await.unwrap(),
        TurnOutcome::NothingToSend
    );
    assert!(
        tokio::time::timeout(Duration::from_millis(200), peer.frames.recv())
            .await
            .is_err()
    );

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_remote_close_invalidates_credential_once() {
    let (url, _peer) = spawn_peer(1, Vec::new(), true).await;
    let (session, issuer, cache) = session_for(url);

    let (err_tx, mut err_rx) = mpsc::unbounded_channel();
    session.on_error(Arc::new(move |error: RealtimeError| {
        let err_tx = err_tx.clone();
        Box::pin(async move {
            let _ = err_tx.send(error);
        })
    }));

    session.open().await.unwrap();

    let error = tokio::time::timeout(Duration::from_secs(2), err_rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(error, RealtimeError::ConnectionClosed));
    assert_eq!(session.state(), SessionState::Closed);
    assert!(!cache.is_valid());

    // Sending on a closed session is a protocol violation
    session.append_audio("AAA=");
    assert!(matches!(
        session.send_turn().await,
        Err(RealtimeError::NotActive {
            state: SessionState::Closed
        })
    ));

    // Local close afterwards is a no-op and reports nothing
    session.close().await.unwrap();
    assert!(err_rx.try_recv().is_err());

    // The next session has to mint a new credential
    cache.get(!cache.is_valid()).await.unwrap();
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_await_setup_complete() {
    let replies = vec![json!({"setupComplete": {}})];
    let (url, _peer) = spawn_peer(1, replies, false).await;
    let (_, _, cache) = session_for(url.clone());

    let config = LiveSessionConfig {
        ws_url: url,
        connect_timeout: Duration::from_secs(2),
        await_setup_complete: true,
        ..Default::default()
    };
    let session = LiveSession::new(config, cache);

    session.open().await.unwrap();
    assert_eq!(session.state(), SessionState::Active);
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_connection_refused_closes_session() {
    // Bind then release a port so nothing is listening on it
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let (session, issuer, cache) = session_for(format!("ws://127.0.0.1:{port}/ws"));
    session.append_audio("AAA=");

    let err = session.open().await.unwrap_err();
    assert!(matches!(err, RealtimeError::ConnectionFailed(_)));
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.buffered_fragments(), 0);
    assert_eq!(issuer.issued.load(Ordering::SeqCst), 1);
    assert!(!cache.is_valid());
}
