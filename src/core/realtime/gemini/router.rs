//! Inbound frame dispatch.
//!
//! Frames are handled one at a time in socket order. Transcript and usage
//! callbacks are awaited inline; audio is handed to a playback queue so a
//! slow speaker never stalls frame processing.

use std::sync::Arc;

use base64::prelude::*;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::config::OUTPUT_SAMPLE_RATE;
use super::messages::{ServerContent, ServerMessage};
use crate::core::realtime::base::{
    AudioOutputCallback, RealtimeAudioData, RealtimeError, RealtimeErrorCallback,
    TranscriptCallback, TranscriptEvent, TranscriptRole, UsageCallback, UsageMetadata,
};

/// Maximum characters of a raw frame echoed at trace level.
const FRAME_LOG_LIMIT: usize = 100;

/// Collaborator callbacks registered on a session.
#[derive(Default)]
pub struct SessionCallbacks {
    transcript: RwLock<Option<TranscriptCallback>>,
    audio: RwLock<Option<AudioOutputCallback>>,
    error: RwLock<Option<RealtimeErrorCallback>>,
    usage: RwLock<Option<UsageCallback>>,
}

impl SessionCallbacks {
    pub fn set_transcript(&self, callback: TranscriptCallback) {
        *self.transcript.write() = Some(callback);
    }

    pub fn set_audio(&self, callback: AudioOutputCallback) {
        *self.audio.write() = Some(callback);
    }

    pub fn set_error(&self, callback: RealtimeErrorCallback) {
        *self.error.write() = Some(callback);
    }

    pub fn set_usage(&self, callback: UsageCallback) {
        *self.usage.write() = Some(callback);
    }

    pub async fn emit_transcript(&self, event: TranscriptEvent) {
        let callback = self.transcript.read().clone();
        if let Some(cb) = callback {
            cb(event).await;
        }
    }

    pub async fn emit_audio(&self, audio: RealtimeAudioData) {
        let callback = self.audio.read().clone();
        if let Some(cb) = callback {
            cb(audio).await;
        }
    }

    pub async fn emit_error(&self, error: RealtimeError) {
        let callback = self.error.read().clone();
        match callback {
            Some(cb) => cb(error).await,
            None => tracing::debug!("No error callback registered: {}", error),
        }
    }

    pub async fn emit_usage(&self, usage: UsageMetadata) {
        let callback = self.usage.read().clone();
        if let Some(cb) = callback {
            cb(usage).await;
        }
    }
}

/// Drain the playback queue, invoking the audio callback for each chunk in order.
pub fn spawn_playback_task(
    mut queue: mpsc::UnboundedReceiver<RealtimeAudioData>,
    callbacks: Arc<SessionCallbacks>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut chunks = 0usize;
        while let Some(chunk) = queue.recv().await {
            callbacks.emit_audio(chunk).await;
            chunks += 1;
        }
        tracing::debug!("Playback queue drained after {} chunks", chunks);
    })
}

/// Interprets inbound frames for one session.
pub struct EventRouter {
    session_id: String,
    callbacks: Arc<SessionCallbacks>,
    playback: mpsc::UnboundedSender<RealtimeAudioData>,
    setup_waiter: Option<oneshot::Sender<()>>,
}

impl EventRouter {
    pub fn new(
        session_id: impl Into<String>,
        callbacks: Arc<SessionCallbacks>,
        playback: mpsc::UnboundedSender<RealtimeAudioData>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            callbacks,
            playback,
            setup_waiter: None,
        }
    }

    /// Signal `waiter` on the first `setupComplete` frame.
    pub fn with_setup_waiter(mut self, waiter: oneshot::Sender<()>) -> Self {
        self.setup_waiter = Some(waiter);
        self
    }

    /// Parse and dispatch one raw frame. Unparseable frames are dropped.
    pub async fn handle_frame(&mut self, raw: &[u8]) {
        if tracing::enabled!(tracing::Level::TRACE) {
            let text = String::from_utf8_lossy(raw);
            let preview: String = text.chars().take(FRAME_LOG_LIMIT).collect();
            tracing::trace!(session_id = %self.session_id, "Inbound frame: {}", preview);
        }

        match ServerMessage::from_slice(raw) {
            Ok(message) => self.dispatch(message).await,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, "Ignoring unparseable frame: {}", e);
            }
        }
    }

    pub async fn dispatch(&mut self, message: ServerMessage) {
        if message.setup_complete.is_some() {
            tracing::info!(session_id = %self.session_id, "Setup complete");
            if let Some(waiter) = self.setup_waiter.take() {
                let _ = waiter.send(());
            }
        }

        if let Some(content) = message.server_content {
            self.dispatch_content(content).await;
        }

        if let Some(usage) = message.usage_metadata {
            tracing::debug!(
                session_id = %self.session_id,
                "Usage: prompt={:?} response={:?} total={:?}",
                usage.prompt_token_count,
                usage.response_token_count,
                usage.total_token_count
            );
            self.callbacks.emit_usage(usage).await;
        }

        if let Some(go_away) = message.go_away {
            tracing::warn!(
                session_id = %self.session_id,
                "Server will close the connection (time left: {})",
                go_away.time_left.as_deref().unwrap_or("unknown")
            );
        }
    }

    async fn dispatch_content(&mut self, content: ServerContent) {
        if content.turn_complete == Some(true) {
            tracing::debug!(session_id = %self.session_id, "Turn complete");
            self.callbacks
                .emit_transcript(TranscriptEvent::NewParagraph {
                    role: TranscriptRole::Model,
                })
                .await;
            self.callbacks
                .emit_transcript(TranscriptEvent::NewParagraph {
                    role: TranscriptRole::User,
                })
                .await;
        }

        if content.generation_complete == Some(true) {
            tracing::debug!(session_id = %self.session_id, "Generation complete");
        }

        if content.interrupted == Some(true) {
            tracing::debug!(session_id = %self.session_id, "Generation interrupted");
        }

        if let Some(turn) = content.model_turn {
            for part in turn.parts {
                if part.thought == Some(true)
                    && let Some(text) = part.text.as_deref()
                {
                    tracing::debug!(session_id = %self.session_id, "Model thought: {}", text);
                }

                if let Some(inline) = part.inline_data
                    && let (Some(mime_type), Some(data)) = (inline.mime_type, inline.data)
                {
                    self.enqueue_audio(mime_type, &data);
                }
            }
        }

        if let Some(text) = content.input_transcription.and_then(|t| t.text)
            && !text.is_empty()
        {
            self.callbacks
                .emit_transcript(TranscriptEvent::Append {
                    role: TranscriptRole::User,
                    text,
                })
                .await;
        }

        if let Some(text) = content.output_transcription.and_then(|t| t.text)
            && !text.is_empty()
        {
            self.callbacks
                .emit_transcript(TranscriptEvent::Append {
                    role: TranscriptRole::Model,
                    text,
                })
                .await;
        }
    }

    fn enqueue_audio(&self, mime_type: String, data: &str) {
        let bytes = match BASE64_STANDARD.decode(data) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, "Failed to decode audio chunk: {}", e);
                return;
            }
        };

        tracing::debug!(
            session_id = %self.session_id,
            "Received audio chunk ({}, {} bytes)",
            mime_type,
            bytes.len()
        );

        let chunk = RealtimeAudioData {
            data: Bytes::from(bytes),
            sample_rate: sample_rate_from_mime(&mime_type).unwrap_or(OUTPUT_SAMPLE_RATE),
            mime_type,
        };
        if self.playback.send(chunk).is_err() {
            tracing::warn!(session_id = %self.session_id, "Playback queue closed, dropping audio");
        }
    }
}

/// Extract `rate=N` from a MIME type such as `audio/pcm;rate=24000`.
fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    fn recording_router() -> (
        EventRouter,
        Arc<Mutex<Vec<TranscriptEvent>>>,
        mpsc::UnboundedReceiver<RealtimeAudioData>,
    ) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let callbacks = Arc::new(SessionCallbacks::default());
        let sink = events.clone();
        callbacks.set_transcript(Arc::new(move |event| {
            let sink = sink.clone();
            Box::pin(async move {
                sink.lock().push(event);
            })
        }));
        let (tx, rx) = mpsc::unbounded_channel();
        (EventRouter::new("test", callbacks, tx), events, rx)
    }

    #[tokio::test]
    async fn test_turn_complete_starts_both_paragraphs() {
        let (mut router, events, mut playback) = recording_router();

        router
            .handle_frame(br#"{"serverContent":{"turnComplete":true}}"#)
            .await;

        assert_eq!(
            *events.lock(),
            vec![
                TranscriptEvent::NewParagraph {
                    role: TranscriptRole::Model
                },
                TranscriptEvent::NewParagraph {
                    role: TranscriptRole::User
                },
            ]
        );
        assert!(playback.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_audio_parts_enqueued_in_order() {
        let (mut router, events, mut playback) = recording_router();
        let first = BASE64_STANDARD.encode([1u8, 2]);
        let second = BASE64_STANDARD.encode([3u8, 4]);
        let frame = format!(
            r#"{{"serverContent":{{"modelTurn":{{"parts":[
                {{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{first}"}}}},
                {{"text":"planning","thought":true}},
                {{"inlineData":{{"mimeType":"audio/pcm;rate=24000","data":"{second}"}}}}
            ]}}}}}}"#
        );

        router.handle_frame(frame.as_bytes()).await;

        let a = playback.try_recv().unwrap();
        let b = playback.try_recv().unwrap();
        assert_eq!(&a.data[..], &[1, 2]);
        assert_eq!(&b.data[..], &[3, 4]);
        assert_eq!(a.sample_rate, 24000);
        assert!(playback.try_recv().is_err());
        // Thoughts never reach the transcript
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_transcriptions_appended() {
        let (mut router, events, _playback) = recording_router();

        router
            .handle_frame(
                br#"{"serverContent":{"inputTranscription":{"text":"hi"},"outputTranscription":{"text":"hello"}}}"#,
            )
            .await;
        router
            .handle_frame(br#"{"serverContent":{"inputTranscription":{"text":""}}}"#)
            .await;

        assert_eq!(
            *events.lock(),
            vec![
                TranscriptEvent::Append {
                    role: TranscriptRole::User,
                    text: "hi".to_string()
                },
                TranscriptEvent::Append {
                    role: TranscriptRole::Model,
                    text: "hello".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_malformed_frames_ignored() {
        let (mut router, events, mut playback) = recording_router();

        router.handle_frame(b"not json").await;
        router
            .handle_frame(br#"{"serverContent":{"turnComplete":"yes"}}"#)
            .await;
        router
            .handle_frame(br#"{"serverContent":{"modelTurn":{"parts":[{"inlineData":{"data":"AAA="}}]}}}"#)
            .await;
        router.handle_frame(br#"{"somethingNew":{}}"#).await;

        assert!(events.lock().is_empty());
        assert!(playback.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_bad_field_does_not_drop_rest_of_frame() {
        let (mut router, events, mut playback) = recording_router();

        router
            .handle_frame(
                br#"{"serverContent":{"generationComplete":"yes","outputTranscription":{"text":"hi"}}}"#,
            )
            .await;
        router
            .handle_frame(
                br#"{"serverContent":{"turnComplete":1,"modelTurn":{"parts":[
                    {"inlineData":{"mimeType":7,"data":"AAA="}},
                    {"inlineData":{"mimeType":"audio/pcm;rate=24000","data":"AQI="}}
                ]},"inputTranscription":{"text":"hello"}}}"#,
            )
            .await;

        assert_eq!(
            *events.lock(),
            vec![
                TranscriptEvent::Append {
                    role: TranscriptRole::Model,
                    text: "hi".to_string()
                },
                TranscriptEvent::Append {
                    role: TranscriptRole::User,
                    text: "hello".to_string()
                },
            ]
        );
        let chunk = playback.try_recv().unwrap();
        assert_eq!(&chunk.data[..], &[1, 2]);
        assert!(playback.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_setup_waiter_released() {
        let (router, _events, _playback) = recording_router();
        let (tx, rx) = oneshot::channel();
        let mut router = router.with_setup_waiter(tx);

        router.handle_frame(br#"{"setupComplete":{}}"#).await;
        assert!(rx.await.is_ok());
    }

    #[tokio::test]
    async fn test_usage_callback() {
        let (mut router, _events, _playback) = recording_router();
        let seen = Arc::new(Mutex::new(None));
        let sink = seen.clone();
        router.callbacks.set_usage(Arc::new(move |usage| {
            let sink = sink.clone();
            Box::pin(async move {
                *sink.lock() = Some(usage);
            })
        }));

        router
            .handle_frame(br#"{"usageMetadata":{"promptTokenCount":3,"totalTokenCount":9}}"#)
            .await;

        let usage = seen.lock().clone().unwrap();
        assert_eq!(usage.total_token_count, Some(9));
    }

    #[tokio::test]
    async fn test_playback_task_preserves_order() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let callbacks = Arc::new(SessionCallbacks::default());
        let sink = received.clone();
        callbacks.set_audio(Arc::new(move |audio| {
            let sink = sink.clone();
            Box::pin(async move {
                tokio::task::yield_now().await;
                sink.lock().push(audio.data[0]);
            })
        }));

        let (tx, rx) = mpsc::unbounded_channel();
        let handle = spawn_playback_task(rx, callbacks);
        for i in 0..5u8 {
            tx.send(RealtimeAudioData {
                data: Bytes::from(vec![i]),
                mime_type: "audio/pcm;rate=24000".to_string(),
                sample_rate: 24000,
            })
            .unwrap();
        }
        drop(tx);
        handle.await.unwrap();

        assert_eq!(*received.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_sample_rate_from_mime() {
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(sample_rate_from_mime("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(sample_rate_from_mime("audio/pcm"), None);
    }
}
