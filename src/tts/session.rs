//! Synthesis session for one chunk.
//!
//! A session drives its chunk through connect → request → audio frames →
//! turn end, retrying failed attempts after a fixed delay until the retry
//! budget is spent. However many attempts it takes, the owner hears about
//! the result exactly once: the terminal callback is an `FnOnce` consumed by
//! the session task.

use crate::pipeline::types::{Chunk, RetrySettings};
use crate::tts::protocol;
use crate::tts::transport::{ConnectRequest, Frame, Transport, TransportFactory};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Observable state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    AwaitingAudio,
    Processing,
    /// Backoff timer between a failed attempt and the next one.
    RetryWaiting,
    Completed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Completed | SessionState::Failed)
    }
}

/// Why an attempt failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("could not open transport: {0}")]
    TransportCreateFailed(String),

    #[error("transport closed before the turn ended: {0}")]
    TransportClosedEarly(String),

    #[error("turn ended without any audio frames")]
    NoAudioReceived,

    #[error("audio frames carried no payload")]
    EmptyAudioAfterProcessing,

    #[error("failed to process audio frames: {0}")]
    ProcessingException(String),

    #[error("no transport available in this environment")]
    UnsupportedEnvironment,
}

impl SessionError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SessionError::UnsupportedEnvironment)
    }
}

/// Result of a whole session, delivered once to the terminal callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    pub index: usize,
    /// Audio of the chunk; `None` when the session failed.
    pub audio: Option<Vec<u8>>,
    /// Attempts made, including the first one.
    pub attempts: u32,
    /// Error of the last attempt when the session failed.
    pub error: Option<SessionError>,
}

impl SessionOutcome {
    pub fn failed(&self) -> bool {
        self.audio.is_none()
    }
}

/// Concatenates the payloads of the binary frames of one turn.
///
/// Each frame contributes the bytes after [`protocol::AUDIO_MARKER`]. A frame
/// without the marker is a continuation and is appended whole, except for the
/// first frame, which must carry it.
pub fn assemble_frames(frames: &[Vec<u8>]) -> Result<Vec<u8>, SessionError> {
    if frames.is_empty() {
        return Err(SessionError::NoAudioReceived);
    }

    let total: usize = frames.iter().map(Vec::len).sum();
    let mut audio = Vec::with_capacity(total);
    for (position, frame) in frames.iter().enumerate() {
        match protocol::extract_audio(frame) {
            Some(payload) => audio.extend_from_slice(payload),
            None if position == 0 => {
                return Err(SessionError::ProcessingException(
                    "first audio frame has no audio marker".to_string(),
                ));
            }
            None => audio.extend_from_slice(frame),
        }
    }

    if audio.is_empty() {
        return Err(SessionError::EmptyAudioAfterProcessing);
    }
    Ok(audio)
}

/// Synthesis of one chunk, with retries.
pub struct Session {
    chunk: Chunk,
    retry: RetrySettings,
    factory: Arc<dyn TransportFactory>,
    state: watch::Sender<SessionState>,
    retry_count: u32,
    /// Raw binary frames of the current attempt.
    frames: Vec<Vec<u8>>,
}

impl Session {
    pub fn new(chunk: Chunk, retry: RetrySettings, factory: Arc<dyn TransportFactory>) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            chunk,
            retry,
            factory,
            state,
            retry_count: 0,
            frames: Vec::new(),
        }
    }

    pub fn index(&self) -> usize {
        self.chunk.index
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Receiver that follows state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Retries made so far (attempts minus one).
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    fn set_state(&self, state: SessionState) {
        self.state.send_replace(state);
    }

    /// Runs attempts until one succeeds or the retry budget is spent.
    pub async fn run(&mut self) -> Result<Vec<u8>, SessionError> {
        if !self.factory.is_supported() {
            warn!(
                index = self.chunk.index,
                transport = self.factory.name(),
                "no transport capability"
            );
            self.set_state(SessionState::Failed);
            return Err(SessionError::UnsupportedEnvironment);
        }

        loop {
            match self.attempt().await {
                Ok(audio) => {
                    debug!(
                        index = self.chunk.index,
                        attempts = self.retry_count + 1,
                        bytes = audio.len(),
                        "chunk synthesized"
                    );
                    self.set_state(SessionState::Completed);
                    return Ok(audio);
                }
                Err(e) if !e.is_retryable() || self.retry_count >= self.retry.max_retries => {
                    warn!(
                        index = self.chunk.index,
                        attempts = self.retry_count + 1,
                        "chunk failed: {e}"
                    );
                    self.set_state(SessionState::Failed);
                    return Err(e);
                }
                Err(e) => {
                    self.retry_count += 1;
                    debug!(
                        index = self.chunk.index,
                        retry = self.retry_count,
                        max_retries = self.retry.max_retries,
                        "attempt failed, retrying: {e}"
                    );
                    self.set_state(SessionState::RetryWaiting);
                    let delay = self.retry.delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }

    async fn attempt(&mut self) -> Result<Vec<u8>, SessionError> {
        self.set_state(SessionState::Connecting);
        self.frames.clear();

        let request = ConnectRequest {
            index: self.chunk.index,
            attempt: self.retry_count,
            connection_id: protocol::new_request_id(),
        };
        let mut transport = self
            .factory
            .connect(&request)
            .await
            .map_err(|e| SessionError::TransportCreateFailed(e.message))?;

        let result = self.exchange(transport.as_mut()).await;
        transport.close().await;
        self.frames.clear();
        result
    }

    async fn exchange(&mut self, transport: &mut dyn Transport) -> Result<Vec<u8>, SessionError> {
        let request_id = protocol::new_request_id();
        let timestamp = protocol::timestamp();
        let closed = |e: crate::tts::transport::TransportError| {
            SessionError::TransportClosedEarly(e.message)
        };

        transport
            .send_text(protocol::speech_config_message(&timestamp))
            .await
            .map_err(closed)?;
        transport
            .send_text(protocol::ssml_message(&request_id, &timestamp, &self.chunk))
            .await
            .map_err(closed)?;

        self.set_state(SessionState::AwaitingAudio);
        loop {
            match transport.next_frame().await {
                None => {
                    return Err(SessionError::TransportClosedEarly(
                        "connection closed".to_string(),
                    ));
                }
                Some(Err(e)) => return Err(closed(e)),
                Some(Ok(Frame::Binary(data))) => self.frames.push(data),
                Some(Ok(Frame::Text(text))) => {
                    if protocol::is_turn_end(&text) {
                        break;
                    }
                }
            }
        }

        self.set_state(SessionState::Processing);
        assemble_frames(&self.frames)
    }

    fn into_outcome(self, result: Result<Vec<u8>, SessionError>) -> SessionOutcome {
        let attempts = self.retry_count + 1;
        match result {
            Ok(audio) => SessionOutcome {
                index: self.chunk.index,
                audio: Some(audio),
                attempts,
                error: None,
            },
            Err(e) => SessionOutcome {
                index: self.chunk.index,
                audio: None,
                attempts,
                error: Some(e),
            },
        }
    }

    /// Spawns the session on the current tokio runtime.
    ///
    /// `on_terminal` runs once with the outcome, after a random jitter of up
    /// to `retry.terminal_jitter_ms`. It never runs if the returned handle is
    /// cancelled or dropped first.
    pub fn start<F>(
        chunk: Chunk,
        retry: RetrySettings,
        factory: Arc<dyn TransportFactory>,
        on_terminal: F,
    ) -> SessionHandle
    where
        F: FnOnce(SessionOutcome) + Send + 'static,
    {
        let mut session = Session::new(chunk, retry, factory);
        let index = session.index();
        let state = session.subscribe();

        let task = tokio::spawn(async move {
            let result = session.run().await;
            let jitter = jitter_delay(retry.terminal_jitter_ms);
            if !jitter.is_zero() {
                tokio::time::sleep(jitter).await;
            }
            on_terminal(session.into_outcome(result));
        });

        SessionHandle { index, state, task }
    }
}

fn jitter_delay(max_ms: u64) -> Duration {
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

/// Owner's handle on a running session.
///
/// Dropping the handle cancels the session.
pub struct SessionHandle {
    index: usize,
    state: watch::Receiver<SessionState>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    /// Last state the session reported.
    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Whether the session task has exited (finished or cancelled).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the session, closing its transport and discarding buffered audio.
    ///
    /// Idempotent. The terminal callback will not run if it has not already.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::VoiceSettings;
    use crate::tts::transport::{MockEvent, MockScript, MockTransportFactory};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::oneshot;

    fn chunk(index: usize) -> Chunk {
        Chunk::new(index, format!("Sentence number {index}."), &VoiceSettings::default())
    }

    fn retry(max_retries: u32) -> RetrySettings {
        RetrySettings {
            max_retries,
            delay_ms: 1,
            terminal_jitter_ms: 0,
        }
    }

    fn frame(payload: &[u8]) -> Vec<u8> {
        protocol::encode_audio_frame("id", payload)
    }

    #[test]
    fn test_assemble_frames_concatenates_in_order() {
        let frames = vec![frame(b"one-"), frame(b"two-"), frame(b"three")];
        assert_eq!(assemble_frames(&frames).unwrap(), b"one-two-three");
    }

    #[test]
    fn test_assemble_frames_appends_continuation_frames_whole() {
        let frames = vec![frame(b"head-"), b"tail".to_vec()];
        assert_eq!(assemble_frames(&frames).unwrap(), b"head-tail");
    }

    #[test]
    fn test_assemble_frames_requires_marker_in_first_frame() {
        let frames = vec![b"raw bytes".to_vec(), frame(b"audio")];
        assert!(matches!(
            assemble_frames(&frames),
            Err(SessionError::ProcessingException(_))
        ));
    }

    #[test]
    fn test_assemble_frames_empty_cases() {
        assert_eq!(assemble_frames(&[]), Err(SessionError::NoAudioReceived));
        assert_eq!(
            assemble_frames(&[frame(b""), frame(b"")]),
            Err(SessionError::EmptyAudioAfterProcessing)
        );
    }

    #[test]
    fn test_only_unsupported_environment_is_fatal() {
        assert!(!SessionError::UnsupportedEnvironment.is_retryable());
        assert!(SessionError::NoAudioReceived.is_retryable());
        assert!(SessionError::TransportCreateFailed("x".into()).is_retryable());
        assert!(SessionError::EmptyAudioAfterProcessing.is_retryable());
    }

    #[tokio::test]
    async fn test_run_success_first_attempt() {
        let factory = Arc::new(MockTransportFactory::always_succeeding());
        let mut session = Session::new(chunk(2), retry(3), factory.clone());
        assert_eq!(session.state(), SessionState::Idle);

        let audio = session.run().await.unwrap();

        assert_eq!(audio, MockTransportFactory::audio_for(2));
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(session.retry_count(), 0);
        assert_eq!(factory.connect_count(), 1);
        // speech.config + ssml
        assert_eq!(factory.sent_frames(), 2);
        assert_eq!(factory.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_run_concatenates_frames_in_arrival_order() {
        let factory = Arc::new(MockTransportFactory::new(|_| {
            MockScript::success_in_frames(&[b"aa", b"bb", b"cc"])
        }));
        let mut session = Session::new(chunk(0), retry(0), factory);
        assert_eq!(session.run().await.unwrap(), b"aabbcc");
    }

    #[tokio::test]
    async fn test_silent_turn_is_failure_not_success() {
        let factory = Arc::new(MockTransportFactory::new(|_| MockScript::silent_turn()));
        let mut session = Session::new(chunk(0), retry(0), factory.clone());
        assert_eq!(session.run().await, Err(SessionError::NoAudioReceived));
        assert_eq!(session.state(), SessionState::Failed);
        assert_eq!(factory.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_is_failure() {
        let factory = Arc::new(MockTransportFactory::new(|_| MockScript::success(b"")));
        let mut session = Session::new(chunk(0), retry(0), factory);
        assert_eq!(
            session.run().await,
            Err(SessionError::EmptyAudioAfterProcessing)
        );
    }

    #[tokio::test]
    async fn test_early_close_is_retried() {
        let factory = Arc::new(MockTransportFactory::new(|request| {
            if request.attempt == 0 {
                MockScript::closed_early(b"partial")
            } else {
                MockScript::success(b"complete")
            }
        }));
        let mut session = Session::new(chunk(0), retry(2), factory.clone());

        // Partial audio of the failed attempt must not leak into the result
        assert_eq!(session.run().await.unwrap(), b"complete");
        assert_eq!(session.retry_count(), 1);
        assert_eq!(factory.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_stream_error_maps_to_closed_early() {
        let factory = Arc::new(MockTransportFactory::new(|_| {
            MockScript::Events(vec![MockEvent::Error("connection reset".into())])
        }));
        let mut session = Session::new(chunk(0), retry(0), factory);
        assert_eq!(
            session.run().await,
            Err(SessionError::TransportClosedEarly("connection reset".into()))
        );
    }

    #[tokio::test]
    async fn test_retry_bound_is_exact() {
        for max_retries in [0, 1, 3] {
            let factory = Arc::new(MockTransportFactory::new(|_| {
                MockScript::RefuseConnection("refused".into())
            }));
            let mut session = Session::new(chunk(0), retry(max_retries), factory.clone());

            let result = session.run().await;

            assert_eq!(
                result,
                Err(SessionError::TransportCreateFailed("refused".into()))
            );
            assert_eq!(session.retry_count(), max_retries);
            assert_eq!(factory.connect_count(), max_retries as usize + 1);
        }
    }

    #[tokio::test]
    async fn test_unsupported_environment_never_connects() {
        let factory = Arc::new(MockTransportFactory::unsupported());
        let mut session = Session::new(chunk(0), retry(5), factory.clone());
        assert_eq!(session.run().await, Err(SessionError::UnsupportedEnvironment));
        assert_eq!(session.retry_count(), 0);
        assert_eq!(factory.connect_count(), 0);
    }

    #[tokio::test]
    async fn test_start_fires_terminal_once_after_retries() {
        let factory = Arc::new(MockTransportFactory::new(|_| MockScript::silent_turn()));
        let calls = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = oneshot::channel();

        let counter = calls.clone();
        let handle = Session::start(chunk(4), retry(2), factory.clone(), move |outcome| {
            counter.fetch_add(1, Ordering::SeqCst);
            tx.send(outcome).ok();
        });

        let outcome = rx.await.unwrap();
        assert_eq!(outcome.index, 4);
        assert!(outcome.failed());
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.error, Some(SessionError::NoAudioReceived));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(handle.state(), SessionState::Failed);
        assert!(handle.is_finished());
    }

    #[tokio::test]
    async fn test_start_success_with_jitter() {
        let factory = Arc::new(MockTransportFactory::always_succeeding());
        let (tx, rx) = oneshot::channel();
        let settings = RetrySettings {
            terminal_jitter_ms: 30,
            ..retry(0)
        };

        let _handle = Session::start(chunk(1), settings, factory, move |outcome| {
            tx.send(outcome).ok();
        });

        let outcome = rx.await.unwrap();
        assert!(!outcome.failed());
        assert_eq!(outcome.audio, Some(MockTransportFactory::audio_for(1)));
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_terminal_suppresses_callback() {
        let factory = Arc::new(MockTransportFactory::new(|_| {
            MockScript::success(b"audio").delayed(Duration::from_secs(30))
        }));
        let fired = Arc::new(Mutex::new(false));

        let flag = fired.clone();
        let handle = Session::start(chunk(0), retry(0), factory.clone(), move |_| {
            *flag.lock().unwrap() = true;
        });

        // Let the session connect and start waiting for audio
        while factory.open_connections() == 0 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        handle.cancel();
        handle.cancel();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(handle.is_finished());
        assert!(!*fired.lock().unwrap());
        assert_eq!(factory.open_connections(), 0, "transport must be closed");
    }

    #[tokio::test]
    async fn test_cancel_after_terminal_is_harmless() {
        let factory = Arc::new(MockTransportFactory::always_succeeding());
        let (tx, rx) = oneshot::channel();
        let handle = Session::start(chunk(0), retry(0), factory, move |outcome| {
            tx.send(outcome).ok();
        });

        let outcome = rx.await.unwrap();
        handle.cancel();
        handle.cancel();
        assert!(!outcome.failed());
    }
}
