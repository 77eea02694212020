//! Transport seam between a session and the synthesis endpoint.
//!
//! A [`TransportFactory`] opens one duplex message stream per attempt. The
//! session only relies on text frames being control messages and binary
//! frames carrying audio, so tests can swap the websocket for
//! [`MockTransportFactory`].

use crate::tts::protocol;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A message received from the endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
}

/// Failure of the underlying stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError {
    pub message: String,
}

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for TransportError {}

/// Parameters of one connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Chunk the attempt synthesizes.
    pub index: usize,
    /// 0 for the first attempt, then one more per retry.
    pub attempt: u32,
    /// Id sent as `ConnectionId`.
    pub connection_id: String,
}

/// An open duplex message stream.
#[async_trait]
pub trait Transport: Send {
    /// Sends a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Waits for the next frame. `None` means the peer closed the stream.
    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>>;

    /// Closes the stream. Errors while closing are ignored.
    async fn close(&mut self);
}

/// Opens transports for sessions.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Whether this environment can open transports at all.
    fn is_supported(&self) -> bool {
        true
    }

    /// Opens a transport for one attempt.
    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>, TransportError>;

    /// Name for logging/debugging.
    fn name(&self) -> &'static str {
        "transport"
    }
}

/// Scripted behaviour of one mock connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockScript {
    /// The connection itself fails.
    RefuseConnection(String),
    /// The connection opens and replays these events, then closes.
    Events(Vec<MockEvent>),
}

/// One step of a scripted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Frame(Frame),
    Error(String),
    Delay(Duration),
}

impl MockScript {
    /// A turn that delivers `audio` in a single frame.
    pub fn success(audio: &[u8]) -> Self {
        Self::success_in_frames(&[audio])
    }

    /// A turn that delivers each slice in its own binary frame.
    pub fn success_in_frames(frames: &[&[u8]]) -> Self {
        let request_id = "0123456789abcdef0123456789abcdef";
        let mut events = vec![MockEvent::Frame(Frame::Text(format!(
            "X-RequestId:{request_id}\r\nPath:turn.start\r\n\r\n{{}}"
        )))];
        events.extend(
            frames
                .iter()
                .map(|payload| MockEvent::Frame(Frame::Binary(protocol::encode_audio_frame(request_id, payload)))),
        );
        events.push(MockEvent::Frame(Frame::Text(protocol::turn_end_message(
            request_id,
        ))));
        Self::Events(events)
    }

    /// A turn that ends without any audio frame.
    pub fn silent_turn() -> Self {
        Self::Events(vec![MockEvent::Frame(Frame::Text(
            protocol::turn_end_message("0123456789abcdef0123456789abcdef"),
        ))])
    }

    /// A connection that closes after sending `audio` but before the turn ends.
    pub fn closed_early(audio: &[u8]) -> Self {
        Self::Events(vec![MockEvent::Frame(Frame::Binary(
            protocol::encode_audio_frame("0123456789abcdef0123456789abcdef", audio),
        ))])
    }

    /// Prepends a delay before the first event.
    pub fn delayed(self, delay: Duration) -> Self {
        match self {
            Self::Events(mut events) => {
                events.insert(0, MockEvent::Delay(delay));
                Self::Events(events)
            }
            refused => refused,
        }
    }
}

type ScriptFn = dyn Fn(&ConnectRequest) -> MockScript + Send + Sync;

/// Transport factory that replays scripts chosen per attempt.
///
/// Tracks how many connections are open at once so tests can assert the
/// scheduler's concurrency ceiling.
#[derive(Clone)]
pub struct MockTransportFactory {
    script: Arc<ScriptFn>,
    supported: bool,
    stats: Arc<MockStats>,
}

#[derive(Debug, Default)]
struct MockStats {
    open: AtomicUsize,
    peak_open: AtomicUsize,
    connects: AtomicUsize,
    sent_frames: AtomicUsize,
}

impl MockTransportFactory {
    /// Creates a factory that asks `script` how each attempt behaves.
    pub fn new(script: impl Fn(&ConnectRequest) -> MockScript + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            supported: true,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// A factory whose every attempt succeeds with audio derived from the index.
    pub fn always_succeeding() -> Self {
        Self::new(|request| MockScript::success(&Self::audio_for(request.index)))
    }

    /// A factory reporting that no transport capability exists.
    pub fn unsupported() -> Self {
        let mut factory = Self::new(|_| MockScript::RefuseConnection("unsupported".to_string()));
        factory.supported = false;
        factory
    }

    /// Deterministic fake audio for a chunk index.
    pub fn audio_for(index: usize) -> Vec<u8> {
        format!("<audio-{index}>").into_bytes()
    }

    /// Connections open right now.
    pub fn open_connections(&self) -> usize {
        self.stats.open.load(Ordering::SeqCst)
    }

    /// Highest number of connections open at once.
    pub fn peak_connections(&self) -> usize {
        self.stats.peak_open.load(Ordering::SeqCst)
    }

    /// Connection attempts made, including refused ones.
    pub fn connect_count(&self) -> usize {
        self.stats.connects.load(Ordering::SeqCst)
    }

    /// Text frames sent by sessions over all connections.
    pub fn sent_frames(&self) -> usize {
        self.stats.sent_frames.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TransportFactory for MockTransportFactory {
    fn is_supported(&self) -> bool {
        self.supported
    }

    async fn connect(&self, request: &ConnectRequest) -> Result<Box<dyn Transport>, TransportError> {
        self.stats.connects.fetch_add(1, Ordering::SeqCst);
        match (self.script)(request) {
            MockScript::RefuseConnection(message) => Err(TransportError::new(message)),
            MockScript::Events(events) => {
                let open = self.stats.open.fetch_add(1, Ordering::SeqCst) + 1;
                self.stats.peak_open.fetch_max(open, Ordering::SeqCst);
                Ok(Box::new(MockTransport {
                    events: events.into(),
                    stats: self.stats.clone(),
                    closed: false,
                }))
            }
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

struct MockTransport {
    events: VecDeque<MockEvent>,
    stats: Arc<MockStats>,
    closed: bool,
}

impl MockTransport {
    fn release(&mut self) {
        if !self.closed {
            self.closed = true;
            self.stats.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_text(&mut self, _text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::new("transport closed"));
        }
        self.stats.sent_frames.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Result<Frame, TransportError>> {
        loop {
            if self.closed {
                return None;
            }
            match self.events.pop_front()? {
                MockEvent::Delay(delay) => tokio::time::sleep(delay).await,
                MockEvent::Frame(frame) => return Some(Ok(frame)),
                MockEvent::Error(message) => return Some(Err(TransportError::new(message))),
            }
        }
    }

    async fn close(&mut self) {
        self.release();
    }
}

impl Drop for MockTransport {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(index: usize, attempt: u32) -> ConnectRequest {
        ConnectRequest {
            index,
            attempt,
            connection_id: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn test_success_script_replays_turn() {
        let factory = MockTransportFactory::always_succeeding();
        let mut transport = factory.connect(&request(3, 0)).await.unwrap();

        let mut frames = Vec::new();
        while let Some(frame) = transport.next_frame().await {
            frames.push(frame.unwrap());
        }

        assert_eq!(frames.len(), 3);
        let Frame::Binary(audio) = &frames[1] else {
            panic!("expected binary frame, got {:?}", frames[1]);
        };
        assert_eq!(
            protocol::extract_audio(audio),
            Some(MockTransportFactory::audio_for(3).as_slice())
        );
        let Frame::Text(end) = &frames[2] else {
            panic!("expected text frame");
        };
        assert!(protocol::is_turn_end(end));
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let factory = MockTransportFactory::new(|_| MockScript::RefuseConnection("no route".into()));
        let result = factory.connect(&request(0, 0)).await;
        assert_eq!(result.err(), Some(TransportError::new("no route")));
        assert_eq!(factory.connect_count(), 1);
        assert_eq!(factory.open_connections(), 0);
    }

    #[tokio::test]
    async fn test_open_connection_tracking() {
        let factory = MockTransportFactory::always_succeeding();
        let first = factory.connect(&request(0, 0)).await.unwrap();
        let mut second = factory.connect(&request(1, 0)).await.unwrap();
        assert_eq!(factory.open_connections(), 2);

        second.close().await;
        assert_eq!(factory.open_connections(), 1);
        assert!(second.next_frame().await.is_none());

        drop(first);
        drop(second);
        assert_eq!(factory.open_connections(), 0);
        assert_eq!(factory.peak_connections(), 2);
    }

    #[tokio::test]
    async fn test_send_counts_frames() {
        let factory = MockTransportFactory::always_succeeding();
        let mut transport = factory.connect(&request(0, 0)).await.unwrap();
        transport.send_text("config".into()).await.unwrap();
        transport.send_text("ssml".into()).await.unwrap();
        assert_eq!(factory.sent_frames(), 2);

        transport.close().await;
        assert!(transport.send_text("late".into()).await.is_err());
    }

    #[test]
    fn test_unsupported_factory() {
        assert!(!MockTransportFactory::unsupported().is_supported());
        assert!(MockTransportFactory::always_succeeding().is_supported());
    }

    #[test]
    fn test_delayed_script_prepends_delay() {
        let script = MockScript::silent_turn().delayed(Duration::from_millis(5));
        let MockScript::Events(events) = script else {
            panic!("expected events");
        };
        assert_eq!(events[0], MockEvent::Delay(Duration::from_millis(5)));
        assert_eq!(events.len(), 2);
    }
}
