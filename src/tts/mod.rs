//! Text-to-speech sessions and their transports.

#[cfg(feature = "edge")]
pub mod edge;
pub mod protocol;
pub mod session;
pub mod transport;

#[cfg(feature = "edge")]
pub use edge::EdgeTransportFactory;
pub use session::{Session, SessionError, SessionHandle, SessionOutcome, SessionState};
pub use transport::{
    ConnectRequest, Frame, MockEvent, MockScript, MockTransportFactory, Transport, TransportError,
    TransportFactory,
};
