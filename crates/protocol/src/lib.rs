pub mod constants;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod negotiate;

// Re-export primary types for convenience.
pub use constants::MessageType;
pub use envelope::Message;
pub use error::ProtocolError;
pub use framing::{FrameBuffer, RECORD_SEPARATOR};
pub use handshake::{HandshakeRequest, HandshakeResponse};
pub use negotiate::{AvailableTransport, NegotiateResponse, TransferFormat, TransportType};
