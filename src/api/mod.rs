pub mod actions;
pub mod client;
pub mod logging;
pub mod mock_client;
pub mod stream;

pub use actions::{ActionChannel, ActionError, HttpActionChannel};
pub use client::{ByteStream, EventTransport, HttpTransport, TransportError};
pub use stream::{RawMessage, StreamParser};
