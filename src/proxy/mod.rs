//! Data path of the proxy: accept, dispatch, and relay.
//!
//! The forwarder is deliberately not an HTTP parser. It reads just enough of
//! each message (two framing headers) to know where the body ends, and passes
//! every byte through unchanged.

pub mod forwarder;
pub mod handler;
pub mod listener;

pub use forwarder::{relay_message, Direction, BUFFER_SIZE};
pub use handler::{handle_connection, CONNECT_TIMEOUT, READ_TIMEOUT};
pub use listener::Listener;
