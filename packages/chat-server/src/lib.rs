//! TCP transport for the chat server: framing, the per-connection state
//! machine, the accept loop, and graceful shutdown.
//!
//! Everything stateful about chat semantics lives in `chat_core`; this
//! crate is the async glue between that domain logic and real sockets.

pub mod codec;
pub mod handler;
pub mod listener;
pub mod shutdown;

pub use listener::ChatServer;
pub use shutdown::{HealthState, ShutdownController};
