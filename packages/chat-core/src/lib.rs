//! Network-agnostic domain logic for the line-oriented chat server: wire
//! verb parsing, the connection/registry model, pair-chat and group
//! mutation, rate limiting, audit logging, and configuration.
//!
//! Nothing in this crate touches a socket; `chat-server` is the async/TCP
//! layer built on top of it. That split keeps the hard part -- the
//! four-index registry invariants in SPEC_FULL.md §8 -- testable without a
//! runtime.

pub mod audit;
pub mod config;
pub mod connection;
pub mod error;
pub mod protocol;
pub mod rate_limit;
pub mod registry;
pub mod stats;

pub use audit::{AuditEntry, AuditLog, Direction};
pub use config::AppConfig;
pub use connection::{ConnectionHandle, ConnectionId, ConnectionInfo, OutboundMessage};
pub use error::{ChatError, GroupError, NameError, ProtocolError, RateLimitError, ServerError};
pub use protocol::{parse, Command};
pub use rate_limit::{RateLimitConfig, RateLimiter};
pub use registry::Registry;
pub use stats::{ClientStats, Stats};
