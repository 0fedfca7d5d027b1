//! Connect Tunnel
//!
//! The tunneling endpoint of a forward HTTP proxy. A `CONNECT` request opens
//! an opaque, byte-transparent channel between the client and the requested
//! destination, optionally chained through an upstream proxy, and bytes are
//! relayed in both directions until either side closes.
//!
//! ```text
//! client ──CONNECT host:port──> TunnelHandler
//!                                  │ resolve: direct, or upstream proxy
//!                                  │ dial + handshake
//!                                  │   direct:     "200 Connection established" to client
//!                                  │   forwarding: request head to upstream
//!                                  ▼
//!                client <══ relay (two directions) ══> destination
//! ```
//!
//! - [`TunnelHandler`] - Entry point for the host server
//! - [`ClientConnection`] - What the host must provide for the client side
//! - [`ProxyServer`] - Small listener that reads request heads and dispatches them

#![deny(clippy::correctness)]
#![warn(clippy::suspicious)]
#![warn(clippy::style)]
#![warn(clippy::complexity)]
#![warn(clippy::perf)]

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tunnel;

pub use config::TunnelConfig;
pub use error::{Result, TunnelError};
pub use server::ProxyServer;
pub use tunnel::{ClientConnection, TunnelHandler, TunnelRequest};
