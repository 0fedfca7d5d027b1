//! Wire formats used around a tunnel.
//!
//! - [`Headers`] - Ordered header collection carried by a request
//! - Handshake and error messages written before relaying starts
//! - [`SessionId`] - Identifier for log correlation

mod headers;
mod ids;
mod messages;

pub use headers::*;
pub use ids::*;
pub use messages::*;
