//! WebSocket layer: connection handling, message routing, subscriptions.
//!
//! The endpoint at `/ws` streams engine events to clients subscribed by
//! topic and answers `get_ranking` reads.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
