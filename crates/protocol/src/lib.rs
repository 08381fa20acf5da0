//! Top-up Protocol - Shared types for the storefront client and the push server
//!
//! This crate contains the wire vocabulary of the real-time order channel:
//! - Outbound client events (`ClientEvent`) and inbound event kinds (`EventKind`)
//! - JSON framing for WebSocket text frames (`ServerFrame`, `encode_client`, `decode_server`)
//! - Order identifiers, statuses and the typed `OrderUpdate` view of a payload
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - Only serde, serde_json, and thiserror
//! 2. **No transport logic** - Pure data types and serialization
//! 3. **Forward compatible** - Unknown order statuses are preserved, not rejected

pub mod events;
pub mod frame;
pub mod order;

pub use events::{ClientEvent, EventKind};
pub use frame::{decode_server, encode_client, FrameError, ServerFrame};
pub use order::{order_id_of, OrderId, OrderStatus, OrderUpdate};
