//! WebSocket transport: wire message types and the single-writer outbound
//! gateway. Inbound demultiplexing lives with the connection handler in
//! `handlers::ws`.

pub mod gateway;
pub mod messages;

pub use gateway::{GatewaySender, OUTBOUND_BUFFER_FRAMES, OutboundFrame};
pub use messages::{ClientMessage, ServerEvent, StatusKind};
