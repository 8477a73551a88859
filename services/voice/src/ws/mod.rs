//! Renderer Connection
//!
//! A renderer attaches over a WebSocket, receives a snapshot of the scene and
//! then a stream of scene changes, command results and listening status. It
//! reports entity positions every frame and gets attraction forces back.
//!
//! - `protocol`: the JSON message format in both directions.
//! - `session`: the connection lifecycle and event loop.

pub mod protocol;
pub mod session;

pub use session::ws_handler;
