//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check endpoint
//! - `session` - Short-lived client secret minting
//! - `relay` - WebSocket relay to the upstream realtime endpoint

pub mod api;
pub mod relay;
pub mod session;

pub use relay::relay_handler;
pub use session::create_session;
