//! Log Relay for Launchpad.
//!
//! The publish side ships build log events onto Redis; the relay server
//! pattern-subscribes to every log channel and fans messages out to
//! WebSocket viewers.

pub mod bridge;
pub mod error;
pub mod hub;
pub mod publisher;
pub mod routes;
pub mod state;
pub mod ws;

pub use bridge::{LOG_PATTERN, run_bridge};
pub use error::{RelayError, RelayResult};
pub use hub::RelayHub;
pub use publisher::{BROKER_TIMEOUT, RedisPublisher};
pub use state::AppState;
