//! HTTP API handlers: exposes the session as JSON.

pub mod peers;
pub mod session;

use misty_net::Session;

#[derive(Clone)]
pub struct ApiState {
    pub session: Session,
}

// Re-export handler functions for use in router setup.
pub use peers::{handle_peers, handle_ping};
pub use session::{handle_auth, handle_hello, handle_server};
