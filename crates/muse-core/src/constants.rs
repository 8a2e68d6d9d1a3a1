//! Application-wide constants
//!
//! Centralized location for wire strings and default tuning values
//! that are used across multiple modules.

/// Default REST base for history fetches and message creation
pub const API_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Default live channel endpoint
pub const CHANNEL_URL: &str = "ws://127.0.0.1:8000/ws";

/// Listener role declared in the channel handshake frame
pub const LISTEN_AS_FRONTEND: &str = "frontend";

// Window defaults
/// Messages fetched by an initial load (and the live tail size)
pub const DEFAULT_ACTIVE_LIMIT: usize = 50;
/// Page size for backward/forward pagination
pub const DEFAULT_SCROLLBACK_LIMIT: usize = 50;
/// Maximum entries handed to the view layer
pub const DEFAULT_RENDER_CAP: usize = 200;

// Channel timing
/// Fixed delay between a channel close and the next connect attempt
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1_500;
/// Interval at which `wait_ready` re-checks the channel state
pub const DEFAULT_READY_POLL_INTERVAL_MS: u64 = 100;
/// Upper bound for exponential reconnect backoff
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Inbound frame type tags
pub mod frame_types {
    /// New or updated message fields
    pub const MUSE_MESSAGE: &str = "muse_message";
    /// Broadcast notice (message of the day)
    pub const MOTD_UPDATE: &str = "motd_update";
}
