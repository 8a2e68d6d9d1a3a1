/// Errors surfaced by the synchronization core.
///
/// None of these are fatal: network failures leave state untouched for a
/// caller-initiated retry, channel failures are absorbed by the reconnect
/// loop, and malformed frames are dropped where they are parsed.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Request failed: {0}")]
    Transient(String),

    #[error("Channel disconnected")]
    ChannelDisconnected,

    #[error("Channel error: {0}")]
    Channel(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Malformed frame: {0}")]
    MalformedFrame(String),
}

impl SyncError {
    /// Page fetch or create request failures; the caller may retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Http(_) | Self::Status { .. } | Self::Transient(_))
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
