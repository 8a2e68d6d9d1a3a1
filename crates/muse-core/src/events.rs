use crate::channel::{ConnectionState, InboundEvent};
use crate::error::SyncResult;
use crate::models::ContextKey;
use crate::pagination::PageResult;
use crate::store::LoadDirection;

/// Outcome of one create request, keyed by the local identity
#[derive(Debug)]
pub struct DeliveryReport {
    pub message_id: String,
    pub outcome: SyncResult<()>,
}

/// Inputs to the runtime's event loop. Everything that mutates a window
/// arrives as one of these and is applied synchronously by `process`.
#[derive(Debug)]
pub enum SyncUpdate {
    Frame(InboundEvent),
    Connection(ConnectionState),
    Page(PageResult),
    Delivery(DeliveryReport),
}

/// What changed, for the view layer.
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    WindowChanged(ContextKey),
    Motd(String),
    ConnectionChanged(ConnectionState),
    PageFailed {
        context: ContextKey,
        direction: LoadDirection,
        error: String,
    },
    /// Create request rejected; the entry stays visible marked failed
    DeliveryFailed {
        message_id: String,
        error: String,
    },
}
