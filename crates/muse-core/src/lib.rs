pub mod backend;
pub mod channel;
pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod pagination;
pub mod pipeline;
pub mod router;
pub mod runtime;
pub mod store;
pub mod tracing_setup;

#[cfg(test)]
pub(crate) mod testing;

pub use backend::{CreateMessageRequest, HistoryQuery, HistorySource, HttpBackend, MessageSink};
pub use channel::{ConnectionManager, ConnectionState, InboundEvent};
pub use config::{ReconnectPolicy, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use events::{CoreEvent, SyncUpdate};
pub use pagination::{ScrollAnchor, ViewportSnapshot};
pub use runtime::SyncRuntime;
