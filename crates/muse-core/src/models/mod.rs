pub mod context;
pub mod draft;
pub mod message;
pub mod thread;

pub use context::{ContextKey, HistoryFilter};
pub use draft::LocalDraft;
pub use message::{
    iso8601, local_identity, Delivery, Message, MessageFlag, MessageFlags, MessageUpdate, Role,
    Source,
};
pub use thread::{SharedThreadDirectory, ThreadDirectory, ThreadVisibility};
