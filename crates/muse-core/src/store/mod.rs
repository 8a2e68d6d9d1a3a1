pub mod context_store;
pub mod window;

pub use context_store::{ContextState, LoadDirection, SyncStore};
pub use window::{UpsertOutcome, Window, WindowLimits};
