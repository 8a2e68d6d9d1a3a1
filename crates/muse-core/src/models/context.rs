use std::fmt;

use super::message::Source;

/// A conversation scope with its own window.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ContextKey {
    /// The session's main timeline
    Main,
    /// One thread sub-timeline
    Thread(String),
    /// Non-live, paginated history of one project
    Project(String),
}

impl ContextKey {
    pub fn thread(thread_id: impl Into<String>) -> Self {
        Self::Thread(thread_id.into())
    }

    pub fn project(project_id: impl Into<String>) -> Self {
        Self::Project(project_id.into())
    }

    /// Live contexts receive channel pushes; the project browser does not
    pub fn is_live(&self) -> bool {
        matches!(self, Self::Main | Self::Thread(_))
    }

    pub fn thread_id(&self) -> Option<&str> {
        match self {
            Self::Thread(id) => Some(id),
            _ => None,
        }
    }

    pub fn project_id(&self) -> Option<&str> {
        match self {
            Self::Project(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Thread(id) => write!(f, "thread:{}", id),
            Self::Project(id) => write!(f, "project:{}", id),
        }
    }
}

/// Filters a context applies to its history fetches.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistoryFilter {
    /// Empty means every source
    pub sources: Vec<Source>,
}
