use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{
    API_BASE_URL, CHANNEL_URL, DEFAULT_ACTIVE_LIMIT, DEFAULT_MAX_RECONNECT_DELAY_MS,
    DEFAULT_READY_POLL_INTERVAL_MS, DEFAULT_RECONNECT_DELAY_MS, DEFAULT_RENDER_CAP,
    DEFAULT_SCROLLBACK_LIMIT, LISTEN_AS_FRONTEND,
};
use crate::models::{HistoryFilter, Source};
use crate::store::WindowLimits;

/// How long the connection task waits before reopening a closed channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ReconnectPolicy {
    /// Same delay after every close
    Fixed { delay_ms: u64 },
    /// Doubling delay from `base_ms`, capped at `max_ms`, with jitter.
    /// The attempt counter resets once a handshake succeeds.
    Exponential {
        base_ms: u64,
        #[serde(default = "default_max_delay_ms")]
        max_ms: u64,
    },
}

fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_RECONNECT_DELAY_MS
}

impl ReconnectPolicy {
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: delay.as_millis() as u64,
        }
    }

    /// Delay before reconnect attempt number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match *self {
            Self::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            Self::Exponential { base_ms, max_ms } => {
                let factor = 1u64.checked_shl(attempt.min(32)).unwrap_or(u64::MAX);
                let ceiling = base_ms.saturating_mul(factor).min(max_ms).max(1);
                // Full range would allow zero; keep at least half the ceiling.
                let jittered = rand::thread_rng().gen_range(ceiling / 2..=ceiling);
                Duration::from_millis(jittered)
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Fixed {
            delay_ms: DEFAULT_RECONNECT_DELAY_MS,
        }
    }
}

/// Session configuration, loadable from a JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SyncConfig {
    /// Base URL of the REST API (history fetch, message create)
    pub api_base_url: String,

    /// WebSocket URL of the live channel
    pub channel_url: String,

    /// Role declared in the registration frame
    pub listen_as: String,

    /// Size of an initial load
    pub active_limit: usize,

    /// Page size for older/newer pagination
    pub scrollback_limit: usize,

    /// Maximum number of entries in a visible slice
    pub render_cap: usize,

    pub reconnect: ReconnectPolicy,

    pub ready_poll_interval_ms: u64,

    /// Default source filter for history fetches (empty = all sources)
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<Source>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base_url: API_BASE_URL.to_string(),
            channel_url: CHANNEL_URL.to_string(),
            listen_as: LISTEN_AS_FRONTEND.to_string(),
            active_limit: DEFAULT_ACTIVE_LIMIT,
            scrollback_limit: DEFAULT_SCROLLBACK_LIMIT,
            render_cap: DEFAULT_RENDER_CAP,
            reconnect: ReconnectPolicy::default(),
            ready_poll_interval_ms: DEFAULT_READY_POLL_INTERVAL_MS,
            sources: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Load config from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: SyncConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.active_limit == 0 || self.scrollback_limit == 0 || self.render_cap == 0 {
            anyhow::bail!("activeLimit, scrollbackLimit and renderCap must be positive");
        }
        url::Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid apiBaseUrl: {}", self.api_base_url))?;
        url::Url::parse(&self.channel_url)
            .with_context(|| format!("Invalid channelUrl: {}", self.channel_url))?;
        if let ReconnectPolicy::Exponential { base_ms, max_ms } = self.reconnect {
            if base_ms == 0 || max_ms < base_ms {
                anyhow::bail!("exponential reconnect needs 0 < baseMs <= maxMs");
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> WindowLimits {
        WindowLimits {
            active_limit: self.active_limit,
            scrollback_limit: self.scrollback_limit,
            render_cap: self.render_cap,
        }
    }

    pub fn history_filter(&self) -> HistoryFilter {
        HistoryFilter {
            sources: self.sources.clone(),
        }
    }

    pub fn ready_poll_interval(&self) -> Duration {
        Duration::from_millis(self.ready_poll_interval_ms.max(1))
    }
}
