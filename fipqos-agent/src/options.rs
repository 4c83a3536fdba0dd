use std::{fmt, str::FromStr};

/// The L3 agent mode, which decides where a router's gateway device lives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AgentMode {
    #[default]
    Legacy,
    Dvr,
    DvrSnat,
    DvrNoExternal,
}

impl AgentMode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::Dvr => "dvr",
            Self::DvrSnat => "dvr_snat",
            Self::DvrNoExternal => "dvr_no_external",
        }
    }
}

impl fmt::Display for AgentMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown agent mode: {0}")]
pub struct UnknownAgentMode(pub String);

impl FromStr for AgentMode {
    type Err = UnknownAgentMode;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "legacy" => Ok(Self::Legacy),
            "dvr" => Ok(Self::Dvr),
            "dvr_snat" => Ok(Self::DvrSnat),
            "dvr_no_external" => Ok(Self::DvrNoExternal),
            other => Err(UnknownAgentMode(other.to_string())),
        }
    }
}

/// Floating IP QoS extension options.
#[derive(Debug, Clone)]
pub struct ExtensionOptions {
    /// The mode of the L3 agent hosting the extension.
    pub agent_mode: AgentMode,
    /// The number of pushed policy notifications queued before the publisher waits.
    pub notification_buffer_size: usize,
    /// If true, filters without a recorded limit are removed from a gateway device the first
    /// time its router is processed, by an add or an update. This cleans up after an agent
    /// restart.
    pub sync_stale_filters: bool,
}

impl Default for ExtensionOptions {
    fn default() -> Self {
        Self {
            agent_mode: AgentMode::default(),
            notification_buffer_size: 64,
            sync_stale_filters: true,
        }
    }
}

impl ExtensionOptions {
    pub fn with_agent_mode(mut self, agent_mode: AgentMode) -> Self {
        self.agent_mode = agent_mode;
        self
    }

    pub fn with_notification_buffer_size(mut self, size: usize) -> Self {
        self.notification_buffer_size = size;
        self
    }

    pub fn with_sync_stale_filters(mut self, sync: bool) -> Self {
        self.sync_stale_filters = sync;
        self
    }
}
