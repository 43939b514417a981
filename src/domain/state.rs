use std::fmt;

/// Where the session is in the handshake lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Failed,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Default)]
pub struct AuthState {
    pub token: Option<String>,
    pub status: ConnectionStatus,
}

/// Lifecycle of a full-catalog indexing run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexerState {
    #[default]
    Idle,
    Running,
    Succeeded,
    Aborted,
}

impl IndexerState {
    pub fn is_running(&self) -> bool {
        matches!(self, IndexerState::Running)
    }
}

impl fmt::Display for IndexerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexerState::Idle => "idle",
            IndexerState::Running => "running",
            IndexerState::Succeeded => "succeeded",
            IndexerState::Aborted => "aborted",
        };
        f.write_str(s)
    }
}
