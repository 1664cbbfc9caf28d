//! Entry status state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of an [`Entry`](super::Entry).
///
/// `initialized -> preparing -> active -> {completed | partial | paused | failed}`.
/// Only `initialized` and `paused` may (re)start; `failed` re-enters through an
/// explicit retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    /// Registered, never started or reset by cancel.
    Initialized,
    /// Running the content type's preparation hook.
    Preparing,
    /// Extracting and downloading links.
    Active,
    /// Every link downloaded.
    Completed,
    /// Finished with tolerated failures; some links remain un-downloaded.
    Partial,
    /// Stopped by the operator; resumable.
    Paused,
    /// Aborted by a critical error.
    Failed,
}

impl EntryStatus {
    /// Returns the stable string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initialized => "initialized",
            Self::Preparing => "preparing",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Paused => "paused",
            Self::Failed => "failed",
        }
    }

    /// Whether a start transition is legal from this state.
    #[must_use]
    pub fn can_start(&self) -> bool {
        matches!(self, Self::Initialized | Self::Paused)
    }

    /// Whether a pipeline is running for this state.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Preparing | Self::Active)
    }

    /// `completed`, and `failed` until explicitly retried.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "initialized" => Ok(Self::Initialized),
            "preparing" => Ok(Self::Preparing),
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "partial" => Ok(Self::Partial),
            "paused" => Ok(Self::Paused),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid entry status: {s}")),
        }
    }
}
