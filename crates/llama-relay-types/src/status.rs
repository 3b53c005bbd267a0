//! Resource lifecycle status and its transition table.

use serde::{Deserialize, Serialize};

use crate::protocol::HostEvent;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    #[default]
    NotLoaded,
    Loading,
    Ready,
    Failed,
}

impl ResourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotLoaded => "not_loaded",
            Self::Loading => "loading",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }

    /// Parse the persisted representation. Unknown values map to `None`.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_loaded" => Some(Self::NotLoaded),
            "loading" => Some(Self::Loading),
            "ready" => Some(Self::Ready),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The flat status record that is persisted and broadcast.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub status: ResourceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percent: Option<u8>,
}

impl StatusRecord {
    pub fn not_loaded() -> Self {
        Self::default()
    }

    pub fn not_loaded_because(detail: impl Into<String>) -> Self {
        Self {
            status: ResourceStatus::NotLoaded,
            detail_message: Some(detail.into()),
            progress_percent: None,
        }
    }

    pub fn loading(percent: u8) -> Self {
        Self {
            status: ResourceStatus::Loading,
            detail_message: None,
            progress_percent: Some(percent.min(100)),
        }
    }

    pub fn ready() -> Self {
        Self {
            status: ResourceStatus::Ready,
            detail_message: None,
            progress_percent: Some(100),
        }
    }

    pub fn failed(detail: impl Into<String>) -> Self {
        Self {
            status: ResourceStatus::Failed,
            detail_message: Some(detail.into()),
            progress_percent: None,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ResourceStatus::Ready
    }

    /// Next record after a host event, or `None` when the event does not
    /// change the status (job events, stale load events after `Ready`).
    ///
    /// The host's live report wins over the local view: progress or an
    /// "already initializing" signal seen while `NotLoaded`/`Failed` moves
    /// the record to `Loading`.
    pub fn on_host_event(&self, event: &HostEvent) -> Option<StatusRecord> {
        match event {
            HostEvent::ResourceReady => Some(Self::ready()),
            HostEvent::ResourceProgress { percent } => {
                if self.is_ready() {
                    None
                } else {
                    Some(Self::loading(*percent))
                }
            }
            HostEvent::AlreadyInitializing => match self.status {
                ResourceStatus::Ready => None,
                ResourceStatus::Loading => Some(self.clone()),
                ResourceStatus::NotLoaded | ResourceStatus::Failed => Some(Self::loading(0)),
            },
            HostEvent::InitError { error } => {
                if self.is_ready() {
                    None
                } else {
                    Some(Self::failed(error.clone()))
                }
            }
            HostEvent::Exited => Some(Self::not_loaded_because("resource host exited")),
            HostEvent::JobChunk { .. } | HostEvent::JobResult { .. } | HostEvent::RunError { .. } => {
                None
            }
        }
    }
}
