use chrono::{DateTime, Utc};
use std::time::Duration;

/// Argo workflow lifecycle status. An empty or unrecognised phase maps to `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum WorkflowPhase {
    #[default]
    Unknown,
    Pending,
    Running,
    Succeeded,
    Failed,
    Error,
}

impl WorkflowPhase {
    pub fn parse(value: &str) -> Self {
        match value {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            "Error" => Self::Error,
            _ => Self::Unknown,
        }
    }

    pub fn is_completed(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Error)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowSnapshot {
    pub name: String,
    pub namespace: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub phase: WorkflowPhase,
    pub progress: String,
    pub duration: Duration,
}

impl WorkflowSnapshot {
    pub fn key(&self) -> WorkflowKey {
        WorkflowKey {
            name: self.name.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

/// Elapsed run time the way Argo reports it: zero until both timestamps exist.
pub fn workflow_duration(
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
) -> Duration {
    match (started_at, finished_at) {
        (Some(started), Some(finished)) => (finished - started).to_std().unwrap_or_default(),
        _ => Duration::ZERO,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowKey {
    pub name: String,
    pub namespace: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Added,
    Modified,
    Deleted,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Added => "added",
            Self::Modified => "modified",
            Self::Deleted => "deleted",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowEvent {
    pub kind: EventKind,
    pub key: WorkflowKey,
    /// Present for `Added`/`Modified`; optional for `Deleted`.
    pub snapshot: Option<WorkflowSnapshot>,
}

impl WorkflowEvent {
    pub fn added(snapshot: WorkflowSnapshot) -> Self {
        Self::upsert(EventKind::Added, snapshot)
    }

    pub fn modified(snapshot: WorkflowSnapshot) -> Self {
        Self::upsert(EventKind::Modified, snapshot)
    }

    pub fn deleted(key: WorkflowKey) -> Self {
        Self {
            kind: EventKind::Deleted,
            key,
            snapshot: None,
        }
    }

    fn upsert(kind: EventKind, snapshot: WorkflowSnapshot) -> Self {
        Self {
            kind,
            key: snapshot.key(),
            snapshot: Some(snapshot),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Viewport {
    pub width: u16,
    pub height: u16,
}
