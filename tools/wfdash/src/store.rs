use crate::errors::DashError;
use crate::types::{EventKind, WorkflowEvent, WorkflowSnapshot};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    Inserted,
    Replaced,
    Removed,
    Unchanged,
}

/// Latest known snapshot per workflow name.
///
/// Only `apply` mutates the table, and it validates the whole event before
/// touching the map, so a rejected event leaves the previous contents intact.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowTable {
    workflows: BTreeMap<String, WorkflowSnapshot>,
    version: u64,
}

impl WorkflowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apply(&mut self, event: WorkflowEvent) -> Result<ApplyOutcome, DashError> {
        if event.key.name.is_empty() {
            return Err(DashError::MalformedEvent(format!(
                "{} event without a workflow name",
                event.kind.as_str()
            )));
        }

        match event.kind {
            EventKind::Added | EventKind::Modified => {
                let Some(snapshot) = event.snapshot else {
                    return Err(DashError::MalformedEvent(format!(
                        "{} event for {} carries no snapshot",
                        event.kind.as_str(),
                        event.key.name
                    )));
                };
                if snapshot.name != event.key.name {
                    return Err(DashError::MalformedEvent(format!(
                        "snapshot name {} does not match event key {}",
                        snapshot.name, event.key.name
                    )));
                }
                if self.workflows.get(&snapshot.name) == Some(&snapshot) {
                    return Ok(ApplyOutcome::Unchanged);
                }
                let outcome = match self.workflows.insert(snapshot.name.clone(), snapshot) {
                    Some(_) => ApplyOutcome::Replaced,
                    None => ApplyOutcome::Inserted,
                };
                self.version = self.version.wrapping_add(1);
                Ok(outcome)
            }
            EventKind::Deleted => {
                if self.workflows.remove(&event.key.name).is_none() {
                    return Ok(ApplyOutcome::Unchanged);
                }
                self.version = self.version.wrapping_add(1);
                Ok(ApplyOutcome::Removed)
            }
        }
    }

    /// Current snapshots. Callers must not depend on the order.
    pub fn snapshot(&self) -> Vec<&WorkflowSnapshot> {
        self.workflows.values().collect()
    }

    pub fn get(&self, name: &str) -> Option<&WorkflowSnapshot> {
        self.workflows.get(name)
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Bumped on every mutating `apply`.
    pub fn version(&self) -> u64 {
        self.version
    }
}
