use crate::types::WorkflowSnapshot;
use chrono::{DateTime, Utc};
use std::cmp::Reverse;
use std::time::Duration;

pub const NAMESPACE_WIDTH: u16 = 9;
pub const STARTED_WIDTH: u16 = 9;
pub const FINISHED_WIDTH: u16 = 9;
pub const DURATION_WIDTH: u16 = 8;
pub const PROGRESS_WIDTH: u16 = 8;
pub const COMPLETED_WIDTH: u16 = 9;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnSpec {
    pub title: &'static str,
    pub width: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableRow {
    pub cells: Vec<String>,
}

impl TableRow {
    pub fn name(&self) -> &str {
        self.cells.first().map(String::as_str).unwrap_or_default()
    }
}

/// Render-ready table: fixed columns, rows in display order, and the height
/// the table is bound to. Rows are never truncated to `height`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableView {
    pub columns: Vec<ColumnSpec>,
    pub rows: Vec<TableRow>,
    pub height: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectionOptions {
    /// Shown in Started/Finished when the timestamp is unset.
    pub unset_timestamp: String,
}

impl Default for ProjectionOptions {
    fn default() -> Self {
        Self {
            unset_timestamp: "-".to_string(),
        }
    }
}

pub fn project<'a, I>(
    snapshots: I,
    viewport_height: u16,
    now: DateTime<Utc>,
    options: &ProjectionOptions,
) -> TableView
where
    I: IntoIterator<Item = &'a WorkflowSnapshot>,
{
    let mut workflows = snapshots.into_iter().collect::<Vec<_>>();

    let name_width = workflows
        .iter()
        .map(|wf| wf.name.chars().count())
        .max()
        .unwrap_or(0);

    // Stable: equal start times keep their input order across renders.
    workflows.sort_by_key(|wf| Reverse(wf.started_at));

    let rows = workflows
        .into_iter()
        .map(|wf| TableRow {
            cells: vec![
                wf.name.clone(),
                wf.namespace.clone(),
                format_since(wf.started_at, now, options),
                format_since(wf.finished_at, now, options),
                format_go_duration(wf.duration),
                wf.progress.clone(),
                wf.phase.is_completed().to_string(),
            ],
        })
        .collect();

    TableView {
        columns: columns(u16::try_from(name_width).unwrap_or(u16::MAX)),
        rows,
        height: viewport_height,
    }
}

pub fn columns(name_width: u16) -> Vec<ColumnSpec> {
    vec![
        ColumnSpec {
            title: "Name",
            width: name_width,
        },
        ColumnSpec {
            title: "Namespace",
            width: NAMESPACE_WIDTH,
        },
        ColumnSpec {
            title: "Started",
            width: STARTED_WIDTH,
        },
        ColumnSpec {
            title: "Finished",
            width: FINISHED_WIDTH,
        },
        ColumnSpec {
            title: "Duration",
            width: DURATION_WIDTH,
        },
        ColumnSpec {
            title: "Progress",
            width: PROGRESS_WIDTH,
        },
        ColumnSpec {
            title: "Completed",
            width: COMPLETED_WIDTH,
        },
    ]
}

pub fn format_since(
    at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    options: &ProjectionOptions,
) -> String {
    let Some(at) = at else {
        return options.unset_timestamp.clone();
    };
    let elapsed = (now - at).to_std().unwrap_or_default();
    format!("{} ago", format_go_duration(elapsed))
}

/// Whole-second duration in Go notation: `0s`, `45s`, `3m12s`, `1h0m5s`.
pub fn format_go_duration(duration: Duration) -> String {
    let total = duration.as_secs();
    let hours = total / 3600;
    let minutes = (total % 3600) / 60;
    let seconds = total % 60;
    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
