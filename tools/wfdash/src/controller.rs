use crate::errors::DashError;
use crate::hotkeys::{action_for_key, dashboard_controls_legend, HotkeyAction};
use crate::logging::append_run_log;
use crate::projector::{project, ProjectionOptions, TableView};
use crate::runtime::Clock;
use crate::store::{ApplyOutcome, WorkflowTable};
use crate::tui::{draw_dashboard, TableNavigator};
use crate::types::{Viewport, WorkflowEvent};
use chrono::{DateTime, Utc};
use crossterm::event::KeyEvent;
use ratatui::Frame;
use serde_json::json;
use std::sync::Arc;

/// Everything the event loop can be woken up by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopEvent {
    Resize { width: u16, height: u16 },
    Key(KeyEvent),
    Workflow(WorkflowEvent),
    WatchFailed(String),
    Tick,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    Terminating,
}

/// Owns the store and everything derived from it. Only the event-loop thread
/// touches a `Controller`.
pub struct Controller {
    store: WorkflowTable,
    viewport: Viewport,
    navigator: TableNavigator,
    options: ProjectionOptions,
    clock: Arc<dyn Clock>,
    namespace: String,
    last_error: Option<String>,
    state: LoopState,
    view: TableView,
}

impl Controller {
    pub fn new(
        clock: Arc<dyn Clock>,
        namespace: impl Into<String>,
        options: ProjectionOptions,
    ) -> Self {
        let store = WorkflowTable::new();
        let viewport = Viewport::default();
        let view = project(
            store.snapshot(),
            viewport.height,
            now_utc(clock.as_ref()),
            &options,
        );
        Self {
            store,
            viewport,
            navigator: TableNavigator::default(),
            options,
            clock,
            namespace: namespace.into(),
            last_error: None,
            state: LoopState::Running,
            view,
        }
    }

    pub fn handle(&mut self, event: LoopEvent) -> LoopState {
        if self.state == LoopState::Terminating {
            return self.state;
        }

        let mut navigation = None;
        match event {
            LoopEvent::Resize { width, height } => {
                self.viewport = Viewport { width, height };
            }
            LoopEvent::Key(key) => match action_for_key(&key) {
                Some(HotkeyAction::Quit) => {
                    append_run_log("info", "loop.quit", json!({ "workflows": self.store.len() }));
                    self.state = LoopState::Terminating;
                    return self.state;
                }
                Some(HotkeyAction::Table(action)) => navigation = Some(action),
                None => {}
            },
            LoopEvent::Workflow(event) => self.apply_workflow(event),
            LoopEvent::WatchFailed(message) => {
                append_run_log("warn", "loop.watch_failed", json!({ "error": message }));
                self.last_error = Some(message);
            }
            LoopEvent::Tick => {}
        }

        self.refresh();
        if let Some(action) = navigation {
            self.navigator.apply(action, self.page_size());
        }
        self.state
    }

    /// Applies an event straight to the store, bypassing the key handling.
    /// Used for the initial list before the loop starts.
    pub fn apply_workflow(&mut self, event: WorkflowEvent) {
        let name = event.key.name.clone();
        let kind = event.kind;
        match self.store.apply(event) {
            Ok(ApplyOutcome::Unchanged) => {}
            Ok(outcome) => {
                append_run_log(
                    "debug",
                    "store.apply",
                    json!({ "name": name, "kind": kind.as_str(), "outcome": format!("{outcome:?}") }),
                );
            }
            Err(error) => self.reject(error),
        }
    }

    fn reject(&mut self, error: DashError) {
        append_run_log(
            "warn",
            "store.apply.rejected",
            json!({ "error": error.to_string() }),
        );
        self.last_error = Some(error.to_string());
    }

    /// Re-derives the whole table from the store and the current viewport.
    pub fn refresh(&mut self) {
        self.view = project(
            self.store.snapshot(),
            self.viewport.height,
            now_utc(self.clock.as_ref()),
            &self.options,
        );
        self.navigator.rebuild(self.view.rows.len());
    }

    pub fn draw(&mut self, frame: &mut Frame<'_>) {
        let status = self.status_line();
        draw_dashboard(frame, &self.view, &mut self.navigator, &status);
    }

    pub fn status_line(&self) -> String {
        let mut parts = vec![
            format!("namespace {}", self.namespace),
            format!("{} workflows", self.store.len()),
        ];
        if let Some(error) = &self.last_error {
            parts.push(format!("last error: {error}"));
        }
        parts.push(dashboard_controls_legend());
        parts.join(" | ")
    }

    pub fn view(&self) -> &TableView {
        &self.view
    }

    pub fn store(&self) -> &WorkflowTable {
        &self.store
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn selected(&self) -> Option<usize> {
        self.navigator.selected()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    // Header row and status line are not scrollable.
    fn page_size(&self) -> usize {
        usize::from(self.viewport.height.saturating_sub(2)).max(1)
    }
}

fn now_utc(clock: &dyn Clock) -> DateTime<Utc> {
    DateTime::<Utc>::from(clock.now())
}
