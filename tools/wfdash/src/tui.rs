use crate::errors::DashError;
use crate::hotkeys::TableAction;
use crate::projector::TableView;
use ratatui::backend::TestBackend;
use ratatui::layout::{Constraint, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Paragraph, Row, Table, TableState};
use ratatui::{Frame, Terminal};

/// Selection and scroll state of the dashboard table.
#[derive(Debug, Default, Clone)]
pub struct TableNavigator {
    state: TableState,
    rows: usize,
}

impl TableNavigator {
    /// Called after every projection. Keeps the cursor inside `row_count`.
    pub fn rebuild(&mut self, row_count: usize) {
        self.rows = row_count;
        if row_count == 0 {
            self.state.select(None);
            *self.state.offset_mut() = 0;
            return;
        }
        let selected = self.state.selected().unwrap_or(0).min(row_count - 1);
        self.state.select(Some(selected));
    }

    pub fn apply(&mut self, action: TableAction, page: usize) {
        let Some(current) = self.state.selected() else {
            return;
        };
        let last = self.rows.saturating_sub(1);
        let page = page.max(1);
        let half = (page / 2).max(1);
        let next = match action {
            TableAction::LineUp => current.saturating_sub(1),
            TableAction::LineDown => current.saturating_add(1).min(last),
            TableAction::PageUp => current.saturating_sub(page),
            TableAction::PageDown => current.saturating_add(page).min(last),
            TableAction::HalfPageUp => current.saturating_sub(half),
            TableAction::HalfPageDown => current.saturating_add(half).min(last),
            TableAction::GotoTop => 0,
            TableAction::GotoBottom => last,
        };
        self.state.select(Some(next));
    }

    pub fn selected(&self) -> Option<usize> {
        self.state.selected()
    }

    pub fn state_mut(&mut self) -> &mut TableState {
        &mut self.state
    }
}

pub fn draw_dashboard(
    frame: &mut Frame<'_>,
    view: &TableView,
    navigator: &mut TableNavigator,
    status: &str,
) {
    let area = frame.area();
    if area.height == 0 || area.width == 0 {
        return;
    }

    let table_height = view.height.min(area.height.saturating_sub(1));
    if table_height > 0 {
        let header = Row::new(view.columns.iter().map(|column| column.title))
            .style(Style::default().add_modifier(Modifier::BOLD));
        let widths = view
            .columns
            .iter()
            .map(|column| Constraint::Length(column.width))
            .collect::<Vec<_>>();
        let rows = view.rows.iter().map(|row| Row::new(row.cells.clone()));
        let table = Table::new(rows, widths)
            .header(header)
            .column_spacing(1)
            .row_highlight_style(Style::default().fg(Color::Black).bg(Color::Cyan));
        let table_area = Rect {
            height: table_height,
            ..area
        };
        frame.render_stateful_widget(table, table_area, navigator.state_mut());
    }

    let status_area = Rect {
        y: area.y + area.height - 1,
        height: 1,
        ..area
    };
    let status_line = Line::from(Span::styled(
        status.to_string(),
        Style::default().fg(Color::DarkGray),
    ));
    frame.render_widget(Paragraph::new(status_line), status_area);
}

/// Draws one frame off-screen and returns it as text, one line per row.
pub fn render_dashboard(
    view: &TableView,
    navigator: &mut TableNavigator,
    status: &str,
    width: u16,
    height: u16,
) -> Result<String, DashError> {
    let mut terminal = Terminal::new(TestBackend::new(width, height))
        .map_err(|e| DashError::Terminal(e.to_string()))?;
    terminal
        .draw(|frame| draw_dashboard(frame, view, navigator, status))
        .map_err(|e| DashError::Terminal(e.to_string()))?;
    Ok(buffer_text(terminal.backend()))
}

pub fn buffer_text(backend: &TestBackend) -> String {
    let buffer = backend.buffer();
    let mut out = String::new();
    for y in 0..buffer.area.height {
        let mut line = String::new();
        for x in 0..buffer.area.width {
            line.push_str(buffer[(x, y)].symbol());
        }
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{render_dashboard, TableNavigator};
    use crate::hotkeys::TableAction;
    use crate::projector::{project, ProjectionOptions};
    use crate::types::{WorkflowPhase, WorkflowSnapshot};
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn snapshot(name: &str, start_offset: i64) -> WorkflowSnapshot {
        WorkflowSnapshot {
            name: name.to_string(),
            namespace: "argo".to_string(),
            started_at: Some(Utc.timestamp_opt(1_700_000_000 + start_offset, 0).unwrap()),
            finished_at: None,
            phase: WorkflowPhase::Running,
            progress: "1/3".to_string(),
            duration: Duration::ZERO,
        }
    }

    #[test]
    fn navigator_clamps_to_row_count() {
        let mut nav = TableNavigator::default();
        nav.rebuild(0);
        assert_eq!(nav.selected(), None);
        nav.apply(TableAction::LineDown, 5);
        assert_eq!(nav.selected(), None);

        nav.rebuild(3);
        assert_eq!(nav.selected(), Some(0));
        nav.apply(TableAction::GotoBottom, 5);
        assert_eq!(nav.selected(), Some(2));
        nav.apply(TableAction::LineDown, 5);
        assert_eq!(nav.selected(), Some(2));

        nav.rebuild(2);
        assert_eq!(nav.selected(), Some(1));
        nav.apply(TableAction::PageUp, 5);
        assert_eq!(nav.selected(), Some(0));
    }

    #[test]
    fn half_page_moves_half_the_page() {
        let mut nav = TableNavigator::default();
        nav.rebuild(20);
        nav.apply(TableAction::HalfPageDown, 8);
        assert_eq!(nav.selected(), Some(4));
        nav.apply(TableAction::PageDown, 8);
        assert_eq!(nav.selected(), Some(12));
        nav.apply(TableAction::HalfPageUp, 8);
        assert_eq!(nav.selected(), Some(8));
    }

    #[test]
    fn frame_shows_header_rows_and_status() {
        let workflows = [snapshot("wf-a", 0), snapshot("wf-b", 5)];
        let now = Utc.timestamp_opt(1_700_000_060, 0).unwrap();
        let view = project(workflows.iter(), 6, now, &ProjectionOptions::default());
        let mut nav = TableNavigator::default();
        nav.rebuild(view.rows.len());

        let frame = render_dashboard(&view, &mut nav, "argo | 2 workflows", 80, 8).expect("render");
        let lines = frame.lines().collect::<Vec<_>>();
        assert!(lines[0].starts_with("Name"));
        assert!(lines[0].contains("Completed"));
        assert!(lines[1].starts_with("wf-b"));
        assert!(lines[1].contains("55s ago"));
        assert!(lines[2].starts_with("wf-a"));
        assert_eq!(lines[7], "argo | 2 workflows");
    }

    #[test]
    fn empty_store_still_draws_header() {
        let view = project(
            std::iter::empty::<&WorkflowSnapshot>(),
            5,
            Utc::now(),
            &ProjectionOptions::default(),
        );
        let mut nav = TableNavigator::default();
        nav.rebuild(0);
        let frame = render_dashboard(&view, &mut nav, "argo | 0 workflows", 70, 6).expect("render");
        let first = frame.lines().next().unwrap_or_default();
        assert!(first.contains("Namespace"));
        assert!(first.contains("Progress"));
    }

    #[test]
    fn zero_height_viewport_draws_only_status() {
        let workflows = [snapshot("wf-a", 0)];
        let view = project(workflows.iter(), 0, Utc::now(), &ProjectionOptions::default());
        let mut nav = TableNavigator::default();
        nav.rebuild(view.rows.len());
        let frame = render_dashboard(&view, &mut nav, "status", 40, 3).expect("render");
        assert!(!frame.contains("wf-a"));
        assert!(frame.contains("status"));
    }
}
