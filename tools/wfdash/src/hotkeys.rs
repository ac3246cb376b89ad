use crossterm::event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotkeyBinding {
    pub key: &'static str,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotkeyAction {
    Quit,
    Table(TableAction),
}

/// Navigation handled by the table display state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableAction {
    LineUp,
    LineDown,
    PageUp,
    PageDown,
    HalfPageUp,
    HalfPageDown,
    GotoTop,
    GotoBottom,
}

pub const DASHBOARD_BINDINGS: [HotkeyBinding; 6] = [
    HotkeyBinding {
        key: "q",
        action: "quit",
    },
    HotkeyBinding {
        key: "↑/k",
        action: "up",
    },
    HotkeyBinding {
        key: "↓/j",
        action: "down",
    },
    HotkeyBinding {
        key: "b/pgup",
        action: "page up",
    },
    HotkeyBinding {
        key: "f/pgdn",
        action: "page down",
    },
    HotkeyBinding {
        key: "g/G",
        action: "top/bottom",
    },
];

pub fn dashboard_controls_legend() -> String {
    let parts = DASHBOARD_BINDINGS
        .iter()
        .map(|binding| format!("{} {}", binding.key, binding.action))
        .collect::<Vec<_>>();
    format!("Keys: {}", parts.join("  "))
}

/// Maps a key press to a dashboard action. Releases and repeats of
/// non-navigation keys resolve to `None`.
pub fn action_for_key(key: &KeyEvent) -> Option<HotkeyAction> {
    if key.kind == KeyEventKind::Release {
        return None;
    }
    let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
    match key.code {
        KeyCode::Char('c') if ctrl => Some(HotkeyAction::Quit),
        KeyCode::Char('u') if ctrl => Some(HotkeyAction::Table(TableAction::HalfPageUp)),
        KeyCode::Char('d') if ctrl => Some(HotkeyAction::Table(TableAction::HalfPageDown)),
        _ if ctrl => None,
        KeyCode::Char('q') => Some(HotkeyAction::Quit),
        KeyCode::Up | KeyCode::Char('k') => Some(HotkeyAction::Table(TableAction::LineUp)),
        KeyCode::Down | KeyCode::Char('j') => Some(HotkeyAction::Table(TableAction::LineDown)),
        KeyCode::PageUp | KeyCode::Char('b') => Some(HotkeyAction::Table(TableAction::PageUp)),
        KeyCode::PageDown | KeyCode::Char('f') | KeyCode::Char(' ') => {
            Some(HotkeyAction::Table(TableAction::PageDown))
        }
        KeyCode::Char('u') => Some(HotkeyAction::Table(TableAction::HalfPageUp)),
        KeyCode::Char('d') => Some(HotkeyAction::Table(TableAction::HalfPageDown)),
        KeyCode::Home | KeyCode::Char('g') => Some(HotkeyAction::Table(TableAction::GotoTop)),
        KeyCode::End | KeyCode::Char('G') => Some(HotkeyAction::Table(TableAction::GotoBottom)),
        _ => None,
    }
}
