use crate::config::AppConfig;
use crate::controller::{Controller, LoopEvent, LoopState};
use crate::errors::DashError;
use crate::kube::KubectlClient;
use crate::logging::append_run_log;
use crate::projector::ProjectionOptions;
use crate::runtime::{Clock, ProductionRuntime};
use crate::types::WorkflowEvent;
use crate::watch::WorkflowWatcher;
use crossterm::event::{self, Event, KeyEventKind};
use crossterm::execute;
use crossterm::terminal::{
    disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen,
};
use ratatui::backend::{Backend, CrosstermBackend};
use ratatui::Terminal;
use serde_json::json;
use std::io::{self, Stdout};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tokio::sync::mpsc::{self, Receiver, Sender};

const INPUT_POLL: Duration = Duration::from_millis(250);

/// Drains `events` one at a time until the controller terminates or every
/// producer is gone. Draws after each event that leaves the loop running.
pub fn run_event_loop<B: Backend>(
    terminal: &mut Terminal<B>,
    controller: &mut Controller,
    events: &mut Receiver<LoopEvent>,
) -> Result<(), DashError> {
    while let Some(event) = events.blocking_recv() {
        if controller.handle(event) == LoopState::Terminating {
            return Ok(());
        }
        terminal
            .draw(|frame| controller.draw(frame))
            .map_err(|e| DashError::Terminal(e.to_string()))?;
    }
    append_run_log("warn", "loop.producers_gone", json!({}));
    Ok(())
}

/// Lists once (fatal on failure), then runs the dashboard until quit.
pub fn run_dashboard(runtime: &ProductionRuntime, cfg: &AppConfig) -> Result<(), DashError> {
    let client = KubectlClient::new(runtime.process_runner.clone(), &cfg.cluster);
    let mut watcher = WorkflowWatcher::new(client, runtime.clock.clone(), &cfg.watch);
    let initial = watcher.sync()?;

    let mut controller = Controller::new(
        runtime.clock.clone(),
        cfg.cluster.namespace.clone(),
        ProjectionOptions {
            unset_timestamp: cfg.display.unset_timestamp.clone(),
        },
    );
    for event in initial {
        controller.apply_workflow(event);
    }
    append_run_log(
        "info",
        "dashboard.synced",
        json!({ "namespace": cfg.cluster.namespace, "workflows": controller.store().len() }),
    );

    let (tx, mut rx) = mpsc::channel(cfg.watch.queue_capacity);
    let (width, height) =
        crossterm::terminal::size().map_err(|e| DashError::Terminal(e.to_string()))?;
    let _ = tx.try_send(LoopEvent::Resize { width, height });

    let mut session = TerminalSession::enter()?;
    watcher.spawn(forward_watch_events(tx.clone()));
    spawn_tick_thread(
        runtime.clock.clone(),
        Duration::from_secs(cfg.display.tick_seconds),
        tx.clone(),
    );
    spawn_input_thread(tx);

    let result = run_event_loop(session.terminal_mut(), &mut controller, &mut rx);
    drop(rx);
    drop(session);
    result
}

/// Adapts watcher output to loop events. Returns `false` once the loop is gone.
pub fn forward_watch_events(
    tx: Sender<LoopEvent>,
) -> impl FnMut(Result<WorkflowEvent, DashError>) -> bool + Send + 'static {
    move |result| {
        let event = match result {
            Ok(event) => LoopEvent::Workflow(event),
            Err(error) => LoopEvent::WatchFailed(error.to_string()),
        };
        tx.blocking_send(event).is_ok()
    }
}

/// Terminal input the loop cares about; everything else is dropped.
pub fn translate_terminal_event(event: Event) -> Option<LoopEvent> {
    match event {
        Event::Key(key) if key.kind != KeyEventKind::Release => Some(LoopEvent::Key(key)),
        Event::Resize(width, height) => Some(LoopEvent::Resize { width, height }),
        _ => None,
    }
}

pub fn spawn_input_thread(tx: Sender<LoopEvent>) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        if tx.is_closed() {
            return;
        }
        match event::poll(INPUT_POLL) {
            Ok(false) => continue,
            Ok(true) => {}
            Err(error) => {
                append_run_log(
                    "error",
                    "input.poll.failed",
                    json!({ "error": error.to_string() }),
                );
                return;
            }
        }
        let event = match event::read() {
            Ok(event) => event,
            Err(error) => {
                append_run_log(
                    "error",
                    "input.read.failed",
                    json!({ "error": error.to_string() }),
                );
                return;
            }
        };
        if let Some(event) = translate_terminal_event(event) {
            if tx.blocking_send(event).is_err() {
                return;
            }
        }
    })
}

pub fn spawn_tick_thread(
    clock: Arc<dyn Clock>,
    every: Duration,
    tx: Sender<LoopEvent>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || loop {
        if clock.sleep_until(clock.now() + every).is_err() {
            return;
        }
        if tx.blocking_send(LoopEvent::Tick).is_err() {
            return;
        }
    })
}

/// Raw mode plus alternate screen for as long as the value lives.
pub struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    pub fn enter() -> Result<Self, DashError> {
        enable_raw_mode().map_err(|e| DashError::Terminal(e.to_string()))?;
        let mut stdout = io::stdout();
        if let Err(error) = execute!(stdout, EnterAlternateScreen) {
            let _ = disable_raw_mode();
            return Err(DashError::Terminal(error.to_string()));
        }
        let terminal = match Terminal::new(CrosstermBackend::new(stdout)) {
            Ok(terminal) => terminal,
            Err(error) => {
                let _ = disable_raw_mode();
                let _ = execute!(io::stdout(), LeaveAlternateScreen);
                return Err(DashError::Terminal(error.to_string()));
            }
        };
        Ok(Self { terminal })
    }

    pub fn terminal_mut(&mut self) -> &mut Terminal<CrosstermBackend<Stdout>> {
        &mut self.terminal
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen);
        let _ = self.terminal.show_cursor();
    }
}
