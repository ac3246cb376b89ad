use crate::errors::DashError;
use std::collections::{HashMap, VecDeque};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::SystemTime;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRequest {
    pub program: String,
    pub args: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

/// A running child whose stdout is consumed incrementally.
pub struct StreamingChild {
    pub handle: u64,
    pub stdout: Box<dyn Read + Send>,
}

pub trait Clock: Send + Sync {
    fn now(&self) -> SystemTime;
    fn sleep_until(&self, deadline: SystemTime) -> Result<(), DashError>;
}

pub trait ProcessRunner: Send + Sync {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, DashError>;
    fn spawn_stream(&self, request: ProcessRequest) -> Result<StreamingChild, DashError>;
    fn wait(&self, handle: u64) -> Result<ProcessOutput, DashError>;
    fn kill(&self, handle: u64) -> Result<(), DashError>;

    fn run(&self, request: ProcessRequest) -> Result<ProcessOutput, DashError> {
        let handle = self.spawn(request)?;
        self.wait(handle)
    }
}

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, DashError>;
    fn exists(&self, path: &Path) -> bool;
}

pub trait Terminal: Send + Sync {
    fn stdout_is_tty(&self) -> bool;
}

pub struct ProductionClock;

impl Clock for ProductionClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), DashError> {
        let now = SystemTime::now();
        if let Ok(duration) = deadline.duration_since(now) {
            std::thread::sleep(duration);
        }
        Ok(())
    }
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DashError> {
        std::fs::read_to_string(path)
            .map_err(|e| DashError::Io(format!("{}: {e}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

#[derive(Default)]
struct ProcessState {
    next_handle: u64,
    children: HashMap<u64, std::process::Child>,
    stderr_drains: HashMap<u64, JoinHandle<String>>,
}

pub struct ProductionProcessRunner {
    state: Mutex<ProcessState>,
}

impl ProductionProcessRunner {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ProcessState::default()),
        }
    }

    fn start(&self, request: &ProcessRequest) -> Result<u64, DashError> {
        let mut cmd = std::process::Command::new(&request.program);
        cmd.args(&request.args);
        cmd.stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());

        let child = cmd
            .spawn()
            .map_err(|e| DashError::Process(format!("{}: {e}", request.program)))?;
        let mut state = self.lock()?;
        let handle = state.next_handle;
        state.next_handle += 1;
        state.children.insert(handle, child);
        Ok(handle)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ProcessState>, DashError> {
        self.state
            .lock()
            .map_err(|_| DashError::Process("process lock poisoned".to_string()))
    }

    fn take_child(
        &self,
        handle: u64,
    ) -> Result<(std::process::Child, Option<JoinHandle<String>>), DashError> {
        let mut state = self.lock()?;
        let child = state
            .children
            .remove(&handle)
            .ok_or_else(|| DashError::Process(format!("unknown handle {handle}")))?;
        Ok((child, state.stderr_drains.remove(&handle)))
    }
}

impl Default for ProductionProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner for ProductionProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, DashError> {
        self.start(&request)
    }

    fn spawn_stream(&self, request: ProcessRequest) -> Result<StreamingChild, DashError> {
        let handle = self.start(&request)?;
        let mut state = self.lock()?;
        let child = state
            .children
            .get_mut(&handle)
            .ok_or_else(|| DashError::Process(format!("unknown handle {handle}")))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DashError::Process(format!("{} has no stdout pipe", request.program)))?;
        // stderr is read concurrently so a noisy child cannot fill the pipe
        // and stall while stdout is still being consumed.
        if let Some(mut stderr) = child.stderr.take() {
            let drain = std::thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            });
            state.stderr_drains.insert(handle, drain);
        }
        Ok(StreamingChild {
            handle,
            stdout: Box::new(stdout),
        })
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, DashError> {
        let (child, drain) = self.take_child(handle)?;
        let output = child
            .wait_with_output()
            .map_err(|e| DashError::Process(e.to_string()))?;
        let stderr = match drain {
            Some(drain) => drain
                .join()
                .map_err(|_| DashError::Process("stderr reader panicked".to_string()))?,
            None => String::from_utf8_lossy(&output.stderr).to_string(),
        };
        Ok(ProcessOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr,
        })
    }

    fn kill(&self, handle: u64) -> Result<(), DashError> {
        let (mut child, drain) = self.take_child(handle)?;
        child
            .kill()
            .map_err(|e| DashError::Process(e.to_string()))?;
        let _ = child.wait();
        if let Some(drain) = drain {
            let _ = drain.join();
        }
        Ok(())
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdout_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdout())
    }
}

pub struct ProductionRuntime {
    pub clock: Arc<dyn Clock>,
    pub file_system: Arc<dyn FileSystem>,
    pub process_runner: Arc<dyn ProcessRunner>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            clock: Arc::new(ProductionClock),
            file_system: Arc::new(ProductionFileSystem),
            process_runner: Arc::new(ProductionProcessRunner::new()),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct FakeClock {
    now: Arc<Mutex<SystemTime>>,
    sleeps: Arc<Mutex<Vec<SystemTime>>>,
}

impl FakeClock {
    pub fn new(now: SystemTime) -> Self {
        Self {
            now: Arc::new(Mutex::new(now)),
            sleeps: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn set(&self, now: SystemTime) {
        *self.now.lock().expect("clock lock") = now;
    }

    pub fn sleeps(&self) -> Vec<SystemTime> {
        self.sleeps.lock().expect("sleep lock").clone()
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new(SystemTime::UNIX_EPOCH)
    }
}

impl Clock for FakeClock {
    fn now(&self) -> SystemTime {
        *self.now.lock().expect("clock lock")
    }

    fn sleep_until(&self, deadline: SystemTime) -> Result<(), DashError> {
        self.sleeps.lock().expect("sleep lock").push(deadline);
        *self.now.lock().expect("clock lock") = deadline;
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.files
            .lock()
            .expect("files lock")
            .insert(path.into(), contents.into());
        fs
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, DashError> {
        self.files
            .lock()
            .expect("files lock")
            .get(path)
            .cloned()
            .ok_or_else(|| DashError::Io(format!("missing file {}", path.display())))
    }

    fn exists(&self, path: &Path) -> bool {
        self.files.lock().expect("files lock").contains_key(path)
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self { is_tty }
    }
}

impl Terminal for FakeTerminal {
    fn stdout_is_tty(&self) -> bool {
        self.is_tty
    }
}

type ScriptedStream = Result<(Vec<u8>, ProcessOutput), DashError>;

/// Scripted process runner. `run` consumes queued responses in order and
/// `spawn_stream` consumes queued stdout payloads in order. A streamed child
/// reports its scripted exit once waited on.
#[derive(Default, Clone)]
pub struct FakeProcessRunner {
    responses: Arc<Mutex<VecDeque<Result<ProcessOutput, DashError>>>>,
    streams: Arc<Mutex<VecDeque<ScriptedStream>>>,
    stream_exits: Arc<Mutex<HashMap<u64, ProcessOutput>>>,
    spawned: Arc<Mutex<Vec<ProcessRequest>>>,
    kills: Arc<Mutex<Vec<u64>>>,
    next_handle: Arc<Mutex<u64>>,
}

impl FakeProcessRunner {
    pub fn push_response(&self, output: Result<ProcessOutput, DashError>) {
        self.responses
            .lock()
            .expect("responses lock")
            .push_back(output);
    }

    /// Queues a stream whose child exits 0 once stdout is drained.
    pub fn push_stream(&self, stdout: Result<Vec<u8>, DashError>) {
        let exit = ProcessOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        self.streams
            .lock()
            .expect("streams lock")
            .push_back(stdout.map(|bytes| (bytes, exit)));
    }

    pub fn push_stream_with_exit(&self, stdout: Vec<u8>, exit: ProcessOutput) {
        self.streams
            .lock()
            .expect("streams lock")
            .push_back(Ok((stdout, exit)));
    }

    pub fn spawned(&self) -> Vec<ProcessRequest> {
        self.spawned.lock().expect("spawned lock").clone()
    }

    pub fn kills(&self) -> Vec<u64> {
        self.kills.lock().expect("kills lock").clone()
    }

    fn next_handle(&self) -> u64 {
        let mut next = self.next_handle.lock().expect("next lock");
        let handle = *next;
        *next += 1;
        handle
    }
}

impl ProcessRunner for FakeProcessRunner {
    fn spawn(&self, request: ProcessRequest) -> Result<u64, DashError> {
        self.spawned.lock().expect("spawned lock").push(request);
        Ok(self.next_handle())
    }

    fn spawn_stream(&self, request: ProcessRequest) -> Result<StreamingChild, DashError> {
        self.spawned.lock().expect("spawned lock").push(request);
        let (bytes, exit) = self
            .streams
            .lock()
            .expect("streams lock")
            .pop_front()
            .unwrap_or_else(|| Err(DashError::Process("no fake stream queued".to_string())))?;
        let handle = self.next_handle();
        self.stream_exits
            .lock()
            .expect("stream exits lock")
            .insert(handle, exit);
        Ok(StreamingChild {
            handle,
            stdout: Box::new(std::io::Cursor::new(bytes)),
        })
    }

    fn wait(&self, handle: u64) -> Result<ProcessOutput, DashError> {
        if let Some(exit) = self
            .stream_exits
            .lock()
            .expect("stream exits lock")
            .remove(&handle)
        {
            return Ok(exit);
        }
        self.responses
            .lock()
            .expect("responses lock")
            .pop_front()
            .unwrap_or_else(|| Err(DashError::Process("no fake response queued".to_string())))
    }

    fn kill(&self, handle: u64) -> Result<(), DashError> {
        self.kills.lock().expect("kills lock").push(handle);
        self.stream_exits
            .lock()
            .expect("stream exits lock")
            .remove(&handle);
        Ok(())
    }
}
