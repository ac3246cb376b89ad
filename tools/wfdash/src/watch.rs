use crate::config::WatchConfig;
use crate::errors::DashError;
use crate::kube::{ArgoWorkflow, KubectlClient};
use crate::logging::append_run_log;
use crate::runtime::Clock;
use crate::types::{EventKind, WorkflowEvent, WorkflowKey};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// One frame of a Kubernetes watch response.
#[derive(Debug, Clone, Deserialize)]
pub struct RawWatchEvent {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub object: Value,
}

impl RawWatchEvent {
    /// `Ok(None)` for bookkeeping events that carry no workflow change.
    pub fn into_event(self) -> Result<Option<WorkflowEvent>, DashError> {
        let kind = match self.kind.as_str() {
            "ADDED" => EventKind::Added,
            "MODIFIED" => EventKind::Modified,
            "DELETED" => EventKind::Deleted,
            "BOOKMARK" => return Ok(None),
            "ERROR" => {
                let message = self
                    .object
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("watch error without message");
                return Err(DashError::Cluster(message.to_string()));
            }
            other => {
                return Err(DashError::Decode(format!("unknown watch event type {other:?}")));
            }
        };
        let workflow: ArgoWorkflow = serde_json::from_value(self.object)
            .map_err(|e| DashError::Decode(format!("invalid workflow object: {e}")))?;
        let snapshot = workflow.into_snapshot();
        Ok(Some(WorkflowEvent {
            kind,
            key: snapshot.key(),
            snapshot: Some(snapshot),
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    Exhausted,
    ConsumerClosed,
}

/// Receives decoded events; returning `false` means nobody is listening any more.
pub type EventSink<'a> = dyn FnMut(Result<WorkflowEvent, DashError>) -> bool + 'a;

/// Decodes a stream of concatenated watch objects. Per-event problems go to
/// `sink`; a broken JSON stream ends decoding with an error.
pub fn decode_watch_stream<R: Read>(
    reader: R,
    sink: &mut EventSink<'_>,
) -> Result<StreamEnd, DashError> {
    let stream = serde_json::Deserializer::from_reader(reader).into_iter::<RawWatchEvent>();
    for item in stream {
        let raw = item.map_err(|e| DashError::Decode(format!("watch stream: {e}")))?;
        let delivered = match raw.into_event() {
            Ok(Some(event)) => sink(Ok(event)),
            Ok(None) => true,
            Err(error) => sink(Err(error)),
        };
        if !delivered {
            return Ok(StreamEnd::ConsumerClosed);
        }
    }
    Ok(StreamEnd::Exhausted)
}

/// Local-cache side of the watch: remembers which workflows it has reported so
/// a relist can report the ones that disappeared while disconnected.
pub struct WorkflowWatcher {
    client: KubectlClient,
    clock: Arc<dyn Clock>,
    resync: Duration,
    backoff: Duration,
    resource_version: String,
    known: BTreeMap<String, WorkflowKey>,
}

impl WorkflowWatcher {
    pub fn new(client: KubectlClient, clock: Arc<dyn Clock>, cfg: &WatchConfig) -> Self {
        Self {
            client,
            clock,
            resync: Duration::from_secs(cfg.resync_seconds),
            backoff: Duration::from_secs(cfg.reconnect_backoff_seconds),
            resource_version: String::new(),
            known: BTreeMap::new(),
        }
    }

    /// Lists the namespace and returns the events that bring a consumer from the
    /// previously reported state to the listed one. The next watch resumes
    /// from this list.
    pub fn sync(&mut self) -> Result<Vec<WorkflowEvent>, DashError> {
        let listing = self.client.list_workflows()?;
        let mut seen = BTreeMap::new();
        let mut events = Vec::with_capacity(listing.workflows.len());

        for snapshot in listing.workflows {
            let key = snapshot.key();
            let event = if self.known.contains_key(&key.name) {
                WorkflowEvent::modified(snapshot)
            } else {
                WorkflowEvent::added(snapshot)
            };
            if !key.name.is_empty() {
                seen.insert(key.name.clone(), key);
            }
            events.push(event);
        }

        for (name, key) in &self.known {
            if !seen.contains_key(name) {
                events.push(WorkflowEvent::deleted(key.clone()));
            }
        }

        self.known = seen;
        self.resource_version = listing.resource_version;
        Ok(events)
    }

    pub fn resource_version(&self) -> &str {
        &self.resource_version
    }

    /// Runs one bounded watch cycle, forwarding every change to `sink`.
    pub fn watch_once(&mut self, sink: &mut EventSink<'_>) -> Result<StreamEnd, DashError> {
        let child = self
            .client
            .start_watch(&self.resource_version, self.resync.as_secs().max(1))?;
        let handle = child.handle;
        let known = &mut self.known;
        let mut tracking_sink = |result: Result<WorkflowEvent, DashError>| {
            if let Ok(event) = &result {
                track(known, event);
            }
            sink(result)
        };
        let result = decode_watch_stream(child.stdout, &mut tracking_sink);

        match result {
            Ok(StreamEnd::Exhausted) => {
                let out = self.client.runner().wait(handle)?;
                append_run_log(
                    "debug",
                    "watch.cycle.ended",
                    json!({ "exit_code": out.exit_code, "stderr": out.stderr }),
                );
                if out.exit_code != 0 {
                    return Err(DashError::Cluster(format!(
                        "watching workflows in namespace {} failed (exit {}): {}",
                        self.client.namespace(),
                        out.exit_code,
                        out.stderr.trim()
                    )));
                }
                Ok(StreamEnd::Exhausted)
            }
            Ok(StreamEnd::ConsumerClosed) => {
                let _ = self.client.runner().kill(handle);
                Ok(StreamEnd::ConsumerClosed)
            }
            Err(error) => {
                let _ = self.client.runner().kill(handle);
                Err(error)
            }
        }
    }

    /// Relist and watch until the consumer goes away. Failures are reported to
    /// `sink` and retried after the backoff.
    pub fn run(mut self, sink: &mut EventSink<'_>) {
        append_run_log(
            "info",
            "watch.run.started",
            json!({ "namespace": self.client.namespace() }),
        );
        loop {
            match self.watch_once(sink) {
                Ok(StreamEnd::ConsumerClosed) => break,
                Ok(StreamEnd::Exhausted) => {}
                Err(error) => {
                    append_run_log(
                        "warn",
                        "watch.cycle.failed",
                        json!({ "error": error.to_string() }),
                    );
                    if !sink(Err(error)) {
                        break;
                    }
                    self.pause();
                }
            }

            match self.sync() {
                Ok(events) => {
                    if !events.into_iter().all(|event| sink(Ok(event))) {
                        break;
                    }
                }
                Err(error) => {
                    append_run_log(
                        "warn",
                        "watch.relist.failed",
                        json!({ "error": error.to_string() }),
                    );
                    if !sink(Err(error)) {
                        break;
                    }
                    self.pause();
                }
            }
        }
        append_run_log("info", "watch.run.stopped", json!({}));
    }

    pub fn spawn<F>(self, mut sink: F) -> thread::JoinHandle<()>
    where
        F: FnMut(Result<WorkflowEvent, DashError>) -> bool + Send + 'static,
    {
        thread::spawn(move || self.run(&mut sink))
    }

    fn pause(&self) {
        let _ = self.clock.sleep_until(self.clock.now() + self.backoff);
    }
}

fn track(known: &mut BTreeMap<String, WorkflowKey>, event: &WorkflowEvent) {
    if event.key.name.is_empty() {
        return;
    }
    match event.kind {
        EventKind::Added | EventKind::Modified => {
            known.insert(event.key.name.clone(), event.key.clone());
        }
        EventKind::Deleted => {
            known.remove(&event.key.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{decode_watch_stream, StreamEnd, WorkflowWatcher};
    use crate::config::AppConfig;
    use crate::errors::DashError;
    use crate::kube::KubectlClient;
    use crate::runtime::{FakeClock, FakeProcessRunner, ProcessOutput};
    use crate::types::{EventKind, WorkflowEvent};
    use std::sync::Arc;

    const STREAM: &str = r#"{
    "type": "ADDED",
    "object": {"metadata": {"name": "wf-a", "namespace": "argo"}, "status": {"phase": "Running"}}
}
{"type": "BOOKMARK", "object": {"metadata": {"resourceVersion": "12"}}}
{"type": "MODIFIED", "object": {"metadata": {"name": "wf-a", "namespace": "argo"}, "status": {"phase": "Succeeded"}}}
{"type": "DELETED", "object": {"metadata": {"name": "wf-a", "namespace": "argo"}}}
"#;

    fn list_output(names: &[&str]) -> ProcessOutput {
        let items = names
            .iter()
            .map(|name| format!(r#"{{"metadata": {{"name": "{name}", "namespace": "argo"}}}}"#))
            .collect::<Vec<_>>()
            .join(",");
        ProcessOutput {
            exit_code: 0,
            stdout: format!(r#"{{"metadata": {{"resourceVersion": "77"}}, "items": [{items}]}}"#),
            stderr: String::new(),
        }
    }

    fn watcher_with_clock(runner: &FakeProcessRunner, clock: &FakeClock) -> WorkflowWatcher {
        let cfg = AppConfig::default();
        WorkflowWatcher::new(
            KubectlClient::new(Arc::new(runner.clone()), &cfg.cluster),
            Arc::new(clock.clone()),
            &cfg.watch,
        )
    }

    fn watcher(runner: &FakeProcessRunner) -> WorkflowWatcher {
        watcher_with_clock(runner, &FakeClock::default())
    }

    #[test]
    fn decodes_concatenated_pretty_printed_events() {
        let mut events = Vec::new();
        let end = decode_watch_stream(STREAM.as_bytes(), &mut |result| {
            events.push(result.expect("event"));
            true
        })
        .expect("decode");

        assert_eq!(end, StreamEnd::Exhausted);
        let kinds = events.iter().map(|event| event.kind).collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec![EventKind::Added, EventKind::Modified, EventKind::Deleted]
        );
    }

    #[test]
    fn error_events_are_reported_and_decoding_continues() {
        let stream = r#"{"type": "ERROR", "object": {"kind": "Status", "message": "too old resource version"}}
{"type": "ADDED", "object": {"metadata": {"name": "wf-b", "namespace": "argo"}}}"#;
        let mut results = Vec::new();
        decode_watch_stream(stream.as_bytes(), &mut |result| {
            results.push(result);
            true
        })
        .expect("decode");

        assert!(matches!(&results[0], Err(DashError::Cluster(msg)) if msg == "too old resource version"));
        assert!(matches!(&results[1], Ok(event) if event.key.name == "wf-b"));
    }

    #[test]
    fn closed_consumer_stops_decoding() {
        let mut delivered = 0;
        let end = decode_watch_stream(STREAM.as_bytes(), &mut |_| {
            delivered += 1;
            false
        })
        .expect("decode");
        assert_eq!(end, StreamEnd::ConsumerClosed);
        assert_eq!(delivered, 1);
    }

    #[test]
    fn truncated_stream_is_a_decode_error() {
        let result = decode_watch_stream(r#"{"type": "ADDED", "obj"#.as_bytes(), &mut |_| true);
        assert!(matches!(result, Err(DashError::Decode(_))));
    }

    #[test]
    fn relist_reports_vanished_workflows_as_deleted() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(list_output(&["wf-a", "wf-b"])));
        runner.push_response(Ok(list_output(&["wf-b", "wf-c"])));
        let mut watcher = watcher(&runner);

        let first = watcher.sync().expect("first sync");
        assert!(first.iter().all(|event| event.kind == EventKind::Added));

        let second = watcher.sync().expect("second sync");
        let summary = second
            .iter()
            .map(|event| (event.kind, event.key.name.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            summary,
            vec![
                (EventKind::Modified, "wf-b"),
                (EventKind::Added, "wf-c"),
                (EventKind::Deleted, "wf-a"),
            ]
        );
    }

    #[test]
    fn watch_cycle_updates_known_set() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(list_output(&["wf-a"])));
        runner.push_stream(Ok(STREAM.as_bytes().to_vec()));
        runner.push_response(Ok(list_output(&[])));
        let mut watcher = watcher(&runner);
        watcher.sync().expect("sync");

        let mut forwarded: Vec<WorkflowEvent> = Vec::new();
        let end = watcher
            .watch_once(&mut |result| {
                forwarded.push(result.expect("event"));
                true
            })
            .expect("watch");
        assert_eq!(end, StreamEnd::Exhausted);
        assert_eq!(forwarded.len(), 3);

        // wf-a was deleted during the watch, so an empty relist reports nothing.
        assert!(watcher.sync().expect("relist").is_empty());
    }

    #[test]
    fn run_reports_failures_and_stops_when_consumer_leaves() {
        let runner = FakeProcessRunner::default();
        runner.push_stream(Err(DashError::Process("kubectl: not found".to_string())));
        let watcher = watcher(&runner);

        let mut failures = Vec::new();
        watcher.run(&mut |result| {
            if let Err(error) = result {
                failures.push(error);
            }
            false
        });

        assert_eq!(
            failures,
            vec![DashError::Process("kubectl: not found".to_string())]
        );
        assert!(runner.kills().is_empty());
    }

    #[test]
    fn failing_watch_process_is_reported_and_backed_off() {
        let runner = FakeProcessRunner::default();
        runner.push_stream_with_exit(
            Vec::new(),
            ProcessOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Error from server (Forbidden): cannot watch workflows\n".to_string(),
            },
        );
        runner.push_response(Ok(list_output(&[])));
        runner.push_stream_with_exit(
            Vec::new(),
            ProcessOutput {
                exit_code: 1,
                stdout: String::new(),
                stderr: "Error from server (Forbidden): cannot watch workflows\n".to_string(),
            },
        );
        let clock = FakeClock::default();
        let watcher = watcher_with_clock(&runner, &clock);

        let mut failures = Vec::new();
        watcher.run(&mut |result| {
            if let Err(error) = result {
                failures.push(error);
            }
            failures.len() < 2
        });

        assert_eq!(failures.len(), 2);
        assert!(matches!(
            &failures[0],
            DashError::Cluster(msg) if msg.contains("exit 1") && msg.contains("cannot watch workflows")
        ));
        // One backoff between the first failure and the relist; the second
        // failure closes the consumer before another pause.
        assert_eq!(clock.sleeps().len(), 1);
        assert_eq!(runner.spawned().len(), 3);
    }

    #[test]
    fn watch_starts_from_the_listed_resource_version() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(list_output(&["wf-a"])));
        runner.push_stream(Ok(
            br#"{"type": "ADDED", "object": {"metadata": {"name": "wf-gap", "namespace": "argo"}}}"#
                .to_vec(),
        ));
        let mut watcher = watcher(&runner);
        watcher.sync().expect("sync");
        assert_eq!(watcher.resource_version(), "77");

        let mut names = Vec::new();
        watcher
            .watch_once(&mut |result| {
                names.push(result.expect("event").key.name);
                true
            })
            .expect("watch");

        assert_eq!(names, vec!["wf-gap"]);
        let watch_path = &runner.spawned()[1].args[2];
        assert!(watch_path.ends_with("&resourceVersion=77"), "{watch_path}");
    }
}
