use crate::config::ClusterConfig;
use crate::errors::DashError;
use crate::logging::append_run_log;
use crate::runtime::{ProcessRequest, ProcessRunner, StreamingChild};
use crate::types::{workflow_duration, WorkflowPhase, WorkflowSnapshot};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

pub const WORKFLOW_API: &str = "/apis/argoproj.io/v1alpha1";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub namespace: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArgoWorkflowStatus {
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub progress: Option<String>,
}

/// The subset of an Argo `Workflow` object the dashboard reads.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArgoWorkflow {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub status: ArgoWorkflowStatus,
}

impl ArgoWorkflow {
    pub fn into_snapshot(self) -> WorkflowSnapshot {
        let status = self.status;
        WorkflowSnapshot {
            name: self.metadata.name,
            namespace: self.metadata.namespace,
            started_at: status.started_at,
            finished_at: status.finished_at,
            phase: WorkflowPhase::parse(status.phase.as_deref().unwrap_or_default()),
            progress: status.progress.unwrap_or_default(),
            duration: workflow_duration(status.started_at, status.finished_at),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMeta {
    #[serde(default)]
    resource_version: String,
}

#[derive(Debug, Clone, Deserialize)]
struct WorkflowList {
    #[serde(default)]
    metadata: ListMeta,
    #[serde(default)]
    items: Vec<ArgoWorkflow>,
}

/// A consistent read of the namespace. A watch started from
/// `resource_version` sees every change made after the list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowListing {
    pub resource_version: String,
    pub workflows: Vec<WorkflowSnapshot>,
}

pub struct KubectlClient {
    runner: Arc<dyn ProcessRunner>,
    program: String,
    kubeconfig: Option<PathBuf>,
    namespace: String,
    request_timeout_seconds: u64,
}

impl KubectlClient {
    pub fn new(runner: Arc<dyn ProcessRunner>, cluster: &ClusterConfig) -> Self {
        Self {
            runner,
            program: cluster.kubectl.clone(),
            kubeconfig: cluster.kubeconfig.clone(),
            namespace: cluster.namespace.clone(),
            request_timeout_seconds: cluster.request_timeout_seconds,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn list_workflows(&self) -> Result<WorkflowListing, DashError> {
        let mut args = self.raw_args(self.collection_path());
        args.push(format!("--request-timeout={}s", self.request_timeout_seconds));

        let out = self.runner.run(self.request(args))?;
        if out.exit_code != 0 {
            append_run_log(
                "error",
                "kube.list.failed",
                json!({
                    "namespace": self.namespace,
                    "exit_code": out.exit_code,
                    "stderr": out.stderr,
                }),
            );
            return Err(DashError::Cluster(format!(
                "listing workflows in namespace {} failed (exit {}): {}",
                self.namespace,
                out.exit_code,
                out.stderr.trim()
            )));
        }

        let list: WorkflowList = serde_json::from_str(&out.stdout)
            .map_err(|e| DashError::Decode(format!("invalid workflow list json: {e}")))?;
        append_run_log(
            "info",
            "kube.list.fetched",
            json!({
                "namespace": self.namespace,
                "count": list.items.len(),
                "resource_version": list.metadata.resource_version,
            }),
        );
        Ok(WorkflowListing {
            resource_version: list.metadata.resource_version,
            workflows: list
                .items
                .into_iter()
                .map(ArgoWorkflow::into_snapshot)
                .collect(),
        })
    }

    /// Watches for changes made after `resource_version`. The server ends the
    /// stream after `duration_seconds`; an empty version watches from now.
    pub fn start_watch(
        &self,
        resource_version: &str,
        duration_seconds: u64,
    ) -> Result<StreamingChild, DashError> {
        let mut query = format!("watch=true&timeoutSeconds={duration_seconds}");
        if !resource_version.is_empty() {
            query.push_str("&resourceVersion=");
            query.push_str(resource_version);
        }
        let mut args = self.raw_args(format!("{}?{query}", self.collection_path()));
        args.push(format!(
            "--request-timeout={}s",
            duration_seconds + self.request_timeout_seconds
        ));
        append_run_log(
            "debug",
            "kube.watch.started",
            json!({
                "namespace": self.namespace,
                "resource_version": resource_version,
                "duration_seconds": duration_seconds,
            }),
        );
        self.runner.spawn_stream(self.request(args))
    }

    pub fn runner(&self) -> &dyn ProcessRunner {
        self.runner.as_ref()
    }

    fn collection_path(&self) -> String {
        format!("{WORKFLOW_API}/namespaces/{}/workflows", self.namespace)
    }

    // `get --raw` keeps the list's resourceVersion, which `get -o json`
    // replaces with an empty client-side List.
    fn raw_args(&self, path: String) -> Vec<String> {
        let mut args = Vec::new();
        if let Some(kubeconfig) = &self.kubeconfig {
            args.push("--kubeconfig".to_string());
            args.push(kubeconfig.display().to_string());
        }
        args.push("get".to_string());
        args.push("--raw".to_string());
        args.push(path);
        args
    }

    fn request(&self, args: Vec<String>) -> ProcessRequest {
        ProcessRequest {
            program: self.program.clone(),
            args,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ArgoWorkflow, KubectlClient};
    use crate::config::AppConfig;
    use crate::errors::DashError;
    use crate::runtime::{FakeProcessRunner, ProcessOutput};
    use crate::types::WorkflowPhase;
    use std::path::PathBuf;
    use std::sync::Arc;
    use std::time::Duration;

    fn client(runner: &FakeProcessRunner) -> KubectlClient {
        let mut cfg = AppConfig::default();
        cfg.cluster.kubeconfig = Some(PathBuf::from("/home/ops/.kube/config"));
        KubectlClient::new(Arc::new(runner.clone()), &cfg.cluster)
    }

    #[test]
    fn argo_object_maps_to_snapshot() {
        let wf: ArgoWorkflow = serde_json::from_str(
            r#"{
                "metadata": {"name": "hello-x7k2", "namespace": "argo", "uid": "abc"},
                "status": {
                    "phase": "Succeeded",
                    "startedAt": "2024-05-01T10:00:00Z",
                    "finishedAt": "2024-05-01T10:03:12Z",
                    "progress": "2/2"
                }
            }"#,
        )
        .expect("decode");
        let snapshot = wf.into_snapshot();
        assert_eq!(snapshot.name, "hello-x7k2");
        assert_eq!(snapshot.phase, WorkflowPhase::Succeeded);
        assert_eq!(snapshot.progress, "2/2");
        assert_eq!(snapshot.duration, Duration::from_secs(192));
    }

    #[test]
    fn freshly_submitted_workflow_has_no_status() {
        let wf: ArgoWorkflow =
            serde_json::from_str(r#"{"metadata": {"name": "new", "namespace": "argo"}}"#)
                .expect("decode");
        let snapshot = wf.into_snapshot();
        assert_eq!(snapshot.phase, WorkflowPhase::Unknown);
        assert_eq!(snapshot.started_at, None);
        assert_eq!(snapshot.finished_at, None);
        assert_eq!(snapshot.progress, "");
    }

    #[test]
    fn list_uses_namespace_and_kubeconfig() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 0,
            stdout: r#"{"kind": "WorkflowList", "metadata": {"resourceVersion": "4711"}, "items": [
                {"metadata": {"name": "a", "namespace": "argo"}, "status": {"phase": "Running"}}
            ]}"#
            .to_string(),
            stderr: String::new(),
        }));

        let listing = client(&runner).list_workflows().expect("list");
        assert_eq!(listing.workflows.len(), 1);
        assert_eq!(listing.resource_version, "4711");

        let spawned = runner.spawned();
        assert_eq!(spawned[0].program, "kubectl");
        assert_eq!(
            spawned[0].args,
            vec![
                "--kubeconfig",
                "/home/ops/.kube/config",
                "get",
                "--raw",
                "/apis/argoproj.io/v1alpha1/namespaces/argo/workflows",
                "--request-timeout=10s",
            ]
        );
    }

    #[test]
    fn list_failure_is_a_cluster_error() {
        let runner = FakeProcessRunner::default();
        runner.push_response(Ok(ProcessOutput {
            exit_code: 1,
            stdout: String::new(),
            stderr: "Unable to connect to the server\n".to_string(),
        }));
        let err = client(&runner).list_workflows().expect_err("must fail");
        assert!(matches!(err, DashError::Cluster(ref msg) if msg.contains("Unable to connect")));
    }

    #[test]
    fn watch_resumes_from_listed_resource_version() {
        let runner = FakeProcessRunner::default();
        runner.push_stream(Ok(Vec::new()));
        runner.push_stream(Ok(Vec::new()));
        let client = client(&runner);
        client.start_watch("4711", 30).expect("watch");
        client.start_watch("", 30).expect("watch");

        let spawned = runner.spawned();
        assert_eq!(
            spawned[0].args[2..],
            [
                "get",
                "--raw",
                "/apis/argoproj.io/v1alpha1/namespaces/argo/workflows?watch=true&timeoutSeconds=30&resourceVersion=4711",
                "--request-timeout=40s",
            ]
        );
        assert_eq!(
            spawned[1].args[4],
            "/apis/argoproj.io/v1alpha1/namespaces/argo/workflows?watch=true&timeoutSeconds=30"
        );
    }
}
