use assert_cmd::cargo::cargo_bin_cmd;

fn fixture(path: &str) -> String {
    format!("{}/tests/fixtures/{path}", env!("CARGO_MANIFEST_DIR"))
}

#[test]
fn help_lists_dashboard_flags() {
    let mut cmd = cargo_bin_cmd!("wfdash");
    cmd.arg("--help");
    let out = cmd.assert().success();
    let stdout = String::from_utf8(out.get_output().stdout.clone()).expect("utf8");

    assert!(stdout.contains("--namespace"));
    assert!(stdout.contains("--kubeconfig"));
    assert!(stdout.contains("--kubectl"));
    assert!(stdout.contains("--config"));
}

#[test]
fn invalid_config_path_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("wfdash");
    cmd.arg("--config").arg(fixture("configs/missing.toml"));
    let out = cmd.assert().failure().code(1);
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("io error"));
}

#[test]
fn empty_namespace_is_rejected() {
    let mut cmd = cargo_bin_cmd!("wfdash");
    cmd.arg("--config").arg(fixture("configs/empty-namespace.toml"));
    let out = cmd.assert().failure().code(1);
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("cluster.namespace must not be empty"));
}

#[test]
fn piped_stdout_is_refused_before_contacting_cluster() {
    let mut cmd = cargo_bin_cmd!("wfdash");
    cmd.arg("--config")
        .arg(fixture("configs/minimal.toml"))
        .arg("--kubectl")
        .arg("/nonexistent/kubectl");
    let out = cmd.assert().failure().code(1);
    let stderr = String::from_utf8(out.get_output().stderr.clone()).expect("utf8");
    assert!(stderr.contains("requires an interactive terminal"));
}

#[test]
fn unknown_flag_exits_nonzero() {
    let mut cmd = cargo_bin_cmd!("wfdash");
    cmd.arg("--all-namespaces");
    cmd.assert().failure().code(1);
}
