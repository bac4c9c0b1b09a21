//! A configured build compiled through external commands.

#![cfg(unix)]

use kiln_build::{BuildGraph, BuildRequest, Compiler, Orchestrator, ProcessCompiler, TaskState};
use kiln_cache::CompileResult;
use kiln_common::{ClientId, ProjectId};
use kiln_config::{load_config, resolve};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const CONFIG: &str = r#"
[server]
max_parallel = 2

[projects.core]
sources = "core/src"
command = ["/bin/sh", "-c", "cp \"$@\" \"$0\"", "{classes_dir}", "{sources}"]

[projects.app]
sources = "app/src"
dependencies = ["core"]
command = ["/bin/sh", "-c", "echo 'App.scala:3: error: not found: value x' >&2; exit 1"]
"#;

#[tokio::test]
async fn configured_commands_drive_the_build() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::write(root.join("kiln.toml"), CONFIG).unwrap();
    for (project, file) in [("core", "Core.scala"), ("app", "App.scala")] {
        let src = root.join(project).join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join(file), format!("object {project}")).unwrap();
    }

    let build = resolve(&load_config(root).unwrap(), root).unwrap();
    let compiler: Arc<dyn Compiler> = Arc::new(ProcessCompiler::from_build(&build, root));
    let graph = BuildGraph::new(build.projects.iter().map(|p| p.project.clone())).unwrap();
    let orch = Orchestrator::new(graph, compiler).with_settings(&build.server);

    let request = BuildRequest::new([ProjectId::new("app")], ClientId::new("cli"));
    let report = orch.run(request, CancellationToken::new()).await.unwrap();

    let core = report.result(&ProjectId::new("core")).unwrap();
    let classes = &core.as_success().unwrap().classes_dir.path;
    assert!(classes.join("Core.scala").is_file());
    assert!(classes.starts_with(root.join(".kiln").join("classes").join("core")));

    assert_eq!(
        report.state(&ProjectId::new("app")),
        Some(TaskState::FailedTerminal)
    );
    match report.result(&ProjectId::new("app")).unwrap() {
        CompileResult::Failed(failure) => {
            assert_eq!(failure.error_count(), 1);
            assert!(failure.problems[0].message.contains("not found: value x"));
        }
        other => panic!("expected failure, got {other:?}"),
    }
}
