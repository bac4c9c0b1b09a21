//! A compiler that runs an external command per project.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use kiln_cache::CompilerCrash;
use kiln_common::ProjectId;
use kiln_config::ResolvedBuild;
use kiln_diagnostics::{Problem, ProblemSink};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::compiler::{CompileRequest, Compiler, CompilerOutcome};

/// Replaced by the staging output directory.
const CLASSES_DIR_PLACEHOLDER: &str = "{classes_dir}";
/// Replaced by one argument per source file.
const SOURCES_PLACEHOLDER: &str = "{sources}";
/// Replaced by the project name.
const PROJECT_PLACEHOLDER: &str = "{project}";

/// Runs the command line configured for each project.
///
/// A non-zero exit status fails the compilation with one error per line of
/// standard error. On success, standard error lines become warnings. The
/// child process is killed when the cancellation token fires.
pub struct ProcessCompiler {
    working_dir: PathBuf,
    commands: HashMap<ProjectId, Vec<String>>,
}

impl ProcessCompiler {
    /// Creates a compiler with no commands, running in `working_dir`.
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            commands: HashMap::new(),
        }
    }

    /// Creates a compiler from the commands declared in a resolved build.
    pub fn from_build(build: &ResolvedBuild, working_dir: impl Into<PathBuf>) -> Self {
        let mut compiler = Self::new(working_dir);
        for resolved in &build.projects {
            if let Some(command) = &resolved.command {
                compiler = compiler.with_command(resolved.project.id.clone(), command.clone());
            }
        }
        compiler
    }

    /// Sets the command line used for `project`.
    pub fn with_command(mut self, project: ProjectId, command: Vec<String>) -> Self {
        self.commands.insert(project, command);
        self
    }

    /// Expands placeholders in a command template.
    pub fn expand(template: &[String], request: &CompileRequest) -> Vec<String> {
        let classes_dir = request.classes_dir.to_string_lossy();
        let mut args = Vec::with_capacity(template.len() + request.sources.len());
        for arg in template {
            if arg == SOURCES_PLACEHOLDER {
                args.extend(
                    request
                        .sources
                        .iter()
                        .map(|s| s.to_string_lossy().into_owned()),
                );
            } else {
                args.push(
                    arg.replace(CLASSES_DIR_PLACEHOLDER, &classes_dir)
                        .replace(PROJECT_PLACEHOLDER, request.project.id.as_str()),
                );
            }
        }
        args
    }
}

#[async_trait]
impl Compiler for ProcessCompiler {
    async fn compile(&self, request: CompileRequest, cancel: CancellationToken) -> CompilerOutcome {
        let Some(template) = self.commands.get(&request.project.id) else {
            return CompilerOutcome::Failed {
                problems: vec![Problem::error(format!(
                    "no compile command configured for project '{}'",
                    request.project.id
                ))],
                crash: None,
            };
        };
        let args = Self::expand(template, &request);
        let Some((program, rest)) = args.split_first() else {
            return CompilerOutcome::Failed {
                problems: vec![Problem::error("empty compile command")],
                crash: None,
            };
        };

        debug!(project = %request.project.id, program = %program, args = rest.len(), "spawning compiler");
        let child = Command::new(program)
            .args(rest)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                return CompilerOutcome::Failed {
                    problems: Vec::new(),
                    crash: Some(CompilerCrash::new(format!("failed to spawn `{program}`: {e}"))),
                }
            }
        };

        // Dropping the output future drops the child, which kills it.
        let output = tokio::select! {
            output = child.wait_with_output() => output,
            _ = cancel.cancelled() => return CompilerOutcome::Cancelled,
        };
        let output = match output {
            Ok(output) => output,
            Err(e) => {
                return CompilerOutcome::Failed {
                    problems: Vec::new(),
                    crash: Some(CompilerCrash::new(format!("failed to wait for `{program}`: {e}"))),
                }
            }
        };

        let stderr = String::from_utf8_lossy(&output.stderr);
        let sink = ProblemSink::new();
        let lines = stderr.lines().map(str::trim).filter(|l| !l.is_empty());
        if output.status.success() {
            lines.for_each(|line| sink.emit(Problem::warning(line)));
            CompilerOutcome::Success {
                problems: sink.take_all(),
                compiler_data: Vec::new(),
            }
        } else {
            lines.for_each(|line| sink.emit(Problem::error(line)));
            if !sink.has_errors() {
                sink.emit(Problem::error(format!(
                    "`{program}` exited with {}",
                    output.status
                )));
            }
            CompilerOutcome::Failed {
                problems: sink.take_all(),
                crash: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_cache::ChangeSet;
    use kiln_common::Project;
    use std::path::Path;

    fn request(dir: &Path) -> CompileRequest {
        let sources = vec![dir.join("A.scala"), dir.join("B.scala")];
        CompileRequest {
            project: Project::new("core", dir.join("core.analysis"), dir.join("out")),
            sources: sources.clone(),
            classes_dir: dir.join("gen-1.staging"),
            previous_classes_dir: None,
            previous_analysis: None,
            changes: ChangeSet::all_new(sources),
        }
    }

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn expands_placeholders() {
        let dir = Path::new("/ws");
        let args = ProcessCompiler::expand(
            &strings(&["scalac", "-d", "{classes_dir}", "-Dname={project}", "{sources}"]),
            &request(dir),
        );
        assert_eq!(
            args,
            strings(&[
                "scalac",
                "-d",
                "/ws/gen-1.staging",
                "-Dname=core",
                "/ws/A.scala",
                "/ws/B.scala"
            ])
        );
    }

    #[tokio::test]
    async fn missing_command_fails() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ProcessCompiler::new(dir.path());
        let outcome = compiler
            .compile(request(dir.path()), CancellationToken::new())
            .await;
        assert!(matches!(outcome, CompilerOutcome::Failed { crash: None, .. }));
    }

    #[tokio::test]
    async fn spawn_failure_is_a_crash() {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ProcessCompiler::new(dir.path()).with_command(
            ProjectId::new("core"),
            strings(&["kiln-test-no-such-compiler"]),
        );
        let outcome = compiler
            .compile(request(dir.path()), CancellationToken::new())
            .await;
        assert!(matches!(outcome, CompilerOutcome::Failed { crash: Some(_), .. }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn exit_status_decides_outcome() {
        let dir = tempfile::tempdir().unwrap();
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let ok = ProcessCompiler::new(dir.path()).with_command(
            ProjectId::new("core"),
            strings(&["/bin/sh", "-c", "mkdir -p \"$0\" && echo careful >&2", "{classes_dir}"]),
        );
        match ok.compile(request(dir.path()), CancellationToken::new()).await {
            CompilerOutcome::Success { problems, .. } => {
                assert_eq!(problems, vec![Problem::warning("careful")]);
            }
            other => panic!("expected success, got {other:?}"),
        }

        let failing = ProcessCompiler::new(dir.path()).with_command(
            ProjectId::new("core"),
            strings(&["/bin/sh", "-c", "echo 'A.scala:1: error' >&2; exit 2"]),
        );
        match failing.compile(request(dir.path()), CancellationToken::new()).await {
            CompilerOutcome::Failed { problems, crash } => {
                assert!(crash.is_none());
                assert_eq!(problems, vec![Problem::error("A.scala:1: error")]);
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let dir = tempfile::tempdir().unwrap();
        if !Path::new("/bin/sh").exists() {
            return;
        }
        let compiler = ProcessCompiler::new(dir.path()).with_command(
            ProjectId::new("core"),
            strings(&["/bin/sh", "-c", "sleep 30"]),
        );
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });
        let outcome = tokio::time::timeout(
            std::time::Duration::from_secs(10),
            compiler.compile(request(dir.path()), cancel),
        )
        .await
        .unwrap();
        assert!(matches!(outcome, CompilerOutcome::Cancelled));
    }
}
