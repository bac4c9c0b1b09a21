//! Shared fixtures for orchestrator integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use kiln_build::{
    BuildGraph, BuildRequest, CompileRequest, Compiler, CompilerOutcome, Orchestrator, RunReport,
};
use kiln_common::{ClientId, Project, ProjectId};
use kiln_diagnostics::Problem;
use tokio_util::sync::CancellationToken;

/// What the scripted compiler does for a project.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Behavior {
    /// Writes `<stem>.class` per source, with the source content.
    Compile,
    /// Reports one error.
    Fail,
    /// Panics.
    Crash,
    /// Blocks until cancelled, then reports cancellation.
    WaitForCancel,
    /// Waits for cancellation, then compiles anyway.
    IgnoreCancel,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Event {
    Started(String),
    Finished(String),
}

/// A fake compiler driven by per-project behaviors.
pub struct ScriptedCompiler {
    behaviors: Mutex<HashMap<String, Behavior>>,
    requests: Mutex<Vec<CompileRequest>>,
    events: Mutex<Vec<Event>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Duration,
}

impl ScriptedCompiler {
    pub fn new() -> Arc<Self> {
        Self::with_delay(Duration::ZERO)
    }

    /// Each compilation takes at least `delay`, so concurrent work overlaps.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            behaviors: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            delay,
        })
    }

    pub fn set(&self, project: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(project.to_string(), behavior);
    }

    pub fn requests(&self, project: &str) -> Vec<CompileRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.project.id.as_str() == project)
            .cloned()
            .collect()
    }

    pub fn invocations(&self, project: &str) -> usize {
        self.requests(project).len()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    fn finish(&self, name: &str) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.events
            .lock()
            .unwrap()
            .push(Event::Finished(name.to_string()));
    }
}

#[async_trait]
impl Compiler for ScriptedCompiler {
    async fn compile(&self, request: CompileRequest, cancel: CancellationToken) -> CompilerOutcome {
        let name = request.project.id.to_string();
        let behavior = self
            .behaviors
            .lock()
            .unwrap()
            .get(&name)
            .copied()
            .unwrap_or(Behavior::Compile);
        self.requests.lock().unwrap().push(request.clone());
        self.events
            .lock()
            .unwrap()
            .push(Event::Started(name.clone()));
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let outcome = match behavior {
            Behavior::Compile => write_products(&request),
            Behavior::Fail => CompilerOutcome::Failed {
                problems: vec![Problem::error(format!("{name}: type mismatch"))],
                crash: None,
            },
            Behavior::Crash => {
                self.finish(&name);
                panic!("{name}: compiler crashed");
            }
            Behavior::WaitForCancel => {
                cancel.cancelled().await;
                CompilerOutcome::Cancelled
            }
            Behavior::IgnoreCancel => {
                cancel.cancelled().await;
                write_products(&request)
            }
        };
        self.finish(&name);
        outcome
    }
}

fn write_products(request: &CompileRequest) -> CompilerOutcome {
    for source in &request.sources {
        let stem = source.file_stem().unwrap().to_string_lossy();
        let content = std::fs::read(source).unwrap();
        std::fs::write(request.classes_dir.join(format!("{stem}.class")), content).unwrap();
    }
    CompilerOutcome::Success {
        problems: vec![Problem::warning(format!(
            "{}: compiled {} sources",
            request.project.id,
            request.sources.len()
        ))],
        compiler_data: b"deps".to_vec(),
    }
}

/// A temporary directory laid out like a kiln workspace.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Declares a project with a single source file `<Name>.scala`.
    pub fn project(&self, name: &str, deps: &[&str]) -> Project {
        let src = self.root().join(name).join("src");
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(src.join(format!("{}.scala", capitalize(name))), format!("object {name}")).unwrap();
        let cache = self.root().join(".kiln");
        Project::new(
            name,
            cache.join("analysis").join(format!("{name}.analysis")),
            cache.join("classes").join(name),
        )
        .with_dependencies(deps.iter().copied())
        .with_sources([src])
    }

    pub fn source(&self, project: &str, file: &str) -> PathBuf {
        self.root().join(project).join("src").join(file)
    }

    pub fn write_source(&self, project: &str, file: &str, content: &str) {
        std::fs::write(self.source(project, file), content).unwrap();
    }
}

fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

pub fn id(name: &str) -> ProjectId {
    ProjectId::new(name)
}

pub fn orchestrator(projects: Vec<Project>, compiler: &Arc<ScriptedCompiler>) -> Orchestrator {
    let compiler: Arc<dyn Compiler> = compiler.clone();
    Orchestrator::new(BuildGraph::new(projects).unwrap(), compiler)
}

pub fn request(names: &[&str], client: &str) -> BuildRequest {
    BuildRequest::new(names.iter().map(|n| id(n)), ClientId::new(client))
}

pub async fn run(orch: &Orchestrator, names: &[&str], client: &str) -> RunReport {
    orch.run(request(names, client), CancellationToken::new())
        .await
        .unwrap()
}
