//! Dependency-ordered dispatch of compilations.
//!
//! Every project of a run moves through `Pending -> Running -> {Succeeded,
//! FailedTerminal, Cancelled}`. A project starts only once all of its
//! dependencies have succeeded in the same run; a dependency that fails or is
//! cancelled cancels its not-yet-started dependents. Independent projects run
//! concurrently.
//!
//! The orchestrator is the only writer of run state. Compilations themselves
//! run as tasks that reconcile their own outcome into the durable stores
//! (analysis, output directories, result cache) under a per-project lock, so
//! at most one compilation per project is ever in flight.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use kiln_cache::{
    Analysis, AnalysisStore, CacheError, Cancellation, ChangeSet, ClassesDirManager,
    ClassesDirectory, CompileResult, CompilerCrash, DurationInfo, Failure, Freshness,
    ResultCache, Stamp, StaleReason, Stamper, Success,
};
use kiln_common::{ClientId, ContentHash, InternalError, KilnResult, Project, ProjectId};
use kiln_config::{ServerSettings, DEFAULT_RETAIN_GENERATIONS};
use kiln_diagnostics::Problem;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::compiler::{CompileRequest, Compiler, CompilerOutcome};
use crate::error::BuildError;
use crate::graph::BuildGraph;

/// Scheduling state of one project within one run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting for its dependencies.
    Pending,
    /// Handed to the compiler.
    Running,
    /// Compiled successfully (possibly as a no-op).
    Succeeded,
    /// The compiler failed or the result could not be persisted.
    FailedTerminal,
    /// Cancelled explicitly or because a dependency did not succeed.
    Cancelled,
}

impl TaskState {
    /// Returns `true` for states that never change again within the run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::FailedTerminal | TaskState::Cancelled
        )
    }
}

/// A request to bring a set of projects up to date for one client.
#[derive(Clone, Debug)]
pub struct BuildRequest {
    /// Requested projects. Their transitive dependencies are compiled too.
    pub projects: Vec<ProjectId>,
    /// The client whose output directories are used.
    pub client: ClientId,
}

impl BuildRequest {
    /// Creates a request.
    pub fn new(projects: impl IntoIterator<Item = ProjectId>, client: ClientId) -> Self {
        Self {
            projects: projects.into_iter().collect(),
            client,
        }
    }
}

/// Terminal state and result of every project of a run.
#[derive(Debug, Default)]
pub struct RunReport {
    order: Vec<ProjectId>,
    states: HashMap<ProjectId, TaskState>,
    results: HashMap<ProjectId, CompileResult>,
}

impl RunReport {
    fn new(order: Vec<ProjectId>) -> Self {
        let states = order
            .iter()
            .map(|id| (id.clone(), TaskState::Pending))
            .collect();
        Self {
            order,
            states,
            results: HashMap::new(),
        }
    }

    fn finish(&mut self, project: ProjectId, state: TaskState, result: CompileResult) {
        self.states.insert(project.clone(), state);
        self.results.insert(project, result);
    }

    /// The result of `project`, if it was part of the run.
    pub fn result(&self, project: &ProjectId) -> Option<&CompileResult> {
        self.results.get(project)
    }

    /// The final scheduling state of `project`, if it was part of the run.
    pub fn state(&self, project: &ProjectId) -> Option<TaskState> {
        self.states.get(project).copied()
    }

    /// Results in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = (&ProjectId, &CompileResult)> {
        self.order
            .iter()
            .filter_map(|id| self.results.get(id).map(|r| (id, r)))
    }

    /// Number of projects in the run.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` if the run had no projects.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Returns `true` if every project of the run succeeded.
    pub fn is_ok(&self) -> bool {
        self.order
            .iter()
            .all(|id| self.result(id).is_some_and(CompileResult::is_ok))
    }

    /// Checks that every requested project reports a terminal result.
    pub fn verify(&self, requested: &[ProjectId]) -> KilnResult<()> {
        for id in requested {
            let state = self.state(id);
            let result = self.result(id);
            if !state.is_some_and(TaskState::is_terminal) || result.map_or(true, |r| r.is_empty()) {
                return Err(InternalError::new(format!(
                    "requested project '{id}' has no result after the run"
                )));
            }
        }
        Ok(())
    }
}

struct Shared {
    compiler: Arc<dyn Compiler>,
    analyses: AnalysisStore,
    classes: ClassesDirManager,
    results: ResultCache,
    locks: Mutex<HashMap<ProjectId, Arc<AsyncMutex<()>>>>,
}

impl Shared {
    fn project_lock(&self, id: &ProjectId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(id.clone()).or_default())
    }
}

/// Compiles projects of a [`BuildGraph`] through a [`Compiler`].
///
/// Cloning is cheap and clones share all state, so several runs (for
/// different clients, say) can proceed concurrently.
#[derive(Clone)]
pub struct Orchestrator {
    graph: Arc<BuildGraph>,
    shared: Arc<Shared>,
    limit: Option<Arc<Semaphore>>,
    retain_generations: usize,
}

struct TaskOutcome {
    project: ProjectId,
    state: TaskState,
    result: CompileResult,
    /// Set when the attempt broke down inside the orchestrator itself.
    internal: Option<String>,
}

enum Plan {
    UpToDate {
        analysis: Arc<Analysis>,
        dir: ClassesDirectory,
    },
    Compile {
        reason: StaleReason,
        current: ClassesDirectory,
        staging: PathBuf,
        stamps: BTreeMap<PathBuf, Stamp>,
        changes: ChangeSet,
        previous: Option<Arc<Analysis>>,
    },
}

impl Orchestrator {
    /// Creates an orchestrator with fresh, empty stores and unbounded
    /// parallelism.
    pub fn new(graph: BuildGraph, compiler: Arc<dyn Compiler>) -> Self {
        Self {
            graph: Arc::new(graph),
            shared: Arc::new(Shared {
                compiler,
                analyses: AnalysisStore::new(),
                classes: ClassesDirManager::new(),
                results: ResultCache::new(),
                locks: Mutex::new(HashMap::new()),
            }),
            limit: None,
            retain_generations: DEFAULT_RETAIN_GENERATIONS,
        }
    }

    /// Limits the number of concurrently running compilations. Zero means
    /// unbounded.
    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.limit = (max_parallel > 0).then(|| Arc::new(Semaphore::new(max_parallel)));
        self
    }

    /// Sets how many output generations are kept per (project, client).
    pub fn with_retain_generations(mut self, retain: usize) -> Self {
        self.retain_generations = retain.max(1);
        self
    }

    /// Applies the server settings of a resolved configuration.
    pub fn with_settings(self, settings: &ServerSettings) -> Self {
        self.with_max_parallel(settings.max_parallel)
            .with_retain_generations(settings.retain_generations)
    }

    /// The build graph.
    pub fn graph(&self) -> &BuildGraph {
        &self.graph
    }

    /// The result cache shared by all runs.
    pub fn results(&self) -> &ResultCache {
        &self.shared.results
    }

    /// The analysis store shared by all runs.
    pub fn analyses(&self) -> &AnalysisStore {
        &self.shared.analyses
    }

    /// The output directory manager shared by all runs.
    pub fn classes(&self) -> &ClassesDirManager {
        &self.shared.classes
    }

    /// Compiles the requested projects and their dependencies.
    ///
    /// Returns once every project of the run reached a terminal state. When
    /// `cancel` fires, pending projects are cancelled at once and running
    /// compilations are asked to stop; the run still waits for them.
    ///
    /// Dropping the returned future cancels the compilations it started.
    /// Each of them still finishes and records its result under the project
    /// lock before another compilation of that project may begin.
    ///
    /// If a compilation task breaks down, its project fails and the other
    /// projects run to completion before the error is returned.
    pub async fn run(
        &self,
        request: BuildRequest,
        cancel: CancellationToken,
    ) -> Result<RunReport, BuildError> {
        let order = self.graph.closure(&request.projects)?;
        info!(client = %request.client, projects = order.len(), "starting build");

        let started = Instant::now();
        let mut report = RunReport::new(order);
        let mut tasks = JoinSet::new();
        let mut cancel_seen = false;
        let mut internal = None;

        loop {
            if !cancel_seen && cancel.is_cancelled() {
                cancel_seen = true;
                info!(client = %request.client, "build cancelled");
                cancel_pending(&mut report, started);
            }
            self.dispatch_ready(&mut report, &mut tasks, &request.client, &cancel, started);

            let joined = tokio::select! {
                joined = tasks.join_next() => joined,
                _ = cancel.cancelled(), if !cancel_seen => continue,
            };
            let Some(joined) = joined else { break };
            absorb(&mut report, joined, &mut internal);
        }

        if let Some(message) = internal {
            fail_running(&mut report, &message, started);
            cancel_pending(&mut report, started);
            return Err(InternalError::new(message).into());
        }
        report.verify(&request.projects)?;
        info!(
            client = %request.client,
            ok = report.is_ok(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "build finished"
        );
        Ok(report)
    }

    /// Starts every pending project whose dependencies all succeeded, and
    /// cancels every pending project with a dependency that did not.
    fn dispatch_ready(
        &self,
        report: &mut RunReport,
        tasks: &mut JoinSet<TaskOutcome>,
        client: &ClientId,
        cancel: &CancellationToken,
        started: Instant,
    ) {
        // Topological order lets a cancellation cascade in a single pass.
        for index in 0..report.order.len() {
            let id = report.order[index].clone();
            if report.state(&id) != Some(TaskState::Pending) {
                continue;
            }
            let Some(project) = self.graph.project(&id) else {
                continue;
            };

            let mut ready = true;
            let mut blocked_by = None;
            for dep in &project.dependencies {
                match report.state(dep) {
                    Some(TaskState::Succeeded) => {}
                    Some(TaskState::FailedTerminal | TaskState::Cancelled) => {
                        blocked_by = Some(dep);
                        break;
                    }
                    _ => ready = false,
                }
            }

            if let Some(dep) = blocked_by {
                debug!(project = %id, dependency = %dep, "dependency did not succeed, cancelling");
                report.finish(id, TaskState::Cancelled, cancelled(started));
                continue;
            }
            if !ready {
                continue;
            }

            let upstream: BTreeMap<String, ContentHash> = project
                .dependencies
                .iter()
                .filter_map(|dep| {
                    let success = report.result(dep)?.as_success()?;
                    Some((dep.to_string(), success.analysis.products_fingerprint()))
                })
                .collect();

            report.states.insert(id.clone(), TaskState::Running);
            let span = info_span!("compile", project = %id, client = %client);
            tasks.spawn(
                compile_task(
                    Arc::clone(&self.shared),
                    self.limit.clone(),
                    project.clone(),
                    client.clone(),
                    upstream,
                    cancel.child_token(),
                    self.retain_generations,
                )
                .instrument(span),
            );
        }
    }

    /// Forgets the persisted analysis and cached results of `projects`, so
    /// their next compilation starts from scratch.
    pub async fn clean(&self, projects: &[ProjectId]) -> Result<(), BuildError> {
        for id in projects {
            let project = self
                .graph
                .project(id)
                .cloned()
                .ok_or_else(|| BuildError::UnknownProject(id.to_string()))?;

            let lock = self.shared.project_lock(id);
            let _guard = lock.lock().await;
            let shared = Arc::clone(&self.shared);
            tokio::task::spawn_blocking(move || shared.analyses.remove(&project))
                .await
                .map_err(|e| InternalError::new(format!("clean task failed: {e}")))??;
            self.shared.results.clear(id);
            info!(project = %id, "cleaned");
        }
        Ok(())
    }
}

/// Folds a finished task into the report. The first internal failure is
/// kept in `internal`; the run goes on draining the remaining tasks.
fn absorb(
    report: &mut RunReport,
    joined: Result<TaskOutcome, JoinError>,
    internal: &mut Option<String>,
) {
    match joined {
        Ok(outcome) => {
            if let Some(message) = &outcome.internal {
                internal.get_or_insert_with(|| message.clone());
            }
            report.finish(outcome.project, outcome.state, outcome.result);
        }
        Err(e) => {
            warn!(error = %e, "compilation task failed");
            internal.get_or_insert_with(|| format!("compilation task failed: {e}"));
        }
    }
}

/// Fails every project still marked running once no task is left for it.
fn fail_running(report: &mut RunReport, message: &str, started: Instant) {
    let running: Vec<ProjectId> = report
        .order
        .iter()
        .filter(|id| report.state(id) == Some(TaskState::Running))
        .cloned()
        .collect();
    for id in running {
        report.finish(id, TaskState::FailedTerminal, internal_failure(message, started));
    }
}

fn cancel_pending(report: &mut RunReport, started: Instant) {
    let pending: Vec<ProjectId> = report
        .order
        .iter()
        .filter(|id| report.state(id) == Some(TaskState::Pending))
        .cloned()
        .collect();
    for id in pending {
        report.finish(id, TaskState::Cancelled, cancelled(started));
    }
}

fn cancelled(started: Instant) -> CompileResult {
    CompileResult::Cancelled(Cancellation {
        duration: DurationInfo::new(started.elapsed()),
    })
}

fn internal_failure(message: &str, started: Instant) -> CompileResult {
    CompileResult::Failed(Failure {
        problems: vec![Problem::error(format!("internal error: {message}"))],
        crash: None,
        duration: DurationInfo::new(started.elapsed()),
    })
}

async fn acquire(
    lock: Arc<AsyncMutex<()>>,
    limit: Option<Arc<Semaphore>>,
) -> (OwnedMutexGuard<()>, Option<OwnedSemaphorePermit>) {
    let guard = lock.lock_owned().await;
    let permit = match limit {
        Some(limit) => limit.acquire_owned().await.ok(),
        None => None,
    };
    (guard, permit)
}

/// Runs one project to a terminal state and records the attempt.
async fn compile_task(
    shared: Arc<Shared>,
    limit: Option<Arc<Semaphore>>,
    project: Project,
    client: ClientId,
    upstream: BTreeMap<String, ContentHash>,
    cancel: CancellationToken,
    retain_generations: usize,
) -> TaskOutcome {
    let started = Instant::now();
    let id = project.id.clone();
    // A dropped run cancels the compilation it started.
    let _cancel_on_drop = cancel.clone().drop_guard();

    let lock = shared.project_lock(&id);
    let acquired = tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        acquired = acquire(lock, limit) => Some(acquired),
    };
    let Some(held) = acquired else {
        // Never started: reported, but not recorded as an attempt.
        debug!("cancelled before start");
        return TaskOutcome {
            project: id,
            state: TaskState::Cancelled,
            result: cancelled(started),
            internal: None,
        };
    };

    // The attempt owns the project lock, so it runs to completion and
    // records its result even when this task is dropped.
    let attempt = tokio::spawn(
        async move {
            let _held = held;
            let result = compile_project(
                &shared,
                &project,
                &client,
                upstream,
                &cancel,
                started,
                retain_generations,
            )
            .await;
            shared.results.record_result(&project.id, result.clone());
            result
        }
        .in_current_span(),
    );
    let result = match attempt.await {
        Ok(result) => result,
        Err(e) => return broken_attempt(id, e, started),
    };

    let state = match &result {
        CompileResult::Success(_) => TaskState::Succeeded,
        CompileResult::Cancelled(_) => TaskState::Cancelled,
        CompileResult::Failed(_) | CompileResult::Empty => TaskState::FailedTerminal,
    };
    info!(result = result.tag(), elapsed_ms = started.elapsed().as_millis() as u64, "compiled");
    TaskOutcome {
        project: id,
        state,
        result,
        internal: None,
    }
}

/// The attempt itself panicked. Its staging directory is left for the next
/// `prepare` to reuse.
fn broken_attempt(project: ProjectId, error: JoinError, started: Instant) -> TaskOutcome {
    let message = format!("compilation of '{project}' failed: {}", panic_message(error));
    warn!(error = %message, "compilation attempt broke down");
    TaskOutcome {
        project,
        state: TaskState::FailedTerminal,
        result: internal_failure(&message, started),
        internal: Some(message),
    }
}

async fn compile_project(
    shared: &Arc<Shared>,
    project: &Project,
    client: &ClientId,
    upstream: BTreeMap<String, ContentHash>,
    cancel: &CancellationToken,
    started: Instant,
    retain_generations: usize,
) -> CompileResult {
    let plan = {
        let shared = Arc::clone(shared);
        let project = project.clone();
        let client = client.clone();
        let upstream = upstream.clone();
        blocking(move || plan(&shared, &project, &client, &upstream)).await
    };
    let plan = match plan {
        Ok(plan) => plan,
        Err(message) => return infrastructure_failure(Vec::new(), message, started),
    };

    let (reason, current, staging, stamps, changes, previous) = match plan {
        Plan::UpToDate { analysis, dir } => {
            debug!(generation = dir.generation, "up to date");
            // A no-op reports the problems of the compilation it reuses.
            let problems = shared
                .results
                .last_successful_result(&project.id)
                .map(|last| last.problems)
                .unwrap_or_default();
            return CompileResult::Success(Success {
                is_no_op: true,
                analysis,
                classes_dir: dir,
                problems,
                duration: DurationInfo::new(started.elapsed()),
            });
        }
        Plan::Compile {
            reason,
            current,
            staging,
            stamps,
            changes,
            previous,
        } => (reason, current, staging, stamps, changes, previous),
    };

    info!(reason = %reason, dirty = changes.dirty_count(), "compiling");
    let request = CompileRequest {
        project: project.clone(),
        sources: stamps.keys().cloned().collect(),
        classes_dir: staging.clone(),
        previous_classes_dir: (current.generation > 0).then(|| current.path.clone()),
        previous_analysis: previous.clone(),
        changes,
    };
    let compiler = Arc::clone(&shared.compiler);
    let token = cancel.clone();
    let outcome = match tokio::spawn(async move { compiler.compile(request, token).await }).await {
        Ok(outcome) => outcome,
        Err(e) => CompilerOutcome::Failed {
            problems: Vec::new(),
            crash: Some(CompilerCrash::new(panic_message(e))),
        },
    };

    match outcome {
        CompilerOutcome::Success {
            problems,
            compiler_data,
        } => {
            let committed = {
                let shared = Arc::clone(shared);
                let project = project.clone();
                let client = client.clone();
                blocking(move || {
                    commit(
                        &shared,
                        &project,
                        &client,
                        &staging,
                        previous,
                        stamps,
                        upstream,
                        compiler_data,
                        retain_generations,
                    )
                })
                .await
            };
            match committed {
                Ok((analysis, dir)) => CompileResult::Success(Success {
                    is_no_op: false,
                    analysis,
                    classes_dir: dir,
                    problems,
                    duration: DurationInfo::new(started.elapsed()),
                }),
                Err(message) => {
                    discard(shared, project, client).await;
                    infrastructure_failure(problems, message, started)
                }
            }
        }
        CompilerOutcome::Failed { problems, crash } => {
            discard(shared, project, client).await;
            CompileResult::Failed(Failure {
                problems,
                crash,
                duration: DurationInfo::new(started.elapsed()),
            })
        }
        CompilerOutcome::Cancelled => {
            discard(shared, project, client).await;
            CompileResult::Cancelled(Cancellation {
                duration: DurationInfo::new(started.elapsed()),
            })
        }
    }
}

/// Decides whether the project is up to date and, if not, stamps its sources
/// and prepares a staging directory.
fn plan(
    shared: &Shared,
    project: &Project,
    client: &ClientId,
    upstream: &BTreeMap<String, ContentHash>,
) -> Result<Plan, CacheError> {
    let current = shared.classes.get_or_create(project, client)?;
    let reason = match shared.analyses.check(project, &current.path, upstream)? {
        Freshness::UpToDate(analysis) => {
            return Ok(Plan::UpToDate {
                analysis,
                dir: current,
            })
        }
        Freshness::Stale(reason) => reason,
    };

    let sources = project.source_files().map_err(|e| CacheError::Io {
        path: project.sources.first().cloned().unwrap_or_default(),
        source: e,
    })?;
    let stamps = Stamper::stamp_files(&sources);
    let previous = shared.analyses.load(project);
    let changes = match &previous {
        Some(analysis) => Stamper::detect_changes(&stamps, &analysis.sources),
        None => ChangeSet::all_new(stamps.keys().cloned()),
    };
    let staging = shared.classes.prepare(project, client)?;
    Ok(Plan::Compile {
        reason,
        current,
        staging,
        stamps,
        changes,
        previous,
    })
}

/// Persists the analysis of the staged output, then promotes the output.
///
/// The analysis already names the promoted path. If promotion fails, the
/// previous analysis is put back, so a failed commit leaves both the current
/// generation and the persisted analysis as they were.
#[allow(clippy::too_many_arguments)]
fn commit(
    shared: &Shared,
    project: &Project,
    client: &ClientId,
    staging: &Path,
    previous: Option<Arc<Analysis>>,
    sources: BTreeMap<PathBuf, Stamp>,
    upstream: BTreeMap<String, ContentHash>,
    compiler_data: Vec<u8>,
    retain_generations: usize,
) -> Result<(Arc<Analysis>, ClassesDirectory), CacheError> {
    let target = shared
        .classes
        .staged(project, client)
        .ok_or_else(|| CacheError::DirectoryAllocation {
            path: staging.to_path_buf(),
            source: io::Error::new(io::ErrorKind::NotFound, "no staged generation"),
        })?;
    let products = ClassesDirManager::snapshot(staging)?;
    let analysis = shared.analyses.commit(
        project,
        Analysis {
            classes_dir: target.path.clone(),
            sources,
            products,
            upstream,
            compiler_data,
        },
    )?;
    let dir = match shared.classes.rotate(project, client) {
        Ok(dir) => dir,
        Err(e) => {
            if let Err(undo) = shared.analyses.restore(project, previous) {
                warn!(error = %undo, "failed to restore the previous analysis");
            }
            return Err(e);
        }
    };
    if let Err(e) = shared.classes.prune(project, client, retain_generations) {
        warn!(error = %e, "failed to prune old output generations");
    }
    Ok((analysis, dir))
}

async fn discard(shared: &Arc<Shared>, project: &Project, client: &ClientId) {
    let shared = Arc::clone(shared);
    let project = project.clone();
    let client = client.clone();
    if let Err(message) = blocking(move || shared.classes.discard(&project, &client)).await {
        warn!(error = %message, "failed to discard staging directory");
    }
}

/// Runs filesystem work off the async workers.
async fn blocking<T, F>(work: F) -> Result<T, String>
where
    F: FnOnce() -> Result<T, CacheError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("background task failed: {e}")),
    }
}

/// The compiler may have succeeded, but on-disk state could not be made
/// consistent, so the attempt counts as failed.
fn infrastructure_failure(
    mut problems: Vec<Problem>,
    message: String,
    started: Instant,
) -> CompileResult {
    warn!(error = %message, "build server failure");
    problems.push(Problem::error(message));
    CompileResult::Failed(Failure {
        problems,
        crash: None,
        duration: DurationInfo::new(started.elapsed()),
    })
}

fn panic_message(error: JoinError) -> String {
    if !error.is_panic() {
        return error.to_string();
    }
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "compiler panicked".to_string()
    }
}
