//! The `kiln compile` command.
//!
//! Brings the requested projects (and everything they depend on) up to
//! date, then prints one line per project followed by its problems.

use std::fmt::Write as _;

use kiln_build::{BuildRequest, RunReport, TaskState};
use kiln_cache::CompileResult;
use kiln_common::{ClientId, ProjectId};
use kiln_diagnostics::{ProblemRenderer, TerminalRenderer};
use tracing::info;

use crate::pipeline;
use crate::{CompileArgs, GlobalArgs, ReportFormat};

/// Runs the `kiln compile` command.
pub async fn run(args: &CompileArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let workspace = pipeline::load_workspace(global)?;
    let requested = workspace.build.select(&args.projects)?;
    let orchestrator = pipeline::orchestrator(&workspace)?;

    let cancel = pipeline::cancel_on_ctrl_c();
    let request = BuildRequest::new(requested.iter().cloned(), ClientId::new(args.client.as_str()));
    info!(projects = requested.len(), client = %args.client, "starting build");
    let report = orchestrator.run(request, cancel).await?;
    report.verify(&requested)?;

    match args.format {
        ReportFormat::Text => {
            if !global.quiet || !report.is_ok() {
                let renderer = TerminalRenderer::new(global.color);
                eprint!("{}", render_text(&report, &renderer));
            }
        }
        ReportFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&render_json(&report))?);
        }
    }

    Ok(if report.is_ok() { 0 } else { 1 })
}

fn state_name(state: Option<TaskState>) -> &'static str {
    match state {
        Some(TaskState::Succeeded) => "succeeded",
        Some(TaskState::FailedTerminal) => "failed",
        Some(TaskState::Cancelled) => "cancelled",
        Some(TaskState::Running) => "running",
        Some(TaskState::Pending) | None => "pending",
    }
}

fn summary(id: &ProjectId, result: &CompileResult) -> String {
    match result {
        CompileResult::Success(success) if success.is_no_op => {
            format!("{id}: up to date ({})", success.classes_dir.path.display())
        }
        CompileResult::Success(success) => format!(
            "{id}: compiled in {:.2}s ({})",
            success.duration.elapsed.as_secs_f64(),
            success.classes_dir.path.display()
        ),
        CompileResult::Failed(failure) => {
            let errors = failure.error_count();
            let noun = if errors == 1 { "error" } else { "errors" };
            match &failure.crash {
                Some(crash) => format!("{id}: failed with {errors} {noun}, {crash}"),
                None => format!("{id}: failed with {errors} {noun}"),
            }
        }
        CompileResult::Cancelled(_) => format!("{id}: cancelled"),
        CompileResult::Empty => format!("{id}: not compiled"),
    }
}

/// Renders a run as human-readable text, in dependency order.
pub fn render_text(report: &RunReport, renderer: &dyn ProblemRenderer) -> String {
    let mut out = String::new();
    for (id, result) in report.iter() {
        let _ = writeln!(out, "{}", summary(id, result));
        for problem in result.problems() {
            out.push_str(&renderer.render(problem));
        }
    }
    let failed = report
        .iter()
        .filter(|(_, r)| matches!(r, CompileResult::Failed(_)))
        .count();
    if failed > 0 {
        let _ = writeln!(out, "build failed: {failed} of {} projects", report.len());
    }
    out
}

/// Renders a run as a JSON document for tools.
pub fn render_json(report: &RunReport) -> serde_json::Value {
    let projects: Vec<serde_json::Value> = report
        .iter()
        .map(|(id, result)| {
            let mut entry = serde_json::json!({
                "project": id.as_str(),
                "state": state_name(report.state(id)),
                "result": result.tag(),
                "problems": result.problems(),
            });
            match result {
                CompileResult::Success(success) => {
                    entry["classes_dir"] = serde_json::json!(success.classes_dir.path);
                    entry["generation"] = serde_json::json!(success.classes_dir.generation);
                    entry["elapsed_ms"] =
                        serde_json::json!(success.duration.elapsed.as_millis() as u64);
                }
                CompileResult::Failed(failure) => {
                    entry["errors"] = serde_json::json!(failure.error_count());
                    if let Some(crash) = &failure.crash {
                        entry["crash"] = serde_json::json!(crash.message);
                    }
                }
                CompileResult::Cancelled(_) | CompileResult::Empty => {}
            }
            entry
        })
        .collect();
    serde_json::json!({
        "ok": report.is_ok(),
        "projects": projects,
    })
}
