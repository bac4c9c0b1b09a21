//! The `kiln projects` command.

use std::fmt::Write as _;

use kiln_build::BuildGraph;

use crate::pipeline;
use crate::GlobalArgs;

/// Runs the `kiln projects` command.
pub fn run(global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let workspace = pipeline::load_workspace(global)?;
    let graph = BuildGraph::new(workspace.build.projects.iter().map(|p| p.project.clone()))?;
    print!("{}", list(&graph));
    Ok(0)
}

/// Lists projects in dependency order, each with its direct dependencies.
pub fn list(graph: &BuildGraph) -> String {
    let mut out = String::new();
    for project in graph.projects() {
        if project.dependencies.is_empty() {
            let _ = writeln!(out, "{}", project.id);
        } else {
            let deps: Vec<&str> = project.dependencies.iter().map(|d| d.as_str()).collect();
            let _ = writeln!(out, "{} -> {}", project.id, deps.join(", "));
        }
    }
    out
}
