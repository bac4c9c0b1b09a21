//! The `kiln clean` command.

use crate::pipeline;
use crate::{CleanArgs, GlobalArgs};

/// Runs the `kiln clean` command.
///
/// Deletes the persisted analysis of each selected project so the next
/// compile starts from scratch. Output directories are left in place.
pub async fn run(args: &CleanArgs, global: &GlobalArgs) -> Result<i32, Box<dyn std::error::Error>> {
    let workspace = pipeline::load_workspace(global)?;
    let selected = workspace.build.select(&args.projects)?;
    let orchestrator = pipeline::orchestrator(&workspace)?;

    orchestrator.clean(&selected).await?;
    if !global.quiet {
        for id in &selected {
            eprintln!("cleaned {id}");
        }
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn clean_removes_analysis_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("kiln.toml"),
            "[projects.core]\nsources = \"core/src\"\n",
        )
        .unwrap();
        let analysis = dir.path().join(".kiln").join("analysis").join("core.analysis");
        std::fs::create_dir_all(analysis.parent().unwrap()).unwrap();
        std::fs::write(&analysis, b"stale").unwrap();

        let global = GlobalArgs {
            quiet: true,
            color: false,
            config: Some(dir.path().to_string_lossy().into_owned()),
        };
        let code = run(&CleanArgs { projects: vec![] }, &global).await.unwrap();
        assert_eq!(code, 0);
        assert!(!analysis.exists());
    }

    #[tokio::test]
    async fn clean_rejects_unknown_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("kiln.toml"),
            "[projects.core]\nsources = \"core/src\"\n",
        )
        .unwrap();
        let global = GlobalArgs {
            quiet: true,
            color: false,
            config: Some(dir.path().to_string_lossy().into_owned()),
        };
        let args = CleanArgs {
            projects: vec!["ghost".into()],
        };
        assert!(run(&args, &global).await.is_err());
    }
}
