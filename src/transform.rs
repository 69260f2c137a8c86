//! Downstream transformation step.
//!
//! After a load, the dbt project is run and then tested:
//!
//! ```text
//! <dbt_bin> run  --project-dir <dir> --profiles-dir <dir>
//! <dbt_bin> test --project-dir <dir> --profiles-dir <dir>
//! ```
//!
//! Both commands inherit stdio so dbt's own output reaches the operator.
//! `test` only runs when `run` succeeded.

use anyhow::{bail, Context, Result};
use std::path::Path;
use tokio::process::Command;
use tracing::info;

use crate::config::TransformConfig;

/// The dbt subcommands run, in order.
pub const STEPS: [&str; 2] = ["run", "test"];

pub async fn run_transform(config: &TransformConfig) -> Result<()> {
    for step in STEPS {
        run_step(
            &config.dbt_bin,
            step,
            &config.project_dir,
            &config.profiles_dir,
        )
        .await?;
    }
    info!("dbt run + test completed successfully");
    Ok(())
}

async fn run_step(bin: &str, step: &str, project_dir: &Path, profiles_dir: &Path) -> Result<()> {
    info!(step, project_dir = %project_dir.display(), "Running dbt step");

    let status = Command::new(bin)
        .arg(step)
        .arg("--project-dir")
        .arg(project_dir)
        .arg("--profiles-dir")
        .arg(profiles_dir)
        .status()
        .await
        .with_context(|| format!("Failed to execute '{} {}'. Is dbt installed?", bin, step))?;

    if !status.success() {
        bail!("dbt {} failed ({})", step, status);
    }
    Ok(())
}

pub fn print_report() {
    println!("transform {}", STEPS.join(" + "));
    println!("ok");
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(bin: &str) -> TransformConfig {
        TransformConfig {
            dbt_bin: bin.to_string(),
            project_dir: PathBuf::from("."),
            profiles_dir: PathBuf::from("."),
        }
    }

    #[tokio::test]
    async fn test_successful_steps() {
        // `true` ignores its arguments and exits 0
        run_transform(&config("true")).await.unwrap();
    }

    #[tokio::test]
    async fn test_failing_run_is_reported() {
        let err = run_transform(&config("false")).await.unwrap_err();
        assert!(err.to_string().starts_with("dbt run failed"), "{}", err);
    }

    #[tokio::test]
    async fn test_missing_binary() {
        let err = run_transform(&config("/nonexistent/dbt")).await.unwrap_err();
        assert!(err.to_string().contains("Is dbt installed?"));
    }
}
