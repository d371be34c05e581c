//! Container images pushed to the project's registry.

use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};

pub const DEFAULT_REGISTRY: &str = "eu.gcr.io";

/// `<registry>/<project>/<app>:<version>-<commit>`
pub fn image_reference(
    registry: &str,
    project: &str,
    app: &str,
    version: &str,
    commit: &str,
) -> String {
    format!("{registry}/{project}/{app}:{version}-{commit}")
}

pub struct Docker {
    runner: Arc<dyn CommandRunner>,
}

impl Docker {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Docker { runner }
    }

    /// Registers `gcloud` as the credential helper for Google registries.
    pub async fn configure_registry_auth(&self) -> Result<()> {
        self.runner
            .run(CommandSpec::new("gcloud").args(["auth", "configure-docker", "-q"]))
            .await?;
        Ok(())
    }

    /// Abbreviated hash of the commit checked out in `repo`.
    pub async fn head_commit(&self, repo: &Path) -> Result<String> {
        let output = self
            .runner
            .run(
                CommandSpec::new("git")
                    .args(["rev-parse", "--short=7", "HEAD"])
                    .working_dir(repo)
                    .suppress_echo(),
            )
            .await?
            .output();

        let commit = output.trim();
        if commit.is_empty() {
            return Err(Error::validation(format!(
                "no commit found in {}, pass --commit",
                repo.display()
            )));
        }
        Ok(commit.to_string())
    }

    pub async fn build(&self, build_path: &Path, image: &str) -> Result<()> {
        info!("building {image} from {}", build_path.display());
        self.runner
            .run(
                CommandSpec::new("docker")
                    .arg("build")
                    .arg(build_path.display().to_string())
                    .args(["-t", image]),
            )
            .await?;
        Ok(())
    }

    pub async fn push(&self, image: &str) -> Result<()> {
        self.runner
            .run(CommandSpec::new("docker").args(["push", image]))
            .await?;
        info!("pushed {image}");
        Ok(())
    }

    /// Builds `image` and pushes it. Nothing is pushed when the build fails.
    pub async fn build_and_push(&self, build_path: &Path, image: &str) -> Result<()> {
        self.build(build_path, image).await?;
        self.push(image).await
    }
}
