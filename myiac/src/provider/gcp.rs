use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use myiac_model::{parse_json_array, AuthEntry, ServiceAccountKeyFile};
use tracing::info;

use super::{Authenticator, ClusterBinder, ClusterRef, ProviderSettings};
use crate::error::{Error, Result};
use crate::preferences::{self, Preferences};
use crate::process::{CommandRunner, CommandSpec};
use crate::reconcile::Outcome;

pub const TAG: &str = "gcp";

/// A service account key file together with the account it belongs to.
///
/// The email is always read from the file's `client_email`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServiceAccountKey {
    location: PathBuf,
    email: String,
}

impl ServiceAccountKey {
    pub fn from_file(location: impl Into<PathBuf>) -> Result<Self> {
        let location = location.into();
        let contents = std::fs::read_to_string(&location).map_err(|err| {
            Error::validation(format!(
                "invalid key file path {}: {err}",
                location.display()
            ))
        })?;

        let key: ServiceAccountKeyFile = serde_json::from_str(&contents).map_err(|source| {
            Error::parse(format!("service account key {}", location.display()), source)
        })?;

        Ok(ServiceAccountKey {
            location,
            email: key.client_email,
        })
    }

    pub fn location(&self) -> &Path {
        &self.location
    }

    pub fn email(&self) -> &str {
        &self.email
    }
}

/// GCP through `gcloud`: service account activation and GKE credentials.
pub struct GcpProvider {
    project: String,
    key: ServiceAccountKey,
    cluster: ClusterRef,
    runner: Arc<dyn CommandRunner>,
    prefs: Preferences,
}

impl GcpProvider {
    pub fn new(
        settings: &ProviderSettings,
        runner: Arc<dyn CommandRunner>,
        prefs: Preferences,
    ) -> Result<Self> {
        Ok(GcpProvider {
            project: settings.project.clone(),
            key: ServiceAccountKey::from_file(&settings.key_location)?,
            cluster: settings.cluster.clone(),
            runner,
            prefs,
        })
    }

    /// Only the requested account counts: a machine running under ambient
    /// credentials may have other accounts active too.
    async fn is_authenticated(&self) -> Result<bool> {
        let output = self
            .runner
            .run(
                CommandSpec::new("gcloud")
                    .args(["auth", "list", "--format", "json", "-q"])
                    .suppress_echo(),
            )
            .await?
            .output();

        let entries: Vec<AuthEntry> = parse_json_array(&output)
            .map_err(|source| Error::parse("gcloud auth list output", source))?;

        Ok(entries
            .iter()
            .any(|entry| entry.account == self.key.email() && entry.is_active()))
    }

    async fn activate_service_account(&self) -> Result<()> {
        self.runner
            .run(
                CommandSpec::new("gcloud")
                    .args(["auth", "activate-service-account", "--key-file"])
                    .arg(self.key.location().display().to_string()),
            )
            .await?;
        Ok(())
    }

    async fn set_project(&self) -> Result<()> {
        self.runner
            .run(
                CommandSpec::new("gcloud")
                    .args(["config", "set", "project"])
                    .arg(&self.project),
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Authenticator for GcpProvider {
    async fn authenticate(&self) -> Result<Outcome<String>> {
        let email = self.key.email().to_string();

        if self.is_authenticated().await? {
            info!("already authenticated as {email}");
            return Ok(Outcome::Existing(email));
        }

        info!("authenticating as {email}");
        self.activate_service_account().await?;
        self.set_project().await?;

        let key_location = self.key.location().display().to_string();
        self.prefs.set_all(&[
            (preferences::PROVIDER, TAG),
            (preferences::KEY_LOCATION, key_location.as_str()),
            (preferences::PROJECT, self.project.as_str()),
            (preferences::MASTER_SA_EMAIL, email.as_str()),
        ])?;

        Ok(Outcome::Created(email))
    }
}

#[async_trait]
impl ClusterBinder for GcpProvider {
    async fn bind_cluster(&self) -> Result<()> {
        self.runner
            .run(
                CommandSpec::new("gcloud")
                    .args(["container", "clusters", "get-credentials"])
                    .arg(&self.cluster.name)
                    .args(["--zone", self.cluster.zone.as_str()])
                    .args(["--project", self.project.as_str()]),
            )
            .await?;

        info!("kubectl now points at cluster {}", self.cluster.name);

        self.prefs.set_all(&[
            (preferences::CLUSTER_NAME, self.cluster.name.as_str()),
            (preferences::CLUSTER_ZONE, self.cluster.zone.as_str()),
        ])
    }

    async fn resize_node_pool(&self, pool: &str, size: u32) -> Result<()> {
        info!("resizing pool {pool} of {} to {size} nodes", self.cluster.name);

        self.runner
            .run(
                CommandSpec::new("gcloud")
                    .args(["container", "clusters", "resize"])
                    .arg(&self.cluster.name)
                    .args(["--node-pool", pool])
                    .arg("--num-nodes")
                    .arg(size.to_string())
                    .args(["--zone", self.cluster.zone.as_str()])
                    .args(["--project", self.project.as_str()])
                    .arg("-q"),
            )
            .await?;
        Ok(())
    }
}
