//! Cloud providers: activating an identity locally and binding `kubectl` to a
//! cluster.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::info;

use crate::error::{Error, Result};
use crate::preferences::{self, Preferences};
use crate::process::CommandRunner;
use crate::reconcile::Outcome;

pub mod gcp;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Makes the configured identity the active one.
    ///
    /// Returns [`Outcome::Existing`] when it already was, without touching
    /// the provider, and [`Outcome::Created`] after activating it. The value
    /// is the authenticated account.
    async fn authenticate(&self) -> Result<Outcome<String>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ClusterBinder: Send + Sync {
    /// Points the local kubeconfig at the configured cluster.
    async fn bind_cluster(&self) -> Result<()>;

    async fn resize_node_pool(&self, pool: &str, size: u32) -> Result<()>;
}

pub trait CloudProvider: Authenticator + ClusterBinder {}

impl<T: Authenticator + ClusterBinder> CloudProvider for T {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterRef {
    pub name: String,
    pub zone: String,
}

/// Everything needed to build a provider, whether it comes from flags or
/// from stored preferences.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProviderSettings {
    pub project: String,
    pub key_location: PathBuf,
    pub cluster: ClusterRef,
}

impl ProviderSettings {
    /// Clusters are named `<project>-<env>`.
    pub fn for_environment(
        project: &str,
        env: &str,
        zone: &str,
        key_location: impl Into<PathBuf>,
    ) -> Self {
        ProviderSettings {
            project: project.to_string(),
            key_location: key_location.into(),
            cluster: ClusterRef {
                name: format!("{project}-{env}"),
                zone: zone.to_string(),
            },
        }
    }
}

type Factory = Box<
    dyn Fn(&ProviderSettings, Arc<dyn CommandRunner>, Preferences) -> Result<Box<dyn CloudProvider>>
        + Send
        + Sync,
>;

/// Provider constructors keyed by their tag (`gcp`, ...).
pub struct ProviderRegistry {
    factories: BTreeMap<String, Factory>,
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        let mut registry = ProviderRegistry::empty();
        registry.register(gcp::TAG, |settings, runner, prefs| {
            Ok(Box::new(gcp::GcpProvider::new(settings, runner, prefs)?) as Box<dyn CloudProvider>)
        });
        registry
    }
}

impl ProviderRegistry {
    pub fn empty() -> Self {
        ProviderRegistry {
            factories: BTreeMap::new(),
        }
    }

    pub fn register<F>(&mut self, tag: &str, factory: F)
    where
        F: Fn(&ProviderSettings, Arc<dyn CommandRunner>, Preferences) -> Result<Box<dyn CloudProvider>>
            + Send
            + Sync
            + 'static,
    {
        self.factories.insert(tag.to_string(), Box::new(factory));
    }

    pub fn tags(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    pub fn build(
        &self,
        tag: &str,
        settings: &ProviderSettings,
        runner: Arc<dyn CommandRunner>,
        prefs: Preferences,
    ) -> Result<Box<dyn CloudProvider>> {
        let factory = self.factories.get(tag).ok_or_else(|| {
            Error::validation(format!(
                "unsupported provider {tag:?}, expected one of: {}",
                self.tags().collect::<Vec<_>>().join(", ")
            ))
        })?;

        factory(settings, runner, prefs)
    }

    /// Rebuilds the provider recorded by a previous `setup-environment`.
    pub fn from_preferences(
        &self,
        runner: Arc<dyn CommandRunner>,
        prefs: Preferences,
    ) -> Result<Box<dyn CloudProvider>> {
        let tag = prefs.require(preferences::PROVIDER)?;
        let settings = ProviderSettings {
            project: prefs.require(preferences::PROJECT)?,
            key_location: PathBuf::from(prefs.require(preferences::KEY_LOCATION)?),
            cluster: ClusterRef {
                name: prefs.require(preferences::CLUSTER_NAME)?,
                zone: prefs.require(preferences::CLUSTER_ZONE)?,
            },
        };

        self.build(&tag, &settings, runner, prefs)
    }
}

/// Authenticates and, unless `bind_cluster` is false, binds the cluster.
pub async fn setup(provider: &dyn CloudProvider, bind_cluster: bool) -> Result<()> {
    let outcome = provider.authenticate().await?;
    if outcome.was_created() {
        info!("activated {}", outcome.into_inner());
    } else {
        info!("already authenticated as {}", outcome.into_inner());
    }

    if bind_cluster {
        provider.bind_cluster().await?;
    }

    Ok(())
}
