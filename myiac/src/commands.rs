//! Subcommands: flags plus the wiring from flags to components.

use std::io::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{ArgGroup, Args, ValueEnum};
use tracing::{debug, info};

use crate::config::{parse_key_values, split_list, Config};
use crate::dns::{self, DnsChangeRequest};
use crate::docker::{self, Docker};
use crate::error::Result;
use crate::gcp::iam::RestIamClient;
use crate::gcp::keys::ServiceAccountKeyCache;
use crate::gcp::kms::{KmsEncrypter, RestKmsClient};
use crate::gcp::storage::CloudStorage;
use crate::gcp::{GcloudTokenSource, GoogleApi};
use crate::helm::{HelmDeployer, HelmDeployment};
use crate::kubernetes::Kubernetes;
use crate::preferences::{self, Preferences};
use crate::process::{CommandRunner, ProcessExecutor};
use crate::provider::{self, CloudProvider, ProviderRegistry, ProviderSettings};
use crate::terraform::ClusterLifecycle;

/// Which cloud, project, environment and identity a command acts on.
#[derive(Debug, Clone, Args)]
pub struct Target {
    /// Cloud provider
    #[arg(long, default_value = "gcp")]
    pub provider: String,

    #[arg(long)]
    pub project: String,

    /// Environment, the cluster is named `<project>-<env>`
    #[arg(long)]
    pub env: String,

    #[arg(long)]
    pub zone: String,

    /// Service account key file
    #[arg(long)]
    pub key_path: PathBuf,
}

impl Target {
    fn settings(&self) -> ProviderSettings {
        ProviderSettings::for_environment(&self.project, &self.env, &self.zone, &self.key_path)
    }
}

fn executor() -> Arc<dyn CommandRunner> {
    Arc::new(ProcessExecutor)
}

fn build_provider(
    target: &Target,
    config: &Config,
    runner: Arc<dyn CommandRunner>,
) -> Result<Box<dyn CloudProvider>> {
    ProviderRegistry::default().build(
        &target.provider,
        &target.settings(),
        runner,
        Preferences::new(&config.preferences_path),
    )
}

/// The provider a previous `setup-environment` left in the preferences.
fn stored_provider(
    config: &Config,
    runner: Arc<dyn CommandRunner>,
) -> Result<(Box<dyn CloudProvider>, Preferences)> {
    let prefs = Preferences::new(&config.preferences_path);
    let provider = ProviderRegistry::default().from_preferences(runner, prefs.clone())?;
    Ok((provider, prefs))
}

fn google_api(runner: Arc<dyn CommandRunner>, credentials: Option<PathBuf>) -> Arc<GoogleApi> {
    Arc::new(GoogleApi::new(Arc::new(GcloudTokenSource::new(
        runner,
        credentials,
    ))))
}

/// Authenticates and points kubectl at the environment's cluster.
#[derive(Debug, Clone, Args)]
pub struct SetupEnvironment {
    #[command(flatten)]
    pub target: Target,

    /// Authenticate only, without binding the cluster
    #[arg(long)]
    pub dry_run: bool,
}

impl SetupEnvironment {
    pub async fn run(self, config: &Config) -> Result<()> {
        let provider = build_provider(&self.target, config, executor())?;
        provider::setup(provider.as_ref(), !self.dry_run).await
    }
}

/// Installs or upgrades the Helm release of an app.
#[derive(Debug, Clone, Args)]
pub struct DeployApp {
    #[command(flatten)]
    pub target: Target,

    /// App name, matched against the chart folders
    #[arg(long)]
    pub app: String,

    /// `--set` overrides as k=v,k2=v2
    #[arg(long)]
    pub properties: Option<String>,

    /// Extra values files, in order
    #[arg(long = "values")]
    pub values: Vec<String>,

    #[arg(long)]
    pub dry_run: bool,
}

impl DeployApp {
    pub async fn run(self, config: &Config) -> Result<()> {
        let runner = executor();
        let provider = build_provider(&self.target, config, runner.clone())?;
        provider::setup(provider.as_ref(), true).await?;

        let mut deployment = HelmDeployment {
            app_name: self.app,
            environment: self.target.env,
            set_params: match &self.properties {
                Some(properties) => parse_key_values(properties)?,
                None => Vec::new(),
            },
            values_files: self.values,
            dry_run: self.dry_run,
        };

        if deployment.needs_node_ips() {
            let ips = Kubernetes::new(runner.clone()).node_ips(true).await?;
            deployment = deployment.with_external_ips(&ips);
        }

        HelmDeployer::new(runner, &config.charts_path)
            .deploy(&deployment)
            .await
    }
}

fn cluster_lifecycle(
    target: &Target,
    config: &Config,
    runner: Arc<dyn CommandRunner>,
) -> ClusterLifecycle {
    let api = google_api(runner.clone(), Some(target.key_path.clone()));
    ClusterLifecycle::new(runner, Arc::new(CloudStorage::new(api)), config)
}

/// Creates the environment's GKE cluster with Terraform and installs Helm
/// into it.
#[derive(Debug, Clone, Args)]
pub struct CreateCluster {
    #[command(flatten)]
    pub target: Target,

    /// Plan only
    #[arg(long)]
    pub dry_run: bool,
}

impl CreateCluster {
    pub async fn run(self, config: &Config) -> Result<()> {
        let runner = executor();
        let provider = build_provider(&self.target, config, runner.clone())?;
        provider::setup(provider.as_ref(), false).await?;

        let applied = cluster_lifecycle(&self.target, config, runner)
            .create_cluster(
                &self.target.project,
                &self.target.env,
                self.dry_run,
                provider.as_ref(),
            )
            .await?;

        if applied {
            info!("cluster {}-{} is ready", self.target.project, self.target.env);
        }
        Ok(())
    }
}

/// Destroys the environment's GKE cluster with Terraform.
#[derive(Debug, Clone, Args)]
pub struct DestroyCluster {
    #[command(flatten)]
    pub target: Target,
}

impl DestroyCluster {
    pub async fn run(self, config: &Config) -> Result<()> {
        let runner = executor();
        let provider = build_provider(&self.target, config, runner.clone())?;
        provider::setup(provider.as_ref(), false).await?;

        cluster_lifecycle(&self.target, config, runner)
            .destroy_cluster(&self.target.project, &self.target.env)
            .await
    }
}

/// Resizes a node pool of the environment's cluster.
#[derive(Debug, Clone, Args)]
pub struct ResizePool {
    #[command(flatten)]
    pub target: Target,

    #[arg(long)]
    pub pool_name: String,

    #[arg(long)]
    pub pool_size: u32,
}

impl ResizePool {
    pub async fn run(self, config: &Config) -> Result<()> {
        let provider = build_provider(&self.target, config, executor())?;
        provider.authenticate().await?;
        provider
            .resize_node_pool(&self.pool_name, self.pool_size)
            .await
    }
}

/// Points DNS entries at the node running the ingress controller.
#[derive(Debug, Clone, Args)]
pub struct UpdateDnsFromClusterIps {
    /// gcp or cloudflare
    #[arg(long)]
    pub dns_provider: String,

    /// Domain the entries live under, e.g. moneycol.net
    #[arg(long)]
    pub domain: String,

    /// Entries to update [default: dev,collections,graphql-dev]
    #[arg(long)]
    pub entries: Option<String>,
}

impl UpdateDnsFromClusterIps {
    pub async fn run(self, config: &Config) -> Result<()> {
        let request =
            DnsChangeRequest::new(&self.dns_provider, &self.domain, &config.cluster_domain)?;

        let runner = executor();
        let (provider, prefs) = stored_provider(config, runner.clone())?;
        provider.authenticate().await?;

        let ip = Kubernetes::new(runner.clone())
            .ingress_controller_node_ip()
            .await?;

        let entries = match &self.entries {
            Some(entries) => split_list(entries),
            None => config.dns_entries.clone(),
        };
        let names = request.fqdn_entries(&entries);

        let project = prefs.require(preferences::PROJECT)?;
        let key = prefs.get(preferences::KEY_LOCATION)?.map(PathBuf::from);
        let google = google_api(runner, key);
        let service = dns::dns_service(request.provider(), config, &project, google)?;

        service.upsert_dns_entries(&names, &ip).await?;
        info!(
            "{} DNS entries {names:?} under {} point at {ip}",
            request.provider(),
            request.domain()
        );
        Ok(())
    }
}

/// Creates a Kubernetes secret from a service account key, literals or a TLS
/// key pair.
#[derive(Debug, Clone, Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["sa_email", "literal", "tls_cert"])
))]
pub struct CreateSecret {
    #[arg(long)]
    pub secret_name: String,

    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Service account whose key becomes `<secret-name>.json`
    #[arg(long)]
    pub sa_email: Option<String>,

    /// Mint a new key even if a cached one exists
    #[arg(long, requires = "sa_email")]
    pub recreate_sa_key: bool,

    /// Literal entries as k=v,k2=v2
    #[arg(long)]
    pub literal: Option<String>,

    /// PEM certificate of a TLS secret
    #[arg(long, requires = "tls_key")]
    pub tls_cert: Option<PathBuf>,

    /// PEM private key of a TLS secret
    #[arg(long, requires = "tls_cert")]
    pub tls_key: Option<PathBuf>,
}

impl CreateSecret {
    pub async fn run(self, config: &Config) -> Result<()> {
        let runner = executor();
        let (provider, prefs) = stored_provider(config, runner.clone())?;
        provider.authenticate().await?;

        let kubernetes = Kubernetes::new(runner.clone());

        if let Some(literal) = &self.literal {
            let literals = parse_key_values(literal)?;
            kubernetes
                .create_literal_secret(&self.secret_name, &self.namespace, &literals)
                .await?;
        } else if let (Some(cert), Some(key)) = (&self.tls_cert, &self.tls_key) {
            kubernetes
                .create_tls_secret(&self.secret_name, &self.namespace, key, cert)
                .await?;
        } else if let Some(email) = &self.sa_email {
            let project = prefs.require(preferences::PROJECT)?;
            let key = prefs.get(preferences::KEY_LOCATION)?.map(PathBuf::from);
            let api = google_api(runner, key);
            let cache = ServiceAccountKeyCache::new(
                Arc::new(RestIamClient::new(api.clone())),
                Arc::new(CloudStorage::new(api)),
                &config.keys_bucket_for(&project),
            );

            let key_json = cache
                .key_for_service_account(email, self.recreate_sa_key)
                .await?;

            let mut file = tempfile::NamedTempFile::new()?;
            file.write_all(&key_json)?;
            file.flush()?;

            kubernetes
                .create_file_secret(&self.secret_name, &self.namespace, file.path())
                .await?;
        }

        let found = kubernetes
            .find_secret(&self.secret_name, &self.namespace)
            .await?;
        debug!("{found}");
        info!("secret {} ready in {}", self.secret_name, self.namespace);
        Ok(())
    }
}

/// Lets `docker` push to the provider's registry.
#[derive(Debug, Clone, Args)]
pub struct DockerSetup {
    #[command(flatten)]
    pub target: Target,
}

impl DockerSetup {
    pub async fn run(self, config: &Config) -> Result<()> {
        let runner = executor();
        let provider = build_provider(&self.target, config, runner.clone())?;
        provider::setup(provider.as_ref(), false).await?;

        Docker::new(runner).configure_registry_auth().await
    }
}

/// Builds an app image tagged `<version>-<commit>` and pushes it.
#[derive(Debug, Clone, Args)]
pub struct DockerBuild {
    #[arg(long)]
    pub project: String,

    /// Directory holding the Dockerfile
    #[arg(long)]
    pub build_path: PathBuf,

    /// Image repository, matching the app's chart folder (moneycol-server, ...)
    #[arg(long)]
    pub app: String,

    /// Semver of the build
    #[arg(long)]
    pub version: String,

    /// Commit hash for the tag [default: HEAD of the build path]
    #[arg(long)]
    pub commit: Option<String>,

    #[arg(long, default_value = docker::DEFAULT_REGISTRY)]
    pub registry: String,
}

impl DockerBuild {
    pub async fn run(self, config: &Config) -> Result<()> {
        let runner = executor();
        let (provider, _) = stored_provider(config, runner.clone())?;
        provider.authenticate().await?;

        let docker = Docker::new(runner);
        docker.configure_registry_auth().await?;

        let commit = match self.commit {
            Some(commit) => commit,
            None => docker.head_commit(&self.build_path).await?,
        };

        let image = docker::image_reference(
            &self.registry,
            &self.project,
            &self.app,
            &self.version,
            &commit,
        );
        docker.build_and_push(&self.build_path, &image).await?;

        println!("{image}");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CryptMode {
    Encrypt,
    Decrypt,
}

/// Encrypts to `<file>.enc` or decrypts to `<file>.dec` with the project's
/// KMS key.
#[derive(Debug, Clone, Args)]
pub struct Crypt {
    #[arg(long)]
    pub project: String,

    #[arg(long, value_enum)]
    pub mode: CryptMode,

    #[arg(long)]
    pub filename: PathBuf,
}

impl Crypt {
    pub async fn run(self, config: &Config) -> Result<()> {
        let prefs = Preferences::new(&config.preferences_path);
        let key = prefs.get(preferences::KEY_LOCATION)?.map(PathBuf::from);
        let client = RestKmsClient::new(google_api(executor(), key));

        let encrypter =
            KmsEncrypter::for_project(Arc::new(client), &self.project, &config.kms_location);

        let written = match self.mode {
            CryptMode::Encrypt => encrypter.encrypt_file(&self.filename).await?,
            CryptMode::Decrypt => encrypter.decrypt_file(&self.filename).await?,
        };

        println!("{}", written.display());
        Ok(())
    }
}

/// Prints one IP per cluster node.
#[derive(Debug, Clone, Args)]
pub struct ClusterIps {
    /// Internal instead of external addresses
    #[arg(long)]
    pub internal: bool,
}

impl ClusterIps {
    pub async fn run(self) -> Result<()> {
        for ip in Kubernetes::new(executor()).node_ips(self.internal).await? {
            println!("{ip}");
        }
        Ok(())
    }
}
