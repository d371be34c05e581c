//! GKE cluster creation and teardown through Terraform, and Helm installation
//! on a freshly created cluster.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use myiac_model::google::Bucket;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::gcp::storage::BucketStore;
use crate::process::{CommandRunner, CommandSpec};
use crate::provider::ClusterBinder;
use crate::reconcile::{self, Outcome};

pub const STATE_BUCKET_LOCATION: &str = "EU";
pub const INSTALL_HELM_SCRIPT: &str = "install-helm.sh";

const APPLY_SETTLE: Duration = Duration::from_secs(10);
const DESTROY_SETTLE: Duration = Duration::from_secs(5);

pub fn state_bucket_name(project: &str, env: &str) -> String {
    format!("{project}-tfstate-{env}")
}

pub struct ClusterLifecycle {
    runner: Arc<dyn CommandRunner>,
    buckets: Arc<dyn BucketStore>,
    config_path: PathBuf,
    vars_file: PathBuf,
    helper_scripts: PathBuf,
    apply_settle: Duration,
    destroy_settle: Duration,
}

impl ClusterLifecycle {
    pub fn new(runner: Arc<dyn CommandRunner>, buckets: Arc<dyn BucketStore>, config: &Config) -> Self {
        ClusterLifecycle {
            runner,
            buckets,
            config_path: config.tf_config_path.clone(),
            vars_file: config.tf_vars_file.clone(),
            helper_scripts: config.helper_scripts_path.clone(),
            apply_settle: APPLY_SETTLE,
            destroy_settle: DESTROY_SETTLE,
        }
    }

    pub fn with_delays(mut self, apply_settle: Duration, destroy_settle: Duration) -> Self {
        self.apply_settle = apply_settle;
        self.destroy_settle = destroy_settle;
        self
    }

    fn terraform(&self) -> CommandSpec {
        CommandSpec::new("terraform").working_dir(&self.config_path)
    }

    fn var_file_arg(&self) -> String {
        format!("-var-file={}", self.vars_file.display())
    }

    /// Buckets cannot be recreated blindly, so the project's buckets are
    /// listed first.
    pub async fn ensure_state_bucket(&self, project: &str, env: &str) -> Result<Outcome<Bucket>> {
        let name = state_bucket_name(project, env);

        let observed = self
            .buckets
            .list_buckets(project)
            .await?
            .into_iter()
            .find(|bucket| bucket.name == name);

        reconcile::get_or_create("state bucket", &name, observed, || {
            self.buckets
                .create_bucket(project, &name, STATE_BUCKET_LOCATION)
        })
        .await
    }

    pub fn is_initialized(&self) -> bool {
        is_initialized(&self.config_path)
    }

    pub async fn init(&self, project: &str, env: &str) -> Result<()> {
        self.ensure_state_bucket(project, env).await?;

        if self.is_initialized() {
            info!("terraform already initialized in {}", self.config_path.display());
            return Ok(());
        }

        info!("initializing terraform in {}", self.config_path.display());
        self.runner.run(self.terraform().arg("init")).await?;
        Ok(())
    }

    pub async fn plan(&self) -> Result<()> {
        self.runner
            .run(self.terraform().arg("plan").arg(self.var_file_arg()))
            .await?;
        Ok(())
    }

    pub async fn apply(&self) -> Result<()> {
        self.runner
            .run(
                self.terraform()
                    .arg("apply")
                    .arg(self.var_file_arg())
                    .arg("-auto-approve"),
            )
            .await?;
        Ok(())
    }

    /// Runs the helper script installing Helm into the cluster `kubectl`
    /// currently points at.
    pub async fn install_helm(&self) -> Result<()> {
        let script = self.helper_scripts.join(INSTALL_HELM_SCRIPT);
        info!("installing Helm with {}", script.display());

        self.runner
            .run(CommandSpec::new(script.display().to_string()).working_dir(&self.helper_scripts))
            .await?;
        Ok(())
    }

    /// Plans, then applies unless `dry_run`. Once applied and settled, the
    /// new cluster is bound through `binder` and Helm is installed into it.
    ///
    /// Returns whether the cluster was actually applied.
    pub async fn create_cluster<B>(
        &self,
        project: &str,
        env: &str,
        dry_run: bool,
        binder: &B,
    ) -> Result<bool>
    where
        B: ClusterBinder + ?Sized,
    {
        self.init(project, env).await?;
        self.plan().await?;

        if dry_run {
            info!("dry run: stopping after plan");
            return Ok(false);
        }

        self.apply().await?;
        info!(
            "cluster created from {}, waiting {}s for it to settle",
            self.config_path.display(),
            self.apply_settle.as_secs()
        );
        tokio::time::sleep(self.apply_settle).await;

        binder.bind_cluster().await?;
        self.install_helm().await?;
        Ok(true)
    }

    pub async fn destroy_cluster(&self, project: &str, env: &str) -> Result<()> {
        self.init(project, env).await?;

        info!("waiting {}s before destroying cluster", self.destroy_settle.as_secs());
        tokio::time::sleep(self.destroy_settle).await;

        self.runner
            .run(
                self.terraform()
                    .arg("destroy")
                    .arg(self.var_file_arg())
                    .arg("-auto-approve"),
            )
            .await?;

        // The state bucket stays: non-empty buckets cannot be deleted.
        info!("cluster destroyed");
        Ok(())
    }
}

fn is_initialized(config_path: &Path) -> bool {
    config_path.join(".terraform").is_dir()
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::config::test_config;
    use crate::error::Error;
    use crate::gcp::storage::MockBucketStore;
    use crate::process::fake::FakeRunner;
    use crate::provider::MockClusterBinder;

    fn existing_bucket() -> MockBucketStore {
        let mut buckets = MockBucketStore::new();
        buckets.expect_list_buckets().returning(|_| {
            Ok(vec![Bucket {
                name: "moneycol-tfstate-dev".to_string(),
                location: Some("EU".to_string()),
            }])
        });
        buckets.expect_create_bucket().never();
        buckets
    }

    fn lifecycle(
        dir: &tempfile::TempDir,
        runner: Arc<FakeRunner>,
        buckets: MockBucketStore,
    ) -> ClusterLifecycle {
        let config = test_config(dir.path());
        std::fs::create_dir_all(&config.tf_config_path).unwrap();
        ClusterLifecycle::new(runner, Arc::new(buckets), &config)
            .with_delays(Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn missing_state_bucket_is_created_in_eu() {
        let mut buckets = MockBucketStore::new();
        buckets
            .expect_list_buckets()
            .with(eq("moneycol"))
            .times(1)
            .returning(|_| {
                Ok(vec![Bucket {
                    name: "moneycol-keys".to_string(),
                    location: None,
                }])
            });
        buckets
            .expect_create_bucket()
            .with(eq("moneycol"), eq("moneycol-tfstate-dev"), eq("EU"))
            .times(1)
            .returning(|_, name, location| {
                Ok(Bucket {
                    name: name.to_string(),
                    location: Some(location.to_string()),
                })
            });

        let dir = tempfile::tempdir().unwrap();
        let outcome = lifecycle(&dir, Arc::new(FakeRunner::new()), buckets)
            .ensure_state_bucket("moneycol", "dev")
            .await
            .unwrap();

        assert!(outcome.was_created());
    }

    fn binder(binds: usize) -> MockClusterBinder {
        let mut binder = MockClusterBinder::new();
        binder.expect_bind_cluster().times(binds).returning(|| Ok(()));
        binder.expect_resize_node_pool().never();
        binder
    }

    fn install_helm_line(dir: &tempfile::TempDir) -> String {
        test_config(dir.path())
            .helper_scripts_path
            .join(INSTALL_HELM_SCRIPT)
            .display()
            .to_string()
    }

    #[tokio::test]
    async fn create_applies_then_binds_and_installs_helm() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let lifecycle = lifecycle(&dir, runner.clone(), existing_bucket());

        assert!(lifecycle
            .create_cluster("moneycol", "dev", false, &binder(1))
            .await
            .unwrap());

        let config = test_config(dir.path());
        let vars = config.tf_vars_file.display();
        assert_eq!(
            runner.commands(),
            [
                "terraform init".to_string(),
                format!("terraform plan -var-file={vars}"),
                format!("terraform apply -var-file={vars} -auto-approve"),
                install_helm_line(&dir),
            ]
        );

        let specs = runner.specs();
        assert!(specs[..3]
            .iter()
            .all(|spec| spec.get_working_dir() == Some(config.tf_config_path.as_path())));
        assert_eq!(
            specs[3].get_working_dir(),
            Some(config.helper_scripts_path.as_path())
        );
    }

    #[tokio::test]
    async fn dry_run_stops_after_plan() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());

        let applied = lifecycle(&dir, runner.clone(), existing_bucket())
            .create_cluster("moneycol", "dev", true, &binder(0))
            .await
            .unwrap();

        assert!(!applied);
        assert_eq!(runner.count_prefix("terraform plan"), 1);
        assert_eq!(runner.count_prefix("terraform apply"), 0);
        assert_eq!(runner.count(&install_helm_line(&dir)), 0);
    }

    #[tokio::test]
    async fn failed_apply_never_installs_helm() {
        let dir = tempfile::tempdir().unwrap();
        let vars = test_config(dir.path()).tf_vars_file;
        let runner = Arc::new(FakeRunner::new().fail(
            &format!("terraform apply -var-file={} -auto-approve", vars.display()),
            1,
        ));

        let result = lifecycle(&dir, runner.clone(), existing_bucket())
            .create_cluster("moneycol", "dev", false, &binder(0))
            .await;

        assert!(matches!(result, Err(Error::ProcessFailure { .. })));
        assert_eq!(runner.count(&install_helm_line(&dir)), 0);
    }

    #[tokio::test]
    async fn failed_binding_skips_helm() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let mut binder = MockClusterBinder::new();
        binder.expect_bind_cluster().times(1).returning(|| {
            Err(Error::ProcessFailure {
                command: "gcloud container clusters get-credentials moneycol-dev".to_string(),
                code: Some(1),
            })
        });

        let result = lifecycle(&dir, runner.clone(), existing_bucket())
            .create_cluster("moneycol", "dev", false, &binder)
            .await;

        assert!(result.is_err());
        assert_eq!(runner.count_prefix("terraform apply"), 1);
        assert_eq!(runner.count(&install_helm_line(&dir)), 0);
    }

    #[tokio::test]
    async fn initialized_directory_skips_init() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());
        let lifecycle = lifecycle(&dir, runner.clone(), existing_bucket());
        std::fs::create_dir_all(test_config(dir.path()).tf_config_path.join(".terraform")).unwrap();

        lifecycle.destroy_cluster("moneycol", "dev").await.unwrap();

        let vars = test_config(dir.path()).tf_vars_file;
        assert_eq!(
            runner.commands(),
            [format!("terraform destroy -var-file={} -auto-approve", vars.display())]
        );
    }

    #[tokio::test]
    async fn failed_plan_never_applies() {
        let dir = tempfile::tempdir().unwrap();
        let vars = test_config(dir.path()).tf_vars_file;
        let runner = Arc::new(
            FakeRunner::new().fail(&format!("terraform plan -var-file={}", vars.display()), 1),
        );

        let err = lifecycle(&dir, runner.clone(), existing_bucket())
            .create_cluster("moneycol", "dev", false, &binder(0))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::ProcessFailure { .. }));
        assert_eq!(runner.count_prefix("terraform apply"), 0);
    }

    #[tokio::test]
    async fn bucket_listing_failure_stops_before_terraform() {
        let mut buckets = MockBucketStore::new();
        buckets.expect_list_buckets().returning(|_| {
            Err(Error::Api {
                status: 403,
                message: "storage.buckets.list denied".to_string(),
            })
        });
        buckets.expect_create_bucket().never();

        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FakeRunner::new());

        assert!(lifecycle(&dir, runner.clone(), buckets)
            .create_cluster("moneycol", "dev", false, &binder(0))
            .await
            .is_err());
        assert!(runner.commands().is_empty());
    }
}
