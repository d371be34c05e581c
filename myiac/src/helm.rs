//! Helm release resolution and install-or-upgrade.

use std::path::{Path, PathBuf};
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use myiac_model::{parse_json_array, Release};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};

/// Apps fronting the cluster that need the node IPs passed as `externalIps`.
const INGRESS_APPS: &[&str] = &["traefik", "traefik-dev", "test"];

/// Desired state of one Helm deployment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HelmDeployment {
    pub app_name: String,
    pub environment: String,
    /// `--set` overrides, in the order they are passed.
    pub set_params: Vec<(String, String)>,
    pub values_files: Vec<String>,
    pub dry_run: bool,
}

impl HelmDeployment {
    pub fn needs_node_ips(&self) -> bool {
        INGRESS_APPS.contains(&self.app_name.as_str())
    }

    /// Helm's list syntax needs escaped commas: `externalIps={ip1\,ip2}`.
    pub fn with_external_ips(mut self, ips: &[String]) -> Self {
        self.set_params
            .insert(0, ("externalIps".to_string(), format!("{{{}}}", ips.join("\\,"))));
        self
    }
}

/// Lists the chart folders available under a charts root.
#[cfg_attr(test, automock)]
pub trait ChartDirectory: Send + Sync {
    fn chart_names(&self, root: &Path) -> Result<Vec<String>>;
}

pub struct FsChartDirectory;

impl ChartDirectory for FsChartDirectory {
    fn chart_names(&self, root: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}

/// Lowercased, trimmed and without hyphens, so `collections-api` matches
/// a `CollectionsApi` folder.
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase().replace('-', "")
}

pub struct HelmDeployer {
    runner: Arc<dyn CommandRunner>,
    charts_path: PathBuf,
    charts: Box<dyn ChartDirectory>,
}

impl HelmDeployer {
    pub fn new(runner: Arc<dyn CommandRunner>, charts_path: impl Into<PathBuf>) -> Self {
        HelmDeployer {
            runner,
            charts_path: charts_path.into(),
            charts: Box::new(FsChartDirectory),
        }
    }

    #[cfg(test)]
    pub fn with_chart_directory(mut self, charts: impl ChartDirectory + 'static) -> Self {
        self.charts = Box::new(charts);
        self
    }

    /// `helm list`, where blank output means there are no releases.
    pub async fn list_releases(&self) -> Result<Vec<Release>> {
        let output = self
            .runner
            .run(
                CommandSpec::new("helm")
                    .args(["list", "--output", "json"])
                    .suppress_echo(),
            )
            .await?
            .output();

        parse_json_array(&output).map_err(|source| Error::parse("helm list output", source))
    }

    /// Deletes every release in a failed state. Returns how many were found.
    pub async fn delete_failed_releases(&self) -> Result<usize> {
        let releases = self.list_releases().await?;
        let mut reaped = 0;

        for release in releases.iter().filter(|release| release.is_failed()) {
            warn!("deleting failed Helm release {}", release.name);
            self.runner
                .run(
                    CommandSpec::new("helm")
                        .arg("delete")
                        .arg(&release.name)
                        .ignore_failure(),
                )
                .await?;
            reaped += 1;
        }

        Ok(reaped)
    }

    /// Name of the deployed release whose chart mentions `app_name`.
    ///
    /// Failed releases are reaped on the way.
    pub async fn release_for(&self, app_name: &str) -> Result<Option<String>> {
        let releases = self.list_releases().await?;
        self.delete_failed_releases().await?;

        let found = releases
            .into_iter()
            .find(|release| release.chart_mentions(app_name) && release.is_deployed());

        match found {
            Some(release) => {
                info!(
                    "release for {app_name} found: {} ({}, {})",
                    release.name, release.chart, release.status
                );
                Ok(Some(release.name))
            }
            None => {
                debug!("no deployed release for {app_name}");
                Ok(None)
            }
        }
    }

    #[cfg(test)]
    pub async fn deployed_release_exists_for(&self, app_name: &str) -> Result<bool> {
        Ok(self.release_for(app_name).await?.is_some())
    }

    pub fn find_chart_for_app(&self, app_name: &str) -> Result<PathBuf> {
        let wanted = normalize_name(app_name);

        self.charts
            .chart_names(&self.charts_path)?
            .into_iter()
            .find(|folder| normalize_name(folder) == wanted)
            .map(|folder| self.charts_path.join(folder))
            .ok_or_else(|| {
                Error::not_found(format!(
                    "chart for app {app_name} in {}",
                    self.charts_path.display()
                ))
            })
    }

    /// Upgrades the app's deployed release, or installs it under the app's
    /// name when there is none.
    pub async fn deploy(&self, deployment: &HelmDeployment) -> Result<()> {
        let chart = self.find_chart_for_app(&deployment.app_name)?;

        let mut spec = match self.release_for(&deployment.app_name).await? {
            Some(release) => CommandSpec::new("helm").arg("upgrade").arg(release),
            None => CommandSpec::new("helm")
                .arg("install")
                .arg(&deployment.app_name),
        }
        .arg(chart.display().to_string());

        for values in &deployment.values_files {
            spec = spec.arg("--values").arg(values);
        }

        for (key, value) in &deployment.set_params {
            spec = spec.arg("--set").arg(format!("{key}={value}"));
        }

        if deployment.dry_run {
            spec = spec.args(["--debug", "--dry-run"]);
        }

        self.runner.run(spec).await?;
        info!(
            "deployed {} to {}",
            deployment.app_name, deployment.environment
        );

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::process::fake::FakeRunner;

    const HELM_LIST: &str = "helm list --output json";

    const TRAEFIK_AND_FAILED_ES: &str = indoc::indoc! { r#"
        [
          {"name": "traefik", "revision": "3", "updated": "2021-11-28 18:33:59 +0000 UTC",
           "status": "deployed", "chart": "traefik-1.78.4", "app_version": "1.7.14",
           "namespace": "default"},
          {"name": "elasticsearch", "revision": "1", "updated": "2021-11-24 07:34:26 +0000 UTC",
           "status": "failed", "chart": "elasticsearch-1.0.0", "app_version": "6.5.0",
           "namespace": "default"}
        ]
    "#};

    fn charts(names: &'static [&'static str]) -> MockChartDirectory {
        let mut charts = MockChartDirectory::new();
        charts
            .expect_chart_names()
            .with(eq(Path::new("/charts")))
            .returning(move |_| Ok(names.iter().map(|name| name.to_string()).collect()));
        charts
    }

    fn deployer(runner: &Arc<FakeRunner>) -> HelmDeployer {
        HelmDeployer::new(runner.clone(), "/charts")
    }

    #[tokio::test]
    async fn deployed_release_is_found_and_failed_one_reaped() {
        let runner = Arc::new(FakeRunner::new().on(HELM_LIST, TRAEFIK_AND_FAILED_ES));
        let deployer = deployer(&runner);

        assert!(deployer.deployed_release_exists_for("traefik").await.unwrap());
        assert!(!deployer
            .deployed_release_exists_for("elasticsearch")
            .await
            .unwrap());

        assert!(runner.count("helm delete elasticsearch") >= 1);
        assert_eq!(runner.count("helm delete traefik"), 0);
        assert!(runner
            .specs()
            .iter()
            .filter(|spec| spec.get_args().first().map(String::as_str) == Some("delete"))
            .all(|spec| spec.is_failure_ignored()));
    }

    #[tokio::test]
    async fn only_deployed_status_counts() {
        let runner = Arc::new(FakeRunner::new().on(
            HELM_LIST,
            r#"[{"name": "traefik", "status": "pending-upgrade", "chart": "traefik-1.78.4"},
                {"name": "old-traefik", "status": "superseded", "chart": "traefik-1.70.0"}]"#,
        ));

        assert_eq!(deployer(&runner).release_for("traefik").await.unwrap(), None);
    }

    #[tokio::test]
    async fn chart_match_ignores_case() {
        let runner = Arc::new(FakeRunner::new().on(
            HELM_LIST,
            r#"[{"name": "front", "status": "deployed", "chart": "MoneycolFrontend-0.1.0"}]"#,
        ));

        assert_eq!(
            deployer(&runner).release_for("moneycolfrontend").await.unwrap(),
            Some("front".to_string())
        );
    }

    #[tokio::test]
    async fn reaping_twice_deletes_once() {
        let runner = Arc::new(
            FakeRunner::new()
                .on(HELM_LIST, TRAEFIK_AND_FAILED_ES)
                .on(
                    HELM_LIST,
                    r#"[{"name": "traefik", "status": "deployed", "chart": "traefik-1.78.4"}]"#,
                ),
        );
        let deployer = deployer(&runner);

        assert_eq!(deployer.delete_failed_releases().await.unwrap(), 1);
        assert_eq!(deployer.delete_failed_releases().await.unwrap(), 0);
        assert_eq!(runner.count_prefix("helm delete"), 1);
    }

    #[tokio::test]
    async fn blank_list_output_means_no_releases() {
        let runner = Arc::new(FakeRunner::new().on(HELM_LIST, " \n"));

        assert!(deployer(&runner).list_releases().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_list_output_is_a_parse_error() {
        let runner = Arc::new(FakeRunner::new().on(HELM_LIST, "Error: Kubernetes cluster unreachable"));

        let err = deployer(&runner).list_releases().await.unwrap_err();
        assert!(matches!(err, Error::Parse { .. }));
    }

    #[test]
    fn chart_folder_matches_normalized_name() {
        let runner = Arc::new(FakeRunner::new());
        let deployer = deployer(&runner).with_chart_directory(charts(&["elasticsearch", "Collections-Api"]));

        assert_eq!(
            deployer.find_chart_for_app("collectionsapi").unwrap(),
            PathBuf::from("/charts/Collections-Api")
        );
    }

    #[test]
    fn missing_chart_is_not_found() {
        let runner = Arc::new(FakeRunner::new());
        let deployer = deployer(&runner).with_chart_directory(charts(&["elasticsearch"]));

        assert!(deployer.find_chart_for_app("traefik").unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn installs_under_app_name_when_not_deployed() {
        let runner = Arc::new(FakeRunner::new().on(HELM_LIST, ""));
        let deployer = deployer(&runner).with_chart_directory(charts(&["traefik-dev"]));

        let deployment = HelmDeployment {
            app_name: "traefik-dev".to_string(),
            environment: "dev".to_string(),
            set_params: vec![("replicas".to_string(), "2".to_string())],
            values_files: vec!["base.yaml".to_string(), "dev.yaml".to_string()],
            dry_run: true,
        }
        .with_external_ips(&["10.0.0.1".to_string(), "10.0.0.2".to_string()]);

        deployer.deploy(&deployment).await.unwrap();

        assert_eq!(
            runner.commands().last().unwrap(),
            r"helm install traefik-dev /charts/traefik-dev --values base.yaml --values dev.yaml --set externalIps={10.0.0.1\,10.0.0.2} --set replicas=2 --debug --dry-run"
        );
    }

    #[tokio::test]
    async fn upgrades_existing_release() {
        let runner = Arc::new(FakeRunner::new().on(HELM_LIST, TRAEFIK_AND_FAILED_ES));
        let deployer = deployer(&runner).with_chart_directory(charts(&["traefik"]));

        deployer
            .deploy(&HelmDeployment {
                app_name: "traefik".to_string(),
                environment: "dev".to_string(),
                ..HelmDeployment::default()
            })
            .await
            .unwrap();

        assert_eq!(
            runner.commands().last().unwrap(),
            "helm upgrade traefik /charts/traefik"
        );
    }

    #[test]
    fn only_ingress_apps_need_node_ips() {
        let app = |name: &str| HelmDeployment {
            app_name: name.to_string(),
            ..HelmDeployment::default()
        };

        assert!(app("traefik").needs_node_ips());
        assert!(app("test").needs_node_ips());
        assert!(!app("elasticsearch").needs_node_ips());
    }

    #[test]
    fn fs_chart_directory_lists_folders_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("traefik")).unwrap();
        std::fs::create_dir(dir.path().join("elasticsearch")).unwrap();
        std::fs::write(dir.path().join("README.md"), "").unwrap();

        assert_eq!(
            FsChartDirectory.chart_names(dir.path()).unwrap(),
            ["elasticsearch", "traefik"]
        );
    }
}
