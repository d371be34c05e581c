//! `kubectl` operations: node addresses, the ingress node and secrets.

use std::path::Path;
use std::sync::Arc;

use k8s_openapi::api::core::v1::Node;
use myiac_model::nodes::{address_at, EXTERNAL_ADDRESS_INDEX};
use myiac_model::NodeList;
use tracing::info;

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};

/// Label selecting the ingress controller pods.
pub const INGRESS_SELECTOR: &str = "app=traefik";

pub struct Kubernetes {
    runner: Arc<dyn CommandRunner>,
}

impl Kubernetes {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Kubernetes { runner }
    }

    async fn json_output(&self, spec: CommandSpec, what: &str) -> Result<String> {
        let output = self.runner.run(spec.suppress_echo()).await?.output();
        if output.trim().is_empty() {
            return Err(Error::not_found(what.to_string()));
        }
        Ok(output)
    }

    pub async fn nodes(&self) -> Result<NodeList> {
        let output = self
            .json_output(
                CommandSpec::new("kubectl").args(["get", "nodes", "-o", "json"]),
                "cluster nodes",
            )
            .await?;

        serde_json::from_str(&output).map_err(|source| Error::parse("kubectl node list", source))
    }

    /// One address per node: the internal one (index 0) or the external one
    /// (index 1).
    pub async fn node_ips(&self, internal: bool) -> Result<Vec<String>> {
        let ips = self.nodes().await?.ips(internal);
        info!(
            "{} IPs for nodes in cluster: {ips:?}",
            if internal { "internal" } else { "public" }
        );
        Ok(ips)
    }

    /// External IP of the node running the ingress controller.
    ///
    /// Traffic reaches the cluster through that single node, so DNS entries
    /// point at it.
    pub async fn ingress_controller_node_ip(&self) -> Result<String> {
        let node_name = self
            .runner
            .run(
                CommandSpec::new("kubectl")
                    .args(["get", "pods", "-l", INGRESS_SELECTOR])
                    .args(["--field-selector", "status.phase=Running"])
                    .args(["-o", "jsonpath={.items[0].spec.nodeName}"])
                    .suppress_echo(),
            )
            .await?
            .output()
            .trim()
            .trim_matches('\'')
            .to_string();

        if node_name.is_empty() {
            return Err(Error::not_found(format!(
                "running ingress controller pod ({INGRESS_SELECTOR})"
            )));
        }

        let output = self
            .json_output(
                CommandSpec::new("kubectl")
                    .args(["get", "node"])
                    .arg(&node_name)
                    .args(["-o", "json"]),
                &format!("node {node_name}"),
            )
            .await?;

        let node: Node = serde_json::from_str(&output)
            .map_err(|source| Error::parse(format!("node {node_name}"), source))?;

        let ip = address_at(&node, EXTERNAL_ADDRESS_INDEX)
            .ok_or_else(|| Error::not_found(format!("external address of node {node_name}")))?;

        info!("ingress controller runs on {node_name} ({ip})");
        Ok(ip.to_string())
    }

    /// Secrets are replaced, never patched: any existing one is removed first.
    async fn delete_secret(&self, name: &str, namespace: &str) -> Result<()> {
        self.runner
            .run(
                CommandSpec::new("kubectl")
                    .args(["delete", "secret", name, "-n", namespace])
                    .suppress_echo()
                    .ignore_failure(),
            )
            .await?;
        Ok(())
    }

    /// `<name>.json` inside the secret holds the file contents.
    pub async fn create_file_secret(&self, name: &str, namespace: &str, path: &Path) -> Result<()> {
        self.delete_secret(name, namespace).await?;

        self.runner
            .run(
                CommandSpec::new("kubectl")
                    .args(["create", "secret", "generic", name])
                    .arg(format!("--from-file={name}.json={}", path.display()))
                    .args(["-n", namespace]),
            )
            .await?;

        info!("created secret {name} in {namespace} from {}", path.display());
        Ok(())
    }

    pub async fn create_literal_secret(
        &self,
        name: &str,
        namespace: &str,
        literals: &[(String, String)],
    ) -> Result<()> {
        if literals.is_empty() {
            return Err(Error::validation(format!(
                "secret {name} needs at least one literal"
            )));
        }

        self.delete_secret(name, namespace).await?;

        let mut spec = CommandSpec::new("kubectl").args(["create", "secret", "generic", name]);
        for (key, value) in literals {
            info!("adding secret literal {key} -> *****");
            spec = spec.secret_arg(format!("--from-literal={key}={value}"));
        }

        self.runner
            .run(spec.args(["-n", namespace]).suppress_echo())
            .await?;
        Ok(())
    }

    pub async fn create_tls_secret(
        &self,
        name: &str,
        namespace: &str,
        key_file: &Path,
        cert_file: &Path,
    ) -> Result<()> {
        self.delete_secret(name, namespace).await?;

        self.runner
            .run(
                CommandSpec::new("kubectl")
                    .args(["-n", namespace, "create", "secret", "tls", name])
                    .arg(format!("--key={}", key_file.display()))
                    .arg(format!("--cert={}", cert_file.display()))
                    .suppress_echo(),
            )
            .await?;
        Ok(())
    }

    pub async fn find_secret(&self, name: &str, namespace: &str) -> Result<String> {
        Ok(self
            .runner
            .run(
                CommandSpec::new("kubectl")
                    .args(["get", "secret", name, "-n", namespace])
                    .suppress_echo(),
            )
            .await?
            .output())
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::process::fake::FakeRunner;

    const GET_NODES: &str = "kubectl get nodes -o json";
    const INGRESS_POD: &str = "kubectl get pods -l app=traefik --field-selector status.phase=Running -o jsonpath={.items[0].spec.nodeName}";

    const NODES: &str = indoc::indoc! { r#"
        {
          "apiVersion": "v1",
          "kind": "List",
          "items": [
            {"metadata": {"name": "gke-moneycol-dev-pool-1"},
             "status": {"addresses": [
               {"type": "InternalIP", "address": "10.132.0.2"},
               {"type": "ExternalIP", "address": "34.77.93.11"},
               {"type": "Hostname", "address": "gke-moneycol-dev-pool-1"}
             ]}},
            {"metadata": {"name": "gke-moneycol-dev-pool-2"},
             "status": {"addresses": [
               {"type": "InternalIP", "address": "10.132.0.3"},
               {"type": "ExternalIP", "address": "34.77.93.12"}
             ]}}
          ]
        }
    "#};

    const INGRESS_NODE: &str = indoc::indoc! { r#"
        {
          "apiVersion": "v1",
          "kind": "Node",
          "metadata": {"name": "gke-moneycol-dev-pool-2"},
          "status": {"addresses": [
            {"type": "InternalIP", "address": "10.132.0.3"},
            {"type": "ExternalIP", "address": "34.77.93.12"}
          ]}
        }
    "#};

    #[tokio::test]
    async fn node_ips_pick_address_by_position() {
        let runner = Arc::new(FakeRunner::new().on(GET_NODES, NODES));
        let kubernetes = Kubernetes::new(runner.clone());

        assert_eq!(
            kubernetes.node_ips(true).await.unwrap(),
            ["10.132.0.2", "10.132.0.3"]
        );
        assert_eq!(
            kubernetes.node_ips(false).await.unwrap(),
            ["34.77.93.11", "34.77.93.12"]
        );
        assert!(runner.specs().iter().all(|spec| spec.is_echo_suppressed()));
    }

    #[tokio::test]
    async fn ingress_ip_is_external_address_of_its_node() {
        let runner = Arc::new(
            FakeRunner::new()
                .on(INGRESS_POD, "gke-moneycol-dev-pool-2")
                .on("kubectl get node gke-moneycol-dev-pool-2 -o json", INGRESS_NODE),
        );

        let ip = Kubernetes::new(runner)
            .ingress_controller_node_ip()
            .await
            .unwrap();

        assert_eq!(ip, "34.77.93.12");
    }

    #[tokio::test]
    async fn missing_ingress_pod_is_not_found() {
        let runner = Arc::new(FakeRunner::new().on(INGRESS_POD, ""));

        let err = Kubernetes::new(runner.clone())
            .ingress_controller_node_ip()
            .await
            .unwrap_err();

        assert!(err.is_not_found());
        assert_eq!(runner.commands().len(), 1);
    }

    #[tokio::test]
    async fn file_secret_replaces_existing_one() {
        let runner = Arc::new(FakeRunner::new().fail("kubectl delete secret firestore-key -n default", 1));

        Kubernetes::new(runner.clone())
            .create_file_secret("firestore-key", "default", &PathBuf::from("/tmp/key.json"))
            .await
            .unwrap();

        assert_eq!(
            runner.commands(),
            [
                "kubectl delete secret firestore-key -n default",
                "kubectl create secret generic firestore-key --from-file=firestore-key.json=/tmp/key.json -n default",
            ]
        );
        let delete = &runner.specs()[0];
        assert!(delete.is_failure_ignored());
        assert!(delete.is_echo_suppressed());
    }

    #[tokio::test]
    async fn literal_secret_keeps_each_literal_as_one_argument() {
        let runner = Arc::new(FakeRunner::new());
        let literals = vec![
            ("username".to_string(), "devuser".to_string()),
            ("password".to_string(), "S!B *d$zDsb=".to_string()),
        ];

        Kubernetes::new(runner.clone())
            .create_literal_secret("dev-db-secret", "default", &literals)
            .await
            .unwrap();

        let create = &runner.specs()[1];
        assert_eq!(
            create.get_args(),
            [
                "create",
                "secret",
                "generic",
                "dev-db-secret",
                "--from-literal=username=devuser",
                "--from-literal=password=S!B *d$zDsb=",
                "-n",
                "default",
            ]
        );
        assert!(create.is_echo_suppressed());
        assert!(!create.to_string().contains("devuser"));
    }

    #[tokio::test]
    async fn literal_secret_needs_literals() {
        let runner = Arc::new(FakeRunner::new());

        let err = Kubernetes::new(runner.clone())
            .create_literal_secret("empty", "default", &[])
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation(_)));
        assert!(runner.commands().is_empty());
    }

    #[tokio::test]
    async fn tls_secret_uses_key_and_cert_files() {
        let runner = Arc::new(FakeRunner::new());

        Kubernetes::new(runner.clone())
            .create_tls_secret(
                "moneycol-tls",
                "default",
                Path::new("/certs/tls.key"),
                Path::new("/certs/tls.crt"),
            )
            .await
            .unwrap();

        assert_eq!(
            runner.commands()[1],
            "kubectl -n default create secret tls moneycol-tls --key=/certs/tls.key --cert=/certs/tls.crt"
        );
    }

    #[tokio::test]
    async fn find_secret_returns_kubectl_output() {
        let runner = Arc::new(FakeRunner::new().on(
            "kubectl get secret firestore-key -n default",
            "NAME            TYPE     DATA   AGE\nfirestore-key   Opaque   1      3d\n",
        ));

        let output = Kubernetes::new(runner)
            .find_secret("firestore-key", "default")
            .await
            .unwrap();

        assert!(output.contains("Opaque"));
    }
}
