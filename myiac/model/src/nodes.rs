use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;

/// Position of the internal address in a node's `status.addresses`.
pub const INTERNAL_ADDRESS_INDEX: usize = 0;
/// Position of the external address in a node's `status.addresses`.
pub const EXTERNAL_ADDRESS_INDEX: usize = 1;

/// Output of `kubectl get nodes -o json`.
///
/// kubectl reports this as a generic `List`, so the items are read directly
/// rather than through `k8s_openapi::List<Node>`, which insists on `NodeList`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct NodeList {
    #[serde(default)]
    pub items: Vec<Node>,
}

impl NodeList {
    /// Collects one address per node: index 0 when `internal`, index 1 otherwise.
    ///
    /// Nodes that do not report an address at that position are skipped.
    pub fn ips(&self, internal: bool) -> Vec<String> {
        let index = if internal {
            INTERNAL_ADDRESS_INDEX
        } else {
            EXTERNAL_ADDRESS_INDEX
        };

        self.items
            .iter()
            .filter_map(|node| address_at(node, index))
            .map(str::to_string)
            .collect()
    }
}

pub fn address_at(node: &Node, index: usize) -> Option<&str> {
    node.status
        .as_ref()?
        .addresses
        .as_ref()?
        .get(index)
        .map(|address| address.address.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODES: &str = indoc::indoc! { r#"
        {
          "apiVersion": "v1",
          "kind": "List",
          "items": [
            {
              "apiVersion": "v1",
              "kind": "Node",
              "metadata": {"name": "gke-pool-1"},
              "status": {"addresses": [
                {"type": "InternalIP", "address": "10.132.0.2"},
                {"type": "ExternalIP", "address": "34.77.93.11"}
              ]}
            },
            {
              "apiVersion": "v1",
              "kind": "Node",
              "metadata": {"name": "gke-pool-2"},
              "status": {"addresses": [
                {"type": "InternalIP", "address": "10.132.0.3"},
                {"type": "ExternalIP", "address": "34.77.93.12"}
              ]}
            }
          ]
        }
    "#};

    #[test]
    fn internal_ips_come_from_first_address() {
        let nodes: NodeList = serde_json::from_str(NODES).unwrap();
        assert_eq!(nodes.ips(true), vec!["10.132.0.2", "10.132.0.3"]);
    }

    #[test]
    fn external_ips_come_from_second_address() {
        let nodes: NodeList = serde_json::from_str(NODES).unwrap();
        assert_eq!(nodes.ips(false), vec!["34.77.93.11", "34.77.93.12"]);
    }

    #[test]
    fn nodes_without_addresses_are_skipped() {
        let nodes: NodeList = serde_json::from_str(
            r#"{"items": [{"metadata": {"name": "booting"}, "status": {}}]}"#,
        )
        .unwrap();

        assert!(nodes.ips(true).is_empty());
    }
}
