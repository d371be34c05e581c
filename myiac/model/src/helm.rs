use serde::{Deserialize, Serialize};

pub const STATUS_DEPLOYED: &str = "deployed";
pub const STATUS_FAILED: &str = "failed";

/// One entry of `helm list --output json`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub updated: String,
    pub status: String,
    /// Chart name and version, e.g. `traefik-1.78.4`.
    pub chart: String,
    #[serde(default)]
    pub app_version: String,
}

impl Release {
    pub fn is_deployed(&self) -> bool {
        self.status == STATUS_DEPLOYED
    }

    /// Helm 2 printed `FAILED`, Helm 3 prints `failed`.
    pub fn is_failed(&self) -> bool {
        self.status.eq_ignore_ascii_case(STATUS_FAILED)
    }

    /// Whether the chart identifier mentions `app_name`, ignoring case.
    pub fn chart_mentions(&self, app_name: &str) -> bool {
        self.chart
            .to_lowercase()
            .contains(&app_name.to_lowercase())
    }
}
