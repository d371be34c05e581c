use serde::{Deserialize, Serialize};

pub const AUTH_STATUS_ACTIVE: &str = "ACTIVE";

/// One entry of `gcloud auth list --format json`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthEntry {
    pub account: String,
    #[serde(default)]
    pub status: String,
}

impl AuthEntry {
    pub fn is_active(&self) -> bool {
        self.status == AUTH_STATUS_ACTIVE
    }
}

/// The JSON credential file downloaded for a service account.
///
/// Only the fields myiac reads are modelled; the rest of the file is kept
/// opaque.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccountKeyFile {
    pub client_email: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub private_key_id: Option<String>,
}
