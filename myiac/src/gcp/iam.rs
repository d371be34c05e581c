use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use myiac_model::google::{
    CreateServiceAccountKeyRequest, ListServiceAccountKeysResponse, ServiceAccountKey,
};

use super::GoogleApi;
use crate::error::{Error, Result};

const IAM_API: &str = "https://iam.googleapis.com/v1";

/// A freshly minted key. The private key material is only ever returned by
/// the create call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedKey {
    pub key_id: String,
    /// Base64 of the JSON credentials file.
    pub private_key_data: String,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait IamClient: Send + Sync {
    /// IDs of the keys the service account currently has.
    async fn list_key_ids(&self, email: &str) -> Result<Vec<String>>;

    async fn create_key(&self, email: &str) -> Result<CreatedKey>;
}

fn keys_url(email: &str) -> String {
    format!("{IAM_API}/projects/-/serviceAccounts/{email}/keys")
}

pub struct RestIamClient {
    api: Arc<GoogleApi>,
}

impl RestIamClient {
    pub fn new(api: Arc<GoogleApi>) -> Self {
        RestIamClient { api }
    }
}

#[async_trait]
impl IamClient for RestIamClient {
    async fn list_key_ids(&self, email: &str) -> Result<Vec<String>> {
        let response: ListServiceAccountKeysResponse = self.api.get(&keys_url(email), &[]).await?;

        Ok(response
            .keys
            .iter()
            .map(|key| key.key_id().to_string())
            .collect())
    }

    async fn create_key(&self, email: &str) -> Result<CreatedKey> {
        let key: ServiceAccountKey = self
            .api
            .post(
                &keys_url(email),
                &[],
                &CreateServiceAccountKeyRequest::default(),
            )
            .await?;

        let private_key_data = key.private_key_data.clone().ok_or_else(|| {
            Error::validation(format!("IAM returned key {} without key material", key.name))
        })?;

        Ok(CreatedKey {
            key_id: key.key_id().to_string(),
            private_key_data,
        })
    }
}
