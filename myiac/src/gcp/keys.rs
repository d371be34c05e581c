//! Service account keys cached in a bucket.
//!
//! IAM hands out key material only when a key is created, so every key
//! myiac creates is stored as `<email>-<keyId>.json` in the cache bucket and
//! read back from there afterwards.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::{debug, info};

use super::iam::IamClient;
use super::storage::ObjectStore;
use crate::error::{Error, Result};

pub fn cache_object_name(email: &str, key_id: &str) -> String {
    format!("{email}-{key_id}.json")
}

pub struct ServiceAccountKeyCache {
    iam: Arc<dyn IamClient>,
    objects: Arc<dyn ObjectStore>,
    bucket: String,
}

impl ServiceAccountKeyCache {
    pub fn new(iam: Arc<dyn IamClient>, objects: Arc<dyn ObjectStore>, bucket: &str) -> Self {
        ServiceAccountKeyCache {
            iam,
            objects,
            bucket: bucket.to_string(),
        }
    }

    /// JSON credentials for `email`.
    ///
    /// The first existing key with a cached copy wins. A new key is created
    /// (and cached) only when none is cached or `recreate` is set.
    pub async fn key_for_service_account(&self, email: &str, recreate: bool) -> Result<Vec<u8>> {
        if !recreate {
            if let Some(cached) = self.find_cached(email).await? {
                return Ok(cached);
            }
        }

        self.create_and_cache(email).await
    }

    async fn find_cached(&self, email: &str) -> Result<Option<Vec<u8>>> {
        for key_id in self.iam.list_key_ids(email).await? {
            let object = cache_object_name(email, &key_id);

            if let Some(contents) = self.objects.read_object(&self.bucket, &object).await? {
                info!("found cached key {key_id} for {email}");
                return Ok(Some(contents));
            }
            debug!("no cached copy of key {key_id} for {email}");
        }

        Ok(None)
    }

    async fn create_and_cache(&self, email: &str) -> Result<Vec<u8>> {
        info!("creating new key for {email}");
        let created = self.iam.create_key(email).await?;

        let contents = STANDARD
            .decode(created.private_key_data.trim())
            .map_err(|err| {
                Error::validation(format!("key {} has invalid key material: {err}", created.key_id))
            })?;

        let object = cache_object_name(email, &created.key_id);
        self.objects
            .write_object(&self.bucket, &object, contents.clone())
            .await?;

        info!("cached key {} for {email} in {}/{object}", created.key_id, self.bucket);
        Ok(contents)
    }
}
