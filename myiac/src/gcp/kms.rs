//! Cloud KMS: key ring and key provisioning, and file encryption with them.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::TryStreamExt;
#[cfg(test)]
use mockall::automock;
use myiac_model::google::{
    CryptoKey, DecryptRequest, DecryptResponse, EncryptRequest, EncryptResponse, KeyRing,
    ListCryptoKeysResponse, ListKeyRingsResponse,
};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::{page_query, paginate, GoogleApi, Page};
use crate::error::{Error, Result};
use crate::reconcile::{self, Outcome};

const KMS_API: &str = "https://cloudkms.googleapis.com/v1";

pub fn location_name(project: &str, location: &str) -> String {
    format!("projects/{project}/locations/{location}")
}

pub fn key_ring_name(project: &str, location: &str, key_ring: &str) -> String {
    format!("{}/keyRings/{key_ring}", location_name(project, location))
}

pub fn crypto_key_name(key_ring_name: &str, key: &str) -> String {
    format!("{key_ring_name}/cryptoKeys/{key}")
}

/// The KMS calls myiac needs. Every name is a full resource name
/// (`projects/../locations/../keyRings/..`).
#[cfg_attr(test, automock)]
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Names of the key rings under `parent` (a location).
    async fn list_key_rings(&self, parent: &str) -> Result<Vec<String>>;

    async fn create_key_ring(&self, parent: &str, key_ring_id: &str) -> Result<String>;

    /// Names of the keys in `key_ring`.
    async fn list_crypto_keys(&self, key_ring: &str) -> Result<Vec<String>>;

    /// Creates a symmetric `ENCRYPT_DECRYPT` key.
    async fn create_crypto_key(&self, key_ring: &str, key_id: &str) -> Result<String>;

    /// Returns the base64 ciphertext.
    async fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<String>;

    async fn decrypt(&self, key: &str, ciphertext: &str) -> Result<Vec<u8>>;
}

pub struct RestKmsClient {
    api: Arc<GoogleApi>,
}

impl RestKmsClient {
    pub fn new(api: Arc<GoogleApi>) -> Self {
        RestKmsClient { api }
    }
}

#[async_trait]
impl KmsClient for RestKmsClient {
    async fn list_key_rings(&self, parent: &str) -> Result<Vec<String>> {
        let url = format!("{KMS_API}/{parent}/keyRings");
        let url = url.as_str();

        paginate(move |token| async move {
            let page: ListKeyRingsResponse = self.api.get(url, &page_query(&token)).await?;
            Ok(Page {
                items: page.key_rings.into_iter().map(|ring| ring.name).collect(),
                next_page_token: page.next_page_token,
            })
        })
        .try_collect()
        .await
    }

    async fn create_key_ring(&self, parent: &str, key_ring_id: &str) -> Result<String> {
        let ring: KeyRing = self
            .api
            .post(
                &format!("{KMS_API}/{parent}/keyRings"),
                &[("keyRingId", key_ring_id)],
                &KeyRing::default(),
            )
            .await?;
        Ok(ring.name)
    }

    async fn list_crypto_keys(&self, key_ring: &str) -> Result<Vec<String>> {
        let url = format!("{KMS_API}/{key_ring}/cryptoKeys");
        let url = url.as_str();

        paginate(move |token| async move {
            let page: ListCryptoKeysResponse = self.api.get(url, &page_query(&token)).await?;
            Ok(Page {
                items: page.crypto_keys.into_iter().map(|key| key.name).collect(),
                next_page_token: page.next_page_token,
            })
        })
        .try_collect()
        .await
    }

    async fn create_crypto_key(&self, key_ring: &str, key_id: &str) -> Result<String> {
        let key: CryptoKey = self
            .api
            .post(
                &format!("{KMS_API}/{key_ring}/cryptoKeys"),
                &[("cryptoKeyId", key_id)],
                &CryptoKey::symmetric_encrypt_decrypt(),
            )
            .await?;
        Ok(key.name)
    }

    async fn encrypt(&self, key: &str, plaintext: &[u8]) -> Result<String> {
        let response: EncryptResponse = self
            .api
            .post(
                &format!("{KMS_API}/{key}:encrypt"),
                &[],
                &EncryptRequest {
                    plaintext: STANDARD.encode(plaintext),
                },
            )
            .await?;
        Ok(response.ciphertext)
    }

    async fn decrypt(&self, key: &str, ciphertext: &str) -> Result<Vec<u8>> {
        let response: DecryptResponse = self
            .api
            .post(
                &format!("{KMS_API}/{key}:decrypt"),
                &[],
                &DecryptRequest {
                    ciphertext: ciphertext.trim().to_string(),
                },
            )
            .await?;

        STANDARD
            .decode(response.plaintext)
            .map_err(|err| Error::validation(format!("KMS returned invalid plaintext: {err}")))
    }
}

/// Encrypts and decrypts with a key it provisions on first use.
///
/// The key ring and key are looked up (and created if missing) once per
/// process; later calls reuse the resolved key name.
pub struct KmsEncrypter {
    client: Arc<dyn KmsClient>,
    project: String,
    location: String,
    key_ring: String,
    key: String,
    key_name: OnceCell<String>,
}

impl KmsEncrypter {
    pub fn new(
        client: Arc<dyn KmsClient>,
        project: &str,
        location: &str,
        key_ring: &str,
        key: &str,
    ) -> Self {
        KmsEncrypter {
            client,
            project: project.to_string(),
            location: location.to_string(),
            key_ring: key_ring.to_string(),
            key: key.to_string(),
            key_name: OnceCell::new(),
        }
    }

    /// Key ring `<project>-keyring` holding key `<project>-infra-key`.
    pub fn for_project(client: Arc<dyn KmsClient>, project: &str, location: &str) -> Self {
        Self::new(
            client,
            project,
            location,
            &format!("{project}-keyring"),
            &format!("{project}-infra-key"),
        )
    }

    pub async fn get_or_create_key_ring(&self) -> Result<Outcome<String>> {
        let parent = location_name(&self.project, &self.location);
        let wanted = key_ring_name(&self.project, &self.location, &self.key_ring);

        let observed = self
            .client
            .list_key_rings(&parent)
            .await?
            .into_iter()
            .find(|name| *name == wanted);

        reconcile::get_or_create("key ring", &self.key_ring, observed, || {
            self.client.create_key_ring(&parent, &self.key_ring)
        })
        .await
    }

    pub async fn get_or_create_crypto_key(&self, key_ring: &str) -> Result<Outcome<String>> {
        let wanted = crypto_key_name(key_ring, &self.key);

        let observed = self
            .client
            .list_crypto_keys(key_ring)
            .await?
            .into_iter()
            .find(|name| *name == wanted);

        reconcile::get_or_create("crypto key", &self.key, observed, || {
            self.client.create_crypto_key(key_ring, &self.key)
        })
        .await
    }

    pub async fn key_name(&self) -> Result<&str> {
        let name = self
            .key_name
            .get_or_try_init(|| async {
                let ring = self.get_or_create_key_ring().await?.into_inner();
                let key = self.get_or_create_crypto_key(&ring).await?.into_inner();
                debug!("using KMS key {key}");
                Ok::<_, Error>(key)
            })
            .await?;
        Ok(name.as_str())
    }

    pub async fn encrypt(&self, plaintext: &[u8]) -> Result<String> {
        let key = self.key_name().await?;
        self.client.encrypt(key, plaintext).await
    }

    pub async fn decrypt(&self, ciphertext: &str) -> Result<Vec<u8>> {
        let key = self.key_name().await?;
        self.client.decrypt(key, ciphertext).await
    }

    /// Writes the base64 ciphertext of `path` to `<path>.enc`.
    pub async fn encrypt_file(&self, path: &Path) -> Result<PathBuf> {
        let plaintext = std::fs::read(path)?;
        let ciphertext = self.encrypt(&plaintext).await?;

        let target = with_suffix(path, ".enc");
        std::fs::write(&target, ciphertext)?;
        info!("encrypted {} into {}", path.display(), target.display());
        Ok(target)
    }

    /// Reads base64 ciphertext from `path` and writes the plaintext to `<path>.dec`.
    pub async fn decrypt_file(&self, path: &Path) -> Result<PathBuf> {
        let ciphertext = std::fs::read_to_string(path)?;
        let plaintext = self.decrypt(&ciphertext).await?;

        let target = with_suffix(path, ".dec");
        std::fs::write(&target, plaintext)?;
        info!("decrypted {} into {}", path.display(), target.display());
        Ok(target)
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}
