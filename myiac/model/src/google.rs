//! Request and response bodies of the Google Cloud REST APIs used by myiac.
//!
//! Field names follow the JSON (camelCase) representation of each API.

use serde::{Deserialize, Serialize};

// =============================================================================
// Cloud DNS (dns/v1)
// =============================================================================

pub const DNS_RECORD_SET_KIND: &str = "dns#resourceRecordSet";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecordSet {
    pub name: String,
    #[serde(rename = "type")]
    pub type_: String,
    #[serde(default)]
    pub ttl: i64,
    #[serde(default)]
    pub rrdatas: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRecordSetsListResponse {
    #[serde(default)]
    pub rrsets: Vec<ResourceRecordSet>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// A Cloud DNS change. Updates are expressed as deleting the current
/// record sets and adding the replacement in the same change.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additions: Vec<ResourceRecordSet>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub deletions: Vec<ResourceRecordSet>,
    #[serde(default, skip_serializing)]
    pub status: Option<String>,
}

// =============================================================================
// Cloud KMS (cloudkms/v1)
// =============================================================================

pub const PURPOSE_ENCRYPT_DECRYPT: &str = "ENCRYPT_DECRYPT";
pub const ALGORITHM_GOOGLE_SYMMETRIC_ENCRYPTION: &str = "GOOGLE_SYMMETRIC_ENCRYPTION";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyRing {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListKeyRingsResponse {
    #[serde(default)]
    pub key_rings: Vec<KeyRing>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoKeyVersionTemplate {
    pub algorithm: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CryptoKey {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub purpose: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_template: Option<CryptoKeyVersionTemplate>,
}

impl CryptoKey {
    /// The only kind of key myiac creates: symmetric, for encrypt/decrypt.
    pub fn symmetric_encrypt_decrypt() -> Self {
        CryptoKey {
            name: String::new(),
            purpose: PURPOSE_ENCRYPT_DECRYPT.to_string(),
            version_template: Some(CryptoKeyVersionTemplate {
                algorithm: ALGORITHM_GOOGLE_SYMMETRIC_ENCRYPTION.to_string(),
            }),
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListCryptoKeysResponse {
    #[serde(default)]
    pub crypto_keys: Vec<CryptoKey>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Plaintext is base64 on the wire.
#[derive(Clone, Debug, Serialize)]
pub struct EncryptRequest {
    pub plaintext: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct EncryptResponse {
    pub ciphertext: String,
}

/// Ciphertext is base64 on the wire.
#[derive(Clone, Debug, Serialize)]
pub struct DecryptRequest {
    pub ciphertext: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct DecryptResponse {
    #[serde(default)]
    pub plaintext: String,
}

// =============================================================================
// IAM (iam/v1)
// =============================================================================

pub const KEY_TYPE_CREDENTIALS_FILE: &str = "TYPE_GOOGLE_CREDENTIALS_FILE";

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAccountKey {
    /// `projects/{project}/serviceAccounts/{email}/keys/{keyId}`
    pub name: String,
    /// Base64 JSON credential file; only present in the create response.
    #[serde(default)]
    pub private_key_data: Option<String>,
    #[serde(default)]
    pub key_type: Option<String>,
}

impl ServiceAccountKey {
    pub fn key_id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ListServiceAccountKeysResponse {
    #[serde(default)]
    pub keys: Vec<ServiceAccountKey>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateServiceAccountKeyRequest {
    pub private_key_type: String,
}

impl Default for CreateServiceAccountKeyRequest {
    fn default() -> Self {
        CreateServiceAccountKeyRequest {
            private_key_type: KEY_TYPE_CREDENTIALS_FILE.to_string(),
        }
    }
}

// =============================================================================
// Cloud Storage (storage/v1)
// =============================================================================

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketList {
    #[serde(default)]
    pub items: Vec<Bucket>,
    #[serde(default)]
    pub next_page_token: Option<String>,
}

/// Error envelope shared by the Google APIs.
#[derive(Clone, Debug, Deserialize)]
pub struct ErrorEnvelope {
    pub error: ErrorBody,
}

#[derive(Clone, Debug, Deserialize)]
pub struct ErrorBody {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
}
