//! Payloads exchanged with the tools and APIs myiac drives.
//!
//! Everything here is plain data: `serde` types for the JSON that `helm`,
//! `gcloud` and `kubectl` print, and for the request/response bodies of the
//! Cloud DNS, Cloud KMS, IAM, Cloud Storage and Cloudflare REST APIs.

pub mod cloudflare;
pub mod gcloud;
pub mod google;
pub mod helm;
pub mod nodes;

pub use gcloud::{AuthEntry, ServiceAccountKeyFile};
pub use helm::Release;
pub use nodes::NodeList;

/// Parses a JSON array printed by a CLI tool, treating blank output as empty.
///
/// Tools like `helm list` print nothing (or a lone newline) instead of `[]`
/// when there is nothing to list.
pub fn parse_json_array<T>(output: &str) -> Result<Vec<T>, serde_json::Error>
where
    T: serde::de::DeserializeOwned,
{
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    serde_json::from_str(trimmed)
}
