//! Cloud Storage: buckets for Terraform state and the key cache objects.

use std::sync::Arc;

use async_trait::async_trait;
use futures::TryStreamExt;
#[cfg(test)]
use mockall::automock;
use myiac_model::google::{Bucket, BucketList};
use reqwest::Url;

use super::{page_query, paginate, GoogleApi, Page};
use crate::error::{Error, Result};

const STORAGE_API: &str = "https://storage.googleapis.com/storage/v1";
const UPLOAD_API: &str = "https://storage.googleapis.com/upload/storage/v1";

#[cfg_attr(test, automock)]
#[async_trait]
pub trait BucketStore: Send + Sync {
    async fn list_buckets(&self, project: &str) -> Result<Vec<Bucket>>;

    async fn create_bucket(&self, project: &str, name: &str, location: &str) -> Result<Bucket>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `None` when the object does not exist.
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Option<Vec<u8>>>;

    async fn write_object(&self, bucket: &str, name: &str, contents: Vec<u8>) -> Result<()>;
}

pub struct CloudStorage {
    api: Arc<GoogleApi>,
}

impl CloudStorage {
    pub fn new(api: Arc<GoogleApi>) -> Self {
        CloudStorage { api }
    }
}

/// `.../b/<bucket>/o/<object>` with both names percent-encoded as single
/// path segments.
fn object_url(bucket: &str, name: &str) -> Result<Url> {
    let mut url = Url::parse(STORAGE_API)
        .map_err(|err| Error::validation(format!("invalid storage endpoint: {err}")))?;

    url.path_segments_mut()
        .map_err(|_| Error::validation("storage endpoint cannot carry a path"))?
        .extend(["b", bucket, "o", name]);

    Ok(url)
}

/// A download of an absent object is a cache miss, not a failure.
fn missing_as_none(download: Result<Vec<u8>>) -> Result<Option<Vec<u8>>> {
    match download {
        Ok(contents) => Ok(Some(contents)),
        Err(err) if err.is_not_found() => Ok(None),
        Err(err) => Err(err),
    }
}

#[async_trait]
impl BucketStore for CloudStorage {
    async fn list_buckets(&self, project: &str) -> Result<Vec<Bucket>> {
        let url = format!("{STORAGE_API}/b");
        let url = url.as_str();

        paginate(move |token| async move {
            let mut query = vec![("project", project)];
            query.extend(page_query(&token));

            let page: BucketList = self.api.get(url, &query).await?;
            Ok(Page {
                items: page.items,
                next_page_token: page.next_page_token,
            })
        })
        .try_collect()
        .await
    }

    async fn create_bucket(&self, project: &str, name: &str, location: &str) -> Result<Bucket> {
        self.api
            .post(
                &format!("{STORAGE_API}/b"),
                &[("project", project)],
                &Bucket {
                    name: name.to_string(),
                    location: Some(location.to_string()),
                },
            )
            .await
    }
}

#[async_trait]
impl ObjectStore for CloudStorage {
    async fn read_object(&self, bucket: &str, name: &str) -> Result<Option<Vec<u8>>> {
        let url = object_url(bucket, name)?;

        missing_as_none(self.api.get_bytes(url.as_str(), &[("alt", "media")]).await)
    }

    async fn write_object(&self, bucket: &str, name: &str, contents: Vec<u8>) -> Result<()> {
        self.api
            .post_bytes(
                &format!("{UPLOAD_API}/b/{bucket}/o"),
                &[("uploadType", "media"), ("name", name)],
                "application/json",
                contents,
            )
            .await
    }
}
