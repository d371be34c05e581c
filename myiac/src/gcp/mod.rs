//! Google Cloud REST plumbing shared by the DNS, KMS, IAM and Storage clients.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use myiac_model::google::ErrorEnvelope;
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::error::{Error, Result};
use crate::process::{CommandRunner, CommandSpec};

pub mod iam;
pub mod keys;
pub mod kms;
pub mod storage;

pub const CREDENTIALS_ENV: &str = "GOOGLE_APPLICATION_CREDENTIALS";

#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// Bearer tokens minted by `gcloud` for the application default credentials.
///
/// When a key file is given it is passed to `gcloud` as
/// `GOOGLE_APPLICATION_CREDENTIALS`.
pub struct GcloudTokenSource {
    runner: Arc<dyn CommandRunner>,
    credentials: Option<PathBuf>,
}

impl GcloudTokenSource {
    pub fn new(runner: Arc<dyn CommandRunner>, credentials: Option<PathBuf>) -> Self {
        GcloudTokenSource {
            runner,
            credentials,
        }
    }
}

#[async_trait]
impl TokenSource for GcloudTokenSource {
    async fn access_token(&self) -> Result<String> {
        let mut spec = CommandSpec::new("gcloud")
            .args(["auth", "application-default", "print-access-token"])
            .suppress_echo();

        if let Some(path) = &self.credentials {
            spec = spec.env(CREDENTIALS_ENV, path.display().to_string());
        }

        let result = self.runner.run(spec).await?;
        let token = String::from_utf8_lossy(&result.stdout).trim().to_string();

        if token.is_empty() {
            return Err(Error::validation(
                "gcloud returned no access token, are application default credentials set up?",
            ));
        }

        Ok(token)
    }
}

/// Authenticated JSON client for `*.googleapis.com`.
pub struct GoogleApi {
    http: reqwest::Client,
    tokens: Arc<dyn TokenSource>,
    token: OnceCell<String>,
}

impl GoogleApi {
    pub fn new(tokens: Arc<dyn TokenSource>) -> Self {
        GoogleApi {
            http: reqwest::Client::new(),
            tokens,
            token: OnceCell::new(),
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        let token = self
            .token
            .get_or_try_init(|| self.tokens.access_token())
            .await?;

        let response = request.bearer_auth(token).send().await?;
        check_status(response).await
    }

    pub async fn get<T: DeserializeOwned>(&self, url: &str, query: &[(&str, &str)]) -> Result<T> {
        debug!("GET {url}");
        let response = self.send(self.http.get(url).query(query)).await?;
        Ok(response.json().await?)
    }

    pub async fn get_bytes(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<u8>> {
        debug!("GET {url}");
        let response = self.send(self.http.get(url).query(query)).await?;
        Ok(response.bytes().await?.to_vec())
    }

    pub async fn post<B, T>(&self, url: &str, query: &[(&str, &str)], body: &B) -> Result<T>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        debug!("POST {url}");
        let response = self.send(self.http.post(url).query(query).json(body)).await?;
        Ok(response.json().await?)
    }

    pub async fn post_bytes(
        &self,
        url: &str,
        query: &[(&str, &str)],
        content_type: &str,
        body: Vec<u8>,
    ) -> Result<()> {
        debug!("POST {url} ({} bytes)", body.len());
        self.send(
            self.http
                .post(url)
                .query(query)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .body(body),
        )
        .await?;
        Ok(())
    }
}

/// Turns non-2xx responses into [`Error::Api`].
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(api_error(status.as_u16(), &body))
}

/// Keeps Google's error message when the body is an error envelope, the raw
/// body otherwise.
pub fn api_error(status: u16, body: &str) -> Error {
    let message = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.to_string());

    Error::Api { status, message }
}

/// One page of a list call.
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: Option<String>,
}

/// Query parameters selecting a page, empty for the first one.
pub fn page_query(token: &Option<String>) -> Vec<(&'static str, &str)> {
    match token {
        Some(token) => vec![("pageToken", token.as_str())],
        None => Vec::new(),
    }
}

/// Streams the items of a paginated list, fetching pages as they are
/// consumed. `fetch` gets the page token (`None` for the first page).
pub fn paginate<T, F, Fut>(fetch: F) -> impl Stream<Item = Result<T>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    stream::try_unfold(
        (fetch, Some(None::<String>)),
        |(mut fetch, cursor)| async move {
            let Some(token) = cursor else {
                return Ok::<_, Error>(None);
            };

            let page = fetch(token).await?;
            let cursor = page
                .next_page_token
                .filter(|token| !token.is_empty())
                .map(Some);

            let items = stream::iter(page.items.into_iter().map(Ok::<T, Error>));
            Ok(Some((items, (fetch, cursor))))
        },
    )
    .try_flatten()
}
