use std::future::Future;

use tracing::{debug, info};

use crate::error::Result;

/// What a get-or-create pass ended up doing.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The observed remote state already satisfied the desired state.
    Existing(T),
    /// The corrective action ran and produced this value.
    Created(T),
}

impl<T> Outcome<T> {
    pub fn into_inner(self) -> T {
        match self {
            Outcome::Existing(value) | Outcome::Created(value) => value,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, Outcome::Created(_))
    }
}

/// Act-once step of a reconciliation.
///
/// `observed` is whatever the caller's observe step found for `name`. When it
/// is present it is returned untouched; otherwise `create` runs exactly once.
pub async fn get_or_create<T, F, Fut>(
    kind: &str,
    name: &str,
    observed: Option<T>,
    create: F,
) -> Result<Outcome<T>>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if let Some(existing) = observed {
        debug!("{kind} {name} already exists, nothing to do");
        return Ok(Outcome::Existing(existing));
    }

    info!("{kind} {name} not found, creating it");
    let created = create().await?;
    info!("created {kind} {name}");

    Ok(Outcome::Created(created))
}
