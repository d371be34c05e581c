//! Local preferences, persisted between invocations as an INI file.
//!
//! Every write reloads the file, applies the change and overwrites it. There
//! is no locking; one operator at a time is assumed.

use std::path::PathBuf;

use ini::Ini;
use tracing::debug;

use crate::error::{Error, Result};

pub const PROVIDER: &str = "provider";
pub const KEY_LOCATION: &str = "keyLocation";
pub const PROJECT: &str = "project";
pub const MASTER_SA_EMAIL: &str = "masterSaEmail";
pub const CLUSTER_NAME: &str = "gke.clusterName";
pub const CLUSTER_ZONE: &str = "gke.clusterZone";

/// `~/.myiac/prefs`
pub fn default_path() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| Error::validation("could not determine the home directory"))?;
    Ok(home.join(".myiac").join("prefs"))
}

#[derive(Clone, Debug)]
pub struct Preferences {
    path: PathBuf,
}

impl Preferences {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Preferences { path: path.into() }
    }

    fn load(&self) -> Result<Ini> {
        if !self.path.exists() {
            return Ok(Ini::new());
        }

        Ini::load_from_file(&self.path).map_err(|err| self.error(err))
    }

    fn save(&self, ini: &Ini) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        ini.write_to_file(&self.path).map_err(|err| self.error(err))
    }

    fn error(&self, err: impl std::fmt::Display) -> Error {
        Error::Preferences {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .load()?
            .general_section()
            .get(key)
            .map(str::to_string))
    }

    /// Like [`Preferences::get`], but a missing or empty value is an error.
    pub fn require(&self, key: &str) -> Result<String> {
        match self.get(key)? {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(Error::validation(format!(
                "preference {key} is not set in {}, run setup-environment first",
                self.path.display()
            ))),
        }
    }

    pub fn set_all(&self, entries: &[(&str, &str)]) -> Result<()> {
        let mut ini = self.load()?;
        for (key, value) in entries {
            ini.with_general_section().set(*key, *value);
            debug!("saved preference {key}");
        }
        self.save(&ini)
    }
}
