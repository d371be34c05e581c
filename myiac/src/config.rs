//! Run-wide settings, resolved once in `main` and handed to each component.

use std::path::{Path, PathBuf};

use clap::Args;

use crate::error::{Error, Result};
use crate::preferences;

pub const DEFAULT_CLUSTER_DOMAIN: &str = "moneycol.net";
pub const DEFAULT_KMS_LOCATION: &str = "global";
pub const DEFAULT_DNS_ENTRIES: &str = "dev,collections,graphql-dev";
pub const TF_VARS_FILE_NAME: &str = "cluster.tfvars";

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Args)]
pub struct GlobalArgs {
    /// Preferences file [default: ~/.myiac/prefs]
    #[arg(long, global = true)]
    pub prefs_path: Option<PathBuf>,

    /// Root directory holding one folder per Helm chart [default: <binary dir>/charts]
    #[arg(long, global = true, env = "CHARTS_PATH")]
    pub charts_path: Option<PathBuf>,

    /// Terraform configuration for the cluster [default: <binary dir>/terraform/cluster]
    #[arg(long, global = true)]
    pub tf_config_path: Option<PathBuf>,

    /// Scripts run against a new cluster, such as install-helm.sh [default: <binary dir>/helperScripts]
    #[arg(long, global = true)]
    pub helper_scripts_path: Option<PathBuf>,

    /// Bucket caching service account keys [default: <project>-keys]
    #[arg(long, global = true)]
    pub keys_bucket: Option<String>,

    #[arg(long, global = true, default_value = DEFAULT_KMS_LOCATION)]
    pub kms_location: String,

    /// Domain every DNS change must fall under
    #[arg(long, global = true, default_value = DEFAULT_CLUSTER_DOMAIN)]
    pub cluster_domain: String,

    /// Cloudflare zone name [default: the cluster domain]
    #[arg(long, global = true)]
    pub cloudflare_zone: Option<String>,

    /// Cloud DNS managed zone [default: the cluster domain with dots as dashes]
    #[arg(long, global = true)]
    pub managed_zone: Option<String>,

    #[arg(long, global = true, env = "CF_API_KEY", hide_env_values = true)]
    pub cf_api_key: Option<String>,

    #[arg(long, global = true, env = "CF_EMAIL")]
    pub cf_email: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CloudflareCredentials {
    pub api_key: String,
    pub email: String,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub preferences_path: PathBuf,
    pub charts_path: PathBuf,
    pub tf_config_path: PathBuf,
    pub tf_vars_file: PathBuf,
    pub helper_scripts_path: PathBuf,
    pub keys_bucket: Option<String>,
    pub kms_location: String,
    pub cluster_domain: String,
    pub cloudflare_zone: String,
    pub managed_zone: String,
    pub dns_entries: Vec<String>,
    pub cloudflare: Option<CloudflareCredentials>,
}

impl Config {
    pub fn from_args(args: &GlobalArgs) -> Result<Self> {
        let preferences_path = match &args.prefs_path {
            Some(path) => path.clone(),
            None => preferences::default_path()?,
        };

        let charts_path = match &args.charts_path {
            Some(path) => path.clone(),
            None => executable_dir()?.join("charts"),
        };

        let tf_config_path = match &args.tf_config_path {
            Some(path) => path.clone(),
            None => executable_dir()?.join("terraform").join("cluster"),
        };

        let helper_scripts_path = match &args.helper_scripts_path {
            Some(path) => path.clone(),
            None => executable_dir()?.join("helperScripts"),
        };

        let cloudflare = match (&args.cf_api_key, &args.cf_email) {
            (Some(api_key), Some(email)) => Some(CloudflareCredentials {
                api_key: api_key.clone(),
                email: email.clone(),
            }),
            _ => None,
        };

        Ok(Config {
            preferences_path,
            charts_path,
            tf_vars_file: tf_config_path.join(TF_VARS_FILE_NAME),
            tf_config_path,
            helper_scripts_path,
            keys_bucket: args.keys_bucket.clone(),
            kms_location: args.kms_location.clone(),
            cloudflare_zone: args
                .cloudflare_zone
                .clone()
                .unwrap_or_else(|| args.cluster_domain.clone()),
            managed_zone: args
                .managed_zone
                .clone()
                .unwrap_or_else(|| args.cluster_domain.replace('.', "-")),
            cluster_domain: args.cluster_domain.clone(),
            dns_entries: split_list(DEFAULT_DNS_ENTRIES),
            cloudflare,
        })
    }

    pub fn keys_bucket_for(&self, project: &str) -> String {
        self.keys_bucket
            .clone()
            .unwrap_or_else(|| format!("{project}-keys"))
    }

    pub fn cloudflare_credentials(&self) -> Result<&CloudflareCredentials> {
        self.cloudflare
            .as_ref()
            .ok_or_else(|| Error::validation("CF_API_KEY and CF_EMAIL must both be set"))
    }
}

fn executable_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe()?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

/// Splits a comma separated flag value, dropping blanks.
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parses `k=v,k2=v2` into ordered pairs. Values may contain `=`.
pub fn parse_key_values(value: &str) -> Result<Vec<(String, String)>> {
    split_list(value)
        .into_iter()
        .map(|pair| match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok((key.trim().to_string(), value.to_string()))
            }
            _ => Err(Error::validation(format!(
                "expected key=value, got {pair:?}"
            ))),
        })
        .collect()
}

#[cfg(test)]
pub fn test_config(root: &Path) -> Config {
    Config {
        preferences_path: root.join("prefs"),
        charts_path: root.join("charts"),
        tf_config_path: root.join("terraform"),
        tf_vars_file: root.join("terraform").join(TF_VARS_FILE_NAME),
        helper_scripts_path: root.join("helperScripts"),
        keys_bucket: None,
        kms_location: DEFAULT_KMS_LOCATION.to_string(),
        cluster_domain: DEFAULT_CLUSTER_DOMAIN.to_string(),
        cloudflare_zone: DEFAULT_CLUSTER_DOMAIN.to_string(),
        managed_zone: "moneycol-net".to_string(),
        dns_entries: split_list(DEFAULT_DNS_ENTRIES),
        cloudflare: None,
    }
}
