//! A-record upserts against Cloud DNS or Cloudflare.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::gcp::GoogleApi;

pub mod cloud_dns;
pub mod cloudflare;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DnsProvider {
    Gcp,
    Cloudflare,
}

impl DnsProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            DnsProvider::Gcp => "gcp",
            DnsProvider::Cloudflare => "cloudflare",
        }
    }
}

impl fmt::Display for DnsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DnsProvider {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self> {
        match tag {
            "gcp" => Ok(DnsProvider::Gcp),
            "cloudflare" => Ok(DnsProvider::Cloudflare),
            other => Err(Error::validation(format!(
                "unknown dns provider {other:?}, expected gcp or cloudflare"
            ))),
        }
    }
}

/// A validated request to point names under `domain` at the cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DnsChangeRequest {
    provider: DnsProvider,
    domain: String,
}

impl DnsChangeRequest {
    /// `domain` must be `cluster_domain` or one of its subdomains.
    pub fn new(provider: &str, domain: &str, cluster_domain: &str) -> Result<Self> {
        let provider = provider.parse()?;

        let domain = domain.trim_end_matches('.');
        let under_cluster_domain = domain == cluster_domain
            || domain
                .strip_suffix(cluster_domain)
                .is_some_and(|prefix| prefix.ends_with('.'));

        if !under_cluster_domain {
            return Err(Error::validation(format!(
                "domain {domain} is not under cluster domain {cluster_domain}"
            )));
        }

        Ok(DnsChangeRequest {
            provider,
            domain: domain.to_string(),
        })
    }

    pub fn provider(&self) -> DnsProvider {
        self.provider
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Each entry as a fully-qualified name under the domain.
    pub fn fqdn_entries(&self, entries: &[String]) -> Vec<String> {
        entries
            .iter()
            .map(|entry| qualify(entry, &self.domain))
            .collect()
    }
}

/// `entry` under `domain`, unless it already is.
pub fn qualify(entry: &str, domain: &str) -> String {
    let entry = entry.trim_end_matches('.');
    if entry == domain || entry.ends_with(&format!(".{domain}")) {
        entry.to_string()
    } else {
        format!("{entry}.{domain}")
    }
}

/// One DNS backend. Names are fully-qualified, without a trailing dot.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DnsRecordClient: Send + Sync {
    /// Content of the A record for `name`, addresses joined with `,` when
    /// there are several. [`Error::NotFound`] when there is none.
    async fn record_content(&self, name: &str) -> Result<String>;

    async fn create_record(&self, name: &str, ip: &str) -> Result<()>;

    async fn update_record(&self, name: &str, ip: &str) -> Result<()>;
}

#[async_trait]
impl<C: DnsRecordClient + ?Sized> DnsRecordClient for Arc<C> {
    async fn record_content(&self, name: &str) -> Result<String> {
        (**self).record_content(name).await
    }

    async fn create_record(&self, name: &str, ip: &str) -> Result<()> {
        (**self).create_record(name, ip).await
    }

    async fn update_record(&self, name: &str, ip: &str) -> Result<()> {
        (**self).update_record(name, ip).await
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DnsChange {
    Created,
    Updated,
    Unchanged,
}

#[async_trait]
pub trait DnsService: Send + Sync {
    async fn upsert_dns_entry(&self, name: &str, ip: &str) -> Result<DnsChange>;

    /// Upserts every entry in order. A failing entry does not stop the rest;
    /// the first error is returned once all were attempted.
    async fn upsert_dns_entries(&self, names: &[String], ip: &str) -> Result<()>;
}

pub struct DnsUpserter<C> {
    client: C,
}

impl<C: DnsRecordClient> DnsUpserter<C> {
    pub fn new(client: C) -> Self {
        DnsUpserter { client }
    }
}

#[async_trait]
impl<C: DnsRecordClient> DnsService for DnsUpserter<C> {
    async fn upsert_dns_entry(&self, name: &str, ip: &str) -> Result<DnsChange> {
        let current = match self.client.record_content(name).await {
            Ok(content) => content,
            Err(err) if err.is_not_found() => String::new(),
            Err(err) => return Err(err),
        };

        if current.is_empty() {
            info!("no A record for {name}, creating it -> {ip}");
            self.client.create_record(name, ip).await?;
            return Ok(DnsChange::Created);
        }

        if current == ip {
            debug!("{name} already points at {ip}");
            return Ok(DnsChange::Unchanged);
        }

        info!("updating {name}: {current} -> {ip}");
        self.client.update_record(name, ip).await?;
        Ok(DnsChange::Updated)
    }

    async fn upsert_dns_entries(&self, names: &[String], ip: &str) -> Result<()> {
        info!("upserting DNS entries {names:?} to {ip}");

        let mut errors = Vec::new();
        for name in names {
            match self.upsert_dns_entry(name, ip).await {
                Ok(_) => info!("DNS entry {name} up to date"),
                Err(err) => {
                    warn!("failed to upsert DNS entry {name}: {err}");
                    errors.push(err);
                }
            }
        }

        match errors.into_iter().next() {
            Some(first) => Err(first),
            None => Ok(()),
        }
    }
}

/// The upserter for `provider`, configured from `config`.
pub fn dns_service(
    provider: DnsProvider,
    config: &Config,
    project: &str,
    google: Arc<GoogleApi>,
) -> Result<Box<dyn DnsService>> {
    Ok(match provider {
        DnsProvider::Gcp => {
            info!("using Cloud DNS zone {} in {project}", config.managed_zone);
            Box::new(DnsUpserter::new(cloud_dns::CloudDnsClient::new(
                google,
                project,
                &config.managed_zone,
            )))
        }
        DnsProvider::Cloudflare => {
            info!("using Cloudflare zone {}", config.cloudflare_zone);
            let credentials = config.cloudflare_credentials()?;
            Box::new(DnsUpserter::new(cloudflare::CloudflareClient::new(
                &config.cloudflare_zone,
                credentials,
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use mockall::predicate::eq;

    use super::*;

    /// Records in memory. Lookups of unknown names fail the way the
    /// backends do.
    #[derive(Default)]
    struct FakeDns {
        records: Mutex<BTreeMap<String, String>>,
        creates: Mutex<usize>,
        updates: Mutex<usize>,
    }

    #[async_trait]
    impl DnsRecordClient for FakeDns {
        async fn record_content(&self, name: &str) -> Result<String> {
            self.records
                .lock()
                .unwrap()
                .get(name)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("A record {name}")))
        }

        async fn create_record(&self, name: &str, ip: &str) -> Result<()> {
            *self.creates.lock().unwrap() += 1;
            self.records
                .lock()
                .unwrap()
                .insert(name.to_string(), ip.to_string());
            Ok(())
        }

        async fn update_record(&self, name: &str, ip: &str) -> Result<()> {
            *self.updates.lock().unwrap() += 1;
            self.records
                .lock()
                .unwrap()
                .insert(name.to_string(), ip.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn upsert_twice_creates_once() {
        let dns = Arc::new(FakeDns::default());
        let upserter = DnsUpserter::new(dns.clone());

        let first = upserter
            .upsert_dns_entry("dev.moneycol.net", "34.77.93.12")
            .await
            .unwrap();
        let second = upserter
            .upsert_dns_entry("dev.moneycol.net", "34.77.93.12")
            .await
            .unwrap();

        assert_eq!(first, DnsChange::Created);
        assert_eq!(second, DnsChange::Unchanged);
        assert_eq!(*dns.creates.lock().unwrap(), 1);
        assert_eq!(
            dns.record_content("dev.moneycol.net").await.unwrap(),
            "34.77.93.12"
        );
    }

    #[tokio::test]
    async fn changed_ip_updates_existing_record() {
        let dns = Arc::new(FakeDns::default());
        dns.records
            .lock()
            .unwrap()
            .insert("dev.moneycol.net".to_string(), "34.77.93.11".to_string());

        let change = DnsUpserter::new(dns.clone())
            .upsert_dns_entry("dev.moneycol.net", "34.77.93.12")
            .await
            .unwrap();

        assert_eq!(change, DnsChange::Updated);
        assert_eq!(*dns.creates.lock().unwrap(), 0);
        assert_eq!(*dns.updates.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn extra_addresses_are_replaced() {
        let mut client = MockDnsRecordClient::new();
        client
            .expect_record_content()
            .returning(|_| Ok("34.77.93.12,34.77.93.11".to_string()));
        client.expect_create_record().never();
        client
            .expect_update_record()
            .with(eq("dev.moneycol.net"), eq("34.77.93.12"))
            .times(1)
            .returning(|_, _| Ok(()));

        let change = DnsUpserter::new(client)
            .upsert_dns_entry("dev.moneycol.net", "34.77.93.12")
            .await
            .unwrap();

        assert_eq!(change, DnsChange::Updated);
    }

    #[tokio::test]
    async fn empty_content_is_treated_as_missing() {
        let mut client = MockDnsRecordClient::new();
        client
            .expect_record_content()
            .returning(|_| Ok(String::new()));
        client
            .expect_create_record()
            .with(eq("dev.moneycol.net"), eq("34.77.93.12"))
            .times(1)
            .returning(|_, _| Ok(()));
        client.expect_update_record().never();

        let change = DnsUpserter::new(client)
            .upsert_dns_entry("dev.moneycol.net", "34.77.93.12")
            .await
            .unwrap();

        assert_eq!(change, DnsChange::Created);
    }

    #[tokio::test]
    async fn not_found_api_errors_lead_to_create() {
        let mut client = MockDnsRecordClient::new();
        client.expect_record_content().returning(|name| {
            Err(Error::Api {
                status: 404,
                message: format!("record {name} does not exist"),
            })
        });
        client.expect_create_record().times(1).returning(|_, _| Ok(()));

        DnsUpserter::new(client)
            .upsert_dns_entry("collections.moneycol.net", "34.77.93.12")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn other_lookup_errors_stop_the_upsert() {
        let mut client = MockDnsRecordClient::new();
        client.expect_record_content().returning(|_| {
            Err(Error::Api {
                status: 403,
                message: "forbidden".to_string(),
            })
        });
        client.expect_create_record().never();
        client.expect_update_record().never();

        let result = DnsUpserter::new(client)
            .upsert_dns_entry("dev.moneycol.net", "34.77.93.12")
            .await;

        assert!(matches!(result, Err(Error::Api { status: 403, .. })));
    }

    #[tokio::test]
    async fn entries_continue_past_failures_and_report_the_first() {
        let mut client = MockDnsRecordClient::new();
        client
            .expect_record_content()
            .returning(|_| Err(Error::not_found("record")));
        client
            .expect_create_record()
            .with(eq("dev.moneycol.net"), eq("34.77.93.12"))
            .returning(|_, _| Err(Error::validation("dev rejected")));
        client
            .expect_create_record()
            .with(eq("collections.moneycol.net"), eq("34.77.93.12"))
            .times(1)
            .returning(|_, _| Ok(()));
        client
            .expect_create_record()
            .with(eq("graphql-dev.moneycol.net"), eq("34.77.93.12"))
            .returning(|_, _| Err(Error::validation("graphql-dev rejected")));

        let names = [
            "dev.moneycol.net".to_string(),
            "collections.moneycol.net".to_string(),
            "graphql-dev.moneycol.net".to_string(),
        ];
        let err = DnsUpserter::new(client)
            .upsert_dns_entries(&names, "34.77.93.12")
            .await
            .unwrap_err();

        match err {
            Error::Validation(message) => assert_eq!(message, "dev rejected"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn change_request_accepts_cluster_domain_and_subdomains() {
        let request = DnsChangeRequest::new("cloudflare", "moneycol.net", "moneycol.net").unwrap();
        assert_eq!(request.provider(), DnsProvider::Cloudflare);
        assert_eq!(request.domain(), "moneycol.net");

        assert!(DnsChangeRequest::new("gcp", "dev.moneycol.net", "moneycol.net").is_ok());
    }

    #[test]
    fn change_request_rejects_foreign_domains_and_providers() {
        for (provider, domain) in [
            ("gcp", "example.com"),
            ("gcp", "notmoneycol.net"),
            ("route53", "moneycol.net"),
        ] {
            let err = DnsChangeRequest::new(provider, domain, "moneycol.net").unwrap_err();
            assert!(matches!(err, Error::Validation(_)), "{provider} {domain}");
        }
    }

    #[test]
    fn entries_are_qualified_once() {
        let request = DnsChangeRequest::new("gcp", "moneycol.net", "moneycol.net").unwrap();

        assert_eq!(
            request.fqdn_entries(&[
                "dev".to_string(),
                "graphql-dev.moneycol.net".to_string(),
                "collections.moneycol.net.".to_string(),
            ]),
            [
                "dev.moneycol.net",
                "graphql-dev.moneycol.net",
                "collections.moneycol.net",
            ]
        );
    }
}
