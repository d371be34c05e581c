use async_trait::async_trait;
use myiac_model::cloudflare::{DnsRecord, Envelope, Zone};
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::DnsRecordClient;
use crate::config::CloudflareCredentials;
use crate::error::{Error, Result};

const API_BASE: &str = "https://api.cloudflare.com/client/v4";
const RECORD_TTL: u32 = 300;

/// Records in a Cloudflare zone are named in full; bare labels get the zone
/// appended.
pub fn qualified_name(name: &str, zone: &str) -> String {
    super::qualify(name, zone)
}

pub fn a_record(name: &str, ip: &str) -> DnsRecord {
    DnsRecord {
        id: String::new(),
        type_: "A".to_string(),
        name: name.to_string(),
        content: ip.to_string(),
        ttl: RECORD_TTL,
        proxied: false,
    }
}

/// Unwraps a v4 envelope, turning `success: false` into [`Error::Api`].
pub fn unwrap_envelope<T>(status: u16, envelope: Envelope<T>) -> Result<T> {
    if !envelope.success || !(200..300).contains(&status) {
        let message = envelope
            .errors
            .iter()
            .map(|error| format!("{} ({})", error.message, error.code))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(Error::Api { status, message });
    }

    envelope
        .result
        .ok_or_else(|| Error::validation("Cloudflare response without result"))
}

/// The zone listed under exactly `zone`.
fn zone_named(zones: Vec<Zone>, zone: &str) -> Result<Zone> {
    zones
        .into_iter()
        .find(|candidate| candidate.name == zone)
        .ok_or_else(|| Error::not_found(format!("Cloudflare zone {zone}")))
}

/// The A record named exactly `name`. Cloudflare answers an empty list when
/// there is none.
fn record_named(records: Vec<DnsRecord>, name: &str) -> Result<DnsRecord> {
    records
        .into_iter()
        .find(|record| record.name == name)
        .ok_or_else(|| Error::not_found(format!("record for dns name {name}")))
}

pub struct CloudflareClient {
    http: reqwest::Client,
    zone: String,
    api_key: String,
    email: String,
    zone_id: OnceCell<String>,
}

impl CloudflareClient {
    pub fn new(zone: &str, credentials: &CloudflareCredentials) -> Self {
        CloudflareClient {
            http: reqwest::Client::new(),
            zone: zone.to_string(),
            api_key: credentials.api_key.clone(),
            email: credentials.email.clone(),
            zone_id: OnceCell::new(),
        }
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        let response = request
            .header("X-Auth-Key", &self.api_key)
            .header("X-Auth-Email", &self.email)
            .send()
            .await?;

        let status = response.status().as_u16();
        let envelope: Envelope<T> = response.json().await?;
        unwrap_envelope(status, envelope)
    }

    async fn zone_id(&self) -> Result<&str> {
        let id = self
            .zone_id
            .get_or_try_init(|| async {
                let zones: Vec<Zone> = self
                    .send(
                        self.http
                            .get(format!("{API_BASE}/zones"))
                            .query(&[("name", self.zone.as_str())]),
                    )
                    .await?;

                let zone = zone_named(zones, &self.zone)?;

                debug!("Cloudflare zone {} has id {}", zone.name, zone.id);
                Ok::<_, Error>(zone.id)
            })
            .await?;
        Ok(id.as_str())
    }

    async fn find_record(&self, name: &str) -> Result<DnsRecord> {
        let zone_id = self.zone_id().await?;
        let name = qualified_name(name, &self.zone);

        let records: Vec<DnsRecord> = self
            .send(
                self.http
                    .get(format!("{API_BASE}/zones/{zone_id}/dns_records"))
                    .query(&[("type", "A"), ("name", name.as_str())]),
            )
            .await?;

        record_named(records, &name)
    }
}

#[async_trait]
impl DnsRecordClient for CloudflareClient {
    async fn record_content(&self, name: &str) -> Result<String> {
        let record = self.find_record(name).await?;
        debug!("{} -> {}", record.name, record.content);
        Ok(record.content)
    }

    async fn create_record(&self, name: &str, ip: &str) -> Result<()> {
        let zone_id = self.zone_id().await?;
        let record = a_record(&qualified_name(name, &self.zone), ip);

        let created: DnsRecord = self
            .send(
                self.http
                    .post(format!("{API_BASE}/zones/{zone_id}/dns_records"))
                    .json(&record),
            )
            .await?;

        info!("created Cloudflare record {} ({})", created.name, created.id);
        Ok(())
    }

    async fn update_record(&self, name: &str, ip: &str) -> Result<()> {
        let existing = self.find_record(name).await?;
        let zone_id = self.zone_id().await?;

        let record = DnsRecord {
            content: ip.to_string(),
            ..existing
        };

        let _: DnsRecord = self
            .send(
                self.http
                    .put(format!(
                        "{API_BASE}/zones/{zone_id}/dns_records/{}",
                        record.id
                    ))
                    .json(&record),
            )
            .await?;

        info!("updated Cloudflare record {} -> {ip}", record.name);
        Ok(())
    }
}
