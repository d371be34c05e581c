use std::sync::Arc;

use async_trait::async_trait;
use myiac_model::google::{
    Change, ResourceRecordSet, ResourceRecordSetsListResponse, DNS_RECORD_SET_KIND,
};
use tracing::info;

use super::DnsRecordClient;
use crate::error::{Error, Result};
use crate::gcp::GoogleApi;

const DNS_API: &str = "https://dns.googleapis.com/dns/v1";
const RECORD_TTL: i64 = 20;

/// Cloud DNS wants absolute names.
fn absolute(name: &str) -> String {
    format!("{}.", name.trim_end_matches('.'))
}

fn a_record(name: &str, ip: &str) -> ResourceRecordSet {
    ResourceRecordSet {
        name: absolute(name),
        type_: "A".to_string(),
        ttl: RECORD_TTL,
        rrdatas: vec![ip.to_string()],
        kind: Some(DNS_RECORD_SET_KIND.to_string()),
    }
}

/// Replacing record sets is a single change deleting the current sets and
/// adding the new one.
pub fn change_for(name: &str, ip: &str, existing: Vec<ResourceRecordSet>) -> Change {
    Change {
        additions: vec![a_record(name, ip)],
        deletions: existing,
        status: None,
    }
}

/// Every address currently served for `name`, comma separated. A set holding
/// exactly the target IP compares equal to it, anything else needs an update.
pub fn current_content(name: &str, sets: Vec<ResourceRecordSet>) -> Result<String> {
    let addresses: Vec<String> = sets.into_iter().flat_map(|set| set.rrdatas).collect();

    if addresses.is_empty() {
        return Err(Error::not_found(format!("A record {name}")));
    }

    Ok(addresses.join(","))
}

pub struct CloudDnsClient {
    api: Arc<GoogleApi>,
    project: String,
    managed_zone: String,
}

impl CloudDnsClient {
    pub fn new(api: Arc<GoogleApi>, project: &str, managed_zone: &str) -> Self {
        CloudDnsClient {
            api,
            project: project.to_string(),
            managed_zone: managed_zone.to_string(),
        }
    }

    fn zone_url(&self) -> String {
        format!(
            "{DNS_API}/projects/{}/managedZones/{}",
            self.project, self.managed_zone
        )
    }

    async fn a_records(&self, name: &str) -> Result<Vec<ResourceRecordSet>> {
        let response: ResourceRecordSetsListResponse = self
            .api
            .get(
                &format!("{}/rrsets", self.zone_url()),
                &[("name", absolute(name).as_str()), ("type", "A")],
            )
            .await?;
        Ok(response.rrsets)
    }

    async fn submit(&self, change: &Change) -> Result<()> {
        let submitted: Change = self
            .api
            .post(&format!("{}/changes", self.zone_url()), &[], change)
            .await?;

        info!(
            "Cloud DNS change submitted ({})",
            submitted.status.as_deref().unwrap_or("unknown status")
        );
        Ok(())
    }
}

#[async_trait]
impl DnsRecordClient for CloudDnsClient {
    async fn record_content(&self, name: &str) -> Result<String> {
        current_content(name, self.a_records(name).await?)
    }

    async fn create_record(&self, name: &str, ip: &str) -> Result<()> {
        self.submit(&change_for(name, ip, Vec::new())).await
    }

    async fn update_record(&self, name: &str, ip: &str) -> Result<()> {
        let existing = self.a_records(name).await?;
        self.submit(&change_for(name, ip, existing)).await
    }
}
