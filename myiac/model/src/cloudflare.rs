//! Cloudflare v4 API payloads for zones and DNS records.

use serde::{Deserialize, Serialize};

/// Every Cloudflare v4 response is wrapped in this envelope.
#[derive(Clone, Debug, Deserialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(default)]
    pub errors: Vec<ApiMessage>,
    pub result: Option<T>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct ApiMessage {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    #[serde(default, skip_serializing)]
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub name: String,
    pub content: String,
    pub ttl: u32,
    #[serde(default)]
    pub proxied: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_record_listing() {
        let envelope: Envelope<Vec<DnsRecord>> = serde_json::from_str(indoc::indoc! { r#"
            {
              "success": true,
              "errors": [],
              "result": [
                {"id": "372e67954025e0ba6aaa6d586b9e0b59", "type": "A",
                 "name": "dev.moneycol.net", "content": "198.51.100.4",
                 "ttl": 300, "proxied": false}
              ]
            }
        "#})
        .unwrap();

        let records = envelope.result.unwrap();
        assert!(envelope.success);
        assert_eq!(records[0].id, "372e67954025e0ba6aaa6d586b9e0b59");
        assert_eq!(records[0].content, "198.51.100.4");
    }

    #[test]
    fn record_id_is_not_sent() {
        let record = DnsRecord {
            id: "abc".to_string(),
            type_: "A".to_string(),
            name: "dev.moneycol.net".to_string(),
            content: "1.1.1.1".to_string(),
            ttl: 300,
            proxied: false,
        };

        let json = serde_json::to_value(&record).unwrap();
        assert!(json.get("id").is_none());
        assert_eq!(json["type"], "A");
    }
}
