//! Route 53 backend for the zone controller

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use deployflow_cloud::{
    AliasTarget, ChangeAction, CloudError, DnsApi, RecordChange, RecordSet, Result, Zone,
};

use crate::cli::AwsCli;

#[derive(Debug, Clone)]
pub struct Route53Cli {
    aws: AwsCli,
}

impl Route53Cli {
    pub fn new(aws: AwsCli) -> Self {
        Self { aws }
    }
}

#[derive(Debug, Deserialize)]
struct ListHostedZonesResponse {
    #[serde(rename = "HostedZones", default)]
    hosted_zones: Vec<HostedZone>,
}

#[derive(Debug, Deserialize)]
struct HostedZone {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Debug, Deserialize)]
struct CreateHostedZoneResponse {
    #[serde(rename = "HostedZone")]
    hosted_zone: HostedZone,
    #[serde(rename = "ChangeInfo")]
    change_info: ChangeInfo,
}

#[derive(Debug, Deserialize)]
struct ChangeResponse {
    #[serde(rename = "ChangeInfo")]
    change_info: ChangeInfo,
}

#[derive(Debug, Deserialize)]
struct ChangeInfo {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Status")]
    status: String,
}

#[derive(Debug, Deserialize)]
struct ListRecordSetsResponse {
    #[serde(rename = "ResourceRecordSets", default)]
    resource_record_sets: Vec<ResourceRecordSet>,
}

#[derive(Debug, Deserialize)]
struct ResourceRecordSet {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Type")]
    record_type: String,
    #[serde(rename = "TTL")]
    ttl: Option<u64>,
    #[serde(rename = "ResourceRecords", default)]
    resource_records: Vec<ResourceRecord>,
    #[serde(rename = "AliasTarget")]
    alias_target: Option<WireAliasTarget>,
}

#[derive(Debug, Deserialize)]
struct ResourceRecord {
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Deserialize)]
struct WireAliasTarget {
    #[serde(rename = "HostedZoneId")]
    hosted_zone_id: String,
    #[serde(rename = "DNSName")]
    dns_name: String,
}

impl From<ResourceRecordSet> for RecordSet {
    fn from(wire: ResourceRecordSet) -> Self {
        RecordSet {
            name: wire.name,
            record_type: wire.record_type,
            ttl: wire.ttl,
            values: wire.resource_records.into_iter().map(|r| r.value).collect(),
            alias_target: wire.alias_target.map(|a| AliasTarget {
                hosted_zone_id: a.hosted_zone_id,
                dns_name: a.dns_name,
            }),
        }
    }
}

/// Zone and change ids come back path-qualified (`/hostedzone/Z...`,
/// `/change/C...`); everything downstream uses the bare id.
fn bare_id(id: &str) -> String {
    id.rsplit('/').next().unwrap_or(id).to_string()
}

fn record_set_json(record: &RecordSet) -> serde_json::Value {
    let mut set = json!({
        "Name": record.name,
        "Type": record.record_type,
    });
    if let Some(ttl) = record.ttl {
        set["TTL"] = json!(ttl);
    }
    if !record.values.is_empty() {
        set["ResourceRecords"] = json!(record
            .values
            .iter()
            .map(|v| json!({ "Value": v }))
            .collect::<Vec<_>>());
    }
    if let Some(ref alias) = record.alias_target {
        set["AliasTarget"] = json!({
            "HostedZoneId": alias.hosted_zone_id,
            "DNSName": alias.dns_name,
            "EvaluateTargetHealth": false,
        });
    }
    set
}

fn change_batch_json(changes: &[RecordChange]) -> serde_json::Value {
    let changes: Vec<serde_json::Value> = changes
        .iter()
        .map(|change| {
            let action = match change.action {
                ChangeAction::Upsert => "UPSERT",
                ChangeAction::Delete => "DELETE",
            };
            json!({
                "Action": action,
                "ResourceRecordSet": record_set_json(&change.record),
            })
        })
        .collect();
    json!({ "Changes": changes })
}

#[async_trait]
impl DnsApi for Route53Cli {
    async fn list_zones(&self) -> Result<Vec<Zone>> {
        let response: ListHostedZonesResponse = self
            .aws
            .run_json("route53", &["list-hosted-zones"])
            .await
            .map_err(CloudError::from)?;
        Ok(response
            .hosted_zones
            .into_iter()
            .map(|z| Zone {
                id: bare_id(&z.id),
                name: z.name,
            })
            .collect())
    }

    async fn create_zone(&self, name: &str) -> Result<(Zone, String)> {
        // Caller reference must be unique per request.
        let caller_reference = format!("deployflow-{}-{}", name, chrono::Utc::now().timestamp());
        let response: CreateHostedZoneResponse = self
            .aws
            .run_json(
                "route53",
                &[
                    "create-hosted-zone",
                    "--name",
                    name,
                    "--caller-reference",
                    caller_reference.as_str(),
                ],
            )
            .await
            .map_err(CloudError::from)?;
        let zone = Zone {
            id: bare_id(&response.hosted_zone.id),
            name: response.hosted_zone.name,
        };
        Ok((zone, bare_id(&response.change_info.id)))
    }

    async fn delete_zone(&self, zone_id: &str) -> Result<String> {
        let response: ChangeResponse = self
            .aws
            .run_json("route53", &["delete-hosted-zone", "--id", zone_id])
            .await
            .map_err(CloudError::from)?;
        Ok(bare_id(&response.change_info.id))
    }

    async fn list_records(&self, zone_id: &str) -> Result<Vec<RecordSet>> {
        let response: ListRecordSetsResponse = self
            .aws
            .run_json(
                "route53",
                &["list-resource-record-sets", "--hosted-zone-id", zone_id],
            )
            .await
            .map_err(CloudError::from)?;
        Ok(response
            .resource_record_sets
            .into_iter()
            .map(RecordSet::from)
            .collect())
    }

    async fn change_records(&self, zone_id: &str, changes: &[RecordChange]) -> Result<String> {
        let batch = change_batch_json(changes).to_string();
        let response: ChangeResponse = self
            .aws
            .run_json(
                "route53",
                &[
                    "change-resource-record-sets",
                    "--hosted-zone-id",
                    zone_id,
                    "--change-batch",
                    batch.as_str(),
                ],
            )
            .await
            .map_err(CloudError::from)?;
        Ok(bare_id(&response.change_info.id))
    }

    async fn get_change_status(&self, change_token: &str) -> Result<String> {
        let response: ChangeResponse = self
            .aws
            .run_json("route53", &["get-change", "--id", change_token])
            .await
            .map_err(CloudError::from)?;
        Ok(response.change_info.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_strips_path_prefixes() {
        assert_eq!(bare_id("/hostedzone/Z0123456789"), "Z0123456789");
        assert_eq!(bare_id("/change/C0123456789"), "C0123456789");
        assert_eq!(bare_id("Z0123456789"), "Z0123456789");
    }

    #[test]
    fn change_batch_for_plain_record() {
        let changes = vec![RecordChange {
            action: ChangeAction::Delete,
            record: RecordSet {
                name: "app.prod.example.com.".to_string(),
                record_type: "A".to_string(),
                ttl: Some(300),
                values: vec!["192.0.2.1".to_string()],
                alias_target: None,
            },
        }];
        let batch = change_batch_json(&changes);
        assert_eq!(batch["Changes"][0]["Action"], "DELETE");
        assert_eq!(
            batch["Changes"][0]["ResourceRecordSet"]["ResourceRecords"][0]["Value"],
            "192.0.2.1"
        );
        assert_eq!(batch["Changes"][0]["ResourceRecordSet"]["TTL"], 300);
    }

    #[test]
    fn change_batch_for_alias_record() {
        let changes = vec![RecordChange {
            action: ChangeAction::Upsert,
            record: RecordSet {
                name: "prod.example.com.".to_string(),
                record_type: "A".to_string(),
                ttl: None,
                values: Vec::new(),
                alias_target: Some(AliasTarget {
                    hosted_zone_id: "Z32O12XQLNTSW2".to_string(),
                    dns_name: "alb-123.ap-northeast-1.elb.amazonaws.com.".to_string(),
                }),
            },
        }];
        let batch = change_batch_json(&changes);
        let set = &batch["Changes"][0]["ResourceRecordSet"];
        assert_eq!(set["AliasTarget"]["HostedZoneId"], "Z32O12XQLNTSW2");
        assert!(set.get("TTL").is_none());
        assert!(set.get("ResourceRecords").is_none());
    }

    #[test]
    fn record_set_wire_conversion() {
        let raw = r#"{
            "Name": "prod.example.com.",
            "Type": "NS",
            "TTL": 172800,
            "ResourceRecords": [{"Value": "ns-1.awsdns.example."}]
        }"#;
        let wire: ResourceRecordSet = serde_json::from_str(raw).unwrap();
        let record = RecordSet::from(wire);
        assert_eq!(record.record_type, "NS");
        assert_eq!(record.values, vec!["ns-1.awsdns.example."]);
        assert!(record.alias_target.is_none());
    }
}
