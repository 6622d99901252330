//! Hosted zone controller
//!
//! Record mutations are eventually consistent: every change submission
//! returns a change token, and the change is only visible on all resolvers
//! once the token reports INSYNC. Unlike stack convergence, the INSYNC wait
//! is bounded; a change that never syncs is a platform incident, not
//! something worth polling forever over.

use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;
use crate::poll::{poll_until_terminal, Observation, PollOptions};
use crate::status;

/// A hosted zone as reported by the platform. Zone names carry a trailing
/// dot on the wire.
#[derive(Debug, Clone)]
pub struct Zone {
    pub id: String,
    pub name: String,
}

/// Alias pointer at another platform resource (typically a load balancer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AliasTarget {
    pub hosted_zone_id: String,
    pub dns_name: String,
}

/// One record set. Either plain values with a TTL or an alias target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordSet {
    pub name: String,
    pub record_type: String,
    pub ttl: Option<u64>,
    pub values: Vec<String>,
    pub alias_target: Option<AliasTarget>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Upsert,
    Delete,
}

#[derive(Debug, Clone)]
pub struct RecordChange {
    pub action: ChangeAction,
    pub record: RecordSet,
}

#[async_trait]
pub trait DnsApi: Send + Sync {
    async fn list_zones(&self) -> Result<Vec<Zone>>;
    /// Returns the new zone and the change token for its creation.
    async fn create_zone(&self, name: &str) -> Result<(Zone, String)>;
    async fn delete_zone(&self, zone_id: &str) -> Result<String>;
    async fn list_records(&self, zone_id: &str) -> Result<Vec<RecordSet>>;
    async fn change_records(&self, zone_id: &str, changes: &[RecordChange]) -> Result<String>;
    async fn get_change_status(&self, change_token: &str) -> Result<String>;
}

fn same_zone_name(a: &str, b: &str) -> bool {
    a.trim_end_matches('.') == b.trim_end_matches('.')
}

/// Record types owned by the zone itself. They cannot be deleted while the
/// zone exists and must be excluded from record cleanup.
fn is_zone_owned(record: &RecordSet) -> bool {
    record.record_type == "NS" || record.record_type == "SOA"
}

#[derive(Debug, Clone, Copy)]
pub struct ZonePolicy {
    pub sync_poll: PollOptions,
}

impl Default for ZonePolicy {
    fn default() -> Self {
        Self {
            sync_poll: PollOptions::bounded(Duration::from_secs(30), 10),
        }
    }
}

pub struct ZoneController<A> {
    api: A,
    policy: ZonePolicy,
}

impl<A: DnsApi> ZoneController<A> {
    pub fn new(api: A) -> Self {
        Self {
            api,
            policy: ZonePolicy::default(),
        }
    }

    pub fn with_policy(api: A, policy: ZonePolicy) -> Self {
        Self { api, policy }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub async fn find_zone(&self, name: &str) -> Result<Option<Zone>> {
        let zones = self.api.list_zones().await?;
        Ok(zones.into_iter().find(|z| same_zone_name(&z.name, name)))
    }

    pub async fn zone_exists(&self, name: &str) -> Result<bool> {
        Ok(self.find_zone(name).await?.is_some())
    }

    /// Create the zone if absent. Returns the zone either way.
    pub async fn ensure_zone(&self, name: &str) -> Result<Zone> {
        if let Some(zone) = self.find_zone(name).await? {
            tracing::info!(zone = name, zone_id = %zone.id, "hosted zone already exists");
            return Ok(zone);
        }

        tracing::info!(zone = name, "creating hosted zone");
        let (zone, change_token) = self.api.create_zone(name).await?;
        self.await_insync(&change_token).await?;
        tracing::info!(zone = name, zone_id = %zone.id, "hosted zone created");
        Ok(zone)
    }

    /// Upsert the given record sets as one batch and wait for propagation.
    pub async fn upsert_records(&self, zone_id: &str, records: &[RecordSet]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        let changes: Vec<RecordChange> = records
            .iter()
            .map(|record| RecordChange {
                action: ChangeAction::Upsert,
                record: record.clone(),
            })
            .collect();
        tracing::info!(zone_id, count = changes.len(), "upserting record sets");
        let change_token = self.api.change_records(zone_id, &changes).await?;
        self.await_insync(&change_token).await
    }

    /// Delete every record set the zone does not own itself. Skips the
    /// propagation wait entirely when there is nothing to delete.
    pub async fn delete_all_records(&self, zone_id: &str) -> Result<()> {
        let records = self.api.list_records(zone_id).await?;
        let changes: Vec<RecordChange> = records
            .into_iter()
            .filter(|record| !is_zone_owned(record))
            .map(|record| RecordChange {
                action: ChangeAction::Delete,
                record,
            })
            .collect();

        if changes.is_empty() {
            tracing::info!(zone_id, "no deletable record sets");
            return Ok(());
        }

        tracing::info!(zone_id, count = changes.len(), "deleting record sets");
        let change_token = self.api.change_records(zone_id, &changes).await?;
        self.await_insync(&change_token).await
    }

    /// Delete the zone and everything in it. Returns `false` without error
    /// when no zone by that name exists.
    pub async fn delete_zone(&self, name: &str) -> Result<bool> {
        let Some(zone) = self.find_zone(name).await? else {
            tracing::info!(zone = name, "hosted zone already absent");
            return Ok(false);
        };

        self.delete_all_records(&zone.id).await?;
        tracing::info!(zone = name, zone_id = %zone.id, "deleting hosted zone");
        let change_token = self.api.delete_zone(&zone.id).await?;
        self.await_insync(&change_token).await?;
        Ok(true)
    }

    async fn await_insync(&self, change_token: &str) -> Result<()> {
        let api = &self.api;
        poll_until_terminal(
            change_token,
            self.policy.sync_poll,
            || {
                let api = api;
                async move {
                    let status = api.get_change_status(change_token).await?;
                    Ok(Observation { status, detail: () })
                }
            },
            status::classify_dns_change,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CloudError;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeState {
        zones: Vec<Zone>,
        records: Vec<RecordSet>,
        change_batches: Vec<Vec<RecordChange>>,
        zone_deletes: Vec<String>,
        change_statuses: Vec<String>,
        get_change_calls: usize,
        next_zone_id: u32,
    }

    struct FakeDnsApi {
        state: Mutex<FakeState>,
    }

    impl FakeDnsApi {
        fn new(state: FakeState) -> Self {
            Self {
                state: Mutex::new(state),
            }
        }
    }

    #[async_trait]
    impl DnsApi for FakeDnsApi {
        async fn list_zones(&self) -> Result<Vec<Zone>> {
            Ok(self.state.lock().unwrap().zones.clone())
        }

        async fn create_zone(&self, name: &str) -> Result<(Zone, String)> {
            let mut state = self.state.lock().unwrap();
            state.next_zone_id += 1;
            let zone = Zone {
                id: format!("Z{:03}", state.next_zone_id),
                name: format!("{}.", name.trim_end_matches('.')),
            };
            state.zones.push(zone.clone());
            Ok((zone, "change-create".to_string()))
        }

        async fn delete_zone(&self, zone_id: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.zone_deletes.push(zone_id.to_string());
            state.zones.retain(|z| z.id != zone_id);
            Ok("change-delete".to_string())
        }

        async fn list_records(&self, _zone_id: &str) -> Result<Vec<RecordSet>> {
            Ok(self.state.lock().unwrap().records.clone())
        }

        async fn change_records(
            &self,
            _zone_id: &str,
            changes: &[RecordChange],
        ) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.change_batches.push(changes.to_vec());
            Ok(format!("change-{}", state.change_batches.len()))
        }

        async fn get_change_status(&self, _change_token: &str) -> Result<String> {
            let mut state = self.state.lock().unwrap();
            state.get_change_calls += 1;
            if state.change_statuses.is_empty() {
                return Ok("INSYNC".to_string());
            }
            Ok(state.change_statuses.remove(0))
        }
    }

    fn fast_policy() -> ZonePolicy {
        ZonePolicy {
            sync_poll: PollOptions::bounded(Duration::ZERO, 10),
        }
    }

    fn record(name: &str, record_type: &str) -> RecordSet {
        RecordSet {
            name: name.to_string(),
            record_type: record_type.to_string(),
            ttl: Some(300),
            values: vec!["192.0.2.1".to_string()],
            alias_target: None,
        }
    }

    #[tokio::test]
    async fn ensure_zone_is_idempotent() {
        let controller = ZoneController::with_policy(FakeDnsApi::new(FakeState::default()), fast_policy());

        let first = controller.ensure_zone("env.example.com").await.unwrap();
        let second = controller.ensure_zone("env.example.com").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(controller.api().state.lock().unwrap().zones.len(), 1);
    }

    #[tokio::test]
    async fn zone_name_matches_with_and_without_trailing_dot() {
        let mut state = FakeState::default();
        state.zones.push(Zone {
            id: "Z001".to_string(),
            name: "env.example.com.".to_string(),
        });
        let controller = ZoneController::with_policy(FakeDnsApi::new(state), fast_policy());

        assert!(controller.zone_exists("env.example.com").await.unwrap());
        assert!(controller.zone_exists("env.example.com.").await.unwrap());
        assert!(!controller.zone_exists("other.example.com").await.unwrap());
    }

    #[tokio::test]
    async fn delete_all_records_keeps_zone_owned_sets() {
        let mut state = FakeState::default();
        state.records = vec![
            record("env.example.com.", "NS"),
            record("env.example.com.", "SOA"),
            record("app.env.example.com.", "A"),
            record("api.env.example.com.", "CNAME"),
        ];
        let controller = ZoneController::with_policy(FakeDnsApi::new(state), fast_policy());

        controller.delete_all_records("Z001").await.unwrap();

        let state = controller.api().state.lock().unwrap();
        assert_eq!(state.change_batches.len(), 1);
        let batch = &state.change_batches[0];
        assert_eq!(batch.len(), 2);
        assert!(batch.iter().all(|c| c.action == ChangeAction::Delete));
        assert!(batch.iter().all(|c| c.record.record_type != "NS" && c.record.record_type != "SOA"));
    }

    #[tokio::test]
    async fn delete_all_records_skips_sync_wait_when_nothing_to_delete() {
        let mut state = FakeState::default();
        state.records = vec![
            record("env.example.com.", "NS"),
            record("env.example.com.", "SOA"),
        ];
        let controller = ZoneController::with_policy(FakeDnsApi::new(state), fast_policy());

        controller.delete_all_records("Z001").await.unwrap();

        let state = controller.api().state.lock().unwrap();
        assert!(state.change_batches.is_empty());
        assert_eq!(state.get_change_calls, 0);
    }

    #[tokio::test]
    async fn delete_zone_of_absent_zone_returns_false() {
        let controller = ZoneController::with_policy(FakeDnsApi::new(FakeState::default()), fast_policy());

        assert!(!controller.delete_zone("env.example.com").await.unwrap());
        assert!(controller.api().state.lock().unwrap().zone_deletes.is_empty());
    }

    #[tokio::test]
    async fn delete_zone_removes_records_first() {
        let mut state = FakeState::default();
        state.zones.push(Zone {
            id: "Z001".to_string(),
            name: "env.example.com.".to_string(),
        });
        state.records = vec![
            record("env.example.com.", "NS"),
            record("app.env.example.com.", "A"),
        ];
        let controller = ZoneController::with_policy(FakeDnsApi::new(state), fast_policy());

        let deleted = controller.delete_zone("env.example.com").await.unwrap();

        assert!(deleted);
        let state = controller.api().state.lock().unwrap();
        assert_eq!(state.change_batches.len(), 1);
        assert_eq!(state.zone_deletes, vec!["Z001".to_string()]);
    }

    #[tokio::test]
    async fn sync_wait_is_bounded() {
        let mut state = FakeState::default();
        state.records = vec![record("app.env.example.com.", "A")];
        state.change_statuses = vec!["PENDING".to_string(); 20];
        let controller = ZoneController::with_policy(FakeDnsApi::new(state), fast_policy());

        let err = controller.delete_all_records("Z001").await.unwrap_err();

        assert!(matches!(err, CloudError::OperationTimedOut { attempts, .. } if attempts == 10));
        assert_eq!(controller.api().state.lock().unwrap().get_change_calls, 10);
    }

    #[tokio::test]
    async fn upsert_waits_for_propagation() {
        let mut state = FakeState::default();
        state.change_statuses = vec!["PENDING".to_string(), "PENDING".to_string(), "INSYNC".to_string()];
        let controller = ZoneController::with_policy(FakeDnsApi::new(state), fast_policy());

        controller
            .upsert_records("Z001", &[record("app.env.example.com.", "A")])
            .await
            .unwrap();

        assert_eq!(controller.api().state.lock().unwrap().get_change_calls, 3);
    }
}
