//! In-memory provider for exercising the intake and HTTP layers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::{Connector, Provider, RecordState, RecordType};
use crate::target::ProviderTarget;

/// Access key id that makes [`FakeDns::connect`] fail.
pub const BAD_KEY: &str = "bad-key";
/// Root domain whose describe calls fail.
pub const BROKEN_DOMAIN: &str = "broken.test";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Describe(String, RecordType),
    Create(String, RecordType, String),
    Update(String, RecordType, String),
}

#[derive(Debug, Default)]
struct Zone {
    records: HashMap<(String, RecordType), RecordState>,
    calls: Vec<Call>,
    next_id: u64,
}

#[derive(Debug, Clone, Default)]
pub struct FakeDns {
    zone: Arc<Mutex<Zone>>,
}

impl FakeDns {
    pub fn calls(&self) -> Vec<Call> {
        self.zone.lock().unwrap().calls.clone()
    }

    pub fn value(&self, fqdn: &str, record_type: RecordType) -> Option<String> {
        self.zone
            .lock()
            .unwrap()
            .records
            .get(&(fqdn.to_owned(), record_type))
            .map(|r| r.value.clone())
    }

    pub fn seed(&self, fqdn: &str, record_type: RecordType, id: &str, value: &str) {
        self.zone.lock().unwrap().records.insert(
            (fqdn.to_owned(), record_type),
            RecordState {
                id: id.into(),
                value: value.into(),
            },
        );
    }
}

impl Connector for FakeDns {
    type Provider = FakeDns;

    fn connect(&self, target: &ProviderTarget) -> Result<FakeDns, FakeError> {
        if target.credentials.access_key_id == BAD_KEY {
            return Err(FakeError("InvalidAccessKeyId.NotFound".into()));
        }
        Ok(self.clone())
    }
}

#[async_trait::async_trait]
impl Provider for FakeDns {
    type Error = FakeError;

    async fn describe(
        &self,
        subdomain: &str,
        root_domain: &str,
        record_type: RecordType,
    ) -> Result<RecordState, FakeError> {
        let fqdn = format!("{}.{}", subdomain, root_domain);
        let mut zone = self.zone.lock().unwrap();
        zone.calls.push(Call::Describe(fqdn.clone(), record_type));

        if root_domain == BROKEN_DOMAIN {
            return Err(FakeError("ServiceUnavailable".into()));
        }
        Ok(zone
            .records
            .get(&(fqdn, record_type))
            .cloned()
            .unwrap_or_default())
    }

    async fn create(
        &self,
        root_domain: &str,
        subdomain: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), FakeError> {
        let fqdn = format!("{}.{}", subdomain, root_domain);
        let mut zone = self.zone.lock().unwrap();
        zone.calls.push(Call::Create(fqdn.clone(), record_type, value.into()));

        zone.next_id += 1;
        let id = format!("rec-{}", zone.next_id);
        zone.records.insert(
            (fqdn, record_type),
            RecordState {
                id,
                value: value.into(),
            },
        );
        Ok(())
    }

    async fn update(
        &self,
        record_id: &str,
        _subdomain: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), FakeError> {
        let mut zone = self.zone.lock().unwrap();
        zone.calls.push(Call::Update(record_id.into(), record_type, value.into()));

        let record = zone
            .records
            .values_mut()
            .find(|r| r.id == record_id)
            .ok_or_else(|| FakeError("DomainRecordNotBelongToUser".into()))?;
        record.value = value.into();
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("fake provider: {0}")]
pub struct FakeError(pub String);
