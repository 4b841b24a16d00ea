use std::fmt::{Display, Formatter};

use crate::target::ProviderTarget;

pub mod aliyun;
#[cfg(test)]
pub mod fake;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
        }
    }
}

impl Display for RecordType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A provider's current view of one subdomain record.
///
/// An empty `id` means the record does not exist.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordState {
    pub id: String,
    pub value: String,
}

impl RecordState {
    pub fn exists(&self) -> bool {
        !self.id.is_empty()
    }
}

#[cfg_attr(test, mockall::automock(type Error = MockError;))]
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn describe(
        &self,
        subdomain: &str,
        root_domain: &str,
        record_type: RecordType,
    ) -> Result<RecordState, Self::Error>;

    async fn create(
        &self,
        root_domain: &str,
        subdomain: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), Self::Error>;

    async fn update(
        &self,
        record_id: &str,
        subdomain: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), Self::Error>;
}

/// Builds a [`Provider`] for a host's credentials.
///
/// Construction failures are reported through the provider's own error type so
/// callers can tell them apart from call-time failures by where they occur.
pub trait Connector: Send + Sync + 'static {
    type Provider: Provider + 'static;

    fn connect(
        &self,
        target: &ProviderTarget,
    ) -> Result<Self::Provider, <Self::Provider as Provider>::Error>;
}

#[cfg(test)]
#[derive(Debug, thiserror::Error)]
#[error("mock provider failure: {0}")]
pub struct MockError(pub String);
