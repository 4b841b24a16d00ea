use std::fmt::{Debug, Display, Formatter};

use tracing::{debug, info};

use crate::{
    dns::{Connector, Provider, RecordType},
    target::{DomainBinding, ProviderTarget},
};

pub type ConnectorError<C> = <<C as Connector>::Provider as Provider>::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

/// Connects to the target's provider and converges one record.
pub async fn ensure_record<C: Connector>(
    connector: &C,
    target: &ProviderTarget,
    binding: &DomainBinding,
    record_type: RecordType,
    desired: &str,
) -> Result<Outcome, ReconcileError<ConnectorError<C>>> {
    let provider = connector.connect(target).map_err(ReconcileError::Connect)?;

    upsert(&provider, binding, record_type, desired).await
}

/// Creates the record if absent, updates it if its value differs.
///
/// The provider is always asked for the current record first, so record ids
/// changed outside this service are picked up.
#[tracing::instrument(skip(provider, binding), fields(record = %binding.fqdn()), level = "info")]
pub async fn upsert<P: Provider>(
    provider: &P,
    binding: &DomainBinding,
    record_type: RecordType,
    desired: &str,
) -> Result<Outcome, ReconcileError<P::Error>> {
    let current = provider
        .describe(&binding.subdomain, &binding.root_domain, record_type)
        .await
        .map_err(ReconcileError::Describe)?;

    if !current.exists() {
        provider
            .create(&binding.root_domain, &binding.subdomain, record_type, desired)
            .await
            .map_err(ReconcileError::Create)?;
        info!("record created");
        return Ok(Outcome::Created);
    }

    if current.value == desired {
        debug!("record already up to date");
        return Ok(Outcome::Unchanged);
    }

    provider
        .update(&current.id, &binding.subdomain, record_type, desired)
        .await
        .map_err(ReconcileError::Update)?;
    info!(previous = %current.value, "record updated");

    Ok(Outcome::Updated)
}

#[derive(Debug)]
pub enum ReconcileError<E> {
    Connect(E),
    Describe(E),
    Create(E),
    Update(E),
}

impl<E> ReconcileError<E> {
    pub fn inner(&self) -> &E {
        match self {
            ReconcileError::Connect(e)
            | ReconcileError::Describe(e)
            | ReconcileError::Create(e)
            | ReconcileError::Update(e) => e,
        }
    }
}

impl<E: Display> Display for ReconcileError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileError::Connect(e) => write!(f, "failed to create provider client: {}", e),
            ReconcileError::Describe(e) => write!(f, "failed to check subdomain: {}", e),
            ReconcileError::Create(e) => write!(f, "failed to add domain record: {}", e),
            ReconcileError::Update(e) => write!(f, "failed to update domain record: {}", e),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for ReconcileError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.inner())
    }
}
