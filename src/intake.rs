use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{
    cache::{AddressCache, Report},
    dns::{Connector, RecordType},
    reconciler,
    target::{DomainBinding, ProviderTarget},
};

/// Longest host identifier accepted from a client.
pub const MAX_HOST_LEN: usize = 16;
/// Longest textual IPv6 address accepted from a client.
pub const MAX_IPV6_LEN: usize = 39;

pub type Targets = HashMap<String, ProviderTarget>;

/// Turns address reports into cache updates and, on change, DNS reconciliations.
pub struct Intake<C: Connector> {
    cache: Arc<AddressCache>,
    targets: Arc<Targets>,
    connector: Arc<C>,
}

impl<C: Connector> Intake<C> {
    pub fn new(cache: Arc<AddressCache>, targets: Arc<Targets>, connector: Arc<C>) -> Self {
        Self {
            cache,
            targets,
            connector,
        }
    }

    /// Records a report. Reconciliation runs in the background and its
    /// outcome is only logged.
    pub async fn handle(&self, host: &str, ipv6: &str, ipv4: &str) {
        self.dispatch(host, ipv6, ipv4).await;
    }

    /// Like [`Intake::handle`], but hands back the spawned reconciliation tasks.
    #[tracing::instrument(skip(self), level = "debug")]
    pub async fn dispatch(&self, host: &str, ipv6: &str, ipv4: &str) -> Vec<JoinHandle<()>> {
        if host.len() > MAX_HOST_LEN || ipv6.len() > MAX_IPV6_LEN {
            debug!("dropping oversized report");
            return Vec::new();
        }

        self.cache.sweep_expired().await;

        if self.cache.report(host, ipv6, ipv4).await == Report::Unchanged {
            debug!("addresses unchanged");
            return Vec::new();
        }
        info!(host, ipv6, ipv4, "addresses changed");

        let Some(target) = self.targets.get(&host.to_ascii_lowercase()) else {
            debug!("no provider configured, cache only");
            return Vec::new();
        };

        let mut tasks = Vec::new();
        for domain in &target.domains {
            let binding = match domain.parse::<DomainBinding>() {
                Ok(binding) => binding,
                Err(e) => {
                    error!(host, "skipping domain binding: {}", e);
                    continue;
                }
            };

            for (record_type, desired) in target.desired_records(ipv6, ipv4) {
                if desired.is_empty() {
                    debug!(%binding, %record_type, "no address reported, skipping");
                    continue;
                }
                if record_type == RecordType::A && desired.parse::<Ipv4Addr>().is_err() {
                    debug!(%binding, value = desired, "client address is not ipv4, skipping A record");
                    continue;
                }

                let connector = Arc::clone(&self.connector);
                let target = target.clone();
                let binding = binding.clone();
                let desired = desired.to_owned();
                let host = host.to_owned();

                tasks.push(tokio::spawn(async move {
                    let res = reconciler::ensure_record(
                        connector.as_ref(),
                        &target,
                        &binding,
                        record_type,
                        &desired,
                    )
                    .await;

                    match res {
                        Ok(outcome) => {
                            info!(host = %host, %binding, %record_type, value = %desired, ?outcome, "reconciled")
                        }
                        Err(e) => {
                            error!(host = %host, %binding, %record_type, value = %desired, "reconciliation failed: {}", e)
                        }
                    }
                }));
            }
        }

        tasks
    }
}
