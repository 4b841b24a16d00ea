use std::fmt::{Debug, Display, Formatter};
use std::str::FromStr;

use thiserror::Error;

use crate::dns::RecordType;

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub access_key_id: String,
    pub access_key_secret: String,
    pub region: String,
}

impl Debug for Credentials {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key_id", &self.access_key_id)
            .field("access_key_secret", &"<redacted>")
            .field("region", &self.region)
            .finish()
    }
}

/// Provider account and domains kept in sync for one reporting host.
#[derive(Debug, Clone)]
pub struct ProviderTarget {
    pub credentials: Credentials,
    /// Overrides the provider's regional API endpoint.
    pub endpoint: Option<String>,
    /// Raw `label:domain` bindings, parsed when a change is dispatched.
    pub domains: Vec<String>,
    /// Also keep `A` records in sync with the reported IPv4.
    pub sync_ipv4: bool,
}

impl ProviderTarget {
    /// Record types to converge for a report, paired with their desired values.
    pub fn desired_records<'a>(&self, ipv6: &'a str, ipv4: &'a str) -> Vec<(RecordType, &'a str)> {
        let mut records = vec![(RecordType::Aaaa, ipv6)];
        if self.sync_ipv4 {
            records.push((RecordType::A, ipv4));
        }
        records
    }
}

/// A subdomain label under a root domain, written `label:domain`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DomainBinding {
    pub subdomain: String,
    pub root_domain: String,
}

impl DomainBinding {
    pub fn fqdn(&self) -> String {
        format!("{}.{}", self.subdomain, self.root_domain)
    }
}

impl FromStr for DomainBinding {
    type Err = BindingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = s.split(':').collect();
        match parts.as_slice() {
            [subdomain, root_domain] => {
                let (subdomain, root_domain) = (subdomain.trim(), root_domain.trim());
                if subdomain.is_empty() || root_domain.is_empty() {
                    return Err(BindingError::EmptyPart(s.to_owned()));
                }
                Ok(Self {
                    subdomain: subdomain.to_owned(),
                    root_domain: root_domain.to_owned(),
                })
            }
            _ => Err(BindingError::Separator(s.to_owned())),
        }
    }
}

impl Display for DomainBinding {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.subdomain, self.root_domain)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum BindingError {
    #[error("binding {0:?} must be written label:domain, e.g. www:example.com")]
    Separator(String),
    #[error("binding {0:?} has an empty label or domain")]
    EmptyPart(String),
}
