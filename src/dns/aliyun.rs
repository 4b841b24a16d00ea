use std::collections::BTreeMap;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::Utc;
use rand::Rng;
use reqwest::{Client, Url};
use ring::hmac;
use serde::{de::DeserializeOwned, Deserialize};
use thiserror::Error;
use tracing::debug;
use url::form_urlencoded;

use super::{Connector, Provider, RecordState, RecordType};
use crate::target::{Credentials, ProviderTarget};

const API_VERSION: &str = "2015-01-09";
const SIGNATURE_METHOD: &str = "HMAC-SHA1";
const SIGNATURE_VERSION: &str = "1.0";

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the Alibaba Cloud DNS RPC API.
#[derive(Debug, Clone)]
pub struct AliyunProvider {
    endpoint: Url,
    access_key_id: String,
    access_key_secret: String,
    client: Client,
}

impl AliyunProvider {
    pub fn new(creds: &Credentials, timeout: Duration) -> Result<Self, AliyunError> {
        let endpoint = format!("https://alidns.{}.aliyuncs.com/", creds.region);
        Self::with_endpoint(creds, &endpoint, timeout)
    }

    pub fn with_endpoint(
        creds: &Credentials,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, AliyunError> {
        if creds.access_key_id.is_empty()
            || creds.access_key_secret.is_empty()
            || creds.region.is_empty()
        {
            return Err(AliyunError::InvalidCredentials);
        }

        let endpoint = Url::parse(endpoint)?;
        if endpoint.cannot_be_a_base() {
            return Err(AliyunError::BadEndpoint);
        }

        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(AliyunError::NewClient)?;

        Ok(Self {
            endpoint,
            access_key_id: creds.access_key_id.clone(),
            access_key_secret: creds.access_key_secret.clone(),
            client,
        })
    }

    fn common_params(&self, action: &str) -> BTreeMap<String, String> {
        let nonce: u128 = rand::thread_rng().gen();

        BTreeMap::from([
            ("AccessKeyId".to_string(), self.access_key_id.clone()),
            ("Action".to_string(), action.to_string()),
            ("Format".to_string(), "JSON".to_string()),
            ("SignatureMethod".to_string(), SIGNATURE_METHOD.to_string()),
            ("SignatureNonce".to_string(), format!("{:032x}", nonce)),
            ("SignatureVersion".to_string(), SIGNATURE_VERSION.to_string()),
            (
                "Timestamp".to_string(),
                Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            ),
            ("Version".to_string(), API_VERSION.to_string()),
        ])
    }

    async fn call<T: DeserializeOwned>(
        &self,
        action: &str,
        params: &[(&str, &str)],
    ) -> Result<T, AliyunError> {
        let mut query = self.common_params(action);
        query.extend(params.iter().map(|(k, v)| (k.to_string(), v.to_string())));

        let mut url = self.endpoint.clone();
        url.set_query(Some(&signed_query(&self.access_key_secret, &query)));

        let response = self.client.get(url).send().await?;
        let status = response.status();
        let body = response.text().await?;
        debug!(action, %status, "alidns responded");

        if !status.is_success() {
            let failure: ApiFailure = serde_json::from_str(&body).unwrap_or(ApiFailure {
                code: status.to_string(),
                message: body,
            });
            return Err(AliyunError::Api {
                status: status.as_u16(),
                code: failure.code,
                message: failure.message,
            });
        }

        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait::async_trait]
impl Provider for AliyunProvider {
    type Error = AliyunError;

    #[tracing::instrument(skip(self))]
    async fn describe(
        &self,
        subdomain: &str,
        root_domain: &str,
        record_type: RecordType,
    ) -> Result<RecordState, Self::Error> {
        let fqdn = format!("{}.{}", subdomain, root_domain);
        let response: DescribeSubDomainRecords = self
            .call(
                "DescribeSubDomainRecords",
                &[("SubDomain", fqdn.as_str()), ("Type", record_type.as_str())],
            )
            .await?;

        Ok(response
            .domain_records
            .record
            .into_iter()
            .next()
            .map(|r| RecordState {
                id: r.record_id,
                value: r.value,
            })
            .unwrap_or_default())
    }

    #[tracing::instrument(skip(self))]
    async fn create(
        &self,
        root_domain: &str,
        subdomain: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), Self::Error> {
        let response: RecordId = self
            .call(
                "AddDomainRecord",
                &[
                    ("DomainName", root_domain),
                    ("RR", subdomain),
                    ("Type", record_type.as_str()),
                    ("Value", value),
                ],
            )
            .await?;
        debug!(record_id = %response.record_id, "record added");

        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn update(
        &self,
        record_id: &str,
        subdomain: &str,
        record_type: RecordType,
        value: &str,
    ) -> Result<(), Self::Error> {
        self.call::<RecordId>(
            "UpdateDomainRecord",
            &[
                ("RecordId", record_id),
                ("RR", subdomain),
                ("Type", record_type.as_str()),
                ("Value", value),
            ],
        )
        .await?;

        Ok(())
    }
}

/// Builds an [`AliyunProvider`] per reconciliation from a host's target.
#[derive(Debug, Clone)]
pub struct AliyunConnector {
    timeout: Duration,
}

impl AliyunConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for AliyunConnector {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Connector for AliyunConnector {
    type Provider = AliyunProvider;

    fn connect(&self, target: &ProviderTarget) -> Result<AliyunProvider, AliyunError> {
        match &target.endpoint {
            Some(endpoint) => AliyunProvider::with_endpoint(&target.credentials, endpoint, self.timeout),
            None => AliyunProvider::new(&target.credentials, self.timeout),
        }
    }
}

/// RFC 3986 encoding as required by the RPC signature.
fn percent_encode(s: &str) -> String {
    form_urlencoded::byte_serialize(s.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
        .replace('*', "%2A")
        .replace("%7E", "~")
}

fn canonical_query(params: &BTreeMap<String, String>) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

fn string_to_sign(canonical: &str) -> String {
    format!("GET&{}&{}", percent_encode("/"), percent_encode(canonical))
}

fn signature(secret: &str, string_to_sign: &str) -> String {
    let key = hmac::Key::new(
        hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY,
        format!("{}&", secret).as_bytes(),
    );
    BASE64.encode(hmac::sign(&key, string_to_sign.as_bytes()).as_ref())
}

fn signed_query(secret: &str, params: &BTreeMap<String, String>) -> String {
    let canonical = canonical_query(params);
    let signature = signature(secret, &string_to_sign(&canonical));

    format!("{}&Signature={}", canonical, percent_encode(&signature))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ApiFailure {
    code: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DescribeSubDomainRecords {
    #[serde(default)]
    domain_records: DomainRecords,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecords {
    #[serde(default)]
    record: Vec<DomainRecord>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DomainRecord {
    record_id: String,
    value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RecordId {
    record_id: String,
}

#[derive(Debug, Error)]
pub enum AliyunError {
    #[error("access key id, access key secret and region are required")]
    InvalidCredentials,
    #[error("bad endpoint url: {0}")]
    EndpointParse(#[from] url::ParseError),
    #[error("endpoint url cannot be a base")]
    BadEndpoint,
    #[error("failed to build http client: {0}")]
    NewClient(#[source] reqwest::Error),
    #[error(transparent)]
    Request(#[from] reqwest::Error),
    #[error("malformed response: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("alidns returned {status}: {code}: {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
}
