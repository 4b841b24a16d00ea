use std::path::PathBuf;

use ring::digest;
use subtle::ConstantTimeEq;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::settings;

/// Shared secret guarding the address listing.
///
/// Until a secret is configured, the first non-empty password submitted
/// becomes it.
#[derive(Debug)]
pub struct PasswordGate {
    hash: Mutex<Option<String>>,
    persist_to: Option<PathBuf>,
}

impl PasswordGate {
    pub fn new(hash: Option<String>, persist_to: Option<PathBuf>) -> Self {
        let hash = hash
            .filter(|h| !h.is_empty())
            .map(|h| h.to_ascii_lowercase());

        Self {
            hash: Mutex::new(hash),
            persist_to,
        }
    }

    pub async fn check(&self, password: &str) -> bool {
        let mut hash = self.hash.lock().await;

        if let Some(expected) = hash.as_deref() {
            return hash_password(password)
                .as_bytes()
                .ct_eq(expected.as_bytes())
                .into();
        }

        if password.is_empty() {
            return false;
        }

        let digest = hash_password(password);
        match &self.persist_to {
            Some(path) => match settings::persist_password(path, &digest).await {
                Ok(()) => info!(path = %path.display(), "listing password set and saved"),
                Err(e) => error!(path = %path.display(), "failed to save listing password: {}", e),
            },
            None => info!("listing password set for this run only"),
        }
        *hash = Some(digest);

        true
    }
}

pub fn hash_password(password: &str) -> String {
    hex::encode(digest::digest(&digest::SHA256, password.as_bytes()))
}
