//! Access credential cache
//!
//! Keeps the provider's short-lived access token in memory and on disk so that
//! most notifications reuse it without a remote call. The read-or-refresh
//! sequence runs under an async mutex, so concurrent callers that find the
//! credential expired trigger a single fetch.

use crate::clock::Clock;
use crate::error::CredentialError;
use crate::events::Timestamp;
use crate::provider::MessagingProvider;
use crate::storage;
use chrono::Duration;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Bearer token together with the instant after which it must not be used
#[derive(Debug, Clone, PartialEq)]
pub struct Credential {
    pub token: String,
    pub expires_at: Timestamp,
}

impl Credential {
    /// Whether the credential may still be used at `now`
    pub fn is_valid_at(&self, now: Timestamp) -> bool {
        self.expires_at > now
    }
}

/// On-disk form of the cached credential
#[derive(Debug, Serialize, Deserialize)]
struct StoredCredential {
    access_token: String,
    expires_in: i64,
    /// Absent in files that never recorded an expiry; such entries count as expired
    #[serde(default)]
    expires_at: Option<Timestamp>,
}

/// Cache for the provider access credential
pub struct CredentialCache {
    provider: Arc<dyn MessagingProvider>,
    app_id: String,
    app_secret: String,
    path: PathBuf,
    safety_margin: Duration,
    clock: Arc<dyn Clock>,
    current: Mutex<Option<Credential>>,
}

impl CredentialCache {
    /// Create a cache, picking up any credential persisted at `path`
    ///
    /// An unreadable or corrupt file is logged and ignored; the next call will
    /// fetch a new credential and overwrite it.
    pub fn new(
        provider: Arc<dyn MessagingProvider>,
        app_id: String,
        app_secret: String,
        path: PathBuf,
        safety_margin: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let current = match storage::read_json::<StoredCredential>(&path) {
            Ok(Some(stored)) => stored.expires_at.map(|expires_at| Credential {
                token: stored.access_token,
                expires_at,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!("Ignoring unreadable credential cache: {}", e);
                None
            }
        };

        Self {
            provider,
            app_id,
            app_secret,
            path,
            safety_margin,
            clock,
            current: Mutex::new(current),
        }
    }

    /// Return a credential that is valid now, fetching a new one if needed
    ///
    /// # Errors
    ///
    /// Returns `CredentialError` if the provider call fails or yields no
    /// usable token. Failures are not retried here.
    pub async fn get_valid_credential(&self) -> Result<Credential, CredentialError> {
        let mut current = self.current.lock().await;

        if let Some(credential) = current.as_ref() {
            if credential.is_valid_at(self.clock.now()) {
                return Ok(credential.clone());
            }
            debug!("Cached credential expired at {}", credential.expires_at);
        }

        let credential = self.fetch().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }

    /// Replace a credential the provider has rejected
    ///
    /// If another caller already replaced `rejected` with a credential that is
    /// still valid, that one is returned instead of fetching again.
    pub async fn force_refresh(&self, rejected: &Credential) -> Result<Credential, CredentialError> {
        let mut current = self.current.lock().await;

        if let Some(credential) = current.as_ref() {
            if credential.token != rejected.token && credential.is_valid_at(self.clock.now()) {
                return Ok(credential.clone());
            }
        }

        let credential = self.fetch().await?;
        *current = Some(credential.clone());
        Ok(credential)
    }

    async fn fetch(&self) -> Result<Credential, CredentialError> {
        let requested_at = self.clock.now();
        let grant = self
            .provider
            .fetch_token(&self.app_id, &self.app_secret)
            .await?;

        if grant.access_token.trim().is_empty() {
            return Err(CredentialError::MissingToken(
                "response carried no access_token".to_string(),
            ));
        }

        let expires_at = Duration::try_seconds(grant.expires_in)
            .and_then(|lifetime| requested_at.checked_add_signed(lifetime))
            .and_then(|expiry| expiry.checked_sub_signed(self.safety_margin))
            .ok_or_else(|| {
                CredentialError::MissingToken(format!(
                    "token lifetime of {}s is out of range",
                    grant.expires_in
                ))
            })?;
        if expires_at <= self.clock.now() {
            return Err(CredentialError::MissingToken(format!(
                "token lifetime of {}s does not exceed the {}s safety margin",
                grant.expires_in,
                self.safety_margin.num_seconds()
            )));
        }

        let stored = StoredCredential {
            access_token: grant.access_token.clone(),
            expires_in: grant.expires_in,
            expires_at: Some(expires_at),
        };
        let path = self.path.clone();
        match tokio::task::spawn_blocking(move || storage::write_json(&path, &stored)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to persist credential: {}", e),
            Err(e) => warn!("Credential write task failed: {}", e),
        }

        info!("Obtained new access credential valid until {}", expires_at);
        Ok(Credential {
            token: grant.access_token,
            expires_at,
        })
    }
}
