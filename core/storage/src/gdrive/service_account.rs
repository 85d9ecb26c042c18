//! Service-account authentication.
//!
//! Tokens are minted by `yup-oauth2` from a service-account key; no
//! interactive consent and nothing persisted locally.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tracing::debug;
use yup_oauth2::{ServiceAccountAuthenticator, ServiceAccountKey};

use driveup_common::{Error, Result};

use super::auth::{AccessTokenSource, DRIVE_SCOPE};

type TokenFuture = Pin<Box<dyn Future<Output = Result<String>> + Send>>;
type TokenFetcher = Box<dyn Fn() -> TokenFuture + Send + Sync>;

/// Access tokens for a service account.
pub struct ServiceAccountSource {
    client_email: String,
    fetch: TokenFetcher,
}

impl ServiceAccountSource {
    /// Parse a service-account key payload.
    ///
    /// # Errors
    /// - `MalformedCredentialPayload` if the payload is not a service-account key
    pub fn parse_key(payload: &str) -> Result<ServiceAccountKey> {
        yup_oauth2::parse_service_account_key(payload.as_bytes()).map_err(|e| {
            Error::MalformedCredentialPayload(format!("Invalid service account key: {}", e))
        })
    }

    /// Build a token source from a raw key payload.
    pub async fn from_payload(payload: &str) -> Result<Self> {
        Self::from_key(Self::parse_key(payload)?).await
    }

    /// Build a token source from a parsed key.
    pub async fn from_key(key: ServiceAccountKey) -> Result<Self> {
        let client_email = key.client_email.clone();
        let authenticator = ServiceAccountAuthenticator::builder(key)
            .build()
            .await
            .map_err(|e| {
                Error::Authentication(format!("Cannot build service account authenticator: {}", e))
            })?;
        let authenticator = Arc::new(authenticator);

        let fetch: TokenFetcher = Box::new(move || {
            let authenticator = authenticator.clone();
            Box::pin(async move {
                let token = authenticator
                    .token(&[DRIVE_SCOPE])
                    .await
                    .map_err(|e| Error::Authentication(format!("Service account token: {}", e)))?;
                token
                    .token()
                    .map(str::to_string)
                    .ok_or_else(|| {
                        Error::Authentication("Service account token is empty".to_string())
                    })
            })
        });

        debug!("Service account ready: {}", client_email);
        Ok(Self {
            client_email,
            fetch,
        })
    }

    /// The account the key belongs to; target folders must be shared with it.
    pub fn client_email(&self) -> &str {
        &self.client_email
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountSource {
    async fn access_token(&self) -> Result<String> {
        (self.fetch)().await
    }
}
