//! Persisted OAuth credentials.
//!
//! The store owns one directory holding `token.json` (the last credential)
//! and `credentials.json` (the identity-provider client config the token
//! was issued for). Both are re-read on every acquisition.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

use driveup_common::{Error, Result};

use super::auth::{
    Authorizer, ClientConfig, ClientSecretsFile, Credential, OAuthAuthorizer, TokenManager,
};

/// Directory name under the home directory.
const DEFAULT_DIR_NAME: &str = ".driveup";
const TOKEN_FILE: &str = "token.json";
const CLIENT_CONFIG_FILE: &str = "credentials.json";

/// Loads, refreshes and persists the OAuth credential.
pub struct CredentialStore {
    dir: PathBuf,
    authorizer: Arc<dyn Authorizer>,
}

impl CredentialStore {
    /// Create a store rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>, authorizer: Arc<dyn Authorizer>) -> Self {
        Self {
            dir: dir.into(),
            authorizer,
        }
    }

    /// Create a store in `~/.driveup` using the browser consent flow.
    pub fn at_default_location() -> Result<Self> {
        Ok(Self::new(
            default_state_dir()?,
            Arc::new(OAuthAuthorizer::new()?),
        ))
    }

    /// Directory holding the persisted files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the persisted token.
    pub fn token_path(&self) -> PathBuf {
        self.dir.join(TOKEN_FILE)
    }

    /// Path of the persisted client config.
    pub fn config_path(&self) -> PathBuf {
        self.dir.join(CLIENT_CONFIG_FILE)
    }

    /// The authorizer used for refresh and consent.
    pub fn authorizer(&self) -> &dyn Authorizer {
        self.authorizer.as_ref()
    }

    /// Obtain a usable credential.
    ///
    /// Order of preference: the persisted token while it is valid, a
    /// refresh of the persisted token, then a new consent cycle using the
    /// supplied payload or the previously saved client config.
    ///
    /// # Errors
    /// - `MalformedCredentialPayload` if consent is needed and `payload`
    ///   cannot be parsed
    /// - `MissingCredentialConfig` if consent is needed but no client
    ///   config is available
    /// - `Authentication` if consent fails
    pub async fn acquire(&self, payload: Option<&str>) -> Result<Credential> {
        self.acquire_with_client(payload).await.map(|(credential, _)| credential)
    }

    /// Obtain a credential wrapped in a [`TokenManager`] that keeps it
    /// fresh for the rest of the run.
    pub async fn session(self: &Arc<Self>, payload: Option<&str>) -> Result<TokenManager> {
        let (credential, client) = self.acquire_with_client(payload).await?;
        Ok(TokenManager::new(self.clone(), client, credential))
    }

    async fn acquire_with_client(
        &self,
        payload: Option<&str>,
    ) -> Result<(Credential, Option<ClientConfig>)> {
        fs::create_dir_all(&self.dir).await?;

        let supplied = payload.map(str::trim).filter(|p| !p.is_empty());
        let saved = self.load_client_config().await;

        if let Some(credential) = self.load_token().await {
            // a payload that does not parse only matters once consent is needed
            let client = supplied
                .and_then(|raw| ClientConfig::from_payload(raw).ok())
                .or_else(|| saved.clone());

            if !credential.is_expired() {
                debug!("Using persisted token");
                return Ok((credential, client));
            }

            if let (Some(client), Some(refresh_token)) = (&client, &credential.refresh_token) {
                info!("Refreshing expired token");
                match self.authorizer.refresh(client, refresh_token).await {
                    Ok(refreshed) => {
                        self.persist_token(&refreshed).await?;
                        return Ok((refreshed, Some(client.clone())));
                    }
                    Err(e) => warn!("Token refresh failed, new consent required: {}", e),
                }
            }
        }

        if let Some(raw) = supplied {
            let client = ClientConfig::from_payload(raw)?;
            info!("Starting consent with the supplied client config");
            let credential = self.authorizer.consent(&client).await?;
            self.persist_client_config(&client).await?;
            self.persist_token(&credential).await?;
            info!("Authorization succeeded, token saved to {}", self.token_path().display());
            return Ok((credential, Some(client)));
        }

        if let Some(client) = saved {
            info!("Starting consent with the saved client config");
            let credential = self.authorizer.consent(&client).await?;
            self.persist_token(&credential).await?;
            info!("Authorization succeeded, token saved to {}", self.token_path().display());
            return Ok((credential, Some(client)));
        }

        Err(Error::MissingCredentialConfig(format!(
            "No valid token and no OAuth client config. Create an OAuth client ID \
             (desktop app) with your identity provider, download its credentials.json \
             and pass its contents once; it is kept in {}",
            self.dir.display()
        )))
    }

    /// Load the persisted token. A missing or unreadable file yields `None`.
    pub async fn load_token(&self) -> Option<Credential> {
        let path = self.token_path();
        let content = fs::read_to_string(&path).await.ok()?;

        match serde_json::from_str(&content) {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Ignoring corrupted token file {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Load the saved client config, if any.
    pub async fn load_client_config(&self) -> Option<ClientConfig> {
        let path = self.config_path();
        let content = fs::read_to_string(&path).await.ok()?;

        match ClientConfig::from_payload(&content) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Ignoring unreadable client config {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the token file.
    pub async fn persist_token(&self, credential: &Credential) -> Result<()> {
        fs::create_dir_all(&self.dir).await?;
        let json = serde_json::to_string_pretty(credential)?;
        fs::write(self.token_path(), json).await?;
        Ok(())
    }

    async fn persist_client_config(&self, client: &ClientConfig) -> Result<()> {
        let json = serde_json::to_string_pretty(&ClientSecretsFile::Installed(client.clone()))?;
        fs::write(self.config_path(), json).await?;
        Ok(())
    }
}

/// `~/.driveup`.
pub fn default_state_dir() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(DEFAULT_DIR_NAME))
        .ok_or_else(|| Error::InvalidInput("Cannot determine the home directory".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use driveup_common::SecretString;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PAYLOAD: &str = r#"{"installed": {"client_id": "cid", "client_secret": "cs"}}"#;

    /// Authorizer that hands out fixed tokens and counts calls.
    #[derive(Default)]
    struct FakeAuthorizer {
        refreshes: AtomicUsize,
        consents: AtomicUsize,
        fail_refresh: bool,
    }

    #[async_trait]
    impl Authorizer for FakeAuthorizer {
        async fn refresh(
            &self,
            _client: &ClientConfig,
            refresh_token: &SecretString,
        ) -> Result<Credential> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            if self.fail_refresh {
                return Err(Error::Authentication("invalid_grant".to_string()));
            }
            Ok(Credential {
                access_token: SecretString::new("refreshed"),
                refresh_token: Some(refresh_token.clone()),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }

        async fn consent(&self, _client: &ClientConfig) -> Result<Credential> {
            self.consents.fetch_add(1, Ordering::SeqCst);
            Ok(Credential {
                access_token: SecretString::new("consented"),
                refresh_token: Some(SecretString::new("fresh-refresh")),
                expires_at: Utc::now() + Duration::hours(1),
            })
        }
    }

    fn store(dir: &Path, authorizer: Arc<FakeAuthorizer>) -> CredentialStore {
        CredentialStore::new(dir.join("state"), authorizer)
    }

    fn expired(refresh: Option<&str>) -> Credential {
        Credential {
            access_token: SecretString::new("stale"),
            refresh_token: refresh.map(SecretString::new),
            expires_at: Utc::now() - Duration::hours(2),
        }
    }

    #[tokio::test]
    async fn test_missing_config_is_terminal() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer::default());
        let store = store(tmp.path(), authorizer.clone());

        let result = store.acquire(None).await;

        assert!(matches!(result, Err(Error::MissingCredentialConfig(_))));
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 0);
        // the directory is still created
        assert!(store.dir().is_dir());
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path(), Arc::new(FakeAuthorizer::default()));

        let result = store.acquire(Some("{not json")).await;
        assert!(matches!(result, Err(Error::MalformedCredentialPayload(_))));
    }

    #[tokio::test]
    async fn test_consent_persists_token_and_config() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer::default());
        let store = store(tmp.path(), authorizer.clone());

        let credential = store.acquire(Some(PAYLOAD)).await.unwrap();

        assert_eq!(credential.access_token.expose(), "consented");
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 1);
        assert!(store.token_path().is_file());
        assert_eq!(store.load_client_config().await.unwrap().client_id, "cid");
    }

    #[tokio::test]
    async fn test_valid_token_is_returned_unchanged() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer::default());
        let store = store(tmp.path(), authorizer.clone());

        store.acquire(Some(PAYLOAD)).await.unwrap();
        let again = store.acquire(None).await.unwrap();

        assert_eq!(again.access_token.expose(), "consented");
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 1);
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_token_ignores_malformed_payload() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer::default());
        let store = store(tmp.path(), authorizer.clone());

        let valid = Credential {
            access_token: SecretString::new("still-good"),
            refresh_token: Some(SecretString::new("r1")),
            expires_at: Utc::now() + Duration::hours(1),
        };
        store.persist_token(&valid).await.unwrap();

        let credential = store.acquire(Some("{typo")).await.unwrap();

        assert_eq!(credential.access_token.expose(), "still-good");
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 0);
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 0);
        assert!(!store.config_path().exists());
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed_without_consent() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer::default());
        let store = store(tmp.path(), authorizer.clone());

        store.persist_token(&expired(Some("r1"))).await.unwrap();
        store
            .persist_client_config(&ClientConfig::from_payload(PAYLOAD).unwrap())
            .await
            .unwrap();

        let credential = store.acquire(None).await.unwrap();

        assert!(!credential.is_expired());
        assert_eq!(credential.access_token.expose(), "refreshed");
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 0);

        let persisted = store.load_token().await.unwrap();
        assert_eq!(persisted.access_token.expose(), "refreshed");
    }

    #[tokio::test]
    async fn test_failed_refresh_falls_back_to_consent() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer {
            fail_refresh: true,
            ..Default::default()
        });
        let store = store(tmp.path(), authorizer.clone());

        store.persist_token(&expired(Some("revoked"))).await.unwrap();
        let credential = store.acquire(Some(PAYLOAD)).await.unwrap();

        assert_eq!(credential.access_token.expose(), "consented");
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 1);
        assert_eq!(authorizer.consents.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_without_refresh_token_needs_consent() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer::default());
        let store = store(tmp.path(), authorizer.clone());

        store.persist_token(&expired(None)).await.unwrap();
        assert!(matches!(
            store.acquire(None).await,
            Err(Error::MissingCredentialConfig(_))
        ));
        assert_eq!(authorizer.refreshes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_corrupted_token_triggers_consent() {
        let tmp = tempfile::tempdir().unwrap();
        let authorizer = Arc::new(FakeAuthorizer::default());
        let store = store(tmp.path(), authorizer.clone());

        fs::create_dir_all(store.dir()).await.unwrap();
        fs::write(store.token_path(), b"\x80\x04garbage").await.unwrap();

        assert!(store.load_token().await.is_none());
        let credential = store.acquire(Some(PAYLOAD)).await.unwrap();
        assert_eq!(credential.access_token.expose(), "consented");
    }
}
