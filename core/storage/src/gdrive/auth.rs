//! OAuth2 client configuration, tokens and token refresh for Google Drive.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use oauth2::basic::{BasicClient, BasicTokenResponse};
use oauth2::{
    AuthUrl, ClientId, ClientSecret, EndpointNotSet, EndpointSet, RefreshToken, TokenResponse,
    TokenUrl,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use driveup_common::{Error, Result, SecretString};

use super::consent::LoopbackConsent;
use super::credentials::CredentialStore;

/// Full Drive access; folders created by earlier runs must stay visible.
pub const DRIVE_SCOPE: &str = "https://www.googleapis.com/auth/drive";
/// OAuth2 authorization endpoint.
const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// OAuth2 token endpoint.
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

pub(crate) type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

fn default_auth_uri() -> String {
    GOOGLE_AUTH_URL.to_string()
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URL.to_string()
}

/// OAuth2 client registration, as issued by the identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Client ID.
    pub client_id: String,
    /// Client secret; absent for some public clients.
    #[serde(default)]
    pub client_secret: Option<SecretString>,
    /// Authorization endpoint.
    #[serde(default = "default_auth_uri")]
    pub auth_uri: String,
    /// Token endpoint.
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

/// The provider's downloadable client-config document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ClientSecretsFile {
    Installed(ClientConfig),
    Web(ClientConfig),
}

impl ClientSecretsFile {
    pub(crate) fn into_config(self) -> ClientConfig {
        match self {
            ClientSecretsFile::Installed(config) | ClientSecretsFile::Web(config) => config,
        }
    }
}

impl ClientConfig {
    /// Parse a raw client-config payload.
    ///
    /// Accepts the provider's `{"installed": {...}}` / `{"web": {...}}`
    /// document as well as a bare client object.
    ///
    /// # Errors
    /// - `MalformedCredentialPayload` on invalid JSON or a missing client id
    pub fn from_payload(payload: &str) -> Result<Self> {
        let config = match serde_json::from_str::<ClientSecretsFile>(payload) {
            Ok(file) => file.into_config(),
            Err(wrapped_err) => serde_json::from_str::<ClientConfig>(payload).map_err(|_| {
                Error::MalformedCredentialPayload(format!(
                    "Expected an OAuth client config with an \"installed\" or \"web\" section: {}",
                    wrapped_err
                ))
            })?,
        };

        if config.client_id.trim().is_empty() {
            return Err(Error::MalformedCredentialPayload(
                "client_id is empty".to_string(),
            ));
        }

        Ok(config)
    }

    /// Build an oauth2 client for this registration.
    pub(crate) fn oauth_client(&self) -> Result<ConfiguredClient> {
        let mut client = BasicClient::new(ClientId::new(self.client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(self.auth_uri.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid auth URL: {}", e)))?,
            )
            .set_token_uri(
                TokenUrl::new(self.token_uri.clone())
                    .map_err(|e| Error::InvalidInput(format!("Invalid token URL: {}", e)))?,
            );

        if let Some(secret) = &self.client_secret {
            client = client.set_client_secret(ClientSecret::new(secret.expose().to_string()));
        }

        Ok(client)
    }
}

/// OAuth2 tokens with expiration tracking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Access token for API requests.
    pub access_token: SecretString,
    /// Refresh token for obtaining new access tokens.
    #[serde(default)]
    pub refresh_token: Option<SecretString>,
    /// When the access token expires.
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    /// Check if the access token is expired or about to expire.
    pub fn is_expired(&self) -> bool {
        // less than 5 minutes left counts as expired
        self.expires_at < Utc::now() + Duration::minutes(5)
    }

    /// Whether a refresh can be attempted.
    pub fn can_refresh(&self) -> bool {
        self.refresh_token
            .as_ref()
            .is_some_and(|t| !t.expose().is_empty())
    }

    pub(crate) fn from_token_response(
        token: &BasicTokenResponse,
        previous_refresh: Option<&SecretString>,
    ) -> Self {
        let expires_in = token
            .expires_in()
            .unwrap_or_else(|| std::time::Duration::from_secs(3600));

        Credential {
            access_token: SecretString::new(token.access_token().secret().clone()),
            // refresh responses usually omit the refresh token
            refresh_token: token
                .refresh_token()
                .map(|t| SecretString::new(t.secret().clone()))
                .or_else(|| previous_refresh.cloned()),
            expires_at: Utc::now()
                + Duration::from_std(expires_in).unwrap_or_else(|_| Duration::hours(1)),
        }
    }
}

/// Obtains tokens from the identity provider.
#[async_trait]
pub trait Authorizer: Send + Sync {
    /// Exchange a refresh token for a fresh credential.
    async fn refresh(&self, client: &ClientConfig, refresh_token: &SecretString)
        -> Result<Credential>;

    /// Run an interactive consent cycle.
    async fn consent(&self, client: &ClientConfig) -> Result<Credential>;
}

/// Authorizer backed by the `oauth2` crate and a loopback consent flow.
pub struct OAuthAuthorizer {
    http: oauth2::reqwest::Client,
    consent: LoopbackConsent,
}

impl OAuthAuthorizer {
    /// Create an authorizer that opens the system browser for consent.
    pub fn new() -> Result<Self> {
        Ok(Self {
            http: oauth_http_client()?,
            consent: LoopbackConsent::default(),
        })
    }

    /// Replace the consent flow settings.
    pub fn with_consent(mut self, consent: LoopbackConsent) -> Self {
        self.consent = consent;
        self
    }
}

/// HTTP client for token requests; redirects are disabled as the
/// oauth2 crate recommends.
pub(crate) fn oauth_http_client() -> Result<oauth2::reqwest::Client> {
    oauth2::reqwest::ClientBuilder::new()
        .redirect(oauth2::reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| Error::Network(format!("Failed to create OAuth HTTP client: {}", e)))
}

#[async_trait]
impl Authorizer for OAuthAuthorizer {
    async fn refresh(
        &self,
        client: &ClientConfig,
        refresh_token: &SecretString,
    ) -> Result<Credential> {
        let token = client
            .oauth_client()?
            .exchange_refresh_token(&RefreshToken::new(refresh_token.expose().to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| Error::Authentication(format!("Token refresh failed: {}", e)))?;

        Ok(Credential::from_token_response(&token, Some(refresh_token)))
    }

    async fn consent(&self, client: &ClientConfig) -> Result<Credential> {
        self.consent.run(client, &self.http).await
    }
}

/// Source of bearer tokens for API requests.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Get a valid access token.
    async fn access_token(&self) -> Result<String>;
}

/// OAuth token holder that refreshes expired tokens and persists them.
pub struct TokenManager {
    store: Arc<CredentialStore>,
    client: Option<ClientConfig>,
    credential: RwLock<Credential>,
}

impl TokenManager {
    /// Create a new token manager with an acquired credential.
    pub fn new(store: Arc<CredentialStore>, client: Option<ClientConfig>, credential: Credential) -> Self {
        Self {
            store,
            client,
            credential: RwLock::new(credential),
        }
    }

    /// Get the current credential.
    pub async fn credential(&self) -> Credential {
        self.credential.read().await.clone()
    }
}

#[async_trait]
impl AccessTokenSource for TokenManager {
    /// Get a valid access token, refreshing if necessary.
    ///
    /// # Errors
    /// - Token expired and cannot be refreshed
    /// - Token refresh failed
    async fn access_token(&self) -> Result<String> {
        {
            let credential = self.credential.read().await;
            if !credential.is_expired() {
                return Ok(credential.access_token.expose().to_string());
            }
        }

        let mut credential = self.credential.write().await;

        // double-check after acquiring the write lock
        if !credential.is_expired() {
            return Ok(credential.access_token.expose().to_string());
        }

        let (client, refresh_token) = match (&self.client, &credential.refresh_token) {
            (Some(client), Some(refresh_token)) => (client, refresh_token.clone()),
            _ => {
                return Err(Error::Authentication(
                    "Access token expired and cannot be refreshed".to_string(),
                ))
            }
        };

        info!("Refreshing expired access token");
        let refreshed = self.store.authorizer().refresh(client, &refresh_token).await?;

        if let Err(e) = self.store.persist_token(&refreshed).await {
            warn!("Could not persist refreshed token: {}", e);
        }

        *credential = refreshed;
        Ok(credential.access_token.expose().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const INSTALLED_PAYLOAD: &str = r#"{
        "installed": {
            "client_id": "123.apps.googleusercontent.com",
            "project_id": "render-farm",
            "auth_uri": "https://accounts.google.com/o/oauth2/auth",
            "token_uri": "https://oauth2.googleapis.com/token",
            "client_secret": "shh",
            "redirect_uris": ["http://localhost"]
        }
    }"#;

    fn credential(expires_at: DateTime<Utc>, refresh: Option<&str>) -> Credential {
        Credential {
            access_token: SecretString::new("access"),
            refresh_token: refresh.map(SecretString::new),
            expires_at,
        }
    }

    #[test]
    fn test_credential_expiration() {
        assert!(credential(Utc::now() - Duration::hours(1), None).is_expired());
        assert!(!credential(Utc::now() + Duration::hours(1), None).is_expired());
    }

    #[test]
    fn test_credential_near_expiration() {
        // 4 minutes left is inside the 5 minute buffer
        assert!(credential(Utc::now() + Duration::minutes(4), None).is_expired());
    }

    #[test]
    fn test_can_refresh() {
        assert!(credential(Utc::now(), Some("r")).can_refresh());
        assert!(!credential(Utc::now(), Some("")).can_refresh());
        assert!(!credential(Utc::now(), None).can_refresh());
    }

    #[test]
    fn test_credential_serialization() {
        let original = credential(Utc::now(), Some("refresh"));
        let json = serde_json::to_string(&original).unwrap();
        let restored: Credential = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.access_token, original.access_token);
        assert_eq!(restored.refresh_token, original.refresh_token);
    }

    #[test]
    fn test_client_config_from_installed_payload() {
        let config = ClientConfig::from_payload(INSTALLED_PAYLOAD).unwrap();
        assert_eq!(config.client_id, "123.apps.googleusercontent.com");
        assert_eq!(config.client_secret.unwrap().expose(), "shh");
        assert_eq!(config.token_uri, GOOGLE_TOKEN_URL);
    }

    #[test]
    fn test_client_config_from_bare_object() {
        let config = ClientConfig::from_payload(r#"{"client_id": "abc"}"#).unwrap();
        assert_eq!(config.client_id, "abc");
        assert!(config.client_secret.is_none());
        assert_eq!(config.auth_uri, GOOGLE_AUTH_URL);
    }

    #[test]
    fn test_client_config_malformed() {
        for payload in ["not json", "{}", r#"{"installed": {"client_id": ""}}"#, "[1, 2]"] {
            match ClientConfig::from_payload(payload) {
                Err(Error::MalformedCredentialPayload(_)) => {}
                other => panic!("{:?} parsed as {:?}", payload, other),
            }
        }
    }

    async fn token_endpoint(server: &wiremock::MockServer) -> ClientConfig {
        use wiremock::matchers::{body_string_contains, method, path};
        use wiremock::{Mock, ResponseTemplate};

        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=r1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-access",
                "token_type": "Bearer",
                "expires_in": 3599
            })))
            .expect(1)
            .mount(server)
            .await;

        ClientConfig {
            client_id: "cid".to_string(),
            client_secret: Some(SecretString::new("cs")),
            auth_uri: GOOGLE_AUTH_URL.to_string(),
            token_uri: format!("{}/token", server.uri()),
        }
    }

    #[tokio::test]
    async fn test_refresh_keeps_previous_refresh_token() {
        let server = wiremock::MockServer::start().await;
        let client = token_endpoint(&server).await;

        let refreshed = OAuthAuthorizer::new()
            .unwrap()
            .refresh(&client, &SecretString::new("r1"))
            .await
            .unwrap();

        assert_eq!(refreshed.access_token.expose(), "fresh-access");
        assert_eq!(refreshed.refresh_token.as_ref().unwrap().expose(), "r1");
        assert!(!refreshed.is_expired());
    }

    #[tokio::test]
    async fn test_token_manager_refreshes_and_persists() {
        let server = wiremock::MockServer::start().await;
        let client = token_endpoint(&server).await;
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(
            tmp.path(),
            Arc::new(OAuthAuthorizer::new().unwrap()),
        ));

        let manager = TokenManager::new(
            store.clone(),
            Some(client),
            credential(Utc::now() - Duration::hours(1), Some("r1")),
        );

        assert_eq!(manager.access_token().await.unwrap(), "fresh-access");
        // cached now, the mock expects a single refresh
        assert_eq!(manager.access_token().await.unwrap(), "fresh-access");
        assert_eq!(
            store.load_token().await.unwrap().access_token.expose(),
            "fresh-access"
        );
    }

    #[tokio::test]
    async fn test_token_manager_without_refresh_token() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(
            tmp.path(),
            Arc::new(OAuthAuthorizer::new().unwrap()),
        ));
        let manager = TokenManager::new(
            store,
            None,
            credential(Utc::now() - Duration::hours(1), None),
        );

        assert!(matches!(
            manager.access_token().await,
            Err(Error::Authentication(_))
        ));
    }

    #[test]
    fn test_oauth_client_rejects_bad_urls() {
        let config = ClientConfig {
            client_id: "id".to_string(),
            client_secret: None,
            auth_uri: "not a url".to_string(),
            token_uri: GOOGLE_TOKEN_URL.to_string(),
        };
        assert!(config.oauth_client().is_err());
    }
}
