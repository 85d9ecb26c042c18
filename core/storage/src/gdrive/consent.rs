//! Interactive OAuth2 consent through a loopback redirect.
//!
//! The browser is sent to the provider's consent page with a redirect to
//! `http://127.0.0.1:<port>/`; a one-shot listener on that port picks up
//! the authorization code, which is exchanged with PKCE.

use oauth2::{AuthorizationCode, CsrfToken, PkceCodeChallenge, RedirectUrl, Scope};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{info, warn};
use url::Url;

use driveup_common::{Error, Result};

use super::auth::{ClientConfig, Credential, DRIVE_SCOPE};

const SUCCESS_PAGE: &str = "<html><body><h3>Authorization complete.</h3>\
    <p>You can close this window and return to the upload.</p></body></html>";

/// Settings for the loopback consent flow.
#[derive(Debug, Clone)]
pub struct LoopbackConsent {
    /// Open the consent page in the system browser.
    pub open_browser: bool,
    /// How long to wait for the redirect.
    pub timeout: Duration,
}

impl Default for LoopbackConsent {
    fn default() -> Self {
        Self {
            open_browser: true,
            timeout: Duration::from_secs(300),
        }
    }
}

/// What the redirect carried.
#[derive(Debug, PartialEq, Eq)]
enum Callback {
    Code { code: String, state: String },
    Denied(String),
}

impl LoopbackConsent {
    /// Run one consent cycle and exchange the resulting code.
    ///
    /// # Errors
    /// - Consent denied, timed out, or CSRF state mismatch
    /// - Code exchange failed
    pub async fn run(
        &self,
        client: &ClientConfig,
        http: &oauth2::reqwest::Client,
    ) -> Result<Credential> {
        let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
        let port = listener.local_addr()?.port();
        let redirect = format!("http://127.0.0.1:{}/", port);

        let oauth = client.oauth_client()?.set_redirect_uri(
            RedirectUrl::new(redirect)
                .map_err(|e| Error::InvalidInput(format!("Invalid redirect URL: {}", e)))?,
        );

        let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
        let (auth_url, csrf_token) = oauth
            .authorize_url(CsrfToken::new_random)
            .add_scope(Scope::new(DRIVE_SCOPE.to_string()))
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .set_pkce_challenge(pkce_challenge)
            .url();

        info!("Authorize access in your browser: {}", auth_url);
        if self.open_browser {
            if let Err(e) = open::that(auth_url.as_str()) {
                warn!("Could not open a browser ({}); open the URL manually", e);
            }
        }

        let code = tokio::time::timeout(self.timeout, wait_for_code(&listener))
            .await
            .map_err(|_| {
                Error::Authentication(format!(
                    "No authorization received within {}s",
                    self.timeout.as_secs()
                ))
            })??;

        let (code, state) = match code {
            Callback::Code { code, state } => (code, state),
            Callback::Denied(reason) => {
                return Err(Error::Authentication(format!("Consent denied: {}", reason)))
            }
        };
        if state != *csrf_token.secret() {
            return Err(Error::Authentication(
                "Authorization state mismatch".to_string(),
            ));
        }

        let token = oauth
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(pkce_verifier)
            .request_async(http)
            .await
            .map_err(|e| Error::Authentication(format!("Token exchange failed: {}", e)))?;

        let credential = Credential::from_token_response(&token, None);
        if !credential.can_refresh() {
            warn!("No refresh token received; the next run will need consent again");
        }
        Ok(credential)
    }
}

/// Accept connections until one carries the authorization redirect.
async fn wait_for_code(listener: &TcpListener) -> Result<Callback> {
    loop {
        let (mut stream, _) = listener.accept().await?;
        let (reader, mut writer) = stream.split();

        let mut request_line = String::new();
        BufReader::new(reader).read_line(&mut request_line).await?;

        match parse_callback(&request_line) {
            Some(callback) => {
                let response = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    SUCCESS_PAGE.len(),
                    SUCCESS_PAGE
                );
                writer.write_all(response.as_bytes()).await?;
                return Ok(callback);
            }
            None => {
                // favicon and other stray requests
                writer
                    .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                    .await?;
            }
        }
    }
}

/// Parse `GET /?code=..&state=.. HTTP/1.1`.
fn parse_callback(request_line: &str) -> Option<Callback> {
    let mut parts = request_line.split_whitespace();
    if parts.next()? != "GET" {
        return None;
    }
    let target = parts.next()?;
    let url = Url::parse(&format!("http://127.0.0.1{}", target)).ok()?;

    let mut code = None;
    let mut state = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => return Some(Callback::Denied(value.into_owned())),
            _ => {}
        }
    }

    Some(Callback::Code {
        code: code?,
        state: state.unwrap_or_default(),
    })
}
