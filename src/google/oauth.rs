//! OAuth token acquisition and persistence.
//!
//! The first run walks the user through an interactive consent flow and
//! persists the resulting refresh token under the config directory, so later
//! runs only ever hit the token endpoint. Two flows are supported: a
//! loopback redirect that opens a browser and catches the authorization code
//! on an ephemeral local port, and the RFC 8628 device flow for terminals
//! without a usable browser.

use crate::google::credentials::{token_path, ClientSecret, GoogleApi};
use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

/// Device authorization endpoint. Not part of the client-secret file.
const DEVICE_CODE_URL: &str = "https://accounts.google.com/o/oauth2/device/code";

/// Refresh this long before the reported expiry to absorb clock skew.
const EXPIRY_LEEWAY_SECS: i64 = 60;

/// How the user completes the first-run consent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentFlow {
    /// Open a browser and catch the authorization code on a local port.
    Redirect,
    /// Print a verification URL and user code, then poll until entered.
    DeviceCode,
}

/// Access/refresh token pair persisted per API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl TokenSet {
    /// True when the access token is stale or its lifetime is unknown.
    fn needs_refresh(&self) -> bool {
        match self.expires_at {
            Some(at) => Utc::now() + Duration::seconds(EXPIRY_LEEWAY_SECS) >= at,
            None => true,
        }
    }
}

/// Wire shape of the token endpoint's success responses.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
}

impl TokenResponse {
    /// Google omits the refresh token on refresh grants; keep the old one.
    fn into_token_set(self, previous_refresh: Option<String>) -> TokenSet {
        TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token.or(previous_refresh),
            expires_at: self
                .expires_in
                .map(|secs| Utc::now() + Duration::seconds(secs)),
        }
    }
}

/// Device authorization bootstrap response (RFC 8628 section 3.2).
#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_url: String,
    expires_in: i64,
    #[serde(default = "default_poll_interval")]
    interval: u64,
}

fn default_poll_interval() -> u64 {
    5
}

/// Structured error body from the token endpoint.
#[derive(Debug, Default, Deserialize)]
struct TokenErrorResponse {
    #[serde(default)]
    error: String,
}

/// Verdict of one device-flow token poll. Fatal verdicts are errors.
#[derive(Debug, PartialEq)]
enum DevicePoll {
    Granted(TokenSet),
    Pending,
    SlowDown,
}

/// Per-API authenticator. Caches a token set, refreshes it when stale, and
/// falls back to the interactive consent flow when there is nothing left to
/// refresh.
#[derive(Debug, Clone)]
pub struct GoogleAuth {
    api: GoogleApi,
    secret: ClientSecret,
    flow: ConsentFlow,
    token_path: PathBuf,
    http: reqwest::Client,
    tokens: Option<TokenSet>,
}

impl GoogleAuth {
    pub fn new(api: GoogleApi, secret: ClientSecret, flow: ConsentFlow) -> Result<Self> {
        let token_path = token_path(api)?;
        Ok(Self::with_token_path(api, secret, flow, token_path))
    }

    /// Like [`GoogleAuth::new`] but with an explicit token cache location.
    pub fn with_token_path(
        api: GoogleApi,
        secret: ClientSecret,
        flow: ConsentFlow,
        token_path: PathBuf,
    ) -> Self {
        let tokens = load_tokens(&token_path);
        Self {
            api,
            secret,
            flow,
            token_path,
            http: reqwest::Client::new(),
            tokens,
        }
    }

    /// Make sure a usable token exists, running the consent flow if needed.
    /// Called once up front so consent prompts happen before any export work.
    pub async fn authenticate(&mut self) -> Result<()> {
        self.access_token().await.map(|_| ())
    }

    /// Return a bearer access token, refreshing or re-consenting as needed.
    pub async fn access_token(&mut self) -> Result<String> {
        if let Some(tokens) = &self.tokens {
            if !tokens.needs_refresh() {
                return Ok(tokens.access_token.clone());
            }
        }

        let refresh_token = self
            .tokens
            .as_ref()
            .and_then(|tokens| tokens.refresh_token.clone());
        if let Some(refresh_token) = refresh_token {
            match self.refresh(&refresh_token).await {
                Ok(tokens) => return self.adopt(tokens),
                Err(err) => warn!(
                    "{} token refresh failed ({err:#}), starting a new consent flow",
                    self.api.key()
                ),
            }
        }

        let tokens = match self.flow {
            ConsentFlow::Redirect => self.redirect_flow().await?,
            ConsentFlow::DeviceCode => self.device_flow().await?,
        };
        self.adopt(tokens)
    }

    /// Persist and cache freshly obtained tokens, returning the access token.
    fn adopt(&mut self, tokens: TokenSet) -> Result<String> {
        save_tokens(&self.token_path, &tokens)?;
        let access_token = tokens.access_token.clone();
        self.tokens = Some(tokens);
        Ok(access_token)
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenSet> {
        debug!("refreshing {} access token", self.api.key());
        let params = [
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(&params)
            .send()
            .await
            .context("Failed to reach the token endpoint")?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            bail!("Token refresh was rejected: {error_text}");
        }
        let token_response: TokenResponse = response
            .json()
            .await
            .context("Failed to parse the token endpoint response")?;
        Ok(token_response.into_token_set(Some(refresh_token.to_string())))
    }

    /// Loopback-redirect consent: bind an ephemeral local port, send the user
    /// to the consent page, and catch the authorization code on the redirect.
    async fn redirect_flow(&self) -> Result<TokenSet> {
        let listener = TcpListener::bind(("127.0.0.1", 0))
            .await
            .context("Failed to bind the OAuth redirect listener")?;
        let port = listener
            .local_addr()
            .context("Failed to read the redirect listener address")?
            .port();
        let redirect_uri = format!("http://127.0.0.1:{port}");

        let consent_url = url::Url::parse_with_params(
            &self.secret.auth_uri,
            &[
                ("client_id", self.secret.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", self.api.scope()),
                // offline + consent makes Google include a refresh token
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .context("Invalid authorization endpoint in the client secret")?;

        println!("Authorize {} access in your browser:", self.api.key());
        println!("  {consent_url}");
        if webbrowser::open(consent_url.as_str()).is_err() {
            info!("could not open a browser, use the printed URL");
        }

        let code = wait_for_redirect(&listener).await?;
        info!("{} authorization code received", self.api.key());
        self.exchange_code(&code, &redirect_uri).await
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<TokenSet> {
        let params = [
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ];
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(&params)
            .send()
            .await
            .context("Failed to reach the token endpoint")?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            bail!("Authorization code exchange failed: {error_text}");
        }
        let token_response: TokenResponse = response
            .json()
            .await
            .context("Failed to parse the token endpoint response")?;
        Ok(token_response.into_token_set(None))
    }

    /// Device-code consent for browserless terminals: print a short code,
    /// poll the token endpoint until the user enters it elsewhere.
    async fn device_flow(&self) -> Result<TokenSet> {
        let params = [
            ("client_id", self.secret.client_id.as_str()),
            ("scope", self.api.scope()),
        ];
        let response = self
            .http
            .post(DEVICE_CODE_URL)
            .form(&params)
            .send()
            .await
            .context("Failed to reach the device authorization endpoint")?;
        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            bail!("Device authorization failed: {error_text}");
        }
        let device: DeviceCodeResponse = response
            .json()
            .await
            .context("Failed to parse the device authorization response")?;

        println!("Authorize {} access by visiting:", self.api.key());
        println!("  {}", device.verification_url);
        println!("and entering the code {}", device.user_code);
        println!("Waiting for authorization...");

        let deadline = Utc::now() + Duration::seconds(device.expires_in);
        let mut interval = device.interval;
        loop {
            if Utc::now() > deadline {
                bail!("The device code expired before authorization completed");
            }
            tokio::time::sleep(std::time::Duration::from_secs(interval)).await;
            match self.poll_device_token(&device.device_code).await? {
                DevicePoll::Granted(tokens) => {
                    info!("{} device authorization completed", self.api.key());
                    return Ok(tokens);
                }
                DevicePoll::Pending => {}
                // RFC 8628 section 3.5: stretch the interval by five seconds
                DevicePoll::SlowDown => interval += 5,
            }
        }
    }

    /// One token-endpoint poll. Pending and slow-down verdicts keep the
    /// caller's loop alive, everything else is granted or fatal.
    async fn poll_device_token(&self, device_code: &str) -> Result<DevicePoll> {
        let params = [
            ("client_id", self.secret.client_id.as_str()),
            ("client_secret", self.secret.client_secret.as_str()),
            ("device_code", device_code),
            ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
        ];
        let response = self
            .http
            .post(&self.secret.token_uri)
            .form(&params)
            .send()
            .await
            .context("Failed to poll the token endpoint")?;

        if response.status().is_success() {
            let token_response: TokenResponse = response
                .json()
                .await
                .context("Failed to parse the token endpoint response")?;
            return Ok(DevicePoll::Granted(token_response.into_token_set(None)));
        }

        let status = response.status();
        let error: TokenErrorResponse = response.json().await.unwrap_or_default();
        match error.error.as_str() {
            "authorization_pending" => {
                debug!("device authorization still pending");
                Ok(DevicePoll::Pending)
            }
            "slow_down" => {
                debug!("token endpoint asked for a longer poll interval");
                Ok(DevicePoll::SlowDown)
            }
            "access_denied" => bail!("The authorization request was declined"),
            "expired_token" => bail!("The device code expired, rerun to start over"),
            "" => bail!("The token endpoint returned {status} with an unreadable body"),
            other => bail!("Device authorization failed: {other}"),
        }
    }
}

/// Accept one connection and pull the authorization code out of the
/// redirect request, answering with a small page either way.
async fn wait_for_redirect(listener: &TcpListener) -> Result<String> {
    let (stream, _) = listener
        .accept()
        .await
        .context("Failed to accept the OAuth redirect")?;
    let mut reader = BufReader::new(stream);
    let mut request_line = String::new();
    reader
        .read_line(&mut request_line)
        .await
        .context("Failed to read the OAuth redirect request")?;

    let outcome = auth_code_from_request_line(&request_line);
    let body = match &outcome {
        Ok(_) => "Authorization received. You can close this window and return to the terminal.",
        Err(_) => "Authorization failed. Return to the terminal for details.",
    };
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let mut stream = reader.into_inner();
    stream
        .write_all(response.as_bytes())
        .await
        .context("Failed to answer the OAuth redirect")?;
    stream.shutdown().await.ok();
    outcome
}

/// Extract the `code` query parameter from an HTTP request line such as
/// `GET /?code=4/abc&scope=... HTTP/1.1`.
fn auth_code_from_request_line(line: &str) -> Result<String> {
    let target = line
        .split_whitespace()
        .nth(1)
        .ok_or_else(|| anyhow!("Malformed redirect request: {line:?}"))?;
    let url = url::Url::parse(&format!("http://127.0.0.1{target}"))
        .with_context(|| format!("Malformed redirect target: {target:?}"))?;

    let mut code = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }
    if let Some(error) = error {
        bail!("Authorization was not granted: {error}");
    }
    code.ok_or_else(|| anyhow!("The redirect carried no authorization code"))
}

fn load_tokens(path: &Path) -> Option<TokenSet> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(tokens) => Some(tokens),
        Err(err) => {
            warn!("ignoring unreadable token cache {}: {err}", path.display());
            None
        }
    }
}

/// Write the token set with owner-only permissions, tokens grant live access.
fn save_tokens(path: &Path, tokens: &TokenSet) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = fs::metadata(parent)?.permissions();
            perms.set_mode(0o700);
            fs::set_permissions(parent, perms)?;
        }
    }

    let json = serde_json::to_string_pretty(tokens).context("Failed to serialize the token set")?;
    fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    debug!("stored tokens at {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn token_set(expires_at: Option<DateTime<Utc>>) -> TokenSet {
        TokenSet {
            access_token: "access".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at,
        }
    }

    #[test]
    fn fresh_token_does_not_need_refresh() {
        let tokens = token_set(Some(Utc::now() + Duration::hours(1)));
        assert!(!tokens.needs_refresh());
    }

    #[test]
    fn stale_and_unknown_expiries_need_refresh() {
        assert!(token_set(Some(Utc::now() - Duration::hours(1))).needs_refresh());
        assert!(token_set(None).needs_refresh());
    }

    #[test]
    fn expiry_inside_the_leeway_window_needs_refresh() {
        let tokens = token_set(Some(Utc::now() + Duration::seconds(EXPIRY_LEEWAY_SECS / 2)));
        assert!(tokens.needs_refresh());
    }

    #[test]
    fn refresh_grant_keeps_the_previous_refresh_token() {
        let response = TokenResponse {
            access_token: "new-access".to_string(),
            refresh_token: None,
            expires_in: Some(3600),
        };
        let tokens = response.into_token_set(Some("old-refresh".to_string()));
        assert_eq!(tokens.access_token, "new-access");
        assert_eq!(tokens.refresh_token.as_deref(), Some("old-refresh"));
        assert!(tokens.expires_at.is_some());
    }

    #[test]
    fn consent_grant_prefers_the_fresh_refresh_token() {
        let response = TokenResponse {
            access_token: "a".to_string(),
            refresh_token: Some("fresh".to_string()),
            expires_in: None,
        };
        let tokens = response.into_token_set(Some("stale".to_string()));
        assert_eq!(tokens.refresh_token.as_deref(), Some("fresh"));
        assert!(tokens.expires_at.is_none());
    }

    #[test]
    fn request_line_yields_the_authorization_code() {
        let code =
            auth_code_from_request_line("GET /?code=4%2Fabc123&scope=drive HTTP/1.1").unwrap();
        assert_eq!(code, "4/abc123");
    }

    #[test]
    fn request_line_with_error_fails() {
        let err =
            auth_code_from_request_line("GET /?error=access_denied HTTP/1.1").unwrap_err();
        assert!(err.to_string().contains("access_denied"));
    }

    #[test]
    fn request_line_without_code_fails() {
        assert!(auth_code_from_request_line("GET / HTTP/1.1").is_err());
        assert!(auth_code_from_request_line("").is_err());
    }

    #[test]
    fn tokens_round_trip_through_disk() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens").join("drive.json");
        let tokens = token_set(Some(Utc::now() + Duration::hours(1)));

        save_tokens(&path, &tokens).unwrap();
        assert_eq!(load_tokens(&path), Some(tokens));
    }

    #[test]
    fn unreadable_token_cache_is_ignored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("drive.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(load_tokens(&path), None);
    }

    #[cfg(unix)]
    #[test]
    fn saved_tokens_are_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tokens").join("sheets.json");
        save_tokens(&path, &token_set(None)).unwrap();

        let mode = fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    /// Run one device poll against a token endpoint canned to answer with
    /// the given status and body.
    async fn poll_verdict(status: usize, body: &str) -> Result<DevicePoll> {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/")
            .with_status(status)
            .with_body(body)
            .create_async()
            .await;

        let secret = ClientSecret {
            client_id: "client".to_string(),
            client_secret: "shhh".to_string(),
            auth_uri: "https://accounts.google.com/o/oauth2/auth".to_string(),
            token_uri: server.url(),
        };
        let dir = TempDir::new().unwrap();
        let auth = GoogleAuth::with_token_path(
            GoogleApi::Drive,
            secret,
            ConsentFlow::DeviceCode,
            dir.path().join("drive.json"),
        );
        auth.poll_device_token("dev-code").await
    }

    #[tokio::test]
    async fn device_poll_waits_while_authorization_is_pending() {
        let verdict = poll_verdict(428, r#"{"error": "authorization_pending"}"#)
            .await
            .unwrap();
        assert_eq!(verdict, DevicePoll::Pending);
    }

    #[tokio::test]
    async fn device_poll_asks_for_backoff_on_slow_down() {
        let verdict = poll_verdict(403, r#"{"error": "slow_down"}"#).await.unwrap();
        assert_eq!(verdict, DevicePoll::SlowDown);
    }

    #[tokio::test]
    async fn device_poll_fails_when_the_user_declines() {
        let err = poll_verdict(403, r#"{"error": "access_denied"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("declined"));
    }

    #[tokio::test]
    async fn device_poll_fails_once_the_code_expires() {
        let err = poll_verdict(400, r#"{"error": "expired_token"}"#)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("expired"));
    }

    #[tokio::test]
    async fn device_poll_reports_unreadable_error_bodies() {
        let err = poll_verdict(502, "gateway smoke").await.unwrap_err();
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn device_poll_returns_tokens_once_granted() {
        let verdict = poll_verdict(
            200,
            r#"{"access_token": "granted", "refresh_token": "keep", "expires_in": 3600}"#,
        )
        .await
        .unwrap();

        match verdict {
            DevicePoll::Granted(tokens) => {
                assert_eq!(tokens.access_token, "granted");
                assert_eq!(tokens.refresh_token.as_deref(), Some("keep"));
                assert!(tokens.expires_at.is_some());
            }
            other => panic!("expected granted tokens, got {other:?}"),
        }
    }
}
