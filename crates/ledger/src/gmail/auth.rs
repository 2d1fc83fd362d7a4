//! Gmail OAuth2 authentication
//!
//! Implements the OAuth2 authorization code flow with a local HTTP server
//! receiving the callback. Tokens are cached in the config directory and
//! refreshed when they expire.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use url::Url;

/// OAuth2 configuration and token management for Gmail
pub struct GmailAuth {
    client_id: String,
    client_secret: String,
    token_path: PathBuf,
}

/// Stored token data
#[derive(Debug, Serialize, Deserialize)]
struct StoredToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<i64>,
}

/// Token response from Google
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<u64>,
}

impl GmailAuth {
    const AUTH_URL: &'static str = "https://accounts.google.com/o/oauth2/v2/auth";
    const TOKEN_URL: &'static str = "https://oauth2.googleapis.com/token";

    /// Receipts are only ever read
    const GMAIL_READONLY_SCOPE: &'static str = "https://www.googleapis.com/auth/gmail.readonly";

    /// Port range to try for the local OAuth callback server
    const PORT_RANGE_START: u16 = 8080;
    const PORT_RANGE_END: u16 = 8090;

    /// Seconds before expiry at which a token is treated as expired
    const EXPIRY_MARGIN_SECS: i64 = 300;

    /// Create a new GmailAuth storing tokens at `~/.config/tally/gmail-tokens.json`
    pub fn new(client_id: String, client_secret: String) -> Result<Self> {
        let token_path = config::config_path("gmail-tokens.json")
            .context("Could not determine config directory")?;
        Ok(Self::with_token_path(client_id, client_secret, token_path))
    }

    pub fn with_token_path(client_id: String, client_secret: String, token_path: PathBuf) -> Self {
        Self {
            client_id,
            client_secret,
            token_path,
        }
    }

    /// Get a valid access token, refreshing or re-authenticating as needed
    pub fn get_access_token(&self) -> Result<String> {
        if let Ok(token) = self.load_token() {
            if token_is_fresh(&token, chrono::Utc::now().timestamp()) {
                return Ok(token.access_token);
            }

            if let Some(refresh_token) = token.refresh_token {
                match self.refresh_access_token(&refresh_token) {
                    Ok(new_token) => {
                        debug!("Refreshed Gmail access token");
                        self.save_token_response(&new_token)?;
                        return Ok(new_token.access_token);
                    }
                    Err(e) => warn!("Token refresh failed, re-authenticating: {:#}", e),
                }
            }
        }

        let token = self.authorization_code_auth()?;
        self.save_token_response(&token)?;
        Ok(token.access_token)
    }

    /// Perform authorization code flow authentication
    fn authorization_code_auth(&self) -> Result<TokenResponse> {
        let (listener, port) = self.start_local_server()?;
        let redirect_uri = format!("http://localhost:{}", port);

        let auth_url = format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&access_type=offline&prompt=consent",
            Self::AUTH_URL,
            urlencoding::encode(&self.client_id),
            urlencoding::encode(&redirect_uri),
            urlencoding::encode(Self::GMAIL_READONLY_SCOPE),
        );

        println!("\n=== Gmail Authentication Required ===");
        println!("Opening browser for authentication...");
        println!("If the browser doesn't open, visit: {}", auth_url);

        if let Err(e) = open::that(&auth_url) {
            eprintln!("Failed to open browser: {}. Please open the URL manually.", e);
        }

        println!("Waiting for authorization...");
        let code = self.wait_for_callback(listener)?;

        let mut response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("code", code.as_str()),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri.as_str()),
            ])
            .context("Failed to exchange authorization code")?;

        let token: TokenResponse = response
            .body_mut()
            .read_json()
            .context("Failed to parse token response")?;

        info!("Gmail authentication successful");
        Ok(token)
    }

    fn start_local_server(&self) -> Result<(TcpListener, u16)> {
        for port in Self::PORT_RANGE_START..=Self::PORT_RANGE_END {
            if let Ok(listener) = TcpListener::bind(format!("127.0.0.1:{}", port)) {
                return Ok((listener, port));
            }
        }
        anyhow::bail!(
            "Could not bind to any port in range {}-{}",
            Self::PORT_RANGE_START,
            Self::PORT_RANGE_END
        )
    }

    /// Wait for the OAuth callback and extract the authorization code
    fn wait_for_callback(&self, listener: TcpListener) -> Result<String> {
        let (mut stream, _) = listener.accept().context("Failed to accept connection")?;

        let mut reader = BufReader::new(&stream);
        let mut request_line = String::new();
        reader
            .read_line(&mut request_line)
            .context("Failed to read request")?;

        let code = callback_param(&request_line, "code");
        let error = callback_param(&request_line, "error");

        let (status, body) = if code.is_some() {
            ("200 OK", "Authentication successful! You can close this window.")
        } else {
            ("400 Bad Request", "Authentication failed. Please try again.")
        };
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: text/html\r\nConnection: close\r\n\r\n<html><body><h1>{}</h1></body></html>",
            status, body
        );
        stream.write_all(response.as_bytes()).ok();

        if let Some(err) = error {
            anyhow::bail!("OAuth error: {}", err);
        }
        code.context("No authorization code received")
    }

    fn refresh_access_token(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = ureq::post(Self::TOKEN_URL)
            .send_form([
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .context("Failed to refresh access token")?;

        let mut token: TokenResponse = response
            .into_body()
            .read_json()
            .context("Failed to parse refresh token response")?;

        // Google omits the refresh token on refresh
        if token.refresh_token.is_none() {
            token.refresh_token = Some(refresh_token.to_string());
        }
        Ok(token)
    }

    fn load_token(&self) -> Result<StoredToken> {
        let content = fs::read_to_string(&self.token_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    fn save_token_response(&self, token: &TokenResponse) -> Result<()> {
        if let Some(parent) = self.token_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let stored = StoredToken {
            access_token: token.access_token.clone(),
            refresh_token: token.refresh_token.clone(),
            expires_at: token
                .expires_in
                .map(|d| chrono::Utc::now().timestamp() + d as i64),
        };

        fs::write(&self.token_path, serde_json::to_string_pretty(&stored)?)?;
        Ok(())
    }

    /// Whether a cached token exists and is still valid
    pub fn is_authenticated(&self) -> bool {
        self.load_token()
            .map(|t| token_is_fresh(&t, chrono::Utc::now().timestamp()))
            .unwrap_or(false)
    }

    /// Clear stored tokens
    pub fn logout(&self) -> Result<()> {
        if self.token_path.exists() {
            fs::remove_file(&self.token_path)?;
        }
        Ok(())
    }
}

fn token_is_fresh(token: &StoredToken, now: i64) -> bool {
    token
        .expires_at
        .is_some_and(|expires_at| expires_at > now + GmailAuth::EXPIRY_MARGIN_SECS)
}

/// Value of `name` in a request line like `GET /?code=abc&scope=x HTTP/1.1`
fn callback_param(request_line: &str, name: &str) -> Option<String> {
    let path = request_line.split_whitespace().nth(1)?;
    let url = Url::parse(&format!("http://localhost{}", path)).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == name)
        .map(|(_, value)| value.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_callback_param() {
        let line = "GET /?code=4%2F0Ab&scope=gmail HTTP/1.1\r\n";
        assert_eq!(callback_param(line, "code"), Some("4/0Ab".to_string()));
        assert_eq!(callback_param(line, "error"), None);
        assert_eq!(callback_param("GET / HTTP/1.1", "code"), None);
    }

    #[test]
    fn test_token_freshness() {
        let token = StoredToken {
            access_token: "a".into(),
            refresh_token: None,
            expires_at: Some(1_000),
        };
        assert!(token_is_fresh(&token, 600));
        assert!(!token_is_fresh(&token, 800));
    }

    #[test]
    fn test_cached_token_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let auth = GmailAuth::with_token_path(
            "id".into(),
            "secret".into(),
            dir.path().join("tokens.json"),
        );
        assert!(!auth.is_authenticated());

        let response = TokenResponse {
            access_token: "token".into(),
            refresh_token: Some("refresh".into()),
            expires_in: Some(3600),
        };
        auth.save_token_response(&response).unwrap();
        assert!(auth.is_authenticated());
        assert_eq!(auth.get_access_token().unwrap(), "token");

        auth.logout().unwrap();
        assert!(!auth.is_authenticated());
    }
}
