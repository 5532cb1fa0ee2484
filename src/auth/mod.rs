use std::cell::RefCell;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tiny_http::{Response, Server};
use tracing::warn;
use url::Url;

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GMAIL_SCOPE: &str = "https://mail.google.com/";
const DEFAULT_REDIRECT_URI: &str = "http://127.0.0.1:8035/oauth/callback";
const REDIRECT_WAIT: StdDuration = StdDuration::from_secs(120);

// Tokens are cached with a skew so we never hand out one that expires
// mid-request.
const CACHE_SKEW_SECONDS: i64 = 60;

const CLIENT_ID_ENV: &str = "MAILSWEEP_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "MAILSWEEP_CLIENT_SECRET";
const TOKEN_URL_ENV: &str = "MAILSWEEP_TOKEN_URL";

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("http transport: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token endpoint rejected request: status={status} body={body}")]
    Token { status: reqwest::StatusCode, body: String },

    #[error("decode token response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("filesystem: {0}")]
    Io(#[from] std::io::Error),

    #[error("oauth redirect capture: {0}")]
    Redirect(String),

    #[error("not logged in: no usable token at {} (run 'mailsweep login')", path.display())]
    NotLoggedIn { path: PathBuf },

    #[error("{0}")]
    Config(String),
}

/// OAuth client credentials, resolved from the environment or from a
/// `credentials.json` in the config dir (Google's "installed app" download).
#[derive(Debug, Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl ClientCredentials {
    pub fn resolve(config_dir: &Path) -> Result<Self, AuthError> {
        if let (Some(client_id), Some(client_secret)) =
            (env_nonempty(CLIENT_ID_ENV), env_nonempty(CLIENT_SECRET_ENV))
        {
            return Ok(Self {
                client_id,
                client_secret,
            });
        }

        let path = config_dir.join("credentials.json");
        let raw = std::fs::read_to_string(&path).map_err(|_| {
            AuthError::Config(format!(
                "missing oauth client credentials: set {CLIENT_ID_ENV}/{CLIENT_SECRET_ENV} \
                 or place credentials.json at {}",
                path.display()
            ))
        })?;
        let file: CredentialsFile = serde_json::from_str(&raw)?;
        Ok(Self {
            client_id: file.installed.client_id,
            client_secret: file.installed.client_secret,
        })
    }
}

fn env_nonempty(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    installed: InstalledCredentials,
}

#[derive(Debug, Deserialize)]
struct InstalledCredentials {
    client_id: String,
    client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedToken {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    refresh_token: Option<String>,
}

/// Supplies ready-to-use bearer tokens: serves from the on-disk cache,
/// refreshes through the token endpoint when expired, and runs the
/// interactive browser flow for the initial `login`.
pub struct Authenticator {
    client: Client,
    credentials: ClientCredentials,
    token_path: PathBuf,
    cached: RefCell<Option<CachedToken>>,
}

impl Authenticator {
    pub fn new(credentials: ClientCredentials, token_path: PathBuf) -> Self {
        Self {
            client: Client::new(),
            credentials,
            token_path,
            cached: RefCell::new(None),
        }
    }

    /// Resolve credentials and token cache from the default config dir.
    pub fn from_config_dir() -> Result<Self, AuthError> {
        let config_dir = default_config_dir()?;
        let credentials = ClientCredentials::resolve(&config_dir)?;
        Ok(Self::new(credentials, config_dir.join("token.json")))
    }

    pub fn token_path(&self) -> &Path {
        &self.token_path
    }

    /// Return a valid access token, refreshing through the token endpoint if
    /// the cached one has expired.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let cached = match self.cached.borrow().clone() {
            Some(token) => Some(token),
            None => self.load_token_file()?,
        };

        if let Some(token) = cached {
            if !token.is_expired() {
                self.cached.replace(Some(token.clone()));
                return Ok(token.access_token);
            }

            let Some(refresh_token) = token.refresh_token.clone() else {
                return Err(AuthError::NotLoggedIn {
                    path: self.token_path.clone(),
                });
            };

            let mut fresh = self.refresh(&refresh_token).await?;
            // Google omits the refresh token on refresh responses.
            if fresh.refresh_token.is_none() {
                fresh.refresh_token = Some(refresh_token);
            }
            self.store_token(&fresh)?;
            return Ok(fresh.access_token);
        }

        Err(AuthError::NotLoggedIn {
            path: self.token_path.clone(),
        })
    }

    /// Interactive bootstrap: opens the consent page in a browser, captures
    /// the authorization code on a loopback listener, exchanges it, and
    /// persists the resulting token.
    pub async fn login(&self) -> Result<(), AuthError> {
        let redirect_uri = DEFAULT_REDIRECT_URI.to_string();
        // The listener must be up before the browser is pointed at it; a
        // fast redirect would otherwise land on a closed port.
        let listener = RedirectListener::bind(&redirect_uri)?;
        let auth_url = Url::parse_with_params(
            GOOGLE_AUTH_URL,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", GMAIL_SCOPE),
                ("access_type", "offline"),
                ("prompt", "consent"),
            ],
        )
        .map_err(|error| AuthError::Config(format!("build authorization url: {error}")))?;

        println!("Open this URL in your browser to authorize mailsweep:\n{auth_url}");
        if let Err(error) = open::that(auth_url.as_str()) {
            warn!("could not open browser automatically: {error}");
        }

        let code = tokio::task::spawn_blocking(move || listener.wait_for_code())
            .await
            .map_err(|error| AuthError::Redirect(format!("redirect listener panicked: {error}")))??;

        let token = self.exchange_code(&code, &redirect_uri).await?;
        self.store_token(&token)?;
        println!("Login complete; token saved to {}", self.token_path.display());
        Ok(())
    }

    async fn exchange_code(
        &self,
        code: &str,
        redirect_uri: &str,
    ) -> Result<CachedToken, AuthError> {
        self.token_request(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("grant_type", "authorization_code"),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<CachedToken, AuthError> {
        self.token_request(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ])
        .await
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<CachedToken, AuthError> {
        let token_url = env_nonempty(TOKEN_URL_ENV).unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string());

        let response = self.client.post(&token_url).form(form).send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(AuthError::Token { status, body });
        }

        let payload: TokenResponse = serde_json::from_str(&body)?;
        let expires_at = Utc::now()
            + Duration::seconds((payload.expires_in as i64).saturating_sub(CACHE_SKEW_SECONDS));

        Ok(CachedToken {
            access_token: payload.access_token,
            refresh_token: payload.refresh_token,
            expires_at,
        })
    }

    fn load_token_file(&self) -> Result<Option<CachedToken>, AuthError> {
        let raw = match std::fs::read_to_string(&self.token_path) {
            Ok(raw) => raw,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error.into()),
        };

        match serde_json::from_str::<CachedToken>(&raw) {
            Ok(token) => Ok(Some(token)),
            Err(error) => {
                warn!(
                    "discarding unreadable token cache at {}: {error}",
                    self.token_path.display()
                );
                Ok(None)
            }
        }
    }

    fn store_token(&self, token: &CachedToken) -> Result<(), AuthError> {
        if let Some(parent) = self.token_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let payload = serde_json::to_string_pretty(token)?;
        write_private(&self.token_path, &payload)?;
        self.cached.replace(Some(token.clone()));
        Ok(())
    }
}

pub fn default_config_dir() -> Result<PathBuf, AuthError> {
    dirs::config_dir()
        .map(|dir| dir.join("mailsweep"))
        .ok_or_else(|| AuthError::Config("cannot resolve user config directory".to_string()))
}

/// Token files hold live credentials; keep them owner-readable only.
#[cfg(unix)]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(contents.as_bytes())
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &str) -> std::io::Result<()> {
    std::fs::write(path, contents)
}

/// Loopback listener for the OAuth redirect, bound eagerly so the consent
/// page is only opened once the port is accepting connections.
struct RedirectListener {
    server: Server,
    host: String,
    port: u16,
}

impl RedirectListener {
    fn bind(redirect_uri: &str) -> Result<Self, AuthError> {
        let redirect = Url::parse(redirect_uri)
            .map_err(|error| AuthError::Redirect(format!("invalid redirect uri: {error}")))?;
        let host = redirect
            .host_str()
            .ok_or_else(|| AuthError::Redirect("redirect uri missing host".to_string()))?
            .to_string();
        let port = redirect
            .port_or_known_default()
            .ok_or_else(|| AuthError::Redirect("redirect uri missing port".to_string()))?;

        let bind_ip: IpAddr = match host.as_str() {
            "localhost" | "127.0.0.1" => IpAddr::V4(Ipv4Addr::LOCALHOST),
            other => other.parse().map_err(|_| {
                AuthError::Redirect(format!("redirect host must be loopback: {other}"))
            })?,
        };
        let bind_addr = SocketAddr::new(bind_ip, port);

        let server = Server::http(bind_addr)
            .map_err(|error| AuthError::Redirect(format!("bind {bind_addr}: {error}")))?;
        // Binding to port 0 picks an ephemeral port; track the real one.
        let port = server
            .server_addr()
            .to_ip()
            .map(|addr| addr.port())
            .unwrap_or(port);

        Ok(Self { server, host, port })
    }

    /// Block until the browser hits the redirect URI, then pull the `code`
    /// query parameter out of the request.
    fn wait_for_code(self) -> Result<String, AuthError> {
        let deadline = Instant::now() + REDIRECT_WAIT;
        while Instant::now() < deadline {
            let Ok(Some(request)) = self.server.recv_timeout(StdDuration::from_millis(500)) else {
                continue;
            };

            // request.url() is path+query; rebuild a full URL so the query
            // parses cleanly.
            let full = format!("http://{}:{}{}", self.host, self.port, request.url());
            let code = Url::parse(&full).ok().and_then(|parsed| {
                parsed
                    .query_pairs()
                    .find(|(key, _)| key == "code")
                    .map(|(_, value)| value.into_owned())
            });

            match code {
                Some(code) => {
                    let _ = request.respond(Response::from_string(
                        "Authorization received. You can close this tab.",
                    ));
                    return Ok(code);
                }
                None => {
                    let _ = request.respond(Response::from_string(
                        "No authorization code in redirect. You can close this tab.",
                    ));
                }
            }
        }

        Err(AuthError::Redirect(
            "no authorization code received before timeout".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{default_config_dir, Authenticator, CachedToken, ClientCredentials};

    fn authenticator(dir: &std::path::Path) -> Authenticator {
        Authenticator::new(
            ClientCredentials {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            },
            dir.join("token.json"),
        )
    }

    #[tokio::test]
    async fn access_token_served_from_fresh_cache_file() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        auth.store_token(&CachedToken {
            access_token: "tok-live".to_string(),
            refresh_token: Some("refresh".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        })
        .unwrap();

        // A second authenticator must pick the token up from disk.
        let reopened = authenticator(dir.path());
        assert_eq!(reopened.access_token().await.unwrap(), "tok-live");
    }

    #[tokio::test]
    async fn missing_token_file_reports_not_logged_in() {
        let dir = tempfile::tempdir().unwrap();
        let auth = authenticator(dir.path());
        let error = auth.access_token().await.unwrap_err();
        assert!(matches!(error, super::AuthError::NotLoggedIn { .. }));
    }

    #[tokio::test]
    async fn corrupt_token_file_is_discarded_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("token.json"), "not-json").unwrap();
        let auth = authenticator(dir.path());
        let error = auth.access_token().await.unwrap_err();
        assert!(matches!(error, super::AuthError::NotLoggedIn { .. }));
    }

    #[test]
    fn expired_token_detected() {
        let token = CachedToken {
            access_token: "tok".to_string(),
            refresh_token: None,
            expires_at: Utc::now() - Duration::seconds(1),
        };
        assert!(token.is_expired());
    }

    #[test]
    fn redirect_listener_captures_a_code_sent_right_after_bind() {
        use std::io::{Read, Write};
        use std::net::TcpStream;

        let listener = super::RedirectListener::bind("http://127.0.0.1:0/oauth/callback").unwrap();
        let port = listener.port;

        // The redirect arrives before wait_for_code starts polling; the
        // already-bound socket must hold it.
        let client = std::thread::spawn(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).unwrap();
            stream
                .write_all(
                    b"GET /oauth/callback?state=xyz&code=abc123 HTTP/1.1\r\n\
                      Host: 127.0.0.1\r\nConnection: close\r\n\r\n",
                )
                .unwrap();
            let mut response = String::new();
            let _ = stream.read_to_string(&mut response);
            response
        });

        let code = listener.wait_for_code().unwrap();
        assert_eq!(code, "abc123");
        let response = client.join().unwrap();
        assert!(response.contains("Authorization received"));
    }

    #[test]
    fn config_dir_is_namespaced() {
        let dir = default_config_dir().unwrap();
        assert!(dir.ends_with("mailsweep"));
    }
}
