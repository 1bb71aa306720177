//! OAuth access tokens for the BigQuery API.
//!
//! Three token sources, matching [`CredentialSource`]:
//! - service account key: a signed RS256 JWT exchanged at the key's
//!   `token_uri` (JWT bearer grant),
//! - a pre-minted access token, used as-is,
//! - the GCE metadata server (workload identity).
//!
//! Minted tokens are cached and refreshed shortly before they expire.

use std::path::Path;
use std::time::{Duration, Instant};

use costwatch_core::{CredentialSource, Secret};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::{BillingError, BillingResult};

pub const BIGQUERY_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery.readonly";

const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
/// Refresh this long before the reported expiry.
const REFRESH_SKEW: Duration = Duration::from_secs(60);
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// The fields of a service account key file that token minting needs.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    pub private_key_id: Option<String>,
    pub project_id: Option<String>,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .field("project_id", &self.project_id)
            .field("token_uri", &self.token_uri)
            .finish_non_exhaustive()
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> BillingResult<Self> {
        serde_json::from_str(json)
            .map_err(|e| BillingError::Credentials(format!("invalid service account key: {e}")))
    }

    pub fn from_file(path: &Path) -> BillingResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BillingError::Credentials(format!("cannot read key file {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }

    /// Build the signed JWT assertion for the bearer grant.
    fn assertion(&self, scope: &str, now: i64) -> BillingResult<String> {
        let claims = Claims {
            iss: &self.client_email,
            scope,
            aud: &self.token_uri,
            iat: now,
            exp: now + ASSERTION_LIFETIME_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = self.private_key_id.clone();

        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .map_err(|e| BillingError::Credentials(format!("invalid private key: {e}")))?;
        jsonwebtoken::encode(&header, &claims, &key)
            .map_err(|e| BillingError::Credentials(format!("failed to sign assertion: {e}")))
    }
}

#[derive(Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug)]
enum TokenSource {
    ServiceAccount(Box<ServiceAccountKey>),
    Static(Secret),
    Metadata { base_url: String },
}

struct CachedToken {
    token: Secret,
    expires_at: Instant,
}

/// Hands out bearer tokens for BigQuery requests.
pub struct Authenticator {
    http: reqwest::Client,
    source: TokenSource,
    scope: String,
    cache: Mutex<Option<CachedToken>>,
}

impl Authenticator {
    /// Build an authenticator for a resolved credential source.
    ///
    /// Service account keys are read and parsed here so a bad key fails
    /// the run before any query is attempted.
    pub fn from_source(source: &CredentialSource, http: reqwest::Client) -> BillingResult<Self> {
        let source = match source {
            CredentialSource::ServiceAccountJson(json) => {
                TokenSource::ServiceAccount(Box::new(ServiceAccountKey::from_json(json.expose())?))
            }
            CredentialSource::ServiceAccountFile(path) => {
                TokenSource::ServiceAccount(Box::new(ServiceAccountKey::from_file(path)?))
            }
            CredentialSource::AccessToken(token) => TokenSource::Static(token.clone()),
            CredentialSource::Metadata { host } => TokenSource::Metadata {
                base_url: format!("http://{host}"),
            },
        };
        Ok(Self::new(source, http))
    }

    pub fn service_account(key: ServiceAccountKey, http: reqwest::Client) -> Self {
        Self::new(TokenSource::ServiceAccount(Box::new(key)), http)
    }

    pub fn static_token(token: impl Into<String>, http: reqwest::Client) -> Self {
        Self::new(TokenSource::Static(Secret::new(token)), http)
    }

    /// Metadata server at an explicit base URL, e.g. `http://127.0.0.1:8080`.
    pub fn metadata(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self::new(
            TokenSource::Metadata {
                base_url: base_url.into().trim_end_matches('/').to_string(),
            },
            http,
        )
    }

    fn new(source: TokenSource, http: reqwest::Client) -> Self {
        Self {
            http,
            source,
            scope: BIGQUERY_READONLY_SCOPE.to_string(),
            cache: Mutex::new(None),
        }
    }

    /// Project id embedded in a service account key, if any.
    pub fn project_id(&self) -> Option<&str> {
        match &self.source {
            TokenSource::ServiceAccount(key) => key.project_id.as_deref(),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.source {
            TokenSource::ServiceAccount(_) => "service_account",
            TokenSource::Static(_) => "access_token",
            TokenSource::Metadata { .. } => "metadata_server",
        }
    }

    /// A valid bearer token, minting a new one when the cache is stale.
    pub async fn token(&self) -> BillingResult<Secret> {
        let mut cache = self.cache.lock().await;
        if let Some(cached) = cache.as_ref()
            && Instant::now() + REFRESH_SKEW < cached.expires_at
        {
            return Ok(cached.token.clone());
        }

        let response = match &self.source {
            TokenSource::ServiceAccount(key) => self.mint_service_account(key).await?,
            TokenSource::Metadata { base_url } => self.fetch_metadata(base_url).await?,
            TokenSource::Static(token) => return Ok(token.clone()),
        };

        let lifetime = Duration::from_secs(response.expires_in.unwrap_or(3600));
        debug!(source = self.kind(), expires_in = lifetime.as_secs(), "access token minted");

        let token = Secret::new(response.access_token);
        *cache = Some(CachedToken {
            token: token.clone(),
            expires_at: Instant::now() + lifetime,
        });
        Ok(token)
    }

    async fn mint_service_account(&self, key: &ServiceAccountKey) -> BillingResult<TokenResponse> {
        let now = chrono::Utc::now().timestamp();
        let assertion = key.assertion(&self.scope, now)?;

        let resp = self
            .http
            .post(&key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        decode_token_response(resp).await
    }

    async fn fetch_metadata(&self, base_url: &str) -> BillingResult<TokenResponse> {
        let url = format!(
            "{base_url}/computeMetadata/v1/instance/service-accounts/default/token?scopes={}",
            self.scope
        );
        let resp = self
            .http
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| {
                BillingError::Credentials(format!(
                    "no credentials configured and metadata server unreachable: {e}"
                ))
            })?;
        decode_token_response(resp).await
    }
}

async fn decode_token_response(resp: reqwest::Response) -> BillingResult<TokenResponse> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(BillingError::Token(format!("{status}: {}", body.trim())));
    }
    resp.json::<TokenResponse>()
        .await
        .map_err(|e| BillingError::Token(format!("malformed token response: {e}")))
}
