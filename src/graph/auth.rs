//! Access-token acquisition for Microsoft Graph.
//!
//! Two flows, selected by the resolved `AuthConfig`:
//!
//! - **Client-secret** (custom app registrations): a non-interactive
//!   client-credentials exchange against the tenant's token endpoint.
//! - **Device-code** (default public client): the user completes sign-in
//!   out-of-band in a browser while a background task polls for the token.
//!   The first call returns an auth challenge with the verification URI and
//!   user code; once sign-in completes, the cached token serves subsequent
//!   calls.
//!
//! Token-acquisition failures surface as `AuthRequired` with remediation
//! instructions rather than a generic error: the caller's fix is to
//! re-authenticate, not to retry.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::settings::{AuthConfig, AuthFlow};

/// Microsoft Entra ID authority.
pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";

/// Safety margin subtracted from a token's lifetime before it is considered
/// expired.
const EXPIRY_SKEW: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    #[serde(default)]
    message: Option<String>,
    expires_in: u64,
    #[serde(default)]
    interval: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct OAuthErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
    // Identity fingerprint: a mode/app change invalidates the cache.
    client_id: String,
    tenant_id: String,
    flow: AuthFlow,
}

impl CachedToken {
    fn matches(&self, auth: &AuthConfig) -> bool {
        self.client_id == auth.client_id
            && self.tenant_id == auth.tenant_id
            && self.flow == auth.auth_flow
            && self.expires_at > Instant::now()
    }
}

/// Obtains and caches Graph access tokens.
#[derive(Debug, Clone)]
pub struct TokenProvider {
    http: reqwest::Client,
    authority: String,
    cache: Arc<RwLock<Option<CachedToken>>>,
    device_login_pending: Arc<AtomicBool>,
}

impl Default for TokenProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenProvider {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
            authority: DEFAULT_AUTHORITY.to_string(),
            cache: Arc::new(RwLock::new(None)),
            device_login_pending: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Point at a different authority (tests use a local mock).
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into();
        self
    }

    fn token_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority, tenant_id)
    }

    fn device_code_url(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/devicecode", self.authority, tenant_id)
    }

    /// Obtain an access token for the given auth configuration.
    pub async fn token_for(
        &self,
        auth: &AuthConfig,
        secret: Option<String>,
    ) -> Result<String, ServiceError> {
        if let Some(cached) = self.cache.read().await.as_ref() {
            if cached.matches(auth) {
                debug!("using cached access token");
                return Ok(cached.access_token.clone());
            }
        }

        match auth.auth_flow {
            AuthFlow::ClientSecret => self.client_secret_token(auth, secret).await,
            AuthFlow::DeviceCode => self.device_code_token(auth).await,
        }
    }

    async fn client_secret_token(
        &self,
        auth: &AuthConfig,
        secret: Option<String>,
    ) -> Result<String, ServiceError> {
        let Some(secret) = secret else {
            return Err(ServiceError::auth_required(
                "Client-secret authentication requires a secret. Pass the client_secret \
                 argument, or set GRAPH_APP_CLIENT_SECRET (or CLIENT_SECRET) in the environment.",
            ));
        };

        let response = self
            .http
            .post(self.token_url(&auth.tenant_id))
            .form(&[
                ("client_id", auth.client_id.as_str()),
                ("scope", &auth.scopes.join(" ")),
                ("client_secret", secret.as_str()),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::External(format!("token request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::External(format!("token response unreadable: {e}")))?;

        if !status.is_success() {
            let detail: OAuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(ServiceError::auth_required(format!(
                "Token request was rejected ({status}): {}. Verify the app registration's \
                 client id, tenant id and client secret.",
                detail
                    .error_description
                    .or(detail.error)
                    .unwrap_or_else(|| "no error detail".to_string())
            )));
        }

        let token: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| ServiceError::External(format!("malformed token response: {e}")))?;
        self.store_token(auth, &token).await;
        info!(mode = ?auth.mode, "acquired Graph access token via client secret");
        Ok(token.access_token)
    }

    async fn device_code_token(&self, auth: &AuthConfig) -> Result<String, ServiceError> {
        if self.device_login_pending.load(Ordering::SeqCst) {
            return Err(ServiceError::auth_required(
                "A device-code sign-in is already in progress. Complete it in the browser, \
                 then retry this call.",
            ));
        }

        let response = self
            .http
            .post(self.device_code_url(&auth.tenant_id))
            .form(&[
                ("client_id", auth.client_id.as_str()),
                ("scope", &auth.scopes.join(" ")),
            ])
            .send()
            .await
            .map_err(|e| ServiceError::External(format!("device code request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ServiceError::External(format!("device code response unreadable: {e}")))?;

        if !status.is_success() {
            let detail: OAuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
            return Err(ServiceError::auth_required(format!(
                "Could not start device-code sign-in ({status}): {}. Configure \
                 GRAPH_APP_CLIENT_ID and GRAPH_APP_TENANT_ID for application access instead.",
                detail
                    .error_description
                    .or(detail.error)
                    .unwrap_or_else(|| "no error detail".to_string())
            )));
        }

        let device: DeviceCodeResponse = serde_json::from_str(&body)
            .map_err(|e| ServiceError::External(format!("malformed device code response: {e}")))?;

        let instructions = device.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, use a web browser to open {} and enter the code {} to authenticate.",
                device.verification_uri, device.user_code
            )
        });

        self.device_login_pending.store(true, Ordering::SeqCst);
        self.spawn_device_poll(auth.clone(), device);

        Err(ServiceError::auth_required(instructions))
    }

    /// Poll the token endpoint in the background until the user completes
    /// sign-in, the code expires, or the endpoint reports a terminal error.
    fn spawn_device_poll(&self, auth: AuthConfig, device: DeviceCodeResponse) {
        let provider = self.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + Duration::from_secs(device.expires_in);
            let mut interval = Duration::from_secs(device.interval.unwrap_or(5).max(1));

            while Instant::now() < deadline {
                tokio::time::sleep(interval).await;

                let response = provider
                    .http
                    .post(provider.token_url(&auth.tenant_id))
                    .form(&[
                        ("client_id", auth.client_id.as_str()),
                        ("device_code", device.device_code.as_str()),
                        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ])
                    .send()
                    .await;

                let response = match response {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, "device code poll failed, retrying");
                        continue;
                    }
                };

                let status = response.status();
                let body = response.text().await.unwrap_or_default();

                if status.is_success() {
                    if let Ok(token) = serde_json::from_str::<TokenResponse>(&body) {
                        provider.store_token(&auth, &token).await;
                        info!("device-code sign-in completed, token cached");
                    }
                    break;
                }

                let detail: OAuthErrorBody = serde_json::from_str(&body).unwrap_or_default();
                match detail.error.as_deref() {
                    Some("authorization_pending") => continue,
                    Some("slow_down") => {
                        interval += Duration::from_secs(5);
                        continue;
                    }
                    other => {
                        warn!(error = ?other, "device-code sign-in did not complete");
                        break;
                    }
                }
            }

            provider.device_login_pending.store(false, Ordering::SeqCst);
        });
    }

    async fn store_token(&self, auth: &AuthConfig, token: &TokenResponse) {
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(3600));
        let expires_at = Instant::now() + lifetime.saturating_sub(EXPIRY_SKEW);
        *self.cache.write().await = Some(CachedToken {
            access_token: token.access_token.clone(),
            expires_at,
            client_id: auth.client_id.clone(),
            tenant_id: auth.tenant_id.clone(),
            flow: auth.auth_flow,
        });
    }
}
