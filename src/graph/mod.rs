//! Microsoft Graph invocation service.
//!
//! `GraphInvoker` turns a (method, endpoint, body) triple into a normalized
//! `CommandResult`: it acquires an execution slot, resolves which identity
//! the call runs under, obtains an access token, issues the request, and
//! maps the HTTP status onto the success/failure/auth-challenge shape the
//! tool layer renders. Transport and token errors never escape as `Err`;
//! every path produces a `CommandResult`.

pub mod auth;

use std::sync::Arc;
use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::ServiceError;
use crate::limiter::{with_timeout, ExecutionLimiter};
use crate::outcome::CommandResult;
use crate::settings::{AuthMode, Settings};

pub use auth::TokenProvider;

/// Microsoft Graph v1.0 endpoint.
pub const DEFAULT_GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// Parse and allow-list an HTTP method for Graph calls.
pub fn parse_method(raw: &str) -> Result<Method, ServiceError> {
    match raw.trim().to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::GET),
        "POST" => Ok(Method::POST),
        "PUT" => Ok(Method::PUT),
        "PATCH" => Ok(Method::PATCH),
        "DELETE" => Ok(Method::DELETE),
        other => Err(ServiceError::Validation(format!(
            "unsupported HTTP method {other:?}; expected GET, POST, PUT, PATCH or DELETE"
        ))),
    }
}

/// Executes Microsoft Graph API operations.
#[derive(Debug, Clone)]
pub struct GraphInvoker {
    settings: Arc<Settings>,
    limiter: ExecutionLimiter,
    http: reqwest::Client,
    tokens: TokenProvider,
    base_url: String,
    timeout: Duration,
}

impl GraphInvoker {
    pub fn new(settings: Arc<Settings>) -> Self {
        let limiter = ExecutionLimiter::new(settings.max_concurrent_operations);
        let timeout = settings.operation_timeout();
        Self {
            settings,
            limiter,
            http: reqwest::Client::new(),
            tokens: TokenProvider::new(),
            base_url: DEFAULT_GRAPH_BASE_URL.to_string(),
            timeout,
        }
    }

    /// Point at a different Graph endpoint (tests use a local mock).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Point token acquisition at a different authority (tests).
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.tokens = self.tokens.with_authority(authority);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn limiter(&self) -> &ExecutionLimiter {
        &self.limiter
    }

    /// Execute one Graph operation end to end.
    ///
    /// `override_secret` is a call-time client secret that takes precedence
    /// over every environment-sourced secret.
    #[instrument(skip(self, body, override_secret), fields(method = %method))]
    pub async fn execute(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        override_secret: Option<&str>,
    ) -> CommandResult {
        let _slot = match self.limiter.acquire().await {
            Ok(slot) => slot,
            Err(err) => return err.into(),
        };

        let auth = self.settings.resolve_auth_config();
        let secret = self.settings.graph_client_secret(override_secret);

        // One deadline covers token acquisition and the request itself, so a
        // call never takes longer than the configured operation timeout.
        let outcome = with_timeout(self.timeout, async {
            let token = self.tokens.token_for(&auth, secret).await?;
            self.send(endpoint, method, body, &token).await
        })
        .await;

        match outcome {
            Ok((status, raw)) => self.normalize(status, raw, &auth.mode),
            Err(err) => err.into(),
        }
    }

    async fn send(
        &self,
        endpoint: &str,
        method: Method,
        body: Option<Value>,
        token: &str,
    ) -> Result<(reqwest::StatusCode, String), ServiceError> {
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            endpoint.trim_start_matches('/')
        );
        debug!(%url, "issuing Graph request");

        let mut request = self.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ServiceError::External(format!("Graph request failed: {e}")))?;
        let status = response.status();
        let raw = response
            .text()
            .await
            .map_err(|e| ServiceError::External(format!("Graph response unreadable: {e}")))?;
        Ok((status, raw))
    }

    /// Map an HTTP status and body onto the normalized result shape.
    fn normalize(&self, status: reqwest::StatusCode, raw: String, mode: &AuthMode) -> CommandResult {
        if status.is_success() {
            return if raw.is_empty() {
                CommandResult::ok_empty()
            } else {
                match serde_json::from_str::<Value>(&raw) {
                    Ok(parsed) => CommandResult::ok(parsed),
                    Err(_) => CommandResult::ok(Value::String(raw)),
                }
            };
        }

        let details = serde_json::from_str::<Value>(&raw)
            .unwrap_or(Value::String(raw));

        if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
            warn!(%status, "Graph rejected the request as unauthorized");
            let instructions = match mode {
                AuthMode::Custom => {
                    "The app registration was rejected. Verify GRAPH_APP_CLIENT_ID and \
                     GRAPH_APP_TENANT_ID, supply a valid client secret, and make sure the \
                     application permissions have admin consent."
                }
                AuthMode::Default => {
                    "Access was denied under the default read-only identity. Complete the \
                     device-code sign-in, or configure GRAPH_APP_CLIENT_ID and \
                     GRAPH_APP_TENANT_ID with a client secret for application access."
                }
            };
            return CommandResult {
                error_details: Some(details),
                ..CommandResult::needs_auth(format!("HTTP {status}"), instructions)
            };
        }

        CommandResult::fail_with_details(format!("HTTP {status}"), details)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Json as JsonBody;
    use axum::http::HeaderMap;
    use axum::routing::{get, post};
    use axum::Json;
    use serde_json::json;

    fn settings_with_custom_app() -> Arc<Settings> {
        let vars = std::collections::HashMap::from([
            ("GRAPH_APP_CLIENT_ID".to_string(), "app-1".to_string()),
            ("GRAPH_APP_TENANT_ID".to_string(), "tenant-1".to_string()),
            ("GRAPH_APP_CLIENT_SECRET".to_string(), "sekrit".to_string()),
        ]);
        Arc::new(Settings::from_lookup(|k| vars.get(k).cloned()).unwrap())
    }

    fn token_routes(app: axum::Router) -> axum::Router {
        app.route(
            "/tenant-1/oauth2/v2.0/token",
            post(|| async { Json(json!({"access_token": "tok", "expires_in": 3600})) }),
        )
    }

    async fn serve(app: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn invoker(base: &str) -> GraphInvoker {
        GraphInvoker::new(settings_with_custom_app())
            .with_base_url(format!("{base}/v1.0"))
            .with_authority(base.to_string())
    }

    #[test]
    fn test_parse_method_allow_list() {
        assert_eq!(parse_method("get").unwrap(), Method::GET);
        assert_eq!(parse_method(" PATCH ").unwrap(), Method::PATCH);
        assert!(parse_method("HEAD").is_err());
        assert!(parse_method("TRACE").is_err());
        assert!(parse_method("").is_err());
    }

    #[tokio::test]
    async fn test_get_success_parses_json_body() {
        let app = token_routes(axum::Router::new().route(
            "/v1.0/me",
            get(|headers: HeaderMap| async move {
                assert_eq!(headers["authorization"], "Bearer tok");
                Json(json!({"id": "1", "displayName": "Test User"}))
            }),
        ));
        let base = serve(app).await;

        let result = invoker(&base).execute("me", Method::GET, None, None).await;
        assert!(result.success);
        assert_eq!(result.data.unwrap()["displayName"], "Test User");
    }

    #[tokio::test]
    async fn test_leading_slash_in_endpoint_is_normalized() {
        let app = token_routes(
            axum::Router::new().route("/v1.0/me", get(|| async { Json(json!({"id": "1"})) })),
        );
        let base = serve(app).await;

        let result = invoker(&base).execute("/me", Method::GET, None, None).await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_empty_body_success_is_ok_empty() {
        let app = token_routes(axum::Router::new().route(
            "/v1.0/users/1",
            axum::routing::delete(|| async { axum::http::StatusCode::NO_CONTENT }),
        ));
        let base = serve(app).await;

        let result = invoker(&base)
            .execute("users/1", Method::DELETE, None, None)
            .await;
        assert!(result.success);
        assert!(result.data.is_none());
    }

    #[tokio::test]
    async fn test_post_forwards_json_body() {
        let app = token_routes(axum::Router::new().route(
            "/v1.0/me/sendMail",
            post(|JsonBody(body): JsonBody<Value>| async move {
                assert_eq!(body["message"]["subject"], "hi");
                axum::http::StatusCode::ACCEPTED
            }),
        ));
        let base = serve(app).await;

        let result = invoker(&base)
            .execute(
                "me/sendMail",
                Method::POST,
                Some(json!({"message": {"subject": "hi"}})),
                None,
            )
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_unauthorized_maps_to_auth_challenge() {
        let app = token_routes(axum::Router::new().route(
            "/v1.0/users",
            get(|| async {
                (
                    axum::http::StatusCode::FORBIDDEN,
                    Json(json!({"error": {"code": "Authorization_RequestDenied"}})),
                )
            }),
        ));
        let base = serve(app).await;

        let result = invoker(&base)
            .execute("users", Method::GET, None, None)
            .await;
        assert!(!result.success);
        assert!(result.auth_required);
        assert!(result
            .instructions
            .as_deref()
            .unwrap()
            .contains("GRAPH_APP_CLIENT_ID"));
        assert_eq!(
            result.error_details.unwrap()["error"]["code"],
            "Authorization_RequestDenied"
        );
    }

    #[tokio::test]
    async fn test_not_found_is_plain_failure_with_details() {
        let app = token_routes(axum::Router::new().route(
            "/v1.0/users/nope",
            get(|| async {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    Json(json!({"error": {"code": "Request_ResourceNotFound"}})),
                )
            }),
        ));
        let base = serve(app).await;

        let result = invoker(&base)
            .execute("users/nope", Method::GET, None, None)
            .await;
        assert!(!result.success);
        assert!(!result.auth_required);
        assert!(result.error.as_deref().unwrap().contains("404"));
    }

    #[tokio::test]
    async fn test_unreachable_graph_is_normalized_failure() {
        // Port 1 is closed; both token and Graph requests fail fast.
        let result = invoker("http://127.0.0.1:1")
            .execute("me", Method::GET, None, None)
            .await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[tokio::test]
    async fn test_timeout_produces_timeout_result() {
        let app = token_routes(axum::Router::new().route(
            "/v1.0/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Json(json!({}))
            }),
        ));
        let base = serve(app).await;

        let started = std::time::Instant::now();
        let result = invoker(&base)
            .with_timeout(Duration::from_millis(200))
            .execute("slow", Method::GET, None, None)
            .await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timeout"));
    }

    #[tokio::test]
    async fn test_deadline_spans_token_and_request() {
        // Token and request each finish inside the deadline on their own;
        // together they exceed it. The call must still time out.
        let app = axum::Router::new()
            .route(
                "/tenant-1/oauth2/v2.0/token",
                post(|| async {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Json(json!({"access_token": "tok", "expires_in": 3600}))
                }),
            )
            .route(
                "/v1.0/me",
                get(|| async {
                    tokio::time::sleep(Duration::from_millis(150)).await;
                    Json(json!({"id": "1"}))
                }),
            );
        let base = serve(app).await;

        let result = invoker(&base)
            .with_timeout(Duration::from_millis(200))
            .execute("me", Method::GET, None, None)
            .await;
        assert!(!result.success);
        assert!(result.error.as_deref().unwrap().contains("timeout"));
    }
}
