//! Environment-sourced settings for both the Azure CLI and Graph services.
//!
//! `Settings` is constructed once at startup and never mutated afterwards;
//! re-reading the environment requires constructing a new value. Numeric
//! limits outside their documented ranges fail fast at startup, while
//! enum-like values (log level) fall back to documented defaults and
//! list-typed values fall back to comma-splitting, preserving the permissive
//! parsing of the original deployment.

use std::time::Duration;

use crate::error::ServiceError;

/// Microsoft Graph PowerShell public client (read-only delegated access).
pub const DEFAULT_GRAPH_CLIENT_ID: &str = "14d82eec-204b-4c2f-b7e8-296a70dab67e";

/// Scope requesting every permission the app registration has been granted.
pub const GRAPH_DEFAULT_SCOPE: &str = "https://graph.microsoft.com/.default";

const DEFAULT_TIMEOUT_SECS: u64 = 300;
const DEFAULT_MAX_CONCURRENT: usize = 5;

const TIMEOUT_RANGE: (u64, u64) = (1, 3600);
const CONCURRENCY_RANGE: (usize, usize) = (1, 50);

fn default_graph_scopes() -> Vec<String> {
    [
        "https://graph.microsoft.com/User.Read",
        "https://graph.microsoft.com/Mail.ReadWrite",
        "https://graph.microsoft.com/Calendars.ReadWrite",
        "https://graph.microsoft.com/Files.ReadWrite",
        "https://graph.microsoft.com/Sites.ReadWrite.All",
        "https://graph.microsoft.com/Team.ReadBasic.All",
        "https://graph.microsoft.com/Channel.ReadBasic.All",
        "https://graph.microsoft.com/ChatMessage.Send",
        "https://graph.microsoft.com/User.ReadBasic.All",
        "https://graph.microsoft.com/Group.Read.All",
        "https://graph.microsoft.com/DeviceManagementManagedDevices.ReadWrite.All",
        "https://graph.microsoft.com/DeviceManagementConfiguration.ReadWrite.All",
        "https://graph.microsoft.com/DeviceManagementApps.ReadWrite.All",
        "https://graph.microsoft.com/SecurityEvents.Read.All",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Which app identity a Graph call runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    /// Caller-supplied app registration (read/write application access).
    Custom,
    /// Fixed public client (read-only delegated access).
    Default,
}

/// How an access token is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthFlow {
    /// Non-interactive, pre-shared application secret.
    ClientSecret,
    /// Interactive out-of-band browser sign-in with polling.
    DeviceCode,
}

/// Authentication configuration derived from `Settings` per Graph call.
///
/// `mode` is `Custom` iff both a custom client id and a custom tenant id are
/// present; custom apps always use the client-secret flow with the `.default`
/// scope. This is the single policy switch between read-only delegated access
/// and read/write application access.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub client_id: String,
    pub tenant_id: String,
    pub auth_flow: AuthFlow,
    pub scopes: Vec<String>,
}

/// Immutable, process-wide application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    // Azure CLI service-principal credentials
    pub azure_tenant_id: Option<String>,
    pub azure_client_id: Option<String>,
    pub azure_client_secret: Option<String>,
    pub azure_subscription_id: Option<String>,

    // Command execution limits
    pub command_timeout_secs: u64,
    pub max_concurrent_commands: usize,

    // Microsoft Graph identity
    pub graph_tenant_id: Option<String>,
    pub graph_client_id: String,

    // Custom app registration (enables read/write mode)
    pub custom_client_id: Option<String>,
    pub custom_tenant_id: Option<String>,
    pub custom_client_secret: Option<String>,

    // Alternative env names accepted for MCP configuration
    pub use_app_reg_client_id: Option<String>,
    pub tenant_id_alias: Option<String>,
    pub client_secret_alias: Option<String>,

    // Legacy naming, kept for backward compatibility
    pub legacy_graph_client_secret: Option<String>,

    /// Requested token flow ("device_code" or "client_secret"). Recorded for
    /// compatibility; `resolve_auth_config` selects the flow from custom-app
    /// presence and does not consult it.
    pub graph_auth_mode: String,

    pub graph_scopes: Vec<String>,

    // Graph operation limits
    pub operation_timeout_secs: u64,
    pub max_concurrent_operations: usize,

    // Logging
    pub log_level: String,
    /// Raw value rejected by log-level normalization, reported once the
    /// subscriber is up.
    pub rejected_log_level: Option<String>,
    pub log_file: Option<String>,
}

impl Settings {
    /// Resolve settings from the process environment.
    ///
    /// Fails fast on out-of-range numeric values. Variable names are matched
    /// case-insensitively on Windows by the OS; on Unix the canonical
    /// upper-case names are expected.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve settings from an arbitrary key lookup. Tests use this with a
    /// map instead of mutating the process environment.
    pub fn from_lookup<F>(get: F) -> Result<Self, ServiceError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let command_timeout_secs = parse_ranged_u64(
            get("COMMAND_TIMEOUT"),
            "COMMAND_TIMEOUT",
            TIMEOUT_RANGE,
            DEFAULT_TIMEOUT_SECS,
        )?;
        let operation_timeout_secs = parse_ranged_u64(
            get("OPERATION_TIMEOUT"),
            "OPERATION_TIMEOUT",
            TIMEOUT_RANGE,
            DEFAULT_TIMEOUT_SECS,
        )?;
        let max_concurrent_commands = parse_ranged_usize(
            get("MAX_CONCURRENT_COMMANDS"),
            "MAX_CONCURRENT_COMMANDS",
            CONCURRENCY_RANGE,
            DEFAULT_MAX_CONCURRENT,
        )?;
        let max_concurrent_operations = parse_ranged_usize(
            get("MAX_CONCURRENT_OPERATIONS"),
            "MAX_CONCURRENT_OPERATIONS",
            CONCURRENCY_RANGE,
            DEFAULT_MAX_CONCURRENT,
        )?;

        let graph_scopes = match get("GRAPH_SCOPES") {
            Some(raw) => parse_scope_list(&raw),
            None => default_graph_scopes(),
        };

        let (log_level, rejected_log_level) = normalize_log_level(get("LOG_LEVEL"));

        Ok(Self {
            azure_tenant_id: get("AZURE_APP_TENANT_ID"),
            azure_client_id: get("AZURE_APP_CLIENT_ID"),
            azure_client_secret: get("AZURE_APP_CLIENT_SECRET"),
            azure_subscription_id: get("AZURE_SUBSCRIPTION_ID"),
            command_timeout_secs,
            max_concurrent_commands,
            graph_tenant_id: get("GRAPH_TENANT_ID"),
            graph_client_id: get("GRAPH_CLIENT_ID")
                .unwrap_or_else(|| DEFAULT_GRAPH_CLIENT_ID.to_string()),
            custom_client_id: get("GRAPH_APP_CLIENT_ID"),
            custom_tenant_id: get("GRAPH_APP_TENANT_ID"),
            custom_client_secret: get("GRAPH_APP_CLIENT_SECRET"),
            use_app_reg_client_id: get("USE_APP_REG_CLIENTID"),
            tenant_id_alias: get("TENANTID"),
            client_secret_alias: get("CLIENT_SECRET"),
            legacy_graph_client_secret: get("GRAPH_CLIENT_SECRET"),
            graph_auth_mode: get("GRAPH_AUTH_MODE")
                .unwrap_or_else(|| "device_code".to_string()),
            graph_scopes,
            operation_timeout_secs,
            max_concurrent_operations,
            log_level,
            rejected_log_level,
            log_file: get("LOG_FILE"),
        })
    }

    /// True iff all three service-principal fields are present.
    pub fn has_cli_credentials(&self) -> bool {
        self.azure_tenant_id.is_some()
            && self.azure_client_id.is_some()
            && self.azure_client_secret.is_some()
    }

    /// Select the Graph authentication configuration.
    ///
    /// Pure function of the settings: custom app registration takes
    /// precedence over the default public client whenever both a custom
    /// client id and tenant id are present (under either naming scheme).
    pub fn resolve_auth_config(&self) -> AuthConfig {
        let client_id = self
            .custom_client_id
            .clone()
            .or_else(|| self.use_app_reg_client_id.clone());
        let tenant_id = self
            .custom_tenant_id
            .clone()
            .or_else(|| self.tenant_id_alias.clone());

        if let (Some(client_id), Some(tenant_id)) = (client_id, tenant_id) {
            AuthConfig {
                mode: AuthMode::Custom,
                client_id,
                tenant_id,
                auth_flow: AuthFlow::ClientSecret,
                scopes: vec![GRAPH_DEFAULT_SCOPE.to_string()],
            }
        } else {
            AuthConfig {
                mode: AuthMode::Default,
                client_id: self.graph_client_id.clone(),
                tenant_id: self
                    .graph_tenant_id
                    .clone()
                    .unwrap_or_else(|| "common".to_string()),
                auth_flow: AuthFlow::DeviceCode,
                scopes: vec![GRAPH_DEFAULT_SCOPE.to_string()],
            }
        }
    }

    /// Resolve the Graph client secret with explicit, ordered precedence:
    /// call-time override, then custom-app secret, then the `CLIENT_SECRET`
    /// alias, then the legacy `GRAPH_CLIENT_SECRET` field.
    pub fn graph_client_secret(&self, call_override: Option<&str>) -> Option<String> {
        call_override
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .or_else(|| self.custom_client_secret.clone())
            .or_else(|| self.client_secret_alias.clone())
            .or_else(|| self.legacy_graph_client_secret.clone())
    }

    /// True when no custom app registration is configured.
    pub fn is_graph_read_only(&self) -> bool {
        self.resolve_auth_config().mode == AuthMode::Default
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Log which credential groups are configured, never their values.
    pub fn log_summary(&self) {
        if let Some(rejected) = &self.rejected_log_level {
            tracing::warn!("invalid log level {rejected:?}, falling back to \"info\"");
        }
        tracing::info!(
            cli_service_principal = self.has_cli_credentials(),
            subscription_id = self.azure_subscription_id.is_some(),
            graph_custom_app = (self.resolve_auth_config().mode == AuthMode::Custom),
            graph_secret = self.graph_client_secret(None).is_some(),
            command_timeout_secs = self.command_timeout_secs,
            max_concurrent_commands = self.max_concurrent_commands,
            operation_timeout_secs = self.operation_timeout_secs,
            max_concurrent_operations = self.max_concurrent_operations,
            "resolved settings"
        );
    }
}

/// Comma-split a scope string, dropping empty segments. Tolerant by design:
/// malformed lists degrade to whatever scopes can be salvaged.
fn parse_scope_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Invalid log levels fall back to "info" instead of failing. The rejected
/// raw value is returned alongside so it can be reported later; settings are
/// resolved before the subscriber exists, so logging here would be dropped.
fn normalize_log_level(raw: Option<String>) -> (String, Option<String>) {
    let level = raw.unwrap_or_else(|| "info".to_string()).to_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => (level, None),
        _ => ("info".to_string(), Some(level)),
    }
}

fn parse_ranged_u64(
    raw: Option<String>,
    name: &str,
    (min, max): (u64, u64),
    default: u64,
) -> Result<u64, ServiceError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: u64 = raw
        .parse()
        .map_err(|_| ServiceError::Config(format!("{name} must be an integer, got {raw:?}")))?;
    if value < min || value > max {
        return Err(ServiceError::Config(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

fn parse_ranged_usize(
    raw: Option<String>,
    name: &str,
    (min, max): (usize, usize),
    default: usize,
) -> Result<usize, ServiceError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: usize = raw
        .parse()
        .map_err(|_| ServiceError::Config(format!("{name} must be an integer, got {raw:?}")))?;
    if value < min || value > max {
        return Err(ServiceError::Config(format!(
            "{name} must be between {min} and {max}, got {value}"
        )));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings_from(pairs: &[(&str, &str)]) -> Result<Settings, ServiceError> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.command_timeout_secs, 300);
        assert_eq!(settings.max_concurrent_commands, 5);
        assert_eq!(settings.operation_timeout_secs, 300);
        assert_eq!(settings.max_concurrent_operations, 5);
        assert_eq!(settings.graph_client_id, DEFAULT_GRAPH_CLIENT_ID);
        assert_eq!(settings.log_level, "info");
        assert!(!settings.graph_scopes.is_empty());
    }

    #[test]
    fn test_has_cli_credentials_requires_all_three() {
        let settings = settings_from(&[
            ("AZURE_APP_TENANT_ID", "t"),
            ("AZURE_APP_CLIENT_ID", "c"),
        ])
        .unwrap();
        assert!(!settings.has_cli_credentials());

        let settings = settings_from(&[
            ("AZURE_APP_TENANT_ID", "t"),
            ("AZURE_APP_CLIENT_ID", "c"),
            ("AZURE_APP_CLIENT_SECRET", "s"),
        ])
        .unwrap();
        assert!(settings.has_cli_credentials());
    }

    #[test]
    fn test_auth_config_custom_when_both_present() {
        let settings = settings_from(&[
            ("GRAPH_APP_CLIENT_ID", "app-id"),
            ("GRAPH_APP_TENANT_ID", "tenant-id"),
        ])
        .unwrap();

        let auth = settings.resolve_auth_config();
        assert_eq!(auth.mode, AuthMode::Custom);
        assert_eq!(auth.client_id, "app-id");
        assert_eq!(auth.tenant_id, "tenant-id");
        assert_eq!(auth.auth_flow, AuthFlow::ClientSecret);
        assert_eq!(auth.scopes, vec![GRAPH_DEFAULT_SCOPE.to_string()]);
    }

    #[test]
    fn test_auth_config_default_when_either_absent() {
        let settings = settings_from(&[("GRAPH_APP_CLIENT_ID", "app-id")]).unwrap();
        let auth = settings.resolve_auth_config();
        assert_eq!(auth.mode, AuthMode::Default);
        assert_eq!(auth.client_id, DEFAULT_GRAPH_CLIENT_ID);
        assert_eq!(auth.tenant_id, "common");
        assert_eq!(auth.auth_flow, AuthFlow::DeviceCode);

        let settings = settings_from(&[("GRAPH_APP_TENANT_ID", "tenant-id")]).unwrap();
        assert_eq!(settings.resolve_auth_config().mode, AuthMode::Default);
    }

    #[test]
    fn test_auth_config_accepts_alias_names() {
        let settings = settings_from(&[
            ("USE_APP_REG_CLIENTID", "alias-app"),
            ("TENANTID", "alias-tenant"),
        ])
        .unwrap();

        let auth = settings.resolve_auth_config();
        assert_eq!(auth.mode, AuthMode::Custom);
        assert_eq!(auth.client_id, "alias-app");
        assert_eq!(auth.tenant_id, "alias-tenant");
    }

    #[test]
    fn test_auth_config_is_deterministic() {
        let settings = settings_from(&[
            ("GRAPH_APP_CLIENT_ID", "app-id"),
            ("GRAPH_APP_TENANT_ID", "tenant-id"),
        ])
        .unwrap();
        assert_eq!(settings.resolve_auth_config(), settings.resolve_auth_config());
    }

    #[test]
    fn test_graph_tenant_used_in_default_mode() {
        let settings = settings_from(&[("GRAPH_TENANT_ID", "my-tenant")]).unwrap();
        assert_eq!(settings.resolve_auth_config().tenant_id, "my-tenant");
    }

    #[test]
    fn test_secret_precedence() {
        let settings = settings_from(&[
            ("GRAPH_APP_CLIENT_SECRET", "custom"),
            ("CLIENT_SECRET", "alias"),
            ("GRAPH_CLIENT_SECRET", "legacy"),
        ])
        .unwrap();

        assert_eq!(
            settings.graph_client_secret(Some("override")).as_deref(),
            Some("override")
        );
        assert_eq!(settings.graph_client_secret(None).as_deref(), Some("custom"));

        let settings = settings_from(&[
            ("CLIENT_SECRET", "alias"),
            ("GRAPH_CLIENT_SECRET", "legacy"),
        ])
        .unwrap();
        assert_eq!(settings.graph_client_secret(None).as_deref(), Some("alias"));

        let settings = settings_from(&[("GRAPH_CLIENT_SECRET", "legacy")]).unwrap();
        assert_eq!(settings.graph_client_secret(None).as_deref(), Some("legacy"));

        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.graph_client_secret(None), None);
        assert_eq!(settings.graph_client_secret(Some("  ")), None);
    }

    #[test]
    fn test_numeric_range_enforced() {
        assert!(settings_from(&[("COMMAND_TIMEOUT", "0")]).is_err());
        assert!(settings_from(&[("COMMAND_TIMEOUT", "3601")]).is_err());
        assert!(settings_from(&[("COMMAND_TIMEOUT", "abc")]).is_err());
        assert!(settings_from(&[("MAX_CONCURRENT_COMMANDS", "51")]).is_err());
        assert!(settings_from(&[("MAX_CONCURRENT_OPERATIONS", "0")]).is_err());

        let settings = settings_from(&[
            ("COMMAND_TIMEOUT", "60"),
            ("MAX_CONCURRENT_COMMANDS", "2"),
        ])
        .unwrap();
        assert_eq!(settings.command_timeout(), Duration::from_secs(60));
        assert_eq!(settings.max_concurrent_commands, 2);
    }

    #[test]
    fn test_invalid_log_level_falls_back() {
        let settings = settings_from(&[("LOG_LEVEL", "LOUD")]).unwrap();
        assert_eq!(settings.log_level, "info");
        // The rejected value is kept so the fallback can be reported once
        // the subscriber is initialized.
        assert_eq!(settings.rejected_log_level.as_deref(), Some("loud"));

        let settings = settings_from(&[("LOG_LEVEL", "DEBUG")]).unwrap();
        assert_eq!(settings.log_level, "debug");
        assert_eq!(settings.rejected_log_level, None);
    }

    #[test]
    fn test_graph_auth_mode_recorded_but_not_consulted() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.graph_auth_mode, "device_code");

        // The selector is recorded from the environment, but flow selection
        // still follows custom-app presence.
        let settings = settings_from(&[
            ("GRAPH_AUTH_MODE", "device_code"),
            ("GRAPH_APP_CLIENT_ID", "app-id"),
            ("GRAPH_APP_TENANT_ID", "tenant-id"),
        ])
        .unwrap();
        assert_eq!(settings.graph_auth_mode, "device_code");
        assert_eq!(settings.resolve_auth_config().auth_flow, AuthFlow::ClientSecret);

        let settings = settings_from(&[("GRAPH_AUTH_MODE", "client_secret")]).unwrap();
        assert_eq!(settings.graph_auth_mode, "client_secret");
        assert_eq!(settings.resolve_auth_config().auth_flow, AuthFlow::DeviceCode);
    }

    #[test]
    fn test_scope_comma_splitting() {
        let settings = settings_from(&[(
            "GRAPH_SCOPES",
            "https://graph.microsoft.com/User.Read, https://graph.microsoft.com/Mail.Read,,",
        )])
        .unwrap();
        assert_eq!(
            settings.graph_scopes,
            vec![
                "https://graph.microsoft.com/User.Read".to_string(),
                "https://graph.microsoft.com/Mail.Read".to_string(),
            ]
        );
    }

    #[test]
    fn test_empty_values_treated_as_unset() {
        let settings = settings_from(&[("AZURE_APP_TENANT_ID", "   ")]).unwrap();
        assert!(settings.azure_tenant_id.is_none());
    }

    #[test]
    fn test_read_only_mode() {
        let settings = settings_from(&[]).unwrap();
        assert!(settings.is_graph_read_only());

        let settings = settings_from(&[
            ("GRAPH_APP_CLIENT_ID", "a"),
            ("GRAPH_APP_TENANT_ID", "t"),
        ])
        .unwrap();
        assert!(!settings.is_graph_read_only());
    }
}
