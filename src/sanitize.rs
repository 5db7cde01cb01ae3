//! Command sanitization for the CLI tool path.
//!
//! This is a security boundary: callers are untrusted, and a failure here
//! must prevent any subprocess from being spawned. The check is structural
//! only — the command must start with the expected binary name as its own
//! token and must not contain shell metacharacters. Semantic validation of
//! sub-commands is deliberately out of scope; the CLI itself owns that.

use crate::error::ServiceError;

/// Characters that enable injection when a string ever reaches a shell:
/// separators, pipes, background execution, variable expansion, command
/// substitution, subshells, redirection, and embedded line breaks.
const DENY_CHARS: [char; 11] = [';', '|', '&', '$', '`', '\n', '\r', '(', ')', '<', '>'];

/// Validates raw command strings against an allow-list prefix and a
/// deny-list of shell metacharacters.
#[derive(Debug, Clone)]
pub struct CommandSanitizer {
    prefix: String,
}

impl Default for CommandSanitizer {
    fn default() -> Self {
        Self::azure_cli()
    }
}

impl CommandSanitizer {
    /// Sanitizer for Azure CLI commands (must start with `az`).
    pub fn azure_cli() -> Self {
        Self::new("az")
    }

    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Validate a raw command string, returning the trimmed command.
    ///
    /// Pure validation, no side effects. Fails when the input is empty, does
    /// not start with the required prefix as its own token, or contains any
    /// deny-listed character.
    pub fn sanitize(&self, raw: &str) -> Result<String, ServiceError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ServiceError::Validation("command is empty".to_string()));
        }

        let first_token = trimmed.split_whitespace().next().unwrap_or_default();
        if first_token != self.prefix {
            return Err(ServiceError::Validation(format!(
                "command must start with {:?}, got {first_token:?}",
                self.prefix
            )));
        }

        if let Some(ch) = trimmed.chars().find(|c| DENY_CHARS.contains(c)) {
            return Err(ServiceError::Validation(format!(
                "command contains forbidden character {ch:?}"
            )));
        }

        Ok(trimmed.to_string())
    }
}
