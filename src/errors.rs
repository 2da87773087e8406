use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Error types for manifest loading, configuration generation and validation
#[derive(Error, Debug)]
pub enum GenError {
    // Manifest Errors
    #[error("No manifest '{file_name}' found in {searched:?}")]
    ManifestNotFound {
        file_name: String,
        searched: Vec<PathBuf>,
    },

    #[error("Failed to read manifest '{path}': {reason}")]
    ManifestUnreadable { path: PathBuf, reason: String },

    #[error("Manifest '{label}' failed validation:\n{}", .messages.join("\n"))]
    InvalidManifest {
        label: String,
        messages: Vec<String>,
    },

    #[error("Failed to fetch schema from {url}: {reason}")]
    SchemaFetchFailed { url: String, reason: String },

    // Configuration Errors
    #[error("No package declares transport '{transport}'")]
    MissingTransportPackage { transport: String },

    #[error("Unknown transport '{transport}' (expected 'stdio' or 'http')")]
    UnknownTransport { transport: String },

    #[error("Source mode requires {missing}")]
    SourceModeUnresolved { missing: String },

    #[error("Invalid dimension selection: {reason}")]
    InvalidSelection { reason: String },

    // File and I/O Errors
    #[error("Failed to write '{path}': {reason}")]
    WriteFailed { path: PathBuf, reason: String },

    #[error("Failed to read config '{path}': {reason}")]
    ConfigUnreadable { path: PathBuf, reason: String },

    // Interaction Errors
    #[error("Prompt failed: {reason}")]
    PromptFailed { reason: String },

    #[error("Prompt '{message}' requires an interactive terminal")]
    NotInteractive { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl GenError {
    /// Short diagnostic line for the terminal
    pub fn user_message(&self) -> String {
        match self {
            GenError::ManifestNotFound { file_name, .. } => {
                format!(
                    "No {file_name} found in the current or parent directory. \
                     Pass --manifest to point at one."
                )
            }
            GenError::InvalidManifest { label, messages } => {
                format!(
                    "{label} is not a valid server manifest ({} problem(s)):\n  {}",
                    messages.len(),
                    messages.join("\n  ")
                )
            }
            GenError::MissingTransportPackage { transport } => {
                format!("The manifest has no package for the '{transport}' transport.")
            }
            GenError::SourceModeUnresolved { missing } => {
                format!(
                    "Cannot run from source: {missing}. \
                     Pass --source <dir> and/or --bin <path>."
                )
            }
            other => other.to_string(),
        }
    }

    /// Whether the error aborts a whole generation run
    pub fn is_fatal(&self) -> bool {
        !matches!(self, GenError::WriteFailed { .. })
    }
}

impl From<inquire::InquireError> for GenError {
    fn from(err: inquire::InquireError) -> Self {
        GenError::PromptFailed {
            reason: err.to_string(),
        }
    }
}

/// Result alias used throughout the library
pub type GenResult<T> = Result<T, GenError>;

/// Severity of a validation finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    /// Unverifiable or suspicious, the config can still be used
    Warning,
    /// Structurally broken, the config will not load
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_manifest_aggregates_messages() {
        let error = GenError::InvalidManifest {
            label: "server.json".to_string(),
            messages: vec!["missing name".to_string(), "bad transport".to_string()],
        };

        let rendered = error.to_string();
        assert!(rendered.contains("missing name"));
        assert!(rendered.contains("bad transport"));
        assert!(error.user_message().contains("2 problem(s)"));
    }

    #[test]
    fn test_write_failures_are_not_fatal() {
        let write = GenError::WriteFailed {
            path: PathBuf::from(".mcp.default-stdio.json"),
            reason: "disk full".to_string(),
        };
        let missing = GenError::MissingTransportPackage {
            transport: "streamable-http".to_string(),
        };

        assert!(!write.is_fatal());
        assert!(missing.is_fatal());
    }
}
