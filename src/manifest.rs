use crate::errors::{GenError, GenResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Well-known manifest file name searched for when no path is given
pub const MANIFEST_FILE_NAME: &str = "server.json";

fn default_true() -> bool {
    true
}

fn default_arg_type() -> String {
    "named".to_string()
}

/// Transport a generated configuration targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    #[serde(rename = "stdio")]
    Stdio,
    #[serde(rename = "streamable-http")]
    StreamableHttp,
}

impl TransportKind {
    /// Parse an internal transport tag ("stdio" or "streamable-http")
    pub fn from_tag(tag: &str) -> GenResult<Self> {
        match tag {
            "stdio" => Ok(TransportKind::Stdio),
            "streamable-http" => Ok(TransportKind::StreamableHttp),
            other => Err(GenError::UnknownTransport {
                transport: other.to_string(),
            }),
        }
    }

    /// Tag as written in manifests
    pub fn tag(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::StreamableHttp => "streamable-http",
        }
    }

    /// User-facing short name, also used in file names
    pub fn short_name(&self) -> &'static str {
        match self {
            TransportKind::Stdio => "stdio",
            TransportKind::StreamableHttp => "http",
        }
    }
}

/// Transport block of a package entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageTransport {
    /// "stdio" or "streamable-http"
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// One environment variable a package accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnvVarMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "isRequired", default)]
    pub is_required: bool,
    #[serde(rename = "isSecret", default)]
    pub is_secret: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
    /// Older manifests put the default here
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(rename = "isMandatoryForMatrix", default = "default_true")]
    pub is_mandatory_for_matrix: bool,
    /// Dimension name -> allowed values; every entry must hold
    #[serde(rename = "dependsOn", default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<BTreeMap<String, Vec<String>>>,
}

impl EnvVarMetadata {
    /// Declared default, falling back to the legacy `value` field
    pub fn declared_default(&self) -> Option<&str> {
        self.default.as_deref().or(self.value.as_deref())
    }

    pub fn choices(&self) -> &[String] {
        self.choices.as_deref().unwrap_or(&[])
    }

    pub fn is_conditional(&self) -> bool {
        self.depends_on.as_ref().is_some_and(|deps| !deps.is_empty())
    }
}

/// One named command-line argument a package accepts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliArgMetadata {
    #[serde(rename = "type", default = "default_arg_type")]
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl CliArgMetadata {
    /// Argument name without leading dashes
    pub fn flag_name(&self) -> &str {
        self.name.trim_start_matches('-')
    }

    pub fn choices(&self) -> &[String] {
        self.choices.as_deref().unwrap_or(&[])
    }
}

/// One transport-specific packaging of a server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackageConfig {
    #[serde(rename = "registryType", default)]
    pub registry_type: String,
    pub identifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub transport: PackageTransport,
    #[serde(rename = "environmentVariables", default)]
    pub environment_variables: Vec<EnvVarMetadata>,
    #[serde(rename = "packageArguments", default)]
    pub package_arguments: Vec<CliArgMetadata>,
}

impl PackageConfig {
    pub fn env_var(&self, name: &str) -> Option<&EnvVarMetadata> {
        self.environment_variables.iter().find(|v| v.name == name)
    }

    /// Whether `name` (with or without dashes) is a declared argument
    pub fn declares_argument(&self, name: &str) -> bool {
        let name = name.trim_start_matches('-');
        self.package_arguments.iter().any(|a| a.flag_name() == name)
    }
}

/// Root manifest document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMetadata {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
}

impl ServerMetadata {
    pub fn from_document(document: &Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(document.clone())
    }

    /// Package entry whose transport tag matches
    pub fn package_for(&self, transport: TransportKind) -> Option<&PackageConfig> {
        self.packages
            .iter()
            .find(|p| p.transport.kind == transport.tag())
    }

    /// Transports packaged by this manifest, in declaration order
    pub fn available_transports(&self) -> Vec<TransportKind> {
        let mut transports = Vec::new();
        for package in &self.packages {
            if let Ok(kind) = TransportKind::from_tag(&package.transport.kind) {
                if !transports.contains(&kind) {
                    transports.push(kind);
                }
            }
        }
        transports
    }

    /// Key used under `mcpServers`: the manifest name after its last '/'
    pub fn server_key(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// Locates and reads manifest documents
#[derive(Debug, Clone)]
pub struct ManifestLoader {
    file_name: String,
}

impl Default for ManifestLoader {
    fn default() -> Self {
        Self {
            file_name: MANIFEST_FILE_NAME.to_string(),
        }
    }
}

impl ManifestLoader {
    pub fn new(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
        }
    }

    /// Search `start`, then its parent, for the manifest file
    pub fn discover(&self, start: &Path) -> GenResult<PathBuf> {
        let mut searched = Vec::new();
        let candidates = std::iter::once(start).chain(start.parent());

        for dir in candidates {
            let candidate = dir.join(&self.file_name);
            if candidate.is_file() {
                tracing::debug!(path = %candidate.display(), "found manifest");
                return Ok(candidate);
            }
            searched.push(dir.to_path_buf());
        }

        Err(GenError::ManifestNotFound {
            file_name: self.file_name.clone(),
            searched,
        })
    }

    /// Read the raw manifest document
    pub fn read_document(&self, path: &Path) -> GenResult<Value> {
        let content =
            std::fs::read_to_string(path).map_err(|e| GenError::ManifestUnreadable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;

        serde_json::from_str(&content).map_err(|e| GenError::ManifestUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Explicit path if given, otherwise discovery from `cwd`
    pub fn resolve(&self, explicit: Option<&Path>, cwd: &Path) -> GenResult<PathBuf> {
        match explicit {
            Some(path) if path.is_file() => Ok(path.to_path_buf()),
            Some(path) => Err(GenError::ManifestNotFound {
                file_name: path.display().to_string(),
                searched: vec![path.to_path_buf()],
            }),
            None => self.discover(cwd),
        }
    }
}
