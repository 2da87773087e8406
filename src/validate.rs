//! Validation of generated `mcpServers` documents.
//!
//! Structural problems fail a server. Checks that need manifest metadata only
//! ever warn, and are reported as unverifiable when the metadata is missing.

use crate::dependency::should_include;
use crate::errors::{GenError, GenResult, Severity};
use crate::manifest::{PackageConfig, ServerMetadata, TransportKind};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::OnceLock;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\$\{.*\}$").expect("placeholder pattern is valid"))
}

/// Whether a configured value is an unfilled `${...}` placeholder
pub fn is_placeholder(value: &str) -> bool {
    placeholder_pattern().is_match(value)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub message: String,
}

impl ValidationIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationOutcome {
    Pass,
    PassWithWarnings,
    Fail,
}

impl ValidationOutcome {
    fn from_issues(issues: &[ValidationIssue]) -> Self {
        if issues.iter().any(|i| i.severity == Severity::Error) {
            ValidationOutcome::Fail
        } else if issues.is_empty() {
            ValidationOutcome::Pass
        } else {
            ValidationOutcome::PassWithWarnings
        }
    }
}

/// Findings for one entry under `mcpServers`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServerReport {
    pub server: String,
    pub issues: Vec<ValidationIssue>,
}

impl ServerReport {
    pub fn outcome(&self) -> ValidationOutcome {
        ValidationOutcome::from_issues(&self.issues)
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.issues.iter().filter(|i| i.severity == Severity::Warning)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationReport {
    /// Problems with the document itself, before any server is looked at
    pub document_issues: Vec<ValidationIssue>,
    pub servers: Vec<ServerReport>,
}

impl ValidationReport {
    pub fn outcome(&self) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::from_issues(&self.document_issues);
        for server in &self.servers {
            use ValidationOutcome::{Fail, PassWithWarnings};
            outcome = match (outcome, server.outcome()) {
                (Fail, _) | (_, Fail) => Fail,
                (PassWithWarnings, _) | (_, PassWithWarnings) => PassWithWarnings,
                _ => ValidationOutcome::Pass,
            };
        }
        outcome
    }

    pub fn error_count(&self) -> usize {
        self.document_issues
            .iter()
            .chain(self.servers.iter().flat_map(|s| &s.issues))
            .filter(|i| i.severity == Severity::Error)
            .count()
    }
}

/// Which part of an entry holds the launch command
struct Launch<'a> {
    transport: TransportKind,
    block: &'a Map<String, Value>,
}

/// Checks generated configs, optionally against the server's manifest
#[derive(Debug, Clone, Default)]
pub struct ManifestValidator {
    metadata: Option<ServerMetadata>,
}

impl ManifestValidator {
    pub fn new(metadata: Option<ServerMetadata>) -> Self {
        Self { metadata }
    }

    /// Read and validate a config file
    pub fn validate_file(&self, path: &Path) -> GenResult<ValidationReport> {
        let unreadable = |reason: String| GenError::ConfigUnreadable {
            path: path.to_path_buf(),
            reason,
        };
        let content = std::fs::read_to_string(path).map_err(|e| unreadable(e.to_string()))?;
        let document: Value =
            serde_json::from_str(&content).map_err(|e| unreadable(e.to_string()))?;
        Ok(self.validate_document(&document))
    }

    pub fn validate_document(&self, document: &Value) -> ValidationReport {
        let mut report = ValidationReport::default();

        let Some(servers) = document.get("mcpServers").and_then(Value::as_object) else {
            report
                .document_issues
                .push(ValidationIssue::error("missing 'mcpServers' object"));
            return report;
        };

        for (key, entry) in servers {
            report.servers.push(ServerReport {
                server: key.clone(),
                issues: self.validate_server(key, entry),
            });
        }

        report
    }

    fn validate_server(&self, key: &str, entry: &Value) -> Vec<ValidationIssue> {
        let mut issues = Vec::new();

        let Some(entry) = entry.as_object() else {
            issues.push(ValidationIssue::error("server entry must be an object"));
            return issues;
        };

        let launch = structural_checks(entry, &mut issues);

        if issues.iter().any(|i| i.severity == Severity::Error) {
            return issues;
        }

        let Some(metadata) = self
            .metadata
            .as_ref()
            .filter(|m| m.server_key() == key || m.name == key)
        else {
            issues.push(ValidationIssue::warning(format!(
                "no manifest metadata for '{key}'; environment and arguments are unverified"
            )));
            return issues;
        };

        let Some(launch) = launch else {
            return issues;
        };

        let Some(package) = metadata
            .package_for(launch.transport)
            .or_else(|| metadata.packages.first())
        else {
            issues.push(ValidationIssue::warning(format!(
                "manifest for '{key}' declares no packages; \
                 environment and arguments are unverified"
            )));
            return issues;
        };

        check_required_env(package, launch.block, &mut issues);
        check_arguments(package, &launch, &mut issues);
        issues
    }
}

fn is_http_entry(entry: &Map<String, Value>) -> bool {
    match entry.get("type").and_then(Value::as_str) {
        Some(kind) => matches!(kind, "http" | "streamable-http" | "sse"),
        None => entry.contains_key("url"),
    }
}

fn check_launch_block(block: &Map<String, Value>, at: &str, issues: &mut Vec<ValidationIssue>) {
    if !block.get("command").is_some_and(Value::is_string) {
        issues.push(ValidationIssue::error(format!("{at}missing 'command'")));
    }
    if block.get("args").is_some_and(|args| !args.is_array()) {
        issues.push(ValidationIssue::error(format!("{at}'args' must be an array")));
    }
    if block.get("env").is_some_and(|env| !env.is_object()) {
        issues.push(ValidationIssue::error(format!("{at}'env' must be an object")));
    }
}

fn structural_checks<'a>(
    entry: &'a Map<String, Value>,
    issues: &mut Vec<ValidationIssue>,
) -> Option<Launch<'a>> {
    if !is_http_entry(entry) {
        check_launch_block(entry, "", issues);
        return Some(Launch {
            transport: TransportKind::Stdio,
            block: entry,
        });
    }

    if !entry.get("url").is_some_and(Value::is_string) {
        issues.push(ValidationIssue::error("http server missing 'url'"));
    }

    match entry.get("start") {
        None => None,
        Some(Value::Object(start)) => {
            check_launch_block(start, "start: ", issues);
            Some(Launch {
                transport: TransportKind::StreamableHttp,
                block: start,
            })
        }
        Some(_) => {
            issues.push(ValidationIssue::error("'start' must be an object"));
            None
        }
    }
}

fn string_map(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_object)
        .map(|env| {
            env.iter()
                .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                .collect()
        })
        .unwrap_or_default()
}

fn check_required_env(
    package: &PackageConfig,
    block: &Map<String, Value>,
    issues: &mut Vec<ValidationIssue>,
) {
    let env = string_map(block.get("env"));

    for variable in package.environment_variables.iter().filter(|v| v.is_required) {
        if !should_include(variable, &env) {
            continue;
        }
        match env.get(&variable.name) {
            None => issues.push(ValidationIssue::warning(format!(
                "required variable {} is not set",
                variable.name
            ))),
            Some(value) if is_placeholder(value) => issues.push(ValidationIssue::warning(format!(
                "required variable {} is still a placeholder ({value})",
                variable.name
            ))),
            Some(_) => {}
        }
    }
}

fn check_arguments(
    package: &PackageConfig,
    launch: &Launch<'_>,
    issues: &mut Vec<ValidationIssue>,
) {
    let Some(args) = launch.block.get("args").and_then(Value::as_array) else {
        return;
    };

    for flag in args
        .iter()
        .filter_map(Value::as_str)
        .filter_map(|arg| arg.strip_prefix("--"))
    {
        let name = flag.split('=').next().unwrap_or(flag);
        if launch.transport == TransportKind::StreamableHttp && name == "port" {
            continue;
        }
        if !package.declares_argument(name) {
            issues.push(ValidationIssue::warning(format!(
                "unknown argument --{name}; regenerate the config to pick up the current manifest"
            )));
        }
    }
}
