//! Manifest schema lifecycle and validation.
//!
//! [`SchemaCache`] hands out the manifest schema: the cached copy if present,
//! otherwise whatever the injected [`SchemaFetcher`] returns, otherwise the
//! schema bundled into the binary. Validation itself sits behind
//! [`MetadataValidator`]; [`JsonSchemaValidator`] is the built-in engine.

use crate::errors::{GenError, GenResult};
use crate::manifest::{ServerMetadata, TransportKind};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

pub const DEFAULT_SCHEMA_URL: &str =
    "https://static.modelcontextprotocol.io/schemas/2025-07-09/server.schema.json";

const BUNDLED_SCHEMA: &str = include_str!("../schemas/server.schema.json");

/// Where the cached schema came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaOrigin {
    Fetched,
    Bundled,
}

#[async_trait]
pub trait SchemaFetcher: Send + Sync {
    async fn fetch(&self) -> GenResult<Value>;
}

/// Fetches the schema over HTTP
pub struct HttpSchemaFetcher {
    client: reqwest::Client,
    url: String,
}

impl HttpSchemaFetcher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> GenResult<Self> {
        let url = url.into();
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenError::SchemaFetchFailed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl SchemaFetcher for HttpSchemaFetcher {
    async fn fetch(&self) -> GenResult<Value> {
        let failed = |e: reqwest::Error| GenError::SchemaFetchFailed {
            url: self.url.clone(),
            reason: e.to_string(),
        };

        self.client
            .get(&self.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(failed)?
            .json::<Value>()
            .await
            .map_err(failed)
    }
}

/// Get-or-fetch-or-fallback holder for the manifest schema
pub struct SchemaCache {
    fetcher: Option<Box<dyn SchemaFetcher>>,
    cached: RwLock<Option<(Arc<Value>, SchemaOrigin)>>,
}

impl SchemaCache {
    pub fn new(fetcher: Box<dyn SchemaFetcher>) -> Self {
        Self {
            fetcher: Some(fetcher),
            cached: RwLock::new(None),
        }
    }

    /// Never touches the network
    pub fn offline() -> Self {
        Self {
            fetcher: None,
            cached: RwLock::new(None),
        }
    }

    pub fn bundled() -> GenResult<Value> {
        Ok(serde_json::from_str(BUNDLED_SCHEMA)?)
    }

    pub async fn get(&self) -> GenResult<Arc<Value>> {
        self.get_with_origin().await.map(|(schema, _)| schema)
    }

    pub async fn get_with_origin(&self) -> GenResult<(Arc<Value>, SchemaOrigin)> {
        if let Some((schema, origin)) = self.cached.read().await.as_ref() {
            return Ok((schema.clone(), *origin));
        }

        let mut cached = self.cached.write().await;
        if let Some((schema, origin)) = cached.as_ref() {
            return Ok((schema.clone(), *origin));
        }

        let fetched = match &self.fetcher {
            Some(fetcher) => match fetcher.fetch().await {
                Ok(schema) => Some(schema),
                Err(e) => {
                    tracing::warn!(error = %e, "schema fetch failed, using bundled schema");
                    None
                }
            },
            None => None,
        };

        let entry = match fetched {
            Some(schema) => (Arc::new(schema), SchemaOrigin::Fetched),
            None => (Arc::new(Self::bundled()?), SchemaOrigin::Bundled),
        };
        *cached = Some(entry.clone());
        Ok(entry)
    }

    /// Drop the cached schema; the next `get` fetches again
    pub async fn invalidate(&self) {
        *self.cached.write().await = None;
    }
}

/// Outcome of validating one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaReport {
    pub valid: bool,
    pub errors: Vec<String>,
}

impl SchemaReport {
    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }
}

pub trait MetadataValidator: Send + Sync {
    fn validate(&self, schema: &Value, document: &Value) -> SchemaReport;
}

/// Validates against the JSON Schema with `jsonschema`, then checks the typed
/// shape of [`ServerMetadata`] and the generator rules a schema cannot express.
///
/// A schema that does not compile (for example one with remote `$ref`s) is
/// replaced by the bundled schema.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSchemaValidator;

impl JsonSchemaValidator {
    fn compile(schema: &Value) -> Result<jsonschema::Validator, String> {
        match jsonschema::validator_for(schema) {
            Ok(validator) => Ok(validator),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "manifest schema does not compile, using bundled schema"
                );
                let bundled = SchemaCache::bundled().map_err(|e| e.to_string())?;
                jsonschema::validator_for(&bundled)
                    .map_err(|e| format!("bundled manifest schema is invalid: {e}"))
            }
        }
    }
}

impl MetadataValidator for JsonSchemaValidator {
    fn validate(&self, schema: &Value, document: &Value) -> SchemaReport {
        if !document.is_object() {
            return SchemaReport::from_errors(vec!["manifest must be a JSON object".to_string()]);
        }

        let validator = match Self::compile(schema) {
            Ok(validator) => validator,
            Err(e) => return SchemaReport::from_errors(vec![e]),
        };

        let errors: Vec<String> = validator
            .iter_errors(document)
            .map(|error| {
                let path = error.instance_path.to_string();
                let path = if path.is_empty() { "(root)" } else { path.as_str() };
                format!("{path}: {error}")
            })
            .collect();
        if !errors.is_empty() {
            return SchemaReport::from_errors(errors);
        }

        match ServerMetadata::from_document(document) {
            Ok(metadata) => SchemaReport::from_errors(semantic_errors(&metadata)),
            Err(e) => SchemaReport::from_errors(vec![e.to_string()]),
        }
    }
}

/// Rules on top of the document shape.
///
/// `dependsOn` may only target primary variables of the same package, which
/// keeps conditional generation to a single level.
pub fn semantic_errors(metadata: &ServerMetadata) -> Vec<String> {
    let mut errors = Vec::new();

    if metadata.packages.is_empty() {
        errors.push("manifest declares no packages".to_string());
    }

    for (index, package) in metadata.packages.iter().enumerate() {
        let at = format!("packages[{index}] ({})", package.identifier);

        if TransportKind::from_tag(&package.transport.kind).is_err() {
            errors.push(format!(
                "{at}: unsupported transport type '{}'",
                package.transport.kind
            ));
        }

        let mut seen = BTreeSet::new();
        for variable in &package.environment_variables {
            if !seen.insert(variable.name.as_str()) {
                errors.push(format!(
                    "{at}: duplicate environment variable '{}'",
                    variable.name
                ));
            }
            if variable.choices.as_ref().is_some_and(|c| c.is_empty()) {
                errors.push(format!(
                    "{at}: '{}' declares an empty choice list",
                    variable.name
                ));
            }

            for (target, allowed) in variable.depends_on.iter().flatten() {
                match package.env_var(target) {
                    None if package.declares_argument(target) => {}
                    None => errors.push(format!(
                        "{at}: '{}' depends on unknown variable '{target}'",
                        variable.name
                    )),
                    Some(dependency) if dependency.is_conditional() => errors.push(format!(
                        "{at}: '{}' depends on '{target}', which is itself conditional",
                        variable.name
                    )),
                    Some(dependency) => {
                        let choices = dependency.choices();
                        let unknown = allowed
                            .iter()
                            .filter(|v| !choices.is_empty() && !choices.contains(v));
                        for value in unknown {
                            errors.push(format!(
                                "{at}: '{}' depends on '{target}={value}', \
                                 which is not one of its choices",
                                variable.name
                            ));
                        }
                    }
                }
            }
        }

        for argument in &package.package_arguments {
            if argument.kind != "named" {
                errors.push(format!(
                    "{at}: argument '{}' has type '{}'; only named arguments are supported",
                    argument.name, argument.kind
                ));
            }
            if argument.choices.as_ref().is_some_and(|c| c.is_empty()) {
                errors.push(format!(
                    "{at}: argument '{}' declares an empty choice list",
                    argument.name
                ));
            }
        }
    }

    errors
}

/// Validate a manifest document and return its typed form.
///
/// Every problem is reported at once in [`GenError::InvalidManifest`].
pub async fn validate_manifest(
    document: &Value,
    label: &str,
    cache: &SchemaCache,
    validator: &dyn MetadataValidator,
) -> GenResult<ServerMetadata> {
    let schema = cache.get().await?;
    let report = validator.validate(&schema, document);

    if !report.valid {
        return Err(GenError::InvalidManifest {
            label: label.to_string(),
            messages: report.errors,
        });
    }

    Ok(ServerMetadata::from_document(document)?)
}
