use crate::errors::{GenError, GenResult};
use crate::manifest::TransportKind;
use crate::prompt::Prompter;
use crate::server_config::ServerConfig;
use serde::Serialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// `.mcp.{combination}-{transport}.json`
pub fn config_file_name(combination_name: &str, transport: TransportKind) -> String {
    format!(".mcp.{}-{}.json", combination_name, transport.short_name())
}

/// Wrap one server entry in an `mcpServers` document
pub fn config_document(server_key: &str, config: &ServerConfig) -> GenResult<Value> {
    let entry = serde_json::to_value(config)?;
    Ok(json!({ "mcpServers": { server_key: entry } }))
}

/// What happened to one target file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    Written(PathBuf),
    /// Existing file kept because the user declined the overwrite
    Skipped(PathBuf),
}

/// Writes generated documents into an output directory
pub struct ConfigFileWriter<'a> {
    output_dir: PathBuf,
    prompter: &'a dyn Prompter,
    force: bool,
}

impl<'a> ConfigFileWriter<'a> {
    pub fn new(output_dir: impl Into<PathBuf>, prompter: &'a dyn Prompter) -> Self {
        Self {
            output_dir: output_dir.into(),
            prompter,
            force: false,
        }
    }

    /// Overwrite existing files without asking
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `document` as 2-space JSON with a trailing newline.
    ///
    /// An existing file is only replaced after confirmation when interactive.
    pub async fn write(&self, file_name: &str, document: &Value) -> GenResult<WriteOutcome> {
        let path = self.output_dir.join(file_name);

        if path.exists() && !self.force && self.prompter.is_interactive() {
            let overwrite = self
                .prompter
                .confirm(&format!("{} already exists. Overwrite?", path.display()), false)
                .await?;
            if !overwrite {
                tracing::info!(path = %path.display(), "kept existing file");
                return Ok(WriteOutcome::Skipped(path));
            }
        }

        let write_failed = |reason: String| GenError::WriteFailed {
            path: path.clone(),
            reason,
        };
        std::fs::create_dir_all(&self.output_dir).map_err(|e| write_failed(e.to_string()))?;

        let mut content = serde_json::to_string_pretty(document)?;
        content.push('\n');
        std::fs::write(&path, content).map_err(|e| write_failed(e.to_string()))?;

        tracing::debug!(path = %path.display(), "wrote config");
        Ok(WriteOutcome::Written(path))
    }
}

/// One configuration emitted as an in-memory object
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EmittedConfig {
    pub combination: String,
    pub transport: String,
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub config: Value,
}

/// Collects generated documents instead of writing them
#[derive(Debug, Clone, Default)]
pub struct ConfigObjectEmitter {
    emitted: Vec<EmittedConfig>,
}

impl ConfigObjectEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn emit(&mut self, combination: &str, transport: TransportKind, document: Value) {
        self.emitted.push(EmittedConfig {
            combination: combination.to_string(),
            transport: transport.short_name().to_string(),
            file_name: config_file_name(combination, transport),
            config: document,
        });
    }

    pub fn emitted(&self) -> &[EmittedConfig] {
        &self.emitted
    }

    pub fn into_inner(self) -> Vec<EmittedConfig> {
        self.emitted
    }

    /// The collected configs as a pretty JSON array
    pub fn to_json(&self) -> GenResult<String> {
        Ok(serde_json::to_string_pretty(&self.emitted)?)
    }
}
