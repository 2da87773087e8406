//! End-to-end generation run: dimensions, combinations, pair selection, then
//! one resolved config per selected (combination, transport) pair.

use crate::choices::{create_config_choices, filter_config_choices, transport_tag, ConfigChoice};
use crate::combinations::{
    dimensions_for_package, generate_conditional_combinations, generate_matrix_combinations,
    Combination, Dimension, DimensionKind,
};
use crate::env_resolver::{EnvVarResolver, Environment, ResolveOptions};
use crate::errors::{GenError, GenResult};
use crate::manifest::{
    EnvVarMetadata, ManifestLoader, PackageConfig, ServerMetadata, TransportKind,
};
use crate::prompt::Prompter;
use crate::schema::{validate_manifest, MetadataValidator, SchemaCache};
use crate::server_config::{RuntimeOptions, ServerConfigBuilder};
use crate::writer::{
    config_document, config_file_name, ConfigFileWriter, ConfigObjectEmitter, EmittedConfig,
    WriteOutcome,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Options for one generation run
#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub output_dir: PathBuf,
    /// User-facing transport names ("stdio", "http"); empty means ask or take all
    pub transports: Vec<String>,
    pub quick: bool,
    pub matrix: bool,
    /// Emit objects instead of writing files
    pub json: bool,
    /// Overwrite existing files without asking
    pub force: bool,
    pub runtime: RuntimeOptions,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            transports: Vec::new(),
            quick: false,
            matrix: false,
            json: false,
            force: false,
            runtime: RuntimeOptions::default(),
        }
    }
}

/// How dimensions and pairs are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// No dimensions, first choices, no prompts
    Quick,
    /// Every matrix dimension, conditional generation, every pair
    Matrix,
    /// The user picks dimensions, values and pairs
    Interactive,
}

impl GenerationMode {
    pub fn detect(options: &GenerateOptions, interactive: bool) -> Self {
        if options.quick {
            GenerationMode::Quick
        } else if options.matrix || !interactive {
            GenerationMode::Matrix
        } else {
            GenerationMode::Interactive
        }
    }
}

/// A write that failed without aborting the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileFailure {
    pub file_name: String,
    pub reason: String,
}

/// What a run produced
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub generated: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub failures: Vec<FileFailure>,
    pub warnings: Vec<String>,
    pub emitted: Vec<EmittedConfig>,
}

impl GenerationReport {
    /// Files written, or objects emitted in JSON mode
    pub fn count(&self) -> usize {
        self.generated.len() + self.emitted.len()
    }
}

/// Read a manifest and validate it against the cached schema
pub async fn load_metadata(
    path: &Path,
    cache: &SchemaCache,
    validator: &dyn MetadataValidator,
) -> GenResult<ServerMetadata> {
    let document = ManifestLoader::default().read_document(path)?;
    let label = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    validate_manifest(&document, &label, cache, validator).await
}

/// Drives one generation run over a validated manifest
pub struct Generator<'a> {
    metadata: &'a ServerMetadata,
    prompter: &'a dyn Prompter,
    environment: &'a dyn Environment,
}

impl<'a> Generator<'a> {
    pub fn new(
        metadata: &'a ServerMetadata,
        prompter: &'a dyn Prompter,
        environment: &'a dyn Environment,
    ) -> Self {
        Self {
            metadata,
            prompter,
            environment,
        }
    }

    pub async fn run(&self, options: &GenerateOptions) -> GenResult<GenerationReport> {
        let mode = GenerationMode::detect(options, self.prompter.is_interactive());
        tracing::info!(server = %self.metadata.name, ?mode, "generating configs");

        let transports = self.select_transports(options, mode).await?;
        let packages = self.packages_for(&transports)?;

        let combinations = self.combinations(mode, &packages).await?;
        let transport_names: Vec<String> = transports
            .iter()
            .map(|t| t.short_name().to_string())
            .collect();
        let choices = create_config_choices(&combinations, &transport_names);
        let selected = self.select_pairs(mode, choices).await?;

        let resolve_options = ResolveOptions {
            quick: mode == GenerationMode::Quick,
            template_vars: Default::default(),
            optional_vars_to_prompt: self
                .optional_vars_to_prompt(mode, &packages, &selected)
                .await?,
        };

        let resolver = EnvVarResolver::new(self.prompter, self.environment);
        let builder = ServerConfigBuilder::new(self.metadata, resolver, &options.runtime);
        let writer = ConfigFileWriter::new(&options.output_dir, self.prompter).force(options.force);
        let mut emitter = ConfigObjectEmitter::new();
        let mut report = GenerationReport::default();

        for choice in &selected {
            let kind = TransportKind::from_tag(&choice.transport)?;
            let package = self.package(kind)?;

            let mut combination = choice.combination.clone();
            combination.attach_static(package);

            let built = builder
                .build(&combination, &choice.transport, &resolve_options)
                .await?;
            report.warnings.extend(built.warnings);

            let document = config_document(self.metadata.server_key(), &built.config)?;
            if options.json {
                emitter.emit(&combination.name, kind, document);
                continue;
            }

            let file_name = config_file_name(&combination.name, kind);
            match writer.write(&file_name, &document).await {
                Ok(WriteOutcome::Written(path)) => report.generated.push(path),
                Ok(WriteOutcome::Skipped(path)) => report.skipped.push(path),
                Err(e) if !e.is_fatal() => {
                    tracing::error!(file = %file_name, error = %e, "failed to write config");
                    report.failures.push(FileFailure {
                        file_name,
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }

        report.emitted = emitter.into_inner();
        tracing::info!(count = report.count(), "generation finished");
        Ok(report)
    }

    fn package(&self, kind: TransportKind) -> GenResult<&'a PackageConfig> {
        self.metadata
            .package_for(kind)
            .ok_or_else(|| GenError::MissingTransportPackage {
                transport: kind.tag().to_string(),
            })
    }

    fn packages_for(&self, transports: &[TransportKind]) -> GenResult<Vec<&'a PackageConfig>> {
        transports.iter().map(|kind| self.package(*kind)).collect()
    }

    async fn select_transports(
        &self,
        options: &GenerateOptions,
        mode: GenerationMode,
    ) -> GenResult<Vec<TransportKind>> {
        if !options.transports.is_empty() {
            let mut transports = Vec::new();
            for name in &options.transports {
                let kind = TransportKind::from_tag(transport_tag(name))?;
                self.package(kind)?;
                if !transports.contains(&kind) {
                    transports.push(kind);
                }
            }
            return Ok(transports);
        }

        let available = self.metadata.available_transports();
        if available.is_empty() {
            return Err(GenError::InvalidSelection {
                reason: "the manifest packages no supported transport".to_string(),
            });
        }
        if mode != GenerationMode::Interactive || available.len() == 1 {
            return Ok(available);
        }

        let labels = available.iter().map(|t| t.short_name().to_string()).collect();
        let picked = self
            .prompter
            .multi_select("Which transports should be generated?", labels, true)
            .await?;
        let transports: Vec<TransportKind> = picked
            .into_iter()
            .filter_map(|index| available.get(index).copied())
            .collect();

        if transports.is_empty() {
            return Err(GenError::InvalidSelection {
                reason: "no transport selected".to_string(),
            });
        }
        Ok(transports)
    }

    async fn combinations(
        &self,
        mode: GenerationMode,
        packages: &[&PackageConfig],
    ) -> GenResult<Vec<Combination>> {
        match mode {
            GenerationMode::Quick => Ok(generate_matrix_combinations(&[])),
            GenerationMode::Matrix => Ok(generate_conditional_combinations(
                &collect_dimensions(packages, true),
                &collect_variables(packages),
            )),
            GenerationMode::Interactive => {
                let variables = collect_variables(packages);
                let dimensions = self
                    .pick_dimensions(collect_dimensions(packages, false), &variables)
                    .await?;
                Ok(generate_conditional_combinations(&dimensions, &variables))
            }
        }
    }

    async fn pick_dimensions(
        &self,
        available: Vec<Dimension>,
        variables: &[EnvVarMetadata],
    ) -> GenResult<Vec<Dimension>> {
        if available.is_empty() {
            return Ok(available);
        }

        let labels = available
            .iter()
            .map(|d| {
                let kind = match d.kind {
                    DimensionKind::Env => "env",
                    DimensionKind::Arg => "arg",
                };
                format!("{} ({kind}: {})", d.name, d.choices.join(", "))
            })
            .collect();
        let picked = self
            .prompter
            .multi_select(
                "Which settings should vary across the generated configs?",
                labels,
                false,
            )
            .await?;

        let mut chosen = Vec::new();
        for index in picked {
            let Some(dimension) = available.get(index) else {
                continue;
            };
            let mut dimension = dimension.clone();

            if dimension.is_discriminating() {
                let values = self
                    .prompter
                    .multi_select(
                        &format!("Values of {} to generate", dimension.name),
                        dimension.choices.clone(),
                        true,
                    )
                    .await?;
                let choices: Vec<String> = values
                    .into_iter()
                    .filter_map(|i| dimension.choices.get(i).cloned())
                    .collect();
                if choices.is_empty() {
                    return Err(GenError::InvalidSelection {
                        reason: format!("no value selected for {}", dimension.name),
                    });
                }
                dimension.choices = choices;
            }

            chosen.push(dimension);
        }

        let picked_names: BTreeSet<String> = chosen.iter().map(|d| d.name.clone()).collect();
        chosen.retain(|dimension| {
            let Some(variable) = variables
                .iter()
                .find(|v| dimension.kind == DimensionKind::Env && v.name == dimension.name)
            else {
                return true;
            };
            let satisfied = variable
                .depends_on
                .iter()
                .flatten()
                .all(|(target, _)| picked_names.contains(target));
            if !satisfied {
                tracing::warn!(
                    dimension = %dimension.name,
                    "dropped: the settings it depends on were not selected"
                );
            }
            satisfied
        });

        Ok(chosen)
    }

    async fn select_pairs(
        &self,
        mode: GenerationMode,
        choices: Vec<ConfigChoice>,
    ) -> GenResult<Vec<ConfigChoice>> {
        if mode != GenerationMode::Interactive || choices.len() <= 1 {
            return Ok(choices);
        }

        let labels: Vec<String> = choices.iter().map(|c| c.label.clone()).collect();
        let picked = self
            .prompter
            .multi_select("Which configurations should be generated?", labels.clone(), true)
            .await?;
        let selected_labels: Vec<String> = picked
            .into_iter()
            .filter_map(|index| labels.get(index).cloned())
            .collect();

        let selected = filter_config_choices(&choices, &selected_labels);
        if selected.is_empty() {
            return Err(GenError::InvalidSelection {
                reason: "no configuration selected".to_string(),
            });
        }
        Ok(selected)
    }

    /// Asked once per run so each pair does not repeat the question
    async fn optional_vars_to_prompt(
        &self,
        mode: GenerationMode,
        packages: &[&PackageConfig],
        selected: &[ConfigChoice],
    ) -> GenResult<Option<BTreeSet<String>>> {
        if mode != GenerationMode::Interactive {
            return Ok(None);
        }

        let optional: Vec<String> = collect_variables(packages)
            .into_iter()
            .filter(|v| !v.is_required && v.declared_default().is_none())
            .filter(|v| {
                !selected
                    .iter()
                    .any(|c| c.combination.dimension_values.contains_key(&v.name))
            })
            .map(|v| v.name)
            .collect();
        if optional.is_empty() {
            return Ok(None);
        }

        let picked = self
            .prompter
            .multi_select(
                "Which optional variables do you want to set?",
                optional.clone(),
                false,
            )
            .await?;
        Ok(Some(
            picked
                .into_iter()
                .filter_map(|index| optional.get(index).cloned())
                .collect(),
        ))
    }
}

/// Dimensions of every package, first declaration of a name wins
fn collect_dimensions(packages: &[&PackageConfig], matrix_only: bool) -> Vec<Dimension> {
    let mut dimensions: Vec<Dimension> = Vec::new();
    for package in packages {
        for dimension in dimensions_for_package(package, matrix_only) {
            if !dimensions.iter().any(|d| d.name == dimension.name) {
                dimensions.push(dimension);
            }
        }
    }
    dimensions
}

fn collect_variables(packages: &[&PackageConfig]) -> Vec<EnvVarMetadata> {
    let mut variables: Vec<EnvVarMetadata> = Vec::new();
    for package in packages {
        for variable in &package.environment_variables {
            if !variables.iter().any(|v| v.name == variable.name) {
                variables.push(variable.clone());
            }
        }
    }
    variables
}
