use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use console::{style, Emoji};
use mcpgen::env_resolver::ProcessEnvironment;
use mcpgen::errors::GenError;
use mcpgen::generator::{load_metadata, GenerateOptions, GenerationReport, Generator};
use mcpgen::manifest::ManifestLoader;
use mcpgen::prompt::{InquirePrompter, NonInteractive, Prompter};
use mcpgen::schema::{HttpSchemaFetcher, JsonSchemaValidator, SchemaCache, DEFAULT_SCHEMA_URL};
use mcpgen::server_config::{InvocationMode, RuntimeOptions};
use mcpgen::validate::{ManifestValidator, ValidationOutcome, ValidationReport};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

static CHECK: Emoji<'_, '_> = Emoji("✅ ", "");
static CROSS: Emoji<'_, '_> = Emoji("❌ ", "x ");
static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");

/// MCP server configuration generator
///
/// Expands a server manifest (server.json) into ready-to-use `.mcp.*.json`
/// client configurations, and checks existing configurations against it.
#[derive(Parser)]
#[command(name = "mcpgen")]
#[command(author, version, about)]
struct Cli {
    /// Log at debug level (RUST_LOG takes precedence)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate configuration files from a server manifest
    Generate(GenerateArgs),
    /// Validate a generated configuration file
    Validate(ValidateArgs),
}

#[derive(Args)]
struct SchemaArgs {
    /// Where to fetch the manifest schema from
    #[arg(long, env = "MCPGEN_SCHEMA_URL", default_value = DEFAULT_SCHEMA_URL)]
    schema_url: String,

    /// Use the bundled schema without touching the network
    #[arg(long)]
    offline: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// Manifest path; defaults to server.json in the current or parent directory
    #[arg(long)]
    manifest: Option<PathBuf>,

    /// Directory the configuration files are written to
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    /// Transport to generate (stdio or http); repeatable
    #[arg(short, long = "transport")]
    transports: Vec<String>,

    /// No dimensions, first choices, no prompts
    #[arg(long, conflicts_with = "matrix")]
    quick: bool,

    /// Every matrix dimension and every configuration, no selection prompts
    #[arg(long)]
    matrix: bool,

    /// Print the configurations as a JSON array instead of writing files
    #[arg(long)]
    json: bool,

    /// Host used for HTTP transport URLs
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Port used for HTTP transport URLs
    #[arg(short = 'P', long, default_value = "3000")]
    port: u16,

    /// Run from a local package checkout instead of the published package
    #[arg(long = "source", value_name = "PACKAGE_DIR")]
    source: Option<PathBuf>,

    /// Script to run with node in source mode
    #[arg(long = "bin", value_name = "PATH")]
    bin: Option<PathBuf>,

    /// Never prompt and overwrite existing files
    #[arg(short, long)]
    yes: bool,

    #[command(flatten)]
    schema: SchemaArgs,
}

#[derive(Args)]
struct ValidateArgs {
    /// Configuration file to check
    config: PathBuf,

    /// Manifest to check against; defaults to discovery next to the config
    #[arg(long)]
    manifest: Option<PathBuf>,

    #[command(flatten)]
    schema: SchemaArgs,
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn schema_cache(args: &SchemaArgs) -> Result<SchemaCache> {
    if args.offline {
        return Ok(SchemaCache::offline());
    }
    let fetcher = HttpSchemaFetcher::new(&args.schema_url, Duration::from_secs(10))?;
    Ok(SchemaCache::new(Box::new(fetcher)))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Generate(args) => generate(args).await,
        Command::Validate(args) => validate(args).await,
    };

    match result {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            let message = match e.downcast_ref::<GenError>() {
                Some(gen_error) => gen_error.user_message(),
                None => format!("{e:#}"),
            };
            eprintln!("{}{}", CROSS, style(message).red());
            std::process::exit(1);
        }
    }
}

async fn generate(args: GenerateArgs) -> Result<bool> {
    let cwd = std::env::current_dir()?;
    let manifest_path = ManifestLoader::default().resolve(args.manifest.as_deref(), &cwd)?;
    let cache = schema_cache(&args.schema)?;
    let metadata = load_metadata(&manifest_path, &cache, &JsonSchemaValidator).await?;

    let mode = if args.source.is_some() || args.bin.is_some() {
        InvocationMode::Source {
            package_dir: args.source,
            bin_path: args.bin,
        }
    } else {
        InvocationMode::Installed
    };

    let options = GenerateOptions {
        output_dir: args.output_dir,
        transports: args.transports,
        quick: args.quick,
        matrix: args.matrix,
        json: args.json,
        force: args.yes,
        runtime: RuntimeOptions {
            mode,
            host: args.host,
            port: args.port,
        },
    };

    let interactive = InquirePrompter::detect();
    let prompter: &dyn Prompter = if args.yes || args.json || !interactive.is_interactive() {
        &NonInteractive
    } else {
        &interactive
    };

    let report = Generator::new(&metadata, prompter, &ProcessEnvironment)
        .run(&options)
        .await?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report.emitted)?);
        print_warnings(&report, true);
        return Ok(report.failures.is_empty());
    }

    print_generation(&report);
    Ok(report.failures.is_empty())
}

fn print_warnings(report: &GenerationReport, to_stderr: bool) {
    for warning in &report.warnings {
        let line = format!("{}{}", WARN, style(warning).yellow());
        if to_stderr {
            eprintln!("{line}");
        } else {
            println!("{line}");
        }
    }
}

fn print_generation(report: &GenerationReport) {
    for path in &report.generated {
        println!("{}{}", CHECK, style(path.display()).green());
    }
    for path in &report.skipped {
        println!("  {} {}", style("skipped").dim(), path.display());
    }
    for failure in &report.failures {
        println!(
            "{}{} {}",
            CROSS,
            style(&failure.file_name).red(),
            style(&failure.reason).dim()
        );
    }
    print_warnings(report, false);

    println!();
    println!(
        "{}",
        style(format!("Generated {} configuration file(s)", report.count())).bold()
    );
}

async fn validate(args: ValidateArgs) -> Result<bool> {
    let loader = ManifestLoader::default();
    let start = args
        .config
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(PathBuf::from)
        .unwrap_or(std::env::current_dir()?);

    let metadata = match loader.resolve(args.manifest.as_deref(), &start) {
        Ok(path) => {
            let cache = schema_cache(&args.schema)?;
            Some(load_metadata(&path, &cache, &JsonSchemaValidator).await?)
        }
        Err(GenError::ManifestNotFound { .. }) if args.manifest.is_none() => {
            tracing::info!("no manifest found; metadata checks are skipped");
            None
        }
        Err(e) => return Err(e.into()),
    };

    let report = ManifestValidator::new(metadata).validate_file(&args.config)?;
    print_validation(&args.config, &report);
    Ok(report.outcome() != ValidationOutcome::Fail)
}

fn print_validation(config: &std::path::Path, report: &ValidationReport) {
    println!("{}", style(config.display()).bold());

    for issue in &report.document_issues {
        println!("  {}{}", CROSS, style(&issue.message).red());
    }

    for server in &report.servers {
        let marker = match server.outcome() {
            ValidationOutcome::Pass => CHECK,
            ValidationOutcome::PassWithWarnings => WARN,
            ValidationOutcome::Fail => CROSS,
        };
        println!("  {}{}", marker, style(&server.server).bold());
        for issue in server.errors() {
            println!("      {}", style(&issue.message).red());
        }
        for issue in server.warnings() {
            println!("      {}", style(&issue.message).yellow());
        }
    }

    let summary = match report.outcome() {
        ValidationOutcome::Pass => style("valid".to_string()).green(),
        ValidationOutcome::PassWithWarnings => style("valid with warnings".to_string()).yellow(),
        ValidationOutcome::Fail => {
            style(format!("invalid ({} error(s))", report.error_count())).red()
        }
    };
    println!();
    println!("{summary}");
}
