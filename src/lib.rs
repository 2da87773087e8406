// Error taxonomy shared by every stage
pub mod errors;

// Manifest data model and discovery
pub mod manifest;
pub mod schema;

// Combination engine
pub mod choices;
pub mod combinations;
pub mod dependency;

// Value resolution and prompting
pub mod env_resolver;
pub mod prompt;

// Output assembly
pub mod server_config;
pub mod writer;

// Generation run and validation of generated configs
pub mod generator;
pub mod validate;

// Re-export key types for convenience
pub use combinations::{Combination, Dimension, DimensionKind};
pub use errors::{GenError, GenResult, Severity};
pub use generator::{GenerateOptions, GenerationReport, Generator};
pub use manifest::{ManifestLoader, ServerMetadata, TransportKind};
pub use server_config::{RuntimeOptions, ServerConfig};
pub use validate::{ManifestValidator, ValidationOutcome, ValidationReport};
