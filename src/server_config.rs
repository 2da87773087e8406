use crate::combinations::Combination;
use crate::dependency::should_include;
use crate::env_resolver::{substitute_template, EnvVarResolver, ResolveOptions};
use crate::errors::{GenError, GenResult};
use crate::manifest::{EnvVarMetadata, PackageConfig, ServerMetadata, TransportKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn http_type() -> String {
    "http".to_string()
}

/// Local process invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdioServerConfig {
    pub command: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
}

/// HTTP endpoint, optionally with the local process that serves it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpServerConfig {
    #[serde(rename = "type", default = "http_type")]
    pub kind: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<StdioServerConfig>,
}

/// One generated `mcpServers` entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerConfig {
    Http(HttpServerConfig),
    Stdio(StdioServerConfig),
}

/// How the server process is launched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum InvocationMode {
    /// `npx -y <package>`
    #[default]
    Installed,
    /// `node <bin>` from a local checkout
    Source {
        package_dir: Option<PathBuf>,
        bin_path: Option<PathBuf>,
    },
}

/// Runtime settings shared by every configuration in a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub mode: InvocationMode,
    pub host: String,
    pub port: u16,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            mode: InvocationMode::Installed,
            host: "localhost".to_string(),
            port: 3000,
        }
    }
}

impl RuntimeOptions {
    pub fn http_url(&self) -> String {
        format!("http://{}:{}/mcp", self.host, self.port)
    }

    /// `{host}` / `{port}` substitutions offered to defaults on HTTP transport
    pub fn template_vars(&self) -> BTreeMap<String, String> {
        [
            ("host".to_string(), self.host.clone()),
            ("port".to_string(), self.port.to_string()),
        ]
        .into_iter()
        .collect()
    }
}

/// A built configuration and the warnings raised while resolving it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltConfig {
    pub config: ServerConfig,
    pub warnings: Vec<String>,
}

/// Locate the executable for source mode.
///
/// An absolute `bin_path` stands alone; a relative one is joined to the
/// package directory; otherwise the `bin` field of `package.json` is used.
pub fn resolve_bin_path(package_dir: Option<&Path>, bin_path: Option<&Path>) -> GenResult<PathBuf> {
    if let Some(bin) = bin_path.filter(|b| b.is_absolute()) {
        return Ok(bin.to_path_buf());
    }

    let package_dir = package_dir.ok_or_else(|| GenError::SourceModeUnresolved {
        missing: "a package directory".to_string(),
    })?;

    if let Some(bin) = bin_path {
        return Ok(package_dir.join(bin));
    }

    let manifest_path = package_dir.join("package.json");
    let content = std::fs::read_to_string(&manifest_path).map_err(|e| {
        GenError::SourceModeUnresolved {
            missing: format!("a readable {} ({e})", manifest_path.display()),
        }
    })?;
    let package_json: Value = serde_json::from_str(&content)?;

    let bin = match package_json.get("bin") {
        Some(Value::String(path)) => Some(path.clone()),
        Some(Value::Object(entries)) => entries
            .values()
            .find_map(|v| v.as_str().map(str::to_string)),
        _ => None,
    };

    bin.map(|b| package_dir.join(b))
        .ok_or_else(|| GenError::SourceModeUnresolved {
            missing: format!("a \"bin\" entry in {}", manifest_path.display()),
        })
}

/// Command and leading args for the configured invocation mode
pub fn base_invocation(
    package: &PackageConfig,
    mode: &InvocationMode,
) -> GenResult<(String, Vec<String>)> {
    match mode {
        InvocationMode::Installed => Ok((
            "npx".to_string(),
            vec!["-y".to_string(), package.identifier.clone()],
        )),
        InvocationMode::Source {
            package_dir,
            bin_path,
        } => {
            let bin = resolve_bin_path(package_dir.as_deref(), bin_path.as_deref())?;
            Ok(("node".to_string(), vec![bin.display().to_string()]))
        }
    }
}

/// Shape the final entry from already-resolved values.
///
/// `args` are appended as `--name value` pairs in the given order; HTTP
/// transport also gets `--port` unless an argument already sets it.
pub fn assemble(
    transport: TransportKind,
    package: &PackageConfig,
    env: BTreeMap<String, String>,
    args: &[(String, String)],
    runtime: &RuntimeOptions,
) -> GenResult<ServerConfig> {
    let (command, mut invocation) = base_invocation(package, &runtime.mode)?;

    for (name, value) in args {
        invocation.push(format!("--{name}"));
        invocation.push(value.clone());
    }

    let start = |invocation: Vec<String>| StdioServerConfig {
        command: command.clone(),
        args: invocation,
        env: env.clone(),
    };

    match transport {
        TransportKind::Stdio => Ok(ServerConfig::Stdio(start(invocation))),
        TransportKind::StreamableHttp => {
            if !args.iter().any(|(name, _)| name == "port") {
                invocation.push("--port".to_string());
                invocation.push(runtime.port.to_string());
            }
            Ok(ServerConfig::Http(HttpServerConfig {
                kind: http_type(),
                url: runtime.http_url(),
                start: Some(start(invocation)),
            }))
        }
    }
}

/// Assembles one server configuration per (combination, transport) pair
pub struct ServerConfigBuilder<'a> {
    metadata: &'a ServerMetadata,
    resolver: EnvVarResolver<'a>,
    runtime: &'a RuntimeOptions,
}

impl<'a> ServerConfigBuilder<'a> {
    pub fn new(
        metadata: &'a ServerMetadata,
        resolver: EnvVarResolver<'a>,
        runtime: &'a RuntimeOptions,
    ) -> Self {
        Self {
            metadata,
            resolver,
            runtime,
        }
    }

    /// Resolve and assemble the configuration for `combination` on `transport`.
    ///
    /// Variables are decided in two passes: first against the combination's
    /// dimension values, then against the values resolved in the first pass,
    /// so a variable depending on a non-dimension choice still follows it.
    pub async fn build(
        &self,
        combination: &Combination,
        transport: &str,
        options: &ResolveOptions,
    ) -> GenResult<BuiltConfig> {
        let kind = TransportKind::from_tag(transport)?;
        let package = self
            .metadata
            .package_for(kind)
            .ok_or_else(|| GenError::MissingTransportPackage {
                transport: transport.to_string(),
            })?;

        let dimension_values = &combination.dimension_values;
        let (arg_dimensions, env_dimensions): (BTreeMap<_, _>, BTreeMap<_, _>) = dimension_values
            .iter()
            .filter(|(name, _)| {
                package.declares_argument(name)
                    || package
                        .env_var(name)
                        .is_some_and(|v| should_include(v, dimension_values))
            })
            .map(|(k, v)| (k.clone(), v.clone()))
            .partition(|(name, _)| package.declares_argument(name));

        let mut options = options.clone();
        if kind == TransportKind::StreamableHttp {
            options.template_vars.extend(self.runtime.template_vars());
        }

        let declared: Vec<&EnvVarMetadata> = package
            .environment_variables
            .iter()
            .filter(|v| combination.env_keys.contains(&v.name))
            .collect();
        let label = format!("{} ({})", combination.name, kind.short_name());

        let mut env = templated_defaults(combination, package, &options, |variable| {
            variable.map_or(true, |v| should_include(v, dimension_values))
        });
        env.extend(env_dimensions);

        let first_pass: Vec<EnvVarMetadata> = declared
            .iter()
            .filter(|v| should_include(v, dimension_values) && !env.contains_key(&v.name))
            .map(|v| (*v).clone())
            .collect();
        let mut resolution = self.resolver.resolve(&label, &first_pass, &options).await?;
        env.append(&mut resolution.values);

        let mut selected = env.clone();
        selected.extend(dimension_values.iter().map(|(k, v)| (k.clone(), v.clone())));
        let newly_applicable = |v: &EnvVarMetadata| {
            !should_include(v, dimension_values) && should_include(v, &selected)
        };

        env.extend(templated_defaults(combination, package, &options, |variable| {
            variable.is_some_and(newly_applicable)
        }));
        let second_pass: Vec<EnvVarMetadata> = declared
            .iter()
            .filter(|v| newly_applicable(**v) && !env.contains_key(&v.name))
            .map(|v| (*v).clone())
            .collect();
        if !second_pass.is_empty() {
            let second = self.resolver.resolve(&label, &second_pass, &options).await?;
            env.extend(second.values);
            resolution.warnings.extend(second.warnings);
        }

        let args: Vec<(String, String)> = package
            .package_arguments
            .iter()
            .filter_map(|argument| {
                let name = argument.flag_name();
                arg_dimensions
                    .get(name)
                    .or_else(|| {
                        combination
                            .arg_names
                            .contains(name)
                            .then(|| combination.arg_defaults.get(name))
                            .flatten()
                    })
                    .map(|value| (name.to_string(), value.clone()))
            })
            .collect();

        let config = assemble(kind, package, env, &args, self.runtime)?;
        tracing::debug!(
            combination = %combination.name,
            transport = %transport,
            "assembled server config"
        );

        Ok(BuiltConfig {
            config,
            warnings: resolution.warnings,
        })
    }
}

/// The combination's defaults whose variable passes `include`, with templates filled in
fn templated_defaults(
    combination: &Combination,
    package: &PackageConfig,
    options: &ResolveOptions,
    include: impl Fn(Option<&EnvVarMetadata>) -> bool,
) -> BTreeMap<String, String> {
    combination
        .defaults
        .iter()
        .filter(|(name, _)| include(package.env_var(name)))
        .map(|(name, value)| {
            (
                name.clone(),
                substitute_template(value, &options.template_vars),
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combinations::{dimensions_for_package, generate_conditional_combinations};
    use crate::prompt::NonInteractive;
    use serde_json::json;
    use std::collections::HashMap;

    fn metadata() -> ServerMetadata {
        serde_json::from_value(json!({
            "name": "io.github.org/server",
            "packages": [
                {
                    "registryType": "npm",
                    "identifier": "@org/server",
                    "transport": { "type": "stdio" },
                    "environmentVariables": [
                        { "name": "AUTH_MODE", "choices": ["loopback-oauth", "dcr"] },
                        {
                            "name": "DCR_STORE_URI",
                            "default": "file://dcr.json",
                            "dependsOn": { "AUTH_MODE": ["dcr"] }
                        },
                        { "name": "LOG_LEVEL", "default": "info" }
                    ],
                    "packageArguments": [
                        { "type": "named", "name": "--format", "choices": ["json", "text"] }
                    ]
                },
                {
                    "registryType": "npm",
                    "identifier": "@org/server",
                    "transport": { "type": "streamable-http" },
                    "environmentVariables": [
                        { "name": "CALLBACK_URL", "default": "http://{host}:{port}/callback" }
                    ]
                }
            ]
        }))
        .unwrap()
    }

    fn minimal_stdio_package() -> PackageConfig {
        serde_json::from_value(json!({
            "identifier": "@org/server",
            "transport": { "type": "stdio" }
        }))
        .unwrap()
    }

    #[test]
    fn test_stdio_installed_omits_empty_fields() {
        let config = assemble(
            TransportKind::Stdio,
            &minimal_stdio_package(),
            BTreeMap::new(),
            &[],
            &RuntimeOptions::default(),
        )
        .unwrap();

        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({ "command": "npx", "args": ["-y", "@org/server"] })
        );
    }

    #[test]
    fn test_http_shape() {
        let config = assemble(
            TransportKind::StreamableHttp,
            &minimal_stdio_package(),
            BTreeMap::new(),
            &[],
            &RuntimeOptions::default(),
        )
        .unwrap();

        assert_eq!(
            serde_json::to_value(&config).unwrap(),
            json!({
                "type": "http",
                "url": "http://localhost:3000/mcp",
                "start": { "command": "npx", "args": ["-y", "@org/server", "--port", "3000"] }
            })
        );
    }

    #[test]
    fn test_source_mode_reads_package_json_bin() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::write(
            temp_dir.path().join("package.json"),
            r#"{ "name": "@org/server", "bin": { "server": "dist/index.js" } }"#,
        )
        .unwrap();

        let mode = InvocationMode::Source {
            package_dir: Some(temp_dir.path().to_path_buf()),
            bin_path: None,
        };
        let (command, args) = base_invocation(&minimal_stdio_package(), &mode).unwrap();

        assert_eq!(command, "node");
        assert_eq!(
            args,
            vec![temp_dir.path().join("dist/index.js").display().to_string()]
        );
    }

    #[test]
    fn test_source_mode_without_directory_fails() {
        let mode = InvocationMode::Source {
            package_dir: None,
            bin_path: Some(PathBuf::from("dist/index.js")),
        };
        assert!(matches!(
            base_invocation(&minimal_stdio_package(), &mode),
            Err(GenError::SourceModeUnresolved { .. })
        ));
    }

    #[tokio::test]
    async fn test_build_filters_dependent_defaults() {
        let metadata = metadata();
        let package = metadata.package_for(TransportKind::Stdio).unwrap();
        let dims = dimensions_for_package(package, true);
        let mut combos = generate_conditional_combinations(&dims, &package.environment_variables);
        for combo in &mut combos {
            combo.attach_static(package);
        }

        let env: HashMap<String, String> = HashMap::new();
        let runtime = RuntimeOptions::default();
        let resolver = EnvVarResolver::new(&NonInteractive, &env);
        let builder = ServerConfigBuilder::new(&metadata, resolver, &runtime);

        let loopback = combos
            .iter()
            .find(|c| {
                c.dimension_values["AUTH_MODE"] == "loopback-oauth"
                    && c.dimension_values["format"] == "json"
            })
            .unwrap();
        let built = builder
            .build(loopback, "stdio", &ResolveOptions::default())
            .await
            .unwrap();

        let ServerConfig::Stdio(stdio) = built.config else {
            panic!("expected stdio config");
        };
        assert_eq!(stdio.env["AUTH_MODE"], "loopback-oauth");
        assert_eq!(stdio.env["LOG_LEVEL"], "info");
        assert!(!stdio.env.contains_key("DCR_STORE_URI"));
        assert!(!stdio.env.contains_key("format"));
        assert_eq!(stdio.args, vec!["-y", "@org/server", "--format", "json"]);

        let dcr = combos
            .iter()
            .find(|c| c.dimension_values["AUTH_MODE"] == "dcr")
            .unwrap();
        let built = builder
            .build(dcr, "stdio", &ResolveOptions::default())
            .await
            .unwrap();
        let ServerConfig::Stdio(stdio) = built.config else {
            panic!("expected stdio config");
        };
        assert_eq!(stdio.env["DCR_STORE_URI"], "file://dcr.json");
    }

    #[tokio::test]
    async fn test_build_http_substitutes_host_and_port() {
        let metadata = metadata();
        let package = metadata.package_for(TransportKind::StreamableHttp).unwrap();
        let mut combo = Combination {
            name: "default".to_string(),
            ..Default::default()
        };
        combo.attach_static(package);

        let env: HashMap<String, String> = HashMap::new();
        let runtime = RuntimeOptions {
            host: "127.0.0.1".to_string(),
            port: 8080,
            ..Default::default()
        };
        let resolver = EnvVarResolver::new(&NonInteractive, &env);
        let builder = ServerConfigBuilder::new(&metadata, resolver, &runtime);

        let built = builder
            .build(&combo, "streamable-http", &ResolveOptions::default())
            .await
            .unwrap();
        let ServerConfig::Http(http) = built.config else {
            panic!("expected http config");
        };

        assert_eq!(http.url, "http://127.0.0.1:8080/mcp");
        let start = http.start.unwrap();
        assert_eq!(start.env["CALLBACK_URL"], "http://127.0.0.1:8080/callback");
        assert_eq!(start.args, vec!["-y", "@org/server", "--port", "8080"]);
    }

    #[tokio::test]
    async fn test_build_missing_transport_package() {
        let metadata: ServerMetadata = serde_json::from_value(json!({
            "name": "only-stdio",
            "packages": [{ "identifier": "x", "transport": { "type": "stdio" } }]
        }))
        .unwrap();
        let env: HashMap<String, String> = HashMap::new();
        let runtime = RuntimeOptions::default();
        let resolver = EnvVarResolver::new(&NonInteractive, &env);
        let builder = ServerConfigBuilder::new(&metadata, resolver, &runtime);

        let result = builder
            .build(&Combination::default(), "streamable-http", &ResolveOptions::default())
            .await;
        assert!(matches!(result, Err(GenError::MissingTransportPackage { .. })));
    }

    #[tokio::test]
    async fn test_build_drops_dimension_values_that_do_not_apply() {
        let metadata: ServerMetadata = serde_json::from_value(json!({
            "name": "server",
            "packages": [
                {
                    "identifier": "@org/server",
                    "transport": { "type": "stdio" },
                    "environmentVariables": [
                        { "name": "AUTH_MODE", "choices": ["loopback-oauth", "dcr"] },
                        {
                            "name": "DCR_MODE",
                            "choices": ["self-hosted", "external"],
                            "dependsOn": { "AUTH_MODE": ["dcr"] }
                        }
                    ]
                },
                {
                    "identifier": "@org/server",
                    "transport": { "type": "streamable-http" }
                }
            ]
        }))
        .unwrap();
        let combination = Combination {
            name: "auth_mode-loopback-oauth_dcr_mode-external".to_string(),
            env_keys: ["AUTH_MODE", "DCR_MODE"].map(String::from).into(),
            dimension_values: [("AUTH_MODE", "loopback-oauth"), ("DCR_MODE", "external")]
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .into(),
            ..Default::default()
        };

        let env: HashMap<String, String> = HashMap::new();
        let runtime = RuntimeOptions::default();
        let resolver = EnvVarResolver::new(&NonInteractive, &env);
        let builder = ServerConfigBuilder::new(&metadata, resolver, &runtime);

        let built = builder
            .build(&combination, "stdio", &ResolveOptions::default())
            .await
            .unwrap();
        let ServerConfig::Stdio(stdio) = built.config else {
            panic!("expected stdio config");
        };
        assert_eq!(
            stdio.env,
            BTreeMap::from([("AUTH_MODE".to_string(), "loopback-oauth".to_string())])
        );

        let built = builder
            .build(&combination, "streamable-http", &ResolveOptions::default())
            .await
            .unwrap();
        let ServerConfig::Http(http) = built.config else {
            panic!("expected http config");
        };
        assert!(http.start.unwrap().env.is_empty());
    }

    #[tokio::test]
    async fn test_quick_build_follows_resolved_choice() {
        let metadata: ServerMetadata = serde_json::from_value(json!({
            "name": "server",
            "packages": [{
                "identifier": "@org/server",
                "transport": { "type": "stdio" },
                "environmentVariables": [
                    { "name": "AUTH_MODE", "choices": ["dcr", "loopback-oauth"] },
                    {
                        "name": "DCR_MODE",
                        "choices": ["self-hosted", "external"],
                        "dependsOn": { "AUTH_MODE": ["dcr"] }
                    },
                    {
                        "name": "DCR_STORE_URI",
                        "default": "file://dcr.json",
                        "dependsOn": { "AUTH_MODE": ["dcr"] }
                    }
                ]
            }]
        }))
        .unwrap();
        let package = metadata.package_for(TransportKind::Stdio).unwrap();
        let mut combination = Combination {
            name: "minimal".to_string(),
            ..Default::default()
        };
        combination.attach_static(package);

        let env: HashMap<String, String> = HashMap::new();
        let runtime = RuntimeOptions::default();
        let resolver = EnvVarResolver::new(&NonInteractive, &env);
        let builder = ServerConfigBuilder::new(&metadata, resolver, &runtime);
        let options = ResolveOptions {
            quick: true,
            ..Default::default()
        };

        let built = builder.build(&combination, "stdio", &options).await.unwrap();
        let ServerConfig::Stdio(stdio) = built.config else {
            panic!("expected stdio config");
        };
        assert_eq!(stdio.env["AUTH_MODE"], "dcr");
        assert_eq!(stdio.env["DCR_MODE"], "self-hosted");
        assert_eq!(stdio.env["DCR_STORE_URI"], "file://dcr.json");
    }
}
