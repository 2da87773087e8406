//! Per-variable value resolution.
//!
//! Precedence, first match wins:
//! 1. declared default (or legacy `value`)
//! 2. existing process env var, offered interactively (not in quick mode)
//! 3. quick mode: first declared choice, otherwise skipped
//! 4. declared choices: selection, or the first choice when not interactive
//! 5. required: prompted, or left to the runtime environment when not interactive
//! 6. optional: opt-in prompt, interactive only

use crate::errors::GenResult;
use crate::manifest::EnvVarMetadata;
use crate::prompt::Prompter;
use regex::{Captures, Regex};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::OnceLock;

/// Source of already-set environment variables
pub trait Environment: Send + Sync {
    fn get(&self, name: &str) -> Option<String>;
}

/// The current process environment
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnvironment;

impl Environment for ProcessEnvironment {
    fn get(&self, name: &str) -> Option<String> {
        std::env::var(name).ok().filter(|v| !v.is_empty())
    }
}

impl Environment for HashMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        HashMap::get(self, name).cloned()
    }
}

impl Environment for BTreeMap<String, String> {
    fn get(&self, name: &str) -> Option<String> {
        BTreeMap::get(self, name).cloned()
    }
}

/// Knobs for one resolution pass
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Never prompt; take first choices and skip the rest
    pub quick: bool,
    /// Values for `{TOKEN}` placeholders in defaults and placeholders
    pub template_vars: BTreeMap<String, String>,
    /// When set, optional variables outside this set are never prompted for
    pub optional_vars_to_prompt: Option<BTreeSet<String>>,
}

impl ResolveOptions {
    fn wants_prompt(&self, variable: &EnvVarMetadata) -> bool {
        variable.is_required
            || self
                .optional_vars_to_prompt
                .as_ref()
                .map_or(true, |set| set.contains(&variable.name))
    }

    fn preselected(&self, variable: &EnvVarMetadata) -> bool {
        self.optional_vars_to_prompt
            .as_ref()
            .is_some_and(|set| set.contains(&variable.name))
    }
}

/// Resolved values plus anything worth telling the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    pub values: BTreeMap<String, String>,
    pub warnings: Vec<String>,
}

/// Redacted display form of a secret: first 4 chars + "XXX", or "XXX" when short
pub fn redact_secret(value: &str) -> String {
    if value.chars().count() <= 6 {
        "XXX".to_string()
    } else {
        let head: String = value.chars().take(4).collect();
        format!("{head}XXX")
    }
}

fn template_regex() -> &'static Regex {
    static TEMPLATE: OnceLock<Regex> = OnceLock::new();
    TEMPLATE.get_or_init(|| Regex::new(r"\{([A-Za-z0-9_]+)\}").expect("template regex is valid"))
}

/// Replace `{TOKEN}` with the matching template var (case-insensitive key).
///
/// Unknown tokens are left untouched.
pub fn substitute_template(text: &str, vars: &BTreeMap<String, String>) -> String {
    template_regex()
        .replace_all(text, |caps: &Captures| {
            let token = &caps[1];
            vars.iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(token))
                .map(|(_, value)| value.clone())
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// One entry offered when a variable is already set in the environment
enum ExistingOption {
    UseExisting(String),
    Choice(String),
    Custom,
}

/// Resolves env var values for one server configuration
pub struct EnvVarResolver<'a> {
    prompter: &'a dyn Prompter,
    environment: &'a dyn Environment,
}

impl<'a> EnvVarResolver<'a> {
    pub fn new(prompter: &'a dyn Prompter, environment: &'a dyn Environment) -> Self {
        Self {
            prompter,
            environment,
        }
    }

    /// Resolve every variable in order; unresolved variables are simply absent
    pub async fn resolve(
        &self,
        server_label: &str,
        variables: &[EnvVarMetadata],
        options: &ResolveOptions,
    ) -> GenResult<Resolution> {
        let mut resolution = Resolution::default();

        for variable in variables {
            if let Some(value) = self
                .resolve_one(server_label, variable, options, &mut resolution.warnings)
                .await?
            {
                resolution.values.insert(variable.name.clone(), value);
            }
        }

        Ok(resolution)
    }

    async fn resolve_one(
        &self,
        server_label: &str,
        variable: &EnvVarMetadata,
        options: &ResolveOptions,
        warnings: &mut Vec<String>,
    ) -> GenResult<Option<String>> {
        if let Some(default) = variable.declared_default() {
            return Ok(Some(substitute_template(default, &options.template_vars)));
        }

        let interactive = self.prompter.is_interactive();
        let choices = variable.choices();

        if options.quick {
            if let Some(first) = choices.first() {
                return Ok(Some(first.clone()));
            }
            if variable.is_required {
                let warning = format!(
                    "[{server_label}] required variable {} has no default; \
                     set it before starting the server",
                    variable.name
                );
                tracing::warn!(
                    variable = %variable.name,
                    "required variable skipped in quick mode"
                );
                warnings.push(warning);
            }
            return Ok(None);
        }

        if interactive && !options.wants_prompt(variable) {
            tracing::debug!(
                variable = %variable.name,
                "optional variable not selected for prompting"
            );
            return Ok(None);
        }

        let message = prompt_message(server_label, variable);

        if interactive {
            if let Some(existing) = self.environment.get(&variable.name) {
                return self.offer_existing(&message, variable, existing).await;
            }
        }

        if !choices.is_empty() {
            if !interactive {
                return Ok(choices.first().cloned());
            }
            return self.select_choice(&message, variable).await;
        }

        if variable.is_required {
            if !interactive {
                tracing::debug!(
                    variable = %variable.name,
                    "required variable left to the runtime environment"
                );
                return Ok(None);
            }
            let placeholder = variable
                .placeholder
                .as_deref()
                .map(|p| substitute_template(p, &options.template_vars));
            return self
                .ask_value(&message, variable, placeholder.as_deref(), true)
                .await
                .map(Some);
        }

        if !interactive {
            return Ok(None);
        }

        let opted_in = options.preselected(variable)
            || self
                .prompter
                .confirm(&format!("Configure optional {}?", variable.name), false)
                .await?;
        if !opted_in {
            return Ok(None);
        }

        let placeholder = variable
            .placeholder
            .as_deref()
            .map(|p| substitute_template(p, &options.template_vars));
        let value = self
            .ask_value(&message, variable, placeholder.as_deref(), false)
            .await?;
        Ok(Some(value).filter(|v| !v.is_empty()))
    }

    async fn offer_existing(
        &self,
        message: &str,
        variable: &EnvVarMetadata,
        existing: String,
    ) -> GenResult<Option<String>> {
        let shown = if variable.is_secret {
            redact_secret(&existing)
        } else {
            existing.clone()
        };

        let mut entries = vec![ExistingOption::UseExisting(existing)];
        entries.extend(
            variable
                .choices()
                .iter()
                .map(|c| ExistingOption::Choice(c.clone())),
        );
        entries.push(ExistingOption::Custom);

        let labels = entries
            .iter()
            .map(|entry| match entry {
                ExistingOption::UseExisting(_) => format!("Use existing value ({shown})"),
                ExistingOption::Choice(choice) => choice.clone(),
                ExistingOption::Custom => "Enter a custom value".to_string(),
            })
            .collect();

        let picked = self.prompter.select(message, labels).await?;
        match entries.into_iter().nth(picked) {
            Some(ExistingOption::UseExisting(value)) | Some(ExistingOption::Choice(value)) => {
                Ok(Some(value))
            }
            _ => {
                let value = self
                    .ask_value(message, variable, None, variable.is_required)
                    .await?;
                Ok(Some(value).filter(|v| !v.is_empty()))
            }
        }
    }

    async fn select_choice(
        &self,
        message: &str,
        variable: &EnvVarMetadata,
    ) -> GenResult<Option<String>> {
        let mut entries: Vec<Option<String>> =
            variable.choices().iter().cloned().map(Some).collect();
        if !variable.is_required {
            entries.push(None);
        }

        let labels = entries
            .iter()
            .map(|entry| entry.clone().unwrap_or_else(|| "(skip)".to_string()))
            .collect();

        let picked = self.prompter.select(message, labels).await?;
        Ok(entries.into_iter().nth(picked).flatten())
    }

    async fn ask_value(
        &self,
        message: &str,
        variable: &EnvVarMetadata,
        suggestion: Option<&str>,
        required: bool,
    ) -> GenResult<String> {
        if variable.is_secret {
            self.prompter.password(message, required).await
        } else {
            self.prompter.input(message, suggestion, required).await
        }
    }
}

fn prompt_message(server_label: &str, variable: &EnvVarMetadata) -> String {
    match &variable.description {
        Some(description) => format!("[{server_label}] {} ({description})", variable.name),
        None => format!("[{server_label}] {}", variable.name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{Answer, NonInteractive, ScriptedPrompter};
    use serde_json::json;

    fn vars(value: serde_json::Value) -> Vec<EnvVarMetadata> {
        serde_json::from_value(value).unwrap()
    }

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_redact_secret() {
        assert_eq!(redact_secret("abc"), "XXX");
        assert_eq!(redact_secret("abcdef"), "XXX");
        assert_eq!(redact_secret("ghp_123456789"), "ghp_XXX");
    }

    #[test]
    fn test_substitute_template() {
        let template: BTreeMap<String, String> = [
            ("host".to_string(), "localhost".to_string()),
            ("PORT".to_string(), "3000".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(
            substitute_template("http://{HOST}:{port}/callback", &template),
            "http://localhost:3000/callback"
        );
        assert_eq!(substitute_template("{unknown}/x", &template), "{unknown}/x");
    }

    #[test]
    fn test_default_wins_without_prompting() {
        let variables = vars(json!([
            { "name": "REDIRECT", "default": "http://{host}:{port}/cb", "choices": ["a"] }
        ]));
        let prompter = ScriptedPrompter::new([]);
        let env: HashMap<String, String> =
            [("REDIRECT".to_string(), "from-env".to_string())].into_iter().collect();
        let options = ResolveOptions {
            template_vars: [
                ("host".to_string(), "127.0.0.1".to_string()),
                ("port".to_string(), "8080".to_string()),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };

        let resolution = tokio_test::block_on(
            EnvVarResolver::new(&prompter, &env).resolve("server", &variables, &options),
        )
        .unwrap();

        assert_eq!(resolution.values["REDIRECT"], "http://127.0.0.1:8080/cb");
        assert!(prompter.asked().is_empty());
    }

    #[tokio::test]
    async fn test_quick_mode() {
        let variables = vars(json!([
            { "name": "MODE", "choices": ["fast", "slow"] },
            { "name": "API_KEY", "isRequired": true },
            { "name": "EXTRA" }
        ]));
        let options = ResolveOptions {
            quick: true,
            ..Default::default()
        };

        let prompter = ScriptedPrompter::new([]);
        let env = no_env();
        let resolution = EnvVarResolver::new(&prompter, &env)
            .resolve("server", &variables, &options)
            .await
            .unwrap();

        assert_eq!(resolution.values.len(), 1);
        assert_eq!(resolution.values["MODE"], "fast");
        assert_eq!(resolution.warnings.len(), 1);
        assert!(resolution.warnings[0].contains("API_KEY"));
    }

    #[tokio::test]
    async fn test_non_interactive_fallbacks() {
        let variables = vars(json!([
            { "name": "MODE", "choices": ["fast", "slow"] },
            { "name": "API_KEY", "isRequired": true },
            { "name": "EXTRA" }
        ]));
        let env: HashMap<String, String> =
            [("API_KEY".to_string(), "secret-value".to_string())].into_iter().collect();

        let resolution = EnvVarResolver::new(&NonInteractive, &env)
            .resolve("server", &variables, &ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(resolution.values.len(), 1);
        assert_eq!(resolution.values["MODE"], "fast");
        assert!(resolution.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_existing_env_value_is_offered_redacted() {
        let variables = vars(json!([
            { "name": "API_KEY", "isRequired": true, "isSecret": true }
        ]));
        let env: HashMap<String, String> =
            [("API_KEY".to_string(), "sk-live-abcdef".to_string())].into_iter().collect();
        let prompter =
            ScriptedPrompter::new([Answer::Select("Use existing value (sk-lXXX)".to_string())]);

        let resolution = EnvVarResolver::new(&prompter, &env)
            .resolve("server", &variables, &ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(resolution.values["API_KEY"], "sk-live-abcdef");
    }

    #[tokio::test]
    async fn test_existing_env_custom_value() {
        let variables = vars(json!([{ "name": "REGION", "choices": ["eu", "us"] }]));
        let env: HashMap<String, String> =
            [("REGION".to_string(), "ap".to_string())].into_iter().collect();
        let prompter = ScriptedPrompter::new([
            Answer::Select("Enter a custom value".to_string()),
            Answer::Text("sa".to_string()),
        ]);

        let resolution = EnvVarResolver::new(&prompter, &env)
            .resolve("server", &variables, &ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(resolution.values["REGION"], "sa");
    }

    #[tokio::test]
    async fn test_optional_choice_can_be_skipped() {
        let variables = vars(json!([{ "name": "THEME", "choices": ["dark", "light"] }]));
        let prompter = ScriptedPrompter::new([Answer::Select("(skip)".to_string())]);
        let env = no_env();

        let resolution = EnvVarResolver::new(&prompter, &env)
            .resolve("server", &variables, &ResolveOptions::default())
            .await
            .unwrap();

        assert!(resolution.values.is_empty());
    }

    #[tokio::test]
    async fn test_required_prompt_and_optional_opt_in() {
        let variables = vars(json!([
            { "name": "API_KEY", "isRequired": true, "isSecret": true },
            { "name": "TIMEOUT" },
            { "name": "RETRIES" }
        ]));
        let prompter = ScriptedPrompter::new([
            Answer::Text("key-123".to_string()),
            Answer::Confirm(true),
            Answer::Text("30".to_string()),
            Answer::Confirm(false),
        ]);
        let env = no_env();

        let resolution = EnvVarResolver::new(&prompter, &env)
            .resolve("server", &variables, &ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(resolution.values["API_KEY"], "key-123");
        assert_eq!(resolution.values["TIMEOUT"], "30");
        assert!(!resolution.values.contains_key("RETRIES"));
        assert_eq!(prompter.remaining(), 0);
    }

    #[tokio::test]
    async fn test_optional_filter_limits_prompting() {
        let variables = vars(json!([
            { "name": "TIMEOUT" },
            { "name": "RETRIES", "choices": ["1", "3"] }
        ]));
        let options = ResolveOptions {
            optional_vars_to_prompt: Some(["TIMEOUT".to_string()].into_iter().collect()),
            ..Default::default()
        };
        let prompter = ScriptedPrompter::new([Answer::Text("45".to_string())]);
        let env = no_env();

        let resolution = EnvVarResolver::new(&prompter, &env)
            .resolve("server", &variables, &options)
            .await
            .unwrap();

        assert_eq!(resolution.values["TIMEOUT"], "45");
        assert!(!resolution.values.contains_key("RETRIES"));
        assert_eq!(prompter.asked().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_custom_value_for_optional_is_dropped() {
        let variables = vars(json!([{ "name": "PROXY_URL" }]));
        let env: HashMap<String, String> =
            [("PROXY_URL".to_string(), "http://proxy".to_string())].into_iter().collect();
        let prompter = ScriptedPrompter::new([
            Answer::Select("Enter a custom value".to_string()),
            Answer::Text(String::new()),
        ]);

        let resolution = EnvVarResolver::new(&prompter, &env)
            .resolve("server", &variables, &ResolveOptions::default())
            .await
            .unwrap();

        assert_eq!(prompter.remaining(), 0);
        assert!(resolution.values.is_empty());
    }
}
