use crate::errors::{GenError, GenResult};
use async_trait::async_trait;
use inquire::validator::Validation;
use inquire::{Confirm, MultiSelect, Password, PasswordDisplayMode, Select, Text};
use std::collections::VecDeque;
use std::io::IsTerminal;
use std::sync::Mutex;

/// Interactive prompt primitives.
///
/// Callers check [`Prompter::is_interactive`] before asking anything and fall
/// back to defaults otherwise.
#[async_trait]
pub trait Prompter: Send + Sync {
    fn is_interactive(&self) -> bool;

    /// Index of the chosen option
    async fn select(&self, message: &str, options: Vec<String>) -> GenResult<usize>;

    /// Indices of the chosen options; all start selected when `all_selected` is set
    async fn multi_select(
        &self,
        message: &str,
        options: Vec<String>,
        all_selected: bool,
    ) -> GenResult<Vec<usize>>;

    async fn confirm(&self, message: &str, default: bool) -> GenResult<bool>;

    /// Free text; empty input is rejected when `required`
    async fn input(&self, message: &str, default: Option<&str>, required: bool)
        -> GenResult<String>;

    /// Masked input; empty input is rejected when `required`
    async fn password(&self, message: &str, required: bool) -> GenResult<String>;
}

fn validate_non_empty(
    input: &str,
) -> Result<Validation, Box<dyn std::error::Error + Send + Sync>> {
    if input.trim().is_empty() {
        Ok(Validation::Invalid("A value is required".into()))
    } else {
        Ok(Validation::Valid)
    }
}

async fn blocking<T, F>(prompt: F) -> GenResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, inquire::InquireError> + Send + 'static,
{
    tokio::task::spawn_blocking(prompt)
        .await
        .map_err(|e| GenError::PromptFailed {
            reason: e.to_string(),
        })?
        .map_err(GenError::from)
}

/// Terminal prompts backed by `inquire`
#[derive(Debug, Clone)]
pub struct InquirePrompter {
    interactive: bool,
}

impl InquirePrompter {
    /// Interactive only when both stdin and stdout are terminals
    pub fn detect() -> Self {
        Self {
            interactive: std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
        }
    }
}

#[async_trait]
impl Prompter for InquirePrompter {
    fn is_interactive(&self) -> bool {
        self.interactive
    }

    async fn select(&self, message: &str, options: Vec<String>) -> GenResult<usize> {
        let message = message.to_string();
        blocking(move || {
            Select::new(&message, options)
                .raw_prompt()
                .map(|picked| picked.index)
        })
        .await
    }

    async fn multi_select(
        &self,
        message: &str,
        options: Vec<String>,
        all_selected: bool,
    ) -> GenResult<Vec<usize>> {
        let message = message.to_string();
        blocking(move || {
            let defaults: Vec<usize> = if all_selected {
                (0..options.len()).collect()
            } else {
                Vec::new()
            };
            MultiSelect::new(&message, options)
                .with_default(&defaults)
                .raw_prompt()
                .map(|picked| picked.into_iter().map(|p| p.index).collect())
        })
        .await
    }

    async fn confirm(&self, message: &str, default: bool) -> GenResult<bool> {
        let message = message.to_string();
        blocking(move || Confirm::new(&message).with_default(default).prompt()).await
    }

    async fn input(
        &self,
        message: &str,
        default: Option<&str>,
        required: bool,
    ) -> GenResult<String> {
        let message = message.to_string();
        let default = default.map(str::to_string);
        blocking(move || {
            let mut text = Text::new(&message);
            if let Some(default) = default.as_deref() {
                text = text.with_default(default);
            }
            if required {
                text = text.with_validator(validate_non_empty);
            }
            text.prompt()
        })
        .await
    }

    async fn password(&self, message: &str, required: bool) -> GenResult<String> {
        let message = message.to_string();
        blocking(move || {
            let mut password = Password::new(&message)
                .with_display_mode(PasswordDisplayMode::Masked)
                .without_confirmation();
            if required {
                password = password.with_validator(validate_non_empty);
            }
            password.prompt()
        })
        .await
    }
}

/// Prompter for piped or scripted runs; never asks anything
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

#[async_trait]
impl Prompter for NonInteractive {
    fn is_interactive(&self) -> bool {
        false
    }

    async fn select(&self, message: &str, _options: Vec<String>) -> GenResult<usize> {
        Err(not_interactive(message))
    }

    async fn multi_select(
        &self,
        message: &str,
        _options: Vec<String>,
        _all_selected: bool,
    ) -> GenResult<Vec<usize>> {
        Err(not_interactive(message))
    }

    async fn confirm(&self, message: &str, _default: bool) -> GenResult<bool> {
        Err(not_interactive(message))
    }

    async fn input(
        &self,
        message: &str,
        _default: Option<&str>,
        _required: bool,
    ) -> GenResult<String> {
        Err(not_interactive(message))
    }

    async fn password(&self, message: &str, _required: bool) -> GenResult<String> {
        Err(not_interactive(message))
    }
}

fn not_interactive(message: &str) -> GenError {
    GenError::NotInteractive {
        message: message.to_string(),
    }
}

/// A queued answer for [`ScriptedPrompter`]; selections name the option text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Answer {
    Select(String),
    MultiSelect(Vec<String>),
    Confirm(bool),
    Text(String),
}

/// Replays queued answers in order and records every message asked.
///
/// Text answers serve both `input` and `password`. Running out of answers or
/// getting the wrong kind of answer is a prompt failure.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: Mutex<VecDeque<Answer>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = Answer>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Messages asked so far, in order
    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().map(|a| a.clone()).unwrap_or_default()
    }

    /// Answers not consumed yet
    pub fn remaining(&self) -> usize {
        self.answers.lock().map(|a| a.len()).unwrap_or_default()
    }

    fn next(&self, message: &str) -> GenResult<Answer> {
        if let Ok(mut asked) = self.asked.lock() {
            asked.push(message.to_string());
        }
        self.answers
            .lock()
            .ok()
            .and_then(|mut answers| answers.pop_front())
            .ok_or_else(|| GenError::PromptFailed {
                reason: format!("no scripted answer for '{message}'"),
            })
    }
}

fn unexpected(message: &str, answer: Answer) -> GenError {
    GenError::PromptFailed {
        reason: format!("unexpected answer {answer:?} for '{message}'"),
    }
}

#[async_trait]
impl Prompter for ScriptedPrompter {
    fn is_interactive(&self) -> bool {
        true
    }

    async fn select(&self, message: &str, options: Vec<String>) -> GenResult<usize> {
        match self.next(message)? {
            Answer::Select(choice) => options
                .iter()
                .position(|o| *o == choice)
                .ok_or_else(|| unexpected(message, Answer::Select(choice))),
            other => Err(unexpected(message, other)),
        }
    }

    async fn multi_select(
        &self,
        message: &str,
        options: Vec<String>,
        _all_selected: bool,
    ) -> GenResult<Vec<usize>> {
        match self.next(message)? {
            Answer::MultiSelect(picked) => picked
                .iter()
                .map(|p| options.iter().position(|o| o == p))
                .collect::<Option<Vec<_>>>()
                .ok_or_else(|| unexpected(message, Answer::MultiSelect(picked.clone()))),
            other => Err(unexpected(message, other)),
        }
    }

    async fn confirm(&self, message: &str, _default: bool) -> GenResult<bool> {
        match self.next(message)? {
            Answer::Confirm(value) => Ok(value),
            other => Err(unexpected(message, other)),
        }
    }

    async fn input(
        &self,
        message: &str,
        _default: Option<&str>,
        required: bool,
    ) -> GenResult<String> {
        match self.next(message)? {
            Answer::Text(text) if !(required && text.trim().is_empty()) => Ok(text),
            other => Err(unexpected(message, other)),
        }
    }

    async fn password(&self, message: &str, required: bool) -> GenResult<String> {
        self.input(message, None, required).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty_validator() {
        assert!(matches!(validate_non_empty("value"), Ok(Validation::Valid)));
        assert!(matches!(
            validate_non_empty("   "),
            Ok(Validation::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_non_interactive_refuses() {
        let prompter = NonInteractive;
        assert!(!prompter.is_interactive());
        assert!(matches!(
            prompter.confirm("Overwrite?", false).await,
            Err(GenError::NotInteractive { .. })
        ));
    }

    #[tokio::test]
    async fn test_scripted_replays_in_order() {
        let prompter = ScriptedPrompter::new([
            Answer::Select("dcr".to_string()),
            Answer::Confirm(true),
        ]);

        let picked = prompter
            .select("AUTH_MODE", vec!["loopback".to_string(), "dcr".to_string()])
            .await
            .unwrap();
        assert_eq!(picked, 1);
        assert!(prompter.confirm("Overwrite?", false).await.unwrap());
        assert_eq!(prompter.asked(), vec!["AUTH_MODE", "Overwrite?"]);
        assert!(prompter.select("again", vec![]).await.is_err());
    }

    #[tokio::test]
    async fn test_scripted_rejects_empty_required_text() {
        let prompter = ScriptedPrompter::new([Answer::Text(String::new())]);
        assert!(prompter.input("API_KEY", None, true).await.is_err());
    }
}
