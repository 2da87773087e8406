use crate::combinations::Combination;
use serde::{Deserialize, Serialize};

/// A (combination, transport) pair offered to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigChoice {
    pub combination: Combination,
    /// Internal transport tag, e.g. "streamable-http"
    pub transport: String,
    /// "{combination} ({user-facing transport})"
    pub label: String,
}

/// Map a user-facing transport name to its internal tag
pub fn transport_tag(name: &str) -> &str {
    match name {
        "stdio" => "stdio",
        "http" => "streamable-http",
        other => other,
    }
}

/// Cross product of combinations and transports, combinations outermost
pub fn create_config_choices(
    combinations: &[Combination],
    transport_names: &[String],
) -> Vec<ConfigChoice> {
    combinations
        .iter()
        .flat_map(|combination| {
            transport_names.iter().map(move |transport| ConfigChoice {
                combination: combination.clone(),
                transport: transport_tag(transport).to_string(),
                label: format!("{} ({})", combination.name, transport),
            })
        })
        .collect()
}

/// Keep the choices whose label was selected, in their original order
pub fn filter_config_choices(
    all: &[ConfigChoice],
    selected_labels: &[String],
) -> Vec<ConfigChoice> {
    all.iter()
        .filter(|choice| selected_labels.iter().any(|label| *label == choice.label))
        .cloned()
        .collect()
}
