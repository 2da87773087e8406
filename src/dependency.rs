use crate::manifest::EnvVarMetadata;
use std::collections::BTreeMap;

/// Whether a variable's `dependsOn` condition holds for the chosen dimension values.
///
/// Every entry must hold: the named dimension has a value and that value is in
/// the allowed set. A dimension without a value fails the entry.
pub fn should_include(variable: &EnvVarMetadata, selected: &BTreeMap<String, String>) -> bool {
    let Some(depends_on) = &variable.depends_on else {
        return true;
    };

    depends_on.iter().all(|(dimension, allowed)| {
        selected
            .get(dimension)
            .is_some_and(|value| allowed.iter().any(|a| a == value))
    })
}
