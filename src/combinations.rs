//! Combination generation over configuration dimensions.
//!
//! A [`Dimension`] is one axis of variation (an env var or named argument with
//! declared choices). Generation walks the cartesian product of the dimensions
//! and emits one [`Combination`] per meaningfully distinct configuration.
//!
//! Conditional generation resolves primary dimensions (no `dependsOn`) first and
//! only then expands the conditional dimensions whose condition holds for that
//! primary assignment. Conditions are evaluated against primary values only, so
//! a variable that depends on another conditional variable never applies.

use crate::dependency::should_include;
use crate::manifest::{EnvVarMetadata, PackageConfig};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};

/// Name used when there is nothing to vary in matrix mode
pub const MINIMAL_NAME: &str = "minimal";
/// Name used when no dimension discriminates in conditional mode
pub const DEFAULT_NAME: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DimensionKind {
    Env,
    Arg,
}

/// One named choice set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: DimensionKind,
    pub choices: Vec<String>,
}

impl Dimension {
    pub fn env(name: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Env,
            choices,
        }
    }

    pub fn arg(name: impl Into<String>, choices: Vec<String>) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Arg,
            choices,
        }
    }

    /// A single-choice dimension carries no information for naming
    pub fn is_discriminating(&self) -> bool {
        self.choices.len() > 1
    }

    fn fragment(&self, value: &str) -> String {
        format!("{}-{}", self.name.to_lowercase(), value)
    }
}

/// One point in the product space of the selected dimensions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Combination {
    pub name: String,
    pub env_keys: BTreeSet<String>,
    pub arg_names: BTreeSet<String>,
    pub defaults: BTreeMap<String, String>,
    pub arg_defaults: BTreeMap<String, String>,
    pub dimension_values: BTreeMap<String, String>,
}

impl Combination {
    fn from_tuple<D: Borrow<Dimension>>(name: String, dimensions: &[D], tuple: &[String]) -> Self {
        let mut combination = Combination {
            name,
            ..Default::default()
        };

        for (dimension, value) in dimensions.iter().zip(tuple) {
            let dimension: &Dimension = dimension.borrow();
            match dimension.kind {
                DimensionKind::Env => combination.env_keys.insert(dimension.name.clone()),
                DimensionKind::Arg => combination.arg_names.insert(dimension.name.clone()),
            };
            combination
                .dimension_values
                .insert(dimension.name.clone(), value.clone());
        }

        combination
    }

    /// Add the package's non-dimension variables and arguments.
    ///
    /// Every other env var joins `env_keys` and its declared default joins
    /// `defaults`; arguments with a declared value join `arg_defaults`. Whether
    /// a variable actually applies is decided later against `dimension_values`.
    pub fn attach_static(&mut self, package: &PackageConfig) {
        for variable in &package.environment_variables {
            if self.dimension_values.contains_key(&variable.name) {
                continue;
            }
            self.env_keys.insert(variable.name.clone());
            if let Some(default) = variable.declared_default() {
                self.defaults
                    .insert(variable.name.clone(), default.to_string());
            }
        }

        for argument in &package.package_arguments {
            let name = argument.flag_name().to_string();
            if self.dimension_values.contains_key(&name) {
                continue;
            }
            if let Some(value) = &argument.value {
                self.arg_names.insert(name.clone());
                self.arg_defaults.insert(name, value.clone());
            }
        }
    }
}

/// Every tuple of one choice per dimension, in dimension order.
///
/// Zero dimensions yield one empty tuple.
pub fn cartesian_product<D: Borrow<Dimension>>(dimensions: &[D]) -> Vec<Vec<String>> {
    let mut tuples: Vec<Vec<String>> = vec![Vec::new()];

    for dimension in dimensions {
        let dimension: &Dimension = dimension.borrow();
        tuples = tuples
            .into_iter()
            .flat_map(move |prefix| {
                dimension.choices.iter().map(move |choice| {
                    let mut tuple = prefix.clone();
                    tuple.push(choice.clone());
                    tuple
                })
            })
            .collect();
    }

    tuples
}

/// Full product where every dimension is primary
pub fn generate_matrix_combinations(dimensions: &[Dimension]) -> Vec<Combination> {
    cartesian_product(dimensions)
        .into_iter()
        .map(|tuple| {
            let name = if dimensions.is_empty() {
                MINIMAL_NAME.to_string()
            } else {
                dimensions
                    .iter()
                    .zip(&tuple)
                    .map(|(d, v)| d.fragment(v))
                    .collect::<Vec<_>>()
                    .join("_")
            };
            Combination::from_tuple(name, dimensions, &tuple)
        })
        .collect()
}

/// Name from the discriminating dimensions of the active set
fn combination_name(active: &[&Dimension], values: &BTreeMap<String, String>) -> String {
    let fragments: Vec<String> = active
        .iter()
        .filter(|d| d.is_discriminating())
        .filter_map(|d| values.get(&d.name).map(|v| d.fragment(v)))
        .collect();

    if fragments.is_empty() {
        DEFAULT_NAME.to_string()
    } else {
        fragments.join("_")
    }
}

/// Product over primary dimensions, expanded by the conditional dimensions
/// whose `dependsOn` holds for each primary assignment.
///
/// A dimension is conditional when the env variable of the same name declares
/// `dependsOn`. Without any primary dimension a single `minimal` combination is
/// returned and conditional dimensions are dropped.
pub fn generate_conditional_combinations(
    dimensions: &[Dimension],
    variables: &[EnvVarMetadata],
) -> Vec<Combination> {
    let conditional_variable = |dimension: &Dimension| {
        if dimension.kind != DimensionKind::Env {
            return None;
        }
        variables
            .iter()
            .find(|v| v.name == dimension.name && v.is_conditional())
    };

    let (conditional, primary): (Vec<&Dimension>, Vec<&Dimension>) = dimensions
        .iter()
        .partition(|d| conditional_variable(d).is_some());

    if primary.is_empty() {
        if !conditional.is_empty() {
            tracing::warn!(
                dropped = conditional.len(),
                "conditional dimensions without any primary dimension are ignored"
            );
        }
        return vec![Combination {
            name: MINIMAL_NAME.to_string(),
            ..Default::default()
        }];
    }

    let mut combinations = Vec::new();

    for tuple in cartesian_product(&primary) {
        let base_values: BTreeMap<String, String> = primary
            .iter()
            .zip(&tuple)
            .map(|(d, v)| (d.name.clone(), v.clone()))
            .collect();

        let applicable: Vec<&Dimension> = conditional
            .iter()
            .copied()
            .filter(|d| conditional_variable(d).is_some_and(|v| should_include(v, &base_values)))
            .collect();

        if applicable.is_empty() {
            let name = combination_name(&primary, &base_values);
            combinations.push(Combination::from_tuple(name, &primary, &tuple));
            continue;
        }

        let active: Vec<&Dimension> = primary.iter().chain(&applicable).copied().collect();

        for sub_tuple in cartesian_product(&applicable) {
            let full_tuple: Vec<String> = tuple.iter().chain(&sub_tuple).cloned().collect();
            let mut values = base_values.clone();
            for (dimension, value) in applicable.iter().zip(&sub_tuple) {
                values.insert(dimension.name.clone(), value.clone());
            }

            let name = combination_name(&active, &values);
            combinations.push(Combination::from_tuple(name, &active, &full_tuple));
        }
    }

    combinations
}

/// Dimensions declared by a package.
///
/// Env vars and named arguments with choices each become one dimension. With
/// `matrix_only`, env vars flagged `isMandatoryForMatrix: false` are left out.
pub fn dimensions_for_package(package: &PackageConfig, matrix_only: bool) -> Vec<Dimension> {
    let env = package
        .environment_variables
        .iter()
        .filter(|v| !v.choices().is_empty())
        .filter(|v| !matrix_only || v.is_mandatory_for_matrix)
        .map(|v| Dimension::env(&v.name, v.choices().to_vec()));

    let args = package
        .package_arguments
        .iter()
        .filter(|a| !a.choices().is_empty())
        .map(|a| Dimension::arg(a.flag_name(), a.choices().to_vec()));

    env.chain(args).collect()
}
