use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{NavigationError, SelectOperator, SelectionVariant, Sign};

/// Names starting with this prefix (case-insensitive) carry shell, system or
/// UI framework data.
pub const RESERVED_PARAMETER_PREFIX: &str = "sap-";
pub const DEFAULT_TECHNICAL_PARAMETERS: &[&str] = &["hcpApplicationId"];

/// Raw inbound parameters as delivered by the host: `name -> string | [string]`.
pub type StartupParameterSet = Map<String, Value>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// The selection variant's value wins.
    #[default]
    #[serde(alias = "SelVarWins")]
    FirstWins,
    /// The startup parameter's value wins.
    #[serde(alias = "URLParamWins")]
    SecondWins,
    /// Both values are kept as separate ranges of one select option.
    #[serde(alias = "InsertInSelOpt")]
    Union,
}

impl ConflictPolicy {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::FirstWins => "first_wins",
            Self::SecondWins => "second_wins",
            Self::Union => "union",
        }
    }
}

impl Display for ConflictPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictPolicy {
    type Err = NavigationError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "first_wins" | "SelVarWins" => Ok(Self::FirstWins),
            "second_wins" | "URLParamWins" => Ok(Self::SecondWins),
            "union" | "InsertInSelOpt" => Ok(Self::Union),
            other => Err(NavigationError::InvalidInput(format!(
                "unknown conflict policy: {other}"
            ))),
        }
    }
}

/// A normalized startup parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterValue {
    Single(String),
    Multiple(Vec<String>),
}

impl ParameterValue {
    #[must_use]
    pub fn values(&self) -> &[String] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multiple(values) => values,
        }
    }

    fn from_raw(name: &str, raw: &Value) -> Result<Self, NavigationError> {
        match raw {
            Value::String(value) => Ok(Self::Single(value.clone())),
            Value::Array(items) => {
                let values = items
                    .iter()
                    .map(|item| item.as_str().map(str::to_string))
                    .collect::<Option<Vec<_>>>()
                    .ok_or_else(|| {
                        NavigationError::InvalidInput(format!(
                            "startup parameter {name} MUST contain only string values"
                        ))
                    })?;
                match values.len() {
                    0 => Err(NavigationError::InvalidInput(format!(
                        "startup parameter {name} MUST NOT be an empty list"
                    ))),
                    1 => Ok(Self::Single(values.into_iter().next().unwrap_or_default())),
                    _ => Ok(Self::Multiple(values)),
                }
            }
            _ => Err(NavigationError::InvalidInput(format!(
                "startup parameter {name} MUST be a string or a list of strings"
            ))),
        }
    }
}

/// Names the host filled in through its default-value mechanism.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultedNameSet(BTreeSet<String>);

impl DefaultedNameSet {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(names.into_iter().map(Into::into).collect())
    }

    /// Read the set from its JSON representation, a list of strings.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] for anything other than a JSON
    /// array whose elements are all strings.
    pub fn from_json(value: &Value) -> Result<Self, NavigationError> {
        let Value::Array(items) = value else {
            return Err(NavigationError::InvalidInput(
                "defaulted parameter names MUST be a list".to_string(),
            ));
        };
        items
            .iter()
            .map(|item| {
                item.as_str().map(str::to_string).ok_or_else(|| {
                    NavigationError::InvalidInput(
                        "defaulted parameter names MUST be strings".to_string(),
                    )
                })
            })
            .collect::<Result<BTreeSet<_>, _>>()
            .map(Self)
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

/// Decides which inbound names are transport/system metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TechnicalParameterFilter {
    registered: BTreeSet<String>,
}

impl Default for TechnicalParameterFilter {
    fn default() -> Self {
        Self::new(DEFAULT_TECHNICAL_PARAMETERS.iter().copied())
    }
}

impl TechnicalParameterFilter {
    pub fn new<I, S>(registered: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { registered: registered.into_iter().map(Into::into).collect() }
    }

    #[must_use]
    pub fn is_technical(&self, name: &str) -> bool {
        let lowered = name.to_ascii_lowercase();
        lowered.starts_with(RESERVED_PARAMETER_PREFIX) || self.registered.contains(name)
    }
}

/// Drop technical names, then bring every remaining value into
/// [`ParameterValue`] form. Input order is preserved.
///
/// Technical names are skipped before their shape is looked at, so a malformed
/// technical value never fails the call.
///
/// # Errors
/// Returns [`NavigationError::InvalidInput`] when a business parameter is not a
/// string or a non-empty list of strings.
pub fn normalize_startup_parameters(
    startup: &StartupParameterSet,
    technical: &TechnicalParameterFilter,
) -> Result<IndexMap<String, ParameterValue>, NavigationError> {
    let mut normalized = IndexMap::new();
    for (name, raw) in startup {
        if technical.is_technical(name) {
            continue;
        }
        normalized.insert(name.clone(), ParameterValue::from_raw(name, raw)?);
    }
    Ok(normalized)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconciledVariants {
    pub navigation_variant: SelectionVariant,
    pub defaulted_variant: SelectionVariant,
    /// Set when `navigation_variant` is a copy of `defaulted_variant` because
    /// nothing but defaults arrived.
    pub navigation_is_defaults_only: bool,
}

impl ReconciledVariants {
    /// Neither variant carries any property.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.navigation_variant.is_empty() && self.defaulted_variant.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ParameterReconciler {
    policy: ConflictPolicy,
    technical: TechnicalParameterFilter,
}

impl ParameterReconciler {
    #[must_use]
    pub fn new(policy: ConflictPolicy, technical: TechnicalParameterFilter) -> Self {
        Self { policy, technical }
    }

    #[must_use]
    pub fn policy(&self) -> ConflictPolicy {
        self.policy
    }

    #[must_use]
    pub fn technical_filter(&self) -> &TechnicalParameterFilter {
        &self.technical
    }

    /// Merge `variant` with the host's startup parameters.
    ///
    /// Properties of `variant` come first in both outputs, in their original
    /// order, followed by startup-only names in input order. Both outputs carry
    /// the context URLs of `variant`.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] when a startup parameter has an
    /// unsupported shape.
    pub fn reconcile(
        &self,
        variant: &SelectionVariant,
        startup: &StartupParameterSet,
        defaulted: &DefaultedNameSet,
    ) -> Result<ReconciledVariants, NavigationError> {
        let inbound = normalize_startup_parameters(startup, &self.technical)?;

        let mut navigation = context_only_copy(variant);
        let mut defaults = context_only_copy(variant);

        for name in variant.property_names() {
            let own_ranges = variant.select_options_for(name).unwrap_or_default();
            let is_defaulted = defaulted.contains(name);

            let Some(inbound_value) = inbound.get(name) else {
                let target = if is_defaulted { &mut defaults } else { &mut navigation };
                target.mass_add_select_option(name, &own_ranges)?;
                continue;
            };

            if is_defaulted {
                navigation.mass_add_select_option(name, &own_ranges)?;
                add_equal_ranges(&mut defaults, name, inbound_value)?;
                continue;
            }

            match self.policy {
                ConflictPolicy::FirstWins => {
                    navigation.mass_add_select_option(name, &own_ranges)?;
                }
                ConflictPolicy::SecondWins => {
                    add_equal_ranges(&mut navigation, name, inbound_value)?;
                }
                ConflictPolicy::Union => {
                    navigation.mass_add_select_option(name, &own_ranges)?;
                    add_equal_ranges(&mut navigation, name, inbound_value)?;
                }
            }
        }

        for (name, value) in &inbound {
            if variant.contains(name) {
                continue;
            }
            let target = if defaulted.contains(name) { &mut defaults } else { &mut navigation };
            add_equal_ranges(target, name, value)?;
        }

        let navigation_is_defaults_only = navigation.is_empty() && !defaults.is_empty();
        if navigation_is_defaults_only {
            navigation = defaults.clone();
        }
        tracing::debug!(
            policy = %self.policy,
            navigation = navigation.property_names().len(),
            defaulted = defaults.property_names().len(),
            defaults_only = navigation_is_defaults_only,
            "reconciled startup parameters"
        );

        Ok(ReconciledVariants {
            navigation_variant: navigation,
            defaulted_variant: defaults,
            navigation_is_defaults_only,
        })
    }
}

fn context_only_copy(variant: &SelectionVariant) -> SelectionVariant {
    let mut copy = SelectionVariant::new();
    copy.set_filter_context_url(variant.filter_context_url().map(str::to_string));
    copy.set_parameter_context_url(variant.parameter_context_url().map(str::to_string));
    copy
}

fn add_equal_ranges(
    target: &mut SelectionVariant,
    name: &str,
    value: &ParameterValue,
) -> Result<(), NavigationError> {
    for low in value.values() {
        target.add_select_option(name, Sign::Include, SelectOperator::Eq, low.clone(), None)?;
    }
    Ok(())
}
