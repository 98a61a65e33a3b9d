use std::str::FromStr;

use indexmap::IndexMap;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

use crate::NavigationError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub enum Sign {
    #[serde(rename = "I")]
    Include,
    #[serde(rename = "E")]
    Exclude,
}

impl Sign {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Include => "I",
            Self::Exclude => "E",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "I" => Some(Self::Include),
            "E" => Some(Self::Exclude),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum SelectOperator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Bt,
    Nb,
    Cp,
    Np,
}

impl SelectOperator {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "EQ",
            Self::Ne => "NE",
            Self::Lt => "LT",
            Self::Le => "LE",
            Self::Gt => "GT",
            Self::Ge => "GE",
            Self::Bt => "BT",
            Self::Nb => "NB",
            Self::Cp => "CP",
            Self::Np => "NP",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "EQ" => Some(Self::Eq),
            "NE" => Some(Self::Ne),
            "LT" => Some(Self::Lt),
            "LE" => Some(Self::Le),
            "GT" => Some(Self::Gt),
            "GE" => Some(Self::Ge),
            "BT" => Some(Self::Bt),
            "NB" => Some(Self::Nb),
            "CP" => Some(Self::Cp),
            "NP" => Some(Self::Np),
            _ => None,
        }
    }

    /// Range operators carry an upper bound in `high`.
    #[must_use]
    pub fn requires_high(self) -> bool {
        matches!(self, Self::Bt | Self::Nb)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct SelectOption {
    #[serde(rename = "Sign")]
    pub sign: Sign,
    #[serde(rename = "Option")]
    pub operator: SelectOperator,
    #[serde(rename = "Low")]
    pub low: String,
    #[serde(rename = "High", default)]
    pub high: Option<String>,
}

impl SelectOption {
    #[must_use]
    pub fn new(sign: Sign, operator: SelectOperator, low: impl Into<String>) -> Self {
        Self { sign, operator, low: low.into(), high: None }
    }

    #[must_use]
    pub fn equals(low: impl Into<String>) -> Self {
        Self::new(Sign::Include, SelectOperator::Eq, low)
    }

    #[must_use]
    pub fn between(sign: Sign, low: impl Into<String>, high: impl Into<String>) -> Self {
        Self { sign, operator: SelectOperator::Bt, low: low.into(), high: Some(high.into()) }
    }

    fn to_json_value(&self) -> Value {
        json!({
            "Sign": self.sign.as_str(),
            "Option": self.operator.as_str(),
            "Low": self.low,
            "High": self.high,
        })
    }
}

/// Filter criteria: single-valued parameters plus multi-valued select options.
///
/// A property name is either a parameter or a select-option list, never both.
/// Insertion order of names and of ranges within a name is preserved through
/// [`SelectionVariant::to_json_string`] and [`SelectionVariant::from_json_str`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionVariant {
    id: String,
    text: Option<String>,
    filter_context_url: Option<String>,
    parameter_context_url: Option<String>,
    parameters: IndexMap<String, String>,
    select_options: IndexMap<String, Vec<SelectOption>>,
}

impl SelectionVariant {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id(&mut self, id: impl Into<String>) {
        self.id = id.into();
    }

    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.text.as_deref()
    }

    pub fn set_text(&mut self, text: Option<String>) {
        self.text = text;
    }

    #[must_use]
    pub fn filter_context_url(&self) -> Option<&str> {
        self.filter_context_url.as_deref()
    }

    pub fn set_filter_context_url(&mut self, url: Option<String>) {
        self.filter_context_url = url;
    }

    #[must_use]
    pub fn parameter_context_url(&self) -> Option<&str> {
        self.parameter_context_url.as_deref()
    }

    pub fn set_parameter_context_url(&mut self, url: Option<String>) {
        self.parameter_context_url = url;
    }

    /// Append one range to the select options of `name`.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] when `name` is empty, already used
    /// as a parameter, or when a `BT`/`NB` range has no `high` bound.
    pub fn add_select_option(
        &mut self,
        name: &str,
        sign: Sign,
        operator: SelectOperator,
        low: impl Into<String>,
        high: Option<String>,
    ) -> Result<(), NavigationError> {
        let option = SelectOption { sign, operator, low: low.into(), high };
        self.validate_select_option(name, &option)?;
        self.select_options.entry(name.to_string()).or_default().push(option);
        Ok(())
    }

    /// Append a list of ranges to `name`, keeping their order.
    ///
    /// Every range is validated before any is stored, so a failing call leaves
    /// the variant unchanged.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] under the same rules as
    /// [`SelectionVariant::add_select_option`].
    pub fn mass_add_select_option(
        &mut self,
        name: &str,
        options: &[SelectOption],
    ) -> Result<(), NavigationError> {
        self.validate_select_option_name(name)?;
        for option in options {
            self.validate_select_option(name, option)?;
        }
        if options.is_empty() {
            return Ok(());
        }
        self.select_options.entry(name.to_string()).or_default().extend_from_slice(options);
        Ok(())
    }

    #[must_use]
    pub fn select_option(&self, name: &str) -> Option<&[SelectOption]> {
        self.select_options.get(name).map(Vec::as_slice)
    }

    /// Remove all ranges of `name`. Returns whether anything was removed.
    pub fn remove_select_option(&mut self, name: &str) -> bool {
        self.select_options.shift_remove(name).is_some()
    }

    /// Rename a select-option list, keeping its position.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] when `old_name` does not exist or
    /// `new_name` is empty or already taken.
    pub fn rename_select_option(
        &mut self,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), NavigationError> {
        if old_name == new_name {
            return Ok(());
        }
        self.ensure_name_is_free(new_name)?;
        let Some(index) = self.select_options.get_index_of(old_name) else {
            return Err(NavigationError::InvalidInput(format!(
                "select option {old_name} does not exist"
            )));
        };
        let Some((_, ranges)) = self.select_options.shift_remove_index(index) else {
            return Err(NavigationError::InvalidInput(format!(
                "select option {old_name} does not exist"
            )));
        };
        self.select_options.shift_insert(index, new_name.to_string(), ranges);
        Ok(())
    }

    /// Set a single-valued parameter, replacing any previous value.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] when `name` is empty or already
    /// used as a select option.
    pub fn add_parameter(
        &mut self,
        name: &str,
        value: impl Into<String>,
    ) -> Result<(), NavigationError> {
        if name.is_empty() {
            return Err(NavigationError::InvalidInput(
                "parameter name MUST be non-empty".to_string(),
            ));
        }
        if self.select_options.contains_key(name) {
            return Err(NavigationError::InvalidInput(format!(
                "parameter {name} collides with an existing select option"
            )));
        }
        self.parameters.insert(name.to_string(), value.into());
        Ok(())
    }

    #[must_use]
    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).map(String::as_str)
    }

    pub fn remove_parameter(&mut self, name: &str) -> bool {
        self.parameters.shift_remove(name).is_some()
    }

    /// Rename a parameter, keeping its position.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] when `old_name` does not exist or
    /// `new_name` is empty or already taken.
    pub fn rename_parameter(
        &mut self,
        old_name: &str,
        new_name: &str,
    ) -> Result<(), NavigationError> {
        if old_name == new_name {
            return Ok(());
        }
        self.ensure_name_is_free(new_name)?;
        let Some(index) = self.parameters.get_index_of(old_name) else {
            return Err(NavigationError::InvalidInput(format!(
                "parameter {old_name} does not exist"
            )));
        };
        let Some((_, value)) = self.parameters.shift_remove_index(index) else {
            return Err(NavigationError::InvalidInput(format!(
                "parameter {old_name} does not exist"
            )));
        };
        self.parameters.shift_insert(index, new_name.to_string(), value);
        Ok(())
    }

    /// Single-value shortcut: the parameter value, or the `low` of a select
    /// option list consisting of exactly one `EQ` range.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.parameters.get(name) {
            return Some(value.as_str());
        }
        match self.select_options.get(name).map(Vec::as_slice) {
            Some([only]) if only.operator == SelectOperator::Eq => Some(only.low.as_str()),
            _ => None,
        }
    }

    /// The value of `name` as a range list: its select options, or its parameter
    /// value as a single `I EQ` range.
    #[must_use]
    pub fn select_options_for(&self, name: &str) -> Option<Vec<SelectOption>> {
        if let Some(ranges) = self.select_options.get(name) {
            return Some(ranges.clone());
        }
        self.parameters.get(name).map(|value| vec![SelectOption::equals(value.clone())])
    }

    #[must_use]
    pub fn parameter_names(&self) -> Vec<&str> {
        self.parameters.keys().map(String::as_str).collect()
    }

    #[must_use]
    pub fn select_options_property_names(&self) -> Vec<&str> {
        self.select_options.keys().map(String::as_str).collect()
    }

    /// Parameter names followed by select-option names.
    #[must_use]
    pub fn property_names(&self) -> Vec<&str> {
        self.parameters.keys().chain(self.select_options.keys()).map(String::as_str).collect()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.parameters.contains_key(name) || self.select_options.contains_key(name)
    }

    /// Remove `name` whether it is a parameter or a select option.
    pub fn remove_property(&mut self, name: &str) -> bool {
        let removed_parameter = self.remove_parameter(name);
        let removed_select_option = self.remove_select_option(name);
        removed_parameter || removed_select_option
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parameters.is_empty() && self.select_options.is_empty()
    }

    #[must_use]
    pub fn to_json_value(&self) -> Value {
        let mut object = Map::new();
        object.insert("SelectionVariantID".to_string(), Value::String(self.id.clone()));
        if let Some(text) = &self.text {
            object.insert("Text".to_string(), Value::String(text.clone()));
        }
        if let Some(url) = &self.filter_context_url {
            object.insert("FilterContextUrl".to_string(), Value::String(url.clone()));
        }
        if let Some(url) = &self.parameter_context_url {
            object.insert("ParameterContextUrl".to_string(), Value::String(url.clone()));
        }

        let parameters = self
            .parameters
            .iter()
            .map(|(name, value)| json!({ "PropertyName": name, "PropertyValue": value }))
            .collect::<Vec<_>>();
        object.insert("Parameters".to_string(), Value::Array(parameters));

        let select_options = self
            .select_options
            .iter()
            .map(|(name, ranges)| {
                json!({
                    "PropertyName": name,
                    "Ranges": ranges.iter().map(SelectOption::to_json_value).collect::<Vec<_>>(),
                })
            })
            .collect::<Vec<_>>();
        object.insert("SelectOptions".to_string(), Value::Array(select_options));

        Value::Object(object)
    }

    #[must_use]
    pub fn to_json_string(&self) -> String {
        self.to_json_value().to_string()
    }

    /// Rebuild a variant from its serialized JSON form.
    ///
    /// # Errors
    /// Returns [`NavigationError::Parse`] when the input is empty, is not valid
    /// JSON, or describes ranges or names that violate the variant's invariants.
    pub fn from_json_str(raw: &str) -> Result<Self, NavigationError> {
        if raw.trim().is_empty() {
            return Err(NavigationError::Parse("selection variant JSON is empty".to_string()));
        }
        let document: SelectionVariantDocument = serde_json::from_str(raw)
            .map_err(|err| NavigationError::Parse(format!("invalid selection variant: {err}")))?;
        Self::from_document(document).map_err(into_parse_error)
    }

    /// Rebuild a variant from an already parsed JSON value.
    ///
    /// # Errors
    /// Returns [`NavigationError::Parse`] under the same rules as
    /// [`SelectionVariant::from_json_str`].
    pub fn from_json_value(value: Value) -> Result<Self, NavigationError> {
        let document: SelectionVariantDocument = serde_json::from_value(value)
            .map_err(|err| NavigationError::Parse(format!("invalid selection variant: {err}")))?;
        Self::from_document(document).map_err(into_parse_error)
    }

    fn from_document(document: SelectionVariantDocument) -> Result<Self, NavigationError> {
        let mut variant = Self {
            id: document.id,
            text: document.text,
            filter_context_url: document.filter_context_url,
            parameter_context_url: document.parameter_context_url,
            ..Self::default()
        };
        for parameter in document.parameters {
            variant.add_parameter(&parameter.property_name, parameter.property_value)?;
        }
        for entry in document.select_options {
            variant.mass_add_select_option(&entry.property_name, &entry.ranges)?;
        }
        Ok(variant)
    }

    fn validate_select_option(
        &self,
        name: &str,
        option: &SelectOption,
    ) -> Result<(), NavigationError> {
        self.validate_select_option_name(name)?;
        if option.operator.requires_high() && option.high.is_none() {
            return Err(NavigationError::InvalidInput(format!(
                "select option {name} uses {} and MUST provide a high value",
                option.operator.as_str()
            )));
        }
        Ok(())
    }

    fn validate_select_option_name(&self, name: &str) -> Result<(), NavigationError> {
        if name.is_empty() {
            return Err(NavigationError::InvalidInput(
                "select option name MUST be non-empty".to_string(),
            ));
        }
        if self.parameters.contains_key(name) {
            return Err(NavigationError::InvalidInput(format!(
                "select option {name} collides with an existing parameter"
            )));
        }
        Ok(())
    }

    fn ensure_name_is_free(&self, name: &str) -> Result<(), NavigationError> {
        if name.is_empty() {
            return Err(NavigationError::InvalidInput(
                "property name MUST be non-empty".to_string(),
            ));
        }
        if self.contains(name) {
            return Err(NavigationError::InvalidInput(format!("property {name} already exists")));
        }
        Ok(())
    }
}

impl FromStr for SelectionVariant {
    type Err = NavigationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::from_json_str(raw)
    }
}

impl Serialize for SelectionVariant {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for SelectionVariant {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let document = SelectionVariantDocument::deserialize(deserializer)?;
        Self::from_document(document).map_err(D::Error::custom)
    }
}

fn into_parse_error(err: NavigationError) -> NavigationError {
    match err {
        NavigationError::InvalidInput(message) => NavigationError::Parse(message),
        other => other,
    }
}

#[derive(Debug, Deserialize)]
struct SelectionVariantDocument {
    #[serde(rename = "SelectionVariantID", default)]
    id: String,
    #[serde(rename = "Text", default)]
    text: Option<String>,
    #[serde(rename = "FilterContextUrl", default)]
    filter_context_url: Option<String>,
    #[serde(rename = "ParameterContextUrl", default)]
    parameter_context_url: Option<String>,
    #[serde(rename = "Parameters", default)]
    parameters: Vec<ParameterEntry>,
    #[serde(rename = "SelectOptions", default)]
    select_options: Vec<SelectOptionEntry>,
}

#[derive(Debug, Deserialize)]
struct ParameterEntry {
    #[serde(rename = "PropertyName")]
    property_name: String,
    #[serde(rename = "PropertyValue")]
    property_value: String,
}

#[derive(Debug, Deserialize)]
struct SelectOptionEntry {
    #[serde(rename = "PropertyName")]
    property_name: String,
    #[serde(rename = "Ranges", default)]
    ranges: Vec<SelectOption>,
}
