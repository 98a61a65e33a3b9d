use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::{NavigationError, SelectionVariant};

/// Display texts for filter values, grouped by entity context.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueTexts {
    #[serde(rename = "Texts", default)]
    pub texts: Vec<ValueTextContext>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueTextContext {
    #[serde(rename = "ContextUrl", default, skip_serializing_if = "Option::is_none")]
    pub context_url: Option<String>,
    #[serde(rename = "PropertyTexts", default)]
    pub property_texts: Vec<PropertyTexts>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PropertyTexts {
    #[serde(rename = "PropertyName")]
    pub property_name: String,
    #[serde(rename = "ValueTexts", default)]
    pub value_texts: Vec<ValueText>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ValueText {
    #[serde(rename = "PropertyValue")]
    pub property_value: String,
    #[serde(rename = "Text")]
    pub text: String,
}

impl ValueTexts {
    /// Drop every text entry for `property`. Contexts left without texts are
    /// removed as well.
    pub fn remove_property(&mut self, property: &str) -> bool {
        let mut removed = false;
        for context in &mut self.texts {
            let before = context.property_texts.len();
            context.property_texts.retain(|entry| entry.property_name != property);
            removed |= context.property_texts.len() != before;
        }
        self.texts.retain(|context| !context.property_texts.is_empty());
        removed
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.texts.is_empty()
    }
}

/// Relative date expressions ("last month") recorded per filter property.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SemanticDates {
    #[serde(rename = "Dates", default)]
    pub dates: Vec<SemanticDateEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SemanticDateEntry {
    #[serde(rename = "PropertyName")]
    pub property_name: String,
    #[serde(rename = "Data", default)]
    pub data: Value,
}

impl SemanticDates {
    pub fn remove_property(&mut self, property: &str) -> bool {
        let before = self.dates.len();
        self.dates.retain(|entry| entry.property_name != property);
        self.dates.len() != before
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }
}

/// The app-state payload persisted for a navigation or an inner state.
///
/// On the wire the selection variant travels as a serialized JSON string; when
/// reading, an embedded object is accepted too.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AppData {
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_variant",
        deserialize_with = "deserialize_variant"
    )]
    pub selection_variant: Option<SelectionVariant>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_variant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub custom_data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub presentation_variant: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_texts: Option<ValueTexts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_dates: Option<SemanticDates>,
}

impl AppData {
    #[must_use]
    pub fn with_selection_variant(selection_variant: SelectionVariant) -> Self {
        Self { selection_variant: Some(selection_variant), ..Self::default() }
    }

    /// Blob form handed to the persistence store.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] if the payload cannot be
    /// represented as JSON.
    pub fn to_blob(&self) -> Result<Value, NavigationError> {
        serde_json::to_value(self).map_err(|err| {
            NavigationError::InvalidInput(format!("app data is not serializable: {err}"))
        })
    }

    /// Read a blob previously written by [`AppData::to_blob`].
    ///
    /// # Errors
    /// Returns [`NavigationError::Parse`] when the blob does not have the
    /// expected shape.
    pub fn from_blob(blob: &Value) -> Result<Self, NavigationError> {
        Self::deserialize(blob)
            .map_err(|err| NavigationError::Parse(format!("invalid app data: {err}")))
    }

    /// Remove every trace of `property` from the texts and semantic dates.
    pub fn remove_property_annotations(&mut self, property: &str) {
        if let Some(texts) = self.value_texts.as_mut() {
            texts.remove_property(property);
        }
        if let Some(dates) = self.semantic_dates.as_mut() {
            dates.remove_property(property);
        }
    }
}

#[allow(clippy::ref_option)]
fn serialize_variant<S>(
    variant: &Option<SelectionVariant>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match variant {
        Some(variant) => serializer.serialize_str(&variant.to_json_string()),
        None => serializer.serialize_none(),
    }
}

fn deserialize_variant<'de, D>(deserializer: D) -> Result<Option<SelectionVariant>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(raw) if raw.trim().is_empty() => Ok(None),
        Value::String(raw) => {
            SelectionVariant::from_json_str(&raw).map(Some).map_err(D::Error::custom)
        }
        value @ Value::Object(_) => {
            SelectionVariant::from_json_value(value).map(Some).map_err(D::Error::custom)
        }
        other => Err(D::Error::custom(format!("selectionVariant MUST be a string, got {other}"))),
    }
}
