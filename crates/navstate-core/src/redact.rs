use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::{AppData, SelectionVariant};

/// Prefix stripped from context URLs before the entity set is read.
pub const DEFAULT_SERVICE_ROOT: &str = "/sap/opu/odata/";

/// How the metadata service exposes annotations on related entities.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum MetadataShape {
    /// Related properties are discovered through to-one navigation relations
    /// and addressed as `nav.sub`.
    #[default]
    Legacy,
    /// Every property path (`name` or `nav/sub`) is checked directly.
    Flat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Multiplicity {
    One,
    ZeroOrOne,
    Many,
}

impl Multiplicity {
    #[must_use]
    pub fn is_to_one(self) -> bool {
        matches!(self, Self::One | Self::ZeroOrOne)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum FieldControl {
    Mandatory,
    Optional,
    ReadOnly,
    Inapplicable,
    Hidden,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct PropertyAnnotations {
    pub sensitive: bool,
    pub excluded_from_navigation: bool,
    pub measure: bool,
    pub field_control: Option<FieldControl>,
}

impl PropertyAnnotations {
    fn is_redacted(&self, options: RedactionOptions) -> bool {
        self.sensitive || self.excluded_from_navigation || (options.remove_measures && self.measure)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct PropertyMetadata {
    pub name: String,
    #[serde(default)]
    pub annotations: PropertyAnnotations,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct NavigationPropertyMetadata {
    pub name: String,
    pub target_type: String,
    pub multiplicity: Multiplicity,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Eq, PartialEq)]
pub struct EntityType {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyMetadata>,
    #[serde(default)]
    pub navigation_properties: Vec<NavigationPropertyMetadata>,
}

impl EntityType {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    #[must_use]
    pub fn with_property(
        mut self,
        name: impl Into<String>,
        annotations: PropertyAnnotations,
    ) -> Self {
        self.properties.push(PropertyMetadata { name: name.into(), annotations });
        self
    }

    #[must_use]
    pub fn with_navigation(
        mut self,
        name: impl Into<String>,
        target_type: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        self.navigation_properties.push(NavigationPropertyMetadata {
            name: name.into(),
            target_type: target_type.into(),
            multiplicity,
        });
        self
    }

    #[must_use]
    pub fn property(&self, name: &str) -> Option<&PropertyAnnotations> {
        self.properties
            .iter()
            .find(|property| property.name == name)
            .map(|property| &property.annotations)
    }

    #[must_use]
    pub fn navigation(&self, name: &str) -> Option<&NavigationPropertyMetadata> {
        self.navigation_properties.iter().find(|navigation| navigation.name == name)
    }
}

/// Read access to the annotations a metadata service has loaded so far.
pub trait AnnotationIndex {
    fn is_fully_loaded(&self) -> bool;

    fn shape(&self) -> MetadataShape;

    /// Entity type behind an entity set name.
    fn resolve_entity_type(&self, entity_set: &str) -> Option<&EntityType>;

    /// Entity type by its qualified type name.
    fn entity_type(&self, type_name: &str) -> Option<&EntityType>;
}

/// Plain in-memory [`AnnotationIndex`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MetadataAnnotationIndex {
    #[serde(default)]
    fully_loaded: bool,
    #[serde(default)]
    shape: MetadataShape,
    #[serde(default)]
    entity_sets: HashMap<String, String>,
    #[serde(default)]
    entity_types: HashMap<String, EntityType>,
}

impl MetadataAnnotationIndex {
    /// A fully loaded, empty index.
    #[must_use]
    pub fn new(shape: MetadataShape) -> Self {
        Self { fully_loaded: true, shape, ..Self::default() }
    }

    /// Register `entity_type` and expose it under `entity_set`.
    #[must_use]
    pub fn with_entity_set(
        mut self,
        entity_set: impl Into<String>,
        entity_type: EntityType,
    ) -> Self {
        self.entity_sets.insert(entity_set.into(), entity_type.name.clone());
        self.entity_types.insert(entity_type.name.clone(), entity_type);
        self
    }

    /// Register a type reachable only through navigation relations.
    #[must_use]
    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_types.insert(entity_type.name.clone(), entity_type);
        self
    }

    pub fn set_fully_loaded(&mut self, fully_loaded: bool) {
        self.fully_loaded = fully_loaded;
    }
}

impl AnnotationIndex for MetadataAnnotationIndex {
    fn is_fully_loaded(&self) -> bool {
        self.fully_loaded
    }

    fn shape(&self) -> MetadataShape {
        self.shape
    }

    fn resolve_entity_type(&self, entity_set: &str) -> Option<&EntityType> {
        self.entity_sets.get(entity_set).and_then(|type_name| self.entity_types.get(type_name))
    }

    fn entity_type(&self, type_name: &str) -> Option<&EntityType> {
        self.entity_types.get(type_name)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedactionOptions {
    pub remove_measures: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedactionOutcome {
    /// Property names dropped from the payload, in first-seen order.
    pub removed: Vec<String>,
    /// Set when the payload was wiped because metadata was incomplete.
    pub wiped: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SensitiveDataRedactor {
    service_root: String,
}

impl Default for SensitiveDataRedactor {
    fn default() -> Self {
        Self::new(DEFAULT_SERVICE_ROOT)
    }
}

impl SensitiveDataRedactor {
    #[must_use]
    pub fn new(service_root: impl Into<String>) -> Self {
        Self { service_root: service_root.into() }
    }

    /// Entity set addressed by a context URL such as
    /// `/sap/opu/odata/svc/$metadata#SalesOrders`.
    ///
    /// The fragment wins when present, otherwise the last path segment is used.
    #[must_use]
    pub fn entity_set_from_context_url(&self, context_url: &str) -> Option<String> {
        let relative = context_url.strip_prefix(self.service_root.as_str()).unwrap_or(context_url);
        let entity_set = match relative.split_once('#') {
            Some((_, fragment)) => fragment,
            None => relative.rsplit('/').next().unwrap_or(relative),
        };
        let entity_set = entity_set.trim();
        (!entity_set.is_empty()).then(|| entity_set.to_string())
    }

    /// Remove every property the metadata marks as not fit to leave the app.
    ///
    /// With incomplete metadata nothing can be proven safe, so the selection
    /// variant, value texts and semantic dates are all dropped.
    pub fn redact(
        &self,
        data: &mut AppData,
        index: &dyn AnnotationIndex,
        options: RedactionOptions,
    ) -> RedactionOutcome {
        if !index.is_fully_loaded() {
            tracing::warn!("metadata not fully loaded; wiping outbound selection data");
            data.selection_variant = None;
            data.value_texts = None;
            data.semantic_dates = None;
            return RedactionOutcome { removed: Vec::new(), wiped: true };
        }

        let entity_types = self.context_entity_types(data.selection_variant.as_ref(), index);
        if entity_types.is_empty() {
            tracing::debug!("no entity type resolved from context URLs; nothing to redact");
            return RedactionOutcome::default();
        }

        let candidates = candidate_names(data);
        let removed = match index.shape() {
            MetadataShape::Legacy => {
                let flagged = legacy_flagged_names(&entity_types, index, options);
                candidates.into_iter().filter(|name| flagged.contains(name)).collect::<Vec<_>>()
            }
            MetadataShape::Flat => candidates
                .into_iter()
                .filter(|name| flat_path_is_redacted(name, &entity_types, index, options))
                .collect::<Vec<_>>(),
        };

        for name in &removed {
            if let Some(variant) = data.selection_variant.as_mut() {
                variant.remove_property(name);
            }
            data.remove_property_annotations(name);
        }
        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "redacted properties from app data");
        }
        RedactionOutcome { removed, wiped: false }
    }

    fn context_entity_types<'a>(
        &self,
        variant: Option<&SelectionVariant>,
        index: &'a dyn AnnotationIndex,
    ) -> Vec<&'a EntityType> {
        let Some(variant) = variant else {
            return Vec::new();
        };
        let mut resolved: Vec<&EntityType> = Vec::new();
        let context_urls = [variant.filter_context_url(), variant.parameter_context_url()];
        for url in context_urls.into_iter().flatten() {
            let Some(entity_set) = self.entity_set_from_context_url(url) else {
                continue;
            };
            if let Some(entity_type) = index.resolve_entity_type(&entity_set) {
                if !resolved.iter().any(|known| known.name == entity_type.name) {
                    resolved.push(entity_type);
                }
            }
        }
        resolved
    }
}

fn candidate_names(data: &AppData) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut names = Vec::new();
    let mut push = |name: &str| {
        if seen.insert(name.to_string()) {
            names.push(name.to_string());
        }
    };
    if let Some(variant) = &data.selection_variant {
        variant.property_names().into_iter().for_each(&mut push);
    }
    if let Some(texts) = &data.value_texts {
        for context in &texts.texts {
            context.property_texts.iter().for_each(|entry| push(&entry.property_name));
        }
    }
    if let Some(dates) = &data.semantic_dates {
        dates.dates.iter().for_each(|entry| push(&entry.property_name));
    }
    names
}

fn legacy_flagged_names(
    entity_types: &[&EntityType],
    index: &dyn AnnotationIndex,
    options: RedactionOptions,
) -> BTreeSet<String> {
    let mut flagged = BTreeSet::new();
    for entity_type in entity_types {
        for property in &entity_type.properties {
            if property.annotations.is_redacted(options) {
                flagged.insert(property.name.clone());
            }
        }
        for navigation in &entity_type.navigation_properties {
            if !navigation.multiplicity.is_to_one() {
                continue;
            }
            let Some(target) = index.entity_type(&navigation.target_type) else {
                continue;
            };
            for property in &target.properties {
                if property.annotations.is_redacted(options) {
                    flagged.insert(format!("{}.{}", navigation.name, property.name));
                }
            }
        }
    }
    flagged
}

fn flat_path_is_redacted(
    path: &str,
    entity_types: &[&EntityType],
    index: &dyn AnnotationIndex,
    options: RedactionOptions,
) -> bool {
    entity_types.iter().any(|entity_type| {
        let annotations = match path.split_once('/') {
            None => entity_type.property(path),
            Some((navigation, property)) => entity_type
                .navigation(navigation)
                .and_then(|navigation| index.entity_type(&navigation.target_type))
                .and_then(|target| target.property(property)),
        };
        annotations.is_some_and(|annotations| annotations.is_redacted(options))
    })
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        NavigationError, PropertyTexts, SemanticDateEntry, SemanticDates, ValueTextContext,
        ValueTexts,
    };

    const FILTER_URL: &str = "/sap/opu/odata/sap/HR_SRV/$metadata#Employees";

    fn sensitive() -> PropertyAnnotations {
        PropertyAnnotations { sensitive: true, ..PropertyAnnotations::default() }
    }

    fn measure() -> PropertyAnnotations {
        PropertyAnnotations { measure: true, ..PropertyAnnotations::default() }
    }

    fn index(shape: MetadataShape) -> MetadataAnnotationIndex {
        let employee = EntityType::new("HR.Employee")
            .with_property("Name", PropertyAnnotations::default())
            .with_property("Salary", sensitive())
            .with_property("Headcount", measure())
            .with_property(
                "Badge",
                PropertyAnnotations {
                    field_control: Some(FieldControl::Hidden),
                    ..PropertyAnnotations::default()
                },
            )
            .with_navigation("Manager", "HR.Person", Multiplicity::ZeroOrOne)
            .with_navigation("Reports", "HR.Person", Multiplicity::Many);
        let person = EntityType::new("HR.Person")
            .with_property("Phone", PropertyAnnotations {
                excluded_from_navigation: true,
                ..PropertyAnnotations::default()
            })
            .with_property("Name", PropertyAnnotations::default());
        MetadataAnnotationIndex::new(shape)
            .with_entity_set("Employees", employee)
            .with_entity_type(person)
    }

    fn app_data(names: &[&str]) -> Result<AppData, NavigationError> {
        let mut variant = SelectionVariant::new();
        variant.set_filter_context_url(Some(FILTER_URL.to_string()));
        for name in names {
            variant.add_parameter(name, "x")?;
        }
        let mut data = AppData::with_selection_variant(variant);
        data.value_texts = Some(ValueTexts {
            texts: vec![ValueTextContext {
                context_url: Some(FILTER_URL.to_string()),
                property_texts: vec![
                    PropertyTexts { property_name: "Salary".to_string(), value_texts: Vec::new() },
                    PropertyTexts { property_name: "Name".to_string(), value_texts: Vec::new() },
                ],
            }],
        });
        data.semantic_dates = Some(SemanticDates {
            dates: vec![SemanticDateEntry {
                property_name: "Salary".to_string(),
                data: serde_json::Value::Null,
            }],
        });
        Ok(data)
    }

    fn remaining(data: &AppData) -> Vec<String> {
        data.selection_variant
            .as_ref()
            .map(|variant| variant.property_names().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    // Test IDs: TRED-001
    #[test]
    fn entity_set_is_read_from_context_url() {
        let redactor = SensitiveDataRedactor::default();
        assert_eq!(redactor.entity_set_from_context_url(FILTER_URL), Some("Employees".to_string()));
        assert_eq!(
            redactor.entity_set_from_context_url("/sap/opu/odata/sap/HR_SRV/Employees"),
            Some("Employees".to_string())
        );
        assert_eq!(redactor.entity_set_from_context_url("/svc/$metadata#"), None);
    }

    // Test IDs: TRED-002
    #[test]
    fn legacy_shape_removes_flagged_and_to_one_related_properties() -> Result<(), NavigationError> {
        let mut data =
            app_data(&["Name", "Salary", "Headcount", "Badge", "Manager.Phone", "Reports.Phone"])?;
        let outcome = SensitiveDataRedactor::default().redact(
            &mut data,
            &index(MetadataShape::Legacy),
            RedactionOptions { remove_measures: true },
        );
        assert_eq!(outcome.removed, vec!["Salary", "Headcount", "Manager.Phone"]);
        assert!(!outcome.wiped);
        assert_eq!(remaining(&data), vec!["Name", "Badge", "Reports.Phone"]);
        let texts = data.value_texts.as_ref().map(|texts| texts.texts[0].property_texts.len());
        assert_eq!(texts, Some(1));
        assert!(data.semantic_dates.as_ref().is_some_and(SemanticDates::is_empty));
        Ok(())
    }

    // Test IDs: TRED-003
    #[test]
    fn flat_shape_checks_paths_and_keeps_measures_unless_asked() -> Result<(), NavigationError> {
        let mut data = app_data(&["Name", "Salary", "Headcount", "Manager/Phone", "Manager/Name"])?;
        let outcome = SensitiveDataRedactor::default().redact(
            &mut data,
            &index(MetadataShape::Flat),
            RedactionOptions::default(),
        );
        assert_eq!(outcome.removed, vec!["Salary", "Manager/Phone"]);
        assert_eq!(remaining(&data), vec!["Name", "Headcount", "Manager/Name"]);
        Ok(())
    }

    // Test IDs: TRED-004
    #[test]
    fn incomplete_metadata_wipes_selection_data() -> Result<(), NavigationError> {
        let mut data = app_data(&["Name"])?;
        data.table_variant_id = Some("t".to_string());
        let mut partial = index(MetadataShape::Legacy);
        partial.set_fully_loaded(false);
        let outcome = SensitiveDataRedactor::default().redact(
            &mut data,
            &partial,
            RedactionOptions::default(),
        );
        assert!(outcome.wiped);
        assert_eq!(data.selection_variant, None);
        assert_eq!(data.value_texts, None);
        assert_eq!(data.semantic_dates, None);
        assert_eq!(data.table_variant_id.as_deref(), Some("t"));
        Ok(())
    }

    // Test IDs: TRED-005
    #[test]
    fn unknown_entity_set_leaves_payload_untouched() -> Result<(), NavigationError> {
        let mut data = app_data(&["Salary"])?;
        if let Some(variant) = data.selection_variant.as_mut() {
            variant.set_filter_context_url(Some("/other/$metadata#Unknown".to_string()));
        }
        let before = data.clone();
        let outcome = SensitiveDataRedactor::default().redact(
            &mut data,
            &index(MetadataShape::Legacy),
            RedactionOptions { remove_measures: true },
        );
        assert_eq!(outcome, RedactionOutcome::default());
        assert_eq!(data, before);
        Ok(())
    }
}
