use serde_json::Value;

use crate::{
    normalize_startup_parameters, DefaultedNameSet, NavigationError, StartupParameterSet,
    TechnicalParameterFilter,
};

/// Host parameter listing the names filled in from user defaults.
pub const DEFAULTED_PARAMETER_NAMES: &str = "sap-ushell-defaultedParameterNames";
/// Host parameter carrying the key of a cross-app state.
pub const XAPP_STATE_PARAMETER: &str = "sap-xapp-state";

/// What the host handed over when the app was started.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InboundNavigation {
    pub startup_parameters: StartupParameterSet,
    pub defaulted_names: DefaultedNameSet,
    pub xapp_state_key: Option<String>,
}

impl InboundNavigation {
    /// Split the host's raw parameter map into the pieces the orchestrator needs.
    ///
    /// The raw map is kept whole; technical names are filtered later, during
    /// reconciliation.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] when the defaulted-names
    /// parameter is not a JSON-encoded list of strings.
    pub fn from_startup_parameters(startup: StartupParameterSet) -> Result<Self, NavigationError> {
        let defaulted_names = match startup.get(DEFAULTED_PARAMETER_NAMES) {
            None => DefaultedNameSet::default(),
            Some(raw) => parse_defaulted_names(raw)?,
        };
        let xapp_state_key =
            startup.get(XAPP_STATE_PARAMETER).and_then(first_string).filter(|key| !key.is_empty());
        Ok(Self { startup_parameters: startup, defaulted_names, xapp_state_key })
    }

    /// Check that every business parameter is a string or a non-empty list of
    /// strings. Names `technical` drops are not inspected.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] naming the first malformed
    /// parameter.
    pub fn validate(&self, technical: &TechnicalParameterFilter) -> Result<(), NavigationError> {
        normalize_startup_parameters(&self.startup_parameters, technical).map(|_| ())
    }

    #[must_use]
    pub fn has_startup_parameters(&self) -> bool {
        !self.startup_parameters.is_empty()
    }
}

fn parse_defaulted_names(raw: &Value) -> Result<DefaultedNameSet, NavigationError> {
    let encoded = match raw {
        Value::String(encoded) => encoded.as_str(),
        Value::Array(items) if items.len() == 1 => {
            items[0].as_str().ok_or_else(invalid_defaulted_names)?
        }
        _ => return Err(invalid_defaulted_names()),
    };
    let decoded: Value = serde_json::from_str(encoded).map_err(|_| invalid_defaulted_names())?;
    DefaultedNameSet::from_json(&decoded)
}

fn invalid_defaulted_names() -> NavigationError {
    NavigationError::InvalidInput(format!(
        "{DEFAULTED_PARAMETER_NAMES} MUST be a JSON encoded list of names"
    ))
}

fn first_string(raw: &Value) -> Option<String> {
    match raw {
        Value::String(value) => Some(value.clone()),
        Value::Array(items) => items.first().and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn startup(value: Value) -> StartupParameterSet {
        match value {
            Value::Object(map) => map,
            other => panic!("fixture must be an object, got {other}"),
        }
    }

    // Test IDs: TINB-001
    #[test]
    fn extracts_defaulted_names_and_cross_app_key() -> Result<(), NavigationError> {
        let inbound = InboundNavigation::from_startup_parameters(startup(json!({
            "sap-ushell-defaultedParameterNames": ["[\"Region\",\"Plant\"]"],
            "sap-xapp-state": ["XKEY"],
            "Region": "EU",
        })))?;
        assert!(inbound.defaulted_names.contains("Region"));
        assert!(inbound.defaulted_names.contains("Plant"));
        assert_eq!(inbound.xapp_state_key.as_deref(), Some("XKEY"));
        assert!(inbound.has_startup_parameters());
        Ok(())
    }

    // Test IDs: TINB-002
    #[test]
    fn rejects_malformed_defaulted_names() {
        for raw in [json!("Region"), json!(["[1]"]), json!(["a", "b"]), json!(7)] {
            let result = InboundNavigation::from_startup_parameters(startup(json!({
                "sap-ushell-defaultedParameterNames": raw,
            })));
            assert!(matches!(result, Err(NavigationError::InvalidInput(_))), "got {result:?}");
        }
    }

    // Test IDs: TINB-003
    #[test]
    fn empty_input_has_nothing_to_offer() -> Result<(), NavigationError> {
        let inbound = InboundNavigation::from_startup_parameters(StartupParameterSet::new())?;
        assert_eq!(inbound, InboundNavigation::default());
        assert!(!inbound.has_startup_parameters());
        Ok(())
    }

    // Test IDs: TINB-004
    #[test]
    fn validation_rejects_malformed_business_parameters_only() -> Result<(), NavigationError> {
        let filter = TechnicalParameterFilter::default();
        let malformed = InboundNavigation::from_startup_parameters(startup(json!({
            "Plant": "1000",
            "Region": { "x": 1 },
        })))?;
        assert!(matches!(malformed.validate(&filter), Err(NavigationError::InvalidInput(_))));

        let technical_noise = InboundNavigation::from_startup_parameters(startup(json!({
            "Plant": ["1000", "2000"],
            "sap-ui-tech-hint": { "x": 1 },
            "hcpApplicationId": 42,
        })))?;
        technical_noise.validate(&filter)?;
        Ok(())
    }
}
