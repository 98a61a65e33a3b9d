use serde::{Deserialize, Serialize};

use crate::{
    ConflictPolicy, ParameterReconciler, RedactionOptions, SensitiveDataRedactor,
    TechnicalParameterFilter, DEFAULT_SERVICE_ROOT, DEFAULT_TECHNICAL_PARAMETERS,
};

/// Settings shared by every navigation of one application instance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct NavigationConfig {
    pub conflict_policy: ConflictPolicy,
    /// Inbound names to drop in addition to the `sap-` prefix.
    pub technical_parameters: Vec<String>,
    pub service_root: String,
    pub strip_measures_on_navigate: bool,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            conflict_policy: ConflictPolicy::default(),
            technical_parameters: DEFAULT_TECHNICAL_PARAMETERS
                .iter()
                .map(|name| (*name).to_string())
                .collect(),
            service_root: DEFAULT_SERVICE_ROOT.to_string(),
            strip_measures_on_navigate: true,
        }
    }
}

impl NavigationConfig {
    #[must_use]
    pub fn technical_filter(&self) -> TechnicalParameterFilter {
        TechnicalParameterFilter::new(self.technical_parameters.iter().cloned())
    }

    #[must_use]
    pub fn reconciler(&self) -> ParameterReconciler {
        ParameterReconciler::new(self.conflict_policy, self.technical_filter())
    }

    #[must_use]
    pub fn redactor(&self) -> SensitiveDataRedactor {
        SensitiveDataRedactor::new(self.service_root.clone())
    }

    #[must_use]
    pub fn outbound_redaction(&self) -> RedactionOptions {
        RedactionOptions { remove_measures: self.strip_measures_on_navigate }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // Test IDs: TCFG-001
    #[test]
    fn partial_config_falls_back_to_defaults() -> Result<(), serde_json::Error> {
        let config: NavigationConfig =
            serde_json::from_value(json!({ "conflict_policy": "URLParamWins" }))?;
        assert_eq!(config.conflict_policy, ConflictPolicy::SecondWins);
        assert_eq!(config.technical_parameters, vec!["hcpApplicationId".to_string()]);
        assert_eq!(config.service_root, DEFAULT_SERVICE_ROOT);
        assert!(config.outbound_redaction().remove_measures);
        assert!(config.technical_filter().is_technical("hcpApplicationId"));
        Ok(())
    }
}
