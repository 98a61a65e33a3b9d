use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

mod app_data;
mod app_state_key;
mod config;
mod inbound;
mod reconcile;
mod redact;
mod selection_variant;

pub use app_data::{
    AppData, PropertyTexts, SemanticDateEntry, SemanticDates, ValueText, ValueTextContext,
    ValueTexts,
};
pub use app_state_key::{decode_app_state_key, encode_app_state_key, IAPP_STATE_PARAMETER};
pub use config::NavigationConfig;
pub use inbound::{InboundNavigation, DEFAULTED_PARAMETER_NAMES, XAPP_STATE_PARAMETER};
pub use reconcile::{
    normalize_startup_parameters, ConflictPolicy, DefaultedNameSet, ParameterReconciler,
    ParameterValue, ReconciledVariants, StartupParameterSet, TechnicalParameterFilter,
    DEFAULT_TECHNICAL_PARAMETERS, RESERVED_PARAMETER_PREFIX,
};
pub use redact::{
    AnnotationIndex, EntityType, FieldControl, MetadataAnnotationIndex, MetadataShape,
    Multiplicity, NavigationPropertyMetadata, PropertyAnnotations, PropertyMetadata,
    RedactionOptions, RedactionOutcome, SensitiveDataRedactor, DEFAULT_SERVICE_ROOT,
};
pub use selection_variant::{SelectOperator, SelectOption, SelectionVariant, Sign};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum NavigationError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("technical error [{code}]: {message}")]
    Technical { code: TechnicalErrorCode, message: String },
}

impl NavigationError {
    #[must_use]
    pub fn technical(code: TechnicalErrorCode, message: impl Into<String>) -> Self {
        Self::Technical { code, message: message.into() }
    }

    /// Stable error code reported to callers, independent of the message text.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "NavigationHandler.INVALID_INPUT",
            Self::Parse(_) => "SelectionVariant.PARSE_ERROR",
            Self::Technical { code, .. } => code.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TechnicalErrorCode {
    AppStateFetch,
    StartupStateFetch,
    SupportCheck,
    NotSupported,
    AppStateSave,
    MetadataLoad,
    Dispatch,
}

impl TechnicalErrorCode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AppStateFetch => "NavigationHandler.getDataFromAppState.failed",
            Self::StartupStateFetch => "NavigationHandler.getStartupState.failed",
            Self::SupportCheck => "NavigationHandler.isIntentSupported.failed",
            Self::NotSupported => "NavigationHandler.isIntentSupported.notSupported",
            Self::AppStateSave => "NavigationHandler.AppStateSave.failed",
            Self::MetadataLoad => "NavigationHandler.MetadataLoad.failed",
            Self::Dispatch => "NavigationHandler.navigate.failed",
        }
    }
}

impl Display for TechnicalErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
