use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use navstate_core::{
    decode_app_state_key, encode_app_state_key, AppData, DefaultedNameSet, InboundNavigation,
    NavigationConfig, NavigationError, ParameterReconciler, RedactionOutcome, SelectOperator,
    SelectionVariant, SensitiveDataRedactor, Sign, StartupParameterSet, TechnicalErrorCode,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    AppStateHandle, AppStatePersistenceCache, CacheStats, CrossAppNavigationService, HashAccess,
    MetadataService, NavigationTarget, PersistenceStore,
};

/// How the current app state was reached.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum NavigationType {
    /// Nothing was handed over; the app starts fresh.
    Initial,
    /// Business parameters arrived in the URL.
    UrlParams,
    /// State was handed over by another app.
    XAppState,
    /// State was restored from this app's own hash key.
    IAppState,
}

impl NavigationType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::UrlParams => "url_params",
            Self::XAppState => "xapp_state",
            Self::IAppState => "iapp_state",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedNavigation {
    pub navigation_type: NavigationType,
    pub app_data: AppData,
    /// The host's raw parameters, technical names included.
    pub startup_parameters: StartupParameterSet,
    /// Values that only came from user defaults, when reconciliation ran.
    pub defaulted_variant: Option<SelectionVariant>,
    pub navigation_is_defaults_only: bool,
}

/// A failed [`Orchestrator::parse_navigation`], with the raw parameters the
/// app can still fall back to.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{error}")]
pub struct ParseFailure {
    pub error: NavigationError,
    pub startup_parameters: StartupParameterSet,
}

pub type ParseResult = Result<ResolvedNavigation, ParseFailure>;

/// One resolution of the inbound navigation, awaitable from many places.
pub type SharedParse = Shared<BoxFuture<'static, ParseResult>>;

/// An outbound navigation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NavigationRequest {
    pub semantic_object: String,
    pub action: String,
    pub selection_variant: SelectionVariant,
    /// Plain parameters merged into the selection variant before leaving.
    pub parameters: StartupParameterSet,
    /// State of the current app to keep under the hash before leaving.
    pub inner_app_data: Option<AppData>,
    /// Extra payload for the target app; its selection variant is replaced.
    pub external_app_data: AppData,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavigationDispatch {
    pub target: NavigationTarget,
    pub inner_app_state_key: Option<String>,
    pub redaction: RedactionOutcome,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PreparedLink {
    pub href: String,
    pub target: NavigationTarget,
    pub redaction: RedactionOutcome,
}

/// The services an [`Orchestrator`] talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn PersistenceStore>,
    pub metadata: Arc<dyn MetadataService>,
    pub navigation: Arc<dyn CrossAppNavigationService>,
    pub hash: Arc<dyn HashAccess>,
}

/// Resolves where the app came from and prepares where it goes next.
pub struct Orchestrator {
    config: NavigationConfig,
    reconciler: ParameterReconciler,
    redactor: SensitiveDataRedactor,
    collaborators: Collaborators,
    inbound: InboundNavigation,
    cache: AppStatePersistenceCache,
    parse: Mutex<Option<SharedParse>>,
}

struct ParseContext {
    reconciler: ParameterReconciler,
    collaborators: Collaborators,
    inbound: InboundNavigation,
}

impl Orchestrator {
    /// Bind the inbound parameters of this app instance to its collaborators.
    ///
    /// # Errors
    /// Returns [`NavigationError::InvalidInput`] when a business startup
    /// parameter is neither a string nor a non-empty list of strings.
    pub fn new(
        config: NavigationConfig,
        collaborators: Collaborators,
        inbound: InboundNavigation,
    ) -> Result<Self, NavigationError> {
        let reconciler = config.reconciler();
        inbound.validate(reconciler.technical_filter())?;
        Ok(Self {
            reconciler,
            redactor: config.redactor(),
            config,
            collaborators,
            inbound,
            cache: AppStatePersistenceCache::new(),
            parse: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn config(&self) -> &NavigationConfig {
        &self.config
    }

    #[must_use]
    pub fn inbound(&self) -> &InboundNavigation {
        &self.inbound
    }

    /// Work out how the app was reached and what state it should start with.
    ///
    /// The work runs once; every call returns a handle to the same result.
    #[must_use]
    pub fn parse_navigation(&self) -> SharedParse {
        let mut parse = self.parse.lock();
        if let Some(shared) = parse.as_ref() {
            return shared.clone();
        }
        let context = ParseContext {
            reconciler: self.reconciler.clone(),
            collaborators: self.collaborators.clone(),
            inbound: self.inbound.clone(),
        };
        let shared = resolve_navigation(context).boxed().shared();
        *parse = Some(shared.clone());
        shared
    }

    /// Persist the current app's state and point the URL hash at it.
    ///
    /// An unchanged state reuses the previous key without writing.
    ///
    /// # Errors
    /// Returns [`NavigationError::Technical`] with
    /// [`TechnicalErrorCode::AppStateSave`] when the store rejects the write.
    pub async fn store_inner_app_state(
        &self,
        app_data: &AppData,
        skip_hash_update: bool,
    ) -> Result<String, NavigationError> {
        let blob = app_data.to_blob()?;
        let store = Arc::clone(&self.collaborators.store);
        let outcome = self.cache.save_if_changed(blob, |blob| persist_blob(store, blob)).await?;
        if !skip_hash_update {
            let hash = self.collaborators.hash.hash();
            let rewritten = encode_app_state_key(&hash, &outcome.key);
            if rewritten != hash {
                self.collaborators.hash.replace_hash(&rewritten);
            }
        }
        Ok(outcome.key)
    }

    /// Leave the app for `request`'s target.
    ///
    /// The inner state is saved and the hash rewritten before the navigation is
    /// issued, so coming back restores the current app.
    ///
    /// # Errors
    /// - [`NavigationError::InvalidInput`] for malformed parameters.
    /// - [`NavigationError::Technical`] when metadata cannot be loaded, the
    ///   intent check fails or says no, a state cannot be saved, or the host
    ///   refuses the navigation.
    pub async fn navigate(
        &self,
        request: NavigationRequest,
    ) -> Result<NavigationDispatch, NavigationError> {
        let (outer, redaction, mut target) = self.prepare_outbound(&request).await?;

        let supported = self
            .collaborators
            .navigation
            .is_supported(&target)
            .await
            .map_err(|err| technical(TechnicalErrorCode::SupportCheck, &err))?;
        if !supported {
            tracing::warn!(intent = %target.intent(), "navigation target is not supported");
            return Err(NavigationError::technical(
                TechnicalErrorCode::NotSupported,
                format!("{} is not supported", target.intent()),
            ));
        }

        let inner_app_state_key = match &request.inner_app_data {
            Some(inner) => Some(self.store_inner_app_state(inner, false).await?),
            None => None,
        };

        target.app_state_key = Some(self.persist_outer(&outer).await?);

        self.collaborators
            .navigation
            .to_external(&target)
            .await
            .map_err(|err| technical(TechnicalErrorCode::Dispatch, &err))?;
        tracing::info!(
            intent = %target.intent(),
            removed = redaction.removed.len(),
            "navigation dispatched"
        );

        Ok(NavigationDispatch { target, inner_app_state_key, redaction })
    }

    /// Compute a link to `request`'s target without leaving the app.
    ///
    /// # Errors
    /// As for [`Orchestrator::navigate`], except that no intent check is made.
    pub async fn href_for_navigation(
        &self,
        request: NavigationRequest,
    ) -> Result<PreparedLink, NavigationError> {
        let (outer, redaction, mut target) = self.prepare_outbound(&request).await?;
        target.app_state_key = Some(self.persist_outer(&outer).await?);
        let href = self
            .collaborators
            .navigation
            .href_for_external(&target)
            .await
            .map_err(|err| technical(TechnicalErrorCode::Dispatch, &err))?;
        Ok(PreparedLink { href, target, redaction })
    }

    #[must_use]
    pub fn state_cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop the remembered inner state so the next save always writes.
    pub fn reset_state_cache(&self) {
        self.cache.reset();
    }

    async fn prepare_outbound(
        &self,
        request: &NavigationRequest,
    ) -> Result<(AppData, RedactionOutcome, NavigationTarget), NavigationError> {
        let reconciled = self.reconciler.reconcile(
            &request.selection_variant,
            &request.parameters,
            &DefaultedNameSet::default(),
        )?;

        let mut outer = request.external_app_data.clone();
        outer.selection_variant = Some(reconciled.navigation_variant);

        let index = self
            .collaborators
            .metadata
            .annotation_index()
            .await
            .map_err(|err| technical(TechnicalErrorCode::MetadataLoad, &err))?;
        let options = self.config.outbound_redaction();
        let redaction = self.redactor.redact(&mut outer, index.as_ref(), options);

        let params = outer.selection_variant.as_ref().map(url_parameters).unwrap_or_default();
        let target = NavigationTarget {
            semantic_object: request.semantic_object.clone(),
            action: request.action.clone(),
            params,
            app_state_key: None,
        };
        Ok((outer, redaction, target))
    }

    async fn persist_outer(&self, outer: &AppData) -> Result<String, NavigationError> {
        persist_blob(Arc::clone(&self.collaborators.store), outer.to_blob()?).await
    }
}

fn technical(code: TechnicalErrorCode, err: &anyhow::Error) -> NavigationError {
    NavigationError::technical(code, format!("{err:#}"))
}

/// Parameters a target URL can carry: every parameter, plus select options
/// made of exactly one `I EQ` range.
fn url_parameters(variant: &SelectionVariant) -> Map<String, Value> {
    let mut params = Map::new();
    for name in variant.parameter_names() {
        if let Some(value) = variant.parameter(name) {
            params.insert(name.to_string(), Value::String(value.to_string()));
        }
    }
    for name in variant.select_options_property_names() {
        if let Some([single]) = variant.select_option(name) {
            if single.sign == Sign::Include && single.operator == SelectOperator::Eq {
                params.insert(name.to_string(), Value::String(single.low.clone()));
            }
        }
    }
    params
}

async fn persist_blob(
    store: Arc<dyn PersistenceStore>,
    blob: Value,
) -> Result<String, NavigationError> {
    let save_failed = |err: anyhow::Error| technical(TechnicalErrorCode::AppStateSave, &err);
    let mut handle: AppStateHandle = store.create_empty().await.map_err(save_failed)?;
    handle.set_data(blob);
    store.save(&handle).await.map_err(save_failed)?;
    Ok(handle.key().to_string())
}

async fn resolve_navigation(context: ParseContext) -> ParseResult {
    let startup = context.inbound.startup_parameters.clone();
    let fail = |error: NavigationError| {
        tracing::warn!(code = error.code(), "navigation parsing failed");
        ParseFailure { error, startup_parameters: startup.clone() }
    };

    let hash = context.collaborators.hash.hash();
    if let Some(key) = decode_app_state_key(&hash) {
        tracing::debug!(key = %key, "restoring inner app state from hash");
        let blob = context
            .collaborators
            .store
            .fetch_by_key(&key)
            .await
            .map_err(|err| fail(technical(TechnicalErrorCode::AppStateFetch, &err)))?;
        let app_data = match blob {
            Some(blob) => AppData::from_blob(&blob).map_err(fail)?,
            None => AppData::default(),
        };
        return Ok(ResolvedNavigation {
            navigation_type: NavigationType::IAppState,
            app_data,
            startup_parameters: startup.clone(),
            defaulted_variant: None,
            navigation_is_defaults_only: false,
        });
    }

    if let Some(key) = context.inbound.xapp_state_key.as_deref() {
        tracing::debug!(key, "fetching cross-app state");
        let payload = context
            .collaborators
            .navigation
            .fetch_cross_app_state(key)
            .await
            .map_err(|err| fail(technical(TechnicalErrorCode::StartupStateFetch, &err)))?;
        let (mut app_data, had_payload) = match payload {
            Some(blob) => (AppData::from_blob(&blob).map_err(fail)?, true),
            None => (AppData::default(), false),
        };
        let base = app_data.selection_variant.take().unwrap_or_default();
        let reconciled = context
            .reconciler
            .reconcile(&base, &startup, &context.inbound.defaulted_names)
            .map_err(fail)?;
        if !had_payload && reconciled.is_empty() {
            return Err(fail(NavigationError::technical(
                TechnicalErrorCode::AppStateFetch,
                format!("cross-app state {key} is empty and no parameters were passed"),
            )));
        }
        app_data.selection_variant = Some(reconciled.navigation_variant);
        return Ok(ResolvedNavigation {
            navigation_type: NavigationType::XAppState,
            app_data,
            startup_parameters: startup.clone(),
            defaulted_variant: Some(reconciled.defaulted_variant),
            navigation_is_defaults_only: reconciled.navigation_is_defaults_only,
        });
    }

    if context.inbound.has_startup_parameters() {
        let reconciled = context
            .reconciler
            .reconcile(&SelectionVariant::new(), &startup, &context.inbound.defaulted_names)
            .map_err(fail)?;
        if !reconciled.is_empty() {
            tracing::debug!("resolved navigation from URL parameters");
            return Ok(ResolvedNavigation {
                navigation_type: NavigationType::UrlParams,
                app_data: AppData::with_selection_variant(reconciled.navigation_variant),
                startup_parameters: startup.clone(),
                defaulted_variant: Some(reconciled.defaulted_variant),
                navigation_is_defaults_only: reconciled.navigation_is_defaults_only,
            });
        }
    }

    tracing::debug!("no navigation state handed over; starting fresh");
    Ok(ResolvedNavigation {
        navigation_type: NavigationType::Initial,
        app_data: AppData::default(),
        startup_parameters: startup.clone(),
        defaulted_variant: None,
        navigation_is_defaults_only: false,
    })
}
