use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use navstate_core::{AnnotationIndex, MetadataAnnotationIndex, StartupParameterSet};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ulid::Ulid;

/// A persisted app state before and after it has been written.
#[derive(Debug, Clone, PartialEq)]
pub struct AppStateHandle {
    key: String,
    data: Option<Value>,
}

impl AppStateHandle {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into(), data: None }
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn set_data(&mut self, data: Value) {
        self.data = Some(data);
    }

    #[must_use]
    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }
}

/// Key/blob storage for app states.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    /// Reserve a fresh key. Nothing is written until [`PersistenceStore::save`].
    async fn create_empty(&self) -> Result<AppStateHandle>;

    async fn save(&self, handle: &AppStateHandle) -> Result<()>;

    /// `Ok(None)` when no state exists under `key`.
    async fn fetch_by_key(&self, key: &str) -> Result<Option<Value>>;
}

/// Source of the annotations used to redact outbound data.
#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn annotation_index(&self) -> Result<Arc<dyn AnnotationIndex + Send + Sync>>;
}

/// Where an outbound navigation goes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NavigationTarget {
    pub semantic_object: String,
    pub action: String,
    #[serde(default)]
    pub params: StartupParameterSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_state_key: Option<String>,
}

impl NavigationTarget {
    #[must_use]
    pub fn intent(&self) -> String {
        format!("#{}-{}", self.semantic_object, self.action)
    }
}

/// The host's cross-application navigation facilities.
#[async_trait]
pub trait CrossAppNavigationService: Send + Sync {
    async fn is_supported(&self, target: &NavigationTarget) -> Result<bool>;

    async fn to_external(&self, target: &NavigationTarget) -> Result<()>;

    async fn href_for_external(&self, target: &NavigationTarget) -> Result<String>;

    /// State handed over by the app that started this one.
    async fn fetch_cross_app_state(&self, key: &str) -> Result<Option<Value>>;
}

/// Read and rewrite the current URL hash fragment.
pub trait HashAccess: Send + Sync {
    fn hash(&self) -> String;

    /// Replace the hash without adding a browser history entry.
    fn replace_hash(&self, hash: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryPersistenceStore {
    states: Mutex<HashMap<String, Value>>,
    saves: AtomicUsize,
    failing: AtomicBool,
}

impl InMemoryPersistenceStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, data: Value) {
        self.states.lock().insert(key.into(), data);
    }

    #[must_use]
    pub fn state(&self, key: &str) -> Option<Value> {
        self.states.lock().get(key).cloned()
    }

    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Make every later store operation fail.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    fn ensure_available(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("persistence store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceStore for InMemoryPersistenceStore {
    async fn create_empty(&self) -> Result<AppStateHandle> {
        self.ensure_available()?;
        Ok(AppStateHandle::new(Ulid::new().to_string()))
    }

    async fn save(&self, handle: &AppStateHandle) -> Result<()> {
        self.ensure_available()?;
        let data = handle.data().cloned().unwrap_or(Value::Null);
        self.states.lock().insert(handle.key().to_string(), data);
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn fetch_by_key(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_available()?;
        Ok(self.state(key))
    }
}

/// Metadata service over a fixed annotation index.
#[derive(Debug, Default)]
pub struct StaticMetadataService {
    index: Arc<MetadataAnnotationIndex>,
    failing: AtomicBool,
}

impl StaticMetadataService {
    #[must_use]
    pub fn new(index: MetadataAnnotationIndex) -> Self {
        Self { index: Arc::new(index), failing: AtomicBool::new(false) }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl MetadataService for StaticMetadataService {
    async fn annotation_index(&self) -> Result<Arc<dyn AnnotationIndex + Send + Sync>> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("metadata document could not be loaded"));
        }
        let index: Arc<dyn AnnotationIndex + Send + Sync> = self.index.clone();
        Ok(index)
    }
}

/// One recorded call to [`CrossAppNavigationService::to_external`].
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchedNavigation {
    pub target: NavigationTarget,
    /// The URL hash at the moment the navigation was issued.
    pub hash_at_dispatch: Option<String>,
}

/// Navigation service that records what it was asked to do.
#[derive(Default)]
pub struct RecordingNavigationService {
    supported: AtomicBool,
    failing_support_check: AtomicBool,
    failing_cross_app: AtomicBool,
    cross_app_states: Mutex<HashMap<String, Value>>,
    dispatched: Mutex<Vec<DispatchedNavigation>>,
    hash_observer: Option<Arc<dyn HashAccess>>,
}

impl RecordingNavigationService {
    #[must_use]
    pub fn new() -> Self {
        Self { supported: AtomicBool::new(true), ..Self::default() }
    }

    /// Capture `hash` with every dispatched navigation.
    #[must_use]
    pub fn with_hash_observer(mut self, hash: Arc<dyn HashAccess>) -> Self {
        self.hash_observer = Some(hash);
        self
    }

    pub fn set_supported(&self, supported: bool) {
        self.supported.store(supported, Ordering::SeqCst);
    }

    pub fn set_failing_support_check(&self, failing: bool) {
        self.failing_support_check.store(failing, Ordering::SeqCst);
    }

    pub fn set_failing_cross_app(&self, failing: bool) {
        self.failing_cross_app.store(failing, Ordering::SeqCst);
    }

    pub fn insert_cross_app_state(&self, key: impl Into<String>, data: Value) {
        self.cross_app_states.lock().insert(key.into(), data);
    }

    #[must_use]
    pub fn dispatched(&self) -> Vec<DispatchedNavigation> {
        self.dispatched.lock().clone()
    }
}

#[async_trait]
impl CrossAppNavigationService for RecordingNavigationService {
    async fn is_supported(&self, _target: &NavigationTarget) -> Result<bool> {
        if self.failing_support_check.load(Ordering::SeqCst) {
            return Err(anyhow!("intent support check unavailable"));
        }
        Ok(self.supported.load(Ordering::SeqCst))
    }

    async fn to_external(&self, target: &NavigationTarget) -> Result<()> {
        let hash_at_dispatch = self.hash_observer.as_ref().map(|hash| hash.hash());
        let dispatched = DispatchedNavigation { target: target.clone(), hash_at_dispatch };
        self.dispatched.lock().push(dispatched);
        Ok(())
    }

    async fn href_for_external(&self, target: &NavigationTarget) -> Result<String> {
        let mut query = target
            .params
            .iter()
            .map(|(name, value)| {
                let value = value.as_str().map_or_else(|| value.to_string(), str::to_string);
                format!("{name}={value}")
            })
            .collect::<Vec<_>>();
        if let Some(key) = &target.app_state_key {
            query.push(format!("sap-xapp-state={key}"));
        }
        if query.is_empty() {
            return Ok(target.intent());
        }
        Ok(format!("{}?{}", target.intent(), query.join("&")))
    }

    async fn fetch_cross_app_state(&self, key: &str) -> Result<Option<Value>> {
        if self.failing_cross_app.load(Ordering::SeqCst) {
            return Err(anyhow!("cross-app state service unavailable"));
        }
        Ok(self.cross_app_states.lock().get(key).cloned())
    }
}

/// URL hash held in memory, with a log of every replacement.
#[derive(Debug, Default)]
pub struct InMemoryHash {
    current: Mutex<String>,
    history: Mutex<Vec<String>>,
}

impl InMemoryHash {
    #[must_use]
    pub fn new(initial: impl Into<String>) -> Self {
        Self { current: Mutex::new(initial.into()), history: Mutex::new(Vec::new()) }
    }

    #[must_use]
    pub fn replacements(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

impl HashAccess for InMemoryHash {
    fn hash(&self) -> String {
        self.current.lock().clone()
    }

    fn replace_hash(&self, hash: &str) {
        *self.current.lock() = hash.to_string();
        self.history.lock().push(hash.to_string());
    }
}
