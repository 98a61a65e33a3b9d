use std::path::Path;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use navstate_store_sqlite::{IntegrityReport, SchemaStatus, SqliteAppStateStore};
use parking_lot::Mutex;
use serde_json::Value;
use time::OffsetDateTime;

use crate::{AppStateHandle, PersistenceStore};

/// [`PersistenceStore`] backed by a `SQLite` database file.
pub struct SqlitePersistenceStore {
    store: Mutex<SqliteAppStateStore>,
}

impl SqlitePersistenceStore {
    /// Open the database and bring its schema up to date.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or migrated.
    pub fn open(db_path: &Path) -> Result<Self> {
        let mut store = SqliteAppStateStore::open(db_path)?;
        store.migrate()?;
        tracing::info!(path = %db_path.display(), "opened sqlite app state store");
        Ok(Self { store: Mutex::new(store) })
    }

    /// Inspect schema status without mutating data.
    ///
    /// # Errors
    /// Returns an error when the `SQLite` database cannot be queried.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.store.lock().schema_status()
    }

    /// Delete states not written since `cutoff`.
    ///
    /// # Errors
    /// Returns an error when the purge fails.
    pub fn purge_older_than(&self, cutoff: OffsetDateTime) -> Result<usize> {
        self.store.lock().purge_older_than(cutoff)
    }

    /// # Errors
    /// Returns an error when the delete fails.
    pub fn delete_state(&self, key: &str) -> Result<bool> {
        self.store.lock().delete_state(key)
    }

    /// # Errors
    /// Returns an error when diagnostics cannot be executed.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        self.store.lock().integrity_check()
    }
}

#[async_trait]
impl PersistenceStore for SqlitePersistenceStore {
    async fn create_empty(&self) -> Result<AppStateHandle> {
        Ok(AppStateHandle::new(SqliteAppStateStore::new_key()))
    }

    async fn save(&self, handle: &AppStateHandle) -> Result<()> {
        let data = handle
            .data()
            .ok_or_else(|| anyhow!("app state {} has no data to save", handle.key()))?;
        self.store.lock().save_state(handle.key(), data)?;
        Ok(())
    }

    /// Keys this store never minted, such as legacy or foreign references,
    /// resolve as `Ok(None)`.
    async fn fetch_by_key(&self, key: &str) -> Result<Option<Value>> {
        let stored = self.store.lock().load_state(key)?;
        Ok(stored.map(|state| state.payload))
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;
    use std::sync::Arc;

    use navstate_core::{
        AppData, InboundNavigation, MetadataAnnotationIndex, MetadataShape, NavigationConfig,
    };
    use serde_json::json;
    use ulid::Ulid;

    use super::*;
    use crate::{
        Collaborators, InMemoryHash, NavigationType, Orchestrator, RecordingNavigationService,
        StaticMetadataService,
    };

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("navstate-api-{}.sqlite3", Ulid::new()))
    }

    fn cleanup(db_path: &Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{}", db_path.display(), suffix));
        }
    }

    // Test IDs: TAPI-SQL-001
    #[tokio::test]
    async fn sqlite_store_round_trips_through_the_persistence_interface() -> Result<()> {
        let db_path = unique_temp_db_path();
        let store = SqlitePersistenceStore::open(&db_path)?;

        let mut handle = store.create_empty().await?;
        handle.set_data(json!({ "customData": { "page": 4 } }));
        store.save(&handle).await?;

        let reopened = SqlitePersistenceStore::open(&db_path)?;
        let fetched = reopened.fetch_by_key(handle.key()).await?;
        assert_eq!(fetched, Some(json!({ "customData": { "page": 4 } })));

        assert!(reopened.schema_status()?.pending_versions.is_empty());
        assert!(reopened.integrity_check()?.digest_mismatches.is_empty());
        assert!(reopened.delete_state(handle.key())?);
        assert_eq!(reopened.fetch_by_key(handle.key()).await?, None);

        drop(store);
        drop(reopened);
        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-SQL-002
    #[tokio::test]
    async fn saving_an_empty_handle_is_rejected() -> Result<()> {
        let db_path = unique_temp_db_path();
        let store = SqlitePersistenceStore::open(&db_path)?;
        let handle = store.create_empty().await?;
        assert!(store.save(&handle).await.is_err());
        assert_eq!(store.schema_status()?.current_version, 1);
        drop(store);
        cleanup(&db_path);
        Ok(())
    }

    // Test IDs: TAPI-SQL-003
    #[tokio::test]
    async fn foreign_hash_keys_resolve_as_empty_inner_state() -> Result<()> {
        let db_path = unique_temp_db_path();
        let store = Arc::new(SqlitePersistenceStore::open(&db_path)?);
        assert_eq!(store.fetch_by_key("OLD1").await?, None);
        assert!(!store.delete_state("OLD1")?);

        let collaborators = Collaborators {
            store: store.clone(),
            metadata: Arc::new(StaticMetadataService::new(MetadataAnnotationIndex::new(
                MetadataShape::Flat,
            ))),
            navigation: Arc::new(RecordingNavigationService::new()),
            hash: Arc::new(InMemoryHash::new("#Obj-act/route/sap-iapp-state=OLD1")),
        };
        let orchestrator = Orchestrator::new(
            NavigationConfig::default(),
            collaborators,
            InboundNavigation::default(),
        )?;
        let resolved = match orchestrator.parse_navigation().await {
            Ok(resolved) => resolved,
            Err(failure) => panic!("foreign key should not fail parsing: {failure}"),
        };
        assert_eq!(resolved.navigation_type, NavigationType::IAppState);
        assert_eq!(resolved.app_data, AppData::default());

        drop(orchestrator);
        drop(store);
        cleanup(&db_path);
        Ok(())
    }
}
