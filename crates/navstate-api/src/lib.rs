//! Async orchestration of inbound and outbound navigation state.

mod cache;
mod collaborators;
mod orchestrator;
mod sqlite;

pub use cache::{AppStatePersistenceCache, CacheStats, SaveOutcome};
pub use collaborators::{
    AppStateHandle, CrossAppNavigationService, DispatchedNavigation, HashAccess, InMemoryHash,
    InMemoryPersistenceStore, MetadataService, NavigationTarget, PersistenceStore,
    RecordingNavigationService, StaticMetadataService,
};
pub use orchestrator::{
    Collaborators, NavigationDispatch, NavigationRequest, NavigationType, Orchestrator,
    ParseFailure, ParseResult, PreparedLink, ResolvedNavigation, SharedParse,
};
pub use sqlite::SqlitePersistenceStore;
