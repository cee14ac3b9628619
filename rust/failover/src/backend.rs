//! The cluster operations leader observation and failover verification depend on.

use std::future::Future;

use crate::{
    application::ApplicationState,
    record::{LeaderElectionLock, LeaderElectionRecord},
};

/// Access to the cluster the operator under test runs in.
///
/// All identities are names of pods in the operator namespace the backend is bound to.
pub trait FailoverBackend {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reads the current leader election record. `None` means the lock or its record has not been
    /// created yet.
    fn fetch_record(
        &self,
        lock: &LeaderElectionLock,
    ) -> impl Future<Output = Result<Option<LeaderElectionRecord>, Self::Error>>;

    fn entity_exists(&self, identity: &str) -> impl Future<Output = Result<bool, Self::Error>>;

    /// Removes the entity. An entity that is already gone is not an error.
    fn delete_entity(&self, identity: &str) -> impl Future<Output = Result<(), Self::Error>>;

    fn workload_log_contains(
        &self,
        owner_identity: &str,
        marker: &str,
    ) -> impl Future<Output = Result<bool, Self::Error>>;

    fn application_state(
        &self,
        namespace: &str,
        name: &str,
    ) -> impl Future<Output = Result<Option<ApplicationState>, Self::Error>>;
}
