//! Finds the pod currently holding leadership.
//!
//! A record only counts as an observation of a leader if it names a holder and that holder pod
//! still exists. Everything else is reported as a probe failure so that the wait built on
//! [`retry_with_timeout`] keeps polling until the record has converged.

use snafu::{ResultExt, Snafu, ensure};

use crate::{
    backend::FailoverBackend,
    record::{LeaderElectionLock, LeaderElectionRecord},
    retry::{RetryPolicy, retry_with_timeout},
};

pub type BoxedError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to fetch leader election record from lock {lock_name:?}"))]
    FetchRecord {
        source: BoxedError,
        lock_name: String,
    },

    #[snafu(display("leader election record in lock {lock_name:?} hasn't been created"))]
    RecordMissing { lock_name: String },

    #[snafu(display("no leader is currently elected in lock {lock_name:?}"))]
    NoLeaderElected { lock_name: String },

    #[snafu(display("waiting for the new leader to be elected, {holder:?} is still reported"))]
    PreviousLeaderStillReported { holder: String },

    #[snafu(display("failed to check whether leader pod {holder:?} exists"))]
    CheckHolder { source: BoxedError, holder: String },

    #[snafu(display("leader election record is stale, leader pod {holder:?} doesn't exist"))]
    StaleRecord { holder: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    /// Returns `true` for failures meaning "no valid leader yet" rather than a backend error.
    pub fn is_record_not_yet_valid(&self) -> bool {
        matches!(
            self,
            Error::RecordMissing { .. }
                | Error::NoLeaderElected { .. }
                | Error::PreviousLeaderStillReported { .. }
                | Error::StaleRecord { .. }
        )
    }

    /// The holder named by the record the failing attempt looked at, if it got that far.
    pub fn observed_holder(&self) -> Option<&str> {
        match self {
            Error::PreviousLeaderStillReported { holder }
            | Error::CheckHolder { holder, .. }
            | Error::StaleRecord { holder } => Some(holder.as_str()),
            _ => None,
        }
    }
}

pub struct LeaderRecordObserver<'a, B> {
    backend: &'a B,
    lock: LeaderElectionLock,
}

impl<'a, B: FailoverBackend> LeaderRecordObserver<'a, B> {
    pub fn new(backend: &'a B, lock: LeaderElectionLock) -> Self {
        Self { backend, lock }
    }

    /// Performs a single observation without any retries.
    pub async fn observe_current_leader(&self) -> Result<LeaderElectionRecord> {
        self.observe(None).await
    }

    /// Waits until the record names an existing leader pod.
    pub async fn await_current_leader(&self, policy: &RetryPolicy) -> Result<LeaderElectionRecord> {
        retry_with_timeout(policy, || self.observe(None)).await
    }

    /// Waits until the record names an existing leader pod other than `previous_holder`.
    pub async fn await_leader_change(
        &self,
        previous_holder: &str,
        policy: &RetryPolicy,
    ) -> Result<LeaderElectionRecord> {
        retry_with_timeout(policy, || self.observe(Some(previous_holder))).await
    }

    async fn observe(&self, rejected_holder: Option<&str>) -> Result<LeaderElectionRecord> {
        let lock_name = &self.lock.name;
        let record = self
            .backend
            .fetch_record(&self.lock)
            .await
            .map_err(BoxedError::from)
            .context(FetchRecordSnafu { lock_name })?
            .ok_or_else(|| RecordMissingSnafu { lock_name }.build())?;

        ensure!(record.has_holder(), NoLeaderElectedSnafu { lock_name });
        tracing::info!(?record, "Fetched leader election record");

        let holder = &record.holder_identity;
        ensure!(
            rejected_holder.is_none_or(|rejected| rejected.trim() != holder.trim()),
            PreviousLeaderStillReportedSnafu { holder }
        );

        let exists = self
            .backend
            .entity_exists(holder)
            .await
            .map_err(BoxedError::from)
            .context(CheckHolderSnafu { holder })?;
        ensure!(exists, StaleRecordSnafu { holder });

        Ok(record)
    }
}
