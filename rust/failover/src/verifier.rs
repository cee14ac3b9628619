//! End-to-end verification that leadership moves to another pod once the leader is deleted.
//!
//! A run walks linearly through [`FailoverPhase`]s. Waiting happens only inside a phase, through
//! [`retry_with_timeout`]; a failed phase ends the run and the returned [`Error`] tells which phase
//! failed and what was observed last.

use serde::Serialize;
use snafu::{ResultExt, Snafu, ensure};
use strum::{Display, EnumDiscriminants, IntoStaticStr};

use crate::{
    application::{ApplicationState, WorkloadRef},
    backend::FailoverBackend,
    observer::{self, BoxedError, LeaderRecordObserver},
    record::{LeaderElectionLock, LeaderElectionRecord},
    retry::{RetryPolicy, retry_with_timeout},
};

#[derive(Snafu, Debug)]
pub enum WorkloadError {
    #[snafu(display("failed to get state of Spark application {name:?}"))]
    FetchApplicationState { source: BoxedError, name: String },

    #[snafu(display(
        "Spark application {name:?} state is {}, waiting for {expected}",
        actual.map_or_else(|| "not reported".to_string(), |state| state.to_string())
    ))]
    UnexpectedApplicationState {
        name: String,
        expected: ApplicationState,
        actual: Option<ApplicationState>,
    },

    #[snafu(display("failed to read log of pod {pod:?}"))]
    ReadLog { source: BoxedError, pod: String },

    #[snafu(display("log of pod {pod:?} doesn't contain {marker:?}"))]
    MarkerNotFound { pod: String, marker: String },
}

#[derive(Snafu, Debug, EnumDiscriminants)]
#[strum_discriminants(derive(IntoStaticStr))]
pub enum Error {
    #[snafu(display("no leader was observed before disruption"))]
    PreviousLeaderNotObserved { source: observer::Error },

    #[snafu(display("leader {leader:?} wasn't processing the workload before disruption"))]
    PreconditionNotMet {
        source: WorkloadError,
        leader: String,
    },

    #[snafu(display("failed to delete leader pod {leader:?}"))]
    DisruptionFailed { source: BoxedError, leader: String },

    #[snafu(display("no new leader replaced {previous_leader:?}"))]
    NewLeaderNotObserved {
        source: observer::Error,
        previous_leader: String,
    },

    #[snafu(display("new leader {new_leader:?} didn't continue the workload of {previous_leader:?}"))]
    ContinuityNotVerified {
        source: WorkloadError,
        previous_leader: String,
        new_leader: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub fn category(&self) -> &'static str {
        ErrorDiscriminants::from(self).into()
    }

    /// The phase the run was in when it failed.
    pub fn phase(&self) -> FailoverPhase {
        match self {
            Error::PreviousLeaderNotObserved { .. } => FailoverPhase::ObservingPrevious,
            Error::PreconditionNotMet { .. } => FailoverPhase::VerifyingPrecondition,
            Error::DisruptionFailed { .. } => FailoverPhase::Disrupting,
            Error::NewLeaderNotObserved { .. } => FailoverPhase::ObservingNew,
            Error::ContinuityNotVerified { .. } => FailoverPhase::VerifyingContinuity,
        }
    }

    /// The leader pod the failing phase saw last, if any.
    pub fn last_observed_holder(&self) -> Option<&str> {
        match self {
            Error::PreviousLeaderNotObserved { source } => source.observed_holder(),
            Error::NewLeaderNotObserved { source, .. } => source.observed_holder(),
            Error::PreconditionNotMet { leader, .. } | Error::DisruptionFailed { leader, .. } => {
                Some(leader.as_str())
            }
            Error::ContinuityNotVerified { new_leader, .. } => Some(new_leader.as_str()),
        }
    }
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum FailoverPhase {
    Init,
    ObservingPrevious,
    VerifyingPrecondition,
    Disrupting,
    ObservingNew,
    VerifyingContinuity,
    Succeeded,
}

/// A SparkApplication whose processing has to survive the leader change.
#[derive(Clone, Debug)]
pub struct WorkloadCheck {
    pub workload: WorkloadRef,
    /// Wait for the application to be `RUNNING` before and `COMPLETED` after the disruption.
    pub await_application_states: bool,
    pub retry: RetryPolicy,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContinuityEvidence {
    pub application: String,
    pub marker: String,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverObservation {
    pub previous_leader: LeaderElectionRecord,
    pub new_leader: LeaderElectionRecord,
    /// `None` when no workload was configured.
    pub continuity: Option<ContinuityEvidence>,
}

pub struct FailoverVerifier<'a, B> {
    backend: &'a B,
    observer: LeaderRecordObserver<'a, B>,
    election_retry: RetryPolicy,
    workload: Option<WorkloadCheck>,
}

impl<'a, B: FailoverBackend> FailoverVerifier<'a, B> {
    pub fn new(backend: &'a B, lock: LeaderElectionLock, election_retry: RetryPolicy) -> Self {
        Self {
            backend,
            observer: LeaderRecordObserver::new(backend, lock),
            election_retry,
            workload: None,
        }
    }

    pub fn with_workload(mut self, workload: WorkloadCheck) -> Self {
        self.workload = Some(workload);
        self
    }

    pub async fn run(&self) -> Result<FailoverObservation> {
        enter(FailoverPhase::Init);

        enter(FailoverPhase::ObservingPrevious);
        let previous_leader = self
            .observer
            .await_current_leader(&self.election_retry)
            .await
            .context(PreviousLeaderNotObservedSnafu)?;
        let previous_holder = previous_leader.holder_identity.as_str();
        tracing::info!(leader = previous_holder, "Current leader");

        if let Some(check) = &self.workload {
            enter(FailoverPhase::VerifyingPrecondition);
            self.await_processing(check, ApplicationState::Running, previous_holder)
                .await
                .context(PreconditionNotMetSnafu {
                    leader: previous_holder,
                })?;
        }

        enter(FailoverPhase::Disrupting);
        tracing::info!("Deleting current leader pod {previous_holder:?}");
        self.backend
            .delete_entity(previous_holder)
            .await
            .map_err(BoxedError::from)
            .context(DisruptionFailedSnafu {
                leader: previous_holder,
            })?;

        enter(FailoverPhase::ObservingNew);
        let new_leader = self
            .observer
            .await_leader_change(previous_holder, &self.election_retry)
            .await
            .context(NewLeaderNotObservedSnafu { previous_leader: previous_holder })?;
        let new_holder = new_leader.holder_identity.as_str();
        tracing::info!(leader = new_holder, "New leader found");

        let continuity = match &self.workload {
            Some(check) => {
                enter(FailoverPhase::VerifyingContinuity);
                let marker = self
                    .await_processing(check, ApplicationState::Completed, new_holder)
                    .await
                    .context(ContinuityNotVerifiedSnafu {
                        previous_leader: previous_holder,
                        new_leader: new_holder,
                    })?;
                Some(ContinuityEvidence {
                    application: format!(
                        "{}/{}",
                        check.workload.namespace, check.workload.name
                    ),
                    marker,
                })
            }
            None => None,
        };

        enter(FailoverPhase::Succeeded);
        Ok(FailoverObservation {
            previous_leader,
            new_leader,
            continuity,
        })
    }

    /// Waits for the application state (if configured) and then for `leader` to log the
    /// processing marker. Returns the marker found.
    async fn await_processing(
        &self,
        check: &WorkloadCheck,
        state: ApplicationState,
        leader: &str,
    ) -> Result<String, WorkloadError> {
        if check.await_application_states {
            tracing::info!(
                "Waiting for Spark application {name} to reach {state} state",
                name = check.workload.name
            );
            retry_with_timeout(&check.retry, || self.expect_state(&check.workload, state)).await?;
            tracing::info!(
                "Spark application {name} is now {state}",
                name = check.workload.name
            );
        }

        let marker = check.workload.processing_marker();
        retry_with_timeout(&check.retry, || self.expect_marker(leader, &marker)).await?;
        Ok(marker)
    }

    async fn expect_state(
        &self,
        workload: &WorkloadRef,
        expected: ApplicationState,
    ) -> Result<(), WorkloadError> {
        let name = &workload.name;
        let actual = self
            .backend
            .application_state(&workload.namespace, name)
            .await
            .map_err(BoxedError::from)
            .context(FetchApplicationStateSnafu { name })?;
        ensure!(
            actual == Some(expected),
            UnexpectedApplicationStateSnafu {
                name,
                expected,
                actual,
            }
        );
        Ok(())
    }

    async fn expect_marker(&self, pod: &str, marker: &str) -> Result<(), WorkloadError> {
        let found = self
            .backend
            .workload_log_contains(pod, marker)
            .await
            .map_err(BoxedError::from)
            .context(ReadLogSnafu { pod })?;
        ensure!(found, MarkerNotFoundSnafu { pod, marker });
        Ok(())
    }
}

fn enter(phase: FailoverPhase) {
    tracing::debug!(%phase, "Failover verification entered phase");
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::backend::scripted::{ScriptedBackend, ScriptedError};

    const PROCESSING: &str = r#"Starting processing key: "spark/mock-task-runner""#;

    fn election_retry() -> RetryPolicy {
        RetryPolicy::new(Duration::from_secs(30), Duration::from_secs(2)).unwrap()
    }

    fn workload_check(await_application_states: bool) -> WorkloadCheck {
        WorkloadCheck {
            workload: WorkloadRef {
                namespace: "spark".to_string(),
                name: "mock-task-runner".to_string(),
            },
            await_application_states,
            retry: RetryPolicy::new(Duration::from_secs(60), Duration::from_secs(5)).unwrap(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_failover_rejects_stale_reads() {
        let backend = ScriptedBackend::new()
            .with_holders(&["pod-a", "pod-a", "pod-a", "pod-b"])
            .with_pods(&["pod-a", "pod-b"]);
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry());

        let observation = verifier.run().await.unwrap();

        assert_eq!("pod-a", observation.previous_leader.holder_identity);
        assert_eq!("pod-b", observation.new_leader.holder_identity);
        assert_eq!(None, observation.continuity);
        assert_eq!(vec!["pod-a".to_string()], backend.deleted());
        // one observation before the disruption, two rejected stale reads, one accepted read
        assert_eq!(4, backend.fetch_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_disruption_aborts_run() {
        let backend = ScriptedBackend::new()
            .with_holders(&["pod-a", "pod-b"])
            .with_pods(&["pod-a", "pod-b"])
            .with_delete_error(ScriptedError::new("forbidden"));
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry());

        let error = verifier.run().await.unwrap_err();

        assert!(matches!(&error, Error::DisruptionFailed { leader, .. } if leader == "pod-a"));
        assert_eq!(FailoverPhase::Disrupting, error.phase());
        assert_eq!("DisruptionFailed", error.category());
        assert_eq!(1, backend.fetch_calls());
        assert_eq!(vec!["pod-a".to_string()], backend.deleted());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_leader_is_never_reported_as_failover() {
        let backend = ScriptedBackend::new()
            .with_holders(&["pod-a"])
            .with_pods(&["pod-a"]);
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry());

        let error = verifier.run().await.unwrap_err();

        assert_eq!(FailoverPhase::ObservingNew, error.phase());
        assert!(matches!(
            &error,
            Error::NewLeaderNotObserved {
                source: observer::Error::PreviousLeaderStillReported { .. },
                previous_leader,
            } if previous_leader == "pod-a"
        ));
        assert_eq!(Some("pod-a"), error.last_observed_holder());
        // 1 initial observation plus 16 attempts over 30s at a 2s interval
        assert_eq!(17, backend.fetch_calls());
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_leader_ever_elected() {
        let backend = ScriptedBackend::new().with_holders(&[""]);
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry());

        let error = verifier.run().await.unwrap_err();

        assert_eq!(FailoverPhase::ObservingPrevious, error.phase());
        assert!(matches!(
            error,
            Error::PreviousLeaderNotObserved {
                source: observer::Error::NoLeaderElected { .. }
            }
        ));
        assert!(backend.deleted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_workload_continues_under_new_leader() {
        let backend = ScriptedBackend::new()
            .with_holders(&["pod-a", "pod-a", "pod-b"])
            .with_pods(&["pod-a", "pod-b"])
            .with_log("pod-a", &format!("reconciling\n{PROCESSING}\n"))
            .with_log("pod-b", &format!("{PROCESSING}\nsyncing\n"))
            .with_states(&[
                Some(ApplicationState::Submitted),
                Some(ApplicationState::Running),
                Some(ApplicationState::Running),
                Some(ApplicationState::Completed),
            ]);
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry())
                .with_workload(workload_check(true));

        let observation = verifier.run().await.unwrap();

        assert_eq!("pod-b", observation.new_leader.holder_identity);
        assert_eq!(
            Some(ContinuityEvidence {
                application: "spark/mock-task-runner".to_string(),
                marker: PROCESSING.to_string(),
            }),
            observation.continuity
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_leader_fails_precondition() {
        let backend = ScriptedBackend::new()
            .with_holders(&["pod-a"])
            .with_pods(&["pod-a", "pod-b"])
            .with_log("pod-a", "nothing to do\n");
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry())
                .with_workload(workload_check(false));

        let error = verifier.run().await.unwrap_err();

        assert_eq!(FailoverPhase::VerifyingPrecondition, error.phase());
        assert!(matches!(
            error,
            Error::PreconditionNotMet {
                source: WorkloadError::MarkerNotFound { .. },
                ..
            }
        ));
        assert!(backend.deleted().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_leader_not_resuming_workload() {
        let backend = ScriptedBackend::new()
            .with_holders(&["pod-a", "pod-b"])
            .with_pods(&["pod-a", "pod-b"])
            .with_log("pod-a", PROCESSING)
            .with_log("pod-b", "starting informers\n");
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry())
                .with_workload(workload_check(false));

        let error = verifier.run().await.unwrap_err();

        assert_eq!(FailoverPhase::VerifyingContinuity, error.phase());
        assert_eq!(Some("pod-b"), error.last_observed_holder());
        assert_eq!("ContinuityNotVerified", error.category());
    }

    #[tokio::test(start_paused = true)]
    async fn test_application_never_running() {
        let backend = ScriptedBackend::new()
            .with_holders(&["pod-a"])
            .with_pods(&["pod-a"])
            .with_log("pod-a", PROCESSING)
            .with_states(&[Some(ApplicationState::Failed)]);
        let verifier =
            FailoverVerifier::new(&backend, LeaderElectionLock::default(), election_retry())
                .with_workload(workload_check(true));

        let error = verifier.run().await.unwrap_err();

        assert!(matches!(
            error,
            Error::PreconditionNotMet {
                source: WorkloadError::UnexpectedApplicationState {
                    expected: ApplicationState::Running,
                    actual: Some(ApplicationState::Failed),
                    ..
                },
                ..
            }
        ));
    }
}
