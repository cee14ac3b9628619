//! Observation of the leader election record of a Spark operator running with several replicas,
//! and verification that leadership fails over once the current leader pod is deleted.
//!
//! The crate is independent of how the cluster is reached: everything it needs from Kubernetes is
//! expressed by [`backend::FailoverBackend`].

pub mod application;
pub mod backend;
pub mod config;
pub mod constants;
pub mod observer;
pub mod record;
pub mod retry;
pub mod verifier;

pub use observer::LeaderRecordObserver;
pub use record::{LeaderElectionLock, LeaderElectionRecord, LockKind};
pub use retry::{RetryPolicy, retry_with_timeout};
pub use verifier::{FailoverObservation, FailoverPhase, FailoverVerifier};
