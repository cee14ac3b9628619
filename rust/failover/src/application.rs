//! State of the SparkApplication used as workload while leadership changes hands.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(
    Clone, Copy, Debug, Default, Deserialize, Display, EnumString, Eq, PartialEq, Serialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ApplicationState {
    New,
    Submitted,
    Running,
    Completed,
    Failed,
    SubmissionFailed,
    PendingRerun,
    Invalidating,
    Succeeding,
    Failing,
    #[default]
    Unknown,
}

impl ApplicationState {
    /// Extracts `status.applicationState.state` from a SparkApplication object.
    ///
    /// Returns `None` while the operator has not written a status yet. An empty state is what the
    /// operator reports for a freshly created application.
    pub fn from_application(object: &serde_json::Value) -> Option<Self> {
        let state = object
            .pointer("/status/applicationState/state")?
            .as_str()?;
        Some(match state {
            "" => Self::New,
            state => state.parse().unwrap_or_default(),
        })
    }
}

/// Names the SparkApplication whose processing is followed across the failover.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WorkloadRef {
    pub namespace: String,
    pub name: String,
}

impl WorkloadRef {
    /// Log line the operator writes when it starts reconciling this application.
    pub fn processing_marker(&self) -> String {
        format!(
            "Starting processing key: \"{namespace}/{name}\"",
            namespace = self.namespace,
            name = self.name
        )
    }
}
