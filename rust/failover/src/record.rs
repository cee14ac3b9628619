//! The leader election record as client-go persists it, and the lock objects it lives on.

use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::{coordination::v1::Lease, core::v1::ConfigMap},
    kube::ResourceExt,
};
use strum::Display;

use crate::constants::{DEFAULT_LOCK_NAME, LEADER_ELECTION_RECORD_ANNOTATION};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to parse leader election record of ConfigMap {cm_name:?}"))]
    ParseRecord {
        source: serde_json::Error,
        cm_name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Snapshot of the leader election record.
///
/// Only `holder_identity` takes part in any decision; the remaining fields are kept for
/// diagnostics. An empty holder means that no leader has been elected yet.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionRecord {
    #[serde(default)]
    pub holder_identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lease_duration_seconds: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acquire_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renew_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_transitions: Option<i32>,
}

impl LeaderElectionRecord {
    pub fn for_holder(holder_identity: impl Into<String>) -> Self {
        Self {
            holder_identity: holder_identity.into(),
            ..Self::default()
        }
    }

    /// Returns `true` if the record names a holder at all.
    pub fn has_holder(&self) -> bool {
        !self.holder_identity.trim().is_empty()
    }

    /// Reads the record from the annotation client-go maintains on a ConfigMap lock.
    ///
    /// Returns `None` while the annotation has not been written yet.
    pub fn from_config_map(config_map: &ConfigMap) -> Result<Option<Self>> {
        let Some(raw) = config_map
            .annotations()
            .get(LEADER_ELECTION_RECORD_ANNOTATION)
        else {
            return Ok(None);
        };

        serde_json::from_str(raw)
            .map(Some)
            .with_context(|_| ParseRecordSnafu {
                cm_name: config_map.name_any(),
            })
    }

    /// Reads the record from a `coordination.k8s.io/v1` Lease lock.
    ///
    /// Returns `None` while the Lease has no spec.
    pub fn from_lease(lease: &Lease) -> Option<Self> {
        lease.spec.as_ref().map(|spec| Self {
            holder_identity: spec.holder_identity.clone().unwrap_or_default(),
            lease_duration_seconds: spec.lease_duration_seconds,
            acquire_time: spec.acquire_time.as_ref().map(|time| time.0.to_string()),
            renew_time: spec.renew_time.as_ref().map(|time| time.0.to_string()),
            leader_transitions: spec.lease_transitions,
        })
    }
}

#[derive(Clone, Copy, Debug, Default, Deserialize, Display, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum LockKind {
    #[default]
    ConfigMap,
    Lease,
}

/// The object the leader election subsystem persists its record to.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionLock {
    #[serde(default)]
    pub kind: LockKind,
    #[serde(default = "default_lock_name")]
    pub name: String,
}

impl Default for LeaderElectionLock {
    fn default() -> Self {
        Self {
            kind: LockKind::default(),
            name: default_lock_name(),
        }
    }
}

fn default_lock_name() -> String {
    DEFAULT_LOCK_NAME.to_string()
}
