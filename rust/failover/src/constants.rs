use std::time::Duration;

/// Annotation client-go writes the leader election record to when a ConfigMap is used as lock.
pub const LEADER_ELECTION_RECORD_ANNOTATION: &str = "control-plane.alpha.kubernetes.io/leader";

pub const DEFAULT_LOCK_NAME: &str = "leader-election-lock";

pub const DEFAULT_RETRY_TIMEOUT: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(5);

pub const ELECTION_RECORD_RETRY_TIMEOUT: Duration = Duration::from_secs(30);
pub const ELECTION_RECORD_RETRY_INTERVAL: Duration = Duration::from_secs(2);

pub const SPARK_APPLICATION_GROUP: &str = "sparkoperator.k8s.io";
pub const SPARK_APPLICATION_VERSION: &str = "v1beta2";
pub const SPARK_APPLICATION_KIND: &str = "SparkApplication";

pub const ARG_LEADER_ELECTION: &str = "-leader-election";
pub const ARG_LEADER_ELECTION_LOCK_NAME: &str = "-leader-election-lock-name";
pub const ARG_LEADER_ELECTION_LOCK_NAMESPACE: &str = "-leader-election-lock-namespace";
pub const ARG_LEADER_ELECTION_LEASE_DURATION: &str = "-leader-election-lease-duration";
pub const ARG_LEADER_ELECTION_RENEW_DEADLINE: &str = "-leader-election-renew-deadline";
pub const ARG_LEADER_ELECTION_RETRY_PERIOD: &str = "-leader-election-retry-period";
