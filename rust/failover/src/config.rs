//! Typed description of a failover scenario, read from YAML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::{OptionExt, ResultExt, Snafu, ensure};
use stackable_operator::{
    k8s_openapi::api::apps::v1::Deployment, kube::ResourceExt, shared::time::Duration,
};

use crate::{
    application::WorkloadRef,
    constants::{
        ARG_LEADER_ELECTION, ARG_LEADER_ELECTION_LEASE_DURATION, ARG_LEADER_ELECTION_LOCK_NAME,
        ARG_LEADER_ELECTION_LOCK_NAMESPACE, ARG_LEADER_ELECTION_RENEW_DEADLINE,
        ARG_LEADER_ELECTION_RETRY_PERIOD,
    },
    record::LeaderElectionLock,
    retry::{self, RetryPolicy},
    verifier::WorkloadCheck,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to read scenario file {path:?}"))]
    ReadScenario {
        source: std::io::Error,
        path: PathBuf,
    },

    #[snafu(display("failed to parse scenario"))]
    ParseScenario { source: serde_yaml::Error },

    #[snafu(display("invalid retry policy for {field}"))]
    InvalidRetryPolicy {
        source: retry::Error,
        field: &'static str,
    },

    #[snafu(display("Deployment {deployment:?} defines no containers"))]
    NoOperatorContainer { deployment: String },

    #[snafu(display(
        "Deployment {deployment:?} has {} available replicas, expected {expected}",
        actual.unwrap_or_default()
    ))]
    AvailableReplicasMismatch {
        deployment: String,
        expected: i32,
        actual: Option<i32>,
    },

    #[snafu(display("operator container of Deployment {deployment:?} lacks argument {argument:?}"))]
    MissingOperatorArgument { deployment: String, argument: String },
}

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    pub timeout: Duration,
    pub interval: Duration,
}

impl RetryConfig {
    pub fn policy(&self, field: &'static str) -> Result<RetryPolicy> {
        RetryPolicy::new(*self.timeout, *self.interval)
            .context(InvalidRetryPolicySnafu { field })
    }

    fn leader_election() -> Self {
        RetryPolicy::leader_election().into()
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryPolicy::default().into()
    }
}

impl From<RetryPolicy> for RetryConfig {
    fn from(policy: RetryPolicy) -> Self {
        Self {
            timeout: Duration::from_secs(policy.timeout().as_secs()),
            interval: Duration::from_secs(policy.interval().as_secs()),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FailoverScenario {
    /// Namespace the operator, its pods and its leader election lock live in.
    pub namespace: String,
    #[serde(default)]
    pub lock: LeaderElectionLock,
    #[serde(default = "RetryConfig::leader_election")]
    pub election_retry: RetryConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workload: Option<WorkloadConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader_election: Option<LeaderElectionConfig>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadConfig {
    /// Name of the SparkApplication.
    pub name: String,
    /// Defaults to the scenario namespace.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default = "default_true")]
    pub await_application_states: bool,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Leader election settings the operator Deployment is expected to run with.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderElectionConfig {
    pub deployment_name: String,
    #[serde(default = "default_replicas")]
    pub replicas: i32,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_lease_duration")]
    pub lease_duration: Duration,
    #[serde(default = "default_renew_deadline")]
    pub renew_deadline: Duration,
    #[serde(default = "default_retry_period")]
    pub retry_period: Duration,
}

fn default_true() -> bool {
    true
}

fn default_replicas() -> i32 {
    3
}

fn default_lease_duration() -> Duration {
    Duration::from_secs(15)
}

fn default_renew_deadline() -> Duration {
    Duration::from_secs(10)
}

fn default_retry_period() -> Duration {
    Duration::from_secs(3)
}

impl FailoverScenario {
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context(ParseScenarioSnafu)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let yaml = std::fs::read_to_string(path).context(ReadScenarioSnafu { path })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn election_policy(&self) -> Result<RetryPolicy> {
        self.election_retry.policy("electionRetry")
    }

    pub fn workload_check(&self) -> Result<Option<WorkloadCheck>> {
        self.workload
            .as_ref()
            .map(|workload| {
                Ok(WorkloadCheck {
                    workload: WorkloadRef {
                        namespace: workload
                            .namespace
                            .clone()
                            .unwrap_or_else(|| self.namespace.clone()),
                        name: workload.name.clone(),
                    },
                    await_application_states: workload.await_application_states,
                    retry: workload.retry.policy("workload.retry")?,
                })
            })
            .transpose()
    }
}

impl LeaderElectionConfig {
    /// Arguments the operator container has to be started with.
    pub fn operator_args(&self, lock: &LeaderElectionLock, namespace: &str) -> Vec<String> {
        vec![
            format!("{ARG_LEADER_ELECTION}={}", self.enabled),
            format!("{ARG_LEADER_ELECTION_LOCK_NAME}={}", lock.name),
            format!("{ARG_LEADER_ELECTION_LOCK_NAMESPACE}={namespace}"),
            format!("{ARG_LEADER_ELECTION_LEASE_DURATION}={}", self.lease_duration),
            format!("{ARG_LEADER_ELECTION_RENEW_DEADLINE}={}", self.renew_deadline),
            format!("{ARG_LEADER_ELECTION_RETRY_PERIOD}={}", self.retry_period),
        ]
    }

    /// Checks that the Deployment runs the expected number of replicas and that its first
    /// container carries every leader election argument.
    pub fn verify_deployment(
        &self,
        lock: &LeaderElectionLock,
        namespace: &str,
        deployment: &Deployment,
    ) -> Result<()> {
        let deployment_name = deployment.name_any();

        let available = deployment
            .status
            .as_ref()
            .and_then(|status| status.available_replicas);
        ensure!(
            available == Some(self.replicas),
            AvailableReplicasMismatchSnafu {
                deployment: &deployment_name,
                expected: self.replicas,
                actual: available,
            }
        );

        let container = deployment
            .spec
            .as_ref()
            .and_then(|spec| spec.template.spec.as_ref())
            .and_then(|pod_spec| pod_spec.containers.first())
            .context(NoOperatorContainerSnafu {
                deployment: &deployment_name,
            })?;
        let args = container.args.as_deref().unwrap_or_default();

        for argument in self.operator_args(lock, namespace) {
            ensure!(
                args.contains(&argument),
                MissingOperatorArgumentSnafu {
                    deployment: &deployment_name,
                    argument,
                }
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use indoc::indoc;
    use rstest::rstest;

    use super::*;
    use crate::record::LockKind;

    fn deployment(available_replicas: i32, args: &[&str]) -> Deployment {
        let mut deployment = serde_yaml::from_str::<Deployment>(indoc! {"
            ---
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: spark-operator
            spec:
              selector:
                matchLabels:
                  app: spark-operator
              template:
                spec:
                  containers:
                    - name: spark-operator
                      image: spark-operator:latest
        "})
        .unwrap();
        deployment
            .spec
            .as_mut()
            .and_then(|spec| spec.template.spec.as_mut())
            .unwrap()
            .containers[0]
            .args = Some(args.iter().map(|arg| arg.to_string()).collect());
        deployment.status = Some(Default::default());
        deployment.status.as_mut().unwrap().available_replicas = Some(available_replicas);
        deployment
    }

    fn leader_election_config() -> LeaderElectionConfig {
        serde_yaml::from_str("deploymentName: spark-operator").unwrap()
    }

    const EXPECTED_ARGS: [&str; 6] = [
        "-leader-election=true",
        "-leader-election-lock-name=leader-election-lock",
        "-leader-election-lock-namespace=spark",
        "-leader-election-lease-duration=15s",
        "-leader-election-renew-deadline=10s",
        "-leader-election-retry-period=3s",
    ];

    #[test]
    fn test_minimal_scenario_defaults() {
        let scenario = FailoverScenario::from_yaml_str("namespace: spark").unwrap();

        assert_eq!(LeaderElectionLock::default(), scenario.lock);
        let policy = scenario.election_policy().unwrap();
        assert_eq!(StdDuration::from_secs(30), policy.timeout());
        assert_eq!(StdDuration::from_secs(2), policy.interval());
        assert_eq!(None, scenario.workload_check().unwrap().map(|c| c.workload));
        assert_eq!(None, scenario.leader_election);
    }

    #[test]
    fn test_full_scenario() {
        let scenario = FailoverScenario::from_yaml_str(indoc! {"
            ---
            namespace: spark
            lock:
              kind: lease
              name: spark-operator-lock
            electionRetry:
              timeout: 1m
              interval: 5s
            workload:
              name: mock-task-runner
              namespace: jobs
              awaitApplicationStates: false
              retry:
                timeout: 15m
                interval: 10s
            leaderElection:
              deploymentName: spark-operator
              replicas: 2
              leaseDuration: 20s
        "})
        .unwrap();

        assert_eq!(LockKind::Lease, scenario.lock.kind);
        assert_eq!("spark-operator-lock", scenario.lock.name);
        assert_eq!(
            StdDuration::from_secs(60),
            scenario.election_policy().unwrap().timeout()
        );

        let check = scenario.workload_check().unwrap().unwrap();
        assert_eq!("jobs", check.workload.namespace);
        assert_eq!("mock-task-runner", check.workload.name);
        assert!(!check.await_application_states);
        assert_eq!(StdDuration::from_secs(900), check.retry.timeout());
        assert_eq!(StdDuration::from_secs(10), check.retry.interval());

        let leader_election = scenario.leader_election.unwrap();
        assert_eq!(2, leader_election.replicas);
        assert!(leader_election.enabled);
        assert_eq!(Duration::from_secs(20), leader_election.lease_duration);
        assert_eq!(Duration::from_secs(10), leader_election.renew_deadline);
    }

    #[test]
    fn test_workload_defaults_to_scenario_namespace() {
        let scenario = FailoverScenario::from_yaml_str(indoc! {"
            namespace: spark
            workload:
              name: mock-task-runner
        "})
        .unwrap();

        let check = scenario.workload_check().unwrap().unwrap();
        assert_eq!("spark", check.workload.namespace);
        assert!(check.await_application_states);
        assert_eq!(RetryPolicy::default(), check.retry);
    }

    #[test]
    fn test_retry_defaults_match_policies() {
        assert_eq!(
            RetryPolicy::default(),
            RetryConfig::default().policy("retry").unwrap()
        );
        assert_eq!(
            RetryPolicy::leader_election(),
            RetryConfig::leader_election().policy("electionRetry").unwrap()
        );
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let scenario = FailoverScenario::from_yaml_str(indoc! {"
            namespace: spark
            electionRetry:
              timeout: 30s
              interval: 0s
        "})
        .unwrap();

        assert!(matches!(
            scenario.election_policy(),
            Err(Error::InvalidRetryPolicy {
                field: "electionRetry",
                ..
            })
        ));
    }

    #[test]
    fn test_missing_namespace_is_rejected() {
        assert!(matches!(
            FailoverScenario::from_yaml_str("lock:\n  name: foo\n"),
            Err(Error::ParseScenario { .. })
        ));
    }

    #[test]
    fn test_operator_args() {
        assert_eq!(
            EXPECTED_ARGS.to_vec(),
            leader_election_config().operator_args(&LeaderElectionLock::default(), "spark")
        );
    }

    #[test]
    fn test_verify_matching_deployment() {
        let mut args = vec!["-logtostderr", "-v=2"];
        args.extend(EXPECTED_ARGS);

        leader_election_config()
            .verify_deployment(
                &LeaderElectionLock::default(),
                "spark",
                &deployment(3, &args),
            )
            .unwrap();
    }

    #[rstest]
    #[case::too_few_replicas(1, &EXPECTED_ARGS, "AvailableReplicasMismatch")]
    #[case::missing_lock_name(3, &EXPECTED_ARGS[..1], "MissingOperatorArgument")]
    #[case::no_args(3, &[], "MissingOperatorArgument")]
    fn test_verify_mismatching_deployment(
        #[case] replicas: i32,
        #[case] args: &[&str],
        #[case] expected: &str,
    ) {
        let error = leader_election_config()
            .verify_deployment(
                &LeaderElectionLock::default(),
                "spark",
                &deployment(replicas, args),
            )
            .unwrap_err();

        let actual = match error {
            Error::AvailableReplicasMismatch { .. } => "AvailableReplicasMismatch",
            Error::MissingOperatorArgument { .. } => "MissingOperatorArgument",
            _ => "other",
        };
        assert_eq!(expected, actual);
    }
}
