//! [`FailoverBackend`] talking to the Kubernetes API.

use snafu::{ResultExt, Snafu};
use stackable_operator::{
    k8s_openapi::api::{
        apps::v1::Deployment,
        coordination::v1::Lease,
        core::v1::{ConfigMap, Pod},
    },
    kube::{
        Client,
        api::{Api, DeleteParams, LogParams},
        core::{ApiResource, DynamicObject, ErrorResponse, GroupVersionKind},
    },
};
use stackable_spark_k8s_failover::{
    LeaderElectionLock, LeaderElectionRecord, LockKind,
    application::ApplicationState,
    backend::FailoverBackend,
    constants::{SPARK_APPLICATION_GROUP, SPARK_APPLICATION_KIND, SPARK_APPLICATION_VERSION},
    record,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("failed to get {kind} {name:?}"))]
    GetLock {
        source: stackable_operator::kube::Error,
        kind: LockKind,
        name: String,
    },

    #[snafu(display("failed to read leader election record"))]
    ParseRecord { source: record::Error },

    #[snafu(display("failed to get pod {pod_name:?}"))]
    GetPod {
        source: stackable_operator::kube::Error,
        pod_name: String,
    },

    #[snafu(display("failed to delete pod {pod_name:?}"))]
    DeletePod {
        source: stackable_operator::kube::Error,
        pod_name: String,
    },

    #[snafu(display("failed to read log of pod {pod_name:?}"))]
    ReadPodLog {
        source: stackable_operator::kube::Error,
        pod_name: String,
    },

    #[snafu(display("failed to get Spark application {name:?} in namespace {namespace:?}"))]
    GetSparkApplication {
        source: stackable_operator::kube::Error,
        name: String,
        namespace: String,
    },

    #[snafu(display("failed to get Deployment {name:?}"))]
    GetDeployment {
        source: stackable_operator::kube::Error,
        name: String,
    },
}

type Result<T, E = Error> = std::result::Result<T, E>;

/// Turns a `404 Not Found` answer into `None`, like `kubectl --ignore-not-found`.
fn ignore_not_found<T>(
    result: Result<T, stackable_operator::kube::Error>,
) -> Result<Option<T>, stackable_operator::kube::Error> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(stackable_operator::kube::Error::Api(ErrorResponse { code: 404, .. })) => Ok(None),
        Err(error) => Err(error),
    }
}

/// Cluster access bound to the namespace the operator runs in.
pub struct KubeBackend {
    client: Client,
    namespace: String,
    pods: Api<Pod>,
}

impl KubeBackend {
    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client.clone(), namespace),
            client,
            namespace: namespace.to_string(),
        }
    }

    pub async fn deployment(&self, name: &str) -> Result<Deployment> {
        Api::<Deployment>::namespaced(self.client.clone(), &self.namespace)
            .get(name)
            .await
            .context(GetDeploymentSnafu { name })
    }
}

impl FailoverBackend for KubeBackend {
    type Error = Error;

    async fn fetch_record(&self, lock: &LeaderElectionLock) -> Result<Option<LeaderElectionRecord>> {
        let name = &lock.name;
        match lock.kind {
            LockKind::ConfigMap => {
                let config_map = Api::<ConfigMap>::namespaced(self.client.clone(), &self.namespace)
                    .get_opt(name)
                    .await
                    .context(GetLockSnafu {
                        kind: lock.kind,
                        name,
                    })?;
                match config_map {
                    Some(config_map) => {
                        LeaderElectionRecord::from_config_map(&config_map).context(ParseRecordSnafu)
                    }
                    None => Ok(None),
                }
            }
            LockKind::Lease => {
                let lease = Api::<Lease>::namespaced(self.client.clone(), &self.namespace)
                    .get_opt(name)
                    .await
                    .context(GetLockSnafu {
                        kind: lock.kind,
                        name,
                    })?;
                Ok(lease.as_ref().and_then(LeaderElectionRecord::from_lease))
            }
        }
    }

    async fn entity_exists(&self, identity: &str) -> Result<bool> {
        let pod = self
            .pods
            .get_opt(identity)
            .await
            .context(GetPodSnafu { pod_name: identity })?;
        Ok(pod.is_some())
    }

    async fn delete_entity(&self, identity: &str) -> Result<()> {
        let deleted = ignore_not_found(self.pods.delete(identity, &DeleteParams::default()).await)
            .context(DeletePodSnafu { pod_name: identity })?;
        if deleted.is_none() {
            tracing::info!(pod_name = identity, "Pod is already gone");
        }
        Ok(())
    }

    async fn workload_log_contains(&self, owner_identity: &str, marker: &str) -> Result<bool> {
        let log = self
            .pods
            .logs(owner_identity, &LogParams::default())
            .await
            .context(ReadPodLogSnafu {
                pod_name: owner_identity,
            })?;
        Ok(log.lines().any(|line| line.contains(marker)))
    }

    async fn application_state(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<ApplicationState>> {
        let resource = ApiResource::from_gvk(&GroupVersionKind::gvk(
            SPARK_APPLICATION_GROUP,
            SPARK_APPLICATION_VERSION,
            SPARK_APPLICATION_KIND,
        ));
        let application =
            Api::<DynamicObject>::namespaced_with(self.client.clone(), namespace, &resource)
                .get(name)
                .await
                .context(GetSparkApplicationSnafu { name, namespace })?;
        Ok(ApplicationState::from_application(&application.data))
    }
}
