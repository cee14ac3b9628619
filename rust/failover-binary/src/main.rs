use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use stackable_operator::{
    kube::Client,
    telemetry::{Tracing, tracing::TelemetryOptions},
};
use stackable_spark_k8s_failover::{
    FailoverVerifier, LeaderRecordObserver, config::FailoverScenario, retry_with_timeout,
};
use tracing::info_span;
use tracing_futures::Instrument;

use crate::cluster::KubeBackend;

mod cluster;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command,

    #[clap(flatten)]
    telemetry: TelemetryOptions,
}

#[derive(Subcommand)]
enum Command {
    /// Wait until a live leader is elected and print its leader election record.
    Leader(ScenarioArgs),

    /// Delete the current leader pod and verify that another replica takes over.
    Failover(ScenarioArgs),

    /// Verify the replicas and leader election arguments of the operator Deployment.
    CheckConfig(ScenarioArgs),
}

#[derive(Args)]
struct ScenarioArgs {
    /// Failover scenario YAML file.
    #[arg(long, short, env = "FAILOVER_SCENARIO")]
    scenario: PathBuf,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();

    let _tracing_guard = Tracing::pre_configured(built_info::PKG_NAME, opts.telemetry).init()?;

    tracing::info!(
        built_info.pkg_version = built_info::PKG_VERSION,
        built_info.git_version = built_info::GIT_VERSION,
        built_info.target = built_info::TARGET,
        built_info.built_time_utc = built_info::BUILT_TIME_UTC,
        built_info.rustc_version = built_info::RUSTC_VERSION,
        "Starting {description}",
        description = built_info::PKG_DESCRIPTION
    );

    let (Command::Leader(args) | Command::Failover(args) | Command::CheckConfig(args)) = &opts.cmd;
    let scenario = FailoverScenario::from_file(&args.scenario)?;
    let election_policy = scenario.election_policy()?;

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    let backend = KubeBackend::new(client, &scenario.namespace);

    match opts.cmd {
        Command::Leader(_) => {
            let observer = LeaderRecordObserver::new(&backend, scenario.lock.clone());
            let record = observer
                .await_current_leader(&election_policy)
                .instrument(info_span!("leader_observer"))
                .await?;
            print_yaml(&record)?;
        }
        Command::Failover(_) => {
            let mut verifier =
                FailoverVerifier::new(&backend, scenario.lock.clone(), election_policy);
            if let Some(check) = scenario.workload_check()? {
                verifier = verifier.with_workload(check);
            }

            match verifier
                .run()
                .instrument(info_span!("failover_verifier"))
                .await
            {
                Ok(observation) => print_yaml(&observation)?,
                Err(error) => {
                    tracing::error!(
                        phase = %error.phase(),
                        category = error.category(),
                        last_observed_holder = error.last_observed_holder(),
                        error = &error as &dyn std::error::Error,
                        "Failover verification failed"
                    );
                    return Err(error.into());
                }
            }
        }
        Command::CheckConfig(_) => {
            let leader_election = scenario
                .leader_election
                .as_ref()
                .context("scenario defines no leaderElection section")?;

            retry_with_timeout(&election_policy, || async {
                let deployment = backend
                    .deployment(&leader_election.deployment_name)
                    .await?;
                leader_election.verify_deployment(
                    &scenario.lock,
                    &scenario.namespace,
                    &deployment,
                )?;
                anyhow::Ok(())
            })
            .instrument(info_span!("config_check"))
            .await?;
            tracing::info!(
                deployment = %leader_election.deployment_name,
                "Leader election configuration verified"
            );
        }
    }

    Ok(())
}

fn print_yaml(value: &impl Serialize) -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(value)?);
    Ok(())
}
