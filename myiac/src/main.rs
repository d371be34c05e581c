use clap::{Parser, Subcommand};
use tracing::error;

mod commands;
mod config;
mod dns;
mod docker;
mod error;
mod gcp;
mod helm;
mod kubernetes;
mod preferences;
mod process;
mod provider;
mod reconcile;
mod terraform;

use config::{Config, GlobalArgs};

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    SetupEnvironment(commands::SetupEnvironment),
    DeployApp(commands::DeployApp),
    CreateCluster(commands::CreateCluster),
    DestroyCluster(commands::DestroyCluster),
    ResizePool(commands::ResizePool),
    UpdateDnsFromClusterIps(commands::UpdateDnsFromClusterIps),
    CreateSecret(commands::CreateSecret),
    Crypt(commands::Crypt),
    ClusterIps(commands::ClusterIps),
    DockerSetup(commands::DockerSetup),
    DockerBuild(commands::DockerBuild),
}

async fn run(args: Args) -> error::Result<()> {
    let config = Config::from_args(&args.global)?;

    match args.command {
        Command::SetupEnvironment(command) => command.run(&config).await,
        Command::DeployApp(command) => command.run(&config).await,
        Command::CreateCluster(command) => command.run(&config).await,
        Command::DestroyCluster(command) => command.run(&config).await,
        Command::ResizePool(command) => command.run(&config).await,
        Command::UpdateDnsFromClusterIps(command) => command.run(&config).await,
        Command::CreateSecret(command) => command.run(&config).await,
        Command::Crypt(command) => command.run(&config).await,
        Command::ClusterIps(command) => command.run().await,
        Command::DockerSetup(command) => command.run(&config).await,
        Command::DockerBuild(command) => command.run(&config).await,
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    if let Err(err) = run(args).await {
        error!("{err}");
        std::process::exit(err.exit_code());
    }
}
