//! Definitions of CLI arguments and commands for the upgrade scripts

use std::{path::PathBuf, sync::Arc};

use clap::{ArgGroup, Args, Parser, Subcommand};

use crate::{
    client::{AlloyChainClient, ChainClient},
    commands::{
        configure, deploy, register, run_workflow, status, transfer_ownership, upgrade,
        CommandContext,
    },
    config::{ConfigOverrides, DeploymentConfig, NetworksFile},
    constants::{DEFAULT_DEPLOYMENTS_PATH, DEFAULT_NETWORK, DEFAULT_NETWORKS_FILE},
    deployments::DeploymentsRecord,
    errors::ScriptError,
    orchestrator::{CancelFlag, UpgradeOrchestrator},
};

/// Deploy implementations and manage upgradeable proxies through a proxy registry
#[derive(Parser)]
#[command(name = "upgrade-scripts", version)]
pub struct Cli {
    /// The network to operate on, as named in the networks file
    #[arg(short, long, default_value = DEFAULT_NETWORK)]
    pub network: String,

    /// Path to the networks file
    #[arg(long, default_value = DEFAULT_NETWORKS_FILE)]
    pub networks_file: PathBuf,

    /// Network RPC URL, overrides the networks file
    #[arg(short, long, env = "RPC_URL")]
    pub rpc_url: Option<String>,

    /// Private key of the signer
    #[arg(short, long = "pkey", env = "PKEY", hide_env_values = true)]
    pub priv_key: String,

    /// Address of the proxy registry, overrides the networks file
    #[arg(long, env = "REGISTRY_ADDRESS")]
    pub registry: Option<String>,

    /// Path to the file recording deployed addresses
    #[arg(short, long, default_value = DEFAULT_DEPLOYMENTS_PATH)]
    pub deployments_path: PathBuf,

    /// How long to wait for each transaction to be confirmed
    #[arg(long)]
    pub confirmation_timeout_secs: Option<u64>,

    /// Log at debug level unless `RUST_LOG` says otherwise
    #[arg(short, long)]
    pub verbose: bool,

    /// The command to run
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Resolve the configuration, connect to the network, and run the command
    pub async fn run(self, cancel: CancelFlag) -> Result<(), ScriptError> {
        let networks = NetworksFile::load(&self.networks_file)?;
        let network = networks.network(&self.network)?;
        let overrides = ConfigOverrides {
            rpc_url: self.rpc_url,
            registry: self.registry,
            confirmation_timeout_secs: self.confirmation_timeout_secs,
        };
        let config = DeploymentConfig::resolve(network, &self.priv_key, overrides)?;

        let client = AlloyChainClient::connect(&config).await?;
        let orchestrator =
            UpgradeOrchestrator::new(Arc::new(client), config.orchestrator_config())
                .with_cancel_flag(cancel);

        let ctx = CommandContext {
            record: DeploymentsRecord::new(self.deployments_path, &config.network.name),
            dao: config.network.dao,
        };
        self.command.run(&orchestrator, &ctx).await
    }
}

/// The upgrade scripts' commands
#[derive(Subcommand)]
pub enum Command {
    /// Deploy an implementation contract from a compilation artifact
    Deploy(DeployArgs),
    /// Register a new proxy slot in the registry
    Register(RegisterArgs),
    /// Upgrade a slot to a new implementation
    Upgrade(UpgradeArgs),
    /// Call an owner-only setter
    Configure(ConfigureArgs),
    /// Hand ownership to a new owner, after which the signer can no longer administer the target
    TransferOwnership(TransferOwnershipArgs),
    /// Print the signer, the registry owner, and every registered slot
    Status,
    /// Run a workflow file
    Run(RunArgs),
}

impl Command {
    /// Run the command through `orchestrator`
    pub async fn run<C: ChainClient>(
        self,
        orchestrator: &UpgradeOrchestrator<C>,
        ctx: &CommandContext,
    ) -> Result<(), ScriptError> {
        match self {
            Command::Deploy(args) => deploy(args, orchestrator, ctx).await,
            Command::Register(args) => register(args, orchestrator, ctx).await,
            Command::Upgrade(args) => upgrade(args, orchestrator, ctx).await,
            Command::Configure(args) => configure(args, orchestrator, ctx).await,
            Command::TransferOwnership(args) => transfer_ownership(args, orchestrator, ctx).await,
            Command::Status => status(orchestrator).await,
            Command::Run(args) => run_workflow(args, orchestrator, ctx).await,
        }
    }
}

/// Deploy an implementation contract from a compilation artifact
#[derive(Args)]
pub struct DeployArgs {
    /// Path to the Hardhat or Foundry artifact
    pub artifact: PathBuf,

    /// A constructor argument, repeated in declaration order
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,
}

/// Register a new proxy slot in the registry
#[derive(Args)]
pub struct RegisterArgs {
    /// The name to register the slot under
    pub name: String,

    /// The initial implementation, as an address or a recorded contract name
    #[arg(short, long)]
    pub implementation: String,
}

/// Upgrade a slot, deploying a new implementation or using an existing one
#[derive(Args)]
#[command(group(
    ArgGroup::new("source")
        .required(true)
        .args(["artifact", "implementation"]),
))]
pub struct UpgradeArgs {
    /// The slot to upgrade, by name or id
    pub slot: String,

    /// Deploy this artifact and upgrade to it
    #[arg(short, long)]
    pub artifact: Option<PathBuf>,

    /// Upgrade to an already-deployed implementation, as an address or a recorded contract name
    #[arg(short, long)]
    pub implementation: Option<String>,

    /// A constructor argument for the artifact, repeated in declaration order
    #[arg(long = "arg", allow_hyphen_values = true, requires = "artifact")]
    pub args: Vec<String>,

    /// Gas ceiling for the upgrade transaction
    #[arg(long)]
    pub gas_limit: Option<u64>,
}

/// Call an owner-only setter on the registry or a deployed contract
#[derive(Args)]
pub struct ConfigureArgs {
    /// `registry`, an address, or a recorded contract name
    pub target: String,

    /// The function signature, e.g. `setFeeExclusion(address,bool)`
    pub signature: String,

    /// A call argument, repeated in declaration order
    #[arg(long = "arg", allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Gas ceiling for the call
    #[arg(long)]
    pub gas_limit: Option<u64>,
}

/// Hand ownership of the registry or a deployed contract to a new owner
#[derive(Args)]
pub struct TransferOwnershipArgs {
    /// `registry`, an address, or a recorded contract name
    pub target: String,

    /// The new owner's address, or `dao` for the network's DAO
    #[arg(long)]
    pub new_owner: String,

    /// Skip the confirmation prompt
    #[arg(short, long)]
    pub yes: bool,
}

/// Run a workflow file
#[derive(Args)]
pub struct RunArgs {
    /// Path to the workflow file
    pub workflow: PathBuf,

    /// Skip confirmation prompts before ownership transfers
    #[arg(short, long)]
    pub yes: bool,
}
