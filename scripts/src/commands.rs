//! Implementations of the upgrade scripts' commands

use std::path::Path;

use alloy_primitives::Address;
use itertools::Itertools;
use tracing::{info, warn};

use crate::{
    cli::{
        ConfigureArgs, DeployArgs, RegisterArgs, RunArgs, TransferOwnershipArgs, UpgradeArgs,
    },
    client::ChainClient,
    constants::{DAO_ALIAS, REGISTRY_ALIAS},
    deployments::DeploymentsRecord,
    errors::ScriptError,
    orchestrator::UpgradeOrchestrator,
    prompt::confirm,
    types::{AdminTarget, ImplementationAddress, ProxySlot, UpgradeOperation, UpgradePlan},
    utils::{display_balance, load_artifact, parse_address},
    workflow::{Workflow, WorkflowContext, WorkflowRunner},
};

/// Per-invocation state shared by the commands
#[derive(Debug, Clone)]
pub struct CommandContext {
    /// Where deployed addresses are recorded
    pub record: DeploymentsRecord,
    /// The network's DAO, if configured
    pub dao: Option<Address>,
}

impl CommandContext {
    /// Resolve an implementation given as an address or a recorded contract name
    fn implementation(&self, s: &str) -> Result<ImplementationAddress, ScriptError> {
        match parse_address(s) {
            Ok(address) => Ok(ImplementationAddress(address)),
            Err(_) => self.record.implementation(s),
        }
    }

    /// Resolve `registry`, an address, or a recorded contract name
    fn target(&self, s: &str) -> Result<AdminTarget, ScriptError> {
        if s.eq_ignore_ascii_case(REGISTRY_ALIAS) {
            return Ok(AdminTarget::Registry);
        }
        self.implementation(s)
            .map(|implementation| AdminTarget::Contract(implementation.address()))
    }

    /// Resolve a new owner given as an address or the `dao` alias
    fn new_owner(&self, s: &str) -> Result<Address, ScriptError> {
        if s.eq_ignore_ascii_case(DAO_ALIAS) {
            return self
                .dao
                .ok_or_else(|| ScriptError::Config("no DAO address configured".to_string()));
        }
        parse_address(s)
    }
}

/// Deploy an implementation and record its address
pub async fn deploy<C: ChainClient>(
    args: DeployArgs,
    orchestrator: &UpgradeOrchestrator<C>,
    ctx: &CommandContext,
) -> Result<(), ScriptError> {
    let artifact = load_artifact(&args.artifact)?;
    let implementation = orchestrator
        .deploy_implementation(&artifact, &args.args)
        .await?;
    ctx.record
        .record_implementation(&artifact.name, implementation)
}

/// Register a new slot and record its id
pub async fn register<C: ChainClient>(
    args: RegisterArgs,
    orchestrator: &UpgradeOrchestrator<C>,
    ctx: &CommandContext,
) -> Result<(), ScriptError> {
    let implementation = ctx.implementation(&args.implementation)?;
    let slot = orchestrator
        .register_new_slot(&args.name, implementation)
        .await?;
    ctx.record.record_slot(&slot)
}

/// Upgrade a slot, deploying the implementation first if given an artifact
pub async fn upgrade<C: ChainClient>(
    args: UpgradeArgs,
    orchestrator: &UpgradeOrchestrator<C>,
    ctx: &CommandContext,
) -> Result<(), ScriptError> {
    let slot: ProxySlot = args.slot.parse()?;

    if let Some(implementation) = args.implementation {
        let mut plan = UpgradePlan::new(slot, ctx.implementation(&implementation)?);
        plan.gas_limit = args.gas_limit;
        return orchestrator.upgrade_slot(plan).await.map(|_| ());
    }

    let path = args.artifact.ok_or_else(|| {
        ScriptError::InvalidArguments(
            "one of --artifact or --implementation is required".to_string(),
        )
    })?;
    let artifact = load_artifact(&path)?;
    let name = artifact.name.clone();

    let mut op = UpgradeOperation::new(slot, artifact, args.args, args.gas_limit);
    let res = orchestrator.execute(&mut op).await;

    // Record the deployment even if the upgrade itself failed
    if let Some(implementation) = op.deployed() {
        ctx.record.record_implementation(&name, implementation)?;
    }
    res.map(|_| ())
}

/// Call an owner-only setter
pub async fn configure<C: ChainClient>(
    args: ConfigureArgs,
    orchestrator: &UpgradeOrchestrator<C>,
    ctx: &CommandContext,
) -> Result<(), ScriptError> {
    let target = ctx.target(&args.target)?;
    orchestrator
        .configure(target, &args.signature, &args.args, args.gas_limit)
        .await
        .map(|_| ())
}

/// Transfer ownership after the operator confirms
pub async fn transfer_ownership<C: ChainClient>(
    args: TransferOwnershipArgs,
    orchestrator: &UpgradeOrchestrator<C>,
    ctx: &CommandContext,
) -> Result<(), ScriptError> {
    let target = ctx.target(&args.target)?;
    let new_owner = ctx.new_owner(&args.new_owner)?;

    if !args.yes {
        let prompt = format!(
            "Transfer ownership of {target} to {new_owner:#x}? The signer will no longer be able to administer it"
        );
        if !confirm(&prompt)? {
            return Err(ScriptError::Cancelled);
        }
    }

    orchestrator
        .transfer_administration(target, new_owner)
        .await
        .map(|_| ())
}

/// Log the signer, the registry owner, and every slot's implementation
pub async fn status<C: ChainClient>(
    orchestrator: &UpgradeOrchestrator<C>,
) -> Result<(), ScriptError> {
    let registry = orchestrator.registry();
    let balance = orchestrator.signer_balance().await?;
    let owner = registry.owner_of(AdminTarget::Registry).await?;

    info!(
        "Signer {:#x}, balance {}",
        orchestrator.signer_address(),
        display_balance(balance)
    );
    info!("Registry {:#x}, owned by {owner:#x}", registry.address());
    if owner != orchestrator.signer_address() {
        warn!("The signer does not own the registry, upgrades will be rejected");
    }

    let slots = registry.slots().await?;
    if slots.is_empty() {
        info!("No slots registered");
        return Ok(());
    }

    let mut lines = Vec::with_capacity(slots.len());
    for slot in slots.iter() {
        let implementation = registry.implementation(slot.id).await?;
        let proxy = registry.proxy_address(slot.id).await?;
        let delegate = registry.proxy_implementation(proxy).await?;
        lines.push(format!("{slot}: proxy {proxy:#x} -> {delegate}"));
        if delegate != implementation {
            warn!("{slot}: registry records {implementation} but the proxy delegates to {delegate}");
        }
    }
    info!("{} slots:\n{}", slots.len(), lines.iter().join("\n"));

    Ok(())
}

/// Run a workflow file, resolving artifacts relative to it
pub async fn run_workflow<C: ChainClient>(
    args: RunArgs,
    orchestrator: &UpgradeOrchestrator<C>,
    ctx: &CommandContext,
) -> Result<(), ScriptError> {
    let workflow = Workflow::load(&args.workflow)?;
    let base_dir = args
        .workflow
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    let runner = WorkflowRunner::new(
        orchestrator,
        WorkflowContext {
            base_dir,
            dao: ctx.dao,
            record: Some(ctx.record.clone()),
            assume_yes: args.yes,
        },
    );
    let outputs = runner.run(&workflow).await?;

    info!("Workflow completed {} steps", outputs.completed);
    for (name, implementation) in outputs.deployed.iter() {
        info!("{name}: {implementation}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf, sync::Arc, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::OrchestratorConfig,
        mock::{staking_args, MockChain, STAKING_ARTIFACT},
    };

    fn deployer() -> Address {
        Address::repeat_byte(0xd0)
    }

    fn dao() -> Address {
        Address::repeat_byte(0xda)
    }

    struct Harness {
        chain: Arc<MockChain>,
        orchestrator: UpgradeOrchestrator<MockChain>,
        ctx: CommandContext,
        artifact: PathBuf,
        _dir: TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let artifact = dir.path().join("StakingModule.json");
        fs::write(&artifact, STAKING_ARTIFACT).unwrap();

        let chain = Arc::new(MockChain::new(deployer()));
        let config = OrchestratorConfig {
            registry_address: chain.registry_address(),
            confirmation_timeout: Duration::from_millis(50),
        };
        let ctx = CommandContext {
            record: DeploymentsRecord::new(dir.path().join("deployments.json"), "localhost"),
            dao: Some(dao()),
        };

        Harness {
            orchestrator: UpgradeOrchestrator::new(chain.clone(), config),
            chain,
            ctx,
            artifact,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn test_deploy_register_upgrade_by_recorded_name() {
        let h = harness();

        let deploy_args = DeployArgs {
            artifact: h.artifact.clone(),
            args: staking_args(),
        };
        deploy(deploy_args, &h.orchestrator, &h.ctx).await.unwrap();
        let v1 = h.ctx.record.implementation("StakingModule").unwrap();

        let register_args = RegisterArgs {
            name: "staking".to_string(),
            implementation: "StakingModule".to_string(),
        };
        register(register_args, &h.orchestrator, &h.ctx)
            .await
            .unwrap();
        assert_eq!(h.chain.implementation_of(0), Some(v1.address()));

        let upgrade_args = UpgradeArgs {
            slot: "staking".to_string(),
            artifact: Some(h.artifact.clone()),
            implementation: None,
            args: staking_args(),
            gas_limit: None,
        };
        upgrade(upgrade_args, &h.orchestrator, &h.ctx)
            .await
            .unwrap();

        let v2 = h.ctx.record.implementation("StakingModule").unwrap();
        assert_ne!(v1, v2);
        assert_eq!(h.chain.implementation_of(0), Some(v2.address()));
    }

    #[tokio::test]
    async fn test_failed_upgrade_still_records_deployment() {
        let h = harness();
        let v1 = h
            .orchestrator
            .deploy_implementation(&load_artifact(&h.artifact).unwrap(), &staking_args())
            .await
            .unwrap();
        h.orchestrator
            .register_new_slot("staking", v1)
            .await
            .unwrap();
        h.chain.revert_upgrades(true);

        let upgrade_args = UpgradeArgs {
            slot: "0".to_string(),
            artifact: Some(h.artifact.clone()),
            implementation: None,
            args: staking_args(),
            gas_limit: None,
        };
        let res = upgrade(upgrade_args, &h.orchestrator, &h.ctx).await;

        assert!(matches!(res, Err(ScriptError::UpgradeRejected(_))));
        let recorded = h.ctx.record.implementation("StakingModule").unwrap();
        assert_ne!(recorded, v1);
        assert_eq!(h.chain.implementation_of(0), Some(v1.address()));
    }

    #[tokio::test]
    async fn test_transfer_ownership_to_dao() {
        let h = harness();
        let args = TransferOwnershipArgs {
            target: "registry".to_string(),
            new_owner: "dao".to_string(),
            yes: true,
        };

        transfer_ownership(args, &h.orchestrator, &h.ctx)
            .await
            .unwrap();
        assert_eq!(h.chain.owner_of(h.chain.registry_address()), Some(dao()));
    }

    #[tokio::test]
    async fn test_unknown_recorded_name() {
        let h = harness();
        let args = ConfigureArgs {
            target: "Vault".to_string(),
            signature: "pause()".to_string(),
            args: vec![],
            gas_limit: None,
        };

        let res = configure(args, &h.orchestrator, &h.ctx).await;
        assert!(matches!(res, Err(ScriptError::ReadDeployments(_))));
        assert_eq!(h.chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_status() {
        let h = harness();
        let v1 = h
            .orchestrator
            .deploy_implementation(&load_artifact(&h.artifact).unwrap(), &staking_args())
            .await
            .unwrap();
        h.orchestrator
            .register_new_slot("staking", v1)
            .await
            .unwrap();

        status(&h.orchestrator).await.unwrap();
    }
}
