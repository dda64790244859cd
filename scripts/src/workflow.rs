//! Multi-step upgrade workflows read from a JSON file.
//!
//! A workflow is an ordered list of steps, e.g.
//!
//! ```json
//! { "steps": [
//!     { "action": "deploy", "name": "staking_v2", "artifact": "out/StakingModule.json", "args": ["0x..", "30"] },
//!     { "action": "upgrade", "slot": "staking", "implementation": "$staking_v2" },
//!     { "action": "configure", "target": "$staking_v2", "signature": "setFeeExclusion(address,bool)", "args": ["0x..", "true"] },
//!     { "action": "transfer_ownership", "target": "registry", "new_owner": "dao" }
//! ] }
//! ```
//!
//! `$name` refers to the address produced by an earlier `deploy` step,
//! `registry` to the configured registry and `dao` to the network's DAO.

use std::{
    collections::{BTreeMap, HashSet},
    fmt::{self, Display},
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use alloy_primitives::Address;
use serde::Deserialize;
use tracing::{info, warn};

use crate::{
    client::ChainClient,
    constants::{DAO_ALIAS, REGISTRY_ALIAS, WORKFLOW_REF_PREFIX},
    deployments::DeploymentsRecord,
    errors::ScriptError,
    orchestrator::UpgradeOrchestrator,
    prompt::confirm,
    types::{
        AdminTarget, ContractArtifact, ImplementationAddress, ProxySlot, RegisteredSlot,
        UpgradePlan,
    },
    utils::{load_artifact, parse_address},
};

/// A single workflow step
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum WorkflowStep {
    /// Deploy an implementation, naming its address for later steps
    Deploy {
        /// The name later steps refer to it by
        name: String,
        /// The artifact, relative to the workflow file
        artifact: PathBuf,
        /// Constructor arguments
        #[serde(default)]
        args: Vec<String>,
    },
    /// Register a new slot
    Register {
        /// The slot's name
        slot: String,
        /// The initial implementation
        implementation: String,
    },
    /// Upgrade an existing slot
    Upgrade {
        /// The slot's name or id
        slot: String,
        /// The new implementation
        implementation: String,
        /// An optional gas ceiling
        #[serde(default)]
        gas_limit: Option<u64>,
    },
    /// Call an owner-only setter
    Configure {
        /// The contract to call
        target: String,
        /// The function signature, e.g. `setFeeExclusion(address,bool)`
        signature: String,
        /// Call arguments, `$name` references are substituted
        #[serde(default)]
        args: Vec<String>,
        /// An optional gas ceiling
        #[serde(default)]
        gas_limit: Option<u64>,
    },
    /// Hand a contract's ownership to a new owner
    TransferOwnership {
        /// The contract to hand over
        target: String,
        /// The new owner
        new_owner: String,
    },
}

impl WorkflowStep {
    /// The step's action name, as written in the file
    pub fn action(&self) -> &'static str {
        match self {
            WorkflowStep::Deploy { .. } => "deploy",
            WorkflowStep::Register { .. } => "register",
            WorkflowStep::Upgrade { .. } => "upgrade",
            WorkflowStep::Configure { .. } => "configure",
            WorkflowStep::TransferOwnership { .. } => "transfer_ownership",
        }
    }
}

/// An address as written in a workflow step
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// The configured registry
    Registry,
    /// The network's DAO
    Dao,
    /// The output of an earlier deploy step
    Output(String),
    /// A literal address
    Literal(Address),
}

impl FromStr for Reference {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(name) = s.strip_prefix(WORKFLOW_REF_PREFIX) {
            return Ok(Reference::Output(name.to_string()));
        }
        if s.eq_ignore_ascii_case(REGISTRY_ALIAS) {
            return Ok(Reference::Registry);
        }
        if s.eq_ignore_ascii_case(DAO_ALIAS) {
            return Ok(Reference::Dao);
        }

        parse_address(s).map(Reference::Literal)
    }
}

impl Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Registry => write!(f, "{REGISTRY_ALIAS}"),
            Reference::Dao => write!(f, "{DAO_ALIAS}"),
            Reference::Output(name) => write!(f, "{WORKFLOW_REF_PREFIX}{name}"),
            Reference::Literal(address) => write!(f, "{address:#x}"),
        }
    }
}

/// A parsed workflow file
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Workflow {
    /// The steps, in execution order
    pub steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// Parse a workflow from JSON
    pub fn parse(contents: &str) -> Result<Self, ScriptError> {
        serde_json::from_str(contents).map_err(|e| ScriptError::Workflow(e.to_string()))
    }

    /// Load a workflow file
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| ScriptError::Workflow(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Check references and the ordering of ownership transfers.
    ///
    /// Every `$name` must be produced by an earlier deploy step, no step may
    /// mutate a contract after its ownership was transferred, and each
    /// contract is transferred at most once.
    ///
    /// Targets are compared as written, so a `$name` and the same contract's
    /// literal address are only matched up by [`WorkflowRunner::run`] once the
    /// deployed addresses are known.
    pub fn validate(&self, dao: Option<Address>) -> Result<(), ScriptError> {
        let mut outputs: HashSet<&str> = HashSet::new();
        let mut transferred: HashSet<Reference> = HashSet::new();

        for (i, step) in self.steps.iter().enumerate() {
            let invalid = |msg: String| {
                ScriptError::InvalidArguments(format!(
                    "step {} ({}): {}",
                    i + 1,
                    step.action(),
                    msg
                ))
            };
            let known = |reference: &Reference| match reference {
                Reference::Output(name) if !outputs.contains(name.as_str()) => Err(invalid(
                    format!("{reference} is not produced by an earlier deploy step"),
                )),
                Reference::Dao if dao.is_none() => {
                    Err(invalid("no DAO address configured for this network".to_string()))
                }
                _ => Ok(()),
            };

            // The contract the step mutates, if any
            let mutated = match step {
                WorkflowStep::Deploy { name, .. } => {
                    if name.is_empty() {
                        return Err(invalid("deploy name must not be empty".to_string()));
                    }
                    if outputs.contains(name.as_str()) {
                        return Err(invalid(format!("{name} is deployed twice")));
                    }
                    None
                }
                WorkflowStep::Register {
                    slot,
                    implementation,
                } => {
                    ProxySlot::check_new_name(slot).map_err(|e| invalid(e.to_string()))?;
                    let implementation = implementation_reference(implementation)
                        .map_err(|e| invalid(e.to_string()))?;
                    known(&implementation)?;
                    Some(Reference::Registry)
                }
                WorkflowStep::Upgrade {
                    slot,
                    implementation,
                    ..
                } => {
                    slot.parse::<ProxySlot>()
                        .map_err(|e| invalid(e.to_string()))?;
                    let implementation = implementation_reference(implementation)
                        .map_err(|e| invalid(e.to_string()))?;
                    known(&implementation)?;
                    Some(Reference::Registry)
                }
                WorkflowStep::Configure { target, args, .. } => {
                    let target = target_reference(target).map_err(|e| invalid(e.to_string()))?;
                    known(&target)?;
                    for arg in args.iter().filter(|arg| arg.starts_with(WORKFLOW_REF_PREFIX)) {
                        known(&arg.parse::<Reference>()?)?;
                    }
                    Some(target)
                }
                WorkflowStep::TransferOwnership { target, new_owner } => {
                    let target = target_reference(target).map_err(|e| invalid(e.to_string()))?;
                    known(&target)?;
                    let new_owner = new_owner
                        .parse::<Reference>()
                        .map_err(|e| invalid(e.to_string()))?;
                    known(&new_owner)?;
                    Some(target)
                }
            };

            if let Some(target) = mutated {
                if transferred.contains(&target) {
                    return Err(invalid(format!(
                        "{target} is used after its ownership was transferred"
                    )));
                }
                if matches!(step, WorkflowStep::TransferOwnership { .. }) {
                    transferred.insert(target);
                }
            }
            if let WorkflowStep::Deploy { name, .. } = step {
                outputs.insert(name.as_str());
            }
        }

        Ok(())
    }
}

/// Parse a reference to an implementation, which cannot be an alias
fn implementation_reference(s: &str) -> Result<Reference, ScriptError> {
    match s.parse()? {
        Reference::Registry | Reference::Dao => Err(ScriptError::InvalidArguments(format!(
            "{s} is not an implementation"
        ))),
        reference => Ok(reference),
    }
}

/// Parse a reference to an ownable contract
fn target_reference(s: &str) -> Result<Reference, ScriptError> {
    match s.parse()? {
        Reference::Dao => Err(ScriptError::InvalidArguments(format!(
            "{s} cannot be administered by this workflow"
        ))),
        reference => Ok(reference),
    }
}

/// What a workflow produced, up to where it stopped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowOutputs {
    /// Deployed implementations by step name
    pub deployed: BTreeMap<String, ImplementationAddress>,
    /// Newly registered slots
    pub registered: Vec<RegisteredSlot>,
    /// The number of steps that completed
    pub completed: usize,
}

/// Settings for running a workflow
#[derive(Debug, Clone, Default)]
pub struct WorkflowContext {
    /// The directory artifact paths are relative to
    pub base_dir: PathBuf,
    /// The network's DAO, the target of `dao` references
    pub dao: Option<Address>,
    /// Where deployed addresses are recorded, if anywhere
    pub record: Option<DeploymentsRecord>,
    /// Skip the confirmation prompt before ownership transfers
    pub assume_yes: bool,
}

/// Runs a workflow's steps in order through an orchestrator
pub struct WorkflowRunner<'a, C> {
    /// The orchestrator executing each step
    orchestrator: &'a UpgradeOrchestrator<C>,
    /// The run's settings
    ctx: WorkflowContext,
}

impl<'a, C: ChainClient> WorkflowRunner<'a, C> {
    /// Create a runner
    pub fn new(orchestrator: &'a UpgradeOrchestrator<C>, ctx: WorkflowContext) -> Self {
        Self { orchestrator, ctx }
    }

    /// Validate the workflow and load its artifacts, then run every step.
    ///
    /// Stops at the first failing step. Earlier steps are not undone; the
    /// addresses deployed so far are logged and recorded.
    pub async fn run(&self, workflow: &Workflow) -> Result<WorkflowOutputs, ScriptError> {
        workflow.validate(self.ctx.dao)?;
        let artifacts = self.load_artifacts(workflow)?;

        let mut outputs = WorkflowOutputs::default();
        let mut transferred: HashSet<Address> = HashSet::new();
        let mut upgraded = false;
        for (i, step) in workflow.steps.iter().enumerate() {
            info!("Step {}/{}: {}", i + 1, workflow.steps.len(), step.action());
            let res = match self.mutated_address(step, &outputs) {
                Ok(Some(target)) if transferred.contains(&target) => {
                    Err(ScriptError::InvalidArguments(format!(
                        "step {} ({}): {target:#x} is used after its ownership was transferred",
                        i + 1,
                        step.action()
                    )))
                }
                Ok(mutated) => self
                    .run_step(step, artifacts.get(&i), &mut outputs)
                    .await
                    .map(|()| mutated),
                Err(e) => Err(e),
            };

            let mutated = match res {
                Ok(mutated) => mutated,
                Err(e) => {
                    if upgraded && matches!(step, WorkflowStep::Configure { .. }) {
                        warn!("configuration failed after an upgrade, the upgrade remains applied");
                    }
                    self.report_partial(&outputs, i);
                    return Err(e);
                }
            };

            if matches!(step, WorkflowStep::TransferOwnership { .. }) {
                transferred.extend(mutated);
            }
            upgraded |= matches!(step, WorkflowStep::Upgrade { .. });
            outputs.completed += 1;
        }

        Ok(outputs)
    }

    /// Load every deploy step's artifact, keyed by step index
    fn load_artifacts(
        &self,
        workflow: &Workflow,
    ) -> Result<BTreeMap<usize, ContractArtifact>, ScriptError> {
        workflow
            .steps
            .iter()
            .enumerate()
            .filter_map(|(i, step)| match step {
                WorkflowStep::Deploy { artifact, .. } => Some((i, artifact)),
                _ => None,
            })
            .map(|(i, path)| Ok((i, load_artifact(&self.ctx.base_dir.join(path))?)))
            .collect()
    }

    /// Execute one step
    async fn run_step(
        &self,
        step: &WorkflowStep,
        artifact: Option<&ContractArtifact>,
        outputs: &mut WorkflowOutputs,
    ) -> Result<(), ScriptError> {
        match step {
            WorkflowStep::Deploy { name, args, .. } => {
                let artifact = artifact.ok_or_else(|| {
                    ScriptError::Workflow(format!("artifact for {name} not loaded"))
                })?;
                let implementation = self
                    .orchestrator
                    .deploy_implementation(artifact, args)
                    .await?;
                outputs.deployed.insert(name.clone(), implementation);
                if let Some(record) = &self.ctx.record {
                    record.record_implementation(name, implementation)?;
                }
            }
            WorkflowStep::Register {
                slot,
                implementation,
            } => {
                let implementation = self.resolve(&implementation.parse()?, outputs)?;
                let registered = self
                    .orchestrator
                    .register_new_slot(slot, ImplementationAddress(implementation))
                    .await?;
                if let Some(record) = &self.ctx.record {
                    record.record_slot(&registered)?;
                }
                outputs.registered.push(registered);
            }
            WorkflowStep::Upgrade {
                slot,
                implementation,
                gas_limit,
            } => {
                let implementation = self.resolve(&implementation.parse()?, outputs)?;
                let mut plan =
                    UpgradePlan::new(slot.parse()?, ImplementationAddress(implementation));
                plan.gas_limit = *gas_limit;
                self.orchestrator.upgrade_slot(plan).await?;
            }
            WorkflowStep::Configure {
                target,
                signature,
                args,
                gas_limit,
            } => {
                let target = self.admin_target(&target.parse()?, outputs)?;
                let args = args
                    .iter()
                    .map(|arg| self.substitute(arg, outputs))
                    .collect::<Result<Vec<_>, _>>()?;
                self.orchestrator
                    .configure(target, signature, &args, *gas_limit)
                    .await?;
            }
            WorkflowStep::TransferOwnership { target, new_owner } => {
                let target = self.admin_target(&target.parse()?, outputs)?;
                let new_owner = self.resolve(&new_owner.parse()?, outputs)?;
                if !self.ctx.assume_yes {
                    let prompt = format!(
                        "Transfer ownership of {target} to {new_owner:#x}? This cannot be undone by the signer"
                    );
                    if !confirm(&prompt)? {
                        return Err(ScriptError::Cancelled);
                    }
                }
                self.orchestrator
                    .transfer_administration(target, new_owner)
                    .await?;
            }
        }

        Ok(())
    }

    /// Resolve a reference to an address
    fn resolve(
        &self,
        reference: &Reference,
        outputs: &WorkflowOutputs,
    ) -> Result<Address, ScriptError> {
        match reference {
            Reference::Registry => Ok(self.orchestrator.registry().address()),
            Reference::Dao => self
                .ctx
                .dao
                .ok_or_else(|| ScriptError::Config("no DAO address configured".to_string())),
            Reference::Output(name) => outputs
                .deployed
                .get(name)
                .map(ImplementationAddress::address)
                .ok_or_else(|| {
                    ScriptError::Workflow(format!("{reference} has not been deployed"))
                }),
            Reference::Literal(address) => Ok(*address),
        }
    }

    /// The address of the contract a step administers, if any
    fn mutated_address(
        &self,
        step: &WorkflowStep,
        outputs: &WorkflowOutputs,
    ) -> Result<Option<Address>, ScriptError> {
        match step {
            WorkflowStep::Deploy { .. } => Ok(None),
            WorkflowStep::Register { .. } | WorkflowStep::Upgrade { .. } => {
                Ok(Some(self.orchestrator.registry().address()))
            }
            WorkflowStep::Configure { target, .. }
            | WorkflowStep::TransferOwnership { target, .. } => {
                self.resolve(&target.parse()?, outputs).map(Some)
            }
        }
    }

    /// Resolve a reference to an administration target
    fn admin_target(
        &self,
        reference: &Reference,
        outputs: &WorkflowOutputs,
    ) -> Result<AdminTarget, ScriptError> {
        match reference {
            Reference::Registry => Ok(AdminTarget::Registry),
            other => self.resolve(other, outputs).map(AdminTarget::Contract),
        }
    }

    /// Substitute a `$name` call argument with its address
    fn substitute(&self, arg: &str, outputs: &WorkflowOutputs) -> Result<String, ScriptError> {
        if !arg.starts_with(WORKFLOW_REF_PREFIX) {
            return Ok(arg.to_string());
        }

        let address = self.resolve(&arg.parse()?, outputs)?;
        Ok(format!("{address:#x}"))
    }

    /// Log what a failed run left behind
    fn report_partial(&self, outputs: &WorkflowOutputs, failed_step: usize) {
        warn!(
            "workflow stopped at step {} after {} completed steps",
            failed_step + 1,
            outputs.completed
        );
        for (name, implementation) in outputs.deployed.iter() {
            warn!("{name} remains deployed at {implementation}");
        }
        for slot in outputs.registered.iter() {
            warn!("{slot} remains registered");
        }
    }
}
