//! The upgrade orchestrator: deploys implementations, registers and upgrades
//! registry slots, and hands over administration.
//!
//! Each operation is a linear sequence of confirmed transactions. Nothing is
//! retried: a resubmitted transaction either spends gas twice or collides on
//! its nonce, so every failure is surfaced to the caller as-is.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use alloy_primitives::{Address, U256};
use tracing::{debug, error, info, warn};

use crate::{
    client::{ChainClient, TxRequest},
    config::OrchestratorConfig,
    errors::ScriptError,
    registry::ProxyRegistry,
    types::{
        AdminTarget, ContractArtifact, ImplementationAddress, ProxySlot, RegisteredSlot,
        TxReceipt, UpgradeOperation, UpgradePlan, UpgradeState,
    },
    utils::{creation_code, encode_function_call},
};

/// A flag stopping an orchestrator before its next submission.
///
/// Transactions already submitted are still awaited.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Request cancellation
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives upgrades against one registry, signing with one identity
pub struct UpgradeOrchestrator<C> {
    /// The client all transactions go through
    client: Arc<C>,
    /// The proxy registry
    registry: ProxyRegistry<C>,
    /// The orchestrator's settings
    config: OrchestratorConfig,
    /// Checked before every submission
    cancel: CancelFlag,
}

impl<C: ChainClient> UpgradeOrchestrator<C> {
    /// Create an orchestrator for the registry named in `config`
    pub fn new(client: Arc<C>, config: OrchestratorConfig) -> Self {
        let registry = ProxyRegistry::new(config.registry_address, client.clone());
        Self {
            client,
            registry,
            config,
            cancel: CancelFlag::default(),
        }
    }

    /// Use an externally controlled cancellation flag
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    /// The proxy registry
    pub fn registry(&self) -> &ProxyRegistry<C> {
        &self.registry
    }

    /// The address authorizing every transaction
    pub fn signer_address(&self) -> Address {
        self.client.sender()
    }

    /// The signer's native balance
    pub async fn signer_balance(&self) -> Result<U256, ScriptError> {
        self.client
            .get_balance(self.client.sender())
            .await
            .map_err(|e| ScriptError::ContractInteraction(e.to_string()))
    }

    // --------------
    // | Operations |
    // --------------

    /// Deploy an implementation and wait for its creation to be confirmed.
    ///
    /// Constructor arguments are coerced against the artifact's ABI before
    /// anything is submitted.
    pub async fn deploy_implementation(
        &self,
        artifact: &ContractArtifact,
        constructor_args: &[String],
    ) -> Result<ImplementationAddress, ScriptError> {
        let code = creation_code(artifact, constructor_args)?;

        info!("Deploying {}...", artifact.name);
        let receipt = self
            .submit(TxRequest::create(code), ScriptError::DeploymentFailed)
            .await?;

        let address = receipt
            .contract_address
            .filter(|address| !address.is_zero())
            .ok_or_else(|| {
                ScriptError::DeploymentFailed(format!(
                    "receipt for {:#x} has no contract address",
                    receipt.tx_hash
                ))
            })?;

        info!("{} deployed at {address:#x}", artifact.name);
        Ok(ImplementationAddress(address))
    }

    /// Point a registry slot at an already-deployed implementation.
    ///
    /// Fails without submitting anything if the implementation is zero or
    /// the slot already delegates to it. After confirmation the slot is read
    /// back, and a slot that does not report the new implementation counts as
    /// a rejected upgrade.
    pub async fn upgrade_slot(&self, plan: UpgradePlan) -> Result<TxReceipt, ScriptError> {
        let UpgradePlan {
            slot,
            new_implementation,
            constructor_args: _,
            gas_limit,
        } = plan;

        if new_implementation.is_zero() {
            return Err(ScriptError::InvalidArguments(format!(
                "cannot upgrade {} to the zero address",
                slot
            )));
        }

        let slot = self.registry.resolve(&slot).await?;
        let current = self.registry.implementation(slot.id).await?;
        if current == new_implementation {
            return Err(ScriptError::NoOpUpgrade {
                slot: slot.to_string(),
                implementation: current.address(),
            });
        }

        info!("Upgrading {slot} from {current} to {new_implementation}...");
        let calldata = self.registry.upgrade_calldata(slot.id, new_implementation);
        let tx = TxRequest::call(self.registry.address(), calldata).with_gas_limit(gas_limit);
        let receipt = self.submit(tx, ScriptError::UpgradeRejected).await?;

        let observed = self.registry.implementation(slot.id).await?;
        if observed != new_implementation {
            return Err(ScriptError::UpgradeRejected(format!(
                "{} reports {} after upgrade to {} in {:#x}",
                slot, observed, new_implementation, receipt.tx_hash
            )));
        }

        // The proxy must delegate to what the registry records
        let proxy = self.registry.proxy_address(slot.id).await?;
        let delegate = self.registry.proxy_implementation(proxy).await?;
        if delegate != new_implementation {
            return Err(ScriptError::UpgradeRejected(format!(
                "proxy {:#x} of {} delegates to {} after upgrade to {} in {:#x}",
                proxy, slot, delegate, new_implementation, receipt.tx_hash
            )));
        }

        info!("Upgraded {slot} to {new_implementation}");
        Ok(receipt)
    }

    /// Register a new slot named `name`, delegating to `initial_implementation`.
    ///
    /// The registry accepts duplicate names, so uniqueness is checked by
    /// reading it first. Another writer registering the same name between the
    /// read and the write is not detected.
    pub async fn register_new_slot(
        &self,
        name: &str,
        initial_implementation: ImplementationAddress,
    ) -> Result<RegisteredSlot, ScriptError> {
        ProxySlot::check_new_name(name)?;
        if initial_implementation.is_zero() {
            return Err(ScriptError::InvalidArguments(format!(
                "cannot register {} with the zero address",
                name
            )));
        }

        if let Some(existing) = self.registry.find_by_name(name).await? {
            return Err(ScriptError::DuplicateSlot(existing.to_string()));
        }

        info!("Registering {name} -> {initial_implementation}...");
        let calldata = self
            .registry
            .add_proxy_calldata(name, initial_implementation);
        self.submit(
            TxRequest::call(self.registry.address(), calldata),
            ScriptError::UpgradeRejected,
        )
        .await?;

        let slot = self.registry.find_by_name(name).await?.ok_or_else(|| {
            ScriptError::UpgradeRejected(format!("{} not in registry after registration", name))
        })?;

        info!("Registered {slot}");
        Ok(slot)
    }

    /// Hand administration of `target` to `new_owner`.
    ///
    /// This must be the last mutating step for `target`: once it confirms,
    /// the signer can no longer configure or upgrade it. The registry has no
    /// notion of configuration being complete, so the ordering is up to the
    /// caller.
    pub async fn transfer_administration(
        &self,
        target: AdminTarget,
        new_owner: Address,
    ) -> Result<TxReceipt, ScriptError> {
        if new_owner.is_zero() {
            return Err(ScriptError::InvalidArguments(format!(
                "cannot transfer {} to the zero address",
                target
            )));
        }

        let signer = self.client.sender();
        let current = self.registry.owner_of(target).await?;
        if current != signer {
            return Err(ScriptError::TransferRejected(format!(
                "signer {signer:#x} is not the owner of {target}, owner is {current:#x}"
            )));
        }
        if current == new_owner {
            return Err(ScriptError::InvalidArguments(format!(
                "{target} is already owned by {new_owner:#x}"
            )));
        }

        warn!("Transferring ownership of {target} to {new_owner:#x}, the signer loses control");
        let calldata = self.registry.transfer_ownership_calldata(new_owner);
        let tx = TxRequest::call(self.registry.target_address(target), calldata);
        let receipt = self.submit(tx, ScriptError::TransferRejected).await?;

        let observed = self.registry.owner_of(target).await?;
        if observed != new_owner {
            return Err(ScriptError::TransferRejected(format!(
                "{target} reports owner {observed:#x} after transfer in {:#x}",
                receipt.tx_hash
            )));
        }

        info!("Ownership of {target} transferred to {new_owner:#x}");
        Ok(receipt)
    }

    /// Call an owner-only setter on `target`, e.g. `setFeeExclusion(address,bool)`.
    ///
    /// There is no atomicity with any preceding upgrade: if this call fails
    /// after an upgrade confirmed, the upgrade stays in place.
    pub async fn configure(
        &self,
        target: AdminTarget,
        signature: &str,
        args: &[String],
        gas_limit: Option<u64>,
    ) -> Result<TxReceipt, ScriptError> {
        let calldata = encode_function_call(signature, args)?;

        info!("Calling {signature} on {target}...");
        let tx = TxRequest::call(self.registry.target_address(target), calldata)
            .with_gas_limit(gas_limit);
        let receipt = self.submit(tx, ScriptError::ConfigurationFailed).await?;

        info!("{signature} confirmed in {:#x}", receipt.tx_hash);
        Ok(receipt)
    }

    /// Deploy the operation's implementation and upgrade its slot to it.
    ///
    /// The slot is resolved before deploying, so an unknown slot costs no gas.
    /// On failure the operation is left `Rejected`, except after a
    /// confirmation timeout, where it stays in its in-flight state since the
    /// transaction may still land. The deployed implementation remains
    /// available on the operation either way.
    pub async fn execute(&self, op: &mut UpgradeOperation) -> Result<TxReceipt, ScriptError> {
        if op.state != UpgradeState::Planned {
            return Err(ScriptError::InvalidArguments(format!(
                "operation on {} was already executed, it is {}",
                op.slot, op.state
            )));
        }

        let res = self.execute_inner(op).await;
        match &res {
            Ok(_) => op.transition(UpgradeState::Upgraded),
            Err(ScriptError::ConfirmationTimeout { .. }) => {
                warn!("{} left {} pending confirmation", op.slot, op.state);
            }
            Err(e) => {
                op.transition(UpgradeState::Rejected);
                if let Some(implementation) = op.deployed {
                    error!(
                        "upgrade of {} failed ({e}), implementation {implementation} remains deployed",
                        op.slot
                    );
                }
            }
        }

        res
    }

    /// The steps of [`Self::execute`], advancing the operation's state
    async fn execute_inner(&self, op: &mut UpgradeOperation) -> Result<TxReceipt, ScriptError> {
        let slot = self.registry.resolve(&op.slot).await?;

        op.transition(UpgradeState::Deploying);
        let implementation = self
            .deploy_implementation(&op.artifact, &op.constructor_args)
            .await?;
        op.deployed = Some(implementation);
        op.transition(UpgradeState::Deployed);

        let plan = UpgradePlan {
            slot: ProxySlot::Id(slot.id),
            new_implementation: implementation,
            constructor_args: op.constructor_args.clone(),
            gas_limit: op.gas_limit,
        };
        op.transition(UpgradeState::Upgrading);
        self.upgrade_slot(plan).await
    }

    // -----------
    // | Helpers |
    // -----------

    /// Submit a transaction and wait for it to be confirmed, mapping failures
    /// onto `kind` for the step in progress
    async fn submit(
        &self,
        tx: TxRequest,
        kind: fn(String) -> ScriptError,
    ) -> Result<TxReceipt, ScriptError> {
        if self.cancel.is_cancelled() {
            return Err(ScriptError::Cancelled);
        }

        let timeout = self.config.confirmation_timeout;
        let tx_hash = self
            .client
            .send_transaction(tx)
            .await
            .map_err(|e| ScriptError::from_chain(e, timeout, kind))?;
        debug!("Submitted {tx_hash:#x}, waiting for confirmation...");

        let receipt = self
            .client
            .wait_for_confirmation(tx_hash, timeout)
            .await
            .map_err(|e| ScriptError::from_chain(e, timeout, kind))?;
        if !receipt.success {
            return Err(kind(format!("transaction {:#x} reverted", tx_hash)));
        }

        debug!(
            "{tx_hash:#x} confirmed in block {:?}, gas used {}",
            receipt.block_number, receipt.gas_used
        );
        Ok(receipt)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::mock::{staking_args, staking_artifact, zap_artifact, MockChain};

    /// The signer used by every test chain
    fn deployer() -> Address {
        Address::repeat_byte(0xd0)
    }

    /// The DAO administration is handed to
    fn dao() -> Address {
        Address::repeat_byte(0xda)
    }

    fn setup() -> (Arc<MockChain>, UpgradeOrchestrator<MockChain>) {
        let chain = Arc::new(MockChain::new(deployer()));
        let config = OrchestratorConfig {
            registry_address: chain.registry_address(),
            confirmation_timeout: Duration::from_millis(50),
        };
        let orchestrator = UpgradeOrchestrator::new(chain.clone(), config);
        (chain, orchestrator)
    }

    /// Deploy the staking module and register it as `staking`
    async fn setup_staking(
        orchestrator: &UpgradeOrchestrator<MockChain>,
    ) -> (ImplementationAddress, RegisteredSlot) {
        let implementation = orchestrator
            .deploy_implementation(&staking_artifact(), &staking_args())
            .await
            .unwrap();
        let slot = orchestrator
            .register_new_slot("staking", implementation)
            .await
            .unwrap();
        (implementation, slot)
    }

    fn staking() -> ProxySlot {
        ProxySlot::Name("staking".to_string())
    }

    #[tokio::test]
    async fn test_register_then_upgrade_then_noop() {
        let (chain, orchestrator) = setup();
        let (i1, slot) = setup_staking(&orchestrator).await;
        assert_eq!(slot.id, 0);
        assert_eq!(orchestrator.registry().implementation(0).await.unwrap(), i1);

        let i2 = orchestrator
            .deploy_implementation(&staking_artifact(), &staking_args())
            .await
            .unwrap();
        assert_ne!(i1, i2);

        orchestrator
            .upgrade_slot(UpgradePlan::new(staking(), i2))
            .await
            .unwrap();
        for _ in 0..3 {
            assert_eq!(orchestrator.registry().implementation(0).await.unwrap(), i2);
        }
        assert_eq!(chain.implementation_of(0), Some(i2.address()));
        let proxy = orchestrator.registry().proxy_address(0).await.unwrap();
        assert_eq!(
            orchestrator.registry().proxy_implementation(proxy).await.unwrap(),
            i2
        );

        let res = orchestrator.upgrade_slot(UpgradePlan::new(staking(), i2)).await;
        assert_eq!(
            res,
            Err(ScriptError::NoOpUpgrade {
                slot: "staking (#0)".to_string(),
                implementation: i2.address(),
            })
        );
    }

    #[tokio::test]
    async fn test_noop_upgrade_submits_nothing() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;

        let sent_before = chain.sent_count();
        let res = orchestrator
            .upgrade_slot(UpgradePlan::new(ProxySlot::Id(0), i1))
            .await;

        assert!(matches!(res, Err(ScriptError::NoOpUpgrade { .. })));
        assert_eq!(chain.sent_count(), sent_before);
    }

    #[tokio::test]
    async fn test_zero_implementation_rejected_before_submission() {
        let (chain, orchestrator) = setup();
        setup_staking(&orchestrator).await;

        let sent_before = chain.sent_count();
        let plan = UpgradePlan::new(staking(), ImplementationAddress(Address::ZERO));
        let res = orchestrator.upgrade_slot(plan).await;

        assert!(matches!(res, Err(ScriptError::InvalidArguments(_))));
        assert_eq!(chain.sent_count(), sent_before);
    }

    #[tokio::test]
    async fn test_reverted_upgrade_leaves_slot_unchanged() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;
        let i2 = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();

        chain.revert_upgrades(true);
        let res = orchestrator.upgrade_slot(UpgradePlan::new(staking(), i2)).await;

        assert!(matches!(res, Err(ScriptError::UpgradeRejected(_))));
        assert_eq!(orchestrator.registry().implementation(0).await.unwrap(), i1);
    }

    #[tokio::test]
    async fn test_node_rejection_leaves_slot_unchanged() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;
        let i2 = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();

        chain.reject_next_send("nonce too low");
        let res = orchestrator
            .upgrade_slot(UpgradePlan::new(staking(), i2).with_gas_limit(200_000))
            .await;

        assert_eq!(
            res,
            Err(ScriptError::UpgradeRejected("nonce too low".to_string()))
        );
        assert_eq!(chain.implementation_of(0), Some(i1.address()));
    }

    #[tokio::test]
    async fn test_unapplied_upgrade_fails_verification() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;
        let i2 = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();

        chain.ignore_upgrades(true);
        let res = orchestrator.upgrade_slot(UpgradePlan::new(staking(), i2)).await;

        assert!(matches!(res, Err(ScriptError::UpgradeRejected(_))));
        assert_eq!(chain.implementation_of(0), Some(i1.address()));
    }

    #[tokio::test]
    async fn test_proxy_not_following_registry_fails_verification() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;
        let i2 = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();

        chain.detach_proxies(true);
        let res = orchestrator.upgrade_slot(UpgradePlan::new(staking(), i2)).await;

        assert!(matches!(res, Err(ScriptError::UpgradeRejected(msg)) if msg.starts_with("proxy")));
        let proxy = orchestrator.registry().proxy_address(0).await.unwrap();
        assert_eq!(
            orchestrator.registry().proxy_implementation(proxy).await.unwrap(),
            i1
        );
    }

    #[tokio::test]
    async fn test_unknown_slot() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;

        let by_name = orchestrator
            .upgrade_slot(UpgradePlan::new(ProxySlot::Name("vault".to_string()), i1))
            .await;
        let by_id = orchestrator
            .upgrade_slot(UpgradePlan::new(ProxySlot::Id(7), i1))
            .await;

        assert!(matches!(by_name, Err(ScriptError::InvalidArguments(_))));
        assert!(matches!(by_id, Err(ScriptError::InvalidArguments(_))));
        assert_eq!(chain.sent_count(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_slot() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;
        let i2 = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();

        let res = orchestrator.register_new_slot("staking", i2).await;

        assert!(matches!(res, Err(ScriptError::DuplicateSlot(_))));
        assert_eq!(chain.slots_named("staking"), 1);
        assert_eq!(chain.implementation_of(0), Some(i1.address()));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_input() {
        let (chain, orchestrator) = setup();
        let i1 = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();
        let sent_before = chain.sent_count();

        let zero = orchestrator
            .register_new_slot("zap", ImplementationAddress(Address::ZERO))
            .await;
        let empty = orchestrator.register_new_slot(" ", i1).await;
        let numeric = orchestrator.register_new_slot("12", i1).await;

        assert!(matches!(zero, Err(ScriptError::InvalidArguments(_))));
        assert!(matches!(empty, Err(ScriptError::InvalidArguments(_))));
        assert!(matches!(numeric, Err(ScriptError::InvalidArguments(_))));
        assert_eq!(chain.sent_count(), sent_before);
    }

    #[tokio::test]
    async fn test_transfer_administration() {
        let (chain, orchestrator) = setup();
        setup_staking(&orchestrator).await;

        orchestrator
            .transfer_administration(AdminTarget::Registry, dao())
            .await
            .unwrap();
        assert_eq!(chain.owner_of(chain.registry_address()), Some(dao()));

        // The signer gave up control, so neither a second transfer nor an upgrade goes through
        let again = orchestrator
            .transfer_administration(AdminTarget::Registry, deployer())
            .await;
        assert!(matches!(again, Err(ScriptError::TransferRejected(_))));

        let i2 = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();
        let upgrade = orchestrator.upgrade_slot(UpgradePlan::new(staking(), i2)).await;
        assert!(matches!(upgrade, Err(ScriptError::UpgradeRejected(_))));
    }

    #[tokio::test]
    async fn test_transfer_by_non_owner() {
        let (chain, orchestrator) = setup();
        let other = Address::repeat_byte(0x0b);
        chain.set_owner(chain.registry_address(), other);

        let res = orchestrator
            .transfer_administration(AdminTarget::Registry, dao())
            .await;

        assert!(matches!(res, Err(ScriptError::TransferRejected(_))));
        assert_eq!(chain.owner_of(chain.registry_address()), Some(other));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_transfer_of_implementation_contract() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;

        orchestrator
            .transfer_administration(AdminTarget::Contract(i1.address()), dao())
            .await
            .unwrap();

        assert_eq!(chain.owner_of(i1.address()), Some(dao()));
        assert_eq!(chain.owner_of(chain.registry_address()), Some(deployer()));
    }

    #[tokio::test]
    async fn test_transfer_to_zero_address() {
        let (chain, orchestrator) = setup();

        let res = orchestrator
            .transfer_administration(AdminTarget::Registry, Address::ZERO)
            .await;

        assert!(matches!(res, Err(ScriptError::InvalidArguments(_))));
        assert_eq!(chain.owner_of(chain.registry_address()), Some(deployer()));
    }

    #[tokio::test]
    async fn test_deploy_with_invalid_arguments() {
        let (chain, orchestrator) = setup();

        let arity = orchestrator
            .deploy_implementation(&staking_artifact(), &["30".to_string()])
            .await;
        let types = orchestrator
            .deploy_implementation(
                &staking_artifact(),
                &["0x70".to_string(), "not-a-number".to_string()],
            )
            .await;

        assert!(matches!(arity, Err(ScriptError::InvalidArguments(_))));
        assert!(matches!(types, Err(ScriptError::InvalidArguments(_))));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_deployment_failed() {
        let (chain, orchestrator) = setup();
        chain.reject_next_send("insufficient funds for gas");

        let res = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await;

        assert_eq!(
            res,
            Err(ScriptError::DeploymentFailed(
                "insufficient funds for gas".to_string()
            ))
        );
    }

    #[tokio::test]
    async fn test_confirmation_timeout() {
        let (chain, orchestrator) = setup();
        chain.withhold_receipts(true);

        let res = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await;

        match res {
            Err(ScriptError::ConfirmationTimeout { timeout, .. }) => {
                assert_eq!(timeout, Duration::from_millis(50))
            }
            other => panic!("expected a confirmation timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancelled_before_submission() {
        let (chain, orchestrator) = setup();
        let cancel = CancelFlag::default();
        let orchestrator = orchestrator.with_cancel_flag(cancel.clone());

        cancel.cancel();
        let res = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await;

        assert_eq!(res, Err(ScriptError::Cancelled));
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_configure() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;
        let account = format!("{:#x}", Address::repeat_byte(0x99));

        orchestrator
            .configure(
                AdminTarget::Contract(i1.address()),
                "setFeeExclusion(address,bool)",
                &[account.clone(), "true".to_string()],
                None,
            )
            .await
            .unwrap();
        assert_eq!(chain.config_calls().len(), 1);
        assert_eq!(chain.config_calls()[0].0, i1.address());

        chain.set_owner(i1.address(), dao());
        let res = orchestrator
            .configure(
                AdminTarget::Contract(i1.address()),
                "setFeeExclusion(address,bool)",
                &[account, "false".to_string()],
                None,
            )
            .await;
        assert!(matches!(res, Err(ScriptError::ConfigurationFailed(_))));
        assert_eq!(chain.config_calls().len(), 1);
    }

    #[tokio::test]
    async fn test_signer_balance() {
        let (chain, orchestrator) = setup();
        chain.set_balance(deployer(), U256::from(10u64).pow(U256::from(18)));

        assert_eq!(orchestrator.signer_address(), deployer());
        assert_eq!(
            orchestrator.signer_balance().await.unwrap(),
            U256::from(1_000_000_000_000_000_000u64)
        );
    }

    #[tokio::test]
    async fn test_execute_operation() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;

        let mut op = UpgradeOperation::new(staking(), staking_artifact(), staking_args(), None);
        assert_eq!(op.state(), UpgradeState::Planned);

        orchestrator.execute(&mut op).await.unwrap();

        let deployed = op.deployed().unwrap();
        assert_eq!(op.state(), UpgradeState::Upgraded);
        assert_ne!(deployed, i1);
        assert_eq!(chain.implementation_of(0), Some(deployed.address()));

        let again = orchestrator.execute(&mut op).await;
        assert!(matches!(again, Err(ScriptError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn test_execute_reports_deployment_after_rejected_upgrade() {
        let (chain, orchestrator) = setup();
        let (i1, _) = setup_staking(&orchestrator).await;
        chain.revert_upgrades(true);

        let mut op = UpgradeOperation::new(staking(), zap_artifact(), vec![], None);
        let res = orchestrator.execute(&mut op).await;

        assert!(matches!(res, Err(ScriptError::UpgradeRejected(_))));
        assert_eq!(op.state(), UpgradeState::Rejected);
        assert!(op.deployed().is_some());
        assert_eq!(chain.implementation_of(0), Some(i1.address()));
    }

    #[tokio::test]
    async fn test_execute_unknown_slot_deploys_nothing() {
        let (chain, orchestrator) = setup();

        let mut op = UpgradeOperation::new(
            ProxySlot::Name("vault".to_string()),
            zap_artifact(),
            vec![],
            None,
        );
        let res = orchestrator.execute(&mut op).await;

        assert!(matches!(res, Err(ScriptError::InvalidArguments(_))));
        assert_eq!(op.state(), UpgradeState::Rejected);
        assert_eq!(op.deployed(), None);
        assert_eq!(chain.sent_count(), 0);
    }

    #[tokio::test]
    async fn test_execute_timeout_leaves_operation_in_flight() {
        let (chain, orchestrator) = setup();
        setup_staking(&orchestrator).await;
        chain.withhold_receipts(true);

        let mut op = UpgradeOperation::new(staking(), zap_artifact(), vec![], None);
        let res = orchestrator.execute(&mut op).await;

        assert!(matches!(res, Err(ScriptError::ConfirmationTimeout { .. })));
        assert_eq!(op.state(), UpgradeState::Deploying);
        assert_eq!(op.deployed(), None);
    }

    #[tokio::test]
    async fn test_unrelated_slots_upgrade_concurrently() {
        let (chain, orchestrator) = setup();
        setup_staking(&orchestrator).await;
        let zap = orchestrator
            .deploy_implementation(&zap_artifact(), &[])
            .await
            .unwrap();
        orchestrator.register_new_slot("zap", zap).await.unwrap();

        let mut staking_op =
            UpgradeOperation::new(staking(), staking_artifact(), staking_args(), None);
        let mut zap_op = UpgradeOperation::new(
            ProxySlot::Name("zap".to_string()),
            zap_artifact(),
            vec![],
            None,
        );
        let (staking_res, zap_res) = tokio::join!(
            orchestrator.execute(&mut staking_op),
            orchestrator.execute(&mut zap_op)
        );

        staking_res.unwrap();
        zap_res.unwrap();
        assert_eq!(
            chain.implementation_of(0),
            staking_op.deployed().map(|i| i.address())
        );
        assert_eq!(
            chain.implementation_of(1),
            zap_op.deployed().map(|i| i.address())
        );
    }
}
