//! An in-memory chain for exercising the orchestrator without a node.
//!
//! The mock decodes calldata against the registry and ownable ABIs, applies
//! successful calls to in-memory state, and records failed ones as reverted
//! receipts without touching state. Faults can be injected per test.

use std::{
    collections::{HashMap, HashSet},
    sync::Mutex,
    time::Duration,
};

use alloy_primitives::{keccak256, Address, Bytes, TxHash, U256};
use alloy_sol_types::{SolCall, SolInterface, SolValue};
use async_trait::async_trait;

use crate::{
    client::{ChainClient, TxRequest},
    errors::ChainError,
    solidity::{
        implCall,
        IOwnable::{self, IOwnableCalls},
        IProxyController::IProxyControllerCalls,
    },
    types::{ContractArtifact, TxReceipt},
    utils::parse_artifact,
};

/// A Hardhat artifact for an upgradeable staking module, whose constructor
/// takes a reward token and a fee in basis points
pub const STAKING_ARTIFACT: &str = r#"{
    "contractName": "StakingModule",
    "abi": [
        {
            "type": "constructor",
            "inputs": [
                { "name": "rewardToken", "type": "address", "internalType": "address" },
                { "name": "feeBps", "type": "uint16", "internalType": "uint16" }
            ],
            "stateMutability": "nonpayable"
        },
        {
            "type": "function",
            "name": "setFeeExclusion",
            "inputs": [
                { "name": "account", "type": "address", "internalType": "address" },
                { "name": "excluded", "type": "bool", "internalType": "bool" }
            ],
            "outputs": [],
            "stateMutability": "nonpayable"
        }
    ],
    "bytecode": "0x608060405234801561001057600080fd5b50"
}"#;

/// A Foundry artifact for a zap contract with no constructor
pub const ZAP_ARTIFACT: &str = r#"{
    "abi": [],
    "bytecode": { "object": "0x6080604052348015600f57600080fd5b50", "linkReferences": {} }
}"#;

/// The staking module artifact
pub fn staking_artifact() -> ContractArtifact {
    parse_artifact(STAKING_ARTIFACT, "StakingModule", None).expect("fixture artifact is valid")
}

/// The zap artifact
pub fn zap_artifact() -> ContractArtifact {
    parse_artifact(ZAP_ARTIFACT, "Zap", None).expect("fixture artifact is valid")
}

/// Constructor arguments accepted by the staking module artifact
pub fn staking_args() -> Vec<String> {
    vec![format!("{:#x}", Address::repeat_byte(0x70)), "30".to_string()]
}

/// The gas reported for every mined transaction
const MOCK_GAS_USED: u64 = 21_000;

/// One proxy in the mock registry
#[derive(Debug, Clone)]
struct MockSlot {
    /// The registered name
    name: String,
    /// The proxy's own address
    proxy: Address,
    /// The implementation recorded by the registry
    implementation: Address,
    /// The implementation the proxy itself reports through `impl()`
    delegate: Address,
}

/// Injected failures
#[derive(Debug, Default)]
struct Faults {
    /// Refuse the next submitted transaction at the node with this message
    reject_next_send: Option<String>,
    /// Revert every `upgradeProxyTo`
    revert_upgrades: bool,
    /// Confirm `upgradeProxyTo` without applying it
    ignore_upgrades: bool,
    /// Apply `upgradeProxyTo` to the registry record but not to the proxy
    detach_proxies: bool,
    /// Never produce receipts
    withhold_receipts: bool,
}

/// The mutable chain state
#[derive(Debug, Default)]
struct MockState {
    /// The sender's nonce
    nonce: u64,
    /// The current block height
    block: u64,
    /// The registry's slots, in id order
    slots: Vec<MockSlot>,
    /// The owner of each ownable contract
    owners: HashMap<Address, Address>,
    /// Addresses with deployed code
    contracts: HashSet<Address>,
    /// Native balances
    balances: HashMap<Address, U256>,
    /// Receipts of mined transactions
    receipts: HashMap<TxHash, TxReceipt>,
    /// Every transaction accepted by the node
    sent: Vec<TxRequest>,
    /// Successful calls that were neither registry nor ownership calls
    config_calls: Vec<(Address, Bytes)>,
    /// Injected failures
    faults: Faults,
}

/// An in-memory [`ChainClient`] hosting a proxy registry
pub struct MockChain {
    /// The signer every transaction is sent from
    sender: Address,
    /// The registry's address
    registry: Address,
    /// The chain state
    state: Mutex<MockState>,
}

impl MockChain {
    /// A chain whose registry is owned by `sender`
    pub fn new(sender: Address) -> Self {
        let registry = Address::repeat_byte(0xee);
        let mut state = MockState::default();
        state.owners.insert(registry, sender);
        state.contracts.insert(registry);

        Self {
            sender,
            registry,
            state: Mutex::new(state),
        }
    }

    /// Lock the chain state
    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state poisoned")
    }

    /// The registry's address
    pub fn registry_address(&self) -> Address {
        self.registry
    }

    /// The number of transactions the node accepted
    pub fn sent_count(&self) -> usize {
        self.state().sent.len()
    }

    /// The implementation the registry records for slot `id`
    pub fn implementation_of(&self, id: u64) -> Option<Address> {
        self.state()
            .slots
            .get(id as usize)
            .map(|slot| slot.implementation)
    }

    /// The number of slots registered under `name`
    pub fn slots_named(&self, name: &str) -> usize {
        self.state()
            .slots
            .iter()
            .filter(|slot| slot.name == name)
            .count()
    }

    /// The owner of an ownable contract
    pub fn owner_of(&self, contract: Address) -> Option<Address> {
        self.state().owners.get(&contract).copied()
    }

    /// Reassign ownership of a contract directly
    pub fn set_owner(&self, contract: Address, owner: Address) {
        self.state().owners.insert(contract, owner);
    }

    /// Set the native balance of an address
    pub fn set_balance(&self, address: Address, balance: U256) {
        self.state().balances.insert(address, balance);
    }

    /// Every successful configuration call, as `(target, calldata)`
    pub fn config_calls(&self) -> Vec<(Address, Bytes)> {
        self.state().config_calls.clone()
    }

    /// Refuse the next submitted transaction at the node
    pub fn reject_next_send(&self, reason: &str) {
        self.state().faults.reject_next_send = Some(reason.to_string());
    }

    /// Revert every `upgradeProxyTo` call
    pub fn revert_upgrades(&self, revert: bool) {
        self.state().faults.revert_upgrades = revert;
    }

    /// Confirm `upgradeProxyTo` calls without applying them
    pub fn ignore_upgrades(&self, ignore: bool) {
        self.state().faults.ignore_upgrades = ignore;
    }

    /// Leave proxies on their old implementation when the registry is upgraded
    pub fn detach_proxies(&self, detach: bool) {
        self.state().faults.detach_proxies = detach;
    }

    /// Stop producing receipts
    pub fn withhold_receipts(&self, withhold: bool) {
        self.state().faults.withhold_receipts = withhold;
    }
}

impl MockState {
    /// Revert unless `sender` owns `contract`
    fn only_owner(&self, contract: Address, sender: Address) -> Result<(), String> {
        match self.owners.get(&contract) {
            Some(owner) if *owner == sender => Ok(()),
            Some(_) => Err("Ownable: caller is not the owner".to_string()),
            None => Err(format!("{contract:#x} is not ownable")),
        }
    }

    /// Apply a transaction, returning the created contract if any.
    ///
    /// Every check runs before any state is touched, so a revert leaves no trace.
    fn execute(
        &mut self,
        sender: Address,
        registry: Address,
        tx: &TxRequest,
        nonce: u64,
    ) -> Result<Option<Address>, String> {
        let to = match tx.to {
            Some(to) => to,
            None => {
                if tx.data.is_empty() {
                    return Err("empty creation code".to_string());
                }
                let created = sender.create(nonce);
                self.contracts.insert(created);
                self.owners.insert(created, sender);
                return Ok(Some(created));
            }
        };

        if to == registry {
            return self.execute_registry(sender, registry, &tx.data);
        }

        if !self.contracts.contains(&to) {
            return Err(format!("no contract at {to:#x}"));
        }
        self.only_owner(to, sender)?;
        match IOwnableCalls::abi_decode(&tx.data) {
            Ok(IOwnableCalls::transferOwnership(call)) => {
                if call.newOwner.is_zero() {
                    return Err("Ownable: new owner is the zero address".to_string());
                }
                self.owners.insert(to, call.newOwner);
            }
            _ => self.config_calls.push((to, tx.data.clone())),
        }

        Ok(None)
    }

    /// Apply a call to the registry
    fn execute_registry(
        &mut self,
        sender: Address,
        registry: Address,
        data: &Bytes,
    ) -> Result<Option<Address>, String> {
        self.only_owner(registry, sender)?;

        if let Ok(IOwnableCalls::transferOwnership(call)) = IOwnableCalls::abi_decode(data) {
            if call.newOwner.is_zero() {
                return Err("Ownable: new owner is the zero address".to_string());
            }
            self.owners.insert(registry, call.newOwner);
            return Ok(None);
        }

        match IProxyControllerCalls::abi_decode(data) {
            Ok(IProxyControllerCalls::addProxy(call)) => {
                let proxy = registry.create(self.slots.len() as u64);
                self.contracts.insert(proxy);
                self.slots.push(MockSlot {
                    name: call.name,
                    proxy,
                    implementation: call.proxy,
                    delegate: call.proxy,
                });
            }
            Ok(IProxyControllerCalls::upgradeProxyTo(call)) => {
                let id = usize::try_from(call.id).map_err(|_| "invalid id".to_string())?;
                if id >= self.slots.len() {
                    return Err("invalid id".to_string());
                }
                if self.faults.revert_upgrades {
                    return Err("upgrade reverted".to_string());
                }
                if !self.faults.ignore_upgrades {
                    self.slots[id].implementation = call.newImpl;
                    if !self.faults.detach_proxies {
                        self.slots[id].delegate = call.newImpl;
                    }
                }
            }
            Ok(_) => {}
            Err(_) => self.config_calls.push((registry, data.clone())),
        }

        Ok(None)
    }

    /// Answer a view call against the registry
    fn call_registry(&self, registry: Address, data: &Bytes) -> Result<Bytes, ChainError> {
        if let Ok(IOwnableCalls::owner(_)) = IOwnableCalls::abi_decode(data) {
            let owner = self.owners.get(&registry).copied().unwrap_or_default();
            return Ok((owner,).abi_encode_params().into());
        }

        let call = IProxyControllerCalls::abi_decode(data)
            .map_err(|e| ChainError::Rejected(format!("execution reverted: {e}")))?;
        let slot = |id: U256| {
            usize::try_from(id)
                .ok()
                .and_then(|id| self.slots.get(id))
                .ok_or_else(|| ChainError::Rejected("execution reverted: invalid id".to_string()))
        };

        let encoded = match call {
            IProxyControllerCalls::fetchImplAddress(call) => {
                (slot(call.id)?.implementation,).abi_encode_params()
            }
            IProxyControllerCalls::fetchProxyAddress(call) => {
                (slot(call.id)?.proxy,).abi_encode_params()
            }
            IProxyControllerCalls::proxyCount(_) => {
                (U256::from(self.slots.len()),).abi_encode_params()
            }
            IProxyControllerCalls::proxyName(call) => {
                (slot(call.id)?.name.clone(),).abi_encode_params()
            }
            _ => {
                return Err(ChainError::Rejected(
                    "execution reverted: not a view function".to_string(),
                ))
            }
        };

        Ok(encoded.into())
    }
}

#[async_trait]
impl ChainClient for MockChain {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, ChainError> {
        let mut state = self.state();
        if let Some(reason) = state.faults.reject_next_send.take() {
            return Err(ChainError::Rejected(reason));
        }

        let nonce = state.nonce;
        state.nonce += 1;
        state.block += 1;
        state.sent.push(tx.clone());

        let tx_hash = keccak256(nonce.to_be_bytes());
        let outcome = state.execute(self.sender, self.registry, &tx, nonce);
        let receipt = TxReceipt {
            tx_hash,
            success: outcome.is_ok(),
            contract_address: outcome.ok().flatten(),
            block_number: Some(state.block),
            gas_used: MOCK_GAS_USED,
        };
        state.receipts.insert(tx_hash, receipt);

        Ok(tx_hash)
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let state = self.state();
        if to == self.registry {
            return state.call_registry(self.registry, &data);
        }

        if data.starts_with(&implCall::SELECTOR) {
            if let Some(slot) = state.slots.iter().find(|slot| slot.proxy == to) {
                return Ok((slot.delegate,).abi_encode_params().into());
            }
        }
        if data.starts_with(&IOwnable::ownerCall::SELECTOR) {
            if let Some(owner) = state.owners.get(&to) {
                return Ok((*owner,).abi_encode_params().into());
            }
        }

        Err(ChainError::Rejected("execution reverted".to_string()))
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        Ok(self
            .state()
            .balances
            .get(&address)
            .copied()
            .unwrap_or_default())
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<TxReceipt, ChainError> {
        let withhold = self.state().faults.withhold_receipts;
        if withhold {
            tokio::time::sleep(timeout).await;
            return Err(ChainError::Timeout { tx_hash });
        }

        self.state()
            .receipts
            .get(&tx_hash)
            .cloned()
            .ok_or_else(|| ChainError::Transport(format!("unknown transaction {tx_hash:#x}")))
    }
}
