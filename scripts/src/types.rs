//! Type definitions used throughout the scripts

use std::{
    fmt::{self, Display},
    path::PathBuf,
    str::FromStr,
};

use alloy::json_abi::JsonAbi;
use alloy_primitives::{Address, Bytes, TxHash};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{constants::REGISTRY_ALIAS, errors::ScriptError};

/// The address of a deployed implementation contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImplementationAddress(pub Address);

impl ImplementationAddress {
    /// Whether this is the zero address
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// The underlying address
    pub fn address(&self) -> Address {
        self.0
    }
}

impl From<Address> for ImplementationAddress {
    fn from(address: Address) -> Self {
        Self(address)
    }
}

impl Display for ImplementationAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// A key identifying one proxy in the registry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ProxySlot {
    /// The registry's numeric id for the proxy
    Id(u64),
    /// The human-readable name the proxy was registered under
    Name(String),
}

impl FromStr for ProxySlot {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ScriptError::InvalidArguments(
                "slot must not be empty".to_string(),
            ));
        }

        Ok(match s.parse::<u64>() {
            Ok(id) => ProxySlot::Id(id),
            Err(_) => ProxySlot::Name(s.to_string()),
        })
    }
}

impl ProxySlot {
    /// Check that `name` can be registered as a new slot and later read back
    /// by name rather than as an id
    pub fn check_new_name(name: &str) -> Result<(), ScriptError> {
        if name.trim().is_empty() {
            return Err(ScriptError::InvalidArguments(
                "slot name must not be empty".to_string(),
            ));
        }
        if name.trim().parse::<u64>().is_ok() {
            return Err(ScriptError::InvalidArguments(format!(
                "slot name {} would be read as a slot id",
                name
            )));
        }

        Ok(())
    }
}

impl Display for ProxySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxySlot::Id(id) => write!(f, "#{}", id),
            ProxySlot::Name(name) => write!(f, "{}", name),
        }
    }
}

/// A slot as it exists in the registry, with its id resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisteredSlot {
    /// The registry's numeric id
    pub id: u64,
    /// The name the slot was registered under
    pub name: String,
}

impl Display for RegisteredSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", self.name, self.id)
    }
}

/// A single upgrade of one slot to an already-deployed implementation.
///
/// Taken by value when submitted, so a plan cannot be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradePlan {
    /// The slot to upgrade
    pub slot: ProxySlot,
    /// The implementation the slot should delegate to afterwards
    pub new_implementation: ImplementationAddress,
    /// The constructor arguments the implementation was deployed with
    pub constructor_args: Vec<String>,
    /// An optional gas ceiling for the upgrade transaction
    pub gas_limit: Option<u64>,
}

impl UpgradePlan {
    /// Create a plan with no recorded constructor arguments and no gas limit
    pub fn new(slot: ProxySlot, new_implementation: ImplementationAddress) -> Self {
        Self {
            slot,
            new_implementation,
            constructor_args: Vec::new(),
            gas_limit: None,
        }
    }

    /// Cap the upgrade transaction's gas
    pub fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// The contract whose administration is being transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdminTarget {
    /// The proxy registry itself
    Registry,
    /// An individual ownable contract
    Contract(Address),
}

impl FromStr for AdminTarget {
    type Err = ScriptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(REGISTRY_ALIAS) {
            return Ok(AdminTarget::Registry);
        }

        Address::from_str(s)
            .map(AdminTarget::Contract)
            .map_err(|e| ScriptError::InvalidArguments(format!("target {}: {}", s, e)))
    }
}

impl Display for AdminTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdminTarget::Registry => write!(f, "{REGISTRY_ALIAS}"),
            AdminTarget::Contract(address) => write!(f, "{:#x}", address),
        }
    }
}

/// A compiled contract, as read from a Hardhat or Foundry artifact
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    /// The contract name
    pub name: String,
    /// The contract ABI
    pub abi: JsonAbi,
    /// The creation bytecode, without constructor arguments
    pub bytecode: Bytes,
    /// Where the artifact was loaded from, if anywhere
    pub source: Option<PathBuf>,
}

/// The outcome of a confirmed transaction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    /// The transaction hash
    pub tx_hash: TxHash,
    /// Whether the transaction executed without reverting
    pub success: bool,
    /// The address of the created contract, for creation transactions
    pub contract_address: Option<Address>,
    /// The block the transaction was included in
    pub block_number: Option<u64>,
    /// The gas consumed by the transaction
    pub gas_used: u64,
}

/// The progress of a deploy-then-upgrade operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradeState {
    /// Constructed, nothing submitted
    Planned,
    /// The implementation deployment has been submitted
    Deploying,
    /// The implementation is deployed and confirmed
    Deployed,
    /// The upgrade transaction has been submitted
    Upgrading,
    /// The slot now delegates to the new implementation
    Upgraded,
    /// The operation failed, see the returned error
    Rejected,
}

impl UpgradeState {
    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, UpgradeState::Upgraded | UpgradeState::Rejected)
    }

    /// Whether `next` may follow this state
    pub fn can_transition_to(&self, next: UpgradeState) -> bool {
        use UpgradeState::*;
        matches!(
            (self, next),
            (Planned, Deploying)
                | (Deploying, Deployed)
                | (Deployed, Upgrading)
                | (Upgrading, Upgraded)
                | (Planned | Deploying | Deployed | Upgrading, Rejected)
        )
    }
}

impl Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            UpgradeState::Planned => "planned",
            UpgradeState::Deploying => "deploying",
            UpgradeState::Deployed => "deployed",
            UpgradeState::Upgrading => "upgrading",
            UpgradeState::Upgraded => "upgraded",
            UpgradeState::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

/// A deploy-then-upgrade of one slot, tracking its progress.
///
/// The caller keeps the operation after execution, so the deployed
/// implementation stays available even if the upgrade step fails.
#[derive(Debug, Clone)]
pub struct UpgradeOperation {
    /// The slot to upgrade
    pub slot: ProxySlot,
    /// The implementation to deploy
    pub artifact: ContractArtifact,
    /// The constructor arguments, coerced against the artifact's ABI
    pub constructor_args: Vec<String>,
    /// An optional gas ceiling for the upgrade transaction
    pub gas_limit: Option<u64>,
    /// The current state
    pub(crate) state: UpgradeState,
    /// The implementation, once its deployment is confirmed
    pub(crate) deployed: Option<ImplementationAddress>,
}

impl UpgradeOperation {
    /// Plan a new operation
    pub fn new(
        slot: ProxySlot,
        artifact: ContractArtifact,
        constructor_args: Vec<String>,
        gas_limit: Option<u64>,
    ) -> Self {
        Self {
            slot,
            artifact,
            constructor_args,
            gas_limit,
            state: UpgradeState::Planned,
            deployed: None,
        }
    }

    /// The current state
    pub fn state(&self) -> UpgradeState {
        self.state
    }

    /// The deployed implementation, if deployment was confirmed
    pub fn deployed(&self) -> Option<ImplementationAddress> {
        self.deployed
    }

    /// Advance to `next`
    pub(crate) fn transition(&mut self, next: UpgradeState) {
        debug_assert!(
            self.state.can_transition_to(next),
            "invalid transition {} -> {}",
            self.state,
            next
        );
        debug!("{}: {} -> {}", self.slot, self.state, next);
        self.state = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_parsing() {
        assert_eq!("3".parse::<ProxySlot>().unwrap(), ProxySlot::Id(3));
        assert_eq!(
            " staking ".parse::<ProxySlot>().unwrap(),
            ProxySlot::Name("staking".to_string())
        );
        assert!(matches!(
            "".parse::<ProxySlot>(),
            Err(ScriptError::InvalidArguments(_))
        ));
    }

    #[test]
    fn test_new_slot_names() {
        ProxySlot::check_new_name("staking").unwrap();
        ProxySlot::check_new_name("zap2").unwrap();
        for name in ["", "  ", "12", " 7 "] {
            assert!(matches!(
                ProxySlot::check_new_name(name),
                Err(ScriptError::InvalidArguments(_))
            ));
        }
    }

    #[test]
    fn test_admin_target_parsing() {
        assert_eq!(
            "Registry".parse::<AdminTarget>().unwrap(),
            AdminTarget::Registry
        );
        let addr = Address::repeat_byte(0x11);
        assert_eq!(
            format!("{addr:#x}").parse::<AdminTarget>().unwrap(),
            AdminTarget::Contract(addr)
        );
        assert!("dao".parse::<AdminTarget>().is_err());
    }

    #[test]
    fn test_state_transitions() {
        use UpgradeState::*;
        assert!(Planned.can_transition_to(Deploying));
        assert!(Upgrading.can_transition_to(Upgraded));
        assert!(Deployed.can_transition_to(Rejected));
        assert!(!Planned.can_transition_to(Upgrading));
        assert!(!Upgraded.can_transition_to(Rejected));
        assert!(!Rejected.can_transition_to(Deploying));
        assert!(Upgraded.is_terminal() && Rejected.is_terminal());
        assert!(!Deployed.is_terminal());
    }
}
