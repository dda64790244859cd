//! Typed access to the on-chain proxy registry

use std::sync::Arc;

use alloy_primitives::{Address, Bytes, U256};
use alloy_sol_types::SolCall;
use tracing::trace;

use crate::{
    client::ChainClient,
    errors::ScriptError,
    solidity::{implCall, IOwnable, IProxyController},
    types::{AdminTarget, ImplementationAddress, ProxySlot, RegisteredSlot},
};

/// The proxy registry, read and encoded through a [`ChainClient`].
///
/// Only reads go through this type directly; calldata for mutating calls is
/// built here and submitted by the orchestrator, which owns the confirmation
/// and error-mapping policy.
pub struct ProxyRegistry<C> {
    /// The registry's address
    address: Address,
    /// The client used for reads
    client: Arc<C>,
}

impl<C: ChainClient> ProxyRegistry<C> {
    /// Bind to the registry at `address`
    pub fn new(address: Address, client: Arc<C>) -> Self {
        Self { address, client }
    }

    /// The registry's address
    pub fn address(&self) -> Address {
        self.address
    }

    /// The address of `target`
    pub fn target_address(&self, target: AdminTarget) -> Address {
        match target {
            AdminTarget::Registry => self.address,
            AdminTarget::Contract(address) => address,
        }
    }

    // ---------
    // | Reads |
    // ---------

    /// The number of slots in the registry
    pub async fn slot_count(&self) -> Result<u64, ScriptError> {
        let count = self
            .read(self.address, IProxyController::proxyCountCall {})
            .await?;
        u64::try_from(count).map_err(|e| ScriptError::ContractInteraction(e.to_string()))
    }

    /// The name slot `id` was registered under
    pub async fn slot_name(&self, id: u64) -> Result<String, ScriptError> {
        self.read(
            self.address,
            IProxyController::proxyNameCall { id: U256::from(id) },
        )
        .await
    }

    /// Every slot in the registry, in id order
    pub async fn slots(&self) -> Result<Vec<RegisteredSlot>, ScriptError> {
        let count = self.slot_count().await?;
        let mut slots = Vec::with_capacity(count as usize);
        for id in 0..count {
            let name = self.slot_name(id).await?;
            slots.push(RegisteredSlot { id, name });
        }

        Ok(slots)
    }

    /// The slot registered under `name`, if any
    pub async fn find_by_name(&self, name: &str) -> Result<Option<RegisteredSlot>, ScriptError> {
        Ok(self
            .slots()
            .await?
            .into_iter()
            .find(|slot| slot.name == name))
    }

    /// Resolve a slot key to the registry entry it names
    pub async fn resolve(&self, slot: &ProxySlot) -> Result<RegisteredSlot, ScriptError> {
        match slot {
            ProxySlot::Id(id) => {
                let count = self.slot_count().await?;
                if *id >= count {
                    return Err(ScriptError::InvalidArguments(format!(
                        "slot #{} does not exist, registry has {} slots",
                        id, count
                    )));
                }
                let name = self.slot_name(*id).await?;
                Ok(RegisteredSlot { id: *id, name })
            }
            ProxySlot::Name(name) => self.find_by_name(name).await?.ok_or_else(|| {
                ScriptError::InvalidArguments(format!("no slot named {} in registry", name))
            }),
        }
    }

    /// The implementation slot `id` currently delegates to
    pub async fn implementation(&self, id: u64) -> Result<ImplementationAddress, ScriptError> {
        self.read(
            self.address,
            IProxyController::fetchImplAddressCall { id: U256::from(id) },
        )
        .await
        .map(ImplementationAddress)
    }

    /// The address of the proxy behind slot `id`
    pub async fn proxy_address(&self, id: u64) -> Result<Address, ScriptError> {
        self.read(
            self.address,
            IProxyController::fetchProxyAddressCall { id: U256::from(id) },
        )
        .await
    }

    /// The implementation a proxy reports delegating to
    pub async fn proxy_implementation(
        &self,
        proxy: Address,
    ) -> Result<ImplementationAddress, ScriptError> {
        self.read(proxy, implCall {})
            .await
            .map(ImplementationAddress)
    }

    /// The current owner of `target`
    pub async fn owner_of(&self, target: AdminTarget) -> Result<Address, ScriptError> {
        self.read(self.target_address(target), IOwnable::ownerCall {})
            .await
    }

    // ------------
    // | Calldata |
    // ------------

    /// Calldata pointing slot `id` at `implementation`
    pub fn upgrade_calldata(&self, id: u64, implementation: ImplementationAddress) -> Bytes {
        IProxyController::upgradeProxyToCall {
            id: U256::from(id),
            newImpl: implementation.address(),
        }
        .abi_encode()
        .into()
    }

    /// Calldata registering a new slot named `name`
    pub fn add_proxy_calldata(&self, name: &str, implementation: ImplementationAddress) -> Bytes {
        IProxyController::addProxyCall {
            name: name.to_string(),
            proxy: implementation.address(),
        }
        .abi_encode()
        .into()
    }

    /// Calldata handing ownership of any ownable contract to `new_owner`
    pub fn transfer_ownership_calldata(&self, new_owner: Address) -> Bytes {
        IOwnable::transferOwnershipCall {
            newOwner: new_owner,
        }
        .abi_encode()
        .into()
    }

    /// Execute a view call and decode its return value
    async fn read<T: SolCall>(&self, to: Address, call: T) -> Result<T::Return, ScriptError> {
        trace!("reading {} from {to:#x}", T::SIGNATURE);
        let data = self
            .client
            .call(to, call.abi_encode().into())
            .await
            .map_err(|e| ScriptError::ContractInteraction(format!("{}: {}", T::SIGNATURE, e)))?;

        T::abi_decode_returns(&data)
            .map_err(|e| ScriptError::ContractInteraction(format!("{}: {}", T::SIGNATURE, e)))
    }
}
