//! Network configuration and the explicit descriptor the orchestrator is built from

use std::{collections::BTreeMap, fs, path::Path, str::FromStr, time::Duration};

use alloy::signers::local::PrivateKeySigner;
use alloy_primitives::Address;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    constants::{
        DEFAULT_CONFIRMATION_TIMEOUT_SECS, DEFAULT_DEVNET_RPC_URL, DEFAULT_NETWORK,
        DEFAULT_POLL_INTERVAL_MS,
    },
    errors::ScriptError,
};

/// One entry of the networks file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// The network name, filled in from the file key
    #[serde(skip)]
    pub name: String,
    /// The RPC endpoint of a node on this network
    pub rpc_url: String,
    /// The expected chain id, checked against the node when present
    #[serde(default)]
    pub chain_id: Option<u64>,
    /// The address of the proxy registry on this network
    #[serde(default)]
    pub registry: Option<Address>,
    /// The address administration is handed to once configuration completes
    #[serde(default)]
    pub dao: Option<Address>,
}

impl NetworkConfig {
    /// The fallback used for the local devnet when no file entry exists
    pub fn devnet() -> Self {
        Self {
            name: DEFAULT_NETWORK.to_string(),
            rpc_url: DEFAULT_DEVNET_RPC_URL.to_string(),
            chain_id: None,
            registry: None,
            dao: None,
        }
    }
}

/// The parsed networks file, keyed by network name
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct NetworksFile(BTreeMap<String, NetworkConfig>);

impl NetworksFile {
    /// Parse a networks file from its JSON contents
    pub fn parse(contents: &str) -> Result<Self, ScriptError> {
        let mut file: NetworksFile =
            serde_json::from_str(contents).map_err(|e| ScriptError::Config(e.to_string()))?;
        for (name, network) in file.0.iter_mut() {
            network.name = name.clone();
        }
        Ok(file)
    }

    /// Read a networks file, treating a missing file as empty
    pub fn load(path: &Path) -> Result<Self, ScriptError> {
        if !path.exists() {
            debug!("no networks file at {}", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScriptError::Config(format!("{}: {}", path.display(), e)))?;
        Self::parse(&contents)
    }

    /// Select a network by name.
    ///
    /// The local devnet is always available, other networks must be listed.
    pub fn network(&self, name: &str) -> Result<NetworkConfig, ScriptError> {
        match self.0.get(name) {
            Some(network) => Ok(network.clone()),
            None if name == DEFAULT_NETWORK => Ok(NetworkConfig::devnet()),
            None => Err(ScriptError::Config(format!(
                "unknown network {}, configured networks: [{}]",
                name,
                self.0.keys().join(", ")
            ))),
        }
    }
}

/// Values given on the command line or in the environment, overriding the networks file
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// The RPC endpoint
    pub rpc_url: Option<String>,
    /// The proxy registry address
    pub registry: Option<String>,
    /// The confirmation timeout, in seconds
    pub confirmation_timeout_secs: Option<u64>,
}

/// Everything the orchestrator needs, resolved once at startup
pub struct DeploymentConfig {
    /// The selected network
    pub network: NetworkConfig,
    /// The identity authorizing every transaction
    pub signer: PrivateKeySigner,
    /// The address of the proxy registry
    pub registry_address: Address,
    /// How long to wait for each transaction to be confirmed
    pub confirmation_timeout: Duration,
    /// How often to poll for receipts while waiting
    pub poll_interval: Duration,
}

impl DeploymentConfig {
    /// Resolve the configuration from the selected network, a private key, and overrides
    pub fn resolve(
        mut network: NetworkConfig,
        priv_key: &str,
        overrides: ConfigOverrides,
    ) -> Result<Self, ScriptError> {
        let signer = PrivateKeySigner::from_str(priv_key)
            .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;

        if let Some(rpc_url) = overrides.rpc_url {
            network.rpc_url = rpc_url;
        }

        let registry_address = match overrides.registry {
            Some(registry) => Address::from_str(&registry)
                .map_err(|e| ScriptError::Config(format!("registry {}: {}", registry, e)))?,
            None => network.registry.ok_or_else(|| {
                ScriptError::Config(format!(
                    "no registry address for network {}, pass --registry",
                    network.name
                ))
            })?,
        };
        if registry_address.is_zero() {
            return Err(ScriptError::Config(
                "registry address must not be zero".to_string(),
            ));
        }

        let timeout_secs = overrides
            .confirmation_timeout_secs
            .unwrap_or(DEFAULT_CONFIRMATION_TIMEOUT_SECS);

        Ok(Self {
            network,
            signer,
            registry_address,
            confirmation_timeout: Duration::from_secs(timeout_secs),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        })
    }

    /// The part of the configuration the orchestrator itself consumes
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            registry_address: self.registry_address,
            confirmation_timeout: self.confirmation_timeout,
        }
    }
}

/// The orchestrator's own settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// The address of the proxy registry
    pub registry_address: Address,
    /// How long to wait for each transaction to be confirmed
    pub confirmation_timeout: Duration,
}

impl OrchestratorConfig {
    /// Settings with the default confirmation timeout
    pub fn new(registry_address: Address) -> Self {
        Self {
            registry_address,
            confirmation_timeout: Duration::from_secs(DEFAULT_CONFIRMATION_TIMEOUT_SECS),
        }
    }
}
