//! Definitions of errors that can occur during the execution of the upgrade scripts

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    time::Duration,
};

use alloy_primitives::{Address, TxHash};

/// Errors surfaced by a [`ChainClient`](crate::client::ChainClient)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainError {
    /// The node refused the transaction or call (revert, out-of-gas, nonce conflict)
    Rejected(String),
    /// The node could not be reached or returned a malformed response
    Transport(String),
    /// No receipt was observed for the transaction before the deadline
    Timeout {
        /// The hash of the transaction that was not confirmed
        tx_hash: TxHash,
    },
}

impl Display for ChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ChainError::Rejected(s) => write!(f, "rejected by node: {}", s),
            ChainError::Transport(s) => write!(f, "transport error: {}", s),
            ChainError::Timeout { tx_hash } => {
                write!(f, "transaction {:#x} not confirmed in time", tx_hash)
            }
        }
    }
}

impl Error for ChainError {}

/// Errors that can occur during the execution of the upgrade scripts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Malformed input to an operation, detected before anything is submitted
    InvalidArguments(String),
    /// The node rejected a contract creation transaction
    DeploymentFailed(String),
    /// The slot already points at the requested implementation
    NoOpUpgrade {
        /// The slot that was targeted
        slot: String,
        /// The implementation the slot already delegates to
        implementation: Address,
    },
    /// The registry already has an entry under the given name
    DuplicateSlot(String),
    /// The registry reverted or did not apply the upgrade
    UpgradeRejected(String),
    /// The ownership transfer was not authorized or reverted
    TransferRejected(String),
    /// A configuration call reverted
    ConfigurationFailed(String),
    /// A submitted transaction was not confirmed before the deadline.
    ///
    /// The transaction may still be pending or be included later.
    ConfirmationTimeout {
        /// The hash of the unconfirmed transaction
        tx_hash: TxHash,
        /// The deadline that elapsed
        timeout: Duration,
    },
    /// The operation was cancelled before its next transaction was submitted
    Cancelled,
    /// Error reading contract state from the node
    ContractInteraction(String),
    /// Error initializing the RPC client
    ClientInitialization(String),
    /// Error resolving network configuration
    Config(String),
    /// Error parsing a Solidity compilation artifact
    ArtifactParsing(String),
    /// Error reading the `deployments.json` file
    ReadDeployments(String),
    /// Error writing the `deployments.json` file
    WriteDeployments(String),
    /// Error reading or parsing a workflow file
    Workflow(String),
    /// Error interacting with the operator on the console
    Prompt(String),
}

impl Display for ScriptError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::InvalidArguments(s) => write!(f, "invalid arguments: {}", s),
            ScriptError::DeploymentFailed(s) => write!(f, "deployment failed: {}", s),
            ScriptError::NoOpUpgrade {
                slot,
                implementation,
            } => write!(
                f,
                "slot {} already points at implementation {:#x}",
                slot, implementation
            ),
            ScriptError::DuplicateSlot(s) => write!(f, "registry already has a slot named {}", s),
            ScriptError::UpgradeRejected(s) => write!(f, "upgrade rejected: {}", s),
            ScriptError::TransferRejected(s) => write!(f, "ownership transfer rejected: {}", s),
            ScriptError::ConfigurationFailed(s) => write!(f, "configuration call failed: {}", s),
            ScriptError::ConfirmationTimeout { tx_hash, timeout } => write!(
                f,
                "transaction {:#x} not confirmed within {:?}, it may still be included",
                tx_hash, timeout
            ),
            ScriptError::Cancelled => write!(f, "operation cancelled before submission"),
            ScriptError::ContractInteraction(s) => {
                write!(f, "error interacting with contract: {}", s)
            }
            ScriptError::ClientInitialization(s) => write!(f, "error initializing client: {}", s),
            ScriptError::Config(s) => write!(f, "configuration error: {}", s),
            ScriptError::ArtifactParsing(s) => write!(f, "error parsing artifact: {}", s),
            ScriptError::ReadDeployments(s) => write!(f, "error reading deployments: {}", s),
            ScriptError::WriteDeployments(s) => write!(f, "error writing deployments: {}", s),
            ScriptError::Workflow(s) => write!(f, "error loading workflow: {}", s),
            ScriptError::Prompt(s) => write!(f, "error reading operator input: {}", s),
        }
    }
}

impl Error for ScriptError {}

impl ScriptError {
    /// Maps a chain error raised while submitting or confirming a transaction
    /// onto the taxonomy kind for the step in progress.
    ///
    /// Timeouts are never folded into the step's rejection kind, since the
    /// transaction may still be included.
    pub fn from_chain(err: ChainError, timeout: Duration, kind: fn(String) -> Self) -> Self {
        match err {
            ChainError::Timeout { tx_hash } => ScriptError::ConfirmationTimeout { tx_hash, timeout },
            ChainError::Rejected(s) => kind(s),
            ChainError::Transport(s) => kind(format!("transport error: {}", s)),
        }
    }
}
