//! Constants used in the upgrade scripts

/// The default number of seconds to wait for a transaction to be confirmed
pub const DEFAULT_CONFIRMATION_TIMEOUT_SECS: u64 = 300;

/// The default interval, in milliseconds, between receipt polls
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

/// The default network to operate on
pub const DEFAULT_NETWORK: &str = "localhost";

/// The default path of the networks configuration file
pub const DEFAULT_NETWORKS_FILE: &str = "networks.json";

/// The default path of the deployments file
pub const DEFAULT_DEPLOYMENTS_PATH: &str = "deployments.json";

/// The default RPC URL, used for the `localhost` network when no file entry exists
pub const DEFAULT_DEVNET_RPC_URL: &str = "http://localhost:8545";

/// The env filter applied when `RUST_LOG` is unset
pub const DEFAULT_LOG_FILTER: &str = "info";

/// The env filter applied when `RUST_LOG` is unset and `--verbose` is given
pub const VERBOSE_LOG_FILTER: &str = "debug";

/// The deployments key in the `deployments.json` file
pub const DEPLOYMENTS_KEY: &str = "deployments";

/// The key under which registered slots are recorded in the `deployments.json` file
pub const SLOTS_KEY: &str = "slots";

/// The key suffix for implementation contracts in the `deployments.json` file
pub const IMPLEMENTATION_KEY_SUFFIX: &str = "_implementation";

/// The alias naming the configured proxy registry
pub const REGISTRY_ALIAS: &str = "registry";

/// The `new_owner` alias resolving to the network's configured DAO address
pub const DAO_ALIAS: &str = "dao";

/// The prefix marking a reference to an earlier workflow output
pub const WORKFLOW_REF_PREFIX: char = '$';

/// The JSON key of the ABI in a compilation artifact
pub const ARTIFACT_ABI_KEY: &str = "abi";

/// The JSON key of the creation bytecode in a compilation artifact
pub const ARTIFACT_BYTECODE_KEY: &str = "bytecode";

/// The JSON key nesting the bytecode hex in Foundry artifacts
pub const ARTIFACT_BYTECODE_OBJECT_KEY: &str = "object";

/// The JSON key of the contract name in Hardhat artifacts
pub const ARTIFACT_CONTRACT_NAME_KEY: &str = "contractName";
