//! Utilities for recording deployed addresses in a JSON file, keyed by network
//!
//! The file has the shape
//! `{ "<network>": { "deployments": { "<key>": "0x.." }, "slots": { "<name>": <id> } } }`

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use alloy_primitives::Address;
use serde_json::{json, Map, Value};

use crate::{
    constants::{DEPLOYMENTS_KEY, IMPLEMENTATION_KEY_SUFFIX, SLOTS_KEY},
    errors::ScriptError,
    types::{ImplementationAddress, RegisteredSlot},
};

/// The deployments file key for a contract's implementation
pub fn implementation_key(contract_name: &str) -> String {
    format!("{contract_name}{IMPLEMENTATION_KEY_SUFFIX}")
}

/// Read the deployments file, treating a missing file as empty
fn read_file(path: &Path) -> Result<Value, ScriptError> {
    if !path.exists() {
        return Ok(Value::Object(Map::new()));
    }

    let contents = fs::read_to_string(path)
        .map_err(|e| ScriptError::ReadDeployments(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&contents).map_err(|e| ScriptError::ReadDeployments(e.to_string()))
}

/// Write `value` at `network.section.key`, creating the file if it doesn't exist
fn write_entry(
    path: &Path,
    network: &str,
    section: &str,
    key: &str,
    value: Value,
) -> Result<(), ScriptError> {
    let mut parsed = read_file(path)?;
    let root = parsed.as_object_mut().ok_or_else(|| {
        ScriptError::WriteDeployments("deployments file is not a JSON object".to_string())
    })?;

    let network_entry = root.entry(network).or_insert_with(|| json!({}));
    let section_entry = network_entry
        .as_object_mut()
        .ok_or_else(|| ScriptError::WriteDeployments(format!("{} is not an object", network)))?
        .entry(section)
        .or_insert_with(|| json!({}));
    section_entry
        .as_object_mut()
        .ok_or_else(|| {
            ScriptError::WriteDeployments(format!("{}.{} is not an object", network, section))
        })?
        .insert(key.to_string(), value);

    let contents = serde_json::to_string_pretty(&parsed)
        .map_err(|e| ScriptError::WriteDeployments(e.to_string()))?;
    fs::write(path, contents).map_err(|e| ScriptError::WriteDeployments(e.to_string()))
}

/// Record a deployed contract address
pub fn write_deployed_address(
    path: &Path,
    network: &str,
    contract_key: &str,
    address: Address,
) -> Result<(), ScriptError> {
    write_entry(
        path,
        network,
        DEPLOYMENTS_KEY,
        contract_key,
        Value::String(format!("{address:#x}")),
    )
}

/// Record the id a slot was registered under
pub fn write_slot(path: &Path, network: &str, name: &str, id: u64) -> Result<(), ScriptError> {
    write_entry(path, network, SLOTS_KEY, name, Value::from(id))
}

/// Read a recorded contract address
pub fn read_deployed_address(
    path: &Path,
    network: &str,
    contract_key: &str,
) -> Result<Address, ScriptError> {
    let parsed = read_file(path)?;
    let addr_str = parsed[network][DEPLOYMENTS_KEY][contract_key]
        .as_str()
        .ok_or_else(|| {
            ScriptError::ReadDeployments(format!(
                "no {} address recorded for network {}",
                contract_key, network
            ))
        })?;

    Address::from_str(addr_str).map_err(|e| ScriptError::ReadDeployments(e.to_string()))
}

/// The deployments file entries of one network
#[derive(Debug, Clone)]
pub struct DeploymentsRecord {
    /// The deployments file
    path: PathBuf,
    /// The network entries are recorded under
    network: String,
}

impl DeploymentsRecord {
    /// Record under `network` in the file at `path`
    pub fn new(path: impl Into<PathBuf>, network: &str) -> Self {
        Self {
            path: path.into(),
            network: network.to_string(),
        }
    }

    /// Record a deployed implementation of `contract_name`
    pub fn record_implementation(
        &self,
        contract_name: &str,
        implementation: ImplementationAddress,
    ) -> Result<(), ScriptError> {
        write_deployed_address(
            &self.path,
            &self.network,
            &implementation_key(contract_name),
            implementation.address(),
        )
    }

    /// Record a registered slot
    pub fn record_slot(&self, slot: &RegisteredSlot) -> Result<(), ScriptError> {
        write_slot(&self.path, &self.network, &slot.name, slot.id)
    }

    /// The last recorded implementation of `contract_name`
    pub fn implementation(&self, contract_name: &str) -> Result<ImplementationAddress, ScriptError> {
        read_deployed_address(&self.path, &self.network, &implementation_key(contract_name))
            .map(ImplementationAddress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.json");
        let staking = Address::repeat_byte(0x01);
        let zap = Address::repeat_byte(0x02);

        write_deployed_address(&path, "sepolia", "staking_implementation", staking).unwrap();
        write_deployed_address(&path, "sepolia", "zap_implementation", zap).unwrap();
        write_deployed_address(&path, "mainnet", "zap_implementation", staking).unwrap();
        write_slot(&path, "sepolia", "staking", 4).unwrap();

        assert_eq!(
            read_deployed_address(&path, "sepolia", "staking_implementation").unwrap(),
            staking
        );
        assert_eq!(
            read_deployed_address(&path, "sepolia", "zap_implementation").unwrap(),
            zap
        );
        assert_eq!(
            read_deployed_address(&path, "mainnet", "zap_implementation").unwrap(),
            staking
        );

        let parsed: Value = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["sepolia"][SLOTS_KEY]["staking"], 4);
    }

    #[test]
    fn test_overwrite_keeps_latest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.json");

        write_deployed_address(&path, "sepolia", "vault", Address::repeat_byte(0x01)).unwrap();
        write_deployed_address(&path, "sepolia", "vault", Address::repeat_byte(0x02)).unwrap();

        assert_eq!(
            read_deployed_address(&path, "sepolia", "vault").unwrap(),
            Address::repeat_byte(0x02)
        );
    }

    #[test]
    fn test_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = DeploymentsRecord::new(dir.path().join("deployments.json"), "sepolia");
        let implementation = ImplementationAddress(Address::repeat_byte(0x07));

        record
            .record_implementation("StakingModule", implementation)
            .unwrap();
        record
            .record_slot(&RegisteredSlot {
                id: 2,
                name: "staking".to_string(),
            })
            .unwrap();

        assert_eq!(record.implementation("StakingModule").unwrap(), implementation);
        assert_eq!(
            read_deployed_address(record.path.as_path(), "sepolia", "StakingModule_implementation")
                .unwrap(),
            implementation.address()
        );
        assert!(DeploymentsRecord::new(record.path.clone(), "mainnet")
            .implementation("StakingModule")
            .is_err());
    }

    #[test]
    fn test_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("deployments.json");

        let res = read_deployed_address(&path, "sepolia", "vault");
        assert!(matches!(res, Err(ScriptError::ReadDeployments(_))));
    }
}
