//! Utilities for the upgrade scripts.

use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use alloy::{
    dyn_abi::{DynSolType, DynSolValue, JsonAbiExt, Specifier},
    json_abi::{Function, JsonAbi, Param},
};
use alloy_primitives::{utils::format_ether, Address, Bytes, U256};
use serde_json::Value;

use crate::{
    constants::{
        ARTIFACT_ABI_KEY, ARTIFACT_BYTECODE_KEY, ARTIFACT_BYTECODE_OBJECT_KEY,
        ARTIFACT_CONTRACT_NAME_KEY,
    },
    errors::ScriptError,
    types::ContractArtifact,
};

/// Parse a hex address given as an argument
pub fn parse_address(s: &str) -> Result<Address, ScriptError> {
    Address::from_str(s.trim())
        .map_err(|e| ScriptError::InvalidArguments(format!("address {}: {}", s, e)))
}

/// Format a wei amount as ether for display
pub fn display_balance(balance: U256) -> String {
    format!("{} ETH", format_ether(balance))
}

// -------------
// | Artifacts |
// -------------

/// Load a compiled contract from a Hardhat or Foundry artifact file
pub fn load_artifact(path: &Path) -> Result<ContractArtifact, ScriptError> {
    let contents = fs::read_to_string(path)
        .map_err(|e| ScriptError::ArtifactParsing(format!("{}: {}", path.display(), e)))?;

    let fallback_name = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or_default()
        .to_string();

    parse_artifact(&contents, &fallback_name, Some(path.to_path_buf()))
}

/// Parse a compiled contract from the contents of an artifact.
///
/// Hardhat artifacts carry the bytecode as a hex string and the name under
/// `contractName`; Foundry artifacts nest the hex under `bytecode.object`.
pub fn parse_artifact(
    contents: &str,
    fallback_name: &str,
    source: Option<PathBuf>,
) -> Result<ContractArtifact, ScriptError> {
    let json: Value =
        serde_json::from_str(contents).map_err(|e| ScriptError::ArtifactParsing(e.to_string()))?;

    let abi_json = json
        .get(ARTIFACT_ABI_KEY)
        .cloned()
        .ok_or_else(|| ScriptError::ArtifactParsing("artifact has no ABI".to_string()))?;
    let abi: JsonAbi =
        serde_json::from_value(abi_json).map_err(|e| ScriptError::ArtifactParsing(e.to_string()))?;

    let bytecode_hex = match json.get(ARTIFACT_BYTECODE_KEY) {
        Some(Value::String(hex)) => hex.as_str(),
        Some(Value::Object(obj)) => obj
            .get(ARTIFACT_BYTECODE_OBJECT_KEY)
            .and_then(Value::as_str)
            .unwrap_or_default(),
        _ => "",
    };
    let bytecode = hex::decode(bytecode_hex.trim_start_matches("0x"))
        .map_err(|e| ScriptError::ArtifactParsing(format!("bytecode: {}", e)))?;
    if bytecode.is_empty() {
        return Err(ScriptError::ArtifactParsing(
            "artifact has no creation bytecode, is it an interface or abstract contract?"
                .to_string(),
        ));
    }

    let name = json
        .get(ARTIFACT_CONTRACT_NAME_KEY)
        .and_then(Value::as_str)
        .unwrap_or(fallback_name)
        .to_string();

    Ok(ContractArtifact {
        name,
        abi,
        bytecode: bytecode.into(),
        source,
    })
}

// ------------
// | Calldata |
// ------------

/// Coerce a string argument to the Solidity type of `param`
fn coerce_arg(param: &Param, arg: &str) -> Result<DynSolValue, ScriptError> {
    let ty: DynSolType = param
        .resolve()
        .map_err(|e| ScriptError::InvalidArguments(format!("{}: {}", param.ty, e)))?;
    ty.coerce_str(arg).map_err(|e| {
        ScriptError::InvalidArguments(format!("{:?} is not a valid {}: {}", arg, param.ty, e))
    })
}

/// Coerce every argument against the declared inputs, failing on an arity mismatch
fn coerce_args(
    what: &str,
    inputs: &[Param],
    args: &[String],
) -> Result<Vec<DynSolValue>, ScriptError> {
    if inputs.len() != args.len() {
        return Err(ScriptError::InvalidArguments(format!(
            "{} takes {} arguments, got {}",
            what,
            inputs.len(),
            args.len()
        )));
    }

    inputs
        .iter()
        .zip(args)
        .map(|(param, arg)| coerce_arg(param, arg))
        .collect()
}

/// ABI-encode constructor arguments given as strings
pub fn encode_constructor_args(
    artifact: &ContractArtifact,
    args: &[String],
) -> Result<Bytes, ScriptError> {
    let inputs = artifact
        .abi
        .constructor()
        .map(|constructor| constructor.inputs.as_slice())
        .unwrap_or_default();
    let what = format!("constructor of {}", artifact.name);
    let values = coerce_args(&what, inputs, args)?;

    if values.is_empty() {
        return Ok(Bytes::new());
    }
    Ok(DynSolValue::Tuple(values).abi_encode_params().into())
}

/// The creation code for `artifact` with encoded constructor arguments appended
pub fn creation_code(artifact: &ContractArtifact, args: &[String]) -> Result<Bytes, ScriptError> {
    let encoded_args = encode_constructor_args(artifact, args)?;
    let mut code = artifact.bytecode.to_vec();
    code.extend_from_slice(&encoded_args);
    Ok(code.into())
}

/// Calldata for a call given by its signature, e.g. `setFeeExclusion(address,bool)`,
/// with arguments given as strings
pub fn encode_function_call(signature: &str, args: &[String]) -> Result<Bytes, ScriptError> {
    let function = Function::parse(signature)
        .map_err(|e| ScriptError::InvalidArguments(format!("signature {}: {}", signature, e)))?;
    let values = coerce_args(signature, &function.inputs, args)?;

    function
        .abi_encode_input(&values)
        .map(Into::into)
        .map_err(|e| ScriptError::InvalidArguments(format!("{}: {}", signature, e)))
}
