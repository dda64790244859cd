//! Scripts for deploying implementations and upgrading proxies through an
//! on-chain proxy registry.

#![deny(missing_docs)]
#![deny(clippy::missing_docs_in_private_items)]

pub mod cli;
pub mod client;
pub mod commands;
pub mod config;
pub mod constants;
pub mod deployments;
pub mod errors;
#[cfg(any(test, feature = "test-helpers"))]
pub mod mock;
pub mod orchestrator;
pub mod prompt;
pub mod registry;
mod solidity;
pub mod types;
pub mod utils;
pub mod workflow;
