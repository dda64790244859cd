//! The chain client seam, and its implementation against a JSON-RPC node

use std::time::Duration;

use alloy::{
    network::{EthereumWallet, TransactionBuilder},
    providers::{DynProvider, Provider, ProviderBuilder},
    rpc::types::{TransactionReceipt, TransactionRequest},
    transports::{http::reqwest::Url, RpcError, TransportError},
};
use alloy_primitives::{Address, Bytes, TxHash, U256};
use async_trait::async_trait;
use tracing::{debug, trace};

use crate::{
    config::DeploymentConfig,
    errors::{ChainError, ScriptError},
    types::TxReceipt,
};

/// A transaction to be signed by the client's signer and submitted
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TxRequest {
    /// The recipient, or `None` for contract creation
    pub to: Option<Address>,
    /// The calldata, or creation code for contract creation
    pub data: Bytes,
    /// The value transferred with the transaction
    pub value: U256,
    /// An optional gas ceiling, estimated by the node when absent
    pub gas_limit: Option<u64>,
}

impl TxRequest {
    /// A call to `to` with the given calldata
    pub fn call(to: Address, data: impl Into<Bytes>) -> Self {
        Self {
            to: Some(to),
            data: data.into(),
            ..Default::default()
        }
    }

    /// A contract creation with the given creation code
    pub fn create(code: impl Into<Bytes>) -> Self {
        Self {
            to: None,
            data: code.into(),
            ..Default::default()
        }
    }

    /// Cap the transaction's gas
    pub fn with_gas_limit(mut self, gas_limit: Option<u64>) -> Self {
        self.gas_limit = gas_limit;
        self
    }
}

/// Sends transactions, reads contract state, and waits for confirmation.
///
/// Every transaction is signed by the single identity the client was built with.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// The address of the signer authorizing transactions
    fn sender(&self) -> Address;

    /// Submit a transaction, returning its hash once the node accepts it
    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, ChainError>;

    /// Execute a read-only call against the latest state
    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError>;

    /// Fetch the native balance of an address
    async fn get_balance(&self, address: Address) -> Result<U256, ChainError>;

    /// Wait until the transaction is included, or the timeout elapses
    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<TxReceipt, ChainError>;
}

/// A [`ChainClient`] backed by an HTTP JSON-RPC provider with a local signer
#[derive(Clone)]
pub struct AlloyChainClient {
    /// The signing provider
    provider: DynProvider,
    /// The signer's address
    sender: Address,
    /// How often to poll for a receipt
    poll_interval: Duration,
}

impl AlloyChainClient {
    /// Connect to the configured network, checking the node's chain id
    /// against the configured one when present
    pub async fn connect(config: &DeploymentConfig) -> Result<Self, ScriptError> {
        let url = Url::parse(&config.network.rpc_url)
            .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;
        let sender = config.signer.address();
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(config.signer.clone()))
            .connect_http(url);
        let provider = DynProvider::new(provider);

        let chain_id = provider
            .get_chain_id()
            .await
            .map_err(|e| ScriptError::ClientInitialization(e.to_string()))?;
        if let Some(expected) = config.network.chain_id {
            if expected != chain_id {
                return Err(ScriptError::ClientInitialization(format!(
                    "network {} expects chain id {}, node reports {}",
                    config.network.name, expected, chain_id
                )));
            }
        }
        debug!("connected to {} (chain id {chain_id})", config.network.name);

        Ok(Self {
            provider,
            sender,
            poll_interval: config.poll_interval,
        })
    }

    /// Poll for a receipt until one is available
    async fn poll_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, ChainError> {
        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {
                    trace!("no receipt yet for {tx_hash:#x}");
                    tokio::time::sleep(self.poll_interval).await;
                }
                Err(e) => return Err(ChainError::Transport(e.to_string())),
            }
        }
    }
}

/// Classify a transport error: error responses come from the node refusing
/// the request, everything else is a connectivity problem
fn classify(err: TransportError) -> ChainError {
    match err {
        RpcError::ErrorResp(payload) => ChainError::Rejected(payload.to_string()),
        err => ChainError::Transport(err.to_string()),
    }
}

#[async_trait]
impl ChainClient for AlloyChainClient {
    fn sender(&self) -> Address {
        self.sender
    }

    async fn send_transaction(&self, tx: TxRequest) -> Result<TxHash, ChainError> {
        let mut request = TransactionRequest::default()
            .with_from(self.sender)
            .with_value(tx.value);
        request = match tx.to {
            Some(to) => request.with_to(to).with_input(tx.data),
            None => request.with_deploy_code(tx.data),
        };
        if let Some(gas_limit) = tx.gas_limit {
            request = request.with_gas_limit(gas_limit);
        }

        let pending = self
            .provider
            .send_transaction(request)
            .await
            .map_err(classify)?;
        Ok(*pending.tx_hash())
    }

    async fn call(&self, to: Address, data: Bytes) -> Result<Bytes, ChainError> {
        let request = TransactionRequest::default()
            .with_from(self.sender)
            .with_to(to)
            .with_input(data);
        self.provider.call(request).await.map_err(classify)
    }

    async fn get_balance(&self, address: Address) -> Result<U256, ChainError> {
        self.provider.get_balance(address).await.map_err(classify)
    }

    async fn wait_for_confirmation(
        &self,
        tx_hash: TxHash,
        timeout: Duration,
    ) -> Result<TxReceipt, ChainError> {
        let receipt = tokio::time::timeout(timeout, self.poll_receipt(tx_hash))
            .await
            .map_err(|_| ChainError::Timeout { tx_hash })??;

        Ok(TxReceipt {
            tx_hash: receipt.transaction_hash,
            success: receipt.status(),
            contract_address: receipt.contract_address,
            block_number: receipt.block_number,
            gas_used: receipt.gas_used,
        })
    }
}
