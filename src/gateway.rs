//! The wallet/contract boundary.
//!
//! Everything behind [`ChainGateway`] is owned by the wallet provider and the
//! deployed contract; the rest of the crate only sequences these calls.

use crate::abi::ReceiptLog;
use alloy_primitives::{
    Address,
    B256,
    U256,
};
use serde::{
    Deserialize,
    Serialize,
};
use tokio::sync::watch;

pub type TxHash = B256;

pub const DEFAULT_CHAIN_ID: u64 = 0x188;
pub const DEFAULT_CHAIN_NAME: &str = "Nexus Testnet";
pub const DEFAULT_RPC_URL: &str = "https://rpc.nexus.xyz/http";
pub const DEFAULT_EXPLORER_URL: &str = "https://explorer.nexus.xyz";
pub const DEFAULT_CURRENCY: &str = "NEXUS";

/// Parameters handed to the wallet when it has to add the network.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainParams {
    pub chain_id: u64,
    pub chain_name: String,
    pub rpc_url: String,
    pub explorer_url: String,
    pub currency_name: String,
    pub currency_symbol: String,
    pub decimals: u8,
}

impl Default for ChainParams {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            chain_name: DEFAULT_CHAIN_NAME.to_string(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            explorer_url: DEFAULT_EXPLORER_URL.to_string(),
            currency_name: DEFAULT_CURRENCY.to_string(),
            currency_symbol: DEFAULT_CURRENCY.to_string(),
            decimals: crate::format::DECIMALS,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub success: bool,
    pub logs: Vec<ReceiptLog>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WithdrawRequest {
    Amount(U256),
    All,
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum GatewayError {
    #[error("no wallet available")]
    Unavailable,
    #[error("request rejected by user")]
    UserRejected,
    #[error("chain {0:#x} is not known to the wallet")]
    UnrecognizedChain(u64),
    #[error("execution reverted: {0}")]
    Reverted(String),
    #[error("unknown transaction {0}")]
    UnknownTransaction(TxHash),
    #[error("rpc error: {0}")]
    Rpc(String),
}

pub trait ChainGateway {
    /// Accounts the wallet has already authorized, without prompting.
    fn existing_accounts(&self) -> impl Future<Output = Result<Vec<Address>, GatewayError>>;

    /// Prompts the user to authorize an account.
    fn request_accounts(&self) -> impl Future<Output = Result<Vec<Address>, GatewayError>>;

    fn chain_id(&self) -> impl Future<Output = Result<u64, GatewayError>>;

    /// Fails with [`GatewayError::UnrecognizedChain`] when the wallet has
    /// never seen the chain and it has to be added first.
    fn switch_chain(&self, chain_id: u64) -> impl Future<Output = Result<(), GatewayError>>;

    fn add_chain(&self, params: &ChainParams) -> impl Future<Output = Result<(), GatewayError>>;

    fn native_balance(&self, account: Address) -> impl Future<Output = Result<U256, GatewayError>>;

    /// `getBalance()` on the game contract.
    fn contract_balance(&self) -> impl Future<Output = Result<U256, GatewayError>>;

    /// `owner()` on the game contract.
    fn contract_owner(&self) -> impl Future<Output = Result<Address, GatewayError>>;

    /// `flip()` with `value` attached. Resolves once the transaction has an id.
    fn submit_flip(
        &self,
        from: Address,
        value: U256,
    ) -> impl Future<Output = Result<TxHash, GatewayError>>;

    /// `withdraw(amount)` or `withdrawAll()`.
    fn submit_withdraw(
        &self,
        from: Address,
        request: WithdrawRequest,
    ) -> impl Future<Output = Result<TxHash, GatewayError>>;

    fn wait_for_receipt(&self, tx: TxHash) -> impl Future<Output = Result<Receipt, GatewayError>>;

    /// Passive notification of the wallet's active chain.
    fn chain_changes(&self) -> watch::Receiver<u64>;
}
