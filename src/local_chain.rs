//! In-process wallet, network and coin-flip contract.
//!
//! Stands in for a browser wallet talking to a live node: it keeps account
//! and contract balances, resolves flips with a seedable RNG and returns
//! receipts whose logs are ABI-encoded exactly like a provider would return
//! them.

use crate::{
    abi::{
        AbiValue,
        FLIP_RESULT,
        RawLog,
        ReceiptLog,
        WITHDRAWN,
    },
    betting::{
        BASIS_POINTS,
        PayoutMultiplier,
    },
    format,
    gateway::{
        ChainGateway,
        ChainParams,
        GatewayError,
        Receipt,
        TxHash,
        WithdrawRequest,
    },
};
use alloy_primitives::{
    Address,
    Bytes,
    U256,
};
use rand::{
    Rng,
    SeedableRng,
    rngs::StdRng,
};
use std::{
    collections::{
        HashMap,
        HashSet,
        VecDeque,
    },
    sync::{
        Mutex,
        MutexGuard,
        PoisonError,
    },
    time::Duration,
};
use tokio::sync::watch;
use tracing::{
    debug,
    info,
};

pub const DEFAULT_PLAYER_FUNDS_UNITS: u64 = 250;
pub const DEFAULT_DEALER_FUNDS_UNITS: u64 = 400;

/// Which of the two provider log shapes receipts carry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogShape {
    #[default]
    Raw,
    Parsed,
}

#[derive(Clone, Debug)]
pub struct LocalChainConfig {
    pub target: ChainParams,
    pub contract: Address,
    pub owner: Address,
    pub player: Address,
    pub player_funds: U256,
    pub dealer_funds: U256,
    pub payout_multiplier: PayoutMultiplier,
    /// Chain the wallet is on when the session starts.
    pub start_chain_id: u64,
    pub wallet_knows_target: bool,
    pub approve_add_chain: bool,
    pub reject_connection: bool,
    /// Whether the player account is already authorized at startup.
    pub authorized: bool,
    pub log_shape: LogShape,
    pub latency: Duration,
    pub seed: u64,
}

impl Default for LocalChainConfig {
    fn default() -> Self {
        let target = ChainParams::default();
        let player = Address::repeat_byte(0x5a);
        Self {
            start_chain_id: target.chain_id,
            target,
            contract: Address::repeat_byte(0xc0),
            owner: player,
            player,
            player_funds: format::units(DEFAULT_PLAYER_FUNDS_UNITS),
            dealer_funds: format::units(DEFAULT_DEALER_FUNDS_UNITS),
            payout_multiplier: PayoutMultiplier::default(),
            wallet_knows_target: true,
            approve_add_chain: true,
            reject_connection: false,
            authorized: false,
            log_shape: LogShape::Raw,
            latency: Duration::ZERO,
            seed: 7,
        }
    }
}

/// Chain id the wallet hops to when asked to leave the game network.
pub const FOREIGN_CHAIN_ID: u64 = 1;

struct State {
    chain_id: u64,
    known_chains: HashSet<u64>,
    authorized: bool,
    balances: HashMap<Address, U256>,
    contract_balance: U256,
    receipts: HashMap<TxHash, Receipt>,
    rng: StdRng,
    forced_outcomes: VecDeque<bool>,
    fail_next_submission: Option<GatewayError>,
    corrupt_next_log: bool,
    owner_reads_fail: bool,
    calls: usize,
    call_log: Vec<&'static str>,
    submissions: usize,
}

pub struct LocalChain {
    config: LocalChainConfig,
    state: Mutex<State>,
    chain_tx: watch::Sender<u64>,
}

impl LocalChain {
    pub fn new(config: LocalChainConfig) -> Self {
        let mut known_chains = HashSet::from([FOREIGN_CHAIN_ID, config.start_chain_id]);
        if config.wallet_knows_target {
            known_chains.insert(config.target.chain_id);
        }
        let mut balances = HashMap::new();
        balances.insert(config.player, config.player_funds);
        let state = State {
            chain_id: config.start_chain_id,
            known_chains,
            authorized: config.authorized,
            balances,
            contract_balance: config.dealer_funds,
            receipts: HashMap::new(),
            rng: StdRng::seed_from_u64(config.seed),
            forced_outcomes: VecDeque::new(),
            fail_next_submission: None,
            corrupt_next_log: false,
            owner_reads_fail: false,
            calls: 0,
            call_log: Vec::new(),
            submissions: 0,
        };
        let (chain_tx, _) = watch::channel(config.start_chain_id);
        Self {
            config,
            state: Mutex::new(state),
            chain_tx,
        }
    }

    pub fn config(&self) -> &LocalChainConfig {
        &self.config
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Locks state and records the call as one gateway round trip.
    fn call(&self, name: &'static str) -> MutexGuard<'_, State> {
        let mut state = self.state();
        state.calls += 1;
        state.call_log.push(name);
        state
    }

    async fn round_trip(&self) {
        if !self.config.latency.is_zero() {
            tokio::time::sleep(self.config.latency).await;
        }
    }

    /// Total number of gateway calls served so far.
    pub fn call_count(&self) -> usize {
        self.state().calls
    }

    /// Names of the gateway calls served so far, oldest first.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.state().call_log.clone()
    }

    /// Number of transactions accepted for inclusion.
    pub fn submission_count(&self) -> usize {
        self.state().submissions
    }

    pub fn balance_of(&self, account: Address) -> U256 {
        self.state()
            .balances
            .get(&account)
            .copied()
            .unwrap_or_default()
    }

    pub fn dealer_balance(&self) -> U256 {
        self.state().contract_balance
    }

    pub fn force_next_outcome(&self, win: bool) {
        self.state().forced_outcomes.push_back(win);
    }

    pub fn fail_next_submission(&self, error: GatewayError) {
        self.state().fail_next_submission = Some(error);
    }

    /// The next receipt carries a log with no topics.
    pub fn corrupt_next_log(&self) {
        self.state().corrupt_next_log = true;
    }

    /// While set, `owner()` reads fail as they would against a flaky node.
    pub fn set_owner_reads_failing(&self, failing: bool) {
        self.state().owner_reads_fail = failing;
    }

    /// Wallet-side network change, as if the user picked another chain in
    /// their wallet.
    pub fn set_wallet_chain(&self, chain_id: u64) {
        {
            let mut state = self.state();
            state.known_chains.insert(chain_id);
            state.chain_id = chain_id;
        }
        info!(chain_id, "wallet switched chain");
        self.chain_tx.send_replace(chain_id);
    }

    pub fn wallet_chain(&self) -> u64 {
        self.state().chain_id
    }

    fn ensure_target_chain(&self, state: &State) -> Result<(), GatewayError> {
        if state.chain_id != self.config.target.chain_id {
            return Err(GatewayError::Rpc(format!(
                "contract {} is not deployed on chain {:#x}",
                self.config.contract, state.chain_id
            )));
        }
        Ok(())
    }

    fn ensure_authorized(&self, state: &State, from: Address) -> Result<(), GatewayError> {
        if !state.authorized || from != self.config.player {
            return Err(GatewayError::UserRejected);
        }
        Ok(())
    }

    fn next_tx_hash(state: &mut State) -> TxHash {
        TxHash::from(state.rng.random::<[u8; 32]>())
    }

    fn encode_log(
        &self,
        state: &mut State,
        schema: &'static crate::abi::EventSchema,
        args: &[AbiValue],
    ) -> Result<ReceiptLog, GatewayError> {
        if std::mem::take(&mut state.corrupt_next_log) {
            return Ok(ReceiptLog::Raw(RawLog {
                address: self.config.contract,
                topics: Vec::new(),
                data: Bytes::new(),
            }));
        }
        let log = match self.config.log_shape {
            LogShape::Raw => schema.raw_log(self.config.contract, args),
            LogShape::Parsed => schema.parsed_log(args),
        };
        log.map_err(|e| GatewayError::Rpc(e.to_string()))
    }

    fn resolve_flip(
        &self,
        state: &mut State,
        from: Address,
        value: U256,
    ) -> Result<Receipt, GatewayError> {
        if value.is_zero() {
            return Err(GatewayError::Reverted("bet must be positive".to_string()));
        }
        let funds = state.balances.get(&from).copied().unwrap_or_default();
        if funds < value {
            return Err(GatewayError::Rpc(
                "insufficient funds for gas * price + value".to_string(),
            ));
        }
        let bps = U256::from(self.config.payout_multiplier.basis_points());
        let payout_on_win = value * bps / U256::from(BASIS_POINTS);
        if payout_on_win > state.contract_balance + value {
            return Err(GatewayError::Reverted("bet exceeds dealer balance".to_string()));
        }

        let win = match state.forced_outcomes.pop_front() {
            Some(win) => win,
            None => state.rng.random_bool(0.5),
        };
        let payout = if win { payout_on_win } else { U256::ZERO };

        let player_balance = funds - value + payout;
        state.balances.insert(from, player_balance);
        state.contract_balance = state.contract_balance + value - payout;

        let log = self.encode_log(
            state,
            &FLIP_RESULT,
            &[
                AbiValue::Address(from),
                AbiValue::Bool(win),
                AbiValue::Uint(value),
                AbiValue::Uint(payout),
            ],
        )?;
        let tx_hash = Self::next_tx_hash(state);
        debug!(%tx_hash, win, %payout, "flip resolved");
        Ok(Receipt {
            tx_hash,
            success: true,
            logs: vec![log],
        })
    }

    fn resolve_withdraw(
        &self,
        state: &mut State,
        from: Address,
        request: WithdrawRequest,
    ) -> Result<Receipt, GatewayError> {
        if from != self.config.owner {
            return Err(GatewayError::Reverted("caller is not the owner".to_string()));
        }
        let amount = match request {
            WithdrawRequest::Amount(amount) => amount,
            WithdrawRequest::All => state.contract_balance,
        };
        if amount > state.contract_balance {
            return Err(GatewayError::Reverted(
                "insufficient contract balance".to_string(),
            ));
        }
        state.contract_balance -= amount;
        let owner_balance = state.balances.get(&from).copied().unwrap_or_default();
        state.balances.insert(from, owner_balance + amount);

        let log = self.encode_log(
            state,
            &WITHDRAWN,
            &[AbiValue::Address(from), AbiValue::Uint(amount)],
        )?;
        let tx_hash = Self::next_tx_hash(state);
        debug!(%tx_hash, %amount, "withdraw executed");
        Ok(Receipt {
            tx_hash,
            success: true,
            logs: vec![log],
        })
    }

    fn accept(&self, state: &mut State, receipt: Receipt) -> TxHash {
        let tx_hash = receipt.tx_hash;
        state.submissions += 1;
        state.receipts.insert(tx_hash, receipt);
        tx_hash
    }
}

impl Default for LocalChain {
    fn default() -> Self {
        Self::new(LocalChainConfig::default())
    }
}

impl ChainGateway for LocalChain {
    async fn existing_accounts(&self) -> Result<Vec<Address>, GatewayError> {
        self.round_trip().await;
        let state = self.call("existing_accounts");
        Ok(if state.authorized {
            vec![self.config.player]
        } else {
            Vec::new()
        })
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, GatewayError> {
        self.round_trip().await;
        let mut state = self.call("request_accounts");
        if self.config.reject_connection {
            return Err(GatewayError::UserRejected);
        }
        state.authorized = true;
        Ok(vec![self.config.player])
    }

    async fn chain_id(&self) -> Result<u64, GatewayError> {
        self.round_trip().await;
        Ok(self.call("chain_id").chain_id)
    }

    async fn switch_chain(&self, chain_id: u64) -> Result<(), GatewayError> {
        self.round_trip().await;
        {
            let mut state = self.call("switch_chain");
            if !state.known_chains.contains(&chain_id) {
                return Err(GatewayError::UnrecognizedChain(chain_id));
            }
            state.chain_id = chain_id;
        }
        self.chain_tx.send_replace(chain_id);
        Ok(())
    }

    async fn add_chain(&self, params: &ChainParams) -> Result<(), GatewayError> {
        self.round_trip().await;
        {
            let mut state = self.call("add_chain");
            if !self.config.approve_add_chain {
                return Err(GatewayError::UserRejected);
            }
            state.known_chains.insert(params.chain_id);
            state.chain_id = params.chain_id;
        }
        info!(chain_id = params.chain_id, name = %params.chain_name, "wallet added chain");
        self.chain_tx.send_replace(params.chain_id);
        Ok(())
    }

    async fn native_balance(&self, account: Address) -> Result<U256, GatewayError> {
        self.round_trip().await;
        let state = self.call("native_balance");
        Ok(state.balances.get(&account).copied().unwrap_or_default())
    }

    async fn contract_balance(&self) -> Result<U256, GatewayError> {
        self.round_trip().await;
        let state = self.call("contract_balance");
        self.ensure_target_chain(&state)?;
        Ok(state.contract_balance)
    }

    async fn contract_owner(&self) -> Result<Address, GatewayError> {
        self.round_trip().await;
        let state = self.call("contract_owner");
        if state.owner_reads_fail {
            return Err(GatewayError::Rpc(String::from("owner() call timed out")));
        }
        self.ensure_target_chain(&state)?;
        Ok(self.config.owner)
    }

    async fn submit_flip(&self, from: Address, value: U256) -> Result<TxHash, GatewayError> {
        self.round_trip().await;
        let mut state = self.call("submit_flip");
        if let Some(error) = state.fail_next_submission.take() {
            return Err(error);
        }
        self.ensure_target_chain(&state)?;
        self.ensure_authorized(&state, from)?;
        let receipt = self.resolve_flip(&mut state, from, value)?;
        Ok(self.accept(&mut state, receipt))
    }

    async fn submit_withdraw(
        &self,
        from: Address,
        request: WithdrawRequest,
    ) -> Result<TxHash, GatewayError> {
        self.round_trip().await;
        let mut state = self.call("submit_withdraw");
        if let Some(error) = state.fail_next_submission.take() {
            return Err(error);
        }
        self.ensure_target_chain(&state)?;
        self.ensure_authorized(&state, from)?;
        let receipt = self.resolve_withdraw(&mut state, from, request)?;
        Ok(self.accept(&mut state, receipt))
    }

    async fn wait_for_receipt(&self, tx: TxHash) -> Result<Receipt, GatewayError> {
        self.round_trip().await;
        self.call("wait_for_receipt")
            .receipts
            .remove(&tx)
            .ok_or(GatewayError::UnknownTransaction(tx))
    }

    fn chain_changes(&self) -> watch::Receiver<u64> {
        self.chain_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::outcome::{
        Settlement,
        decode_flip_outcome,
    };

    fn authorized_chain() -> LocalChain {
        LocalChain::new(LocalChainConfig {
            authorized: true,
            ..LocalChainConfig::default()
        })
    }

    #[tokio::test]
    async fn submit_flip__win_moves_payout_from_dealer_to_player() {
        // given
        let chain = authorized_chain();
        let player = chain.config().player;
        let bet = format::units(10);
        chain.force_next_outcome(true);

        // when
        let tx = chain.submit_flip(player, bet).await.unwrap();
        let receipt = chain.wait_for_receipt(tx).await.unwrap();

        // then
        let payout = format::units(10) * U256::from(195u64) / U256::from(100u64);
        assert_eq!(
            Settlement::from(decode_flip_outcome(receipt.logs.first())),
            Settlement::Won { payout }
        );
        assert_eq!(
            chain.balance_of(player),
            format::units(DEFAULT_PLAYER_FUNDS_UNITS) - bet + payout
        );
        assert_eq!(
            chain.dealer_balance(),
            format::units(DEFAULT_DEALER_FUNDS_UNITS) + bet - payout
        );
    }

    #[tokio::test]
    async fn submit_flip__loss_keeps_the_bet() {
        // given
        let chain = LocalChain::new(LocalChainConfig {
            authorized: true,
            log_shape: LogShape::Parsed,
            ..LocalChainConfig::default()
        });
        let player = chain.config().player;
        chain.force_next_outcome(false);

        // when
        let tx = chain.submit_flip(player, format::units(5)).await.unwrap();
        let receipt = chain.wait_for_receipt(tx).await.unwrap();

        // then
        assert!(matches!(receipt.logs[0], ReceiptLog::Parsed(_)));
        assert_eq!(
            Settlement::from(decode_flip_outcome(receipt.logs.first())),
            Settlement::Lost
        );
        assert_eq!(
            chain.dealer_balance(),
            format::units(DEFAULT_DEALER_FUNDS_UNITS + 5)
        );
    }

    #[tokio::test]
    async fn submit_flip__rejected_off_target_chain() {
        // given
        let chain = authorized_chain();
        chain.set_wallet_chain(FOREIGN_CHAIN_ID);

        // when
        let result = chain
            .submit_flip(chain.config().player, format::units(1))
            .await;

        // then
        assert!(matches!(result, Err(GatewayError::Rpc(_))));
        assert_eq!(chain.submission_count(), 0);
    }

    #[tokio::test]
    async fn switch_chain__unknown_chain_requires_add() {
        // given
        let chain = LocalChain::new(LocalChainConfig {
            start_chain_id: FOREIGN_CHAIN_ID,
            wallet_knows_target: false,
            ..LocalChainConfig::default()
        });
        let target = chain.config().target.clone();
        let mut changes = chain.chain_changes();

        // when
        let switched = chain.switch_chain(target.chain_id).await;
        chain.add_chain(&target).await.unwrap();

        // then
        assert_eq!(switched, Err(GatewayError::UnrecognizedChain(target.chain_id)));
        assert_eq!(chain.wallet_chain(), target.chain_id);
        assert!(changes.has_changed().unwrap());
        assert_eq!(*changes.borrow_and_update(), target.chain_id);
    }

    #[tokio::test]
    async fn submit_withdraw__only_owner_may_withdraw() {
        // given
        let chain = LocalChain::new(LocalChainConfig {
            authorized: true,
            owner: Address::repeat_byte(0x01),
            ..LocalChainConfig::default()
        });

        // when
        let result = chain
            .submit_withdraw(chain.config().player, WithdrawRequest::All)
            .await;

        // then
        assert!(matches!(result, Err(GatewayError::Reverted(_))));
        assert_eq!(chain.dealer_balance(), format::units(DEFAULT_DEALER_FUNDS_UNITS));
    }

    #[tokio::test]
    async fn wait_for_receipt__unknown_hash_fails() {
        let chain = LocalChain::default();
        let result = chain.wait_for_receipt(TxHash::ZERO).await;
        assert_eq!(result, Err(GatewayError::UnknownTransaction(TxHash::ZERO)));
    }
}
