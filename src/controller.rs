use crate::{
    betting::{
        Balance,
        BetOption,
        cycle_selectable,
    },
    config::{
        AppConfig,
        GameConfig,
    },
    error::CoinFlipError,
    format::{
        format_amount,
        parse_amount,
    },
    gateway::{
        ChainGateway,
        GatewayError,
        TxHash,
        WithdrawRequest,
    },
    local_chain::{
        FOREIGN_CHAIN_ID,
        LocalChain,
    },
    outcome::{
        Settlement,
        decode_flip_outcome,
        decode_withdrawn,
    },
    session::{
        Phase,
        Session,
    },
    ui,
};
use alloy_primitives::{
    Address,
    U256,
};
use chrono::{
    DateTime,
    Local,
};
use color_eyre::eyre::Result;
use std::time::Duration;
use tokio::time;
use tracing::{
    debug,
    error,
    info,
    warn,
};

pub const MAX_ERRORS: usize = 50;
pub const VISIBLE_ERRORS: usize = 5;
const REFRESH_INTERVAL: Duration = Duration::from_secs(5);

const WITHDRAW_ALERT: &str = "Error withdrawing funds";

#[derive(Clone, Debug)]
pub struct AppSnapshot {
    pub phase: Phase,
    pub account: Option<Address>,
    pub chain_id: Option<u64>,
    pub target_chain_id: u64,
    pub chain_name: String,
    pub currency_symbol: String,
    pub explorer_url: String,
    pub user_balance: Balance,
    pub dealer_balance: Balance,
    pub options: Vec<BetOption>,
    pub selected_bet: U256,
    pub is_owner: bool,
    pub settlement: Option<Settlement>,
    pub settled_at: Option<DateTime<Local>>,
    pub last_tx: Option<TxHash>,
    pub status: String,
    pub alert: Option<String>,
    /// Newest last.
    pub errors: Vec<String>,
}

/// A flip that holds the in-progress gate but has not been submitted yet.
/// Only [`AppController::begin_flip`] hands these out, and each one is
/// consumed by a single submission.
#[derive(Debug, PartialEq, Eq)]
pub struct PendingFlip {
    player: Address,
    amount: U256,
}


pub struct AppController<G> {
    gateway: G,
    game: GameConfig,
    session: Session,
    status: String,
    alert: Option<String>,
    errors: Vec<String>,
}

impl<G: ChainGateway> AppController<G> {
    pub fn new(gateway: G, game: GameConfig) -> Self {
        let session = Session::new(game.chain.chain_id, game.menu.smallest());
        Self {
            gateway,
            game,
            session,
            status: String::from("Connect your wallet to play"),
            alert: None,
            errors: Vec::new(),
        }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn alert(&self) -> Option<&str> {
        self.alert.as_deref()
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn dismiss_alert(&mut self) {
        self.alert = None;
    }

    fn symbol(&self) -> &str {
        &self.game.chain.currency_symbol
    }

    /// Records a failure in the error log and the status line.
    fn report(&mut self, err: CoinFlipError) -> CoinFlipError {
        self.status = err.to_string();
        self.push_errors(vec![err.to_string()]);
        err
    }

    /// Like [`Self::report`], but also blocks the UI with `message`.
    fn raise(&mut self, message: impl Into<String>, err: CoinFlipError) -> CoinFlipError {
        self.alert = Some(message.into());
        self.report(err)
    }

    /// Silently reconnects to an account the wallet already authorized.
    pub async fn restore_connection(&mut self) -> Result<(), CoinFlipError> {
        let accounts = self
            .gateway
            .existing_accounts()
            .await
            .map_err(|e| self.report(CoinFlipError::Connection(e.to_string())))?;
        match accounts.first() {
            Some(&account) => self.establish(account).await,
            None => {
                debug!("no authorized account to restore");
                Ok(())
            }
        }
    }

    pub async fn connect(&mut self) -> Result<(), CoinFlipError> {
        let accounts = self
            .gateway
            .request_accounts()
            .await
            .map_err(|e| self.report(CoinFlipError::Connection(e.to_string())))?;
        let account = accounts.first().copied().ok_or_else(|| {
            self.report(CoinFlipError::Connection(
                "wallet returned no accounts".to_string(),
            ))
        })?;
        self.establish(account).await
    }

    async fn establish(&mut self, account: Address) -> Result<(), CoinFlipError> {
        let chain_id = self
            .gateway
            .chain_id()
            .await
            .map_err(|e| self.report(CoinFlipError::Connection(e.to_string())))?;
        self.session.connected(account, chain_id);
        info!(%account, chain_id, "wallet connected");

        if self.session.on_target_chain() {
            self.status = format!("Connected to {}", self.game.chain.chain_name);
            self.refresh_balances().await?;
            self.check_ownership().await
        } else {
            self.status = format!(
                "Wrong network: switch to {} to play",
                self.game.chain.chain_name
            );
            self.refresh_user_balance(account).await;
            Ok(())
        }
    }

    async fn refresh_user_balance(&mut self, account: Address) {
        match self.gateway.native_balance(account).await {
            Ok(user) => self.session.set_user_balance(user.into()),
            Err(e) => {
                warn!(error = %e, "failed to read wallet balance");
                self.session.set_user_balance(Balance::UNREADABLE);
            }
        }
    }

    /// Asks the wallet to move to the game network, adding it first if the
    /// wallet has never seen it.
    pub async fn switch_network(&mut self) -> Result<(), CoinFlipError> {
        let expected = self.game.chain.chain_id;
        match self.gateway.switch_chain(expected).await {
            Ok(()) => {}
            Err(GatewayError::UnrecognizedChain(_)) => {
                info!(chain_id = expected, "network unknown to wallet, adding it");
                if let Err(e) = self.gateway.add_chain(&self.game.chain).await {
                    warn!(error = %e, "add network failed");
                    return Err(self.report(CoinFlipError::ChainAddRejected));
                }
            }
            Err(e) => {
                warn!(error = %e, "switch network failed");
                return Err(self.report(CoinFlipError::NetworkMismatch { expected }));
            }
        }
        let chain_id = self
            .gateway
            .chain_id()
            .await
            .map_err(|e| self.report(CoinFlipError::Connection(e.to_string())))?;
        self.on_chain_changed(chain_id).await?;
        if self.session.on_target_chain() {
            Ok(())
        } else {
            Err(self.report(CoinFlipError::NetworkMismatch { expected }))
        }
    }

    pub async fn on_chain_changed(&mut self, chain_id: u64) -> Result<(), CoinFlipError> {
        self.session.network_changed(chain_id);
        info!(chain_id, "chain changed");
        let Some(account) = self.session.account() else {
            return Ok(());
        };
        if self.session.on_target_chain() {
            self.status = format!("Connected to {}", self.game.chain.chain_name);
            self.refresh_balances().await?;
            self.check_ownership().await
        } else {
            self.status = format!(
                "Wrong network: switch to {} to play",
                self.game.chain.chain_name
            );
            self.refresh_user_balance(account).await;
            Ok(())
        }
    }

    /// Reads dealer and player balances together. Either failing leaves both
    /// unreadable.
    pub async fn refresh_balances(&mut self) -> Result<(), CoinFlipError> {
        let Some(account) = self.session.account() else {
            return Ok(());
        };
        let read = futures::try_join!(
            self.gateway.contract_balance(),
            self.gateway.native_balance(account),
        );
        match read {
            Ok((dealer, user)) => {
                debug!(dealer = %format_amount(dealer), user = %format_amount(user), "balances refreshed");
                self.session.balances_loaded(dealer.into(), user.into());
                Ok(())
            }
            Err(e) => {
                self.session.balances_unreadable();
                Err(self.report(CoinFlipError::Connection(format!(
                    "failed to read balances: {e}"
                ))))
            }
        }
    }

    pub async fn check_ownership(&mut self) -> Result<(), CoinFlipError> {
        let Some(account) = self.session.account() else {
            return Ok(());
        };
        match self.gateway.contract_owner().await {
            Ok(owner) => {
                self.session.set_owner(Some(owner == account));
                Ok(())
            }
            Err(e) => {
                self.session.set_owner(None);
                Err(self.report(CoinFlipError::Connection(format!(
                    "failed to read contract owner: {e}"
                ))))
            }
        }
    }

    fn menu_view(&self) -> Vec<BetOption> {
        self.game.menu.view(
            &self.game.policy,
            self.session.dealer_balance(),
            self.session.user_balance(),
        )
    }

    pub fn select_bet(&mut self, amount: U256) -> Result<(), CoinFlipError> {
        match self
            .session
            .select_bet(&self.game.menu, &self.game.policy, amount)
        {
            Ok(()) => {
                self.status = format!("Bet: {} {}", format_amount(amount), self.symbol());
                Ok(())
            }
            Err(e) if e.is_bet_validation() => Err(self.raise(e.to_string(), e)),
            Err(e) => Err(self.report(e)),
        }
    }

    pub fn select_next_bet(&mut self) {
        self.cycle_bet(true);
    }

    pub fn select_prev_bet(&mut self) {
        self.cycle_bet(false);
    }

    fn cycle_bet(&mut self, forward: bool) {
        let options = self.menu_view();
        match cycle_selectable(&options, self.session.selected_bet(), forward) {
            Some(amount) => {
                let _ = self.select_bet(amount);
            }
            None => self.status = String::from("No bet sizes available right now"),
        }
    }

    /// Takes the flip gate after re-validating the selected bet. No gateway
    /// call is made.
    pub fn begin_flip(&mut self) -> Result<PendingFlip, CoinFlipError> {
        match self.session.begin_flip(&self.game.menu, &self.game.policy) {
            Ok((player, amount)) => {
                self.status = format!("Flipping {} {}...", format_amount(amount), self.symbol());
                Ok(PendingFlip { player, amount })
            }
            Err(e) if e.is_bet_validation() => Err(self.raise(e.to_string(), e)),
            Err(e) => Err(self.report(e)),
        }
    }

    /// Submits a flip taken with [`Self::begin_flip`] and waits for its
    /// settlement. Any failure before the receipt is read releases the gate.
    pub async fn finish_flip(&mut self, pending: PendingFlip) -> Result<Settlement, CoinFlipError> {
        let PendingFlip { player, amount } = pending;
        if !self.session.is_flipping() {
            return Err(self.report(CoinFlipError::Submission(String::from(
                "no flip holds the gate",
            ))));
        }
        info!(%player, amount = %format_amount(amount), "submitting flip");

        let tx = match self.gateway.submit_flip(player, amount).await {
            Ok(tx) => tx,
            Err(e) => return Err(self.abort_flip(e)),
        };
        self.session.record_submission(tx);

        let receipt = match self.gateway.wait_for_receipt(tx).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.abort_flip(e)),
        };
        if !receipt.success {
            return Err(self.abort_flip(GatewayError::Reverted(format!(
                "transaction {tx} reverted"
            ))));
        }

        let settlement = Settlement::from(decode_flip_outcome(receipt.logs.first()));
        if let Settlement::Unknown { reason } = &settlement {
            warn!(%tx, error = %reason, "flip outcome could not be decoded");
            self.push_errors(vec![format!("could not decode settlement: {reason}")]);
        }

        if let Err(e) = self.refresh_balances().await {
            warn!(error = %e, "balance refresh after flip failed");
        }

        info!(%tx, ?settlement, "flip settled");
        self.status = settlement.message(self.symbol());
        self.session.settle(settlement.clone(), Local::now());
        Ok(settlement)
    }

    pub async fn flip(&mut self) -> Result<Settlement, CoinFlipError> {
        let pending = self.begin_flip()?;
        self.finish_flip(pending).await
    }

    fn abort_flip(&mut self, cause: GatewayError) -> CoinFlipError {
        error!(error = %cause, "flip failed");
        self.session.abort_flip();
        self.report(CoinFlipError::Submission(cause.to_string()))
    }

    pub async fn withdraw(&mut self, amount_text: &str) -> Result<(), CoinFlipError> {
        self.ensure_may_withdraw()?;
        let amount = match parse_amount(amount_text) {
            Some(amount) if !amount.is_zero() => amount,
            _ => {
                let err = CoinFlipError::InvalidAmount(amount_text.trim().to_string());
                return Err(self.raise("Please enter a valid amount", err));
            }
        };
        self.execute_withdraw(WithdrawRequest::Amount(amount)).await
    }

    pub async fn withdraw_all(&mut self) -> Result<(), CoinFlipError> {
        self.ensure_may_withdraw()?;
        self.execute_withdraw(WithdrawRequest::All).await
    }

    fn ensure_may_withdraw(&mut self) -> Result<(), CoinFlipError> {
        if self.session.account().is_none() {
            let err = CoinFlipError::Connection("wallet not connected".to_string());
            return Err(self.raise(WITHDRAW_ALERT, err));
        }
        if !self.session.on_target_chain() {
            let err = CoinFlipError::NetworkMismatch {
                expected: self.game.chain.chain_id,
            };
            return Err(self.raise(WITHDRAW_ALERT, err));
        }
        if self.session.is_known_non_owner() {
            return Err(self.raise(WITHDRAW_ALERT, CoinFlipError::Authorization));
        }
        Ok(())
    }

    async fn execute_withdraw(&mut self, request: WithdrawRequest) -> Result<(), CoinFlipError> {
        let Some(owner) = self.session.account() else {
            return Err(self.report(CoinFlipError::Connection("wallet not connected".to_string())));
        };
        info!(%owner, ?request, "submitting withdraw");

        let tx = match self.gateway.submit_withdraw(owner, request).await {
            Ok(tx) => tx,
            Err(e) => return Err(self.withdraw_failed(e).await),
        };
        let receipt = match self.gateway.wait_for_receipt(tx).await {
            Ok(receipt) => receipt,
            Err(e) => return Err(self.withdraw_failed(e).await),
        };
        if !receipt.success {
            let cause = GatewayError::Reverted(format!("transaction {tx} reverted"));
            return Err(self.withdraw_failed(cause).await);
        }

        self.status = match decode_withdrawn(receipt.logs.first()) {
            Ok(event) => format!("Withdrew {} {}", format_amount(event.amount), self.symbol()),
            Err(e) => {
                warn!(%tx, error = %e, "withdraw event could not be decoded");
                String::from("Withdrawal confirmed")
            }
        };
        if let Err(e) = self.refresh_balances().await {
            warn!(error = %e, "balance refresh after withdraw failed");
        }
        Ok(())
    }

    /// A revert is only blamed on ownership once a fresh `owner()` read
    /// says the account is not the owner.
    async fn withdraw_failed(&mut self, cause: GatewayError) -> CoinFlipError {
        error!(error = %cause, "withdraw failed");
        let err = match cause {
            GatewayError::Reverted(_) if !self.session.is_owner() => {
                match self.confirmed_owner().await {
                    Some(false) => CoinFlipError::Authorization,
                    _ => CoinFlipError::Submission(cause.to_string()),
                }
            }
            other => CoinFlipError::Submission(other.to_string()),
        };
        self.raise(WITHDRAW_ALERT, err)
    }

    async fn confirmed_owner(&mut self) -> Option<bool> {
        let account = self.session.account()?;
        match self.gateway.contract_owner().await {
            Ok(owner) => {
                let is_owner = owner == account;
                self.session.set_owner(Some(is_owner));
                Some(is_owner)
            }
            Err(e) => {
                warn!(error = %e, "owner re-check after revert failed");
                None
            }
        }
    }

    /// Balance poll for the refresh ticker. Skipped while a flip holds the
    /// gate or when the wallet is elsewhere.
    pub async fn poll(&mut self) {
        let Some(account) = self.session.account() else {
            return;
        };
        if self.session.is_flipping() || !self.session.on_target_chain() {
            return;
        }
        let read = futures::try_join!(
            self.gateway.contract_balance(),
            self.gateway.native_balance(account),
        );
        match read {
            Ok((dealer, user)) => self.session.balances_loaded(dealer.into(), user.into()),
            Err(e) => debug!(error = %e, "balance poll failed"),
        }
    }

    pub fn snapshot(&self) -> AppSnapshot {
        let start = self.errors.len().saturating_sub(VISIBLE_ERRORS);
        AppSnapshot {
            phase: self.session.phase(),
            account: self.session.account(),
            chain_id: self.session.chain_id(),
            target_chain_id: self.game.chain.chain_id,
            chain_name: self.game.chain.chain_name.clone(),
            currency_symbol: self.game.chain.currency_symbol.clone(),
            explorer_url: self.game.chain.explorer_url.clone(),
            user_balance: self.session.user_balance(),
            dealer_balance: self.session.dealer_balance(),
            options: self.menu_view(),
            selected_bet: self.session.selected_bet(),
            is_owner: self.session.is_owner(),
            settlement: self.session.last_settlement().cloned(),
            settled_at: self.session.settled_at(),
            last_tx: self.session.last_tx(),
            status: self.status.clone(),
            alert: self.alert.clone(),
            errors: self.errors[start..].to_vec(),
        }
    }

    fn push_errors(&mut self, mut items: Vec<String>) {
        if items.is_empty() {
            return;
        }
        for item in &items {
            error!("{}", item);
        }
        self.errors.append(&mut items);
        if self.errors.len() > MAX_ERRORS {
            let drain = self.errors.len() - MAX_ERRORS;
            self.errors.drain(0..drain);
        }
    }
}

pub async fn run_app(config: AppConfig) -> Result<()> {
    let chain = LocalChain::new(config.local_chain());
    let mut controller = AppController::new(chain, config.game);
    let _ = controller.restore_connection().await;
    let mut ui_state = ui::UiState::default();

    ui::terminal_enter(&mut ui_state)?;
    let res = run_loop(&mut controller, &mut ui_state).await;
    ui::terminal_exit()?;
    res
}

async fn run_loop(
    controller: &mut AppController<LocalChain>,
    ui_state: &mut ui::UiState,
) -> Result<()> {
    let mut input = ui::input_events();
    let mut chain_changes = controller.gateway().chain_changes();
    let mut ticker = time::interval(REFRESH_INTERVAL);
    ui::draw(ui_state, &controller.snapshot())?;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => { break; }
            _ = ticker.tick() => {
                controller.poll().await;
            }
            changed = chain_changes.changed() => {
                if changed.is_err() { break; }
                let chain_id = *chain_changes.borrow_and_update();
                if controller.session().chain_id() != Some(chain_id) {
                    let _ = controller.on_chain_changed(chain_id).await;
                }
            }
            ev = input.recv() => {
                let Some(ev) = ev else { break; };
                let Some(user_event) = ui::interpret_event(ui_state, ev?) else { continue; };
                match user_event {
                    ui::UserEvent::Quit => break,
                    ui::UserEvent::Redraw => {}
                    ui::UserEvent::DismissAlert => controller.dismiss_alert(),
                    ui::UserEvent::Connect => { let _ = controller.connect().await; }
                    ui::UserEvent::SwitchNetwork => { let _ = controller.switch_network().await; }
                    ui::UserEvent::NextBet => controller.select_next_bet(),
                    ui::UserEvent::PrevBet => controller.select_prev_bet(),
                    ui::UserEvent::Flip => {
                        if let Ok(pending) = controller.begin_flip() {
                            ui::draw(ui_state, &controller.snapshot())?;
                            let _ = controller.finish_flip(pending).await;
                        }
                    }
                    ui::UserEvent::Withdraw(text) => {
                        if controller.withdraw(&text).await.is_ok() {
                            ui::withdraw_succeeded(ui_state);
                        }
                    }
                    ui::UserEvent::WithdrawAll => {
                        if controller.withdraw_all().await.is_ok() {
                            ui::withdraw_succeeded(ui_state);
                        }
                    }
                    ui::UserEvent::HopChain => {
                        let gateway = controller.gateway();
                        let next = if gateway.wallet_chain() == FOREIGN_CHAIN_ID {
                            gateway.config().target.chain_id
                        } else {
                            FOREIGN_CHAIN_ID
                        };
                        gateway.set_wallet_chain(next);
                    }
                }
            }
        }
        ui::draw(ui_state, &controller.snapshot())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::{
        format::units,
        local_chain::LocalChainConfig,
    };

    fn controller(config: LocalChainConfig) -> AppController<LocalChain> {
        AppController::new(LocalChain::new(config), GameConfig::default())
    }

    #[test]
    fn push_errors__keeps_last_fifty() {
        // given
        let mut controller = controller(LocalChainConfig::default());

        // when
        controller.push_errors((0..60).map(|i| format!("e{i}")).collect());

        // then
        assert_eq!(controller.errors().len(), MAX_ERRORS);
        assert_eq!(controller.errors()[0], "e10");
        assert_eq!(
            controller.snapshot().errors,
            vec!["e55", "e56", "e57", "e58", "e59"]
        );
    }

    #[tokio::test]
    async fn restore_connection__without_authorization_stays_disconnected() {
        // given
        let mut controller = controller(LocalChainConfig::default());

        // when
        controller.restore_connection().await.unwrap();

        // then
        assert_eq!(controller.session().phase(), Phase::Disconnected);
        assert_eq!(controller.gateway().call_count(), 1);
    }

    #[tokio::test]
    async fn restore_connection__authorized_account_becomes_ready() {
        // given
        let mut controller = controller(LocalChainConfig {
            authorized: true,
            ..LocalChainConfig::default()
        });

        // when
        controller.restore_connection().await.unwrap();

        // then
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.phase, Phase::Ready);
        assert!(snapshot.is_owner);
        assert_eq!(snapshot.dealer_balance, Balance::known(units(400)));
    }

    #[tokio::test]
    async fn select_bet__ineligible_raises_alert() {
        // given
        let mut controller = controller(LocalChainConfig {
            player_funds: units(3),
            ..LocalChainConfig::default()
        });
        controller.connect().await.unwrap();

        // when
        let result = controller.select_bet(units(5));

        // then
        assert_eq!(result, Err(CoinFlipError::InsufficientUserFunds));
        assert_eq!(
            controller.alert(),
            Some("Insufficient balance in your wallet for this bet")
        );
        controller.dismiss_alert();
        assert_eq!(controller.alert(), None);
    }

    #[tokio::test]
    async fn select_next_bet__skips_unaffordable_options() {
        // given
        let mut controller = controller(LocalChainConfig {
            player_funds: units(12),
            ..LocalChainConfig::default()
        });
        controller.connect().await.unwrap();

        // when
        controller.select_next_bet();
        controller.select_next_bet();
        let after_two = controller.session().selected_bet();
        controller.select_next_bet();

        // then
        assert_eq!(after_two, units(10));
        assert_eq!(controller.session().selected_bet(), units(1));
    }

    #[tokio::test]
    async fn begin_flip__second_flip_rejected_while_first_pending() {
        // given
        let mut controller = controller(LocalChainConfig::default());
        controller.connect().await.unwrap();
        let calls = controller.gateway().call_count();

        // when
        let first = controller.begin_flip();
        let second = controller.begin_flip();

        // then
        assert!(first.is_ok());
        assert_eq!(second, Err(CoinFlipError::FlipInProgress));
        assert_eq!(controller.gateway().call_count(), calls);
    }

    #[tokio::test]
    async fn finish_flip__without_gate_submits_nothing() {
        // given
        let mut controller = controller(LocalChainConfig::default());
        controller.connect().await.unwrap();
        controller.gateway().force_next_outcome(true);
        controller.flip().await.unwrap();
        let player = controller.gateway().config().player;
        let stray = PendingFlip {
            player,
            amount: units(1),
        };

        // when
        let result = controller.finish_flip(stray).await;

        // then
        assert!(matches!(result, Err(CoinFlipError::Submission(_))));
        assert_eq!(controller.gateway().submission_count(), 1);
        assert_eq!(controller.session().phase(), Phase::Settled);
        assert!(matches!(
            controller.session().last_settlement(),
            Some(Settlement::Won { .. })
        ));
    }
}
