//! The single piece of mutable game state.

use crate::{
    betting::{
        Balance,
        BetMenu,
        BetPolicy,
    },
    error::CoinFlipError,
    gateway::TxHash,
    outcome::Settlement,
};
use alloy_primitives::{
    Address,
    U256,
};
use chrono::{
    DateTime,
    Local,
};
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Disconnected,
    /// Wallet is on some other chain.
    WrongNetwork,
    /// On the right chain, balances not read yet.
    Connected,
    Ready,
    Flipping,
    Settled,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Phase::Disconnected => "Not Connected",
            Phase::WrongNetwork => "Wrong Network",
            Phase::Connected => "Connected",
            Phase::Ready => "Ready",
            Phase::Flipping => "Flipping...",
            Phase::Settled => "Settled",
        };
        f.write_str(label)
    }
}

#[derive(Clone, Debug)]
pub struct Session {
    target_chain: u64,
    phase: Phase,
    account: Option<Address>,
    chain_id: Option<u64>,
    dealer: Balance,
    user: Balance,
    selected_bet: U256,
    /// `None` until the contract's owner has been read.
    owner: Option<bool>,
    last_settlement: Option<Settlement>,
    last_tx: Option<TxHash>,
    settled_at: Option<DateTime<Local>>,
}

impl Session {
    pub fn new(target_chain: u64, default_bet: U256) -> Self {
        Self {
            target_chain,
            phase: Phase::Disconnected,
            account: None,
            chain_id: None,
            dealer: Balance::UNREADABLE,
            user: Balance::UNREADABLE,
            selected_bet: default_bet,
            owner: None,
            last_settlement: None,
            last_tx: None,
            settled_at: None,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn account(&self) -> Option<Address> {
        self.account
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    pub fn target_chain(&self) -> u64 {
        self.target_chain
    }

    pub fn on_target_chain(&self) -> bool {
        self.chain_id == Some(self.target_chain)
    }

    pub fn dealer_balance(&self) -> Balance {
        self.dealer
    }

    pub fn user_balance(&self) -> Balance {
        self.user
    }

    pub fn selected_bet(&self) -> U256 {
        self.selected_bet
    }

    pub fn is_owner(&self) -> bool {
        self.owner == Some(true)
    }

    pub fn is_known_non_owner(&self) -> bool {
        self.owner == Some(false)
    }

    pub fn is_flipping(&self) -> bool {
        self.phase == Phase::Flipping
    }

    pub fn last_settlement(&self) -> Option<&Settlement> {
        self.last_settlement.as_ref()
    }

    pub fn last_tx(&self) -> Option<TxHash> {
        self.last_tx
    }

    pub fn settled_at(&self) -> Option<DateTime<Local>> {
        self.settled_at
    }

    fn resting_phase(&self) -> Phase {
        if self.on_target_chain() {
            Phase::Ready
        } else {
            Phase::WrongNetwork
        }
    }

    pub fn connected(&mut self, account: Address, chain_id: u64) {
        self.account = Some(account);
        self.chain_id = Some(chain_id);
        self.phase = if self.on_target_chain() {
            Phase::Connected
        } else {
            Phase::WrongNetwork
        };
    }

    /// Applies a chain change reported by the wallet. A flip in flight keeps
    /// its phase; it lands on the right phase when it settles or aborts.
    pub fn network_changed(&mut self, chain_id: u64) {
        self.chain_id = Some(chain_id);
        if !self.on_target_chain() {
            self.dealer = Balance::UNREADABLE;
            self.owner = None;
        }
        self.phase = match self.phase {
            Phase::Disconnected => Phase::Disconnected,
            Phase::Flipping => Phase::Flipping,
            _ if !self.on_target_chain() => Phase::WrongNetwork,
            Phase::WrongNetwork => Phase::Connected,
            other => other,
        };
    }

    pub fn set_user_balance(&mut self, user: Balance) {
        self.user = user;
    }

    pub fn balances_loaded(&mut self, dealer: Balance, user: Balance) {
        self.dealer = dealer;
        self.user = user;
        if self.phase == Phase::Connected {
            self.phase = Phase::Ready;
        }
    }

    /// A failed read leaves both balances unreadable and the phase alone.
    pub fn balances_unreadable(&mut self) {
        self.dealer = Balance::UNREADABLE;
        self.user = Balance::UNREADABLE;
    }

    pub fn set_owner(&mut self, owner: Option<bool>) {
        self.owner = owner;
    }

    pub fn select_bet(
        &mut self,
        menu: &BetMenu,
        policy: &BetPolicy,
        amount: U256,
    ) -> Result<(), CoinFlipError> {
        menu.check(policy, self.dealer, self.user, amount)?;
        self.selected_bet = amount;
        Ok(())
    }

    /// Takes the in-progress gate for the selected bet. Returns the player
    /// and the amount to submit.
    pub fn begin_flip(
        &mut self,
        menu: &BetMenu,
        policy: &BetPolicy,
    ) -> Result<(Address, U256), CoinFlipError> {
        match self.phase {
            Phase::Flipping => return Err(CoinFlipError::FlipInProgress),
            Phase::Ready | Phase::Settled => {}
            Phase::WrongNetwork => {
                return Err(CoinFlipError::NetworkMismatch {
                    expected: self.target_chain,
                });
            }
            Phase::Disconnected => {
                return Err(CoinFlipError::Connection("wallet not connected".to_string()));
            }
            Phase::Connected => {
                return Err(CoinFlipError::Connection("balances not loaded yet".to_string()));
            }
        }
        let account = self
            .account
            .ok_or_else(|| CoinFlipError::Connection("wallet not connected".to_string()))?;
        menu.check(policy, self.dealer, self.user, self.selected_bet)?;

        self.phase = Phase::Flipping;
        self.last_settlement = None;
        self.last_tx = None;
        self.settled_at = None;
        Ok((account, self.selected_bet))
    }

    pub fn record_submission(&mut self, tx: TxHash) {
        self.last_tx = Some(tx);
    }

    pub fn settle(&mut self, settlement: Settlement, at: DateTime<Local>) {
        if self.phase != Phase::Flipping {
            return;
        }
        self.last_settlement = Some(settlement);
        self.settled_at = Some(at);
        self.phase = if self.on_target_chain() {
            Phase::Settled
        } else {
            Phase::WrongNetwork
        };
    }

    pub fn abort_flip(&mut self) {
        if self.phase == Phase::Flipping {
            self.phase = self.resting_phase();
        }
    }

    pub fn disconnect(&mut self) {
        *self = Self::new(self.target_chain, self.selected_bet);
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::format::units;

    const TARGET: u64 = 0x188;

    fn ready_session() -> Session {
        let mut session = Session::new(TARGET, units(1));
        session.connected(Address::repeat_byte(1), TARGET);
        session.balances_loaded(Balance::known(units(100)), Balance::known(units(50)));
        session
    }

    #[test]
    fn connected__wrong_chain_enters_wrong_network() {
        // given
        let mut session = Session::new(TARGET, units(1));

        // when
        session.connected(Address::repeat_byte(1), 1);

        // then
        assert_eq!(session.phase(), Phase::WrongNetwork);
    }

    #[test]
    fn balances_loaded__connected_becomes_ready() {
        let session = ready_session();
        assert_eq!(session.phase(), Phase::Ready);
        assert_eq!(session.user_balance(), Balance::known(units(50)));
    }

    #[test]
    fn begin_flip__second_flip_is_rejected_while_pending() {
        // given
        let mut session = ready_session();
        let menu = BetMenu::default();
        let policy = BetPolicy::default();
        session.begin_flip(&menu, &policy).unwrap();

        // when
        let second = session.begin_flip(&menu, &policy);

        // then
        assert_eq!(second, Err(CoinFlipError::FlipInProgress));
        assert!(session.is_flipping());
    }

    #[test]
    fn begin_flip__revalidates_against_current_balances() {
        // given
        let mut session = ready_session();
        let menu = BetMenu::default();
        let policy = BetPolicy::default();
        session.select_bet(&menu, &policy, units(25)).unwrap();
        session.balances_loaded(Balance::known(units(100)), Balance::known(units(10)));

        // when
        let result = session.begin_flip(&menu, &policy);

        // then
        assert_eq!(result, Err(CoinFlipError::InsufficientUserFunds));
        assert_eq!(session.phase(), Phase::Ready);
    }

    #[test]
    fn begin_flip__clears_previous_result() {
        // given
        let mut session = ready_session();
        let menu = BetMenu::default();
        let policy = BetPolicy::default();
        session.begin_flip(&menu, &policy).unwrap();
        session.record_submission(TxHash::repeat_byte(9));
        session.settle(Settlement::Lost, Local::now());

        // when
        session.begin_flip(&menu, &policy).unwrap();

        // then
        assert_eq!(session.last_settlement(), None);
        assert_eq!(session.last_tx(), None);
    }

    #[test]
    fn abort_flip__releases_gate() {
        // given
        let mut session = ready_session();
        let menu = BetMenu::default();
        let policy = BetPolicy::default();
        session.begin_flip(&menu, &policy).unwrap();

        // when
        session.abort_flip();

        // then
        assert_eq!(session.phase(), Phase::Ready);
        assert!(session.begin_flip(&menu, &policy).is_ok());
    }

    #[test]
    fn select_bet__hidden_option_reports_dealer_funds() {
        // given
        let mut session = ready_session();
        session.balances_loaded(Balance::known(units(5)), Balance::known(units(50)));

        // when
        let result = session.select_bet(&BetMenu::default(), &BetPolicy::default(), units(5));

        // then
        assert_eq!(result, Err(CoinFlipError::InsufficientDealerFunds));
        assert_eq!(session.selected_bet(), units(1));
    }

    #[test]
    fn network_changed__leaving_target_drops_dealer_and_owner() {
        // given
        let mut session = ready_session();
        session.set_owner(Some(true));

        // when
        session.network_changed(1);

        // then
        assert_eq!(session.phase(), Phase::WrongNetwork);
        assert_eq!(session.dealer_balance(), Balance::UNREADABLE);
        assert!(!session.is_owner());
    }

    #[test]
    fn network_changed__mid_flip_settles_into_wrong_network() {
        // given
        let mut session = ready_session();
        session
            .begin_flip(&BetMenu::default(), &BetPolicy::default())
            .unwrap();

        // when
        session.network_changed(1);
        let still_flipping = session.is_flipping();
        session.settle(Settlement::Lost, Local::now());

        // then
        assert!(still_flipping);
        assert_eq!(session.phase(), Phase::WrongNetwork);
        assert_eq!(session.last_settlement(), Some(&Settlement::Lost));
    }

    #[test]
    fn begin_flip__wrong_network_is_rejected() {
        let mut session = Session::new(TARGET, units(1));
        session.connected(Address::repeat_byte(1), 1);

        let result = session.begin_flip(&BetMenu::default(), &BetPolicy::default());

        assert_eq!(result, Err(CoinFlipError::NetworkMismatch { expected: TARGET }));
    }
}
