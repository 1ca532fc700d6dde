//! Bet eligibility rules.
//!
//! Everything here is a pure function of the policy, the menu and the two
//! cached balances. Amounts are in the smallest unit and every comparison is
//! done with integer arithmetic, so boundary cases such as a dealer balance
//! of `1.94` against a bet of `1` cannot be decided by float rounding.

use crate::format::{
    self,
    parse_amount,
};
use alloy_primitives::U256;
use std::fmt;

pub const BASIS_POINTS: u32 = 10_000;
pub const DEFAULT_PAYOUT_MULTIPLIER_BPS: u32 = 19_500;
pub const DEFAULT_COLLAPSE_THRESHOLD_UNITS: u64 = 5;
pub const DEFAULT_DENOMINATIONS: [u64; 6] = [1, 5, 10, 25, 50, 100];

/// A cached balance. Unreadable balances fail every check they take part in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Balance(Option<U256>);

impl Balance {
    pub const UNREADABLE: Balance = Balance(None);

    pub fn known(amount: U256) -> Self {
        Self(Some(amount))
    }

    /// Parses decimal text such as `"12.5"`; anything else is unreadable.
    pub fn parse(text: &str) -> Self {
        Self(parse_amount(text))
    }

    pub fn amount(&self) -> Option<U256> {
        self.0
    }
}

impl From<U256> for Balance {
    fn from(amount: U256) -> Self {
        Self::known(amount)
    }
}

impl fmt::Display for Balance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(amount) => write!(f, "{}", format::format_amount(amount)),
            None => write!(f, "?"),
        }
    }
}

/// Worst-case payout ratio, held in basis points so `1.95` is exact.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PayoutMultiplier {
    basis_points: u32,
}

impl PayoutMultiplier {
    /// Multipliers below `1.0` would let the dealer promise less than the bet.
    pub fn from_basis_points(basis_points: u32) -> Option<Self> {
        (basis_points >= BASIS_POINTS).then_some(Self { basis_points })
    }

    /// Parses decimal text with at most four fractional digits.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
        if whole.is_empty()
            || fraction.len() > 4
            || !whole.bytes().all(|b| b.is_ascii_digit())
            || !fraction.bytes().all(|b| b.is_ascii_digit())
            || (text.contains('.') && fraction.is_empty())
        {
            return None;
        }
        let whole: u32 = whole.parse().ok()?;
        let fraction: u32 = format!("{fraction:0<4}").parse().ok()?;
        let basis_points = whole.checked_mul(BASIS_POINTS)?.checked_add(fraction)?;
        Self::from_basis_points(basis_points)
    }

    pub fn basis_points(&self) -> u32 {
        self.basis_points
    }
}

impl Default for PayoutMultiplier {
    fn default() -> Self {
        Self {
            basis_points: DEFAULT_PAYOUT_MULTIPLIER_BPS,
        }
    }
}

impl fmt::Display for PayoutMultiplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.basis_points / BASIS_POINTS;
        let fraction = format!("{:04}", self.basis_points % BASIS_POINTS);
        let fraction = fraction.trim_end_matches('0');
        if fraction.is_empty() {
            write!(f, "{whole}")
        } else {
            write!(f, "{whole}.{fraction}")
        }
    }
}

/// Tuning constants for the bet menu. The collapse threshold is a product
/// rule and is deliberately not derived from the multiplier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetPolicy {
    pub multiplier: PayoutMultiplier,
    pub collapse_threshold: U256,
}

impl Default for BetPolicy {
    fn default() -> Self {
        Self {
            multiplier: PayoutMultiplier::default(),
            collapse_threshold: format::units(DEFAULT_COLLAPSE_THRESHOLD_UNITS),
        }
    }
}

impl BetPolicy {
    /// `amount <= dealer / multiplier`, evaluated as
    /// `amount * bps <= dealer * 10_000`.
    pub fn dealer_covers(&self, amount: U256, dealer: Balance) -> bool {
        let Some(dealer) = dealer.amount() else {
            return false;
        };
        let bps = U256::from(self.multiplier.basis_points());
        let Some(required) = amount.checked_mul(bps) else {
            return false;
        };
        match dealer.checked_mul(U256::from(BASIS_POINTS)) {
            Some(available) => required <= available,
            None => true,
        }
    }

    pub fn user_covers(&self, amount: U256, user: Balance) -> bool {
        user.amount().is_some_and(|user| amount <= user)
    }

    pub fn eligibility(&self, dealer: Balance, user: Balance, amount: U256) -> Eligibility {
        if !self.dealer_covers(amount, dealer) {
            Eligibility::Ineligible(IneligibleReason::InsufficientDealerFunds)
        } else if !self.user_covers(amount, user) {
            Eligibility::Ineligible(IneligibleReason::InsufficientUserFunds)
        } else {
            Eligibility::Eligible
        }
    }

    /// Low dealer balances shrink the menu down to its smallest entry.
    pub fn collapses_menu(&self, dealer: Balance) -> bool {
        dealer
            .amount()
            .is_none_or(|dealer| dealer <= self.collapse_threshold)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum IneligibleReason {
    InsufficientDealerFunds,
    InsufficientUserFunds,
}

impl IneligibleReason {
    /// Short hint shown next to a disabled option.
    pub fn hint(&self) -> &'static str {
        match self {
            IneligibleReason::InsufficientDealerFunds => {
                "Insufficient contract balance for this bet"
            }
            IneligibleReason::InsufficientUserFunds => {
                "Insufficient wallet balance for this bet"
            }
        }
    }
}

impl fmt::Display for IneligibleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            IneligibleReason::InsufficientDealerFunds => {
                "This bet amount is no longer available due to dealer balance"
            }
            IneligibleReason::InsufficientUserFunds => {
                "Insufficient balance in your wallet for this bet"
            }
        };
        f.write_str(message)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    Ineligible(IneligibleReason),
}

impl Eligibility {
    pub fn is_eligible(&self) -> bool {
        matches!(self, Eligibility::Eligible)
    }

    pub fn reason(&self) -> Option<IneligibleReason> {
        match self {
            Eligibility::Eligible => None,
            Eligibility::Ineligible(reason) => Some(*reason),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MenuError {
    #[error("bet menu must contain at least one denomination")]
    Empty,
    #[error("bet denominations must be positive")]
    ZeroDenomination,
    #[error("bet denominations must be strictly increasing")]
    NotIncreasing,
    #[error("invalid bet denomination {0:?}")]
    Unparsable(String),
}

/// Fixed, ordered set of allowed bet sizes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BetMenu {
    denominations: Vec<U256>,
}

impl BetMenu {
    pub fn new(denominations: Vec<U256>) -> Result<Self, MenuError> {
        if denominations.is_empty() {
            return Err(MenuError::Empty);
        }
        if denominations.iter().any(|d| d.is_zero()) {
            return Err(MenuError::ZeroDenomination);
        }
        if denominations.windows(2).any(|pair| pair[0] >= pair[1]) {
            return Err(MenuError::NotIncreasing);
        }
        Ok(Self { denominations })
    }

    pub fn from_units(units: &[u64]) -> Result<Self, MenuError> {
        Self::new(units.iter().map(|u| format::units(*u)).collect())
    }

    pub fn parse<S: AsRef<str>>(entries: &[S]) -> Result<Self, MenuError> {
        let denominations = entries
            .iter()
            .map(|entry| {
                parse_amount(entry.as_ref())
                    .ok_or_else(|| MenuError::Unparsable(entry.as_ref().to_string()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(denominations)
    }

    pub fn smallest(&self) -> U256 {
        self.denominations[0]
    }

    pub fn contains(&self, amount: U256) -> bool {
        self.denominations.contains(&amount)
    }

    pub fn denominations(&self) -> &[U256] {
        &self.denominations
    }

    /// One entry per denomination, in menu order.
    pub fn view(&self, policy: &BetPolicy, dealer: Balance, user: Balance) -> Vec<BetOption> {
        let collapsed = policy.collapses_menu(dealer);
        let smallest = self.smallest();
        self.denominations
            .iter()
            .map(|&amount| BetOption {
                amount,
                visible: !(collapsed && amount > smallest),
                eligibility: policy.eligibility(dealer, user, amount),
            })
            .collect()
    }

    /// Validates a selection against the current balances.
    pub fn check(
        &self,
        policy: &BetPolicy,
        dealer: Balance,
        user: Balance,
        amount: U256,
    ) -> Result<(), SelectionError> {
        if !self.contains(amount) {
            return Err(SelectionError::NotOnMenu);
        }
        if policy.collapses_menu(dealer) && amount > self.smallest() {
            return Err(SelectionError::Ineligible(
                IneligibleReason::InsufficientDealerFunds,
            ));
        }
        match policy.eligibility(dealer, user, amount) {
            Eligibility::Eligible => Ok(()),
            Eligibility::Ineligible(reason) => Err(SelectionError::Ineligible(reason)),
        }
    }
}

impl Default for BetMenu {
    fn default() -> Self {
        Self {
            denominations: DEFAULT_DENOMINATIONS
                .iter()
                .map(|u| format::units(*u))
                .collect(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BetOption {
    pub amount: U256,
    pub visible: bool,
    pub eligibility: Eligibility,
}

impl BetOption {
    pub fn selectable(&self) -> bool {
        self.visible && self.eligibility.is_eligible()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SelectionError {
    NotOnMenu,
    Ineligible(IneligibleReason),
}

/// Next (or previous) selectable option after `current`, wrapping around.
pub fn cycle_selectable(options: &[BetOption], current: U256, forward: bool) -> Option<U256> {
    let selectable: Vec<U256> = options
        .iter()
        .filter(|o| o.selectable())
        .map(|o| o.amount)
        .collect();
    if selectable.is_empty() {
        return None;
    }
    let next = match selectable.iter().position(|a| *a == current) {
        Some(idx) if forward => (idx + 1) % selectable.len(),
        Some(idx) => (idx + selectable.len() - 1) % selectable.len(),
        None if forward => selectable
            .iter()
            .position(|a| *a > current)
            .unwrap_or(0),
        None => selectable
            .iter()
            .rposition(|a| *a < current)
            .unwrap_or(selectable.len() - 1),
    };
    Some(selectable[next])
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use crate::format::units;
    use proptest::prelude::*;

    fn balance(text: &str) -> Balance {
        Balance::parse(text)
    }

    fn visible_eligible(options: &[BetOption]) -> Vec<U256> {
        options
            .iter()
            .filter(|o| o.selectable())
            .map(|o| o.amount)
            .collect()
    }

    #[test]
    fn view__dealer_at_threshold_collapses_menu_to_smallest() {
        // given
        let menu = BetMenu::default();
        let policy = BetPolicy::default();

        // when
        let options = menu.view(&policy, balance("5"), balance("1000"));

        // then
        let visible: Vec<U256> = options
            .iter()
            .filter(|o| o.visible)
            .map(|o| o.amount)
            .collect();
        assert_eq!(visible, vec![units(1)]);
        assert_eq!(visible_eligible(&options), vec![units(1)]);
    }

    #[test]
    fn view__poor_user_sees_disabled_options_when_dealer_is_rich() {
        // given
        let menu = BetMenu::default();
        let policy = BetPolicy::default();

        // when
        let options = menu.view(&policy, balance("200"), balance("3"));

        // then
        assert!(options.iter().all(|o| o.visible));
        assert_eq!(visible_eligible(&options), vec![units(1)]);
        for option in options.iter().skip(1) {
            assert_eq!(
                option.eligibility,
                Eligibility::Ineligible(IneligibleReason::InsufficientUserFunds)
            );
        }
    }

    #[test]
    fn eligibility__dealer_boundary_is_not_rounded() {
        let policy = BetPolicy::default();

        // 1 <= 1.94 / 1.95 is false
        assert_eq!(
            policy.eligibility(balance("1.94"), balance("1000"), units(1)),
            Eligibility::Ineligible(IneligibleReason::InsufficientDealerFunds)
        );
        // 1 <= 1.95 / 1.95 is exactly true
        assert_eq!(
            policy.eligibility(balance("1.95"), balance("1000"), units(1)),
            Eligibility::Eligible
        );
        // one wei short
        let dealer = units(1) * U256::from(195u64) / U256::from(100u64) - U256::from(1u64);
        assert!(!policy.dealer_covers(units(1), Balance::known(dealer)));
    }

    #[test]
    fn eligibility__exact_user_balance_is_eligible() {
        let policy = BetPolicy::default();
        assert!(
            policy
                .eligibility(balance("1000"), balance("25"), units(25))
                .is_eligible()
        );
    }

    #[test]
    fn eligibility__dealer_shortfall_is_reported_before_user_shortfall() {
        let policy = BetPolicy::default();
        assert_eq!(
            policy.eligibility(balance("1"), balance("0"), units(1)),
            Eligibility::Ineligible(IneligibleReason::InsufficientDealerFunds)
        );
    }

    #[test]
    fn view__malformed_balances_fail_closed() {
        // given
        let menu = BetMenu::default();
        let policy = BetPolicy::default();

        // when
        let bad_user = menu.view(&policy, balance("1000"), balance("NaN"));
        let bad_dealer = menu.view(&policy, balance("not a number"), balance("1000"));

        // then
        assert!(visible_eligible(&bad_user).is_empty());
        assert!(
            bad_user
                .iter()
                .all(|o| o.eligibility.reason() == Some(IneligibleReason::InsufficientUserFunds))
        );
        assert!(visible_eligible(&bad_dealer).is_empty());
        assert_eq!(bad_dealer.iter().filter(|o| o.visible).count(), 1);
    }

    #[test]
    fn collapse_threshold__is_independent_of_multiplier() {
        // given
        let policy = BetPolicy {
            multiplier: PayoutMultiplier::default(),
            collapse_threshold: units(50),
        };
        let menu = BetMenu::default();

        // when
        let options = menu.view(&policy, balance("50"), balance("1000"));

        // then
        // 10 is affordable (10 <= 50 / 1.95) but hidden by the threshold
        let ten = options.iter().find(|o| o.amount == units(10)).unwrap();
        assert!(ten.eligibility.is_eligible());
        assert!(!ten.visible);
        assert_eq!(
            menu.check(&policy, balance("50"), balance("1000"), units(10)),
            Err(SelectionError::Ineligible(
                IneligibleReason::InsufficientDealerFunds
            ))
        );
    }

    #[test]
    fn check__rejects_amount_not_on_menu() {
        let menu = BetMenu::default();
        assert_eq!(
            menu.check(
                &BetPolicy::default(),
                balance("1000"),
                balance("1000"),
                units(2)
            ),
            Err(SelectionError::NotOnMenu)
        );
    }

    #[test]
    fn menu__rejects_invalid_denominations() {
        assert_eq!(BetMenu::from_units(&[]), Err(MenuError::Empty));
        assert_eq!(BetMenu::from_units(&[0, 1]), Err(MenuError::ZeroDenomination));
        assert_eq!(BetMenu::from_units(&[5, 1]), Err(MenuError::NotIncreasing));
        assert_eq!(BetMenu::from_units(&[1, 1]), Err(MenuError::NotIncreasing));
        assert_eq!(
            BetMenu::parse(&["1", "x"]),
            Err(MenuError::Unparsable("x".to_string()))
        );
        assert_eq!(
            BetMenu::parse(&["0.5", "2"]).map(|m| m.smallest()),
            Ok(U256::from(500_000_000_000_000_000u128))
        );
    }

    #[test]
    fn multiplier__parses_decimal_text() {
        assert_eq!(
            PayoutMultiplier::parse("1.95").map(|m| m.basis_points()),
            Some(19_500)
        );
        assert_eq!(
            PayoutMultiplier::parse("2").map(|m| m.basis_points()),
            Some(20_000)
        );
        assert_eq!(PayoutMultiplier::parse("0.5"), None);
        assert_eq!(PayoutMultiplier::parse("1.23456"), None);
        assert_eq!(PayoutMultiplier::parse("abc"), None);
        assert_eq!(PayoutMultiplier::parse("1."), None);
        assert_eq!(PayoutMultiplier::default().to_string(), "1.95");
    }

    #[test]
    fn cycle_selectable__skips_disabled_and_wraps() {
        // given
        let menu = BetMenu::default();
        let options = menu.view(&BetPolicy::default(), balance("1000"), balance("12"));

        // when
        let from_one = cycle_selectable(&options, units(1), true);
        let from_ten = cycle_selectable(&options, units(10), true);
        let back_from_one = cycle_selectable(&options, units(1), false);

        // then
        assert_eq!(from_one, Some(units(5)));
        assert_eq!(from_ten, Some(units(1)));
        assert_eq!(back_from_one, Some(units(10)));
    }

    #[test]
    fn cycle_selectable__nothing_selectable_returns_none() {
        let menu = BetMenu::default();
        let options = menu.view(&BetPolicy::default(), balance("1000"), balance("0"));
        assert_eq!(cycle_selectable(&options, units(1), true), None);
    }

    proptest! {
        #[test]
        fn eligibility__matches_floor_division_formula(
            idx in 0usize..DEFAULT_DENOMINATIONS.len(),
            dealer in 0u128..=1_000_000_000_000_000_000_000u128,
            user in 0u128..=1_000_000_000_000_000_000_000u128,
        ) {
            let policy = BetPolicy::default();
            let amount = units(DEFAULT_DENOMINATIONS[idx]);
            let dealer = U256::from(dealer);
            let user = U256::from(user);

            let max_bet = dealer * U256::from(BASIS_POINTS)
                / U256::from(DEFAULT_PAYOUT_MULTIPLIER_BPS);
            let expected = amount <= max_bet && amount <= user;

            let actual = policy
                .eligibility(Balance::known(dealer), Balance::known(user), amount)
                .is_eligible();
            prop_assert_eq!(actual, expected);
        }

        #[test]
        fn view__collapsed_menu_only_shows_smallest(
            dealer in 0u128..=5_000_000_000_000_000_000u128,
            user in 0u128..=1_000_000_000_000_000_000_000u128,
        ) {
            let menu = BetMenu::default();
            let options = menu.view(
                &BetPolicy::default(),
                Balance::known(U256::from(dealer)),
                Balance::known(U256::from(user)),
            );
            let visible: Vec<U256> = options.iter().filter(|o| o.visible).map(|o| o.amount).collect();
            prop_assert_eq!(visible, vec![menu.smallest()]);
        }
    }
}
