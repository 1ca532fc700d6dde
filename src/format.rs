//! Conversions between on-chain amounts and the strings shown to the user.
//!
//! Amounts stay integers in the smallest unit everywhere else in the crate;
//! these helpers are the only place decimal text is produced or consumed.

use alloy_primitives::{
    U256,
    utils::{
        format_units,
        parse_ether,
    },
};

/// Fixed decimal scale of the native currency.
pub const DECIMALS: u8 = 18;

/// Maximum number of fractional digits accepted by [`parse_amount`].
const MAX_FRACTION_DIGITS: usize = DECIMALS as usize;

/// Parses a non-negative decimal string into the smallest unit.
///
/// Returns `None` for anything that is not a plain decimal: empty input,
/// signs, exponents, `NaN`/`Infinity`, stray characters, a bare leading or
/// trailing `.`, or more precision than the chain can represent.
pub fn parse_amount(text: &str) -> Option<U256> {
    let text = text.trim();
    let (whole, fraction) = match text.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };
    if whole.is_empty() || !whole.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if let Some(fraction) = fraction {
        if fraction.is_empty()
            || fraction.len() > MAX_FRACTION_DIGITS
            || !fraction.bytes().all(|b| b.is_ascii_digit())
        {
            return None;
        }
    }
    parse_ether(text).ok()
}

/// `whole` currency units expressed in the smallest unit.
pub fn units(whole: u64) -> U256 {
    U256::from(whole) * U256::from(10u64).pow(U256::from(DECIMALS))
}

/// Exact decimal rendering with trailing zeros trimmed, keeping at least one
/// fractional digit (`1.95`, `2.0`, `0.000000000000000001`).
pub fn format_amount(amount: U256) -> String {
    let full = match format_units(amount, DECIMALS) {
        Ok(full) => full,
        Err(_) => return amount.to_string(),
    };
    match full.split_once('.') {
        Some((whole, fraction)) => {
            let fraction = fraction.trim_end_matches('0');
            if fraction.is_empty() {
                format!("{whole}.0")
            } else {
                format!("{whole}.{fraction}")
            }
        }
        None => format!("{full}.0"),
    }
}

/// Rounds half up to two decimals (`1.005` -> `1.01`).
pub fn format_amount_fixed2(amount: U256) -> String {
    let cent = U256::from(10u64).pow(U256::from(DECIMALS - 2));
    let half_cent = cent / U256::from(2u64);
    let cents = amount.saturating_add(half_cent) / cent;
    let hundred = U256::from(100u64);
    format!("{}.{:0>2}", cents / hundred, (cents % hundred).to_string())
}

/// First 6 and last 4 characters joined by `...`; empty input stays empty.
pub fn short_hex(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let chars: Vec<char> = value.chars().collect();
    if chars.len() <= 10 {
        return value.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

pub fn explorer_tx_url(explorer: &str, tx_hash: &str) -> String {
    format!("{}/tx/{}", explorer.trim_end_matches('/'), tx_hash)
}
