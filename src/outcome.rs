use crate::{
    abi::{
        self,
        DecodeError,
        FLIP_RESULT,
        ReceiptLog,
        WITHDRAWN,
    },
    format::format_amount,
};
use alloy_primitives::{
    Address,
    U256,
};

/// Position of `win` in `FlipResult(address,bool,uint256,uint256)`.
pub const WIN_ARG: usize = 1;
/// Position of `payout` in `FlipResult(address,bool,uint256,uint256)`.
pub const PAYOUT_ARG: usize = 3;

const WITHDRAWN_OWNER_ARG: usize = 0;
const WITHDRAWN_AMOUNT_ARG: usize = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlipOutcome {
    pub win: bool,
    /// Smallest-unit payout as emitted by the contract.
    pub payout: U256,
}

impl FlipOutcome {
    pub fn payout_display(&self) -> String {
        format_amount(self.payout)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WithdrawnEvent {
    pub owner: Address,
    pub amount: U256,
}

/// Decodes the settlement event from the first log of a flip receipt.
pub fn decode_flip_outcome(log: Option<&ReceiptLog>) -> Result<FlipOutcome, DecodeError> {
    let event = abi::normalize(log.ok_or(DecodeError::MissingLog)?)?;
    if event.schema != &FLIP_RESULT {
        return Err(DecodeError::UnexpectedEvent {
            expected: FLIP_RESULT.name,
            found: event.schema.name,
        });
    }
    let win = event.args[WIN_ARG]
        .as_bool()
        .ok_or(DecodeError::ArgumentMismatch {
            event: FLIP_RESULT.name,
            index: WIN_ARG,
        })?;
    let payout = event.args[PAYOUT_ARG]
        .as_uint()
        .ok_or(DecodeError::ArgumentMismatch {
            event: FLIP_RESULT.name,
            index: PAYOUT_ARG,
        })?;
    Ok(FlipOutcome { win, payout })
}

pub fn decode_withdrawn(log: Option<&ReceiptLog>) -> Result<WithdrawnEvent, DecodeError> {
    let event = abi::normalize(log.ok_or(DecodeError::MissingLog)?)?;
    if event.schema != &WITHDRAWN {
        return Err(DecodeError::UnexpectedEvent {
            expected: WITHDRAWN.name,
            found: event.schema.name,
        });
    }
    let owner = event.args[WITHDRAWN_OWNER_ARG]
        .as_address()
        .ok_or(DecodeError::ArgumentMismatch {
            event: WITHDRAWN.name,
            index: WITHDRAWN_OWNER_ARG,
        })?;
    let amount = event.args[WITHDRAWN_AMOUNT_ARG]
        .as_uint()
        .ok_or(DecodeError::ArgumentMismatch {
            event: WITHDRAWN.name,
            index: WITHDRAWN_AMOUNT_ARG,
        })?;
    Ok(WithdrawnEvent { owner, amount })
}

/// What the user is told about a confirmed flip. `Unknown` means the
/// transaction went through but its event could not be read; it is never a
/// loss.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Settlement {
    Won { payout: U256 },
    Lost,
    Unknown { reason: DecodeError },
}

impl From<Result<FlipOutcome, DecodeError>> for Settlement {
    fn from(decoded: Result<FlipOutcome, DecodeError>) -> Self {
        match decoded {
            Ok(FlipOutcome { win: true, payout }) => Settlement::Won { payout },
            Ok(FlipOutcome { win: false, .. }) => Settlement::Lost,
            Err(reason) => Settlement::Unknown { reason },
        }
    }
}

impl Settlement {
    pub fn message(&self, symbol: &str) -> String {
        match self {
            Settlement::Won { payout } => {
                format!("You won! Payout: {} {symbol}", format_amount(*payout))
            }
            Settlement::Lost => "You lost. Better luck next time!".to_string(),
            Settlement::Unknown { .. } => {
                "Flip submitted, but the outcome could not be read".to_string()
            }
        }
    }
}
