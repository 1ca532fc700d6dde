use crate::{
    abi::DecodeError,
    betting::{
        IneligibleReason,
        SelectionError,
    },
};

/// Everything a user action can fail with. Gateway failures are mapped into
/// one of these at the call site so the UI can word them.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum CoinFlipError {
    #[error("wallet connection failed: {0}")]
    Connection(String),
    #[error("wrong network: switch to chain {expected:#x} to play")]
    NetworkMismatch { expected: u64 },
    #[error("adding the network was declined")]
    ChainAddRejected,
    #[error("This bet amount is no longer available due to dealer balance")]
    InsufficientDealerFunds,
    #[error("Insufficient balance in your wallet for this bet")]
    InsufficientUserFunds,
    #[error("transaction failed: {0}")]
    Submission(String),
    #[error("could not decode settlement: {0}")]
    Decode(#[from] DecodeError),
    #[error("only the contract owner can withdraw")]
    Authorization,
    #[error("a flip is already in progress")]
    FlipInProgress,
    #[error("invalid amount {0:?}")]
    InvalidAmount(String),
    #[error("bet size is not on the menu")]
    NotOnMenu,
}

impl From<IneligibleReason> for CoinFlipError {
    fn from(reason: IneligibleReason) -> Self {
        match reason {
            IneligibleReason::InsufficientDealerFunds => CoinFlipError::InsufficientDealerFunds,
            IneligibleReason::InsufficientUserFunds => CoinFlipError::InsufficientUserFunds,
        }
    }
}

impl From<SelectionError> for CoinFlipError {
    fn from(err: SelectionError) -> Self {
        match err {
            SelectionError::NotOnMenu => CoinFlipError::NotOnMenu,
            SelectionError::Ineligible(reason) => reason.into(),
        }
    }
}

impl CoinFlipError {
    /// Bet-validation failures are shown as a blocking alert; everything
    /// else on the flip path resets inline.
    pub fn is_bet_validation(&self) -> bool {
        matches!(
            self,
            CoinFlipError::InsufficientDealerFunds | CoinFlipError::InsufficientUserFunds
        )
    }
}
