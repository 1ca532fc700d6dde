pub mod abi;
pub mod betting;
pub mod config;
pub mod controller;
pub mod error;
pub mod format;
pub mod gateway;
pub mod local_chain;
pub mod outcome;
pub mod session;
pub mod ui;

pub use controller::{
    AppController,
    AppSnapshot,
};
pub use error::CoinFlipError;
pub use gateway::ChainGateway;
