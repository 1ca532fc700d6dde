//! Command-line flags and the optional JSON config file.

use crate::{
    betting::{
        BetMenu,
        BetPolicy,
        PayoutMultiplier,
    },
    format::{
        self,
        parse_amount,
    },
    gateway::ChainParams,
    local_chain::{
        DEFAULT_DEALER_FUNDS_UNITS,
        DEFAULT_PLAYER_FUNDS_UNITS,
        FOREIGN_CHAIN_ID,
        LocalChainConfig,
        LogShape,
    },
};
use alloy_primitives::{
    Address,
    U256,
    address,
};
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use serde::Deserialize;
use std::{
    fs,
    path::{
        Path,
        PathBuf,
    },
};

pub const DEFAULT_CONTRACT: Address = address!("80197d71018fa03af7b095a96e9179c28f87c96c");
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Everything the controller needs to know about the deployed game.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GameConfig {
    pub chain: ChainParams,
    pub contract: Address,
    pub menu: BetMenu,
    pub policy: BetPolicy,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            chain: ChainParams::default(),
            contract: DEFAULT_CONTRACT,
            menu: BetMenu::default(),
            policy: BetPolicy::default(),
        }
    }
}

/// How the in-process wallet and contract start out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationOptions {
    pub seed: u64,
    pub parsed_logs: bool,
    pub wrong_network: bool,
    pub unknown_chain: bool,
    pub reject_add_chain: bool,
    pub not_owner: bool,
    pub dealer_funds: U256,
    pub wallet_funds: U256,
}

impl Default for SimulationOptions {
    fn default() -> Self {
        Self {
            seed: 7,
            parsed_logs: false,
            wrong_network: false,
            unknown_chain: false,
            reject_add_chain: false,
            not_owner: false,
            dealer_funds: format::units(DEFAULT_DEALER_FUNDS_UNITS),
            wallet_funds: format::units(DEFAULT_PLAYER_FUNDS_UNITS),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppConfig {
    pub game: GameConfig,
    pub log_dir: PathBuf,
    pub simulation: SimulationOptions,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            game: GameConfig::default(),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            simulation: SimulationOptions::default(),
        }
    }
}

impl AppConfig {
    pub fn local_chain(&self) -> LocalChainConfig {
        let sim = &self.simulation;
        let defaults = LocalChainConfig::default();
        let owner = if sim.not_owner {
            Address::repeat_byte(0x0e)
        } else {
            defaults.player
        };
        let start_chain_id = if sim.wrong_network || sim.unknown_chain {
            FOREIGN_CHAIN_ID
        } else {
            self.game.chain.chain_id
        };
        LocalChainConfig {
            target: self.game.chain.clone(),
            contract: self.game.contract,
            owner,
            player_funds: sim.wallet_funds,
            dealer_funds: sim.dealer_funds,
            payout_multiplier: self.game.policy.multiplier,
            start_chain_id,
            wallet_knows_target: !sim.unknown_chain,
            approve_add_chain: !sim.reject_add_chain,
            log_shape: if sim.parsed_logs {
                LogShape::Parsed
            } else {
                LogShape::Raw
            },
            seed: sim.seed,
            ..defaults
        }
    }
}

/// On-disk config. Every field is optional; amounts are decimal strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigFile {
    pub chain: Option<ChainParams>,
    pub contract: Option<Address>,
    pub bet_menu: Option<Vec<String>>,
    pub payout_multiplier: Option<String>,
    pub collapse_threshold: Option<String>,
}

impl ConfigFile {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .wrap_err_with(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&raw)
            .wrap_err_with(|| format!("Failed to parse config {}", path.display()))
    }

    /// Overlays the file onto `game`, validating menu and policy values.
    pub fn apply(self, game: &mut GameConfig) -> Result<()> {
        if let Some(chain) = self.chain {
            if chain.decimals != format::DECIMALS {
                return Err(eyre!(
                    "Unsupported chain.decimals {}: amounts are handled with {} decimals",
                    chain.decimals,
                    format::DECIMALS
                ));
            }
            game.chain = chain;
        }
        if let Some(contract) = self.contract {
            game.contract = contract;
        }
        if let Some(entries) = self.bet_menu {
            game.menu = BetMenu::parse(&entries[..]).wrap_err("Invalid bet_menu")?;
        }
        if let Some(text) = self.payout_multiplier {
            game.policy.multiplier = PayoutMultiplier::parse(&text).ok_or_else(|| {
                eyre!("Invalid payout_multiplier {text:?}: expected a decimal >= 1 with at most 4 fractional digits")
            })?;
        }
        if let Some(text) = self.collapse_threshold {
            game.policy.collapse_threshold = parse_amount(&text)
                .ok_or_else(|| eyre!("Invalid collapse_threshold {text:?}"))?;
        }
        Ok(())
    }
}

pub fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).into_owned())
}

pub fn usage() -> String {
    format!(
        "Usage: coinflip [--config <path>] [--log-dir <path>] [--seed <n>]\n\
         [--parsed-logs] [--wrong-network | --unknown-chain] [--reject-add-chain]\n\
         [--not-owner] [--dealer-funds <amt>] [--wallet-funds <amt>]\n\
         \n\
         Flags:\n\
           --config <path>       JSON file overriding chain, contract, bet menu and policy\n\
           --log-dir <path>      Directory for rolling log files (default ./{})\n\
           --seed <n>            Seed for the simulated coin\n\
           --parsed-logs         Return receipt logs already parsed instead of raw topics/data\n\
           --wrong-network       Start the wallet on another chain\n\
           --unknown-chain       Start on another chain the wallet must add before switching\n\
           --reject-add-chain    Decline the add-network prompt\n\
           --not-owner           Play from an account that does not own the contract\n\
           --dealer-funds <amt>  Starting contract balance (default {})\n\
           --wallet-funds <amt>  Starting wallet balance (default {})",
        DEFAULT_LOG_DIR, DEFAULT_DEALER_FUNDS_UNITS, DEFAULT_PLAYER_FUNDS_UNITS,
    )
}

/// Parsed command line. `None` means `--help` was requested.
pub fn parse_args<I>(args: I) -> Result<Option<AppConfig>>
where
    I: IntoIterator<Item = String>,
{
    let mut args = args.into_iter();
    let mut config = AppConfig::default();
    let mut config_path: Option<PathBuf> = None;

    fn amount_arg(flag: &str, value: Option<String>) -> Result<U256> {
        let value = value.ok_or_else(|| eyre!("{flag} requires an amount argument"))?;
        parse_amount(&value).ok_or_else(|| eyre!("{flag}: invalid amount {value:?}"))
    }

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let path = args
                    .next()
                    .ok_or_else(|| eyre!("--config requires a path argument"))?;
                if config_path.is_some() {
                    return Err(eyre!("--config may only be specified once"));
                }
                config_path = Some(expand_path(&path));
            }
            "--log-dir" => {
                let path = args
                    .next()
                    .ok_or_else(|| eyre!("--log-dir requires a path argument"))?;
                config.log_dir = expand_path(&path);
            }
            "--seed" => {
                let seed = args
                    .next()
                    .ok_or_else(|| eyre!("--seed requires a number"))?;
                config.simulation.seed = seed
                    .parse()
                    .wrap_err_with(|| format!("--seed: invalid number {seed:?}"))?;
            }
            "--parsed-logs" => config.simulation.parsed_logs = true,
            "--wrong-network" => config.simulation.wrong_network = true,
            "--unknown-chain" => config.simulation.unknown_chain = true,
            "--reject-add-chain" => config.simulation.reject_add_chain = true,
            "--not-owner" => config.simulation.not_owner = true,
            "--dealer-funds" => {
                config.simulation.dealer_funds = amount_arg("--dealer-funds", args.next())?;
            }
            "--wallet-funds" => {
                config.simulation.wallet_funds = amount_arg("--wallet-funds", args.next())?;
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(eyre!("Unknown argument: {other}")),
        }
    }

    if config.simulation.wrong_network && config.simulation.unknown_chain {
        return Err(eyre!(
            "--wrong-network and --unknown-chain are exclusive; choose one"
        ));
    }
    if let Some(path) = config_path {
        ConfigFile::load(&path)?.apply(&mut config.game)?;
    }
    Ok(Some(config))
}
