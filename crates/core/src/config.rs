use std::{fmt, time::Duration};

use alloy::primitives::{Address, U256};
use color_eyre::eyre::{self, bail};
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::Deserialize;

use crate::executor::MAX_SLIPPAGE_BPS;

/// Immutable run configuration, merged from `ambush.yaml` and `AMBUSH_`
/// environment variables. Constructed once at startup and passed into the
/// components; no module-level state.
#[derive(Clone, Deserialize)]
pub struct Config {
    /// Chain name, e.g. "bsc".
    pub chain: String,

    /// Ordered chain-read endpoints. The first entry doubles as the scan
    /// and trade endpoint.
    pub rpc_urls: Vec<String>,

    /// Router contract exposing the liquidity and swap entry points.
    pub router: Address,

    /// Factory contract resolving pair addresses.
    pub factory: Address,

    /// The watched token.
    pub token: Address,

    /// Wrapped native counter asset (e.g. WBNB).
    pub wnative: Address,

    /// When true, the first matching liquidity event triggers a buy.
    #[serde(default)]
    pub respond_to_events: bool,

    /// Observe-only digest filter: log non-target liquidity adds only when
    /// their native-side amount exceeds `large_liquidity_threshold`.
    #[serde(default)]
    pub monitor_only_large_txs: bool,

    /// Native-side amount (wei) above which a liquidity add counts as large.
    #[serde(default)]
    pub large_liquidity_threshold: U256,

    /// Native amount (wei) spent on the buy.
    #[serde(default)]
    pub trade_amount: U256,

    /// Length of the monitoring window.
    pub monitor_duration_secs: u64,

    /// Slippage tolerance in basis points. Must stay below 5000 (50%).
    pub slippage_bps: u64,

    /// Gas price safety multiplier in percent, e.g. 155 for 1.55x.
    pub gas_price_multiplier_pct: u64,

    /// Hex-encoded signing key, expected via `AMBUSH_PRIVATE_KEY`.
    /// Held in memory only and redacted from all output.
    #[serde(default)]
    pub private_key: Option<String>,
}

impl Config {
    /// Load configuration from `ambush.yaml` and the environment, then
    /// validate it.
    pub fn load() -> eyre::Result<Self> {
        let config: Config = Figment::new()
            .merge(Yaml::file("ambush.yaml"))
            .merge(Env::prefixed("AMBUSH_"))
            .extract()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> eyre::Result<()> {
        if self.rpc_urls.is_empty() {
            bail!("at least one rpc endpoint is required");
        }
        if self.slippage_bps >= MAX_SLIPPAGE_BPS {
            bail!(
                "slippage_bps is {}, must stay below {MAX_SLIPPAGE_BPS} (50%)",
                self.slippage_bps
            );
        }
        if self.gas_price_multiplier_pct <= 100 {
            bail!(
                "gas_price_multiplier_pct is {}, must exceed 100 to improve inclusion",
                self.gas_price_multiplier_pct
            );
        }
        if self.monitor_duration_secs == 0 {
            bail!("monitor_duration_secs must be positive");
        }
        if self.respond_to_events {
            if self.private_key.is_none() {
                bail!("respond_to_events requires AMBUSH_PRIVATE_KEY");
            }
            if self.trade_amount.is_zero() {
                bail!("respond_to_events requires a non-zero trade_amount");
            }
        }
        Ok(())
    }

    pub fn monitor_duration(&self) -> Duration {
        Duration::from_secs(self.monitor_duration_secs)
    }
}

// Manual Debug so the signing key never reaches a log line.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("chain", &self.chain)
            .field("rpc_urls", &self.rpc_urls)
            .field("router", &self.router)
            .field("factory", &self.factory)
            .field("token", &self.token)
            .field("wnative", &self.wnative)
            .field("respond_to_events", &self.respond_to_events)
            .field("monitor_only_large_txs", &self.monitor_only_large_txs)
            .field("large_liquidity_threshold", &self.large_liquidity_threshold)
            .field("trade_amount", &self.trade_amount)
            .field("monitor_duration_secs", &self.monitor_duration_secs)
            .field("slippage_bps", &self.slippage_bps)
            .field("gas_price_multiplier_pct", &self.gas_price_multiplier_pct)
            .field(
                "private_key",
                &self.private_key.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}
