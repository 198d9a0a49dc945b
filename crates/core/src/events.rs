use std::{
    fmt::{self, Display},
    time::SystemTime,
};

use alloy::primitives::{
    Address, B256, U256,
    utils::format_units,
};

/// Emitted by the head poller whenever an endpoint reports a chain head
/// strictly above the last known one. Consumed once by the monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainHeadEvent {
    pub endpoint: String,
    pub height: u64,
    pub observed_at: SystemTime,
}

/// A classified liquidity-provisioning call found by the block scanner.
/// `matched` is true when the call references the watched token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiquidityEvent {
    pub tx_hash: B256,
    pub block_height: u64,
    pub token: Address,
    pub counter_asset: Address,
    pub token_amount: U256,
    pub counter_amount: U256,
    pub matched: bool,
}

impl Display for LiquidityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - liquidity added [{} {} - {} {}] at block {}",
            self.tx_hash,
            in_ether(self.token_amount),
            self.token,
            in_ether(self.counter_amount),
            self.counter_asset,
            self.block_height,
        )
    }
}

/// Human-readable 18-decimal rendering, used only at the logging boundary.
fn in_ether(amount: U256) -> String {
    format_units(amount, 18).unwrap_or_else(|_| amount.to_string())
}
