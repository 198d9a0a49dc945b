//! Trade executor: quotes a swap, bounds it with the slippage tolerance,
//! and signs/submits it through the router with the gas-price policy.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use alloy::{
    primitives::{
        Address, U256,
        utils::format_units,
    },
    providers::Provider,
};
use color_eyre::eyre::{self, OptionExt as _, WrapErr as _, bail};
use tracing::{debug, error, info, instrument};

use crate::abi::IDexRouter;

/// Hard ceiling on the slippage tolerance, in basis points. Anything at or
/// above 50% would permit a pathological near-zero minimum output.
pub const MAX_SLIPPAGE_BPS: u64 = 5_000;

/// Execution window granted to a submitted swap, consistent with the
/// assumed validity of the quote.
pub const SWAP_DEADLINE: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Buy,
    Sell,
}

/// Everything needed to build one swap transaction. Computed fresh per
/// attempt, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwapIntent {
    pub direction: Direction,
    pub amount_in: U256,
    pub path: [Address; 2],
    pub min_output: U256,
    pub deadline_ms: U256,
}

pub struct TradeExecutor<P> {
    router: IDexRouter::IDexRouterInstance<P>,
    account: Address,
    token: Address,
    wnative: Address,
    slippage_bps: u64,
    gas_price_multiplier_pct: u64,
}

impl<P: Provider> TradeExecutor<P> {
    pub fn new(
        router: Address,
        provider: P,
        account: Address,
        token: Address,
        wnative: Address,
        slippage_bps: u64,
        gas_price_multiplier_pct: u64,
    ) -> Self {
        Self {
            router: IDexRouter::new(router, provider),
            account,
            token,
            wnative,
            slippage_bps,
            gas_price_multiplier_pct,
        }
    }

    /// Quotes, builds, signs and submits one swap.
    ///
    /// Returns `Ok(true)` only on a success receipt status. Submission
    /// transport errors and reverts are reported as `Ok(false)` so the
    /// caller decides whether to retry; quote/build failures surface as
    /// errors and are never retried here (avoids duplicate submissions).
    #[instrument(skip(self), fields(account = %self.account))]
    pub async fn execute_swap(&self, direction: Direction, amount: U256) -> eyre::Result<bool> {
        let intent = self.build_intent(direction, amount).await?;
        info!(
            min = %in_ether(intent.min_output),
            spend = %in_ether(intent.amount_in),
            "bounded swap output"
        );

        let gas_price = self.proposed_gas_price().await?;

        let pending = match intent.direction {
            Direction::Buy => {
                self.router
                    .swapExactETHForTokens(
                        intent.min_output,
                        intent.path.to_vec(),
                        self.account,
                        intent.deadline_ms,
                    )
                    .value(intent.amount_in)
                    .gas_price(gas_price)
                    .send()
                    .await
            }
            Direction::Sell => {
                self.router
                    .swapExactTokensForETH(
                        intent.amount_in,
                        intent.min_output,
                        intent.path.to_vec(),
                        self.account,
                        intent.deadline_ms,
                    )
                    .gas_price(gas_price)
                    .send()
                    .await
            }
        };

        let pending = match pending {
            Ok(pending) => pending,
            Err(error) => {
                error!(%error, "swap submission failed");
                return Ok(false);
            }
        };

        let hash = *pending.tx_hash();
        info!(tx.hash = %hash, "swap submitted");

        let receipt = match pending.get_receipt().await {
            Ok(receipt) => receipt,
            Err(error) => {
                error!(tx.hash = %hash, %error, "failed awaiting swap receipt");
                return Ok(false);
            }
        };

        if receipt.status() {
            info!(tx.hash = %hash, "swap successful");
            Ok(true)
        } else {
            error!(tx.hash = %hash, "swap reverted");
            Ok(false)
        }
    }

    async fn build_intent(&self, direction: Direction, amount: U256) -> eyre::Result<SwapIntent> {
        let path = match direction {
            Direction::Buy => [self.wnative, self.token],
            Direction::Sell => [self.token, self.wnative],
        };

        let quoted = self.quote(amount, path).await?;
        let min_output = min_output_after_slippage(quoted, self.slippage_bps)?;
        debug!(
            quoted = %in_ether(quoted),
            min = %in_ether(min_output),
            "quoted expected output"
        );

        Ok(SwapIntent {
            direction,
            amount_in: amount,
            path,
            min_output,
            deadline_ms: swap_deadline(SystemTime::now(), SWAP_DEADLINE),
        })
    }

    /// Expected output for swapping `amount` along `path`, from the
    /// router's own `getAmountsOut`.
    pub async fn quote(&self, amount: U256, path: [Address; 2]) -> eyre::Result<U256> {
        let amounts = self
            .router
            .getAmountsOut(amount, path.to_vec())
            .call()
            .await
            .wrap_err("getAmountsOut quote failed")?;
        amounts
            .last()
            .copied()
            .ok_or_eyre("router returned an empty quote")
    }

    /// Current network gas price scaled by the configured multiplier, a
    /// cost/latency trade-off to improve inclusion probability.
    async fn proposed_gas_price(&self) -> eyre::Result<u128> {
        let current = self
            .router
            .provider()
            .get_gas_price()
            .await
            .wrap_err("gas price read failed")?;
        let proposed = current.saturating_mul(u128::from(self.gas_price_multiplier_pct)) / 100;
        debug!(current, proposed, "gas price policy applied");
        Ok(proposed)
    }
}

/// `quoted - quoted * slippage_bps / 10_000`, exact in integer arithmetic.
pub fn min_output_after_slippage(quoted: U256, slippage_bps: u64) -> eyre::Result<U256> {
    if slippage_bps >= MAX_SLIPPAGE_BPS {
        bail!("slippage of {slippage_bps} bps is at or above the 50% ceiling");
    }
    Ok(quoted - quoted * U256::from(slippage_bps) / U256::from(10_000u64))
}

/// Unix-epoch-millisecond deadline `window` past `now`.
pub fn swap_deadline(now: SystemTime, window: Duration) -> U256 {
    let now_ms = now
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_millis();
    U256::from(now_ms + window.as_millis())
}

fn in_ether(amount: U256) -> String {
    format_units(amount, 18).unwrap_or_else(|_| amount.to_string())
}
