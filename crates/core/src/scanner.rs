//! Block-range scanner: fetches blocks, decodes router calldata and
//! classifies liquidity-provisioning calls against the watched token.

use alloy::{
    primitives::{Address, B256, U256},
    sol_types::SolInterface as _,
};
use color_eyre::eyre::{self, WrapErr as _};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::{
    abi::IDexRouter::IDexRouterCalls,
    endpoint::{ChainRead, TxRecord},
    events::LiquidityEvent,
    retry::RetryPolicy,
};

/// Result of scanning one inclusive block range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanOutcome {
    pub matched: bool,
    pub last_completed: Option<u64>,
    pub matched_hash: Option<B256>,
}

pub struct Scanner<R> {
    pub reader: R,
    pub router: Address,
    pub token: Address,
    pub wnative: Address,
    pub large_liquidity_threshold: U256,
    pub retry: RetryPolicy,
    pub event_tx: mpsc::Sender<LiquidityEvent>,
}

impl<R: ChainRead> Scanner<R> {
    /// Scans `[from, to]` ascending. Every height is either fully scanned
    /// or the whole call fails; a height that never becomes available
    /// within the retry budget is a range failure, so the caller can retry
    /// from the same pointer.
    ///
    /// In respond mode the scan returns after the first block containing a
    /// match (that block is still classified to completion); in observe
    /// mode it continues through the range.
    #[instrument(skip(self), fields(token = %self.token))]
    pub async fn scan(
        &self,
        from: u64,
        to: u64,
        respond_mode: bool,
        large_tx_only: bool,
    ) -> eyre::Result<ScanOutcome> {
        let mut outcome = ScanOutcome {
            matched: false,
            last_completed: None,
            matched_hash: None,
        };

        for height in from..=to {
            // header first: a cheap probe that the endpoint has the height
            let stamp = self
                .retry
                .run_until_some("block header", || self.reader.header(height))
                .await
                .wrap_err_with(|| format!("block {height} header never became available"))?;
            debug!(
                block.height = height,
                block.timestamp = stamp.timestamp,
                "fetched block header"
            );

            let body = self
                .retry
                .run_until_some("block body", || self.reader.block_with_txs(height))
                .await
                .wrap_err_with(|| format!("block {height} body never became available"))?;

            for tx in &body.transactions {
                if tx.to != Some(self.router) {
                    continue;
                }
                self.process_router_tx(height, tx, large_tx_only, &mut outcome)
                    .await;
            }

            outcome.last_completed = Some(height);
            if outcome.matched && respond_mode {
                break;
            }
        }

        Ok(outcome)
    }

    async fn process_router_tx(
        &self,
        height: u64,
        tx: &TxRecord,
        large_tx_only: bool,
        outcome: &mut ScanOutcome,
    ) {
        // a single undecodable transaction must not abort the block scan
        let call = match IDexRouterCalls::abi_decode(&tx.input) {
            Ok(call) => call,
            Err(error) => {
                debug!(tx.hash = %tx.hash, %error, "skipping undecodable router call");
                return;
            }
        };

        let Some(event) = self.classify(height, tx.hash, &call) else {
            return;
        };

        if event.matched {
            info!(%event, "💧 liquidity added for watched token");
            if !outcome.matched {
                outcome.matched = true;
                outcome.matched_hash = Some(tx.hash);
            }
            if self.event_tx.send(event).await.is_err() {
                warn!("liquidity event receiver dropped");
            }
        } else if !large_tx_only {
            info!(%event, "liquidity added for another token");
        } else if event.counter_amount > self.large_liquidity_threshold {
            info!(%event, "large liquidity added for another token");
        }
    }

    /// Maps a decoded router call to a [`LiquidityEvent`]. Non-liquidity
    /// calls yield `None`.
    fn classify(&self, height: u64, hash: B256, call: &IDexRouterCalls) -> Option<LiquidityEvent> {
        match call {
            IDexRouterCalls::addLiquidityETH(call) => Some(LiquidityEvent {
                tx_hash: hash,
                block_height: height,
                token: call.token,
                counter_asset: self.wnative,
                token_amount: call.amountTokenDesired,
                counter_amount: call.amountETHMin,
                matched: call.token == self.token,
            }),
            IDexRouterCalls::addLiquidity(call) => {
                // watched side first when the match is on tokenB
                let (token, counter_asset, token_amount, counter_amount) =
                    if call.tokenB == self.token {
                        (call.tokenB, call.tokenA, call.amountBDesired, call.amountADesired)
                    } else {
                        (call.tokenA, call.tokenB, call.amountADesired, call.amountBDesired)
                    };
                Some(LiquidityEvent {
                    tx_hash: hash,
                    block_height: height,
                    token,
                    counter_asset,
                    token_amount,
                    counter_amount,
                    matched: call.tokenA == self.token || call.tokenB == self.token,
                })
            }
            _ => None,
        }
    }
}
