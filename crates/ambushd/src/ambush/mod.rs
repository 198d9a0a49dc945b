use std::time::Duration;

use alloy::{
    primitives::{U256, utils::format_units},
    providers::ProviderBuilder,
    signers::local::PrivateKeySigner,
};
use ambush_core::{
    abi::IDexFactory,
    allowance::{AllowanceManager, Erc20Token, TokenOps as _},
    chain::Chain,
    config::Config,
    endpoint::RpcEndpoint,
    events::LiquidityEvent,
    executor::{Direction, TradeExecutor},
    monitor::{self, MonitorOutcome, MonitorState},
    poller::{self, PASS_DELAY},
    retry::RetryPolicy,
    scanner::Scanner,
};
use color_eyre::eyre::{self, OptionExt as _, WrapErr as _, eyre};
use tokio::{
    select,
    sync::mpsc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Per-height fetch retry while an endpoint catches up to a new head.
const BLOCK_FETCH_RETRY: RetryPolicy = RetryPolicy::new(50, Duration::from_millis(100));

/// Pause before a failed scan range is retried.
const SCAN_RETRY_BACKOFF: Duration = Duration::from_secs(1);

const CHANNEL_CAPACITY: usize = 64;

pub(super) struct Ambush {
    shutdown_token: CancellationToken,
    cfg: Config,
    poller_handle: poller::Handle,
    monitor_handle: monitor::Handle,
    liquidity_rx: mpsc::Receiver<LiquidityEvent>,
}

impl Ambush {
    pub fn new(cfg: Config, shutdown_token: CancellationToken) -> eyre::Result<Self> {
        let chain = Chain::new(&cfg.chain)?;
        info!(%chain, endpoints = cfg.rpc_urls.len(), "initialized chain info from config");

        let endpoints = cfg
            .rpc_urls
            .iter()
            .map(|url| RpcEndpoint::connect(url))
            .collect::<eyre::Result<Vec<_>>>()?;
        // the first endpoint doubles as the scan endpoint
        let scan_reader = RpcEndpoint::connect(&cfg.rpc_urls[0])?;

        let deadline = Instant::now() + cfg.monitor_duration();
        let (head_tx, head_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (event_tx, liquidity_rx) = mpsc::channel(CHANNEL_CAPACITY);

        let poller_handle = poller::Builder {
            endpoints,
            head_tx,
            deadline,
            pass_delay: PASS_DELAY,
            shutdown_token: shutdown_token.child_token(),
        }
        .build();

        let scanner = Scanner {
            reader: scan_reader,
            router: cfg.router,
            token: cfg.token,
            wnative: cfg.wnative,
            large_liquidity_threshold: cfg.large_liquidity_threshold,
            retry: BLOCK_FETCH_RETRY,
            event_tx,
        };

        let monitor_handle = monitor::Builder {
            scanner,
            head_rx,
            deadline,
            respond_to_events: cfg.respond_to_events,
            large_tx_only: cfg.monitor_only_large_txs,
            retry_backoff: SCAN_RETRY_BACKOFF,
            shutdown_token: shutdown_token.child_token(),
        }
        .build();

        Ok(Self {
            shutdown_token,
            cfg,
            poller_handle,
            monitor_handle,
            liquidity_rx,
        })
    }

    pub async fn run(mut self) -> eyre::Result<()> {
        info!(
            window = %humantime::format_duration(self.cfg.monitor_duration()),
            respond = self.cfg.respond_to_events,
            "🔭 monitoring started"
        );

        let outcome: Option<MonitorOutcome> = loop {
            select! {
                biased;

                () = self.shutdown_token.cancelled() => break None,

                Some(event) = self.liquidity_rx.recv() => {
                    info!(%event, "liquidity event observed");
                }

                outcome = &mut self.monitor_handle => break Some(outcome?),
            }
        };

        // the scanner may have emitted an event in the same cycle it returned
        while let Ok(event) = self.liquidity_rx.try_recv() {
            info!(%event, "liquidity event observed");
        }

        if let Err(e) = self.poller_handle.shutdown().await {
            warn!(%e, "head poller did not shut down cleanly");
        }

        match outcome {
            Some(outcome) if outcome.state == MonitorState::Found => {
                info!(tx.hash = ?outcome.tx_hash, "💧 liquidity found, responding");
                self.respond().await?;
            }
            Some(outcome) => {
                info!(
                    state = ?outcome.state,
                    next_height = ?outcome.next_height,
                    "monitoring ended without a trade"
                );
            }
            None => {
                let _ = self.monitor_handle.shutdown().await;
                info!("shutdown requested before the window ended");
            }
        }

        Ok(())
    }

    /// The trade response to a matched liquidity event: buy the watched
    /// token, then line up the sell side (balance, approval, quote).
    #[instrument(skip(self))]
    async fn respond(&self) -> eyre::Result<()> {
        let cfg = &self.cfg;
        let key = cfg
            .private_key
            .as_deref()
            .ok_or_eyre("responding requires AMBUSH_PRIVATE_KEY")?;
        // parse failure details are discarded so key material never leaks
        let signer: PrivateKeySigner = key
            .parse()
            .map_err(|_| eyre!("signing key is not a valid secp256k1 key"))?;
        let account = signer.address();

        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect(&cfg.rpc_urls[0])
            .await
            .wrap_err("failed connecting the trade endpoint")?;

        let factory = IDexFactory::new(cfg.factory, provider.clone());
        match factory.getPair(cfg.token, cfg.wnative).call().await {
            Ok(pair) => info!(%pair, "trading pair resolved"),
            Err(error) => warn!(%error, "pair lookup failed"),
        }

        let executor = TradeExecutor::new(
            cfg.router,
            provider.clone(),
            account,
            cfg.token,
            cfg.wnative,
            cfg.slippage_bps,
            cfg.gas_price_multiplier_pct,
        );

        if !executor
            .execute_swap(Direction::Buy, cfg.trade_amount)
            .await?
        {
            error!("buy trade did not succeed");
            return Ok(());
        }

        let token = Erc20Token::new(cfg.token, provider.clone());
        let balance = token.balance_of(account).await?;
        let symbol = token.symbol().await.unwrap_or_else(|_| "TOKEN".to_string());
        info!(balance = %in_ether(balance), symbol = %symbol, "post-buy token balance");

        // sell-side precondition; a failed approval is fatal
        AllowanceManager::new(token, account, cfg.router)
            .ensure_allowance(balance)
            .await
            .wrap_err("sell-side spend approval failed")?;

        let quote = executor.quote(balance, [cfg.token, cfg.wnative]).await?;
        info!(expected = %in_ether(quote), "sell quote for the full balance");

        Ok(())
    }
}

fn in_ether(amount: U256) -> String {
    format_units(amount, 18).unwrap_or_else(|_| amount.to_string())
}
