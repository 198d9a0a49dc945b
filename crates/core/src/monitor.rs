//! Monitoring state machine: drives the block scanner over time, owns the
//! scan pointer, and absorbs scan-range failures with a backoff retry.

use std::{pin::Pin, time::Duration};

use alloy::primitives::B256;
use color_eyre::eyre::{self, WrapErr as _};
use tokio::{select, sync::mpsc, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::{endpoint::ChainRead, events::ChainHeadEvent, scanner::Scanner};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorState {
    Idle,
    Scanning,
    Found,
    TimedOut,
}

/// The next unit of work, owned exclusively by the monitor.
/// Invariant: `from <= to + 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockScanRange {
    pub from: u64,
    pub to: u64,
    pub epoch: u64,
}

/// Terminal result of one monitoring session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorOutcome {
    pub state: MonitorState,
    /// The scan pointer when the session ended: the next height that would
    /// have been scanned.
    pub next_height: Option<u64>,
    pub tx_hash: Option<B256>,
}

pub struct Builder<R> {
    pub scanner: Scanner<R>,
    pub head_rx: mpsc::Receiver<ChainHeadEvent>,
    pub deadline: Instant,
    pub respond_to_events: bool,
    pub large_tx_only: bool,
    pub retry_backoff: Duration,
    pub shutdown_token: CancellationToken,
}

impl<R: ChainRead + 'static> Builder<R> {
    pub fn build(self) -> Handle {
        let Self {
            scanner,
            head_rx,
            deadline,
            respond_to_events,
            large_tx_only,
            retry_backoff,
            shutdown_token,
        } = self;

        let worker = Worker {
            scanner,
            head_rx,
            deadline,
            respond_to_events,
            large_tx_only,
            retry_backoff,
            shutdown_token: shutdown_token.clone(),
        };

        let worker_handle = tokio::task::spawn(worker.run());

        Handle {
            shutdown_token,
            worker_handle: Some(worker_handle),
        }
    }
}

pub struct Handle {
    shutdown_token: CancellationToken,
    worker_handle: Option<tokio::task::JoinHandle<eyre::Result<MonitorOutcome>>>,
}

impl Handle {
    pub async fn shutdown(&mut self) -> eyre::Result<MonitorOutcome> {
        self.shutdown_token.cancel();
        self.worker_handle
            .take()
            .expect("shutdown must not be called twice")
            .await
            .wrap_err("monitor task panicked")?
    }
}

// Awaiting the handle deals with the Worker's result
impl Future for Handle {
    type Output = eyre::Result<MonitorOutcome>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        use futures::future::FutureExt as _;

        let task = self
            .worker_handle
            .as_mut()
            .expect("monitor handle must not be polled after completion");

        task.poll_unpin(cx).map(|result| match result {
            Ok(worker_res) => worker_res,
            Err(e) => Err(e).wrap_err("monitor task panicked"),
        })
    }
}

struct Worker<R> {
    scanner: Scanner<R>,
    head_rx: mpsc::Receiver<ChainHeadEvent>,
    deadline: Instant,
    respond_to_events: bool,
    large_tx_only: bool,
    retry_backoff: Duration,
    shutdown_token: CancellationToken,
}

impl<R: ChainRead> Worker<R> {
    /// Idle → Scanning → (Found | TimedOut). The scan pointer is
    /// monotonically non-decreasing and only advances over fully scanned
    /// heights; a failed range is retried from the same pointer.
    #[instrument(name = "monitor", skip(self), fields(respond = self.respond_to_events))]
    async fn run(mut self) -> eyre::Result<MonitorOutcome> {
        // pointer initializes to the first observed head
        let mut pointer: Option<u64> = None;
        let mut epoch: u64 = 0;
        // a failed range awaiting retry takes priority over new head events
        let mut pending: Option<BlockScanRange> = None;

        loop {
            // deadline is checked at the top of each cycle; a block scan in
            // progress always runs to completion
            if Instant::now() >= self.deadline {
                info!(?pointer, "⏰ monitoring window elapsed");
                return Ok(MonitorOutcome {
                    state: MonitorState::TimedOut,
                    next_height: pointer,
                    tx_hash: None,
                });
            }

            let range = match pending.take() {
                Some(range) => range,
                None => {
                    // Idle: wait for the head to advance past the pointer
                    let head = select! {
                        biased;

                        () = self.shutdown_token.cancelled() => {
                            info!("monitor received shutdown signal");
                            return Ok(MonitorOutcome {
                                state: MonitorState::TimedOut,
                                next_height: pointer,
                                tx_hash: None,
                            });
                        }

                        () = tokio::time::sleep_until(self.deadline) => continue,

                        head = self.head_rx.recv() => match head {
                            Some(head) => head,
                            None => {
                                info!("head event stream closed");
                                return Ok(MonitorOutcome {
                                    state: MonitorState::TimedOut,
                                    next_height: pointer,
                                    tx_hash: None,
                                });
                            }
                        },
                    };

                    let from = pointer.unwrap_or(head.height);
                    if head.height < from {
                        trace!(head.height, ?pointer, "stale head event");
                        continue;
                    }
                    epoch += 1;
                    BlockScanRange {
                        from,
                        to: head.height,
                        epoch,
                    }
                }
            };

            debug!(range.from, range.to, range.epoch, "scanning range");
            match self
                .scanner
                .scan(range.from, range.to, self.respond_to_events, self.large_tx_only)
                .await
            {
                Ok(outcome) => {
                    let next = outcome.last_completed.map_or(range.from, |h| h + 1);
                    pointer = Some(next);

                    if outcome.matched && self.respond_to_events {
                        info!(
                            tx.hash = ?outcome.matched_hash,
                            next_height = next,
                            "liquidity found, leaving the scan loop"
                        );
                        return Ok(MonitorOutcome {
                            state: MonitorState::Found,
                            next_height: pointer,
                            tx_hash: outcome.matched_hash,
                        });
                    }
                }
                Err(error) => {
                    // pointer untouched: the same range is retried so no
                    // block range is silently skipped
                    warn!(
                        range.from,
                        range.to,
                        %error,
                        "scan range failed, retrying after backoff"
                    );
                    pending = Some(range);
                    select! {
                        () = self.shutdown_token.cancelled() => {}
                        () = tokio::time::sleep(self.retry_backoff) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::{Address, U256};
    use tokio::sync::mpsc;

    use super::*;
    use crate::{
        events::LiquidityEvent,
        retry::RetryPolicy,
        testutil::{FakeChain, add_liquidity_eth_tx, block_with, empty_block, in_ether},
    };

    fn router() -> Address {
        Address::with_last_byte(0xAA)
    }

    fn watched() -> Address {
        Address::with_last_byte(0xBB)
    }

    struct Fixture {
        handle: Handle,
        head_tx: mpsc::Sender<ChainHeadEvent>,
        event_rx: mpsc::Receiver<LiquidityEvent>,
    }

    fn spawn_monitor(
        chain: FakeChain,
        window: Duration,
        respond_to_events: bool,
        retry_attempts: u32,
    ) -> Fixture {
        let (head_tx, head_rx) = mpsc::channel(16);
        let (event_tx, event_rx) = mpsc::channel(16);
        let scanner = Scanner {
            reader: chain,
            router: router(),
            token: watched(),
            wnative: Address::with_last_byte(0xCC),
            large_liquidity_threshold: U256::ZERO,
            retry: RetryPolicy::new(retry_attempts, Duration::from_millis(100)),
            event_tx,
        };
        let handle = Builder {
            scanner,
            head_rx,
            deadline: Instant::now() + window,
            respond_to_events,
            large_tx_only: false,
            retry_backoff: Duration::from_millis(200),
            shutdown_token: CancellationToken::new(),
        }
        .build();
        Fixture {
            handle,
            head_tx,
            event_rx,
        }
    }

    fn head(height: u64) -> ChainHeadEvent {
        ChainHeadEvent {
            endpoint: "endpoint-test".to_string(),
            height,
            observed_at: std::time::SystemTime::now(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn match_in_respond_mode_reaches_found_and_advances_past_it() {
        let matching = add_liquidity_eth_tx(9, router(), watched(), in_ether(1000), in_ether(5));
        let chain = FakeChain::new("primary")
            .with_block(empty_block(99))
            .with_block(block_with(100, vec![matching]));

        let mut fixture = spawn_monitor(chain, Duration::from_secs(60), true, 3);
        fixture.head_tx.send(head(99)).await.unwrap();
        fixture.head_tx.send(head(100)).await.unwrap();

        let outcome = fixture.handle.await.unwrap();

        assert_eq!(outcome.state, MonitorState::Found);
        assert_eq!(outcome.next_height, Some(101));
        assert_eq!(outcome.tx_hash, Some(B256::with_last_byte(9)));

        let event = fixture.event_rx.recv().await.unwrap();
        assert!(event.matched);
        assert_eq!(event.block_height, 100);
        assert_eq!(event.token_amount, in_ether(1000));
        assert_eq!(event.counter_amount, in_ether(5));
    }

    #[tokio::test(start_paused = true)]
    async fn observe_mode_logs_the_match_and_runs_to_the_deadline() {
        let matching = add_liquidity_eth_tx(9, router(), watched(), in_ether(1000), in_ether(5));
        let chain = FakeChain::new("primary")
            .with_block(empty_block(99))
            .with_block(block_with(100, vec![matching]));

        let mut fixture = spawn_monitor(chain, Duration::from_secs(60), false, 3);
        fixture.head_tx.send(head(99)).await.unwrap();
        fixture.head_tx.send(head(100)).await.unwrap();

        let outcome = fixture.handle.await.unwrap();

        // never transitions to Found without respond mode
        assert_eq!(outcome.state, MonitorState::TimedOut);
        assert_eq!(outcome.next_height, Some(101));
        assert_eq!(outcome.tx_hash, None);

        let event = fixture.event_rx.recv().await.unwrap();
        assert!(event.matched);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_range_is_retried_from_the_same_pointer() {
        // the head announces 50 but the block only appears after the first
        // range attempt has exhausted its retry budget
        let chain = FakeChain::new("primary")
            .with_block(empty_block(50))
            .with_header_misses(50, 3);

        let fixture = spawn_monitor(chain, Duration::from_secs(30), true, 2);
        fixture.head_tx.send(head(50)).await.unwrap();

        let outcome = fixture.handle.await.unwrap();

        // first attempt fails (2 misses burned), backoff, retry succeeds
        assert_eq!(outcome.state, MonitorState::TimedOut);
        assert_eq!(outcome.next_height, Some(51));
    }

    #[tokio::test(start_paused = true)]
    async fn stale_heads_do_not_move_the_pointer_backwards() {
        let chain = FakeChain::new("primary")
            .with_block(empty_block(99))
            .with_block(empty_block(100));
        let probe = chain.clone();

        let fixture = spawn_monitor(chain, Duration::from_secs(30), true, 3);
        fixture.head_tx.send(head(100)).await.unwrap();
        fixture.head_tx.send(head(99)).await.unwrap();

        let outcome = fixture.handle.await.unwrap();

        assert_eq!(outcome.state, MonitorState::TimedOut);
        assert_eq!(outcome.next_height, Some(101));
        // height 99 was never scanned: the pointer had already passed it
        assert_eq!(probe.header_fetches(), vec![100]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_ends_the_session_cleanly() {
        let chain = FakeChain::new("primary");
        let (head_tx, head_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = mpsc::channel(16);
        let scanner = Scanner {
            reader: chain,
            router: router(),
            token: watched(),
            wnative: Address::with_last_byte(0xCC),
            large_liquidity_threshold: U256::ZERO,
            retry: RetryPolicy::new(1, Duration::ZERO),
            event_tx,
        };
        let shutdown_token = CancellationToken::new();
        let mut handle = Builder {
            scanner,
            head_rx,
            deadline: Instant::now() + Duration::from_secs(3600),
            respond_to_events: true,
            large_tx_only: false,
            retry_backoff: Duration::from_millis(200),
            shutdown_token: shutdown_token.clone(),
        }
        .build();
        drop(head_tx);

        shutdown_token.cancel();
        let outcome = handle.shutdown().await.unwrap();
        assert_eq!(outcome.state, MonitorState::TimedOut);
    }
}
