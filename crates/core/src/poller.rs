//! Endpoint pool head poller: round-robins the configured endpoints and
//! emits a [`ChainHeadEvent`] whenever the chain head advances.

use std::{
    pin::Pin,
    time::{Duration, SystemTime},
};

use color_eyre::eyre::{self, WrapErr as _};
use tokio::{
    select,
    sync::mpsc,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::{
    endpoint::{ChainRead, Endpoint, Health},
    events::ChainHeadEvent,
};

/// Pause after one full pass over the endpoint list, bounding request rate.
pub const PASS_DELAY: Duration = Duration::from_millis(100);

pub struct Builder<R> {
    pub endpoints: Vec<R>,
    pub head_tx: mpsc::Sender<ChainHeadEvent>,
    pub deadline: Instant,
    pub pass_delay: Duration,
    pub shutdown_token: CancellationToken,
}

impl<R: ChainRead + 'static> Builder<R> {
    pub fn build(self) -> Handle {
        let Self {
            endpoints,
            head_tx,
            deadline,
            pass_delay,
            shutdown_token,
        } = self;

        let worker = Worker {
            endpoints: endpoints.into_iter().map(Endpoint::new).collect(),
            head_tx,
            deadline,
            pass_delay,
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
    worker_handle: Option<tokio::task::JoinHandle<eyre::Result<()>>>,
}

impl Handle {
    pub async fn shutdown(&mut self) -> eyre::Result<()> {
        self.shutdown_token.cancel();
        self.worker_handle
            .take()
            .expect("shutdown must not be called twice")
            .await
            .wrap_err("head poller task panicked")?
    }
}

// Awaiting the handle deals with the Worker's result
impl Future for Handle {
    type Output = eyre::Result<()>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Self::Output> {
        use futures::future::FutureExt as _;

        let task = self
            .worker_handle
            .as_mut()
            .expect("poller handle must not be polled after shutdown");

        task.poll_unpin(cx).map(|result| match result {
            Ok(worker_res) => worker_res,
            Err(e) => Err(e).wrap_err("head poller task panicked"),
        })
    }
}

struct Worker<R> {
    endpoints: Vec<Endpoint<R>>,
    head_tx: mpsc::Sender<ChainHeadEvent>,
    deadline: Instant,
    pass_delay: Duration,
    shutdown_token: CancellationToken,
}

impl<R: ChainRead> Worker<R> {
    #[instrument(name = "head_poller", skip(self), fields(endpoints = self.endpoints.len()))]
    async fn run(mut self) -> eyre::Result<()> {
        // process-wide last known head; slower endpoints reporting an
        // already-seen height are deduplicated here
        let mut last_known_head: Option<u64> = None;

        'polling: while Instant::now() < self.deadline {
            for idx in 0..self.endpoints.len() {
                if self.shutdown_token.is_cancelled() || Instant::now() >= self.deadline {
                    break 'polling;
                }

                let endpoint = &mut self.endpoints[idx];
                match endpoint.reader.latest_height().await {
                    Ok(height) => {
                        endpoint.health = Health::Reachable;
                        endpoint.last_seen_height = Some(height);

                        if last_known_head.map_or(true, |head| height > head) {
                            last_known_head = Some(height);
                            let event = ChainHeadEvent {
                                endpoint: endpoint.reader.label().to_string(),
                                height,
                                observed_at: SystemTime::now(),
                            };
                            debug!(
                                endpoint = endpoint.reader.label(),
                                head = height,
                                "chain head advanced"
                            );
                            if self.head_tx.send(event).await.is_err() {
                                info!("head receiver dropped, stopping poller");
                                break 'polling;
                            }
                        }
                    }
                    // endpoint failures are never fatal to the poller
                    Err(error) => {
                        endpoint.health = Health::Degraded;
                        debug!(
                            endpoint = endpoint.reader.label(),
                            %error,
                            "ignorable: endpoint poll failed, trying next"
                        );
                    }
                }
            }

            select! {
                () = self.shutdown_token.cancelled() => break 'polling,
                () = tokio::time::sleep(self.pass_delay) => {}
            }
        }

        info!(?last_known_head, "head poller finished");
        Ok(())
    }
}
