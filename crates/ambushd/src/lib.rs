use std::{
    future::Future,
    pin::Pin,
    task::{Context, Poll},
};

use ambush_core::config::Config;
use color_eyre::eyre::{self, WrapErr as _};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

mod ambush;
pub mod telemetry;

/// Handle to a running ambush service. Awaiting it yields the service's
/// terminal result; [`Ambush::shutdown`] stops it early.
pub struct Ambush {
    shutdown_token: CancellationToken,
    task: Option<JoinHandle<eyre::Result<()>>>,
}

impl Ambush {
    pub fn spawn(cfg: Config) -> eyre::Result<Self> {
        let shutdown_token = CancellationToken::new();
        let inner = ambush::Ambush::new(cfg, shutdown_token.child_token())?;
        let task = tokio::spawn(inner.run());

        Ok(Self {
            shutdown_token,
            task: Some(task),
        })
    }

    pub async fn shutdown(mut self) -> eyre::Result<()> {
        self.shutdown_token.cancel();
        let result = self
            .task
            .take()
            .expect("shutdown must not be called twice")
            .await;
        flatten_join_result(result)
    }
}

impl Future for Ambush {
    type Output = eyre::Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        use futures::future::FutureExt as _;

        let task = self
            .task
            .as_mut()
            .expect("service must not be polled after completion");

        task.poll_unpin(cx).map(flatten_join_result)
    }
}

fn flatten_join_result(result: Result<eyre::Result<()>, JoinError>) -> eyre::Result<()> {
    result.wrap_err("service task panicked")?
}
