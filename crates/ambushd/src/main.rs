use std::process::ExitCode;

use ambush_core::config::Config;
use ambushd::{Ambush, telemetry};
use color_eyre::eyre;
use tokio::{
    select,
    signal::unix::{SignalKind, signal},
};
use tracing::{error, info, instrument, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let cfg = match Config::load() {
        Err(err) => {
            eprintln!("failed to read config:\n{err:?}");
            return ExitCode::FAILURE;
        }
        Ok(cfg) => cfg,
    };
    // Debug for Config redacts the signing key
    eprintln!("starting with config:\n{cfg:#?}");

    let subscriber = telemetry::get_subscriber();
    telemetry::init_subscriber(subscriber);

    let mut service = match Ambush::spawn(cfg) {
        Ok(service) => service,
        Err(err) => {
            error!(%err, "failed to start the service");
            return ExitCode::FAILURE;
        }
    };

    let mut sigterm =
        signal(SignalKind::terminate()).expect("setting sigterm listener on unix should always work");

    let reason = select! {
        _ = sigterm.recv() => ExitReason::Sigterm,
        res = &mut service => match res {
            Ok(()) => ExitReason::Completed,
            Err(err) => ExitReason::Failed(err),
        },
    };

    shutdown(reason, service).await
}

enum ExitReason {
    Sigterm,
    Completed,
    Failed(eyre::Report),
}

#[instrument(skip_all)]
async fn shutdown(reason: ExitReason, service: Ambush) -> ExitCode {
    match reason {
        ExitReason::Sigterm => {
            info!("received SIGTERM, shutting down");
            if let Err(err) = service.shutdown().await {
                warn!(%err, "error while shutting down");
            }
            info!("shutdown successful");
            ExitCode::SUCCESS
        }
        ExitReason::Completed => {
            info!("monitoring run completed");
            ExitCode::SUCCESS
        }
        ExitReason::Failed(err) => {
            error!(%err, "service exited unexpectedly");
            ExitCode::FAILURE
        }
    }
}
