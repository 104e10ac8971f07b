use dbfleet::{
    HttpBackend,
    config::CONFIG,
    fleet::{self, FleetEvent},
    utils::logging,
};
use futures::StreamExt;
use mimalloc::MiMalloc;
use std::sync::Arc;
use tokio::signal;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{info, warn};

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = &CONFIG;
    logging::init(&cfg.basic.loglevel);

    info!(
        base_url = %cfg.backend.base_url,
        proxy = %cfg.backend.proxy.as_ref().map(|u| u.as_str()).unwrap_or("<none>"),
        loglevel = %cfg.basic.loglevel,
        poll_interval_ms = cfg.reconcile.poll_interval_ms,
    );

    let backend = Arc::new(HttpBackend::new(&cfg.backend)?);
    let handle = fleet::spawn(backend, cfg.reconcile.clone()).await?;
    let mut events = handle.events();

    match handle.resync().await {
        Ok(()) => {
            let summary = handle.summary().await?;
            info!(
                total = summary.total,
                running = summary.running,
                provisioning = summary.provisioning,
                failed = summary.failed,
                in_flight = summary.in_flight,
                "Initial sync complete"
            );
        }
        Err(e) => warn!(error = %e, "Initial sync failed; the reconciler keeps retrying"),
    }

    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            next = events.next() => match next {
                Some(Ok(event)) => log_event(&event),
                Some(Err(BroadcastStreamRecvError::Lagged(skipped))) => {
                    warn!(skipped, "Event log fell behind");
                }
                None => break,
            },
        }
    }

    info!("Shutting down.");
    handle.shutdown();
    Ok(())
}

fn log_event(event: &FleetEvent) {
    match event {
        FleetEvent::Completed { resource, from } => info!(
            id = resource.id(),
            name = %resource.name(),
            from = %from,
            to = %resource.state(),
            endpoint = %resource
                .endpoint()
                .and_then(|e| e.connection_string.as_deref())
                .unwrap_or("-"),
            "Operation completed"
        ),
        FleetEvent::Failed { resource, during } => warn!(
            id = resource.id(),
            name = %resource.name(),
            during = %during,
            "Operation failed"
        ),
        FleetEvent::Destroyed { id, name } => info!(id, name = %name, "Database destroyed"),
        FleetEvent::PollFailed { .. } => {}
        FleetEvent::Degraded { consecutive } => {
            warn!(consecutive, "Control plane unreachable; showing last known state")
        }
        FleetEvent::Recovered => info!("Control plane reachable again"),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
