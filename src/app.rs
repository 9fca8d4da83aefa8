//! Process lifecycle: connect both links, drain and retry the spool, spawn
//! the outbound/inbound loops, and join them (SPEC_FULL.md §4.7). The
//! task-join shape is grounded on the teacher's `app.rs::AppHandles`; signal
//! handling follows the original's SIGINT/SIGTERM/SIGHUP contract.

use crate::bearer;
use crate::broker::BrokerLink;
use crate::config::AppConfig;
use crate::multipart::MultipartTable;
use crate::pipeline::{inbound_loop, outbound_loop, InboundContext, OutboundContext};
use crate::policy::SenderPolicy;
use crate::segmentation::RefCounter;
use crate::spool::Spool;
use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// One full daemon lifetime: connect, drain the spool, run both pipeline
/// loops until shutdown or a restart is requested.
pub struct Daemon {
    running: Arc<AtomicBool>,
    restart_requested: Arc<AtomicBool>,
    handles: Vec<(&'static str, JoinHandle<()>)>,
}

impl Daemon {
    pub async fn start(config: AppConfig) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let restart_requested = Arc::new(AtomicBool::new(false));

        let policy = Arc::new(match &config.bridge.allowed_senders {
            Some(path) => SenderPolicy::load(path).with_context(|| {
                format!("failed to load allowed-senders file {}", path.display())
            })?,
            None => SenderPolicy::disabled(),
        });

        let spool = Arc::new(Spool::new(config.bridge.store_file.clone()));
        let multipart = Arc::new(MultipartTable::new(
            Duration::from_secs(config.bridge.multipart_timeout_secs),
            config.bridge.disable_multipart_catenation,
        ));
        let refs = Arc::new(RefCounter::new());

        let (broker, consumer, queues) = BrokerLink::connect(config.broker.clone()).await?;
        let broker = Arc::new(broker);

        let (bearer_reader, mut bearer_writer) = bearer::connect(
            &config.bearer.host,
            config.bearer.port,
            &config.bridge.box_id,
        )
        .await?;

        let redelivered = spool.retry(|msg| bearer_writer.write(&msg)).await.unwrap_or_else(|e| {
            warn!("failed to read spool file at startup: {e}");
            0
        });
        if redelivered > 0 {
            info!("redelivered {redelivered} spooled message(s) at startup");
        }

        let mut handles: Vec<(&'static str, JoinHandle<()>)> = Vec::new();

        let outbound_ctx = OutboundContext {
            running: running.clone(),
            broker: broker.clone(),
            consumer,
            queues: queues.clone(),
            policy,
            spool,
            bearer_writer,
            refs,
            box_id: config.bridge.box_id.clone(),
            route_to_smsc: config.bridge.route_to_smsc.clone(),
        };
        handles.push(("outbound", tokio::spawn(outbound_loop(outbound_ctx))));

        let inbound_ctx = InboundContext {
            running: running.clone(),
            restart_requested: restart_requested.clone(),
            broker,
            queues,
            bearer_reader,
            multipart,
        };
        handles.push(("inbound", tokio::spawn(inbound_loop(inbound_ctx))));

        handles.push((
            "signals",
            tokio::spawn(watch_signals(running.clone(), restart_requested.clone())),
        ));

        Ok(Self {
            running,
            restart_requested,
            handles,
        })
    }

    /// Run until every task exits (clean shutdown, a fatal error in one of
    /// them, or a signal), then report whether a restart was requested.
    pub async fn run(self) -> bool {
        let futures: Vec<_> = self
            .handles
            .into_iter()
            .map(|(name, handle)| {
                Box::pin(async move {
                    match handle.await {
                        Ok(()) => info!("{name} task finished"),
                        Err(e) => warn!("{name} task panicked: {e}"),
                    }
                })
            })
            .collect();

        let (_, _, remaining) = futures::future::select_all(futures).await;
        self.running.store(false, Ordering::Relaxed);
        drop(remaining);

        self.restart_requested.load(Ordering::Relaxed)
    }
}

/// Translate SIGINT/SIGTERM into a clean shutdown and SIGHUP into a
/// shutdown-then-restart, matching the original's signal handling contract.
async fn watch_signals(running: Arc<AtomicBool>, restart_requested: Arc<AtomicBool>) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(e) => return warn!("failed to install SIGINT handler: {e}"),
    };
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => return warn!("failed to install SIGTERM handler: {e}"),
    };
    let mut sighup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => return warn!("failed to install SIGHUP handler: {e}"),
    };

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT, shutting down"),
        _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        _ = sighup.recv() => {
            info!("received SIGHUP, restarting");
            restart_requested.store(true, Ordering::Relaxed);
        }
    }

    running.store(false, Ordering::Relaxed);
}
