//! The translation core: two cooperating loops sharing the broker and
//! bearer links plus the cross-cutting state (SPEC_FULL.md §4.6). The
//! pseudocode there is followed almost verbatim; the `tokio::select!`-free
//! shape (plain polling loops with bounded reads) mirrors it more directly
//! than the teacher's `modem/worker.rs::run`, which this is otherwise
//! grounded on for its reconnect/backoff idiom.

use crate::bearer::{BearerEvent, BearerWriter};
use crate::bearer::wire::AdminCommand;
use crate::broker::{self, BrokerLink, QueueNames};
use crate::error::BridgeError;
use crate::message::{decode_outbound, encode_inbound, failed_invalid_format, failed_sender_not_authorized, SmsKind};
use crate::multipart::MultipartTable;
use crate::policy::SenderPolicy;
use crate::segmentation::{segment_if_needed, RefCounter};
use crate::spool::Spool;
use lapin::Consumer;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const CONSUME_TIMEOUT: Duration = Duration::from_secs(1);
const READ_TIMEOUT: Duration = Duration::from_secs(1);
const RECONNECT_BACKOFF: Duration = Duration::from_secs(5);

pub struct OutboundContext {
    pub running: Arc<AtomicBool>,
    pub broker: Arc<BrokerLink>,
    pub consumer: Consumer,
    pub queues: QueueNames,
    pub policy: Arc<SenderPolicy>,
    pub spool: Arc<Spool>,
    pub bearer_writer: BearerWriter,
    pub refs: Arc<RefCounter>,
    pub box_id: String,
    pub route_to_smsc: Option<String>,
}

pub struct InboundContext {
    pub running: Arc<AtomicBool>,
    pub restart_requested: Arc<AtomicBool>,
    pub broker: Arc<BrokerLink>,
    pub queues: QueueNames,
    pub bearer_reader: crate::bearer::BearerReader,
    pub multipart: Arc<MultipartTable>,
}

/// Outbound loop: broker `send` queue -> decode -> authorise -> segment ->
/// bearer write (or spool). Runs until `running` is cleared.
pub async fn outbound_loop(mut ctx: OutboundContext) {
    info!("outbound loop starting");

    while ctx.running.load(Ordering::Relaxed) {
        if !ctx.broker.is_connected().await {
            match ctx.broker.reconnect().await {
                Ok((consumer, queues)) => {
                    ctx.consumer = consumer;
                    ctx.queues = queues;
                }
                Err(e) => {
                    warn!("broker reconnect failed: {e}, backing off {RECONNECT_BACKOFF:?}");
                    tokio::time::sleep(RECONNECT_BACKOFF).await;
                    continue;
                }
            }
        }

        let delivery = match tokio::time::timeout(
            CONSUME_TIMEOUT,
            broker::next_delivery(&mut ctx.consumer),
        )
        .await
        {
            Ok(Some(Ok(delivery))) => delivery,
            Ok(Some(Err(e))) => {
                warn!("broker consume error: {e}, backing off {RECONNECT_BACKOFF:?}");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
            Ok(None) => {
                warn!("broker consumer stream ended, backing off {RECONNECT_BACKOFF:?}");
                tokio::time::sleep(RECONNECT_BACKOFF).await;
                continue;
            }
            Err(_) => continue, // consume timeout, loop again
        };

        let body = delivery.body().to_vec();

        let mut msg = match decode_outbound(&body, ctx.route_to_smsc.as_deref()) {
            Some(msg) => msg,
            None => {
                let err = BridgeError::MalformedInput(String::from_utf8_lossy(&body).into_owned());
                warn!("{err}");
                let _ = ctx
                    .broker
                    .publish(&ctx.queues.failed, &failed_invalid_format(&body))
                    .await;
                let _ = delivery.ack().await;
                continue;
            }
        };

        if ctx.policy.is_authorization_required() && !ctx.policy.is_allowed(&msg.sender) {
            let err = BridgeError::PolicyReject(msg.sender.clone());
            warn!("{err}");
            let _ = ctx
                .broker
                .publish(
                    &ctx.queues.failed,
                    &failed_sender_not_authorized(&msg.sender, &msg.receiver),
                )
                .await;
            let _ = delivery.ack().await;
            continue;
        }

        msg.box_id = Some(ctx.box_id.clone());

        let parts = segment_if_needed(msg, &ctx.refs);
        let mut all_delivered = true;
        for part in parts {
            match ctx.bearer_writer.write(&part).await {
                Ok(()) => debug!("wrote part to bearer for {}", part.receiver),
                Err(e) => {
                    let transient = BridgeError::TransientNetwork(e);
                    warn!("{transient}, spooling");
                    if let Err(spool_err) = ctx.spool.append(&part).await {
                        let invariant = BridgeError::InternalInvariant(spool_err.to_string());
                        error!("{invariant}");
                        all_delivered = false;
                    }
                }
            }
        }

        // Ack only after every part was either written or safely spooled
        // (SPEC_FULL.md §9 known limitation: the stronger discipline).
        if all_delivered {
            if let Err(e) = delivery.ack().await {
                error!("failed to ack broker delivery: {e}");
            }
        }
    }

    info!("outbound loop stopping");
}

/// Inbound loop: bearer read -> dispatch -> (MO: reassembly) -> encode ->
/// broker publish. Also drives the multipart sweep on each read timeout.
pub async fn inbound_loop(mut ctx: InboundContext) {
    info!("inbound loop starting");

    while ctx.running.load(Ordering::Relaxed) {
        match ctx.bearer_reader.read(READ_TIMEOUT).await {
            BearerEvent::Disconnected => {
                warn!("bearer connection disconnected, stopping");
                ctx.running.store(false, Ordering::Relaxed);
                break;
            }
            BearerEvent::Timeout => {
                ctx.multipart.sweep().await;
                continue;
            }
            BearerEvent::Admin(AdminCommand::Shutdown) => {
                info!("received shutdown command from bearer server");
                ctx.running.store(false, Ordering::Relaxed);
                break;
            }
            BearerEvent::Admin(AdminCommand::Restart) => {
                info!("received restart command from bearer server");
                ctx.restart_requested.store(true, Ordering::Relaxed);
                ctx.running.store(false, Ordering::Relaxed);
                break;
            }
            BearerEvent::Admin(AdminCommand::Identify { .. }) => {
                debug!("ignoring unexpected identify frame from bearer server");
            }
            BearerEvent::Message(msg) => {
                let (body, queue) = match msg.kind {
                    SmsKind::Mo => {
                        let assembled = match ctx.multipart.offer(msg).await {
                            Some(assembled) => assembled,
                            None => continue,
                        };
                        (encode_inbound(&assembled, "mo"), ctx.queues.mo.clone())
                    }
                    SmsKind::ReportMo => (encode_inbound(&msg, "dlr"), ctx.queues.dlr.clone()),
                    _ => {
                        debug!("discarding bearer message of non-MO/DLR kind");
                        continue;
                    }
                };

                if !ctx.broker.is_connected().await {
                    if let Err(e) = ctx.broker.reconnect().await {
                        error!("broker reconnect failed: {e}, backing off {RECONNECT_BACKOFF:?}");
                        tokio::time::sleep(RECONNECT_BACKOFF).await;
                        continue;
                    }
                }

                if let Err(e) = ctx.broker.publish(&queue, &body).await {
                    error!("failed to publish inbound message to {queue}: {e}");
                }
            }
        }
    }

    info!("inbound loop stopping");
}
