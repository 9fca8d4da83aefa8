//! Bearer server link: a single length-delimited framed TCP connection
//! carrying `BearerFrame`s (SPEC_FULL.md §4.2). Split into independent
//! reader/writer halves so the outbound and inbound loops never contend
//! for a lock (SPEC_FULL.md §5 "BearerLink: no internal mutex required;
//! reader and writer are on disjoint loops").

pub mod wire;

use crate::message::{SmsKind, SmsMessage};
use anyhow::{Context, Result};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};
use wire::{AdminCommand, BearerFrame, WireKind, WireSms};

pub enum BearerEvent {
    Message(SmsMessage),
    Admin(AdminCommand),
    Timeout,
    Disconnected,
}

type Codec = Framed<TcpStream, LengthDelimitedCodec>;

pub struct BearerReader {
    stream: SplitStream<Codec>,
}

pub struct BearerWriter {
    sink: SplitSink<Codec, Bytes>,
}

/// Connect to the bearer server, send the identify frame, and split the
/// connection into independent read/write halves.
pub async fn connect(host: &str, port: u16, box_id: &str) -> Result<(BearerReader, BearerWriter)> {
    let stream = TcpStream::connect((host, port))
        .await
        .with_context(|| format!("failed to connect to bearer server at {host}:{port}"))?;

    let framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (mut sink, stream) = framed.split();

    let identify = BearerFrame::Admin(AdminCommand::Identify {
        box_id: box_id.to_string(),
    });
    let bytes = Bytes::from(identify.encode()?);
    sink.send(bytes)
        .await
        .context("failed to send identify frame to bearer server")?;

    debug!("sent identify frame to bearer server as box_id={box_id}");
    Ok((BearerReader { stream }, BearerWriter { sink }))
}

impl BearerReader {
    /// Read the next frame, bounded by `timeout`. Returns
    /// `BearerEvent::Timeout` if nothing arrives in time, and
    /// `BearerEvent::Disconnected` if the socket closed.
    pub async fn read(&mut self, timeout: Duration) -> BearerEvent {
        match tokio::time::timeout(timeout, self.stream.next()).await {
            Err(_) => BearerEvent::Timeout,
            Ok(None) => BearerEvent::Disconnected,
            Ok(Some(Err(e))) => {
                warn!("bearer connection read error: {e}");
                BearerEvent::Disconnected
            }
            Ok(Some(Ok(bytes))) => match BearerFrame::decode(&bytes) {
                Ok(BearerFrame::Sms(wire)) => BearerEvent::Message(wire_to_message(wire)),
                Ok(BearerFrame::Admin(cmd)) => BearerEvent::Admin(cmd),
                Err(e) => {
                    warn!("dropping undecodable bearer frame: {e}");
                    BearerEvent::Timeout
                }
            },
        }
    }
}

impl BearerWriter {
    /// Write an outbound message to the bearer server. Fire-and-forget:
    /// the caller decides what to do on failure (spool, in this daemon).
    pub async fn write(&mut self, msg: &SmsMessage) -> Result<()> {
        let frame = BearerFrame::Sms(message_to_wire(msg));
        let bytes = Bytes::from(frame.encode()?);
        self.sink
            .send(bytes)
            .await
            .context("failed to write message to bearer server")
    }

    pub async fn close(&mut self) {
        let _ = self.sink.close().await;
    }
}

fn message_to_wire(msg: &SmsMessage) -> WireSms {
    WireSms {
        kind: match msg.kind {
            SmsKind::MtPush => WireKind::MtPush,
            SmsKind::Mo => WireKind::Mo,
            SmsKind::ReportMo => WireKind::ReportMo,
            SmsKind::Other => WireKind::MtPush,
        },
        sender: msg.sender.clone(),
        receiver: msg.receiver.clone(),
        text: msg.text.clone(),
        udh: msg.udh.clone(),
        coding: msg.coding,
        mclass: msg.mclass,
        priority: msg.priority,
        dlr_mask: msg.dlr_mask,
        validity: msg.validity,
        deferred: msg.deferred,
        smsc_route: msg.smsc_route.clone(),
        box_id: msg.box_id.clone(),
        dlr_status: msg.dlr_status,
    }
}

fn wire_to_message(wire: WireSms) -> SmsMessage {
    let kind = match wire.kind {
        WireKind::MtPush => SmsKind::MtPush,
        WireKind::Mo => SmsKind::Mo,
        WireKind::ReportMo => SmsKind::ReportMo,
    };

    let mut msg = SmsMessage::new(kind, wire.sender, wire.receiver, wire.text);
    msg.udh = wire.udh;
    msg.coding = wire.coding;
    msg.mclass = wire.mclass;
    msg.priority = wire.priority;
    msg.dlr_mask = wire.dlr_mask;
    msg.validity = wire.validity;
    msg.deferred = wire.deferred;
    msg.smsc_route = wire.smsc_route;
    msg.box_id = wire.box_id;
    msg.dlr_status = wire.dlr_status;
    msg
}
